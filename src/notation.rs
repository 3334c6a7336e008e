//! Mini-notation: terse space-separated sequences like `"0 1 2"`,
//! `"all ~*15"`, `"left right"` compiled into timed events within one cycle.

use crate::time::Fraction;

const GROUPS: &[&str] = &["all", "left", "right", "odd", "even", "front", "back", "center"];

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedEvent {
    pub start: Fraction,
    pub end: Fraction,
    pub light_id: Option<i64>,
    pub group: Option<String>,
    pub is_rest: bool,
}

impl ParsedEvent {
    pub fn duration(&self) -> Fraction {
        self.end - self.start
    }
}

/// Parses `notation` into timed events spanning one cycle (`[0, 1)`).
pub fn parse_mini(notation: &str) -> Vec<ParsedEvent> {
    let tokens = tokenize(notation);
    if tokens.is_empty() {
        return Vec::new();
    }
    parse_sequence(&tokens, Fraction::ZERO, Fraction::ONE)
}

/// `parse_mini` with rests dropped, as `(start, end, light_id, group)`.
pub fn parse_to_query_data(notation: &str) -> Vec<(Fraction, Fraction, Option<i64>, Option<String>)> {
    parse_mini(notation)
        .into_iter()
        .filter(|e| !e.is_rest)
        .map(|e| (e.start, e.end, e.light_id, e.group))
        .collect()
}

fn tokenize(notation: &str) -> Vec<String> {
    let s: Vec<char> = notation.trim().chars().collect();
    let mut tokens: Vec<String> = Vec::new();
    let mut i = 0;

    while i < s.len() {
        let c = s[i];

        if c.is_whitespace() {
            while i < s.len() && s[i].is_whitespace() {
                i += 1;
            }
            if tokens.last().map(|t| t.as_str()) != Some(" ") {
                tokens.push(" ".to_string());
            }
            continue;
        }

        if c == '~' {
            tokens.push("~".to_string());
            i += 1;
            continue;
        }

        if (c == '*' || c == '/') && i + 1 < s.len() {
            let mut j = i + 1;
            while j < s.len() && (s[j].is_ascii_digit() || s[j] == '.') {
                j += 1;
            }
            if j > i + 1 {
                tokens.push(s[i..j].iter().collect());
                i = j;
                continue;
            }
            tokens.push(c.to_string());
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let mut j = i;
            while j < s.len() && s[j].is_ascii_digit() {
                j += 1;
            }
            tokens.push(s[i..j].iter().collect());
            i = j;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut j = i;
            while j < s.len() && (s[j].is_alphanumeric() || s[j] == '_') {
                j += 1;
            }
            tokens.push(s[i..j].iter().collect());
            i = j;
            continue;
        }

        i += 1;
    }

    if tokens.last().map(|t| t.as_str()) == Some(" ") {
        tokens.pop();
    }

    tokens
}

fn split_by_space(tokens: &[String]) -> Vec<Vec<String>> {
    let mut elements: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for token in tokens {
        if token == " " {
            if !current.is_empty() {
                elements.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token.clone());
        }
    }
    if !current.is_empty() {
        elements.push(current);
    }
    elements
}

fn parse_sequence(tokens: &[String], start: Fraction, end: Fraction) -> Vec<ParsedEvent> {
    let elements = split_by_space(tokens);
    if elements.is_empty() {
        return Vec::new();
    }

    let mut total_slots: i64 = 0;
    let mut element_slots: Vec<i64> = Vec::with_capacity(elements.len());
    for element in &elements {
        let mut slots = 1i64;
        if element.len() > 1 && element[1].starts_with('*') {
            if let Ok(n) = element[1][1..].parse::<i64>() {
                slots = n;
            } else if let Ok(f) = element[1][1..].parse::<f64>() {
                slots = f as i64;
            }
        }
        element_slots.push(slots);
        total_slots += slots;
    }
    if total_slots <= 0 {
        return Vec::new();
    }

    let duration = end - start;
    let slot_duration = duration / Fraction::from_int(total_slots);

    let mut events = Vec::new();
    let mut current_slot: i64 = 0;
    for (element, slots) in elements.iter().zip(element_slots.iter()) {
        let slot_start = start + slot_duration * Fraction::from_int(current_slot);
        let slot_end = slot_start + slot_duration * Fraction::from_int(*slots);
        events.extend(parse_element(element, slot_start, slot_end));
        current_slot += slots;
    }

    events
}

fn parse_element(tokens: &[String], start: Fraction, end: Fraction) -> Vec<ParsedEvent> {
    if tokens.is_empty() {
        return Vec::new();
    }

    let value_token = &tokens[0];
    let modifier = tokens.get(1);

    let is_rest = value_token == "~";
    let mut light_id = None;
    let mut group = None;

    if is_rest {
        // no light
    } else if let Ok(n) = value_token.parse::<i64>() {
        light_id = Some(n);
    } else {
        let lower = value_token.to_lowercase();
        // An unrecognized word is still accepted as a group name — patterns
        // may reference venue-specific groups the notation layer doesn't know.
        let _ = GROUPS.contains(&lower.as_str());
        group = Some(lower);
    }

    if let Some(modifier) = modifier {
        if let Some(rest) = modifier.strip_prefix('*') {
            let repeat_count = rest.parse::<i64>().or_else(|_| rest.parse::<f64>().map(|f| f as i64));
            if let Ok(repeat_count) = repeat_count {
                if repeat_count > 0 {
                    let sub_duration = (end - start) / Fraction::from_int(repeat_count);
                    let mut events = Vec::with_capacity(repeat_count as usize);
                    for i in 0..repeat_count {
                        let sub_start = start + sub_duration * Fraction::from_int(i);
                        let sub_end = sub_start + sub_duration;
                        events.push(ParsedEvent {
                            start: sub_start,
                            end: sub_end,
                            light_id,
                            group: group.clone(),
                            is_rest,
                        });
                    }
                    return events;
                }
            }
        }
        // `/n` (slow) is recognized syntactically but applied at a higher
        // level — no-op here, matching the upstream notation's scoping.
    }

    vec![ParsedEvent {
        start,
        end,
        light_id,
        group,
        is_rest,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(notation: &str) -> Vec<(Fraction, Fraction, Option<i64>, Option<String>)> {
        parse_to_query_data(notation)
    }

    #[test]
    fn numbers_split_evenly() {
        let events = query("0 1 2");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].0, Fraction::ZERO);
        assert_eq!(events[0].1, Fraction::new(1, 3));
        assert_eq!(events[0].2, Some(0));
        assert_eq!(events[2].1, Fraction::ONE);
    }

    #[test]
    fn single_group_spans_full_cycle() {
        let events = query("all");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].3, Some("all".to_string()));
        assert_eq!(events[0].0, Fraction::ZERO);
        assert_eq!(events[0].1, Fraction::ONE);
    }

    #[test]
    fn rest_is_dropped_from_query_data_but_consumes_a_slot() {
        let events = query("0 ~");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, Fraction::new(1, 2));
    }

    #[test]
    fn repeat_modifier_expands_into_n_equal_events() {
        let events = query("~*3");
        assert_eq!(events.len(), 0, "rests filtered even when repeated");

        let raw = parse_mini("0*4");
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[0].end, Fraction::new(1, 4));
        assert_eq!(raw[3].end, Fraction::ONE);
    }

    #[test]
    fn repeat_modifier_counts_as_n_slots_for_sibling_timing() {
        // "all ~*15" = all for 1/16 of the cycle, then 15 silent slots.
        let raw = parse_mini("all ~*15");
        assert_eq!(raw.len(), 16);
        assert_eq!(raw[0].end, Fraction::new(1, 16));
        assert!(!raw[0].is_rest);
        assert!(raw[1].is_rest);
    }

    #[test]
    fn slow_modifier_is_syntactically_valid_but_inert() {
        let events = query("0/2");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, Fraction::ZERO);
        assert_eq!(events[0].1, Fraction::ONE);
    }

    #[test]
    fn unknown_word_is_still_treated_as_a_group() {
        let events = query("ceiling");
        assert_eq!(events[0].3, Some("ceiling".to_string()));
    }

    #[test]
    fn empty_notation_yields_no_events() {
        assert!(query("").is_empty());
        assert!(query("   ").is_empty());
    }
}
