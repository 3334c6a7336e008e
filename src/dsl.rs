//! A small purpose-built expression parser/evaluator for `.pattern` file
//! bodies: string/number/identifier literals, positional and `key=value`
//! named-arg function calls, and `.method()` chaining — enough surface for
//! pattern authors without embedding a general scripting runtime.

use std::collections::HashMap;
use std::fmt;

use crate::color::{resolve_color, Hsv};
use crate::modulator::{Modulator, WaveType};
use crate::palette::PaletteRef;
use crate::pattern::{cat, light, stack, ColorSpec, LightPattern};
use crate::time::Fraction;

#[derive(Debug)]
pub struct DslError(pub String);

impl fmt::Display for DslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pattern expression error: {}", self.0)
    }
}

impl std::error::Error for DslError {}

// ---------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    String(String),
    Number(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Equals,
}

fn tokenize(src: &str) -> Result<Vec<Token>, DslError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' if i + 1 < chars.len() && !chars[i + 1].is_ascii_digit() => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Equals);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut j = i + 1;
                let mut s = String::new();
                while j < chars.len() && chars[j] != quote {
                    s.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(DslError(format!("unterminated string starting at {i}")));
                }
                tokens.push(Token::String(s));
                i = j + 1;
            }
            '#' => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_ascii_hexdigit() {
                    j += 1;
                }
                let hex: String = chars[i..j].iter().collect();
                tokens.push(Token::String(hex));
                i = j;
            }
            c if c.is_ascii_digit() || (c == '-' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| DslError(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(value));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                tokens.push(Token::Ident(chars[i..j].iter().collect()));
                i = j;
            }
            other => return Err(DslError(format!("unexpected character '{other}' at {i}"))),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------
// Parser — produces an expression tree, then `eval` walks it directly.
// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Expr {
    String(String),
    Number(f64),
    List(Vec<Expr>),
    Call {
        receiver: Option<Box<Expr>>,
        name: String,
        positional: Vec<Expr>,
        named: HashMap<String, Expr>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), DslError> {
        match self.next() {
            Some(t) if &t == expected => Ok(()),
            other => Err(DslError(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    /// Parses a full chained expression: `base.method(args).method(args)...`.
    fn parse_chain(&mut self) -> Result<Expr, DslError> {
        let mut expr = self.parse_primary()?;
        while let Some(Token::Dot) = self.peek() {
            self.next();
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                other => return Err(DslError(format!("expected method name, found {other:?}"))),
            };
            let (positional, named) = self.parse_args()?;
            expr = Expr::Call {
                receiver: Some(Box::new(expr)),
                name,
                positional,
                named,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, DslError> {
        match self.next() {
            Some(Token::String(s)) => Ok(Expr::String(s)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_chain()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.next();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let (positional, named) = self.parse_args()?;
                    Ok(Expr::Call {
                        receiver: None,
                        name,
                        positional,
                        named,
                    })
                } else {
                    // a bare identifier acts as a zero-arg call, e.g. `rainbow`
                    Ok(Expr::Call {
                        receiver: None,
                        name,
                        positional: Vec::new(),
                        named: HashMap::new(),
                    })
                }
            }
            other => Err(DslError(format!("expected expression, found {other:?}"))),
        }
    }

    fn parse_args(&mut self) -> Result<(Vec<Expr>, HashMap<String, Expr>), DslError> {
        self.expect(&Token::LParen)?;
        let mut positional = Vec::new();
        let mut named = HashMap::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                if let Some(Token::Ident(ident)) = self.peek().cloned() {
                    if self.tokens.get(self.pos + 1) == Some(&Token::Equals) {
                        self.next();
                        self.next();
                        let value = self.parse_chain()?;
                        named.insert(ident, value);
                        if self.peek() == Some(&Token::Comma) {
                            self.next();
                            continue;
                        } else {
                            break;
                        }
                    }
                }
                positional.push(self.parse_chain()?);
                if self.peek() == Some(&Token::Comma) {
                    self.next();
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        Ok((positional, named))
    }
}

pub fn parse(src: &str) -> Result<LightPattern, DslError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(DslError("empty pattern body".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_chain()?;
    if parser.pos != parser.tokens.len() {
        return Err(DslError("trailing input after expression".to_string()));
    }
    eval_pattern(&expr)
}

// ---------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------

fn eval_string(expr: &Expr) -> Result<String, DslError> {
    match expr {
        Expr::String(s) => Ok(s.clone()),
        _ => Err(DslError("expected a string argument".to_string())),
    }
}

fn eval_number(expr: &Expr) -> Result<f64, DslError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        _ => Err(DslError("expected a numeric argument".to_string())),
    }
}

fn eval_color(expr: &Expr) -> Result<ColorSpec, DslError> {
    match expr {
        Expr::String(s) => resolve_color(s).map(ColorSpec::Literal).map_err(|e| DslError(e.to_string())),
        Expr::Call { receiver: None, name, positional, .. } => match name.as_str() {
            "palette_index" => Ok(ColorSpec::Ref(PaletteRef::index(eval_number(&positional[0])? as usize))),
            "palette_random" => Ok(ColorSpec::Ref(PaletteRef::random())),
            "palette_cycle" => Ok(ColorSpec::Ref(PaletteRef::cycle())),
            "palette_random_hold" => Ok(ColorSpec::Ref(PaletteRef::random_hold(eval_number(&positional[0])?))),
            "palette_cycle_hold" => Ok(ColorSpec::Ref(PaletteRef::cycle_hold(eval_number(&positional[0])?))),
            "palette_random_blend" => Ok(ColorSpec::Ref(PaletteRef::random_blend(
                eval_number(&positional[0])?,
                eval_number(&positional[1])?,
            ))),
            other => Err(DslError(format!("unknown color expression '{other}'"))),
        },
        _ => Err(DslError("expected a color argument".to_string())),
    }
}

fn eval_wave_type(name: &str) -> Result<WaveType, DslError> {
    match name {
        "sine" => Ok(WaveType::Sine),
        "triangle" => Ok(WaveType::Triangle),
        "saw" => Ok(WaveType::Saw),
        "square" => Ok(WaveType::Square),
        other => Err(DslError(format!("unknown wave type '{other}'"))),
    }
}

fn eval_fraction(expr: &Expr) -> Result<Fraction, DslError> {
    Ok(Fraction::from_f64_limited(eval_number(expr)?, 1_000_000))
}

fn named_number(named: &HashMap<String, Expr>, key: &str, default: f64) -> Result<f64, DslError> {
    named.get(key).map(eval_number).unwrap_or(Ok(default))
}

fn named_string(named: &HashMap<String, Expr>, key: &str) -> Result<Option<String>, DslError> {
    named.get(key).map(eval_string).transpose()
}

fn eval_pattern(expr: &Expr) -> Result<LightPattern, DslError> {
    match expr {
        Expr::Call { receiver: None, name, positional, .. } if name == "light" => {
            let notation = eval_string(&positional[0])?;
            Ok(light(&notation))
        }
        Expr::Call { receiver: None, name, positional, .. } if name == "stack" => {
            let Some(Expr::List(items)) = positional.first() else {
                return Err(DslError("stack() expects a list argument".to_string()));
            };
            Ok(stack(items.iter().map(eval_pattern).collect::<Result<Vec<_>, _>>()?))
        }
        Expr::Call { receiver: None, name, positional, .. } if name == "cat" => {
            let Some(Expr::List(items)) = positional.first() else {
                return Err(DslError("cat() expects a list argument".to_string()));
            };
            Ok(cat(items.iter().map(eval_pattern).collect::<Result<Vec<_>, _>>()?))
        }
        Expr::Call {
            receiver: Some(receiver),
            name,
            positional,
            named,
        } => {
            let base = eval_pattern(receiver)?;
            apply_method(base, name, positional, named)
        }
        Expr::Call { receiver: None, name, .. } => Err(DslError(format!("unknown pattern constructor '{name}'"))),
        _ => Err(DslError("expected a pattern expression".to_string())),
    }
}

fn apply_method(
    base: LightPattern,
    name: &str,
    positional: &[Expr],
    named: &HashMap<String, Expr>,
) -> Result<LightPattern, DslError> {
    match name {
        "fast" => Ok(base.fast(eval_fraction(&positional[0])?)),
        "slow" => Ok(base.slow(eval_fraction(&positional[0])?)),
        "early" => Ok(base.early(eval_fraction(&positional[0])?)),
        "late" => Ok(base.late(eval_fraction(&positional[0])?)),
        "rev" => Ok(base.rev()),
        "shuffle" => {
            let seed = positional.first().map(eval_number).transpose()?.map(|n| n as i64);
            Ok(base.shuffle(seed))
        }
        "pick" => {
            let min = eval_number(&positional[0])?;
            let max = positional.get(1).map(eval_number).transpose()?;
            let seed = named_number(named, "seed", 0.0).ok().map(|n| n as i64);
            let hold = named.get("hold").map(eval_number).transpose()?;
            Ok(base.pick(min, max, seed, hold))
        }
        "seq" => {
            let slots = positional.first().map(eval_number).transpose()?.map(|n| n as usize);
            let per_group = named.get("per_group").map(eval_number).transpose()?.map(|n| n != 0.0).unwrap_or(false);
            Ok(base.seq(slots, per_group))
        }
        "autonomous" => {
            let min_freq = named_number(named, "min_freq", 0.5)?;
            let max_freq = named_number(named, "max_freq", 2.0)?;
            let duty = named_number(named, "duty", 0.5)?;
            let seed = named.get("seed").map(eval_number).transpose()?.map(|n| n as i64);
            let colors = match named.get("colors") {
                Some(Expr::List(items)) => Some(
                    items
                        .iter()
                        .map(|e| match eval_color(e)? {
                            ColorSpec::Literal(c) => Ok(c),
                            ColorSpec::Ref(_) => Err(DslError("autonomous() colors must be literal".to_string())),
                        })
                        .collect::<Result<Vec<Hsv>, DslError>>()?,
                ),
                Some(_) => return Err(DslError("autonomous() colors= expects a list".to_string())),
                None => None,
            };
            Ok(base.autonomous(min_freq, max_freq, duty, colors, seed))
        }
        "color" => Ok(base.color(eval_color(&positional[0])?)),
        "color_envelope" => {
            let flash = named.get("flash").map(eval_color).transpose()?;
            let fade = named.get("fade").map(eval_color).transpose()?;
            Ok(base.color_envelope(flash, fade))
        }
        "intensity" => Ok(base.intensity(eval_number(&positional[0])?)),
        "envelope" => {
            let attack = named_number(named, "attack", 0.0)?;
            let decay = named_number(named, "decay", 0.0)?;
            let sustain = named_number(named, "sustain", 1.0)?;
            let release = named_number(named, "release", 0.0)?;
            Ok(base.envelope(attack, decay, sustain, release))
        }
        "modulate" => {
            let wave = match named_string(named, "wave")? {
                Some(w) => eval_wave_type(&w)?,
                None => WaveType::Sine,
            };
            let frequency = named_number(named, "frequency", 1.0)?;
            let min = named_number(named, "min", 0.0)?;
            let max = named_number(named, "max", 1.0)?;
            let modulator = Modulator::new(wave, frequency).with_range(min, max);
            Ok(base.modulate(modulator))
        }
        "wave" => {
            let wave = match positional.first() {
                Some(Expr::String(s)) => eval_wave_type(s)?,
                _ => WaveType::Sine,
            };
            let frequency = named_number(named, "frequency", 1.0)?;
            let min = named_number(named, "min", 0.0)?;
            let max = named_number(named, "max", 1.0)?;
            let direction = named_number(named, "direction", 1.0)?;
            let event_relative = named.get("event_relative").map(eval_number).transpose()?.map(|n| n != 0.0).unwrap_or(false);
            Ok(base.wave(wave, frequency, min, max, direction, event_relative))
        }
        "zone" => {
            let zone_name = eval_string(&positional[0])?;
            let fallback = named_string(named, "fallback")?;
            Ok(base.zone(zone_name, fallback))
        }
        other => Err(DslError(format!("unknown method '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Fraction as F, TimeSpan};
    use crate::value::LightContext;

    fn ctx() -> LightContext {
        LightContext::default_context(6)
    }

    #[test]
    fn parses_simple_light_call() {
        let p = parse("light(\"0 1 2\")").unwrap();
        let events = p.query(TimeSpan::new(F::ZERO, F::ONE), &ctx());
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn parses_method_chain() {
        let p = parse("light(\"0\").fast(2).intensity(0.5)").unwrap();
        let events = p.query(TimeSpan::new(F::ZERO, F::ONE), &ctx());
        assert_eq!(events.len(), 2);
        assert!((events[0].value.intensity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn parses_stack_of_patterns() {
        let p = parse("stack([light(\"0\"), light(\"1\")])").unwrap();
        let events = p.query(TimeSpan::new(F::ZERO, F::ONE), &ctx());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn parses_color_with_hex() {
        let p = parse("light(\"0\").color(\"#FF0000\")").unwrap();
        let events = p.query(TimeSpan::new(F::ZERO, F::ONE), &ctx());
        assert!(events[0].value.color.is_some());
    }

    #[test]
    fn parses_named_envelope_args() {
        let p = parse("light(\"0\").envelope(attack=0.1, decay=0.2, sustain=0.5, release=1.0)").unwrap();
        let events = p.query(TimeSpan::new(F::ZERO, F::ONE), &ctx());
        let env = events[0].value.envelope.unwrap();
        assert_eq!(env.attack, 0.1);
        assert_eq!(env.release, 1.0);
    }

    #[test]
    fn unknown_constructor_is_an_error() {
        assert!(parse("nonsense(\"x\")").is_err());
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(parse("light(\"0").is_err());
    }

    #[test]
    fn empty_body_is_an_error() {
        assert!(parse("").is_err());
    }
}
