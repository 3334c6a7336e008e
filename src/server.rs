//! Control-plane socket: newline-delimited JSON over `TcpListener`, one
//! reader/writer thread pair per connection (the teacher's
//! one-connection-per-thread idiom in `framework/midi.rs`, generalized from
//! MIDI ports to network sockets). The original shipped this over an
//! `aiohttp` WebSocket; no repo in the retrieval pack depends on a
//! WebSocket/web-framework crate, so the transport is generalized to plain
//! TCP text frames while the message catalogue stays unchanged.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde_json::{json, Value};

use crate::config::{LightingConfig, STATUS_BROADCAST_HZ};
use crate::engine::{Engine, EngineState, QuickAction, ZoneBrightness};
use crate::loader::{self};
use crate::midi::MidiOut;

/// Everything a connection handler needs, shared across every client.
pub struct Shared {
    pub engine: Mutex<Engine>,
    pub state: Mutex<EngineState>,
    pub midi_out: Mutex<Option<MidiOut>>,
    pub config_path: PathBuf,
    pub patterns_dir: PathBuf,
    pub render_fps: Mutex<f64>,
}

pub fn run(addr: &str, shared: Arc<Shared>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    info!("control server listening on {addr}");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let shared = shared.clone();
                thread::spawn(move || handle_connection(stream, shared));
            }
            Err(e) => warn!("control server accept error: {e}"),
        }
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, shared: Arc<Shared>) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
    info!("control connection opened: {peer}");

    let writer = Arc::new(Mutex::new(stream.try_clone().expect("failed to clone control socket")));

    let broadcast_shared = shared.clone();
    let broadcast_writer = writer.clone();
    let broadcast_handle = thread::spawn(move || {
        let interval = Duration::from_secs_f64(1.0 / STATUS_BROADCAST_HZ);
        loop {
            thread::sleep(interval);
            let doc = status_document(&broadcast_shared);
            if send(&broadcast_writer, &doc).is_err() {
                break;
            }
        }
    });

    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => dispatch(&shared, &request),
            Err(e) => json!({"type": "error", "message": format!("malformed JSON: {e}")}),
        };

        if send(&writer, &response).is_err() {
            break;
        }
    }

    info!("control connection closed: {peer}");
    drop(broadcast_handle);
}

fn send(writer: &Arc<Mutex<TcpStream>>, value: &Value) -> std::io::Result<()> {
    let mut stream = writer.lock().unwrap();
    let mut line = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    stream.write_all(line.as_bytes())
}

fn dispatch(shared: &Arc<Shared>, request: &Value) -> Value {
    let Some(msg_type) = request.get("type").and_then(|v| v.as_str()) else {
        return json!({"type": "error", "message": "missing 'type' field"});
    };

    match msg_type {
        "set_pattern" => handle_set_pattern(shared, request),
        "set_palette" => handle_set_palette(shared, request),
        "toggle_blackout" => handle_toggle_blackout(shared),
        "flash" => handle_flash(shared, request),
        "tap_tempo" => handle_midi_action(shared, |out| out.send_tap_tempo()),
        "sync" => handle_sync(shared),
        "start" => handle_midi_action(shared, |out| out.send_start()),
        "stop" => handle_midi_action(shared, |out| out.send_stop()),
        "get_status" => status_document(shared),
        "get_light_config" => handle_get_light_config(shared),
        "save_light_config" => handle_save_light_config(shared, request),
        "identify_light" => handle_identify_light(shared, request),
        "set_zone_brightness" => handle_set_zone_brightness(shared, request),
        "fade_out" => handle_fade_out(shared),
        "set_queue_mode" => handle_set_queue_mode(shared, request),
        "get_pattern_list" => pattern_list_document(shared),
        "get_pattern_source" => handle_get_pattern_source(shared, request),
        "save_pattern" => handle_save_pattern(shared, request),
        "delete_pattern" => handle_delete_pattern(shared, request),
        "validate_pattern" => handle_validate_pattern(request),
        other => json!({"type": "error", "message": format!("unknown type '{other}'")}),
    }
}

fn handle_set_pattern(shared: &Arc<Shared>, request: &Value) -> Value {
    let name = request.get("name").and_then(|v| v.as_str());
    let index = request.get("index").and_then(|v| v.as_u64()).map(|v| v as usize);

    let mut engine = shared.engine.lock().unwrap();
    let mut state = shared.state.lock().unwrap();

    if state.queue_mode > 0 {
        let Some(target_index) = resolve_pattern_index(&engine, name, index) else {
            return json!({"type": "error", "message": "unknown pattern"});
        };
        state.queue_target_bar = Some(state.bar() + state.queue_mode as u32);
        state.queued_pattern_index = Some(target_index);
        return status_document_locked(&engine, &state, shared);
    }

    let switched = match (name, index) {
        (Some(name), _) => engine.set_pattern_by_name(name),
        (None, Some(index)) if index < engine.patterns.len() => {
            engine.pattern_index = index;
            true
        }
        _ => false,
    };

    if !switched {
        return json!({"type": "error", "message": "unknown pattern"});
    }

    status_document_locked(&engine, &state, shared)
}

fn resolve_pattern_index(engine: &Engine, name: Option<&str>, index: Option<usize>) -> Option<usize> {
    if let Some(name) = name {
        return engine.patterns.index_of_name(name);
    }
    index.filter(|&i| i < engine.patterns.len())
}

fn handle_set_palette(shared: &Arc<Shared>, request: &Value) -> Value {
    let name = request.get("name").and_then(|v| v.as_str()).map(|s| s.to_string());
    let mut engine = shared.engine.lock().unwrap();
    engine.set_palette(name);
    let state = shared.state.lock().unwrap();
    status_document_locked(&engine, &state, shared)
}

fn handle_toggle_blackout(shared: &Arc<Shared>) -> Value {
    let mut state = shared.state.lock().unwrap();
    let now_blackout = !matches!(state.active_quick_action, Some((QuickAction::Blackout, _)));
    state.active_quick_action = if now_blackout { Some((QuickAction::Blackout, state.beat_position)) } else { None };
    let engine = shared.engine.lock().unwrap();
    status_document_locked(&engine, &state, shared)
}

fn handle_flash(shared: &Arc<Shared>, request: &Value) -> Value {
    let duration_beats = request.get("duration_beats").and_then(|v| v.as_f64()).unwrap_or(1.0);
    let mut state = shared.state.lock().unwrap();
    let trigger_beat = state.beat_position;
    state.active_quick_action = Some((QuickAction::Flash { duration_beats }, trigger_beat));
    let engine = shared.engine.lock().unwrap();
    status_document_locked(&engine, &state, shared)
}

fn handle_midi_action(shared: &Arc<Shared>, action: impl FnOnce(&mut MidiOut) -> Result<(), Box<dyn std::error::Error>>) -> Value {
    let mut midi_out = shared.midi_out.lock().unwrap();
    match midi_out.as_mut() {
        Some(out) => match action(out) {
            Ok(()) => json!({"type": "ok"}),
            Err(e) => json!({"type": "error", "message": e.to_string()}),
        },
        None => json!({"type": "error", "message": "no MIDI control output port configured"}),
    }
}

fn handle_sync(shared: &Arc<Shared>) -> Value {
    let result = handle_midi_action(shared, |out| out.send_sync());
    let mut state = shared.state.lock().unwrap();
    state.beat_position = 0.0;
    state.beat_count = 1;
    result
}

fn handle_get_light_config(shared: &Arc<Shared>) -> Value {
    match LightingConfig::load(&shared.config_path) {
        Ok(config) => json!({
            "type": "light_config",
            "light_order": config.hue.light_order,
            "custom_groups": config.hue.custom_groups,
            "zones": config.hue.zones,
        }),
        Err(e) => json!({"type": "error", "message": e.to_string()}),
    }
}

fn handle_save_light_config(shared: &Arc<Shared>, request: &Value) -> Value {
    let Some(light_order) = request.get("light_order").and_then(|v| v.as_array()) else {
        return json!({"type": "error", "message": "missing 'light_order' field"});
    };
    let light_order: Vec<String> = light_order.iter().filter_map(|v| v.as_str().map(String::from)).collect();

    let custom_groups = request
        .get("custom_groups")
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| (k.clone(), array_of_strings(v)))
                .collect()
        })
        .unwrap_or_default();

    let zones = request.get("zones").and_then(|v| v.as_object()).map(|obj| {
        obj.iter().map(|(k, v)| (k.clone(), array_of_strings(v))).collect()
    });

    match LightingConfig::save_light_config(&shared.config_path, light_order, custom_groups, zones) {
        Ok(()) => json!({"type": "ok"}),
        Err(e) => json!({"type": "error", "message": e.to_string()}),
    }
}

fn array_of_strings(value: &Value) -> Vec<String> {
    value.as_array().map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect()).unwrap_or_default()
}

fn handle_identify_light(shared: &Arc<Shared>, request: &Value) -> Value {
    let Some(index) = request.get("index").and_then(|v| v.as_u64()) else {
        return json!({"type": "error", "message": "missing 'index' field"});
    };
    let mut state = shared.state.lock().unwrap();
    state.identify_light_index = Some(index as usize);
    state.identify_until = Instant::now() + crate::engine::identify_duration();
    let engine = shared.engine.lock().unwrap();
    status_document_locked(&engine, &state, shared)
}

fn handle_set_zone_brightness(shared: &Arc<Shared>, request: &Value) -> Value {
    let Some(zone) = request.get("zone").and_then(|v| v.as_str()) else {
        return json!({"type": "error", "message": "missing 'zone' field"});
    };
    let Some(value) = request.get("value").and_then(|v| v.as_f64()) else {
        return json!({"type": "error", "message": "missing 'value' field"});
    };
    let clamped = value.clamp(0.0, 1.0);

    let mut state = shared.state.lock().unwrap();
    match zone {
        "ceiling" => state.zone_brightness.ceiling = clamped,
        "perimeter" => state.zone_brightness.perimeter = clamped,
        "ambient" => state.zone_brightness.ambient = clamped,
        other => return json!({"type": "error", "message": format!("unknown zone '{other}'")}),
    }
    let engine = shared.engine.lock().unwrap();
    status_document_locked(&engine, &state, shared)
}

fn handle_fade_out(shared: &Arc<Shared>) -> Value {
    let mut state = shared.state.lock().unwrap();
    state.fade_active = true;
    state.fade_start_time = Instant::now();
    let engine = shared.engine.lock().unwrap();
    status_document_locked(&engine, &state, shared)
}

fn handle_set_queue_mode(shared: &Arc<Shared>, request: &Value) -> Value {
    let Some(mode) = request.get("mode").and_then(|v| v.as_u64()) else {
        return json!({"type": "error", "message": "missing 'mode' field"});
    };
    let mut state = shared.state.lock().unwrap();
    state.queue_mode = mode as u8;
    if state.queue_mode == 0 {
        state.queued_pattern_index = None;
        state.queue_target_bar = None;
    }
    let engine = shared.engine.lock().unwrap();
    status_document_locked(&engine, &state, shared)
}

fn handle_get_pattern_source(shared: &Arc<Shared>, request: &Value) -> Value {
    let Some(name) = request.get("name").and_then(|v| v.as_str()) else {
        return json!({"type": "error", "message": "missing 'name' field"});
    };
    let engine = shared.engine.lock().unwrap();
    let Some(entry) = engine.patterns.entries.iter().find(|e| e.meta.name == name) else {
        return json!({"type": "error", "message": "unknown pattern"});
    };
    match loader::get_pattern_source(&entry.meta.path) {
        Ok((meta, body)) => json!({
            "type": "pattern_source",
            "name": meta.name,
            "category": meta.category,
            "description": meta.description,
            "tags": meta.tags,
            "palette": meta.palette,
            "body": body,
        }),
        Err(e) => json!({"type": "error", "message": e.to_string()}),
    }
}

fn handle_save_pattern(shared: &Arc<Shared>, request: &Value) -> Value {
    let Some(name) = request.get("name").and_then(|v| v.as_str()) else {
        return json!({"type": "error", "message": "missing 'name' field"});
    };
    let Some(body) = request.get("body").and_then(|v| v.as_str()) else {
        return json!({"type": "error", "message": "missing 'body' field"});
    };
    let description = request.get("description").and_then(|v| v.as_str()).unwrap_or("");
    let tags: Vec<String> = request.get("tags").map(array_of_strings).unwrap_or_default();
    let palette = request.get("palette").and_then(|v| v.as_str());
    let category = request.get("category").and_then(|v| v.as_str());

    if let Err(e) = loader::validate_pattern(body) {
        return json!({"type": "error", "message": format!("pattern body failed to parse: {e}")});
    }

    let filename = format!("{}.pattern", sanitize_filename(name));
    let path = shared.patterns_dir.join(filename);

    if let Err(e) = loader::save_pattern(&path, name, body, description, &tags, palette, category) {
        return json!({"type": "error", "message": e.to_string()});
    }

    reload_and_broadcast(shared)
}

fn sanitize_filename(name: &str) -> String {
    name.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

fn handle_delete_pattern(shared: &Arc<Shared>, request: &Value) -> Value {
    let Some(name) = request.get("name").and_then(|v| v.as_str()) else {
        return json!({"type": "error", "message": "missing 'name' field"});
    };

    let path = {
        let engine = shared.engine.lock().unwrap();
        engine.patterns.entries.iter().find(|e| e.meta.name == name).map(|e| e.meta.path.clone())
    };
    let Some(path) = path else {
        return json!({"type": "error", "message": "unknown pattern"});
    };

    if let Err(e) = loader::delete_pattern(&path) {
        return json!({"type": "error", "message": e.to_string()});
    }

    reload_and_broadcast(shared)
}

fn handle_validate_pattern(request: &Value) -> Value {
    let Some(body) = request.get("body").and_then(|v| v.as_str()) else {
        return json!({"type": "error", "message": "missing 'body' field"});
    };
    match loader::validate_pattern(body) {
        Ok(()) => json!({"type": "validation_result", "valid": true}),
        Err(e) => json!({"type": "validation_result", "valid": false, "message": e.to_string()}),
    }
}

/// Reloads the pattern table from scratch and reports the new status,
/// matching `save_pattern`/`delete_pattern`'s "reload and broadcast" rule.
fn reload_and_broadcast(shared: &Arc<Shared>) -> Value {
    let (table, errors) = loader::load_patterns_dir(&shared.patterns_dir);
    for e in &errors {
        error!("pattern reload error: {e}");
    }
    let mut engine = shared.engine.lock().unwrap();
    engine.replace_patterns(table);
    let state = shared.state.lock().unwrap();
    status_document_locked(&engine, &state, shared)
}

fn status_document(shared: &Arc<Shared>) -> Value {
    let engine = shared.engine.lock().unwrap();
    let state = shared.state.lock().unwrap();
    status_document_locked(&engine, &state, shared)
}

fn status_document_locked(engine: &Engine, state: &EngineState, shared: &Arc<Shared>) -> Value {
    let render_fps = *shared.render_fps.lock().unwrap();
    json!({
        "type": "status",
        "bpm": round_to(state.bpm, 1),
        "beat_position": round_to(state.beat_position, 2),
        "bar": state.bar(),
        "beat_in_bar": state.beat_in_bar(),
        "pattern_index": engine.pattern_index,
        "pattern_name": engine.current_pattern_name(),
        "palette_name": engine.active_palette().name,
        "palette_override": engine.palette_override.is_some(),
        "zone_brightness": zone_brightness_document(&state.zone_brightness),
        "fade_active": state.fade_active,
        "queue_mode": state.queue_mode,
        "queued_pattern_index": state.queued_pattern_index,
        "queue_target_bar": state.queue_target_bar,
        "patterns": pattern_list(engine),
        "palettes": palette_list(),
        "render_fps": round_to(render_fps, 1),
    })
}

fn zone_brightness_document(zb: &ZoneBrightness) -> Value {
    json!({"ceiling": zb.ceiling, "perimeter": zb.perimeter, "ambient": zb.ambient})
}

fn pattern_list_document(shared: &Arc<Shared>) -> Value {
    let engine = shared.engine.lock().unwrap();
    json!({"type": "pattern_list", "patterns": pattern_list(&engine)})
}

fn pattern_list(engine: &Engine) -> Value {
    let list: Vec<Value> = engine
        .patterns
        .entries
        .iter()
        .map(|e| {
            json!({
                "name": e.meta.name,
                "description": e.meta.description,
                "tags": e.meta.tags,
                "category": e.meta.category,
            })
        })
        .collect();
    Value::Array(list)
}

fn palette_list() -> Value {
    let list: Vec<Value> = crate::palette::list_palettes()
        .into_iter()
        .filter_map(|name| crate::palette::get_palette(&name).map(|p| (name, p)))
        .map(|(name, p)| {
            let hex: Vec<String> = p.colors.iter().map(|c| c.to_hex()).collect();
            json!({"name": name, "colors": hex})
        })
        .collect();
    Value::Array(list)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_matches_decimal_places() {
        assert_eq!(round_to(120.456, 1), 120.5);
        assert_eq!(round_to(3.14159, 2), 3.14);
    }

    #[test]
    fn sanitize_filename_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("My Pattern!"), "My_Pattern_");
        assert_eq!(sanitize_filename("ok-name_1"), "ok-name_1");
    }

    #[test]
    fn dispatch_with_missing_type_is_an_error() {
        let shared = test_shared();
        let response = dispatch(&shared, &json!({}));
        assert_eq!(response["type"], "error");
    }

    #[test]
    fn dispatch_unknown_type_is_an_error() {
        let shared = test_shared();
        let response = dispatch(&shared, &json!({"type": "not_a_real_command"}));
        assert_eq!(response["type"], "error");
    }

    #[test]
    fn validate_pattern_reports_parse_errors() {
        let response = handle_validate_pattern(&json!({"body": "not_a_real_fn(\"x\")"}));
        assert_eq!(response["valid"], false);
    }

    fn test_shared() -> Arc<Shared> {
        use crate::loader::PatternTable;
        use crate::value::LightContext;
        Arc::new(Shared {
            engine: Mutex::new(Engine::new(PatternTable::default(), LightContext::default_context(6))),
            state: Mutex::new(EngineState::default()),
            midi_out: Mutex::new(None),
            config_path: PathBuf::from("config.yaml"),
            patterns_dir: PathBuf::from("patterns"),
            render_fps: Mutex::new(0.0),
        })
    }
}
