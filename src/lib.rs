pub mod clock;
pub mod color;
pub mod config;
pub mod dsl;
pub mod engine;
pub mod groups;
pub mod loader;
pub mod logging;
pub mod midi;
pub mod modulator;
pub mod notation;
pub mod palette;
pub mod pattern;
pub mod renderer;
pub mod scheduler;
pub mod server;
pub mod time;
pub mod transport;
pub mod value;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use clock::ClockConsumer;
use config::{LightingConfig, DEFAULT_CONTROL_ADDR, RENDER_HZ};
use engine::{Engine, EngineState, QuickAction};
use groups::LightSetup;
use midi::{ConnectionType, MidiOut};
use renderer::RenderPacer;
use transport::{LoggingTransport, Transport};

#[derive(Parser)]
#[command(name = "lattice-dmx", about = "Beat-synchronized lighting controller")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the clock consumer, renderer, and control server.
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        patterns_dir: PathBuf,
        #[arg(long)]
        midi_clock_port: String,
        #[arg(long)]
        midi_control_port: Option<String>,
        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        control_addr: String,
    },
    /// Print available MIDI input/output ports.
    ListMidiPorts,
    /// Load every `.pattern` file and report parse/evaluation errors.
    ValidatePatterns {
        #[arg(long)]
        patterns_dir: PathBuf,
    },
}

pub fn run_cli() -> ExitCode {
    logging::init_logger();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { config, patterns_dir, midi_clock_port, midi_control_port, control_addr } => {
            run(&config, &patterns_dir, &midi_clock_port, midi_control_port.as_deref(), &control_addr)
        }
        Commands::ListMidiPorts => midi::print_ports().map_err(|e| e.to_string()),
        Commands::ValidatePatterns { patterns_dir } => validate_patterns(&patterns_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn validate_patterns(patterns_dir: &PathBuf) -> Result<(), String> {
    let (table, errors) = loader::load_patterns_dir(patterns_dir);
    for e in &errors {
        error!("{e}");
    }
    info!("{} pattern(s) loaded successfully", table.len());
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("{} pattern(s) failed to load", errors.len()))
    }
}

fn run(
    config_path: &PathBuf,
    patterns_dir: &PathBuf,
    midi_clock_port: &str,
    midi_control_port: Option<&str>,
    control_addr: &str,
) -> Result<(), String> {
    let config = LightingConfig::load(config_path).map_err(|e| e.to_string())?;
    if config.hue.bridge_ip.is_none() {
        warn!("config has no hue.bridge_ip set; bridge streaming is an out-of-scope collaborator concern");
    }

    let setup = LightSetup::from_hue_config(&config.hue);
    for warning in setup.validate() {
        warn!("{warning}");
    }
    let ctx = setup.to_light_context();

    let (patterns, load_errors) = loader::load_patterns_dir(patterns_dir);
    for e in &load_errors {
        warn!("{e}");
    }
    if patterns.is_empty() {
        return Err(format!("no patterns loaded from {}", patterns_dir.display()));
    }

    let midi_out = midi_control_port.map(|port| {
        let mut out = MidiOut::new(port);
        if let Err(e) = out.connect() {
            warn!("failed to connect MIDI control output: {e}");
        }
        out
    });

    let shared = Arc::new(server::Shared {
        engine: Mutex::new(Engine::new(patterns, ctx)),
        state: Mutex::new(EngineState::default()),
        midi_out: Mutex::new(midi_out),
        config_path: config_path.clone(),
        patterns_dir: patterns_dir.clone(),
        render_fps: Mutex::new(0.0),
    });

    spawn_clock_consumer(midi_clock_port, shared.clone())?;
    spawn_pattern_watcher(patterns_dir, shared.clone());
    spawn_render_loop(shared.clone());

    server::run(control_addr, shared).map_err(|e| e.to_string())
}

fn spawn_clock_consumer(port: &str, shared: Arc<server::Shared>) -> Result<(), String> {
    let clock = Arc::new(Mutex::new(ClockConsumer::new()));
    midi::on_message(ConnectionType::Clock, port, move |_stamp, message| {
        let mut consumer = clock.lock().unwrap();
        consumer.handle_message(message, Instant::now());

        let mut state = shared.state.lock().unwrap();
        state.beat_position = consumer.beat_position();
        state.bpm = consumer.bpm;
        state.beat_count = consumer.beat_count;
        state.running = consumer.running;
    })
    .map_err(|e| e.to_string())
}

/// Bridges the loader's filesystem-watcher flag to an actual pattern-table
/// rebuild, polling at a modest rate since hot reload isn't latency-critical.
fn spawn_pattern_watcher(patterns_dir: &PathBuf, shared: Arc<server::Shared>) {
    let reload_flag = Arc::new(AtomicBool::new(false));
    let watcher = loader::watch_patterns_dir(patterns_dir, reload_flag.clone());
    let watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!("failed to start pattern directory watcher: {e}");
            return;
        }
    };
    // Keep the watcher alive for the life of the process.
    Box::leak(Box::new(watcher));

    let patterns_dir = patterns_dir.clone();
    thread::spawn(move || loop {
        thread::sleep(std::time::Duration::from_millis(500));
        if !reload_flag.swap(false, Ordering::SeqCst) {
            continue;
        }
        let (table, errors) = loader::load_patterns_dir(&patterns_dir);
        for e in &errors {
            warn!("pattern reload error: {e}");
        }
        info!("reloaded {} pattern(s)", table.len());
        shared.engine.lock().unwrap().replace_patterns(table);
    });
}

fn spawn_render_loop(shared: Arc<server::Shared>) {
    thread::spawn(move || {
        let mut pacer = RenderPacer::new(RENDER_HZ);
        let mut transport: Box<dyn Transport> = Box::new(LoggingTransport);

        loop {
            thread::sleep(std::time::Duration::from_millis(2));
            let now = Instant::now();
            let ticks = pacer.due_ticks(now);
            for _ in 0..ticks {
                render_one_frame(&shared, &mut *transport, now);
            }
            *shared.render_fps.lock().unwrap() = pacer.average_fps();
        }
    });
}

fn render_one_frame(shared: &Arc<server::Shared>, transport: &mut dyn Transport, now: Instant) {
    let (beat_position, identify_index, identify_until, fade_active, fade_start, fade_duration, zone_brightness, quick_action) = {
        let state = shared.state.lock().unwrap();
        (
            state.beat_position,
            state.identify_light_index,
            state.identify_until,
            state.fade_active,
            state.fade_start_time,
            state.fade_duration,
            state.zone_brightness,
            state.active_quick_action.clone(),
        )
    };

    let num_lights = {
        let engine = shared.engine.lock().unwrap();
        engine.ctx.num_lights
    };

    let had_quick_action = quick_action.is_some();
    let active = quick_action.filter(|(action, triggered_at)| {
        !engine::quick_action_expired(action, *triggered_at, beat_position)
    });
    if had_quick_action && active.is_none() {
        shared.state.lock().unwrap().active_quick_action = None;
    }

    let colors = match active {
        Some((QuickAction::Blackout, _)) => std::collections::HashMap::new(),
        Some((QuickAction::Flash { .. }, _)) => engine::quick_action_flash_colors(num_lights),
        Some((QuickAction::ColorBump { hue, saturation, value, intensity, .. }, _)) => {
            engine::quick_action_color_bump_colors(num_lights, hue, saturation, value, intensity)
        }
        None => shared.engine.lock().unwrap().compute_colors(beat_position),
    };

    let fade_factor = renderer::fade_multiplier(fade_active, fade_start, fade_duration, now);
    let frame = renderer::assemble_frame(
        num_lights,
        &colors,
        |_light_id| None,
        &zone_brightness,
        fade_factor,
        identify_index,
        identify_until,
        now,
    );

    let channels: Vec<transport::Channel> = frame
        .into_iter()
        .enumerate()
        .map(|(i, rgb16)| transport::Channel { index: i as u8, rgb16 })
        .collect();

    if let Err(e) = transport.send_frame(&[], &channels) {
        warn!("frame send failed: {e}");
    }
}
