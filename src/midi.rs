//! MIDI clock consumption and control-surface output, generalized from
//! `framework/midi.rs`'s connect-with-reconnect-via-thread-park idiom away
//! from its original UI/animation callback use.

use lazy_static::lazy_static;
use log::{info, trace};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;

lazy_static! {
    static ref THREADS: Mutex<HashMap<ConnectionType, thread::JoinHandle<()>>> = Mutex::new(HashMap::new());
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ConnectionType {
    Clock,
    Control,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Clock => write!(f, "Clock"),
            ConnectionType::Control => write!(f, "Control"),
        }
    }
}

/// Connects to `port` and invokes `callback` on every incoming message,
/// running the connection on its own parked thread so a later reconnect
/// can unpark and drop the previous one cleanly.
pub fn on_message<F>(connection_type: ConnectionType, port: &str, callback: F) -> Result<(), Box<dyn Error>>
where
    F: Fn(u64, &[u8]) + Send + Sync + 'static,
{
    let midi_in = MidiInput::new(&connection_type.to_string())?;
    let port = port.to_string();

    let in_ports = midi_in.ports();
    let in_port = in_ports
        .iter()
        .find(|p| midi_in.port_name(p).unwrap_or_default() == port)
        .ok_or_else(|| format!("Unable to find input port: {port}"))?
        .clone();

    {
        let mut threads = THREADS.lock().unwrap();
        if let Some(handle) = threads.remove(&connection_type) {
            info!("Unparking {} ({}) thread", connection_type, port);
            handle.thread().unpark();
        }
    }

    let connection: Arc<Mutex<Option<MidiInputConnection<()>>>> = Arc::new(Mutex::new(None));
    let connection_clone = connection.clone();
    let connection_name = connection_type.to_string();
    let connection_type_clone = connection_type.clone();

    let handle = thread::spawn(move || {
        let conn_in = midi_in
            .connect(
                &in_port,
                &connection_name,
                move |stamp, message, _| {
                    trace!("MIDI message: {stamp}, {message:?}");
                    callback(stamp, message);
                },
                (),
            )
            .expect("Unable to connect");

        *connection_clone.lock().unwrap() = Some(conn_in);

        info!(
            "Connected: {} ({}); connection count: {}",
            connection_type,
            port,
            THREADS.lock().unwrap().len()
        );

        thread::park();

        if let Some(conn) = connection_clone.lock().unwrap().take() {
            drop(conn);
        }
    });

    THREADS.lock().unwrap().insert(connection_type_clone, handle);

    Ok(())
}

pub struct MidiOut {
    port: String,
    connection: Option<MidiOutputConnection>,
}

impl MidiOut {
    pub fn new(port: &str) -> Self {
        Self { port: port.to_string(), connection: None }
    }

    pub fn connect(&mut self) -> Result<(), Box<dyn Error>> {
        let midi_out = MidiOutput::new("LatticeControlOut")?;
        let out_ports = midi_out.ports();
        let out_port = out_ports
            .iter()
            .find(|p| midi_out.port_name(p).unwrap_or_default() == self.port)
            .ok_or_else(|| format!("Unable to find output port: {}", self.port))?;
        let connection = midi_out.connect(out_port, "LatticeControlOut")?;
        self.connection = Some(connection);
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> Result<(), Box<dyn Error>> {
        match &mut self.connection {
            Some(connection) => Ok(connection.send(message)?),
            None => Err("MIDI control output connection has not been established".into()),
        }
    }

    /// Note-on, channel 0, note 61, velocity 127; followed by note-off.
    pub fn send_tap_tempo(&mut self) -> Result<(), Box<dyn Error>> {
        self.send_note(61)
    }

    /// Note-on, channel 0, note 60, velocity 127; followed by note-off.
    pub fn send_sync(&mut self) -> Result<(), Box<dyn Error>> {
        self.send_note(60)
    }

    fn send_note(&mut self, note: u8) -> Result<(), Box<dyn Error>> {
        self.send(&[0x90, note, 127])?;
        self.send(&[0x80, note, 0])
    }

    /// MIDI realtime Start (`0xFA`).
    pub fn send_start(&mut self) -> Result<(), Box<dyn Error>> {
        self.send(&[0xFA])
    }

    /// MIDI realtime Stop (`0xFC`).
    pub fn send_stop(&mut self) -> Result<(), Box<dyn Error>> {
        self.send(&[0xFC])
    }
}

pub type PortIndexAndName = (usize, String);

pub enum InputsOrOutputs {
    Inputs,
    Outputs,
}

pub fn list_ports(inputs_or_outputs: InputsOrOutputs) -> Result<Vec<PortIndexAndName>, Box<dyn Error>> {
    match inputs_or_outputs {
        InputsOrOutputs::Inputs => {
            let mut midi_in = MidiInput::new("lattice_list_input")?;
            midi_in.ignore(Ignore::None);
            let mut ports = vec![];
            for (i, p) in midi_in.ports().iter().enumerate() {
                ports.push((i, midi_in.port_name(p)?));
            }
            Ok(ports)
        }
        InputsOrOutputs::Outputs => {
            let midi_out = MidiOutput::new("lattice_list_output")?;
            let mut ports = vec![];
            for (i, p) in midi_out.ports().iter().enumerate() {
                ports.push((i, midi_out.port_name(p)?));
            }
            Ok(ports)
        }
    }
}

pub fn print_ports() -> Result<(), Box<dyn Error>> {
    println!("\nAvailable input ports:");
    for (index, port_name) in list_ports(InputsOrOutputs::Inputs)? {
        println!("    {index}: {port_name}");
    }

    println!("\nAvailable output ports:");
    for (index, port_name) in list_ports(InputsOrOutputs::Outputs)? {
        println!("    {index}: {port_name}");
    }

    println!();

    Ok(())
}

/// MIDI realtime/system byte classification, used by the clock consumer to
/// dispatch incoming bytes without allocating.
pub const TIMING_CLOCK: u8 = 0xF8;
pub const START: u8 = 0xFA;
pub const CONTINUE: u8 = 0xFB;
pub const STOP: u8 = 0xFC;
pub const SONG_POSITION_POINTER: u8 = 0xF2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_type_display_matches_variant() {
        assert_eq!(ConnectionType::Clock.to_string(), "Clock");
        assert_eq!(ConnectionType::Control.to_string(), "Control");
    }
}
