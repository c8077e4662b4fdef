// MIDI Module - Volume buttons from MIDI note on/off messages
use anyhow::{anyhow, Result};
use midir::{MidiInput, MidiInputConnection};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::controller::ButtonInput;
use crate::volume::ButtonState;

const CLIENT_NAME: &str = "discolight";

/// Tracks which notes are currently held, across all channels
#[derive(Clone, Default)]
pub struct NoteState {
    held: Arc<Mutex<HashSet<(u8, u8)>>>, // (channel, note)
}

impl NoteState {
    pub fn new() -> Self {
        NoteState::default()
    }

    pub fn apply(&self, event: &MidiEvent) {
        let Ok(mut held) = self.held.lock() else {
            return;
        };
        match *event {
            MidiEvent::NoteOn { channel, note, .. } => {
                held.insert((channel, note));
            }
            MidiEvent::NoteOff { channel, note } => {
                held.remove(&(channel, note));
            }
        }
    }

    /// True while the note is held on any channel
    pub fn is_held(&self, note: u8) -> bool {
        self.held
            .lock()
            .map(|held| held.iter().any(|&(_, n)| n == note))
            .unwrap_or(false)
    }
}

/// Convert MIDI note number to musical note name (e.g., 60 -> "C4")
pub fn note_number_to_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", note_names[(note % 12) as usize], octave)
}

/// MIDI Event types we care about
#[derive(Debug, Clone, PartialEq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
}

/// Parse MIDI message bytes into our MidiEvent type
pub fn parse_midi_message(message: &[u8]) -> Option<MidiEvent> {
    if message.len() < 3 {
        return None;
    }

    let status = message[0];
    let note = message[1];
    let velocity = message[2];
    let channel = status & 0x0F;

    match status & 0xF0 {
        // Note On with velocity 0 is a Note Off
        0x90 if velocity > 0 => Some(MidiEvent::NoteOn { channel, note, velocity }),
        0x90 | 0x80 => Some(MidiEvent::NoteOff { channel, note }),
        _ => None,
    }
}

/// List all available MIDI input ports
pub fn list_midi_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new(CLIENT_NAME)?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect())
}

/// Find a MIDI input port by name (case-insensitive substring match)
pub fn find_midi_port(midi_in: &MidiInput, port_name: &str) -> Result<usize> {
    let wanted = port_name.to_lowercase();
    midi_in
        .ports()
        .iter()
        .position(|port| {
            midi_in
                .port_name(port)
                .map(|name| name.to_lowercase().contains(&wanted))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("MIDI port '{}' not found", port_name))
}

/// Connect to a MIDI input device, falling back to the first port
pub fn connect_midi<F>(device_name: &str, callback: F) -> Result<MidiInputConnection<()>>
where
    F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
{
    let midi_in = MidiInput::new(CLIENT_NAME)?;

    let ports = midi_in.ports();
    if ports.is_empty() {
        return Err(anyhow!("No MIDI input ports available"));
    }

    let port_index = match find_midi_port(&midi_in, device_name) {
        Ok(idx) => idx,
        Err(e) => {
            if !device_name.is_empty() {
                log::warn!("{}, using first port", e);
            }
            0
        }
    };
    let port = &ports[port_index];
    let port_name = midi_in.port_name(port).unwrap_or_else(|_| "unknown".to_string());

    let connection = midi_in
        .connect(port, "discolight_buttons", callback, ())
        .map_err(|e| anyhow!("Failed to connect to MIDI port: {}", e))?;

    println!("Listening for volume buttons on MIDI port: {}", port_name);
    Ok(connection)
}

/// Two MIDI notes acting as held volume buttons
pub struct MidiButtons {
    notes: NoteState,
    up_note: u8,
    down_note: u8,
    _connection: Option<MidiInputConnection<()>>,
}

impl MidiButtons {
    pub fn connect(device_name: &str, up_note: u8, down_note: u8) -> Result<Self> {
        let notes = NoteState::new();
        let sink = notes.clone();
        let connection = connect_midi(device_name, move |_stamp, message, _| {
            if let Some(event) = parse_midi_message(message) {
                sink.apply(&event);
            }
        })?;

        println!(
            "Volume up: {} ({}), volume down: {} ({})",
            note_number_to_name(up_note),
            up_note,
            note_number_to_name(down_note),
            down_note
        );

        Ok(MidiButtons {
            notes,
            up_note,
            down_note,
            _connection: Some(connection),
        })
    }

    #[cfg(test)]
    fn detached(notes: NoteState, up_note: u8, down_note: u8) -> Self {
        MidiButtons {
            notes,
            up_note,
            down_note,
            _connection: None,
        }
    }
}

impl ButtonInput for MidiButtons {
    fn read(&mut self) -> ButtonState {
        ButtonState {
            increase: self.notes.is_held(self.up_note),
            decrease: self.notes.is_held(self.down_note),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_to_name() {
        assert_eq!(note_number_to_name(0), "C-1");
        assert_eq!(note_number_to_name(60), "C4");
        assert_eq!(note_number_to_name(62), "D4");
        assert_eq!(note_number_to_name(127), "G9");
    }

    #[test]
    fn test_parse_note_messages() {
        assert_eq!(
            parse_midi_message(&[0x91, 60, 100]),
            Some(MidiEvent::NoteOn { channel: 1, note: 60, velocity: 100 })
        );
        assert_eq!(
            parse_midi_message(&[0x90, 60, 0]),
            Some(MidiEvent::NoteOff { channel: 0, note: 60 })
        );
        assert_eq!(
            parse_midi_message(&[0x8F, 61, 64]),
            Some(MidiEvent::NoteOff { channel: 15, note: 61 })
        );
        assert_eq!(parse_midi_message(&[0xB0, 7, 127]), None);
        assert_eq!(parse_midi_message(&[0x90, 60]), None);
    }

    #[test]
    fn test_buttons_follow_held_notes() {
        let notes = NoteState::new();
        let mut buttons = MidiButtons::detached(notes.clone(), 62, 60);

        assert_eq!(buttons.read(), ButtonState::released());

        notes.apply(&MidiEvent::NoteOn { channel: 0, note: 62, velocity: 90 });
        assert_eq!(buttons.read(), ButtonState { increase: true, decrease: false });

        notes.apply(&MidiEvent::NoteOn { channel: 3, note: 60, velocity: 90 });
        assert_eq!(buttons.read(), ButtonState { increase: true, decrease: true });

        notes.apply(&MidiEvent::NoteOff { channel: 0, note: 62 });
        notes.apply(&MidiEvent::NoteOff { channel: 3, note: 60 });
        assert_eq!(buttons.read(), ButtonState::released());
    }
}
