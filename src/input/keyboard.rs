use crate::synth::dispatch::ControlEvent;
use crate::synth::engine::EngineInput;
use crate::synth::pipeline::InstrumentId;
use crossbeam_channel::Sender;
use device_query::{DeviceQuery, DeviceState, Keycode};
use std::collections::HashMap;

const VELOCITY: u8 = 100;
const OCTAVE: i8 = 12;
const MAX_TRANSPOSE: i8 = 48;

/// Plays one instrument from the computer keyboard. Comma and dot shift it
/// down or up an octave.
pub struct KeyboardHandler {
    device_state: DeviceState,
    key_states: HashMap<Keycode, bool>,
    key_to_note: HashMap<Keycode, u8>,
    control_keys: HashMap<Keycode, bool>,
    channel: u8,
    instrument: InstrumentId,
    transpose: i8,
    events: Sender<EngineInput>,
}

impl KeyboardHandler {
    pub fn new(channel: u8, instrument: InstrumentId, events: Sender<EngineInput>) -> Self {
        let key_to_note: HashMap<Keycode, u8> = [
            // white keys, A3 to C5
            (Keycode::A, 57),
            (Keycode::S, 59),
            (Keycode::D, 60),
            (Keycode::F, 62),
            (Keycode::G, 64),
            (Keycode::H, 65),
            (Keycode::J, 67),
            (Keycode::K, 69),
            (Keycode::L, 71),
            (Keycode::Semicolon, 72),
            // black keys
            (Keycode::W, 58),
            (Keycode::R, 61),
            (Keycode::T, 63),
            (Keycode::U, 66),
            (Keycode::I, 68),
            (Keycode::O, 70),
            (Keycode::LeftBracket, 73),
        ]
        .into_iter()
        .collect();
        let key_states = key_to_note.keys().map(|key| (*key, false)).collect();
        let control_keys = [(Keycode::Comma, false), (Keycode::Dot, false)].into_iter().collect();

        Self {
            device_state: DeviceState::new(),
            key_states,
            key_to_note,
            control_keys,
            channel,
            instrument,
            transpose: 0,
            events,
        }
    }

    fn send(&self, event: ControlEvent) {
        if let Err(e) = self.events.try_send(EngineInput::Control(event)) {
            log::warn!("keyboard event not sent: {e}");
        }
    }

    /// Polls the keyboard once and sends an event for every change.
    pub fn update(&mut self) {
        let keys: Vec<Keycode> = self.device_state.get_keys();

        let mut changes = Vec::new();
        for (key, note) in &self.key_to_note {
            let is_pressed = keys.contains(key);
            let was_pressed = self.key_states.get(key).copied().unwrap_or(false);
            if is_pressed != was_pressed {
                changes.push((*key, *note, is_pressed));
            }
        }
        for (key, key_number, is_pressed) in changes {
            let event = if is_pressed {
                log::debug!("key {key:?} down, note {key_number}");
                ControlEvent::NoteOn {
                    channel: self.channel,
                    key: key_number,
                    velocity: VELOCITY,
                    offset: 0,
                }
            } else {
                ControlEvent::NoteOff {
                    channel: self.channel,
                    key: key_number,
                }
            };
            self.send(event);
            self.key_states.insert(key, is_pressed);
        }

        for key in [Keycode::Comma, Keycode::Dot] {
            let is_pressed = keys.contains(&key);
            let was_pressed = self.control_keys.get(&key).copied().unwrap_or(false);
            if is_pressed && !was_pressed {
                let shift = if key == Keycode::Comma { -OCTAVE } else { OCTAVE };
                self.transpose = (self.transpose + shift).clamp(-MAX_TRANSPOSE, MAX_TRANSPOSE);
                log::info!("transpose {}", self.transpose);
                self.send(ControlEvent::Transpose {
                    instrument: self.instrument,
                    semitones: self.transpose,
                });
            }
            self.control_keys.insert(key, is_pressed);
        }
    }
}
