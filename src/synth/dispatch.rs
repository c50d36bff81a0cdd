//! Control events and how they land on a pipeline.
//!
//! Everything arriving from MIDI, the keyboard or the controller is a
//! [ControlEvent]. The engine drains them at block boundaries and hands each
//! one to [dispatch] for every pipeline it targets. Malformed or unknown
//! controls are ignored.

use super::pipeline::{InstrumentId, Pipeline};

/// Operator index of the global-controller slot in vendor messages.
pub const GLOBAL_OPERATOR: u8 = 126;

pub const CC_MOD_WHEEL: u8 = 1;
pub const CC_GLIDE: u8 = 5;
pub const CC_DATA_ENTRY: u8 = 6;
pub const CC_VOLUME: u8 = 7;
pub const CC_PAN: u8 = 10;
pub const CC_DATA_ENTRY_LSB: u8 = 38;
pub const CC_SUSTAIN: u8 = 64;
pub const CC_NRPN_LSB: u8 = 98;
pub const CC_NRPN_MSB: u8 = 99;
pub const CC_RPN_LSB: u8 = 100;
pub const CC_RPN_MSB: u8 = 101;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_ALL_NOTES_OFF: u8 = 123;

const RPN_BEND_RANGE: u16 = 0;
const RPN_FINE_TUNE: u16 = 1;
const RPN_COARSE_TUNE: u16 = 2;
const RPN_NULL: u16 = 0x3fff;

/// Longest glide CC 5 can select, in seconds.
const MAX_GLIDE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    NoteOn {
        channel: u8,
        key: u8,
        velocity: u8,
        /// Frame within the next block at which the note starts.
        offset: usize,
    },
    NoteOff {
        channel: u8,
        key: u8,
    },
    PolyPressure {
        channel: u8,
        key: u8,
        value: u8,
    },
    ChannelPressure {
        channel: u8,
        value: u8,
    },
    /// 14-bit, centre 8192.
    PitchBend {
        channel: u8,
        value: u16,
    },
    /// 14-bit value; 7-bit controllers arrive shifted into the high bits.
    Controller {
        channel: u8,
        index: u8,
        value: u16,
    },
    /// Vendor message addressing one operator parameter directly.
    OperatorParam {
        instrument: InstrumentId,
        operator: u8,
        param: u8,
        value: u16,
    },
    SetVoices {
        instrument: InstrumentId,
        count: usize,
    },
    SetChannel {
        instrument: InstrumentId,
        channel: u8,
    },
    Transpose {
        instrument: InstrumentId,
        semitones: i8,
    },
    /// Every instrument when `channel` is `None`.
    AllNotesOff {
        channel: Option<u8>,
    },
}

/// Which pipelines an event applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Channel(u8),
    Instrument(InstrumentId),
    All,
}

impl ControlEvent {
    pub fn target(&self) -> Target {
        use ControlEvent::*;
        match *self {
            NoteOn { channel, .. }
            | NoteOff { channel, .. }
            | PolyPressure { channel, .. }
            | ChannelPressure { channel, .. }
            | PitchBend { channel, .. }
            | Controller { channel, .. } => Target::Channel(channel),
            OperatorParam { instrument, .. }
            | SetVoices { instrument, .. }
            | SetChannel { instrument, .. }
            | Transpose { instrument, .. } => Target::Instrument(instrument),
            AllNotesOff { channel: Some(channel) } => Target::Channel(channel),
            AllNotesOff { channel: None } => Target::All,
        }
    }

    pub fn applies_to(&self, pipeline: &Pipeline) -> bool {
        match self.target() {
            Target::Channel(channel) => pipeline.channel() == channel,
            Target::Instrument(id) => pipeline.id() == id,
            Target::All => true,
        }
    }
}

/// 14-bit value to 0.0-1.0.
#[inline]
pub fn unit14(value: u16) -> f32 {
    value.min(0x3fff) as f32 / 16383.0
}

/// 14-bit pitch bend to -1.0..=1.0.
#[inline]
pub fn bend14(value: u16) -> f32 {
    ((value.min(0x3fff) as f32 - 8192.0) / 8192.0).clamp(-1.0, 1.0)
}

#[inline]
pub fn join14(msb: u8, lsb: u8) -> u16 {
    ((msb as u16 & 0x7f) << 7) | (lsb as u16 & 0x7f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selected {
    Registered(u16),
    NonRegistered(u16),
}

/// Registered/non-registered parameter selection and the data entry value
/// being assembled for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterSelect {
    selected: Option<Selected>,
    msb: u8,
    lsb: u8,
    data: u16,
}

impl ParameterSelect {
    fn select(&mut self, registered: bool, msb: Option<u8>, lsb: Option<u8>) {
        if let Some(msb) = msb {
            self.msb = msb;
        }
        if let Some(lsb) = lsb {
            self.lsb = lsb;
        }
        let number = join14(self.msb, self.lsb);
        self.selected = match (registered, number) {
            (true, RPN_NULL) => None,
            (true, number) => Some(Selected::Registered(number)),
            (false, number) => Some(Selected::NonRegistered(number)),
        };
        self.data = 0;
    }
}

/// Applies one event to `pipeline`. The caller has already checked that the
/// event targets it.
pub fn dispatch(pipeline: &mut Pipeline, event: &ControlEvent) {
    match *event {
        ControlEvent::NoteOn { key, velocity: 0, .. } => pipeline.note_off(key & 0x7f),
        ControlEvent::NoteOn {
            key, velocity, offset, ..
        } => {
            pipeline.note_on(key & 0x7f, velocity & 0x7f, offset);
        }
        ControlEvent::NoteOff { key, .. } => pipeline.note_off(key & 0x7f),
        ControlEvent::PolyPressure { key, value, .. } => {
            pipeline.set_pressure(Some(key & 0x7f), (value & 0x7f) as f32 / 127.0)
        }
        ControlEvent::ChannelPressure { value, .. } => {
            pipeline.set_pressure(None, (value & 0x7f) as f32 / 127.0)
        }
        ControlEvent::PitchBend { value, .. } => pipeline.set_bend(bend14(value)),
        ControlEvent::Controller { index, value, .. } => controller(pipeline, index, value),
        ControlEvent::OperatorParam {
            operator, param, value, ..
        } => {
            if operator >= GLOBAL_OPERATOR {
                pipeline.global_controller(param, operator - GLOBAL_OPERATOR, unit14(value));
            } else if let Some(op) = pipeline.op_at(operator) {
                pipeline.set_param(op, param as usize, unit14(value));
            }
        }
        ControlEvent::SetVoices { count, .. } => pipeline.set_voices(count),
        ControlEvent::SetChannel { channel, .. } => {
            pipeline.all_notes_off();
            pipeline.set_channel(channel);
        }
        ControlEvent::Transpose { semitones, .. } => pipeline.set_transpose(semitones),
        ControlEvent::AllNotesOff { .. } => pipeline.all_notes_off(),
    }
}

fn controller(pipeline: &mut Pipeline, index: u8, value: u16) {
    let index = index & 0x7f;
    let unit = unit14(value);
    pipeline.set_controller(index, unit);
    match index {
        CC_GLIDE => pipeline.set_glide(unit * unit * MAX_GLIDE),
        CC_VOLUME => pipeline.set_volume(unit),
        CC_PAN => pipeline.set_pan(unit),
        CC_SUSTAIN => pipeline.set_sustain(unit >= 0.5),
        CC_DATA_ENTRY => {
            pipeline.select.data = value.min(0x3fff);
            data_entry(pipeline);
        }
        CC_DATA_ENTRY_LSB => {
            pipeline.select.data = (pipeline.select.data & !0x7f) | (value >> 7 & 0x7f);
            data_entry(pipeline);
        }
        CC_NRPN_MSB => pipeline.select.select(false, Some((value >> 7) as u8), None),
        CC_NRPN_LSB => pipeline.select.select(false, None, Some((value >> 7) as u8)),
        CC_RPN_MSB => pipeline.select.select(true, Some((value >> 7) as u8), None),
        CC_RPN_LSB => pipeline.select.select(true, None, Some((value >> 7) as u8)),
        CC_ALL_SOUND_OFF => pipeline.all_sound_off(),
        CC_ALL_NOTES_OFF => pipeline.all_notes_off(),
        _ => {}
    }
}

fn data_entry(pipeline: &mut Pipeline) {
    let ParameterSelect {
        selected, msb, lsb, data,
    } = pipeline.select;
    let coarse = (data >> 7) as f32;
    let fine = (data & 0x7f) as f32;
    match selected {
        Some(Selected::Registered(RPN_BEND_RANGE)) => pipeline.set_bend_range(coarse + fine / 100.0),
        Some(Selected::Registered(RPN_FINE_TUNE)) => {
            pipeline.set_fine_tune((data as f32 - 8192.0) / 8192.0 * 100.0)
        }
        Some(Selected::Registered(RPN_COARSE_TUNE)) => pipeline.set_coarse_tune(coarse - 64.0),
        // NRPN MSB picks the operator, LSB the controller
        Some(Selected::NonRegistered(_)) => pipeline.global_controller(lsb, msb, unit14(data)),
        Some(Selected::Registered(_)) | None => {}
    }
}
