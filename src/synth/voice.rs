use super::flags::VoiceFlags;
use super::prelude::seeded_rng;
use super::tables::step_to_hz;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Largest per-voice detune spread in cents.
const DETUNE_CENTS: f32 = 20.0;

/// Note data handed to a voice when it is (re)triggered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Strike {
    pub key: u8,
    pub channel: u8,
    /// Velocity after the instrument's velocity curve, 0.0-1.0.
    pub velocity: f32,
    /// Wavetable step of the key.
    pub step: f32,
    /// Sample within the first block at which the note starts.
    pub offset: usize,
}

impl Strike {
    pub fn new(key: u8, velocity: f32, step: f32) -> Self {
        Self {
            key,
            channel: 0,
            velocity,
            step,
            offset: 0,
        }
    }

    pub fn on_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn at_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// One sounding note: its key, velocity, pitch trajectory and lifecycle flags.
#[derive(Debug, Clone)]
pub struct Voice {
    index: usize,
    flags: VoiceFlags,
    observed: VoiceFlags, // flags as they were when the current block began
    key: u8,
    channel: u8,
    velocity: f32,
    pressure: f32,
    detune: f32, // fixed spread for this slot in [-1, 1]
    step: f32,   // glided step, before bend and detune
    target: f32,
    glide: f32, // per-sample multiplier toward `target`
    block_start: f32,
    block_end: f32,
    offset: usize,
    sustained: bool, // note-off deferred by the sustain pedal
    released: bool,  // outlives KEY_OFF, which envelopes clear as they finish
    serial: u64,
}

impl Voice {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            flags: VoiceFlags::empty(),
            observed: VoiceFlags::empty(),
            key: 0,
            channel: 0,
            velocity: 0.0,
            pressure: 0.0,
            detune: 0.0,
            step: 0.0,
            target: 0.0,
            glide: 1.0,
            block_start: 0.0,
            block_end: 0.0,
            offset: 0,
            sustained: false,
            released: false,
            serial: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn pressure(&self) -> f32 {
        self.pressure
    }

    pub fn set_pressure(&mut self, pressure: f32) {
        self.pressure = pressure;
    }

    /// Live flags, including changes made by operators earlier in this block.
    pub fn flags(&self) -> VoiceFlags {
        self.flags
    }

    /// Flags as they were at the start of the block. Layered envelopes read
    /// these so each one sees the trigger even after the first consumed it.
    pub fn observed(&self) -> VoiceFlags {
        self.observed
    }

    /// Clears flags this operator is the consumer of.
    pub fn consume(&mut self, flags: VoiceFlags) {
        self.flags.remove(flags);
    }

    /// Sets flags this operator is the writer of.
    pub fn raise(&mut self, flags: VoiceFlags) {
        self.flags.insert(flags);
    }

    pub fn is_done(&self) -> bool {
        self.flags.contains(VoiceFlags::KEY_DONE)
    }

    /// Note has been released (possibly still sounding).
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The voice was triggered going into this block.
    pub fn triggered(&self) -> bool {
        self.observed.intersects(VoiceFlags::TRIGGER)
    }

    /// Sample where a fresh note starts within this block. Zero otherwise.
    pub fn offset(&self) -> usize {
        if self.observed.contains(VoiceFlags::KEY_ON) {
            self.offset
        } else {
            0
        }
    }

    /// Wavetable step at the first and last sample of the block, with glide,
    /// bend and detune applied.
    pub fn step_range(&self) -> (f32, f32) {
        (self.block_start, self.block_end)
    }

    /// Voice frequency at the start of the block.
    pub fn hz(&self, sample_rate: f32) -> f32 {
        step_to_hz(self.block_start, sample_rate)
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    /// Starts a fresh note: the only flag left set is `KEY_ON`.
    pub fn strike(&mut self, strike: Strike) {
        self.begin_note(strike);
        self.flags = VoiceFlags::KEY_ON;
        self.step = strike.step;
        self.glide = 1.0;
    }

    /// Starts a fresh note that glides in from `from` over `glide_samples`.
    pub fn strike_from(&mut self, strike: Strike, from: f32, glide_samples: f32) {
        self.strike(strike);
        self.glide_from(from, glide_samples);
    }

    /// Re-triggers a sounding voice without resetting its operators.
    pub fn restrike(&mut self, strike: Strike, glide_samples: f32) {
        let from = self.step;
        self.begin_note(strike);
        self.flags
            .remove(VoiceFlags::KEY_OFF | VoiceFlags::KEY_OFFING | VoiceFlags::KEY_DONE);
        self.flags.insert(VoiceFlags::KEY_REON);
        self.glide_from(from, glide_samples);
    }

    /// Marks the note released. Envelopes pick this up at the next block.
    pub fn release(&mut self) {
        self.sustained = false;
        self.released = true;
        self.flags.insert(VoiceFlags::KEY_OFF);
    }

    fn begin_note(&mut self, strike: Strike) {
        self.key = strike.key;
        self.channel = strike.channel;
        self.velocity = strike.velocity;
        self.target = strike.step;
        self.offset = strike.offset;
        self.pressure = 0.0;
        self.sustained = false;
        self.released = false;
    }

    fn glide_from(&mut self, from: f32, glide_samples: f32) {
        if glide_samples > 1.0 && from > 0.0 && self.target > 0.0 {
            self.step = from;
            self.glide = (self.target / from).powf(glide_samples.recip());
        } else {
            self.step = self.target;
            self.glide = 1.0;
        }
    }

    /// Snapshots flags and resolves the block's pitch trajectory.
    pub fn begin_block(&mut self, frames: usize, bend: f32, detune: f32) {
        self.observed = self.flags;
        let ratio = bend * 2f32.powf(self.detune * detune * DETUNE_CENTS / 1200.0);
        self.block_start = self.step * ratio;
        if self.glide != 1.0 {
            self.step *= self.glide.powi(frames as i32);
            let arrived = if self.glide > 1.0 {
                self.step >= self.target
            } else {
                self.step <= self.target
            };
            if arrived {
                self.step = self.target;
                self.glide = 1.0;
            }
        }
        self.block_end = self.step * ratio;
    }

    pub fn end_block(&mut self) {
        self.offset = 0;
    }

    fn clear(&mut self) {
        self.flags = VoiceFlags::empty();
        self.observed = VoiceFlags::empty();
        self.sustained = false;
        self.released = false;
        self.pressure = 0.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StealPolicy {
    /// Take the voice that has been playing longest.
    #[default]
    Oldest,
    /// Drop the new note.
    Decline,
}

/// Result of asking the pool for a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Fresh(usize),
    /// The voice was already sounding and was restruck in place.
    Retrigger(usize),
    Stolen(usize),
    Declined,
}

impl Allocation {
    /// Voice whose per-operator state must be zeroed before its next block.
    pub fn needs_clear(self) -> Option<usize> {
        match self {
            Allocation::Fresh(index) | Allocation::Stolen(index) => Some(index),
            _ => None,
        }
    }

    pub fn voice(self) -> Option<usize> {
        match self {
            Allocation::Fresh(index) | Allocation::Retrigger(index) | Allocation::Stolen(index) => {
                Some(index)
            }
            Allocation::Declined => None,
        }
    }
}

/// Fixed set of voices for one instrument. Nothing here allocates after
/// construction.
#[derive(Debug)]
pub struct VoicePool {
    voices: Vec<Voice>,
    free: VecDeque<usize>,
    playing: VecDeque<usize>,
    active: usize,
    policy: StealPolicy,
    sustain: bool,
    serial: u64,
    last_step: f32,
    shared: Voice,
}

impl VoicePool {
    pub fn new(capacity: usize, active: usize, policy: StealPolicy, seed: u64) -> Self {
        let capacity = capacity.max(1);
        let mut rng = seeded_rng(seed);
        let voices = (0..capacity)
            .map(|index| {
                let mut voice = Voice::new(index);
                voice.detune = rng.random_range(-1.0..=1.0);
                voice
            })
            .collect();
        let active = active.clamp(1, capacity);
        let mut free = VecDeque::with_capacity(capacity);
        free.extend(0..active);
        Self {
            voices,
            free,
            playing: VecDeque::with_capacity(capacity),
            active,
            policy,
            sustain: false,
            serial: 0,
            last_step: 0.0,
            shared: Voice::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn policy(&self) -> StealPolicy {
        self.policy
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn playing_count(&self) -> usize {
        self.playing.len()
    }

    pub fn voice(&self, index: usize) -> &Voice {
        &self.voices[index]
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Playing voices, oldest first.
    pub fn playing(&self) -> impl Iterator<Item = &Voice> {
        self.playing.iter().map(|&index| &self.voices[index])
    }

    /// The voice-shaped context used by instrument-wide operators.
    pub fn shared(&self) -> &Voice {
        &self.shared
    }

    pub(crate) fn shared_mut(&mut self) -> &mut Voice {
        &mut self.shared
    }

    /// Changes how many voices may be allocated. Clamped to the capacity; voices
    /// above the new count finish their notes but are not reissued.
    pub fn set_active(&mut self, count: usize) {
        let count = count.clamp(1, self.capacity());
        if count == self.active {
            return;
        }
        self.free.retain(|&index| index < count);
        for index in self.active..count {
            if !self.playing.contains(&index) {
                self.free.push_back(index);
            }
        }
        self.active = count;
    }

    /// Finds a voice for a note. A held key that is struck again is restruck
    /// in place; a single-voice pool plays legato.
    pub fn note_on(&mut self, strike: Strike, glide_samples: f32) -> Allocation {
        self.serial += 1;
        let from = self.last_step;
        self.last_step = strike.step;

        let held = self.playing.iter().copied().find(|&index| {
            let voice = &self.voices[index];
            !voice.is_done()
                && voice.channel == strike.channel
                && (voice.key == strike.key || (self.active == 1 && !voice.is_released()))
        });
        if let Some(index) = held {
            let voice = &mut self.voices[index];
            voice.restrike(strike, glide_samples);
            voice.serial = self.serial;
            return Allocation::Retrigger(index);
        }

        let allocation = match self.free.pop_front() {
            Some(index) => {
                self.playing.push_back(index);
                Allocation::Fresh(index)
            }
            None => match self.policy {
                StealPolicy::Decline => return Allocation::Declined,
                StealPolicy::Oldest => match self.playing.pop_front() {
                    Some(index) => {
                        self.playing.push_back(index);
                        Allocation::Stolen(index)
                    }
                    None => return Allocation::Declined,
                },
            },
        };
        if let Some(index) = allocation.voice() {
            let voice = &mut self.voices[index];
            voice.strike_from(strike, from, glide_samples);
            voice.serial = self.serial;
        }
        allocation
    }

    /// Releases every playing voice holding `key`, or defers it while the
    /// sustain pedal is down.
    pub fn note_off(&mut self, key: u8, channel: u8) {
        for &index in self.playing.iter() {
            let voice = &mut self.voices[index];
            if voice.key != key || voice.channel != channel || voice.is_released() {
                continue;
            }
            if self.sustain {
                voice.sustained = true;
            } else {
                voice.release();
            }
        }
    }

    pub fn sustain(&self) -> bool {
        self.sustain
    }

    pub fn set_sustain(&mut self, on: bool) {
        self.sustain = on;
        if on {
            return;
        }
        for &index in self.playing.iter() {
            let voice = &mut self.voices[index];
            if voice.sustained {
                voice.release();
            }
        }
    }

    pub fn set_pressure(&mut self, key: Option<u8>, pressure: f32) {
        for &index in self.playing.iter() {
            let voice = &mut self.voices[index];
            if key.map_or(true, |key| key == voice.key) {
                voice.set_pressure(pressure);
            }
        }
    }

    /// Releases every playing voice, ignoring the pedal.
    pub fn all_notes_off(&mut self) {
        for &index in self.playing.iter() {
            self.voices[index].release();
        }
    }

    /// Silences every voice at once.
    pub fn all_sound_off(&mut self) {
        for &index in self.playing.iter() {
            self.voices[index].raise(VoiceFlags::KEY_DONE);
        }
        self.reclaim();
    }

    /// Visits every playing voice that has not finished.
    pub(crate) fn for_each_playing(&mut self, mut f: impl FnMut(&mut Voice)) {
        for &index in self.playing.iter() {
            let voice = &mut self.voices[index];
            if !voice.is_done() {
                f(voice);
            }
        }
    }

    /// Returns finished voices to the free list. Returns how many came back.
    pub(crate) fn reclaim(&mut self) -> usize {
        let voices = &mut self.voices;
        let free = &mut self.free;
        let active = self.active;
        let before = self.playing.len();
        self.playing.retain(|&index| {
            let voice = &mut voices[index];
            if !voice.is_done() {
                return true;
            }
            voice.clear();
            if index < active {
                free.push_back(index);
            }
            false
        });
        before - self.playing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glide_reaches_target() {
        let mut voice = Voice::new(0);
        voice.strike_from(Strike::new(60, 1.0, 20.0), 10.0, 100.0);
        voice.begin_block(64, 1.0, 0.0);
        let (start, end) = voice.step_range();
        assert_eq!(start, 10.0);
        assert!(end > start && end < 20.0);
        voice.begin_block(64, 1.0, 0.0);
        let (_, end) = voice.step_range();
        assert_eq!(end, 20.0);
    }

    #[test]
    fn offset_only_on_trigger_block() {
        let mut voice = Voice::new(0);
        voice.strike(Strike::new(60, 1.0, 10.0).at_offset(17));
        voice.begin_block(64, 1.0, 0.0);
        assert_eq!(voice.offset(), 17);
        voice.consume(VoiceFlags::KEY_ON);
        voice.end_block();
        voice.begin_block(64, 1.0, 0.0);
        assert_eq!(voice.offset(), 0);
    }

    #[test]
    fn release_outlives_envelope_clearing_key_off() {
        let mut voice = Voice::new(0);
        voice.strike(Strike::new(60, 1.0, 10.0));
        voice.release();
        voice.consume(VoiceFlags::KEY_OFF | VoiceFlags::KEY_OFFING);
        assert!(voice.is_released());
        voice.restrike(Strike::new(64, 1.0, 12.0), 0.0);
        assert!(!voice.is_released());
    }

    #[test]
    fn mono_pool_does_not_legato_into_a_released_tail() {
        let mut pool = VoicePool::new(4, 1, StealPolicy::Oldest, 7);
        let first = pool.note_on(Strike::new(60, 1.0, 10.0), 0.0);
        assert_eq!(first, Allocation::Fresh(0));
        pool.note_off(60, 0);
        // a short layered envelope finished its release, the long one still rings
        pool.voices[0].consume(VoiceFlags::KEY_OFF | VoiceFlags::KEY_OFFING);
        assert!(pool.voice(0).is_released());
        let second = pool.note_on(Strike::new(64, 1.0, 12.0), 0.0);
        assert_eq!(second, Allocation::Stolen(0));
        assert!(!pool.voice(0).is_released());
    }
}
