//! The block engine: every instrument pipeline, the control queue and the
//! output stage. Owned by the audio thread.

use super::buffer::{merge, MAX_BLOCK};
use super::dispatch::{dispatch, ControlEvent};
use super::pipeline::{InstrumentId, Pipeline};
use crate::config::EngineConfig;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::collections::VecDeque;

/// Soft-knee limiter threshold.
const LIMIT: f32 = 0.9;

/// Messages from the control thread, applied at the next block boundary.
pub enum EngineInput {
    Control(ControlEvent),
    /// Adds a pipeline built on the control thread.
    Hello(Box<Pipeline>),
    /// Removes a pipeline and hands it back for dropping.
    Exit(InstrumentId),
    InputTrim(f32),
    OutputTrim(f32),
}

/// Messages back to the control thread.
#[derive(Debug)]
pub enum EngineEvent {
    Ready(InstrumentId),
    /// The engine is full or the id is taken; the pipeline comes back.
    Declined(Box<Pipeline>),
    /// The pipeline left the block loop and may be dropped.
    Retired(Box<Pipeline>),
}

pub struct Engine {
    frames: usize,
    sample_rate: f32,
    max_instruments: usize,
    pipelines: Vec<Box<Pipeline>>,
    inputs: Receiver<EngineInput>,
    events: Sender<EngineEvent>,
    // events the control thread has not made room for yet, oldest first
    pending: VecDeque<EngineEvent>,
    pending_limit: usize,
    drain_limit: usize,
    input_trim: f32,
    output_trim: f32,
    current_gain: f32,
    input: [Vec<f32>; 2],
    mix: [Vec<f32>; 2],
    blocks: u64,
}

impl Engine {
    pub fn new(config: &EngineConfig, inputs: Receiver<EngineInput>, events: Sender<EngineEvent>) -> Self {
        let frames = config.block_size.clamp(1, MAX_BLOCK);
        Self {
            frames,
            sample_rate: config.sample_rate as f32,
            max_instruments: config.max_instruments,
            pipelines: Vec::with_capacity(config.max_instruments),
            inputs,
            events,
            pending: VecDeque::with_capacity(config.max_instruments * 2 + 4),
            pending_limit: config.max_instruments * 2 + 4,
            drain_limit: config.control_queue,
            input_trim: config.input_trim,
            output_trim: config.output_trim,
            current_gain: config.output_trim,
            input: [vec![0.0; frames], vec![0.0; frames]],
            mix: [vec![0.0; frames], vec![0.0; frames]],
            blocks: 0,
        }
    }

    /// An engine plus both ends of its queues: the sender for control input
    /// and the receiver for engine events.
    pub fn with_channels(config: &EngineConfig) -> (Self, Sender<EngineInput>, Receiver<EngineEvent>) {
        let (input_tx, input_rx) = crossbeam_channel::bounded(config.control_queue);
        let (event_tx, event_rx) = crossbeam_channel::bounded(config.max_instruments * 2 + 4);
        (Self::new(config, input_rx, event_tx), input_tx, event_rx)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Blocks rendered so far.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub fn instrument(&self, id: InstrumentId) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.id() == id).map(|p| &**p)
    }

    pub fn instrument_mut(&mut self, id: InstrumentId) -> Option<&mut Pipeline> {
        self.pipelines.iter_mut().find(|p| p.id() == id).map(|p| &mut **p)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.iter().map(|p| &**p)
    }

    /// Applies queued control input. Called at every block boundary.
    ///
    /// Input is left queued while undelivered events fill `pending`, so an
    /// event is never discarded and a returned pipeline is never dropped on
    /// the audio thread.
    pub fn drain(&mut self) {
        self.flush_events();
        for _ in 0..self.drain_limit {
            if self.pending.len() >= self.pending_limit {
                break;
            }
            let Ok(input) = self.inputs.try_recv() else {
                break;
            };
            self.handle(input);
        }
    }

    /// Events waiting for room in the event channel.
    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    pub fn handle(&mut self, input: EngineInput) {
        match input {
            EngineInput::Control(event) => self.apply(&event),
            EngineInput::Hello(pipeline) => self.insert(pipeline),
            EngineInput::Exit(id) => self.remove(id),
            EngineInput::InputTrim(trim) => self.input_trim = trim.max(0.0),
            EngineInput::OutputTrim(trim) => self.output_trim = trim.max(0.0),
        }
    }

    pub fn apply(&mut self, event: &ControlEvent) {
        for pipeline in self.pipelines.iter_mut() {
            if event.applies_to(pipeline) {
                dispatch(pipeline, event);
            }
        }
    }

    fn insert(&mut self, pipeline: Box<Pipeline>) {
        let taken = self.pipelines.iter().any(|p| p.id() == pipeline.id());
        if taken || self.pipelines.len() >= self.max_instruments || pipeline.frames() != self.frames {
            self.send(EngineEvent::Declined(pipeline));
            return;
        }
        let id = pipeline.id();
        self.pipelines.push(pipeline);
        self.send(EngineEvent::Ready(id));
    }

    fn remove(&mut self, id: InstrumentId) {
        if let Some(index) = self.pipelines.iter().position(|p| p.id() == id) {
            let pipeline = self.pipelines.remove(index);
            self.send(EngineEvent::Retired(pipeline));
        }
    }

    fn send(&mut self, event: EngineEvent) {
        if !self.pending.is_empty() {
            self.pending.push_back(event);
            return;
        }
        match self.events.try_send(event) {
            Ok(()) => {}
            // parked, including when nobody is listening: a pipeline must not
            // be freed on the audio thread
            Err(TrySendError::Full(event) | TrySendError::Disconnected(event)) => self.pending.push_back(event),
        }
    }

    fn flush_events(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event) | TrySendError::Disconnected(event)) => {
                    self.pending.push_front(event);
                    break;
                }
            }
        }
    }

    /// Renders one block. `input` and `output` are interleaved with
    /// `channels` channels; missing input frames read as silence.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], channels: usize) {
        self.drain();
        let channels = channels.max(1);
        let frames = self.frames;

        let [in_left, in_right] = &mut self.input;
        in_left.fill(0.0);
        in_right.fill(0.0);
        for (frame, samples) in input.chunks(channels).take(frames).enumerate() {
            let left = samples.first().copied().unwrap_or(0.0);
            let right = samples.get(1).copied().unwrap_or(left);
            in_left[frame] = left * self.input_trim;
            in_right[frame] = right * self.input_trim;
        }

        let [left, right] = &mut self.mix;
        left.fill(0.0);
        right.fill(0.0);
        for pipeline in self.pipelines.iter_mut() {
            pipeline.render(&in_left[..], &in_right[..]);
            merge(left, 1.0, pipeline.left(), 1.0);
            merge(right, 1.0, pipeline.right(), 1.0);
        }

        let target = self.output_trim;
        let start = self.current_gain;
        crossfade(left, start, target, self.sample_rate);
        crossfade(right, start, target, self.sample_rate);
        self.current_gain = target;
        limit(left);
        limit(right);

        for (frame, samples) in output.chunks_mut(channels).enumerate() {
            let (l, r) = match (left.get(frame), right.get(frame)) {
                (Some(l), Some(r)) => (*l, *r),
                _ => (0.0, 0.0),
            };
            match samples {
                [mono] => *mono = 0.5 * (l + r),
                [first, second, rest @ ..] => {
                    *first = l;
                    *second = r;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }
        self.blocks += 1;
    }
}

/// Applies a gain moving from `from` to `to` with a cubic ease. The ramp is
/// longer for larger changes, 5 to 10 ms, then holds `to`.
pub fn crossfade(buffer: &mut [f32], from: f32, to: f32, sample_rate: f32) {
    if from == to {
        buffer.iter_mut().for_each(|s| *s *= to);
        return;
    }
    let ratio = if from.abs() > 1e-9 { (to / from).abs() } else { 1.0 };
    let change = (1.0 - ratio).abs().min(1.0);
    let ramp_ms = 5.0f32.mul_add(change, 5.0);
    let ramp = ((ramp_ms / 1000.0 * sample_rate).round() as usize).min(buffer.len());
    let step = if ramp > 0 { 1.0 / ramp as f32 } else { 0.0 };
    for (i, sample) in buffer.iter_mut().enumerate() {
        let gain = if i < ramp {
            let t = (i + 1) as f32 * step;
            let eased = t * t * (3.0 - 2.0 * t);
            from.mul_add(1.0 - eased, to * eased)
        } else {
            to
        };
        *sample *= gain;
    }
}

/// Soft knee above [LIMIT].
pub fn limit(buffer: &mut [f32]) {
    for sample in buffer.iter_mut() {
        let level = sample.abs();
        if level > LIMIT {
            *sample *= (1.0 + LIMIT - level).max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn crossfade_lands_on_target() {
        let mut buffer = vec![1.0; 1024];
        crossfade(&mut buffer, 0.2, 0.8, 48000.0);
        assert!(buffer[0] > 0.2 && buffer[0] < 0.8);
        assert!(approx_eq!(f32, buffer[1023], 0.8, ulps = 2));
        assert!(buffer.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn limiter_leaves_quiet_samples() {
        let mut buffer = [0.5, -0.5, 0.95, -1.2];
        limit(&mut buffer);
        assert_eq!(buffer[0], 0.5);
        assert_eq!(buffer[1], -0.5);
        assert!(buffer[2] < 0.95 && buffer[2] > 0.8);
        assert!(buffer[3] > -1.0);
    }
}
