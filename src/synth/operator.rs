//! The operator contract.
//!
//! An operator is a reusable DSP unit. It is initialised once per process
//! ([Operator::init]) and may then be bound any number of times; each binding
//! owns an [OperatorParams] block and every voice owns a private
//! [Operator::Local] block per binding. `operate` only ever sees the block it is
//! given, so one operator instance serves every binding and voice.

use super::buffer::silent;
use super::voice::Voice;
use std::any::Any;
use std::fmt;

/// Most ports an operator may declare in one direction.
pub const MAX_PORTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Continuous,
    /// Snaps to `n` evenly spaced positions.
    Stepped(u16),
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiHint {
    Knob,
    Slider,
    Button,
    Selector,
}

/// Descriptor for one parameter. Values arrive normalized to [0, 1]; `low`
/// and `high` document the range the operator maps them onto.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
    pub low: f32,
    pub high: f32,
    pub default: f32,
    pub hint: UiHint,
}

impl ParamSpec {
    pub const fn continuous(
        name: &'static str,
        description: &'static str,
        low: f32,
        high: f32,
        default: f32,
    ) -> Self {
        Self {
            name,
            description,
            kind: ParamKind::Continuous,
            low,
            high,
            default,
            hint: UiHint::Knob,
        }
    }

    pub fn stepped(name: &'static str, description: &'static str, steps: u16, default: f32) -> Self {
        Self {
            name,
            description,
            kind: ParamKind::Stepped(steps),
            low: 0.0,
            high: (steps.saturating_sub(1)) as f32,
            default,
            hint: UiHint::Selector,
        }
    }

    pub const fn toggle(name: &'static str, description: &'static str, on: bool) -> Self {
        Self {
            name,
            description,
            kind: ParamKind::Toggle,
            low: 0.0,
            high: 1.0,
            default: if on { 1.0 } else { 0.0 },
            hint: UiHint::Button,
        }
    }

    /// Linear map from [0, 1] to `low..high`.
    pub fn denormalize(&self, value: f32) -> f32 {
        self.low + value.clamp(0.0, 1.0) * (self.high - self.low)
    }

    /// Selected position of a stepped or toggle parameter.
    pub fn position(&self, value: f32) -> usize {
        match self.kind {
            ParamKind::Stepped(steps) if steps > 1 => {
                (value.clamp(0.0, 1.0) * (steps - 1) as f32).round() as usize
            }
            ParamKind::Toggle => usize::from(value > 0.5),
            _ => 0,
        }
    }

    /// Normalized value selecting `position` of a stepped parameter.
    pub fn at(&self, position: usize) -> f32 {
        match self.kind {
            ParamKind::Stepped(steps) if steps > 1 => {
                (position.min(steps as usize - 1)) as f32 / (steps - 1) as f32
            }
            _ => position.min(1) as f32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Audio ports carry bipolar signal; control ports carry unipolar levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub direction: Direction,
    pub coupling: Coupling,
    pub sample_rate: f32,
    pub samples: usize,
}

/// Everything a pipeline needs to know about an operator to bind it.
#[derive(Debug, Clone)]
pub struct OperatorSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub index: usize,
    pub sample_rate: f32,
    pub block_size: usize,
    pub params: Vec<ParamSpec>,
    pub ports: Vec<PortSpec>,
    /// Size of the per-voice state block.
    pub localsize: usize,
}

impl OperatorSpec {
    pub fn new(
        name: &'static str,
        description: &'static str,
        index: usize,
        sample_rate: f32,
        block_size: usize,
    ) -> Self {
        Self {
            name,
            description,
            index,
            sample_rate,
            block_size,
            params: Vec::new(),
            ports: Vec::new(),
            localsize: 0,
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn input(self, name: &'static str, description: &'static str, coupling: Coupling) -> Self {
        self.port(name, description, Direction::Input, coupling)
    }

    pub fn output(self, name: &'static str, description: &'static str, coupling: Coupling) -> Self {
        self.port(name, description, Direction::Output, coupling)
    }

    fn port(
        mut self,
        name: &'static str,
        description: &'static str,
        direction: Direction,
        coupling: Coupling,
    ) -> Self {
        let port = PortSpec {
            name,
            description,
            direction,
            coupling,
            sample_rate: self.sample_rate,
            samples: self.block_size,
        };
        self.ports.push(port);
        self
    }

    pub fn local<L>(mut self) -> Self {
        self.localsize = std::mem::size_of::<L>();
        self
    }

    pub fn inputs(&self) -> impl Iterator<Item = &PortSpec> {
        self.ports.iter().filter(|p| p.direction == Direction::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &PortSpec> {
        self.ports.iter().filter(|p| p.direction == Direction::Output)
    }

    /// Position of a port among the ports of its direction.
    pub fn port_index(&self, direction: Direction, name: &str) -> Option<usize> {
        self.ports
            .iter()
            .filter(|p| p.direction == direction)
            .position(|p| p.name == name)
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperateStatus {
    Ok,
    /// The operator has nothing more to contribute for this voice.
    Done,
}

/// Per-binding parameter block: the raw normalized values as last received
/// plus the operator's derived representation of them.
#[derive(Debug, Clone, Default)]
pub struct OperatorParams<P> {
    values: Vec<f32>,
    pub derived: P,
}

impl<P: Default> OperatorParams<P> {
    pub fn new(count: usize) -> Self {
        Self {
            values: vec![0.0; count],
            derived: P::default(),
        }
    }
}

impl<P> OperatorParams<P> {
    /// Last raw value of a parameter, 0.0 when out of range.
    pub fn value(&self, index: usize) -> f32 {
        self.values.get(index).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

const NO_INPUT: &[f32] = &[];

/// Buffers bound to an operator for one `operate` call. Input and output
/// indices follow the order ports were declared in each direction.
pub struct Ports<'a> {
    inputs: [&'a [f32]; MAX_PORTS],
    outputs: [&'a mut [f32]; MAX_PORTS],
    frames: usize,
}

impl<'a> Ports<'a> {
    pub fn new(inputs: [&'a [f32]; MAX_PORTS], outputs: [&'a mut [f32]; MAX_PORTS], frames: usize) -> Self {
        Self {
            inputs,
            outputs,
            frames,
        }
    }

    /// Binds owned buffers, mostly for driving an operator outside a
    /// pipeline. Missing inputs read as silence.
    pub fn from_buffers(inputs: &[&'a [f32]], outputs: &'a mut [Vec<f32>], frames: usize) -> Self {
        let mut bound = [NO_INPUT; MAX_PORTS];
        for (index, slot) in bound.iter_mut().enumerate() {
            *slot = inputs.get(index).copied().unwrap_or_else(|| silent(frames));
        }
        let mut outs = outputs.iter_mut();
        let outputs: [&'a mut [f32]; MAX_PORTS] = std::array::from_fn(|_| match outs.next() {
            Some(buffer) => buffer.as_mut_slice(),
            None => &mut [],
        });
        Self::new(bound, outputs, frames)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn input(&self, index: usize) -> &'a [f32] {
        self.inputs[index]
    }

    #[inline]
    pub fn output(&mut self, index: usize) -> &mut [f32] {
        &mut *self.outputs[index]
    }

    /// One input with one output.
    #[inline]
    pub fn io(&mut self, input: usize, output: usize) -> (&'a [f32], &mut [f32]) {
        (self.inputs[input], &mut *self.outputs[output])
    }

    /// Two distinct outputs. `first` must be lower than `second`.
    #[inline]
    pub fn outputs2(&mut self, first: usize, second: usize) -> (&mut [f32], &mut [f32]) {
        debug_assert!(first < second);
        let (head, tail) = self.outputs.split_at_mut(second);
        (&mut *head[first], &mut *tail[0])
    }
}

/// A DSP unit. `destroy` is `Drop`.
pub trait Operator: Send + Sync + Sized + 'static {
    /// Derived representation of the parameters, e.g. coefficients or a
    /// rendered wavetable.
    type Params: Default + Send + 'static;
    /// Per-voice state. Locals are re-zeroed whenever their voice is
    /// allocated to a new note.
    type Local: Default + Send + 'static;

    /// Builds operator-wide state and the descriptor. Called once per process.
    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self;

    fn spec(&self) -> &OperatorSpec;

    /// Puts `params` into its default state, allocating anything it needs.
    fn reset(&self, params: &mut OperatorParams<Self::Params>);

    /// Updates the derived representation after `value` was stored for
    /// parameter `index`. Runs at a block boundary, never concurrently with
    /// `operate`.
    fn param(&self, params: &mut OperatorParams<Self::Params>, index: usize, value: f32);

    /// Processes one block for one voice.
    fn operate(
        &self,
        voice: &mut Voice,
        params: &OperatorParams<Self::Params>,
        local: &mut Self::Local,
        ports: &mut Ports<'_>,
    ) -> OperateStatus;

    fn local(&self) -> Self::Local {
        Self::Local::default()
    }

    /// Re-zeroes `local` in place. Operators with heap-backed locals override
    /// this so it does not allocate.
    fn clear(&self, local: &mut Self::Local) {
        *local = Self::Local::default();
    }

    /// A parameter block in its reset state.
    fn create(&self) -> OperatorParams<Self::Params> {
        let mut params = OperatorParams::new(self.spec().params.len());
        self.reset(&mut params);
        params
    }

    /// Stores a normalized value and updates the derived state.
    fn set(&self, params: &mut OperatorParams<Self::Params>, index: usize, value: f32) {
        let Some(slot) = params.values.get_mut(index) else {
            return;
        };
        let value = value.clamp(0.0, 1.0);
        *slot = value;
        self.param(params, index, value);
    }

    /// Applies every parameter's default. Typically called from `reset`.
    fn apply_defaults(&self, params: &mut OperatorParams<Self::Params>) {
        let defaults = self.spec().params.iter().map(|p| p.default);
        for (index, value) in defaults.enumerate() {
            self.set(params, index, value);
        }
    }
}

pub type ParamBlock = Box<dyn Any + Send>;
pub type LocalBlock = Box<dyn Any + Send>;

/// Object-safe face of [Operator] so one chain can hold different kinds.
pub trait DynOperator: Send + Sync {
    fn spec(&self) -> &OperatorSpec;
    fn create_params(&self) -> ParamBlock;
    fn reset_params(&self, params: &mut ParamBlock);
    fn set_param(&self, params: &mut ParamBlock, index: usize, value: f32);
    fn param_value(&self, params: &ParamBlock, index: usize) -> Option<f32>;
    fn create_local(&self) -> LocalBlock;
    fn clear_local(&self, local: &mut LocalBlock);
    fn operate(
        &self,
        voice: &mut Voice,
        params: &ParamBlock,
        local: &mut LocalBlock,
        ports: &mut Ports<'_>,
    ) -> OperateStatus;
}

impl<T: Operator> DynOperator for T {
    fn spec(&self) -> &OperatorSpec {
        Operator::spec(self)
    }

    fn create_params(&self) -> ParamBlock {
        Box::new(self.create())
    }

    fn reset_params(&self, params: &mut ParamBlock) {
        if let Some(params) = params.downcast_mut::<OperatorParams<T::Params>>() {
            self.reset(params);
        }
    }

    fn set_param(&self, params: &mut ParamBlock, index: usize, value: f32) {
        if let Some(params) = params.downcast_mut::<OperatorParams<T::Params>>() {
            self.set(params, index, value);
        }
    }

    fn param_value(&self, params: &ParamBlock, index: usize) -> Option<f32> {
        let params = params.downcast_ref::<OperatorParams<T::Params>>()?;
        (index < params.len()).then(|| params.value(index))
    }

    fn create_local(&self) -> LocalBlock {
        Box::new(self.local())
    }

    fn clear_local(&self, local: &mut LocalBlock) {
        if let Some(local) = local.downcast_mut::<T::Local>() {
            self.clear(local);
        }
    }

    fn operate(
        &self,
        voice: &mut Voice,
        params: &ParamBlock,
        local: &mut LocalBlock,
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        match (
            params.downcast_ref::<OperatorParams<T::Params>>(),
            local.downcast_mut::<T::Local>(),
        ) {
            (Some(params), Some(local)) => Operator::operate(self, voice, params, local, ports),
            _ => {
                debug_assert!(false, "{} bound with foreign state", Operator::spec(self).name);
                OperateStatus::Ok
            }
        }
    }
}

impl fmt::Debug for dyn DynOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("name", &self.spec().name)
            .field("index", &self.spec().index)
            .finish()
    }
}
