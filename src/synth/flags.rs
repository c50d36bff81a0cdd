//! Voice lifecycle flags and instrument mix flags.
//!
//! Each voice flag has one writer and one consumer:
//!
//! | flag         | set by                         | cleared by                               |
//! |--------------|--------------------------------|------------------------------------------|
//! | `KEY_ON`     | dispatch, on a fresh note      | the first envelope that observes it      |
//! | `KEY_REON`   | dispatch, on a restruck voice  | the first envelope that observes it      |
//! | `KEY_OFF`    | dispatch, on note-off          | the first envelope to finish its release |
//! | `KEY_OFFING` | an envelope entering release   | the first envelope to finish its release |
//! | `KEY_DONE`   | a terminating envelope         | dispatch, when the voice is reallocated  |
//!
//! Whether a note has been released is kept on the voice itself, since a
//! layered envelope may clear `KEY_OFF` while a longer one is still ringing.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VoiceFlags: u8 {
        const KEY_ON = 1 << 0;
        const KEY_REON = 1 << 1;
        const KEY_OFF = 1 << 2;
        const KEY_OFFING = 1 << 3;
        const KEY_DONE = 1 << 4;
        /// Either trigger flag.
        const TRIGGER = Self::KEY_ON.bits() | Self::KEY_REON.bits();
    }
}

bitflags::bitflags! {
    /// Instrument-defined switches read by the algorithm hooks, e.g. to bypass
    /// an effect or enable a modulation route. Bit meanings belong to the
    /// instrument.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MixFlags: u64 {
        const _ = !0;
    }
}

impl MixFlags {
    pub const fn bit(index: u32) -> Self {
        Self::from_bits_retain(1 << (index & 63))
    }
}
