#[cfg(feature = "keyboard")]
mod keyboard;
mod midi;
#[cfg(feature = "keyboard")]
pub use self::keyboard::KeyboardHandler;
pub use self::midi::{decode, MidiHandler, VENDOR_ID};
