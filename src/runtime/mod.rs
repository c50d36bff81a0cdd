mod controller;
pub use controller::Controller;

#[cfg(feature = "native")]
pub mod native;
#[cfg(feature = "native")]
pub use native::{run, RunOptions};
