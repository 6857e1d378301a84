pub mod backend;
pub mod control;
pub mod shared;
pub mod state;

pub use control::{run_starter, run_starter_with_reconnect_delay, DEFAULT_RECONNECT_DELAY};
