// Logging and process setup
pub mod process;

// App state (configuration, paths, session mounting)
pub mod state;

// Kernel mount adapter
#[cfg(feature = "fuse")]
pub mod fuse;

pub use state::{AppConfig, AppState, StateError};
