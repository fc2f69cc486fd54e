// Service modules (daemon functionality)
pub mod http_server;
pub mod process;

// CLI surface
pub mod cli;

// App state (configuration, paths)
pub mod state;

// Re-exports for consumers embedding the daemon
pub use process::{spawn_service, start_service, ServiceState, ShutdownHandle};
pub use state::{AppConfig, AppState, StateError};
