pub mod board;
pub mod config;
pub mod errors;
pub mod logging;
pub mod port;
pub mod readiness;
pub mod report;
pub mod server;
pub mod snapshot;
pub mod viewer;
pub mod watcher;
