// Infrastructure - configuration, logging, signal handling and the
// application lifecycle core

pub mod app;
pub mod config;
pub mod health;
pub mod logging;
pub mod scheduler;
pub mod shutdown;
pub mod signals;
