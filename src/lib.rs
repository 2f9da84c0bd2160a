pub mod infrastructure;
pub mod shared;

// Re-export the types an application typically needs
pub use infrastructure::app::{
    application_entrypoint, AppContext, AppRunner, Application, LifecycleState,
};
pub use infrastructure::config::{AppConfig, CliEntry, ConfigEntry, ConfigSpec};
pub use infrastructure::health::{HealthServer, HealthState, ServiceState};
pub use infrastructure::shutdown::ShutdownSignal;
pub use shared::error::SvckitError;

// Re-export result type
pub type Result<T> = anyhow::Result<T>;
