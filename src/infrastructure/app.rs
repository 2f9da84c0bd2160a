use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::infrastructure::config::{AppConfig, ConfigSpec};
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::scheduler::{SchedulerHandle, TaskScheduler};
use crate::infrastructure::shutdown::ShutdownSignal;
use crate::infrastructure::signals::{SignalGuard, SignalHandle};

/// Capabilities an application must provide to the runner.
///
/// `start()` and `stop()` are both executed inside a shielded region: a
/// termination signal arriving while either runs is deferred until the
/// routine finishes, because a partially started or partially stopped
/// application has no defined state to resume from. `stop()` must tolerate a
/// partially started application, since it also runs when `start()` failed.
#[async_trait]
pub trait Application: Send {
    /// Called once when the application starts running. Initialize
    /// resources, open connections and spawn long-lived background tasks
    /// here, via `ctx.spawner`.
    async fn start(&mut self, ctx: &AppContext) -> crate::Result<()>;

    /// Called once while the application shuts down. Release what `start()`
    /// acquired.
    async fn stop(&mut self, ctx: &AppContext) -> crate::Result<()>;

    /// Optional foreground work, run concurrently with the wait for
    /// termination; whichever finishes first ends the wait phase. Call
    /// `ctx.shutdown.request()` at the end to shut the application down
    /// explicitly after the jobs are done.
    async fn jobs(&mut self, ctx: &AppContext) -> crate::Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Handles shared with the application during every lifecycle phase.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub spawner: SchedulerHandle,
    pub shutdown: ShutdownSignal,
}

/// Lifecycle states of [`AppRunner`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Stopping,
    Closed,
}

/// Drives an [`Application`] through its lifecycle:
///
/// `Created → Starting → Running → Stopping → Closed`
///
/// The runner owns the shutdown trigger and the signal delivery point and
/// passes both to the application through [`AppContext`]; one runner drives
/// one run.
pub struct AppRunner {
    config: Arc<AppConfig>,
    shutdown: ShutdownSignal,
    signals: SignalHandle,
    state: LifecycleState,
}

impl AppRunner {
    /// Create a runner and initialize logging from the config.
    pub fn new(config: AppConfig) -> crate::Result<Self> {
        init_logging(&config)?;
        let shutdown = ShutdownSignal::new();
        let signals = SignalHandle::new(shutdown.clone());
        Ok(Self {
            config: Arc::new(config),
            shutdown,
            signals,
            state: LifecycleState::Created,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The shutdown trigger shared with the application.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// The signal delivery point. The OS watcher drives it in production;
    /// tests may call `deliver()` on it instead of raising a real signal.
    pub fn signal_handle(&self) -> SignalHandle {
        self.signals.clone()
    }

    /// Run the application to completion.
    ///
    /// Returns once the scheduler is closed. Only a `start()` failure
    /// surfaces as an error; every later fault is logged and the process
    /// still winds down cleanly.
    pub fn run<A: Application>(&mut self, app: &mut A) -> crate::Result<()> {
        let scheduler = TaskScheduler::new()?;
        let spawner = scheduler.handle();
        let ctx = AppContext {
            config: Arc::clone(&self.config),
            spawner: spawner.clone(),
            shutdown: self.shutdown.clone(),
        };

        let mut signal_guard = SignalGuard::new(self.signals.clone());
        signal_guard.install(spawner.runtime());

        self.state = LifecycleState::Starting;
        info!(app = %self.config.app_name(), "application starting");

        let (start_result, start_interrupted) =
            scheduler.block_on(self.signals.shielded(app.start(&ctx)));

        // Present if and only if the wait phase was entered; checked before
        // use below, since termination can arrive before it begins.
        let mut wait_task: Option<JoinHandle<()>> = None;

        match (&start_result, start_interrupted) {
            (Err(err), _) => error!("start failed: {err:#}"),
            (Ok(()), true) => {
                info!("termination signal arrived during start, skipping wait phase");
            }
            (Ok(()), false) => {
                self.state = LifecycleState::Running;
                info!("application running, entering wait phase");

                let shutdown = self.shutdown.clone();
                let mut waiter = spawner.runtime().spawn(async move { shutdown.wait().await });

                let jobs_outcome = scheduler.block_on(async {
                    tokio::select! {
                        res = app.jobs(&ctx) => Some(res),
                        _ = &mut waiter => None,
                    }
                });

                match jobs_outcome {
                    Some(Ok(())) => {
                        info!("jobs finished, exiting wait phase");
                        wait_task = Some(waiter);
                    }
                    Some(Err(err)) => {
                        error!("jobs failed, shutting down: {err:#}");
                        wait_task = Some(waiter);
                    }
                    // The wait task already settled; nothing left to join.
                    None => info!("termination requested, exiting wait phase"),
                }
            }
        }

        self.state = LifecycleState::Stopping;
        info!("application stopping");

        let (stop_result, stop_interrupted) =
            scheduler.block_on(self.signals.shielded(app.stop(&ctx)));
        if stop_interrupted {
            info!("termination signal arrived during stop, ignoring");
        }
        if let Err(err) = stop_result {
            error!("stop failed: {err:#}");
        }

        // Set the shutdown slot and patiently join the wait task before the
        // forced-cancellation pass, so it settles cleanly instead of being
        // swept together with leftover tasks.
        self.shutdown.request();
        if let Some(waiter) = wait_task.take() {
            let _ = scheduler.block_on(waiter);
        }

        scheduler.cancel_all();
        self.state = LifecycleState::Closed;
        scheduler.close();
        info!("application closed");

        start_result
    }
}

/// The boilerplate entry point of an application.
///
/// Resolves the configuration (defaults, then environment, then the
/// command line), honors `dump_config`, builds the application and runs it
/// until `Closed` is reached. `argv` is the argument list without the
/// program name; `None` reads the process arguments.
pub fn application_entrypoint<A, F>(
    spec: ConfigSpec,
    argv: Option<&[String]>,
    build: F,
) -> crate::Result<()>
where
    A: Application,
    F: FnOnce(&AppConfig) -> A,
{
    let config = AppConfig::resolve(spec, argv)?;
    if config.get_bool("dump_config").unwrap_or(false) {
        config.dump();
    }

    let mut runner = AppRunner::new(config)?;
    let mut app = build(runner.config());
    runner.run(&mut app)
}
