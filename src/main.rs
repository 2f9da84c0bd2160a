use std::net::SocketAddr;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use svckit::{
    application_entrypoint, AppConfig, AppContext, Application, CliEntry, ConfigEntry, ConfigSpec,
    HealthServer, HealthState, ServiceState,
};
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tracing::info;

struct QueueItem {
    payload: String,
    enqueued_at: Instant,
}

/// Producer/consumer demo: producers enqueue payloads, consumers drain the
/// queue, and once everything is consumed the application shuts itself down.
struct AsyncQueueApp {
    started_at: Option<Instant>,
    produced: Arc<AtomicUsize>,
    consumed: Arc<AtomicUsize>,
    health: Option<HealthState>,
}

impl AsyncQueueApp {
    fn new() -> Self {
        Self {
            started_at: None,
            produced: Arc::new(AtomicUsize::new(0)),
            consumed: Arc::new(AtomicUsize::new(0)),
            health: None,
        }
    }
}

#[async_trait]
impl Application for AsyncQueueApp {
    async fn start(&mut self, ctx: &AppContext) -> svckit::Result<()> {
        info!("app starts");
        self.started_at = Some(Instant::now());

        if let Some(addr) = health_addr(&ctx.config)? {
            let server = HealthServer::new("asyncq", addr);
            let health = server.state();
            health.set(ServiceState::Working).await;
            self.health = Some(health);
            ctx.spawner.spawn("health", server.serve(ctx.shutdown.clone()));
        }

        Ok(())
    }

    async fn stop(&mut self, _ctx: &AppContext) -> svckit::Result<()> {
        info!("app shuts down");
        if let Some(health) = &self.health {
            health.set(ServiceState::ShuttingDown).await;
        }
        if let Some(started_at) = self.started_at {
            info!("program completed in {:?}", started_at.elapsed());
        }
        Ok(())
    }

    async fn jobs(&mut self, ctx: &AppContext) -> svckit::Result<()> {
        let nprod = ctx.config.get_i64("num_producers").unwrap_or(1).max(0) as usize;
        let ncon = ctx.config.get_i64("num_consumers").unwrap_or(1).max(0) as usize;
        info!("jobs started with {nprod} producers and {ncon} consumers");

        let (item_tx, item_rx) = mpsc::channel::<QueueItem>(64);
        let item_rx = Arc::new(Mutex::new(item_rx));
        let (done_tx, mut done_rx) = mpsc::channel::<()>(ncon.max(1));

        for id in 0..ncon {
            let rx = Arc::clone(&item_rx);
            let done = done_tx.clone();
            let consumed = Arc::clone(&self.consumed);
            ctx.spawner.spawn(&format!("consumer-{id}"), async move {
                loop {
                    let item = { rx.lock().await.recv().await };
                    let Some(item) = item else { break };
                    consumed.fetch_add(1, Ordering::SeqCst);
                    info!(
                        "consumer {id} got <{}> after {:?}",
                        item.payload,
                        item.enqueued_at.elapsed()
                    );
                    sleep(Duration::from_millis(10)).await;
                }
                drop(done);
                Ok(())
            });
        }
        drop(done_tx);

        let producers = (0..nprod).map(|id| {
            let tx = item_tx.clone();
            let produced = Arc::clone(&self.produced);
            async move {
                for n in 0..5 {
                    sleep(Duration::from_millis(5)).await;
                    let payload = format!("{id:02x}-{n:02x}");
                    let item = QueueItem {
                        payload: payload.clone(),
                        enqueued_at: Instant::now(),
                    };
                    if tx.send(item).await.is_err() {
                        break;
                    }
                    produced.fetch_add(1, Ordering::SeqCst);
                    info!("producer {id} added <{payload}> to queue");
                }
            }
        });
        futures::future::join_all(producers).await;
        drop(item_tx);

        // Consumers exit once the queue is closed and fully drained.
        while done_rx.recv().await.is_some() {}

        info!(
            "jobs finished: produced={} consumed={}",
            self.produced.load(Ordering::SeqCst),
            self.consumed.load(Ordering::SeqCst)
        );
        ctx.shutdown.request();
        Ok(())
    }
}

/// Where to bind the health endpoint, or `None` when `health_port` is 0.
/// A port outside 0..=65535 rejects the configuration instead of being
/// truncated into some other port.
fn health_addr(config: &AppConfig) -> svckit::Result<Option<SocketAddr>> {
    let port = config.get_i64("health_port").unwrap_or(0);
    if port == 0 {
        return Ok(None);
    }
    let port = u16::try_from(port)
        .map_err(|_| anyhow!("health_port {port} is out of range 1-65535"))?;
    Ok(Some(SocketAddr::from(([127, 0, 0, 1], port))))
}

fn config_spec() -> ConfigSpec {
    ConfigSpec::new("asyncq", "Producer/consumer demo on the svckit scaffold")
        .with_entry(
            ConfigEntry::int("num_producers", "The number of producers", 1)
                .with_cli(CliEntry::new(Some('p'), "num-producers")),
        )
        .with_entry(
            ConfigEntry::int("num_consumers", "The number of consumers", 1)
                .with_cli(CliEntry::new(Some('c'), "num-consumers")),
        )
        .with_entry(
            ConfigEntry::int(
                "health_port",
                "Port of the health endpoint, 0 disables it",
                0,
            )
            .with_cli(CliEntry::new(None, "health-port")),
        )
}

fn main() {
    if let Err(err) = application_entrypoint(config_spec(), None, |_| AsyncQueueApp::new()) {
        eprintln!("application failed: {err:#}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(args: &[&str]) -> AppConfig {
        let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        AppConfig::resolve(config_spec(), Some(&argv)).unwrap()
    }

    #[test]
    fn test_health_endpoint_disabled_by_default() {
        assert!(health_addr(&resolve(&[])).unwrap().is_none());
    }

    #[test]
    fn test_health_port_binds_loopback() {
        let addr = health_addr(&resolve(&["--health-port", "8080"]))
            .unwrap()
            .unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_out_of_range_health_port_rejected() {
        assert!(health_addr(&resolve(&["--health-port", "65536"])).is_err());
        assert!(health_addr(&resolve(&["--health-port=-1"])).is_err());
    }
}
