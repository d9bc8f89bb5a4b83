pub mod broker;
pub mod config;
pub mod device;
pub mod router;
pub mod supervisor;

use crate::broker::{BrokerConsumer, MqttTransport};
use crate::config::Config;
use crate::device::StaticSpecResolver;
use crate::router::LogRequestHandler;
use crate::supervisor::SupervisorHandle;
use color_eyre::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = load_config()?;
    info!(
        "Starting device controller against broker {}:{}",
        config.broker.host, config.broker.port
    );

    let (transport, events) = MqttTransport::channel(config.broker.clone());
    let consumer = BrokerConsumer::new(config.broker.queues.clone(), transport, events);

    // Standalone wiring: requests are reported via logs until an embedding
    // system supplies its own handler and spec resolver.
    let handler = Arc::new(LogRequestHandler);
    let specs = Arc::new(StaticSpecResolver::new());

    let supervisor =
        SupervisorHandle::spawn_with_consumer(config.supervisor.clone(), handler, specs, consumer);

    supervisor.run_until_signalled().await?;
    info!("Device controller stopped");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn load_config() -> Result<Config> {
    let path = std::env::var("DEVICECTL_CONFIG").unwrap_or_else(|_| "devicectl.toml".to_string());
    let path = Path::new(&path);
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        warn!(
            "No config file at {}, falling back to defaults",
            path.display()
        );
        Ok(Config::default())
    }
}
