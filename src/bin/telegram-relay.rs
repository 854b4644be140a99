use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rag_chatbot::relay::{Relay, RelayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = RelayConfig::from_env()?;
    let _guard = init_logging(&config.log_dir);

    tracing::info!("starting telegram relay");
    let relay = Relay::new(config);

    tokio::select! {
        result = relay.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down telegram relay");
            Ok(())
        }
    }
}

fn init_logging(log_dir: &Path) -> WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::never(log_dir, "telegram_bot.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    guard
}
