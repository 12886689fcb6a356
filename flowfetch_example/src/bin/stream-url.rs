use anyhow::{bail, Context, Result};
use flowfetch::prelude::*;
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: stream-url <url> [sse|ndjson|json]";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    init_logging();

    let mut args = std::env::args().skip(1);
    let url = args.next().context(USAGE)?;
    let format = match args.next().as_deref() {
        None | Some("json") => StreamFormat::Json,
        Some("sse") => StreamFormat::Sse,
        Some("ndjson") => StreamFormat::NdJson,
        Some(other) => bail!("unknown format {other:?}; {USAGE}"),
    };

    let config = ClientConfig::load().context("Failed to load configuration")?;
    tracing::info!(
        retries = config.retries,
        timeout_ms = config.timeout_ms,
        "Configuration loaded"
    );

    let client = FlowClient::with_config(config)?;

    // Ctrl-C cancels the request, including any backoff or body read in progress
    let signal = CancellationToken::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let options = client.options().with_stream(format).with_signal(signal);
    let response = client.fetch(&url, options).await?;
    tracing::info!(
        status = %response.status(),
        attempts = response.attempts(),
        "Response received"
    );
    let mut response = response.error_for_status()?;

    let mut values = response.values::<serde_json::Value>()?;
    let mut count = 0usize;
    while let Some(value) = values.next().await {
        match value {
            Ok(value) => {
                count += 1;
                tracing::info!(index = count, "{}", value);
            }
            Err(e) if e.is_cancelled() => {
                tracing::warn!("Interrupted");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(count, "Stream finished");
    Ok(())
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match std::env::var("FLOWFETCH_LOG_FORMAT").as_deref() {
        Ok("json") => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}
