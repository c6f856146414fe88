use batchbuf::{BufferConfig, BufferError, Handler, Keyed, Spooler, Stash};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const PRODUCERS: usize = 4;
const EVENTS_PER_PRODUCER: usize = 250;

/// Stash of log lines, sent in insertion order
fn build_stash() -> Result<Stash<String>, BufferError> {
    let config = BufferConfig::from_env("SPOOL_DEMO_STASH")?;
    info!(period = ?config.period, limit = config.limit, "Stash configured");

    Stash::new(
        Handler::from_async(|batch: Vec<String>| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            info!(
                lines = batch.len(),
                first = batch.first().map(String::as_str),
                "Shipped log lines"
            );
            Ok(())
        }),
        config,
    )
}

/// Distinct spooler of gauge readings, one per producer
fn build_gauges() -> Result<Spooler<Keyed<usize, usize>>, BufferError> {
    let config = BufferConfig::from_env("SPOOL_DEMO_GAUGES")?.with_distinct(true);
    info!(period = ?config.period, limit = config.limit, "Gauge spooler configured");

    Spooler::new(
        Handler::sync(|batch: Vec<Keyed<usize, usize>>| {
            for gauge in &batch {
                info!(producer = gauge.key, reading = gauge.value, "Latest gauge");
            }
            Ok(())
        }),
        config,
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let stash = Arc::new(build_stash()?);
    let gauges = Arc::new(build_gauges()?);

    let mut producers = Vec::with_capacity(PRODUCERS);
    for producer in 0..PRODUCERS {
        let stash = Arc::clone(&stash);
        let gauges = Arc::clone(&gauges);
        producers.push(tokio::spawn(async move {
            for event in 0..EVENTS_PER_PRODUCER {
                stash
                    .put_async(format!("producer {producer} event {event}"))
                    .await?;
                gauges.put_async(Keyed::new(producer, event)).await?;
                if event % 50 == 0 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
            Ok::<(), BufferError>(())
        }));
    }

    for producer in producers {
        producer.await??;
    }

    let lines = stash.flush_async().await?;
    let readings = gauges.flush_async().await?;
    info!(lines, readings, "Final flush");

    stash.close()?;
    gauges.close()?;

    info!("Program completed");
    Ok(())
}
