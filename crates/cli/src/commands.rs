use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use ordo_infra::workers::GENERIC_POOL;
use ordo_observability::ProfilerEvent;
use serde_json::json;

use crate::runtime::Runtime;

/// Print to stdout or write to `output`.
fn emit(output: Option<PathBuf>, text: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, text)
                .with_context(|| format!("writing report to {}", path.display()))?;
            println!("report written to {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

async fn run_until(duration: Option<u64>) {
    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

pub async fn monitor(
    runtime: &Runtime,
    duration: Option<u64>,
    interval_ms: u64,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let profiler = &runtime.profiler;
    let alerts = profiler.subscribe();
    profiler.start_monitoring();

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(10)));
    let stop = run_until(duration);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(stop, interrupt);

    println!("monitoring (Ctrl-C to stop)");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let m = profiler.metrics();
                let lag = profiler.event_loop_stats();
                let pool = runtime.pools.get_pool(GENERIC_POOL)?.stats();
                println!(
                    "lag {:>7.2} ms (p95 {:>7.2})  rss {:>8.1} MB  cpu {:>5.1}%  busy {}/{}  queued {}",
                    m.event_loop_lag_ms,
                    lag.p95_lag,
                    m.memory.rss_mb(),
                    m.cpu.percent,
                    pool.busy_workers,
                    pool.total_workers,
                    pool.queue_size,
                );
                for event in alerts.drain() {
                    if let ProfilerEvent::Alert(alert) = event {
                        println!(
                            "  ! [{}] {}: {}",
                            alert.severity.as_str(),
                            alert.alert_type.as_str(),
                            alert.message
                        );
                    }
                }
            }
            _ = &mut stop => break,
            _ = &mut interrupt => {
                println!("interrupted");
                break;
            }
        }
    }

    profiler.stop_monitoring();
    emit(output, &profiler.generate_report())
}

pub async fn report(runtime: &Runtime, output: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let profiler = &runtime.profiler;
    profiler.collect_sample().await;
    let text = if json {
        serde_json::to_string_pretty(&profiler.report())?
    } else {
        profiler.generate_report()
    };
    emit(output, &text)
}

pub async fn stats(runtime: &Runtime) -> anyhow::Result<()> {
    let metrics = runtime.profiler.collect_sample().await;
    let pool = runtime.pools.get_pool(GENERIC_POOL)?;
    let stats = json!({
        "process": {
            "event_loop_lag_ms": metrics.event_loop_lag_ms,
            "rss_mb": metrics.memory.rss_mb(),
            "cpu_percent": metrics.cpu.percent,
            "heap_used_mb": metrics.heap_used_mb(),
        },
        "pool": pool.detailed_stats(),
        "jobs": runtime.jobs.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
