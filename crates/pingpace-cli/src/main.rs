use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use pingpace_core::{
    mount, Document, ElementMetrics, IndicatorElement, LatencyPeer, ProbeOutcome, ProbeReport,
    Prober, ProberConfig, ProberHandle, ScrollAffordance, TcpPeer,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod exporter;
mod server;

#[derive(Debug, Parser)]
#[command(name = "pingpaced")]
#[command(about = "Adaptive latency prober")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, default_value_t = 3000)]
    warmup_ms: u64,

    #[arg(long, default_value_t = 5000)]
    normal_interval_ms: u64,

    #[arg(long, default_value_t = 1000)]
    fast_interval_ms: u64,

    #[arg(long, default_value_t = 10)]
    history_capacity: usize,

    #[arg(long, default_value_t = 2.0)]
    spike_factor: f64,

    /// Give up on a ping after this long; without it an unanswered ping
    /// stalls the prober.
    #[arg(long)]
    ack_timeout_ms: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    Serve {
        #[arg(long, default_value = "127.0.0.1:7878")]
        listen: String,
    },
    Once {
        #[arg(long, default_value = "127.0.0.1:7878")]
        peer: String,
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    Run {
        #[arg(long, default_value = "127.0.0.1:7878")]
        peer: String,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Export {
        #[arg(long, default_value = "127.0.0.1:7878")]
        peer: String,
        #[arg(long, default_value = "./data/latency")]
        output_dir: String,
        #[arg(long, default_value_t = 90)]
        retention_days: u64,
    },
    Scroll {
        #[arg(long)]
        scroll_width: u32,
        #[arg(long)]
        client_width: u32,
        #[arg(long, default_value = pingpace_core::scroll::DEFAULT_INDICATOR_ID)]
        indicator_id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

impl Cli {
    fn prober_config(&self) -> ProberConfig {
        ProberConfig {
            warmup: Duration::from_millis(self.warmup_ms),
            normal_interval: Duration::from_millis(self.normal_interval_ms),
            fast_interval: Duration::from_millis(self.fast_interval_ms),
            history_capacity: self.history_capacity,
            spike_factor: self.spike_factor,
            ack_timeout: self.ack_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.prober_config();

    match cli.command {
        Command::Serve { listen } => {
            server::run_server(&listen).await?;
        }
        Command::Once { peer, format } => {
            let mut prober = Prober::new(TcpPeer::connect(peer.as_str()).await?, config);
            match prober.probe().await {
                ProbeOutcome::Reported(report) => print_report(&report, format)?,
                ProbeOutcome::Skipped(reason) => warn!(?reason, "probe skipped"),
            }
        }
        Command::Run { peer, format } => {
            let prober = Prober::new(TcpPeer::connect(peer.as_str()).await?, config);
            let (handle, reports) = mount(prober);
            stream_loop(handle, reports, format).await?;
        }
        Command::Export {
            peer,
            output_dir,
            retention_days,
        } => {
            let prober = Prober::new(TcpPeer::connect(peer.as_str()).await?, config);
            let (handle, reports) = mount(prober);
            exporter::run_exporter(handle, reports, &output_dir, retention_days).await?;
        }
        Command::Scroll {
            scroll_width,
            client_width,
            indicator_id,
        } => {
            let mut doc = Document::new();
            doc.insert(indicator_id.clone(), IndicatorElement::new());
            let metrics = ElementMetrics {
                scroll_width,
                client_width,
            };
            let hidden = ScrollAffordance::new(indicator_id.clone()).mounted(&metrics, &mut doc);
            let out = serde_json::json!({
                "indicator": indicator_id,
                "scroll_width": scroll_width,
                "client_width": client_width,
                "hidden": hidden,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

async fn stream_loop<P: LatencyPeer + 'static>(
    handle: ProberHandle<P>,
    mut reports: mpsc::UnboundedReceiver<ProbeReport>,
    format: OutputFormat,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            report = reports.recv() => {
                let Some(report) = report else { break };
                print_report(&report, format)?;
                info!(next_interval_ms = %report.next_interval_ms, ok = %report.is_ok(), "probe");
            }
        }
    }

    let prober = handle.teardown().await?;
    info!(samples = prober.history().len(), "stopped");
    Ok(())
}

fn print_report(report: &ProbeReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(report)?);
        }
        OutputFormat::Human => {
            println!("=== Probe #{} ===", report.seq);
            println!("Time:       {}", report.ts.to_rfc3339());
            match report.latency_ms {
                Some(ms) => println!("Latency:    {ms} ms"),
                None => println!("Latency:    n/a"),
            }
            println!(
                "History:    avg={:.1} ms latest={} ms samples={}",
                report.avg_ms, report.latest_ms, report.samples
            );
            println!(
                "Next:       {:?} in {} ms (ok={} err={})",
                report.cadence, report.next_interval_ms, report.probes_ok, report.probes_err
            );
            if !report.failures.is_empty() {
                println!("Failures:   {}", report.failures.join(", "));
            }
        }
    }

    Ok(())
}
