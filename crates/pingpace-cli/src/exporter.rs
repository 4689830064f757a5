use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use pingpace_core::{LatencyPeer, ProbeReport, ProberHandle};
use tokio::sync::mpsc;
use tracing::{info, warn};

const LOG_PREFIX: &str = "pingpace-";
const LOG_SUFFIX: &str = ".jsonl";

pub async fn run_exporter<P: LatencyPeer + 'static>(
    handle: ProberHandle<P>,
    mut reports: mpsc::UnboundedReceiver<ProbeReport>,
    output_dir: &str,
    retention_days: u64,
) -> Result<()> {
    let out_dir = PathBuf::from(output_dir);
    fs::create_dir_all(&out_dir)?;

    let mut state = ExportState::new(out_dir, retention_days)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            report = reports.recv() => {
                let Some(report) = report else { break };
                state.write_report(&report)?;
                state.maybe_prune()?;
            }
        }
    }

    let prober = handle.teardown().await?;
    info!(samples = prober.history().len(), "exporter stopped");
    Ok(())
}

struct ExportState {
    out_dir: PathBuf,
    retention_days: u64,
    current_day: String,
    writer: BufWriter<File>,
    last_prune: Option<Instant>,
}

impl ExportState {
    fn new(out_dir: PathBuf, retention_days: u64) -> Result<Self> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let writer = Self::open_writer(&out_dir, &day)?;

        Ok(Self {
            out_dir,
            retention_days,
            current_day: day,
            writer,
            last_prune: None,
        })
    }

    fn open_writer(out_dir: &Path, day: &str) -> Result<BufWriter<File>> {
        let path = out_dir.join(format!("{LOG_PREFIX}{day}{LOG_SUFFIX}"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn rotate_if_needed(&mut self, ts: DateTime<Utc>) -> Result<()> {
        let day = ts.format("%Y-%m-%d").to_string();
        if day != self.current_day {
            self.writer.flush()?;
            self.writer = Self::open_writer(&self.out_dir, &day)?;
            self.current_day = day;
        }
        Ok(())
    }

    fn write_report(&mut self, report: &ProbeReport) -> Result<()> {
        self.rotate_if_needed(report.ts)?;

        let exported = export_record(report);
        serde_json::to_writer(&mut self.writer, &exported)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let latest_path = self.out_dir.join("latest.json");
        fs::write(latest_path, serde_json::to_vec_pretty(&exported)?)?;

        Ok(())
    }

    fn maybe_prune(&mut self) -> Result<()> {
        if self
            .last_prune
            .is_some_and(|at| at.elapsed() < Duration::from_secs(1800))
        {
            return Ok(());
        }
        self.last_prune = Some(Instant::now());

        prune_old_log_files(&self.out_dir, self.retention_days, SystemTime::now())?;

        Ok(())
    }
}

pub(crate) fn export_record(report: &ProbeReport) -> serde_json::Value {
    serde_json::json!({
        "ts": report.ts,
        "unix_ms": report.ts.timestamp_millis(),
        "seq": report.seq,
        "latency_ms": report.latency_ms,
        "history": {
            "avg_ms": report.avg_ms,
            "latest_ms": report.latest_ms,
            "samples": report.samples
        },
        "schedule": {
            "cadence": report.cadence,
            "next_interval_ms": report.next_interval_ms
        },
        "failures": report.failures,
        "counters": {
            "ok": report.probes_ok,
            "err": report.probes_err
        }
    })
}

pub(crate) fn prune_old_log_files(out_dir: &Path, retention_days: u64, now: SystemTime) -> Result<()> {
    let today = DateTime::<Utc>::from(now).date_naive();
    let cutoff = today
        .checked_sub_days(Days::new(retention_days))
        .unwrap_or(today);

    for entry in fs::read_dir(out_dir)? {
        let path = entry?.path();
        let Some(date_part) = path
            .file_name()
            .and_then(|v| v.to_str())
            .and_then(|n| n.strip_prefix(LOG_PREFIX))
            .and_then(|n| n.strip_suffix(LOG_SUFFIX))
        else {
            continue;
        };

        let Ok(file_date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), %err, "failed to prune export file");
            }
        }
    }

    Ok(())
}
