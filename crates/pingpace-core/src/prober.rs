use std::time::Duration;

use chrono::Utc;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::config::ProberConfig;
use crate::history::PingHistory;
use crate::peer::{LatencyNotice, LatencyPeer, PeerError};
use crate::report::{Cadence, ProbeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    TornDown,
}

#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Reported(ProbeReport),
    Skipped(SkipReason),
}

/// Fast cadence when the latest sample is strictly above `spike_factor`
/// times the average, normal otherwise. An empty history averages to zero
/// and always yields the normal cadence.
pub fn next_cadence(history: &PingHistory, spike_factor: f64) -> Cadence {
    let avg = history.average();
    let latest = history.latest() as f64;
    if avg > 0.0 && latest > avg * spike_factor {
        Cadence::Fast
    } else {
        Cadence::Normal
    }
}

pub fn next_interval(history: &PingHistory, config: &ProberConfig) -> Duration {
    interval_for(next_cadence(history, config.spike_factor), config)
}

fn interval_for(cadence: Cadence, config: &ProberConfig) -> Duration {
    match cadence {
        Cadence::Fast => config.fast_interval,
        Cadence::Normal => config.normal_interval,
    }
}

pub(crate) fn round_ms(elapsed: Duration) -> u64 {
    (elapsed.as_nanos() as f64 / 1_000_000.0).round() as u64
}

pub struct Prober<P: LatencyPeer> {
    peer: P,
    config: ProberConfig,
    history: PingHistory,
    is_pinging: bool,
    pending: Option<Instant>,
    cadence: Cadence,
    torn_down: bool,
    seq: u64,
    probes_ok: u64,
    probes_err: u64,
    reschedules: u64,
}

impl<P: LatencyPeer> Prober<P> {
    pub fn new(peer: P, config: ProberConfig) -> Self {
        Self {
            peer,
            history: PingHistory::new(config.history_capacity),
            config,
            is_pinging: false,
            pending: None,
            cadence: Cadence::Normal,
            torn_down: false,
            seq: 0,
            probes_ok: 0,
            probes_err: 0,
            reschedules: 0,
        }
    }

    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    pub fn history(&self) -> &PingHistory {
        &self.history
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    pub fn is_pinging(&self) -> bool {
        self.is_pinging
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Deadline of the single pending timer, if one is armed.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending
    }

    /// How many times the next probe has been scheduled.
    pub fn reschedules(&self) -> u64 {
        self.reschedules
    }

    /// Round-trips one ping, records the latency and schedules the next
    /// probe.
    ///
    /// Without an `ack_timeout`, a peer that never acknowledges keeps this
    /// future pending forever. If the future is dropped before the ack
    /// arrives the prober stays marked in flight and every later call is
    /// skipped.
    pub async fn probe(&mut self) -> ProbeOutcome {
        if self.torn_down {
            return ProbeOutcome::Skipped(SkipReason::TornDown);
        }
        if self.is_pinging {
            debug!(seq = self.seq, "probe already in flight");
            return ProbeOutcome::Skipped(SkipReason::InFlight);
        }

        self.is_pinging = true;
        self.seq += 1;
        let started = Instant::now();

        let acked = match self.config.ack_timeout {
            Some(limit) => timeout(limit, self.peer.ping())
                .await
                .unwrap_or(Err(PeerError::Timeout)),
            None => self.peer.ping().await,
        };

        let measured = match acked {
            Ok(()) => {
                let latency_ms = round_ms(started.elapsed());
                self.history.push(latency_ms);
                self.probes_ok += 1;
                if let Err(err) = self
                    .peer
                    .notify_latency(LatencyNotice { ms: latency_ms })
                    .await
                {
                    warn!(seq = self.seq, %err, "latency notification failed");
                }
                Ok(latency_ms)
            }
            Err(err) => {
                self.probes_err += 1;
                warn!(seq = self.seq, %err, "probe failed");
                Err(err.to_string())
            }
        };

        self.is_pinging = false;
        let next = self.arm_timer();

        let (latency_ms, failures) = match measured {
            Ok(ms) => (Some(ms), Vec::new()),
            Err(reason) => (None, vec![reason]),
        };

        debug!(
            seq = self.seq,
            latency_ms = ?latency_ms,
            next_interval_ms = %next.as_millis(),
            "probe complete"
        );

        ProbeOutcome::Reported(ProbeReport {
            ts: Utc::now(),
            seq: self.seq,
            latency_ms,
            avg_ms: self.history.average(),
            latest_ms: self.history.latest(),
            samples: self.history.len(),
            cadence: self.cadence,
            next_interval_ms: next.as_millis(),
            failures,
            probes_ok: self.probes_ok,
            probes_err: self.probes_err,
        })
    }

    /// Replaces any pending timer with one chosen from the current history.
    /// Returns `None` once torn down.
    pub fn schedule_next(&mut self) -> Option<Duration> {
        if self.torn_down {
            return None;
        }
        Some(self.arm_timer())
    }

    /// Cancels the pending timer; later probes and reschedules are no-ops.
    pub fn teardown(&mut self) {
        self.pending = None;
        self.torn_down = true;
    }

    pub(crate) fn timer_fired(&mut self) {
        self.pending = None;
    }

    fn arm_timer(&mut self) -> Duration {
        self.pending = None;
        self.cadence = next_cadence(&self.history, self.config.spike_factor);
        let interval = interval_for(self.cadence, &self.config);
        self.pending = Some(Instant::now() + interval);
        self.reschedules += 1;
        interval
    }
}
