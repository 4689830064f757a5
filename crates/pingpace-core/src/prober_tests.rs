use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout, Instant};

use crate::config::ProberConfig;
use crate::history::PingHistory;
use crate::lifecycle::mount;
use crate::peer::{LatencyNotice, LatencyPeer, PeerError};
use crate::prober::{next_cadence, next_interval, round_ms, ProbeOutcome, Prober, SkipReason};
use crate::report::{Cadence, ProbeReport};

#[derive(Debug, Clone, Copy)]
enum Step {
    Ack(Duration),
    Fail,
    Hang,
}

#[derive(Debug, Default)]
struct ScriptedPeer {
    steps: VecDeque<Step>,
    pings: u64,
    notices: Vec<u64>,
    fail_notices: bool,
}

impl ScriptedPeer {
    fn acking(latencies_ms: &[u64]) -> Self {
        Self::with_steps(
            latencies_ms
                .iter()
                .map(|&ms| Step::Ack(Duration::from_millis(ms))),
        )
    }

    fn with_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl LatencyPeer for ScriptedPeer {
    async fn ping(&mut self) -> Result<(), PeerError> {
        self.pings += 1;
        match self
            .steps
            .pop_front()
            .unwrap_or(Step::Ack(Duration::from_millis(100)))
        {
            Step::Ack(delay) => {
                sleep(delay).await;
                Ok(())
            }
            Step::Fail => Err(PeerError::Disconnected),
            Step::Hang => std::future::pending::<Result<(), PeerError>>().await,
        }
    }

    async fn notify_latency(&mut self, notice: LatencyNotice) -> Result<(), PeerError> {
        self.notices.push(notice.ms);
        if self.fail_notices {
            return Err(PeerError::Io("broken pipe".to_string()));
        }
        Ok(())
    }
}

fn reported(outcome: ProbeOutcome) -> ProbeReport {
    match outcome {
        ProbeOutcome::Reported(report) => report,
        ProbeOutcome::Skipped(reason) => panic!("probe skipped: {reason:?}"),
    }
}

async fn run_probes(latencies_ms: &[u64]) -> (Prober<ScriptedPeer>, ProbeReport) {
    let mut prober = Prober::new(ScriptedPeer::acking(latencies_ms), ProberConfig::default());
    let mut last = None;
    for _ in latencies_ms {
        last = Some(reported(prober.probe().await));
    }
    (prober, last.expect("at least one probe"))
}

#[test]
fn empty_history_uses_normal_interval() {
    let config = ProberConfig::default();

    assert_eq!(next_interval(&PingHistory::default(), &config), Duration::from_millis(5000));
}

#[test]
fn latest_at_or_below_twice_average_stays_normal() {
    let config = ProberConfig::default();
    let history: PingHistory = [100, 100, 100, 100, 250].into_iter().collect();

    // avg 130, 250 is not above 260
    assert_eq!(next_cadence(&history, 2.0), Cadence::Normal);
    assert_eq!(next_interval(&history, &config), Duration::from_millis(5000));
}

#[test]
fn latest_above_twice_average_goes_fast() {
    let config = ProberConfig::default();
    let history: PingHistory = [100, 100, 100, 100, 300].into_iter().collect();

    // avg 140, 300 is above 280
    assert_eq!(next_cadence(&history, 2.0), Cadence::Fast);
    assert_eq!(next_interval(&history, &config), Duration::from_millis(1000));
}

#[test]
fn zero_latency_history_never_goes_fast() {
    let history: PingHistory = [0, 0, 0].into_iter().collect();

    assert_eq!(next_cadence(&history, 2.0), Cadence::Normal);
}

#[test]
fn latency_rounds_to_nearest_millisecond() {
    assert_eq!(round_ms(Duration::from_micros(1499)), 1);
    assert_eq!(round_ms(Duration::from_micros(1500)), 2);
    assert_eq!(round_ms(Duration::ZERO), 0);
}

#[tokio::test(start_paused = true)]
async fn probe_records_latency_notifies_and_arms_timer() {
    // Arrange
    let mut prober = Prober::new(ScriptedPeer::acking(&[100]), ProberConfig::default());
    let start = Instant::now();

    // Act
    let report = reported(prober.probe().await);

    // Assert
    assert_eq!(report.latency_ms, Some(100));
    assert_eq!(report.seq, 1);
    assert_eq!(report.cadence, Cadence::Normal);
    assert_eq!(report.next_interval_ms, 5000);
    assert!(report.failures.is_empty());
    assert_eq!(prober.peer().notices, vec![100]);
    assert!(!prober.is_pinging());
    assert_eq!(
        prober.pending_deadline(),
        Some(start + Duration::from_millis(100 + 5000))
    );
}

#[tokio::test(start_paused = true)]
async fn spike_at_boundary_keeps_normal_cadence() {
    let (_, report) = run_probes(&[100, 100, 100, 100, 250]).await;

    assert_eq!(report.latency_ms, Some(250));
    assert_eq!(report.avg_ms, 130.0);
    assert_eq!(report.cadence, Cadence::Normal);
    assert_eq!(report.next_interval_ms, 5000);
}

#[tokio::test(start_paused = true)]
async fn spike_above_twice_average_switches_to_fast_cadence() {
    let (prober, report) = run_probes(&[100, 100, 100, 100, 300]).await;

    assert_eq!(report.latency_ms, Some(300));
    assert_eq!(report.avg_ms, 140.0);
    assert_eq!(report.cadence, Cadence::Fast);
    assert_eq!(report.next_interval_ms, 1000);
    assert_eq!(prober.history().latest(), 300);
}

#[tokio::test(start_paused = true)]
async fn history_holds_last_ten_completed_probes() {
    let latencies: Vec<u64> = (1..=15).map(|n| n * 10).collect();

    let (prober, report) = run_probes(&latencies).await;

    assert_eq!(report.samples, 10);
    assert_eq!(
        prober.history().iter().collect::<Vec<_>>(),
        latencies[5..].to_vec()
    );
    assert_eq!(prober.peer().notices, latencies);
}

#[tokio::test(start_paused = true)]
async fn schedules_exactly_once_per_completed_probe() {
    let mut prober = Prober::new(
        ScriptedPeer::with_steps([
            Step::Ack(Duration::from_millis(40)),
            Step::Fail,
            Step::Ack(Duration::from_millis(400)),
        ]),
        ProberConfig::default(),
    );

    for expected in 1..=3 {
        prober.probe().await;
        assert_eq!(prober.reschedules(), expected);
        assert!(!prober.is_pinging());
    }
}

#[tokio::test(start_paused = true)]
async fn overlapping_probe_is_skipped_while_ack_outstanding() {
    // Arrange
    let mut prober = Prober::new(ScriptedPeer::with_steps([Step::Hang]), ProberConfig::default());

    // Act
    let abandoned = timeout(Duration::from_secs(30), prober.probe()).await;
    let second = prober.probe().await;

    // Assert
    assert!(abandoned.is_err(), "unanswered ping must not complete");
    assert!(prober.is_pinging());
    assert!(matches!(second, ProbeOutcome::Skipped(SkipReason::InFlight)));
    assert_eq!(prober.peer().pings, 1);
    assert_eq!(prober.pending_deadline(), None);
    assert_eq!(prober.reschedules(), 0);
}

#[tokio::test(start_paused = true)]
async fn ack_timeout_turns_stall_into_failed_probe() {
    // Arrange
    let config = ProberConfig {
        ack_timeout: Some(Duration::from_millis(500)),
        ..ProberConfig::default()
    };
    let mut prober = Prober::new(
        ScriptedPeer::with_steps([Step::Hang, Step::Ack(Duration::from_millis(80))]),
        config,
    );

    // Act
    let failed = reported(prober.probe().await);
    let recovered = reported(prober.probe().await);

    // Assert
    assert_eq!(failed.latency_ms, None);
    assert_eq!(failed.failures, vec!["timeout".to_string()]);
    assert_eq!(failed.probes_err, 1);
    assert_eq!(failed.next_interval_ms, 5000);
    assert_eq!(recovered.latency_ms, Some(80));
    assert_eq!(recovered.probes_ok, 1);
    assert_eq!(prober.history().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn peer_error_records_no_sample() {
    let mut prober = Prober::new(ScriptedPeer::with_steps([Step::Fail]), ProberConfig::default());

    let report = reported(prober.probe().await);

    assert!(!report.is_ok());
    assert_eq!(report.failures, vec!["peer disconnected".to_string()]);
    assert!(prober.history().is_empty());
    assert!(prober.peer().notices.is_empty());
    assert!(prober.pending_deadline().is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_notification_does_not_fail_the_probe() {
    let mut peer = ScriptedPeer::acking(&[25]);
    peer.fail_notices = true;
    let mut prober = Prober::new(peer, ProberConfig::default());

    let report = reported(prober.probe().await);

    assert_eq!(report.latency_ms, Some(25));
    assert_eq!(prober.peer().notices, vec![25]);
}

#[tokio::test(start_paused = true)]
async fn torn_down_prober_ignores_probe_and_reschedule() {
    let mut prober = Prober::new(ScriptedPeer::acking(&[10]), ProberConfig::default());
    prober.probe().await;

    prober.teardown();

    assert_eq!(prober.pending_deadline(), None);
    assert_eq!(prober.schedule_next(), None);
    assert!(matches!(
        prober.probe().await,
        ProbeOutcome::Skipped(SkipReason::TornDown)
    ));
    assert_eq!(prober.peer().pings, 1);
}

#[tokio::test(start_paused = true)]
async fn mounted_prober_warms_up_then_self_schedules() {
    // Arrange
    let start = Instant::now();
    let (handle, mut reports) = mount(Prober::new(
        ScriptedPeer::acking(&[100, 100]),
        ProberConfig::default(),
    ));

    // Act
    let first = reports.recv().await.expect("first report");
    let first_at = Instant::now() - start;
    let second = reports.recv().await.expect("second report");
    let second_at = Instant::now() - start;
    let prober = handle.teardown().await.expect("join prober task");

    // Assert
    assert_eq!(first.seq, 1);
    assert_eq!(first_at, Duration::from_millis(3000 + 100));
    assert_eq!(second.seq, 2);
    assert_eq!(second_at, Duration::from_millis(3100 + 5000 + 100));
    assert!(prober.is_torn_down());
    assert_eq!(prober.peer().pings, 2);
}

#[tokio::test(start_paused = true)]
async fn mounted_prober_follows_fast_cadence_after_spike() {
    let start = Instant::now();
    let (handle, mut reports) = mount(Prober::new(
        ScriptedPeer::acking(&[100, 100, 500, 100]),
        ProberConfig::default(),
    ));

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(reports.recv().await.expect("report"));
    }
    let elapsed = Instant::now() - start;
    handle.teardown().await.expect("join prober task");

    // avg 233 after the spike, 500 is above 466
    assert_eq!(seen[2].cadence, Cadence::Fast);
    assert_eq!(seen[2].next_interval_ms, 1000);
    assert_eq!(seen[3].cadence, Cadence::Normal);
    assert_eq!(elapsed, Duration::from_millis(3100 + 5100 + 5500 + 1100));
}

#[tokio::test(start_paused = true)]
async fn unmount_cancels_pending_timer() {
    // Arrange
    let (handle, mut reports) = mount(Prober::new(
        ScriptedPeer::acking(&[50]),
        ProberConfig::default(),
    ));
    reports.recv().await.expect("first report");

    // Act
    let prober = handle.teardown().await.expect("join prober task");
    sleep(Duration::from_secs(60)).await;

    // Assert
    assert_eq!(prober.pending_deadline(), None);
    assert_eq!(prober.peer().pings, 1);
    assert_eq!(prober.reschedules(), 1);
    assert!(reports.recv().await.is_none(), "no report after unmount");
}

#[tokio::test(start_paused = true)]
async fn unmount_during_warmup_never_probes() {
    let (handle, mut reports) = mount(Prober::new(ScriptedPeer::default(), ProberConfig::default()));
    sleep(Duration::from_millis(1000)).await;

    let prober = handle.teardown().await.expect("join prober task");

    assert_eq!(prober.peer().pings, 0);
    assert!(prober.history().is_empty());
    assert!(reports.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_unmounts() {
    let (handle, mut reports) = mount(Prober::new(ScriptedPeer::default(), ProberConfig::default()));

    drop(handle);

    assert!(reports.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn unresponsive_peer_stalls_until_unmount() {
    // Arrange
    let (handle, mut reports) = mount(Prober::new(
        ScriptedPeer::with_steps([Step::Hang]),
        ProberConfig::default(),
    ));

    // Act
    sleep(Duration::from_secs(120)).await;
    let nothing_yet = reports.try_recv().is_err();
    let prober = handle.teardown().await.expect("join prober task");

    // Assert
    assert!(nothing_yet);
    assert!(prober.is_pinging(), "stalled probe stays in flight");
    assert_eq!(prober.peer().pings, 1);
    assert_eq!(prober.reschedules(), 0);
}

#[tokio::test(start_paused = true)]
async fn ack_arriving_after_unmount_is_ignored() {
    // Arrange
    let (handle, mut reports) = mount(Prober::new(
        ScriptedPeer::with_steps([Step::Ack(Duration::from_millis(2000))]),
        ProberConfig::default(),
    ));
    sleep(Duration::from_millis(3000 + 1000)).await;

    // Act
    let prober = handle.teardown().await.expect("join prober task");
    sleep(Duration::from_secs(10)).await;

    // Assert
    assert_eq!(prober.peer().pings, 1);
    assert!(prober.history().is_empty());
    assert!(prober.peer().notices.is_empty());
    assert_eq!(prober.reschedules(), 0);
    assert_eq!(prober.pending_deadline(), None);
    assert!(reports.recv().await.is_none(), "no report after unmount");
}

#[tokio::test(start_paused = true)]
async fn schedule_next_replaces_the_pending_timer() {
    // Arrange
    let mut prober = Prober::new(ScriptedPeer::acking(&[100, 100, 100, 100, 300]), ProberConfig::default());
    for _ in 0..5 {
        prober.probe().await;
    }
    sleep(Duration::from_millis(250)).await;

    // Act
    let interval = prober.schedule_next();

    // Assert
    assert_eq!(interval, Some(Duration::from_millis(1000)));
    assert_eq!(
        prober.pending_deadline(),
        Some(Instant::now() + Duration::from_millis(1000))
    );
    assert_eq!(prober.reschedules(), 6);
}
