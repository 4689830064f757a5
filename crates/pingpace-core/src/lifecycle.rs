use std::future::Future;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, sleep_until};
use tracing::info;

use crate::peer::LatencyPeer;
use crate::prober::{ProbeOutcome, Prober};
use crate::report::ProbeReport;

/// A prober running on its own task. Dropping the handle unmounts it.
pub struct ProberHandle<P: LatencyPeer> {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Prober<P>>,
}

/// Spawns the prober: warm-up delay, first probe, then self-scheduling.
/// Must be called from within a tokio runtime.
pub fn mount<P>(prober: Prober<P>) -> (ProberHandle<P>, mpsc::UnboundedReceiver<ProbeReport>)
where
    P: LatencyPeer + 'static,
{
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (reports_tx, reports_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(drive(prober, shutdown_rx, reports_tx));
    (ProberHandle { shutdown, task }, reports_rx)
}

impl<P: LatencyPeer> ProberHandle<P> {
    /// Cancels the pending timer and any wait in progress, then hands back
    /// the final prober state.
    pub async fn teardown(self) -> Result<Prober<P>, JoinError> {
        let _ = self.shutdown.send(true);
        self.task.await
    }
}

async fn drive<P: LatencyPeer>(
    mut prober: Prober<P>,
    mut shutdown: watch::Receiver<bool>,
    reports: mpsc::UnboundedSender<ProbeReport>,
) -> Prober<P> {
    let warmup = prober.config().warmup;
    info!(warmup_ms = %warmup.as_millis(), "prober mounted");

    if until_teardown(&mut shutdown, sleep(warmup)).await.is_some() {
        loop {
            let Some(outcome) = until_teardown(&mut shutdown, prober.probe()).await else {
                break;
            };
            if let ProbeOutcome::Reported(report) = outcome {
                let _ = reports.send(report);
            }

            // Nothing armed means the prober is stalled; park until unmounted.
            let Some(deadline) = prober.pending_deadline() else {
                let _ = until_teardown(&mut shutdown, std::future::pending::<()>()).await;
                break;
            };
            if until_teardown(&mut shutdown, sleep_until(deadline)).await.is_none() {
                break;
            }
            prober.timer_fired();
        }
    }

    prober.teardown();
    info!(
        samples = prober.history().len(),
        in_flight = prober.is_pinging(),
        "prober torn down"
    );
    prober
}

async fn until_teardown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    let stopped = *shutdown.borrow();
    if stopped {
        return None;
    }
    tokio::select! {
        biased;
        _ = shutdown.changed() => None,
        out = fut => Some(out),
    }
}
