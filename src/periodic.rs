use std::{future::Future, time::Duration};

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs `cycle` every `period` until `cancel` fires.
///
/// The cycle is awaited inline, so a cycle that overruns its period makes
/// the loop skip the missed ticks instead of queueing or overlapping them.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut cycle: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(task = name, period_ms = period.as_millis() as u64, "periodic task started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = cycle() => {}
        }
        debug!(task = name, "cycle finished");
    }

    info!(task = name, "periodic task stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_cycle_skips_missed_ticks() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let task = {
            let runs = runs.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_periodic("test", Duration::from_secs(1), cancel, move || {
                let first = runs.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        tokio::time::sleep(Duration::from_millis(5500)).await;
                    }
                }
            }))
        };

        tokio::time::sleep(Duration::from_millis(6500)).await;
        cancel.cancel();
        task.await.unwrap();

        // 0s, then once late at 5.5s, then back on schedule at 6s. The ticks
        // at 1s through 5s are not replayed.
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_running_cycle() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_periodic(
            "test",
            Duration::from_secs(1),
            cancel.clone(),
            || tokio::time::sleep(Duration::from_secs(3600)),
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        task.await.unwrap();
    }
}
