//! Periodic loops under one shutdown switch.

use std::future::Future;
use std::time::Duration;

use interlude_net::ShutdownRx;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Spawns and tracks the server's periodic loops.
///
/// Every loop runs its body to completion before the next tick is
/// considered — a slow body delays the following tick (never overlaps it,
/// never skips it). On shutdown each loop runs its final step, if it has
/// one, and exits.
pub struct TickScheduler {
    shutdown: ShutdownRx,
    tasks: Vec<JoinHandle<()>>,
}

impl TickScheduler {
    pub fn new(shutdown: ShutdownRx) -> Self {
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// A plain loop: `body` once per `period`.
    pub fn spawn_loop<F, Fut>(&mut self, name: &'static str, period: Duration, body: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.spawn_loop_with_final(name, period, body, || async {});
    }

    /// A loop with a deterministic shutdown step, run exactly once after
    /// the stop signal (the grand-boss save loop persists one last time).
    pub fn spawn_loop_with_final<F, Fut, G, GFut>(
        &mut self,
        name: &'static str,
        period: Duration,
        mut body: F,
        final_step: G,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
        G: FnOnce() -> GFut + Send + 'static,
        GFut: Future<Output = ()> + Send,
    {
        let mut shutdown = self.shutdown.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it so the
            // first body run happens one period in.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => body().await,
                    _ = shutdown.changed() => break,
                }
            }

            final_step().await;
            debug!(name, "tick loop stopped");
        }));
    }

    /// Waits for every loop to finish. Call after flipping the shutdown
    /// switch.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// The canonical intervals.
pub mod intervals {
    use std::time::Duration;

    pub const AI: Duration = Duration::from_secs(1);
    pub const RESPAWN: Duration = Duration::from_secs(1);
    pub const ATTACK_STANCE: Duration = Duration::from_secs(1);
    pub const VISIBILITY: Duration = Duration::from_millis(100);
    pub const RAID_RESPAWN: Duration = Duration::from_secs(30);
    pub const GRAND_BOSS_RESPAWN: Duration = Duration::from_secs(60);
    pub const GRAND_BOSS_SAVE: Duration = Duration::from_secs(300);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use interlude_net::shutdown_channel;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn loops_tick_at_their_period() {
        let (tx, rx) = shutdown_channel();
        let mut scheduler = TickScheduler::new(rx);

        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        scheduler.spawn_loop("test", Duration::from_secs(1), move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let _ = tx.send(true);
        scheduler.join().await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn final_step_runs_exactly_once_on_shutdown() {
        let (tx, rx) = shutdown_channel();
        let mut scheduler = TickScheduler::new(rx);

        let finals = Arc::new(AtomicUsize::new(0));
        let counted = finals.clone();
        scheduler.spawn_loop_with_final(
            "save",
            Duration::from_secs(300),
            || async {},
            move || {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
        scheduler.join().await;

        assert_eq!(finals.load(Ordering::SeqCst), 1);
    }
}
