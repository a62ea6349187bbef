use core::future::Future;
use core::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Minimum delay between two worker spawns.
pub const SPAWN_THROTTLE: Duration = Duration::from_millis(25);
const DRAIN_POLL: Duration = Duration::from_millis(10);
/// How long workers get to notice the shutdown before they are aborted.
pub const DRAIN_LIMIT: Duration = Duration::from_secs(10);
const KILL_POLL: Duration = Duration::from_millis(200);
/// Shutdown gives up on remaining workers after this long.
pub const KILL_LIMIT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Keeping the worker count at target.
    Running,
    /// Liveness cancelled, waiting for workers to finish their current request.
    Draining,
    /// Aborting the workers that did not exit in time.
    Killing,
    Stopped,
}

impl SupervisorState {
    /// Where a shutdown that started `elapsed` ago stands, with `remaining` workers still alive.
    pub fn of_shutdown(elapsed: Duration, remaining: usize) -> Self {
        if remaining == 0 || elapsed >= KILL_LIMIT {
            Self::Stopped
        } else if elapsed >= DRAIN_LIMIT {
            Self::Killing
        } else {
            Self::Draining
        }
    }
}

/// Keeps `target` workers alive and stops them in stages on shutdown.
///
/// `spawn` is called with a worker id and the worker's liveness token; the
/// worker must return once the token is cancelled.
pub struct Supervisor<F> {
    target: usize,
    spawn: F,
    tasks: JoinSet<()>,
    liveness: CancellationToken,
    next_id: usize,
    last_spawn: Option<Instant>,
    state: SupervisorState,
}

impl<F, Fut> Supervisor<F>
where
    F: FnMut(usize, CancellationToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(target: usize, spawn: F) -> Self {
        Self {
            target: target.max(1),
            spawn,
            tasks: JoinSet::new(),
            liveness: CancellationToken::new(),
            next_id: 0,
            last_spawn: None,
            state: SupervisorState::Running,
        }
    }

    /// Supervises until `shutdown` is cancelled and the workers are gone, returning the final state.
    pub async fn run(mut self, shutdown: CancellationToken) -> SupervisorState {
        info!(target = self.target, "Supervisor running");

        loop {
            if self.tasks.len() < self.target {
                if let Some(last) = self.last_spawn {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep_until(last + SPAWN_THROTTLE) => {}
                    }
                }

                self.spawn_worker();
                continue;
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                Some(result) = self.tasks.join_next() => self.reaped(result),
            }
        }

        self.shut_down().await;
        self.state
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        self.tasks.spawn((self.spawn)(id, self.liveness.child_token()));
        self.last_spawn = Some(Instant::now());

        info!(worker = id, running = self.tasks.len(), "Worker spawned");
    }

    fn reaped(&self, result: Result<(), JoinError>) {
        match result {
            Ok(()) => debug!(running = self.tasks.len(), "Worker exited"),
            Err(e) if e.is_panic() => error!(error = %e, running = self.tasks.len(), "Worker panicked"),
            Err(e) => debug!(error = %e, running = self.tasks.len(), "Worker aborted"),
        }
    }

    async fn shut_down(&mut self) {
        let started = Instant::now();

        info!(workers = self.tasks.len(), "Shutting down workers");
        self.transition(SupervisorState::Draining);
        self.liveness.cancel();

        loop {
            self.transition(SupervisorState::of_shutdown(started.elapsed(), self.tasks.len()));

            match self.state {
                // Cancellation is sticky; a worker still running after the drain limit gets aborted.
                SupervisorState::Draining => self.reap_for(DRAIN_POLL).await,
                SupervisorState::Killing => {
                    self.tasks.abort_all();
                    self.reap_for(KILL_POLL).await;
                }
                SupervisorState::Running | SupervisorState::Stopped => break,
            }
        }

        if !self.tasks.is_empty() {
            error!(workers = self.tasks.len(), "Workers still running after shutdown, giving up on them");
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "Supervisor state changed");
            self.state = next;
        }
    }

    async fn reap_for(&mut self, period: Duration) {
        let deadline = Instant::now() + period;

        while let Ok(Some(result)) = tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
            self.reaped(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Duration::ZERO, 3, SupervisorState::Draining)]
    #[case(Duration::from_millis(9_999), 1, SupervisorState::Draining)]
    #[case(Duration::from_secs(10), 1, SupervisorState::Killing)]
    #[case(Duration::from_millis(14_999), 2, SupervisorState::Killing)]
    #[case(Duration::from_secs(15), 2, SupervisorState::Stopped)]
    #[case(Duration::from_secs(2), 0, SupervisorState::Stopped)]
    fn shutdown_stages(#[case] elapsed: Duration, #[case] remaining: usize, #[case] expected: SupervisorState) {
        assert_eq!(SupervisorState::of_shutdown(elapsed, remaining), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn cooperative_workers_drain_quickly() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = Arc::clone(&spawned);
        let supervisor = Supervisor::new(3, move |_, liveness: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { liveness.cancelled().await }
        });

        let handle = tokio::spawn(supervisor.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(spawned.load(Ordering::SeqCst), 3);

        let started = Instant::now();
        shutdown.cancel();
        let state = handle.await.unwrap();

        assert_eq!(state, SupervisorState::Stopped);
        assert!(started.elapsed() < DRAIN_LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn exited_workers_are_respawned_with_throttling() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = Arc::clone(&spawned);
        let supervisor = Supervisor::new(1, move |id, liveness: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if id < 4 {
                    return;
                }
                liveness.cancelled().await;
            }
        });

        let started = Instant::now();
        let handle = tokio::spawn(supervisor.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(spawned.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() >= SPAWN_THROTTLE * 4);

        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_workers_are_replaced() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = Arc::clone(&spawned);
        let supervisor = Supervisor::new(1, move |id, liveness: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_ne!(id, 0, "first worker crashes");
                liveness.cancelled().await;
            }
        });

        let handle = tokio::spawn(supervisor.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(spawned.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_workers_are_aborted_after_the_drain_limit() {
        let shutdown = CancellationToken::new();

        let supervisor = Supervisor::new(2, |_, _| tokio::time::sleep(Duration::from_secs(3600)));

        let handle = tokio::spawn(supervisor.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let started = Instant::now();
        shutdown.cancel();
        let state = handle.await.unwrap();

        assert_eq!(state, SupervisorState::Stopped);
        assert!(started.elapsed() >= DRAIN_LIMIT);
        assert!(started.elapsed() < KILL_LIMIT);
    }
}
