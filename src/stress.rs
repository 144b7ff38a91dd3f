use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// One spawned CPU-burning task. Removed from the campaign on completion,
/// so membership in the set doubles as the "still running" flag.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub id: Uuid,
    pub deadline: Instant,
}

struct Campaign {
    id: Uuid,
    run: Arc<AtomicBool>,
    workers: Vec<WorkerHandle>,
}

#[derive(Default)]
struct State {
    campaign: Option<Campaign>,
    live: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started { workers: usize },
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy)]
pub struct StressStatus {
    pub is_stressing: bool,
    pub active_workers: usize,
    pub remaining: Option<Duration>,
}

/// Owns the one-campaign-at-a-time invariant: `is_stressing` is true exactly
/// while the worker set is non-empty, and every mutation (start, stop,
/// per-worker completion) happens under a single lock.
pub struct StressController {
    state: Arc<Mutex<State>>,
}

impl StressController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Spawns one busy-loop worker per logical core, each running until
    /// `now + duration` or until the campaign is stopped. Returns immediately;
    /// completion is observed through `status()`. A start while a campaign is
    /// live is a rejection, not an error, and leaves the live set untouched.
    pub fn start(&self, duration: Duration) -> StartOutcome {
        let mut state = self.state.lock().unwrap();
        if state.campaign.is_some() {
            return StartOutcome::AlreadyRunning;
        }
        // Safety reset: make sure no stale run flag or count survives from a
        // campaign that was mid-teardown.
        Self::stop_locked(&mut state);

        let cores = num_cpus::get();
        let campaign_id = Uuid::new_v4();
        let run = Arc::new(AtomicBool::new(true));
        let deadline = Instant::now() + duration;
        let mut workers = Vec::with_capacity(cores);

        for _ in 0..cores {
            let handle = WorkerHandle {
                id: Uuid::new_v4(),
                deadline,
            };
            let run_flag = Arc::clone(&run);
            let join = tokio::task::spawn_blocking(move || burn_until(deadline, &run_flag));

            let state_ref = Arc::clone(&self.state);
            let worker_id = handle.id;
            tokio::spawn(async move {
                if let Err(err) = join.await {
                    log::warn!("stress worker {worker_id} failed: {err}");
                }
                Self::worker_done(&state_ref, campaign_id, worker_id);
            });
            workers.push(handle);
        }

        log::info!(
            "campaign {campaign_id} started: {cores} workers for {} ms",
            duration.as_millis()
        );
        state.live = cores;
        state.campaign = Some(Campaign {
            id: campaign_id,
            run,
            workers,
        });
        StartOutcome::Started { workers: cores }
    }

    /// Terminates every active worker and returns to Idle. Safe to call when
    /// no campaign is live.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        Self::stop_locked(&mut state);
    }

    fn stop_locked(state: &mut State) {
        if let Some(campaign) = state.campaign.take() {
            campaign.run.store(false, Ordering::SeqCst);
            log::info!(
                "campaign {} stopped with {} workers live",
                campaign.id,
                state.live
            );
        }
        state.live = 0;
    }

    /// Completion path for one worker. A completion that arrives after the
    /// campaign was stopped or superseded must not touch the newer state, so
    /// the campaign id is checked before anything is mutated.
    fn worker_done(state: &Mutex<State>, campaign_id: Uuid, worker_id: Uuid) {
        let mut state = state.lock().unwrap();
        match state.campaign.as_mut() {
            Some(campaign) if campaign.id == campaign_id => {
                campaign.workers.retain(|w| w.id != worker_id);
            }
            _ => return,
        }
        state.live = state.live.saturating_sub(1);
        if state.live == 0 {
            log::info!("campaign {campaign_id} completed");
            state.campaign = None;
        }
    }

    pub fn is_stressing(&self) -> bool {
        self.state.lock().unwrap().campaign.is_some()
    }

    pub fn status(&self) -> StressStatus {
        let state = self.state.lock().unwrap();
        let remaining = state.campaign.as_ref().and_then(|c| {
            c.workers
                .iter()
                .map(|w| w.deadline)
                .max()
                .map(|d| d.saturating_duration_since(Instant::now()))
        });
        StressStatus {
            is_stressing: state.campaign.is_some(),
            active_workers: state.live,
            remaining,
        }
    }
}

impl Default for StressController {
    fn default() -> Self {
        Self::new()
    }
}

/// Busy loop for one core: batches of floating-point work with no sleeping or
/// yielding, re-checking the deadline and the shared run flag between batches.
fn burn_until(deadline: Instant, run: &AtomicBool) {
    let mut x = 0u64;
    while run.load(Ordering::SeqCst) && Instant::now() < deadline {
        let _ = (0..100_000u64).fold(0f64, |acc, i| acc + ((x + i) as f64).sqrt());
        x = x.wrapping_add(100_000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_spawns_one_worker_per_core() {
        let ctl = StressController::new();
        let outcome = ctl.start(Duration::from_secs(5));
        assert_eq!(
            outcome,
            StartOutcome::Started {
                workers: num_cpus::get()
            }
        );
        assert!(ctl.is_stressing());
        assert_eq!(ctl.status().active_workers, num_cpus::get());
        ctl.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_start_is_rejected_and_leaves_campaign_alone() {
        let ctl = StressController::new();
        assert!(matches!(
            ctl.start(Duration::from_secs(5)),
            StartOutcome::Started { .. }
        ));
        let before = ctl.status().active_workers;

        assert_eq!(ctl.start(Duration::from_secs(5)), StartOutcome::AlreadyRunning);
        assert_eq!(ctl.status().active_workers, before);
        assert!(ctl.is_stressing());
        ctl.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn campaign_expires_on_its_own() {
        let ctl = StressController::new();
        ctl.start(Duration::from_millis(200));
        assert!(ctl.is_stressing());

        // generous slack over the 200ms deadline for scheduler noise
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!ctl.is_stressing());
        assert_eq!(ctl.status().active_workers, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_is_idempotent_and_safe_when_idle() {
        let ctl = StressController::new();
        ctl.stop();
        assert!(!ctl.is_stressing());

        ctl.start(Duration::from_secs(30));
        ctl.stop();
        assert!(!ctl.is_stressing());
        assert_eq!(ctl.status().active_workers, 0);
        ctl.stop();
        assert!(!ctl.is_stressing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_after_stop_begins_a_fresh_campaign() {
        let ctl = StressController::new();
        ctl.start(Duration::from_secs(30));
        ctl.stop();

        assert!(matches!(
            ctl.start(Duration::from_millis(200)),
            StartOutcome::Started { .. }
        ));
        assert!(ctl.is_stressing());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!ctl.is_stressing());
    }
}
