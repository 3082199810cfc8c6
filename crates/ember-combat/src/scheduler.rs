//! Timed callbacks for buff expiry, periodic ticks, and regeneration.
//!
//! Owners keep the [`TaskHandle`] returned by [`Scheduler::schedule`];
//! dropping or cancelling the handle stops the callback. A cancelled task
//! that was already dequeued may still be running, so callbacks must treat
//! a missing target as a no-op.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::config::CombatConfig;

/// Shortest period accepted for recurring tasks.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Heap size below which cancelled entries are left to drain on their own.
const COMPACT_FLOOR: usize = 64;

/// A scheduled callback.
pub type Task = Arc<dyn Fn() + Send + Sync>;

/// Service running callbacks after a delay, optionally repeating.
pub trait Scheduler: Send + Sync {
    /// Time elapsed since the scheduler started.
    fn now(&self) -> Duration;

    /// Run `task` after `delay`, then every `period` if given.
    fn schedule(&self, delay: Duration, period: Option<Duration>, task: Task) -> TaskHandle;

    /// Run `task` once after `delay`.
    fn schedule_once(&self, delay: Duration, task: Task) -> TaskHandle {
        self.schedule(delay, None, task)
    }

    /// Run `task` every `period`, starting one period from now.
    fn schedule_repeating(&self, period: Duration, task: Task) -> TaskHandle {
        self.schedule(period, Some(period), task)
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Cancellation handle for a scheduled task. Cancels on drop.
#[derive(Debug)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    fn new() -> (Self, Arc<AtomicBool>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            Self {
                cancelled: Arc::clone(&cancelled),
            },
            cancelled,
        )
    }

    /// Stop the task; pending fires are skipped.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
    }

    /// Whether the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Timer Queue
// ============================================================================

struct TimerEntry {
    due: Duration,
    seq: u64,
    period: Option<Duration>,
    task: Task,
    cancelled: Arc<AtomicBool>,
}

impl TimerEntry {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Min-heap of pending entries ordered by due time, then insertion.
#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
    compact_at: usize,
}

impl TimerQueue {
    fn push(
        &mut self,
        due: Duration,
        period: Option<Duration>,
        task: Task,
        cancelled: Arc<AtomicBool>,
    ) {
        if self.heap.len() >= self.compact_at.max(COMPACT_FLOOR) {
            self.compact();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(TimerEntry {
            due,
            seq,
            period: period.map(|p| p.max(MIN_PERIOD)),
            task,
            cancelled,
        }));
    }

    /// Drop cancelled entries; the next pass waits until the heap doubles.
    fn compact(&mut self) {
        self.heap.retain(|Reverse(entry)| !entry.is_cancelled());
        self.compact_at = self.heap.len() * 2;
    }

    /// Re-queue a recurring entry one period later.
    fn requeue(&mut self, entry: TimerEntry) {
        if let Some(period) = entry.period {
            self.push(entry.due + period, Some(period), entry.task, entry.cancelled);
        }
    }

    fn next_due(&self) -> Option<Duration> {
        self.heap.peek().map(|Reverse(entry)| entry.due)
    }

    /// Pop the earliest entry if it is due at `now`.
    fn pop_due(&mut self, now: Duration) -> Option<TimerEntry> {
        if self.next_due()? <= now {
            self.heap.pop().map(|Reverse(entry)| entry)
        } else {
            None
        }
    }

    fn live_count(&self) -> usize {
        self.heap
            .iter()
            .filter(|Reverse(entry)| !entry.is_cancelled())
            .count()
    }
}

fn run_guarded(task: &Task) {
    if catch_unwind(AssertUnwindSafe(|| task())).is_err() {
        error!("scheduled task panicked");
    }
}

// ============================================================================
// Thread Scheduler
// ============================================================================

struct Shared {
    queue: Mutex<TimerQueue>,
    wake: Condvar,
    shutdown: AtomicBool,
    epoch: Instant,
}

impl Shared {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

struct Job {
    task: Task,
    cancelled: Arc<AtomicBool>,
}

/// Background scheduler: one timer thread feeding a pool of worker threads.
pub struct ThreadScheduler {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("workers", &self.workers.len())
            .field("pending", &self.shared.queue.lock().live_count())
            .finish_non_exhaustive()
    }
}

impl ThreadScheduler {
    /// Start a scheduler with `workers` callback threads.
    pub fn new(workers: usize) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(TimerQueue::default()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            epoch: Instant::now(),
        });
        let (dispatch, jobs) = unbounded::<Job>();

        let mut worker_handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let jobs = jobs.clone();
            let handle = thread::Builder::new()
                .name(format!("ember-worker-{index}"))
                .spawn(move || {
                    for job in &jobs {
                        if !job.cancelled.load(AtomicOrdering::Acquire) {
                            run_guarded(&job.task);
                        }
                    }
                })?;
            worker_handles.push(handle);
        }

        let timer_shared = Arc::clone(&shared);
        let timer = thread::Builder::new()
            .name("ember-timer".to_string())
            .spawn(move || Self::timer_loop(&timer_shared, &dispatch))?;

        debug!(workers = worker_handles.len(), "scheduler started");
        Ok(Self {
            shared,
            timer: Some(timer),
            workers: worker_handles,
        })
    }

    /// Start a scheduler sized from configuration.
    pub fn from_config(config: &CombatConfig) -> io::Result<Self> {
        Self::new(config.scheduler_workers)
    }

    fn timer_loop(shared: &Shared, dispatch: &Sender<Job>) {
        let mut queue = shared.queue.lock();
        loop {
            if shared.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }
            let now = shared.now();
            if let Some(entry) = queue.pop_due(now) {
                if entry.is_cancelled() {
                    continue;
                }
                let job = Job {
                    task: Arc::clone(&entry.task),
                    cancelled: Arc::clone(&entry.cancelled),
                };
                queue.requeue(entry);
                if dispatch.send(job).is_err() {
                    break;
                }
                continue;
            }
            match queue.next_due() {
                Some(due) => {
                    let deadline = shared.epoch + due;
                    shared.wake.wait_until(&mut queue, deadline);
                },
                None => shared.wake.wait(&mut queue),
            }
        }
    }

    /// Number of live (not cancelled) pending tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().live_count()
    }

    fn thread_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.timer
            .iter()
            .chain(self.workers.iter())
            .map(|handle| handle.thread().id())
    }
}

impl Scheduler for ThreadScheduler {
    fn now(&self) -> Duration {
        self.shared.now()
    }

    fn schedule(&self, delay: Duration, period: Option<Duration>, task: Task) -> TaskHandle {
        let (handle, cancelled) = TaskHandle::new();
        let due = self.shared.now() + delay;
        self.shared.queue.lock().push(due, period, task, cancelled);
        self.shared.wake.notify_one();
        handle
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, AtomicOrdering::Release);
        {
            // Take the lock so the timer is either waiting or will see the flag.
            let _queue = self.shared.queue.lock();
            self.shared.wake.notify_all();
        }

        // The last owner may be one of our own workers; never join ourselves.
        let current = thread::current().id();
        let own_thread = self.thread_ids().any(|id| id == current);
        if own_thread {
            return;
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("scheduler stopped");
    }
}

// ============================================================================
// Manual Scheduler
// ============================================================================

/// Deterministic scheduler driven by an explicit virtual clock.
///
/// Tasks run on the thread calling [`advance`](Self::advance), in due order.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    queue: TimerQueue,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.queue.live_count())
            .finish()
    }
}

impl ManualScheduler {
    /// Create a scheduler at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward, running every task that falls due.
    ///
    /// Tasks scheduled by running tasks are honoured within the same call.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;
        loop {
            let entry = {
                let mut state = self.state.lock();
                match state.queue.pop_due(target) {
                    Some(entry) => {
                        state.now = state.now.max(entry.due);
                        entry
                    },
                    None => break,
                }
            };
            if entry.is_cancelled() {
                continue;
            }
            run_guarded(&entry.task);
            if !entry.is_cancelled() {
                self.state.lock().queue.requeue(entry);
            }
        }
        let mut state = self.state.lock();
        state.now = state.now.max(target);
    }

    /// Number of live (not cancelled) pending tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().queue.live_count()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn schedule(&self, delay: Duration, period: Option<Duration>, task: Task) -> TaskHandle {
        let (handle, cancelled) = TaskHandle::new();
        let mut state = self.state.lock();
        let due = state.now + delay;
        state.queue.push(due, period, task, cancelled);
        handle
    }
}

// ============================================================================
// Tests
// ============================================================================
