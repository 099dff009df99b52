//! Timing engine
//!
//! A reactor is one dedicated scheduling thread draining two queues: an
//! immediate-task FIFO and a min-heap of timed tasks keyed by absolute
//! deadline. Tasks are one-shot closures; periodic work re-enqueues itself
//! with a fresh deadline at the end of its own body, which guarantees a
//! slow tick never overlaps its next instance.
//!
//! Submission is thread-safe from anywhere; task bodies run only on the
//! reactor thread and may therefore touch reactor-owned state without
//! locks. A panicking task is logged and dropped, the thread keeps going.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

/// A one-shot unit of work. The handle lets a body re-arm itself.
pub type Task = Box<dyn FnOnce(&ReactorHandle) + Send + 'static>;

/// Immediate tasks drained per tick before timers get looked at again.
/// Bounds starvation of the timer heap under a submission storm.
const MAX_IMMEDIATE_PER_TICK: usize = 64;

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    task: Task,
}

// BinaryHeap is a max-heap; reverse the comparison to pop the earliest
// deadline, with the submission sequence breaking ties FIFO.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

#[derive(Default)]
struct ReactorState {
    immediate: VecDeque<Task>,
    timers: BinaryHeap<TimerEntry>,
    next_seq: u64,
    stopped: bool,
}

struct Shared {
    name: String,
    state: Mutex<ReactorState>,
    wakeup: Condvar,
}

/// Cloneable submission handle
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl ReactorHandle {
    /// Queue a task for the next tick
    pub fn submit(&self, task: Task) {
        let mut state = self.shared.state.lock();
        if state.stopped {
            debug!(reactor = %self.shared.name, "submit after stop, task dropped");
            return;
        }
        state.immediate.push_back(task);
        self.shared.wakeup.notify_one();
    }

    /// Queue a task to run once `delay` from now has elapsed
    pub fn add_timer(&self, task: Task, delay: Duration) {
        let mut state = self.shared.state.lock();
        if state.stopped {
            debug!(reactor = %self.shared.name, "timer after stop, task dropped");
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.push(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            task,
        });
        self.shared.wakeup.notify_one();
    }
}

/// The scheduling thread plus its submission side
pub struct Reactor {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Spawn the scheduling thread
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            state: Mutex::new(ReactorState::default()),
            wakeup: Condvar::new(),
        });
        let loop_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || run_loop(loop_shared))
            .map(Some)
            .unwrap_or_else(|e| {
                error!(error = %e, "failed to spawn reactor thread");
                None
            });
        Self {
            shared,
            thread: Mutex::new(thread),
        }
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the reactor: already-queued immediate tasks still run, un-fired
    /// timers are discarded, then the thread is joined. Idempotent. When
    /// called from a reactor task itself the join is skipped — the thread
    /// exits on its own once the running task returns.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.timers.clear();
            self.shared.wakeup.notify_one();
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                error!(reactor = %self.shared.name, "reactor thread panicked");
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: Arc<Shared>) {
    let handle = ReactorHandle {
        shared: Arc::clone(&shared),
    };
    loop {
        let mut batch: Vec<Task> = Vec::new();
        let stopping;
        {
            let mut state = shared.state.lock();
            loop {
                if state.stopped {
                    // Drain the FIFO; anything submitted from here on is
                    // rejected at the handle, so one pass is enough.
                    batch.extend(state.immediate.drain(..));
                    state.timers.clear();
                    break;
                }
                let now = Instant::now();
                while state
                    .timers
                    .peek()
                    .is_some_and(|entry| entry.deadline <= now)
                {
                    if let Some(entry) = state.timers.pop() {
                        batch.push(entry.task);
                    }
                }
                let mut drained = 0;
                while drained < MAX_IMMEDIATE_PER_TICK {
                    match state.immediate.pop_front() {
                        Some(task) => {
                            batch.push(task);
                            drained += 1;
                        }
                        None => break,
                    }
                }
                if !batch.is_empty() {
                    break;
                }
                match state.timers.peek().map(|entry| entry.deadline) {
                    Some(deadline) => {
                        let _ = shared.wakeup.wait_until(&mut state, deadline);
                    }
                    None => {
                        shared.wakeup.wait(&mut state);
                    }
                }
            }
            stopping = state.stopped;
        }
        for task in batch {
            let result = catch_unwind(AssertUnwindSafe(|| task(&handle)));
            if result.is_err() {
                error!(reactor = %shared.name, "reactor task panicked, dropped");
            }
        }
        if stopping {
            break;
        }
    }
}
