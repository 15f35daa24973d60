//! Shared timer service.
//!
//! ```text
//!   schedule / schedule_periodic ──► tasks (id → next fire, period, callback)
//!                                        │
//!   TimerThread (every granularity) ──► tick(now)
//!                                        ├─ collect due tasks under the lock
//!                                        ├─ re-arm periodic, drop one-shot
//!                                        └─ run callbacks with the lock released
//! ```
//!
//! Callbacks run on the ticking thread and must not block. A callback may
//! schedule or cancel tasks, including itself. Tests skip the thread and
//! drive [`TimerService::tick`] with a synthetic clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, StackError};

/// Handle of a scheduled task, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

type Callback = Arc<Mutex<Box<dyn FnMut() + Send>>>;

struct Task {
    next_fire: Instant,
    period: Option<Duration>,
    callback: Callback,
}

pub struct TimerService {
    granularity: Duration,
    tasks: Mutex<HashMap<TaskId, Task>>,
    next_id: AtomicU64,
}

impl TimerService {
    pub fn new(granularity: Duration) -> Arc<Self> {
        Arc::new(Self {
            granularity,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    #[inline]
    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    fn insert(&self, delay: Duration, period: Option<Duration>, callback: Box<dyn FnMut() + Send>) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tasks.lock().insert(
            id,
            Task {
                next_fire: Instant::now() + delay,
                period,
                callback: Arc::new(Mutex::new(callback)),
            },
        );
        id
    }

    /// Run `callback` once, no earlier than `delay` from now.
    pub fn schedule(&self, delay: Duration, callback: impl FnMut() + Send + 'static) -> TaskId {
        self.insert(delay, None, Box::new(callback))
    }

    /// Run `callback` after `delay` and then every `period` until cancelled.
    pub fn schedule_periodic(
        &self,
        delay: Duration,
        period: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<TaskId> {
        if period.is_zero() {
            return Err(StackError::InvalidPeriod);
        }
        Ok(self.insert(delay, Some(period), Box::new(callback)))
    }

    /// Periodic task bound to `target` through a weak reference, so the
    /// timer never keeps an engine alive. Ticks after `target` is gone are
    /// no-ops.
    pub fn schedule_for<T: Send + Sync + 'static>(
        &self,
        period: Duration,
        target: &Arc<T>,
        run: impl Fn(&T) + Send + 'static,
    ) -> Result<TaskId> {
        let weak = Arc::downgrade(target);
        self.schedule_periodic(period, period, move || {
            if let Some(target) = weak.upgrade() {
                run(&target);
            }
        })
    }

    /// Cancel a task. Returns false if it already ran (one-shot) or was
    /// never scheduled. A callback already executing finishes.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.tasks.lock().remove(&id).is_some()
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Fire every task due at `now`. Returns the number of callbacks run.
    pub fn tick(&self, now: Instant) -> usize {
        let due: Vec<Callback> = {
            let mut tasks = self.tasks.lock();
            let mut due = Vec::new();
            tasks.retain(|_, task| {
                if task.next_fire > now {
                    return true;
                }
                due.push(Arc::clone(&task.callback));
                match task.period {
                    Some(period) => {
                        // Skip missed periods instead of firing a burst
                        while task.next_fire <= now {
                            task.next_fire += period;
                        }
                        true
                    }
                    None => false,
                }
            });
            due
        };

        for callback in &due {
            (callback.lock())();
        }
        due.len()
    }

    /// Start a thread ticking this service every `granularity`.
    pub fn spawn(self: &Arc<Self>) -> std::io::Result<TimerThread> {
        let running = Arc::new(AtomicBool::new(true));
        let service = Arc::clone(self);
        let flag = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("meshtun-timer".into())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    std::thread::sleep(service.granularity);
                    service.tick(Instant::now());
                }
            })?;
        Ok(TimerThread {
            running,
            handle: Some(handle),
        })
    }
}

/// Background ticker; stops and joins on [`TimerThread::stop`] or drop.
pub struct TimerThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimerThread {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
