//! Per-worker timer service backed by a single timerfd.
//!
//! Registration and cancellation are callable from any thread; the timer fd
//! is read only on the owning worker thread, which also runs the callbacks.

use crate::metrics::TIMERS_FIRED;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide monotonically increasing timer id source.
static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for cancelling a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

struct TimerEntry {
    interval: Duration,
    recurring: bool,
    callback: TimerCallback,
}

#[derive(Default)]
struct TimerState {
    /// Pending timers ordered by `(expiration, id)`.
    entries: BTreeMap<(Instant, u64), TimerEntry>,
    /// id -> expiration, for cancellation by id.
    index: AHashMap<u64, Instant>,
}

/// Ordered set of pending timers plus one monotonic kernel timer handle.
///
/// The kernel timer is always armed (one-shot, relative) at the earliest
/// pending expiration, and disarmed when the set is empty.
pub struct TimerService {
    timer_fd: RawFd,
    state: Mutex<TimerState>,
}

impl TimerService {
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            timer_fd: fd,
            state: Mutex::new(TimerState::default()),
        })
    }

    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.timer_fd
    }

    /// Register a timer firing `interval` from now, optionally recurring.
    /// The callback runs on the worker thread that owns this service.
    pub fn register_timer<F>(&self, interval: Duration, recurring: bool, callback: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let expiration = Instant::now() + interval;
        let mut state = self.state.lock();
        let is_front = state
            .entries
            .first_key_value()
            .is_none_or(|(&(front, _), _)| expiration < front);
        state.entries.insert(
            (expiration, id),
            TimerEntry {
                interval,
                recurring,
                callback: Arc::new(callback),
            },
        );
        state.index.insert(id, expiration);
        if is_front {
            self.arm(Some(expiration));
        }
        TimerId(id)
    }

    /// Cancel a pending timer. Returns false if the timer already fired
    /// (or never existed) — cancelling a callback that is currently running
    /// is a best-effort no-op.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let mut state = self.state.lock();
        let Some(expiration) = state.index.remove(&id.0) else {
            return false;
        };
        let was_front = state
            .entries
            .first_key_value()
            .is_some_and(|(&front, _)| front == (expiration, id.0));
        state.entries.remove(&(expiration, id.0));
        if was_front {
            let next = state.entries.first_key_value().map(|(&(when, _), _)| when);
            self.arm(next);
        }
        true
    }

    /// Handle a timer fd readable event: drain the fire counter, pop every
    /// due record, reinsert recurring ones, rearm, then invoke callbacks in
    /// expiration order with the state mutex released.
    pub(crate) fn on_expiry(&self) {
        self.drain_fd();

        let due = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let mut due: Vec<TimerCallback> = Vec::new();

            while let Some(((when, id), entry)) = state.entries.pop_first() {
                if when > now {
                    state.entries.insert((when, id), entry);
                    break;
                }
                if entry.recurring {
                    let next = now + entry.interval;
                    due.push(entry.callback.clone());
                    state.index.insert(id, next);
                    state.entries.insert((next, id), entry);
                } else {
                    state.index.remove(&id);
                    due.push(entry.callback);
                }
            }

            let next = state.entries.first_key_value().map(|(&(when, _), _)| when);
            self.arm(next);
            due
        };

        for callback in due {
            TIMERS_FIRED.increment();
            callback();
        }
    }

    /// Drain the 8-byte fire counter until the fd runs dry. The fd is
    /// registered edge-triggered, so a partial drain would lose wake-ups.
    fn drain_fd(&self) {
        let mut ticks = [0u8; 8];
        loop {
            let n = unsafe {
                libc::read(
                    self.timer_fd,
                    ticks.as_mut_ptr() as *mut libc::c_void,
                    ticks.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }

    /// One-shot arm at `deadline`, or disarm when `None`. A zero relative
    /// timeout would disarm, so an already-due deadline arms at 1 ns.
    fn arm(&self, deadline: Option<Instant>) {
        let mut spec: libc::itimerspec = unsafe { std::mem::zeroed() };
        if let Some(when) = deadline {
            let delta = when.saturating_duration_since(Instant::now());
            spec.it_value.tv_sec = delta.as_secs() as libc::time_t;
            spec.it_value.tv_nsec = delta.subsec_nanos() as _;
            if spec.it_value.tv_sec == 0 && spec.it_value.tv_nsec == 0 {
                spec.it_value.tv_nsec = 1;
            }
        }
        let rc = unsafe { libc::timerfd_settime(self.timer_fd, 0, &spec, std::ptr::null_mut()) };
        if rc < 0 {
            tracing::warn!(error = %io::Error::last_os_error(), "timerfd_settime failed");
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.timer_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_one_shot_fires_once() {
        let service = TimerService::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        service.register_timer(Duration::from_millis(5), false, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        service.on_expiry();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        service.on_expiry();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recurring_reinserts() {
        let service = TimerService::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        service.register_timer(Duration::from_millis(5), true, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..3 {
            thread::sleep(Duration::from_millis(10));
            service.on_expiry();
        }
        assert!(fired.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_cancel_before_fire() {
        let service = TimerService::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let id = service.register_timer(Duration::from_millis(5), false, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(service.cancel_timer(id));
        thread::sleep(Duration::from_millis(20));
        service.on_expiry();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_after_fire_returns_false() {
        let service = TimerService::new().unwrap();
        let id = service.register_timer(Duration::from_millis(1), false, || {});
        thread::sleep(Duration::from_millis(10));
        service.on_expiry();
        assert!(!service.cancel_timer(id));
    }

    #[test]
    fn test_cancel_unknown_returns_false() {
        let service = TimerService::new().unwrap();
        assert!(!service.cancel_timer(TimerId(u64::MAX)));
    }

    #[test]
    fn test_callbacks_run_in_expiration_order() {
        let service = TimerService::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, ms) in [(2u8, 10u64), (0, 2), (1, 5)] {
            let order = order.clone();
            service.register_timer(Duration::from_millis(ms), false, move || {
                order.lock().push(label);
            });
        }

        thread::sleep(Duration::from_millis(30));
        service.on_expiry();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_register_from_other_thread() {
        let service = Arc::new(TimerService::new().unwrap());
        let fired = Arc::new(AtomicUsize::new(0));

        let remote = service.clone();
        let counter = fired.clone();
        thread::spawn(move || {
            remote.register_timer(Duration::from_millis(2), false, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        })
        .join()
        .unwrap();

        thread::sleep(Duration::from_millis(15));
        service.on_expiry();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
