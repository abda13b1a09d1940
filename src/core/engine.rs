//! The acquire / wait / release / borrow state machine.
//!
//! Every attempt opens the lock file afresh, takes the advisory lock, and
//! only then reads and probes the recorded PID. No two contenders can be
//! between the read and the write at the same time, so a stale record is
//! reclaimed by exactly one of them. Each attempt closes its handle before
//! sleeping, which also drops the advisory lock.

use crate::constants;
use crate::core::clock::{Clock, SystemClock};
use crate::core::error::{LockError, Result};
use crate::core::file_lock::{Attempt, FileLock};
use crate::core::handle::open_lock_file;
use crate::core::holder::{self, Holder};
use crate::core::writer;
use crate::models::request::{LockRequest, Mode, WaitPolicy};
use crate::util::process::{KernelProcessTable, ProcessTable};
use nix::unistd::Pid;
use std::fs;
use tracing::{debug, info};

/// Terminal state of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Our PID (or the replacement) is now recorded.
    Acquired,
    /// The owner already holds the lock; nothing was written.
    AlreadyHeld,
    Released,
    /// Another process holds the lock. `holder` is known when the record
    /// named it; `timed_out` is set when a wait deadline expired.
    Busy { holder: Option<Pid>, timed_out: bool },
    /// Release refused: the lock belongs to a live foreign process.
    NotOwner { holder: Pid },
}

impl Outcome {
    pub fn exit_code(&self, error_if_held: bool) -> u8 {
        match self {
            Outcome::Acquired | Outcome::Released => constants::EXIT_SUCCESS,
            Outcome::AlreadyHeld if error_if_held => constants::EXIT_ALREADY_HELD,
            Outcome::AlreadyHeld => constants::EXIT_SUCCESS,
            Outcome::Busy { .. } | Outcome::NotOwner { .. } => constants::EXIT_BUSY,
        }
    }
}

/// One pass through open, lock, inspect and write.
enum Step {
    Done(Outcome),
    Busy(Option<Pid>),
    /// The file was unlinked under us; try again at once.
    Detached,
}

pub struct LockEngine<'a> {
    processes: &'a dyn ProcessTable,
    clock: &'a dyn Clock,
}

impl<'a> LockEngine<'a> {
    pub fn new(processes: &'a dyn ProcessTable, clock: &'a dyn Clock) -> Self {
        Self { processes, clock }
    }

    pub fn run(&self, req: &LockRequest) -> Result<Outcome> {
        match req.mode {
            Mode::Acquire => self.acquire(req),
            Mode::Release => self.release(req),
        }
    }

    fn acquire(&self, req: &LockRequest) -> Result<Outcome> {
        // A timeout too large to represent never expires.
        let deadline = match req.wait {
            WaitPolicy::Poll {
                timeout: Some(timeout),
                ..
            } => self.clock.now().checked_add(timeout),
            _ => None,
        };

        loop {
            let holder = match self.try_acquire(req)? {
                Step::Done(outcome) => return Ok(outcome),
                Step::Detached => continue,
                Step::Busy(holder) => holder,
            };

            let interval = match req.wait {
                WaitPolicy::NoWait => {
                    return Ok(Outcome::Busy {
                        holder,
                        timed_out: false,
                    })
                }
                WaitPolicy::Poll { interval, .. } => interval,
            };

            debug!(lock = %req.display_name(), ?holder, ?interval, "lock busy; waiting");
            self.clock.sleep(interval);

            if deadline.is_some_and(|d| self.clock.now() >= d) {
                info!(lock = %req.display_name(), "gave up waiting for lock");
                return Ok(Outcome::Busy {
                    holder,
                    timed_out: true,
                });
            }
        }
    }

    fn try_acquire(&self, req: &LockRequest) -> Result<Step> {
        let file = open_lock_file(&req.lock_path, true)?;
        let mut lock = match FileLock::try_exclusive(file)? {
            Attempt::Locked(lock) => lock,
            Attempt::Busy(_) => return Ok(Step::Busy(None)),
        };
        if !lock.is_current(&req.lock_path)? {
            debug!(lock = %req.display_name(), "lock file was replaced; retrying");
            return Ok(Step::Detached);
        }

        match holder::inspect(lock.file(), req.owner, self.processes)? {
            Holder::Free => {}
            Holder::Ours if req.replacement.is_some() => {
                debug!(owner = %req.owner, new = %req.recorded_pid(), "lending lock");
            }
            Holder::Ours => return Ok(Step::Done(Outcome::AlreadyHeld)),
            Holder::Foreign(pid) => return Ok(Step::Busy(Some(pid))),
        }

        writer::commit(lock, &req.lock_path, req.recorded_pid())?;
        debug!(lock = %req.display_name(), pid = %req.recorded_pid(), "lock acquired");
        Ok(Step::Done(Outcome::Acquired))
    }

    fn release(&self, req: &LockRequest) -> Result<Outcome> {
        loop {
            let file = open_lock_file(&req.lock_path, false)?;
            let mut lock =
                FileLock::exclusive_polling(file, self.clock, constants::RELEASE_RETRY_DELAY)?;
            if !lock.is_current(&req.lock_path)? {
                continue;
            }

            if let Holder::Foreign(pid) = holder::inspect(lock.file(), req.owner, self.processes)? {
                return Ok(Outcome::NotOwner { holder: pid });
            }

            // Unlink before closing so nobody can write into the doomed file.
            fs::remove_file(&req.lock_path).map_err(|e| LockError::kernel("unlink", e))?;
            lock.close().map_err(|e| LockError::kernel("close", e))?;
            debug!(lock = %req.display_name(), "lock released");
            return Ok(Outcome::Released);
        }
    }
}

/// Run `req` against the live process table and the system clock.
pub fn run(req: &LockRequest) -> Result<Outcome> {
    LockEngine::new(&KernelProcessTable, &SystemClock).run(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FakeClock;
    use crate::core::writer::format_record;
    use crate::util::process::Liveness;
    use std::collections::HashSet;
    use std::io;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    const OWNER: i32 = 4242;
    const STRANGER: i32 = 5151;

    struct Table(HashSet<i32>);

    impl Table {
        fn alive(pids: &[i32]) -> Self {
            Table(pids.iter().copied().collect())
        }
    }

    impl ProcessTable for Table {
        fn probe(&self, pid: Pid) -> io::Result<Liveness> {
            Ok(if self.0.contains(&pid.as_raw()) {
                Liveness::Alive
            } else {
                Liveness::Dead
            })
        }
    }

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    fn setup(content: Option<&str>) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resource.lock");
        if let Some(content) = content {
            fs::write(&path, content).unwrap();
        }
        (dir, path)
    }

    fn record(raw: i32) -> String {
        format_record(pid(raw))
    }

    fn poll(interval_ms: u64, timeout_ms: Option<u64>) -> WaitPolicy {
        WaitPolicy::Poll {
            interval: Duration::from_millis(interval_ms),
            timeout: timeout_ms.map(Duration::from_millis),
        }
    }

    #[test]
    fn test_acquire_creates_missing_file() {
        let (_dir, path) = setup(None);
        let table = Table::alive(&[OWNER]);
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER));

        let outcome = LockEngine::new(&table, &clock).run(&req).unwrap();
        assert_eq!(outcome, Outcome::Acquired);
        assert_eq!(fs::read_to_string(&path).unwrap(), record(OWNER));
        assert_eq!(outcome.exit_code(false), constants::EXIT_SUCCESS);
    }

    #[test]
    fn test_acquire_empty_file() {
        let (_dir, path) = setup(Some(""));
        let table = Table::alive(&[]);
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER));

        assert_eq!(LockEngine::new(&table, &clock).run(&req).unwrap(), Outcome::Acquired);
        assert_eq!(fs::read_to_string(&path).unwrap(), record(OWNER));
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let (_dir, path) = setup(Some(record(STRANGER).as_str()));
        let table = Table::alive(&[OWNER]);
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER));

        assert_eq!(LockEngine::new(&table, &clock).run(&req).unwrap(), Outcome::Acquired);
        assert_eq!(fs::read_to_string(&path).unwrap(), record(OWNER));
    }

    #[test]
    fn test_corrupt_record_is_overwritten() {
        let (_dir, path) = setup(Some("#!garbage that is quite long\n"));
        let table = Table::alive(&[OWNER]);
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER));

        assert_eq!(LockEngine::new(&table, &clock).run(&req).unwrap(), Outcome::Acquired);
        assert_eq!(fs::read_to_string(&path).unwrap(), record(OWNER));
    }

    #[test]
    fn test_already_held_is_noop() {
        let (_dir, path) = setup(Some("4242\n"));
        let table = Table::alive(&[OWNER]);
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER));

        let outcome = LockEngine::new(&table, &clock).run(&req).unwrap();
        assert_eq!(outcome, Outcome::AlreadyHeld);
        // Not rewritten, so the unpadded record survives.
        assert_eq!(fs::read_to_string(&path).unwrap(), "4242\n");
        assert_eq!(outcome.exit_code(false), constants::EXIT_SUCCESS);
        assert_eq!(outcome.exit_code(true), constants::EXIT_ALREADY_HELD);
    }

    #[test]
    fn test_borrow_rewrites_with_replacement() {
        let (_dir, path) = setup(Some(record(OWNER).as_str()));
        let table = Table::alive(&[OWNER, 777]);
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER)).with_replacement(pid(777));

        assert_eq!(LockEngine::new(&table, &clock).run(&req).unwrap(), Outcome::Acquired);
        assert_eq!(fs::read_to_string(&path).unwrap(), record(777));
    }

    #[test]
    fn test_borrow_cannot_take_foreign_lock() {
        let (_dir, path) = setup(Some(record(STRANGER).as_str()));
        let table = Table::alive(&[OWNER, STRANGER]);
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER)).with_replacement(pid(777));

        let outcome = LockEngine::new(&table, &clock).run(&req).unwrap();
        assert!(matches!(outcome, Outcome::Busy { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), record(STRANGER));
    }

    #[test]
    fn test_foreign_holder_without_wait_is_busy() {
        let (_dir, path) = setup(Some(record(STRANGER).as_str()));
        let table = Table::alive(&[OWNER, STRANGER]);
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER));

        let outcome = LockEngine::new(&table, &clock).run(&req).unwrap();
        assert_eq!(
            outcome,
            Outcome::Busy {
                holder: Some(pid(STRANGER)),
                timed_out: false
            }
        );
        assert_eq!(outcome.exit_code(false), constants::EXIT_BUSY);
        assert_eq!(clock.sleeps(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), record(STRANGER));
    }

    #[test]
    fn test_wait_times_out_after_deadline() {
        let (_dir, path) = setup(Some(record(STRANGER).as_str()));
        let table = Table::alive(&[OWNER, STRANGER]);
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER)).with_wait(poll(50, Some(175)));

        let outcome = LockEngine::new(&table, &clock).run(&req).unwrap();
        assert_eq!(
            outcome,
            Outcome::Busy {
                holder: Some(pid(STRANGER)),
                timed_out: true
            }
        );
        // Checked after each sleep: 50, 100, 150, 200.
        assert_eq!(clock.sleeps(), 4);
        assert!(clock.elapsed() >= Duration::from_millis(175));
        assert_eq!(fs::read_to_string(&path).unwrap(), record(STRANGER));
    }

    #[test]
    fn test_wait_on_advisory_lock_times_out() {
        let (_dir, path) = setup(None);
        let table = Table::alive(&[OWNER]);
        let clock = FakeClock::new();

        let file = open_lock_file(&path, true).unwrap();
        let _held = match FileLock::try_exclusive(file).unwrap() {
            Attempt::Locked(l) => l,
            Attempt::Busy(_) => panic!("should be free"),
        };

        let req = LockRequest::acquire(&path, pid(OWNER)).with_wait(poll(10, Some(30)));
        let outcome = LockEngine::new(&table, &clock).run(&req).unwrap();
        assert_eq!(
            outcome,
            Outcome::Busy {
                holder: None,
                timed_out: true
            }
        );
        assert_eq!(clock.sleeps(), 3);
    }

    /// Reports the stranger alive for a fixed number of probes, then dead.
    struct DiesAfter {
        probes: std::cell::Cell<u32>,
        limit: u32,
    }

    impl ProcessTable for DiesAfter {
        fn probe(&self, _pid: Pid) -> io::Result<Liveness> {
            let n = self.probes.get() + 1;
            self.probes.set(n);
            Ok(if n <= self.limit {
                Liveness::Alive
            } else {
                Liveness::Dead
            })
        }
    }

    #[test]
    fn test_wait_succeeds_once_holder_dies() {
        let (_dir, path) = setup(Some(record(STRANGER).as_str()));
        let table = DiesAfter {
            probes: std::cell::Cell::new(0),
            limit: 3,
        };
        let clock = FakeClock::new();
        let req = LockRequest::acquire(&path, pid(OWNER)).with_wait(poll(20, None));

        assert_eq!(LockEngine::new(&table, &clock).run(&req).unwrap(), Outcome::Acquired);
        assert_eq!(clock.sleeps(), 3);
        assert_eq!(fs::read_to_string(&path).unwrap(), record(OWNER));
    }

    #[test]
    fn test_unrepresentable_timeout_waits_without_deadline() {
        let (_dir, path) = setup(Some(record(STRANGER).as_str()));
        let table = DiesAfter {
            probes: std::cell::Cell::new(0),
            limit: 2,
        };
        let clock = FakeClock::new();
        let wait = WaitPolicy::Poll {
            interval: Duration::from_millis(50),
            timeout: Some(Duration::MAX),
        };
        let req = LockRequest::acquire(&path, pid(OWNER)).with_wait(wait);

        assert_eq!(LockEngine::new(&table, &clock).run(&req).unwrap(), Outcome::Acquired);
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), record(OWNER));
    }

    /// Drops a held lock the first time the engine sleeps.
    struct ReleasingClock {
        inner: FakeClock,
        held: std::cell::RefCell<Option<FileLock>>,
    }

    impl Clock for ReleasingClock {
        fn now(&self) -> std::time::Instant {
            self.inner.now()
        }

        fn sleep(&self, d: Duration) {
            self.held.borrow_mut().take();
            self.inner.sleep(d);
        }
    }

    #[test]
    fn test_release_waits_out_advisory_holder() {
        let (_dir, path) = setup(Some(record(OWNER).as_str()));
        let table = Table::alive(&[OWNER]);

        let file = open_lock_file(&path, false).unwrap();
        let held = match FileLock::try_exclusive(file).unwrap() {
            Attempt::Locked(l) => l,
            Attempt::Busy(_) => panic!("should be free"),
        };
        let clock = ReleasingClock {
            inner: FakeClock::new(),
            held: std::cell::RefCell::new(Some(held)),
        };

        let req = LockRequest::release(&path, pid(OWNER));
        assert_eq!(LockEngine::new(&table, &clock).run(&req).unwrap(), Outcome::Released);
        assert_eq!(clock.inner.sleeps(), 1);
        assert_eq!(clock.inner.elapsed(), constants::RELEASE_RETRY_DELAY);
        assert!(clock.held.borrow().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_release_own_lock_deletes_file() {
        let (_dir, path) = setup(Some(record(OWNER).as_str()));
        let table = Table::alive(&[OWNER]);
        let clock = FakeClock::new();
        let req = LockRequest::release(&path, pid(OWNER));

        assert_eq!(LockEngine::new(&table, &clock).run(&req).unwrap(), Outcome::Released);
        assert!(!path.exists());
    }

    #[test]
    fn test_release_foreign_lock_is_refused() {
        let (_dir, path) = setup(Some(record(STRANGER).as_str()));
        let table = Table::alive(&[OWNER, STRANGER]);
        let clock = FakeClock::new();
        let req = LockRequest::release(&path, pid(OWNER));

        let outcome = LockEngine::new(&table, &clock).run(&req).unwrap();
        assert_eq!(
            outcome,
            Outcome::NotOwner {
                holder: pid(STRANGER)
            }
        );
        assert_eq!(outcome.exit_code(false), constants::EXIT_BUSY);
        assert_eq!(fs::read_to_string(&path).unwrap(), record(STRANGER));
    }

    #[test]
    fn test_release_stale_lock_deletes_file() {
        let (_dir, path) = setup(Some(record(STRANGER).as_str()));
        let table = Table::alive(&[OWNER]);
        let clock = FakeClock::new();
        let req = LockRequest::release(&path, pid(OWNER));

        assert_eq!(LockEngine::new(&table, &clock).run(&req).unwrap(), Outcome::Released);
        assert!(!path.exists());
    }

    #[test]
    fn test_release_missing_file_is_enoent() {
        let (_dir, path) = setup(None);
        let table = Table::alive(&[OWNER]);
        let clock = FakeClock::new();
        let req = LockRequest::release(&path, pid(OWNER));

        let err = LockEngine::new(&table, &clock).run(&req).unwrap_err();
        assert_eq!(err.errno(), Some(nix::errno::Errno::ENOENT as i32));
        assert!(err.to_string().starts_with("open: "));
    }

    #[test]
    fn test_symlinked_lock_fails_before_touching_target() {
        let (dir, path) = setup(None);
        let target = dir.path().join("target");
        fs::write(&target, "keep me").unwrap();
        std::os::unix::fs::symlink(&target, &path).unwrap();
        let table = Table::alive(&[OWNER]);
        let clock = FakeClock::new();

        let err = LockEngine::new(&table, &clock)
            .run(&LockRequest::acquire(&path, pid(OWNER)))
            .unwrap_err();
        assert_eq!(err.errno(), Some(nix::errno::Errno::ELOOP as i32));
        assert_eq!(fs::read_to_string(&target).unwrap(), "keep me");
    }

    #[test]
    fn test_run_with_live_process_table() {
        let (_dir, path) = setup(None);
        let me = Pid::this();
        let req = LockRequest::acquire(&path, me);
        assert_eq!(run(&req).unwrap(), Outcome::Acquired);
        assert_eq!(run(&req).unwrap(), Outcome::AlreadyHeld);
        assert_eq!(run(&LockRequest::release(&path, me)).unwrap(), Outcome::Released);
    }
}
