//! Child exit reaping.
//!
//! A single dedicated thread owns every child PID. The SIGCHLD handler only
//! sets a flag (async-signal-safe); the reaper thread correlates exits with
//! container records, stores the status in the per-container exit slot, and
//! wakes waiters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::ids::ContainerId;
use crate::isolation::{ExitStatusInfo, WaitHandle};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One container's exit rendezvous: the reaper fills it, `stop`/waiters
/// block on it.
#[derive(Default)]
pub(crate) struct ExitSlot {
    state: Mutex<Option<ExitStatusInfo>>,
    cond: Condvar,
}

impl ExitSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, info: ExitStatusInfo) {
        let mut state = self.state.lock();
        if state.is_none() {
            *state = Some(info);
        }
        self.cond.notify_all();
    }

    pub fn get(&self) -> Option<ExitStatusInfo> {
        *self.state.lock()
    }

    /// Block until the exit is recorded or the deadline passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitStatusInfo> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if self.cond.wait_for(&mut state, deadline - now).timed_out() {
                return *state;
            }
        }
        *state
    }
}

/// What the reaper polls for one container.
pub(crate) enum Watched {
    /// Our own child; reaped via waitpid.
    Child(WaitHandle),
    /// A recovered PID that is not our child; only liveness is observable,
    /// so its exit code is unknowable (-1).
    Foreign(u32),
}

impl Watched {
    fn poll(&mut self) -> Option<ExitStatusInfo> {
        match self {
            Watched::Child(handle) => match handle.try_wait() {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(error = %e, "reaper wait failed; marking child exited");
                    Some(ExitStatusInfo {
                        exit_code: -1,
                        signal: None,
                    })
                }
            },
            Watched::Foreign(pid) => {
                if pid_alive(*pid) {
                    None
                } else {
                    Some(ExitStatusInfo {
                        exit_code: -1,
                        signal: None,
                    })
                }
            }
        }
    }
}

enum Command {
    Watch {
        id: ContainerId,
        watched: Watched,
        slot: Arc<ExitSlot>,
    },
    Forget(ContainerId),
    Shutdown,
}

type ExitCallback = Box<dyn Fn(&ContainerId, ExitStatusInfo) + Send + Sync>;

/// Handle to the reaper thread.
pub(crate) struct Reaper {
    tx: Sender<Command>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Reaper {
    pub fn spawn(on_exit: ExitCallback) -> Self {
        let (tx, rx) = channel();

        #[cfg(unix)]
        let sigchld = {
            let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
            // The handler only sets the flag; the thread below drains.
            let _ = signal_hook::flag::register(signal_hook::consts::SIGCHLD, flag.clone());
            flag
        };
        #[cfg(not(unix))]
        let sigchld = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let handle = std::thread::Builder::new()
            .name("vessel-reaper".into())
            .spawn(move || reap_loop(rx, on_exit, sigchld))
            .expect("spawning reaper thread");

        Self {
            tx,
            handle: Some(handle),
        }
    }

    pub fn watch(&self, id: ContainerId, watched: Watched, slot: Arc<ExitSlot>) {
        let _ = self.tx.send(Command::Watch { id, watched, slot });
    }

    pub fn forget(&self, id: &ContainerId) {
        let _ = self.tx.send(Command::Forget(id.clone()));
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn reap_loop(
    rx: Receiver<Command>,
    on_exit: ExitCallback,
    sigchld: Arc<std::sync::atomic::AtomicBool>,
) {
    let mut watched: HashMap<ContainerId, (Watched, Arc<ExitSlot>)> = HashMap::new();

    loop {
        let command = if watched.is_empty() {
            // Nothing to poll; block until there is.
            match rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            }
        } else {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(cmd) => Some(cmd),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        match command {
            Some(Command::Watch { id, watched: w, slot }) => {
                watched.insert(id, (w, slot));
            }
            Some(Command::Forget(id)) => {
                watched.remove(&id);
            }
            Some(Command::Shutdown) => break,
            None => {}
        }

        sigchld.swap(false, std::sync::atomic::Ordering::AcqRel);

        let mut exited = Vec::new();
        for (id, (w, _)) in watched.iter_mut() {
            if let Some(info) = w.poll() {
                exited.push((id.clone(), info));
            }
        }
        for (id, info) in exited {
            if let Some((_, slot)) = watched.remove(&id) {
                tracing::debug!(container_id = %id, exit_code = info.exit_code, "reaped container child");
                slot.set(info);
                on_exit(&id, info);
            }
        }
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill(pid, 0) probes existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn exit_slot_wakes_waiter() {
        let slot = ExitSlot::new();
        let waiter = {
            let slot = slot.clone();
            std::thread::spawn(move || slot.wait_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        slot.set(ExitStatusInfo {
            exit_code: 0,
            signal: None,
        });
        let got = waiter.join().unwrap();
        assert_eq!(got.unwrap().exit_code, 0);
    }

    #[test]
    fn exit_slot_times_out() {
        let slot = ExitSlot::new();
        assert!(slot.wait_timeout(Duration::from_millis(30)).is_none());
    }

    #[test]
    fn exit_slot_first_status_wins() {
        let slot = ExitSlot::new();
        slot.set(ExitStatusInfo {
            exit_code: 7,
            signal: None,
        });
        slot.set(ExitStatusInfo {
            exit_code: 9,
            signal: None,
        });
        assert_eq!(slot.get().unwrap().exit_code, 7);
    }

    #[cfg(unix)]
    #[test]
    fn reaper_collects_child_and_calls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let reaper = Reaper::spawn(Box::new(move |_id, info| {
            assert_eq!(info.exit_code, 5);
            calls_cb.fetch_add(1, Ordering::SeqCst);
        }));

        let child = std::process::Command::new("sh")
            .args(["-c", "exit 5"])
            .stdout(std::process::Stdio::null())
            .spawn()
            .unwrap();
        let slot = ExitSlot::new();
        reaper.watch(
            ContainerId::generate(),
            Watched::Child(WaitHandle::Child(child)),
            slot.clone(),
        );

        let status = slot.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status.exit_code, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn foreign_pid_resolves_when_gone() {
        let reaper = Reaper::spawn(Box::new(|_, _| {}));
        let slot = ExitSlot::new();
        // PID 0 is never a valid foreign child; use an exited process pid.
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        // Reap it ourselves so the pid is gone.
        let mut child = child;
        child.wait().unwrap();

        reaper.watch(ContainerId::generate(), Watched::Foreign(pid), slot.clone());
        let status = slot.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status.exit_code, -1);
    }
}
