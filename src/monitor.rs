use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// Mover lifecycle as observed through the PID file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoverState {
    Waiting,
    Started,
    Monitoring,
    Completed,
}

impl MoverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Started => "started",
            Self::Monitoring => "monitoring",
            Self::Completed => "completed",
        }
    }
}

/// A single observable lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoverLifecycleEvent {
    pub previous_state: MoverState,
    pub new_state: MoverState,
    pub pid: Option<i32>,
}

/// Polls the mover PID file and yields lifecycle transitions.
///
/// The file is considered present only when it parses to a positive decimal
/// PID; unreadable or garbled files count as absent. The `Started ->
/// Monitoring` step is internal and produces no event. After `Completed` is
/// consumed the monitor resets to `Waiting` and emits the reset transition
/// without an intervening poll sleep.
pub struct LifecycleMonitor {
    pid_file: PathBuf,
    check_interval: Duration,
    state: MoverState,
    current_pid: Option<i32>,
}

impl LifecycleMonitor {
    pub fn new(pid_file: PathBuf, check_interval: Duration) -> Self {
        Self {
            pid_file,
            check_interval,
            state: MoverState::Waiting,
            current_pid: None,
        }
    }

    pub fn state(&self) -> MoverState {
        self.state
    }

    fn read_pid(&self) -> Option<i32> {
        let contents = std::fs::read_to_string(&self.pid_file).ok()?;
        let pid: i32 = contents.trim().parse().ok()?;
        (pid > 0).then_some(pid)
    }

    fn transition(&mut self, new_state: MoverState, pid: Option<i32>) -> MoverLifecycleEvent {
        let event = MoverLifecycleEvent {
            previous_state: self.state,
            new_state,
            pid,
        };
        debug!(
            previous_state = event.previous_state.as_str(),
            new_state = event.new_state.as_str(),
            pid = event.pid,
            "Mover lifecycle transition"
        );
        self.state = new_state;
        event
    }

    /// Wait for the next observable transition.
    pub async fn next_event(&mut self) -> MoverLifecycleEvent {
        loop {
            if self.state == MoverState::Completed {
                self.current_pid = None;
                return self.transition(MoverState::Waiting, None);
            }

            match (self.state, self.read_pid()) {
                (MoverState::Waiting, Some(pid)) => {
                    self.current_pid = Some(pid);
                    return self.transition(MoverState::Started, Some(pid));
                }
                (MoverState::Started, Some(_)) => {
                    // PID file still present on the following poll; the
                    // transition to active monitoring is silent.
                    self.state = MoverState::Monitoring;
                }
                (MoverState::Started, None) | (MoverState::Monitoring, None) => {
                    let pid = self.current_pid.take();
                    return self.transition(MoverState::Completed, pid);
                }
                _ => {}
            }

            sleep(self.check_interval).await;
        }
    }

    /// Run the monitor as a background task feeding an event channel.
    ///
    /// The task ends when the shutdown signal fires or the receiver is
    /// dropped.
    pub fn spawn(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<MoverLifecycleEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = self.next_event() => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::time::timeout;

    const POLL: Duration = Duration::from_millis(5);

    fn pid_file(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("mover.pid")
    }

    async fn expect_event(monitor: &mut LifecycleMonitor) -> MoverLifecycleEvent {
        timeout(Duration::from_secs(1), monitor.next_event())
            .await
            .expect("expected a lifecycle event")
    }

    #[tokio::test]
    async fn pid_file_appearance_emits_started() {
        let dir = tempfile::tempdir().unwrap();
        let path = pid_file(&dir);
        fs::write(&path, "1234\n").unwrap();

        let mut monitor = LifecycleMonitor::new(path, POLL);
        let event = expect_event(&mut monitor).await;

        assert_eq!(event.previous_state, MoverState::Waiting);
        assert_eq!(event.new_state, MoverState::Started);
        assert_eq!(event.pid, Some(1234));
    }

    #[tokio::test]
    async fn disappearance_emits_completed_then_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = pid_file(&dir);
        fs::write(&path, "42").unwrap();

        let mut monitor = LifecycleMonitor::new(path.clone(), POLL);
        assert_eq!(expect_event(&mut monitor).await.new_state, MoverState::Started);

        fs::remove_file(&path).unwrap();
        let completed = expect_event(&mut monitor).await;
        assert_eq!(completed.new_state, MoverState::Completed);
        assert_eq!(completed.pid, Some(42));

        let reset = expect_event(&mut monitor).await;
        assert_eq!(reset.previous_state, MoverState::Completed);
        assert_eq!(reset.new_state, MoverState::Waiting);
        assert_eq!(monitor.state(), MoverState::Waiting);
    }

    #[tokio::test]
    async fn started_then_immediate_absence_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let path = pid_file(&dir);
        fs::write(&path, "7").unwrap();

        let mut monitor = LifecycleMonitor::new(path.clone(), POLL);
        assert_eq!(expect_event(&mut monitor).await.new_state, MoverState::Started);

        // Gone before the monitor ever saw a second "present" poll.
        fs::remove_file(&path).unwrap();
        assert_eq!(
            expect_event(&mut monitor).await.new_state,
            MoverState::Completed
        );
    }

    #[tokio::test]
    async fn garbled_pid_file_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = pid_file(&dir);
        fs::write(&path, "not-a-pid").unwrap();

        let mut monitor = LifecycleMonitor::new(path.clone(), POLL);
        let outcome = timeout(Duration::from_millis(50), monitor.next_event()).await;
        assert!(outcome.is_err(), "garbled file must not start a cycle");

        fs::write(&path, "99").unwrap();
        assert_eq!(expect_event(&mut monitor).await.pid, Some(99));
    }

    #[tokio::test]
    async fn non_positive_pid_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = pid_file(&dir);
        fs::write(&path, "0").unwrap();

        let mut monitor = LifecycleMonitor::new(path, POLL);
        let outcome = timeout(Duration::from_millis(50), monitor.next_event()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn full_cycle_through_spawned_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = pid_file(&dir);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor = LifecycleMonitor::new(path.clone(), POLL);
        let (mut events, handle) = monitor.spawn(shutdown_rx);

        fs::write(&path, "1234").unwrap();
        let started = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started.new_state, MoverState::Started);

        fs::remove_file(&path).unwrap();
        let completed = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.new_state, MoverState::Completed);

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
