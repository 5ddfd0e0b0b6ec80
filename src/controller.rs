//! Task lifecycle controller.
//!
//! Owns the [`Session`] and drives it from submission to a terminal stage by
//! polling the service. The session is published through a `watch` channel so
//! renderers observe every change without being able to mutate it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::TaskService;
use crate::config::ClientConfig;
use crate::error::{SubmissionError, TransportError};
use crate::presentation::{select, View};
use crate::retrieval::{Retrieved, Retriever};
use crate::state::{ActiveTask, DownloadRequest, Session, Stage, TaskId, TaskStatus};

/// Polling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    /// Stop after this many consecutive failed polls (None = never)
    pub max_failures: Option<u32>,
}

impl From<&ClientConfig> for PollOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_failures: config.max_poll_failures,
        }
    }
}

/// Why a poll loop ended.
#[derive(Debug)]
pub enum PollExit {
    /// The service reported `completed` and the artifact was retrieved (or not)
    Completed(Result<Retrieved, TransportError>),
    /// The service reported `failed`
    Failed,
    /// Too many consecutive polls failed; the session was left as it was
    Unreachable { consecutive_failures: u32 },
    /// Reset, superseded or torn down
    Cancelled,
}

struct PollHandle {
    task_id: TaskId,
    cancel: CancellationToken,
    join: JoinHandle<PollExit>,
}

pub struct TaskController {
    service: Arc<dyn TaskService>,
    retriever: Arc<dyn Retriever>,
    options: PollOptions,
    session: Arc<watch::Sender<Session>>,
    poll: Option<PollHandle>,
}

impl TaskController {
    pub fn new(
        service: Arc<dyn TaskService>,
        retriever: Arc<dyn Retriever>,
        options: PollOptions,
    ) -> Self {
        let (session, _) = watch::channel(Session::Empty);
        Self {
            service,
            retriever,
            options,
            session: Arc::new(session),
            poll: None,
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Receiver that is notified on every session change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn view(&self) -> View {
        select(&self.session.borrow())
    }

    /// True while a poll loop for the current task is still running.
    pub fn is_polling(&self) -> bool {
        self.poll
            .as_ref()
            .is_some_and(|p| !p.cancel.is_cancelled() && !p.join.is_finished())
    }

    /// Submits a job and starts tracking it.
    ///
    /// On failure nothing changes: no task id is recorded and no poll is
    /// scheduled. On success any previously tracked task is dropped.
    pub async fn submit(&mut self, request: DownloadRequest) -> Result<TaskId, SubmissionError> {
        let task_id = match self.service.submit(&request).await {
            Ok(id) => id,
            Err(e) => {
                warn!(url = request.url(), error = %e, "submission failed");
                return Err(SubmissionError(e));
            }
        };

        self.cancel_poll();
        self.session.send_replace(Session::Active(ActiveTask {
            task_id: task_id.clone(),
            status: TaskStatus::queued(),
        }));
        info!(task_id = %task_id, url = request.url(), "task submitted");
        debug!(
            task_id = %task_id,
            start = ?request.start_time(),
            end = ?request.end_time(),
            crop = ?request.crop(),
            "submitted options"
        );

        self.start_polling(task_id.clone());
        Ok(task_id)
    }

    /// Forgets the current task and stops polling it.
    pub fn reset(&mut self) {
        let was_polling = self.is_polling();
        self.cancel_poll();
        if let Some(id) = self.session.borrow().task_id() {
            debug!(task_id = %id, was_polling, "session reset");
        }
        self.session.send_replace(Session::Empty);
    }

    /// Waits for the current poll loop to finish.
    ///
    /// Returns `None` when no loop was started since the last wait or reset.
    /// A panic inside the loop is re-raised here.
    pub async fn wait(&mut self) -> Option<PollExit> {
        let handle = self.poll.take()?;
        match handle.join.await {
            Ok(exit) => Some(exit),
            Err(e) if e.is_panic() => {
                error!(task_id = %handle.task_id, "poll loop panicked");
                std::panic::resume_unwind(e.into_panic())
            }
            Err(e) => {
                error!(task_id = %handle.task_id, error = %e, "poll loop aborted");
                Some(PollExit::Cancelled)
            }
        }
    }

    fn start_polling(&mut self, task_id: TaskId) {
        let cancel = CancellationToken::new();
        let poll_loop = PollLoop {
            task_id: task_id.clone(),
            service: self.service.clone(),
            retriever: self.retriever.clone(),
            session: self.session.clone(),
            options: self.options,
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(poll_loop.run());
        self.poll = Some(PollHandle {
            task_id,
            cancel,
            join,
        });
    }

    fn cancel_poll(&mut self) {
        if let Some(handle) = self.poll.take() {
            debug!(task_id = %handle.task_id, "cancelling poll loop");
            handle.cancel.cancel();
        }
    }
}

impl Drop for TaskController {
    fn drop(&mut self) {
        self.cancel_poll();
    }
}

/// Outcome of applying one observation to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Updated,
    /// Older than the snapshot already applied
    Stale,
    /// The session no longer tracks this task
    Superseded,
}

/// Replaces the session snapshot if it still belongs to `task_id` and `seq`
/// is newer than `applied_seq`.
fn apply_observation(
    session: &watch::Sender<Session>,
    task_id: &TaskId,
    seq: u64,
    applied_seq: &mut u64,
    status: TaskStatus,
) -> Applied {
    if seq <= *applied_seq {
        return Applied::Stale;
    }

    let mut outcome = Applied::Superseded;
    session.send_if_modified(|current| match current {
        Session::Active(task) if task.task_id == *task_id => {
            task.status = status;
            outcome = Applied::Updated;
            true
        }
        _ => false,
    });

    if outcome == Applied::Updated {
        *applied_seq = seq;
    }
    outcome
}

struct PollLoop {
    task_id: TaskId,
    service: Arc<dyn TaskService>,
    retriever: Arc<dyn Retriever>,
    session: Arc<watch::Sender<Session>>,
    options: PollOptions,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(self) -> PollExit {
        let mut interval = tokio::time::interval(self.options.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut seq: u64 = 0;
        let mut applied_seq: u64 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut last_stage = Stage::Queued;

        loop {
            // The first tick completes immediately.
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PollExit::Cancelled,
                _ = interval.tick() => {}
            }

            seq += 1;
            let observed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PollExit::Cancelled,
                result = self.service.query_status(&self.task_id) => result,
            };

            let status = match observed {
                Ok(status) => status,
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        task_id = %self.task_id,
                        seq,
                        consecutive_failures,
                        error = %e,
                        "status poll failed"
                    );
                    if let Some(max) = self.options.max_failures {
                        if consecutive_failures >= max {
                            error!(task_id = %self.task_id, consecutive_failures, "giving up on unreachable service");
                            self.cancel.cancel();
                            return PollExit::Unreachable { consecutive_failures };
                        }
                    }
                    continue;
                }
            };
            consecutive_failures = 0;

            if self.cancel.is_cancelled() {
                return PollExit::Cancelled;
            }
            match apply_observation(&self.session, &self.task_id, seq, &mut applied_seq, status) {
                Applied::Updated => {}
                Applied::Stale => {
                    debug!(task_id = %self.task_id, seq, applied_seq, "discarding stale observation");
                    continue;
                }
                Applied::Superseded => return PollExit::Cancelled,
            }

            debug!(
                task_id = %self.task_id,
                seq,
                stage = %status.status,
                progress = status.progress,
                "poll observation"
            );
            if status.status != last_stage {
                info!(task_id = %self.task_id, from = %last_stage, to = %status.status, "task stage changed");
                last_stage = status.status;
            }

            match status.status {
                Stage::Completed => {
                    // Retrieval only ever happens on this path, and the loop
                    // ends with it.
                    self.cancel.cancel();
                    return PollExit::Completed(self.retrieve().await);
                }
                Stage::Failed => {
                    self.cancel.cancel();
                    info!(task_id = %self.task_id, "service reported failure");
                    return PollExit::Failed;
                }
                Stage::Queued | Stage::Downloading | Stage::Processing => {}
            }
        }
    }

    async fn retrieve(&self) -> Result<Retrieved, TransportError> {
        let location = self.service.artifact_location(&self.task_id);
        info!(task_id = %self.task_id, location = %location, "retrieving artifact");
        let result = self.retriever.retrieve(&self.task_id, &location).await;
        if let Err(e) = &result {
            error!(task_id = %self.task_id, error = %e, "artifact retrieval failed");
        }
        result
    }
}
