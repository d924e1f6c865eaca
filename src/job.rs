//! Conversion job state machine, progress stream and handle

use crate::converter::EncodedOutput;
use crate::error::{ConvertError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Pipeline stage a failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Decode,
    Transform,
    Encode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Parsing,
    Decoding,
    Transforming,
    Encoding,
    Done,
    Failed { stage: Stage, kind: ErrorKind },
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Done | JobState::Failed { .. } | JobState::Cancelled
        )
    }

    /// The stage a running state belongs to.
    pub fn stage(self) -> Option<Stage> {
        match self {
            JobState::Parsing => Some(Stage::Parse),
            JobState::Decoding => Some(Stage::Decode),
            JobState::Transforming => Some(Stage::Transform),
            JobState::Encoding => Some(Stage::Encode),
            JobState::Failed { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Progress reached on entering this state. Failed and Cancelled keep
    /// whatever the job had reached.
    fn checkpoint(self) -> Option<u8> {
        match self {
            JobState::Idle => Some(0),
            JobState::Parsing => Some(10),
            JobState::Decoding => Some(60),
            JobState::Transforming => Some(75),
            JobState::Encoding => Some(95),
            JobState::Done => Some(100),
            JobState::Failed { .. } | JobState::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    #[serde(flatten)]
    pub state: JobState,
    pub percent: u8,
}

/// Finite sequence of progress events for one job.
///
/// Yields the job's current state first, then each later transition, and ends
/// after the terminal event. Transitions that happen faster than the consumer
/// polls are coalesced; the percentages seen never decrease.
#[derive(Debug)]
pub struct ProgressStream {
    rx: watch::Receiver<ProgressEvent>,
    started: bool,
    finished: bool,
}

impl ProgressStream {
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        if self.started {
            if self.rx.changed().await.is_err() {
                self.finished = true;
                return None;
            }
        } else {
            self.started = true;
        }
        let event = *self.rx.borrow_and_update();
        self.finished = event.state.is_terminal();
        Some(event)
    }
}

#[derive(Debug)]
struct Shared {
    id: Uuid,
    created_at: DateTime<Utc>,
    progress: watch::Sender<ProgressEvent>,
    outcome: Mutex<Option<Result<EncodedOutput, ConvertError>>>,
    cancel: CancellationToken,
}

/// Caller's view of one conversion. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobHandle {
    shared: Arc<Shared>,
}

impl JobHandle {
    pub(crate) fn new() -> Self {
        let (progress, _) = watch::channel(ProgressEvent {
            state: JobState::Idle,
            percent: 0,
        });
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                progress,
                outcome: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.shared.created_at
    }

    pub fn snapshot(&self) -> ProgressEvent {
        *self.shared.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> ProgressStream {
        ProgressStream {
            rx: self.shared.progress.subscribe(),
            started: false,
            finished: false,
        }
    }

    /// Request cancellation. Has no effect once the job is terminal.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
        let _outcome = self.lock_outcome();
        self.shared.progress.send_if_modified(|event| {
            if event.state.is_terminal() {
                return false;
            }
            event.state = JobState::Cancelled;
            true
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.snapshot().state == JobState::Cancelled
    }

    /// The JPEG, or why there is none.
    pub fn get_result(&self) -> Result<EncodedOutput, ConvertError> {
        let outcome = self.lock_outcome();
        match outcome.as_ref() {
            Some(result) => result.clone(),
            None if self.is_cancelled() => Err(ConvertError::Cancelled),
            None => Err(ConvertError::NotReady),
        }
    }

    /// Wait for the job to reach a terminal state and return its result.
    pub async fn wait(&self) -> Result<EncodedOutput, ConvertError> {
        let mut progress = self.subscribe_progress();
        while progress.next().await.is_some() {}
        self.get_result()
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Move to the next running state. Returns false, leaving the job alone, if
    /// it is already terminal.
    pub(crate) fn advance(&self, state: JobState) -> bool {
        debug_assert!(!state.is_terminal());
        self.transition(state)
    }

    pub(crate) fn complete(&self, output: EncodedOutput) -> bool {
        let mut outcome = self.lock_outcome();
        let applied = self.transition(JobState::Done);
        if applied {
            *outcome = Some(Ok(output));
        }
        applied
    }

    pub(crate) fn fail(&self, stage: Stage, error: ConvertError) -> bool {
        let mut outcome = self.lock_outcome();
        let applied = self.transition(JobState::Failed {
            stage,
            kind: error.kind(),
        });
        if applied {
            *outcome = Some(Err(error));
        }
        applied
    }

    fn transition(&self, state: JobState) -> bool {
        self.shared.progress.send_if_modified(|event| {
            if event.state.is_terminal() {
                return false;
            }
            event.state = state;
            if let Some(percent) = state.checkpoint() {
                event.percent = event.percent.max(percent);
            }
            true
        })
    }

    fn lock_outcome(&self) -> MutexGuard<'_, Option<Result<EncodedOutput, ConvertError>>> {
        self.shared
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
