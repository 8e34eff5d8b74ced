//! Evaluation failures.
//!
//! Every failure that ends an evaluation is wrapped in an [`EvaluationError`]
//! carrying the domain, problem and protocol transcript, so a reproduction
//! case can be stored later with [`crate::store_error`].

use crate::{BatchError, FrameError};
use std::io;
use std::time::Duration;
use valstep_proto::PlanningTask;

/// What went wrong while driving ValStep.
#[derive(Debug, thiserror::Error)]
pub enum FailureKind {
    #[error("ValStep could not be started: {0}")]
    Spawn(#[source] io::Error),

    #[error("ValStep exited (code {code:?}) before answering happenings @ {time}")]
    ProcessExited { code: Option<i32>, time: f64 },

    #[error("ValStep produced no usable output: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("ValStep did not respond to happenings @ {time}")]
    NoResponse { time: f64 },

    #[error("ValStep did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("ValStep output exceeded {limit} bytes")]
    OutputCeilingExceeded { limit: usize },

    #[error("Cannot post happenings to ValStep: {0}")]
    Write(#[source] io::Error),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("this session has already run an evaluation")]
    SessionSpent,
}

/// A fatal evaluation failure with everything needed to reproduce it.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct EvaluationError {
    pub kind: FailureKind,
    pub domain_text: String,
    pub problem_text: String,
    /// All protocol text sent to ValStep before the failure.
    pub transcript: String,
}

impl EvaluationError {
    pub fn new(kind: FailureKind, task: &PlanningTask, transcript: impl Into<String>) -> Self {
        Self {
            kind,
            domain_text: task.domain_text.clone(),
            problem_text: task.problem_text.clone(),
            transcript: transcript.into(),
        }
    }

    /// True for the per-group and overall deadline failures.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::NoResponse { .. } | FailureKind::DeadlineExceeded(_)
        )
    }
}
