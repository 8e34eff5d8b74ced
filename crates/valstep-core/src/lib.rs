//! # valstep-core
//!
//! Process-independent pieces of a ValStep evaluation.
//!
//! This crate provides:
//! - Grouping of plan happenings by time and rendering into ValStep instructions
//! - Detection and decoding of complete ValStep responses
//! - The reconciled variable-value table for one evaluation
//! - Reproduction bundles for failed evaluations
//! - Configuration loading and validation

mod batcher;
mod capture;
mod config;
mod error;
mod framer;
mod reconciler;

pub use batcher::{BatchError, HappeningBatcher, HappeningGroup, QUIT_INSTRUCTION, group_by_time};
pub use capture::{case_dir_name, store_error};
pub use config::{
    CaptureConfig, ConfigError, ConfigWarning, LimitsConfig, TimeoutConfig, ToolConfig,
    ValStepConfig,
};
pub use error::{EvaluationError, FailureKind};
pub use framer::{FrameError, ResponseFramer};
pub use reconciler::{Reconciliation, VariableState};
