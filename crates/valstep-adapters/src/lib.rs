//! # valstep-adapters
//!
//! Process plumbing for driving VAL's `ValStep` executable.
//!
//! A [`ValStepSession`] owns one ValStep process for one evaluation and
//! offers three ways to run a plan:
//! - **Batch file**: instructions written to a file passed with `-i`
//! - **Exchange**: instructions piped to stdin in one shot
//! - **Interactive**: one happening group at a time, each answer framed,
//!   reconciled into the state table and broadcast before the next post
//!
//! Batch-file and exchange runs share one run-to-exit primitive bounded by a
//! wall-clock deadline and an output ceiling. Interactive runs bound every
//! group by a short response deadline.

mod exchange;
mod interactive;
mod session;
mod tool;

pub use session::{HappeningEffects, SessionOptions, ValStepSession};
pub use tool::{InputDelivery, ValStepTool};
