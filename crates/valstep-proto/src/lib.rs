//! # valstep-proto
//!
//! Shared types for the valstep-runner workspace.
//!
//! This crate provides the data model exchanged between the plan source,
//! the ValStep session and the state reconciler:
//! - Happenings (timed action occurrences) and their kinds
//! - Boolean/numeric variable values, with and without timestamps
//! - The planning task handed to an evaluation session
//! - The collaborator trait used to decode ValStep's final problem text

mod happening;
mod task;
mod value;

pub use happening::{Happening, HappeningKind};
pub use task::{InitialStateParser, PlanningTask};
pub use value::{TimedVariableValue, Value, VariableValue};
