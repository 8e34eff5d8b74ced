//! Plan happenings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which part of an action a happening represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HappeningKind {
    /// Start of a durative action.
    Start,
    /// End of a durative action.
    End,
    /// An instantaneous action.
    Instantaneous,
}

/// A timestamped occurrence of a plan action.
///
/// `counter` disambiguates simultaneous instances of the same action so that
/// an `End` can be paired with the `Start` that opened it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Happening {
    /// Time at which the happening occurs.
    pub time: f64,
    /// Full grounded action name, e.g. `load robot box`.
    pub action: String,
    /// Start, end or instantaneous.
    pub kind: HappeningKind,
    /// Ordinal among instances of the same action.
    #[serde(default)]
    pub counter: u32,
}

impl Happening {
    /// Creates a happening with counter 0.
    pub fn new(time: f64, action: impl Into<String>, kind: HappeningKind) -> Self {
        Self {
            time,
            action: action.into(),
            kind,
            counter: 0,
        }
    }

    /// Creates a durative action start.
    pub fn start(time: f64, action: impl Into<String>) -> Self {
        Self::new(time, action, HappeningKind::Start)
    }

    /// Creates a durative action end.
    pub fn end(time: f64, action: impl Into<String>) -> Self {
        Self::new(time, action, HappeningKind::End)
    }

    /// Creates an instantaneous action.
    pub fn instantaneous(time: f64, action: impl Into<String>) -> Self {
        Self::new(time, action, HappeningKind::Instantaneous)
    }

    /// Sets the instance counter.
    pub fn with_counter(mut self, counter: u32) -> Self {
        self.counter = counter;
        self
    }
}

impl fmt::Display for Happening {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            HappeningKind::Start => "start",
            HappeningKind::End => "end",
            HappeningKind::Instantaneous => "instantaneous",
        };
        write!(f, "{}: ({}) #{} {}", self.time, self.action, self.counter, kind)
    }
}
