//! Upstream collaborator boundary: the domain/problem model.

use crate::TimedVariableValue;

/// The planning task an evaluation session runs against.
///
/// Texts are the in-editor contents, which may differ from what is on disk.
#[derive(Debug, Clone, Default)]
pub struct PlanningTask {
    pub domain_text: String,
    pub problem_text: String,
    /// Variable values declared in the problem's initial state.
    pub initial_values: Vec<TimedVariableValue>,
}

impl PlanningTask {
    pub fn new(domain_text: impl Into<String>, problem_text: impl Into<String>) -> Self {
        Self {
            domain_text: domain_text.into(),
            problem_text: problem_text.into(),
            initial_values: Vec::new(),
        }
    }

    pub fn with_initial_values(mut self, values: Vec<TimedVariableValue>) -> Self {
        self.initial_values = values;
        self
    }
}

/// Decodes the problem text ValStep prints on exit into its initial state.
///
/// Parsing PDDL is the job of an external problem parser; this trait is the
/// seam it plugs into. Returns `None` when the text is not a parseable problem.
pub trait InitialStateParser {
    fn parse_initial_state(&self, problem_text: &str) -> Option<Vec<TimedVariableValue>>;
}

impl<F> InitialStateParser for F
where
    F: Fn(&str) -> Option<Vec<TimedVariableValue>>,
{
    fn parse_initial_state(&self, problem_text: &str) -> Option<Vec<TimedVariableValue>> {
        self(problem_text)
    }
}
