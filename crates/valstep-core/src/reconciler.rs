//! Authoritative variable-value table for one evaluation.

use std::collections::HashMap;
use valstep_proto::{TimedVariableValue, VariableValue};

/// Outcome of applying a decoded value to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The variable was added, or its value changed.
    Changed,
    /// The variable already held this value.
    Unchanged,
}

impl Reconciliation {
    pub fn is_changed(self) -> bool {
        self == Reconciliation::Changed
    }
}

/// Timed variable values keyed case-insensitively, one entry per variable.
///
/// The initial snapshot is kept untouched so net changes can be reported
/// against it.
#[derive(Debug, Clone)]
pub struct VariableState {
    values: Vec<TimedVariableValue>,
    index: HashMap<String, usize>,
    initial: Vec<TimedVariableValue>,
}

impl VariableState {
    /// Seeds the table from a copy of the declared initial values.
    ///
    /// Should the initial state list a variable twice, the later entry wins.
    pub fn new(initial: &[TimedVariableValue]) -> Self {
        let mut state = Self {
            values: Vec::with_capacity(initial.len()),
            index: HashMap::with_capacity(initial.len()),
            initial: initial.to_vec(),
        };
        for value in initial {
            let variable = VariableValue::new(value.name.clone(), value.value);
            state.apply(value.time, &variable);
        }
        state
    }

    /// Applies one decoded value stamped with `time`.
    ///
    /// This is the only way the table changes.
    pub fn apply(&mut self, time: f64, value: &VariableValue) -> Reconciliation {
        let key = value.name.to_lowercase();

        match self.index.get(&key) {
            None => {
                self.index.insert(key, self.values.len());
                self.values
                    .push(TimedVariableValue::from_value(time, value.clone()));
                Reconciliation::Changed
            }
            Some(&slot) => {
                let current = &mut self.values[slot];
                if current.value == value.value {
                    Reconciliation::Unchanged
                } else {
                    current.update(time, value);
                    Reconciliation::Changed
                }
            }
        }
    }

    /// Looks a variable up by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&TimedVariableValue> {
        self.index
            .get(&name.to_lowercase())
            .map(|&slot| &self.values[slot])
    }

    /// The full current table, in first-seen order.
    pub fn values(&self) -> &[TimedVariableValue] {
        &self.values
    }

    /// The initial snapshot the table was seeded from.
    pub fn initial_values(&self) -> &[TimedVariableValue] {
        &self.initial
    }

    /// Entries whose value differs from the initial snapshot.
    pub fn updated_values(&self) -> Vec<TimedVariableValue> {
        self.values
            .iter()
            .filter(|current| !self.initial.iter().any(|init| current.same_value(init)))
            .cloned()
            .collect()
    }
}
