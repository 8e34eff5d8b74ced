//! Happening batching and ValStep instruction rendering.
//!
//! Happenings are grouped by exact timestamp and each group becomes a block
//! of ValStep instructions:
//! ```text
//! start load robot box @ 0
//! start move robot loc1 loc2 @ 0
//! x
//! end 2 @ 5
//! x
//! q
//! ```

use std::collections::HashMap;
use valstep_proto::{Happening, HappeningKind};

/// Instruction asking ValStep to exit cleanly.
pub const QUIT_INSTRUCTION: &str = "q\n";

/// Instruction asking ValStep to apply the posted happenings.
const EXECUTE_INSTRUCTION: &str = "x\n";

/// Errors raised while batching or rendering happenings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    #[error("happening '{action}' has a non-finite time {time}")]
    NonFiniteTime { action: String, time: f64 },

    #[error("end of '{action}' #{counter} @ {time} has no matching start")]
    UnmatchedEnd {
        action: String,
        counter: u32,
        time: f64,
    },
}

/// Happenings sharing one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct HappeningGroup {
    pub time: f64,
    pub happenings: Vec<Happening>,
}

/// Groups happenings by exact time equality.
///
/// Groups come out in ascending time order; happenings inside a group keep
/// their input order.
pub fn group_by_time(happenings: &[Happening]) -> Result<Vec<HappeningGroup>, BatchError> {
    if let Some(bad) = happenings.iter().find(|h| !h.time.is_finite()) {
        return Err(BatchError::NonFiniteTime {
            action: bad.action.clone(),
            time: bad.time,
        });
    }

    let mut ordered: Vec<&Happening> = happenings.iter().collect();
    // Stable sort: simultaneous happenings stay in plan order.
    ordered.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut groups: Vec<HappeningGroup> = Vec::new();
    for happening in ordered {
        match groups.last_mut() {
            Some(group) if group.time == happening.time => {
                group.happenings.push(happening.clone());
            }
            _ => groups.push(HappeningGroup {
                time: happening.time,
                happenings: vec![happening.clone()],
            }),
        }
    }

    Ok(groups)
}

/// Renders happening groups into ValStep instructions.
///
/// ValStep numbers every posted action; an `end` refers to the number its
/// `start` received. One batcher must therefore see every group sent to a
/// single ValStep process, in order.
#[derive(Debug, Default)]
pub struct HappeningBatcher {
    posted: u32,
    open_actions: HashMap<(String, u32), u32>,
}

impl HappeningBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders one group, followed by the execute instruction.
    pub fn render_group(&mut self, group: &HappeningGroup) -> Result<String, BatchError> {
        let mut text = String::new();

        for happening in &group.happenings {
            match happening.kind {
                HappeningKind::Start | HappeningKind::Instantaneous => {
                    self.posted += 1;
                    if happening.kind == HappeningKind::Start {
                        self.open_actions.insert(
                            (happening.action.clone(), happening.counter),
                            self.posted,
                        );
                    }
                    text.push_str(&format!("start {} @ {}\n", happening.action, happening.time));
                }
                HappeningKind::End => {
                    let key = (happening.action.clone(), happening.counter);
                    let Some(ordinal) = self.open_actions.remove(&key) else {
                        return Err(BatchError::UnmatchedEnd {
                            action: happening.action.clone(),
                            counter: happening.counter,
                            time: happening.time,
                        });
                    };
                    text.push_str(&format!("end {} @ {}\n", ordinal, happening.time));
                }
            }
        }

        text.push_str(EXECUTE_INSTRUCTION);
        Ok(text)
    }

    /// Renders a whole plan: every group in time order, then the quit instruction.
    pub fn render_plan(&mut self, happenings: &[Happening]) -> Result<String, BatchError> {
        let mut text = String::new();
        for group in group_by_time(happenings)? {
            text.push_str(&self.render_group(&group)?);
        }
        text.push_str(QUIT_INSTRUCTION);
        Ok(text)
    }
}
