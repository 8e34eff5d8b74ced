//! Response framing for interactive ValStep output.
//!
//! After each executed happening group ValStep answers with a block like:
//! ```text
//! ? Posted action 1
//! ? Posted action 2
//! ? Seeing 2 changed lits
//! at robot loc1 - now false
//! at robot loc2 - now true
//! ?
//! ```
//! Output arrives in arbitrary chunks, so the framer decides whether the
//! accumulated text already holds a whole block before anything is decoded.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;
use valstep_proto::{Value, VariableValue};

static RESPONSE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^(?:(?:\? )?Posted action \d+\s+)*(?:\? )+Seeing (\d+) changed lits\s*([\s\S]*)\s+\?\s*$",
    )
    .expect("response pattern is valid")
});

static LITERAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\?[ \t]*)*(?P<name>\S(?:.*\S)?) - now (?P<value>\S+)[ \t\r]*$")
        .expect("literal pattern is valid")
});

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?$").expect("number pattern is valid")
});

/// Longest excerpt of raw output kept in an error message.
const MAX_EXCERPT_LEN: usize = 400;

/// Errors decoding a ValStep response.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("ValStep output does not parse: {0}")]
    Unrecognized(String),

    #[error("ValStep reported '{value}' for '{name}', which is neither a boolean nor a number")]
    InvalidValue { name: String, value: String },
}

/// Detects and decodes complete ValStep responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseFramer;

impl ResponseFramer {
    pub fn new() -> Self {
        Self
    }

    /// Announced changed-literal count and the entry text of the response block.
    fn match_block(output: &str) -> Option<(usize, &str)> {
        let caps = RESPONSE_PATTERN.captures(output)?;
        let announced = caps.get(1)?.as_str().parse::<usize>().ok()?;
        let body = caps.get(2).map_or("", |m| m.as_str());
        Some((announced, body))
    }

    /// Returns the changed-literal count announced so far, if any.
    pub fn announced_count(&self, output: &str) -> Option<usize> {
        Self::match_block(output).map(|(announced, _)| announced)
    }

    /// Returns true once `output` holds a complete response.
    ///
    /// ValStep does not always count function changes in its announcement,
    /// so more entries than announced is accepted. Fewer means the rest is
    /// still in flight.
    pub fn is_complete(&self, output: &str) -> bool {
        let Some((announced, body)) = Self::match_block(output) else {
            return false;
        };
        if announced == 0 {
            return true;
        }

        let actual = LITERAL_PATTERN.captures_iter(body).count();
        if actual > announced {
            debug!(announced, actual, "ValStep listed more changes than it announced");
        }
        actual >= announced
    }

    /// Decodes every `name - now value` entry of the response, in order.
    pub fn parse_effects(&self, output: &str) -> Result<Vec<VariableValue>, FrameError> {
        let Some((_, body)) = Self::match_block(output) else {
            return Err(FrameError::Unrecognized(excerpt(output)));
        };

        LITERAL_PATTERN
            .captures_iter(body)
            .map(|caps| decode_literal(&caps["name"], &caps["value"]))
            .collect()
    }
}

fn decode_literal(name: &str, raw: &str) -> Result<VariableValue, FrameError> {
    let invalid = || FrameError::InvalidValue {
        name: name.to_string(),
        value: raw.to_string(),
    };

    let value = match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ if NUMBER_PATTERN.is_match(raw) => {
            let number = raw.parse::<f64>().map_err(|_| invalid())?;
            if !number.is_finite() {
                return Err(invalid());
            }
            Value::Number(number)
        }
        _ => return Err(invalid()),
    };

    Ok(VariableValue::new(name, value))
}

fn excerpt(output: &str) -> String {
    if output.len() <= MAX_EXCERPT_LEN {
        return output.to_string();
    }
    let mut end = MAX_EXCERPT_LEN;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &output[..end])
}
