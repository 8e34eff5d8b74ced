//! Reproduction bundles for failed evaluations.

use crate::EvaluationError;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

const DOMAIN_FILE: &str = "domain.pddl";
const PROBLEM_FILE: &str = "problem.pddl";
const INPUT_FILE: &str = "happenings.valsteps";
const SCRIPT_FILE: &str = "run.cmd";

/// Directory name for a case captured at `now`.
///
/// ISO-8601 with milliseconds; colons become dashes so the name is valid on
/// every file system.
pub fn case_dir_name(now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    format!("valstep-{}", stamp.replace(':', "-"))
}

/// Stores the domain, problem and transcript of a failed evaluation together
/// with a script that replays them through `valstep_path`.
///
/// Returns the created case directory. An existing directory of the same
/// name is reused.
pub fn store_error(
    error: &EvaluationError,
    target_dir: &Path,
    valstep_path: &str,
) -> io::Result<PathBuf> {
    let case_path = target_dir.join(case_dir_name(Utc::now()));
    fs::create_dir_all(&case_path)?;

    fs::write(case_path.join(DOMAIN_FILE), &error.domain_text)?;
    fs::write(case_path.join(PROBLEM_FILE), &error.problem_text)?;
    fs::write(case_path.join(INPUT_FILE), &error.transcript)?;
    fs::write(case_path.join(SCRIPT_FILE), reproduction_script(valstep_path))?;

    info!(case = %case_path.display(), "Stored ValStep reproduction case");
    Ok(case_path)
}

fn reproduction_script(valstep_path: &str) -> String {
    let tool = quote(valstep_path);
    format!(
        ":: The purpose of this batch file is to be able to reproduce the valstep error\n\
         type {INPUT_FILE} | {tool} {DOMAIN_FILE} {PROBLEM_FILE}\n\
         :: or for latest version of ValStep:\n\
         {tool} -i {INPUT_FILE} {DOMAIN_FILE} {PROBLEM_FILE}\n"
    )
}

fn quote(path: &str) -> String {
    if path.chars().any(char::is_whitespace) {
        format!("\"{path}\"")
    } else {
        path.to_string()
    }
}
