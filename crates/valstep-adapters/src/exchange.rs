//! Run-to-exit exchange with ValStep.
//!
//! Batch-file and piped modes differ only in how the instructions are
//! delivered; both run ValStep to completion under a wall-clock deadline and
//! an output ceiling and keep only the problem text ValStep prints last.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};
use valstep_core::FailureKind;

/// Start of the problem text ValStep prints when it exits.
const PROBLEM_MARKER: &[u8] = b"(define (problem";

/// Limits applied to a run-to-exit exchange.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExchangeLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

/// What a finished exchange produced.
#[derive(Debug)]
pub(crate) struct ExchangeOutcome {
    /// Output from the problem marker onwards, if the marker appeared.
    pub problem_text: Option<String>,
    pub status: ExitStatus,
}

/// Spawns `command`, optionally pipes `stdin_input`, and reads until exit.
///
/// On deadline or ceiling breach the process is killed without any
/// graceful shutdown.
pub(crate) async fn run_to_exit(
    mut command: Command,
    stdin_input: Option<&str>,
    limits: ExchangeLimits,
) -> Result<ExchangeOutcome, FailureKind> {
    let mut child = command.spawn().map_err(FailureKind::Spawn)?;
    let deadline = Instant::now() + limits.timeout;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let exchange = async {
        let write = async {
            if let Some(mut stdin) = stdin
                && let Some(input) = stdin_input
            {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(FailureKind::Write)?;
                stdin.shutdown().await.map_err(FailureKind::Write)?;
            }
            Ok::<_, FailureKind>(())
        };

        // Read stdout and stderr concurrently so neither pipe fills up.
        let ((), problem_text, ()) = tokio::try_join!(
            write,
            read_problem_text(stdout, limits.max_output_bytes),
            drain_stderr(stderr),
        )?;

        let status = child.wait().await?;
        Ok::<_, FailureKind>(ExchangeOutcome {
            problem_text,
            status,
        })
    };

    let result = match tokio::time::timeout_at(deadline, exchange).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                timeout_ms = limits.timeout.as_millis() as u64,
                "ValStep exchange deadline reached, killing process"
            );
            Err(FailureKind::DeadlineExceeded(limits.timeout))
        }
    };

    match result {
        Ok(outcome) => {
            if !outcome.status.success() {
                warn!(status = %outcome.status, "ValStep exited abnormally");
            }
            Ok(outcome)
        }
        Err(kind) => {
            kill(&mut child).await;
            Err(kind)
        }
    }
}

/// Forcibly terminates and reaps the child.
pub(crate) async fn kill(child: &mut Child) {
    if let Some(pid) = child.id() {
        debug!(pid, "Killing ValStep");
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "ValStep was already gone");
    }
}

async fn read_problem_text<R>(
    stdout: Option<R>,
    max_output_bytes: usize,
) -> Result<Option<String>, FailureKind>
where
    R: AsyncRead + Unpin,
{
    let Some(mut stdout) = stdout else {
        return Ok(None);
    };

    let mut extractor = ProblemTextExtractor::default();
    let mut total = 0usize;
    let mut buf = [0u8; 4096];

    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n;
        if total > max_output_bytes {
            warn!(limit = max_output_bytes, "ValStep output ceiling exceeded");
            return Err(FailureKind::OutputCeilingExceeded {
                limit: max_output_bytes,
            });
        }
        debug!(output = %String::from_utf8_lossy(&buf[..n]), "ValStep <<<");
        extractor.push(&buf[..n]);
    }

    Ok(extractor.finish())
}

pub(crate) async fn drain_stderr<R>(stderr: Option<R>) -> Result<(), FailureKind>
where
    R: AsyncRead + Unpin,
{
    if let Some(stderr) = stderr {
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();
        // Raw bytes: stderr is only logged, whatever its encoding.
        while reader.read_until(b'\n', &mut line).await? > 0 {
            debug!(line = %String::from_utf8_lossy(&line).trim_end(), "ValStep stderr");
            line.clear();
        }
    }
    Ok(())
}

/// Keeps output from the problem marker onwards, discarding what came before.
///
/// The marker may straddle two reads, so the tail of the discarded text is
/// held back until the next chunk arrives.
#[derive(Debug, Default)]
pub(crate) struct ProblemTextExtractor {
    scan: Vec<u8>,
    problem: Option<Vec<u8>>,
}

impl ProblemTextExtractor {
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        if let Some(problem) = &mut self.problem {
            problem.extend_from_slice(chunk);
            return;
        }

        self.scan.extend_from_slice(chunk);
        if let Some(pos) = find(&self.scan, PROBLEM_MARKER) {
            self.problem = Some(self.scan.split_off(pos));
            self.scan.clear();
        } else {
            let keep = PROBLEM_MARKER.len() - 1;
            if self.scan.len() > keep {
                self.scan.drain(..self.scan.len() - keep);
            }
        }
    }

    pub(crate) fn finish(self) -> Option<String> {
        self.problem
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
