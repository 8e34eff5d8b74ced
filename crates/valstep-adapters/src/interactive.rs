//! A ValStep process kept alive for interactive, group-by-group posting.
//!
//! A reader task forwards stdout chunks over a channel; the session consumes
//! them between posts. Nothing else touches the process.

use crate::exchange::{drain_stderr, kill};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use valstep_core::FailureKind;

/// Output observed by the reader task.
#[derive(Debug)]
pub(crate) enum OutputEvent {
    /// A chunk of stdout.
    Data(Vec<u8>),
    /// Stdout closed; the process is exiting.
    Eof,
    /// Reading stdout failed.
    Error(String),
}

pub(crate) struct InteractiveProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    output_rx: mpsc::Receiver<OutputEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl InteractiveProcess {
    /// Spawns ValStep with piped stdin and starts the output reader.
    pub(crate) fn spawn(mut command: Command) -> Result<Self, FailureKind> {
        let mut child = command.spawn().map_err(FailureKind::Spawn)?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (output_tx, output_rx) = mpsc::channel::<OutputEvent>(64);

        let reader = tokio::spawn(async move {
            let Some(mut stdout) = stdout else {
                let _ = output_tx.send(OutputEvent::Eof).await;
                return;
            };
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        debug!("ValStep stdout: EOF");
                        let _ = output_tx.send(OutputEvent::Eof).await;
                        break;
                    }
                    Ok(n) => {
                        if output_tx
                            .send(OutputEvent::Data(buf[..n].to_vec()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = output_tx.send(OutputEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            if let Err(e) = drain_stderr(stderr).await {
                debug!(error = %e, "ValStep stderr reader stopped");
            }
        });

        debug!(pid = ?child.id(), "Spawned interactive ValStep");
        Ok(Self {
            child,
            stdin,
            output_rx,
            tasks: vec![reader, stderr_task],
        })
    }

    /// Writes instructions to ValStep's stdin.
    pub(crate) async fn post(&mut self, text: &str) -> Result<(), FailureKind> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(FailureKind::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "ValStep stdin is closed",
            )));
        };
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(FailureKind::Write)?;
        stdin.flush().await.map_err(FailureKind::Write)
    }

    /// Waits for the next output event.
    pub(crate) async fn next_event(&mut self) -> OutputEvent {
        self.output_rx.recv().await.unwrap_or(OutputEvent::Eof)
    }

    /// Exit code of a process whose stdout has closed, if it exits promptly.
    pub(crate) async fn exit_code(&mut self) -> Option<i32> {
        match tokio::time::timeout(Duration::from_millis(200), self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => None,
        }
    }

    /// Forcibly terminates the process.
    pub(crate) async fn kill(&mut self) {
        self.stdin = None;
        kill(&mut self.child).await;
    }

    /// Sends the quit instruction, closes stdin and waits for exit.
    ///
    /// Output printed after quitting is drained and logged. If ValStep is
    /// still running after `max_wait` it is killed.
    pub(crate) async fn finish(&mut self, quit: &str, max_wait: Duration) -> Option<ExitStatus> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(quit.as_bytes()).await {
                debug!(error = %e, "ValStep closed stdin before quit");
            }
            drop(stdin);
        }

        let child = &mut self.child;
        let output_rx = &mut self.output_rx;
        let wait = async {
            let mut output_open = true;
            loop {
                tokio::select! {
                    status = child.wait() => return status,
                    event = output_rx.recv(), if output_open => match event {
                        Some(OutputEvent::Data(data)) => {
                            debug!(output = %String::from_utf8_lossy(&data), "ValStep <<<");
                        }
                        Some(OutputEvent::Eof | OutputEvent::Error(_)) | None => output_open = false,
                    },
                }
            }
        };

        let waited = tokio::time::timeout(max_wait, wait).await;
        match waited {
            Ok(Ok(status)) => {
                if status.success() {
                    debug!("ValStep exited cleanly");
                } else {
                    warn!(status = %status, "ValStep exited abnormally");
                }
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to wait for ValStep");
                None
            }
            Err(_) => {
                warn!(
                    wait_ms = max_wait.as_millis() as u64,
                    "ValStep did not exit after quit, killing"
                );
                self.kill().await;
                None
            }
        }
    }
}

impl Drop for InteractiveProcess {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
