//! ValStep evaluation sessions.
//!
//! A session owns everything one evaluation mutates: the reconciled state
//! table, the transcript of instructions sent, and the buffer of output not
//! yet framed. It drives exactly one ValStep process and can run once.

use crate::exchange::{self, ExchangeLimits};
use crate::interactive::{InteractiveProcess, OutputEvent};
use crate::tool::{InputDelivery, TaskFiles, ValStepTool, write_input_file};
use std::process::Stdio;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use valstep_core::{
    EvaluationError, FailureKind, HappeningBatcher, HappeningGroup, QUIT_INSTRUCTION,
    ResponseFramer, ValStepConfig, VariableState, group_by_time,
};
use valstep_proto::{
    Happening, InitialStateParser, PlanningTask, TimedVariableValue, VariableValue,
};

/// Capacity of the effects notification channel.
const EFFECTS_CHANNEL_CAPACITY: usize = 64;

/// Deadlines and limits for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long to wait for ValStep to answer one happening group.
    pub response_timeout: Duration,
    /// Wall-clock ceiling for batch-file and exchange runs, and for the final
    /// exit in interactive mode.
    pub exchange_timeout: Duration,
    /// Stdout ceiling for batch-file and exchange runs.
    pub max_output_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&ValStepConfig::default())
    }
}

impl SessionOptions {
    pub fn from_config(config: &ValStepConfig) -> Self {
        Self {
            response_timeout: config.timeouts.response_timeout(),
            exchange_timeout: config.timeouts.exchange_timeout(),
            max_output_bytes: config.limits.max_output_bytes,
        }
    }
}

/// Published after each interactive happening group is evaluated.
#[derive(Debug, Clone)]
pub struct HappeningEffects {
    /// Time of the group.
    pub time: f64,
    /// The happenings posted in the group.
    pub happenings: Vec<Happening>,
    /// Values that changed the state table, stamped with `time`.
    pub changed: Vec<TimedVariableValue>,
}

/// One evaluation of a plan against a planning task.
pub struct ValStepSession {
    tool: ValStepTool,
    options: SessionOptions,
    task: PlanningTask,
    state: VariableState,
    framer: ResponseFramer,
    transcript: String,
    output_buffer: Vec<u8>,
    spent: bool,
    effects_tx: broadcast::Sender<HappeningEffects>,
}

impl ValStepSession {
    /// Creates a session seeded with the task's declared initial values.
    pub fn new(tool: ValStepTool, task: PlanningTask) -> Self {
        let (effects_tx, _) = broadcast::channel(EFFECTS_CHANNEL_CAPACITY);
        Self {
            tool,
            options: SessionOptions::default(),
            state: VariableState::new(&task.initial_values),
            task,
            framer: ResponseFramer::new(),
            transcript: String::new(),
            output_buffer: Vec::new(),
            spent: false,
            effects_tx,
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Subscribes to per-group effect notifications of an interactive run.
    pub fn subscribe(&self) -> broadcast::Receiver<HappeningEffects> {
        self.effects_tx.subscribe()
    }

    /// The current state table.
    pub fn values(&self) -> &[TimedVariableValue] {
        self.state.values()
    }

    /// Entries whose value differs from the task's initial state.
    pub fn updated_values(&self) -> Vec<TimedVariableValue> {
        self.state.updated_values()
    }

    /// All instructions sent to ValStep so far.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Runs the whole plan from a `-i` input file and returns the problem
    /// text ValStep prints on exit.
    pub async fn run_batch_file(&mut self, happenings: &[Happening]) -> Result<String, EvaluationError> {
        self.begin()?;
        let result = self.exchange(InputDelivery::File, happenings).await;
        result.map_err(|kind| self.fail(kind))
    }

    /// Pipes the whole plan to ValStep's stdin and returns the problem text
    /// ValStep prints on exit.
    pub async fn run_exchange(&mut self, happenings: &[Happening]) -> Result<String, EvaluationError> {
        self.begin()?;
        let result = self.exchange(InputDelivery::Pipe, happenings).await;
        result.map_err(|kind| self.fail(kind))
    }

    /// Runs the whole plan and decodes the final state with `parser`.
    pub async fn evaluate_final_state<P>(
        &mut self,
        delivery: InputDelivery,
        happenings: &[Happening],
        parser: &P,
    ) -> Result<Vec<TimedVariableValue>, EvaluationError>
    where
        P: InitialStateParser + ?Sized,
    {
        self.begin()?;
        let result = match self.exchange(delivery, happenings).await {
            Ok(problem_text) => parser.parse_initial_state(&problem_text).ok_or_else(|| {
                FailureKind::MalformedResponse(
                    "the final problem text could not be parsed".to_string(),
                )
            }),
            Err(kind) => Err(kind),
        };
        result.map_err(|kind| self.fail(kind))
    }

    /// Posts the plan one happening group at a time, reconciling ValStep's
    /// answer to each group before the next is sent.
    ///
    /// Returns the full state table after the last group.
    pub async fn run_interactive(
        &mut self,
        happenings: &[Happening],
    ) -> Result<Vec<TimedVariableValue>, EvaluationError> {
        self.begin()?;
        let result = self.interactive(happenings).await;
        result.map_err(|kind| self.fail(kind))
    }

    fn begin(&mut self) -> Result<(), EvaluationError> {
        if self.spent {
            return Err(self.fail(FailureKind::SessionSpent));
        }
        self.spent = true;
        Ok(())
    }

    fn fail(&self, kind: FailureKind) -> EvaluationError {
        warn!(error = %kind, "ValStep evaluation failed");
        EvaluationError::new(kind, &self.task, self.transcript.clone())
    }

    fn limits(&self) -> ExchangeLimits {
        ExchangeLimits {
            timeout: self.options.exchange_timeout,
            max_output_bytes: self.options.max_output_bytes,
        }
    }

    async fn exchange(
        &mut self,
        delivery: InputDelivery,
        happenings: &[Happening],
    ) -> Result<String, FailureKind> {
        let input = HappeningBatcher::new().render_plan(happenings)?;
        self.transcript.push_str(&input);
        debug!(input = %input, "ValStep >>>");

        let files = TaskFiles::write(&self.task)?;
        let outcome = match delivery {
            InputDelivery::File => {
                let input_file = write_input_file(&input)?;
                let command =
                    self.tool
                        .build_command(Some(input_file.path()), &files, Stdio::null());
                exchange::run_to_exit(command, None, self.limits()).await?
            }
            InputDelivery::Pipe => {
                let command = self.tool.build_command(None, &files, Stdio::piped());
                exchange::run_to_exit(command, Some(&input), self.limits()).await?
            }
        };

        outcome.problem_text.ok_or_else(|| {
            FailureKind::MalformedResponse(format!(
                "ValStep ({}) printed no final problem",
                outcome.status
            ))
        })
    }

    async fn interactive(&mut self, happenings: &[Happening]) -> Result<Vec<TimedVariableValue>, FailureKind> {
        // Render everything up front so a bad plan fails before ValStep starts.
        let mut batcher = HappeningBatcher::new();
        let groups = group_by_time(happenings)?
            .into_iter()
            .map(|group| batcher.render_group(&group).map(|text| (group, text)))
            .collect::<Result<Vec<_>, _>>()?;

        let files = TaskFiles::write(&self.task)?;
        let command = self.tool.build_command(None, &files, Stdio::piped());
        let mut process = InteractiveProcess::spawn(command)?;
        info!(groups = groups.len(), "Evaluating plan interactively");

        if let Err(kind) = self.post_groups(&mut process, &groups).await {
            process.kill().await;
            return Err(kind);
        }

        self.transcript.push_str(QUIT_INSTRUCTION);
        debug!(input = %QUIT_INSTRUCTION, "ValStep >>>");
        process
            .finish(QUIT_INSTRUCTION, self.options.exchange_timeout)
            .await;

        Ok(self.state.values().to_vec())
    }

    async fn post_groups(
        &mut self,
        process: &mut InteractiveProcess,
        groups: &[(HappeningGroup, String)],
    ) -> Result<(), FailureKind> {
        for (group, text) in groups {
            self.transcript.push_str(text);
            debug!(time = group.time, input = %text, "ValStep >>>");
            process.post(text).await?;

            let effects = self.await_response(process, group.time).await?;
            let changed: Vec<TimedVariableValue> = effects
                .into_iter()
                .filter(|value| self.state.apply(group.time, value).is_changed())
                .map(|value| TimedVariableValue::from_value(group.time, value))
                .collect();

            debug!(time = group.time, changed = changed.len(), "Happening group evaluated");
            // No subscribers is fine.
            let _ = self.effects_tx.send(HappeningEffects {
                time: group.time,
                happenings: group.happenings.clone(),
                changed,
            });
        }
        Ok(())
    }

    /// Accumulates output until the framer sees a complete response.
    async fn await_response(
        &mut self,
        process: &mut InteractiveProcess,
        time: f64,
    ) -> Result<Vec<VariableValue>, FailureKind> {
        let deadline = Instant::now() + self.options.response_timeout;

        loop {
            // Decoded as a whole: a character may straddle two reads.
            let framed = {
                let text = String::from_utf8_lossy(&self.output_buffer);
                self.framer
                    .is_complete(&text)
                    .then(|| self.framer.parse_effects(&text))
            };
            if let Some(effects) = framed {
                self.output_buffer.clear();
                return Ok(effects?);
            }

            let Ok(event) = tokio::time::timeout_at(deadline, process.next_event()).await else {
                warn!(
                    time,
                    timeout_ms = self.options.response_timeout.as_millis() as u64,
                    "ValStep did not respond, killing process"
                );
                process.kill().await;
                return Err(FailureKind::NoResponse { time });
            };

            match event {
                OutputEvent::Data(data) => {
                    debug!(output = %String::from_utf8_lossy(&data), "ValStep <<<");
                    self.output_buffer.extend_from_slice(&data);
                }
                OutputEvent::Eof => {
                    let code = process.exit_code().await;
                    let partial = String::from_utf8_lossy(&self.output_buffer);
                    if partial.trim().is_empty() {
                        return Err(FailureKind::ProcessExited { code, time });
                    }
                    return Err(FailureKind::MalformedResponse(format!(
                        "ValStep exited (code {code:?}) mid-response to happenings @ {time}: {}",
                        partial.trim()
                    )));
                }
                OutputEvent::Error(e) => {
                    return Err(FailureKind::Io(std::io::Error::other(e)));
                }
            }
        }
    }
}
