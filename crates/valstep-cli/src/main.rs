//! # valstep-cli
//!
//! Binary entry point for evaluating plans with VAL's `ValStep`.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading and plan case files
//! - `valstep run` to evaluate a plan case in any of the three modes
//! - `valstep render` to print the protocol text a plan produces

mod case;

use anyhow::{Context, Result};
use case::PlanCase;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use valstep_adapters::{HappeningEffects, SessionOptions, ValStepSession, ValStepTool};
use valstep_core::{EvaluationError, HappeningBatcher, ValStepConfig, store_error};
use valstep_proto::{Happening, TimedVariableValue};

// Unix-specific process management for process group leadership
#[cfg(unix)]
mod process_management {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::{Pid, getpgrp, setpgid};
    use tracing::debug;

    /// Makes this process a process group leader. ValStep and anything it
    /// (or a wrapper script) spawns inherit the group.
    pub fn setup_process_group() {
        let pid = Pid::this();
        if let Err(e) = setpgid(pid, pid) {
            // EPERM: already a group leader
            if e != nix::errno::Errno::EPERM {
                debug!("Could not set process group ({}), continuing anyway", e);
            }
        }
        debug!("Process group initialized: PID {}", pid);
    }

    /// Sends SIGTERM to the whole group, reaching descendants that
    /// kill-on-drop of the direct child never sees.
    ///
    /// Only a group leader signals its group; otherwise the group belongs to
    /// whoever launched us.
    pub fn terminate_process_group() {
        let pid = Pid::this();
        if getpgrp() != pid {
            debug!("Not a process group leader, leaving the group alone");
            return;
        }
        if let Err(e) = killpg(pid, Signal::SIGTERM) {
            debug!("Could not signal process group ({})", e);
        }
    }
}

#[cfg(not(unix))]
mod process_management {
    /// No-op on non-Unix platforms.
    pub fn setup_process_group() {}

    /// No-op on non-Unix platforms.
    pub fn terminate_process_group() {}
}

/// Exit code after an interrupting signal.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// Output format for run results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for programmatic access
    Json,
}

/// How the plan is fed to ValStep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    /// One happening group at a time, reporting state changes
    #[default]
    Interactive,
    /// Whole plan piped to stdin, reporting the final problem
    Exchange,
    /// Whole plan in a `-i` input file, reporting the final problem
    Batch,
}

/// ANSI color codes for terminal output.
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Evaluate PDDL plans step by step with VAL's ValStep
#[derive(Parser, Debug)]
#[command(name = "valstep", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    // ─────────────────────────────────────────────────────────────────────────
    // Global options (available for all subcommands)
    // ─────────────────────────────────────────────────────────────────────────

    /// Path to configuration file
    #[arg(short, long, default_value = "valstep.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a plan case with ValStep
    Run(RunArgs),

    /// Print the instructions a plan case sends to ValStep, without running it
    Render(RenderArgs),
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Plan case file (YAML)
    case: PathBuf,

    /// How the plan is fed to ValStep
    #[arg(long, value_enum, default_value_t = Mode::Interactive)]
    mode: Mode,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Store a reproduction case here when the evaluation fails
    #[arg(long)]
    capture_dir: Option<PathBuf>,
}

/// Arguments for the render subcommand.
#[derive(Parser, Debug)]
struct RenderArgs {
    /// Plan case file (YAML)
    case: PathBuf,
}

/// What a successful run reports.
enum RunOutput {
    /// Values that differ from the initial state.
    Changes(Vec<TimedVariableValue>),
    /// The final problem ValStep printed.
    Problem(String),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_found) = load_config(&cli.config)?;

    // Initialize logging
    let filter = if cli.verbose || config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if !config_found {
        warn!("Config file {:?} not found, using defaults", cli.config);
    }

    match cli.command {
        Commands::Run(args) => run_command(config, cli.color, args).await,
        Commands::Render(args) => render_command(&args),
    }
}

fn load_config(path: &Path) -> Result<(ValStepConfig, bool)> {
    if !path.exists() {
        return Ok((ValStepConfig::default(), false));
    }
    let config = ValStepConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    Ok((config, true))
}

async fn run_command(config: ValStepConfig, color_mode: ColorMode, args: RunArgs) -> Result<()> {
    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        eprintln!("{warning}");
    }

    process_management::setup_process_group();

    let use_colors = color_mode.should_use_colors();
    let case = PlanCase::load(&args.case)
        .with_context(|| format!("Failed to load plan case {:?}", args.case))?;
    // CLI flag takes precedence over config
    let capture_dir = args.capture_dir.or_else(|| config.capture.dir.clone());

    let tool = ValStepTool::from_config(&config.tool);
    let session = ValStepSession::new(tool, case.task)
        .with_options(SessionOptions::from_config(&config));

    info!(
        mode = ?args.mode,
        happenings = case.happenings.len(),
        tool = %config.tool.path,
        "Evaluating plan"
    );

    let timeline_colors = (args.format == OutputFormat::Table).then_some(use_colors);
    let interrupted = tokio::select! {
        result = evaluate(session, &case.happenings, args.mode, timeline_colors) => Ok(result),
        signal = shutdown_signal() => Err(signal),
    };
    // Past this point the evaluation is dropped, and kill-on-drop has taken
    // ValStep down with it.
    let result = match interrupted {
        Ok(result) => result,
        Err(signal) => {
            warn!(signal, "Interrupted, stopping ValStep");
            process_management::terminate_process_group();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    };

    match result {
        Ok(output) => print_output(&output, args.format, use_colors),
        Err(err) => {
            report_failure(&err, capture_dir.as_deref(), &config, use_colors)?;
            Err(anyhow::Error::new(err).context("Plan evaluation failed"))
        }
    }
}

async fn evaluate(
    mut session: ValStepSession,
    happenings: &[Happening],
    mode: Mode,
    timeline_colors: Option<bool>,
) -> Result<RunOutput, EvaluationError> {
    match mode {
        Mode::Interactive => {
            let timeline = timeline_colors
                .map(|use_colors| tokio::spawn(print_timeline(session.subscribe(), use_colors)));
            let result = session
                .run_interactive(happenings)
                .await
                .map(|_| RunOutput::Changes(session.updated_values()));
            // Closing the channel ends the timeline.
            drop(session);
            if let Some(timeline) = timeline
                && let Err(e) = timeline.await
            {
                warn!(error = %e, "Timeline printer failed");
            }
            result
        }
        Mode::Exchange => session.run_exchange(happenings).await.map(RunOutput::Problem),
        Mode::Batch => session.run_batch_file(happenings).await.map(RunOutput::Problem),
    }
}

/// Resolves with the name of the first shutdown signal received: SIGINT, or
/// SIGTERM/SIGHUP on Unix.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(mut sigterm), Ok(mut sighup)) => {
                return tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sighup.recv() => "SIGHUP",
                };
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Could not register SIGTERM/SIGHUP handlers");
            }
        }
    }

    if tokio::signal::ctrl_c().await.is_err() {
        // No way to be interrupted; let the evaluation finish on its own.
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

fn render_command(args: &RenderArgs) -> Result<()> {
    let case = PlanCase::load(&args.case)
        .with_context(|| format!("Failed to load plan case {:?}", args.case))?;
    let text = HappeningBatcher::new()
        .render_plan(&case.happenings)
        .context("Plan cannot be rendered")?;
    print!("{text}");
    Ok(())
}

/// Prints each evaluated happening group as it is reported.
async fn print_timeline(
    mut effects_rx: tokio::sync::broadcast::Receiver<HappeningEffects>,
    use_colors: bool,
) {
    use colors::{CYAN, DIM, RESET};

    loop {
        match effects_rx.recv().await {
            Ok(effects) => {
                let actions: Vec<&str> = effects.happenings.iter().map(|h| h.action.as_str()).collect();
                if use_colors {
                    println!("{CYAN}@ {}{RESET} {DIM}({}){RESET}", effects.time, actions.join(", "));
                } else {
                    println!("@ {} ({})", effects.time, actions.join(", "));
                }
                for value in &effects.changed {
                    println!("    {} = {}", value.name, value.value);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Timeline fell behind, some groups not shown");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_output(output: &RunOutput, format: OutputFormat, use_colors: bool) -> Result<()> {
    match (output, format) {
        (RunOutput::Changes(values), OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(values)?);
        }
        (RunOutput::Changes(values), OutputFormat::Table) => {
            print_changes_table(values, use_colors);
        }
        (RunOutput::Problem(text), OutputFormat::Json) => {
            let json = serde_json::json!({ "problem": text });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        (RunOutput::Problem(text), OutputFormat::Table) => {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}

fn print_changes_table(values: &[TimedVariableValue], use_colors: bool) {
    use colors::{BOLD, DIM, GREEN, RESET};

    if values.is_empty() {
        if use_colors {
            println!("{DIM}No variable differs from the initial state.{RESET}");
        } else {
            println!("No variable differs from the initial state.");
        }
        return;
    }

    let width = values
        .iter()
        .map(|v| v.name.len())
        .max()
        .unwrap_or(0)
        .max("Variable".len());

    if use_colors {
        println!("{BOLD}{DIM}Time     │ {:<width$} │ Value{RESET}", "Variable");
        println!("{DIM}─────────┼─{}─┼──────{RESET}", "─".repeat(width));
    } else {
        println!("Time     | {:<width$} | Value", "Variable");
        println!("---------|-{}-|------", "-".repeat(width));
    }

    for value in values {
        if use_colors {
            println!(
                "{:<8} │ {:<width$} │ {GREEN}{}{RESET}",
                value.time, value.name, value.value
            );
        } else {
            println!("{:<8} | {:<width$} | {}", value.time, value.name, value.value);
        }
    }
}

/// Prints the failure and, with a capture directory, stores a reproduction
/// case for it.
fn report_failure(
    err: &EvaluationError,
    capture_dir: Option<&Path>,
    config: &ValStepConfig,
    use_colors: bool,
) -> Result<()> {
    use colors::{BOLD, RED, RESET};

    if use_colors {
        eprintln!("{RED}{BOLD}✗{RESET} {err}");
    } else {
        eprintln!("Error: {err}");
    }

    if let Some(dir) = capture_dir {
        let case_dir = store_error(err, dir, &config.tool.path)
            .with_context(|| format!("Failed to store reproduction case under {:?}", dir))?;
        eprintln!("Reproduction case stored in {}", case_dir.display());
    }
    Ok(())
}
