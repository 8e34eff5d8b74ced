//! Session tests against scripted stand-ins for ValStep.
//!
//! Each fake is a small POSIX shell script launched as `sh <script>`, so the
//! session appends the usual `[-i input] domain problem` arguments after it.

#![cfg(unix)]

use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use valstep_adapters::{InputDelivery, SessionOptions, ValStepSession, ValStepTool};
use valstep_core::FailureKind;
use valstep_proto::{Happening, PlanningTask, TimedVariableValue, Value};

/// Answers the first executed group with the robot move, later groups with
/// no changes.
const ROBOT_ENGINE: &str = r#"
n=0
g=0
while IFS= read -r line; do
  case "$line" in
    start*) n=$((n+1)); printf '? Posted action %d\n' "$n" ;;
    x) g=$((g+1))
       case "$g" in
         1) printf '? Seeing 2 changed lits\nat(robot,loc1) - now false\nat(robot,loc2) - now true\n? ' ;;
         *) printf '? Seeing 0 changed lits\n? ' ;;
       esac ;;
    q) exit 0 ;;
  esac
done
"#;

/// Echoes whatever instructions it received after the final problem header.
const PROBLEM_ECHO_ENGINE: &str = r#"
if [ "$1" = "-i" ]; then
  input="$2"
else
  input=/dev/stdin
fi
printf 'Checking plan...\n? Seeing 0 changed lits\n'
printf '(define (problem deliver)\n'
cat "$input"
printf ')\n'
"#;

fn fake_valstep(dir: &TempDir, script: &str) -> ValStepTool {
    let path = dir.path().join("fake_valstep.sh");
    fs::write(&path, script).unwrap();
    ValStepTool::new("sh").with_args([path.to_string_lossy().into_owned()])
}

fn robot_task() -> PlanningTask {
    PlanningTask::new("(define (domain robot))", "(define (problem deliver))")
        .with_initial_values(vec![TimedVariableValue::new(0.0, "at(robot,loc1)", true)])
}

fn robot_plan() -> Vec<Happening> {
    vec![
        Happening::instantaneous(0.0, "load robot box"),
        Happening::instantaneous(0.0, "move robot loc1 loc2"),
        Happening::instantaneous(5.0, "unload robot box"),
    ]
}

fn options(response_ms: u64, exchange_ms: u64) -> SessionOptions {
    SessionOptions {
        response_timeout: Duration::from_millis(response_ms),
        exchange_timeout: Duration::from_millis(exchange_ms),
        max_output_bytes: 64 * 1024,
    }
}

fn value_of(values: &[TimedVariableValue], name: &str) -> Option<Value> {
    values.iter().find(|v| v.is_named(name)).map(|v| v.value)
}

#[tokio::test]
async fn test_interactive_robot_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, ROBOT_ENGINE), robot_task())
        .with_options(options(2000, 2000));
    let mut effects_rx = session.subscribe();

    let values = session.run_interactive(&robot_plan()).await.unwrap();

    assert_eq!(values.len(), 2);
    assert_eq!(value_of(&values, "at(robot,loc1)"), Some(Value::Bool(false)));
    assert_eq!(value_of(&values, "at(robot,loc2)"), Some(Value::Bool(true)));

    let updated = session.updated_values();
    assert_eq!(updated.len(), 2);
    assert!(updated.iter().all(|v| v.time == 0.0));

    assert_eq!(
        session.transcript(),
        "start load robot box @ 0\nstart move robot loc1 loc2 @ 0\nx\n\
         start unload robot box @ 5\nx\nq\n"
    );

    // One notification per group, in time order.
    let first = effects_rx.try_recv().unwrap();
    assert_eq!(first.time, 0.0);
    assert_eq!(first.happenings.len(), 2);
    assert_eq!(first.changed.len(), 2);
    let second = effects_rx.try_recv().unwrap();
    assert_eq!(second.time, 5.0);
    assert!(second.changed.is_empty());
    assert!(effects_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_interactive_timeout_kills_process() {
    let temp_dir = TempDir::new().unwrap();
    let pid_file = temp_dir.path().join("valstep.pid");
    // Answers the first group, then goes silent.
    let script = format!(
        r#"
echo $$ > "{pid}"
g=0
while IFS= read -r line; do
  case "$line" in
    x) g=$((g+1))
       if [ "$g" = 1 ]; then
         printf '? Seeing 2 changed lits\nat(robot,loc1) - now false\nat(robot,loc2) - now true\n? '
       fi ;;
    q) exit 0 ;;
  esac
done
"#,
        pid = pid_file.display()
    );
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, &script), robot_task())
        .with_options(options(300, 2000));
    let mut effects_rx = session.subscribe();

    let err = session.run_interactive(&robot_plan()).await.unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(err.kind, FailureKind::NoResponse { time } if time == 5.0));
    assert!(err.to_string().contains("@ 5"));
    assert!(err.transcript.ends_with("start unload robot box @ 5\nx\n"));
    assert_eq!(err.domain_text, "(define (domain robot))");

    // The t=0 group was reconciled; nothing from t=5 was.
    assert_eq!(
        value_of(session.values(), "at(robot,loc1)"),
        Some(Value::Bool(false))
    );
    assert!(session.values().iter().all(|v| v.time == 0.0));
    assert_eq!(effects_rx.try_recv().unwrap().time, 0.0);
    assert!(effects_rx.try_recv().is_err());

    #[cfg(target_os = "linux")]
    {
        let pid = fs::read_to_string(&pid_file).unwrap();
        let proc_dir = std::path::PathBuf::from(format!("/proc/{}", pid.trim()));
        assert!(!proc_dir.exists(), "ValStep should have been killed");
    }
}

#[tokio::test]
async fn test_interactive_invalid_value_fails() {
    let temp_dir = TempDir::new().unwrap();
    let script = r#"
while IFS= read -r line; do
  case "$line" in
    x) printf '? Seeing 1 changed lits\nat(robot,loc1) - now maybe\n? ' ;;
    q) exit 0 ;;
  esac
done
"#;
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, script), robot_task())
        .with_options(options(2000, 2000));

    let err = session.run_interactive(&robot_plan()).await.unwrap_err();

    assert!(matches!(err.kind, FailureKind::Frame(_)));
    assert!(session.updated_values().is_empty());
}

#[tokio::test]
async fn test_interactive_process_exit_before_response() {
    let temp_dir = TempDir::new().unwrap();
    let script = "read -r line\nexit 3\n";
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, script), robot_task())
        .with_options(options(2000, 2000));

    let err = session.run_interactive(&robot_plan()).await.unwrap_err();

    assert!(
        matches!(err.kind, FailureKind::ProcessExited { code: Some(3), time } if time == 0.0),
        "unexpected failure: {err}"
    );
}

#[tokio::test]
async fn test_interactive_post_to_closed_stdin_fails() {
    let temp_dir = TempDir::new().unwrap();
    // Answers the first group after closing stdin, then lingers.
    let script = r#"
while IFS= read -r line; do
  if [ "$line" = x ]; then
    exec 0<&-
    printf '? Seeing 2 changed lits\nat(robot,loc1) - now false\nat(robot,loc2) - now true\n? '
    exec sleep 10
  fi
done
"#;
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, script), robot_task())
        .with_options(options(2000, 2000));

    let err = session.run_interactive(&robot_plan()).await.unwrap_err();

    assert!(
        matches!(err.kind, FailureKind::Write(_)),
        "unexpected failure: {err}"
    );
    assert!(err.transcript.ends_with("start unload robot box @ 5\nx\n"));
    assert_eq!(
        value_of(session.values(), "at(robot,loc2)"),
        Some(Value::Bool(true))
    );
}

#[tokio::test]
async fn test_interactive_exit_mid_response_is_malformed() {
    let temp_dir = TempDir::new().unwrap();
    let script = "read -r line\nprintf '? Seeing 2 changed lits\\nx - now true\\n'\nexit 0\n";
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, script), robot_task())
        .with_options(options(2000, 2000));

    let err = session.run_interactive(&robot_plan()).await.unwrap_err();

    match &err.kind {
        FailureKind::MalformedResponse(message) => {
            assert!(message.contains("mid-response to happenings @ 0"));
            assert!(message.contains("x - now true"));
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert!(session.updated_values().is_empty());
}

#[tokio::test]
async fn test_interactive_name_split_across_reads() {
    let temp_dir = TempDir::new().unwrap();
    // Sends the two bytes of "é" in separate writes.
    let script = r#"
while IFS= read -r line; do
  case "$line" in
    x) printf '? Seeing 1 changed lits\nat(robot,caf\303'
       sleep 0.2
       printf '\251) - now true\n? ' ;;
    q) exit 0 ;;
  esac
done
"#;
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, script), robot_task())
        .with_options(options(2000, 2000));

    session
        .run_interactive(&[Happening::instantaneous(0.0, "move robot loc1 cafe")])
        .await
        .unwrap();

    assert_eq!(
        value_of(session.values(), "at(robot,café)"),
        Some(Value::Bool(true))
    );
}

#[tokio::test]
async fn test_spawn_failure() {
    let tool = ValStepTool::new("/nonexistent/valstep/ValStep");
    let mut session = ValStepSession::new(tool, robot_task());

    let err = session.run_interactive(&robot_plan()).await.unwrap_err();

    assert!(matches!(err.kind, FailureKind::Spawn(_)));
}

#[tokio::test]
async fn test_unmatched_end_fails_before_spawning() {
    let tool = ValStepTool::new("/nonexistent/valstep/ValStep");
    let mut session = ValStepSession::new(tool, robot_task());

    let err = session
        .run_interactive(&[Happening::end(1.0, "drive robot")])
        .await
        .unwrap_err();

    assert!(matches!(err.kind, FailureKind::Batch(_)));
    assert!(err.transcript.is_empty());
}

#[tokio::test]
async fn test_batch_file_mode_returns_final_problem() {
    let temp_dir = TempDir::new().unwrap();
    let mut session =
        ValStepSession::new(fake_valstep(&temp_dir, PROBLEM_ECHO_ENGINE), robot_task())
            .with_options(options(500, 5000));

    let problem = session.run_batch_file(&robot_plan()).await.unwrap();

    assert!(problem.starts_with("(define (problem deliver)\n"));
    assert!(!problem.contains("Checking plan"));
    // The fake echoes the instructions it read from the -i file.
    assert!(problem.contains("start unload robot box @ 5\nx\nq\n"));
    assert_eq!(
        session.transcript(),
        "start load robot box @ 0\nstart move robot loc1 loc2 @ 0\nx\n\
         start unload robot box @ 5\nx\nq\n"
    );
}

#[tokio::test]
async fn test_exchange_mode_pipes_instructions() {
    let temp_dir = TempDir::new().unwrap();
    let mut session =
        ValStepSession::new(fake_valstep(&temp_dir, PROBLEM_ECHO_ENGINE), robot_task())
            .with_options(options(500, 5000));

    let problem = session.run_exchange(&robot_plan()).await.unwrap();

    assert!(problem.starts_with("(define (problem deliver)\n"));
    assert!(problem.contains("start load robot box @ 0\n"));
}

#[tokio::test]
async fn test_abnormal_exit_with_problem_text_succeeds() {
    let temp_dir = TempDir::new().unwrap();
    let script = "cat >/dev/null\nprintf '(define (problem p))\\n'\nexit 2\n";
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, script), robot_task())
        .with_options(options(500, 5000));

    let problem = session.run_exchange(&robot_plan()).await.unwrap();

    assert_eq!(problem, "(define (problem p))\n");
}

#[tokio::test]
async fn test_undecodable_stderr_does_not_fail_exchange() {
    let temp_dir = TempDir::new().unwrap();
    let script = "cat >/dev/null\nprintf 'Warning: caf\\351\\n' >&2\nprintf '(define (problem p))\\n'\n";
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, script), robot_task())
        .with_options(options(500, 5000));

    let problem = session.run_exchange(&robot_plan()).await.unwrap();

    assert_eq!(problem, "(define (problem p))\n");
}

#[tokio::test]
async fn test_missing_problem_text_is_malformed() {
    let temp_dir = TempDir::new().unwrap();
    let script = "printf 'Error: bad domain\\n'\n";
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, script), robot_task())
        .with_options(options(500, 5000));

    let err = session.run_batch_file(&robot_plan()).await.unwrap_err();

    assert!(matches!(err.kind, FailureKind::MalformedResponse(_)));
    assert!(err.transcript.ends_with("q\n"));
}

#[tokio::test]
async fn test_exchange_deadline() {
    let temp_dir = TempDir::new().unwrap();
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, "exec sleep 10\n"), robot_task())
        .with_options(options(500, 200));

    let err = session.run_batch_file(&robot_plan()).await.unwrap_err();

    assert!(matches!(err.kind, FailureKind::DeadlineExceeded(d) if d == Duration::from_millis(200)));
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_exchange_output_ceiling() {
    let temp_dir = TempDir::new().unwrap();
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, "exec yes\n"), robot_task())
        .with_options(SessionOptions {
            response_timeout: Duration::from_millis(500),
            exchange_timeout: Duration::from_secs(10),
            max_output_bytes: 1024,
        });

    let err = session.run_batch_file(&robot_plan()).await.unwrap_err();

    assert!(matches!(
        err.kind,
        FailureKind::OutputCeilingExceeded { limit: 1024 }
    ));
}

#[tokio::test]
async fn test_evaluate_final_state_with_parser() {
    let temp_dir = TempDir::new().unwrap();
    let mut session =
        ValStepSession::new(fake_valstep(&temp_dir, PROBLEM_ECHO_ENGINE), robot_task())
            .with_options(options(500, 5000));
    let parser = |text: &str| {
        text.starts_with("(define (problem deliver)")
            .then(|| vec![TimedVariableValue::new(0.0, "at(robot,loc2)", true)])
    };

    let values = session
        .evaluate_final_state(InputDelivery::File, &robot_plan(), &parser)
        .await
        .unwrap();

    assert_eq!(values, vec![TimedVariableValue::new(0.0, "at(robot,loc2)", true)]);
}

#[tokio::test]
async fn test_parser_rejection_is_malformed() {
    let temp_dir = TempDir::new().unwrap();
    let mut session =
        ValStepSession::new(fake_valstep(&temp_dir, PROBLEM_ECHO_ENGINE), robot_task())
            .with_options(options(500, 5000));
    let parser = |_: &str| -> Option<Vec<TimedVariableValue>> { None };

    let err = session
        .evaluate_final_state(InputDelivery::Pipe, &robot_plan(), &parser)
        .await
        .unwrap_err();

    assert!(matches!(err.kind, FailureKind::MalformedResponse(_)));
}

#[tokio::test]
async fn test_session_runs_once() {
    let temp_dir = TempDir::new().unwrap();
    let mut session = ValStepSession::new(fake_valstep(&temp_dir, ROBOT_ENGINE), robot_task())
        .with_options(options(2000, 2000));

    session.run_interactive(&robot_plan()).await.unwrap();
    let err = session.run_interactive(&robot_plan()).await.unwrap_err();

    assert!(matches!(err.kind, FailureKind::SessionSpent));
}
