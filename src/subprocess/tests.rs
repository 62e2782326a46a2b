use super::*;
use std::path::Path;
use std::time::Duration;

#[tokio::test]
async fn test_tokio_runner_captures_output() {
    let command = ProcessCommandBuilder::new("echo").arg("4242;cluster").build();

    let output = TokioProcessRunner.run(command).await.unwrap();
    assert!(output.status.success());
    assert_eq!(output.stdout.trim(), "4242;cluster");
    assert_eq!(output.diagnostics(), "4242;cluster");
}

#[tokio::test]
async fn test_tokio_runner_reports_exit_code() {
    let command = ProcessCommandBuilder::new("sh")
        .args(["-c", "echo 'qsub: busy' >&2; exit 3"])
        .build();

    let output = TokioProcessRunner.run(command).await.unwrap();
    assert_eq!(output.status, ExitStatus::Error(3));
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(output.diagnostics(), "qsub: busy");
}

#[tokio::test]
async fn test_tokio_runner_missing_program() {
    let command = ProcessCommandBuilder::new("qapflow-no-such-scheduler").build();

    let result = TokioProcessRunner.run(command).await;
    assert!(matches!(result, Err(ProcessError::CommandNotFound(_))));
}

#[tokio::test]
async fn test_tokio_runner_timeout() {
    let command = ProcessCommandBuilder::new("sleep")
        .arg("5")
        .timeout(Some(Duration::from_millis(100)))
        .build();

    let output = TokioProcessRunner.run(command).await.unwrap();
    assert_eq!(output.status, ExitStatus::Timeout);
    assert_eq!(output.status.code(), None);
    assert!(output.duration < Duration::from_secs(5));
}

#[tokio::test]
async fn test_mock_matches_arguments() {
    let mock = MockProcessRunner::new();
    mock.expect_command("sbatch")
        .with_args(|args| args.first().is_some_and(|arg| arg == "--parsable"))
        .returns_stdout("4242\n")
        .finish();

    let output = mock
        .run(ProcessCommandBuilder::new("sbatch").args(["--parsable", "job.sh"]).build())
        .await
        .unwrap();
    assert_eq!(output.stdout, "4242\n");

    let unmatched = mock
        .run(ProcessCommandBuilder::new("sbatch").arg("job.sh").build())
        .await;
    assert!(matches!(unmatched, Err(ProcessError::MockExpectationNotMet(_))));
    assert!(mock.verify_called("sbatch", 2));
}

#[tokio::test]
async fn test_mock_used_up_script_falls_through() {
    let mock = MockProcessRunner::new();
    mock.expect_command("qsub")
        .returns_exit_code(1)
        .returns_stderr("qsub: server busy")
        .times(2)
        .finish();
    mock.expect_command("qsub").returns_stdout("17.head\n").finish();

    for _ in 0..2 {
        let output = mock.run(ProcessCommandBuilder::new("qsub").build()).await.unwrap();
        assert_eq!(output.status.code(), Some(1));
        assert_eq!(output.diagnostics(), "qsub: server busy");
    }
    let output = mock.run(ProcessCommandBuilder::new("qsub").build()).await.unwrap();
    assert!(output.status.success());
    assert_eq!(mock.call_count("qsub"), 3);
}

#[tokio::test]
async fn test_mock_not_found() {
    let mock = MockProcessRunner::new();
    mock.expect_command("squeue").returns_not_found().finish();

    let result = mock.run(ProcessCommandBuilder::new("squeue").build()).await;
    assert!(matches!(result, Err(ProcessError::CommandNotFound(_))));
}

#[test]
fn test_builder_assembles_scorer_command() {
    let command = ProcessCommandBuilder::new("scorer")
        .arg("functional")
        .arg_path(Path::new("/scratch/sub 1/rest.nii.gz"))
        .flag("--exclude-zeros", true)
        .flag("--verbose", false)
        .timeout(Some(Duration::from_secs(30)))
        .build();

    assert_eq!(
        command.args,
        vec!["functional", "/scratch/sub 1/rest.nii.gz", "--exclude-zeros"]
    );
    assert_eq!(command.timeout, Some(Duration::from_secs(30)));
    assert_eq!(
        command.display(),
        "scorer functional '/scratch/sub 1/rest.nii.gz' --exclude-zeros"
    );
}

#[cfg(unix)]
#[test]
fn test_builder_keeps_non_utf8_paths() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let raw = OsStr::from_bytes(b"/scratch/sub\xff/rest.nii.gz");
    let command = ProcessCommandBuilder::new("scorer")
        .arg_path(Path::new(raw))
        .build();
    assert_eq!(command.args[0].as_os_str(), raw);
}

#[test]
fn test_transient_errors() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    assert!(ProcessError::Io(io).is_transient());
    assert!(!ProcessError::CommandNotFound("sbatch".into()).is_transient());
}
