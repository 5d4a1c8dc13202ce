//! Real subprocess execution through `ProcessRunner`

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use kubegate::engine::command_executor::{
    CommandRunner, ExecutionError, Invocation, OutputFormat, ProcessRunner,
};
use kubegate::engine::operations::Tool;

fn invocation(program: &str, args: &[&str]) -> Invocation {
    Invocation {
        tool: Tool::Kubectl,
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        env: BTreeMap::new(),
        output: OutputFormat::Text,
    }
}

#[tokio::test]
async fn test_captures_output_and_exit_code() {
    let runner = ProcessRunner::new();
    let result = runner
        .run(
            &invocation("sh", &["-c", "echo out; echo err >&2; exit 3"]),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(result.exit_code, 3);
    assert!(!result.success);
    assert_eq!(result.stdout.trim(), "out");
    assert_eq!(result.stderr.trim(), "err");
}

#[tokio::test]
async fn test_environment_is_passed() {
    let runner = ProcessRunner::new();
    let mut inv = invocation("sh", &["-c", "echo $KUBECONFIG"]);
    inv.env
        .insert("KUBECONFIG".to_string(), "/tmp/kube/config".to_string());
    let result = runner.run(&inv, Duration::from_secs(5)).await.unwrap();

    assert_eq!(result.stdout.trim(), "/tmp/kube/config");
}

#[tokio::test]
async fn test_timeout_kills_child() {
    let runner = ProcessRunner::new();
    let started = Instant::now();
    let err = runner
        .run(&invocation("sleep", &["30"]), Duration::from_millis(200))
        .await
        .unwrap_err();

    match err {
        ExecutionError::Timeout { after } => assert_eq!(after, Duration::from_millis(200)),
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
}
