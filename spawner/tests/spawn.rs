use std::{collections::HashMap, time::Duration};

use rstest::rstest;
use spawner::{launch, ProcessSpec, Readable, SpawnError, StreamDisposition, Writable};

/// A spec running `script` through the platform shell.
fn shell(script: &str) -> ProcessSpec {
    init_tracing();
    #[cfg(unix)]
    return ProcessSpec::new(["/bin/sh", "-c", script]);
    #[cfg(windows)]
    return ProcessSpec::new(["cmd", "/c", script]);
}

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();
    });
}

/// Drains a readable endpoint to end of stream.
fn read_all(reader: &impl Readable) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[test]
fn echo_through_stdout_pipe() {
    let mut spec = shell("echo hello");
    spec.stdout = StreamDisposition::Pipe;

    let process = launch(spec).unwrap();
    let stdout = process.stdout().unwrap();
    let output = read_all(&stdout);

    assert_eq!(process.wait_for_exit(None).unwrap(), Some(0));
    assert_eq!(output.trim(), "hello");
}

#[rstest]
#[case("exit 0", 0)]
#[case("exit 1", 1)]
#[case("exit 42", 42)]
fn exit_code_is_reported_raw(#[case] script: &str, #[case] expected: i32) {
    let process = launch(shell(script)).unwrap();
    assert_eq!(process.wait_for_exit(None).unwrap(), Some(expected));
}

#[test]
fn default_spec_exposes_no_endpoints() {
    let process = launch(shell("exit 0")).unwrap();
    assert!(process.stdin().is_none());
    assert!(process.stdout().is_none());
    assert!(process.stderr().is_none());
    assert_eq!(process.wait_for_exit(None).unwrap(), Some(0));
}

#[test]
fn timeout_expires_then_kill_unblocks_the_wait() {
    #[cfg(unix)]
    let script = "sleep 30";
    #[cfg(windows)]
    let script = "ping -n 31 127.0.0.1 >NUL";

    let process = launch(shell(script)).unwrap();
    assert_eq!(
        process.wait_for_exit(Some(Duration::from_millis(300))).unwrap(),
        None
    );

    process.kill().unwrap();
    let code = process
        .wait_for_exit(Some(Duration::from_secs(10)))
        .unwrap()
        .unwrap();
    assert_ne!(code, 0);
}

#[test]
fn zero_timeout_is_a_contract_violation() {
    let process = launch(shell("exit 0")).unwrap();
    assert!(matches!(
        process.wait_for_exit(Some(Duration::ZERO)),
        Err(SpawnError::InvalidTimeout)
    ));
    process.wait_for_exit(None).unwrap();
}

#[test]
fn nonexistent_executable_fails_to_launch() {
    let spec = ProcessSpec::new(["this-program-does-not-exist-anywhere"]);
    assert!(launch(spec).is_err());
}

#[test]
fn stdin_pipe_feeds_the_child_and_close_write_signals_end_of_stream() {
    #[cfg(unix)]
    let script = "cat";
    #[cfg(windows)]
    let script = "more";

    let mut spec = shell(script);
    spec.stdin = StreamDisposition::Pipe;
    spec.stdout = StreamDisposition::Pipe;

    let process = launch(spec).unwrap();
    let stdin = process.stdin().unwrap();
    let stdout = process.stdout().unwrap();

    stdin.write(b"ping\n").unwrap();
    // Only the closed write end lets the child see end of stream and exit.
    stdin.close().unwrap();

    let output = read_all(&stdout);
    assert_eq!(output.trim(), "ping");
    assert_eq!(process.wait_for_exit(Some(Duration::from_secs(10))).unwrap(), Some(0));
}

#[test]
fn stdin_write_after_the_child_is_gone_is_a_broken_channel_error() {
    let mut spec = shell("exit 0");
    spec.stdin = StreamDisposition::Pipe;

    let process = launch(spec).unwrap();
    let stdin = process.stdin().unwrap();
    assert_eq!(
        process.wait_for_exit(Some(Duration::from_secs(10))).unwrap(),
        Some(0)
    );

    // Early writes may still land in the pipe buffer; the vanished peer
    // surfaces within a bounded number of them.
    let mut result = Ok(0);
    for _ in 0..64 {
        result = stdin.write(b"nobody is listening\n");
        if result.is_err() {
            break;
        }
    }
    assert!(result.is_err());
}

#[test]
fn environment_override_replaces_the_parent_environment() {
    #[cfg(unix)]
    let script = "echo \"$SPAWNER_IT_MARKER\"";
    #[cfg(windows)]
    let script = "echo %SPAWNER_IT_MARKER%";

    let mut spec = shell(script);
    spec.stdout = StreamDisposition::Pipe;
    spec.env = Some(HashMap::from([(
        "SPAWNER_IT_MARKER".to_string(),
        "xyzzy".to_string(),
    )]));

    let process = launch(spec).unwrap();
    let output = read_all(&process.stdout().unwrap());
    process.wait_for_exit(None).unwrap();
    assert_eq!(output.trim(), "xyzzy");
}

#[test]
fn merged_stderr_arrives_on_the_stdout_pipe() {
    #[cfg(unix)]
    let script = "echo out; echo err 1>&2";
    #[cfg(windows)]
    let script = "echo out & echo err 1>&2";

    let mut spec = shell(script);
    spec.stdout = StreamDisposition::Pipe;
    spec.merge_stderr = true;

    let process = launch(spec).unwrap();
    assert!(process.stderr().is_none());

    let output = read_all(&process.stdout().unwrap());
    process.wait_for_exit(None).unwrap();
    assert!(output.contains("out"));
    assert!(output.contains("err"));
}

#[test]
fn file_disposition_redirects_to_the_named_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");

    let mut spec = shell("echo filed");
    spec.stdout = StreamDisposition::File(path.clone());

    let process = launch(spec).unwrap();
    assert_eq!(process.wait_for_exit(None).unwrap(), Some(0));

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.trim(), "filed");
}

#[test]
fn working_dir_sets_the_child_cwd() {
    #[cfg(unix)]
    let script = "pwd";
    #[cfg(windows)]
    let script = "cd";

    let dir = tempfile::tempdir().unwrap();
    // pwd resolves symlinks (macOS puts temp dirs behind one); cd on Windows
    // echoes the directory exactly as it was handed over.
    #[cfg(unix)]
    let expected = dir.path().canonicalize().unwrap().display().to_string();
    #[cfg(windows)]
    let expected = dir.path().display().to_string();

    let mut spec = shell(script);
    spec.stdout = StreamDisposition::Pipe;
    spec.working_dir = Some(dir.path().to_path_buf());

    let process = launch(spec).unwrap();
    let output = read_all(&process.stdout().unwrap());
    process.wait_for_exit(None).unwrap();
    assert_eq!(output.trim(), expected);
}
