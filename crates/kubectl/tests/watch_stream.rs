#![forbid(unsafe_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use skua_core::{BuiltinKind, WatchError, WatchEvent, WatchKey};
use skua_kubectl::{Kubectl, StreamState, WatchStream};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn stub(dir: &TempDir, body: &str) -> Kubectl {
    let path = dir.path().join("kubectl-stub");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    Kubectl::with_program(path.to_string_lossy())
}

async fn next_event(rx: &mut mpsc::Receiver<(WatchKey, WatchEvent)>) -> WatchEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("events channel open")
        .1
}

async fn channel_quiet(rx: &mut mpsc::Receiver<(WatchKey, WatchEvent)>) -> bool {
    timeout(Duration::from_millis(300), rx.recv()).await.is_err()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn decodes_events_in_stream_order_then_ends() {
    let dir = TempDir::new().unwrap();
    let kubectl = stub(
        &dir,
        r#"cat <<'EOF'
{"type":"ADDED","object":{"metadata":{"name":"a","uid":"u1"}}}
{"type":"MODIFIED","object":{"metadata":{"name":"a","uid":"u1"}}}
{"type":"DELETED","object":{"metadata":{"name":"a","uid":"u1"}}}
EOF"#,
    );
    let (tx, mut rx) = mpsc::channel(16);
    let key = WatchKey::builtin(BuiltinKind::PersistentVolumes);
    let mut stream = WatchStream::new(kubectl, key.clone(), tx);
    stream.start().unwrap();
    assert_eq!(stream.state(), StreamState::Running);

    assert!(matches!(next_event(&mut rx).await, WatchEvent::Added(_)));
    assert!(matches!(next_event(&mut rx).await, WatchEvent::Updated(_)));
    assert!(matches!(next_event(&mut rx).await, WatchEvent::Deleted(_)));
    assert!(matches!(next_event(&mut rx).await, WatchEvent::Ended));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn events_carry_the_watcher_key() {
    let dir = TempDir::new().unwrap();
    let kubectl = stub(
        &dir,
        r#"echo '{"type":"ADDED","object":{"metadata":{"name":"w","uid":"u1"}}}'
exec sleep 60"#,
    );
    let (tx, mut rx) = mpsc::channel(16);
    let key = WatchKey::builtin_in(BuiltinKind::Pods, "team-a");
    let mut stream = WatchStream::new(kubectl, key.clone(), tx);
    stream.start().unwrap();

    let (tagged, event) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("events channel open");
    assert_eq!(tagged, key);
    assert!(matches!(event, WatchEvent::Added(_)));
    stream.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invocation_composes_namespace_watch_and_output_flags() {
    let dir = TempDir::new().unwrap();
    // The stub echoes its argv back as an object name.
    let kubectl = stub(
        &dir,
        r#"printf '{"type":"ADDED","object":{"metadata":{"uid":"argv","name":"%s"}}}\n' "$*"
exec sleep 60"#,
    );
    let (tx, mut rx) = mpsc::channel(16);
    let mut stream = WatchStream::new(
        kubectl,
        WatchKey::builtin_in(BuiltinKind::Pods, "team-a"),
        tx,
    );
    stream.start().unwrap();

    match next_event(&mut rx).await {
        WatchEvent::Added(obj) => assert_eq!(
            skua_core::fields::name(&obj),
            Some("--namespace team-a get pods --watch -o json")
        ),
        other => panic!("unexpected event: {}", other.label()),
    }
    stream.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_lines_do_not_terminate_the_stream() {
    let dir = TempDir::new().unwrap();
    let kubectl = stub(
        &dir,
        r#"echo '{oops'
echo '{"type":"ADDED","object":{"metadata":{"name":"a","uid":"u1"}}}'
exec sleep 60"#,
    );
    let (tx, mut rx) = mpsc::channel(16);
    let mut stream = WatchStream::new(kubectl, WatchKey::builtin(BuiltinKind::Namespaces), tx);
    stream.start().unwrap();

    assert!(matches!(
        next_event(&mut rx).await,
        WatchEvent::Error(WatchError::Decode { .. })
    ));
    assert!(matches!(next_event(&mut rx).await, WatchEvent::Added(_)));
    // Still running: no Ended while the subprocess holds the stream open.
    assert!(channel_quiet(&mut rx).await);
    stream.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unrecognized_record_types_are_skipped() {
    let dir = TempDir::new().unwrap();
    let kubectl = stub(
        &dir,
        r#"echo '{"type":"BOOKMARK","object":{"metadata":{"resourceVersion":"5"}}}'
echo '{"type":"ADDED","object":{"metadata":{"name":"a","uid":"u1"}}}'
exec sleep 60"#,
    );
    let (tx, mut rx) = mpsc::channel(16);
    let mut stream = WatchStream::new(kubectl, WatchKey::builtin(BuiltinKind::Namespaces), tx);
    stream.start().unwrap();

    assert!(matches!(next_event(&mut rx).await, WatchEvent::Added(_)));
    stream.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stderr_lines_become_stream_errors() {
    let dir = TempDir::new().unwrap();
    let kubectl = stub(
        &dir,
        r#"echo 'watch expired' >&2
exec sleep 60"#,
    );
    let (tx, mut rx) = mpsc::channel(16);
    let mut stream = WatchStream::new(kubectl, WatchKey::builtin(BuiltinKind::Namespaces), tx);
    stream.start().unwrap();

    match next_event(&mut rx).await {
        WatchEvent::Error(WatchError::Stream(line)) => assert_eq!(line, "watch expired"),
        other => panic!("unexpected event: {}", other.label()),
    }
    stream.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_is_terminal_and_start_becomes_a_noop() {
    let dir = TempDir::new().unwrap();
    let kubectl = stub(&dir, "exec sleep 60");
    let (tx, mut rx) = mpsc::channel(16);
    let mut stream = WatchStream::new(kubectl, WatchKey::builtin(BuiltinKind::Namespaces), tx);

    stream.start().unwrap();
    assert_eq!(stream.state(), StreamState::Running);
    // Starting again while running changes nothing.
    stream.start().unwrap();
    assert_eq!(stream.state(), StreamState::Running);

    stream.stop();
    stream.stop();
    assert_eq!(stream.state(), StreamState::Stopped);

    stream.start().unwrap();
    assert_eq!(stream.state(), StreamState::Stopped);
    assert!(channel_quiet(&mut rx).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_failure_leaves_the_adapter_idle() {
    let (tx, _rx) = mpsc::channel(16);
    let mut stream = WatchStream::new(
        Kubectl::with_program("/nonexistent/skua-no-such-tool"),
        WatchKey::builtin(BuiltinKind::Namespaces),
        tx,
    );
    let err = stream.start().unwrap_err();
    assert!(matches!(err, WatchError::Spawn { .. }));
    assert_eq!(stream.state(), StreamState::Idle);
}
