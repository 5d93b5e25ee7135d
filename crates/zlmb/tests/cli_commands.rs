#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use zlmb_queue::{QueueSocket, Role};
use zlmb_transport::Endpoint;

fn zlmb() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_zlmb"));
    command
        .arg("--log-level")
        .arg("error")
        .env_remove("ZLMB_ENV_PREFIX")
        .env_remove("ZLMB_TIMEOUT")
        .env_remove("ZLMB_WORKERS");
    command
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/zlmbcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn spawn_broker(endpoint: &str) -> Child {
    let child = zlmb()
        .arg("broker")
        .arg(endpoint)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("broker should start");

    let parsed = Endpoint::parse(endpoint).expect("endpoint should parse");
    let start = Instant::now();
    loop {
        if QueueSocket::connect(&parsed, Role::Push).is_ok() {
            return child;
        }
        if start.elapsed() >= Duration::from_secs(5) {
            panic!("broker did not come up on {endpoint}");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn wait_with_deadline(mut child: Child, timeout: Duration) -> Output {
    let start = Instant::now();
    while child.try_wait().expect("child should be pollable").is_none() {
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("child did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(25));
    }
    child.wait_with_output().expect("child output should be readable")
}

fn push(endpoint: &str, frames: &[&str]) {
    let status = zlmb()
        .arg("push")
        .arg(endpoint)
        .args(frames)
        .stdout(Stdio::null())
        .status()
        .expect("push should run");
    assert!(status.success());
}

#[test]
fn push_without_messages_prints_usage() {
    let output = zlmb()
        .arg("push")
        .arg("tcp://127.0.0.1:5560")
        .output()
        .expect("push should run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"));
}

#[test]
fn unsupported_scheme_exits_with_usage_code() {
    let output = zlmb()
        .arg("push")
        .arg("udp://127.0.0.1:5560")
        .arg("hello")
        .output()
        .expect("push should run");

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unsupported endpoint scheme 'udp'"));
}

#[test]
fn unreachable_endpoint_exits_with_transport_code() {
    let dir = unique_temp_dir("unreachable");
    let endpoint = format!("ipc://{}", dir.join("missing.sock").display());

    let output = zlmb()
        .arg("worker")
        .arg(&endpoint)
        .output()
        .expect("worker should run");

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect failed"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn worker_prints_messages_without_a_command() {
    let dir = unique_temp_dir("inspect");
    let endpoint = format!("ipc://{}", dir.join("queue.sock").display());
    let mut broker = spawn_broker(&endpoint);

    let worker = zlmb()
        .arg("worker")
        .arg(&endpoint)
        .arg("--max-messages")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("worker should start");

    push(&endpoint, &["a", "bc"]);

    let output = wait_with_deadline(worker, Duration::from_secs(10));
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "frames: 2\nframe[0] length: 1\na\nframe[1] length: 2\nbc\n"
    );

    let _ = broker.kill();
    let _ = broker.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn worker_runs_handler_with_manifest_and_buffer() {
    let dir = unique_temp_dir("handler");
    let endpoint = format!("ipc://{}", dir.join("queue.sock").display());
    let out_path = dir.join("handled.json");
    let mut broker = spawn_broker(&endpoint);

    let worker = zlmb()
        .arg("worker")
        .arg(&endpoint)
        .arg("--command")
        .arg(env!("CARGO_BIN_EXE_zlmb"))
        .arg("--max-messages")
        .arg("1")
        .arg("--")
        .arg("inspect")
        .arg("--format")
        .arg("json")
        .arg("--output")
        .arg(&out_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("worker should start");

    push(&endpoint, &["hello", "", "bcd"]);

    let output = wait_with_deadline(worker, Duration::from_secs(10));
    assert!(output.status.success());

    let written = std::fs::read_to_string(&out_path).expect("handler output should exist");
    let value: serde_json::Value =
        serde_json::from_str(written.trim()).expect("handler output should be json");
    assert_eq!(value["manifest"], "5:0:3");
    assert_eq!(value["frame_count"], 3);
    assert_eq!(value["length"], 8);
    assert_eq!(value["frames"][2]["data"], "bcd");

    let _ = broker.kill();
    let _ = broker.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn inspect_decodes_prefixed_environment() {
    let mut child = zlmb()
        .arg("inspect")
        .arg("--env-prefix")
        .arg("ZLMB_")
        .arg("--format")
        .arg("pretty")
        .env("ZLMB_FRAME", "2")
        .env("ZLMB_FRAME_LENGTH", "5:2")
        .env("ZLMB_LENGTH", "7")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("inspect should start");

    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(b"hellowo")
        .expect("stdin should accept the buffer");

    let output = child.wait_with_output().expect("inspect should finish");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "frames: 2\nframe[0] length: 5\nhello\nframe[1] length: 2\nwo\n"
    );
}

#[test]
fn inspect_rejects_length_mismatch() {
    let mut child = zlmb()
        .arg("inspect")
        .env("FRAME", "1")
        .env("FRAME_LENGTH", "3")
        .env("LENGTH", "3")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("inspect should start");

    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(b"ab")
        .expect("stdin should accept the buffer");

    let output = child.wait_with_output().expect("inspect should finish");
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("LENGTH declares 3 bytes"));
}

#[test]
fn version_prints_name() {
    let output = zlmb().arg("version").output().expect("version should run");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("zlmb "));
}
