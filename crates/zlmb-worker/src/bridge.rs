use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::BridgeError;

/// How handler processes are started.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Kill the handler if it runs longer than this.
    pub timeout: Option<Duration>,
    /// Prepended to `FRAME`, `FRAME_LENGTH` and `LENGTH`.
    pub env_prefix: String,
    /// Start the handler with only the three envelope variables.
    pub clear_env: bool,
    /// How often a running handler is checked against its deadline.
    pub poll_interval: Duration,
    /// How long to wait for the output pipes to close after the handler
    /// exits. Processes it left behind are killed once this elapses.
    pub output_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            env_prefix: String::new(),
            clear_env: false,
            poll_interval: Duration::from_millis(10),
            output_grace: Duration::from_millis(500),
        }
    }
}

/// Program and arguments of an external handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl HandlerCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for HandlerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// What a handler process left behind.
///
/// Output is diagnostic text; nothing about its structure is assumed.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessResult {
    /// Exit code, or `None` if the process was ended by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Hands an [`Envelope`] to an external process.
///
/// The envelope metadata goes into the process environment and the buffer
/// goes to its stdin. Stdin is fed and both output pipes are drained on
/// separate threads, so a handler that writes before reading, reads slowly,
/// or never reads cannot stall the worker.
#[derive(Debug, Clone, Default)]
pub struct ExternalProcessBridge {
    config: BridgeConfig,
}

impl ExternalProcessBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run `command` once for `envelope` and wait for it to finish.
    ///
    /// A non-zero exit is returned as [`BridgeError::NonZeroExit`] with the
    /// captured output attached.
    pub fn invoke(
        &self,
        envelope: &Envelope,
        command: &HandlerCommand,
    ) -> Result<ProcessResult, BridgeError> {
        let program = command.to_string();
        let started = Instant::now();

        let mut cmd = Command::new(command.program());
        cmd.args(command.get_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.config.clear_env {
            cmd.env_clear();
        }
        cmd.envs(envelope.env_vars(&self.config.env_prefix));
        // Own process group, so the handler and anything it forks die together.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

        let mut child = cmd.spawn().map_err(|source| BridgeError::SpawnFailed {
            program: program.clone(),
            source,
        })?;
        debug!(
            %program,
            pid = child.id(),
            frames = envelope.frame_count(),
            bytes = envelope.buffer_len(),
            "handler started"
        );

        // Pipe threads are not scoped: a grandchild holding a pipe open must
        // not keep this call waiting.
        let buffer = envelope.buffer().clone();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let feeder = thread::spawn(move || feed_stdin(stdin, buffer));
        let out = thread::spawn(move || drain(stdout));
        let err = thread::spawn(move || drain(stderr));

        let status = self.wait(&mut child, &program)?;

        let grace = Instant::now() + self.config.output_grace;
        let poll = self.config.poll_interval;
        let mut pipes_open = false;
        for finished in [
            wait_finished(&feeder, grace, poll),
            wait_finished(&out, grace, poll),
            wait_finished(&err, grace, poll),
        ] {
            pipes_open |= !finished;
        }
        if pipes_open {
            debug!(%program, "handler left processes holding its pipes; killing its group");
            kill_group(&mut child);
            let retry = Instant::now() + self.config.output_grace;
            wait_finished(&feeder, retry, poll);
            wait_finished(&out, retry, poll);
            wait_finished(&err, retry, poll);
        }

        collect(feeder, &program, "stdin").transpose()?;
        let result = ProcessResult {
            status,
            stdout: collect(out, &program, "stdout").transpose()?.unwrap_or_default(),
            stderr: collect(err, &program, "stderr").transpose()?.unwrap_or_default(),
            elapsed: started.elapsed(),
        };
        debug!(%program, %status, elapsed = ?result.elapsed, "handler finished");

        if !result.success() {
            return Err(BridgeError::NonZeroExit {
                program,
                status,
                result: Box::new(result),
            });
        }
        Ok(result)
    }

    fn wait(&self, child: &mut Child, program: &str) -> Result<ExitStatus, BridgeError> {
        let Some(timeout) = self.config.timeout else {
            return Ok(child.wait()?);
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(%program, ?timeout, pid = child.id(), "handler timed out; killing");
                kill_group(child);
                let _ = child.wait();
                return Err(BridgeError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            thread::sleep(self.config.poll_interval);
        }
    }
}

/// Kill the handler's process group, falling back to the handler alone.
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: killpg only sends a signal. The group was created for this
    // child by `process_group(0)`, so its id equals the child's pid.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        // Group already empty; the handler may still need reaping.
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

/// Poll until `handle` finishes or `deadline` passes. True if finished.
fn wait_finished<T>(handle: &JoinHandle<T>, deadline: Instant, poll: Duration) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(poll);
    }
    true
}

/// Join a finished pipe thread. An unfinished one is left detached.
fn collect<T>(
    handle: JoinHandle<std::io::Result<T>>,
    program: &str,
    pipe: &str,
) -> Option<std::io::Result<T>> {
    if !handle.is_finished() {
        warn!(%program, pipe, "handler pipe still open; output dropped");
        return None;
    }
    Some(
        handle
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("handler pipe thread panicked"))),
    )
}

/// Write the whole buffer, then close stdin to signal end of input.
fn feed_stdin(stdin: Option<ChildStdin>, buffer: Bytes) -> std::io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(&buffer) {
        Ok(()) => Ok(()),
        // The handler exited or closed stdin without reading everything.
        Err(err) if err.kind() == ErrorKind::BrokenPipe => {
            debug!("handler closed stdin before reading the whole buffer");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn drain<R: Read>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut out)?;
    }
    Ok(out)
}

#[cfg(all(test, unix))]
mod tests {
    use zlmb_frame::Message;

    use super::*;

    fn sh(script: &str) -> HandlerCommand {
        HandlerCommand::new("/bin/sh").args(["-c", script])
    }

    fn envelope(frames: &[&'static str]) -> Envelope {
        Envelope::from_message(&Message::from_frames(frames.iter().copied())).unwrap()
    }

    #[test]
    fn sets_envelope_environment() {
        let bridge = ExternalProcessBridge::default();
        let result = bridge
            .invoke(
                &envelope(&["hello", "world"]),
                &sh(r#"printf '%s|%s|%s' "$FRAME" "$FRAME_LENGTH" "$LENGTH""#),
            )
            .unwrap();
        assert_eq!(result.stdout_lossy(), "2|5:5|10");
        assert_eq!(result.exit_code(), Some(0));
    }

    #[test]
    fn length_and_manifest_match_buffer() {
        let bridge = ExternalProcessBridge::default();
        let cases: [&[&'static str]; 4] =
            [&["a", "", "bcd"], &[""], &["", "x"], &["0123456789"; 7]];
        for frames in cases {
            let envelope = envelope(frames);
            let result = bridge
                .invoke(
                    &envelope,
                    &sh(r#"printf '%s %s' "$FRAME_LENGTH" "$LENGTH""#),
                )
                .unwrap();
            let expected = format!("{} {}", envelope.manifest(), envelope.buffer_len());
            assert_eq!(result.stdout_lossy(), expected);
        }
    }

    #[test]
    fn buffer_arrives_on_stdin() {
        let bridge = ExternalProcessBridge::default();
        let result = bridge
            .invoke(&envelope(&["a", "", "bcd"]), &HandlerCommand::new("cat"))
            .unwrap();
        assert_eq!(result.stdout, b"abcd");
    }

    #[test]
    fn env_prefix_renames_variables() {
        let bridge = ExternalProcessBridge::new(BridgeConfig {
            env_prefix: "ZLMB_".to_string(),
            ..BridgeConfig::default()
        });
        let result = bridge
            .invoke(
                &envelope(&["abc"]),
                &sh(r#"printf '%s:%s:%s' "$ZLMB_FRAME" "$ZLMB_LENGTH" "${FRAME-unset}""#),
            )
            .unwrap();
        assert_eq!(result.stdout_lossy(), "1:3:unset");
    }

    #[test]
    fn clear_env_drops_inherited_variables() {
        std::env::set_var("ZLMB_BRIDGE_TEST_MARKER", "present");
        let script = r#"printf '%s %s' "${ZLMB_BRIDGE_TEST_MARKER-unset}" "$LENGTH""#;

        let inherited = ExternalProcessBridge::default()
            .invoke(&envelope(&["xy"]), &sh(script))
            .unwrap();
        assert_eq!(inherited.stdout_lossy(), "present 2");

        let cleared = ExternalProcessBridge::new(BridgeConfig {
            clear_env: true,
            ..BridgeConfig::default()
        })
        .invoke(&envelope(&["xy"]), &sh(script))
        .unwrap();
        assert_eq!(cleared.stdout_lossy(), "unset 2");
    }

    #[test]
    fn handler_that_never_reads_does_not_block() {
        let big = "z".repeat(1024 * 1024);
        let envelope = Envelope::from_frames([big.as_bytes()]).unwrap();
        let result = ExternalProcessBridge::default()
            .invoke(&envelope, &sh("exit 0"))
            .unwrap();
        assert!(result.success());
    }

    #[test]
    fn handler_that_writes_before_reading_does_not_deadlock() {
        let big = vec![7u8; 1024 * 1024];
        let envelope = Envelope::from_frames([big.as_slice()]).unwrap();
        let result = ExternalProcessBridge::default()
            .invoke(
                &envelope,
                &sh("head -c 300000 /dev/zero; wc -c | tr -d ' ' >&2"),
            )
            .unwrap();
        assert_eq!(result.stdout.len(), 300_000);
        assert_eq!(result.stderr_lossy().trim(), "1048576");
    }

    #[test]
    fn non_zero_exit_keeps_output() {
        let err = ExternalProcessBridge::default()
            .invoke(&envelope(&["x"]), &sh("echo oops >&2; exit 3"))
            .unwrap_err();
        match err {
            BridgeError::NonZeroExit { status, result, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(result.stderr_lossy(), "oops\n");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_spawn_failure() {
        let err = ExternalProcessBridge::default()
            .invoke(
                &envelope(&["x"]),
                &HandlerCommand::new("/nonexistent/zlmb-handler"),
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::SpawnFailed { .. }));
        assert!(err.to_string().contains("/nonexistent/zlmb-handler"));
    }

    #[test]
    fn slow_handler_is_killed_at_deadline() {
        let bridge = ExternalProcessBridge::new(BridgeConfig {
            timeout: Some(Duration::from_millis(100)),
            ..BridgeConfig::default()
        });
        let started = Instant::now();
        let err = bridge
            .invoke(&envelope(&["x"]), &HandlerCommand::new("sleep").arg("5"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn timeout_kills_children_holding_pipes() {
        let bridge = ExternalProcessBridge::new(BridgeConfig {
            timeout: Some(Duration::from_millis(200)),
            ..BridgeConfig::default()
        });
        let started = Instant::now();
        let err = bridge
            .invoke(&envelope(&["x"]), &sh("sleep 4; echo done"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn background_child_does_not_hold_up_result() {
        let bridge = ExternalProcessBridge::new(BridgeConfig {
            output_grace: Duration::from_millis(200),
            ..BridgeConfig::default()
        });
        let started = Instant::now();
        let result = bridge
            .invoke(&envelope(&["x"]), &sh("(sleep 4) & echo started"))
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.stdout_lossy(), "started\n");
    }

    #[test]
    fn command_display_joins_args() {
        let command = HandlerCommand::new("handler.py").args(["--verbose", "out dir"]);
        assert_eq!(command.to_string(), "handler.py --verbose out dir");
    }
}
