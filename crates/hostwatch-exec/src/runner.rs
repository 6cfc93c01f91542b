//! Child-process supervision on a dedicated thread.
//!
//! The child runs in its own process group (job-object equivalent on
//! Windows) with both pipes drained by reader threads; the supervising
//! thread polls on a 20 ms tick for cancellation and the wall-clock
//! deadline. Enforcement is always a group kill so interpreter children
//! cannot outlive the job.

use hostwatch_common::sanitize;
use hostwatch_common::types::ProcessResult;
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const READ_CHUNK: usize = 8192;

pub struct RunSpec {
    pub argv: Vec<String>,
    /// Merged over the parent environment.
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
    /// Cap for stdout, stderr, and the combined buffer, each.
    pub max_output_bytes: usize,
    pub cancel: Arc<AtomicBool>,
}

#[derive(Clone, Copy)]
enum StreamTag {
    Out,
    Err,
}

struct CappedBuf {
    data: Vec<u8>,
    cap: usize,
}

impl CappedBuf {
    fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
        }
    }

    /// Appends up to the cap; returns true when any byte was discarded.
    fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.cap.saturating_sub(self.data.len());
        if chunk.len() <= room {
            self.data.extend_from_slice(chunk);
            false
        } else {
            self.data.extend_from_slice(&chunk[..room]);
            true
        }
    }
}

pub fn run(spec: RunSpec) -> std::io::Result<ProcessResult> {
    if spec.argv.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty argv",
        ));
    }

    let mut command = Command::new(&spec.argv[0]);
    command
        .args(&spec.argv[1..])
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &spec.cwd {
        command.current_dir(dir);
    }
    set_process_group(&mut command);

    let mut child = command.spawn()?;
    let started = Instant::now();
    let deadline = started + spec.timeout;

    let (tx, rx) = mpsc::channel::<(StreamTag, Vec<u8>)>();
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, StreamTag::Out, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, StreamTag::Err, tx.clone()));
    }
    // The loop below ends on channel disconnect, which requires every
    // sender clone to be gone.
    drop(tx);

    let mut stdout_buf = CappedBuf::new(spec.max_output_bytes);
    let mut stderr_buf = CappedBuf::new(spec.max_output_bytes);
    let mut combined = CappedBuf::new(spec.max_output_bytes);
    let mut truncated = false;
    let mut timed_out = false;
    let mut killed = false;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok((tag, chunk)) => {
                let dropped = match tag {
                    StreamTag::Out => stdout_buf.push(&chunk),
                    StreamTag::Err => stderr_buf.push(&chunk),
                };
                truncated |= dropped;
                truncated |= combined.push(&chunk);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if !killed {
            if spec.cancel.load(Ordering::Relaxed) {
                kill_process_group(&mut child);
                killed = true;
            } else if Instant::now() >= deadline {
                kill_process_group(&mut child);
                killed = true;
                timed_out = true;
            }
        }
    }

    for reader in readers {
        let _ = reader.join();
    }
    let status = child.wait()?;

    Ok(ProcessResult {
        exit_code: exit_code_of(&status),
        stdout: sanitize::clean(&stdout_buf.data),
        stderr: sanitize::clean(&stderr_buf.data),
        combined: sanitize::clean(&combined.data),
        timed_out,
        truncated,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    mut source: R,
    tag: StreamTag,
    tx: mpsc::Sender<(StreamTag, Vec<u8>)>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((tag, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(unix)]
fn set_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn set_process_group(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let pgid = child.id() as i32;
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(windows)]
fn kill_process_group(child: &mut Child) {
    let killed = Command::new("taskkill")
        .args(["/PID", &child.id().to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !killed {
        let _ = child.kill();
    }
}

#[cfg(unix)]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

#[cfg(not(unix))]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn spec(script: &str) -> RunSpec {
        RunSpec {
            argv: shell(script),
            env: HashMap::new(),
            cwd: None,
            timeout: Duration::from_secs(10),
            max_output_bytes: 64 * 1024,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let result = run(spec("echo hello")).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert!(result.combined.ends_with("hello\n"));
        assert!(!result.timed_out);
        assert!(!result.truncated);
    }

    #[test]
    fn captures_stderr_separately_and_combined() {
        let result = run(spec("echo out; echo err >&2")).unwrap();
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(result.combined.contains("out\n"));
        assert!(result.combined.contains("err\n"));
    }

    #[test]
    fn reports_nonzero_exit() {
        let result = run(spec("exit 7")).unwrap();
        assert_eq!(result.exit_code, 7);
    }

    #[test]
    fn signal_death_maps_to_128_plus_signal() {
        let result = run(spec("kill -TERM $$")).unwrap();
        assert_eq!(result.exit_code, 128 + 15);
    }

    #[test]
    fn merges_env_over_parent() {
        let mut s = spec("printf '%s' \"$HOSTWATCH_TEST_VAR\"");
        s.env
            .insert("HOSTWATCH_TEST_VAR".into(), "forty-two".into());
        let result = run(s).unwrap();
        assert_eq!(result.stdout, "forty-two");
    }

    #[test]
    fn timeout_kills_the_child() {
        let mut s = spec("sleep 30");
        s.timeout = Duration::from_millis(300);
        let start = Instant::now();
        let result = run(s).unwrap();
        assert!(result.timed_out);
        assert_ne!(result.exit_code, 0);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cancel_flag_stops_the_child_without_timeout() {
        let mut s = spec("sleep 30");
        let cancel = s.cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            cancel.store(true, Ordering::Relaxed);
        });
        let start = Instant::now();
        let result = run(s).unwrap();
        assert!(!result.timed_out);
        assert_ne!(result.exit_code, 0);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn output_is_capped_and_flagged() {
        let mut s = spec("i=0; while [ $i -lt 100 ]; do printf '0123456789'; i=$((i+1)); done");
        s.max_output_bytes = 512;
        let result = run(s).unwrap();
        assert!(result.truncated);
        assert_eq!(result.combined.len(), 512);
        assert_eq!(result.stdout.len(), 512);
    }

    #[test]
    fn invalid_utf8_output_is_sanitized() {
        let result = run(spec("printf 'ok\\377\\376end'")).unwrap();
        assert_eq!(result.stdout, "ok  end");
        assert!(result
            .stdout
            .as_bytes()
            .iter()
            .all(|b| b.is_ascii()));
    }

    #[test]
    fn empty_argv_is_rejected() {
        let mut s = spec("true");
        s.argv.clear();
        assert!(run(s).is_err());
    }
}
