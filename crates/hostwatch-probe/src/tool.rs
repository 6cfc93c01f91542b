//! Short-lived external tool invocation (nvidia-smi, smartctl, wmic).

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

pub const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a probe helper and return its trimmed stdout. Any failure (missing
/// binary, nonzero exit, timeout, empty output) yields `None`.
pub fn run_tool(cmd: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let mut child = match Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            tracing::debug!(tool = cmd, error = %err, "probe helper unavailable");
            return None;
        }
    };

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return None;
                }
                let mut out = Vec::new();
                if let Some(mut stdout) = child.stdout.take() {
                    let _ = stdout.read_to_end(&mut out);
                }
                let text = String::from_utf8_lossy(&out).trim().to_string();
                return if text.is_empty() { None } else { Some(text) };
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => return None,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_of_short_command() {
        let out = run_tool("echo", &["probe"], TOOL_TIMEOUT);
        assert_eq!(out.as_deref(), Some("probe"));
    }

    #[test]
    fn missing_binary_yields_none() {
        assert!(run_tool("hostwatch-no-such-tool", &[], TOOL_TIMEOUT).is_none());
    }

    #[test]
    fn nonzero_exit_yields_none() {
        assert!(run_tool("false", &[], TOOL_TIMEOUT).is_none());
    }

    #[test]
    fn timeout_kills_the_tool() {
        let start = Instant::now();
        let out = run_tool("sleep", &["30"], Duration::from_millis(200));
        assert!(out.is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
