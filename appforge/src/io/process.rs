//! Shell command execution with a timeout and bounded output.

use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured output of one shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// `None` when the process was killed by a signal (including on timeout).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// How long readers may keep draining after a timed-out command is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Run `command` through `sh -c` inside `cwd`.
///
/// Both pipes are drained on reader threads so a chatty child cannot block on
/// a full pipe. Bytes past `output_limit_bytes` are discarded and noted at the
/// end of the captured text.
///
/// The shell leads its own process group. On timeout the whole group is
/// killed, so background servers it started do not outlive the call.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), cwd = %cwd.display()))]
pub fn run_shell(
    command: &str,
    cwd: &Path,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ShellOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    debug!(command, "spawning shell");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn sh -c in {}", cwd.display()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            kill_tree(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    // A descendant that left the group may still hold the pipes open.
    let deadline = timed_out.then(|| Instant::now() + DRAIN_GRACE);
    let stdout = join_reader(stdout_handle, deadline).context("join stdout")?;
    let stderr = join_reader(stderr_handle, deadline).context("join stderr")?;

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ShellOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        timed_out,
    })
}

/// Kill the process group led by `child`, then `child` itself.
fn kill_tree(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let status = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if !status.is_ok_and(|s| s.success()) {
            warn!(group = %group, "could not signal process group");
        }
    }
    match child.kill() {
        Ok(()) => Ok(()),
        // Already reaped by the group kill.
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err).context("kill command"),
    }
}

/// Join a reader thread. With a deadline, a reader still blocked after it is
/// detached and its output reported as unavailable.
fn join_reader(
    handle: thread::JoinHandle<Result<String>>,
    deadline: Option<Instant>,
) -> Result<String> {
    if let Some(deadline) = deadline {
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("output pipe still held open after kill; detaching reader");
                return Ok("[output unavailable: pipe held open by a background process]".to_string());
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<String> {
    let mut buf = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(buf.len());
        let keep = n.min(room);
        buf.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }

    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if dropped > 0 {
        warn!(dropped, "output truncated");
        text.push_str(&format!("\n[truncated {dropped} bytes]"));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_shell(
            "echo hello; echo oops >&2; exit 3",
            temp.path(),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[test]
    fn runs_inside_the_working_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "x").expect("write");
        let out = run_shell("ls", temp.path(), Duration::from_secs(10), 1024).expect("run");
        assert!(out.stdout.contains("marker.txt"));
        assert!(out.success());
    }

    #[test]
    fn truncates_large_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_shell(
            "head -c 5000 /dev/zero | tr '\\0' a",
            temp.path(),
            Duration::from_secs(10),
            100,
        )
        .expect("run");
        assert!(out.stdout.starts_with(&"a".repeat(100)));
        assert!(out.stdout.ends_with("[truncated 4900 bytes]"));
    }

    #[test]
    fn kills_on_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_shell("exec sleep 5", temp.path(), Duration::from_millis(100), 1024).expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn timeout_does_not_wait_for_child_processes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let started = Instant::now();
        let out = run_shell(
            "sleep 30 & echo started; sleep 4; echo done",
            temp.path(),
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "took {:?}",
            started.elapsed()
        );
        assert!(!out.stdout.contains("done"));
    }
}
