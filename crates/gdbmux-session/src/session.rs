//! One debugger session: subprocess lifecycle, output draining, and
//! command/response correlation.
//!
//! A session owns the spawned MI subprocess plus two background tasks: a
//! reader that drains stdout line by line into an unbounded channel, and an
//! idle monitor that notices inactivity (eviction itself is the registry's
//! job). `send` serializes commands through a pipe mutex and matches queued
//! output lines to the command that triggered them.

use crate::config::Config;
use gdbmux_core::{MuxError, MuxResult, Record, PROMPT};
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outcome of one command exchange.
///
/// `result` is the last authoritative result record seen before the prompt
/// (or `None` when the response window elapsed without one); `output` is
/// every drained line joined with newlines, prompt included.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub result: Option<Record>,
    pub output: String,
}

/// Writable half of the exchange: child stdin plus the ordered line channel
/// filled by the reader task. Locking this is the per-session command lock —
/// at most one command is in flight at a time.
struct CommandPipe {
    stdin: ChildStdin,
    output: mpsc::UnboundedReceiver<String>,
}

/// How long to let the startup banner land in the output channel before
/// `spawn` returns; the first `send` then discards it as stale instead of
/// mistaking the banner's prompt line for its own response.
const STARTUP_SETTLE: Duration = Duration::from_millis(100);

/// A single debugger session backed by one MI subprocess.
pub struct Session {
    pub id: String,
    created_at_secs: u64,
    idle_timeout: Duration,
    command_timeout: Duration,
    shutdown_grace: Duration,
    last_activity: Arc<RwLock<Instant>>,
    child: Mutex<Child>,
    pipe: Mutex<CommandPipe>,
    reader: Mutex<Option<JoinHandle<()>>>,
    idle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Spawn the debugger subprocess and launch the reader and idle-monitor
    /// tasks. Does not wait for the first prompt — only for a short settle
    /// period so the startup banner is queued before the first `send`.
    pub async fn spawn(config: &Config, idle_timeout: Duration) -> MuxResult<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| MuxError::Config("launch command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MuxError::Spawn(format!("{program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MuxError::Spawn("stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MuxError::Spawn("stdout was not captured".to_string()))?;

        let id = generate_session_id();
        let created_at_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let (tx, rx) = mpsc::unbounded_channel();
        let reader_id = id.clone();
        let reader = tokio::spawn(async move {
            read_output(stdout, tx, reader_id).await;
        });

        let last_activity = Arc::new(RwLock::new(Instant::now()));
        let monitor_activity = last_activity.clone();
        let monitor_id = id.clone();
        let idle_poll = config.idle_poll;
        let idle = tokio::spawn(async move {
            monitor_idle(monitor_activity, idle_timeout, idle_poll, monitor_id).await;
        });

        info!(session_id = %id, command = ?config.command, "session spawned");
        tokio::time::sleep(STARTUP_SETTLE).await;

        Ok(Self {
            id,
            created_at_secs,
            idle_timeout,
            command_timeout: config.command_timeout,
            shutdown_grace: config.shutdown_grace,
            last_activity,
            child: Mutex::new(child),
            pipe: Mutex::new(CommandPipe { stdin, output: rx }),
            reader: Mutex::new(Some(reader)),
            idle: Mutex::new(Some(idle)),
        })
    }

    /// Unix timestamp of session creation, for listing.
    pub fn created_at_secs(&self) -> u64 {
        self.created_at_secs
    }

    /// Time since the last accepted command.
    pub async fn idle_for(&self) -> Duration {
        self.last_activity.read().await.elapsed()
    }

    /// Whether this session has been idle past its configured timeout.
    pub async fn is_expired(&self) -> bool {
        self.idle_for().await > self.idle_timeout
    }

    async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    /// Send one command and collect its correlated response.
    ///
    /// Output queued before this call belongs to a previous exchange and is
    /// discarded. Collection stops at the `(gdb)` prompt (drained so it does
    /// not pollute the next command's buffer) or when the response window
    /// elapses; a timeout yields a partial outcome, not an error.
    pub async fn send(&self, command: &str) -> MuxResult<CommandOutcome> {
        let mut pipe = self.pipe.lock().await;

        {
            let mut child = self.child.lock().await;
            if child.try_wait()?.is_some() {
                return Err(MuxError::ProcessUnavailable(self.id.clone()));
            }
        }

        self.touch().await;

        let mut stale = 0usize;
        while pipe.output.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(session_id = %self.id, count = stale, "discarded stale output lines");
        }

        debug!(session_id = %self.id, command = %command, "sending command");
        pipe.stdin
            .write_all(format!("{command}\n").as_bytes())
            .await
            .map_err(|e| MuxError::ProcessUnavailable(format!("{}: {e}", self.id)))?;
        pipe.stdin
            .flush()
            .await
            .map_err(|e| MuxError::ProcessUnavailable(format!("{}: {e}", self.id)))?;

        let mut output_lines: Vec<String> = Vec::new();
        let mut result: Option<Record> = None;

        let deadline = tokio::time::sleep(self.command_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!(session_id = %self.id, "response window elapsed");
                    break;
                }
                line = pipe.output.recv() => {
                    match line {
                        // Reader gone: the process exited mid-command.
                        None => break,
                        Some(line) => {
                            let done = line == PROMPT;
                            if !done {
                                let record = Record::parse(&line);
                                if record.is_result() {
                                    result = Some(record);
                                }
                            }
                            output_lines.push(line);
                            if done {
                                break;
                            }
                        }
                    }
                }
            }
        }

        Ok(CommandOutcome {
            result,
            output: output_lines.join("\n"),
        })
    }

    /// Tear the session down: cancel and join both background tasks, then
    /// reap the process — graceful `quit` first, forced kill after the
    /// grace period. Failures are logged, never propagated. This is the
    /// only path that reaps the process and is safe when it is already dead.
    pub async fn close(&self) {
        if let Some(handle) = self.idle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let mut pipe = self.pipe.lock().await;
        let mut child = self.child.lock().await;

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(session_id = %self.id, %status, "process already exited");
                return;
            }
            Ok(None) => {}
            Err(e) => warn!(session_id = %self.id, error = %e, "could not query process state"),
        }

        let quit_sent = async {
            pipe.stdin.write_all(b"quit\n").await?;
            pipe.stdin.flush().await
        }
        .await
        .is_ok();

        let exited =
            quit_sent && matches!(timeout(self.shutdown_grace, child.wait()).await, Ok(Ok(_)));

        if exited {
            debug!(session_id = %self.id, "process exited after quit");
        } else {
            warn!(session_id = %self.id, "graceful quit failed, killing process");
            if let Err(e) = child.start_kill() {
                debug!(session_id = %self.id, error = %e, "kill failed, process likely gone");
            }
            match timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => debug!(session_id = %self.id, %status, "process reaped"),
                Ok(Err(e)) => warn!(session_id = %self.id, error = %e, "wait failed after kill"),
                Err(_) => warn!(session_id = %self.id, "process still alive after grace period"),
            }
        }

        info!(session_id = %self.id, "session closed");
    }
}

/// Reader task: drain subprocess stdout into the output channel, one trimmed
/// line at a time, in arrival order. Decoding is lossy, never fatal. Ends on
/// EOF, read error, or a dropped receiver.
async fn read_output(stdout: ChildStdout, tx: mpsc::UnboundedSender<String>, session_id: String) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let decoded = String::from_utf8_lossy(&buf);
                let line = decoded.trim();
                if line.is_empty() {
                    continue;
                }
                debug!(session_id = %session_id, line = %line, "debugger output");
                if tx.send(line.to_string()).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "error reading debugger output");
                break;
            }
        }
    }

    debug!(session_id = %session_id, "reader ended");
}

/// Idle-monitor task: wake on a fixed interval and end once the session has
/// been idle past its timeout. It never closes the session itself — the
/// registry sweep owns eviction.
async fn monitor_idle(
    last_activity: Arc<RwLock<Instant>>,
    idle_timeout: Duration,
    poll: Duration,
    session_id: String,
) {
    loop {
        tokio::time::sleep(poll).await;
        let idle = last_activity.read().await.elapsed();
        if idle > idle_timeout {
            info!(
                session_id = %session_id,
                idle_secs = idle.as_secs(),
                "session idle past timeout"
            );
            break;
        }
    }
}

/// Generate a random session id (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shell stand-in for `gdb --interpreter=mi2`: emits a startup banner,
    /// then answers every command with a console line, a result record, and
    /// the prompt. Exits on `quit`.
    const FAKE_MI: &str = r#"
echo '=thread-group-added,id="i1"'
echo '(gdb)'
while read cmd; do
  if [ "$cmd" = quit ]; then exit 0; fi
  echo "~\"got:$cmd\""
  echo '^done'
  echo '(gdb)'
done
"#;

    fn fake_config(script: &str) -> Config {
        Config {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            ..Config::default()
        }
    }

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    #[tokio::test]
    async fn send_returns_done_result() {
        init_logging();
        let session = Session::spawn(&fake_config(FAKE_MI), Duration::from_secs(300)).await.unwrap();

        let outcome = session.send("info registers").await.unwrap();
        assert!(matches!(outcome.result, Some(Record::Done { .. })));
        assert!(outcome.output.contains("got:info registers"));
        assert!(outcome.output.contains(PROMPT));

        session.close().await;
    }

    #[tokio::test]
    async fn stale_output_is_discarded() {
        init_logging();
        let session = Session::spawn(&fake_config(FAKE_MI), Duration::from_secs(300)).await.unwrap();

        let first = session.send("first-command").await.unwrap();
        assert!(first.output.contains("got:first-command"));

        let second = session.send("second-command").await.unwrap();
        assert!(second.output.contains("got:second-command"));
        assert!(!second.output.contains("got:first-command"));

        session.close().await;
    }

    #[tokio::test]
    async fn send_after_process_exit_is_unavailable() {
        init_logging();
        let session = Session::spawn(&fake_config("exit 0"), Duration::from_secs(300)).await.unwrap();

        // Give the process a moment to exit.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = session.send("info registers").await.unwrap_err();
        assert!(matches!(err, MuxError::ProcessUnavailable(_)));

        session.close().await;
    }

    #[tokio::test]
    async fn timeout_yields_partial_outcome() {
        init_logging();
        // Answers with a console line but never a result or prompt.
        let script = r#"
while read cmd; do
  echo '~"thinking"'
done
"#;
        let config = Config {
            command_timeout: Duration::from_millis(500),
            ..fake_config(script)
        };
        let session = Session::spawn(&config, Duration::from_secs(300)).await.unwrap();

        let started = Instant::now();
        let outcome = session.send("break main").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(outcome.result.is_none());
        assert!(outcome.output.contains("thinking"));

        session.close().await;
    }

    #[tokio::test]
    async fn quit_makes_process_unavailable() {
        init_logging();
        let session = Session::spawn(&fake_config(FAKE_MI), Duration::from_secs(300)).await.unwrap();

        // The stand-in exits on quit without answering; the output channel
        // closes and send returns whatever was gathered.
        let outcome = session.send("quit").await.unwrap();
        assert!(outcome.result.is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let err = session.send("info registers").await.unwrap_err();
        assert!(matches!(err, MuxError::ProcessUnavailable(_)));

        session.close().await;
    }

    #[tokio::test]
    async fn close_is_safe_when_process_already_dead() {
        init_logging();
        let session = Session::spawn(&fake_config("exit 0"), Duration::from_secs(300)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Must not hang or panic.
        session.close().await;
        session.close().await;
    }

    #[tokio::test]
    async fn close_kills_process_ignoring_quit() {
        init_logging();
        // Swallows every command, including quit.
        let script = r#"
while read cmd; do :; done
"#;
        let config = Config {
            shutdown_grace: Duration::from_millis(300),
            ..fake_config(script)
        };
        let session = Session::spawn(&config, Duration::from_secs(300)).await.unwrap();

        let started = Instant::now();
        session.close().await;
        // Graceful wait plus kill wait, both bounded by the grace period.
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
