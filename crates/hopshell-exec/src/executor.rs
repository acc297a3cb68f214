//! Sequential command execution on the final hop
//!
//! Each command gets its own session channel. While it runs, three tasks make
//! progress independently: one reads channel events and waits for the exit
//! report, the other two accumulate stdout and stderr from unbounded queues,
//! so a process that floods one stream never stalls the other.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, instrument, warn};

use crate::error::{BatchFailure, ErrorKind, SshError};
use crate::result::CommandResult;
use crate::traits::{ChannelEvent, ExecChannel, Link};

/// How long a timed-out session gets to acknowledge the close request
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How the remote process ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum ExitReport {
    /// Exit status reported by the server
    Status(u32),
    /// Killed by a signal, no exit status
    Signal(String),
    /// Channel closed without status or signal
    Missing,
    /// Server refused to start the command
    Rejected,
}

/// Run `commands` one after another on `link`
///
/// Stops at the first command that cannot be completed. A non-zero exit
/// status is a normal result.
///
/// # Errors
/// Returns `BatchFailure` holding the results completed so far when a session
/// cannot be opened, the command cannot be started, the deadline passes or the
/// process ends without an exit status.
#[instrument(skip_all, fields(host = %link.host(), commands = commands.len()))]
pub async fn execute_batch<L: Link>(
    link: &L,
    commands: &[String],
    timeout_duration: Duration,
) -> Result<Vec<CommandResult>, BatchFailure> {
    let mut completed = Vec::with_capacity(commands.len());

    for (index, command) in commands.iter().enumerate() {
        match run_command(link, command, timeout_duration).await {
            Ok(result) => {
                debug!(index, exit_code = result.exit_code, "command completed");
                completed.push(result);
            }
            Err(error) => {
                warn!(index, kind = %error.kind, error = %error.message, "batch stopped");
                return Err(BatchFailure { completed, error });
            }
        }
    }

    Ok(completed)
}

/// Run a single command in a fresh session
///
/// One deadline covers opening the session, starting the command and
/// collecting its output. Only the close after a timeout may run past it, by
/// at most `CLOSE_GRACE`.
#[instrument(skip(link, limit), fields(host = %link.host()))]
async fn run_command<L: Link>(
    link: &L,
    command: &str,
    limit: Duration,
) -> Result<CommandResult, SshError> {
    let deadline = Instant::now() + limit;
    let failed = |kind: ErrorKind, message: String| {
        SshError::new(kind, message)
            .with_host(link.host())
            .with_command(command)
    };
    let timed_out = |stage: &str| {
        failed(
            ErrorKind::ConnectionTimeout,
            format!("{stage} timed out after {limit:?}"),
        )
    };

    let mut channel = match timeout_at(deadline, link.open_session()).await {
        Ok(Ok(channel)) => channel,
        Ok(Err(e)) => {
            return Err(failed(
                ErrorKind::CommandExecutionFailed,
                format!("failed to open session: {e}"),
            ));
        }
        Err(_) => return Err(timed_out("opening session")),
    };

    match timeout_at(deadline, channel.exec(command)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            channel.close().await;
            return Err(failed(
                ErrorKind::CommandExecutionFailed,
                format!("failed to start command: {e}"),
            ));
        }
        Err(_) => {
            let _ = timeout(CLOSE_GRACE, channel.close()).await;
            return Err(timed_out("starting command"));
        }
    }

    let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let mut stdout_task = tokio::spawn(drain(stdout_rx));
    let mut stderr_task = tokio::spawn(drain(stderr_rx));
    let mut wait_task = tokio::spawn(wait_for_exit(channel, stdout_tx, stderr_tx, cancel_rx));

    let joined = timeout_at(deadline, async {
        tokio::join!(&mut stdout_task, &mut stderr_task, &mut wait_task)
    })
    .await;

    let Ok((stdout, stderr, report)) = joined else {
        warn!(timeout = ?limit, "command deadline passed, closing session");
        let _ = cancel_tx.send(());
        if timeout(CLOSE_GRACE, &mut wait_task).await.is_err() {
            wait_task.abort();
        }
        stdout_task.abort();
        stderr_task.abort();
        return Err(timed_out("command"));
    };

    let task_failed = |e: JoinError| {
        failed(
            ErrorKind::CommandExecutionFailed,
            format!("output task failed: {e}"),
        )
    };
    let stdout = stdout.map_err(task_failed)?;
    let stderr = stderr.map_err(task_failed)?;
    let report = report.map_err(task_failed)?;

    let exit_code = match report {
        ExitReport::Status(status) => status.cast_signed(),
        ExitReport::Signal(signal) => {
            debug!(signal = %signal, "remote process killed by signal");
            128 + signal_number(&signal)
        }
        ExitReport::Missing => {
            return Err(failed(
                ErrorKind::CommandExecutionFailed,
                "remote command exited without exit status or exit signal".to_string(),
            ));
        }
        ExitReport::Rejected => {
            return Err(failed(
                ErrorKind::CommandExecutionFailed,
                "server rejected the exec request".to_string(),
            ));
        }
    };

    Ok(CommandResult {
        command: command.to_string(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    })
}

/// Collect chunks until every sender is gone
async fn drain(mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    let mut buf = Vec::new();
    while let Some(chunk) = rx.recv().await {
        buf.extend_from_slice(&chunk);
    }
    buf
}

enum Step {
    Cancel,
    Event(Option<ChannelEvent>),
}

/// Route channel events to the stream queues until the channel closes
///
/// Owns the channel. Dropping the senders on return ends both drains. On
/// cancel the channel is closed and the report is whatever arrived so far;
/// the caller has already given up on it by then.
async fn wait_for_exit(
    mut channel: Box<dyn ExecChannel>,
    stdout: mpsc::UnboundedSender<Vec<u8>>,
    stderr: mpsc::UnboundedSender<Vec<u8>>,
    mut cancel: oneshot::Receiver<()>,
) -> ExitReport {
    let mut status = None;
    let mut signal = None;

    loop {
        let step = tokio::select! {
            _ = &mut cancel => Step::Cancel,
            event = channel.next_event() => Step::Event(event),
        };

        match step {
            Step::Cancel => {
                channel.close().await;
                break;
            }
            Step::Event(Some(ChannelEvent::Stdout(chunk))) => {
                let _ = stdout.send(chunk);
            }
            Step::Event(Some(ChannelEvent::Stderr(chunk))) => {
                let _ = stderr.send(chunk);
            }
            Step::Event(Some(ChannelEvent::ExitStatus(code))) => status = Some(code),
            Step::Event(Some(ChannelEvent::ExitSignal(name))) => signal = Some(name),
            Step::Event(Some(ChannelEvent::Rejected)) => {
                channel.close().await;
                return ExitReport::Rejected;
            }
            // exit status may still arrive after eof
            Step::Event(Some(ChannelEvent::Eof)) => {}
            Step::Event(None) => break,
        }
    }

    match (status, signal) {
        (Some(code), _) => ExitReport::Status(code),
        (None, Some(name)) => ExitReport::Signal(name),
        (None, None) => ExitReport::Missing,
    }
}

/// POSIX number for a signal name, 0 when unknown
fn signal_number(name: &str) -> i32 {
    match name.trim_start_matches("SIG") {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "ABRT" => 6,
        "FPE" => 8,
        "KILL" => 9,
        "USR1" => 10,
        "SEGV" => 11,
        "USR2" => 12,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        _ => 0,
    }
}
