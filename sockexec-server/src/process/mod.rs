//! Process supervision
//!
//! Each session owns one [`ProcessSupervisor`]. It runs at most one child at
//! a time: starting a command while another is running kills the old one
//! first and waits until its final `status` message has been queued, so the
//! output of two commands never interleaves.

mod config;
mod output;

use std::process::ExitStatus;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sockexec_protocol::Message;
use sockexec_utils::SockexecError;

pub use config::ProcessConfig;
pub use output::{forward_output, OutputStream, Utf8ChunkDecoder};

/// Stdin chunks queued per child before further input is dropped
const STDIN_QUEUE: usize = 64;

/// Handle to the task watching one child
pub struct MonitorHandle {
    /// Token asking the monitor to kill its child
    pub cancel_token: CancellationToken,
    /// Handle to the spawned task
    pub join_handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Kill the child and wait until the monitor has finished
    pub async fn stop(self) {
        self.cancel_token.cancel();
        let _ = self.join_handle.await;
    }

    /// Whether the monitor (and so the child) is still alive
    pub fn is_running(&self) -> bool {
        !self.join_handle.is_finished()
    }
}

struct RunningProcess {
    command: String,
    pid: Option<u32>,
    /// Queue feeding the child's stdin; the session never writes the pipe itself
    stdin: Option<mpsc::Sender<String>>,
    stdin_task: Option<JoinHandle<()>>,
    monitor: MonitorHandle,
}

impl RunningProcess {
    /// Kill the child, wait for its monitor and drop pending input
    async fn stop(self) {
        if let Some(task) = &self.stdin_task {
            task.abort();
        }
        self.monitor.stop().await;
    }
}

/// Runs command lines for one session
pub struct ProcessSupervisor {
    config: ProcessConfig,
    outbound: mpsc::Sender<Message>,
    current: Option<RunningProcess>,
}

impl ProcessSupervisor {
    pub fn new(config: ProcessConfig, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            config,
            outbound,
            current: None,
        }
    }

    /// Whether a child is currently running
    pub fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .map_or(false, |process| process.monitor.is_running())
    }

    /// Command line of the running child
    pub fn current_command(&self) -> Option<&str> {
        self.current
            .as_ref()
            .filter(|process| process.monitor.is_running())
            .map(|process| process.command.as_str())
    }

    /// OS process id of the running child
    pub fn current_pid(&self) -> Option<u32> {
        self.current
            .as_ref()
            .filter(|process| process.monitor.is_running())
            .and_then(|process| process.pid)
    }

    /// Run a command line, replacing any running child
    pub async fn run_command(&mut self, command_line: &str) {
        if let Some(previous) = self.current.take() {
            if previous.monitor.is_running() {
                info!(command = %previous.command, "Killing running process for new command");
            }
            previous.stop().await;
        }

        let mut child = match self.config.build(command_line).spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = SockexecError::ProcessSpawn(e.to_string());
                warn!(command = %command_line, "{}", err);
                let _ = self.outbound.send(Message::stderr(err.to_string())).await;
                let _ = self
                    .outbound
                    .send(Message::status(format!(
                        "Process \"{}\" failed to start: {}",
                        command_line, e
                    )))
                    .await;
                return;
            }
        };

        let pid = child.id();
        info!(command = %command_line, pid, "Process started");

        let (stdin, stdin_task) = match child.stdin.take() {
            Some(pipe) => {
                let (tx, rx) = mpsc::channel(STDIN_QUEUE);
                let task = tokio::spawn(feed_stdin(pipe, rx, command_line.to_string()));
                (Some(tx), Some(task))
            }
            None => (None, None),
        };
        let cancel_token = CancellationToken::new();
        let join_handle = tokio::spawn(monitor(
            child,
            command_line.to_string(),
            self.outbound.clone(),
            cancel_token.clone(),
        ));

        self.current = Some(RunningProcess {
            command: command_line.to_string(),
            pid,
            stdin,
            stdin_task,
            monitor: MonitorHandle {
                cancel_token,
                join_handle,
            },
        });
    }

    /// Queue input for the running child
    ///
    /// Never waits on the pipe: a child that does not read its stdin cannot
    /// stall the session. Input arriving while no child runs, or while the
    /// queue is full, is dropped.
    pub fn write_stdin(&mut self, data: &str) {
        let process = match self.current.as_mut() {
            Some(process) if process.monitor.is_running() => process,
            _ => {
                debug!(bytes = data.len(), "Dropping stdin, no running process");
                return;
            }
        };

        let Some(stdin) = process.stdin.as_ref() else {
            debug!(command = %process.command, "Dropping stdin, pipe already closed");
            return;
        };

        match stdin.try_send(data.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(command = %process.command, bytes = data.len(), "Stdin queue full, dropping input");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(command = %process.command, "Dropping stdin, pipe already closed");
                process.stdin = None;
            }
        }
    }

    /// Kill the running child, if any, and wait for its monitor
    pub async fn stop(&mut self) {
        if let Some(process) = self.current.take() {
            debug!(command = %process.command, "Stopping process");
            process.stop().await;
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(process) = &self.current {
            if let Some(task) = &process.stdin_task {
                task.abort();
            }
            process.monitor.cancel_token.cancel();
        }
    }
}

/// Write queued input to the child until the queue or the pipe closes
async fn feed_stdin(mut pipe: ChildStdin, mut rx: mpsc::Receiver<String>, command: String) {
    while let Some(data) = rx.recv().await {
        let result = async {
            pipe.write_all(data.as_bytes()).await?;
            pipe.flush().await
        }
        .await;

        if let Err(e) = result {
            debug!(command = %command, "Stdin pipe closed: {}", e);
            return;
        }
    }
}

/// Watch one child until it exits or is cancelled
///
/// Queues exactly one `status` message describing the exit.
async fn monitor(
    mut child: Child,
    command: String,
    outbound: mpsc::Sender<Message>,
    cancel_token: CancellationToken,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out_tx = outbound.clone();
    let err_tx = outbound.clone();
    let forwarders = async move {
        let out = async move {
            if let Some(stdout) = stdout {
                forward_output(stdout, OutputStream::Stdout, out_tx).await;
            }
        };
        let err = async move {
            if let Some(stderr) = stderr {
                forward_output(stderr, OutputStream::Stderr, err_tx).await;
            }
        };
        tokio::join!(out, err);
    };

    // Pipes close once the child (and anything holding them) exits. The child
    // can outlive its pipes, so waiting stays cancellable too.
    let exited = tokio::select! {
        _ = forwarders => {
            tokio::select! {
                status = child.wait() => Some(status),
                _ = cancel_token.cancelled() => None,
            }
        }
        _ = cancel_token.cancelled() => None,
    };

    let status = match exited {
        Some(status) => status,
        None => {
            kill_process_group(&child);
            if let Err(e) = child.start_kill() {
                debug!(command = %command, "start_kill failed: {}", e);
            }
            child.wait().await
        }
    };

    let text = match status {
        Ok(status) => describe_exit(&command, status),
        Err(e) => format!("Process \"{}\" could not be reaped: {}", command, e),
    };
    info!(command = %command, "{}", text);

    // The session may already be gone
    let _ = outbound.send(Message::status(text)).await;
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };

    // SAFETY: kill() has no memory-safety preconditions
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, "killpg failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Text of the `status` message sent when a child exits
pub fn describe_exit(command: &str, status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Process \"{}\" exited with code {}", command, code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Process \"{}\" terminated by signal {}", command, signal);
        }
    }

    format!("Process \"{}\" exited", command)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use sockexec_protocol::MessageType;
    use std::time::Duration;

    fn supervisor(buffer: usize) -> (ProcessSupervisor, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(buffer);
        (ProcessSupervisor::new(ProcessConfig::new("/bin/sh"), tx), rx)
    }

    /// Collect messages up to and including the next `status`
    async fn until_status(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut messages = Vec::new();
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for status")
                .expect("channel closed");
            let done = msg.kind == MessageType::Status;
            messages.push(msg);
            if done {
                return messages;
            }
        }
    }

    fn joined(messages: &[Message], kind: MessageType) -> String {
        messages
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.data.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_stdout_stderr_and_exit_code() {
        let (mut sup, mut rx) = supervisor(16);
        sup.run_command("echo A && echo B 1>&2").await;

        let messages = until_status(&mut rx).await;
        assert_eq!(joined(&messages, MessageType::Stdout), "A\n");
        assert_eq!(joined(&messages, MessageType::Stderr), "B\n");
        assert_eq!(
            messages.last().unwrap().data,
            "Process \"echo A && echo B 1>&2\" exited with code 0"
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let (mut sup, mut rx) = supervisor(16);
        sup.run_command("exit 3").await;

        let messages = until_status(&mut rx).await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].data.ends_with("exited with code 3"));
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_new_command_kills_previous() {
        let (mut sup, mut rx) = supervisor(16);
        sup.run_command("sleep 30").await;
        assert!(sup.is_running());
        assert_eq!(sup.current_command(), Some("sleep 30"));

        sup.run_command("echo second").await;

        let first = until_status(&mut rx).await;
        assert_eq!(first.len(), 1);
        assert_eq!(
            first[0].data,
            format!("Process \"sleep 30\" terminated by signal {}", libc::SIGKILL)
        );

        let second = until_status(&mut rx).await;
        assert_eq!(joined(&second, MessageType::Stdout), "second\n");
        assert!(second.last().unwrap().data.ends_with("exited with code 0"));
    }

    #[tokio::test]
    async fn test_kill_reaches_whole_pipeline() {
        let (mut sup, mut rx) = supervisor(16);
        // Background grandchild keeps the stdout pipe open
        sup.run_command("sleep 30 & sleep 30").await;
        sup.stop().await;

        let messages = until_status(&mut rx).await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].data.contains("terminated by signal"));
    }

    #[tokio::test]
    async fn test_stdin_forwarded() {
        let (mut sup, mut rx) = supervisor(16);
        sup.run_command("read line; echo got:$line").await;
        sup.write_stdin("hello\n");

        let messages = until_status(&mut rx).await;
        assert_eq!(joined(&messages, MessageType::Stdout), "got:hello\n");
    }

    #[tokio::test]
    async fn test_stdin_to_non_reading_child_does_not_block() {
        let (mut sup, mut rx) = supervisor(16);
        sup.run_command("sleep 30").await;

        // Far more than a pipe buffer holds
        let chunk = "x".repeat(256 * 1024);
        for _ in 0..4 {
            sup.write_stdin(&chunk);
        }

        tokio::time::timeout(Duration::from_secs(5), sup.run_command("echo hi"))
            .await
            .expect("replacing the command blocked on stdin");

        let first = until_status(&mut rx).await;
        assert!(first[0].data.contains("terminated by signal"), "{}", first[0].data);
        let second = until_status(&mut rx).await;
        assert_eq!(joined(&second, MessageType::Stdout), "hi\n");
    }

    #[tokio::test]
    async fn test_stdin_queue_full_drops_input() {
        let (mut sup, _rx) = supervisor(16);
        sup.run_command("sleep 30").await;

        let chunk = "x".repeat(4096);
        for _ in 0..(STDIN_QUEUE * 4) {
            sup.write_stdin(&chunk);
        }
        assert!(sup.is_running());
        sup.stop().await;
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_replaced_command_output_stops_before_next() {
        let (mut sup, mut rx) = supervisor(16);

        // Drain concurrently; `yes` fills any bounded queue
        let collector = tokio::spawn(async move {
            let mut messages = Vec::new();
            let mut statuses = 0;
            while let Some(msg) = rx.recv().await {
                if msg.kind == MessageType::Status {
                    statuses += 1;
                }
                messages.push(msg);
                if statuses == 2 {
                    break;
                }
            }
            messages
        });

        sup.run_command("yes").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        sup.run_command("echo second").await;

        let messages = tokio::time::timeout(Duration::from_secs(10), collector)
            .await
            .expect("timed out waiting for both statuses")
            .unwrap();

        let first_status = messages
            .iter()
            .position(|m| m.kind == MessageType::Status)
            .unwrap();
        assert!(messages[first_status].data.starts_with("Process \"yes\" terminated by signal"));
        assert!(joined(&messages[..first_status], MessageType::Stdout).starts_with("y\n"));

        let after = &messages[first_status + 1..];
        assert_eq!(joined(after, MessageType::Stdout), "second\n");
        assert!(after.last().unwrap().data.ends_with("exited with code 0"));
    }

    #[tokio::test]
    async fn test_stdin_while_idle_is_dropped() {
        let (mut sup, mut rx) = supervisor(16);
        sup.write_stdin("ignored\n");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sup = ProcessSupervisor::new(ProcessConfig::new("/nonexistent/shell"), tx);
        sup.run_command("ls").await;

        let stderr = rx.recv().await.unwrap();
        assert_eq!(stderr.kind, MessageType::Stderr);
        assert!(stderr.data.starts_with("Failed to spawn process:"));
        let status = rx.recv().await.unwrap();
        assert_eq!(status.kind, MessageType::Status);
        assert!(status.data.starts_with("Process \"ls\" failed to start:"));
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_exactly_one_status_per_child() {
        let (mut sup, mut rx) = supervisor(64);
        for i in 0..3 {
            sup.run_command(&format!("echo run{}", i)).await;
            let messages = until_status(&mut rx).await;
            assert_eq!(joined(&messages, MessageType::Stdout), format!("run{}\n", i));
        }
        sup.stop().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_backpressure_does_not_lose_output() {
        // Tiny queue; output must wait for the reader rather than drop
        let (mut sup, mut rx) = supervisor(1);
        sup.run_command("i=0; while [ $i -lt 200 ]; do echo line$i; i=$((i+1)); done")
            .await;

        let messages = until_status(&mut rx).await;
        let stdout = joined(&messages, MessageType::Stdout);
        assert_eq!(stdout.lines().count(), 200);
        assert!(stdout.ends_with("line199\n"));
    }
}
