use std::{
    collections::VecDeque,
    os::unix::process::ExitStatusExt,
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use nix::{
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter},
    process::{self, Child},
    sync::{broadcast, mpsc, watch},
    time::{Instant, sleep},
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::{LaunchSettings, StreamLine},
    error::ServerError,
    utils::{pid_alive, signal_tree},
};

use super::{Instance, SessionKind};

const RECENT_LINES: usize = 256;
const EXIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

#[derive(Debug, Clone)]
enum SessionControl {
    Direct { stdin_tx: mpsc::Sender<String> },
    Screen { session: String },
    /// Adopted process with no reachable console.
    Detached,
}

/// Output captured from a Direct session: broadcast to subscribers and kept
/// as a bounded tail for crash classification.
#[derive(Debug)]
struct OutputCapture {
    tx: broadcast::Sender<StreamLine>,
    recent: Mutex<VecDeque<StreamLine>>,
}

impl OutputCapture {
    fn new() -> Self {
        Self {
            tx: broadcast::Sender::new(2048),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_LINES)),
        }
    }

    fn push(&self, line: StreamLine) {
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == RECENT_LINES {
                recent.pop_front();
            }
            recent.push_back(line.clone());
        }
        let _ = self.tx.send(line);
    }
}

/// A live OS process for one instance. Cloning shares the same process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: i32,
    session_id: String,
    control: SessionControl,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    output: Option<Arc<OutputCapture>>,
    shutdown: CancellationToken,
    started_at: DateTime<Utc>,
    adopted: bool,
}

impl ProcessHandle {
    /// Spawns the launch command in its own process group, wrapped per `kind`.
    pub fn spawn(
        instance: &Instance,
        launch: &LaunchSettings,
        kind: SessionKind,
    ) -> Result<Self, ServerError> {
        if !instance.root_dir.is_dir() {
            return Err(ServerError::InvalidLaunch(format!(
                "root directory {} does not exist",
                instance.root_dir.display()
            )));
        }

        let (program, args) = launch.argv();
        let mut command = match kind {
            SessionKind::Direct => {
                let mut command = process::Command::new(&program);
                command
                    .args(&args)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .stdin(Stdio::piped());
                command
            }
            SessionKind::Screen => {
                let mut command = process::Command::new("screen");
                command
                    .arg("-DmS")
                    .arg(screen_name(&instance.name))
                    .arg(&program)
                    .args(&args)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .stdin(Stdio::null());
                command
            }
        };
        command.current_dir(&instance.root_dir);
        command.process_group(0);
        apply_owner(&mut command, instance);

        let mut child = command.spawn().map_err(|source| ServerError::Spawn { source })?;
        let pid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .ok_or_else(|| ServerError::Spawn {
                source: std::io::Error::other("process exited before its pid was read"),
            })?;

        let shutdown = CancellationToken::new();
        let (control, session_id, output) = match kind {
            SessionKind::Direct => {
                let output = Arc::new(OutputCapture::new());
                let stdin_tx = setup_stream_pumps(&mut child, output.clone(), shutdown.clone())?;
                (
                    SessionControl::Direct { stdin_tx },
                    Uuid::new_v4().to_string(),
                    Some(output),
                )
            }
            SessionKind::Screen => {
                // screen -D -m does not fork, so the child pid prefixes the session id.
                let session = format!("{pid}.{}", screen_name(&instance.name));
                (
                    SessionControl::Screen {
                        session: session.clone(),
                    },
                    session,
                    None,
                )
            }
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let waiter_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let info = child.wait().await.ok().map(ExitInfo::from);
            let _ = exit_tx.send(Some(info.unwrap_or(ExitInfo {
                code: None,
                signal: None,
            })));
            waiter_shutdown.cancel();
        });

        tracing::info!(instance = %instance.name, pid, session = %session_id, "Spawned server process");

        Ok(Self {
            pid,
            session_id,
            control,
            exit_rx,
            output,
            shutdown,
            started_at: Utc::now(),
            adopted: false,
        })
    }

    /// Wraps a process that outlived a previous supervisor run.
    pub fn adopt(pid: i32, session_id: Option<String>, kind: SessionKind) -> Self {
        let (_, exit_rx) = watch::channel(None);
        let (control, session_id) = match (kind, session_id) {
            (SessionKind::Screen, Some(session)) => (
                SessionControl::Screen {
                    session: session.clone(),
                },
                session,
            ),
            (_, session) => (
                SessionControl::Detached,
                session.unwrap_or_else(|| format!("adopted-{pid}")),
            ),
        };

        Self {
            pid,
            session_id,
            control,
            exit_rx,
            output: None,
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
            adopted: true,
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_adopted(&self) -> bool {
        self.adopted
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Reaped-exit flag first, then the OS-level pid test.
    pub fn is_alive(&self) -> bool {
        self.exit_info().is_none() && pid_alive(self.pid)
    }

    /// Polls until the process is gone or `timeout` elapses.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(EXIT_POLL).await;
        }
    }

    pub async fn send_command<S: Into<String>>(&self, cmd: S) -> Result<(), ServerError> {
        let mut command = cmd.into();

        match &self.control {
            SessionControl::Direct { stdin_tx } => {
                if !command.ends_with('\n') {
                    command.push('\n');
                }
                stdin_tx
                    .send(command)
                    .await
                    .map_err(|_| ServerError::StdinWriteFailed)
            }
            SessionControl::Screen { session } => {
                let command = command.trim_end_matches('\n');
                let output = process::Command::new("screen")
                    .args(["-S", session, "-p", "0", "-X", "stuff"])
                    .arg(format!("{command}\r"))
                    .output()
                    .await
                    .map_err(|e| ServerError::SessionCommandFailed(e.to_string()))?;
                if output.status.success() {
                    Ok(())
                } else {
                    Err(ServerError::SessionCommandFailed(
                        String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    ))
                }
            }
            SessionControl::Detached => Err(ServerError::NoSession),
        }
    }

    /// SIGKILL to the process group and every descendant.
    pub fn kill_tree(&self) {
        signal_tree(self.pid, Signal::SIGKILL);
        self.shutdown.cancel();
    }

    /// SIGKILL to whatever is left in the process group once the leader
    /// has exited.
    pub fn kill_group(&self) {
        let _ = killpg(Pid::from_raw(self.pid), Signal::SIGKILL);
    }

    pub fn subscribe(&self) -> Option<BroadcastStream<StreamLine>> {
        self.output
            .as_ref()
            .map(|output| BroadcastStream::new(output.tx.subscribe()))
    }

    pub fn recent_output(&self) -> Vec<StreamLine> {
        self.output
            .as_ref()
            .and_then(|output| output.recent.lock().ok().map(|r| r.iter().cloned().collect()))
            .unwrap_or_default()
    }

    pub fn last_output_at(&self) -> Option<DateTime<Utc>> {
        self.output.as_ref().and_then(|output| {
            output
                .recent
                .lock()
                .ok()
                .and_then(|r| r.back().map(|line| line.received_at))
        })
    }
}

fn screen_name(instance: &str) -> String {
    format!("mg-{instance}")
}

fn apply_owner(command: &mut process::Command, instance: &Instance) {
    if !nix::unistd::geteuid().is_root() {
        return;
    }
    if let Some(gid) = instance.gid {
        command.gid(gid);
    }
    if let Some(uid) = instance.uid {
        command.uid(uid);
    }
}

fn setup_stream_pumps(
    child: &mut Child,
    output: Arc<OutputCapture>,
    shutdown: CancellationToken,
) -> Result<mpsc::Sender<String>, ServerError> {
    let stdout = child.stdout.take().ok_or(ServerError::NoSession)?;
    let stderr = child.stderr.take().ok_or(ServerError::NoSession)?;
    let stdin = child.stdin.take().ok_or(ServerError::NoSession)?;

    tokio::spawn(pump_lines(stdout, output.clone(), StreamLine::stdout::<String>));
    tokio::spawn(pump_lines(stderr, output, StreamLine::stderr::<String>));

    let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(1024);
    tokio::spawn(async move {
        let mut writer = BufWriter::new(stdin);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                maybe_cmd = stdin_rx.recv() => {
                    let Some(cmd) = maybe_cmd else { break };
                    if writer.write_all(cmd.as_bytes()).await.is_err()
                        || writer.flush().await.is_err()
                    {
                        break;
                    }
                }
            }
        }
    });

    Ok(stdin_tx)
}

async fn pump_lines<R>(reader: R, output: Arc<OutputCapture>, wrap: fn(String) -> StreamLine)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        output.push(wrap(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> LaunchSettings {
        LaunchSettings {
            java_path: "sh".into(),
            jar: None,
            jvm_args: vec!["-c".into(), script.into()],
            server_args: Vec::new(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn direct_session_captures_output_and_accepts_commands() {
        let dir = tempfile::tempdir().unwrap();
        let instance = Instance::new("echo", dir.path());
        let handle = ProcessHandle::spawn(
            &instance,
            &shell("echo ready; read line; echo got $line"),
            SessionKind::Direct,
        )
        .unwrap();

        handle.send_command("ping").await.unwrap();
        assert!(handle.wait_for_exit(Duration::from_secs(5)).await);
        assert_eq!(handle.exit_info().and_then(|e| e.code), Some(0));

        // Pumps may trail the exit by a moment.
        sleep(Duration::from_millis(200)).await;
        let lines: Vec<String> = handle.recent_output().into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["ready", "got ping"]);
        assert!(handle.last_output_at().is_some());
    }

    #[tokio::test]
    async fn kill_tree_terminates_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let instance = Instance::new("sleeper", dir.path());
        let handle =
            ProcessHandle::spawn(&instance, &shell("sleep 30 & wait"), SessionKind::Direct)
                .unwrap();
        assert!(handle.is_alive());

        handle.kill_tree();
        assert!(handle.wait_for_exit(Duration::from_secs(5)).await);
        assert_eq!(handle.exit_info().and_then(|e| e.signal), Some(9));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_as_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let instance = Instance::new("broken", dir.path());
        let launch = LaunchSettings {
            java_path: "/nonexistent/java".into(),
            ..Default::default()
        };
        let err = ProcessHandle::spawn(&instance, &launch, SessionKind::Direct).unwrap_err();
        assert!(matches!(err, ServerError::Spawn { .. }));
    }

    #[test]
    fn adopted_direct_process_has_no_console() {
        let handle = ProcessHandle::adopt(std::process::id() as i32, None, SessionKind::Direct);
        assert!(handle.is_adopted());
        assert!(handle.is_alive());
        assert!(handle.subscribe().is_none());
        assert_eq!(handle.session_id(), format!("adopted-{}", std::process::id()));
    }
}
