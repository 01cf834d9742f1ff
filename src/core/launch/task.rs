// ─── Launch Task ───
// Spawns the Paper server as a supervised child process and tears it down.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::relay::{pump, OutputRelay};
use crate::core::error::{HostError, HostResult};

/// Fixed JVM heap bounds. Player count and port reach the server only
/// through server.properties.
const JVM_ARGS: [&str; 2] = ["-Xmx1024M", "-Xms512M"];

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ExitInfo {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
    pub success: bool,
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

/// Result of [`ProcessSupervisor::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub exit: ExitInfo,
    /// `true` when the process had to be killed.
    pub forced: bool,
}

/// Resolves once the process has exited. Cheap to clone.
#[derive(Clone)]
pub struct ExitObserver {
    rx: watch::Receiver<Option<ExitInfo>>,
}

impl ExitObserver {
    pub async fn wait(&mut self) -> ExitInfo {
        match self.rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).unwrap_or(UNKNOWN_EXIT),
            Err(_) => UNKNOWN_EXIT,
        }
    }

    pub fn try_exit(&self) -> Option<ExitInfo> {
        *self.rx.borrow()
    }
}

const UNKNOWN_EXIT: ExitInfo = ExitInfo {
    code: None,
    success: false,
};

/// Exclusive handle to one running server process.
///
/// The child itself lives in a reaper task; dropping the handle asks that
/// task to kill the process.
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    output: Option<OutputRelay>,
    exit: ExitObserver,
    kill_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The combined stdout+stderr stream. Available exactly once.
    pub fn take_output(&mut self) -> Option<OutputRelay> {
        self.output.take()
    }

    pub fn exit_observer(&self) -> ExitObserver {
        self.exit.clone()
    }

    /// Send one console command to the server.
    pub async fn send_command(&mut self, command: &str) -> HostResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| HostError::Spawn("server stdin is closed".into()))?;
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

pub struct ProcessSupervisor {
    java_bin: PathBuf,
}

impl ProcessSupervisor {
    pub fn new(java_bin: impl Into<PathBuf>) -> Self {
        Self {
            java_bin: java_bin.into(),
        }
    }

    /// Launch `java -Xmx1024M -Xms512M -jar <jar> nogui` in `working_dir`.
    pub async fn spawn(&self, jar_path: &Path, working_dir: &Path) -> HostResult<ProcessHandle> {
        let is_file = tokio::fs::metadata(jar_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(HostError::ArtifactMissing(jar_path.to_path_buf()));
        }
        let jar_path = tokio::fs::canonicalize(jar_path)
            .await
            .map_err(|e| HostError::io(jar_path, e))?;

        // stdout and stderr share one pipe so the child's own write order
        // is what the relay sees.
        let (output, output_writer) = std::io::pipe()
            .map_err(|e| HostError::Spawn(format!("could not create output pipe: {e}")))?;
        let error_writer = output_writer
            .try_clone()
            .map_err(|e| HostError::Spawn(format!("could not create output pipe: {e}")))?;

        let mut cmd = Command::new(&self.java_bin);
        cmd.args(JVM_ARGS);
        cmd.arg("-jar").arg(&jar_path).arg("nogui");
        cmd.current_dir(working_dir);
        cmd.stdin(Stdio::piped());
        cmd.stdout(output_writer);
        cmd.stderr(error_writer);
        cmd.kill_on_drop(true);
        configure_platform_spawn(&mut cmd);

        info!("Launching Paper server with Java: {:?}", self.java_bin);
        debug!("Command (copy/paste): {}", format_command_for_logs(&cmd));

        let spawned = cmd.spawn();
        // Releases our copies of the write ends; the relay ends when the
        // child's copies close.
        drop(cmd);
        let mut child =
            spawned.map_err(|e| HostError::Spawn(format!("{:?}: {e}", self.java_bin)))?;
        let pid = child.id();

        let (line_tx, relay) = OutputRelay::channel();
        pump(output, line_tx);
        let stdin = child.stdin.take();

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::channel(1);
        tokio::spawn(reap(child, kill_rx, exit_tx));

        info!("Paper server running (pid {:?})", pid);
        Ok(ProcessHandle {
            pid,
            stdin,
            output: Some(relay),
            exit: ExitObserver { rx: exit_rx },
            kill_tx,
        })
    }

    /// Stop the process. With `grace` set, `stop` is written to the
    /// server console first and the process gets that long to exit on its
    /// own; otherwise, or on timeout, it is killed outright.
    pub async fn terminate(mut handle: ProcessHandle, grace: Option<Duration>) -> Termination {
        if let Some(exit) = handle.exit.try_exit() {
            return Termination {
                exit,
                forced: false,
            };
        }

        if let Some(grace) = grace {
            match handle.send_command("stop").await {
                Ok(()) => {
                    let mut observer = handle.exit.clone();
                    match tokio::time::timeout(grace, observer.wait()).await {
                        Ok(exit) => {
                            info!("Server shut down cleanly ({:?})", exit.code);
                            return Termination {
                                exit,
                                forced: false,
                            };
                        }
                        Err(_) => warn!(
                            "Server ignored stop for {}s, killing pid {:?}",
                            grace.as_secs(),
                            handle.pid
                        ),
                    }
                }
                Err(e) => warn!("Could not send stop to server: {}", e),
            }
        }

        // A closed channel means the reaper already saw the exit.
        let _ = handle.kill_tx.try_send(());
        let exit = handle.exit.wait().await;
        info!("Killed server pid {:?}", handle.pid);
        Termination { exit, forced: true }
    }
}

/// Own the child until it exits or a kill is requested (or the handle goes
/// away), then publish the exit status.
async fn reap(
    mut child: Child,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx.recv() => {
            if let Err(e) = child.start_kill() {
                warn!("Kill request failed: {}", e);
            }
            child.wait().await
        }
    };

    let exit = match status {
        Ok(status) => ExitInfo::from(status),
        Err(e) => {
            warn!("Failed while waiting for server process: {}", e);
            UNKNOWN_EXIT
        }
    };
    debug!("Server process exited: {:?}", exit);
    let _ = exit_tx.send(Some(exit));
}

fn configure_platform_spawn(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        // Headless host: keep the JVM from opening a console window.
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

fn format_command_for_logs(cmd: &Command) -> String {
    let cmd = cmd.as_std();
    let program = shell_escape(&cmd.get_program().to_string_lossy());
    let args = cmd
        .get_args()
        .map(|arg| shell_escape(&arg.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ");

    if args.is_empty() {
        program
    } else {
        format!("{} {}", program, args)
    }
}

fn shell_escape(raw: &str) -> String {
    if raw.is_empty() {
        return "\"\"".to_string();
    }

    if raw.chars().all(|ch| {
        ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '\\' | '=')
    }) {
        return raw.to_string();
    }

    format!("\"{}\"", raw.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::test_support::{fake_java, scratch_dir};

    #[tokio::test]
    async fn spawn_refuses_missing_jar() {
        let dir = scratch_dir("spawn-missing");
        let supervisor = ProcessSupervisor::new("java");

        let err = supervisor
            .spawn(&dir.join("paper_server.jar"), &dir)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, HostError::ArtifactMissing(_)));
        assert_eq!(err.kind(), ErrorKind::Launch);
    }

    #[test]
    fn command_line_is_fixed() {
        let mut cmd = Command::new("java");
        cmd.args(JVM_ARGS).arg("-jar").arg("/srv/paper_server.jar").arg("nogui");
        assert_eq!(
            format_command_for_logs(&cmd),
            "java -Xmx1024M -Xms512M -jar /srv/paper_server.jar nogui"
        );
        assert_eq!(shell_escape("a b"), "\"a b\"");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interleaved_stdout_and_stderr_keep_write_order() {
        let dir = scratch_dir("spawn-output");
        std::fs::write(dir.join("paper_server.jar"), b"jar").unwrap();
        let java = fake_java(
            &dir,
            "echo \"args: $*\"\ni=0\nwhile [ $i -lt 300 ]; do\n  echo out-$i\n  echo err-$i 1>&2\n  i=$((i+1))\ndone\nexit 3",
        );

        let mut handle = ProcessSupervisor::new(&java)
            .spawn(&dir.join("paper_server.jar"), &dir)
            .await
            .unwrap();
        let mut relay = handle.take_output().unwrap();
        assert!(handle.take_output().is_none());

        let mut lines = Vec::new();
        while let Some(line) = relay.next_line().await {
            lines.push(line);
        }
        assert!(lines[0].starts_with("args: -Xmx1024M -Xms512M -jar /"));
        assert!(lines[0].ends_with("paper_server.jar nogui"));

        let expected: Vec<String> = (0..300)
            .flat_map(|i| [format!("out-{i}"), format!("err-{i}")])
            .collect();
        assert_eq!(lines[1..], expected[..]);

        let exit = handle.exit_observer().wait().await;
        assert_eq!(exit.code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn graceful_stop_goes_through_stdin() {
        let dir = scratch_dir("spawn-graceful");
        std::fs::write(dir.join("paper_server.jar"), b"jar").unwrap();
        let java = fake_java(
            &dir,
            "echo ready\nwhile read cmd; do\n  if [ \"$cmd\" = stop ]; then echo bye; exit 0; fi\ndone",
        );

        let mut handle = ProcessSupervisor::new(&java)
            .spawn(&dir.join("paper_server.jar"), &dir)
            .await
            .unwrap();
        let mut relay = handle.take_output().unwrap();
        assert_eq!(relay.next_line().await.as_deref(), Some("ready"));

        let termination =
            ProcessSupervisor::terminate(handle, Some(Duration::from_secs(5))).await;
        assert!(!termination.forced);
        assert_eq!(termination.exit.code, Some(0));
        assert_eq!(relay.next_line().await.as_deref(), Some("bye"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forced_stop_kills_immediately() {
        let dir = scratch_dir("spawn-forced");
        std::fs::write(dir.join("paper_server.jar"), b"jar").unwrap();
        let java = fake_java(&dir, "echo ready\nexec sleep 30");

        let mut handle = ProcessSupervisor::new(&java)
            .spawn(&dir.join("paper_server.jar"), &dir)
            .await
            .unwrap();
        let mut relay = handle.take_output().unwrap();
        assert_eq!(relay.next_line().await.as_deref(), Some("ready"));

        let termination = ProcessSupervisor::terminate(handle, None).await;
        assert!(termination.forced);
        assert!(!termination.exit.success);
        assert_eq!(relay.next_line().await, None);
    }
}
