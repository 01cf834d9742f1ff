pub mod commands;
pub mod core;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::ConsoleCommand;
use crate::core::error::HostResult;
use crate::core::http::build_http_client;
use crate::core::state::{
    HostPaths, HostSettings, LifecycleController, LifecycleEvent, NoticeLevel,
};

/// Headless front end: reads commands from stdin and prints lifecycle
/// events. `--json` switches event output to one JSON object per line.
pub async fn run() -> HostResult<()> {
    // Logs go to stderr so stdout carries only server output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,paper_host_lib=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("PaperHost starting...");
    let json = std::env::args().any(|arg| arg == "--json");

    let paths = HostPaths::from_env();
    let settings = HostSettings::load(&paths);
    match paths.settings_path() {
        Ok(path) if !path.exists() => {
            if let Err(e) = settings.save(&paths) {
                warn!("Could not write default settings: {}", e);
            }
        }
        Ok(_) => {}
        Err(e) => warn!("{}; downloads and launches will fail", e),
    }

    let client = build_http_client()?;
    let (controller, mut events) = LifecycleController::spawn(paths, settings, client);

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some((target, line)) = render_event(&event, json) {
                        write_line(target, &line).await;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    let line = format!("[console] output too fast, {skipped} events skipped");
                    write_line(Target::Stderr, &line).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Populate the catalog right away, as the UI would on launch.
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            let _ = controller.fetch_catalog().await;
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                write_line(Target::Stderr, &message).await;
                continue;
            }
        };

        // Long commands must not hold up the next one (e.g. stop during a download).
        let controller = controller.clone();
        tokio::spawn(async move {
            match commands::execute(&controller, command).await {
                Ok(Some(reply)) => write_line(Target::Stderr, &reply).await,
                Ok(None) => {}
                Err(e) => write_line(Target::Stderr, &format!("error: {e}")).await,
            }
        });
    }

    controller.shutdown().await;
    drop(controller);
    let _ = printer.await;
    info!("PaperHost stopped");
    Ok(())
}

/// Server output goes to stdout; everything the host says goes to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Stdout,
    Stderr,
}

async fn write_line(target: Target, line: &str) {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    let result = match target {
        Target::Stdout => {
            let mut out = tokio::io::stdout();
            match out.write_all(&buf).await {
                Ok(()) => out.flush().await,
                Err(e) => Err(e),
            }
        }
        Target::Stderr => {
            let mut out = tokio::io::stderr();
            match out.write_all(&buf).await {
                Ok(()) => out.flush().await,
                Err(e) => Err(e),
            }
        }
    };
    if let Err(e) = result {
        warn!("Could not write to {:?}: {}", target, e);
    }
}

fn render_event(event: &LifecycleEvent, json: bool) -> Option<(Target, String)> {
    if json {
        return match serde_json::to_string(event) {
            Ok(line) => Some((Target::Stdout, line)),
            Err(e) => {
                warn!("Could not encode event: {}", e);
                None
            }
        };
    }

    let line = match event {
        LifecycleEvent::Output { line } => return Some((Target::Stdout, line.clone())),
        LifecycleEvent::StateChanged { state } => format!("[state] {state}"),
        LifecycleEvent::CatalogUpdated { versions } => {
            format!("[catalog] {} versions", versions.len())
        }
        LifecycleEvent::DownloadProgress(progress) => match progress.total_bytes {
            Some(total) if total > 0 => format!(
                "[download] {} {}%",
                progress.file_name,
                progress.bytes_downloaded * 100 / total
            ),
            _ => format!(
                "[download] {} {} bytes",
                progress.file_name, progress.bytes_downloaded
            ),
        },
        LifecycleEvent::LogTruncated { dropped } => {
            format!("[console] history full, {dropped} lines dropped")
        }
        LifecycleEvent::Notice { level, message } => {
            let tag = match level {
                NoticeLevel::Info => "info",
                NoticeLevel::Warn => "warn",
                NoticeLevel::Error => "error",
            };
            format!("[{tag}] {message}")
        }
        LifecycleEvent::ProcessExited { code } => match code {
            Some(code) => format!("[runtime] server exited with code {code}"),
            None => "[runtime] server terminated".to_string(),
        },
        LifecycleEvent::ProcessStopped { forced } => {
            if *forced {
                "[runtime] server killed".to_string()
            } else {
                "[runtime] server shut down".to_string()
            }
        }
        LifecycleEvent::Shutdown => "[state] shut down".to_string(),
    };
    Some((Target::Stderr, line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::LifecycleState;

    #[test]
    fn server_output_goes_to_stdout_and_host_messages_to_stderr() {
        let output = LifecycleEvent::Output {
            line: "Done (3.2s)!".into(),
        };
        assert_eq!(
            render_event(&output, false),
            Some((Target::Stdout, "Done (3.2s)!".to_string()))
        );

        let state = LifecycleEvent::StateChanged {
            state: LifecycleState::Running,
        };
        assert_eq!(
            render_event(&state, false),
            Some((Target::Stderr, "[state] running".to_string()))
        );
    }

    #[test]
    fn json_mode_emits_tagged_objects_on_stdout() {
        let event = LifecycleEvent::ProcessExited { code: Some(1) };
        let (target, line) = render_event(&event, true).unwrap();
        assert_eq!(target, Target::Stdout);
        assert_eq!(line, r#"{"event":"process_exited","code":1}"#);
    }
}
