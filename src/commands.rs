// Text command surface for whatever front end drives the host. Each
// command maps onto one controller call and produces a short reply.

use crate::core::error::HostResult;
use crate::core::state::{LifecycleController, Status};

pub const HELP: &str = "\
commands:
  fetch                      refresh the version catalog
  versions                   list known versions (newest string first)
  download <version>         download the server jar for <version>
  start [max-players] [port] write server.properties and launch the server
  stop                       stop the running server
  status                     show lifecycle state
  log [lines]                show recent console output
  help                       show this message
  quit                       stop everything and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Fetch,
    Versions,
    Download(String),
    Start { max_players: String, port: String },
    Stop,
    Status,
    Log(usize),
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let mut arg = || words.next().unwrap_or("").to_string();

        let command = match head.to_ascii_lowercase().as_str() {
            "fetch" => ConsoleCommand::Fetch,
            "versions" | "list" => ConsoleCommand::Versions,
            "download" => {
                let version = arg();
                if version.is_empty() {
                    return Err("usage: download <version>".into());
                }
                ConsoleCommand::Download(version)
            }
            "start" => ConsoleCommand::Start {
                max_players: arg(),
                port: arg(),
            },
            "stop" => ConsoleCommand::Stop,
            "status" => ConsoleCommand::Status,
            "log" => ConsoleCommand::Log(arg().parse().unwrap_or(20)),
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(format!("unknown command `{other}`, try `help`")),
        };
        Ok(Some(command))
    }
}

pub async fn fetch_catalog(controller: &LifecycleController) -> HostResult<Vec<String>> {
    let entries = controller.fetch_catalog().await?;
    Ok(entries.into_iter().map(|e| e.version).collect())
}

pub async fn download(controller: &LifecycleController, version: &str) -> HostResult<String> {
    let written = controller.download(version).await?;
    Ok(format!("Downloaded Paper {version} ({written} bytes)"))
}

pub async fn start_server(
    controller: &LifecycleController,
    max_players_text: &str,
    port_text: &str,
) -> HostResult<String> {
    let pid = controller.start(max_players_text, port_text).await?;
    Ok(match pid {
        Some(pid) => format!("Server started (pid {pid})"),
        None => "Server started".to_string(),
    })
}

pub async fn stop_server(controller: &LifecycleController) -> HostResult<String> {
    controller.stop().await?;
    Ok("Server stopped".to_string())
}

pub fn describe_status(status: &Status) -> String {
    let flag = |on: bool| if on { "yes" } else { "no" };
    format!(
        "state: {}{}\njar present: {}\ncan fetch: {}  can download: {}  can start: {}  can stop: {}",
        status.state,
        status
            .pid
            .map(|pid| format!(" (pid {pid})"))
            .unwrap_or_default(),
        flag(status.artifact_present),
        flag(status.can_fetch()),
        flag(status.can_download()),
        flag(status.can_start()),
        flag(status.can_stop()),
    )
}

/// Run one command. `Quit` is left to the caller.
pub async fn execute(
    controller: &LifecycleController,
    command: ConsoleCommand,
) -> HostResult<Option<String>> {
    let reply = match command {
        ConsoleCommand::Fetch => {
            let versions = fetch_catalog(controller).await?;
            format!("{} versions available", versions.len())
        }
        ConsoleCommand::Versions => {
            let entries = controller.catalog().await?;
            if entries.is_empty() {
                "catalog is empty, run `fetch`".to_string()
            } else {
                entries
                    .iter()
                    .map(|e| format!("{} (build {})", e.version, e.build_number))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        ConsoleCommand::Download(version) => download(controller, &version).await?,
        ConsoleCommand::Start { max_players, port } => {
            start_server(controller, &max_players, &port).await?
        }
        ConsoleCommand::Stop => stop_server(controller).await?,
        ConsoleCommand::Status => describe_status(&controller.status()),
        ConsoleCommand::Log(count) => {
            let snapshot = controller.console().await?;
            let skip = snapshot.lines.len().saturating_sub(count);
            let mut out: Vec<String> = snapshot.lines[skip..]
                .iter()
                .map(|l| format!("{} {}", l.at.format("%H:%M:%S"), l.text))
                .collect();
            if snapshot.dropped > 0 {
                out.insert(0, format!("({} older lines dropped)", snapshot.dropped));
            }
            out.join("\n")
        }
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => return Ok(None),
    };
    Ok(Some(reply))
}
