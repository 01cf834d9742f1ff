// ─── Server Configuration ───
// Materializes server.properties and eula.txt before every start.

use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::core::error::{HostError, HostResult};

pub const PROPERTIES_FILE: &str = "server.properties";
pub const EULA_FILE: &str = "eula.txt";

const DEFAULT_MAX_PLAYERS: u32 = 10;
const DEFAULT_PORT: u16 = 25565;
const MOTD: &str = "A PaperMC Server";

/// User-tunable part of server.properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ServerConfig {
    pub max_players: u32,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_players: DEFAULT_MAX_PLAYERS,
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Parse raw text fields, never rejecting the request. Each field is
    /// trimmed first. Empty or non-numeric text falls back to the default,
    /// and so does a number the field type cannot hold: a negative player
    /// count, a port above 65535, or a player count above `u32::MAX`.
    pub fn from_input(max_players_text: &str, port_text: &str) -> Self {
        Self {
            max_players: max_players_text
                .trim()
                .parse()
                .unwrap_or(DEFAULT_MAX_PLAYERS),
            port: port_text.trim().parse().unwrap_or(DEFAULT_PORT),
        }
    }

    pub fn render_properties(&self) -> String {
        format!(
            "#Minecraft server properties\n\
             max-players={}\n\
             server-port={}\n\
             online-mode=true\n\
             motd={MOTD}\n\
             white-list=false\n\
             difficulty=easy\n\
             gamemode=survival\n",
            self.max_players, self.port
        )
    }
}

/// Write `server.properties` (always) and `eula.txt` (only when absent).
pub async fn write_server_config(config: &ServerConfig, server_dir: &Path) -> HostResult<()> {
    tokio::fs::create_dir_all(server_dir)
        .await
        .map_err(|e| HostError::io(server_dir, e))?;

    let properties_path = server_dir.join(PROPERTIES_FILE);
    tokio::fs::write(&properties_path, config.render_properties())
        .await
        .map_err(|e| HostError::io(&properties_path, e))?;
    debug!(
        "Wrote {:?} (max-players={}, server-port={})",
        properties_path, config.max_players, config.port
    );

    let eula_path = server_dir.join(EULA_FILE);
    // create_new: a prior acceptance is never touched.
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&eula_path)
        .await
    {
        Ok(mut file) => {
            file.write_all(b"eula=true\n")
                .await
                .map_err(|e| HostError::io(&eula_path, e))?;
            file.flush().await.map_err(|e| HostError::io(&eula_path, e))?;
            info!("Accepted EULA at {:?}", eula_path);
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            debug!("Keeping existing {:?}", eula_path);
        }
        Err(e) => return Err(HostError::io(&eula_path, e)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::scratch_dir;

    #[test]
    fn non_numeric_input_falls_back_to_defaults() {
        let config = ServerConfig::from_input("abc", "");
        assert_eq!(config.max_players, 10);
        assert_eq!(config.port, 25565);
    }

    #[test]
    fn out_of_range_numbers_fall_back() {
        assert_eq!(ServerConfig::from_input("20", "70000").port, 25565);
        assert_eq!(ServerConfig::from_input("20", "-25565").port, 25565);
        assert_eq!(ServerConfig::from_input("-1", "25570").max_players, 10);
        assert_eq!(ServerConfig::from_input("4294967296", "").max_players, 10);
        assert_eq!(
            ServerConfig::from_input(" 20 ", "25570"),
            ServerConfig {
                max_players: 20,
                port: 25570
            }
        );
    }

    #[test]
    fn fixed_lines_are_literal() {
        let rendered = ServerConfig::default().render_properties();
        assert!(rendered.starts_with("#Minecraft server properties\n"));
        assert!(rendered.contains("\nmotd=A PaperMC Server\n"));
        assert!(rendered.contains("\nonline-mode=true\n"));
    }

    #[test]
    fn properties_keep_fixed_key_order() {
        let rendered = ServerConfig {
            max_players: 4,
            port: 25000,
        }
        .render_properties();
        let keys: Vec<&str> = rendered
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| l.split('=').next().unwrap())
            .collect();
        assert_eq!(
            keys,
            vec![
                "max-players",
                "server-port",
                "online-mode",
                "motd",
                "white-list",
                "difficulty",
                "gamemode"
            ]
        );
        assert!(rendered.contains("max-players=4\n"));
        assert!(rendered.contains("server-port=25000\n"));
    }

    #[tokio::test]
    async fn writes_defaults_and_accepts_eula() {
        let dir = scratch_dir("config-defaults").join("papermc_server");
        write_server_config(&ServerConfig::from_input("abc", ""), &dir)
            .await
            .unwrap();

        let props = std::fs::read_to_string(dir.join(PROPERTIES_FILE)).unwrap();
        assert!(props.contains("max-players=10\n"));
        assert!(props.contains("server-port=25565\n"));
        assert_eq!(
            std::fs::read_to_string(dir.join(EULA_FILE)).unwrap(),
            "eula=true\n"
        );
    }

    #[tokio::test]
    async fn existing_eula_is_never_overwritten() {
        let dir = scratch_dir("config-eula");
        std::fs::write(dir.join(EULA_FILE), "#accepted by hand\neula=true\n").unwrap();

        write_server_config(&ServerConfig::default(), &dir)
            .await
            .unwrap();
        write_server_config(&ServerConfig::default(), &dir)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.join(EULA_FILE)).unwrap(),
            "#accepted by hand\neula=true\n"
        );
    }
}
