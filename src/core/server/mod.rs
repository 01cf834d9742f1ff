pub mod properties;

pub use properties::{write_server_config, ServerConfig, EULA_FILE, PROPERTIES_FILE};
