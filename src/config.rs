//! Configuration module for pingboard.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 3001)
    pub http_port: u16,
    /// Path to the JSON target list (default: "data/targets.json")
    pub data_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 3001,
            data_path: "data/targets.json".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGBOARD_HTTP_PORT`: HTTP port (default: 3001)
    /// - `PINGBOARD_DATA_PATH`: target list file path (default: "data/targets.json")
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("PINGBOARD_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(data_path) = env::var("PINGBOARD_DATA_PATH") {
            cfg.data_path = data_path;
        }

        cfg
    }
}
