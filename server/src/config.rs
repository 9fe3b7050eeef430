use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags actually given override lower layers.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "courier-server", version, about = "Courier message gateway")]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, session key)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// bcrypt work factor for new password hashes
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcrypt_cost: Option<u32>,

    /// Session token lifetime in seconds
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_ttl_secs: Option<u64>,

    /// Disconnect peers silent for this many seconds
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,

    /// Per-frame write deadline in seconds
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_timeout_secs: Option<u64>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    pub bcrypt_cost: u32,
    pub session_ttl_secs: u64,
    pub idle_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8081,
            bind_address: "0.0.0.0".to_string(),
            config: "./courier.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            session_ttl_secs: 3600,
            idle_timeout_secs: 90,
            write_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COURIER_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Cli::parse()).extract()
    }

    /// Build the layered provider stack for the given CLI flags.
    pub fn figment(cli: Cli) -> Figment {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("COURIER_"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Courier Message Gateway Configuration
# Place this file at ./courier.toml or specify with --config <path>
# All settings can be overridden via environment variables (COURIER_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8081)
# port = 8081

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite credential database and session signing key
# data_dir = "./data"

# bcrypt work factor for new password hashes (4-31, default: 12)
# bcrypt_cost = 12

# Session token lifetime in seconds (default: 3600 = 1 hour)
# session_ttl_secs = 3600

# Disconnect a peer that sends nothing, not even a pong, for this long
# idle_timeout_secs = 90

# Deadline for writing a single outbound frame
# write_timeout_secs = 10
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            config: Some(dir.path().join("missing.toml").display().to_string()),
            ..Cli::default()
        };
        let config: Config = Config::figment(cli).extract().unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_toml_then_cli_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "port = 9000\nsession_ttl_secs = 60\nbcrypt_cost = 6\n").unwrap();

        let cli = Cli {
            config: Some(path.display().to_string()),
            bcrypt_cost: Some(8),
            ..Cli::default()
        };
        let config: Config = Config::figment(cli).extract().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.session_ttl_secs, 60);
        assert_eq!(config.bcrypt_cost, 8);
        assert_eq!(config.data_dir, "./data");
    }

    #[test]
    fn test_template_is_valid_toml() {
        let parsed: Result<Config, _> = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(&generate_config_template()))
            .extract();
        assert_eq!(parsed.unwrap(), Config::default());
    }
}
