//! Configuration — CLI flags, environment variables, config file.

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

/// Vaultwire — secure multi-user chat relay
#[derive(Parser, Debug)]
#[command(name = "vaultwire", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(long, default_value = "vaultwire.conf")]
    pub config: String,

    /// Listen port
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    pub listen_host: Option<String>,

    /// Log level
    #[arg(long)]
    pub log_level: Option<String>,

    /// Per-read buffer size, in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Seconds of inactivity before a connection is dropped
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Failed login attempts allowed before the connection is closed
    #[arg(long)]
    pub attempt_limit: Option<u32>,

    /// Path to the user store JSON file
    #[arg(long)]
    pub store_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_port: u16,
    pub listen_host: String,
    pub log_level: String,
    pub buffer_size: usize,
    pub idle_timeout_secs: u64,
    pub attempt_limit: u32,
    pub store_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 8888,
            listen_host: "127.0.0.1".into(),
            log_level: "info".into(),
            buffer_size: 2048,
            idle_timeout_secs: 240,
            attempt_limit: 3,
            store_path: None,
        }
    }
}

impl Config {
    /// Load configuration: defaults → config file → env vars → CLI flags.
    pub fn load() -> Self {
        let cli = Cli::parse();
        let mut config = Config::default();

        // 1. Config file
        let config_path = Path::new(&cli.config);
        if config_path.exists()
            && let Ok(content) = fs::read_to_string(config_path)
        {
            apply_config_file(&mut config, &content);
        }

        // 2. Environment variables
        apply_env(&mut config);

        // 3. CLI flags (highest priority)
        if let Some(v) = cli.port {
            config.listen_port = v;
        }
        if let Some(v) = cli.listen_host {
            config.listen_host = v;
        }
        if let Some(v) = cli.log_level {
            config.log_level = v;
        }
        if let Some(v) = cli.buffer_size {
            config.buffer_size = v;
        }
        if let Some(v) = cli.idle_timeout {
            config.idle_timeout_secs = v;
        }
        if let Some(v) = cli.attempt_limit {
            config.attempt_limit = v;
        }
        if let Some(v) = cli.store_path {
            config.store_path = Some(PathBuf::from(v));
        }

        config
    }

    /// Validate configuration. Returns an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_timeout_secs == 0 {
            return Err("idle_timeout must be > 0".into());
        }
        if self.attempt_limit == 0 {
            return Err("attempt_limit must be > 0".into());
        }
        if self.buffer_size == 0 {
            return Err("buffer_size must be > 0".into());
        }
        Ok(())
    }
}

fn apply_config_file(config: &mut Config, content: &str) {
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some(eq_pos) = trimmed.find('=') else {
            continue;
        };

        let key = trimmed[..eq_pos].trim();
        let mut value = trimmed[eq_pos + 1..].trim().to_string();

        // Strip quotes
        if (value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\''))
        {
            value = value[1..value.len() - 1].to_string();
        }

        match key {
            "port" | "listen_port" => {
                if let Ok(v) = value.parse() {
                    config.listen_port = v;
                }
            }
            "listen_host" | "host" => config.listen_host = value,
            "log_level" => config.log_level = value,
            "buffer_size" => {
                if let Ok(v) = value.parse() {
                    config.buffer_size = v;
                }
            }
            "idle_timeout" | "idle_timeout_secs" => {
                if let Ok(v) = value.parse() {
                    config.idle_timeout_secs = v;
                }
            }
            "attempt_limit" => {
                if let Ok(v) = value.parse() {
                    config.attempt_limit = v;
                }
            }
            "store_path" => config.store_path = Some(PathBuf::from(value)),
            _ => {}
        }
    }
}

fn apply_env(config: &mut Config) {
    if let Ok(v) = std::env::var("VAULTWIRE_PORT")
        && let Ok(p) = v.parse()
    {
        config.listen_port = p;
    }
    if let Ok(v) = std::env::var("VAULTWIRE_HOST") {
        config.listen_host = v;
    }
    if let Ok(v) = std::env::var("VAULTWIRE_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Ok(v) = std::env::var("VAULTWIRE_BUFFER_SIZE")
        && let Ok(n) = v.parse()
    {
        config.buffer_size = n;
    }
    if let Ok(v) = std::env::var("VAULTWIRE_IDLE_TIMEOUT")
        && let Ok(t) = v.parse()
    {
        config.idle_timeout_secs = t;
    }
    if let Ok(v) = std::env::var("VAULTWIRE_ATTEMPT_LIMIT")
        && let Ok(n) = v.parse()
    {
        config.attempt_limit = n;
    }
    if let Ok(v) = std::env::var("VAULTWIRE_STORE_PATH") {
        config.store_path = Some(PathBuf::from(v));
    }
}
