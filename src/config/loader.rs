use std::path::Path;

use super::database::DatabaseConfig;
use super::types::Config;

const CONFIG_FILE: &str = "config.json";

/// Load configuration: `config.json` if present, then environment
/// overrides, falling back to code defaults. Never fails; a broken file
/// is reported and ignored.
pub fn load() -> Config {
    let mut config = load_file(Path::new(CONFIG_FILE)).unwrap_or_default();
    apply_env_overrides(&mut config);
    config
}

fn load_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => Some(config),
            Err(err) => {
                eprintln!("Ignoring malformed {}: {err}", path.display());
                None
            }
        },
        Err(err) => {
            eprintln!("Failed to read {}: {err}", path.display());
            None
        }
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Some(port) = env_parsed::<u16>("QUIZ_PORT") {
        config.port = port;
    }
    if let Ok(secret) = std::env::var("QUIZ_TOKEN_SECRET") {
        if !secret.is_empty() {
            config.security.token_secret = secret;
        }
    }
    // DATABASE_URL switches the backend to Postgres outright.
    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.is_empty() {
            let max_connections = match &config.database {
                DatabaseConfig::Postgres {
                    max_connections, ..
                } => *max_connections,
                DatabaseConfig::InMemory => 10,
            };
            config.database = DatabaseConfig::Postgres {
                url,
                max_connections,
            };
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Validate settings that would make the server unsafe or inert.
pub fn validate(config: &Config) -> Result<(), String> {
    let mut problems = Vec::new();
    if config.security.token_secret.is_empty() {
        problems.push(
            "security.token_secret is empty: every connection will be rejected \
             (set it in config.json or via QUIZ_TOKEN_SECRET)"
                .to_string(),
        );
    }
    if config.server.send_queue_capacity == 0 {
        problems.push("server.send_queue_capacity must be at least 1".to_string());
    }
    if config.server.max_missed_pongs == 0 {
        problems.push("server.max_missed_pongs must be at least 1".to_string());
    }
    if let DatabaseConfig::Postgres { url, .. } = &config.database {
        if url.is_empty() {
            problems.push("database.url is empty for the postgres backend".to_string());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("\n"))
    }
}
