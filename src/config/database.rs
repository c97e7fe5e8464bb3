use serde::{Deserialize, Serialize};

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DatabaseConfig {
    /// Volatile tables for tests and single-node development.
    #[default]
    InMemory,
    /// Postgres via a shared bounded pool.
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

impl DatabaseConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_section_parses_with_default_pool_size() {
        let cfg: DatabaseConfig = serde_json::from_str(
            r#"{ "backend": "postgres", "url": "postgres://localhost/quiz" }"#,
        )
        .unwrap();
        match cfg {
            DatabaseConfig::Postgres {
                url,
                max_connections,
            } => {
                assert_eq!(url, "postgres://localhost/quiz");
                assert_eq!(max_connections, 10);
            }
            DatabaseConfig::InMemory => panic!("expected postgres backend"),
        }
    }
}
