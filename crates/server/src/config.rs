//! Environment configuration. Every variable is optional with a default so
//! a bare `cargo run` against a local database works.

use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub jwt_secret: String,
    pub server_port: u16,
    pub env: String,
    pub matchmaking_countdown_seconds: u64,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            db_host: var_or("DB_HOST", "localhost"),
            db_port: parse_or("DB_PORT", 5432),
            db_user: var_or("DB_USER", "postgres"),
            db_password: var_or("DB_PASSWORD", ""),
            db_name: var_or("DB_NAME", "holdem"),
            jwt_secret: var_or("JWT_SECRET", "dev-secret-change-me"),
            server_port: parse_or("SERVER_PORT", 8080),
            env: var_or("ENV", "development"),
            matchmaking_countdown_seconds: parse_or("MATCHMAKING_COUNTDOWN_SECONDS", 10),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }

    /// Empty `ALLOWED_ORIGINS` means localhost only.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.is_empty() {
            return origin.contains("://localhost") || origin.contains("://127.0.0.1");
        }
        self.allowed_origins.iter().any(|o| o == origin)
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let cfg = Config {
            db_host: "localhost".into(),
            db_port: 5432,
            db_user: "postgres".into(),
            db_password: "".into(),
            db_name: "holdem".into(),
            jwt_secret: "x".into(),
            server_port: 8080,
            env: "development".into(),
            matchmaking_countdown_seconds: 10,
            allowed_origins: vec![],
        };
        assert_eq!(
            cfg.database_url(),
            "postgres://postgres:@localhost:5432/holdem"
        );
        assert!(cfg.origin_allowed("http://localhost:3000"));
        assert!(!cfg.origin_allowed("https://evil.example"));
    }

    #[test]
    fn explicit_origins_replace_the_localhost_rule() {
        let cfg = Config {
            allowed_origins: vec!["https://play.example".into()],
            ..Config {
                db_host: "localhost".into(),
                db_port: 5432,
                db_user: "postgres".into(),
                db_password: "".into(),
                db_name: "holdem".into(),
                jwt_secret: "x".into(),
                server_port: 8080,
                env: "development".into(),
                matchmaking_countdown_seconds: 10,
                allowed_origins: vec![],
            }
        };
        assert!(cfg.origin_allowed("https://play.example"));
        assert!(!cfg.origin_allowed("http://localhost:3000"));
    }
}
