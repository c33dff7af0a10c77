/// Runtime configuration, read once at startup from the environment
/// (a `.env` file is honored when present).
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    /// Cap on concurrently active (unexpired) rooms a user may create into.
    pub max_rooms: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            database_url: env_or("DATABASE_URL", "sqlite://parlor.db?mode=rwc"),
            max_rooms: env_or("MAX_ROOMS", "50").parse().unwrap_or(50),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_owned(),
    }
}
