//! Environment-driven server configuration.

use crate::error::ServerError;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on
    pub port: u16,
    /// Identifier this instance uses when claiming rooms
    pub instance_id: String,
    /// Redis connection URL; `None` runs without cross-instance coordination
    pub redis_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            instance_id: "local".to_owned(),
            redis_url: None,
        }
    }
}

impl ServerConfig {
    /// Read configuration from process environment variables.
    ///
    /// `PORT` sets the listen port, `INSTANCE_ID` (falling back to
    /// `FLY_MACHINE_ID`, then `"local"`) names the instance for room
    /// claims, and `REDIS_URL` enables the shared claim store.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` when `PORT` is set but not a valid
    /// port number.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading through `lookup`,
    /// so tests can supply variables without touching the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` when `PORT` is present but invalid.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ServerError::Config(format!("PORT={raw:?} is not a port")))?,
            None => 3000,
        };
        let instance_id = lookup("INSTANCE_ID")
            .or_else(|| lookup("FLY_MACHINE_ID"))
            .unwrap_or_else(|| "local".to_owned());
        Ok(Self {
            port,
            instance_id,
            redis_url: lookup("REDIS_URL"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cfg = ServerConfig::from_vars(|_| None).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.instance_id, "local");
        assert!(cfg.redis_url.is_none());
    }

    #[test]
    fn test_explicit_values() {
        let env = vars(&[
            ("PORT", "8080"),
            ("INSTANCE_ID", "machine-a"),
            ("REDIS_URL", "redis://cache:6379"),
        ]);
        let cfg = ServerConfig::from_vars(|name| env.get(name).cloned()).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.instance_id, "machine-a");
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn test_fly_machine_id_fallback() {
        let env = vars(&[("FLY_MACHINE_ID", "fly-123")]);
        let cfg = ServerConfig::from_vars(|name| env.get(name).cloned()).unwrap();
        assert_eq!(cfg.instance_id, "fly-123");

        let env = vars(&[("FLY_MACHINE_ID", "fly-123"), ("INSTANCE_ID", "explicit")]);
        let cfg = ServerConfig::from_vars(|name| env.get(name).cloned()).unwrap();
        assert_eq!(cfg.instance_id, "explicit");
    }

    #[test]
    fn test_bad_port_rejected() {
        let env = vars(&[("PORT", "not-a-port")]);
        assert!(ServerConfig::from_vars(|name| env.get(name).cloned()).is_err());
        let env = vars(&[("PORT", "70000")]);
        assert!(ServerConfig::from_vars(|name| env.get(name).cloned()).is_err());
    }
}
