//! # Store Connection Configuration
//!
//! Connection parameters for the production backend. Defaults point at a
//! local database with the `world` namespace, which is what local
//! development expects.

use std::time::Duration;

/// Connection settings for a world's backing store.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Backend address as `host:port`.
    pub address: String,
    /// Optional password. `None` means no authentication.
    pub password: Option<String>,
    /// Database index within the backend.
    pub db: i64,
    /// How long to wait for the initial connection.
    pub dial_timeout: Duration,
    /// World namespace prefixed onto every key.
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            password: None,
            db: 0,
            dial_timeout: Duration::from_secs(15),
            namespace: "world".to_string(),
        }
    }
}

impl StoreConfig {
    /// Renders the connection URL for the backend client.
    #[must_use]
    pub fn url(&self) -> String {
        let auth = match &self.password {
            Some(password) => format!(":{password}@"),
            None => String::new(),
        };
        format!("redis://{auth}{}/{}", self.address, self.db)
    }
}
