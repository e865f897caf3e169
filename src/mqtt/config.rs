use super::ChannelError;
use serde::{Deserialize, Serialize};

const DEFAULT_PORT: u16 = 1883;

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker address as `host` or `host:port`
    pub url: String,
    pub user: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "localhost:1883".to_string(),
            user: String::new(),
            password: String::new(),
            client_id: "selfmon-bridge".to_string(),
            keep_alive_secs: 5,
        }
    }
}

impl BrokerConfig {
    /// Splits `url` into host and port, defaulting the port to 1883
    pub fn host_port(&self) -> Result<(String, u16), ChannelError> {
        let url = self.url.trim();
        let url = url.strip_prefix("mqtt://").unwrap_or(url);
        let (host, port) = match url.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ChannelError::InvalidBrokerUrl(self.url.clone()))?;
                (host, port)
            }
            None => (url, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(ChannelError::InvalidBrokerUrl(self.url.clone()));
        }
        Ok((host.to_string(), port))
    }

    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty()
    }
}
