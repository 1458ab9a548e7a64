//! Chain client configuration.
//!
//! A `ClientConfig` is validated once, at construction, and is immutable
//! afterward. Everything that connects to the chain takes one by value.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroizing;

/// The role a client plays on the network. Determines the name submitted
/// at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Plain storage user: declares files, never registers.
    #[default]
    Client,
    /// Gateway service that stores on behalf of users and must register
    /// its peer identity on chain.
    #[serde(rename = "deoss", alias = "gateway")]
    GatewayService,
}

impl Role {
    /// Canonical on-chain role name.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::GatewayService => "deoss",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "deoss" | "gateway" => Ok(Role::GatewayService),
            other => Err(ConfigurationError::UnknownRole(other.to_string())),
        }
    }
}

/// Schemes accepted for chain endpoints. WebSocket endpoints are reached
/// over their HTTP equivalents.
const ENDPOINT_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

/// Validated connection settings for a chain client.
#[derive(Clone)]
pub struct ClientConfig {
    role: Role,
    endpoints: Vec<Url>,
    credential: Zeroizing<String>,
    timeout: Duration,
}

impl ClientConfig {
    /// Validate and build a configuration.
    ///
    /// Fails if there are no endpoints, any endpoint is malformed, the
    /// credential is empty, or the timeout is zero.
    pub fn new<I, S>(
        role: Role,
        endpoints: I,
        credential: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|e| parse_endpoint(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(ConfigurationError::NoEndpoints);
        }

        let credential = Zeroizing::new(credential.into());
        if credential.trim().is_empty() {
            return Err(ConfigurationError::EmptyCredential);
        }

        if timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout);
        }

        Ok(Self {
            role,
            endpoints,
            credential,
            timeout,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Endpoints in the order they will be tried.
    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    /// The secret phrase. Never log this.
    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Blanket timeout applied to every chain request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("role", &self.role)
            .field("endpoints", &self.endpoints)
            .field("credential", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigurationError> {
    let malformed = |reason: String| ConfigurationError::MalformedEndpoint {
        endpoint: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| malformed(e.to_string()))?;
    if !ENDPOINT_SCHEMES.contains(&url.scheme()) {
        return Err(malformed(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(malformed("missing host".to_string()));
    }
    Ok(url)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no chain endpoints configured")]
    NoEndpoints,
    #[error("malformed endpoint {endpoint:?}: {reason}")]
    MalformedEndpoint { endpoint: String, reason: String },
    #[error("credential is empty")]
    EmptyCredential,
    #[error("transaction timeout must be non-zero")]
    ZeroTimeout,
    #[error("unknown role {0:?} (expected \"client\" or \"deoss\")")]
    UnknownRole(String),
    #[error("failed to build transport: {0}")]
    Transport(String),
    #[error("no endpoint reachable after {tried} attempt(s): {last}")]
    Unreachable { tried: usize, last: String },
}
