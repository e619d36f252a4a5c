//! Origin identity.
//!
//! An [`Origin`] is one backend server instance of an application. It is an
//! immutable value: configuration reconciliation replaces origins, it never
//! mutates them.

use std::fmt;
use serde::{Deserialize, Serialize};

/// Identifier of a backend service (application).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an origin, unique within its application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(String);

impl OriginId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire protocol used to talk to an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

/// TLS settings for an encrypted origin.
///
/// Opaque to this crate: they are handed unchanged to the connection factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Accept any server certificate.
    pub trust_all_certs: bool,
    /// Override for the SNI host name.
    pub sni_host: Option<String>,
    /// Enabled protocol versions, e.g. `TLSv1.2`.
    pub protocols: Vec<String>,
}

/// One backend server instance of an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    app_id: AppId,
    id: OriginId,
    host: String,
    port: u16,
    tls: Option<TlsSettings>,
}

impl Origin {
    /// Create a plaintext origin.
    pub fn new(app_id: AppId, id: OriginId, host: impl Into<String>, port: u16) -> Self {
        Self {
            app_id,
            id,
            host: host.into(),
            port,
            tls: None,
        }
    }

    /// Mark the origin as encrypted with the given TLS settings.
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    pub fn id(&self) -> &OriginId {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tls(&self) -> Option<&TlsSettings> {
        self.tls.as_ref()
    }

    pub fn protocol(&self) -> Protocol {
        if self.tls.is_some() {
            Protocol::Https
        } else {
            Protocol::Http
        }
    }

    /// `host:port`, as used for the `Host` header and socket addressing.
    pub fn host_and_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.app_id, self.id, self.host_and_port())
    }
}
