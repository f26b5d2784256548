//! Session configuration.
//!
//! Everything a session needs is gathered into a [`SessionConfig`] before
//! establishment and passed by value: role, identity, endpoint, and the
//! certificate material paths for mutual authentication.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Lowest port a session may use (below are privileged ports).
pub const PORT_MIN: u16 = 1024;

/// Highest port a session may use.
pub const PORT_MAX: u16 = 65535;

/// Host the initiator connects to when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Role in the chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiated the connection.
    Initiator,
    /// Accepted the connection.
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Validate that a port is inside the allowed range.
///
/// Called before any socket is opened; out-of-range ports never reach the
/// network layer.
pub fn validate_port(port: u16) -> Result<(), SessionError> {
    if port < PORT_MIN {
        return Err(SessionError::InvalidPort(port));
    }
    Ok(())
}

/// The local display name, prefixed to every outgoing message.
///
/// Names are validated once at construction: non-empty after trimming, no
/// control characters, and no `':'` so the `"<name>: <body>"` wire line
/// stays unambiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
}

impl Identity {
    /// Create a validated identity from user input.
    pub fn new(name: impl Into<String>) -> Result<Self, SessionError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(SessionError::InvalidName("name is empty".into()));
        }
        if name.contains(':') {
            return Err(SessionError::InvalidName(format!(
                "'{name}' contains ':', which is reserved as the name/body separator"
            )));
        }
        if name.chars().any(|c| c.is_control()) {
            return Err(SessionError::InvalidName(format!(
                "'{}' contains control characters",
                name.escape_default()
            )));
        }
        Ok(Self { name })
    }

    /// The validated display name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Filesystem paths to the PEM material for one side of the session.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Our certificate chain, presented to the peer.
    pub cert: PathBuf,
    /// Our private key.
    pub key: PathBuf,
    /// Trust anchor the peer's certificate must verify against.
    pub trust_anchor: PathBuf,
}

impl Credentials {
    /// Default material for a role, matching the conventional filenames:
    /// the responder keeps `server.crt`/`server.key` and trusts `client.crt`,
    /// the initiator the mirror image.
    pub fn default_for(role: Role) -> Self {
        match role {
            Role::Responder => Self {
                cert: "server.crt".into(),
                key: "server.key".into(),
                trust_anchor: "client.crt".into(),
            },
            Role::Initiator => Self {
                cert: "client.crt".into(),
                key: "client.key".into(),
                trust_anchor: "server.crt".into(),
            },
        }
    }
}

/// Where the session's transport endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    /// Listen on `0.0.0.0:<port>` for exactly one inbound connection.
    Listen {
        /// Local port to bind.
        port: u16,
    },
    /// Resolve and connect out to a remote peer.
    Connect {
        /// Remote host name or address.
        host: String,
        /// Remote port.
        port: u16,
    },
}

impl PeerAddr {
    /// The role this endpoint implies.
    pub fn role(&self) -> Role {
        match self {
            PeerAddr::Listen { .. } => Role::Responder,
            PeerAddr::Connect { .. } => Role::Initiator,
        }
    }

    /// The configured port.
    pub fn port(&self) -> u16 {
        match self {
            PeerAddr::Listen { port } | PeerAddr::Connect { port, .. } => *port,
        }
    }
}

/// Complete configuration for one session, constructed once and handed to
/// the establisher and the pump.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local display name.
    pub identity: Identity,
    /// Transport endpoint (and thereby role).
    pub peer: PeerAddr,
    /// Certificate material paths.
    pub credentials: Credentials,
}

impl SessionConfig {
    /// Validate everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), SessionError> {
        validate_port(self.peer.port())
    }

    /// The session's role.
    pub fn role(&self) -> Role {
        self.peer.role()
    }
}

/// Saved defaults, filling in CLI arguments the user did not pass.
///
/// Stored as TOML under the user config directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Preferred display name.
    pub display_name: Option<String>,
    /// Preferred port.
    pub port: Option<u16>,
    /// Preferred host to connect to as initiator.
    pub host: Option<String>,
    /// Certificate path override.
    pub cert: Option<PathBuf>,
    /// Private key path override.
    pub key: Option<PathBuf>,
    /// Trust anchor path override.
    pub trust_anchor: Option<PathBuf>,
}

impl Profile {
    /// Load the profile, or defaults if none has been saved.
    pub fn load() -> Result<Self, SessionError> {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load a profile from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, SessionError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SessionError::Config(format!("invalid profile {}: {e}", path.display())))
    }

    /// Save the profile to its default location.
    pub fn save(&self) -> Result<(), SessionError> {
        let Some(path) = Self::path() else {
            return Err(SessionError::Config(
                "could not determine a config directory".into(),
            ));
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SessionError::Config(format!("profile serialization: {e}")))?;
        fs::write(&path, content)?;
        Ok(())
    }

    fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("stealthchat").join("profile.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_below_range_rejected() {
        assert!(matches!(validate_port(0), Err(SessionError::InvalidPort(0))));
        assert!(matches!(validate_port(80), Err(SessionError::InvalidPort(80))));
        assert!(matches!(
            validate_port(1023),
            Err(SessionError::InvalidPort(1023))
        ));
    }

    #[test]
    fn port_range_bounds_accepted() {
        assert!(validate_port(PORT_MIN).is_ok());
        assert!(validate_port(5000).is_ok());
        assert!(validate_port(PORT_MAX).is_ok());
    }

    #[test]
    fn identity_trims_and_accepts() {
        let id = Identity::new("  Alice ").unwrap();
        assert_eq!(id.name(), "Alice");
    }

    #[test]
    fn identity_rejects_empty() {
        assert!(Identity::new("").is_err());
        assert!(Identity::new("   ").is_err());
    }

    #[test]
    fn identity_rejects_separator_and_control() {
        assert!(Identity::new("a:b").is_err());
        assert!(Identity::new("a\tb").is_err());
    }

    #[test]
    fn config_validation_checks_port() {
        let config = SessionConfig {
            identity: Identity::new("alice").unwrap(),
            peer: PeerAddr::Listen { port: 80 },
            credentials: Credentials::default_for(Role::Responder),
        };
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidPort(80))
        ));
    }

    #[test]
    fn peer_addr_implies_role() {
        assert_eq!(PeerAddr::Listen { port: 5000 }.role(), Role::Responder);
        let connect = PeerAddr::Connect {
            host: "127.0.0.1".into(),
            port: 5000,
        };
        assert_eq!(connect.role(), Role::Initiator);
    }

    #[test]
    fn default_credentials_mirror_by_role() {
        let responder = Credentials::default_for(Role::Responder);
        let initiator = Credentials::default_for(Role::Initiator);
        assert_eq!(responder.cert, initiator.trust_anchor);
        assert_eq!(initiator.cert, responder.trust_anchor);
    }

    #[test]
    fn profile_roundtrip() {
        let profile = Profile {
            display_name: Some("alice".into()),
            port: Some(5000),
            host: None,
            cert: Some("alice.crt".into()),
            key: None,
            trust_anchor: None,
        };
        let toml_str = toml::to_string_pretty(&profile).unwrap();
        let back: Profile = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.display_name.as_deref(), Some("alice"));
        assert_eq!(back.port, Some(5000));
        assert_eq!(back.cert.as_deref(), Some(Path::new("alice.crt")));
        assert!(back.host.is_none());
    }
}
