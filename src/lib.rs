//! # Stealthchat - encrypted peer-to-peer chat
//!
//! A two-peer encrypted text-chat session over mutually-authenticated TLS.
//! One peer listens (the responder), the other connects (the initiator);
//! after the handshake both sides are symmetric and exchange free-text
//! messages until either sends the termination sentinel.
//!
//! ## Session anatomy
//!
//! - Both sides present a certificate and verify the peer against a
//!   configured trust anchor — an unauthenticated peer never gets a channel
//! - Messages travel as length-prefixed frames carrying the line
//!   `"<name>: <body>"`, so a message is never split or merged by the
//!   transport
//! - A sender loop and a receiver loop run concurrently over the two halves
//!   of the channel; console output is serialized so the prompt and inbound
//!   messages never interleave mid-line
//! - Either loop can end the session; the other is actively cancelled, both
//!   are joined, and the channel is closed exactly once
//!
//! ## Modules
//!
//! - [`config`]: session configuration (role, identity, endpoint, PEM paths)
//! - [`tls`]: secure channel establishment
//! - [`framing`]: wire frames and the termination sentinel
//! - [`session`]: the duplex message pump
//! - [`console`]: serialized console output
//! - [`shutdown`]: termination flag and cancellation signal

pub mod config;
pub mod console;
pub mod error;
pub mod framing;
pub mod session;
pub mod shutdown;
pub mod tls;

// Re-export commonly used types at the crate root
pub use config::{Credentials, Identity, PeerAddr, Role, SessionConfig};
pub use console::Console;
pub use error::SessionError;
pub use framing::{ChatMessage, Frame, TERMINATION_SENTINEL};
pub use session::{run_pump, run_session, SessionOutcome, SessionReport};
pub use shutdown::{SessionState, ShutdownCoordinator};
pub use tls::{establish, SecureChannel};
