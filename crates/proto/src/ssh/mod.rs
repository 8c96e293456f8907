//! Secure transport protocol engine.
//!
//! Layered bottom-up:
//!
//! - [`wire`]: big-endian primitives and length-prefixed fields
//! - [`message`]: transport message types and typed message structs
//! - [`version`]: identification string exchange
//! - [`packet`]: the binary packet protocol ([`packet::Sealer`] /
//!   [`packet::Opener`])
//! - [`prefs`]: KEXINIT and algorithm negotiation
//! - [`crypto`]: ciphers, MACs, compression, key derivation
//! - [`hostkey`]: host key verification and server identities
//! - [`kex`]: key exchange methods
//! - [`transport`]: the connection state machine
//! - [`keepalive`]: periodic IGNORE traffic for idle connections
//! - [`dispatcher`]: inbound payload routing for services
//! - [`sftp`]: the SFTP client subsystem

pub mod crypto;
pub mod dispatcher;
pub mod hostkey;
pub mod keepalive;
pub mod kex;
pub mod message;
pub mod packet;
pub mod prefs;
pub mod sftp;
pub mod transport;
pub mod version;
pub mod wire;

pub use keepalive::Keepalive;
pub use transport::{Transport, TransportConfig};
pub use version::Version;
