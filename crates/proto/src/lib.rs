//! # Skiff Proto
//!
//! Protocol engine for the Skiff secure transport: the SSH2 binary packet
//! protocol (version exchange, algorithm negotiation, key exchange,
//! encrypted framing, transparent re-keying) and an SFTP version 3 client
//! with pipelined bulk transfers.
//!
//! # Example
//!
//! ```no_run
//! use skiff_proto::ssh::{Transport, TransportConfig};
//! use skiff_platform::SkiffResult;
//!
//! # async fn example() -> SkiffResult<()> {
//! let stream = tokio::net::TcpStream::connect("example.com:22").await?;
//! let mut transport = Transport::client(stream, TransportConfig::default()).await?;
//! transport.request_service("ssh-userauth").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ssh;

pub use skiff_platform::{SkiffError, SkiffResult};
