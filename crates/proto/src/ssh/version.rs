//! Protocol version exchange (RFC 4253 Section 4.2).
//!
//! Each side opens the connection by sending an identification line:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! A server may emit arbitrary banner lines before the real identification
//! line; the client tolerates up to [`MAX_CRUD_LINES`] of them before
//! concluding the peer does not speak the protocol. A protocol major
//! version other than 2 is fatal, with the documented "1.99" compatibility
//! exception.
//!
//! # Example
//!
//! ```rust
//! use skiff_proto::ssh::version::Version;
//!
//! let version = Version::new("Skiff_0.1.0", None);
//! assert_eq!(version.to_string(), "SSH-2.0-Skiff_0.1.0");
//!
//! let parsed = Version::parse("SSH-2.0-OpenSSH_9.6").unwrap();
//! assert_eq!(parsed.software(), "OpenSSH_9.6");
//! ```

use skiff_platform::{SkiffError, SkiffResult};

/// Maximum length of an identification line (RFC 4253 Section 4.2).
pub const MAX_VERSION_LENGTH: usize = 255;

/// Maximum number of non-identification lines tolerated before the banner.
///
/// Exceeding this raises a "not a compatible peer" fault.
pub const MAX_CRUD_LINES: usize = 50;

/// An SSH identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Protocol version (e.g., "2.0")
    proto_version: String,
    /// Software version (e.g., "Skiff_0.1.0")
    software_version: String,
    /// Optional comments
    comments: Option<String>,
}

impl Version {
    /// Creates an identification string with protocol version "2.0".
    pub fn new(software: &str, comments: Option<&str>) -> Self {
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: comments.map(String::from),
        }
    }

    /// Returns the default Skiff identification string.
    pub fn default_skiff() -> Self {
        Self::new(&format!("Skiff_{}", env!("CARGO_PKG_VERSION")), None)
    }

    /// Parses an identification line (with or without CR LF).
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::Protocol`] if the line is too long, contains a
    /// null byte, does not start with `SSH-`, or carries an unsupported
    /// protocol version (anything other than "2.0" or "1.99").
    pub fn parse(line: &str) -> SkiffResult<Self> {
        let line = line.trim_end_matches("\r\n").trim_end_matches('\n');

        if line.len() > MAX_VERSION_LENGTH {
            return Err(SkiffError::Protocol(format!(
                "identification line too long: {} bytes (max {})",
                line.len(),
                MAX_VERSION_LENGTH
            )));
        }

        if line.contains('\0') {
            return Err(SkiffError::Protocol(
                "identification line contains null byte".to_string(),
            ));
        }

        if !line.starts_with("SSH-") {
            return Err(SkiffError::Protocol(format!(
                "not an identification line: '{}'",
                line
            )));
        }

        let parts: Vec<&str> = line.splitn(3, '-').collect();
        if parts.len() < 3 {
            return Err(SkiffError::Protocol(format!(
                "malformed identification line: '{}'",
                line
            )));
        }

        let proto_version = parts[1];
        let rest = parts[2];

        // 1.99 means "also speaks 2.0" and is the one permitted exception.
        if proto_version != "2.0" && proto_version != "1.99" {
            return Err(SkiffError::Protocol(format!(
                "unsupported protocol version '{}' (expected '2.0' or '1.99')",
                proto_version
            )));
        }

        let (software_version, comments) = if let Some(space_pos) = rest.find(' ') {
            let software = rest[..space_pos].to_string();
            let comments = rest[space_pos + 1..].trim().to_string();
            (software, Some(comments))
        } else {
            (rest.to_string(), None)
        };

        Ok(Self {
            proto_version: proto_version.to_string(),
            software_version,
            comments,
        })
    }

    /// Returns the protocol version (e.g., "2.0").
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Returns the software version (e.g., "Skiff_0.1.0").
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// Returns the comments, if any.
    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    /// Returns the line in wire format (with CR LF).
    pub fn to_wire_format(&self) -> Vec<u8> {
        format!("{}\r\n", self).into_bytes()
    }

    /// Returns the line without the CR LF terminator, as used in the
    /// exchange hash.
    pub fn to_hash_input(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SSH-{}-{}", self.proto_version, self.software_version)?;
        if let Some(comments) = &self.comments {
            write!(f, " {}", comments)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_new() {
        let version = Version::new("Skiff_0.1.0", None);
        assert_eq!(version.proto_version(), "2.0");
        assert_eq!(version.software(), "Skiff_0.1.0");
        assert_eq!(version.comments(), None);
    }

    #[test]
    fn test_version_display() {
        let version = Version::new("Skiff_0.1.0", Some("transport engine"));
        assert_eq!(version.to_string(), "SSH-2.0-Skiff_0.1.0 transport engine");
    }

    #[test]
    fn test_version_parse() {
        let version = Version::parse("SSH-2.0-OpenSSH_9.6").unwrap();
        assert_eq!(version.proto_version(), "2.0");
        assert_eq!(version.software(), "OpenSSH_9.6");
    }

    #[test]
    fn test_version_parse_with_comments() {
        let version = Version::parse("SSH-2.0-OpenSSH_9.6 Ubuntu-3ubuntu13").unwrap();
        assert_eq!(version.software(), "OpenSSH_9.6");
        assert_eq!(version.comments(), Some("Ubuntu-3ubuntu13"));
    }

    #[test]
    fn test_version_parse_with_crlf() {
        let version = Version::parse("SSH-2.0-Test_1.0\r\n").unwrap();
        assert_eq!(version.software(), "Test_1.0");
    }

    #[test]
    fn test_version_parse_199_exception() {
        let version = Version::parse("SSH-1.99-Legacy_2.3").unwrap();
        assert_eq!(version.proto_version(), "1.99");
    }

    #[test]
    fn test_version_parse_major_mismatch_fatal() {
        let result = Version::parse("SSH-1.5-OldClient");
        match result {
            Err(SkiffError::Protocol(msg)) => {
                assert!(msg.contains("unsupported protocol version"));
            }
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_version_parse_not_identification() {
        assert!(Version::parse("Welcome to example.com").is_err());
    }

    #[test]
    fn test_version_parse_too_long() {
        let long_line = format!("SSH-2.0-{}", "A".repeat(300));
        assert!(Version::parse(&long_line).is_err());
    }

    #[test]
    fn test_version_parse_null_byte() {
        assert!(Version::parse("SSH-2.0-Test\0Bad").is_err());
    }

    #[test]
    fn test_version_wire_format() {
        let version = Version::new("Skiff_0.1.0", None);
        assert_eq!(version.to_wire_format(), b"SSH-2.0-Skiff_0.1.0\r\n");
        assert_eq!(version.to_hash_input(), b"SSH-2.0-Skiff_0.1.0");
    }

    #[test]
    fn test_version_round_trip() {
        let original = Version::new("Skiff_0.1.0", Some("test"));
        let parsed = Version::parse(&original.to_string()).unwrap();
        assert_eq!(parsed, original);
    }
}
