//! SFTP packet framing and message codec (version 3).
//!
//! Every packet is `uint32 length || byte type || body`; the length
//! excludes itself. All requests after INIT carry a `uint32 request-id`
//! the server echoes in its reply, which is what makes pipelining
//! possible.

use skiff_platform::{SkiffError, SkiffResult};

use super::types::{DirEntry, FileAttributes, OpenFlags};
use crate::ssh::wire::WireBuffer;

/// Largest SFTP frame accepted from the server.
///
/// Bounds allocation before the declared length is trusted; generous
/// enough for a 32768-byte data chunk plus framing, with headroom for
/// large directory listings.
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Packet type bytes.
pub mod fxp {
    /// Client hello
    pub const INIT: u8 = 1;
    /// Server hello
    pub const VERSION: u8 = 2;
    /// Open a file
    pub const OPEN: u8 = 3;
    /// Close a handle
    pub const CLOSE: u8 = 4;
    /// Read from a file handle
    pub const READ: u8 = 5;
    /// Write to a file handle
    pub const WRITE: u8 = 6;
    /// Stat without following symlinks
    pub const LSTAT: u8 = 7;
    /// Stat an open handle
    pub const FSTAT: u8 = 8;
    /// Set attributes by path
    pub const SETSTAT: u8 = 9;
    /// Set attributes on an open handle
    pub const FSETSTAT: u8 = 10;
    /// Open a directory
    pub const OPENDIR: u8 = 11;
    /// Read directory entries
    pub const READDIR: u8 = 12;
    /// Delete a file
    pub const REMOVE: u8 = 13;
    /// Create a directory
    pub const MKDIR: u8 = 14;
    /// Delete a directory
    pub const RMDIR: u8 = 15;
    /// Canonicalize a path
    pub const REALPATH: u8 = 16;
    /// Stat following symlinks
    pub const STAT: u8 = 17;
    /// Rename a file
    pub const RENAME: u8 = 18;
    /// Read a symlink target
    pub const READLINK: u8 = 19;
    /// Create a symlink
    pub const SYMLINK: u8 = 20;
    /// Status reply
    pub const STATUS: u8 = 101;
    /// Handle reply
    pub const HANDLE: u8 = 102;
    /// Data reply
    pub const DATA: u8 = 103;
    /// Name list reply
    pub const NAME: u8 = 104;
    /// Attributes reply
    pub const ATTRS: u8 = 105;
    /// Vendor extension request
    pub const EXTENDED: u8 = 200;
    /// Vendor extension reply
    pub const EXTENDED_REPLY: u8 = 201;
}

/// Wraps a type byte and body into a framed packet.
pub fn frame(packet_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.extend_from_slice(&(1 + body.len() as u32).to_be_bytes());
    out.push(packet_type);
    out.extend_from_slice(body);
    out
}

/// Request builders. Each returns the framed wire bytes.
pub mod request {
    use super::*;

    /// SSH_FXP_INIT with our protocol version.
    pub fn init(version: u32) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(version);
        frame(fxp::INIT, body.as_slice())
    }

    /// SSH_FXP_OPEN.
    pub fn open(id: u32, path: &str, flags: OpenFlags, attrs: &FileAttributes) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_string(path);
        body.write_u32(flags.0);
        attrs.encode(&mut body);
        frame(fxp::OPEN, body.as_slice())
    }

    /// SSH_FXP_CLOSE.
    pub fn close(id: u32, handle: &[u8]) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_bytes(handle);
        frame(fxp::CLOSE, body.as_slice())
    }

    /// SSH_FXP_READ.
    pub fn read(id: u32, handle: &[u8], offset: u64, len: u32) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_bytes(handle);
        body.write_u64(offset);
        body.write_u32(len);
        frame(fxp::READ, body.as_slice())
    }

    /// SSH_FXP_WRITE.
    pub fn write(id: u32, handle: &[u8], offset: u64, data: &[u8]) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_bytes(handle);
        body.write_u64(offset);
        body.write_bytes(data);
        frame(fxp::WRITE, body.as_slice())
    }

    fn path_request(packet_type: u8, id: u32, path: &str) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_string(path);
        frame(packet_type, body.as_slice())
    }

    /// SSH_FXP_STAT.
    pub fn stat(id: u32, path: &str) -> Vec<u8> {
        path_request(fxp::STAT, id, path)
    }

    /// SSH_FXP_LSTAT.
    pub fn lstat(id: u32, path: &str) -> Vec<u8> {
        path_request(fxp::LSTAT, id, path)
    }

    /// SSH_FXP_FSTAT.
    pub fn fstat(id: u32, handle: &[u8]) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_bytes(handle);
        frame(fxp::FSTAT, body.as_slice())
    }

    /// SSH_FXP_SETSTAT.
    pub fn setstat(id: u32, path: &str, attrs: &FileAttributes) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_string(path);
        attrs.encode(&mut body);
        frame(fxp::SETSTAT, body.as_slice())
    }

    /// SSH_FXP_FSETSTAT.
    pub fn fsetstat(id: u32, handle: &[u8], attrs: &FileAttributes) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_bytes(handle);
        attrs.encode(&mut body);
        frame(fxp::FSETSTAT, body.as_slice())
    }

    /// SSH_FXP_OPENDIR.
    pub fn opendir(id: u32, path: &str) -> Vec<u8> {
        path_request(fxp::OPENDIR, id, path)
    }

    /// SSH_FXP_READDIR.
    pub fn readdir(id: u32, handle: &[u8]) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_bytes(handle);
        frame(fxp::READDIR, body.as_slice())
    }

    /// SSH_FXP_REMOVE.
    pub fn remove(id: u32, path: &str) -> Vec<u8> {
        path_request(fxp::REMOVE, id, path)
    }

    /// SSH_FXP_MKDIR.
    pub fn mkdir(id: u32, path: &str, attrs: &FileAttributes) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_string(path);
        attrs.encode(&mut body);
        frame(fxp::MKDIR, body.as_slice())
    }

    /// SSH_FXP_RMDIR.
    pub fn rmdir(id: u32, path: &str) -> Vec<u8> {
        path_request(fxp::RMDIR, id, path)
    }

    /// SSH_FXP_REALPATH.
    pub fn realpath(id: u32, path: &str) -> Vec<u8> {
        path_request(fxp::REALPATH, id, path)
    }

    /// SSH_FXP_RENAME.
    pub fn rename(id: u32, from: &str, to: &str) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_string(from);
        body.write_string(to);
        frame(fxp::RENAME, body.as_slice())
    }

    /// SSH_FXP_READLINK.
    pub fn readlink(id: u32, path: &str) -> Vec<u8> {
        path_request(fxp::READLINK, id, path)
    }

    /// SSH_FXP_SYMLINK. Argument order follows the OpenSSH convention:
    /// target first, link path second.
    pub fn symlink(id: u32, target: &str, link_path: &str) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_string(target);
        body.write_string(link_path);
        frame(fxp::SYMLINK, body.as_slice())
    }

    /// SSH_FXP_EXTENDED.
    pub fn extended(id: u32, name: &str, data: &[u8]) -> Vec<u8> {
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_string(name);
        body.write_raw(data);
        frame(fxp::EXTENDED, body.as_slice())
    }
}

/// A parsed server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// SSH_FXP_VERSION: negotiated version plus extension pairs
    Version {
        /// Server's protocol version
        version: u32,
        /// Extension name/data pairs the server advertises
        extensions: Vec<(String, String)>,
    },
    /// SSH_FXP_STATUS
    Status {
        /// Echoed request id
        id: u32,
        /// Status code
        code: u32,
        /// Server message
        message: String,
    },
    /// SSH_FXP_HANDLE
    Handle {
        /// Echoed request id
        id: u32,
        /// Opaque server handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_DATA
    Data {
        /// Echoed request id
        id: u32,
        /// Read payload
        data: Vec<u8>,
    },
    /// SSH_FXP_NAME
    Name {
        /// Echoed request id
        id: u32,
        /// Directory entries
        entries: Vec<DirEntry>,
    },
    /// SSH_FXP_ATTRS
    Attrs {
        /// Echoed request id
        id: u32,
        /// File attributes
        attrs: FileAttributes,
    },
    /// SSH_FXP_EXTENDED_REPLY
    ExtendedReply {
        /// Echoed request id
        id: u32,
        /// Extension-specific payload
        data: Vec<u8>,
    },
}

impl Reply {
    /// The request id this reply answers; `None` for VERSION.
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Version { .. } => None,
            Self::Status { id, .. }
            | Self::Handle { id, .. }
            | Self::Data { id, .. }
            | Self::Name { id, .. }
            | Self::Attrs { id, .. }
            | Self::ExtendedReply { id, .. } => Some(*id),
        }
    }

    /// Parses one unframed packet (type byte plus body).
    pub fn parse(packet: &[u8]) -> SkiffResult<Self> {
        let mut buf = WireBuffer::from(packet);
        let packet_type = buf.read_u8()?;
        match packet_type {
            fxp::VERSION => {
                let version = buf.read_u32()?;
                let mut extensions = Vec::new();
                while buf.remaining() > 0 {
                    let name = buf.read_string()?;
                    let data = buf.read_string()?;
                    extensions.push((name, data));
                }
                Ok(Self::Version {
                    version,
                    extensions,
                })
            }
            fxp::STATUS => {
                let id = buf.read_u32()?;
                let code = buf.read_u32()?;
                // Early servers omit the message and language fields.
                let message = if buf.remaining() > 0 {
                    buf.read_string()?
                } else {
                    String::new()
                };
                Ok(Self::Status { id, code, message })
            }
            fxp::HANDLE => Ok(Self::Handle {
                id: buf.read_u32()?,
                handle: buf.read_bytes()?,
            }),
            fxp::DATA => Ok(Self::Data {
                id: buf.read_u32()?,
                data: buf.read_bytes()?,
            }),
            fxp::NAME => {
                let id = buf.read_u32()?;
                let count = buf.read_u32()?;
                let mut entries = Vec::with_capacity(count.min(4096) as usize);
                for _ in 0..count {
                    entries.push(DirEntry {
                        filename: buf.read_string()?,
                        longname: buf.read_string()?,
                        attrs: FileAttributes::decode(&mut buf)?,
                    });
                }
                Ok(Self::Name { id, entries })
            }
            fxp::ATTRS => Ok(Self::Attrs {
                id: buf.read_u32()?,
                attrs: FileAttributes::decode(&mut buf)?,
            }),
            fxp::EXTENDED_REPLY => {
                let id = buf.read_u32()?;
                let data = buf.unread().to_vec();
                Ok(Self::ExtendedReply { id, data })
            }
            other => Err(SkiffError::Protocol(format!(
                "unexpected SFTP packet type {}",
                other
            ))),
        }
    }
}
