//! SFTP protocol types (draft-ietf-secsh-filexfer-02, version 3).

use skiff_platform::{SkiffError, SkiffResult};

use crate::ssh::wire::WireBuffer;

/// Protocol version this client speaks.
pub const SFTP_VERSION: u32 = 3;

/// Status codes carried by SSH_FXP_STATUS.
pub mod status {
    /// Success
    pub const OK: u32 = 0;
    /// End of file reached
    pub const EOF: u32 = 1;
    /// Path does not exist
    pub const NO_SUCH_FILE: u32 = 2;
    /// Insufficient rights
    pub const PERMISSION_DENIED: u32 = 3;
    /// Generic failure
    pub const FAILURE: u32 = 4;
    /// Malformed request
    pub const BAD_MESSAGE: u32 = 5;
    /// No connection to the server
    pub const NO_CONNECTION: u32 = 6;
    /// Connection to the server was lost
    pub const CONNECTION_LOST: u32 = 7;
    /// Operation unsupported by the server
    pub const OP_UNSUPPORTED: u32 = 8;
}

/// Typed SFTP fault.
#[derive(Debug)]
pub enum SftpError {
    /// Read past the end of the file or directory listing exhausted
    Eof,
    /// SSH_FX_NO_SUCH_FILE
    NoSuchFile(String),
    /// SSH_FX_PERMISSION_DENIED
    PermissionDenied(String),
    /// SSH_FX_FAILURE
    Failure(String),
    /// SSH_FX_BAD_MESSAGE
    BadMessage(String),
    /// SSH_FX_OP_UNSUPPORTED
    Unsupported(String),
    /// A status code outside the version 3 set
    Status {
        /// Raw status code
        code: u32,
        /// Server-supplied message
        message: String,
    },
    /// The reply frame did not match the request
    Protocol(String),
    /// The file handle was already closed
    HandleClosed,
    /// The session's receive loop has stopped
    ConnectionLost,
    /// Failure in the underlying byte stream
    Transport(SkiffError),
}

impl SftpError {
    /// Maps an SSH_FXP_STATUS code to a fault; `OK` maps to `None`.
    pub fn from_status(code: u32, message: String) -> Option<Self> {
        match code {
            status::OK => None,
            status::EOF => Some(Self::Eof),
            status::NO_SUCH_FILE => Some(Self::NoSuchFile(message)),
            status::PERMISSION_DENIED => Some(Self::PermissionDenied(message)),
            status::FAILURE => Some(Self::Failure(message)),
            status::BAD_MESSAGE => Some(Self::BadMessage(message)),
            status::NO_CONNECTION | status::CONNECTION_LOST => Some(Self::ConnectionLost),
            status::OP_UNSUPPORTED => Some(Self::Unsupported(message)),
            other => Some(Self::Status {
                code: other,
                message,
            }),
        }
    }
}

impl std::fmt::Display for SftpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eof => write!(f, "end of file"),
            Self::NoSuchFile(msg) => write!(f, "no such file: {}", msg),
            Self::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            Self::Failure(msg) => write!(f, "operation failed: {}", msg),
            Self::BadMessage(msg) => write!(f, "bad message: {}", msg),
            Self::Unsupported(msg) => write!(f, "operation unsupported: {}", msg),
            Self::Status { code, message } => {
                write!(f, "status code {}: {}", code, message)
            }
            Self::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            Self::HandleClosed => write!(f, "file handle is closed"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::Transport(err) => write!(f, "transport error: {}", err),
        }
    }
}

impl std::error::Error for SftpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SkiffError> for SftpError {
    fn from(err: SkiffError) -> Self {
        Self::Transport(err)
    }
}

impl From<std::io::Error> for SftpError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(SkiffError::Io(err))
    }
}

/// Result alias for SFTP operations.
pub type SftpResult<T> = Result<T, SftpError>;

/// pflags for SSH_FXP_OPEN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// SSH_FXF_READ
    pub const READ: Self = Self(0x0000_0001);
    /// SSH_FXF_WRITE
    pub const WRITE: Self = Self(0x0000_0002);
    /// SSH_FXF_APPEND
    pub const APPEND: Self = Self(0x0000_0004);
    /// SSH_FXF_CREAT
    pub const CREATE: Self = Self(0x0000_0008);
    /// SSH_FXF_TRUNC
    pub const TRUNCATE: Self = Self(0x0000_0010);
    /// SSH_FXF_EXCL
    pub const EXCLUSIVE: Self = Self(0x0000_0020);

    /// Union of two flag sets.
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

mod attr_flags {
    pub const SIZE: u32 = 0x0000_0001;
    pub const UIDGID: u32 = 0x0000_0002;
    pub const PERMISSIONS: u32 = 0x0000_0004;
    pub const ACMODTIME: u32 = 0x0000_0008;
}

/// File attributes, each field optional per its flag bit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes
    pub size: Option<u64>,
    /// Owner uid
    pub uid: Option<u32>,
    /// Owner gid
    pub gid: Option<u32>,
    /// POSIX permission bits including the file type
    pub permissions: Option<u32>,
    /// Access time, seconds since the epoch
    pub atime: Option<u32>,
    /// Modification time, seconds since the epoch
    pub mtime: Option<u32>,
}

impl FileAttributes {
    /// Attributes carrying only a size.
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    /// True if the permission bits mark a directory.
    pub fn is_dir(&self) -> bool {
        self.permissions
            .map(|p| p & 0o170000 == 0o040000)
            .unwrap_or(false)
    }

    /// True if the permission bits mark a regular file.
    pub fn is_file(&self) -> bool {
        self.permissions
            .map(|p| p & 0o170000 == 0o100000)
            .unwrap_or(false)
    }

    /// Encodes the flags word and the present fields.
    pub fn encode(&self, buf: &mut WireBuffer) {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= attr_flags::SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= attr_flags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= attr_flags::PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= attr_flags::ACMODTIME;
        }
        buf.write_u32(flags);
        if let Some(size) = self.size {
            buf.write_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.write_u32(uid);
            buf.write_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.write_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.write_u32(atime);
            buf.write_u32(mtime);
        }
    }

    /// Decodes the flags word and the fields it announces.
    pub fn decode(buf: &mut WireBuffer) -> SkiffResult<Self> {
        let flags = buf.read_u32()?;
        let mut attrs = Self::default();
        if flags & attr_flags::SIZE != 0 {
            attrs.size = Some(buf.read_u64()?);
        }
        if flags & attr_flags::UIDGID != 0 {
            attrs.uid = Some(buf.read_u32()?);
            attrs.gid = Some(buf.read_u32()?);
        }
        if flags & attr_flags::PERMISSIONS != 0 {
            attrs.permissions = Some(buf.read_u32()?);
        }
        if flags & attr_flags::ACMODTIME != 0 {
            attrs.atime = Some(buf.read_u32()?);
            attrs.mtime = Some(buf.read_u32()?);
        }
        Ok(attrs)
    }
}

/// Reply to the `statvfs@openssh.com` extension: eleven uint64 fields
/// mirroring POSIX `statvfs(2)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatVfs {
    /// Preferred I/O block size
    pub block_size: u64,
    /// Fundamental block size
    pub fragment_size: u64,
    /// Total blocks, in fragment-size units
    pub blocks: u64,
    /// Free blocks
    pub blocks_free: u64,
    /// Free blocks available to unprivileged users
    pub blocks_available: u64,
    /// Total inodes
    pub files: u64,
    /// Free inodes
    pub files_free: u64,
    /// Free inodes available to unprivileged users
    pub files_available: u64,
    /// Filesystem id
    pub fs_id: u64,
    /// Mount flags
    pub flags: u64,
    /// Maximum filename length
    pub name_max: u64,
}

impl StatVfs {
    /// Decodes an extended-reply body.
    pub fn decode(data: &[u8]) -> SkiffResult<Self> {
        let mut buf = WireBuffer::from(data);
        Ok(Self {
            block_size: buf.read_u64()?,
            fragment_size: buf.read_u64()?,
            blocks: buf.read_u64()?,
            blocks_free: buf.read_u64()?,
            blocks_available: buf.read_u64()?,
            files: buf.read_u64()?,
            files_free: buf.read_u64()?,
            files_available: buf.read_u64()?,
            fs_id: buf.read_u64()?,
            flags: buf.read_u64()?,
            name_max: buf.read_u64()?,
        })
    }

    /// Encodes the reply body.
    pub fn encode(&self, buf: &mut WireBuffer) {
        buf.write_u64(self.block_size);
        buf.write_u64(self.fragment_size);
        buf.write_u64(self.blocks);
        buf.write_u64(self.blocks_free);
        buf.write_u64(self.blocks_available);
        buf.write_u64(self.files);
        buf.write_u64(self.files_free);
        buf.write_u64(self.files_available);
        buf.write_u64(self.fs_id);
        buf.write_u64(self.flags);
        buf.write_u64(self.name_max);
    }
}

/// One entry of an SSH_FXP_NAME reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Bare file name
    pub filename: String,
    /// `ls -l` style presentation line
    pub longname: String,
    /// Attributes the server chose to include
    pub attrs: FileAttributes,
}
