//! SFTP version 3 client subsystem.
//!
//! [`client::SftpClient`] drives a request/reply session over any async
//! byte stream; [`client::FileHandle`] layers pipelined bulk transfers on
//! top. Wire details live in [`message`], protocol types in [`types`].

pub mod client;
pub mod message;
pub mod types;

pub use client::{FileHandle, SftpClient, MAX_CHUNK, PIPELINE_DEPTH, PIPELINE_RESUME};
pub use types::{
    DirEntry, FileAttributes, OpenFlags, SftpError, SftpResult, StatVfs, SFTP_VERSION,
};
