//! SFTP version 3 client engine.
//!
//! The session rides on any async byte stream. A background task owns the
//! read half and routes each reply to the waiter registered under its
//! request id, so any number of requests can be in flight at once.
//!
//! Bulk transfers exploit that: [`FileHandle::write_fully`] and
//! [`FileHandle::read_fully`] split the work into chunks of at most
//! [`MAX_CHUNK`] bytes and keep up to [`PIPELINE_DEPTH`] requests
//! outstanding. When the window fills, the sender drains completions down
//! to [`PIPELINE_RESUME`] before issuing more, so the pipe stays busy
//! without ballooning.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::message::{request, Reply, MAX_FRAME_SIZE};
use super::types::{
    DirEntry, FileAttributes, OpenFlags, SftpError, SftpResult, StatVfs, SFTP_VERSION,
};
use crate::ssh::wire::WireBuffer;

/// Largest data chunk per READ or WRITE request.
pub const MAX_CHUNK: usize = 32 * 1024;

/// Maximum requests in flight during a bulk transfer.
pub const PIPELINE_DEPTH: usize = 24;

/// Once the window is full, drain completions down to this many before
/// sending again.
pub const PIPELINE_RESUME: usize = PIPELINE_DEPTH / 2;

/// OpenSSH extension names the client can drive when the server
/// advertises them.
pub mod ext {
    /// Atomic rename with POSIX overwrite semantics
    pub const POSIX_RENAME: &str = "posix-rename@openssh.com";
    /// Filesystem statistics
    pub const STATVFS: &str = "statvfs@openssh.com";
    /// Hard link creation
    pub const HARDLINK: &str = "hardlink@openssh.com";
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Reader = Box<dyn AsyncRead + Send + Unpin>;

struct ClientInner {
    writer: Mutex<Writer>,
    /// Waiters by request id; `None` once the receive loop has stopped.
    pending: StdMutex<Option<HashMap<u32, oneshot::Sender<Reply>>>>,
    next_id: AtomicU32,
    server_version: u32,
    extensions: Vec<(String, String)>,
    recv_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.recv_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

/// Handle to an SFTP session. Cheap to clone; all clones share one
/// request pipeline.
#[derive(Clone)]
pub struct SftpClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SftpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpClient")
            .field("server_version", &self.inner.server_version)
            .finish()
    }
}

/// Reads one frame (length stripped) from the stream.
async fn read_frame(reader: &mut Reader) -> SftpResult<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(SftpError::Protocol(format!(
            "frame length {} outside 1..={}",
            len, MAX_FRAME_SIZE
        )));
    }
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

async fn recv_loop(mut reader: Reader, inner: Arc<ClientInner>) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "sftp receive loop ended");
                break;
            }
        };
        let reply = match Reply::parse(&frame) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "malformed sftp reply");
                break;
            }
        };
        let Some(id) = reply.id() else {
            warn!("unsolicited VERSION packet after session start");
            continue;
        };
        let waiter = {
            let mut guard = match inner.pending.lock() {
                Ok(guard) => guard,
                Err(_) => break,
            };
            guard.as_mut().and_then(|map| map.remove(&id))
        };
        match waiter {
            Some(tx) => {
                // The waiter may have given up; that is not an error.
                let _ = tx.send(reply);
            }
            None => warn!(id, "reply for unknown request id"),
        }
    }
    // Wake every outstanding waiter with a closed channel.
    if let Ok(mut guard) = inner.pending.lock() {
        guard.take();
    }
}

impl SftpClient {
    /// Starts a session: sends INIT, validates the server's VERSION, and
    /// spawns the receive loop.
    pub async fn start<S>(stream: S) -> SftpResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        write_half.write_all(&request::init(SFTP_VERSION)).await?;
        write_half.flush().await?;

        let mut reader: Reader = Box::new(read_half);
        let hello = read_frame(&mut reader).await?;
        let (server_version, extensions) = match Reply::parse(&hello)
            .map_err(SftpError::Transport)?
        {
            Reply::Version {
                version,
                extensions,
            } => (version, extensions),
            other => {
                return Err(SftpError::Protocol(format!(
                    "expected VERSION, got {:?}",
                    other
                )))
            }
        };
        if server_version != SFTP_VERSION {
            return Err(SftpError::Unsupported(format!(
                "server speaks sftp version {}, need {}",
                server_version, SFTP_VERSION
            )));
        }
        debug!(version = server_version, extensions = extensions.len(), "sftp session started");

        let inner = Arc::new(ClientInner {
            writer: Mutex::new(Box::new(write_half)),
            pending: StdMutex::new(Some(HashMap::new())),
            next_id: AtomicU32::new(0),
            server_version,
            extensions,
            recv_task: StdMutex::new(None),
        });
        let task = tokio::spawn(recv_loop(reader, Arc::clone(&inner)));
        if let Ok(mut guard) = inner.recv_task.lock() {
            *guard = Some(task);
        }
        Ok(Self { inner })
    }

    /// The server's protocol version (always 3 for an open session).
    pub fn server_version(&self) -> u32 {
        self.inner.server_version
    }

    /// Extensions the server advertised in its VERSION packet.
    pub fn extensions(&self) -> &[(String, String)] {
        &self.inner.extensions
    }

    /// True if the server advertised the named extension (e.g.
    /// `posix-rename@openssh.com`).
    pub fn supports_extension(&self, name: &str) -> bool {
        self.inner.extensions.iter().any(|(n, _)| n == name)
    }

    fn next_id(&self) -> u32 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a waiter and sends one request, returning the reply
    /// channel without awaiting it.
    async fn enqueue(&self, id: u32, bytes: Vec<u8>) -> SftpResult<oneshot::Receiver<Reply>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self
                .inner
                .pending
                .lock()
                .map_err(|_| SftpError::ConnectionLost)?;
            let Some(map) = guard.as_mut() else {
                return Err(SftpError::ConnectionLost);
            };
            map.insert(id, tx);
        }
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        trace!(id, len = bytes.len(), "sftp request sent");
        Ok(rx)
    }

    async fn roundtrip(&self, id: u32, bytes: Vec<u8>) -> SftpResult<Reply> {
        let rx = self.enqueue(id, bytes).await?;
        await_reply(rx).await
    }

    /// Opens a file, returning a handle tied to this session.
    pub async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: &FileAttributes,
    ) -> SftpResult<FileHandle> {
        let id = self.next_id();
        let reply = self.roundtrip(id, request::open(id, path, flags, attrs)).await?;
        let handle = expect_handle(reply, id)?;
        Ok(FileHandle {
            client: self.clone(),
            handle,
            path: path.to_string(),
            closed: AtomicBool::new(false),
            write_watermark: AtomicU64::new(0),
        })
    }

    /// Stats a path, following symlinks.
    pub async fn stat(&self, path: &str) -> SftpResult<FileAttributes> {
        let id = self.next_id();
        expect_attrs(self.roundtrip(id, request::stat(id, path)).await?, id)
    }

    /// Stats a path without following symlinks.
    pub async fn lstat(&self, path: &str) -> SftpResult<FileAttributes> {
        let id = self.next_id();
        expect_attrs(self.roundtrip(id, request::lstat(id, path)).await?, id)
    }

    /// Sets attributes on a path.
    pub async fn setstat(&self, path: &str, attrs: &FileAttributes) -> SftpResult<()> {
        let id = self.next_id();
        expect_ok(self.roundtrip(id, request::setstat(id, path, attrs)).await?, id)
    }

    /// Removes a file.
    pub async fn remove(&self, path: &str) -> SftpResult<()> {
        let id = self.next_id();
        expect_ok(self.roundtrip(id, request::remove(id, path)).await?, id)
    }

    /// Creates a directory.
    pub async fn mkdir(&self, path: &str, attrs: &FileAttributes) -> SftpResult<()> {
        let id = self.next_id();
        expect_ok(self.roundtrip(id, request::mkdir(id, path, attrs)).await?, id)
    }

    /// Removes an empty directory.
    pub async fn rmdir(&self, path: &str) -> SftpResult<()> {
        let id = self.next_id();
        expect_ok(self.roundtrip(id, request::rmdir(id, path)).await?, id)
    }

    /// Renames a file or directory.
    pub async fn rename(&self, from: &str, to: &str) -> SftpResult<()> {
        let id = self.next_id();
        expect_ok(self.roundtrip(id, request::rename(id, from, to)).await?, id)
    }

    /// Canonicalizes a path on the server.
    pub async fn realpath(&self, path: &str) -> SftpResult<String> {
        let id = self.next_id();
        let reply = self.roundtrip(id, request::realpath(id, path)).await?;
        let mut entries = expect_name(reply, id)?;
        if entries.is_empty() {
            return Err(SftpError::Protocol(
                "REALPATH returned no entries".to_string(),
            ));
        }
        Ok(entries.remove(0).filename)
    }

    /// Reads a symlink target.
    pub async fn readlink(&self, path: &str) -> SftpResult<String> {
        let id = self.next_id();
        let reply = self.roundtrip(id, request::readlink(id, path)).await?;
        let mut entries = expect_name(reply, id)?;
        if entries.is_empty() {
            return Err(SftpError::Protocol(
                "READLINK returned no entries".to_string(),
            ));
        }
        Ok(entries.remove(0).filename)
    }

    /// Creates a symlink at `link_path` pointing to `target`.
    pub async fn symlink(&self, target: &str, link_path: &str) -> SftpResult<()> {
        let id = self.next_id();
        expect_ok(
            self.roundtrip(id, request::symlink(id, target, link_path)).await?,
            id,
        )
    }

    fn require_extension(&self, name: &str) -> SftpResult<()> {
        if self.supports_extension(name) {
            Ok(())
        } else {
            Err(SftpError::Unsupported(format!(
                "server does not advertise {}",
                name
            )))
        }
    }

    /// Renames with POSIX overwrite semantics via
    /// `posix-rename@openssh.com`. Fails with [`SftpError::Unsupported`]
    /// when the server did not advertise the extension.
    pub async fn posix_rename(&self, from: &str, to: &str) -> SftpResult<()> {
        self.require_extension(ext::POSIX_RENAME)?;
        let mut data = WireBuffer::new();
        data.write_string(from);
        data.write_string(to);
        let id = self.next_id();
        expect_ok(
            self.roundtrip(id, request::extended(id, ext::POSIX_RENAME, data.as_slice()))
                .await?,
            id,
        )
    }

    /// Creates a hard link via `hardlink@openssh.com`. Fails with
    /// [`SftpError::Unsupported`] when the server did not advertise the
    /// extension.
    pub async fn hardlink(&self, existing: &str, link_path: &str) -> SftpResult<()> {
        self.require_extension(ext::HARDLINK)?;
        let mut data = WireBuffer::new();
        data.write_string(existing);
        data.write_string(link_path);
        let id = self.next_id();
        expect_ok(
            self.roundtrip(id, request::extended(id, ext::HARDLINK, data.as_slice()))
                .await?,
            id,
        )
    }

    /// Queries filesystem statistics via `statvfs@openssh.com`. Fails
    /// with [`SftpError::Unsupported`] when the server did not advertise
    /// the extension.
    pub async fn statvfs(&self, path: &str) -> SftpResult<StatVfs> {
        self.require_extension(ext::STATVFS)?;
        let mut data = WireBuffer::new();
        data.write_string(path);
        let id = self.next_id();
        match self
            .roundtrip(id, request::extended(id, ext::STATVFS, data.as_slice()))
            .await?
        {
            Reply::ExtendedReply { data, .. } => Ok(StatVfs::decode(&data)?),
            Reply::Status { code, message, .. } => Err(SftpError::from_status(code, message)
                .unwrap_or_else(|| SftpError::Protocol("OK status for statvfs".to_string()))),
            other => Err(reply_mismatch(other, id)),
        }
    }

    /// Sends a vendor extension request, returning the raw reply payload.
    pub async fn extended(&self, name: &str, data: &[u8]) -> SftpResult<Vec<u8>> {
        let id = self.next_id();
        match self.roundtrip(id, request::extended(id, name, data)).await? {
            Reply::ExtendedReply { data, .. } => Ok(data),
            Reply::Status { code, message, .. } => {
                Err(SftpError::from_status(code, message)
                    .unwrap_or_else(|| SftpError::Protocol("OK status for EXTENDED".to_string())))
            }
            other => Err(reply_mismatch(other, id)),
        }
    }

    /// Lists a directory completely: OPENDIR, READDIR until EOF, CLOSE.
    pub async fn read_dir(&self, path: &str) -> SftpResult<Vec<DirEntry>> {
        let id = self.next_id();
        let reply = self.roundtrip(id, request::opendir(id, path)).await?;
        let handle = expect_handle(reply, id)?;

        let mut entries = Vec::new();
        let result = loop {
            let id = self.next_id();
            match self.roundtrip(id, request::readdir(id, &handle)).await {
                Ok(Reply::Name { entries: batch, .. }) => entries.extend(batch),
                Ok(Reply::Status { code, message, .. }) => {
                    match SftpError::from_status(code, message) {
                        Some(SftpError::Eof) | None => break Ok(()),
                        Some(err) => break Err(err),
                    }
                }
                Ok(other) => break Err(reply_mismatch(other, id)),
                Err(err) => break Err(err),
            }
        };

        // Close the directory handle even if listing failed partway.
        let id = self.next_id();
        let close_result = self.roundtrip(id, request::close(id, &handle)).await;
        result?;
        expect_ok(close_result?, id)?;
        Ok(entries)
    }
}

async fn await_reply(rx: oneshot::Receiver<Reply>) -> SftpResult<Reply> {
    rx.await.map_err(|_| SftpError::ConnectionLost)
}

fn reply_mismatch(reply: Reply, id: u32) -> SftpError {
    SftpError::Protocol(format!(
        "unexpected reply {:?} for request {}",
        reply, id
    ))
}

fn expect_ok(reply: Reply, id: u32) -> SftpResult<()> {
    match reply {
        Reply::Status { code, message, .. } => match SftpError::from_status(code, message) {
            None => Ok(()),
            Some(err) => Err(err),
        },
        other => Err(reply_mismatch(other, id)),
    }
}

fn expect_handle(reply: Reply, id: u32) -> SftpResult<Vec<u8>> {
    match reply {
        Reply::Handle { handle, .. } => Ok(handle),
        Reply::Status { code, message, .. } => Err(SftpError::from_status(code, message)
            .unwrap_or_else(|| SftpError::Protocol("OK status where HANDLE expected".to_string()))),
        other => Err(reply_mismatch(other, id)),
    }
}

fn expect_attrs(reply: Reply, id: u32) -> SftpResult<FileAttributes> {
    match reply {
        Reply::Attrs { attrs, .. } => Ok(attrs),
        Reply::Status { code, message, .. } => Err(SftpError::from_status(code, message)
            .unwrap_or_else(|| SftpError::Protocol("OK status where ATTRS expected".to_string()))),
        other => Err(reply_mismatch(other, id)),
    }
}

fn expect_name(reply: Reply, id: u32) -> SftpResult<Vec<DirEntry>> {
    match reply {
        Reply::Name { entries, .. } => Ok(entries),
        Reply::Status { code, message, .. } => Err(SftpError::from_status(code, message)
            .unwrap_or_else(|| SftpError::Protocol("OK status where NAME expected".to_string()))),
        other => Err(reply_mismatch(other, id)),
    }
}

fn expect_data(reply: Reply, id: u32) -> SftpResult<Vec<u8>> {
    match reply {
        Reply::Data { data, .. } => Ok(data),
        Reply::Status { code, message, .. } => Err(SftpError::from_status(code, message)
            .unwrap_or_else(|| SftpError::Protocol("OK status where DATA expected".to_string()))),
        other => Err(reply_mismatch(other, id)),
    }
}

/// An open remote file (or directory) handle.
pub struct FileHandle {
    client: SftpClient,
    handle: Vec<u8>,
    path: String,
    closed: AtomicBool,
    /// Highest end offset written through this handle, enforcing that
    /// bulk writes only move forward.
    write_watermark: AtomicU64,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl FileHandle {
    /// The remote path this handle was opened for.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn ensure_open(&self) -> SftpResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SftpError::HandleClosed);
        }
        Ok(())
    }

    /// Reads at most `len` bytes at `offset` with a single request. The
    /// server may return less; end of file is [`SftpError::Eof`].
    pub async fn read_at(&self, offset: u64, len: u32) -> SftpResult<Vec<u8>> {
        self.ensure_open()?;
        let id = self.client.next_id();
        let reply = self
            .client
            .roundtrip(id, request::read(id, &self.handle, offset, len))
            .await?;
        expect_data(reply, id)
    }

    /// Writes `data` at `offset` with a single request.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> SftpResult<()> {
        self.ensure_open()?;
        let id = self.client.next_id();
        let reply = self
            .client
            .roundtrip(id, request::write(id, &self.handle, offset, data))
            .await?;
        expect_ok(reply, id)
    }

    /// Writes all of `data` at `offset`, pipelining chunk requests.
    ///
    /// Writes through one handle must move forward: starting below the
    /// high-water mark of a previous bulk write is rejected, because
    /// overlapping pipelined writes can land in any order on the server.
    pub async fn write_fully(&self, offset: u64, data: &[u8]) -> SftpResult<()> {
        self.ensure_open()?;
        let watermark = self.write_watermark.load(Ordering::Acquire);
        if offset < watermark {
            return Err(SftpError::Protocol(format!(
                "non-monotonic bulk write: offset {} below watermark {}",
                offset, watermark
            )));
        }

        let mut queue: VecDeque<(u32, oneshot::Receiver<Reply>)> = VecDeque::new();
        let mut sent = 0usize;
        loop {
            if queue.len() <= PIPELINE_RESUME {
                while queue.len() < PIPELINE_DEPTH && sent < data.len() {
                    let end = (sent + MAX_CHUNK).min(data.len());
                    let id = self.client.next_id();
                    let bytes =
                        request::write(id, &self.handle, offset + sent as u64, &data[sent..end]);
                    queue.push_back((id, self.client.enqueue(id, bytes).await?));
                    sent = end;
                }
            }
            let Some((id, rx)) = queue.pop_front() else { break };
            expect_ok(await_reply(rx).await?, id)?;
        }

        self.write_watermark
            .store(offset + data.len() as u64, Ordering::Release);
        Ok(())
    }

    /// Reads exactly `len` bytes at `offset`, pipelining chunk requests.
    /// Returns fewer bytes only when the file ends first.
    pub async fn read_fully(&self, offset: u64, len: usize) -> SftpResult<Vec<u8>> {
        self.ensure_open()?;
        let mut out = vec![0u8; len];
        // Window entries stay in file order; a short read re-requests the
        // remainder at the front so order is preserved.
        let mut queue: VecDeque<(usize, u32, u32, oneshot::Receiver<Reply>)> = VecDeque::new();
        let mut next = 0usize;
        let mut eof_at: Option<usize> = None;

        loop {
            if eof_at.is_none() && queue.len() <= PIPELINE_RESUME {
                while queue.len() < PIPELINE_DEPTH && next < len {
                    let want = (len - next).min(MAX_CHUNK) as u32;
                    let id = self.client.next_id();
                    let bytes =
                        request::read(id, &self.handle, offset + next as u64, want);
                    queue.push_back((next, want, id, self.client.enqueue(id, bytes).await?));
                    next += want as usize;
                }
            }
            let Some((buf_off, want, id, rx)) = queue.pop_front() else { break };
            match expect_data(await_reply(rx).await?, id) {
                Ok(data) => {
                    if data.len() > want as usize {
                        return Err(SftpError::Protocol(format!(
                            "server returned {} bytes for a {}-byte read",
                            data.len(),
                            want
                        )));
                    }
                    out[buf_off..buf_off + data.len()].copy_from_slice(&data);
                    if data.len() < want as usize {
                        // Short read: fetch the tail before anything else.
                        let tail_off = buf_off + data.len();
                        let tail_want = want - data.len() as u32;
                        let id = self.client.next_id();
                        let bytes = request::read(
                            id,
                            &self.handle,
                            offset + tail_off as u64,
                            tail_want,
                        );
                        queue.push_front((
                            tail_off,
                            tail_want,
                            id,
                            self.client.enqueue(id, bytes).await?,
                        ));
                    }
                }
                Err(SftpError::Eof) => {
                    // Everything past this chunk is beyond the end too.
                    eof_at = Some(buf_off);
                    queue.clear();
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(end) = eof_at {
            out.truncate(end);
        }
        Ok(out)
    }

    /// Stats the open handle.
    pub async fn fstat(&self) -> SftpResult<FileAttributes> {
        self.ensure_open()?;
        let id = self.client.next_id();
        let reply = self
            .client
            .roundtrip(id, request::fstat(id, &self.handle))
            .await?;
        expect_attrs(reply, id)
    }

    /// Sets attributes on the open handle.
    pub async fn fsetstat(&self, attrs: &FileAttributes) -> SftpResult<()> {
        self.ensure_open()?;
        let id = self.client.next_id();
        let reply = self
            .client
            .roundtrip(id, request::fsetstat(id, &self.handle, attrs))
            .await?;
        expect_ok(reply, id)
    }

    /// Resolves the file's real size, falling back when the server is
    /// cagey: FSTAT first, then STAT by path, then the parent directory
    /// listing.
    pub async fn real_size(&self) -> SftpResult<u64> {
        self.ensure_open()?;
        if let Ok(attrs) = self.fstat().await {
            if let Some(size) = attrs.size {
                return Ok(size);
            }
        }
        if let Ok(attrs) = self.client.stat(&self.path).await {
            if let Some(size) = attrs.size {
                return Ok(size);
            }
        }
        let (parent, name) = match self.path.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some((parent, name)) => (parent, name),
            None => (".", self.path.as_str()),
        };
        let entries = self.client.read_dir(parent).await?;
        entries
            .iter()
            .find(|entry| entry.filename == name)
            .and_then(|entry| entry.attrs.size)
            .ok_or_else(|| SftpError::Failure("file size unavailable".to_string()))
    }

    /// Closes the handle on the server. Further operations fail with
    /// [`SftpError::HandleClosed`]; closing twice is a no-op.
    pub async fn close(&self) -> SftpResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let id = self.client.next_id();
        let reply = self
            .client
            .roundtrip(id, request::close(id, &self.handle))
            .await?;
        expect_ok(reply, id)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Relaxed) {
            debug!(path = %self.path, "file handle dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::message::fxp;
    use super::*;
    use crate::ssh::wire::WireBuffer;
    use std::sync::Mutex as StdMutex;

    /// Minimal scripted server: one file, handle "h0".
    async fn mock_server(
        stream: tokio::io::DuplexStream,
        file: Arc<StdMutex<Vec<u8>>>,
    ) {
        use super::super::message::frame;
        let (mut reader, mut writer) = tokio::io::split(stream);
        loop {
            let mut len_bytes = [0u8; 4];
            if reader.read_exact(&mut len_bytes).await.is_err() {
                return;
            }
            let len = u32::from_be_bytes(len_bytes) as usize;
            let mut packet = vec![0u8; len];
            if reader.read_exact(&mut packet).await.is_err() {
                return;
            }
            let mut buf = WireBuffer::from(&packet[1..]);
            let reply = match packet[0] {
                fxp::INIT => {
                    let mut body = WireBuffer::new();
                    body.write_u32(SFTP_VERSION);
                    body.write_string("hardlink@openssh.com");
                    body.write_string("1");
                    body.write_string("statvfs@openssh.com");
                    body.write_string("2");
                    frame(fxp::VERSION, body.as_slice())
                }
                fxp::OPEN => {
                    let id = buf.read_u32().unwrap();
                    let mut body = WireBuffer::new();
                    body.write_u32(id);
                    body.write_bytes(b"h0");
                    frame(fxp::HANDLE, body.as_slice())
                }
                fxp::WRITE => {
                    let id = buf.read_u32().unwrap();
                    let _handle = buf.read_bytes().unwrap();
                    let offset = buf.read_u64().unwrap() as usize;
                    let data = buf.read_bytes().unwrap();
                    {
                        let mut file = file.lock().unwrap();
                        if file.len() < offset + data.len() {
                            file.resize(offset + data.len(), 0);
                        }
                        file[offset..offset + data.len()].copy_from_slice(&data);
                    }
                    status_ok(id)
                }
                fxp::READ => {
                    let id = buf.read_u32().unwrap();
                    let _handle = buf.read_bytes().unwrap();
                    let offset = buf.read_u64().unwrap() as usize;
                    let want = buf.read_u32().unwrap() as usize;
                    let file = file.lock().unwrap();
                    if offset >= file.len() {
                        let mut body = WireBuffer::new();
                        body.write_u32(id);
                        body.write_u32(super::super::types::status::EOF);
                        body.write_string("eof");
                        body.write_string("");
                        frame(fxp::STATUS, body.as_slice())
                    } else {
                        let end = (offset + want).min(file.len());
                        let mut body = WireBuffer::new();
                        body.write_u32(id);
                        body.write_bytes(&file[offset..end]);
                        frame(fxp::DATA, body.as_slice())
                    }
                }
                fxp::CLOSE => {
                    let id = buf.read_u32().unwrap();
                    status_ok(id)
                }
                fxp::EXTENDED => {
                    let id = buf.read_u32().unwrap();
                    let name = buf.read_string().unwrap();
                    match name.as_str() {
                        "hardlink@openssh.com" => status_ok(id),
                        "statvfs@openssh.com" => {
                            let mut body = WireBuffer::new();
                            body.write_u32(id);
                            StatVfs {
                                block_size: 4096,
                                fragment_size: 4096,
                                blocks: 1000,
                                blocks_free: 500,
                                blocks_available: 400,
                                files: 100,
                                files_free: 50,
                                files_available: 40,
                                fs_id: 7,
                                flags: 0,
                                name_max: 255,
                            }
                            .encode(&mut body);
                            frame(fxp::EXTENDED_REPLY, body.as_slice())
                        }
                        _ => {
                            let mut body = WireBuffer::new();
                            body.write_u32(id);
                            body.write_u32(super::super::types::status::OP_UNSUPPORTED);
                            body.write_string(&name);
                            body.write_string("");
                            frame(fxp::STATUS, body.as_slice())
                        }
                    }
                }
                fxp::FSTAT => {
                    let id = buf.read_u32().unwrap();
                    let mut body = WireBuffer::new();
                    body.write_u32(id);
                    FileAttributes::with_size(file.lock().unwrap().len() as u64)
                        .encode(&mut body);
                    frame(fxp::ATTRS, body.as_slice())
                }
                other => {
                    let id = buf.read_u32().unwrap_or(0);
                    let mut body = WireBuffer::new();
                    body.write_u32(id);
                    body.write_u32(super::super::types::status::OP_UNSUPPORTED);
                    body.write_string(&format!("type {}", other));
                    body.write_string("");
                    frame(fxp::STATUS, body.as_slice())
                }
            };
            if writer.write_all(&reply).await.is_err() {
                return;
            }
        }
    }

    fn status_ok(id: u32) -> Vec<u8> {
        use super::super::message::frame;
        let mut body = WireBuffer::new();
        body.write_u32(id);
        body.write_u32(super::super::types::status::OK);
        body.write_string("ok");
        body.write_string("");
        frame(fxp::STATUS, body.as_slice())
    }

    async fn session() -> (SftpClient, Arc<StdMutex<Vec<u8>>>) {
        let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
        let file = Arc::new(StdMutex::new(Vec::new()));
        tokio::spawn(mock_server(server_stream, Arc::clone(&file)));
        (SftpClient::start(client_stream).await.unwrap(), file)
    }

    #[tokio::test]
    async fn test_session_start_reads_extensions() {
        let (client, _) = session().await;
        assert_eq!(client.server_version(), 3);
        assert_eq!(client.extensions().len(), 2);
        assert_eq!(client.extensions()[0].0, "hardlink@openssh.com");
        assert!(client.supports_extension(ext::HARDLINK));
        assert!(client.supports_extension(ext::STATVFS));
        assert!(!client.supports_extension(ext::POSIX_RENAME));
    }

    #[tokio::test]
    async fn test_hardlink_extension_round_trip() {
        let (client, _) = session().await;
        client.hardlink("/a", "/a-link").await.unwrap();
    }

    #[tokio::test]
    async fn test_statvfs_decodes_reply() {
        let (client, _) = session().await;
        let vfs = client.statvfs("/").await.unwrap();
        assert_eq!(vfs.block_size, 4096);
        assert_eq!(vfs.blocks_available, 400);
        assert_eq!(vfs.name_max, 255);
    }

    #[tokio::test]
    async fn test_unadvertised_extension_is_rejected() {
        let (client, _) = session().await;
        match client.posix_rename("/a", "/b").await {
            Err(SftpError::Unsupported(msg)) => {
                assert!(msg.contains("posix-rename@openssh.com"))
            }
            other => panic!("expected Unsupported, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_write_read_close() {
        let (client, file) = session().await;
        let handle = client
            .open(
                "/tmp/out.bin",
                OpenFlags::WRITE | OpenFlags::CREATE,
                &FileAttributes::default(),
            )
            .await
            .unwrap();

        handle.write_at(0, b"hello sftp").await.unwrap();
        assert_eq!(&*file.lock().unwrap(), b"hello sftp");

        let data = handle.read_at(6, 4).await.unwrap();
        assert_eq!(data, b"sftp");

        handle.close().await.unwrap();
        assert!(matches!(
            handle.read_at(0, 1).await,
            Err(SftpError::HandleClosed)
        ));
        // Double close is a no-op.
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_fully_pipelines_and_reassembles() {
        let (client, file) = session().await;
        let handle = client
            .open("/f", OpenFlags::WRITE, &FileAttributes::default())
            .await
            .unwrap();

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        handle.write_fully(0, &payload).await.unwrap();
        assert_eq!(&*file.lock().unwrap(), &payload);

        let back = handle.read_fully(0, payload.len()).await.unwrap();
        assert_eq!(back, payload);
    }

    #[tokio::test]
    async fn test_read_fully_truncates_at_eof() {
        let (client, file) = session().await;
        file.lock().unwrap().extend_from_slice(b"short file");
        let handle = client
            .open("/f", OpenFlags::READ, &FileAttributes::default())
            .await
            .unwrap();

        let data = handle.read_fully(0, 1_000_000).await.unwrap();
        assert_eq!(data, b"short file");
    }

    #[tokio::test]
    async fn test_write_watermark_guard() {
        let (client, _) = session().await;
        let handle = client
            .open("/f", OpenFlags::WRITE, &FileAttributes::default())
            .await
            .unwrap();

        handle.write_fully(0, &[1u8; 100]).await.unwrap();
        let result = handle.write_fully(50, &[2u8; 10]).await;
        assert!(matches!(result, Err(SftpError::Protocol(_))));
        // At or past the watermark is fine.
        handle.write_fully(100, &[3u8; 10]).await.unwrap();
    }

    #[tokio::test]
    async fn test_real_size_via_fstat() {
        let (client, file) = session().await;
        file.lock().unwrap().resize(4242, 7);
        let handle = client
            .open("/f", OpenFlags::READ, &FileAttributes::default())
            .await
            .unwrap();
        assert_eq!(handle.real_size().await.unwrap(), 4242);
    }

    #[tokio::test]
    async fn test_unsupported_operation_maps_to_typed_fault() {
        let (client, _) = session().await;
        let result = client.remove("/f").await;
        assert!(matches!(result, Err(SftpError::Unsupported(_))));
    }

    /// A server answering a WRITE with the wrong reply type must be
    /// reported against that request's id, not a placeholder.
    #[tokio::test]
    async fn test_bulk_write_fault_names_failing_request() {
        use super::super::message::frame;

        let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(server_stream);
            loop {
                let mut len_bytes = [0u8; 4];
                if reader.read_exact(&mut len_bytes).await.is_err() {
                    return;
                }
                let len = u32::from_be_bytes(len_bytes) as usize;
                let mut packet = vec![0u8; len];
                if reader.read_exact(&mut packet).await.is_err() {
                    return;
                }
                let mut buf = WireBuffer::from(&packet[1..]);
                let reply = match packet[0] {
                    fxp::INIT => {
                        let mut body = WireBuffer::new();
                        body.write_u32(SFTP_VERSION);
                        frame(fxp::VERSION, body.as_slice())
                    }
                    // Everything else gets a HANDLE back, which is the
                    // wrong reply type for WRITE.
                    _ => {
                        let id = buf.read_u32().unwrap();
                        let mut body = WireBuffer::new();
                        body.write_u32(id);
                        body.write_bytes(b"h0");
                        frame(fxp::HANDLE, body.as_slice())
                    }
                };
                if writer.write_all(&reply).await.is_err() {
                    return;
                }
            }
        });

        let client = SftpClient::start(client_stream).await.unwrap();
        let handle = client
            .open("/f", OpenFlags::WRITE, &FileAttributes::default())
            .await
            .unwrap();
        // OPEN took id 0, so the failing WRITE carries id 1.
        match handle.write_fully(0, &[0u8; 64]).await {
            Err(SftpError::Protocol(msg)) => {
                assert!(msg.contains("request 1"), "message was: {}", msg)
            }
            other => panic!("expected Protocol fault, got {:?}", other),
        }
    }
}
