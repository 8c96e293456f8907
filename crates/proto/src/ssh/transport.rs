//! Transport state machine (RFC 4253).
//!
//! [`Transport`] owns the stream, the packet codec state for both
//! directions, and the key exchange lifecycle:
//!
//! 1. Version exchange, tolerating pre-banner noise from the server.
//! 2. KEXINIT negotiation and the first key exchange; the first exchange
//!    hash becomes the immutable session id.
//! 3. NEWKEYS, after which traffic is encrypted and authenticated.
//! 4. Transparent re-keying when either direction crosses its traffic
//!    thresholds, or when the peer initiates one.
//!
//! The transport is single-owner: one task calls [`Transport::send`] and
//! [`Transport::recv`], so a re-key runs inline and application traffic
//! simply waits behind it. Packets that arrive mid-re-key are buffered
//! and handed out afterwards in arrival order.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use skiff_platform::{
    NullObserver, SkiffError, SkiffResult, TransportEvent, TransportObserver,
};

use super::crypto::{
    derive_directions, rekey_block_threshold, CipherAlgorithm, CompressionAlgorithm,
    DirectionAlgorithms, MacAlgorithm, Role,
};
use super::hostkey::{AcceptAnyHostKey, HostKeyPair, HostKeyPolicy, HostKeyRegistry};
use super::kex::{ExchangeInput, KexAlgorithm, KexClient, KexServer};
use super::message::{
    disconnect_reason, Debug as DebugMsg, Disconnect, Ignore, MessageClass, MessageType,
    ServiceAccept, ServiceRequest, Unimplemented,
};
use super::packet::{Opener, Sealer};
use super::prefs::{negotiate, KexInit, Negotiated, Preferences};
use super::version::{Version, MAX_CRUD_LINES, MAX_VERSION_LENGTH};

/// Default outbound/inbound byte budget between re-keys: 1 GiB.
pub const DEFAULT_REKEY_BYTES: u64 = 1 << 30;

/// Packets per direction before a re-key is forced, independent of the
/// cipher block budget.
pub const REKEY_PACKET_LIMIT: u64 = 1 << 31;

/// Tunable transport behavior.
pub struct TransportConfig {
    /// Algorithm preference lists
    pub preferences: Preferences,
    /// Our identification string
    pub version: Version,
    /// Bytes per direction before a re-key is forced
    pub rekey_bytes: u64,
    /// Host key verification algorithms
    pub host_keys: HostKeyRegistry,
    /// Host key trust decision (client role)
    pub host_key_policy: Arc<dyn HostKeyPolicy>,
    /// Lifecycle event sink
    pub observer: Arc<dyn TransportObserver>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            preferences: Preferences::default(),
            version: Version::default_skiff(),
            rekey_bytes: DEFAULT_REKEY_BYTES,
            host_keys: HostKeyRegistry::with_defaults(),
            host_key_policy: Arc::new(AcceptAnyHostKey),
            observer: Arc::new(NullObserver),
        }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("version", &self.version)
            .field("rekey_bytes", &self.rekey_bytes)
            .finish()
    }
}

/// A secure transport over any async byte stream.
pub struct Transport<S> {
    stream: S,
    role: Role,
    config: TransportConfig,
    host_key: Option<HostKeyPair>,

    sealer: Sealer,
    opener: Opener,

    local_version: Version,
    peer_version: Version,
    session_id: Vec<u8>,
    negotiated: Negotiated,

    /// Block budgets for the active contexts, per direction
    rekey_blocks_out: u64,
    rekey_blocks_in: u64,

    /// Application payloads that arrived while a re-key was in flight
    inbox: VecDeque<Vec<u8>>,
    closed: bool,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Connects as a client: version exchange plus initial key exchange.
    pub async fn client(stream: S, config: TransportConfig) -> SkiffResult<Self> {
        Self::handshake(stream, config, Role::Client, None).await
    }

    /// Accepts as a server, proving `host_key` to the peer.
    pub async fn server(
        stream: S,
        config: TransportConfig,
        host_key: HostKeyPair,
    ) -> SkiffResult<Self> {
        Self::handshake(stream, config, Role::Server, Some(host_key)).await
    }

    async fn handshake(
        mut stream: S,
        config: TransportConfig,
        role: Role,
        host_key: Option<HostKeyPair>,
    ) -> SkiffResult<Self> {
        let local_version = config.version.clone();
        stream.write_all(&local_version.to_wire_format()).await?;
        stream.flush().await?;
        let peer_version = read_peer_version(&mut stream).await?;
        info!(peer = %peer_version, "version exchange complete");
        config.observer.on_event(&TransportEvent::VersionExchanged {
            peer: peer_version.to_string(),
        });

        let mut transport = Self {
            stream,
            role,
            config,
            host_key,
            sealer: Sealer::new(),
            opener: Opener::new(),
            local_version,
            peer_version,
            session_id: Vec::new(),
            // Placeholder until the first negotiation completes.
            negotiated: Negotiated {
                kex: String::new(),
                host_key: String::new(),
                client_to_server: super::prefs::NegotiatedDirection {
                    cipher: "none".to_string(),
                    mac: "none".to_string(),
                    compression: "none".to_string(),
                },
                server_to_client: super::prefs::NegotiatedDirection {
                    cipher: "none".to_string(),
                    mac: "none".to_string(),
                    compression: "none".to_string(),
                },
                guess_matches: false,
            },
            rekey_blocks_out: u64::MAX,
            rekey_blocks_in: u64::MAX,
            inbox: VecDeque::new(),
            closed: false,
        };

        transport.exchange_keys(None).await?;
        Ok(transport)
    }

    /// Immutable session identifier: the exchange hash of the first key
    /// exchange. Empty only before the handshake completes.
    pub fn session_id(&self) -> &[u8] {
        &self.session_id
    }

    /// The peer's identification string.
    pub fn peer_version(&self) -> &Version {
        &self.peer_version
    }

    /// Algorithms chosen by the most recent negotiation.
    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    /// Sends one application payload, re-keying first if a traffic
    /// threshold has been crossed.
    pub async fn send(&mut self, payload: &[u8]) -> SkiffResult<()> {
        self.ensure_open()?;
        if self.rekey_due() {
            debug!("traffic threshold crossed, initiating re-key");
            self.exchange_keys(None).await?;
        }
        self.write_packet(payload).await
    }

    /// Receives the next application payload, transparently handling
    /// transport-class messages and peer-initiated re-keys.
    pub async fn recv(&mut self) -> SkiffResult<Vec<u8>> {
        self.ensure_open()?;
        loop {
            if let Some(buffered) = self.inbox.pop_front() {
                return Ok(buffered);
            }
            // A receive-heavy connection crosses its inbound thresholds
            // without ever calling send, so the check lives here too.
            if self.rekey_due() {
                debug!("traffic threshold crossed, initiating re-key");
                self.exchange_keys(None).await?;
                continue;
            }
            let payload = self.read_packet().await?;
            if let Some(payload) = self.dispatch(payload).await? {
                return Ok(payload);
            }
        }
    }

    /// Starts a key exchange immediately, without waiting for a traffic
    /// threshold. Returns once the new keys are in effect.
    pub async fn rekey(&mut self) -> SkiffResult<()> {
        self.ensure_open()?;
        debug!("re-key requested");
        self.exchange_keys(None).await
    }

    /// Sends an IGNORE message the peer will discard, used for keepalive
    /// and traffic padding.
    pub async fn send_ignore(&mut self, data: &[u8]) -> SkiffResult<()> {
        self.send(&ignore_payload(data)).await
    }

    /// Sends a DEBUG message.
    pub async fn send_debug(&mut self, always_display: bool, message: &str) -> SkiffResult<()> {
        self.send(&DebugMsg::new(always_display, message).to_bytes()).await
    }

    /// Requests a service by name and waits for the acceptance
    /// (client role).
    pub async fn request_service(&mut self, name: &str) -> SkiffResult<()> {
        self.ensure_open()?;
        let request = ServiceRequest {
            name: name.to_string(),
        };
        self.write_packet(&request.to_bytes()).await?;
        loop {
            let payload = self.read_packet().await?;
            let msg_type = payload.first().copied().unwrap_or(0);
            if msg_type == MessageType::ServiceAccept as u8 {
                let accept = ServiceAccept::from_bytes(&payload)?;
                if accept.name != name {
                    return Err(SkiffError::Protocol(format!(
                        "service acceptance mismatch: asked for {}, got {}",
                        name, accept.name
                    )));
                }
                return Ok(());
            }
            if let Some(app) = self.dispatch(payload).await? {
                self.inbox.push_back(app);
            }
        }
    }

    /// Sends a DISCONNECT and closes the transport. Further calls fail
    /// with [`SkiffError::Disconnected`].
    pub async fn disconnect(&mut self, code: u32, description: &str) -> SkiffResult<()> {
        if self.closed {
            return Ok(());
        }
        let msg = Disconnect::new(code, description);
        self.write_packet(&msg.to_bytes()).await?;
        self.stream.shutdown().await?;
        self.close(code, description.to_string());
        Ok(())
    }

    fn ensure_open(&self) -> SkiffResult<()> {
        if self.closed {
            return Err(SkiffError::Disconnected {
                code: disconnect_reason::CONNECTION_LOST,
                description: "transport is closed".to_string(),
            });
        }
        Ok(())
    }

    fn close(&mut self, code: u32, description: String) {
        if !self.closed {
            self.closed = true;
            self.config
                .observer
                .on_event(&TransportEvent::Disconnected { code, description });
        }
    }

    fn rekey_due(&self) -> bool {
        self.sealer.blocks_sealed() >= self.rekey_blocks_out
            || self.opener.blocks_opened() >= self.rekey_blocks_in
            || self.sealer.bytes_sealed() >= self.config.rekey_bytes
            || self.opener.bytes_opened() >= self.config.rekey_bytes
            || self.sealer.packets_sealed() >= REKEY_PACKET_LIMIT
            || self.opener.packets_opened() >= REKEY_PACKET_LIMIT
    }

    /// Routes one inbound payload. Returns the payload when it belongs to
    /// the application, `None` when it was consumed here.
    async fn dispatch(&mut self, payload: Vec<u8>) -> SkiffResult<Option<Vec<u8>>> {
        let msg_type = payload.first().copied().unwrap_or(0);
        match MessageType::from_u8(msg_type) {
            Some(MessageType::Ignore) => Ok(None),
            Some(MessageType::Debug) => {
                let msg = DebugMsg::from_bytes(&payload)?;
                debug!(message = %msg.message, "peer debug message");
                self.config
                    .observer
                    .on_event(&TransportEvent::DebugReceived {
                        message: msg.message,
                    });
                Ok(None)
            }
            Some(MessageType::Unimplemented) => {
                let msg = Unimplemented::from_bytes(&payload)?;
                warn!(seq = msg.sequence, "peer reported unimplemented message");
                Ok(None)
            }
            Some(MessageType::Disconnect) => {
                let msg = Disconnect::from_bytes(&payload)?;
                self.close(msg.code, msg.description.clone());
                Err(SkiffError::Disconnected {
                    code: msg.code,
                    description: msg.description,
                })
            }
            Some(MessageType::KexInit) => {
                debug!("peer initiated re-key");
                self.exchange_keys(Some(payload)).await?;
                Ok(None)
            }
            Some(MessageType::ServiceRequest) if self.role == Role::Server => {
                let request = ServiceRequest::from_bytes(&payload)?;
                debug!(service = %request.name, "accepting service request");
                let accept = ServiceAccept { name: request.name };
                self.write_packet(&accept.to_bytes()).await?;
                Ok(None)
            }
            Some(MessageType::NewKeys)
            | Some(MessageType::KexDhInit)
            | Some(MessageType::KexDhReply) => Err(SkiffError::Protocol(format!(
                "unexpected message type {} outside key exchange",
                msg_type
            ))),
            None if matches!(
                MessageClass::of(msg_type),
                MessageClass::UserAuth | MessageClass::Connection
            ) =>
            {
                Ok(Some(payload))
            }
            None => {
                // The sequence number of the offending packet is the one
                // the opener just consumed.
                let seq = self.opener.seq().wrapping_sub(1);
                self.config
                    .observer
                    .on_event(&TransportEvent::UnknownMessage { msg_type });
                let reply = Unimplemented {
                    sequence: seq,
                };
                self.write_packet(&reply.to_bytes()).await?;
                Ok(None)
            }
            _ => Ok(Some(payload)),
        }
    }

    /// Runs one full key exchange: the initial handshake, a locally
    /// initiated re-key, or the response to a peer's KEXINIT.
    async fn exchange_keys(&mut self, peer_kexinit: Option<Vec<u8>>) -> SkiffResult<()> {
        let initiated_by_peer = peer_kexinit.is_some();
        self.config.observer.on_event(&TransportEvent::KexStarted {
            initiated_by_peer,
        });

        let local = KexInit::from_preferences(&self.config.preferences);
        let local_payload = local.to_bytes();
        self.write_packet(&local_payload).await?;

        let peer_payload = match peer_kexinit {
            Some(payload) => payload,
            None => self.read_until_kexinit().await?,
        };
        let peer = KexInit::from_bytes(&peer_payload)?;

        let (client_init, server_init, client_payload, server_payload) = match self.role {
            Role::Client => (&local, &peer, &local_payload, &peer_payload),
            Role::Server => (&peer, &local, &peer_payload, &local_payload),
        };
        let negotiated = negotiate(client_init, server_init)?;
        debug!(
            kex = %negotiated.kex,
            host_key = %negotiated.host_key,
            "algorithms negotiated"
        );

        // A wrong optimistic guess means the peer's next KEX-class packet
        // must be discarded.
        let discard_guessed =
            peer.first_kex_packet_follows && !negotiated.guess_matches;

        let input = match self.role {
            Role::Client => ExchangeInput {
                client_version: self.local_version.to_hash_input(),
                server_version: self.peer_version.to_hash_input(),
                client_kexinit: client_payload.clone(),
                server_kexinit: server_payload.clone(),
            },
            Role::Server => ExchangeInput {
                client_version: self.peer_version.to_hash_input(),
                server_version: self.local_version.to_hash_input(),
                client_kexinit: client_payload.clone(),
                server_kexinit: server_payload.clone(),
            },
        };

        let algorithm = KexAlgorithm::from_name(&negotiated.kex)?;
        let outcome = match self.role {
            Role::Client => {
                let kex = KexClient::new(algorithm)?;
                self.write_packet(&kex.init_payload()).await?;
                if discard_guessed {
                    let _ = self.read_kex_packet().await?;
                }
                let reply = self.read_kex_packet().await?;
                kex.finish(
                    &reply,
                    &input,
                    &self.config.host_keys,
                    &negotiated.host_key,
                    self.config.host_key_policy.as_ref(),
                )?
            }
            Role::Server => {
                if discard_guessed {
                    let _ = self.read_kex_packet().await?;
                }
                let init = self.read_kex_packet().await?;
                let host_key = self.host_key.as_ref().ok_or_else(|| {
                    SkiffError::Config("server transport has no host key".to_string())
                })?;
                let (reply, outcome) =
                    KexServer::respond(algorithm, &init, &input, host_key)?;
                self.write_packet(&reply).await?;
                outcome
            }
        };

        if self.session_id.is_empty() {
            self.session_id = outcome.exchange_hash.clone();
        }

        // NEWKEYS: ours switches the outbound context, theirs the inbound.
        self.write_packet(&[MessageType::NewKeys as u8]).await?;
        self.await_newkeys().await?;

        let c2s = DirectionAlgorithms {
            cipher: CipherAlgorithm::from_name(&negotiated.client_to_server.cipher)?,
            mac: MacAlgorithm::from_name(&negotiated.client_to_server.mac)?,
            compression: CompressionAlgorithm::from_name(
                &negotiated.client_to_server.compression,
            )?,
        };
        let s2c = DirectionAlgorithms {
            cipher: CipherAlgorithm::from_name(&negotiated.server_to_client.cipher)?,
            mac: MacAlgorithm::from_name(&negotiated.server_to_client.mac)?,
            compression: CompressionAlgorithm::from_name(
                &negotiated.server_to_client.compression,
            )?,
        };
        let (outbound, inbound) = match self.role {
            Role::Client => (c2s, s2c),
            Role::Server => (s2c, c2s),
        };
        let (seal_ctx, open_ctx) = derive_directions(
            self.role,
            outcome.hash,
            &outcome.shared_secret,
            &outcome.exchange_hash,
            &self.session_id,
            outbound,
            inbound,
        )?;
        self.sealer.activate(seal_ctx);
        self.opener.activate(open_ctx)?;
        self.rekey_blocks_out = rekey_block_threshold(outbound.cipher.block_len());
        self.rekey_blocks_in = rekey_block_threshold(inbound.cipher.block_len());

        info!(
            kex = %negotiated.kex,
            cipher_out = %outbound.cipher.name(),
            mac_out = %outbound.mac.name(),
            "new keys in effect"
        );
        self.config.observer.on_event(&TransportEvent::KexCompleted {
            kex_algorithm: negotiated.kex.clone(),
            host_key_algorithm: negotiated.host_key.clone(),
        });
        self.negotiated = negotiated;
        Ok(())
    }

    /// Reads until the peer's KEXINIT arrives, consuming transport-class
    /// noise and buffering application payloads.
    async fn read_until_kexinit(&mut self) -> SkiffResult<Vec<u8>> {
        loop {
            let payload = self.read_packet().await?;
            let msg_type = payload.first().copied().unwrap_or(0);
            if msg_type == MessageType::KexInit as u8 {
                return Ok(payload);
            }
            match MessageType::from_u8(msg_type) {
                Some(MessageType::Ignore) => {}
                Some(MessageType::Debug) => {
                    let msg = DebugMsg::from_bytes(&payload)?;
                    self.config
                        .observer
                        .on_event(&TransportEvent::DebugReceived {
                            message: msg.message,
                        });
                }
                Some(MessageType::Disconnect) => {
                    let msg = Disconnect::from_bytes(&payload)?;
                    self.close(msg.code, msg.description.clone());
                    return Err(SkiffError::Disconnected {
                        code: msg.code,
                        description: msg.description,
                    });
                }
                _ if MessageClass::of(msg_type) != MessageClass::Transport
                    && MessageClass::of(msg_type) != MessageClass::KexMethod =>
                {
                    self.inbox.push_back(payload);
                }
                _ => {
                    return Err(SkiffError::Protocol(format!(
                        "unexpected message type {} while waiting for KEXINIT",
                        msg_type
                    )));
                }
            }
        }
    }

    /// Reads the next KEX-class packet, skipping IGNORE and DEBUG.
    async fn read_kex_packet(&mut self) -> SkiffResult<Vec<u8>> {
        loop {
            let payload = self.read_packet().await?;
            let msg_type = payload.first().copied().unwrap_or(0);
            match MessageType::from_u8(msg_type) {
                Some(MessageType::Ignore) => continue,
                Some(MessageType::Debug) => continue,
                Some(MessageType::Disconnect) => {
                    let msg = Disconnect::from_bytes(&payload)?;
                    self.close(msg.code, msg.description.clone());
                    return Err(SkiffError::Disconnected {
                        code: msg.code,
                        description: msg.description,
                    });
                }
                _ if MessageClass::of(msg_type) == MessageClass::KexMethod => {
                    return Ok(payload);
                }
                _ => {
                    return Err(SkiffError::Protocol(format!(
                        "unexpected message type {} during key exchange",
                        msg_type
                    )));
                }
            }
        }
    }

    /// Waits for the peer's NEWKEYS, buffering application payloads that
    /// were sent under the old keys.
    async fn await_newkeys(&mut self) -> SkiffResult<()> {
        loop {
            let payload = self.read_packet().await?;
            let msg_type = payload.first().copied().unwrap_or(0);
            match MessageType::from_u8(msg_type) {
                Some(MessageType::NewKeys) => return Ok(()),
                Some(MessageType::Ignore) | Some(MessageType::Debug) => {}
                Some(MessageType::Disconnect) => {
                    let msg = Disconnect::from_bytes(&payload)?;
                    self.close(msg.code, msg.description.clone());
                    return Err(SkiffError::Disconnected {
                        code: msg.code,
                        description: msg.description,
                    });
                }
                _ => {
                    self.inbox.push_back(payload);
                }
            }
        }
    }

    async fn write_packet(&mut self, payload: &[u8]) -> SkiffResult<()> {
        let wire = self.sealer.seal(payload)?;
        trace!(len = wire.len(), seq = self.sealer.seq(), "packet sent");
        self.stream.write_all(&wire).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads exactly one packet from the stream, driving the opener with
    /// reads of the size it asks for.
    async fn read_packet(&mut self) -> SkiffResult<Vec<u8>> {
        // The opener may already hold a complete buffered packet.
        if let Some(payload) = self.opener.feed(&[])? {
            return Ok(payload);
        }
        let mut chunk = vec![0u8; 512];
        loop {
            let needed = self.opener.needed_bytes();
            if chunk.len() < needed {
                chunk.resize(needed, 0);
            }
            self.stream.read_exact(&mut chunk[..needed]).await?;
            if let Some(payload) = self.opener.feed(&chunk[..needed])? {
                trace!(len = payload.len(), seq = self.opener.seq(), "packet received");
                return Ok(payload);
            }
        }
    }
}

impl<S> std::fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("role", &self.role)
            .field("peer", &self.peer_version)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Reads the peer's identification line, tolerating up to
/// [`MAX_CRUD_LINES`] of banner noise first.
async fn read_peer_version<S>(stream: &mut S) -> SkiffResult<Version>
where
    S: AsyncRead + Unpin,
{
    for _ in 0..=MAX_CRUD_LINES {
        let line = read_line(stream).await?;
        if line.starts_with("SSH-") {
            return Version::parse(&line);
        }
        trace!(line = %line, "skipping pre-version banner line");
    }
    Err(SkiffError::Protocol(format!(
        "no identification line within {} lines",
        MAX_CRUD_LINES
    )))
}

/// Reads one LF-terminated line, byte at a time so no packet bytes are
/// consumed past the line terminator.
async fn read_line<S>(stream: &mut S) -> SkiffResult<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_VERSION_LENGTH {
            return Err(SkiffError::Protocol(
                "identification line too long".to_string(),
            ));
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| SkiffError::Protocol("identification line is not valid UTF-8".to_string()))
}

/// Builds an IGNORE message payload, used to pad traffic analysis.
pub fn ignore_payload(data: &[u8]) -> Vec<u8> {
    Ignore {
        data: data.to_vec(),
    }
    .to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_peer_version_skips_banner() {
        let input = b"Welcome to the test server\r\nSecond banner line\r\nSSH-2.0-Banner_1.0\r\n";
        let mut reader = &input[..];
        let version = read_peer_version(&mut reader).await.unwrap();
        assert_eq!(version.software(), "Banner_1.0");
    }

    #[tokio::test]
    async fn test_read_peer_version_crud_limit() {
        let mut input = Vec::new();
        for i in 0..60 {
            input.extend_from_slice(format!("banner {}\r\n", i).as_bytes());
        }
        input.extend_from_slice(b"SSH-2.0-TooLate_1.0\r\n");
        let mut reader = &input[..];
        let result = read_peer_version(&mut reader).await;
        assert!(matches!(result, Err(SkiffError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_read_line_handles_bare_lf() {
        let input = b"SSH-2.0-NoCr_1.0\n";
        let mut reader = &input[..];
        assert_eq!(read_line(&mut reader).await.unwrap(), "SSH-2.0-NoCr_1.0");
    }

    #[tokio::test]
    async fn test_read_line_rejects_unterminated_overlong() {
        let input = vec![b'a'; 400];
        let mut reader = &input[..];
        assert!(read_line(&mut reader).await.is_err());
    }

    #[test]
    fn test_ignore_payload_shape() {
        let payload = ignore_payload(b"xyz");
        assert_eq!(payload[0], MessageType::Ignore as u8);
        assert_eq!(&payload[1..5], &[0, 0, 0, 3]);
    }
}
