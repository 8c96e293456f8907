//! Binary packet protocol (RFC 4253 Section 6).
//!
//! Wire layout of one packet:
//!
//! ```text
//! uint32    packet_length  (excludes itself and the MAC)
//! byte      padding_length
//! byte[n1]  payload        (compressed when compression is active)
//! byte[n2]  random padding (4..=255 bytes)
//! byte[m]   mac            (over sequence number || plaintext packet)
//! ```
//!
//! Everything up to the MAC is encrypted, including the length field, so
//! the receiver must decrypt the first cipher block before it knows how
//! many bytes the packet occupies. [`Opener`] is therefore an incremental
//! state machine fed by a byte source that may deliver partial reads.
//!
//! Each direction counts packets with an implicit 32-bit sequence number
//! that starts at zero, is covered by the MAC, wraps modulo 2^32, and is
//! never transmitted.

use rand::RngCore;
use skiff_platform::{SkiffError, SkiffResult};

use super::crypto::{OpeningContext, SealingContext};

/// Smallest legal total of `packet_length + 4` (RFC 4253 Section 6).
pub const PACKET_MIN_SIZE: usize = 16;

/// Largest accepted total of `packet_length + 4`.
///
/// The limit bounds allocation before any declared length is trusted; the
/// protocol minimum of 35000 leaves room for a full 32768-byte data
/// payload plus framing.
pub const PACKET_MAX_SIZE: usize = 35000;

/// Minimum random padding per packet.
pub const MIN_PADDING: usize = 4;

/// Maximum random padding per packet (padding_length is one byte).
pub const MAX_PADDING: usize = 255;

/// Outbound packet sealer.
///
/// Owns the outbound sequence number and cryptographic context. Sealing
/// never fails for well-formed payloads once a context is installed.
#[derive(Debug)]
pub struct Sealer {
    ctx: SealingContext,
    seq: u32,
    bytes_sealed: u64,
    blocks_sealed: u64,
    packets_sealed: u64,
}

impl Sealer {
    /// Creates a sealer in the pre-NEWKEYS plaintext state.
    pub fn new() -> Self {
        Self {
            ctx: SealingContext::plaintext(),
            seq: 0,
            bytes_sealed: 0,
            blocks_sealed: 0,
            packets_sealed: 0,
        }
    }

    /// Installs a freshly derived context.
    ///
    /// The sequence number deliberately survives the swap; only the
    /// traffic counters reset.
    pub fn activate(&mut self, ctx: SealingContext) {
        self.ctx = ctx;
        self.bytes_sealed = 0;
        self.blocks_sealed = 0;
        self.packets_sealed = 0;
    }

    /// Current outbound sequence number.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Cipher blocks processed since the last context swap.
    pub fn blocks_sealed(&self) -> u64 {
        self.blocks_sealed
    }

    /// Bytes processed since the last context swap.
    pub fn bytes_sealed(&self) -> u64 {
        self.bytes_sealed
    }

    /// Packets sealed since the last context swap.
    pub fn packets_sealed(&self) -> u64 {
        self.packets_sealed
    }

    /// Cipher block length of the active context.
    pub fn block_len(&self) -> usize {
        self.ctx.cipher.block_len()
    }

    /// Frames, compresses, MACs, and encrypts one payload.
    ///
    /// Returns the wire bytes: ciphertext followed by the MAC tag.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::Protocol`] if the payload is empty, would
    /// exceed [`PACKET_MAX_SIZE`] after framing, or fails compression.
    pub fn seal(&mut self, payload: &[u8]) -> SkiffResult<Vec<u8>> {
        if payload.is_empty() {
            return Err(SkiffError::Protocol("cannot seal empty payload".to_string()));
        }
        let payload = self.ctx.compressor.compress(payload)?;

        // Align packet_length + 4 to the cipher block (never less than 8),
        // with at least MIN_PADDING bytes of padding.
        let block = self.ctx.cipher.block_len().max(8);
        let mut pad_len = block - ((5 + payload.len()) % block);
        if pad_len < MIN_PADDING {
            pad_len += block;
        }
        while 5 + payload.len() + pad_len < PACKET_MIN_SIZE {
            pad_len += block;
        }
        if pad_len > MAX_PADDING {
            return Err(SkiffError::Protocol(format!(
                "padding overflow: {} bytes",
                pad_len
            )));
        }

        let packet_len = 1 + payload.len() + pad_len;
        let total = 4 + packet_len;
        if total > PACKET_MAX_SIZE {
            return Err(SkiffError::Protocol(format!(
                "packet too large: {} bytes (max {})",
                total, PACKET_MAX_SIZE
            )));
        }

        let mut packet = Vec::with_capacity(total);
        packet.extend_from_slice(&(packet_len as u32).to_be_bytes());
        packet.push(pad_len as u8);
        packet.extend_from_slice(&payload);
        let mut padding = vec![0u8; pad_len];
        rand::rngs::OsRng.fill_bytes(&mut padding);
        packet.extend_from_slice(&padding);

        // MAC over the plaintext, then encrypt everything up to the tag.
        let tag = self.ctx.mac.sign(self.seq, &packet);
        self.ctx.cipher.apply(&mut packet);
        packet.extend_from_slice(&tag);

        self.seq = self.seq.wrapping_add(1);
        self.bytes_sealed += total as u64;
        self.blocks_sealed += (total / block) as u64;
        self.packets_sealed += 1;
        Ok(packet)
    }
}

impl Default for Sealer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the first cipher block to learn the packet length
    Header,
    /// Length known; collecting and decrypting the packet body
    Data {
        /// Undelivered plaintext bytes of the current packet
        remaining: usize,
    },
    /// Body complete; waiting for the MAC tag
    Mac,
}

/// Inbound packet opener.
///
/// Feed bytes in with [`Opener::feed`]; ask [`Opener::needed_bytes`] how
/// many more the current packet needs. The source may deliver any number
/// of bytes per call, including fewer than requested.
#[derive(Debug)]
pub struct Opener {
    ctx: OpeningContext,
    seq: u32,
    phase: Phase,
    /// Undecrypted bytes not yet consumed by the current phase
    pending: Vec<u8>,
    /// Decrypted packet bytes (length field onward) accumulated so far
    packet: Vec<u8>,
    bytes_opened: u64,
    blocks_opened: u64,
    packets_opened: u64,
}

impl Opener {
    /// Creates an opener in the pre-NEWKEYS plaintext state.
    pub fn new() -> Self {
        Self {
            ctx: OpeningContext::plaintext(),
            seq: 0,
            phase: Phase::Header,
            pending: Vec::new(),
            packet: Vec::new(),
            bytes_opened: 0,
            blocks_opened: 0,
            packets_opened: 0,
        }
    }

    /// Installs a freshly derived context.
    ///
    /// Must only be called at a packet boundary (immediately after
    /// NEWKEYS); the sequence number survives, the traffic counters reset.
    pub fn activate(&mut self, ctx: OpeningContext) -> SkiffResult<()> {
        if self.phase != Phase::Header || !self.pending.is_empty() {
            return Err(SkiffError::Protocol(
                "context swap mid-packet".to_string(),
            ));
        }
        self.ctx = ctx;
        self.bytes_opened = 0;
        self.blocks_opened = 0;
        self.packets_opened = 0;
        Ok(())
    }

    /// Current inbound sequence number.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Cipher blocks processed since the last context swap.
    pub fn blocks_opened(&self) -> u64 {
        self.blocks_opened
    }

    /// Bytes processed since the last context swap.
    pub fn bytes_opened(&self) -> u64 {
        self.bytes_opened
    }

    /// Packets opened since the last context swap.
    pub fn packets_opened(&self) -> u64 {
        self.packets_opened
    }

    /// Number of bytes the current packet still needs before it can make
    /// progress. Never zero.
    pub fn needed_bytes(&self) -> usize {
        let phase_need = match self.phase {
            Phase::Header => self.ctx.cipher.block_len().max(8),
            Phase::Data { remaining } => remaining,
            Phase::Mac => self.ctx.mac.tag_len(),
        };
        phase_need.saturating_sub(self.pending.len()).max(1)
    }

    /// Feeds bytes from the source and returns a completed payload, if
    /// any. Surplus bytes are retained for the next packet.
    ///
    /// # Errors
    ///
    /// Any returned error is fatal for the connection: a declared length
    /// outside the legal bounds, malformed padding, a MAC mismatch, or a
    /// corrupt compression stream.
    pub fn feed(&mut self, chunk: &[u8]) -> SkiffResult<Option<Vec<u8>>> {
        self.pending.extend_from_slice(chunk);

        loop {
            match self.phase {
                Phase::Header => {
                    let block = self.ctx.cipher.block_len().max(8);
                    if self.pending.len() < block {
                        return Ok(None);
                    }
                    let mut first: Vec<u8> = self.pending.drain(..block).collect();
                    self.ctx.cipher.apply(&mut first);
                    let packet_len =
                        u32::from_be_bytes([first[0], first[1], first[2], first[3]]) as usize;

                    // Validate before trusting the length for allocation.
                    let total = packet_len.saturating_add(4);
                    if total > PACKET_MAX_SIZE {
                        return Err(SkiffError::Protocol(format!(
                            "declared packet length {} exceeds maximum {}",
                            total, PACKET_MAX_SIZE
                        )));
                    }
                    if total < PACKET_MIN_SIZE || total % block != 0 {
                        return Err(SkiffError::Protocol(format!(
                            "invalid packet length {} for block size {}",
                            total, block
                        )));
                    }

                    self.packet = Vec::with_capacity(total);
                    self.packet.extend_from_slice(&first);
                    self.phase = Phase::Data {
                        remaining: total - block,
                    };
                }
                Phase::Data { remaining } => {
                    if remaining > 0 {
                        let take = remaining.min(self.pending.len());
                        if take == 0 {
                            return Ok(None);
                        }
                        let mut body: Vec<u8> = self.pending.drain(..take).collect();
                        self.ctx.cipher.apply(&mut body);
                        self.packet.extend_from_slice(&body);
                        if take < remaining {
                            self.phase = Phase::Data {
                                remaining: remaining - take,
                            };
                            return Ok(None);
                        }
                    }
                    self.phase = Phase::Mac;
                }
                Phase::Mac => {
                    let tag_len = self.ctx.mac.tag_len();
                    if self.pending.len() < tag_len {
                        return Ok(None);
                    }
                    let tag: Vec<u8> = self.pending.drain(..tag_len).collect();
                    self.ctx.mac.verify(self.seq, &self.packet, &tag)?;

                    let payload = self.finish_packet()?;
                    self.phase = Phase::Header;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Strips framing and padding from the completed plaintext packet and
    /// advances the sequence number.
    fn finish_packet(&mut self) -> SkiffResult<Vec<u8>> {
        let packet = std::mem::take(&mut self.packet);
        let packet_len =
            u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]) as usize;
        let pad_len = packet[4] as usize;

        if pad_len < MIN_PADDING || pad_len + 1 > packet_len {
            return Err(SkiffError::Protocol(format!(
                "invalid padding length {} in packet of length {}",
                pad_len, packet_len
            )));
        }

        let payload = &packet[5..4 + packet_len - pad_len];
        let payload = self.ctx.decompressor.decompress(payload)?;

        let block = self.ctx.cipher.block_len().max(8);
        let total = 4 + packet_len;
        self.seq = self.seq.wrapping_add(1);
        self.bytes_opened += total as u64;
        self.blocks_opened += (total / block) as u64;
        self.packets_opened += 1;
        Ok(payload)
    }
}

impl Default for Opener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::crypto::{
        derive_directions, CipherAlgorithm, CompressionAlgorithm, DirectionAlgorithms, KexHash,
        MacAlgorithm, Role,
    };
    use num_bigint::BigUint;

    fn encrypted_pair() -> (Sealer, Opener) {
        let k = BigUint::from(0xfeed_f00du64);
        let h = [0x5au8; 32];
        let algs = DirectionAlgorithms {
            cipher: CipherAlgorithm::Aes128Ctr,
            mac: MacAlgorithm::HmacSha1,
            compression: CompressionAlgorithm::None,
        };
        let (seal_ctx, _) =
            derive_directions(Role::Client, KexHash::Sha256, &k, &h, &h, algs, algs).unwrap();
        let (_, open_ctx) =
            derive_directions(Role::Server, KexHash::Sha256, &k, &h, &h, algs, algs).unwrap();

        let mut sealer = Sealer::new();
        sealer.activate(seal_ctx);
        let mut opener = Opener::new();
        opener.activate(open_ctx).unwrap();
        (sealer, opener)
    }

    #[test]
    fn test_plaintext_round_trip() {
        let mut sealer = Sealer::new();
        let mut opener = Opener::new();

        let wire = sealer.seal(b"hello world").unwrap();
        assert_eq!(wire.len() % 8, 0);
        assert!(wire.len() >= PACKET_MIN_SIZE);

        let payload = opener.feed(&wire).unwrap().unwrap();
        assert_eq!(payload, b"hello world");
        assert_eq!(opener.seq(), 1);
    }

    #[test]
    fn test_encrypted_round_trip() {
        let (mut sealer, mut opener) = encrypted_pair();

        for msg in [&b"first"[..], &b"second, somewhat longer payload"[..]] {
            let wire = sealer.seal(msg).unwrap();
            assert_eq!((wire.len() - 20) % 16, 0);
            let payload = opener.feed(&wire).unwrap().unwrap();
            assert_eq!(payload, msg);
        }
        assert_eq!(sealer.seq(), 2);
        assert_eq!(opener.seq(), 2);
    }

    #[test]
    fn test_byte_at_a_time_feeding() {
        let (mut sealer, mut opener) = encrypted_pair();
        let wire = sealer.seal(b"drip fed").unwrap();

        let mut result = None;
        for (i, byte) in wire.iter().enumerate() {
            let out = opener.feed(std::slice::from_ref(byte)).unwrap();
            if i + 1 < wire.len() {
                assert!(out.is_none());
            } else {
                result = out;
            }
        }
        assert_eq!(result.unwrap(), b"drip fed");
    }

    #[test]
    fn test_needed_bytes_progression() {
        let (mut sealer, mut opener) = encrypted_pair();
        let wire = sealer.seal(b"sized").unwrap();

        // First the opener wants one cipher block.
        assert_eq!(opener.needed_bytes(), 16);
        assert!(opener.feed(&wire[..16]).unwrap().is_none());
        // Then the rest of the body, then the 20-byte hmac-sha1 tag.
        let body_rest = wire.len() - 16 - 20;
        assert_eq!(opener.needed_bytes(), body_rest);
        assert!(opener.feed(&wire[16..16 + body_rest]).unwrap().is_none());
        assert_eq!(opener.needed_bytes(), 20);
        assert!(opener.feed(&wire[16 + body_rest..]).unwrap().is_some());
    }

    #[test]
    fn test_two_packets_in_one_chunk() {
        let (mut sealer, mut opener) = encrypted_pair();
        let mut wire = sealer.seal(b"one").unwrap();
        wire.extend(sealer.seal(b"two").unwrap());

        let first = opener.feed(&wire).unwrap().unwrap();
        assert_eq!(first, b"one");
        let second = opener.feed(&[]).unwrap().unwrap();
        assert_eq!(second, b"two");
    }

    #[test]
    fn test_oversized_declared_length_is_fatal() {
        let mut opener = Opener::new();
        // Plaintext header declaring packet_length 40000.
        let mut header = Vec::new();
        header.extend_from_slice(&40_000u32.to_be_bytes());
        header.extend_from_slice(&[4, 0, 0, 0]);
        let result = opener.feed(&header);
        match result {
            Err(SkiffError::Protocol(msg)) => assert!(msg.contains("exceeds maximum")),
            other => panic!("expected fatal Protocol fault, got {:?}", other),
        }
    }

    #[test]
    fn test_undersized_declared_length_is_fatal() {
        let mut opener = Opener::new();
        let mut header = Vec::new();
        header.extend_from_slice(&4u32.to_be_bytes());
        header.extend_from_slice(&[4, 0, 0, 0]);
        assert!(opener.feed(&header).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails_mac() {
        let (mut sealer, mut opener) = encrypted_pair();
        let mut wire = sealer.seal(b"integrity matters").unwrap();
        let mid = wire.len() / 2;
        wire[mid] ^= 0x80;

        let mut result = Ok(None);
        for byte in &wire {
            result = opener.feed(std::slice::from_ref(byte));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(SkiffError::Security(_))));
    }

    #[test]
    fn test_padding_bounds() {
        let mut sealer = Sealer::new();
        for size in [1usize, 7, 8, 100, 1000] {
            let wire = sealer.seal(&vec![0xabu8; size]).unwrap();
            let pad = wire[4] as usize;
            assert!((MIN_PADDING..=MAX_PADDING).contains(&pad), "pad {}", pad);
            assert!(wire.len() >= PACKET_MIN_SIZE);
            assert_eq!(wire.len() % 8, 0);
        }
    }

    #[test]
    fn test_sequence_survives_context_swap() {
        let (mut sealer, mut opener) = encrypted_pair();
        let wire = sealer.seal(b"before swap").unwrap();
        opener.feed(&wire).unwrap().unwrap();

        let (fresh_seal, fresh_open) = encrypted_pair();
        sealer.activate(fresh_seal.ctx);
        opener.activate(fresh_open.ctx).unwrap();
        assert_eq!(sealer.seq(), 1);
        assert_eq!(opener.seq(), 1);
        assert_eq!(sealer.blocks_sealed(), 0);
    }

    #[test]
    fn test_empty_payload_rejected() {
        let mut sealer = Sealer::new();
        assert!(sealer.seal(b"").is_err());
    }

    #[test]
    fn test_compressed_round_trip() {
        let k = BigUint::from(7u32);
        let h = [0x10u8; 32];
        let algs = DirectionAlgorithms {
            cipher: CipherAlgorithm::Aes256Ctr,
            mac: MacAlgorithm::HmacSha256,
            compression: CompressionAlgorithm::Zlib,
        };
        let (seal_ctx, _) =
            derive_directions(Role::Client, KexHash::Sha256, &k, &h, &h, algs, algs).unwrap();
        let (_, open_ctx) =
            derive_directions(Role::Server, KexHash::Sha256, &k, &h, &h, algs, algs).unwrap();
        let mut sealer = Sealer::new();
        sealer.activate(seal_ctx);
        let mut opener = Opener::new();
        opener.activate(open_ctx).unwrap();

        let payload = vec![b'z'; 4096];
        let wire = sealer.seal(&payload).unwrap();
        assert!(wire.len() < payload.len());
        assert_eq!(opener.feed(&wire).unwrap().unwrap(), payload);
    }
}
