//! Cryptographic state for the binary packet protocol.
//!
//! After a key exchange completes, the shared secret `K` and exchange hash
//! `H` are stretched into six keys (RFC 4253 Section 7.2): IVs, cipher keys,
//! and MAC keys for each direction. This module owns that derivation plus
//! the per-direction cipher, MAC, and compression state the packet codec
//! drives.
//!
//! Dispatch is by tagged variant rather than trait object: the set of
//! supported algorithms is closed, and an enum keeps the per-packet hot
//! path free of dynamic lookup.

use aes::{Aes128, Aes256};
use cipher::{KeyIvInit, StreamCipher};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha512};
use skiff_platform::{SkiffError, SkiffResult};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::wire::WireBuffer;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Encryption algorithms offered during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES-128 in counter mode (`aes128-ctr`)
    Aes128Ctr,
    /// AES-256 in counter mode (`aes256-ctr`)
    Aes256Ctr,
}

impl CipherAlgorithm {
    /// Resolves a negotiated name to an algorithm.
    pub fn from_name(name: &str) -> SkiffResult<Self> {
        match name {
            "aes128-ctr" => Ok(Self::Aes128Ctr),
            "aes256-ctr" => Ok(Self::Aes256Ctr),
            other => Err(SkiffError::Protocol(format!(
                "unsupported cipher algorithm: {}",
                other
            ))),
        }
    }

    /// Wire name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes128Ctr => "aes128-ctr",
            Self::Aes256Ctr => "aes256-ctr",
        }
    }

    /// Cipher key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Ctr => 16,
            Self::Aes256Ctr => 32,
        }
    }

    /// Initialization vector length in bytes.
    pub fn iv_len(&self) -> usize {
        16
    }

    /// Cipher block length in bytes.
    pub fn block_len(&self) -> usize {
        16
    }
}

/// MAC algorithms offered during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// HMAC-SHA1 (`hmac-sha1`)
    HmacSha1,
    /// HMAC-SHA2-256 (`hmac-sha2-256`)
    HmacSha256,
    /// HMAC-SHA2-512 (`hmac-sha2-512`)
    HmacSha512,
}

impl MacAlgorithm {
    /// Resolves a negotiated name to an algorithm.
    pub fn from_name(name: &str) -> SkiffResult<Self> {
        match name {
            "hmac-sha1" => Ok(Self::HmacSha1),
            "hmac-sha2-256" => Ok(Self::HmacSha256),
            "hmac-sha2-512" => Ok(Self::HmacSha512),
            other => Err(SkiffError::Protocol(format!(
                "unsupported MAC algorithm: {}",
                other
            ))),
        }
    }

    /// Wire name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HmacSha1 => "hmac-sha1",
            Self::HmacSha256 => "hmac-sha2-256",
            Self::HmacSha512 => "hmac-sha2-512",
        }
    }

    /// MAC key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
            Self::HmacSha512 => 64,
        }
    }

    /// MAC tag length in bytes.
    pub fn tag_len(&self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
            Self::HmacSha512 => 64,
        }
    }
}

/// Compression algorithms offered during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    /// No compression (`none`)
    None,
    /// zlib compression from the first NEWKEYS onward (`zlib`)
    Zlib,
}

impl CompressionAlgorithm {
    /// Resolves a negotiated name to an algorithm.
    pub fn from_name(name: &str) -> SkiffResult<Self> {
        match name {
            "none" => Ok(Self::None),
            "zlib" => Ok(Self::Zlib),
            other => Err(SkiffError::Protocol(format!(
                "unsupported compression algorithm: {}",
                other
            ))),
        }
    }

    /// Wire name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib => "zlib",
        }
    }
}

/// Hash used by the negotiated key exchange method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexHash {
    /// SHA-1 (diffie-hellman-group14-sha1)
    Sha1,
    /// SHA-256 (curve25519-sha256, group14-sha256, nistp256)
    Sha256,
}

impl KexHash {
    /// Digests `data` with the method's hash.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    /// Output length of the hash in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }
}

/// Stateful stream cipher for one direction.
///
/// CTR mode keystreams are symmetric, so `apply` both encrypts and
/// decrypts; the counter advances with every call and is never reset
/// between packets.
pub enum CipherState {
    /// Identity transform, used before the first NEWKEYS
    Plain,
    /// aes128-ctr keystream
    Aes128(Box<Aes128Ctr>),
    /// aes256-ctr keystream
    Aes256(Box<Aes256Ctr>),
}

impl CipherState {
    /// Creates cipher state from a negotiated algorithm and derived keys.
    pub fn new(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> SkiffResult<Self> {
        if key.len() != algorithm.key_len() || iv.len() != algorithm.iv_len() {
            return Err(SkiffError::Security(format!(
                "bad key material for {}: key {} bytes, iv {} bytes",
                algorithm.name(),
                key.len(),
                iv.len()
            )));
        }
        Ok(match algorithm {
            CipherAlgorithm::Aes128Ctr => {
                Self::Aes128(Box::new(Aes128Ctr::new(key.into(), iv.into())))
            }
            CipherAlgorithm::Aes256Ctr => {
                Self::Aes256(Box::new(Aes256Ctr::new(key.into(), iv.into())))
            }
        })
    }

    /// Applies the keystream to `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            Self::Plain => {}
            Self::Aes128(c) => c.apply_keystream(data),
            Self::Aes256(c) => c.apply_keystream(data),
        }
    }

    /// Cipher block length; 8 for the identity transform, per the padding
    /// alignment rule.
    pub fn block_len(&self) -> usize {
        match self {
            Self::Plain => 8,
            Self::Aes128(_) | Self::Aes256(_) => 16,
        }
    }

    /// True if this state encrypts.
    pub fn is_encrypting(&self) -> bool {
        !matches!(self, Self::Plain)
    }
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "CipherState::Plain"),
            Self::Aes128(_) => write!(f, "CipherState::Aes128"),
            Self::Aes256(_) => write!(f, "CipherState::Aes256"),
        }
    }
}

/// Keyed MAC for one direction.
///
/// The tag covers the big-endian sequence number followed by the plaintext
/// packet (length field through padding); the sequence number itself never
/// appears on the wire.
#[derive(Debug)]
pub enum MacState {
    /// No MAC, used before the first NEWKEYS
    Null,
    /// hmac-sha1 with its 20-byte key
    Sha1(SecretBytes),
    /// hmac-sha2-256 with its 32-byte key
    Sha256(SecretBytes),
    /// hmac-sha2-512 with its 64-byte key
    Sha512(SecretBytes),
}

impl MacState {
    /// Creates MAC state from a negotiated algorithm and derived key.
    pub fn new(algorithm: MacAlgorithm, key: &[u8]) -> SkiffResult<Self> {
        if key.len() != algorithm.key_len() {
            return Err(SkiffError::Security(format!(
                "bad MAC key for {}: {} bytes",
                algorithm.name(),
                key.len()
            )));
        }
        let key = SecretBytes(key.to_vec());
        Ok(match algorithm {
            MacAlgorithm::HmacSha1 => Self::Sha1(key),
            MacAlgorithm::HmacSha256 => Self::Sha256(key),
            MacAlgorithm::HmacSha512 => Self::Sha512(key),
        })
    }

    /// Tag length in bytes; 0 when no MAC is active.
    pub fn tag_len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Sha1(_) => 20,
            Self::Sha256(_) => 32,
            Self::Sha512(_) => 64,
        }
    }

    /// Computes the tag over `seq || packet`.
    pub fn sign(&self, seq: u32, packet: &[u8]) -> Vec<u8> {
        macro_rules! tag {
            ($digest:ty, $key:expr) => {{
                // HMAC accepts any key length, so this cannot fail.
                let mut mac = match <Hmac<$digest> as Mac>::new_from_slice($key) {
                    Ok(mac) => mac,
                    Err(_) => return Vec::new(),
                };
                mac.update(&seq.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }};
        }
        match self {
            Self::Null => Vec::new(),
            Self::Sha1(k) => tag!(Sha1, &k.0),
            Self::Sha256(k) => tag!(Sha256, &k.0),
            Self::Sha512(k) => tag!(Sha512, &k.0),
        }
    }

    /// Verifies `tag` against `seq || packet` in constant time.
    pub fn verify(&self, seq: u32, packet: &[u8], tag: &[u8]) -> SkiffResult<()> {
        let expected = self.sign(seq, packet);
        if expected.len() != tag.len() || expected.ct_eq(tag).unwrap_u8() != 1 {
            return Err(SkiffError::Security(
                "MAC verification failed".to_string(),
            ));
        }
        Ok(())
    }
}

/// Key bytes wiped on drop.
#[derive(Clone)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Wraps key material.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrows the key bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes({} bytes)", self.0.len())
    }
}

/// Streaming compressor for the outbound direction.
///
/// The zlib dictionary persists across packets, so a single stream lives
/// for the lifetime of the keys. Each packet is flushed with a partial
/// flush so the peer can decompress it without waiting for more input.
pub enum PacketCompressor {
    /// Pass-through
    Null,
    /// Persistent zlib deflate stream
    Zlib(Box<Compress>),
}

impl PacketCompressor {
    /// Creates compressor state for a negotiated algorithm.
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        match algorithm {
            CompressionAlgorithm::None => Self::Null,
            CompressionAlgorithm::Zlib => {
                Self::Zlib(Box::new(Compress::new(Compression::default(), true)))
            }
        }
    }

    /// True if payloads are transformed.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Zlib(_))
    }

    /// Compresses one payload.
    pub fn compress(&mut self, payload: &[u8]) -> SkiffResult<Vec<u8>> {
        match self {
            Self::Null => Ok(payload.to_vec()),
            Self::Zlib(stream) => {
                let mut out = Vec::with_capacity(payload.len() + 16);
                let mut offset = 0;
                loop {
                    let before_in = stream.total_in();
                    let before_out = stream.total_out();
                    let mut chunk = [0u8; 4096];
                    let status = stream
                        .compress(&payload[offset..], &mut chunk, FlushCompress::Partial)
                        .map_err(|e| {
                            SkiffError::Protocol(format!("zlib compress failed: {}", e))
                        })?;
                    offset += (stream.total_in() - before_in) as usize;
                    let produced = (stream.total_out() - before_out) as usize;
                    out.extend_from_slice(&chunk[..produced]);
                    // A partial flush is complete once no further output is
                    // produced for the empty remainder.
                    if offset >= payload.len() && produced == 0 {
                        break;
                    }
                    if matches!(status, flate2::Status::StreamEnd) {
                        break;
                    }
                }
                Ok(out)
            }
        }
    }
}

impl std::fmt::Debug for PacketCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "PacketCompressor::Null"),
            Self::Zlib(_) => write!(f, "PacketCompressor::Zlib"),
        }
    }
}

/// Streaming decompressor for the inbound direction.
pub enum PacketDecompressor {
    /// Pass-through
    Null,
    /// Persistent zlib inflate stream
    Zlib(Box<Decompress>),
}

impl PacketDecompressor {
    /// Creates decompressor state for a negotiated algorithm.
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        match algorithm {
            CompressionAlgorithm::None => Self::Null,
            CompressionAlgorithm::Zlib => Self::Zlib(Box::new(Decompress::new(true))),
        }
    }

    /// True if payloads are transformed.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Zlib(_))
    }

    /// Decompresses one payload. A malformed stream is a fatal fault.
    pub fn decompress(&mut self, payload: &[u8]) -> SkiffResult<Vec<u8>> {
        match self {
            Self::Null => Ok(payload.to_vec()),
            Self::Zlib(stream) => {
                let mut out = Vec::with_capacity(payload.len() * 2);
                let mut offset = 0;
                loop {
                    let before_in = stream.total_in();
                    let before_out = stream.total_out();
                    let mut chunk = [0u8; 4096];
                    stream
                        .decompress(&payload[offset..], &mut chunk, FlushDecompress::None)
                        .map_err(|e| {
                            SkiffError::Protocol(format!("zlib decompress failed: {}", e))
                        })?;
                    offset += (stream.total_in() - before_in) as usize;
                    let produced = (stream.total_out() - before_out) as usize;
                    out.extend_from_slice(&chunk[..produced]);
                    if offset >= payload.len() && produced < chunk.len() {
                        break;
                    }
                }
                Ok(out)
            }
        }
    }
}

impl std::fmt::Debug for PacketDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "PacketDecompressor::Null"),
            Self::Zlib(_) => write!(f, "PacketDecompressor::Zlib"),
        }
    }
}

/// Full cryptographic state for the outbound direction.
#[derive(Debug)]
pub struct SealingContext {
    /// Outbound stream cipher
    pub cipher: CipherState,
    /// Outbound MAC
    pub mac: MacState,
    /// Outbound compressor
    pub compressor: PacketCompressor,
}

impl SealingContext {
    /// Identity context used before the first NEWKEYS.
    pub fn plaintext() -> Self {
        Self {
            cipher: CipherState::Plain,
            mac: MacState::Null,
            compressor: PacketCompressor::Null,
        }
    }
}

/// Full cryptographic state for the inbound direction.
#[derive(Debug)]
pub struct OpeningContext {
    /// Inbound stream cipher
    pub cipher: CipherState,
    /// Inbound MAC
    pub mac: MacState,
    /// Inbound decompressor
    pub decompressor: PacketDecompressor,
}

impl OpeningContext {
    /// Identity context used before the first NEWKEYS.
    pub fn plaintext() -> Self {
        Self {
            cipher: CipherState::Plain,
            mac: MacState::Null,
            decompressor: PacketDecompressor::Null,
        }
    }
}

/// Derives one key of the required length (RFC 4253 Section 7.2).
///
/// The initial block is `HASH(K || H || id || session_id)`; when more
/// material is needed the output is extended with `HASH(K || H || prev)`
/// where `prev` is everything derived so far. `K` is encoded as an mpint.
pub fn derive_key(
    hash: KexHash,
    shared_secret: &BigUint,
    exchange_hash: &[u8],
    id: u8,
    session_id: &[u8],
    needed: usize,
) -> Vec<u8> {
    let mut k_mpint = WireBuffer::new();
    k_mpint.write_mpint(shared_secret);

    let mut seed = Vec::with_capacity(k_mpint.len() + exchange_hash.len() + 1 + session_id.len());
    seed.extend_from_slice(k_mpint.as_slice());
    seed.extend_from_slice(exchange_hash);
    seed.push(id);
    seed.extend_from_slice(session_id);

    let mut key = hash.digest(&seed);
    while key.len() < needed {
        let mut extend_seed =
            Vec::with_capacity(k_mpint.len() + exchange_hash.len() + key.len());
        extend_seed.extend_from_slice(k_mpint.as_slice());
        extend_seed.extend_from_slice(exchange_hash);
        extend_seed.extend_from_slice(&key);
        key.extend(hash.digest(&extend_seed));
    }
    key.truncate(needed);
    key
}

/// Connection role, which decides the direction mapping of derived keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We sent our version string first and initiate the key exchange.
    Client,
    /// We answer a connecting client.
    Server,
}

/// Algorithms selected for one direction of traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionAlgorithms {
    /// Encryption algorithm
    pub cipher: CipherAlgorithm,
    /// MAC algorithm
    pub mac: MacAlgorithm,
    /// Compression algorithm
    pub compression: CompressionAlgorithm,
}

/// Derives the outbound and inbound contexts for this side of the
/// connection.
///
/// Letters 'A'-'F' label the six keys; 'A'/'C'/'E' key the
/// client-to-server direction and 'B'/'D'/'F' the server-to-client
/// direction, so the mapping to outbound/inbound flips with [`Role`].
pub fn derive_directions(
    role: Role,
    hash: KexHash,
    shared_secret: &BigUint,
    exchange_hash: &[u8],
    session_id: &[u8],
    outbound: DirectionAlgorithms,
    inbound: DirectionAlgorithms,
) -> SkiffResult<(SealingContext, OpeningContext)> {
    let (out_ids, in_ids) = match role {
        Role::Client => ((b'A', b'C', b'E'), (b'B', b'D', b'F')),
        Role::Server => ((b'B', b'D', b'F'), (b'A', b'C', b'E')),
    };

    let mut out_iv = derive_key(
        hash,
        shared_secret,
        exchange_hash,
        out_ids.0,
        session_id,
        outbound.cipher.iv_len(),
    );
    let mut out_key = derive_key(
        hash,
        shared_secret,
        exchange_hash,
        out_ids.1,
        session_id,
        outbound.cipher.key_len(),
    );
    let mut out_mac = derive_key(
        hash,
        shared_secret,
        exchange_hash,
        out_ids.2,
        session_id,
        outbound.mac.key_len(),
    );
    let mut in_iv = derive_key(
        hash,
        shared_secret,
        exchange_hash,
        in_ids.0,
        session_id,
        inbound.cipher.iv_len(),
    );
    let mut in_key = derive_key(
        hash,
        shared_secret,
        exchange_hash,
        in_ids.1,
        session_id,
        inbound.cipher.key_len(),
    );
    let mut in_mac = derive_key(
        hash,
        shared_secret,
        exchange_hash,
        in_ids.2,
        session_id,
        inbound.mac.key_len(),
    );

    let sealing = SealingContext {
        cipher: CipherState::new(outbound.cipher, &out_key, &out_iv)?,
        mac: MacState::new(outbound.mac, &out_mac)?,
        compressor: PacketCompressor::new(outbound.compression),
    };
    let opening = OpeningContext {
        cipher: CipherState::new(inbound.cipher, &in_key, &in_iv)?,
        mac: MacState::new(inbound.mac, &in_mac)?,
        decompressor: PacketDecompressor::new(inbound.compression),
    };

    out_iv.zeroize();
    out_key.zeroize();
    out_mac.zeroize();
    in_iv.zeroize();
    in_key.zeroize();
    in_mac.zeroize();

    Ok((sealing, opening))
}

/// Number of blocks after which a re-key is due for the given cipher block
/// length.
///
/// For block sizes of 16 bytes and up the limit is `2^(2 * block_len)`
/// blocks; smaller blocks use a flat gigabyte of data divided by the block
/// length (RFC 4344 Section 3.2).
pub fn rekey_block_threshold(block_len: usize) -> u64 {
    if block_len >= 16 {
        1u64.checked_shl((block_len * 2) as u32).unwrap_or(u64::MAX)
    } else {
        (1u64 << 30) / block_len as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_round_trip() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let mut enc = CipherState::new(CipherAlgorithm::Aes128Ctr, &key, &iv).unwrap();
        let mut dec = CipherState::new(CipherAlgorithm::Aes128Ctr, &key, &iv).unwrap();

        let mut data = b"attack at dawn, bring snacks".to_vec();
        let original = data.clone();
        enc.apply(&mut data);
        assert_ne!(data, original);
        dec.apply(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_cipher_keystream_advances() {
        let key = [0u8; 32];
        let iv = [0u8; 16];
        let mut c = CipherState::new(CipherAlgorithm::Aes256Ctr, &key, &iv).unwrap();
        let mut a = vec![0u8; 16];
        let mut b = vec![0u8; 16];
        c.apply(&mut a);
        c.apply(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_cipher_rejects_bad_key_length() {
        let result = CipherState::new(CipherAlgorithm::Aes256Ctr, &[0u8; 16], &[0u8; 16]);
        assert!(matches!(result, Err(SkiffError::Security(_))));
    }

    #[test]
    fn test_mac_sign_and_verify() {
        let key = [0x42u8; 32];
        let mac = MacState::new(MacAlgorithm::HmacSha256, &key).unwrap();
        let tag = mac.sign(7, b"packet bytes");
        assert_eq!(tag.len(), 32);
        mac.verify(7, b"packet bytes", &tag).unwrap();
    }

    #[test]
    fn test_mac_covers_sequence_number() {
        let key = [0x42u8; 20];
        let mac = MacState::new(MacAlgorithm::HmacSha1, &key).unwrap();
        let tag = mac.sign(7, b"packet bytes");
        assert!(mac.verify(8, b"packet bytes", &tag).is_err());
    }

    #[test]
    fn test_mac_detects_tamper() {
        let key = [0x42u8; 64];
        let mac = MacState::new(MacAlgorithm::HmacSha512, &key).unwrap();
        let mut tag = mac.sign(0, b"payload");
        tag[0] ^= 0x01;
        assert!(mac.verify(0, b"payload", &tag).is_err());
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let k = BigUint::from(0x1234_5678u32);
        let h = [0xaau8; 32];
        let sid = [0xbbu8; 32];
        let a = derive_key(KexHash::Sha256, &k, &h, b'A', &sid, 16);
        let b = derive_key(KexHash::Sha256, &k, &h, b'A', &sid, 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_derive_key_ids_differ() {
        let k = BigUint::from(0x1234_5678u32);
        let h = [0xaau8; 32];
        let sid = [0xbbu8; 32];
        let a = derive_key(KexHash::Sha256, &k, &h, b'A', &sid, 16);
        let b = derive_key(KexHash::Sha256, &k, &h, b'B', &sid, 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_key_extension_prefix() {
        // Extended output must begin with the unextended output.
        let k = BigUint::from(99u32);
        let h = [0x01u8; 20];
        let sid = [0x02u8; 20];
        let short = derive_key(KexHash::Sha1, &k, &h, b'C', &sid, 20);
        let long = derive_key(KexHash::Sha1, &k, &h, b'C', &sid, 64);
        assert_eq!(&long[..20], &short[..]);
        assert_eq!(long.len(), 64);
    }

    #[test]
    fn test_derive_directions_role_symmetry() {
        let k = BigUint::from(0xdead_beefu32);
        let h = [0x33u8; 32];
        let sid = h;
        let algs = DirectionAlgorithms {
            cipher: CipherAlgorithm::Aes128Ctr,
            mac: MacAlgorithm::HmacSha1,
            compression: CompressionAlgorithm::None,
        };
        let (mut client_seal, _) =
            derive_directions(Role::Client, KexHash::Sha256, &k, &h, &sid, algs, algs).unwrap();
        let (_, mut server_open) =
            derive_directions(Role::Server, KexHash::Sha256, &k, &h, &sid, algs, algs).unwrap();

        // Client outbound and server inbound share keys A/C/E.
        let mut data = b"0123456789abcdef".to_vec();
        client_seal.cipher.apply(&mut data);
        server_open.cipher.apply(&mut data);
        assert_eq!(data, b"0123456789abcdef");

        let tag = client_seal.mac.sign(3, b"hello");
        server_open.mac.verify(3, b"hello", &tag).unwrap();
    }

    #[test]
    fn test_zlib_round_trip_across_packets() {
        let mut comp = PacketCompressor::new(CompressionAlgorithm::Zlib);
        let mut decomp = PacketDecompressor::new(CompressionAlgorithm::Zlib);

        // Dictionary persists, so the second packet compresses smaller.
        let payload = vec![b'x'; 512];
        let first = comp.compress(&payload).unwrap();
        let second = comp.compress(&payload).unwrap();
        assert!(second.len() <= first.len());

        assert_eq!(decomp.decompress(&first).unwrap(), payload);
        assert_eq!(decomp.decompress(&second).unwrap(), payload);
    }

    #[test]
    fn test_null_compression_is_identity() {
        let mut comp = PacketCompressor::new(CompressionAlgorithm::None);
        assert_eq!(comp.compress(b"abc").unwrap(), b"abc");
    }

    #[test]
    fn test_rekey_block_threshold() {
        assert_eq!(rekey_block_threshold(16), 1u64 << 32);
        assert_eq!(rekey_block_threshold(8), (1u64 << 30) / 8);
        // Shifts past 63 saturate instead of overflowing.
        assert_eq!(rekey_block_threshold(32), u64::MAX);
    }

    #[test]
    fn test_algorithm_name_round_trip() {
        for alg in [CipherAlgorithm::Aes128Ctr, CipherAlgorithm::Aes256Ctr] {
            assert_eq!(CipherAlgorithm::from_name(alg.name()).unwrap(), alg);
        }
        for alg in [
            MacAlgorithm::HmacSha1,
            MacAlgorithm::HmacSha256,
            MacAlgorithm::HmacSha512,
        ] {
            assert_eq!(MacAlgorithm::from_name(alg.name()).unwrap(), alg);
        }
        assert!(CipherAlgorithm::from_name("rot13").is_err());
    }
}
