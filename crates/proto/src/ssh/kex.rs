//! Key exchange methods (RFC 4253 Section 8, RFC 5656, RFC 8731).
//!
//! All supported methods follow the same two-message shape: the client
//! sends an ephemeral public value (SSH_MSG_KEXDH_INIT), the server
//! answers with its host key blob, its own ephemeral public value, and a
//! signature over the exchange hash (SSH_MSG_KEXDH_REPLY). The methods
//! differ in the group arithmetic, the hash, and whether the ephemeral
//! values are encoded as mpints (finite field DH) or octet strings
//! (elliptic curve methods).
//!
//! The exchange hash `H` binds the negotiation:
//!
//! ```text
//! H = HASH(V_C || V_S || I_C || I_S || K_S || e || f || K)
//! ```
//!
//! The first `H` of a connection becomes the immutable session id.

use num_bigint::{BigUint, RandBigInt};
use once_cell::sync::Lazy;
use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey};
use skiff_platform::{SkiffError, SkiffResult};

use super::crypto::KexHash;
use super::hostkey::{HostKeyPair, HostKeyPolicy, HostKeyRegistry};
use super::message::MessageType;
use super::wire::WireBuffer;

/// 2048-bit MODP group (RFC 3526 group 14), generator 2.
static GROUP14_P: Lazy<BigUint> = Lazy::new(|| {
    const P_HEX: &[u8] = b"\
        FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
        020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
        4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
        EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
        98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
        9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
        E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
        3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";
    // The constant is well formed, so parsing cannot fail.
    BigUint::parse_bytes(P_HEX, 16).unwrap_or_default()
});

static GROUP14_G: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));

/// Supported key exchange methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexAlgorithm {
    /// diffie-hellman-group14-sha1
    DhGroup14Sha1,
    /// diffie-hellman-group14-sha256
    DhGroup14Sha256,
    /// curve25519-sha256 (and the pre-standard libssh.org alias)
    Curve25519,
    /// ecdh-sha2-nistp256
    EcdhNistp256,
}

impl KexAlgorithm {
    /// Resolves a negotiated name to a method.
    pub fn from_name(name: &str) -> SkiffResult<Self> {
        match name {
            "diffie-hellman-group14-sha1" => Ok(Self::DhGroup14Sha1),
            "diffie-hellman-group14-sha256" => Ok(Self::DhGroup14Sha256),
            "curve25519-sha256" | "curve25519-sha256@libssh.org" => Ok(Self::Curve25519),
            "ecdh-sha2-nistp256" => Ok(Self::EcdhNistp256),
            other => Err(SkiffError::Protocol(format!(
                "unsupported key exchange method: {}",
                other
            ))),
        }
    }

    /// Canonical wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DhGroup14Sha1 => "diffie-hellman-group14-sha1",
            Self::DhGroup14Sha256 => "diffie-hellman-group14-sha256",
            Self::Curve25519 => "curve25519-sha256",
            Self::EcdhNistp256 => "ecdh-sha2-nistp256",
        }
    }

    /// Hash used for the exchange hash and key derivation.
    pub fn hash(&self) -> KexHash {
        match self {
            Self::DhGroup14Sha1 => KexHash::Sha1,
            Self::DhGroup14Sha256 | Self::Curve25519 | Self::EcdhNistp256 => KexHash::Sha256,
        }
    }

    fn is_finite_field(&self) -> bool {
        matches!(self, Self::DhGroup14Sha1 | Self::DhGroup14Sha256)
    }
}

/// The negotiation transcript that feeds the exchange hash.
#[derive(Debug, Clone)]
pub struct ExchangeInput {
    /// Client identification line, without CR LF
    pub client_version: Vec<u8>,
    /// Server identification line, without CR LF
    pub server_version: Vec<u8>,
    /// Exact payload bytes of the client's KEXINIT
    pub client_kexinit: Vec<u8>,
    /// Exact payload bytes of the server's KEXINIT
    pub server_kexinit: Vec<u8>,
}

/// Result of a completed exchange, from either role.
#[derive(Debug)]
pub struct KexOutcome {
    /// Shared secret `K`
    pub shared_secret: BigUint,
    /// Exchange hash `H`
    pub exchange_hash: Vec<u8>,
    /// The server's public host key blob
    pub host_key_blob: Vec<u8>,
    /// Hash the method used, for key derivation
    pub hash: KexHash,
}

fn ring_algorithm(algorithm: KexAlgorithm) -> SkiffResult<&'static agreement::Algorithm> {
    match algorithm {
        KexAlgorithm::Curve25519 => Ok(&agreement::X25519),
        KexAlgorithm::EcdhNistp256 => Ok(&agreement::ECDH_P256),
        _ => Err(SkiffError::Protocol(format!(
            "{} is not an elliptic curve method",
            algorithm.name()
        ))),
    }
}

enum Ephemeral {
    Dh {
        private: BigUint,
        public: BigUint,
    },
    Curve {
        private: EphemeralPrivateKey,
        public: Vec<u8>,
    },
}

impl Ephemeral {
    fn generate(algorithm: KexAlgorithm) -> SkiffResult<Self> {
        if algorithm.is_finite_field() {
            let p = &*GROUP14_P;
            let low = BigUint::from(2u32);
            let high = p - BigUint::from(1u32);
            let private = rand::rngs::OsRng.gen_biguint_range(&low, &high);
            let public = GROUP14_G.modpow(&private, p);
            return Ok(Self::Dh { private, public });
        }
        let ring_alg = ring_algorithm(algorithm)?;
        let rng = ring::rand::SystemRandom::new();
        let private = EphemeralPrivateKey::generate(ring_alg, &rng)
            .map_err(|_| SkiffError::Security("ephemeral key generation failed".to_string()))?;
        let public = private
            .compute_public_key()
            .map_err(|_| SkiffError::Security("ephemeral key generation failed".to_string()))?
            .as_ref()
            .to_vec();
        Ok(Self::Curve { private, public })
    }

    fn public_bytes(&self) -> Vec<u8> {
        match self {
            Self::Dh { public, .. } => public.to_bytes_be(),
            Self::Curve { public, .. } => public.clone(),
        }
    }

    /// Derives the shared secret from the peer's public value, consuming
    /// the ephemeral private key.
    fn agree(self, algorithm: KexAlgorithm, peer_public: &[u8]) -> SkiffResult<BigUint> {
        match self {
            Self::Dh { private, .. } => {
                let f = BigUint::from_bytes_be(peer_public);
                validate_dh_public(&f)?;
                Ok(f.modpow(&private, &GROUP14_P))
            }
            Self::Curve { private, .. } => {
                validate_curve_public(algorithm, peer_public)?;
                let ring_alg = ring_algorithm(algorithm)?;
                let peer = UnparsedPublicKey::new(ring_alg, peer_public);
                let secret = agreement::agree_ephemeral(private, &peer, |shared| {
                    shared.to_vec()
                })
                .map_err(|_| {
                    SkiffError::Security("key agreement rejected peer public value".to_string())
                })?;
                Ok(BigUint::from_bytes_be(&secret))
            }
        }
    }
}

/// Rejects DH public values outside `(1, p-1)`, which would force the
/// shared secret into a trivial subgroup.
fn validate_dh_public(value: &BigUint) -> SkiffResult<()> {
    let p = &*GROUP14_P;
    let one = BigUint::from(1u32);
    if value <= &one || value >= &(p - &one) {
        return Err(SkiffError::Security(
            "DH public value out of range".to_string(),
        ));
    }
    Ok(())
}

/// Structural checks on elliptic curve public values before handing them
/// to the agreement backend, which additionally verifies curve membership
/// for NIST points.
fn validate_curve_public(algorithm: KexAlgorithm, public: &[u8]) -> SkiffResult<()> {
    match algorithm {
        KexAlgorithm::Curve25519 => {
            if public.len() != 32 {
                return Err(SkiffError::Security(format!(
                    "X25519 public value has {} bytes, expected 32",
                    public.len()
                )));
            }
        }
        KexAlgorithm::EcdhNistp256 => {
            // Uncompressed SEC1 point: 0x04 || X (32) || Y (32).
            if public.len() != 65 || public[0] != 0x04 {
                return Err(SkiffError::Security(
                    "nistp256 public value is not an uncompressed point".to_string(),
                ));
            }
        }
        _ => {
            return Err(SkiffError::Protocol(format!(
                "{} is not an elliptic curve method",
                algorithm.name()
            )));
        }
    }
    Ok(())
}

/// Computes the exchange hash for the method.
fn exchange_hash(
    algorithm: KexAlgorithm,
    input: &ExchangeInput,
    host_key_blob: &[u8],
    client_public: &[u8],
    server_public: &[u8],
    shared_secret: &BigUint,
) -> Vec<u8> {
    let mut buf = WireBuffer::new();
    buf.write_bytes(&input.client_version);
    buf.write_bytes(&input.server_version);
    buf.write_bytes(&input.client_kexinit);
    buf.write_bytes(&input.server_kexinit);
    buf.write_bytes(host_key_blob);
    if algorithm.is_finite_field() {
        buf.write_mpint_bytes(client_public);
        buf.write_mpint_bytes(server_public);
    } else {
        buf.write_bytes(client_public);
        buf.write_bytes(server_public);
    }
    buf.write_mpint(shared_secret);
    algorithm.hash().digest(buf.as_slice())
}

/// Client side of one key exchange round.
pub struct KexClient {
    algorithm: KexAlgorithm,
    ephemeral: Ephemeral,
}

impl KexClient {
    /// Generates the client ephemeral for the negotiated method.
    pub fn new(algorithm: KexAlgorithm) -> SkiffResult<Self> {
        Ok(Self {
            algorithm,
            ephemeral: Ephemeral::generate(algorithm)?,
        })
    }

    /// The SSH_MSG_KEXDH_INIT payload carrying our public value.
    pub fn init_payload(&self) -> Vec<u8> {
        let mut buf = WireBuffer::new();
        buf.write_u8(MessageType::KexDhInit as u8);
        if self.algorithm.is_finite_field() {
            buf.write_mpint_bytes(&self.ephemeral.public_bytes());
        } else {
            buf.write_bytes(&self.ephemeral.public_bytes());
        }
        buf.into_vec()
    }

    /// Processes the SSH_MSG_KEXDH_REPLY, verifying the host key signature
    /// and the trust policy.
    ///
    /// # Errors
    ///
    /// - [`SkiffError::Protocol`] on a malformed reply
    /// - [`SkiffError::Security`] on an invalid peer public value, a bad
    ///   signature, or a host key the policy refuses
    pub fn finish(
        self,
        reply_payload: &[u8],
        input: &ExchangeInput,
        registry: &HostKeyRegistry,
        host_key_algorithm: &str,
        policy: &dyn HostKeyPolicy,
    ) -> SkiffResult<KexOutcome> {
        let mut buf = WireBuffer::from(reply_payload);
        let msg_type = buf.read_u8()?;
        if msg_type != MessageType::KexDhReply as u8 {
            return Err(SkiffError::Protocol(format!(
                "expected KEXDH_REPLY, got message type {}",
                msg_type
            )));
        }
        let host_key_blob = buf.read_bytes()?;
        let server_public = if self.algorithm.is_finite_field() {
            buf.read_mpint()?.to_bytes_be()
        } else {
            buf.read_bytes()?
        };
        let signature_blob = buf.read_bytes()?;

        let algorithm = self.algorithm;
        let client_public = self.ephemeral.public_bytes();
        let shared_secret = self.ephemeral.agree(algorithm, &server_public)?;
        let hash = exchange_hash(
            algorithm,
            input,
            &host_key_blob,
            &client_public,
            &server_public,
            &shared_secret,
        );

        let verifier = registry.get(host_key_algorithm)?;
        verifier.verify(&host_key_blob, &hash, &signature_blob)?;
        if !policy.accept(host_key_algorithm, &host_key_blob) {
            return Err(SkiffError::Security(
                "host key rejected by trust policy".to_string(),
            ));
        }

        Ok(KexOutcome {
            shared_secret,
            exchange_hash: hash,
            host_key_blob,
            hash: algorithm.hash(),
        })
    }
}

impl std::fmt::Debug for KexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KexClient({})", self.algorithm.name())
    }
}

/// Server side of one key exchange round.
#[derive(Debug)]
pub struct KexServer;

impl KexServer {
    /// Answers an SSH_MSG_KEXDH_INIT: derives the shared secret, signs the
    /// exchange hash with the host key, and returns the reply payload
    /// alongside the outcome.
    pub fn respond(
        algorithm: KexAlgorithm,
        init_payload: &[u8],
        input: &ExchangeInput,
        host_key: &HostKeyPair,
    ) -> SkiffResult<(Vec<u8>, KexOutcome)> {
        let mut buf = WireBuffer::from(init_payload);
        let msg_type = buf.read_u8()?;
        if msg_type != MessageType::KexDhInit as u8 {
            return Err(SkiffError::Protocol(format!(
                "expected KEXDH_INIT, got message type {}",
                msg_type
            )));
        }
        let client_public = if algorithm.is_finite_field() {
            buf.read_mpint()?.to_bytes_be()
        } else {
            buf.read_bytes()?
        };

        let ephemeral = Ephemeral::generate(algorithm)?;
        let server_public = ephemeral.public_bytes();
        let shared_secret = ephemeral.agree(algorithm, &client_public)?;

        let host_key_blob = host_key.public_blob();
        let hash = exchange_hash(
            algorithm,
            input,
            &host_key_blob,
            &client_public,
            &server_public,
            &shared_secret,
        );
        let signature_blob = host_key.sign(&hash);

        let mut reply = WireBuffer::new();
        reply.write_u8(MessageType::KexDhReply as u8);
        reply.write_bytes(&host_key_blob);
        if algorithm.is_finite_field() {
            reply.write_mpint_bytes(&server_public);
        } else {
            reply.write_bytes(&server_public);
        }
        reply.write_bytes(&signature_blob);

        Ok((
            reply.into_vec(),
            KexOutcome {
                shared_secret,
                exchange_hash: hash,
                host_key_blob,
                hash: algorithm.hash(),
            },
        ))
    }
}
