//! Host key algorithms (RFC 4253 Section 6.6, RFC 8332).
//!
//! The server proves its identity by signing the exchange hash with its
//! host key. Each supported algorithm knows how to parse its public key
//! blob and signature blob and verify the signature; they are looked up
//! by negotiated name through [`HostKeyRegistry`], which callers can
//! extend with their own implementations.

use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use skiff_platform::{SkiffError, SkiffResult};
use std::sync::Arc;

use super::wire::WireBuffer;

/// One host key algorithm: blob parsing plus signature verification.
pub trait HostKeyAlgorithm: Send + Sync {
    /// Negotiated wire name (e.g. `ssh-ed25519`).
    fn name(&self) -> &'static str;

    /// Verifies `signature_blob` over `message` with the public key in
    /// `key_blob`. Both blobs are in SSH wire format.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::Security`] on a bad signature and
    /// [`SkiffError::Protocol`] on malformed blobs.
    fn verify(&self, key_blob: &[u8], message: &[u8], signature_blob: &[u8]) -> SkiffResult<()>;
}

/// Splits a signature blob into its algorithm name and raw signature.
fn parse_signature_blob(blob: &[u8]) -> SkiffResult<(String, Vec<u8>)> {
    let mut buf = WireBuffer::from(blob);
    let name = buf.read_string()?;
    let sig = buf.read_bytes()?;
    Ok((name, sig))
}

/// `ssh-ed25519` (RFC 8709).
#[derive(Debug, Default)]
pub struct Ed25519HostKey;

impl HostKeyAlgorithm for Ed25519HostKey {
    fn name(&self) -> &'static str {
        "ssh-ed25519"
    }

    fn verify(&self, key_blob: &[u8], message: &[u8], signature_blob: &[u8]) -> SkiffResult<()> {
        let mut buf = WireBuffer::from(key_blob);
        let key_type = buf.read_string()?;
        if key_type != "ssh-ed25519" {
            return Err(SkiffError::Protocol(format!(
                "host key blob type mismatch: {}",
                key_type
            )));
        }
        let public_key = buf.read_bytes()?;

        let (sig_type, sig) = parse_signature_blob(signature_blob)?;
        if sig_type != "ssh-ed25519" {
            return Err(SkiffError::Protocol(format!(
                "signature blob type mismatch: {}",
                sig_type
            )));
        }

        UnparsedPublicKey::new(&signature::ED25519, &public_key)
            .verify(message, &sig)
            .map_err(|_| SkiffError::Security("host key signature invalid".to_string()))
    }
}

/// RSA host keys: `ssh-rsa` (SHA-1, legacy) and `rsa-sha2-256` (RFC 8332).
///
/// Both names share the `ssh-rsa` public key blob format; only the
/// signature hash differs.
#[derive(Debug)]
pub struct RsaHostKey {
    name: &'static str,
    params: &'static signature::RsaParameters,
}

impl RsaHostKey {
    /// RSA with SHA-256 signatures.
    pub fn sha256() -> Self {
        Self {
            name: "rsa-sha2-256",
            params: &signature::RSA_PKCS1_2048_8192_SHA256,
        }
    }

    /// RSA with SHA-1 signatures, kept only for old servers.
    pub fn sha1() -> Self {
        Self {
            name: "ssh-rsa",
            params: &signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY,
        }
    }
}

impl HostKeyAlgorithm for RsaHostKey {
    fn name(&self) -> &'static str {
        self.name
    }

    fn verify(&self, key_blob: &[u8], message: &[u8], signature_blob: &[u8]) -> SkiffResult<()> {
        let mut buf = WireBuffer::from(key_blob);
        let key_type = buf.read_string()?;
        if key_type != "ssh-rsa" {
            return Err(SkiffError::Protocol(format!(
                "host key blob type mismatch: {}",
                key_type
            )));
        }
        let e = buf.read_bytes()?;
        let n = buf.read_bytes()?;
        // mpints carry a 0x00 pad byte when the high bit is set.
        let n = n.strip_prefix(&[0u8][..]).unwrap_or(&n).to_vec();
        let e = e.strip_prefix(&[0u8][..]).unwrap_or(&e).to_vec();

        let (sig_type, sig) = parse_signature_blob(signature_blob)?;
        if sig_type != self.name {
            return Err(SkiffError::Protocol(format!(
                "signature blob type mismatch: expected {}, got {}",
                self.name, sig_type
            )));
        }

        signature::RsaPublicKeyComponents { n: &n, e: &e }
            .verify(self.params, message, &sig)
            .map_err(|_| SkiffError::Security("host key signature invalid".to_string()))
    }
}

/// Name-indexed set of host key algorithms.
///
/// The defaults cover the algorithms in [`super::prefs::Preferences`];
/// embedders inject additional implementations with [`register`].
///
/// [`register`]: HostKeyRegistry::register
#[derive(Clone)]
pub struct HostKeyRegistry {
    algorithms: Vec<Arc<dyn HostKeyAlgorithm>>,
}

impl HostKeyRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            algorithms: Vec::new(),
        }
    }

    /// Registry with the built-in algorithms.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Ed25519HostKey));
        registry.register(Arc::new(RsaHostKey::sha256()));
        registry.register(Arc::new(RsaHostKey::sha1()));
        registry
    }

    /// Adds an algorithm; a later registration with the same name wins.
    pub fn register(&mut self, algorithm: Arc<dyn HostKeyAlgorithm>) {
        self.algorithms
            .retain(|existing| existing.name() != algorithm.name());
        self.algorithms.push(algorithm);
    }

    /// Looks up an algorithm by negotiated name.
    pub fn get(&self, name: &str) -> SkiffResult<Arc<dyn HostKeyAlgorithm>> {
        self.algorithms
            .iter()
            .find(|alg| alg.name() == name)
            .cloned()
            .ok_or_else(|| {
                SkiffError::Protocol(format!("no host key algorithm registered for {}", name))
            })
    }

    /// Registered names, for building preference lists.
    pub fn names(&self) -> Vec<String> {
        self.algorithms
            .iter()
            .map(|alg| alg.name().to_string())
            .collect()
    }
}

impl Default for HostKeyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for HostKeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKeyRegistry")
            .field("algorithms", &self.names())
            .finish()
    }
}

/// Decides whether a presented host key is trusted.
///
/// Runs after the signature itself checks out; a rejection tears the
/// connection down with reason code HOST_KEY_NOT_VERIFIABLE.
pub trait HostKeyPolicy: Send + Sync {
    /// Returns true to trust the key.
    fn accept(&self, algorithm: &str, key_blob: &[u8]) -> bool;
}

/// Policy that trusts every key. Only suitable for tests and first-contact
/// tooling that records the key out of band.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyHostKey;

impl HostKeyPolicy for AcceptAnyHostKey {
    fn accept(&self, _algorithm: &str, _key_blob: &[u8]) -> bool {
        true
    }
}

/// A server-side host key identity: public blob plus signing.
pub struct HostKeyPair {
    key: Ed25519KeyPair,
}

impl HostKeyPair {
    /// Generates a fresh Ed25519 host key.
    pub fn generate_ed25519() -> SkiffResult<Self> {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| SkiffError::Security("host key generation failed".to_string()))?;
        let key = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|_| SkiffError::Security("host key decoding failed".to_string()))?;
        Ok(Self { key })
    }

    /// Loads an Ed25519 host key from PKCS#8 DER bytes.
    pub fn from_pkcs8(der: &[u8]) -> SkiffResult<Self> {
        let key = Ed25519KeyPair::from_pkcs8(der)
            .map_err(|_| SkiffError::Security("host key decoding failed".to_string()))?;
        Ok(Self { key })
    }

    /// Negotiated algorithm name for this key.
    pub fn algorithm(&self) -> &'static str {
        "ssh-ed25519"
    }

    /// Public key in SSH wire blob format.
    pub fn public_blob(&self) -> Vec<u8> {
        let mut buf = WireBuffer::new();
        buf.write_string("ssh-ed25519");
        buf.write_bytes(self.key.public_key().as_ref());
        buf.into_vec()
    }

    /// Signs `message`, returning an SSH signature blob.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature = self.key.sign(message);
        let mut buf = WireBuffer::new();
        buf.write_string("ssh-ed25519");
        buf.write_bytes(signature.as_ref());
        buf.into_vec()
    }
}

impl std::fmt::Debug for HostKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostKeyPair(ssh-ed25519)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_sign_and_verify() {
        let pair = HostKeyPair::generate_ed25519().unwrap();
        let blob = pair.public_blob();
        let sig = pair.sign(b"exchange hash bytes");

        let alg = Ed25519HostKey;
        alg.verify(&blob, b"exchange hash bytes", &sig).unwrap();
    }

    #[test]
    fn test_ed25519_rejects_wrong_message() {
        let pair = HostKeyPair::generate_ed25519().unwrap();
        let sig = pair.sign(b"the real message");

        let result = Ed25519HostKey.verify(&pair.public_blob(), b"a forged message", &sig);
        assert!(matches!(result, Err(SkiffError::Security(_))));
    }

    #[test]
    fn test_ed25519_rejects_wrong_key() {
        let signer = HostKeyPair::generate_ed25519().unwrap();
        let other = HostKeyPair::generate_ed25519().unwrap();
        let sig = signer.sign(b"message");

        let result = Ed25519HostKey.verify(&other.public_blob(), b"message", &sig);
        assert!(matches!(result, Err(SkiffError::Security(_))));
    }

    #[test]
    fn test_ed25519_rejects_mismatched_blob_type() {
        let pair = HostKeyPair::generate_ed25519().unwrap();
        let sig = pair.sign(b"message");

        let mut blob = WireBuffer::new();
        blob.write_string("ssh-rsa");
        blob.write_bytes(&[0u8; 32]);

        let result = Ed25519HostKey.verify(&blob.into_vec(), b"message", &sig);
        assert!(matches!(result, Err(SkiffError::Protocol(_))));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = HostKeyRegistry::with_defaults();
        assert_eq!(registry.get("ssh-ed25519").unwrap().name(), "ssh-ed25519");
        assert_eq!(registry.get("rsa-sha2-256").unwrap().name(), "rsa-sha2-256");
        assert!(registry.get("ecdsa-sha2-nistp521").is_err());
    }

    #[test]
    fn test_registry_reregistration_replaces() {
        let mut registry = HostKeyRegistry::empty();
        registry.register(Arc::new(Ed25519HostKey));
        registry.register(Arc::new(Ed25519HostKey));
        assert_eq!(registry.names(), vec!["ssh-ed25519"]);
    }

    #[test]
    fn test_host_key_pair_roundtrip_pkcs8() {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let a = HostKeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let b = HostKeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        assert_eq!(a.public_blob(), b.public_blob());
    }
}
