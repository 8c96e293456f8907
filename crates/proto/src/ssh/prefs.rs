//! Algorithm preferences and negotiation (RFC 4253 Section 7.1).
//!
//! Both sides send a KEXINIT listing the algorithms they support in
//! preference order. For every category the chosen algorithm is the first
//! entry in the client's list that also appears in the server's list; the
//! client's ordering decides, the server's list only gates membership.
//!
//! The key exchange method is special: a method is only eligible if the
//! two sides also share a host key algorithm that can satisfy it, so a
//! shared KEX name without any common host key is skipped rather than
//! selected.

use rand::RngCore;
use skiff_platform::{SkiffError, SkiffResult};

use super::message::MessageType;
use super::wire::WireBuffer;

/// Algorithm lists this implementation offers, in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    /// Key exchange methods
    pub kex: Vec<String>,
    /// Host key algorithms
    pub host_keys: Vec<String>,
    /// Encryption algorithms (both directions)
    pub ciphers: Vec<String>,
    /// MAC algorithms (both directions)
    pub macs: Vec<String>,
    /// Compression algorithms (both directions)
    pub compression: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        fn names(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }
        Self {
            kex: names(&[
                "curve25519-sha256",
                "curve25519-sha256@libssh.org",
                "ecdh-sha2-nistp256",
                "diffie-hellman-group14-sha256",
                "diffie-hellman-group14-sha1",
            ]),
            host_keys: names(&["ssh-ed25519", "rsa-sha2-256", "ssh-rsa"]),
            ciphers: names(&["aes256-ctr", "aes128-ctr"]),
            macs: names(&["hmac-sha2-256", "hmac-sha2-512", "hmac-sha1"]),
            compression: names(&["none", "zlib"]),
        }
    }
}

/// A parsed SSH_MSG_KEXINIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    /// 16 random bytes, mixed into the exchange hash
    pub cookie: [u8; 16],
    /// Key exchange methods
    pub kex_algorithms: Vec<String>,
    /// Host key algorithms
    pub server_host_key_algorithms: Vec<String>,
    /// Encryption, client to server
    pub encryption_client_to_server: Vec<String>,
    /// Encryption, server to client
    pub encryption_server_to_client: Vec<String>,
    /// MAC, client to server
    pub mac_client_to_server: Vec<String>,
    /// MAC, server to client
    pub mac_server_to_client: Vec<String>,
    /// Compression, client to server
    pub compression_client_to_server: Vec<String>,
    /// Compression, server to client
    pub compression_server_to_client: Vec<String>,
    /// Languages, client to server (always empty here)
    pub languages_client_to_server: Vec<String>,
    /// Languages, server to client (always empty here)
    pub languages_server_to_client: Vec<String>,
    /// True if an optimistic guessed KEX packet follows this message
    pub first_kex_packet_follows: bool,
}

impl KexInit {
    /// Builds a KEXINIT from local preferences with a fresh random cookie.
    pub fn from_preferences(prefs: &Preferences) -> Self {
        let mut cookie = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut cookie);
        Self {
            cookie,
            kex_algorithms: prefs.kex.clone(),
            server_host_key_algorithms: prefs.host_keys.clone(),
            encryption_client_to_server: prefs.ciphers.clone(),
            encryption_server_to_client: prefs.ciphers.clone(),
            mac_client_to_server: prefs.macs.clone(),
            mac_server_to_client: prefs.macs.clone(),
            compression_client_to_server: prefs.compression.clone(),
            compression_server_to_client: prefs.compression.clone(),
            languages_client_to_server: vec![],
            languages_server_to_client: vec![],
            first_kex_packet_follows: false,
        }
    }

    /// Serializes to a packet payload. The exact bytes are also an input
    /// to the exchange hash, so callers keep them around.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = WireBuffer::new();
        buf.write_u8(MessageType::KexInit as u8);
        buf.write_raw(&self.cookie);
        buf.write_name_list(&self.kex_algorithms);
        buf.write_name_list(&self.server_host_key_algorithms);
        buf.write_name_list(&self.encryption_client_to_server);
        buf.write_name_list(&self.encryption_server_to_client);
        buf.write_name_list(&self.mac_client_to_server);
        buf.write_name_list(&self.mac_server_to_client);
        buf.write_name_list(&self.compression_client_to_server);
        buf.write_name_list(&self.compression_server_to_client);
        buf.write_name_list(&self.languages_client_to_server);
        buf.write_name_list(&self.languages_server_to_client);
        buf.write_bool(self.first_kex_packet_follows);
        buf.write_u32(0); // reserved
        buf.into_vec()
    }

    /// Parses a KEXINIT payload.
    pub fn from_bytes(payload: &[u8]) -> SkiffResult<Self> {
        let mut buf = WireBuffer::from(payload);
        let msg_type = buf.read_u8()?;
        if msg_type != MessageType::KexInit as u8 {
            return Err(SkiffError::Protocol(format!(
                "expected KEXINIT, got message type {}",
                msg_type
            )));
        }
        let cookie_bytes = buf.read_raw(16)?;
        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(&cookie_bytes);
        let kexinit = Self {
            cookie,
            kex_algorithms: buf.read_name_list()?,
            server_host_key_algorithms: buf.read_name_list()?,
            encryption_client_to_server: buf.read_name_list()?,
            encryption_server_to_client: buf.read_name_list()?,
            mac_client_to_server: buf.read_name_list()?,
            mac_server_to_client: buf.read_name_list()?,
            compression_client_to_server: buf.read_name_list()?,
            compression_server_to_client: buf.read_name_list()?,
            languages_client_to_server: buf.read_name_list()?,
            languages_server_to_client: buf.read_name_list()?,
            first_kex_packet_follows: buf.read_bool()?,
        };
        let _reserved = buf.read_u32()?;
        Ok(kexinit)
    }
}

/// Names chosen for one direction of traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedDirection {
    /// Encryption algorithm name
    pub cipher: String,
    /// MAC algorithm name
    pub mac: String,
    /// Compression algorithm name
    pub compression: String,
}

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Key exchange method
    pub kex: String,
    /// Host key algorithm
    pub host_key: String,
    /// Client-to-server algorithms
    pub client_to_server: NegotiatedDirection,
    /// Server-to-client algorithms
    pub server_to_client: NegotiatedDirection,
    /// True when both sides' most-preferred KEX entries agree, so an
    /// optimistically sent first KEX packet was guessed correctly
    pub guess_matches: bool,
}

/// Picks the first client-preferred name present in the server's list.
fn choose(category: &str, client: &[String], server: &[String]) -> SkiffResult<String> {
    client
        .iter()
        .find(|name| server.contains(name))
        .cloned()
        .ok_or_else(|| {
            SkiffError::Protocol(format!(
                "no common {} algorithm (client: [{}], server: [{}])",
                category,
                client.join(","),
                server.join(",")
            ))
        })
}

/// Host key algorithms a KEX method can authenticate with.
///
/// Every method shipped today accepts any signature-capable host key; a
/// future method with a narrower requirement gets its own arm here and
/// the selection loop in [`negotiate`] honors it.
fn kex_accepts_host_key(_kex: &str, _host_key: &str) -> bool {
    true
}

/// Runs the negotiation rules over a client and server KEXINIT.
///
/// The caller passes the two messages by protocol role, not by which side
/// it happens to be; the same function serves both ends.
///
/// # Errors
///
/// Returns [`SkiffError::Protocol`] when any category has no common
/// algorithm. That fault is fatal and followed by a DISCONNECT with
/// reason code KEY_EXCHANGE_FAILED.
pub fn negotiate(client: &KexInit, server: &KexInit) -> SkiffResult<Negotiated> {
    // A KEX method is only viable alongside a host key algorithm both
    // sides support and the method itself accepts: walk the client's KEX
    // list in preference order and take the first method with a workable
    // host key pairing.
    let mut chosen: Option<(String, String)> = None;
    for kex in &client.kex_algorithms {
        if !server.kex_algorithms.contains(kex) {
            continue;
        }
        let host_key = client.server_host_key_algorithms.iter().find(|hk| {
            server.server_host_key_algorithms.contains(hk) && kex_accepts_host_key(kex, hk)
        });
        if let Some(host_key) = host_key {
            chosen = Some((kex.clone(), host_key.clone()));
            break;
        }
    }
    let (kex, host_key) = chosen.ok_or_else(|| {
        SkiffError::Protocol(format!(
            "no common key exchange with a workable host key \
             (client kex: [{}], server kex: [{}], \
             client host keys: [{}], server host keys: [{}])",
            client.kex_algorithms.join(","),
            server.kex_algorithms.join(","),
            client.server_host_key_algorithms.join(","),
            server.server_host_key_algorithms.join(",")
        ))
    })?;

    // The optimistic-guess rule looks only at the most-preferred KEX
    // entries; host key preferences play no part in it.
    let guess_matches = client.kex_algorithms.first() == server.kex_algorithms.first();

    Ok(Negotiated {
        kex,
        host_key,
        client_to_server: NegotiatedDirection {
            cipher: choose(
                "cipher (client to server)",
                &client.encryption_client_to_server,
                &server.encryption_client_to_server,
            )?,
            mac: choose(
                "MAC (client to server)",
                &client.mac_client_to_server,
                &server.mac_client_to_server,
            )?,
            compression: choose(
                "compression (client to server)",
                &client.compression_client_to_server,
                &server.compression_client_to_server,
            )?,
        },
        server_to_client: NegotiatedDirection {
            cipher: choose(
                "cipher (server to client)",
                &client.encryption_server_to_client,
                &server.encryption_server_to_client,
            )?,
            mac: choose(
                "MAC (server to client)",
                &client.mac_server_to_client,
                &server.mac_server_to_client,
            )?,
            compression: choose(
                "compression (server to client)",
                &client.compression_server_to_client,
                &server.compression_server_to_client,
            )?,
        },
        guess_matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_kexinit_round_trip() {
        let kexinit = KexInit::from_preferences(&Preferences::default());
        let bytes = kexinit.to_bytes();
        assert_eq!(bytes[0], MessageType::KexInit as u8);
        let parsed = KexInit::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, kexinit);
    }

    #[test]
    fn test_kexinit_rejects_wrong_type() {
        let mut bytes = KexInit::from_preferences(&Preferences::default()).to_bytes();
        bytes[0] = MessageType::NewKeys as u8;
        assert!(KexInit::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_client_preference_order_wins() {
        let mut client = KexInit::from_preferences(&Preferences::default());
        let mut server = KexInit::from_preferences(&Preferences::default());
        client.encryption_client_to_server = names(&["aes128-ctr", "aes256-ctr"]);
        server.encryption_client_to_server = names(&["aes256-ctr", "aes128-ctr"]);

        let negotiated = negotiate(&client, &server).unwrap();
        assert_eq!(negotiated.client_to_server.cipher, "aes128-ctr");
    }

    #[test]
    fn test_directions_negotiate_independently() {
        let mut client = KexInit::from_preferences(&Preferences::default());
        let mut server = KexInit::from_preferences(&Preferences::default());
        client.mac_client_to_server = names(&["hmac-sha2-256"]);
        client.mac_server_to_client = names(&["hmac-sha1", "hmac-sha2-256"]);
        server.mac_client_to_server = names(&["hmac-sha2-256", "hmac-sha1"]);
        server.mac_server_to_client = names(&["hmac-sha1"]);

        let negotiated = negotiate(&client, &server).unwrap();
        assert_eq!(negotiated.client_to_server.mac, "hmac-sha2-256");
        assert_eq!(negotiated.server_to_client.mac, "hmac-sha1");
    }

    #[test]
    fn test_no_common_algorithm_is_fatal() {
        let mut client = KexInit::from_preferences(&Preferences::default());
        let mut server = KexInit::from_preferences(&Preferences::default());
        client.kex_algorithms = names(&["curve25519-sha256"]);
        server.kex_algorithms = names(&["diffie-hellman-group14-sha1"]);

        let result = negotiate(&client, &server);
        match result {
            Err(SkiffError::Protocol(msg)) => assert!(msg.contains("key exchange")),
            other => panic!("expected Protocol fault, got {:?}", other),
        }
    }

    #[test]
    fn test_guess_matches_when_first_entries_agree() {
        let client = KexInit::from_preferences(&Preferences::default());
        let server = KexInit::from_preferences(&Preferences::default());
        assert!(negotiate(&client, &server).unwrap().guess_matches);
    }

    #[test]
    fn test_guess_matches_despite_host_key_disagreement() {
        let client = KexInit::from_preferences(&Preferences::default());
        let mut server = KexInit::from_preferences(&Preferences::default());
        // Same first KEX entry, different first host key entries: the
        // guess is still correct, only the KEX lists count.
        server.server_host_key_algorithms = names(&["rsa-sha2-256", "ssh-ed25519"]);

        let negotiated = negotiate(&client, &server).unwrap();
        assert!(negotiated.guess_matches);
        // Host key choice still follows client preference order.
        assert_eq!(negotiated.host_key, "ssh-ed25519");
    }

    #[test]
    fn test_kex_needs_workable_host_key() {
        let mut client = KexInit::from_preferences(&Preferences::default());
        let mut server = KexInit::from_preferences(&Preferences::default());
        client.server_host_key_algorithms = names(&["ssh-ed25519"]);
        server.server_host_key_algorithms = names(&["ssh-rsa"]);

        let result = negotiate(&client, &server);
        match result {
            Err(SkiffError::Protocol(msg)) => assert!(msg.contains("key exchange")),
            other => panic!("expected Protocol fault, got {:?}", other),
        }
    }

    #[test]
    fn test_guess_differs_when_first_kex_entries_differ() {
        let client = KexInit::from_preferences(&Preferences::default());
        let mut server = KexInit::from_preferences(&Preferences::default());
        server.kex_algorithms.rotate_left(1);

        let negotiated = negotiate(&client, &server).unwrap();
        assert!(!negotiated.guess_matches);
    }

    #[test]
    fn test_fresh_cookies_differ() {
        let a = KexInit::from_preferences(&Preferences::default());
        let b = KexInit::from_preferences(&Preferences::default());
        assert_ne!(a.cookie, b.cookie);
    }
}
