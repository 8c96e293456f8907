//! Transport lifecycle events.
//!
//! The transport reports lifecycle notifications through a narrow observer
//! trait with default no-op methods, so consumers implement only what they
//! care about. Events are plain data; the observer must not block.

/// Lifecycle events emitted by a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Version strings have been exchanged with the peer.
    VersionExchanged {
        /// The peer's full identification string (without CR LF)
        peer: String,
    },

    /// A key exchange (initial or re-key) has started.
    KexStarted {
        /// True if the peer's KEXINIT arrived before ours was sent
        initiated_by_peer: bool,
    },

    /// A key exchange completed and new keys are in effect.
    KexCompleted {
        /// Negotiated key exchange algorithm name
        kex_algorithm: String,
        /// Negotiated host key algorithm name
        host_key_algorithm: String,
    },

    /// A message with an unknown type code was received and answered with
    /// an UNIMPLEMENTED reply.
    UnknownMessage {
        /// The unrecognized message type code
        msg_type: u8,
    },

    /// A DEBUG message was received from the peer.
    DebugReceived {
        /// The debug message text
        message: String,
    },

    /// The connection has been torn down. Delivered exactly once.
    Disconnected {
        /// SSH disconnect reason code
        code: u32,
        /// Human-readable description
        description: String,
    },
}

/// Observer for transport lifecycle events.
///
/// All methods have default no-op implementations.
pub trait TransportObserver: Send + Sync {
    /// Called for every lifecycle event.
    fn on_event(&self, _event: &TransportEvent) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl TransportObserver for NullObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting(std::sync::atomic::AtomicUsize);

    impl TransportObserver for Counting {
        fn on_event(&self, _event: &TransportEvent) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_null_observer_is_noop() {
        let obs = NullObserver;
        obs.on_event(&TransportEvent::Disconnected {
            code: 11,
            description: "bye".to_string(),
        });
    }

    #[test]
    fn test_counting_observer() {
        let obs = Counting(std::sync::atomic::AtomicUsize::new(0));
        obs.on_event(&TransportEvent::KexStarted {
            initiated_by_peer: false,
        });
        obs.on_event(&TransportEvent::UnknownMessage { msg_type: 200 });
        assert_eq!(obs.0.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
