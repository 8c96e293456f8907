//! Full transport handshake and traffic over an in-memory stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use skiff_platform::{SkiffError, TransportEvent, TransportObserver};
use skiff_proto::ssh::hostkey::HostKeyPair;
use skiff_proto::ssh::message::disconnect_reason;
use skiff_proto::ssh::{Transport, TransportConfig};

fn configs() -> (TransportConfig, TransportConfig) {
    (TransportConfig::default(), TransportConfig::default())
}

async fn connected_pair() -> (
    Transport<tokio::io::DuplexStream>,
    Transport<tokio::io::DuplexStream>,
) {
    let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
    let (client_config, server_config) = configs();
    let host_key = HostKeyPair::generate_ed25519().unwrap();

    let server_task = tokio::spawn(async move {
        Transport::server(server_stream, server_config, host_key).await
    });
    let client = Transport::client(client_stream, client_config)
        .await
        .unwrap();
    let server = server_task.await.unwrap().unwrap();
    (client, server)
}

#[tokio::test]
async fn test_handshake_agrees_on_session() {
    let (client, server) = connected_pair().await;

    assert!(!client.session_id().is_empty());
    assert_eq!(client.session_id(), server.session_id());
    assert_eq!(client.negotiated().kex, "curve25519-sha256");
    assert_eq!(client.negotiated().host_key, "ssh-ed25519");
    assert_eq!(client.negotiated().client_to_server.cipher, "aes256-ctr");
    assert_eq!(server.negotiated(), client.negotiated());
    assert_eq!(client.peer_version().proto_version(), "2.0");
}

#[tokio::test]
async fn test_payload_round_trip() {
    let (mut client, mut server) = connected_pair().await;

    // 50 is in the user auth range, so it reaches the application.
    let payload = vec![50u8, 1, 2, 3, 4, 5];
    client.send(&payload).await.unwrap();
    assert_eq!(server.recv().await.unwrap(), payload);

    let reply = vec![51u8, 9, 8, 7];
    server.send(&reply).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), reply);
}

#[tokio::test]
async fn test_ignore_and_debug_are_consumed_silently() {
    let (mut client, mut server) = connected_pair().await;

    client.send_ignore(b"chaff").await.unwrap();
    client.send_debug(false, "poke").await.unwrap();
    let payload = vec![60u8, 42];
    client.send(&payload).await.unwrap();

    // Neither the IGNORE nor the DEBUG surfaces; the next recv yields
    // the real payload.
    assert_eq!(server.recv().await.unwrap(), payload);
}

#[tokio::test]
async fn test_unknown_message_answered_with_unimplemented() {
    let (mut client, mut server) = connected_pair().await;

    let server_task = tokio::spawn(async move {
        // Consumes the unknown message (answering UNIMPLEMENTED), then
        // returns the real one.
        let payload = server.recv().await.unwrap();
        (server, payload)
    });

    client.send(&[200u8, 0, 0]).await.unwrap();
    let payload = vec![80u8, 1];
    client.send(&payload).await.unwrap();
    let (mut server, received) = server_task.await.unwrap();
    assert_eq!(received, payload);

    // The UNIMPLEMENTED reply is consumed silently before real traffic.
    let follow_up = vec![81u8, 2];
    server.send(&follow_up).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), follow_up);
}

#[tokio::test]
async fn test_service_request_accepted() {
    let (mut client, mut server) = connected_pair().await;

    let server_task = tokio::spawn(async move {
        // The service request is handled inside recv; the echo payload
        // follows it.
        let payload = server.recv().await.unwrap();
        (server, payload)
    });

    client.request_service("ssh-userauth").await.unwrap();
    client.send(&[50u8, 7]).await.unwrap();
    let (_server, payload) = server_task.await.unwrap();
    assert_eq!(payload, vec![50u8, 7]);
}

#[tokio::test]
async fn test_rekey_on_traffic_threshold() {
    let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
    let mut client_config = TransportConfig::default();
    // Force a re-key after a few kilobytes.
    client_config.rekey_bytes = 4 * 1024;
    let server_config = TransportConfig::default();
    let host_key = HostKeyPair::generate_ed25519().unwrap();

    let server_task = tokio::spawn(async move {
        let mut server = Transport::server(server_stream, server_config, host_key)
            .await
            .unwrap();
        let mut payloads = Vec::new();
        for _ in 0..8 {
            payloads.push(server.recv().await.unwrap());
        }
        payloads
    });

    let mut client = Transport::client(client_stream, client_config)
        .await
        .unwrap();
    let session_id = client.session_id().to_vec();

    let payload = vec![90u8; 1500];
    for _ in 0..8 {
        client.send(&payload).await.unwrap();
    }

    let received = server_task.await.unwrap();
    assert_eq!(received.len(), 8);
    for p in &received {
        assert_eq!(p, &payload);
    }
    // The session id is pinned to the first exchange hash.
    assert_eq!(client.session_id(), session_id);
}

#[tokio::test]
async fn test_on_demand_rekey() {
    let (mut client, mut server) = connected_pair().await;
    let session_id = client.session_id().to_vec();

    let server_task = tokio::spawn(async move {
        // The client's KEXINIT is handled inside recv; the payload that
        // follows arrives under the new keys.
        let payload = server.recv().await.unwrap();
        (server, payload)
    });

    client.rekey().await.unwrap();
    let payload = vec![50u8, 1, 2, 3];
    client.send(&payload).await.unwrap();

    let (server, received) = server_task.await.unwrap();
    assert_eq!(received, payload);
    assert_eq!(client.session_id(), session_id);
    assert_eq!(server.session_id(), session_id);
}

/// Counts completed key exchanges on one side.
#[derive(Default)]
struct KexCounter(AtomicUsize);

impl TransportObserver for KexCounter {
    fn on_event(&self, event: &TransportEvent) {
        if matches!(event, TransportEvent::KexCompleted { .. }) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[tokio::test]
async fn test_rekey_initiated_from_receive_path() {
    let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
    let client_config = TransportConfig::default();
    let counter = Arc::new(KexCounter::default());
    let mut server_config = TransportConfig::default();
    // The server only ever receives, so its inbound byte budget is the
    // trigger.
    server_config.rekey_bytes = 4 * 1024;
    server_config.observer = counter.clone();
    let host_key = HostKeyPair::generate_ed25519().unwrap();

    let server_task = tokio::spawn(async move {
        let mut server = Transport::server(server_stream, server_config, host_key)
            .await
            .unwrap();
        let mut payloads = Vec::new();
        for _ in 0..8 {
            payloads.push(server.recv().await.unwrap());
        }
        server.send(&[50u8, 1]).await.unwrap();
        payloads
    });

    let mut client = Transport::client(client_stream, client_config)
        .await
        .unwrap();
    let payload = vec![90u8; 1500];
    for _ in 0..8 {
        client.send(&payload).await.unwrap();
    }
    // Participating in the server-initiated re-key happens inside recv;
    // the confirmation payload arrives under the new keys.
    assert_eq!(client.recv().await.unwrap(), vec![50u8, 1]);

    let received = server_task.await.unwrap();
    assert_eq!(received.len(), 8);
    for p in &received {
        assert_eq!(p, &payload);
    }
    // Initial handshake plus the receive-side re-key.
    assert_eq!(counter.0.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_disconnect_propagates() {
    let (mut client, mut server) = connected_pair().await;

    let server_task = tokio::spawn(async move { server.recv().await });
    client
        .disconnect(disconnect_reason::BY_APPLICATION, "done")
        .await
        .unwrap();

    match server_task.await.unwrap() {
        Err(SkiffError::Disconnected { code, description }) => {
            assert_eq!(code, disconnect_reason::BY_APPLICATION);
            assert_eq!(description, "done");
        }
        other => panic!("expected Disconnected, got {:?}", other),
    }

    // The closed side refuses further traffic.
    assert!(matches!(
        client.send(&[50u8]).await,
        Err(SkiffError::Disconnected { .. })
    ));
}

#[tokio::test]
async fn test_observer_sees_lifecycle() {
    #[derive(Default)]
    struct Recorder(std::sync::Mutex<Vec<String>>);
    impl TransportObserver for Recorder {
        fn on_event(&self, event: &TransportEvent) {
            let tag = match event {
                TransportEvent::VersionExchanged { .. } => "version",
                TransportEvent::KexStarted { .. } => "kex-started",
                TransportEvent::KexCompleted { .. } => "kex-completed",
                _ => "other",
            };
            self.0.lock().unwrap().push(tag.to_string());
        }
    }

    let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
    let recorder = Arc::new(Recorder::default());
    let mut client_config = TransportConfig::default();
    client_config.observer = recorder.clone();
    let host_key = HostKeyPair::generate_ed25519().unwrap();

    let server_task = tokio::spawn(async move {
        Transport::server(server_stream, TransportConfig::default(), host_key).await
    });
    let _client = Transport::client(client_stream, client_config)
        .await
        .unwrap();
    server_task.await.unwrap().unwrap();

    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(events, vec!["version", "kex-started", "kex-completed"]);
}
