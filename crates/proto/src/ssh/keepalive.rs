//! Connection keepalive.
//!
//! Idle connections are routinely dropped by NAT gateways and stateful
//! firewalls. [`Keepalive`] runs a background task that invokes a send
//! callback once per idle interval, typically one that sends an IGNORE
//! message (see [`keepalive_payload`]), so the connection never looks
//! idle on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use skiff_platform::SkiffResult;

use super::transport::ignore_payload;

/// Periodic keepalive driver.
///
/// Owns a background task; dropping the handle stops the task.
pub struct Keepalive {
    interval: Duration,
    stopped: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Keepalive {
    /// Creates a stopped keepalive with the given idle interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stopped: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Spawns the background task. `send` runs once per interval; the
    /// task stops itself when a send fails, since the connection is
    /// gone anyway.
    pub fn start<F, Fut>(&mut self, send: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = SkiffResult<()>> + Send + 'static,
    {
        let interval = self.interval;
        let stopped = Arc::clone(&self.stopped);
        self.task = Some(tokio::spawn(async move {
            debug!(?interval, "keepalive task started");
            loop {
                tokio::time::sleep(interval).await;
                if stopped.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(err) = send().await {
                    warn!(error = %err, "keepalive send failed, stopping");
                    break;
                }
                debug!("keepalive sent");
            }
        }));
    }

    /// Stops the background task. Idempotent.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// True while the background task is alive.
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builds an IGNORE payload carrying `data_len` random bytes, so the
/// keepalive traffic does not look constant on the wire.
pub fn keepalive_payload(data_len: usize) -> Vec<u8> {
    let mut data = vec![0u8; data_len];
    rand::rngs::OsRng.fill_bytes(&mut data);
    ignore_payload(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::message::MessageType;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_keepalive_payload_shape() {
        let payload = keepalive_payload(16);
        assert_eq!(payload[0], MessageType::Ignore as u8);
        assert_eq!(&payload[1..5], &16u32.to_be_bytes());
        assert_eq!(payload.len(), 1 + 4 + 16);
    }

    #[test]
    fn test_new_is_not_running() {
        let keepalive = Keepalive::new(Duration::from_secs(30));
        assert!(!keepalive.is_running());
    }

    #[tokio::test]
    async fn test_periodic_send_and_stop() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let mut keepalive = Keepalive::new(Duration::from_millis(20));
        keepalive.start(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        });
        assert!(keepalive.is_running());

        tokio::time::sleep(Duration::from_millis(110)).await;
        keepalive.stop();

        let sent = count.load(Ordering::Relaxed);
        assert!(sent >= 3, "expected several keepalives, got {}", sent);
        assert!(!keepalive.is_running());
    }

    #[tokio::test]
    async fn test_stops_after_send_failure() {
        use skiff_platform::SkiffError;

        let mut keepalive = Keepalive::new(Duration::from_millis(10));
        keepalive.start(|| async { Err(SkiffError::Protocol("stream gone".to_string())) });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!keepalive.is_running());
    }
}
