// MIT License - Copyright (c) 2026 Peter Wright
// TCP link to the RS485-to-Ethernet interface

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::PanelConfig;
use crate::error::{MimicError, Result};

/// Reconnect schedule used after the stream stalls or drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &PanelConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_delay: Duration::from_millis(config.max_reconnect_delay_ms),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubles per attempt,
    /// at most 16x the base, never above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(4);
        self.base_delay
            .saturating_mul(1 << shift)
            .min(self.max_delay)
    }
}

/// How a recovery cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Reconnected { attempt: u32 },
    Exhausted { attempts: u32 },
    Shutdown,
}

/// Open and immediately close a connection to `addr`.
///
/// Usable before any I/O loop is running; nothing is read from the socket.
pub async fn probe(addr: &str, wait: Duration) -> Result<()> {
    debug!("Probing {}", addr);
    let stream = open(addr, wait).await?;
    drop(stream);
    debug!("Probe of {} succeeded", addr);
    Ok(())
}

async fn open(addr: &str, wait: Duration) -> Result<TcpStream> {
    match timeout(wait, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(MimicError::ConnectionFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(MimicError::ConnectionFailed {
            addr: addr.to_string(),
            reason: format!("timed out after {}ms", wait.as_millis()),
        }),
    }
}

/// Resolves once `true` has been sent on the shutdown channel or its sender is gone.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Owns the socket. Reads are bounded by the configured buffer size and timeout.
pub struct ConnectionManager {
    addr: String,
    stream: Option<TcpStream>,
    read_timeout: Duration,
    connect_timeout: Duration,
    buf: Vec<u8>,
    retry: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(config: &PanelConfig) -> Self {
        Self {
            addr: config.address(),
            stream: None,
            read_timeout: config.read_timeout(),
            connect_timeout: config.probe_timeout(),
            buf: vec![0u8; config.read_buffer_size],
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.close();
        info!("Connecting to panel interface at {}", self.addr);
        let stream = open(&self.addr, self.connect_timeout).await?;
        self.stream = Some(stream);
        info!("Connected to {}", self.addr);
        Ok(())
    }

    /// Read whatever is available, up to the buffer size.
    ///
    /// A read with no live socket fails with `Disconnected` instead of panicking,
    /// so callers can keep looping against a connection that failed to come back.
    pub async fn read(&mut self) -> Result<&[u8]> {
        let stream = self.stream.as_mut().ok_or(MimicError::Disconnected)?;
        let n = match timeout(self.read_timeout, stream.read(&mut self.buf)).await {
            Err(_) => return Err(MimicError::ReadTimeout),
            Ok(Err(e)) => return Err(MimicError::Io(e)),
            Ok(Ok(0)) => return Err(MimicError::Disconnected),
            Ok(Ok(n)) => n,
        };
        Ok(&self.buf[..n])
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed connection to {}", self.addr);
        }
    }

    /// Close the socket and try to reconnect according to the retry policy.
    ///
    /// `on_attempt` is told the attempt number before each wait. Returns
    /// `Recovery::Shutdown` as soon as shutdown is signalled, including while
    /// sleeping or mid-connect.
    pub async fn recover(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        mut on_attempt: impl FnMut(u32),
    ) -> Recovery {
        self.close();
        let policy = self.retry;

        for attempt in 1..=policy.max_attempts {
            on_attempt(attempt);
            let delay = policy.delay_for(attempt);
            info!(
                "Reconnecting to {} in {:.1}s (attempt {}/{})",
                self.addr,
                delay.as_secs_f64(),
                attempt,
                policy.max_attempts
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_signalled(shutdown) => return Recovery::Shutdown,
            }

            let result = tokio::select! {
                r = self.connect() => r,
                _ = shutdown_signalled(shutdown) => return Recovery::Shutdown,
            };

            match result {
                Ok(()) => return Recovery::Reconnected { attempt },
                Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }

        Recovery::Exhausted {
            attempts: policy.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn config_for(port: u16) -> PanelConfig {
        PanelConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .read_timeout_ms(100)
            .probe_timeout_ms(500)
            .reconnect_delay_ms(10)
            .max_reconnect_delay_ms(40)
            .max_reconnect_attempts(2)
            .build()
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[test]
    fn test_retry_delays() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            max_attempts: 8,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for(100), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_delay_caps_exponent() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(3600),
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(5), Duration::from_millis(1600));
        assert_eq!(policy.delay_for(9), Duration::from_millis(1600));
    }

    #[tokio::test]
    async fn test_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(probe(&addr, Duration::from_millis(500)).await.is_ok());

        let addr = format!("127.0.0.1:{}", closed_port().await);
        assert!(matches!(
            probe(&addr, Duration::from_millis(500)).await,
            Err(MimicError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_without_connection() {
        let mut conn = ConnectionManager::new(&config_for(1));
        assert!(!conn.is_connected());
        assert!(matches!(conn.read().await, Err(MimicError::Disconnected)));
    }

    #[tokio::test]
    async fn test_read_data_timeout_and_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&[0x80, 0x22]).await.unwrap();
            let _ = release_rx.await;
        });

        let mut conn = ConnectionManager::new(&config_for(port));
        conn.connect().await.unwrap();
        assert_eq!(conn.read().await.unwrap(), &[0x80, 0x22]);
        assert!(matches!(conn.read().await, Err(MimicError::ReadTimeout)));

        release_tx.send(()).unwrap();
        server.await.unwrap();
        assert!(matches!(conn.read().await, Err(MimicError::Disconnected)));
    }

    #[tokio::test]
    async fn test_recover_exhausts_attempts() {
        let mut conn = ConnectionManager::new(&config_for(closed_port().await));
        let (_tx, mut rx) = watch::channel(false);
        let mut attempts = Vec::new();
        let outcome = conn.recover(&mut rx, |n| attempts.push(n)).await;
        assert_eq!(outcome, Recovery::Exhausted { attempts: 2 });
        assert_eq!(attempts, vec![1, 2]);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_recover_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut conn = ConnectionManager::new(&config_for(port));
        let (_tx, mut rx) = watch::channel(false);
        let outcome = conn.recover(&mut rx, |_| {}).await;
        assert_eq!(outcome, Recovery::Reconnected { attempt: 1 });
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_recover_stops_on_shutdown() {
        let config = PanelConfig::builder()
            .host("127.0.0.1")
            .port(closed_port().await)
            .reconnect_delay_ms(60_000)
            .build();
        let mut conn = ConnectionManager::new(&config);
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let outcome = timeout(Duration::from_secs(2), conn.recover(&mut rx, |_| {}))
            .await
            .unwrap();
        assert_eq!(outcome, Recovery::Shutdown);
    }
}
