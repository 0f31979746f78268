//! Transfer telemetry.
//!
//! Completed GET and PUT transfers are reported to a [`MetricsSender`] with
//! their byte count and completion time. Reporting is best-effort: the
//! driver logs a failed report and carries on.
//!
//! [`PrometheusSender`] records through the `metrics` facade; the exporter is
//! installed once per process by [`install_prometheus`]. [`NopSender`] is
//! used when telemetry is disabled.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

// -- Metric name constants ----------------------------------------------------

/// Bytes served by GET (counter). Labels: hostname.
pub const GET_BYTES_TOTAL: &str = "f3_get_bytes_total";

/// Bytes stored by PUT (counter). Labels: hostname.
pub const PUT_BYTES_TOTAL: &str = "f3_put_bytes_total";

/// Completed transfers (counter). Labels: hostname, operation.
pub const TRANSFERS_TOTAL: &str = "f3_transfers_total";

/// Transfer size in bytes (histogram). Labels: hostname, operation.
pub const TRANSFER_SIZE_BYTES: &str = "f3_transfer_size_bytes";

/// Unix time of the last completed transfer (gauge). Labels: hostname, operation.
pub const LAST_TRANSFER_TIMESTAMP_SECONDS: &str = "f3_last_transfer_timestamp_seconds";

// -- Sender trait -------------------------------------------------------------

/// Destination for transfer metrics.
pub trait MetricsSender: Send + Sync + 'static {
    /// Report a served (GET) object of `size` bytes completed at `timestamp`.
    fn send_get(&self, size: u64, timestamp: DateTime<Utc>) -> anyhow::Result<()>;

    /// Report a stored (PUT) object of `size` bytes completed at `timestamp`.
    fn send_put(&self, size: u64, timestamp: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSender;

impl MetricsSender for NopSender {
    fn send_get(&self, _size: u64, _timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(())
    }

    fn send_put(&self, _size: u64, _timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Records transfers through the `metrics` facade, labelled with the hostname.
#[derive(Debug, Clone)]
pub struct PrometheusSender {
    hostname: String,
}

impl PrometheusSender {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    fn record(
        &self,
        operation: &'static str,
        bytes_counter: &'static str,
        size: u64,
        timestamp: DateTime<Utc>,
    ) {
        let hostname = self.hostname.clone();
        counter!(bytes_counter, "hostname" => hostname.clone()).increment(size);
        counter!(TRANSFERS_TOTAL, "hostname" => hostname.clone(), "operation" => operation)
            .increment(1);
        histogram!(TRANSFER_SIZE_BYTES, "hostname" => hostname.clone(), "operation" => operation)
            .record(size as f64);
        gauge!(LAST_TRANSFER_TIMESTAMP_SECONDS, "hostname" => hostname, "operation" => operation)
            .set(timestamp.timestamp() as f64);
    }
}

impl MetricsSender for PrometheusSender {
    fn send_get(&self, size: u64, timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        self.record("GET", GET_BYTES_TOTAL, size, timestamp);
        Ok(())
    }

    fn send_put(&self, size: u64, timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        self.record("PUT", PUT_BYTES_TOTAL, size, timestamp);
        Ok(())
    }
}

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global Prometheus recorder with an HTTP scrape listener on
/// `listen`. Idempotent: only the first call installs anything.
///
/// Must be called from within a tokio runtime.
pub fn install_prometheus(listen: SocketAddr) -> anyhow::Result<()> {
    if PROMETHEUS_INSTALLED.get().is_some() {
        return Ok(());
    }
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter on {listen}: {e}"))?;
    let _ = PROMETHEUS_INSTALLED.set(());
    describe_metrics();
    tracing::info!(%listen, "Prometheus metrics exporter listening");
    Ok(())
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(GET_BYTES_TOTAL, "Total bytes served by GET");
    describe_counter!(PUT_BYTES_TOTAL, "Total bytes stored by PUT");
    describe_counter!(TRANSFERS_TOTAL, "Completed transfers by operation");
    describe_histogram!(TRANSFER_SIZE_BYTES, "Transfer size in bytes");
    describe_gauge!(
        LAST_TRANSFER_TIMESTAMP_SECONDS,
        "Unix time of the last completed transfer"
    );
}

/// Name of this host, used as the metric label.
///
/// `$HOSTNAME` first, then `/etc/hostname`, then `"unknown"`.
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

// -- Byte counting stream -----------------------------------------------------

/// Callback fired once with the total byte count when the stream hits EOF.
pub type EofCallback = Box<dyn FnOnce(u64) + Send>;

/// An [`AsyncRead`] adapter that counts the bytes passing through it and
/// fires a callback at end-of-file.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
    on_eof: Option<EofCallback>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, on_eof: EofCallback) -> Self {
        Self {
            inner,
            count: 0,
            on_eof: Some(on_eof),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                this.count += n as u64;
                if n == 0 && had_room {
                    if let Some(on_eof) = this.on_eof.take() {
                        on_eof(this.count);
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Build the sender for the given settings.
pub fn build_sender(enabled: bool, hostname: String) -> Arc<dyn MetricsSender> {
    if enabled {
        Arc::new(PrometheusSender::new(hostname))
    } else {
        Arc::new(NopSender)
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_nop_sender_always_succeeds() {
        let sender = NopSender;
        assert!(sender.send_get(10, Utc::now()).is_ok());
        assert!(sender.send_put(0, Utc::now()).is_ok());
    }

    #[test]
    fn test_prometheus_sender_without_recorder() {
        let sender = PrometheusSender::new("test-host");
        assert_eq!(sender.hostname(), "test-host");
        assert!(sender.send_get(1024, Utc::now()).is_ok());
        assert!(sender.send_put(2048, Utc::now()).is_ok());
    }

    #[test]
    fn test_hostname_is_never_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_build_sender() {
        // Both variants accept reports.
        for enabled in [true, false] {
            let sender = build_sender(enabled, "h".to_string());
            assert!(sender.send_get(1, Utc::now()).is_ok());
        }
    }

    #[tokio::test]
    async fn test_counting_reader_reports_once_at_eof() {
        let total = Arc::new(AtomicU64::new(u64::MAX));
        let calls = Arc::new(AtomicU64::new(0));
        let (t, c) = (Arc::clone(&total), Arc::clone(&calls));
        let mut reader = CountingReader::new(
            std::io::Cursor::new(vec![7u8; 10_000]),
            Box::new(move |n| {
                t.store(n, Ordering::SeqCst);
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len(), 10_000);
        assert_eq!(total.load(Ordering::SeqCst), 10_000);

        // Further reads at EOF do not report again.
        let mut extra = [0u8; 8];
        assert_eq!(reader.read(&mut extra).await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_counting_reader_partial_read_does_not_report() {
        let calls = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&calls);
        let mut reader = CountingReader::new(
            std::io::Cursor::new(b"abcdef".to_vec()),
            Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
