// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writes metrics out in the Graphite plaintext format,
//! `<name> <value> <unix-seconds>\n`, to a file or a Carbon TCP listener.

use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::constants::{DROP_NOTICE_EVERY, GRAPHITE_DEFAULT_PORT};
use crate::delivery::MetricReceiver;
use crate::errors::SinkError;
use crate::host::HostIdentity;
use crate::metric::Metric;
use crate::template::NameTemplate;

/// Where metrics are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Appended to a local file.
    File(PathBuf),
    /// Streamed to a Graphite `host:port`.
    Graphite(String),
}

impl Destination {
    /// Paths starting with `./` or `/` are files; anything else is a
    /// Graphite address, with the plaintext port added when none is given.
    #[must_use]
    pub fn parse(dest: &str) -> Self {
        if dest.starts_with("./") || dest.starts_with('/') {
            return Destination::File(PathBuf::from(dest));
        }
        if dest.contains(':') {
            Destination::Graphite(dest.to_string())
        } else {
            Destination::Graphite(format!("{dest}:{GRAPHITE_DEFAULT_PORT}"))
        }
    }

    /// Opens the destination for writing.
    pub async fn open(&self) -> Result<Box<dyn AsyncWrite + Unpin + Send>, SinkError> {
        match self {
            Destination::File(path) => {
                let mut options = OpenOptions::new();
                options.append(true).create(true);
                #[cfg(unix)]
                options.mode(0o666);
                let file = options.open(path).await.map_err(|source| SinkError::Open {
                    path: path.display().to_string(),
                    source,
                })?;
                debug!("Appending metrics to file {}", path.display());
                Ok(Box::new(file))
            }
            Destination::Graphite(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|source| SinkError::Connect {
                        addr: addr.clone(),
                        source,
                    })?;
                debug!("Sending metrics to graphite server {addr}");
                Ok(Box::new(stream))
            }
        }
    }
}

/// Drains the delivery channel into a writer.
pub struct Sink<W> {
    writer: BufWriter<W>,
    template: NameTemplate,
    host: HostIdentity,
    failures: u64,
}

impl<W: AsyncWrite + Unpin> Sink<W> {
    pub fn new(writer: W, template: NameTemplate, host: HostIdentity) -> Self {
        Self {
            writer: BufWriter::new(writer),
            template,
            host,
            failures: 0,
        }
    }

    /// Formats one metric as a Graphite plaintext line.
    #[must_use]
    pub fn format_line(&self, metric: &Metric) -> String {
        format!(
            "{} {} {}\n",
            self.template.render(metric.name, &self.host),
            metric.value,
            metric.unix_seconds()
        )
    }

    /// Writes every metric until the channel closes, flushing whenever the
    /// queue runs dry. Returns the underlying writer.
    pub async fn run(mut self, mut receiver: MetricReceiver) -> W {
        while let Some(metric) = receiver.recv().await {
            let line = self.format_line(&metric);
            if let Err(e) = self.writer.write_all(line.as_bytes()).await {
                self.write_failed(&e);
                continue;
            }
            if receiver.is_empty() {
                if let Err(e) = self.writer.flush().await {
                    self.write_failed(&e);
                }
            }
        }

        if let Err(e) = self.writer.flush().await {
            self.write_failed(&e);
        }
        if let Err(e) = self.writer.get_mut().shutdown().await {
            debug!("Failed to shut down metric writer: {e}");
        }
        debug!("Metric stream closed");
        self.writer.into_inner()
    }

    fn write_failed(&mut self, e: &std::io::Error) {
        self.failures += 1;
        if self.failures == 1 || self.failures % DROP_NOTICE_EVERY == 0 {
            warn!("Failed to write metrics ({} failures so far): {e}", self.failures);
        } else {
            debug!("Failed to write metrics: {e}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_NAME_TEMPLATE;
    use crate::delivery;
    use crate::metric::MetricName;
    use std::time::{Duration, UNIX_EPOCH};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn host() -> HostIdentity {
        HostIdentity {
            hostname: "ns1".to_string(),
            service: "dnscache".to_string(),
        }
    }

    fn metric(name: MetricName, value: i64) -> Metric {
        Metric::new(name, UNIX_EPOCH + Duration::from_secs(1_454_284_800), value)
    }

    #[test]
    fn test_destination_parse() {
        assert_eq!(
            Destination::parse("./metrics.txt"),
            Destination::File(PathBuf::from("./metrics.txt"))
        );
        assert_eq!(
            Destination::parse("/var/log/metrics"),
            Destination::File(PathBuf::from("/var/log/metrics"))
        );
        assert_eq!(
            Destination::parse("graphite.internal"),
            Destination::Graphite("graphite.internal:2003".to_string())
        );
        assert_eq!(
            Destination::parse("10.0.0.5:2103"),
            Destination::Graphite("10.0.0.5:2103".to_string())
        );
    }

    #[tokio::test]
    async fn test_sink_writes_plaintext_lines() {
        let template = NameTemplate::parse(DEFAULT_NAME_TEMPLATE).unwrap();
        let (tx, rx) = delivery::channel(10);
        tx.send(metric(MetricName::Queries, 42));
        tx.send(metric(MetricName::CacheMotion, -3));
        drop(tx);

        let out = Sink::new(Vec::new(), template, host()).run(rx).await;
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "servers.ns1.dnscache.queries 42 1454284800\n\
             servers.ns1.dnscache.cache_motion -3 1454284800\n"
        );
    }

    #[tokio::test]
    async fn test_file_destination_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.txt");
        std::fs::write(&path, "existing 1 1\n").unwrap();

        let destination = Destination::File(path.clone());
        let template = NameTemplate::parse("{{.Metric}}").unwrap();
        let (tx, rx) = delivery::channel(10);
        tx.send(metric(MetricName::Tx, 7));
        drop(tx);

        let writer = destination.open().await.unwrap();
        Sink::new(writer, template, host()).run(rx).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "existing 1 1\ntx 7 1454284800\n");
    }

    #[tokio::test]
    async fn test_graphite_destination_streams() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });

        let writer = Destination::parse(&addr).open().await.unwrap();
        let template = NameTemplate::parse("{{.Hostname}}.{{.Metric}}").unwrap();
        let (tx, rx) = delivery::channel(10);
        tx.send(metric(MetricName::Servfail, 2));
        drop(tx);
        Sink::new(writer, template, host()).run(rx).await;

        assert_eq!(server.await.unwrap(), "ns1.servfail 2 1454284800\n");
    }

    #[tokio::test]
    async fn test_unreachable_graphite_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = Destination::Graphite(addr).open().await;
        assert!(matches!(result, Err(SinkError::Connect { .. })));
    }
}
