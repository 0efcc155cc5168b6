//! Background fetching of ticket sub-URLs into a decode sink.
//!
//! A [`FetchPipeline`] owns one worker task that drains a queue of
//! [`UrlObject`]s, streaming each into an `AsyncWrite` sink - usually one
//! half of a duplex pipe feeding the alignment decoder, or a file for raw
//! dumps. The queue carries a finish sentinel for graceful drain; a separate
//! watch channel carries the terminate signal so a hard stop is observed
//! even while a transfer is in flight.

use crate::ticket::{DataClass, UrlObject};
use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use url::Url;

/// These 28 bytes are an empty BGZF block. Appending them to the data
/// streamed from `header` class URLs yields a complete container that the
/// decoder can parse without any data blocks.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[derive(Debug)]
enum QueueItem {
    Url(UrlObject),
    Finish,
}

/// Background worker streaming ticket sub-URLs into a decode sink.
#[derive(Debug)]
pub struct FetchPipeline {
    queue: mpsc::UnboundedSender<QueueItem>,
    terminate: watch::Sender<bool>,
    handle: Option<JoinHandle<Result<u64>>>,
    timeout: Duration,
}

impl FetchPipeline {
    /// Spawn the worker writing to `sink`.
    pub fn spawn<W>(client: reqwest::Client, sink: W, timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (terminate_tx, terminate_rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(client, sink, queue_rx, terminate_rx, timeout));

        Self {
            queue: queue_tx,
            terminate: terminate_tx,
            handle: Some(handle),
            timeout,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Enqueue one batch of sub-URLs followed by the finish sentinel; the
    /// worker drains the batch, closes the sink, and stops.
    pub fn download_urls(&self, urls: Vec<UrlObject>) -> Result<()> {
        if !self.is_running() {
            return Err(Error::ProtocolState(
                "fetch pipeline is not running".to_string(),
            ));
        }

        for url_object in urls {
            self.queue
                .send(QueueItem::Url(url_object))
                .map_err(|_| Error::ProtocolState("fetch pipeline is not running".to_string()))?;
        }
        let _ = self.queue.send(QueueItem::Finish);

        Ok(())
    }

    /// Stop the worker.
    ///
    /// With `now == false` this enqueues the finish sentinel and blocks
    /// until the worker drains and exits, propagating the worker's result.
    /// With `now == true` the terminate signal is sent instead - discarding
    /// queued work and interrupting any in-flight transfer - and the worker
    /// is given `timeout` to exit before [`Error::Termination`] is returned.
    pub async fn finish(&mut self, now: bool) -> Result<u64> {
        let Some(mut handle) = self.handle.take() else {
            return Err(Error::ProtocolState(
                "fetch pipeline already finished".to_string(),
            ));
        };

        if now {
            let _ = self.terminate.send(true);
            match time::timeout(self.timeout, &mut handle).await {
                Ok(joined) => flatten_join(joined),
                Err(_) => {
                    handle.abort();
                    Err(Error::Termination)
                }
            }
        } else {
            let _ = self.queue.send(QueueItem::Finish);
            flatten_join(handle.await)
        }
    }

    /// Spawn, download one batch of URLs, and finish.
    pub async fn download_urls_once<W>(
        client: reqwest::Client,
        urls: Vec<UrlObject>,
        sink: W,
        timeout: Duration,
    ) -> Result<u64>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut pipeline = Self::spawn(client, sink, timeout);
        match pipeline.download_urls(urls) {
            Ok(()) => pipeline.finish(false).await,
            Err(err) => {
                let _ = pipeline.finish(true).await;
                Err(err)
            }
        }
    }
}

fn flatten_join(joined: std::result::Result<Result<u64>, tokio::task::JoinError>) -> Result<u64> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(Error::Internal(format!("fetch worker failed: {err}"))),
    }
}

async fn run_worker<W>(
    client: reqwest::Client,
    mut sink: W,
    mut queue: mpsc::UnboundedReceiver<QueueItem>,
    mut terminate: watch::Receiver<bool>,
    timeout: Duration,
) -> Result<u64>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut total = 0u64;

    loop {
        let item = tokio::select! {
            biased;
            _ = terminate.changed() => {
                // Hard stop: drop the sink without flushing.
                tracing::debug!(bytes = total, "fetch worker terminated");
                return Ok(total);
            }
            item = queue.recv() => item,
        };

        match item {
            Some(QueueItem::Url(url_object)) => {
                let written = tokio::select! {
                    biased;
                    _ = terminate.changed() => {
                        tracing::debug!(bytes = total, "fetch worker terminated mid-transfer");
                        return Ok(total);
                    }
                    result = fetch_url(&client, &url_object, timeout, &mut sink) => result?,
                };
                total += written;
            }
            Some(QueueItem::Finish) | None => {
                sink.shutdown().await?;
                tracing::debug!(bytes = total, "fetch worker drained");
                return Ok(total);
            }
        }
    }
}

/// Fetch one sub-URL into `sink`, dispatching on the URL scheme.
pub(crate) async fn fetch_url<W>(
    client: &reqwest::Client,
    url_object: &UrlObject,
    timeout: Duration,
    sink: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let url = Url::parse(&url_object.url).map_err(|e| {
        Error::InvalidInput(format!("invalid ticket URL {:?}: {e}", url_object.url))
    })?;

    match url.scheme() {
        "http" | "https" => fetch_http(client, url, &url_object.headers, timeout, sink).await,
        "data" => write_data_uri(&url, sink).await,
        scheme => Err(Error::UnsupportedScheme(scheme.to_string())),
    }
}

async fn fetch_http<W>(
    client: &reqwest::Client,
    url: Url,
    headers: &HashMap<String, String>,
    timeout: Duration,
    sink: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    tracing::debug!(%url, "fetching data block");

    let mut request = client.get(url.clone());
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = match time::timeout(timeout, request.send()).await {
        Ok(response) => response?.error_for_status()?,
        Err(_) => {
            return Err(Error::Timeout(format!(
                "no response from {url} within {timeout:?}"
            )));
        }
    };

    let declared = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let mut stream = response.bytes_stream();
    let mut length = 0u64;

    loop {
        // The timeout bounds the gap between chunks, not the whole body.
        let chunk: Bytes = match time::timeout(timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(err))) => {
                // A connection closed short of Content-Length surfaces as a
                // body error rather than EOF.
                if let Some(expected) = declared {
                    if (err.is_body() || err.is_decode()) && length < expected {
                        return Err(Error::ContentLengthMismatch {
                            expected,
                            actual: length,
                        });
                    }
                }
                return Err(err.into());
            }
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "no data from {url} within {timeout:?}"
                )));
            }
        };
        length += chunk.len() as u64;
        sink.write_all(&chunk).await?;
    }

    if let Some(expected) = declared {
        if expected != length {
            return Err(Error::ContentLengthMismatch {
                expected,
                actual: length,
            });
        }
    }

    Ok(length)
}

async fn write_data_uri<W>(url: &Url, sink: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let path = url.path();
    let (description, payload) = path
        .split_once(',')
        .ok_or_else(|| Error::InvalidInput(format!("malformed data URI: {path:?}")))?;

    let data = BASE64
        .decode(payload)
        .map_err(|e| Error::InvalidInput(format!("invalid base64 payload: {e}")))?;
    tracing::debug!(description, length = data.len(), "writing data URI block");

    sink.write_all(&data).await?;
    Ok(data.len() as u64)
}

/// Fetch only the header-class sub-URLs of a ticket, without a worker, and
/// append the empty-block trailer so the result parses as a complete
/// container.
pub async fn download_header_bytes(
    client: &reqwest::Client,
    urls: &[UrlObject],
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut sink = Cursor::new(Vec::new());

    for url_object in urls {
        if url_object.class == Some(DataClass::Body) {
            continue;
        }
        fetch_url(client, url_object, timeout, &mut sink).await?;
    }

    let mut bytes = sink.into_inner();
    bytes.extend_from_slice(&BGZF_EOF);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_uri(payload: &[u8]) -> UrlObject {
        UrlObject {
            url: format!("data:;base64,{}", BASE64.encode(payload)),
            headers: HashMap::new(),
            class: None,
        }
    }

    #[test]
    fn test_bgzf_eof_is_a_gzip_member() {
        assert_eq!(&BGZF_EOF[..2], &[0x1f, 0x8b]);
        assert_eq!(BGZF_EOF.len(), 28);
    }

    #[tokio::test]
    async fn test_data_uri_written_verbatim() {
        let mut sink = Cursor::new(Vec::new());
        let url_object = UrlObject {
            url: format!("data:;base64,{}", BASE64.encode(b"alignment bytes")),
            headers: HashMap::new(),
            class: None,
        };

        let client = reqwest::Client::new();
        let written = fetch_url(&client, &url_object, Duration::from_secs(1), &mut sink)
            .await
            .unwrap();

        assert_eq!(written, 15);
        assert_eq!(sink.into_inner(), b"alignment bytes");
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let mut sink = Cursor::new(Vec::new());
        let url_object = UrlObject {
            url: "ftp://example.com/reads.bam".to_string(),
            headers: HashMap::new(),
            class: None,
        };

        let client = reqwest::Client::new();
        let result = fetch_url(&client, &url_object, Duration::from_secs(1), &mut sink).await;
        assert!(matches!(result, Err(Error::UnsupportedScheme(scheme)) if scheme == "ftp"));
    }

    #[tokio::test]
    async fn test_malformed_data_uri() {
        let mut sink = Cursor::new(Vec::new());
        let url_object = UrlObject {
            url: "data:no-comma-here".to_string(),
            headers: HashMap::new(),
            class: None,
        };

        let client = reqwest::Client::new();
        let result = fetch_url(&client, &url_object, Duration::from_secs(1), &mut sink).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_download_urls_requires_running_worker() {
        let client = reqwest::Client::new();
        let mut pipeline =
            FetchPipeline::spawn(client, Cursor::new(Vec::new()), Duration::from_secs(1));
        pipeline.finish(false).await.unwrap();

        let result = pipeline.download_urls(vec![data_uri(b"late")]);
        assert!(matches!(result, Err(Error::ProtocolState(_))));
    }

    #[tokio::test]
    async fn test_finish_twice_is_a_state_error() {
        let client = reqwest::Client::new();
        let mut pipeline =
            FetchPipeline::spawn(client, Cursor::new(Vec::new()), Duration::from_secs(1));
        pipeline.finish(false).await.unwrap();
        assert!(matches!(
            pipeline.finish(false).await,
            Err(Error::ProtocolState(_))
        ));
    }

    #[tokio::test]
    async fn test_download_data_uris_once() {
        let client = reqwest::Client::new();
        let bytes = FetchPipeline::download_urls_once(
            client,
            vec![data_uri(b"first,"), data_uri(b"second")],
            Cursor::new(Vec::new()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(bytes, 12);
    }
}
