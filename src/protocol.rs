//! htsget protocol orchestration.
//!
//! [`HtsgetProtocol`] ties the pieces together: it iterates genomic windows
//! (or issues one unbounded request), negotiates a ticket per window, feeds
//! the ticket's URLs through a [`FetchPipeline`] into a decoder over a
//! duplex pipe, and drains the decoded records through the
//! [`PairAssembler`], yielding one emission at a time.

use crate::batch::{CoordinateBatcher, Window};
use crate::decoder::{self, AlignmentDecoder, BamDecoderFactory, DecoderFactory};
use crate::fetch::{self, FetchPipeline};
use crate::pair::PairAssembler;
use crate::record::{Pairing, StreamItem};
use crate::reference::GenomeReference;
use crate::ticket::{DataClass, Format, Ticket, TicketClient, TicketRequest};
use crate::{Error, Result};
use noodles::sam;
use std::time::Duration;
use url::Url;

/// Capacity of the duplex pipe between the fetch worker and the decoder.
const DECODE_PIPE_CAPACITY: usize = 64 * 1024;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Started,
    Finished,
}

enum WindowPlan {
    Unbounded { requested: bool },
    Windowed(Box<dyn Iterator<Item = Window> + Send>),
}

struct ActiveWindow {
    pipeline: FetchPipeline,
    decoder: Box<dyn AlignmentDecoder>,
}

/// Streams reads from a server that speaks the htsget protocol.
pub struct HtsgetProtocol {
    url: Url,
    http: reqwest::Client,
    tickets: TicketClient,
    decoder_factory: Box<dyn DecoderFactory>,
    reference: Option<GenomeReference>,
    tags: Option<Vec<String>>,
    notags: Option<Vec<String>>,
    timeout: Duration,
    data_format: Format,
    md5: Option<String>,
    assembler: PairAssembler,
    header: Option<sam::Header>,
    read_count: u64,
    state: State,
    plan: WindowPlan,
    current: Option<ActiveWindow>,
}

impl HtsgetProtocol {
    pub fn builder(url: impl Into<String>) -> HtsgetProtocolBuilder {
        HtsgetProtocolBuilder::new(url)
    }

    /// The dataset identifier: the last path segment of the URL.
    pub fn accession(&self) -> &str {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| self.url.as_str())
    }

    pub fn pairing(&self) -> Pairing {
        self.assembler.pairing()
    }

    pub fn reference(&self) -> Option<&GenomeReference> {
        self.reference.as_ref()
    }

    /// Records decoded so far, across all windows.
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// Mark the protocol started. Fails if called twice or after `finish`.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            State::Created => {
                self.state = State::Started;
                Ok(())
            }
            State::Started => Err(Error::ProtocolState("already started".to_string())),
            State::Finished => Err(Error::ProtocolState("already finished".to_string())),
        }
    }

    /// Next emission of the record stream, or `None` when every window has
    /// been drained.
    pub async fn next_item(&mut self) -> Result<Option<StreamItem>> {
        self.ensure_started()?;

        loop {
            if self.current.is_none() {
                let window = match &mut self.plan {
                    WindowPlan::Unbounded { requested } => {
                        if *requested {
                            return Ok(None);
                        }
                        *requested = true;
                        None
                    }
                    WindowPlan::Windowed(windows) => match windows.next() {
                        Some(window) => Some(window),
                        None => return Ok(None),
                    },
                };
                self.open_window(window).await?;
            }

            let Some(active) = self.current.as_mut() else {
                continue;
            };

            match active.decoder.next_record().await {
                Ok(Some(record)) => {
                    self.read_count += 1;
                    if let Some(item) = self.assembler.assemble(record)? {
                        return Ok(Some(item));
                    }
                }
                Ok(None) => {
                    // Window drained; keep the first decoded header around
                    // and surface any error the fetch worker ended with.
                    if self.header.is_none() {
                        self.header = active.decoder.header().cloned();
                    }
                    if let Some(mut active) = self.current.take() {
                        active.pipeline.finish(false).await?;
                    }
                }
                Err(decode_err) => {
                    // A fetch failure usually shows up here as a truncated
                    // stream; prefer the worker's own error when it has one.
                    if let Some(mut active) = self.current.take() {
                        match active.pipeline.finish(true).await {
                            Err(Error::Termination) | Ok(_) => {}
                            Err(worker_err) => return Err(worker_err),
                        }
                    }
                    return Err(decode_err);
                }
            }
        }
    }

    /// Header metadata for the dataset.
    ///
    /// If no window has been decoded yet this issues a header-only ticket
    /// request (`class=header`) and synthesizes a minimal container from the
    /// header-class URLs.
    pub async fn headers(&mut self) -> Result<&sam::Header> {
        self.ensure_started()?;

        if self.header.is_none() {
            let ticket = self
                .tickets
                .request(&self.url, &TicketRequest::header_only(Some(self.data_format)))
                .await?;

            let header_urls: Vec<_> = ticket
                .urls
                .iter()
                .filter(|url_object| url_object.class == Some(DataClass::Header))
                .cloned()
                .collect();
            if header_urls.is_empty() {
                return Err(Error::TicketProtocol(
                    "server does not provide header-only URLs".to_string(),
                ));
            }

            let bytes = fetch::download_header_bytes(&self.http, &header_urls, self.timeout).await?;
            self.header = Some(decoder::decode_header(&bytes)?);
        }

        match self.header.as_ref() {
            Some(header) => Ok(header),
            None => Err(Error::Internal("header not initialized".to_string())),
        }
    }

    /// Tear down the protocol: force-terminate any live pipeline and clear
    /// the pending-pair cache. Safe to call more than once.
    pub async fn finish(&mut self) -> Result<()> {
        if self.state == State::Finished {
            return Ok(());
        }
        self.state = State::Finished;
        self.assembler.clear();

        if let Some(mut active) = self.current.take() {
            match active.pipeline.finish(true).await {
                Ok(_) => {}
                Err(Error::Termination) => return Err(Error::Termination),
                Err(err) => {
                    // The stream is being abandoned; a fetch error here is
                    // not actionable.
                    tracing::debug!(error = %err, "fetch worker error during teardown");
                }
            }
        }

        Ok(())
    }

    fn ensure_started(&self) -> Result<()> {
        match self.state {
            State::Started => Ok(()),
            State::Created => Err(Error::ProtocolState("not started".to_string())),
            State::Finished => Err(Error::ProtocolState("already finished".to_string())),
        }
    }

    async fn open_window(&mut self, window: Option<Window>) -> Result<()> {
        if let Some(window) = &window {
            tracing::debug!(
                number = window.number,
                chromosome = %window.chromosome,
                start = window.start,
                stop = window.stop,
                "opening window"
            );
        }

        let params = TicketRequest {
            format: Some(self.data_format),
            class: None,
            reference_name: window.as_ref().map(|w| w.chromosome.clone()),
            reference_md5: self.md5.clone(),
            start: window.as_ref().map(|w| w.start),
            end: window.as_ref().map(|w| w.stop),
            tags: self.tags.clone(),
            notags: self.notags.clone(),
        };

        let ticket = self.tickets.request(&self.url, &params).await?;
        self.apply_ticket(&ticket);

        let (sink, source) = tokio::io::duplex(DECODE_PIPE_CAPACITY);
        let pipeline = FetchPipeline::spawn(self.http.clone(), sink, self.timeout);
        pipeline.download_urls(ticket.urls)?;
        let decoder = self.decoder_factory.open(source);

        self.current = Some(ActiveWindow { pipeline, decoder });
        Ok(())
    }

    /// The server is authoritative for format and md5 on subsequent
    /// requests.
    fn apply_ticket(&mut self, ticket: &Ticket) {
        if let Some(format) = ticket.format {
            self.data_format = format;
        }
        self.md5 = ticket.md5.clone();
    }
}

/// Configuration for an [`HtsgetProtocol`].
pub struct HtsgetProtocolBuilder {
    url: String,
    reference: Option<GenomeReference>,
    windows: Option<Box<dyn Iterator<Item = Window> + Send>>,
    pairing: Pairing,
    tags: Option<Vec<String>>,
    notags: Option<Vec<String>>,
    timeout: Duration,
    data_format: Format,
    decoder_factory: Box<dyn DecoderFactory>,
}

impl HtsgetProtocolBuilder {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reference: None,
            windows: None,
            pairing: Pairing::Unknown,
            tags: None,
            notags: None,
            timeout: DEFAULT_TIMEOUT,
            data_format: Format::Bam,
            decoder_factory: Box::new(BamDecoderFactory),
        }
    }

    /// Reference genome; without an explicit window iterator this enables
    /// whole-genome windowing with default window size.
    pub fn reference(mut self, reference: GenomeReference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Explicit window sequence, typically from
    /// [`CoordinateBatcher::windows`].
    pub fn windows<I>(mut self, windows: I) -> Self
    where
        I: Iterator<Item = Window> + Send + 'static,
    {
        self.windows = Some(Box::new(windows));
        self
    }

    /// Force the pairing mode instead of auto-detecting it from the first
    /// paired record.
    pub fn pairing(mut self, pairing: Pairing) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn notags(mut self, notags: Vec<String>) -> Self {
        self.notags = Some(notags);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn data_format(mut self, format: Format) -> Self {
        self.data_format = format;
        self
    }

    pub fn decoder_factory(mut self, factory: Box<dyn DecoderFactory>) -> Self {
        self.decoder_factory = factory;
        self
    }

    pub fn build(self) -> Result<HtsgetProtocol> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::InvalidInput(format!("invalid htsget URL {:?}: {e}", self.url)))?;

        let http = reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .build()?;
        let tickets = TicketClient::new(http.clone(), self.timeout);

        let md5 = self
            .reference
            .as_ref()
            .and_then(|reference| reference.md5().map(String::from));

        let plan = match (self.windows, &self.reference) {
            (Some(windows), _) => WindowPlan::Windowed(windows),
            (None, Some(reference)) => WindowPlan::Windowed(Box::new(
                CoordinateBatcher::new(reference.clone()).windows()?,
            )),
            (None, None) => WindowPlan::Unbounded { requested: false },
        };

        Ok(HtsgetProtocol {
            url,
            http,
            tickets,
            decoder_factory: self.decoder_factory,
            reference: self.reference,
            tags: self.tags,
            notags: self.notags,
            timeout: self.timeout,
            data_format: self.data_format,
            md5,
            assembler: PairAssembler::new(self.pairing),
            header: None,
            read_count: 0,
            state: State::Created,
            plan,
            current: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol(url: &str) -> HtsgetProtocol {
        HtsgetProtocol::builder(url).build().unwrap()
    }

    #[test]
    fn test_accession_from_url() {
        let protocol = protocol("https://example.com/reads/NA12878?format=BAM");
        assert_eq!(protocol.accession(), "NA12878");
    }

    #[test]
    fn test_invalid_url() {
        assert!(HtsgetProtocol::builder("not a url").build().is_err());
    }

    #[test]
    fn test_start_twice() {
        let mut protocol = protocol("https://example.com/reads/NA12878");
        protocol.start().unwrap();
        assert!(matches!(protocol.start(), Err(Error::ProtocolState(_))));
    }

    #[tokio::test]
    async fn test_iteration_requires_start() {
        let mut protocol = protocol("https://example.com/reads/NA12878");
        assert!(matches!(
            protocol.next_item().await,
            Err(Error::ProtocolState(_))
        ));
    }

    #[tokio::test]
    async fn test_iteration_after_finish() {
        let mut protocol = protocol("https://example.com/reads/NA12878");
        protocol.start().unwrap();
        protocol.finish().await.unwrap();
        assert!(matches!(
            protocol.next_item().await,
            Err(Error::ProtocolState(_))
        ));
        // finish is idempotent-safe
        protocol.finish().await.unwrap();
    }
}
