//! Alignment decoding behind a byte-in/record-out seam.
//!
//! The fetch pipeline writes raw container bytes into one half of a duplex
//! pipe; a decoder wraps the other half and yields [`AlignmentRecord`]s plus
//! header metadata. The protocol depends only on the [`AlignmentDecoder`]
//! contract, so the concrete decoder is swappable.

mod bam;

pub use bam::{BamDecoder, BamDecoderFactory, decode_header};

use crate::Result;
use crate::record::AlignmentRecord;
use async_trait::async_trait;
use noodles::sam;
use tokio::io::DuplexStream;

/// Pull side of the decode pipe.
#[async_trait]
pub trait AlignmentDecoder: Send {
    /// Next decoded record, or `None` at end of stream.
    async fn next_record(&mut self) -> Result<Option<AlignmentRecord>>;

    /// Header metadata, available once the stream's header has been read.
    fn header(&self) -> Option<&sam::Header>;
}

/// Opens a decoder over the read half of the decode pipe.
///
/// Selected explicitly via the protocol builder rather than probed at
/// runtime.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, input: DuplexStream) -> Box<dyn AlignmentDecoder>;
}
