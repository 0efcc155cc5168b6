//! BAM decoding via noodles.

use super::{AlignmentDecoder, DecoderFactory};
use crate::record::AlignmentRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use noodles::sam::alignment::record::QualityScores as _;
use noodles::{bam, bgzf, sam};
use tokio::io::{AsyncRead, DuplexStream};

/// Streaming BAM decoder over any async byte source.
pub struct BamDecoder<R>
where
    R: AsyncRead + Unpin + Send,
{
    reader: bam::r#async::io::Reader<bgzf::r#async::Reader<R>>,
    header: Option<sam::Header>,
    record: bam::Record,
}

impl<R> BamDecoder<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(input: R) -> Self {
        Self {
            reader: bam::r#async::io::Reader::new(input),
            header: None,
            record: bam::Record::default(),
        }
    }
}

#[async_trait]
impl<R> AlignmentDecoder for BamDecoder<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        // The header blocks precede all records; read it on first use.
        if self.header.is_none() {
            let header = self
                .reader
                .read_header()
                .await
                .map_err(|e| Error::Decode(format!("failed to read BAM header: {e}")))?;
            self.header = Some(header);
        }

        match self.reader.read_record(&mut self.record).await {
            Ok(0) => Ok(None),
            Ok(_) => convert_record(&self.record).map(Some),
            Err(e) => Err(Error::Decode(format!("failed to read BAM record: {e}"))),
        }
    }

    fn header(&self) -> Option<&sam::Header> {
        self.header.as_ref()
    }
}

/// Opens a [`BamDecoder`] over the decode pipe.
#[derive(Debug, Default)]
pub struct BamDecoderFactory;

impl DecoderFactory for BamDecoderFactory {
    fn open(&self, input: DuplexStream) -> Box<dyn AlignmentDecoder> {
        Box::new(BamDecoder::new(input))
    }
}

/// Parse the header of an in-memory container, e.g. one synthesized from
/// header-class ticket URLs.
pub fn decode_header(bytes: &[u8]) -> Result<sam::Header> {
    let mut reader = bam::io::Reader::new(bytes);
    reader
        .read_header()
        .map_err(|e| Error::Decode(format!("failed to read BAM header: {e}")))
}

fn convert_record(record: &bam::Record) -> Result<AlignmentRecord> {
    let name = record.name().map(|name| name.to_string()).unwrap_or_default();
    let flags = record.flags();

    let sequence: Vec<u8> = record.sequence().iter().collect();
    let sequence = String::from_utf8(sequence)
        .map_err(|_| Error::Decode(format!("non-ASCII bases in read {name}")))?;

    let qualities: Vec<u8> = record
        .quality_scores()
        .iter()
        .map(|score| score.saturating_add(b'!'))
        .collect();
    let qualities = String::from_utf8(qualities)
        .map_err(|_| Error::Decode(format!("quality scores out of range in read {name}")))?;

    Ok(AlignmentRecord::new(name, sequence, qualities, flags))
}
