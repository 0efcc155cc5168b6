//! Local output sinks for the dump CLI.
//!
//! FASTQ output supports split pair files, a single interleaved file, or a
//! single-end file, optionally bgzf-compressed (bgzf output is plain-gzip
//! compatible). SAM output rebuilds minimal records from the streamed name,
//! flags, bases, and qualities.

use crate::record::{AlignmentRecord, StreamItem};
use crate::{Error, Result};
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::io::Write as _;
use noodles::sam::alignment::record_buf::{QualityScores, Sequence};
use noodles::{bgzf, fastq, sam};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// A FASTQ file, optionally bgzf-compressed.
enum FastqSink {
    Plain(BufWriter<File>),
    Bgzf(bgzf::Writer<File>),
}

impl FastqSink {
    fn create(path: &Path, compress: bool) -> Result<Self> {
        let file = File::create(path)?;
        Ok(if compress {
            FastqSink::Bgzf(bgzf::Writer::new(file))
        } else {
            FastqSink::Plain(BufWriter::new(file))
        })
    }

    fn finish(&mut self) -> Result<()> {
        match self {
            FastqSink::Plain(writer) => writer.flush()?,
            FastqSink::Bgzf(writer) => writer.try_finish()?,
        }
        Ok(())
    }
}

impl Write for FastqSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            FastqSink::Plain(writer) => writer.write(buf),
            FastqSink::Bgzf(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            FastqSink::Plain(writer) => writer.flush(),
            FastqSink::Bgzf(writer) => writer.flush(),
        }
    }
}

enum FastqLayout {
    /// One file; fragments are written interleaved.
    Single(fastq::io::Writer<FastqSink>),
    /// Separate read1/read2 files.
    Split(fastq::io::Writer<FastqSink>, fastq::io::Writer<FastqSink>),
}

/// FASTQ output files for one dump.
pub struct FastqOutput {
    layout: FastqLayout,
    files: Vec<PathBuf>,
}

impl FastqOutput {
    /// Choose the file layout from the observed pairing and the interleave
    /// flag, and create the files.
    pub fn create(prefix: &str, paired: bool, interleaved: bool, compress: bool) -> Result<Self> {
        let suffix = if compress { ".gz" } else { "" };

        if paired && !interleaved {
            let path1 = PathBuf::from(format!("{prefix}.1.fq{suffix}"));
            let path2 = PathBuf::from(format!("{prefix}.2.fq{suffix}"));
            let writer1 = fastq::io::Writer::new(FastqSink::create(&path1, compress)?);
            let writer2 = fastq::io::Writer::new(FastqSink::create(&path2, compress)?);
            Ok(Self {
                layout: FastqLayout::Split(writer1, writer2),
                files: vec![path1, path2],
            })
        } else {
            let path = PathBuf::from(format!("{prefix}.fq{suffix}"));
            let writer = fastq::io::Writer::new(FastqSink::create(&path, compress)?);
            Ok(Self {
                layout: FastqLayout::Single(writer),
                files: vec![path],
            })
        }
    }

    pub fn write_item(&mut self, item: &StreamItem) -> Result<()> {
        match (&mut self.layout, item) {
            (FastqLayout::Single(writer), StreamItem::Record(record)) => {
                writer.write_record(&to_fastq(record))?;
            }
            (FastqLayout::Single(writer), StreamItem::Fragment(fragment)) => {
                writer.write_record(&to_fastq(&fragment.r1))?;
                writer.write_record(&to_fastq(&fragment.r2))?;
            }
            (FastqLayout::Split(writer1, _), StreamItem::Record(record)) => {
                writer1.write_record(&to_fastq(record))?;
            }
            (FastqLayout::Split(writer1, writer2), StreamItem::Fragment(fragment)) => {
                writer1.write_record(&to_fastq(&fragment.r1))?;
                writer2.write_record(&to_fastq(&fragment.r2))?;
            }
        }
        Ok(())
    }

    /// Flush and close, returning the file paths written.
    pub fn finish(self) -> Result<Vec<PathBuf>> {
        match self.layout {
            FastqLayout::Single(writer) => {
                writer.into_inner().finish()?;
            }
            FastqLayout::Split(writer1, writer2) => {
                writer1.into_inner().finish()?;
                writer2.into_inner().finish()?;
            }
        }
        Ok(self.files)
    }
}

fn to_fastq(record: &AlignmentRecord) -> fastq::Record {
    fastq::Record::new(
        fastq::record::Definition::new(record.name(), ""),
        record.sequence(),
        record.qualities(),
    )
}

/// SAM output file for one dump.
pub struct SamOutput {
    writer: sam::io::Writer<BufWriter<File>>,
    header: sam::Header,
    path: PathBuf,
}

impl SamOutput {
    pub fn create(prefix: &str, header: &sam::Header) -> Result<Self> {
        let path = PathBuf::from(format!("{prefix}.sam"));
        let mut writer = sam::io::Writer::new(BufWriter::new(File::create(&path)?));
        writer.write_header(header)?;
        Ok(Self {
            writer,
            header: header.clone(),
            path,
        })
    }

    pub fn write_item(&mut self, item: &StreamItem) -> Result<()> {
        match item {
            StreamItem::Record(record) => self.write_record(record),
            StreamItem::Fragment(fragment) => {
                self.write_record(&fragment.r1)?;
                self.write_record(&fragment.r2)
            }
        }
    }

    fn write_record(&mut self, record: &AlignmentRecord) -> Result<()> {
        let record = to_record_buf(record)?;
        self.writer.write_alignment_record(&self.header, &record)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.get_mut().flush()?;
        Ok(self.path)
    }
}

/// Rebuild an unaligned record from the fields the stream carries.
fn to_record_buf(record: &AlignmentRecord) -> Result<RecordBuf> {
    let mut out = RecordBuf::default();
    *out.name_mut() = Some(record.name().as_bytes().to_vec().into());
    *out.flags_mut() = record.flags();
    *out.sequence_mut() = Sequence::from(record.sequence().as_bytes().to_vec());

    let scores = record
        .qualities()
        .bytes()
        .map(|quality| {
            quality
                .checked_sub(b'!')
                .ok_or_else(|| Error::InvalidInput(format!(
                    "quality character below phred+33 in read {}",
                    record.name()
                )))
        })
        .collect::<Result<Vec<u8>>>()?;
    *out.quality_scores_mut() = QualityScores::from(scores);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Fragment;
    use noodles::sam::alignment::record::Flags;

    fn fragment() -> StreamItem {
        StreamItem::Fragment(Fragment {
            r1: AlignmentRecord::new(
                "q0",
                "ACGT",
                "IIII",
                Flags::SEGMENTED | Flags::FIRST_SEGMENT,
            ),
            r2: AlignmentRecord::new(
                "q0",
                "TGCA",
                "JJJJ",
                Flags::SEGMENTED | Flags::LAST_SEGMENT,
            ),
        })
    }

    #[test]
    fn test_split_fastq_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out");
        let prefix = prefix.to_str().unwrap();

        let mut output = FastqOutput::create(prefix, true, false, false).unwrap();
        output.write_item(&fragment()).unwrap();
        let files = output.finish().unwrap();

        assert_eq!(files.len(), 2);
        let read1 = std::fs::read_to_string(&files[0]).unwrap();
        assert_eq!(read1, "@q0\nACGT\n+\nIIII\n");
        let read2 = std::fs::read_to_string(&files[1]).unwrap();
        assert_eq!(read2, "@q0\nTGCA\n+\nJJJJ\n");
    }

    #[test]
    fn test_interleaved_fastq_file() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out");
        let prefix = prefix.to_str().unwrap();

        let mut output = FastqOutput::create(prefix, true, true, false).unwrap();
        output.write_item(&fragment()).unwrap();
        let files = output.finish().unwrap();

        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(&files[0]).unwrap();
        assert_eq!(contents, "@q0\nACGT\n+\nIIII\n@q0\nTGCA\n+\nJJJJ\n");
    }

    #[test]
    fn test_compressed_fastq_is_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out");
        let prefix = prefix.to_str().unwrap();

        let mut output = FastqOutput::create(prefix, false, false, true).unwrap();
        output
            .write_item(&StreamItem::Record(AlignmentRecord::new(
                "q0",
                "ACGT",
                "IIII",
                Flags::empty(),
            )))
            .unwrap();
        let files = output.finish().unwrap();

        let bytes = std::fs::read(&files[0]).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_sam_output_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out");
        let prefix = prefix.to_str().unwrap();

        let header = sam::Header::builder().build();
        let mut output = SamOutput::create(prefix, &header).unwrap();
        output.write_item(&fragment()).unwrap();
        let path = output.finish().unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("q0\t"));
        assert!(lines[0].contains("ACGT"));
        assert!(lines[1].contains("TGCA"));
    }
}
