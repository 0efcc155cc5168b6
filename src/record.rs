//! Read records and reconstructed mate pairs.

use noodles::sam::alignment::record::Flags;

/// One aligned-sequence read as seen by the streaming core: read name,
/// bases, phred+33 quality string, and the SAM flag bits the pairing logic
/// inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    name: String,
    sequence: String,
    qualities: String,
    flags: Flags,
}

impl AlignmentRecord {
    pub fn new(
        name: impl Into<String>,
        sequence: impl Into<String>,
        qualities: impl Into<String>,
        flags: Flags,
    ) -> Self {
        Self {
            name: name.into(),
            sequence: sequence.into(),
            qualities: qualities.into(),
            flags,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn qualities(&self) -> &str {
        &self.qualities
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn is_paired(&self) -> bool {
        self.flags.is_segmented()
    }

    pub fn is_read1(&self) -> bool {
        self.flags.is_first_segment()
    }

    pub fn is_read2(&self) -> bool {
        self.flags.is_last_segment()
    }
}

/// A reconstructed mate pair: `r1` carries the read1 flag, `r2` read2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub r1: AlignmentRecord,
    pub r2: AlignmentRecord,
}

/// One emission of the record stream: a singleton read or a mate pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Record(AlignmentRecord),
    Fragment(Fragment),
}

impl StreamItem {
    /// Number of reads carried by this emission.
    pub fn read_count(&self) -> u64 {
        match self {
            StreamItem::Record(_) => 1,
            StreamItem::Fragment(_) => 2,
        }
    }
}

/// Whether the stream carries paired-end data.
///
/// Starts `Unknown` unless configured, and transitions at most once, to
/// `Paired`, when the first paired record is observed. `Single` disables
/// pair reconstruction entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pairing {
    #[default]
    Unknown,
    Single,
    Paired,
}
