//! Mate-pair reconstruction from an interleaved record stream.

use crate::record::{AlignmentRecord, Fragment, Pairing, StreamItem};
use crate::{Error, Result};
use std::collections::HashMap;

/// Reassembles [`Fragment`]s from records arriving in any order.
///
/// The first half of a pair is parked in the pending cache under its read
/// name; when the mate arrives the entry is removed and a fragment emitted
/// with the read1 record first. Unpaired records pass straight through.
#[derive(Debug, Default)]
pub struct PairAssembler {
    pairing: Pairing,
    pending: HashMap<String, AlignmentRecord>,
}

impl PairAssembler {
    pub fn new(pairing: Pairing) -> Self {
        Self {
            pairing,
            pending: HashMap::new(),
        }
    }

    /// Pairing state observed so far; sticks at `Paired` once the first
    /// paired record is seen.
    pub fn pairing(&self) -> Pairing {
        self.pairing
    }

    /// Number of reads waiting for their mate.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed one record; returns the resulting emission, if any.
    pub fn assemble(&mut self, record: AlignmentRecord) -> Result<Option<StreamItem>> {
        if self.pairing == Pairing::Single || !record.is_paired() {
            return Ok(Some(StreamItem::Record(record)));
        }

        self.pairing = Pairing::Paired;

        let Some(mate) = self.pending.remove(record.name()) else {
            self.pending.insert(record.name().to_string(), record);
            return Ok(None);
        };

        let fragment = if record.is_read1() {
            if !mate.is_read2() {
                return Err(Error::PairingInvariant(record.name().to_string()));
            }
            Fragment {
                r1: record,
                r2: mate,
            }
        } else {
            if !mate.is_read1() {
                return Err(Error::PairingInvariant(record.name().to_string()));
            }
            Fragment {
                r1: mate,
                r2: record,
            }
        };

        Ok(Some(StreamItem::Fragment(fragment)))
    }

    /// Drop all pending half-pairs.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noodles::sam::alignment::record::Flags;

    fn read1(name: &str) -> AlignmentRecord {
        AlignmentRecord::new(name, "ACGT", "IIII", Flags::SEGMENTED | Flags::FIRST_SEGMENT)
    }

    fn read2(name: &str) -> AlignmentRecord {
        AlignmentRecord::new(name, "TGCA", "JJJJ", Flags::SEGMENTED | Flags::LAST_SEGMENT)
    }

    fn unpaired(name: &str) -> AlignmentRecord {
        AlignmentRecord::new(name, "ACGT", "IIII", Flags::empty())
    }

    #[test]
    fn test_pair_in_order() {
        let mut assembler = PairAssembler::default();
        assert!(assembler.assemble(read1("q0")).unwrap().is_none());
        assert_eq!(assembler.pending(), 1);

        match assembler.assemble(read2("q0")).unwrap() {
            Some(StreamItem::Fragment(fragment)) => {
                assert!(fragment.r1.is_read1());
                assert!(fragment.r2.is_read2());
            }
            other => panic!("expected fragment, got {other:?}"),
        }
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_pair_reverse_order() {
        let mut assembler = PairAssembler::default();
        assert!(assembler.assemble(read2("q0")).unwrap().is_none());

        match assembler.assemble(read1("q0")).unwrap() {
            Some(StreamItem::Fragment(fragment)) => {
                assert_eq!(fragment.r1.sequence(), "ACGT");
                assert_eq!(fragment.r2.sequence(), "TGCA");
            }
            other => panic!("expected fragment, got {other:?}"),
        }
    }

    #[test]
    fn test_unpaired_passthrough() {
        let mut assembler = PairAssembler::default();
        match assembler.assemble(unpaired("q0")).unwrap() {
            Some(StreamItem::Record(record)) => assert_eq!(record.name(), "q0"),
            other => panic!("expected record, got {other:?}"),
        }
        assert_eq!(assembler.pairing(), Pairing::Unknown);
    }

    #[test]
    fn test_single_mode_ignores_pair_flags() {
        let mut assembler = PairAssembler::new(Pairing::Single);
        assert!(matches!(
            assembler.assemble(read1("q0")).unwrap(),
            Some(StreamItem::Record(_))
        ));
        assert!(matches!(
            assembler.assemble(read2("q0")).unwrap(),
            Some(StreamItem::Record(_))
        ));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_pairing_transitions_once() {
        let mut assembler = PairAssembler::default();
        let _ = assembler.assemble(read1("q0")).unwrap();
        assert_eq!(assembler.pairing(), Pairing::Paired);
        let _ = assembler.assemble(unpaired("q1")).unwrap();
        assert_eq!(assembler.pairing(), Pairing::Paired);
    }

    #[test]
    fn test_inconsistent_mate_flags() {
        let mut assembler = PairAssembler::default();
        assert!(assembler.assemble(read1("q0")).unwrap().is_none());

        let result = assembler.assemble(read1("q0"));
        assert!(matches!(result, Err(Error::PairingInvariant(_))));
    }

    #[test]
    fn test_clear_drops_pending() {
        let mut assembler = PairAssembler::default();
        let _ = assembler.assemble(read1("q0")).unwrap();
        assembler.clear();
        assert_eq!(assembler.pending(), 0);
    }
}
