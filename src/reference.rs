//! Genome reference metadata.
//!
//! A [`GenomeReference`] holds an ordered chromosome-name to length mapping,
//! typically loaded from a two-column chrom.sizes file. Chromosome order is
//! preserved because windowed iteration follows reference order.

use crate::{Error, Result};
use std::path::Path;
use std::str::FromStr;

/// Ordered chromosome names and sizes for one reference genome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeReference {
    name: String,
    chromosomes: Vec<(String, u64)>,
    md5: Option<String>,
}

impl GenomeReference {
    pub fn new(name: impl Into<String>, chromosomes: Vec<(String, u64)>) -> Self {
        Self {
            name: name.into(),
            chromosomes,
            md5: None,
        }
    }

    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }

    /// Load from a chrom.sizes file: two tab-separated columns, chromosome
    /// name then length in bp, one chromosome per line. File order is kept.
    pub fn from_sizes_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut chromosomes = Vec::new();

        for (i, line) in contents.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let (chrom, size) = line.split_once('\t').ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{}:{}: expected <chromosome>\\t<length>",
                    path.display(),
                    i + 1
                ))
            })?;

            let size: u64 = size.trim().parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "{}:{}: invalid chromosome length {:?}",
                    path.display(),
                    i + 1,
                    size
                ))
            })?;

            chromosomes.push((chrom.to_string(), size));
        }

        Ok(Self::new(name, chromosomes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn md5(&self) -> Option<&str> {
        self.md5.as_deref()
    }

    /// Chromosome names in reference order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.chromosomes.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.chromosomes.iter().map(|(name, size)| (name.as_str(), *size))
    }

    /// Size of the given chromosome, if present.
    pub fn length_of(&self, chromosome: &str) -> Option<u64> {
        self.chromosomes
            .iter()
            .find(|(name, _)| name == chromosome)
            .map(|(_, size)| *size)
    }

    pub fn len(&self) -> usize {
        self.chromosomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosomes.is_empty()
    }
}

/// A region argument of the form `chrom` or `chrom:start-end`.
///
/// Coordinates are 0-based, half-open, matching htsget `start`/`end` query
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomicRange {
    pub name: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl FromStr for GenomicRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, interval) = match s.split_once(':') {
            Some((name, interval)) => (name, Some(interval)),
            None => (s, None),
        };

        if name.is_empty() {
            return Err(Error::InvalidInput(format!("invalid region: {s:?}")));
        }

        let (start, end) = match interval {
            None => (None, None),
            Some(interval) => {
                let (start, end) = interval.split_once('-').ok_or_else(|| {
                    Error::InvalidInput(format!("invalid region interval: {s:?}"))
                })?;
                let start: u64 = start.parse().map_err(|_| {
                    Error::InvalidInput(format!("invalid region start: {s:?}"))
                })?;
                let end: u64 = end.parse().map_err(|_| {
                    Error::InvalidInput(format!("invalid region end: {s:?}"))
                })?;
                if end <= start {
                    return Err(Error::InvalidInput(format!(
                        "region end must be greater than start: {s:?}"
                    )));
                }
                (Some(start), Some(end))
            }
        };

        Ok(Self {
            name: name.to_string(),
            start,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> GenomeReference {
        GenomeReference::new(
            "test",
            vec![("chr1".to_string(), 1000), ("chr2".to_string(), 500)],
        )
    }

    #[test]
    fn test_reference_order_preserved() {
        let reference = reference();
        let names: Vec<_> = reference.names().collect();
        assert_eq!(names, ["chr1", "chr2"]);
    }

    #[test]
    fn test_length_lookup() {
        let reference = reference();
        assert_eq!(reference.length_of("chr2"), Some(500));
        assert_eq!(reference.length_of("chrM"), None);
    }

    #[test]
    fn test_from_sizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.chrom.sizes");
        std::fs::write(&path, "chr1\t248956422\nchr2\t242193529\n").unwrap();

        let reference = GenomeReference::from_sizes_file("GRCh38", &path).unwrap();
        assert_eq!(reference.len(), 2);
        assert_eq!(reference.length_of("chr1"), Some(248956422));
    }

    #[test]
    fn test_from_sizes_file_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.chrom.sizes");
        std::fs::write(&path, "chr1 no-tabs-here\n").unwrap();

        assert!(GenomeReference::from_sizes_file("bad", &path).is_err());
    }

    #[test]
    fn test_range_whole_chromosome() {
        let range: GenomicRange = "chr1".parse().unwrap();
        assert_eq!(range.name, "chr1");
        assert_eq!(range.start, None);
        assert_eq!(range.end, None);
    }

    #[test]
    fn test_range_with_interval() {
        let range: GenomicRange = "chr2:100-2000".parse().unwrap();
        assert_eq!(range.name, "chr2");
        assert_eq!(range.start, Some(100));
        assert_eq!(range.end, Some(2000));
    }

    #[test]
    fn test_range_malformed() {
        assert!("".parse::<GenomicRange>().is_err());
        assert!(":100-200".parse::<GenomicRange>().is_err());
        assert!("chr1:100".parse::<GenomicRange>().is_err());
        assert!("chr1:abc-200".parse::<GenomicRange>().is_err());
        assert!("chr1:200-100".parse::<GenomicRange>().is_err());
    }
}
