//! Batching of streaming requests.
//!
//! Two batchers drive repeated ticket negotiation: [`CoordinateBatcher`]
//! produces genomic windows over a [`GenomeReference`], and [`IndexBatcher`]
//! pages any index-addressable item sequence by count.

use crate::reference::GenomeReference;
use crate::{Error, Result};
use std::collections::HashMap;

pub const DEFAULT_WINDOW_SIZE: u64 = 10_000;
pub const DEFAULT_BATCH_SIZE: u64 = 1_000;

/// A half-open genomic interval `[start, stop)` on one chromosome.
///
/// `number` is the window's index in the full concatenated per-chromosome
/// window sequence, before any `window_start`/`window_step` slicing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub number: u64,
    pub chromosome: String,
    pub start: u64,
    pub stop: u64,
}

/// One page of an index-addressable sequence: items `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBatch {
    pub number: usize,
    pub start: u64,
    pub size: u64,
}

/// Per-chromosome coordinate bound: one value for every chromosome, or a
/// map keyed by chromosome name.
#[derive(Debug, Clone)]
pub enum ChromosomeBound {
    Uniform(u64),
    PerChromosome(HashMap<String, u64>),
}

impl ChromosomeBound {
    fn for_chromosome(&self, chromosome: &str) -> Option<u64> {
        match self {
            ChromosomeBound::Uniform(value) => Some(*value),
            ChromosomeBound::PerChromosome(map) => map.get(chromosome).copied(),
        }
    }
}

/// Generates a lazy, finite sequence of [`Window`]s over one or more
/// chromosomes of a reference.
///
/// Windows tile each chromosome's `[start, stop)` interval in reference
/// order; the final window of a chromosome is clipped to the chromosome
/// stop. `window_start`/`window_stop`/`window_step` slice the concatenated
/// window sequence by global index.
#[derive(Debug, Clone)]
pub struct CoordinateBatcher {
    reference: GenomeReference,
    chromosomes: Option<Vec<String>>,
    starts: Option<ChromosomeBound>,
    stops: Option<ChromosomeBound>,
    window_size: u64,
    window_start: u64,
    window_stop: Option<u64>,
    window_step: u64,
}

impl CoordinateBatcher {
    pub fn new(reference: GenomeReference) -> Self {
        Self {
            reference,
            chromosomes: None,
            starts: None,
            stops: None,
            window_size: DEFAULT_WINDOW_SIZE,
            window_start: 0,
            window_stop: None,
            window_step: 1,
        }
    }

    /// Restrict iteration to the given chromosomes, in the given order.
    pub fn chromosomes(mut self, chromosomes: Vec<String>) -> Self {
        self.chromosomes = Some(chromosomes);
        self
    }

    pub fn chromosome_starts(mut self, starts: ChromosomeBound) -> Self {
        self.starts = Some(starts);
        self
    }

    pub fn chromosome_stops(mut self, stops: ChromosomeBound) -> Self {
        self.stops = Some(stops);
        self
    }

    /// Window size in bp; zero is treated as one.
    pub fn window_size(mut self, size: u64) -> Self {
        self.window_size = size.max(1);
        self
    }

    /// Global index of the first window to emit.
    pub fn window_start(mut self, start: u64) -> Self {
        self.window_start = start;
        self
    }

    /// Global index at which to stop emitting (exclusive).
    pub fn window_stop(mut self, stop: u64) -> Self {
        self.window_stop = Some(stop);
        self
    }

    /// Emit every `step`-th window of the sliced sequence; zero is one.
    pub fn window_step(mut self, step: u64) -> Self {
        self.window_step = step.max(1);
        self
    }

    /// Resolve chromosome bounds and return the window iterator.
    ///
    /// Fails with [`Error::InvalidInput`] if a requested chromosome is not
    /// in the reference.
    pub fn windows(self) -> Result<Windows> {
        let names: Vec<String> = match &self.chromosomes {
            Some(subset) => subset.clone(),
            None => self.reference.names().map(String::from).collect(),
        };

        let mut spans = Vec::with_capacity(names.len());
        for name in names {
            let size = self.reference.length_of(&name).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "unknown chromosome {:?} for reference {}",
                    name,
                    self.reference.name()
                ))
            })?;

            let start = self
                .starts
                .as_ref()
                .and_then(|bound| bound.for_chromosome(&name))
                .unwrap_or(0)
                .min(size);
            let stop = self
                .stops
                .as_ref()
                .and_then(|bound| bound.for_chromosome(&name))
                .unwrap_or(size)
                .min(size);

            spans.push(ChromosomeSpan { name, start, stop });
        }

        Ok(Windows {
            spans: spans.into_iter(),
            window_size: self.window_size,
            window_start: self.window_start,
            window_stop: self.window_stop,
            window_step: self.window_step,
            current: None,
            global: 0,
            done: false,
        })
    }
}

#[derive(Debug)]
struct ChromosomeSpan {
    name: String,
    start: u64,
    stop: u64,
}

impl ChromosomeSpan {
    fn window_count(&self, window_size: u64) -> u64 {
        (self.stop.saturating_sub(self.start)).div_ceil(window_size)
    }
}

/// Lazy window sequence produced by [`CoordinateBatcher::windows`].
#[derive(Debug)]
pub struct Windows {
    spans: std::vec::IntoIter<ChromosomeSpan>,
    window_size: u64,
    window_start: u64,
    window_stop: Option<u64>,
    window_step: u64,
    current: Option<ChromosomeCursor>,
    global: u64,
    done: bool,
}

#[derive(Debug)]
struct ChromosomeCursor {
    name: String,
    next_start: u64,
    stop: u64,
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        loop {
            if self.done {
                return None;
            }

            if self.window_stop.is_some_and(|stop| self.global >= stop) {
                self.done = true;
                return None;
            }

            let Some(cursor) = self.current.as_mut() else {
                let Some(span) = self.spans.next() else {
                    self.done = true;
                    return None;
                };

                // Skip a whole chromosome without generating its windows
                // when all of them fall before the global offset.
                let count = span.window_count(self.window_size);
                if self.global + count <= self.window_start {
                    self.global += count;
                    continue;
                }

                self.current = Some(ChromosomeCursor {
                    name: span.name,
                    next_start: span.start,
                    stop: span.stop,
                });
                continue;
            };

            if cursor.next_start >= cursor.stop {
                self.current = None;
                continue;
            }

            let number = self.global;
            self.global += 1;

            let start = cursor.next_start;
            let stop = (start + self.window_size).min(cursor.stop);
            cursor.next_start += self.window_size;

            if number < self.window_start {
                continue;
            }

            if (number - self.window_start) % self.window_step != 0 {
                continue;
            }

            return Some(Window {
                number,
                chromosome: cursor.name.clone(),
                start,
                stop,
            });
        }
    }
}

/// Generates a lazy sequence of [`IndexBatch`]es over `total` items.
///
/// Candidate batch starts run from `item_start` to the effective item stop
/// in steps of `batch_size` and are sliced `[batch_start..batch_stop)` with
/// stride `batch_step`. The item-level `item_limit` is applied after the
/// batch-level slice and always wins, shortening the final batch if needed.
#[derive(Debug, Clone)]
pub struct IndexBatcher {
    item_start: u64,
    item_stop: Option<u64>,
    item_limit: Option<u64>,
    batch_start: usize,
    batch_stop: Option<usize>,
    batch_size: u64,
    batch_step: usize,
}

impl Default for IndexBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexBatcher {
    pub fn new() -> Self {
        Self {
            item_start: 0,
            item_stop: None,
            item_limit: None,
            batch_start: 0,
            batch_stop: None,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_step: 1,
        }
    }

    pub fn item_start(mut self, start: u64) -> Self {
        self.item_start = start;
        self
    }

    pub fn item_stop(mut self, stop: u64) -> Self {
        self.item_stop = Some(stop);
        self
    }

    pub fn item_limit(mut self, limit: u64) -> Self {
        self.item_limit = Some(limit);
        self
    }

    pub fn batch_start(mut self, start: usize) -> Self {
        self.batch_start = start;
        self
    }

    pub fn batch_stop(mut self, stop: usize) -> Self {
        self.batch_stop = Some(stop);
        self
    }

    /// Items per batch; zero is treated as one.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Stride over the batch-start candidates; zero is one.
    pub fn batch_step(mut self, step: usize) -> Self {
        self.batch_step = step.max(1);
        self
    }

    /// Iterate batches over a sequence of `total` items.
    pub fn batches(&self, total: u64) -> impl Iterator<Item = IndexBatch> + use<> {
        let stop = self.item_stop.map_or(total, |stop| stop.min(total));

        let candidates: Vec<u64> = (self.item_start..stop)
            .step_by(self.batch_size as usize)
            .collect();

        let batch_stop = self
            .batch_stop
            .map_or(candidates.len(), |stop| stop.min(candidates.len()));
        let mut starts: Vec<u64> = candidates
            .into_iter()
            .take(batch_stop)
            .skip(self.batch_start)
            .step_by(self.batch_step)
            .collect();

        // Item-level limit wins over the batch-level slice above.
        let mut limit = (starts.len() as u64 * self.batch_size).min(total);
        if let Some(item_limit) = self.item_limit {
            limit = limit.min(item_limit);
        }

        let batches = limit.div_ceil(self.batch_size) as usize;
        starts.truncate(batches);

        let batch_size = self.batch_size;
        starts
            .into_iter()
            .enumerate()
            .map(move |(number, start)| {
                let size = if number + 1 == batches {
                    limit - number as u64 * batch_size
                } else {
                    batch_size
                };
                IndexBatch {
                    number,
                    start,
                    size,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> GenomeReference {
        GenomeReference::new(
            "test",
            vec![
                ("chr1".to_string(), 25_000),
                ("chr2".to_string(), 10_000),
                ("chr3".to_string(), 4_000),
            ],
        )
    }

    fn batches(batcher: IndexBatcher, total: u64) -> Vec<(usize, u64, u64)> {
        batcher
            .batches(total)
            .map(|batch| (batch.number, batch.start, batch.size))
            .collect()
    }

    #[test]
    fn test_windows_tile_chromosome_exactly() {
        let reference = GenomeReference::new("test", vec![("chr1".to_string(), 25_500)]);
        let windows: Vec<Window> = CoordinateBatcher::new(reference)
            .window_size(10_000)
            .windows()
            .unwrap()
            .collect();

        assert_eq!(windows.len(), 3);
        let mut expected_start = 0;
        for window in &windows {
            assert_eq!(window.start, expected_start);
            expected_start = window.stop;
        }
        assert_eq!(windows.last().unwrap().stop, 25_500);
    }

    #[test]
    fn test_windows_cross_chromosomes() {
        let windows: Vec<Window> = CoordinateBatcher::new(reference())
            .window_size(10_000)
            .windows()
            .unwrap()
            .collect();

        let summary: Vec<(u64, &str, u64, u64)> = windows
            .iter()
            .map(|w| (w.number, w.chromosome.as_str(), w.start, w.stop))
            .collect();
        assert_eq!(
            summary,
            [
                (0, "chr1", 0, 10_000),
                (1, "chr1", 10_000, 20_000),
                (2, "chr1", 20_000, 25_000),
                (3, "chr2", 0, 10_000),
                (4, "chr3", 0, 4_000),
            ]
        );
    }

    #[test]
    fn test_windows_chromosome_subset_and_bounds() {
        let windows: Vec<Window> = CoordinateBatcher::new(reference())
            .chromosomes(vec!["chr2".to_string()])
            .chromosome_starts(ChromosomeBound::Uniform(2_500))
            .chromosome_stops(ChromosomeBound::Uniform(7_500))
            .window_size(2_000)
            .windows()
            .unwrap()
            .collect();

        let spans: Vec<(u64, u64)> = windows.iter().map(|w| (w.start, w.stop)).collect();
        assert_eq!(spans, [(2_500, 4_500), (4_500, 6_500), (6_500, 7_500)]);
        assert!(windows.iter().all(|w| w.chromosome == "chr2"));
    }

    #[test]
    fn test_windows_unknown_chromosome() {
        let result = CoordinateBatcher::new(reference())
            .chromosomes(vec!["chrM".to_string()])
            .windows();
        assert!(result.is_err());
    }

    #[test]
    fn test_windows_global_slicing() {
        // chr1 has windows 0..=2, chr2 window 3, chr3 window 4; slicing
        // [1, 4) with step 2 keeps windows 1 and 3.
        let windows: Vec<Window> = CoordinateBatcher::new(reference())
            .window_size(10_000)
            .window_start(1)
            .window_stop(4)
            .window_step(2)
            .windows()
            .unwrap()
            .collect();

        let numbers: Vec<u64> = windows.iter().map(|w| w.number).collect();
        assert_eq!(numbers, [1, 3]);
        assert_eq!(windows[1].chromosome, "chr2");
    }

    #[test]
    fn test_windows_skip_whole_chromosome() {
        // With window_start past all of chr1, chr1 contributes nothing and
        // numbering is still global.
        let windows: Vec<Window> = CoordinateBatcher::new(reference())
            .window_size(10_000)
            .window_start(3)
            .windows()
            .unwrap()
            .collect();

        let summary: Vec<(u64, &str)> = windows
            .iter()
            .map(|w| (w.number, w.chromosome.as_str()))
            .collect();
        assert_eq!(summary, [(3, "chr2"), (4, "chr3")]);
    }

    #[test]
    fn test_windows_empty_span_contributes_nothing() {
        let windows: Vec<Window> = CoordinateBatcher::new(reference())
            .chromosome_starts(ChromosomeBound::PerChromosome(HashMap::from([(
                "chr2".to_string(),
                10_000,
            )])))
            .window_size(10_000)
            .windows()
            .unwrap()
            .collect();

        assert!(windows.iter().all(|w| w.chromosome != "chr2"));
        assert_eq!(windows.len(), 4);
    }

    #[test]
    fn test_index_batches_even() {
        let expected: Vec<(usize, u64, u64)> =
            (0..10).map(|i| (i as usize, i * 10, 10)).collect();
        assert_eq!(batches(IndexBatcher::new().batch_size(10), 100), expected);
    }

    #[test]
    fn test_index_batches_sliced() {
        let batcher = IndexBatcher::new()
            .batch_start(1)
            .batch_size(10)
            .batch_step(4);
        assert_eq!(
            batches(batcher, 100),
            [(0, 10, 10), (1, 50, 10), (2, 90, 10)]
        );
    }

    #[test]
    fn test_index_batches_item_bounds() {
        let batcher = IndexBatcher::new()
            .item_start(5)
            .item_stop(95)
            .batch_start(1)
            .batch_size(10)
            .batch_step(4);
        assert_eq!(batches(batcher, 100), [(0, 15, 10), (1, 55, 10)]);
    }

    #[test]
    fn test_index_batches_item_limit_clips_final_batch() {
        let batcher = IndexBatcher::new()
            .item_start(5)
            .item_stop(95)
            .item_limit(15)
            .batch_start(1)
            .batch_size(10)
            .batch_step(4);
        assert_eq!(batches(batcher, 100), [(0, 15, 10), (1, 55, 5)]);
    }

    #[test]
    fn test_index_batches_sizes_sum_to_limit() {
        let batcher = IndexBatcher::new().batch_size(7).item_limit(40);
        let total: u64 = batcher.batches(100).map(|batch| batch.size).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn test_index_batches_total_smaller_than_batch() {
        assert_eq!(batches(IndexBatcher::new().batch_size(10), 3), [(0, 0, 3)]);
    }
}
