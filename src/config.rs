use crate::reference::{GenomeReference, GenomicRange};
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "htsget-dump")]
#[command(about = "Download reads from an htsget URL to local files")]
pub struct Config {
    /// htsget ticket URL for the dataset
    pub url: String,

    /// Reference genome as <name>=<chrom.sizes path>; required for region
    /// mode
    #[arg(short = 'g', long, env = "HTSGET_REFERENCE")]
    pub reference: Option<String>,

    /// Region to download: a chromosome name, or chrom:start-end
    #[arg(short = 'r', long)]
    pub region: Option<String>,

    /// Window size in bp for per-region ticket requests
    #[arg(short = 'w', long, env = "HTSGET_WINDOW_SIZE", default_value = "10000")]
    pub window_size: u64,

    /// Maximum number of reads to fetch
    #[arg(short = 'M', long)]
    pub max_reads: Option<u64>,

    /// Output format; fastq and sam decode the stream, bam and cram save
    /// the raw bytes
    #[arg(short = 'o', long, value_enum, default_value = "bam")]
    pub output_format: OutputFormat,

    /// File name prefix; defaults to the accession
    #[arg(short = 'p', long)]
    pub prefix: Option<String>,

    /// Write paired FASTQ output to a single, interleaved file
    #[arg(short = 'i', long)]
    pub interleaved: bool,

    /// Do not gzip-compress FASTQ output files
    #[arg(long)]
    pub nocompression: bool,

    /// JSON file to write with dump results
    #[arg(short = 'j', long)]
    pub json: Option<PathBuf>,

    /// Seconds to wait before timing out a request
    #[arg(short = 't', long, env = "HTSGET_TIMEOUT", default_value = "10")]
    pub timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Fastq,
    Sam,
    Bam,
    Cram,
}

impl Config {
    /// Parse the `--reference` argument and load the chrom.sizes file.
    pub fn genome_reference(&self) -> Result<Option<GenomeReference>> {
        let Some(arg) = &self.reference else {
            return Ok(None);
        };

        let (name, path) = arg.split_once('=').ok_or_else(|| {
            Error::InvalidInput(format!(
                "expected <name>=<chrom.sizes path>, got {arg:?}"
            ))
        })?;

        GenomeReference::from_sizes_file(name, path).map(Some)
    }

    pub fn genomic_range(&self) -> Result<Option<GenomicRange>> {
        self.region
            .as_deref()
            .map(str::parse)
            .transpose()
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout)
    }
}
