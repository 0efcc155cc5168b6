use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use htsget_stream::{
    Config, HtsgetProtocol,
    batch::{ChromosomeBound, CoordinateBatcher},
    config::OutputFormat,
    fetch::FetchPipeline,
    output::{FastqOutput, SamOutput},
    record::Pairing,
    ticket::{Format, TicketClient, TicketRequest},
};

#[derive(Debug, Serialize)]
struct Summary {
    accession: String,
    files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    read_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    byte_count: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let summary = run(&config).await?;

    if let Some(path) = &config.json {
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
    } else if let Some(reads) = summary.read_count {
        println!(
            "Dumped {} reads from {} to {:?}.",
            reads, summary.accession, summary.files
        );
    } else {
        println!(
            "Dumped {} bytes from {} to {:?}.",
            summary.byte_count.unwrap_or(0),
            summary.accession,
            summary.files
        );
    }

    Ok(())
}

async fn run(config: &Config) -> anyhow::Result<Summary> {
    match config.output_format {
        OutputFormat::Bam | OutputFormat::Cram => dump_raw(config).await,
        OutputFormat::Fastq | OutputFormat::Sam => dump_records(config).await,
    }
}

fn accession_of(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("htsget")
        .to_string()
}

/// Save the ticket's raw container bytes to a file, without decoding.
async fn dump_raw(config: &Config) -> anyhow::Result<Summary> {
    let url = Url::parse(&config.url)?;
    let accession = accession_of(&url);
    let prefix = config.prefix.clone().unwrap_or_else(|| accession.clone());

    let format = match config.output_format {
        OutputFormat::Cram => Format::Cram,
        _ => Format::Bam,
    };

    let timeout = config.request_timeout();
    let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
    let tickets = TicketClient::new(client.clone(), timeout);

    let range = config.genomic_range()?;
    let params = TicketRequest {
        format: Some(format),
        reference_name: range.as_ref().map(|range| range.name.clone()),
        start: range.as_ref().and_then(|range| range.start),
        end: range.as_ref().and_then(|range| range.end),
        ..TicketRequest::default()
    };
    let ticket = tickets.request(&url, &params).await?;

    let path = format!("{prefix}.{}", format.file_extension());
    let file = tokio::fs::File::create(&path).await?;
    let byte_count = FetchPipeline::download_urls_once(client, ticket.urls, file, timeout).await?;

    tracing::info!(bytes = byte_count, path = %path, "raw dump complete");
    Ok(Summary {
        accession,
        files: vec![path],
        read_count: None,
        byte_count: Some(byte_count),
    })
}

/// Stream decoded records through the protocol into FASTQ or SAM files.
async fn dump_records(config: &Config) -> anyhow::Result<Summary> {
    let reference = config.genome_reference()?;
    let range = config.genomic_range()?;
    if range.is_some() && reference.is_none() {
        anyhow::bail!("--region requires --reference for window generation");
    }

    let mut builder = HtsgetProtocol::builder(&config.url).timeout(config.request_timeout());

    if let Some(reference) = &reference {
        let mut batcher =
            CoordinateBatcher::new(reference.clone()).window_size(config.window_size);
        if let Some(range) = &range {
            batcher = batcher.chromosomes(vec![range.name.clone()]);
            if let Some(start) = range.start {
                batcher = batcher.chromosome_starts(ChromosomeBound::Uniform(start));
            }
            if let Some(end) = range.end {
                batcher = batcher.chromosome_stops(ChromosomeBound::Uniform(end));
            }
        }
        builder = builder
            .reference(reference.clone())
            .windows(batcher.windows()?);
    }

    let mut protocol = builder.build()?;
    protocol.start()?;

    // Always run the cleanup path, then surface the first error.
    let streamed = stream_records(config, &mut protocol).await;
    let finished = protocol.finish().await;
    let files = streamed?;
    finished?;

    tracing::info!(reads = protocol.read_count(), "record dump complete");
    Ok(Summary {
        accession: protocol.accession().to_string(),
        files,
        read_count: Some(protocol.read_count()),
        byte_count: None,
    })
}

enum RecordSink {
    Fastq(FastqOutput),
    Sam(SamOutput),
}

async fn stream_records(
    config: &Config,
    protocol: &mut HtsgetProtocol,
) -> anyhow::Result<Vec<String>> {
    let prefix = config
        .prefix
        .clone()
        .unwrap_or_else(|| protocol.accession().to_string());
    let compress = !config.nocompression;

    let mut sink = match config.output_format {
        OutputFormat::Sam => {
            let header = protocol.headers().await?.clone();
            Some(RecordSink::Sam(SamOutput::create(&prefix, &header)?))
        }
        _ => None,
    };

    let mut written = 0u64;
    while let Some(item) = protocol.next_item().await? {
        if sink.is_none() {
            // FASTQ layout depends on pairing, known once the first
            // emission arrives.
            let paired = protocol.pairing() == Pairing::Paired;
            sink = Some(RecordSink::Fastq(FastqOutput::create(
                &prefix,
                paired,
                config.interleaved,
                compress,
            )?));
        }

        match &mut sink {
            Some(RecordSink::Fastq(out)) => out.write_item(&item)?,
            Some(RecordSink::Sam(out)) => out.write_item(&item)?,
            None => {}
        }

        written += item.read_count();
        if config.max_reads.is_some_and(|max| written >= max) {
            tracing::info!(reads = written, "reached max reads");
            break;
        }
    }

    let files = match sink {
        // Empty stream in FASTQ mode still produces the single-end file.
        None => FastqOutput::create(&prefix, false, config.interleaved, compress)?.finish()?,
        Some(RecordSink::Fastq(out)) => out.finish()?,
        Some(RecordSink::Sam(out)) => vec![out.finish()?],
    };

    Ok(files
        .into_iter()
        .map(|path| path.display().to_string())
        .collect())
}
