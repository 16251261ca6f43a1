//! Pipeline binary: read JSONL metrics from a file or stdin, run the
//! full pipeline, and write `spans.jsonl` / `bins.jsonl`.

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use spanstream::spanstream::server::shutdown::shutdown_signal;
use spanstream::{JsonlWriter, Metric, Pipeline, PipelineConfig, ThresholdClassifier};

#[derive(Parser)]
#[command(
    name = "spanstream",
    about = "Assemble anomalous tumbling windows into spans and time bins"
)]
struct Args {
    /// Path to the YAML pipeline configuration.
    #[arg(short, long)]
    config: PathBuf,

    /// JSONL metric input; reads stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory receiving spans.jsonl and bins.jsonl.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PipelineConfig::from_yaml_file(&args.config)?;
    let classifier = Arc::new(ThresholdClassifier::new(config.classifier.threshold));
    let pipeline = Pipeline::new(&config, classifier)?;

    let (metric_tx, metric_rx) = mpsc::channel(1);
    let mut handle = pipeline.run(metric_rx);

    let mut span_writer = JsonlWriter::create(args.out_dir.join("spans.jsonl"))?;
    let mut bin_writer = JsonlWriter::create(args.out_dir.join("bins.jsonl"))?;

    let assembler = handle.assembler.clone();
    let input = args.input.clone();
    tokio::spawn(async move {
        let reader: Box<dyn AsyncRead + Send + Unpin> = match &input {
            Some(path) => match tokio::fs::File::open(path).await {
                Ok(file) => Box::new(file),
                Err(err) => {
                    error!("cannot open input {}: {}", path.display(), err);
                    return;
                }
            },
            None => Box::new(tokio::io::stdin()),
        };
        let mut lines = BufReader::new(reader).lines();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        let mut read = 0u64;
        let mut skipped = 0u64;
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Metric>(&line) {
                            Ok(metric) => {
                                read += 1;
                                if metric_tx.send(metric).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                // Drop the single bad record, keep the stream.
                                skipped += 1;
                                warn!("skipping malformed metric line: {}", err);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        error!("metric input read failed: {}", err);
                        break;
                    }
                },
                signal = &mut shutdown => {
                    info!("{}: closing the metric stream", signal);
                    if signal.wants_dump() {
                        assembler.log_open_spans().await;
                    }
                    break;
                }
            }
        }
        info!("metric input finished: {} read, {} skipped", read, skipped);
        // Dropping the sender here starts the drain cascade.
    });

    let mut span_count = 0u64;
    let mut bin_count = 0u64;
    let mut spans_done = false;
    let mut bins_done = false;
    while !(spans_done && bins_done) {
        tokio::select! {
            span = handle.spans.recv(), if !spans_done => match span {
                Some(span) => {
                    span_count += 1;
                    span_writer.append(&span)?;
                }
                None => spans_done = true,
            },
            bin = handle.bins.recv(), if !bins_done => match bin {
                Some(bin) => {
                    bin_count += 1;
                    bin_writer.append(&bin)?;
                }
                None => bins_done = true,
            },
        }
    }

    span_writer.flush()?;
    bin_writer.flush()?;
    info!(
        "pipeline complete: {} span(s), {} bin snapshot(s)",
        span_count, bin_count
    );
    Ok(())
}
