use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use ts_downloader::{download_video, file, logging, DownloadClient, DownloadTarget, Options, RetryPolicy, SessionOutcome};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[clap(subcommand)]
    subcmd: SubCmd,

    #[clap(short, long, default_value = "20", value_parser = clap::value_parser!(u64).range(1..))]
    /// set the number of byte ranges a video is split into; leftover segment
    /// files from a run with a different value are discarded, not resumed
    segments: u64,

    #[clap(short, long)]
    /// set the maximum number of ranges fetched at once (default: all)
    parallel: Option<usize>,

    #[clap(short, long)]
    /// give up on a range after this many failed attempts (default: never)
    retries: Option<u32>,

    #[clap(long, default_value = "500")]
    /// initial delay between attempts in milliseconds, doubled on each retry
    retry_delay_ms: u64,

    #[clap(long, default_value = "30")]
    /// connect and stall timeout in seconds
    timeout: u64,

    #[clap(long)]
    /// do not draw a progress bar
    no_progress: bool,

    #[clap(short, long)]
    /// log debug output
    verbose: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about)]
enum SubCmd {
    /// Download every entry of a json file
    File {
        #[clap(default_value = "download.json")]
        /// a json array of {"url", "keyUrl", "output"} objects
        file: PathBuf,
    },
    /// Download a single video
    Download {
        #[clap(value_parser = url_parser)]
        /// url of the encrypted video
        url: String,

        #[clap(value_parser = url_parser)]
        /// url serving the decryption key
        key_url: String,

        /// output file name
        output: PathBuf,
    },
}

fn url_parser(url: &str) -> Result<String, String> {
    if url.starts_with("http") {
        Ok(url.to_string())
    } else {
        Err("URL must start with http or https".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    logging::init(args.verbose);

    let mut retry = RetryPolicy {
        base_delay: Duration::from_millis(args.retry_delay_ms),
        ..RetryPolicy::default()
    };
    if let Some(retries) = args.retries {
        retry = retry.with_max_attempts(retries);
    }

    let options = Options {
        segment_count: args.segments as usize,
        max_parallel_downloads: args.parallel,
        retry,
        timeout: Duration::from_secs(args.timeout),
        show_progress: !args.no_progress,
    };

    info!(?options, "starting");

    let client = Arc::new(DownloadClient::new(&options)?);

    match args.subcmd {
        SubCmd::File { file } => {
            let summary = file::download_file(client, &file, &options).await?;
            if summary.failed > 0 {
                return Err(format!("{} of the downloads failed", summary.failed).into());
            }
        }
        SubCmd::Download { url, key_url, output } => {
            let target = DownloadTarget::parse(&url, &key_url, output)?;
            match download_video(client, &target, &options).await {
                Ok(SessionOutcome::Completed { bytes }) => {
                    info!(output = %target.destination.display(), bytes, "finished downloading");
                }
                Ok(SessionOutcome::Skipped) => {}
                Err(err) => {
                    error!("error downloading {}: {}", url, err);
                    return Err(Box::new(err) as Box<dyn std::error::Error>);
                }
            }
        }
    }

    Ok(())
}
