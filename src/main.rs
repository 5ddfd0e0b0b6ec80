mod cli;
mod client;
mod commands;
mod config;
mod controller;
mod error;
mod presentation;
mod retrieval;
mod state;
mod utils;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::cli::RetrieveMode;
use crate::config::ClientConfig;
use crate::state::{CropInput, DownloadRequest};

#[derive(Parser, Debug)]
#[command(author, version, about = "Submit media URLs to a local extraction service and fetch the result", long_about = None)]
struct Args {
    /// Media URL to extract (if provided, tasks-file is ignored)
    #[arg(index = 1)]
    url: Option<String>,

    /// Trim start timecode, e.g. 00:01:30
    #[arg(long)]
    start: Option<String>,

    /// Trim end timecode, e.g. 00:02:00
    #[arg(long)]
    end: Option<String>,

    /// Crop rectangle as WxH or WxH+X+Y
    #[arg(long)]
    crop: Option<CropInput>,

    /// Crop width in pixels (needs --crop-height)
    #[arg(long)]
    crop_width: Option<u32>,

    /// Crop height in pixels (needs --crop-width)
    #[arg(long)]
    crop_height: Option<u32>,

    /// Crop X offset (default 0)
    #[arg(long)]
    crop_x: Option<u32>,

    /// Crop Y offset (default 0)
    #[arg(long)]
    crop_y: Option<u32>,

    /// File with one job per line: url[|start|end|WxH+X+Y]
    #[arg(short = 't', long = "tasks-file")]
    tasks_file: Option<PathBuf>,

    /// Directory to save artifacts into
    #[arg(short = 'd', long = "download-dir")]
    download_dir: Option<PathBuf>,

    /// What to do with a finished artifact
    #[arg(long = "retrieve", value_enum, default_value = "save")]
    retrieve: RetrieveMode,

    /// Rate limit in bytes per second while saving (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    rate_limit: Option<u32>,

    /// Print the status of an existing task and exit
    #[arg(long, value_name = "TASK_ID", conflicts_with = "fetch")]
    status: Option<String>,

    /// Retrieve the artifact of an already completed task and exit
    #[arg(long, value_name = "TASK_ID")]
    fetch: Option<String>,

    /// Base address of the service API
    #[arg(long)]
    base_url: Option<String>,

    /// Delay between status polls in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Give up after this many consecutive failed polls (default: never)
    #[arg(long)]
    max_poll_failures: Option<u32>,

    /// JSON config file; flags override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG wins
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .context(format!("Failed to load config file: {:?}", path))?,
            None => ClientConfig::default(),
        };

        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval_ms = interval;
        }
        if self.max_poll_failures.is_some() {
            config.max_poll_failures = self.max_poll_failures;
        }
        if let Some(dir) = &self.download_dir {
            config.download_dir = dir.clone();
        }
        if self.rate_limit.is_some() {
            config.rate_limit = self.rate_limit;
        }

        // Output dir might not exist yet, so we resolve it relative to current dir
        if config.download_dir.is_relative() {
            if let Ok(cwd) = std::env::current_dir() {
                config.download_dir = cwd.join(&config.download_dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// `--crop` first, then the individual flags on top of it.
    fn crop_input(&self) -> CropInput {
        let base = self.crop.unwrap_or_default();
        CropInput {
            width: self.crop_width.or(base.width),
            height: self.crop_height.or(base.height),
            x: self.crop_x.or(base.x),
            y: self.crop_y.or(base.y),
        }
    }

    fn download_request(&self, url: &str) -> Result<DownloadRequest> {
        let request = DownloadRequest::new(url)?
            .with_trim(self.start.clone(), self.end.clone())
            .with_crop(self.crop_input());
        Ok(request)
    }
}

fn init_tracing(verbosity: u8) {
    let fallback_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.client_config()?;
    tracing::debug!(?config, "configuration resolved");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if let Some(task_id) = args.status.clone() {
            return crate::commands::show_status(config, task_id).await;
        }
        if let Some(task_id) = args.fetch.clone() {
            return crate::commands::fetch_artifact(config, task_id, args.retrieve).await;
        }

        if let Some(url) = &args.url {
            let request = args.download_request(url)?;
            crate::commands::run_single_download(config, request, args.retrieve).await
        } else if let Some(tasks_file) = args.tasks_file.clone() {
            crate::commands::run_downloads(tasks_file, config, args.retrieve).await
        } else {
            anyhow::bail!("Nothing to do: pass a URL, --tasks-file, --status or --fetch")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Crop;

    #[test]
    fn test_individual_crop_flags_override_crop_string() {
        let args = Args::parse_from([
            "extract-client",
            "https://x.test/v",
            "--crop",
            "640x360+8+8",
            "--crop-x",
            "0",
        ]);
        let request = args.download_request("https://x.test/v").unwrap();
        assert_eq!(
            request.crop(),
            Some(Crop { width: 640, height: 360, x: 0, y: 8 })
        );
    }

    #[test]
    fn test_width_flag_alone_sends_no_crop() {
        let args = Args::parse_from(["extract-client", "https://x.test/v", "--crop-width", "640"]);
        let request = args.download_request("https://x.test/v").unwrap();
        assert_eq!(request.crop(), None);
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "extract-client",
            "--base-url",
            "http://localhost:9000/api",
            "--poll-interval-ms",
            "250",
            "--max-poll-failures",
            "4",
            "-d",
            "/tmp/out",
        ]);
        let config = args.client_config().unwrap();
        assert_eq!(config.base_url, "http://localhost:9000/api");
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_poll_failures, Some(4));
        assert_eq!(config.download_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let args = Args::parse_from(["extract-client", "--poll-interval-ms", "0"]);
        assert!(args.client_config().is_err());
    }
}
