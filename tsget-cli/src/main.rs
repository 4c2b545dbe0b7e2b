mod cli;
mod error;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use url::Url;

use crate::cli::{Args, parse_header};
use crate::error::{AppError, Result};
use tsget_engine::{
    DownloadRequest, HttpConfig, RetrievalStrategy, RetrieverConfig, SegmentTemplate,
    TemplateRequest, ToolPaths, naming,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = init_logging(args.verbose, args.quiet) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("download failed: {e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let http = HttpConfig {
        user_agent: args.user_agent.clone(),
        referer: args.referer.clone(),
        extra: args.headers.iter().filter_map(|h| parse_header(h)).collect(),
        timeout: Duration::from_secs(args.timeout),
    };
    let retriever = RetrieverConfig {
        concurrency: args.concurrency,
        max_retries: args.retries,
        ..Default::default()
    };

    let mut tools = ToolPaths::detect();
    if args.no_ytdlp {
        tools.ytdlp = None;
    }
    if args.no_ffmpeg {
        tools.ffmpeg = None;
    }

    let strategy = RetrievalStrategy::new(http, retriever, tools);

    let outcome = if let Some(raw) = &args.template {
        let template = SegmentTemplate::parse(raw)?;
        let request = TemplateRequest {
            template,
            start: args.start,
            end: args.end,
            output_ts: args
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from("output.ts")),
            mp4_output: args.mp4.clone(),
            keep_temp: args.keep_temp,
        };
        strategy.run_template(&request).await?
    } else {
        let Some(raw) = &args.m3u8 else {
            return Err(AppError::InvalidInput(
                "either --m3u8 or --template is required".to_string(),
            ));
        };
        let manifest_url = Url::parse(raw)
            .map_err(|e| AppError::InvalidInput(format!("invalid m3u8 URL `{raw}`: {e}")))?;
        let output_ts = args.output.clone().unwrap_or_else(|| {
            let base =
                naming::derive_basename(&manifest_url).unwrap_or_else(|| "output".to_string());
            PathBuf::from(format!("{base}.ts"))
        });
        let request = DownloadRequest {
            manifest_url,
            output_ts,
            mp4_output: args.mp4.clone(),
            keep_temp: args.keep_temp,
        };
        strategy.run(&request).await?
    };

    if let Some(summary) = &outcome.summary {
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            total_bytes = summary.total_bytes,
            "segment retrieval summary"
        );
    }
    info!(output = %outcome.output.display(), "download complete");
    println!("Saved to {}", outcome.output.display());
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
    Ok(())
}
