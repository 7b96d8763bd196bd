//! Zentinel URL Rewrite Agent CLI entry point.
//!
//! Validates configurations and rewrites response headers and bodies offline.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_agent_url_rewrite::{
    AgentConfig, BodyDecision, ResponseBodyChunkEvent, ResponseHandler, ResponseHeadersEvent,
    UrlRewriteAgent,
};

const CORRELATION_ID: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-url-rewrite")]
#[command(
    author,
    version,
    about = "Response URL rewriting agent for Zentinel"
)]
struct Args {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long, env = "URL_REWRITE_CONFIG")]
    config: Option<PathBuf>,

    /// Response header to rewrite, as "Name: value" (repeatable)
    #[arg(long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Response body file to rewrite ("-" for stdin)
    #[arg(long)]
    body: Option<PathBuf>,

    /// Read size used when streaming the body
    #[arg(long, default_value_t = 8192)]
    chunk_size: usize,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,
}

fn print_example_config() {
    let example = r#"# URL Rewrite Agent Configuration Example
version: "1"

settings:
  # Compile from_regex once instead of per rewrite
  cache_pattern: true
  # Enable debug header (X-Url-Rewrite)
  debug_headers: false

rewrite:
  # Rewrite URLs in response headers (Location, Link, ...)
  rewrite_response_headers: true
  # Rewrite URLs in the response body (buffers the whole body)
  rewrite_response_body: true
  # Backend URLs to match
  from_regex: "https?://[^/]*/((.*|/*))"
  # Public URL; {group[0]} is the first capture group,
  # named groups are available as {groupName['name']}
  to_replacement: "https://apis.example.io/{group[1]}"
"#;
    println!("{}", example);
}

fn load_config(path: &Path) -> Result<AgentConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML config: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON config: {}", path.display()))?
    };
    Ok(config)
}

fn parse_headers(lines: &[String]) -> Result<HashMap<String, Vec<String>>> {
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            bail!("Invalid header (expected \"Name: value\"): {line}");
        };
        headers
            .entry(name.trim().to_string())
            .or_default()
            .push(value.trim().to_string());
    }
    Ok(headers)
}

/// Stream `input` through the agent in `chunk_size` reads, writing what it forwards to stdout.
async fn rewrite_body<R>(agent: &UrlRewriteAgent, mut input: R, chunk_size: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut pending: Option<Bytes> = None;

    loop {
        let n = input
            .read(&mut buf)
            .await
            .context("Failed to read response body")?;
        let is_last = n == 0;
        let data = if is_last {
            pending.take().unwrap_or_default()
        } else {
            match pending.replace(Bytes::copy_from_slice(&buf[..n])) {
                Some(previous) => previous,
                None => continue,
            }
        };

        let event = ResponseBodyChunkEvent {
            correlation_id: CORRELATION_ID.to_string(),
            data,
            is_last,
        };
        match agent.on_response_body_chunk(event).await? {
            BodyDecision::Passthrough(chunk) | BodyDecision::Replaced(chunk) => {
                stdout.write_all(&chunk).await?;
            }
            BodyDecision::Buffered => {}
        }

        if is_last {
            break;
        }
    }

    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // Print example config if requested
    if args.example_config {
        print_example_config();
        return Ok(());
    }

    let Some(config_path) = &args.config else {
        bail!("No configuration given (use --config or URL_REWRITE_CONFIG)");
    };
    let config = load_config(config_path)?;

    let agent = UrlRewriteAgent::new(config).context("Invalid rewrite configuration")?;

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    if args.headers.is_empty() && args.body.is_none() {
        bail!("Nothing to rewrite (use --header and/or --body)");
    }

    let event = ResponseHeadersEvent {
        correlation_id: CORRELATION_ID.to_string(),
        status: 200,
        headers: parse_headers(&args.headers)?,
    };
    let decision = agent.on_response_headers(event).await?;

    if !args.headers.is_empty() {
        let sorted: BTreeMap<_, _> = decision.headers.into_iter().collect();
        for (name, values) in sorted {
            for value in values {
                println!("{name}: {value}");
            }
        }
        if args.body.is_some() {
            println!();
        }
    }

    if let Some(body) = &args.body {
        if body.as_os_str() == "-" {
            rewrite_body(&agent, tokio::io::stdin(), args.chunk_size).await?;
        } else {
            let file = tokio::fs::File::open(body)
                .await
                .with_context(|| format!("Failed to open body file: {}", body.display()))?;
            rewrite_body(&agent, file, args.chunk_size).await?;
        }
    } else {
        // No body to stream; release the body stage, if any.
        agent.on_response_complete(CORRELATION_ID).await?;
    }

    debug!(stats = ?agent.stats(), "Rewrite finished");
    Ok(())
}
