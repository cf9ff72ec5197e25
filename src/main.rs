//! Zentinel SOAP RPC adapter binary.
//!
//! Run with: `zentinel-soap-rpc --config config.yaml --request request.xml`
//!
//! Reads one SOAP request, dispatches it to the built-in demo operations and
//! prints the resulting HTTP response.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_soap_rpc::{
    BasicResponse, CallArguments, CallError, ReturnValue, SoapHttpRequest, SoapOperation,
    SoapPublisher, SoapRpcConfig, SoapValue,
};

/// SOAP RPC adapter for Zentinel proxy.
///
/// Parses a SOAP 1.1 or 1.2 request, invokes the named operation and writes
/// the SOAP response (or Fault, or auth challenge) to stdout.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Request body file, or "-" for stdin
    #[arg(short, long, default_value = "-")]
    request: String,

    /// Content-Type of the request
    #[arg(long, default_value = "text/xml; charset=utf-8")]
    content_type: String,

    /// SOAPAction header value
    #[arg(long)]
    soap_action: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Returns its first argument unchanged.
struct Echo;

#[async_trait]
impl SoapOperation for Echo {
    async fn invoke(&self, arguments: CallArguments) -> Result<ReturnValue, CallError> {
        Ok(ReturnValue::new(
            arguments.get(0).cloned().unwrap_or(SoapValue::Null),
        ))
    }
}

/// Sums integer arguments.
struct Add;

#[async_trait]
impl SoapOperation for Add {
    async fn invoke(&self, arguments: CallArguments) -> Result<ReturnValue, CallError> {
        let mut total = 0i64;
        for index in 0..arguments.len() {
            let value = arguments
                .get(index)
                .and_then(SoapValue::as_i64)
                .ok_or_else(|| {
                    CallError::tagged("TypeError", format!("argument {} is not an integer", index))
                })?;
            total = total
                .checked_add(value)
                .ok_or_else(|| CallError::tagged("OverflowError", "integer overflow"))?;
        }
        Ok(ReturnValue::new(total))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting Zentinel SOAP RPC adapter v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    // Load configuration
    let config: SoapRpcConfig = if args.config.exists() {
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        serde_yaml::from_str(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        SoapRpcConfig::default()
    };

    info!(
        max_body_size = config.settings.max_body_size,
        realm = ?config.auth.realm,
        registered_types = config.operations.types.len(),
        "Configuration loaded"
    );

    let body = if args.request == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read request from stdin")?;
        buf
    } else {
        tokio::fs::read(&args.request)
            .await
            .with_context(|| format!("Failed to read request file {}", args.request))?
    };

    let mut response = BasicResponse::new();
    response.set_realm(config.auth.realm.clone());

    let publisher = SoapPublisher::from_config(config)
        .register("Echo", Echo)
        .register("Add", Add);

    let mut request = SoapHttpRequest::new(args.content_type, body).with_correlation_id("cli");
    request.soap_action = args.soap_action;

    let response = publisher.publish(&request, response).await.into_inner();

    let mut out = String::new();
    out.push_str(&format!("HTTP/1.1 {}\r\n", response.status()));
    for (name, value) in response.headers() {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");

    let mut stdout = tokio::io::stdout();
    stdout.write_all(out.as_bytes()).await?;
    stdout.write_all(response.body_text().as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    Ok(())
}
