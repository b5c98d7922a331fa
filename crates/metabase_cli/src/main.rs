use anyhow::{bail, Context, Result as AnyhowResult};
use clap::Parser;
use metabase_client::MetabaseClient;
use metabase_logging::logging::{parse_level, setup_logging};
use metabase_settings::config::{MetabaseConfig, RetrySettings};
use metabase_types::{new_category_filter, Filter, Format};
use metabase_utils::json::infer_fields;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "metabase-card")]
#[command(about = "Exports the result of a public metabase card", long_about = None)]
struct Cli {
    /// Public uuid of the card
    uuid: String,

    /// Export format: json, csv or xlsx
    #[arg(short, long, default_value = "json")]
    format: String,

    /// Template tag filter as tag=value, may be repeated
    #[arg(long = "filter", value_name = "TAG=VALUE", value_parser = parse_filter)]
    filters: Vec<Filter>,

    /// Metabase base url, overrides METABASE_URL
    #[arg(long)]
    base_url: Option<String>,

    /// Request timeout in seconds, overrides METABASE_TIMEOUT_SECS
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Total attempts, overrides METABASE_RETRY_ATTEMPTS
    #[arg(long)]
    attempts: Option<usize>,

    /// Delay between attempts in milliseconds, overrides METABASE_RETRY_DELAY_MS
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Write the export to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the field names of a json export instead of the export itself
    #[arg(long)]
    infer_fields: bool,
}

fn parse_filter(raw: &str) -> Result<Filter, String> {
    match raw.split_once('=') {
        Some((tag, value)) if !tag.trim().is_empty() => {
            Ok(new_category_filter(tag.trim(), value))
        }
        _ => Err(format!("expected TAG=VALUE, got '{}'", raw)),
    }
}

fn apply_overrides(cli: &Cli, config: &mut MetabaseConfig) {
    if let Some(base_url) = &cli.base_url {
        config.metabase_url = base_url.clone();
    }
    if let Some(timeout) = cli.timeout_secs {
        config.timeout_secs = timeout;
    }
    if let Some(attempts) = cli.attempts {
        config.retry_attempts = attempts;
    }
    if let Some(delay) = cli.delay_ms {
        config.retry_delay_ms = delay;
    }
}

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    let mut config = MetabaseConfig::new();
    apply_overrides(&cli, &mut config);

    setup_logging(parse_level(config.log_level())).context("Failed to setup logging")?;

    let format: Format = cli.format.parse()?;
    if cli.infer_fields && format != Format::Json {
        bail!("--infer-fields requires the json format, got {}", format);
    }

    let retry = config.retry_settings();
    let retry = RetrySettings::new(retry.max_attempts, retry.delay)
        .context("Invalid retry settings")?;

    let client = MetabaseClient::from_settings(&config.client_settings())
        .context("Failed to create metabase client")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling card request");
            ctrl_c.cancel();
        }
    });

    info!(
        uuid = %cli.uuid,
        format = %format,
        filters = cli.filters.len(),
        attempts = retry.max_attempts,
        delay_ms = retry.delay.as_millis() as u64,
        "Fetching public card"
    );

    let body = client
        .card_query_with_retry(&cancel, &cli.uuid, format, &cli.filters, &retry)
        .await
        .with_context(|| format!("Failed to fetch card {}", cli.uuid))?;

    if cli.infer_fields {
        let fields = infer_fields(&body).context("Failed to infer fields from export")?;
        for field in fields {
            println!("{}", field);
        }
        return Ok(());
    }

    match &cli.output {
        Some(path) => {
            tokio::fs::write(path, &body)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), bytes = body.len(), "Export written");
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&body).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}
