use std::{path::PathBuf, time::Duration};

use aa_registry::{
    refresh_period_from_minutes, source::FileMetadataSource, Credentials, Password,
    RegistryBuilder, RegistryConfig, Username,
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REFRESH_PERIOD_MINUTES, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use clap::Parser;
use color_eyre::eyre::{bail, eyre};
use tokio::time;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Opts {
    /// URL of the service-provider metadata document
    #[arg(
        short = 'u',
        long,
        env = "AA_METADATA_URL",
        required_unless_present = "metadata_file"
    )]
    metadata_url: Option<String>,

    /// Local metadata document to serve instead of a remote origin
    #[arg(
        short = 'f',
        long,
        env = "AA_METADATA_FILE",
        conflicts_with = "metadata_url"
    )]
    metadata_file: Option<PathBuf>,

    /// User name presented to the metadata origin
    #[arg(long, env = "AA_METADATA_USERNAME", required_unless_present = "metadata_file")]
    username: Option<Username>,

    /// Password presented to the metadata origin
    #[arg(
        long,
        env = "AA_METADATA_PASSWORD",
        hide_env_values = true,
        required_unless_present = "metadata_file"
    )]
    password: Option<Password>,

    /// Minutes between refresh cycles
    #[arg(short = 'p', long, env = "AA_REFRESH_PERIOD_MINUTES", default_value_t = DEFAULT_REFRESH_PERIOD_MINUTES)]
    refresh_period_minutes: u64,

    /// Seconds allowed for connecting to the metadata origin
    #[arg(long, env = "AA_CONNECT_TIMEOUT_SECS", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,

    /// Seconds allowed for a whole request to the metadata origin
    #[arg(long, env = "AA_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout_secs: u64,

    /// Seconds between registry summaries in the log
    #[arg(long, env = "AA_SUMMARY_INTERVAL_SECS", default_value_t = 60)]
    summary_interval_secs: u64,
}

impl Opts {
    fn registry_builder(self) -> color_eyre::Result<RegistryBuilder> {
        if let Some(path) = self.metadata_file {
            if self.refresh_period_minutes == 0 {
                bail!("refresh period must be at least one minute");
            }

            tracing::info!(path = %path.display(), "using local metadata document");
            let period = refresh_period_from_minutes(self.refresh_period_minutes);
            return Ok(RegistryBuilder::new(FileMetadataSource::new(path)).with_refresh_period(period));
        }

        let metadata_url = self
            .metadata_url
            .ok_or_else(|| eyre!("a metadata URL or file is required"))?;
        let credentials = Credentials {
            username: self
                .username
                .ok_or_else(|| eyre!("a user name is required for the metadata origin"))?,
            password: self
                .password
                .ok_or_else(|| eyre!("a password is required for the metadata origin"))?,
        };

        let mut config = RegistryConfig::new(metadata_url, credentials);
        config.refresh_period_minutes = self.refresh_period_minutes;
        config.connect_timeout_secs = self.connect_timeout_secs;
        config.request_timeout_secs = self.request_timeout_secs;

        tracing::info!(metadata.url = %config.metadata_url, "using remote metadata origin");
        Ok(RegistryBuilder::from_config(&config)?)
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let summary_interval = Duration::from_secs(opts.summary_interval_secs.max(1));

    let registry = opts.registry_builder()?.load().await?;
    let refresh = registry.spawn_refresh();

    let mut summary = time::interval(summary_interval);
    loop {
        tokio::select! {
            _ = summary.tick() => {
                let fetch_state = registry.fetch_state().await;
                tracing::info!(
                    registry.records = registry.len(),
                    registry.state = ?registry.state(),
                    last_success = ?fetch_state.last_success(),
                    consecutive_failures = fetch_state.consecutive_failures(),
                    "registry summary"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    tracing::info!("shutting down");
    refresh.shutdown().await;
    Ok(())
}
