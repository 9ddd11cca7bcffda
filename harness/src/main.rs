use anyhow::Context;
use clap::{Parser, Subcommand};
use review_harness::api::ServerClient;
use review_harness::compose::DockerCompose;
use review_harness::config::HarnessConfig;
use review_harness::logging;
use review_harness::scenarios::{self, Scenario};
use review_harness::services::{IpFamily, KeaService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "review-harness")]
#[command(about = "Configuration review verification harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/review-harness/harness.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a configuration review scenario against the server
    Run {
        #[arg(short, long, value_enum)]
        scenario: Scenario,
    },
    /// Validate configuration
    Validate,
    /// Print the leases of a Kea service as JSON lines
    Leases {
        /// Compose service name
        #[arg(short, long)]
        service: String,
        /// IP family (4 or 6)
        #[arg(short, long, default_value_t = 4)]
        family: u8,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("review-harness {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let cfg = HarnessConfig::load(&cli.config)?;
    logging::init(&cfg.logging, cli.debug)?;

    match cli.command {
        Commands::Version => {}
        Commands::Validate => {
            println!("Configuration valid: {:?}", cli.config);
            println!("{:#?}", cfg);
        }
        Commands::Run { scenario } => {
            info!("Starting review-harness v{}", env!("CARGO_PKG_VERSION"));
            info!("Configuration loaded from {:?}", cli.config);

            let client = ServerClient::from_config(&cfg);
            let outcome = scenarios::run(&client, scenario)
                .await
                .with_context(|| format!("Scenario {} failed", scenario))?;
            for daemon in &outcome.daemons {
                println!(
                    "{} machine={} daemon={}({}) total={} flagged={:?}",
                    outcome.scenario,
                    daemon.machine_id,
                    daemon.daemon.name,
                    daemon.daemon.id,
                    daemon.reports.total,
                    daemon.reports.flagged_checkers()
                );
            }
        }
        Commands::Leases { service, family } => {
            let family = IpFamily::try_from(family)?;
            let kea = KeaService::new(Arc::new(DockerCompose::new(&cfg.compose)), service.clone());
            let rows = kea
                .read_lease_file(family)
                .await
                .with_context(|| format!("Failed to read leases{} from {}", family, service))?;
            for row in rows {
                println!("{}", serde_json::to_string(&row?)?);
            }
        }
    }

    Ok(())
}
