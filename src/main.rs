use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;

use zoneops::config::Config;
use zoneops::model::ZoneKind;
use zoneops::orchestration::{ClientUpdater, OperationRequest, Orchestrator, SyncMode};
use zoneops::placement::{PlacementEngine, PlacementRequest};
use zoneops::selection::{self, SelectionCriteria};
use zoneops::store::{DataAccess, InventoryStore};
use zoneops::stream::EventReceiver;
use zoneops::{olog, Result};

/// zoneops - game-server fleet operations
#[derive(Parser, Debug)]
#[command(name = "zoneops")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    ZONEOPS_DEBUG=1       Enable debug logging (alternative to --debug)\n    ZONEOPS_SVN_USER      Artifact checkout user\n    ZONEOPS_SVN_PASS      Artifact checkout password\n    ZONEOPS_SVN_URL       Artifact repository url\n    ZONEOPS_CLIENT_HOST   Client update host")]
pub struct Cli {
    /// Config file (defaults to ~/.zoneops/zoneops.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run an operation on the active zones and print its event stream
    Run {
        /// status, stop, start, update, battle, reload, rsync or deploy
        operation: String,

        /// Package to push for rsync
        #[arg(long)]
        sync_mode: Option<SyncMode>,
    },

    /// Replace the active zones
    Select {
        /// Channel filter, repeatable
        #[arg(long = "channel")]
        channels: Vec<String>,

        /// Zone kind filter, repeatable
        #[arg(long = "kind")]
        kinds: Vec<ZoneKind>,

        /// Zone spec such as 1,3,4_5
        #[arg(long)]
        zones: Option<String>,

        /// Selection mode; reload skips the reserved zone
        #[arg(long)]
        mode: Option<SyncMode>,
    },

    /// Allocate new zones onto hosts
    Place {
        #[arg(long)]
        channel: String,

        #[arg(long)]
        kind: ZoneKind,

        #[arg(long)]
        count: u32,

        /// Highest existing zone number (looked up when omitted)
        #[arg(long)]
        max_zone: Option<u32>,
    },

    /// Run a client update command on the client host
    ClientUpdate {
        target: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    zoneops::log::init(&config.log_dir()?, config.log_retention, cli.debug);
    if cli.debug {
        olog!("zoneops starting (debug mode enabled)");
    } else {
        olog!("zoneops starting");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(dispatch(cli.command, config))
}

async fn dispatch(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Run {
            operation,
            sync_mode,
        } => {
            let store = open_store(&config)?;
            let orchestrator = Orchestrator::from_config(&config, store)?;
            let mut request = OperationRequest::new(operation);
            request.sync_mode = sync_mode;
            print_frames(orchestrator.run(request)).await
        }
        Command::Select {
            channels,
            kinds,
            zones,
            mode,
        } => {
            let store = open_store(&config)?;
            let criteria = SelectionCriteria {
                channels,
                kinds,
                zones,
                mode,
            };
            let manifest = selection::select(store.as_ref(), &criteria).await?;
            if manifest.is_empty() {
                println!("no zones matched; active zones left unchanged");
            } else {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            }
            Ok(())
        }
        Command::Place {
            channel,
            kind,
            count,
            max_zone,
        } => {
            let engine = PlacementEngine::new(open_store(&config)?);
            let outcome = engine
                .place(&PlacementRequest {
                    channel,
                    kind,
                    count,
                    max_zone,
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::ClientUpdate { target } => {
            print_frames(ClientUpdater::from_config(&config).run(&target)).await
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn DataAccess>> {
    Ok(Arc::new(InventoryStore::open(&config.inventory_path()?)?))
}

/// Write every frame to stdout as it arrives.
async fn print_frames(events: EventReceiver) -> Result<()> {
    let mut frames = Box::pin(events.into_frames());
    let mut out = std::io::stdout();
    while let Some(frame) = frames.next().await {
        out.write_all(frame.as_bytes())?;
        out.flush()?;
    }
    Ok(())
}
