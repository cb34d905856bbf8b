use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use drivelink_client::{
    common::{node_id::InvalidNodeIdError, EventMailbox, NodeId},
    config::ConfigError,
    open_socketcan, BringupConfig, BringupMachine, BringupOutcome, Dispatcher,
};
use snafu::{OptionExt as _, ResultExt as _, Snafu};

#[derive(Parser, Debug)]
#[command(about = "Bring a CANopen motor drive up from its bootloader")]
struct Args {
    /// The socketcan interface, e.g. can0
    socket: String,
    /// Path to a bring-up config TOML file
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Node ID of the drive, overriding the config file
    #[clap(long, short)]
    node_id: Option<u8>,
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("Error loading {}: {source}", path.display()))]
    LoadConfig { path: PathBuf, source: ConfigError },
    #[snafu(display("Either --config or --node-id is required"))]
    MissingNodeId,
    #[snafu(display("{source}"))]
    BadNodeId { source: InvalidNodeIdError },
}

fn load_config(args: &Args) -> Result<BringupConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => BringupConfig::load(path).context(LoadConfigSnafu { path })?,
        None => {
            let node_id = args.node_id.context(MissingNodeIdSnafu)?;
            BringupConfig::new(NodeId::new(node_id).context(BadNodeIdSnafu)?)
        }
    };
    if let Some(node_id) = args.node_id {
        config.node_id = NodeId::new(node_id).context(BadNodeIdSnafu)?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (tx, rx) = match open_socketcan(&args.socket) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("Error opening {}: {e:?}", args.socket);
            return ExitCode::FAILURE;
        }
    };
    // The bootloader replies are not tied to the node's COB-IDs, so accept everything
    if let Err(e) = rx.set_filter(0, 0) {
        log::warn!("Failed to set receive filter: {e:?}");
    }

    log::info!("Bringing up node {} on {}", config.node_id, args.socket);
    let mbox = Arc::new(EventMailbox::new(
        config.node_id,
        config.sdo_response_cob_id(),
    ));
    let (_dispatcher, sdo_rx) = Dispatcher::spawn(rx, mbox.clone());
    let mut machine = BringupMachine::new(config, mbox, tx, sdo_rx);

    match machine.run().await {
        BringupOutcome::Success => ExitCode::SUCCESS,
        BringupOutcome::Failed => ExitCode::FAILURE,
    }
}
