//! Demo driver: loads the client, the key server and three compute nodes,
//! then calls the client once.

mod cli;
mod logger;

use crate::cli::{CliError, Command, CompartmentPaths};
use crate::logger::StderrLogger;
use cm_abi::CompartmentId;
use cm_manager::{
    CompartmentManager, COMPARTMENT_MEMORY_RANGE_LENGTH, ManagerConfig, ManagerError,
};
use log::{error, info};
use std::error::Error;
use std::ffi::OsString;
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = StderrLogger::from_env().init() {
        eprintln!("failed to install logger: {e}");
    }

    let args: Vec<OsString> = std::env::args_os().collect();
    match cli::parse(&args) {
        Ok(Command::Help(usage)) => {
            print!("{usage}");
            ExitCode::SUCCESS
        }
        Ok(Command::Run(paths)) => match run(&paths) {
            Ok(result) => {
                info!("client returned {result:#x}");
                println!("compartment demo completed");
                ExitCode::SUCCESS
            }
            Err(e) => {
                report(&e);
                ExitCode::FAILURE
            }
        },
        Err(e @ CliError::Usage { .. }) => {
            if let Some(source) = e.source() {
                eprintln!("{source}");
            }
            print!("{e}");
            ExitCode::FAILURE
        }
        Err(e @ CliError::Missing(_)) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(paths: &CompartmentPaths) -> Result<u64, ManagerError> {
    let mut manager = CompartmentManager::initialize(ManagerConfig::default())?;
    info!("ambient ceiling at {:#x}", manager.ambient_ceiling());

    let compartments: [(CompartmentId, &Path); 5] = [
        (CompartmentId::CLIENT, &paths.client),
        (CompartmentId::SERVER, &paths.server),
        (CompartmentId::COMPUTE_NODE_A, &paths.compute_node_a),
        (CompartmentId::COMPUTE_NODE_B, &paths.compute_node_b),
        (CompartmentId::COMPUTE_NODE_C, &paths.compute_node_c),
    ];
    for (id, path) in compartments {
        manager.add_compartment(id, path, &[] as &[&str], COMPARTMENT_MEMORY_RANGE_LENGTH)?;
        info!("compartment {id} ready: {}", path.display());
    }

    manager.call(CompartmentId::CLIENT, &[])
}

fn report(e: &ManagerError) {
    error!("{}: {e}", e.class());
    let mut source = e.source();
    while let Some(cause) = source {
        error!("  caused by: {cause}");
        source = cause.source();
    }
}
