use clap::{ArgAction, Parser};
use std::ffi::OsString;
use std::fmt::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "compartment-manager", disable_help_flag = true)]
struct Args {
    #[arg(short = 'h', long = "help", action = ArgAction::SetTrue)]
    help: bool,
    /// Client compartment executable.
    client_path: Option<PathBuf>,
    /// Server compartment executable.
    server_path: Option<PathBuf>,
}

/// Executables of the five demo compartments.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CompartmentPaths {
    pub client: PathBuf,
    pub server: PathBuf,
    pub compute_node_a: PathBuf,
    pub compute_node_b: PathBuf,
    pub compute_node_c: PathBuf,
}

impl CompartmentPaths {
    /// The images shipped in `compartments/` next to the program.
    #[must_use]
    pub fn defaults(program: &Path) -> Self {
        let dir = program
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join("compartments");
        Self {
            client: dir.join("client_derive_secret_key"),
            server: dir.join("server"),
            compute_node_a: dir.join("compute_node_a"),
            compute_node_b: dir.join("compute_node_b"),
            compute_node_c: dir.join("compute_node_c"),
        }
    }
}

#[derive(Debug)]
pub enum Command {
    /// Print the usage text and exit successfully.
    Help(String),
    Run(CompartmentPaths),
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{usage}")]
    Usage {
        usage: String,
        #[source]
        source: clap::Error,
    },
    #[error("Error: {} does not exist", .0.display())]
    Missing(PathBuf),
}

/// Parses the full argument vector, program name included.
///
/// # Errors
/// Returns [`CliError::Usage`] for anything other than zero to two paths and
/// [`CliError::Missing`] for a path that does not exist. Default paths are
/// not checked here; loading reports them.
pub fn parse(args: &[OsString]) -> Result<Command, CliError> {
    let program = args
        .first()
        .map_or_else(|| PathBuf::from("compartment-manager"), PathBuf::from);
    let defaults = CompartmentPaths::defaults(&program);

    let parsed = Args::try_parse_from(args).map_err(|source| CliError::Usage {
        usage: usage(&program, &defaults),
        source,
    })?;

    if parsed.help {
        return Ok(Command::Help(usage(&program, &defaults)));
    }

    let mut paths = defaults;
    if let Some(server) = parsed.server_path {
        if !server.exists() {
            return Err(CliError::Missing(server));
        }
        paths.server = server;
    }
    if let Some(client) = parsed.client_path {
        if !client.exists() {
            return Err(CliError::Missing(client));
        }
        paths.client = client;
    }

    Ok(Command::Run(paths))
}

#[must_use]
pub fn usage(program: &Path, defaults: &CompartmentPaths) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Usage: {} [client_path [server_path]]", program.display());
    let _ = writeln!(text, "Default compartment paths (if not specified):");
    for (name, path) in [
        ("client_path", &defaults.client),
        ("server_path", &defaults.server),
        ("compute_node_a_path", &defaults.compute_node_a),
        ("compute_node_b_path", &defaults.compute_node_b),
        ("compute_node_c_path", &defaults.compute_node_c),
    ] {
        let _ = writeln!(text, "    {name}: {}", path.display());
    }
    text
}
