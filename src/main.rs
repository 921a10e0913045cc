//! MinerHub CORE maintenance CLI.
//!
//! Offline commands over the configured root directory:
//! - `catalog` - installed packages cross-referenced with the bundled catalog
//! - `retain` - prune old binary versions
//! - `profits` - cached paying rates
//! - `config show|validate` - effective configuration

use std::process::ExitCode;

use minerhub_core::cli::{catalog_cmd, config_cmd, flag_value, has_flag, profits_cmd};
use minerhub_core::telemetry::{init_logging, LogConfig};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    if let Err(e) = init_logging(&LogConfig::from_env()) {
        eprintln!("Logging disabled: {}", e);
    }

    match command {
        "catalog" => {
            let code = catalog_cmd::run_list(has_flag(&args, "--json"));
            ExitCode::from(code as u8)
        }
        "retain" => {
            let keep = match flag_value(&args, "--keep").map(str::parse::<usize>) {
                None => None,
                Some(Ok(keep)) => Some(keep),
                Some(Err(_)) => {
                    eprintln!("--keep expects a positive number");
                    return ExitCode::from(2u8);
                }
            };
            let code = catalog_cmd::run_retain(keep);
            ExitCode::from(code as u8)
        }
        "profits" => {
            let stable = if has_flag(&args, "--stable") {
                Some(true)
            } else if has_flag(&args, "--unstable") {
                Some(false)
            } else {
                None
            };
            let code = profits_cmd::run_show(stable, has_flag(&args, "--json"));
            ExitCode::from(code as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => ExitCode::from(config_cmd::run_show(has_flag(&args, "--json")) as u8),
                "validate" => ExitCode::from(config_cmd::run_validate() as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("minerhub-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "minerhub-core - miner plugin package maintenance v{}

USAGE:
    minerhub-core-cli <COMMAND> [OPTIONS]

COMMANDS:
    catalog      List installed packages against the bundled catalog
    retain       Remove old miner binary versions
    profits      Show cached paying rates per algorithm
    config       Show or validate configuration
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    MINERHUB_ROOT        Base directory (default: .)
    MINERHUB_LOG         Log filter (falls back to RUST_LOG)
    MINERHUB_LOG_FORMAT  json (default) or pretty

EXIT CODES:
    0  Success
    1  Failure
    2  Configuration or usage error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "catalog" => eprintln!(
            "minerhub-core-cli catalog - Cross-reference installed packages

USAGE:
    minerhub-core-cli catalog [--json]

DESCRIPTION:
    Reads plugins/ and plugins_packages/update.json and prints every package
    with its local and online version. Packages with a newer online version
    come first.
"
        ),
        "retain" => eprintln!(
            "minerhub-core-cli retain - Prune old binary versions

USAGE:
    minerhub-core-cli retain [--keep N]

DESCRIPTION:
    Keeps the N newest bins/<major.minor> directories of every package
    (default: MINERHUB_RETAIN_VERSIONS). Directories that are not version
    numbers are left alone.
"
        ),
        "profits" => eprintln!(
            "minerhub-core-cli profits - Show paying rates

USAGE:
    minerhub-core-cli profits [--stable | --unstable] [--json]
"
        ),
        "config" => eprintln!(
            "minerhub-core-cli config - Configuration

USAGE:
    minerhub-core-cli config show [--json]
    minerhub-core-cli config validate
"
        ),
        _ => print_usage(),
    }
}
