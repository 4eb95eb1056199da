//! `tpuprof` command-line entry point.

mod cli_logger;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use cli_logger::{CliLogger, ParseOutcome};
use tpuprof::{
    Config, IdRangeConvention, LmemCommand, ProfileCommand, assemble_run, export_csv,
    lmem_command, profile_command, schema_doc, write_result_json,
};

#[derive(Debug, Parser)]
#[command(name = "tpuprof", version, about = "TPU compiler log and profile parser")]
struct Cli {
    /// Emit machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    no_color: bool,
    #[arg(long, global = true, default_value = "tpuprof.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a run folder into result.json (and core_<n>.csv)
    Parse {
        #[arg(value_name = "FOLDER")]
        folder: PathBuf,
        #[arg(short, long, value_name = "OUT_DIR")]
        output: PathBuf,
        /// Op-graph id-range numbering; overrides the config file.
        #[arg(long)]
        id_range: Option<IdRangeConvention>,
        #[arg(long)]
        no_csv: bool,
    },
    /// Inspect LMEM allocations of a single log
    #[command(subcommand)]
    Lmem(LmemCommand),
    /// Inspect a single compiler_profile file
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// Describe the result record
    Schema,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .init();

    let logger = CliLogger::new(cli.json, cli.no_color);
    match run(&cli, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, logger: &CliLogger) -> anyhow::Result<()> {
    let mut config = Config::load_optional(&cli.config);
    match &cli.command {
        Command::Parse {
            folder,
            output,
            id_range,
            no_csv,
        } => {
            if let Some(id_range) = id_range {
                config.id_range = *id_range;
            }
            if *no_csv {
                config.csv = false;
            }
            let result = assemble_run(folder, &config)
                .with_context(|| format!("parsing {}", folder.display()))?;
            if !result.valid.lmem && !result.valid.timestep && !result.valid.profile {
                logger.print_warning(&format!("nothing parsed from {}", folder.display()));
            }
            let result_path = write_result_json(&result, output)?;
            let csv_paths = if config.csv {
                export_csv(&result, output)?
            } else {
                Vec::new()
            };
            logger.print_parse_outcome(&ParseOutcome {
                result_path,
                csv_paths,
                result: &result,
            })
        }
        Command::Lmem(command) => logger.print_serialized(&lmem_command(&config, command)?),
        Command::Profile(command) => logger.print_serialized(&profile_command(&config, command)?),
        Command::Schema => logger.print_serialized(&schema_doc()),
    }
}
