use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap_derive::{Parser, Subcommand};
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing::error;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::EnvFilter;

use crate::catalog::Catalog;
use crate::command::patch::RunSummary;
use crate::config::{default_catalog_dir, PatchConfig, Platform};
use crate::menu::Menu;

mod backup;
mod catalog;
mod command;
mod config;
mod error;
mod inventory;
mod io_ext;
mod menu;
mod read_ext;
mod unity;
mod writer;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Game installation directory (the one holding the executable)
    #[arg(short, long, global = true)]
    game_dir: Option<PathBuf>,

    /// Replacement catalog directory (defaults to CHT next to this tool)
    #[arg(short, long, global = true)]
    catalog: Option<PathBuf>,

    /// Override the detected platform layout
    #[arg(short, long, value_enum, global = true)]
    platform: Option<Platform>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Back up the game files and apply the patch
    Apply {
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Restore the backed up game files
    Restore,
    /// Show the installation and patch state
    Info,
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("[Error] {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    tracing_subscriber::fmt()
        .with_timer(OffsetTime::new(offset, Rfc3339))
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let platform = match args.platform {
        Some(platform) => platform,
        None => Platform::detect()?,
    };
    let game_dir = args.game_dir.unwrap_or_else(|| PathBuf::from("."));
    let catalog_dir = args.catalog.unwrap_or_else(default_catalog_dir);
    let config = PatchConfig::resolve(&game_dir, platform, catalog_dir)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match args.command {
        Some(Command::Restore) => {
            let summary = command::restore::restore(&config, &mut out)?;
            print_summary(&mut out, &summary)?;
        }
        Some(Command::Info) => {
            let catalog = match Catalog::load(&config.catalog_dir, config.aliases.clone()) {
                Ok(catalog) => Some(catalog),
                Err(e) => {
                    tracing::warn!("{}", e);
                    None
                }
            };
            command::info::info(&config, catalog.as_ref(), &mut out)?;
        }
        Some(Command::Apply { yes }) => {
            let catalog = Catalog::load(&config.catalog_dir, config.aliases.clone())?;
            if !yes && !confirm(&mut out)? {
                writeln!(out, "Cancelled.")?;
                return Ok(());
            }
            let summary = command::patch::apply(&config, &catalog, &mut out)?;
            print_summary(&mut out, &summary)?;
        }
        None => {
            let catalog = Catalog::load(&config.catalog_dir, config.aliases.clone())?;
            Menu::new(&config, &catalog, std::io::stdin().lock(), out).run()?;
        }
    }
    Ok(())
}

fn confirm(out: &mut impl Write) -> anyhow::Result<bool> {
    write!(out, "This will modify the game files. Continue? (enter 'y' to confirm): ")?;
    out.flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().eq_ignore_ascii_case("y"))
}

fn print_summary(out: &mut impl Write, summary: &RunSummary) -> anyhow::Result<()> {
    for warning in &summary.warnings {
        writeln!(out, "[Warning] {}", warning)?;
    }
    writeln!(out, "{}", summary)?;
    Ok(())
}
