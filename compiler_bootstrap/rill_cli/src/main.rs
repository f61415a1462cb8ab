//! Rill programming language command-line driver.
//!
//! Exposes the host-ABI contract of spec §6's CLI: `run` (compile and
//! execute a source file to completion), `compile` (compile-only, with
//! AST/IR/bytecode dumps), and `repl` (read-eval-print loop). Exit code
//! 0 on success, non-zero on compilation errors or an uncaught panic.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "rill")]
#[command(about = "The Rill scripting language compiler and VM")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all but error-level logging.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DumpKind {
    Ast,
    Ir,
    Bytecode,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file and run its exported `main` function.
    Run {
        /// Path to the `.rill` source file.
        path: PathBuf,

        /// Exported function to invoke instead of `main`.
        #[arg(long, default_value = "main")]
        entry: String,
    },

    /// Compile a source file without running it, optionally dumping an
    /// intermediate representation instead of emitting bytecode.
    Compile {
        /// Path to the `.rill` source file.
        path: PathBuf,

        /// Which representation to print instead of a success message.
        #[arg(long, value_enum)]
        dump: Option<DumpKind>,

        /// Print diagnostics as JSON (one array) instead of human-readable
        /// text, for editor/CI tooling that parses compiler output.
        #[arg(long)]
        json_diagnostics: bool,
    },

    /// Start an interactive read-eval-print loop.
    Repl,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if cli.quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    let exit_code = match cli.command {
        Commands::Run { path, entry } => commands::run::execute(&path, &entry)?,
        Commands::Compile { path, dump, json_diagnostics } => {
            commands::compile::execute(&path, dump.map(Into::into), json_diagnostics)?
        }
        Commands::Repl => commands::repl::execute()?,
    };

    std::process::exit(exit_code);
}

impl From<DumpKind> for commands::compile::Dump {
    fn from(kind: DumpKind) -> Self {
        match kind {
            DumpKind::Ast => commands::compile::Dump::Ast,
            DumpKind::Ir => commands::compile::Dump::Ir,
            DumpKind::Bytecode => commands::compile::Dump::Bytecode,
        }
    }
}
