use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use urpc_compiler::{compile_file, FileSystem, UrpcError};
use urpc_schema::Schema;

#[derive(Parser)]
#[command(name = "urpc")]
#[command(about = "Check uRPC schemas and emit their IR", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a `.urpc` schema and its imports
    Check {
        /// Entry `.urpc` file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compile a schema to its JSON IR
    Ir {
        /// Entry `.urpc` file
        #[arg(short, long)]
        input: PathBuf,

        /// Output `.json` file (if omitted, prints to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List every procedure and stream with its HTTP path
    Catalog {
        /// Entry `.urpc` file
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> Result<(), UrpcError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let fs = FileSystem::new();
    match &cli.command {
        Commands::Check { input } => {
            let schema = compile(&fs, input)?;
            println!(
                "{}: ok ({} types, {} enums, {} constants, {} patterns, {} operations)",
                input.display(),
                schema.types.len(),
                schema.enums.len(),
                schema.constants.len(),
                schema.patterns.len(),
                schema.catalog.operations().count(),
            );
            Ok(())
        }

        Commands::Ir { input, output } => {
            let schema = compile(&fs, input)?;
            let json = schema.to_json()?;
            if let Some(out_path) = output {
                fs::write(out_path, &json).map_err(|source| UrpcError::Io {
                    path: out_path.clone(),
                    imported_at: None,
                    source,
                })?;
                info!("IR written to {}", out_path.display());
            } else {
                println!("{}", json);
            }
            Ok(())
        }

        Commands::Catalog { input } => {
            let schema = compile(&fs, input)?;
            for op in schema.catalog.operations() {
                println!("{:<6} {:<32} {} -> {}", op.kind.as_str(), op.path, op.input, op.output);
            }
            Ok(())
        }
    }
}

fn compile(fs: &FileSystem, input: &Path) -> Result<Schema, UrpcError> {
    let result = compile_file(fs, input);
    if let Err(err) = &result {
        debug!("{} diagnostics for {}", err.diagnostics().len(), input.display());
    }
    result
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
