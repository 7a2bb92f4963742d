use anyhow::Result;
use clap::{Parser, Subcommand};
use nodeflow::builtin::register_builtins;
use nodeflow::cli::{self, OutputMode};
use nodeflow::config::{self, NodeflowConfig};
use nodeflow::logging::init_logging;
use nodeflow::workflow::Engine;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "nodeflow")]
#[command(about = "Run graph-based workflows of task, condition and loop nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputMode::Console)]
    output: OutputMode,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow
    Run {
        /// Workflow name
        workflow: String,

        /// Initial data as key=value pairs (values may be JSON, or @file)
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,

        /// Initial data as a JSON object
        #[arg(long)]
        data: Option<String>,
    },

    /// Validate a workflow without running
    Validate {
        /// Workflow name
        workflow: String,
    },

    /// List available workflows
    Workflows,

    /// List registered functions
    Functions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dir = cli.dir.as_deref();
    let config = NodeflowConfig::load(project_dir)?;

    let log_file = cli.log_file.clone().or_else(|| config.logging.file_path());
    init_logging(cli.debug, cli.quiet, log_file)?;

    let mode = if cli.quiet { OutputMode::Quiet } else { cli.output };
    let handler = cli::create_handler(mode, cli.debug);

    let engine = Engine::with_settings(config.settings());
    register_builtins(engine.functions(), engine.workflows())?;
    register_discovered(&engine, project_dir);

    let exit_code = match cli.command {
        Commands::Run {
            workflow,
            args,
            data,
        } => cli::run_workflow(&engine, &workflow, &args, data.as_deref(), &*handler).await?,
        Commands::Validate { workflow } => {
            cli::validate_workflow(&engine, &workflow, project_dir, &*handler)
        }
        Commands::Workflows => cli::list_workflows(&engine, &*handler),
        Commands::Functions => cli::list_functions(&engine, &*handler),
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

/// Register workflow files from the user and project directories
///
/// Project definitions are registered last, so they win on a name clash.
/// A broken file is reported and skipped.
fn register_discovered(engine: &Engine, project_dir: Option<&Path>) {
    for dir in config::workflow_dirs(project_dir) {
        let files = match config::discover_workflows(&dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to scan workflow directory");
                continue;
            }
        };

        for path in files {
            let registered = config::load_workflow_file(&path)
                .and_then(|definition| {
                    engine
                        .register_definition(&definition)
                        .map_err(anyhow::Error::from)
                });
            if let Err(e) = registered {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "Skipping workflow file");
            }
        }
    }
}
