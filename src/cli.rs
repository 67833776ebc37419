//! The command line interface for the planner.
use crate::config::Config;
use crate::log;
use crate::optimizer::SubprocessOptimizer;
use crate::output::{
    create_output_directory, get_output_dir, write_stage_results_toml, write_timeline_csv,
};
use crate::scenario::{ScenarioBuilder, ScenarioTemplate};
use crate::settings::Settings;
use crate::simulation::{RunOutcome, StageOrchestrator};
use ::log::{error, info, warn};
use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use itertools::Itertools;
use std::path::{Path, PathBuf};

pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for the planner.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the run command
#[derive(Args, Default)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Name of the scenario template column to use (defaults to the first)
    #[arg(long)]
    pub scenario_column: Option<String>,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a multi-stage plan.
    Run {
        /// Path to the planning configuration file.
        config_path: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Validate a planning configuration and its scenario template.
    Validate {
        /// Path to the planning configuration file.
        config_path: PathBuf,
        /// Name of the scenario template column to check
        #[arg(long)]
        scenario_column: Option<String>,
    },
    /// Manage program settings.
    Settings {
        /// The available subcommands for managing settings.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { config_path, opts } => handle_run_command(&config_path, &opts, None),
            Self::Validate {
                config_path,
                scenario_column,
            } => handle_validate_command(&config_path, scenario_column.as_deref(), None),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start the planner
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ stride --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Load the configuration and template and check them against each other
fn load_inputs<'a>(
    config: &'a Config,
    scenario_column: Option<&str>,
) -> Result<ScenarioBuilder<'a>> {
    let template = ScenarioTemplate::from_path(&config.template_path)?;
    info!(
        "Loaded scenario template from {} (scenarios: {})",
        template.path.display(),
        template.scenario_names().iter().join(", ")
    );

    ScenarioBuilder::new(config, template, scenario_column)
}

/// Handle the `run` command.
pub fn handle_run_command(
    config_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    // Load program settings, if not provided
    let settings = if let Some(settings) = settings {
        settings
    } else {
        Settings::load().context("Failed to load settings.")?
    };

    // Get path to output folder
    let pathbuf: PathBuf;
    let output_path = if let Some(p) = opts.output_dir.as_deref() {
        p
    } else {
        pathbuf = get_output_dir(config_path)?;
        &pathbuf
    };

    let overwrite = create_output_directory(output_path, opts.overwrite || settings.overwrite)
        .with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_path.display()
            )
        })?;

    // Initialise program logger
    log::init(Some(settings.log_level.as_str()), Some(output_path))
        .context("Failed to initialise logging.")?;

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder was overwritten");
    }

    let config = Config::from_path(config_path).context("Failed to load configuration.")?;
    info!("Loaded configuration from {}", config_path.display());
    info!("Output folder: {}", output_path.display());
    let builder = load_inputs(&config, opts.scenario_column.as_deref())
        .context("Failed to load scenario template.")?;
    info!("Using scenario column: {}", builder.column());

    let optimizer = SubprocessOptimizer::new(&config.optimizer, output_path)?;
    let stages_dir = optimizer.stages_dir().to_path_buf();
    let mut orchestrator = StageOrchestrator::new(&config, builder, optimizer, &stages_dir);
    match orchestrator.run() {
        Ok(RunOutcome::Completed(aggregate)) => {
            write_timeline_csv(&config, &aggregate.timeline, output_path)?;
            write_stage_results_toml(&aggregate.results, output_path)?;
            info!("Run status: completed");
            Ok(())
        }
        Ok(outcome) => {
            write_stage_results_toml(orchestrator.results(), output_path)?;
            bail!("Run status: {outcome}");
        }
        Err(err) => {
            let completed = orchestrator.results().keys().join(", ");
            error!("Stages completed before the failure: [{completed}]");
            write_stage_results_toml(orchestrator.results(), output_path)?;
            Err(err.context("Run status: failed"))
        }
    }
}

/// Handle the `validate` command.
pub fn handle_validate_command(
    config_path: &Path,
    scenario_column: Option<&str>,
    settings: Option<Settings>,
) -> Result<()> {
    // Load program settings, if not provided
    let settings = if let Some(settings) = settings {
        settings
    } else {
        Settings::load().context("Failed to load settings.")?
    };

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(settings.log_level.as_str()), None).context("Failed to initialise logging.")?;

    let config = Config::from_path(config_path).context("Failed to validate configuration.")?;
    let builder =
        load_inputs(&config, scenario_column).context("Failed to validate scenario template.")?;
    info!(
        "Validation successful: {} stages ({}), scenario column {}",
        config.stages.len(),
        config.stages.iter().join(", "),
        builder.column()
    );

    Ok(())
}
