use clap::{Parser, Subcommand};
use csv_post_importer::{
    app::App,
    application::admin_service::AdminResponse,
    config::{load_settings_file, AppConfig},
    domain::models::SourceKind,
};
use std::path::PathBuf;
use tracing::{info, debug};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "csv-post-importer")]
#[command(about = "Imports rows of a CSV file as posts")]
#[command(version)]
struct Cli {
    /// Application config file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overrides the config file
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one import now
    Import {
        /// Source to import from (local or remote)
        #[arg(short, long)]
        source: Option<SourceKind>,
    },

    /// Check that the source is readable and has the required columns
    Validate {
        #[arg(short, long)]
        source: Option<SourceKind>,
    },

    /// Show the current or last import run
    Progress,

    /// Run the environment health checks
    Health,

    /// Show import, error and cache statistics
    Stats,

    /// Clear the run record and lock
    Reset {
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Store import settings read from a YAML file
    Configure {
        settings: PathBuf,
    },

    /// Manage scheduled imports
    Scheduler {
        #[command(subcommand)]
        action: SchedulerAction,
    },
}

#[derive(Subcommand)]
enum SchedulerAction {
    Enable {
        #[arg(long, default_value = "cli")]
        actor: String,

        /// Seconds between scheduled imports
        #[arg(short, long)]
        interval: Option<u64>,
    },
    Disable {
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Perform a single scheduler pass
    Tick,
    /// Tick periodically until interrupted
    Run,
}

fn print_response(response: &AdminResponse) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let filter = match &config.log_filter {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::from_default_env()
            .add_directive("csv_post_importer=info".parse()?)
            .add_directive("reqwest=warn".parse()?),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting csv-post-importer {}", env!("CARGO_PKG_VERSION"));
    debug!("Application config: {:?}", config);

    let app = App::build(&config).await?;

    let response = match cli.command {
        Commands::Import { source } => app.admin.start_import(source).await,
        Commands::Validate { source } => app.admin.validate_source(source).await,
        Commands::Progress => app.admin.get_progress().await,
        Commands::Health => app.admin.get_health().await,
        Commands::Stats => app.admin.get_statistics().await,
        Commands::Reset { actor } => app.admin.emergency_reset(&actor).await,
        Commands::Configure { settings } => {
            let settings = load_settings_file(&settings)?;
            app.admin.save_settings(&settings).await
        }
        Commands::Scheduler { action } => match action {
            SchedulerAction::Enable { actor, interval } => app.admin.enable_scheduler(&actor, interval).await,
            SchedulerAction::Disable { actor } => app.admin.disable_scheduler(&actor).await,
            SchedulerAction::Tick => app.admin.scheduler_tick().await,
            SchedulerAction::Run => {
                let shutdown = async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for ctrl-c: {}", e);
                    }
                };
                app.scheduler.run_loop(app.poll_interval, shutdown).await?;
                AdminResponse::ok("Scheduler loop stopped", None)
            }
        },
    };

    print_response(&response)?;
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}
