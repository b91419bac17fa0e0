use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod args;
mod commands;
mod config;

use args::{LoraArg, SlotArg};
use config::Config;

/// Run ComfyUI workflows from the command line.
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is up, powering it on if configured
    Status,

    /// Submit a workflow once per input image
    Run(RunArgs),

    /// Manage the workflows directory
    Workflows {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// List LoRA files known to the server
    Loras,

    /// Recent and favorite prompts
    Prompts {
        #[command(subcommand)]
        action: PromptAction,
    },

    /// Hand a screenshot over to the next `run --from-screenshot`
    Screenshot {
        #[command(subcommand)]
        action: ScreenshotAction,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Workflow name in the workflows directory, or a path
    #[arg(long, short)]
    workflow: String,

    /// Input image; repeat for a batch
    #[arg(long = "image", short)]
    images: Vec<PathBuf>,

    /// Image for a specific slot of a multi-input workflow
    #[arg(long = "slot", value_name = "NODE=PATH", value_parser = args::parse_slot)]
    slots: Vec<SlotArg>,

    #[arg(long, short)]
    prompt: Option<String>,

    #[arg(long)]
    negative: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    steps: Option<u32>,

    #[arg(long)]
    cfg: Option<f64>,

    #[arg(long)]
    batch_size: Option<u32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    sampler: Option<String>,

    #[arg(long)]
    scheduler: Option<String>,

    /// Swap a LoRA or change its strength
    #[arg(long = "lora", value_name = "NODE:KEY=NAME[@STRENGTH]", value_parser = args::parse_lora)]
    loras: Vec<LoraArg>,

    /// Folder for results of runs without an input image
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Output suffix (default: OUTPUT_SUFFIX)
    #[arg(long)]
    suffix: Option<String>,

    /// Use the stashed screenshot as the first input image
    #[arg(long)]
    from_screenshot: bool,
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List workflows with their capabilities
    List,
    /// Print the editable parameters of a workflow as JSON
    Show { workflow: String },
    /// Copy a workflow to `<name>_copy.json`
    Duplicate { workflow: String },
    Delete { workflow: String },
}

#[derive(Subcommand)]
enum PromptAction {
    Recent,
    Favorites,
    /// Toggle a prompt in the favorites list
    Favorite { text: String },
}

#[derive(Subcommand)]
enum ScreenshotAction {
    Stash { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "kiln=info,kiln_core=info,kiln_comfyui=info,kiln_pipeline=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(comfyui_url = %config.comfyui_url, "Loaded configuration");

    match cli.command {
        Commands::Status => commands::status(&config).await,
        Commands::Run(args) => commands::run(&config, args).await,
        Commands::Workflows { action } => match action {
            WorkflowAction::List => commands::list_workflows(&config),
            WorkflowAction::Show { workflow } => commands::show_workflow(&config, &workflow),
            WorkflowAction::Duplicate { workflow } => {
                commands::duplicate_workflow(&config, &workflow)
            }
            WorkflowAction::Delete { workflow } => commands::delete_workflow(&config, &workflow),
        },
        Commands::Loras => commands::loras(&config).await,
        Commands::Prompts { action } => match action {
            PromptAction::Recent => commands::recent_prompts(&config),
            PromptAction::Favorites => commands::favorite_prompts(&config),
            PromptAction::Favorite { text } => commands::toggle_favorite(&config, &text),
        },
        Commands::Screenshot { action } => match action {
            ScreenshotAction::Stash { path } => commands::stash_screenshot(&config, &path),
        },
    }
}
