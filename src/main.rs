use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use farmsync::cli::args::{Cli, Commands};
use farmsync::cli::commands::{self, Context};
use farmsync::config::{ColorSetting, Config};
use farmsync::storage;

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("FARMSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match config.general.color {
        ColorSetting::Always => colored::control::set_override(true),
        ColorSetting::Never => colored::control::set_override(false),
        ColorSetting::Auto => {},
    }

    let format = cli.output.unwrap_or(config.general.default_output);
    let store = storage::open().await?;
    let ctx = Context::new(config, store, format);

    let output = match cli.command {
        Commands::Queue(args) => commands::queue(&ctx, args.command).await?,
        Commands::Forms(args) => commands::forms(&ctx, args.command).await?,
        Commands::Cache(args) => commands::cache(&ctx, args.command).await?,
        Commands::Sync(args) => commands::sync(&ctx, args.command).await?,
        Commands::Fetch { url, navigate } => commands::fetch(&ctx, &url, navigate).await?,
        Commands::Push(args) => commands::push(&ctx, args.command).await?,
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
