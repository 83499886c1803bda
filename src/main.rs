//! `logroute` command line.
//!
//! - `check <file>`: parse a configuration and print its rules, targets
//!   and the diagnostics produced while parsing
//! - `render <template>`: compile one layout and render a sample event
//! - `watch <file>`: activate a configuration with auto reload and report
//!   every reload until Ctrl-C

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::json;

use logroute::config::ConfigEnvironment;
use logroute::lifecycle::{signals, Shutdown};
use logroute::observability::logging;
use logroute::{
    ConfigEvent, Layout, LayoutContext, LogEvent, LogFactory, LogFactoryOptions, LogLevel,
    LoggingConfiguration,
};

#[derive(Parser)]
#[command(name = "logroute")]
#[command(about = "Inspect, render and watch log routing configurations", long_about = None)]
struct Cli {
    /// Factory options (TOML)
    #[arg(short, long)]
    options: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a configuration file and print what it defines
    Check {
        file: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Render a layout template against a sample event
    Render {
        template: String,
        #[arg(short, long, default_value = "")]
        message: String,
        #[arg(short, long, default_value = "info")]
        level: LogLevel,
        #[arg(long, default_value = "logroute")]
        logger: String,
    },
    /// Activate a configuration file and reload it on change
    Watch { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init(logging::DEFAULT_FILTER);
    let cli = Cli::parse();

    let options = match &cli.options {
        Some(path) => LogFactoryOptions::from_toml_file(path)?,
        None => LogFactoryOptions::default(),
    };

    match cli.command {
        Commands::Check { file, json } => check(&file, options, json)?,
        Commands::Render {
            template,
            message,
            level,
            logger,
        } => {
            let layout = Layout::compile(&template, &LayoutContext::default().strict(true))?;
            let event = LogEvent::new(level, logger, message);
            println!("{}", layout.render(&event));
        }
        Commands::Watch { file } => watch(&file, options).await?,
    }
    Ok(())
}

fn check(file: &Path, options: LogFactoryOptions, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env = ConfigEnvironment::new(options);
    if env.internal.level() > LogLevel::Debug {
        env.internal.set_level(LogLevel::Debug);
    }
    env.internal.start_capture();
    let config = LoggingConfiguration::load_file(file, env.clone())?;

    let rules: Vec<String> = config.rules().iter().map(ToString::to_string).collect();
    let targets: Vec<_> = config
        .all_targets()
        .iter()
        .map(|t| json!({ "name": t.name(), "type": t.type_name() }))
        .collect();
    let watched: Vec<_> = config
        .watched_files()
        .iter()
        .map(|w| json!({ "path": w.path, "autoReload": w.auto_reload }))
        .collect();
    let diagnostics = env.internal.captured();

    if as_json {
        let report = json!({
            "rules": rules,
            "targets": targets,
            "watched": watched,
            "autoReload": config.auto_reload(),
            "diagnostics": diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Targets:");
    for target in config.all_targets() {
        println!("  {} ({})", target.name(), target.type_name());
    }
    println!("Rules:");
    for rule in &rules {
        println!("  {}", rule);
    }
    println!("Watched files:");
    for file in config.watched_files() {
        println!("  {} (autoReload={})", file.path.display(), file.auto_reload);
    }
    if !diagnostics.is_empty() {
        println!("Diagnostics:");
        for line in &diagnostics {
            println!("  {}", line);
        }
    }
    Ok(())
}

async fn watch(file: &Path, options: LogFactoryOptions) -> Result<(), Box<dyn std::error::Error>> {
    let factory = LogFactory::new(options);
    factory.subscribe(|event| match event {
        ConfigEvent::Changed { activated, .. } => tracing::info!(
            config_id = ?activated.as_ref().map(|c| c.id()),
            "Configuration changed"
        ),
        ConfigEvent::Reloaded { succeeded: true, .. } => tracing::info!("Configuration reloaded"),
        ConfigEvent::Reloaded { error, .. } => {
            tracing::warn!(error = ?error, "Configuration reload failed")
        }
    });

    let config = factory.load_configuration(file)?;
    tracing::info!(
        path = %file.display(),
        auto_reload = config.auto_reload(),
        watched = factory.watched_files().len(),
        "Watching configuration"
    );

    let stop = Shutdown::new();
    let mut stopped = stop.subscribe();
    signals::spawn_signal_handler(stop);
    stopped.recv().await;
    factory.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}
