//! Binary entry point for the `plot` CLI.
//!
//! The composition root: loads the YAML config, opens the store, builds the
//! provider resolver and prompt template, and hands everything to the
//! orchestrator before dispatching the parsed subcommand. Dependencies are
//! wired top-down here; nothing else in the crate constructs them.

use clap::Parser;
use crossterm::{
    style::{Color, SetForegroundColor},
    ExecutableCommand,
};
use once_cell::sync::OnceCell;
use plotline::api::StreamEvent;
use plotline::commands::{Cli, Commands};
use plotline::config::{self, PlotlineConfig, ProviderResolver};
use plotline::orchestrator::{Orchestrator, SectionOutcome};
use plotline::prompt::PromptTemplate;
use plotline::store::{SettingsPatch, StoryStore};
use std::io::Write;
use std::{env, error::Error, fs};
use tokio::sync::mpsc;
use tracing::info;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        return init();
    }

    let config_path = match env::var("PLOTLINE_CONFIG") {
        Ok(path) => path.into(),
        Err(_) => plotline::config_dir()?.join("config.yaml"),
    };
    let config = config::load_config(
        config_path
            .to_str()
            .ok_or("config path is not valid UTF-8")?,
    )?;

    let store = StoryStore::open(&config.database_url)?;
    let resolver = ProviderResolver::new(&config);

    let template_path = plotline::config_dir()?.join("templates/story.yaml");
    let template = if template_path.exists() {
        PromptTemplate::load(&template_path)?
    } else {
        PromptTemplate::default()
    };

    let mut orchestrator = Orchestrator::new(store, resolver, template, &config);

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Chat {
            message,
            provider,
            conversation,
            model,
        } => {
            let outcome = orchestrator
                .chat(&message, &provider, conversation, model.as_deref())
                .await?;
            println!("{}", outcome.response);
            println!();
            println!("[conversation {} · model {}]", outcome.conversation_id, outcome.model);
        }
        Commands::Setup {
            conversation,
            title,
            background,
            outline,
            characters,
        } => {
            let mut names = Vec::new();
            let mut personalities = std::collections::HashMap::new();
            for entry in characters {
                match entry.split_once('=') {
                    Some((name, personality)) => {
                        names.push(name.trim().to_string());
                        personalities
                            .insert(name.trim().to_string(), personality.trim().to_string());
                    }
                    None => names.push(entry.trim().to_string()),
                }
            }

            let patch = SettingsPatch {
                title,
                background,
                outline,
                characters: (!names.is_empty()).then_some(names),
                character_personalities: (!personalities.is_empty()).then_some(personalities),
            };
            let settings = orchestrator.store_mut().upsert_settings(&conversation, patch)?;
            println!(
                "Settings saved for {conversation} ({} characters, outline {}).",
                settings.character_names().len(),
                if settings.outline.is_some() { "set" } else { "not set" }
            );
        }
        Commands::ConfirmOutline { conversation } => {
            let progress = orchestrator.confirm_outline(&conversation)?;
            println!(
                "Outline confirmed for {conversation}; ready to generate section {}.",
                progress.current_section + 1
            );
        }
        Commands::Generate {
            conversation,
            provider,
            model,
            stream,
        } => {
            let outcome = if stream {
                let (tx, rx) = mpsc::channel(32);
                let (result, ()) = tokio::join!(
                    orchestrator.generate_section_stream(
                        &conversation,
                        &provider,
                        model.as_deref(),
                        tx
                    ),
                    print_stream(rx)
                );
                result?
            } else {
                let outcome = orchestrator
                    .generate_section(&conversation, &provider, model.as_deref())
                    .await?;
                println!("{}", outcome.response);
                outcome
            };
            print_section_status(&outcome);
        }
        Commands::Confirm {
            conversation,
            provider,
            model,
        } => {
            let outcome = orchestrator
                .confirm_section(&conversation, &provider, model.as_deref())
                .await?;
            println!("{}", outcome.response);
            print_section_status(&outcome);
        }
        Commands::Rewrite {
            conversation,
            feedback,
            provider,
            model,
        } => {
            let outcome = orchestrator
                .rewrite_section(&conversation, &feedback, &provider, model.as_deref())
                .await?;
            println!("{}", outcome.response);
            print_section_status(&outcome);
        }
        Commands::Summarize {
            conversation,
            provider,
            model,
        } => {
            let outcome = orchestrator
                .generate_summary(&conversation, &provider, model.as_deref())
                .await?;
            println!("{}", outcome.summary);
            println!();
            println!("[summarized {} messages]", outcome.message_count);
        }
    }

    Ok(())
}

async fn print_stream(mut rx: mpsc::Receiver<StreamEvent>) {
    let mut stdout = std::io::stdout();
    let _ = stdout.execute(SetForegroundColor(Color::Blue));

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Chunk(chunk) => {
                print!("{chunk}");
                let _ = stdout.flush();
            }
            StreamEvent::Done => break,
            StreamEvent::Error(err) => {
                eprintln!("\nstream error: {err}");
                break;
            }
        }
    }

    let _ = stdout.execute(SetForegroundColor(Color::Reset));
    println!();
}

fn print_section_status(outcome: &SectionOutcome) {
    println!();
    println!(
        "[section {} · {} · {} messages]",
        outcome.progress.current_section + 1,
        outcome.progress.status,
        outcome.message_count
    );
    if outcome.needs_summary {
        println!("[history is getting long; run `plot summarize` to compress it]");
    }
}

/// First-run setup: write a default config file and the editable prompt
/// template into the per-platform config directory.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = plotline::config_dir()?;
    let templates_dir = config_dir.join("templates");
    info!("creating config directory: {}", templates_dir.display());
    fs::create_dir_all(&templates_dir)?;

    let template_path = templates_dir.join("story.yaml");
    info!("writing prompt template: {}", template_path.display());
    fs::write(
        &template_path,
        serde_yaml::to_string(&PromptTemplate::default())?,
    )?;

    let config_path = config_dir.join("config.yaml");
    info!("writing config file: {}", config_path.display());
    let config = PlotlineConfig {
        database_url: config_dir.join("plotline.db").to_string_lossy().into_owned(),
        ..PlotlineConfig::default()
    };
    fs::write(&config_path, serde_yaml::to_string(&config)?)?;

    println!("Initialized {}", config_dir.display());
    Ok(())
}
