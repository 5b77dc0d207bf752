//! Main module for the Homie CLI application.
//!
//! This module parses the command line, loads the configuration and runs the
//! requested command. Exchanges stream their reply to the terminal; Ctrl-C
//! stops an exchange without quitting half-way through a write.
//!
//! # Examples
//!
//! Summarizing a page saved as text:
//!
//! ```sh
//! homie summarize --page article.txt --url https://example.com/article
//! ```
//!
//! Continuing the conversation about that page:
//!
//! ```sh
//! homie ask "What does the author mean by clock skew?" --page article.txt --url https://example.com/article
//! ```
//!
//! Initializing the application's configuration and assistant presets:
//!
//! ```sh
//! homie init
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use std::{error::Error, fs, io, path::Path};
use tracing::{debug, info};

use homie::{
    api::CompletionClient,
    assistant::{AssistantPreset, list_assistants, load_assistant, save_assistant},
    commands::{Cli, Commands, HistoryCommand, PageArgs},
    composer::{ComposeInput, RequestKind, compose},
    config::{HomieConfig, default_config_path, load_config, save_config},
    config_dir,
    controller::{ExchangeController, ExchangeOutcome},
    history::{HistoryQuery, HistoryStore, SqliteHistory, page_of, total_pages},
    page::{FileExtractor, PageExtractor},
    render::{TerminalObserver, print_record},
};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_max_level(tracing::Level::WARN)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// What an exchange command asked for.
enum Request {
    Summarize,
    Assistant(String),
    Ask { question: String, fresh: bool },
}

/// Main asynchronous function of the Homie CLI application.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command fails.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_dir = config_dir()?;

    let model_id = cli.model.as_deref();

    match cli.command {
        Commands::Init => {
            debug!("Initializing configuration");
            init(&config_dir)?;
        }
        Commands::Summarize { page } => {
            let config = load(&config_dir)?;
            exchange(&config, &config_dir, model_id, page, Request::Summarize).await?;
        }
        Commands::Assistant { name, page } => {
            let config = load(&config_dir)?;
            exchange(&config, &config_dir, model_id, page, Request::Assistant(name)).await?;
        }
        Commands::Ask {
            question,
            fresh,
            page,
        } => {
            let config = load(&config_dir)?;
            let request = Request::Ask { question, fresh };
            exchange(&config, &config_dir, model_id, page, request).await?;
        }
        Commands::Assistants { all } => {
            let config = load(&config_dir)?;
            for preset in list_assistants(&config.assistants_dir(&config_dir), !all)? {
                let state = if preset.enabled { "" } else { " (disabled)" };
                println!("{} {:<12} {}{}", preset.icon, preset.id, preset.name, state);
                if !preset.description.is_empty() {
                    println!("    {}", preset.description);
                }
            }
        }
        Commands::Models { remote } => {
            let registry = load(&config_dir)?.registry();
            if remote {
                let model = registry.resolve(model_id)?;
                for id in CompletionClient::new().list_remote_models(&model).await? {
                    println!("{id}");
                }
            } else {
                let selected = registry.resolve(None).ok().map(|m| m.id);
                for model in registry.list() {
                    let marker = if selected.as_deref() == Some(model.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        "{} {:<20} {} ({}, {})",
                        marker, model.id, model.name, model.provider, model.model
                    );
                }
            }
        }
        Commands::History(command) => {
            let config = load(&config_dir)?;
            let mut history = open_history(&config, &config_dir)?;
            history_command(&mut history, command)?;
        }
    }

    Ok(())
}

fn load(config_dir: &Path) -> Result<HomieConfig, Box<dyn Error>> {
    let config_path = default_config_path(config_dir);
    debug!("Loading config from: {}", config_path.display());
    Ok(load_config(&config_path.to_string_lossy())?)
}

fn open_history(config: &HomieConfig, config_dir: &Path) -> Result<SqliteHistory, Box<dyn Error>> {
    fs::create_dir_all(config_dir)?;
    let db_url = config.history_db_url(config_dir);
    Ok(SqliteHistory::open(&db_url, config.max_history_records)?)
}

/// Compose, stream and store one exchange about the page.
async fn exchange(
    config: &HomieConfig,
    config_dir: &Path,
    model_id: Option<&str>,
    page: PageArgs,
    request: Request,
) -> Result<(), Box<dyn Error>> {
    let model = config.registry().resolve(model_id)?;
    info!("Using model {} ({})", model.name, model.model);

    let extractor = FileExtractor {
        path: page.page,
        title: page.title,
        url: page.url,
    };
    let page = extractor.extract();

    let history = open_history(config, config_dir)?;
    let mut controller = ExchangeController::new(CompletionClient::new(), history);

    let mut assistant_name = None;
    if let Request::Ask { fresh: false, .. } = request {
        let url = page.as_ref().and_then(|p| p.url.as_deref());
        let previous = match url {
            Some(url) => controller.history_mut().get(url)?,
            None => None,
        };
        if let Some(record) = previous {
            debug!(
                "Continuing conversation {} ({} messages)",
                record.id,
                record.messages.len()
            );
            assistant_name = record.assistant_name.clone();
            controller.restore(&record);
        }
    }

    let input = ComposeInput {
        page: page.as_ref(),
        prior: controller.conversation(),
        assistant_name: assistant_name.as_deref(),
    };
    let composition = match &request {
        Request::Summarize => compose(RequestKind::Summarize, input)?,
        Request::Assistant(name) => {
            let preset = load_assistant(&config.assistants_dir(config_dir), name)?;
            compose(RequestKind::AssistantRun(&preset), input)?
        }
        Request::Ask { question, .. } => compose(RequestKind::FollowUp(question), input)?,
    };

    let stop = controller.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let mut observer = TerminalObserver::stdout();
    let outcome = controller.run(composition, model, &mut observer).await;
    ctrl_c.abort();

    match outcome {
        ExchangeOutcome::Completed { saved } => debug!("Exchange completed (saved: {})", saved),
        ExchangeOutcome::Cancelled => eprintln!("Stopped."),
        ExchangeOutcome::Failed(err) => return Err(err.into()),
    }
    Ok(())
}

fn history_command(
    history: &mut impl HistoryStore,
    command: HistoryCommand,
) -> Result<(), Box<dyn Error>> {
    match command {
        HistoryCommand::List {
            search,
            model_name,
            page,
        } => {
            let records = history.search(&HistoryQuery { search, model_name })?;
            if records.is_empty() {
                println!("No conversations stored.");
                return Ok(());
            }
            for record in page_of(&records, page) {
                println!(
                    "{}  {}  {}  <{}>  [{}]",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.page_title,
                    record.page_url,
                    record.model_name
                );
            }
            println!("page {}/{}", page.max(1), total_pages(records.len()));
        }
        HistoryCommand::Show { url } => match history.get(&url)? {
            Some(record) => print_record(&mut io::stdout(), &record)?,
            None => println!("No conversation stored for {url}"),
        },
        HistoryCommand::Delete { id } => {
            if history.delete(&id)? {
                println!("Deleted {id}");
            } else {
                println!("No conversation with id {id}");
            }
        }
        HistoryCommand::Clear => {
            history.clear()?;
            println!("History cleared.");
        }
    }
    Ok(())
}

/// Initializes the application's configuration and assistant presets.
///
/// An existing config file is left untouched; the built-in preset is
/// (re)written so it can be used as a starting point for new ones.
fn init(config_dir: &Path) -> Result<(), Box<dyn Error>> {
    info!("Creating config directory: {}", config_dir.display());
    fs::create_dir_all(config_dir)?;

    let config_path = default_config_path(config_dir);
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
    } else {
        save_config(&config_path, &HomieConfig::sample())?;
        println!("Created config: {}", config_path.display());
    }

    let config = load(config_dir)?;
    let assistants_dir = config.assistants_dir(config_dir);
    save_assistant(&assistants_dir, &AssistantPreset::builtin())?;
    println!("Assistant presets: {}", assistants_dir.display());

    Ok(())
}
