//! # Homie (library root)
//!
//! Chat with a large language model about the page you are reading, with one
//! stored conversation per page.
//!
//! An exchange flows through the modules like this:
//!
//! 1. a [`page::PageExtractor`] hands over the page title and text,
//! 2. [`composer::compose`] builds the wire list (sent to the model) and the
//!    visible list (shown and stored),
//! 3. [`registry::ModelRegistry`] resolves the backend for this exchange,
//! 4. [`controller::ExchangeController`] streams the reply through a
//!    [`api::CompletionBackend`] and publishes every delta,
//! 5. on completion the conversation is written to a [`history::HistoryStore`].
//!
//! ## Modules
//! - [`api`]: OpenAI-compatible streaming client.
//! - [`assistant`]: YAML prompt presets.
//! - [`commands`]: CLI parsing.
//! - [`composer`], [`controller`], [`history`]: the exchange itself.
//! - [`config`], [`registry`]: configuration and model resolution.
//! - [`models`], [`schema`]: Diesel mapping of the SQLite history.
//! - [`render`]: terminal output.

use directories::ProjectDirs;
use std::error::Error;

pub mod api;
pub mod assistant;
pub mod commands;
pub mod composer;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod message;
pub mod models;
pub mod page;
pub mod registry;
pub mod render;
pub mod schema;

/// Return the per-platform configuration directory used by Homie.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "homie", "homie")`, so you get the right place on each OS
/// (e.g., `~/.config/homie` on Linux).
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
///
/// # Examples
/// ```rust
/// let cfg = homie::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs =
        ProjectDirs::from("com", "homie", "homie").ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
