//! # Assistant presets
//!
//! An assistant is a named, reusable pair of prompts that drives a one-click
//! exchange about the current page:
//! - a `system_prompt` that sets the persona,
//! - a `user_prompt` template in which every `{{content}}` is replaced by the
//!   extracted page text.
//!
//! Presets live as YAML documents in the assistants directory (by default
//! `<config_dir>/assistants/`), one preset per `<id>.yaml` file:
//!
//! ```yaml
//! id: eli5
//! name: Explain like I'm five
//! description: Plain-language explanation of the page
//! icon: "🧸"
//! system_prompt: "You explain things simply."
//! user_prompt: "Explain this page:\n\n{{content}}"
//! enabled: true
//! ```
//!
//! A built-in `tldr` preset is always available, even with an empty directory.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{HomieError, Result};

/// Placeholder replaced by the page text in [`AssistantPreset::user_prompt`].
pub const CONTENT_PLACEHOLDER: &str = "{{content}}";

/// A reusable prompt preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantPreset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl AssistantPreset {
    /// Expand the user prompt template with the page text.
    ///
    /// A template without the placeholder comes back unchanged.
    pub fn render_user_prompt(&self, content: &str) -> String {
        self.user_prompt.replace(CONTENT_PLACEHOLDER, content)
    }

    /// The preset shipped with the binary.
    pub fn builtin() -> Self {
        Self {
            id: "tldr".to_string(),
            name: "TLDR".to_string(),
            description: "Structured analysis: key points, notable quotes, terms and takeaways."
                .to_string(),
            icon: "👨‍🎓".to_string(),
            system_prompt: BUILTIN_SYSTEM_PROMPT.to_string(),
            user_prompt: "<content>{{content}}</content>".to_string(),
            enabled: true,
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.id == name || self.name.eq_ignore_ascii_case(name)
    }
}

const BUILTIN_SYSTEM_PROMPT: &str = "<role>
You are a senior content analyst who distils articles into their essentials.
</role>

<objective>
Produce a structured, accurate report so the reader gets the core insights without reading the full text.
</objective>

<output_format>
## Core analysis
[A coherent reading of the whole piece, at least ten sentences]

- **Key points**: [the five most important]
- **Novel insights**: [the five most original]

## Notable quotes
> [quote] (paragraph N)

**Why it matters:** [reason]

## Action
[One concrete step the reader can take after reading]

## Key terms
[Explain the key terms used in the text]
</output_format>

<style_requirements>
Use \"-\" for list items. Output the report directly without preamble.
</style_requirements>";

/// Load one preset by id or (case-insensitive) name.
///
/// Looks for `<dir>/<name>.yaml` first, then scans the directory, then falls
/// back to the built-in preset.
///
/// # Errors
/// [`HomieError::UnknownAssistant`] when nothing matches; YAML errors when the
/// directly named file exists but does not parse.
pub fn load_assistant(dir: &Path, name: &str) -> Result<AssistantPreset> {
    let direct = dir.join(format!("{name}.yaml"));
    if direct.is_file() {
        tracing::info!("Loading assistant: {}", direct.display());
        let content = fs::read_to_string(&direct)?;
        let preset: AssistantPreset = serde_yaml::from_str(&content)?;
        return Ok(preset);
    }

    list_assistants(dir, false)?
        .into_iter()
        .find(|preset| preset.matches(name))
        .ok_or_else(|| HomieError::UnknownAssistant(name.to_string()))
}

/// Every preset available: the built-in one plus each parseable YAML file in `dir`.
///
/// Files that fail to parse are logged and skipped. A missing directory is not an
/// error. With `enabled_only`, disabled presets are left out.
pub fn list_assistants(dir: &Path, enabled_only: bool) -> Result<Vec<AssistantPreset>> {
    let mut presets = vec![AssistantPreset::builtin()];

    if dir.is_dir() {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml"))
            .collect();
        paths.sort();

        for path in paths {
            let parsed = fs::read_to_string(&path)
                .map_err(HomieError::from)
                .and_then(|content| Ok(serde_yaml::from_str::<AssistantPreset>(&content)?));
            match parsed {
                Ok(preset) => {
                    // A file may override the built-in preset by reusing its id.
                    presets.retain(|p| p.id != preset.id);
                    presets.push(preset);
                }
                Err(err) => tracing::warn!("Skipping assistant {}: {}", path.display(), err),
            }
        }
    }

    if enabled_only {
        presets.retain(|p| p.enabled);
    }
    Ok(presets)
}

/// Write a preset to `<dir>/<id>.yaml`, creating the directory if needed.
pub fn save_assistant(dir: &Path, preset: &AssistantPreset) -> Result<()> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.yaml", preset.id));
    tracing::info!("Writing assistant: {}", path.display());
    fs::write(path, serde_yaml::to_string(preset)?)?;
    Ok(())
}
