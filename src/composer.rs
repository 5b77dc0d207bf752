//! # Message composer
//!
//! Builds the two message lists of an exchange from the page extraction, an
//! optional assistant preset, the prior visible conversation and the user's
//! new input:
//!
//! - the **wire** list, sent verbatim to the completion endpoint;
//! - the **visible** list, shown to the user and persisted to history.
//!
//! ## Mapping rule
//! The lists are aligned by role and position, never by comparing contents.
//! Position 0 is always a system message in both lists and shares one id; its
//! wire copy may additionally carry the page text, which must never be
//! persisted. Every later non-system wire message appears unchanged at the same
//! position in the visible list, except for the expanded user turn of an
//! assistant run, which exists on the wire only (it would duplicate the whole
//! page into history).
//!
//! | kind | wire | visible |
//! |---|---|---|
//! | summarize | system, user(page) | same as wire |
//! | assistant run | system(persona), user(template ⟶ page) | system(persona) |
//! | follow-up, first turn | system(generic + page), user | system(generic), user |
//! | follow-up, later turn | system(persona + page), prior…, user | system(persona), prior…, user |

use crate::{
    assistant::AssistantPreset,
    error::{HomieError, Result},
    message::{Message, Role},
    page::PageContent,
};

pub const SUMMARIZE_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that summarizes web page content.";

pub const SUMMARIZE_USER_PREFIX: &str = "Please summarize the following content:\n\n";

/// Persona for free-form questions when no preset established one.
pub const PAGE_CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant with access to the current web page content. Use the provided page context to answer user questions accurately.";

/// What the user asked for.
#[derive(Debug, Clone, Copy)]
pub enum RequestKind<'a> {
    /// One-click summary of the page.
    Summarize,
    /// One-click run of a preset.
    AssistantRun(&'a AssistantPreset),
    /// A typed question about the page.
    FollowUp(&'a str),
}

/// Everything besides the request kind that composition depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComposeInput<'a> {
    /// Extraction result; `None` means extraction failed.
    pub page: Option<&'a PageContent>,
    /// The visible conversation so far (system message first, if any).
    pub prior: &'a [Message],
    /// Preset that established the persona of `prior`, kept for history attribution.
    pub assistant_name: Option<&'a str>,
}

/// Page identity and attribution written alongside the visible list.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryContext {
    pub page_title: String,
    pub page_url: String,
    pub assistant_name: Option<String>,
}

/// Output of [`compose`].
#[derive(Debug, Clone)]
pub struct Composition {
    pub wire: Vec<Message>,
    pub visible: Vec<Message>,
    /// `None` when the page has no URL; such exchanges are not persisted.
    pub history: Option<HistoryContext>,
}

/// Build the wire and visible lists for one exchange.
///
/// # Errors
/// - [`HomieError::ContentExtractionFailed`] when `input.page` is missing or blank.
/// - [`HomieError::EmptyInput`] for a follow-up with blank text.
///
/// # Examples
/// ```rust
/// use homie::assistant::AssistantPreset;
/// use homie::composer::{compose, ComposeInput, RequestKind};
/// use homie::page::PageContent;
///
/// let page = PageContent::new("Clocks", None, "Clock skew is common.");
/// let preset = AssistantPreset {
///     id: "crisp".into(),
///     name: "Crisp".into(),
///     description: String::new(),
///     icon: String::new(),
///     system_prompt: "Summarize crisply.".into(),
///     user_prompt: "<content>{{content}}</content>".into(),
///     enabled: true,
/// };
/// let input = ComposeInput { page: Some(&page), ..Default::default() };
/// let composed = compose(RequestKind::AssistantRun(&preset), input).unwrap();
/// assert_eq!(composed.wire[1].content, "<content>Clock skew is common.</content>");
/// assert_eq!(composed.visible.len(), 1);
/// ```
pub fn compose(kind: RequestKind<'_>, input: ComposeInput<'_>) -> Result<Composition> {
    if let RequestKind::FollowUp(text) = kind {
        if text.trim().is_empty() {
            return Err(HomieError::EmptyInput);
        }
    }

    let page = input
        .page
        .filter(|page| page.is_usable())
        .ok_or(HomieError::ContentExtractionFailed)?;

    let (wire, visible, assistant_name) = match kind {
        RequestKind::Summarize => {
            let system = Message::system(SUMMARIZE_SYSTEM_PROMPT);
            let user = Message::user(format!("{SUMMARIZE_USER_PREFIX}{}", page.text));
            let messages = vec![system, user];
            (messages.clone(), messages, None)
        }
        RequestKind::AssistantRun(preset) => {
            let system = Message::system(preset.system_prompt.clone());
            let user = Message::user(preset.render_user_prompt(&page.text));
            (vec![system.clone(), user], vec![system], Some(preset.name.clone()))
        }
        RequestKind::FollowUp(text) => {
            let (wire, visible) = compose_follow_up(page, input.prior, text);
            (wire, visible, input.assistant_name.map(str::to_string))
        }
    };

    tracing::debug!(
        "Composed {} wire / {} visible messages",
        wire.len(),
        visible.len()
    );

    Ok(Composition {
        wire,
        visible,
        history: page.url.as_ref().map(|url| HistoryContext {
            page_title: page.title.clone(),
            page_url: url.clone(),
            assistant_name,
        }),
    })
}

fn compose_follow_up(
    page: &PageContent,
    prior: &[Message],
    text: &str,
) -> (Vec<Message>, Vec<Message>) {
    // Reuse whichever persona the first turn established, id and timestamp included.
    let persona = prior
        .iter()
        .find(|m| m.is_system())
        .cloned()
        .unwrap_or_else(|| Message::system(PAGE_CHAT_SYSTEM_PROMPT));

    let wire_system = persona.with_content(format!(
        "{}\n\n{}",
        persona.content,
        page_context(page)
    ));

    let user = Message::new(Role::User, text);
    let turns = prior.iter().filter(|m| !m.is_system()).cloned();

    let mut wire = vec![wire_system];
    let mut visible = vec![persona];
    for turn in turns {
        wire.push(turn.clone());
        visible.push(turn);
    }
    wire.push(user.clone());
    visible.push(user);

    (wire, visible)
}

fn page_context(page: &PageContent) -> String {
    format!(
        "Current page content:\n---\nTitle: {}\n\n{}\n---",
        page.title, page.text
    )
}
