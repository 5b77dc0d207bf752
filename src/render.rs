//! Terminal rendering of a streaming conversation.
//!
//! [`TerminalObserver`] prints only what each published snapshot added to the
//! reply, so the answer appears token by token in bold blue.

use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, SetAttribute, SetForegroundColor},
};
use std::io::{self, Write};
use tracing::warn;

use crate::{
    controller::{ConversationObserver, ExchangeState},
    history::ConversationRecord,
    message::{Message, Role},
};

/// Writes streamed replies to `out` as they grow.
pub struct TerminalObserver<W: Write> {
    out: W,
    printed: usize,
    styled: bool,
}

impl TerminalObserver<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), true)
    }
}

impl<W: Write> TerminalObserver<W> {
    /// With `styled` off no escape sequences are written.
    pub fn new(out: W, styled: bool) -> Self {
        Self {
            out,
            printed: 0,
            styled,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn start_reply(&mut self) -> io::Result<()> {
        self.printed = 0;
        if self.styled {
            self.out.execute(SetForegroundColor(Color::Blue))?;
            self.out.execute(SetAttribute(Attribute::Bold))?;
        }
        Ok(())
    }

    fn end_reply(&mut self) -> io::Result<()> {
        if self.styled {
            self.out.execute(SetAttribute(Attribute::Reset))?;
            self.out.execute(SetForegroundColor(Color::Reset))?;
        }
        writeln!(self.out)?;
        self.out.flush()
    }

    fn write_suffix(&mut self, reply: &str) -> io::Result<()> {
        // The reply only ever grows while streaming.
        if let Some(suffix) = reply.get(self.printed..) {
            write!(self.out, "{suffix}")?;
            self.printed = reply.len();
        }
        self.out.flush()
    }
}

impl<W: Write> ConversationObserver for TerminalObserver<W> {
    fn on_update(&mut self, conversation: &[Message]) {
        if let Some(reply) = conversation.last().filter(|m| m.role == Role::Assistant) {
            if let Err(err) = self.write_suffix(&reply.content) {
                warn!("Failed to write to terminal: {}", err);
            }
        }
    }

    fn on_state(&mut self, state: ExchangeState) {
        let result = match state {
            ExchangeState::Streaming => self.start_reply(),
            ExchangeState::Completed | ExchangeState::Cancelled | ExchangeState::Failed => {
                self.end_reply()
            }
            ExchangeState::Idle => Ok(()),
        };
        if let Err(err) = result {
            warn!("Failed to write to terminal: {}", err);
        }
    }
}

/// Print a stored conversation, system prompt left out.
pub fn print_record(out: &mut impl Write, record: &ConversationRecord) -> io::Result<()> {
    writeln!(out, "# {}", record.page_title)?;
    writeln!(
        out,
        "{} | {} | {}",
        record.page_url,
        record.model_name,
        record.created_at.format("%Y-%m-%d %H:%M")
    )?;
    if let Some(assistant) = &record.assistant_name {
        writeln!(out, "assistant: {assistant}")?;
    }
    for message in record.messages.iter().filter(|m| !m.is_system()) {
        writeln!(out)?;
        writeln!(out, "[{}]", message.role)?;
        writeln!(out, "{}", message.content)?;
    }
    Ok(())
}
