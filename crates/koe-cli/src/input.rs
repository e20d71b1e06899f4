//! Line editing for the conversation prompt.

use koe_core::{InputEvent, LineSource};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::warn;

/// rustyline-backed input with in-session history.
pub struct TerminalInput {
    editor: DefaultEditor,
}

impl TerminalInput {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for TerminalInput {
    fn read_line(&mut self, prompt: &str) -> InputEvent {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                InputEvent::Line(line)
            }
            Err(ReadlineError::Interrupted) => InputEvent::Interrupted,
            Err(ReadlineError::Eof) => InputEvent::Closed,
            Err(e) => {
                warn!("Input: {}", e);
                InputEvent::Closed
            }
        }
    }
}
