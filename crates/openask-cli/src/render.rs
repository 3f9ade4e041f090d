//! Incremental terminal rendering of one assistant message

use std::io::{self, Write};

use colored::Colorize;
use openask_engine::{ChatSnapshot, Message, Part, ToolState};

#[derive(Debug, Clone, PartialEq)]
enum Progress {
    Text(String),
    Reasoning(String),
    Tool(ToolState),
}

/// Print whatever `text` adds to `printed`. Text that was replaced rather
/// than extended is printed whole on a fresh line.
fn write_growth(
    printed: Option<&str>,
    text: &str,
    out: &mut impl Write,
    style: impl Fn(&str) -> String,
) -> io::Result<()> {
    let printed = printed.unwrap_or("");
    match text.strip_prefix(printed) {
        Some(rest) if !rest.is_empty() => write!(out, "{}", style(rest)),
        Some(_) => Ok(()),
        None => {
            writeln!(out)?;
            write!(out, "{}", style(text))
        }
    }
}

/// Prints only what changed since the previous snapshot. Parts are
/// append-only, so per-part progress is enough.
pub struct Renderer {
    assistant_id: Option<String>,
    progress: Vec<Progress>,
}

impl Renderer {
    /// Follow the assistant message with id `assistant_id`.
    pub fn new(assistant_id: Option<String>) -> Self {
        Self {
            assistant_id,
            progress: Vec::new(),
        }
    }

    /// Follow the newest assistant message in `snapshot`.
    pub fn for_latest(snapshot: &ChatSnapshot) -> Self {
        Self::new(snapshot.last_assistant().map(|m| m.id.clone()))
    }

    pub fn render(&mut self, snapshot: &ChatSnapshot, out: &mut impl Write) -> io::Result<()> {
        let Some(id) = &self.assistant_id else {
            return Ok(());
        };
        let Some(message) = snapshot.messages.iter().rev().find(|m| &m.id == id) else {
            return Ok(());
        };
        self.render_message(message, out)?;
        out.flush()
    }

    fn render_message(&mut self, message: &Message, out: &mut impl Write) -> io::Result<()> {
        for (index, part) in message.parts.iter().enumerate() {
            let previous = self.progress.get(index).cloned();
            let next = match part {
                Part::Text { text, .. } => {
                    let printed = match &previous {
                        Some(Progress::Text(printed)) => Some(printed.as_str()),
                        _ => None,
                    };
                    write_growth(printed, text, out, str::to_string)?;
                    Progress::Text(text.clone())
                }
                Part::Reasoning { text, .. } => {
                    let printed = match &previous {
                        Some(Progress::Reasoning(printed)) => Some(printed.as_str()),
                        _ => None,
                    };
                    write_growth(printed, text, out, |s| s.italic().dimmed().to_string())?;
                    Progress::Reasoning(text.clone())
                }
                Part::DynamicTool(call) => {
                    if previous != Some(Progress::Tool(call.state)) {
                        let status = match call.state {
                            ToolState::InputStreaming => "started",
                            ToolState::InputAvailable => "running",
                            ToolState::OutputAvailable => "done",
                            ToolState::OutputError => "failed",
                        };
                        let line = format!("[{}: {}]", call.tool_name, status);
                        writeln!(out)?;
                        writeln!(out, "{}", line.dimmed())?;
                    }
                    Progress::Tool(call.state)
                }
            };

            match self.progress.get_mut(index) {
                Some(slot) => *slot = next,
                None => self.progress.push(next),
            }
        }
        Ok(())
    }
}
