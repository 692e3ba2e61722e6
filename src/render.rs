//! Terminal page output.
//!
//! The pipeline reports what it sees as [`PageEvent`]s; a [`Render`]
//! implementation decides how they reach the user.

use std::io::Write;

use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::chat::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Page printed while the pipeline runs.
    #[default]
    Text,
    /// One JSON report once the pipeline is done.
    Json,
}

impl OutputMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PageEvent {
    Title(String),
    Status(String),
    Error(String),
    Subheader(String),
    Json(Value),
    Final(String),
    Conversation(Vec<Message>),
}

pub trait Render {
    fn emit(&mut self, event: PageEvent);
}

/// Keeps every event in order; used for JSON output and in tests.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<PageEvent>,
}

impl Recorder {
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|event| match event {
            PageEvent::Error(message) => Some(message.as_str()),
            _ => None,
        })
    }

    pub fn statuses(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|event| match event {
            PageEvent::Status(message) => Some(message.as_str()),
            _ => None,
        })
    }
}

impl Render for Recorder {
    fn emit(&mut self, event: PageEvent) {
        self.events.push(event);
    }
}

/// Writes the page as it happens.
pub struct TerminalPage<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> TerminalPage<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_event(&mut self, event: &PageEvent) -> std::io::Result<()> {
        match event {
            PageEvent::Title(title) => {
                let rule = "=".repeat(title.chars().count());
                if self.color {
                    writeln!(self.out, "{}", title.bold())?;
                } else {
                    writeln!(self.out, "{title}")?;
                }
                writeln!(self.out, "{rule}")
            }
            PageEvent::Status(message) => writeln!(self.out, "{message}"),
            PageEvent::Error(message) => {
                if self.color {
                    writeln!(self.out, "{} {message}", "error:".red().bold())
                } else {
                    writeln!(self.out, "error: {message}")
                }
            }
            PageEvent::Subheader(text) => {
                writeln!(self.out)?;
                if self.color {
                    writeln!(self.out, "{}", text.bold().underline())
                } else {
                    writeln!(self.out, "{text}")
                }
            }
            PageEvent::Json(value) => {
                let pretty =
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                if self.color {
                    writeln!(self.out, "{}", pretty.dimmed())
                } else {
                    writeln!(self.out, "{pretty}")
                }
            }
            PageEvent::Final(text) => {
                if self.color {
                    writeln!(self.out, "{}", text.green())
                } else {
                    writeln!(self.out, "{text}")
                }
            }
            PageEvent::Conversation(messages) => {
                writeln!(self.out)?;
                writeln!(self.out, "Full Conversation:")?;
                for message in messages {
                    if self.color {
                        writeln!(self.out, "{}: {}", message.role.cyan(), message.content)?;
                    } else {
                        writeln!(self.out, "{message}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl<W: Write> Render for TerminalPage<W> {
    fn emit(&mut self, event: PageEvent) {
        if let Err(err) = self.write_event(&event).and_then(|()| self.out.flush()) {
            warn!(error = %err, "failed to write page output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OutputMode, PageEvent, Recorder, Render, TerminalPage};
    use crate::chat::message::Message;
    use serde_json::json;

    fn render_plain(events: Vec<PageEvent>) -> String {
        let mut page = TerminalPage::new(Vec::new(), false);
        for event in events {
            page.emit(event);
        }
        String::from_utf8(page.into_inner()).expect("utf-8 output")
    }

    #[test]
    fn output_mode_parsing_is_case_insensitive() {
        assert_eq!(OutputMode::parse("JSON"), Some(OutputMode::Json));
        assert_eq!(OutputMode::parse(" text "), Some(OutputMode::Text));
        assert_eq!(OutputMode::parse("yaml"), None);
    }

    #[test]
    fn plain_page_prints_title_banner_and_conversation() {
        let output = render_plain(vec![
            PageEvent::Title("FizzBuzz".to_string()),
            PageEvent::Error("boom".to_string()),
            PageEvent::Conversation(vec![Message::user("hi"), Message::tool_result("c", "ok")]),
        ]);
        assert_eq!(
            output,
            "FizzBuzz\n========\nerror: boom\n\nFull Conversation:\nuser: hi\ntool: ok\n"
        );
    }

    #[test]
    fn json_events_are_pretty_printed() {
        let output = render_plain(vec![PageEvent::Json(json!({"id": "x"}))]);
        assert_eq!(output, "{\n  \"id\": \"x\"\n}\n");
    }

    #[test]
    fn recorder_filters_by_kind() {
        let mut recorder = Recorder::default();
        recorder.emit(PageEvent::Status("one".to_string()));
        recorder.emit(PageEvent::Error("two".to_string()));
        assert_eq!(recorder.statuses().collect::<Vec<_>>(), vec!["one"]);
        assert_eq!(recorder.errors().collect::<Vec<_>>(), vec!["two"]);
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let value = serde_json::to_value(PageEvent::Status("ok".to_string())).expect("serializable");
        assert_eq!(value, json!({"kind": "status", "value": "ok"}));
    }
}
