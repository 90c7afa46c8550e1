//! Line-oriented terminal front end for the chat controller

use crate::client::controller::{ChatView, HistoryItem};
use crate::client::message::{ChatMessage, Sender};
use chrono::{Local, TimeZone};
use std::io::Write;

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    NewChat,
    List,
    /// Index from `/list` (1-based) or a conversation id
    Load(String),
    Delete(String),
    Help,
    Quit,
}

impl ReplCommand {
    /// Parse a line; `None` for blank input
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(ReplCommand::Send(line.to_string()));
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default().to_string();

        let command = match (name, arg.is_empty()) {
            ("/new", _) => ReplCommand::NewChat,
            ("/list", _) => ReplCommand::List,
            ("/load", false) => ReplCommand::Load(arg),
            ("/delete", false) => ReplCommand::Delete(arg),
            ("/quit" | "/exit", _) => ReplCommand::Quit,
            _ => ReplCommand::Help,
        };
        Some(command)
    }
}

pub const HELP_TEXT: &str = "\
Commands:
  /new            start a new conversation
  /list           show saved conversations
  /load <n|id>    switch to a saved conversation
  /delete <n|id>  delete a saved conversation
  /quit           save and exit
Anything else is sent to the agent.";

/// [`ChatView`] that prints to a writer
pub struct TerminalView<W: Write> {
    out: W,
    connected: Option<bool>,
    input_enabled: bool,
    history: Vec<HistoryItem>,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            connected: None,
            input_enabled: false,
            history: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    /// Map a `/list` index or an id to a conversation id
    pub fn resolve(&self, arg: &str) -> Option<String> {
        if let Ok(index) = arg.parse::<usize>() {
            return index
                .checked_sub(1)
                .and_then(|i| self.history.get(i))
                .map(|item| item.id.clone());
        }
        self.history
            .iter()
            .find(|item| item.id == arg)
            .map(|item| item.id.clone())
    }

    pub fn print_history(&mut self) {
        if self.history.is_empty() {
            self.line("(no saved conversations)");
            return;
        }
        let lines: Vec<String> = self
            .history
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "{} {:>2}. {}  [{}]",
                    if item.active { "*" } else { " " },
                    i + 1,
                    item.title,
                    item.updated
                )
            })
            .collect();
        for line in lines {
            self.line(&line);
        }
    }

    pub fn print_help(&mut self) {
        self.line(HELP_TEXT);
    }

    fn line(&mut self, text: &str) {
        // Terminal output failures are not actionable
        let _ = writeln!(self.out, "{}", text);
        let _ = self.out.flush();
    }
}

fn clock(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

impl<W: Write> ChatView for TerminalView<W> {
    fn append_message(&mut self, message: &ChatMessage) {
        let who = match message.sender {
            Sender::User => "you",
            Sender::Assistant => "openclaw",
        };
        let text = format!("[{}] {}> {}", clock(message.timestamp), who, message.text);
        self.line(&text);
    }

    fn clear_messages(&mut self) {
        self.line("----------------------------------------");
    }

    fn show_typing(&mut self) {
        self.line("openclaw is typing...");
    }

    fn hide_typing(&mut self) {}

    fn set_input_enabled(&mut self, enabled: bool) {
        self.input_enabled = enabled;
    }

    fn set_send_enabled(&mut self, _enabled: bool) {}

    fn clear_input(&mut self) {}

    fn set_connection_status(&mut self, connected: bool) {
        if self.connected != Some(connected) {
            self.connected = Some(connected);
            self.line(if connected {
                "● connected"
            } else {
                "○ disconnected"
            });
        }
    }

    fn show_error(&mut self, message: &str) {
        let text = format!("! {}", message);
        self.line(&text);
    }

    fn hide_error(&mut self) {}

    fn render_history(&mut self, items: &[HistoryItem]) {
        self.history = items.to_vec();
    }
}
