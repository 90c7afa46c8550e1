//! Chat controller
//!
//! Ties the transport, the history store and a [`ChatView`] together. The
//! active conversation's messages are kept in memory; the view only ever
//! renders them, and every save reads the in-memory list.

use crate::client::history::{ChatHistory, Conversation, ConversationPatch, KeyValueStore};
use crate::client::message::ChatMessage;
use crate::client::transport::TransportEvent;
use crate::client::util::{format_timestamp, generate_id, truncate_title, TITLE_MAX_CHARS};
use crate::error::Result;
use crate::protocol::Frame;
use std::sync::Arc;

/// Title of a conversation nobody has written in yet
pub const NEW_CHAT_TITLE: &str = "New chat";
/// Title used when a conversation has none
pub const UNTITLED_CHAT_TITLE: &str = "Untitled chat";
/// First message of every new conversation
pub const GREETING_MESSAGE: &str = "Hello! This is a new conversation.";
pub const WELCOME_MESSAGE: &str =
    "Connected to the local OpenClaw instance. You can start chatting now.";
pub const DISCONNECT_MESSAGE: &str =
    "Connection to the local OpenClaw instance was lost. Reconnecting...";
pub const UNPARSEABLE_MESSAGE: &str = "Received a message that could not be parsed";

/// Anything that can carry frames to the relay
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: &Frame) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// Sidebar entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub id: String,
    pub title: String,
    /// Local time, already formatted
    pub updated: String,
    pub active: bool,
}

/// Rendering surface driven by the controller
pub trait ChatView {
    fn append_message(&mut self, message: &ChatMessage);
    fn clear_messages(&mut self);
    fn show_typing(&mut self);
    fn hide_typing(&mut self);
    fn set_input_enabled(&mut self, enabled: bool);
    fn set_send_enabled(&mut self, enabled: bool);
    fn clear_input(&mut self);
    fn set_connection_status(&mut self, connected: bool);
    fn show_error(&mut self, message: &str);
    fn hide_error(&mut self);
    fn render_history(&mut self, items: &[HistoryItem]);
}

fn is_placeholder_title(title: &str) -> bool {
    title.is_empty() || title == NEW_CHAT_TITLE || title == UNTITLED_CHAT_TITLE
}

/// Chat UI state machine
pub struct ChatController<V: ChatView, S: KeyValueStore, T: FrameSink> {
    view: V,
    history: ChatHistory<S>,
    transport: Arc<T>,
    active_id: String,
    active_title: String,
    messages: Vec<ChatMessage>,
}

impl<V: ChatView, S: KeyValueStore, T: FrameSink> ChatController<V, S, T> {
    pub fn new(view: V, history: ChatHistory<S>, transport: Arc<T>) -> Self {
        Self {
            view,
            history,
            transport,
            active_id: generate_id(),
            active_title: NEW_CHAT_TITLE.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn active_title(&self) -> &str {
        &self.active_title
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn history(&self) -> &ChatHistory<S> {
        &self.history
    }

    /// Show a fresh conversation and the sidebar; input stays off until Open
    pub fn start(&mut self) {
        self.reset_conversation();
        self.view.set_connection_status(self.transport.is_connected());
        self.view.set_input_enabled(self.transport.is_connected());
        self.refresh_history();
    }

    /// Send what the user typed. Returns whether a frame was attempted.
    pub fn send_message(&mut self, input: &str) -> bool {
        let text = input.trim();
        if text.is_empty() || !self.transport.is_connected() {
            return false;
        }

        self.add_message(ChatMessage::user(text));

        if is_placeholder_title(&self.active_title) {
            self.active_title = truncate_title(text, TITLE_MAX_CHARS);
            self.history
                .update(&self.active_id, ConversationPatch::title(self.active_title.clone()));
            self.refresh_history();
        }

        self.view.clear_input();
        self.view.set_send_enabled(false);

        if let Err(e) = self.transport.send(&Frame::chat_message(text)) {
            tracing::warn!("Error sending message: {}", e);
            self.add_message(ChatMessage::assistant(format!("Error sending message: {}", e)));
            self.view.hide_typing();
        }
        true
    }

    /// React to one transport event
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                self.view.set_connection_status(true);
                self.view.set_input_enabled(true);
                self.view.set_send_enabled(true);
                self.view.hide_error();
                if self.messages.len() <= 1 {
                    self.add_message(ChatMessage::assistant(WELCOME_MESSAGE));
                }
            }
            TransportEvent::Message(text) => self.handle_frame(&text),
            TransportEvent::Close => {
                self.view.set_connection_status(false);
                self.view.set_input_enabled(false);
                self.view.set_send_enabled(false);
                self.add_message(ChatMessage::assistant(DISCONNECT_MESSAGE));
            }
            TransportEvent::Error(message) => {
                self.view.set_connection_status(false);
                self.view
                    .show_error(&format!("WebSocket connection error: {}", message));
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        match Frame::parse(text) {
            Ok(Frame::TypingStart) => {
                self.view.show_typing();
                self.view.set_send_enabled(true);
            }
            Ok(Frame::ChatResponse { message }) => {
                self.add_message(ChatMessage::assistant(message));
                self.view.hide_typing();
                self.view.set_send_enabled(true);
            }
            Ok(Frame::Error { message }) => {
                self.add_message(ChatMessage::assistant(format!("Error: {}", message)));
                self.view.hide_typing();
                self.view.set_send_enabled(true);
            }
            Ok(other) => {
                tracing::debug!(kind = other.kind(), "Ignoring frame from relay");
            }
            Err(e) => {
                tracing::warn!("Failed to parse frame from relay: {}", e);
                self.add_message(ChatMessage::assistant(UNPARSEABLE_MESSAGE));
                self.view.hide_typing();
            }
        }
    }

    /// Save the current conversation and open a new one
    pub fn new_chat(&mut self) {
        self.save_current();
        self.reset_conversation();
        self.history.add(
            Conversation::new(self.active_id.clone(), self.active_title.clone())
                .with_messages(self.messages.clone()),
        );
        self.refresh_history();
    }

    /// Switch to a stored conversation. False when `id` is unknown.
    pub fn load_chat(&mut self, id: &str) -> bool {
        self.save_current();

        let Some(conversation) = self.history.find(id) else {
            tracing::debug!(id, "Conversation not found");
            return false;
        };

        self.active_id = conversation.id;
        self.active_title = conversation.title;
        self.messages = conversation.messages;

        self.view.clear_messages();
        for message in &self.messages {
            self.view.append_message(message);
        }
        self.refresh_history();
        true
    }

    /// Delete a conversation; deleting the active one opens a fresh chat
    pub fn delete_chat(&mut self, id: &str) {
        self.history.delete(id);

        if id == self.active_id {
            // The deleted conversation must not be saved back
            self.reset_conversation();
            self.history.add(
                Conversation::new(self.active_id.clone(), self.active_title.clone())
                    .with_messages(self.messages.clone()),
            );
        }
        self.refresh_history();
    }

    pub fn page_hidden(&mut self) {
        self.save_current();
    }

    pub fn unload(&mut self) {
        self.save_current();
    }

    fn add_message(&mut self, message: ChatMessage) {
        self.view.append_message(&message);
        self.messages.push(message);
        self.save_current();
    }

    fn save_current(&mut self) {
        let title = if self.active_title.is_empty() {
            UNTITLED_CHAT_TITLE.to_string()
        } else {
            self.active_title.clone()
        };
        self.history.upsert(
            Conversation::new(self.active_id.clone(), title).with_messages(self.messages.clone()),
        );
    }

    /// New id, placeholder title, greeting only; nothing persisted
    fn reset_conversation(&mut self) {
        self.active_id = generate_id();
        self.active_title = NEW_CHAT_TITLE.to_string();
        self.messages = vec![ChatMessage::assistant(GREETING_MESSAGE)];

        self.view.clear_messages();
        for message in &self.messages {
            self.view.append_message(message);
        }
    }

    fn refresh_history(&mut self) {
        let items: Vec<HistoryItem> = self
            .history
            .load()
            .into_iter()
            .map(|c| HistoryItem {
                active: c.id == self.active_id,
                title: if c.title.is_empty() {
                    UNTITLED_CHAT_TITLE.to_string()
                } else {
                    c.title
                },
                updated: format_timestamp(c.timestamp),
                id: c.id,
            })
            .collect();
        self.view.render_history(&items);
    }
}
