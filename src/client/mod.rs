//! Chat client
//!
//! ```text
//! ChatView ◄── ChatController ──► TransportClient ──ws──► relay
//!                   │
//!                   └──► ChatHistory<KeyValueStore>
//! ```

pub mod controller;
pub mod history;
pub mod message;
pub mod terminal;
pub mod transport;
pub mod util;

pub use controller::{ChatController, ChatView, FrameSink, HistoryItem};
pub use history::{
    ChatHistory, Conversation, ConversationPatch, FileStore, KeyValueStore, MemoryStore,
};
pub use message::{contains_code, format_message_html, ChatMessage, Sender};
pub use terminal::{ReplCommand, TerminalView};
pub use transport::{
    endpoint_from_origin, ConnectionState, TransportClient, TransportEvent, TransportEventKind,
};
pub use util::{format_timestamp, generate_id, truncate_title};
