//! ClawBridge - single-user web chat relay for a local OpenClaw agent
//!
//! ClawBridge puts a browser (or terminal) chat in front of the OpenClaw
//! command-line agent. Every chat message runs one agent process; its output
//! comes back as the reply.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐          ┌─────────────────────────────────┐
//! │       Chat client        │          │          Relay server           │
//! │  ┌────────────────────┐  │  JSON    │  ┌───────────────────────────┐  │
//! │  │   ChatController   │  │  frames  │  │  ConnectionSlot (one      │  │
//! │  │  ChatView  History │  │◄────────►│  │  client at a time)        │  │
//! │  └─────────┬──────────┘  │ WebSocket│  └─────────────┬─────────────┘  │
//! │  ┌─────────▼──────────┐  │          │  ┌─────────────▼─────────────┐  │
//! │  │  TransportClient   │  │          │  │  AgentInvoker             │  │
//! │  │  (auto-reconnect)  │  │          │  │  openclaw agent --message │  │
//! │  └────────────────────┘  │          │  └───────────────────────────┘  │
//! └──────────────────────────┘          └─────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: wire frames
//! - [`relay`]: HTTP/WebSocket relay server and connection slot
//! - [`agent`]: agent process invocation
//! - [`client`]: transport, controller, history store and terminal view
//! - [`config`]: configuration management

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;

pub use config::BridgeConfig;
pub use error::{Error, Result};
