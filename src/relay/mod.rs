//! WebSocket relay between the chat UI and the agent CLI
//!
//! Owns the single connection slot, turns `chat_message` frames into agent
//! invocations and sends `typing_start` / `chat_response` / `error` frames
//! back to whichever client holds the slot.

pub mod handler;
mod server;
pub mod slot;

pub use handler::router;
pub use server::{
    AcceptedConnection, RelayServer, RelayServerBuilder, RelayState, BUSY_MESSAGE,
    SLOT_TAKEN_MESSAGE,
};
pub use slot::{Admission, ConnectionHandle, ConnectionId, ConnectionSlot, Outbound};
