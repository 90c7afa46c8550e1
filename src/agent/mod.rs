//! Agent module — one CLI process per chat message
//!
//! ```text
//! Relay ──invoke(text)──► CommandInvoker ──spawn──► openclaw agent --agent main --message <text>
//!       ◄──InvocationOutput { exit_code, stdout, stderr }──
//! ```

pub mod invoker;

pub use invoker::{compose_reply, AgentInvoker, CommandInvoker, InvocationOutput};
