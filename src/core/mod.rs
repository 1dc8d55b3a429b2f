//! Chat core
//!
//! The session message log and the turn orchestration that feeds it.

mod chat;
mod store;

pub use chat::{ChatSession, SessionSlot};
pub use store::MessageStore;
