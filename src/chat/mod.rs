//! Per-session chat state: the saved chats, the active one and the pending request.

pub mod registry;
pub mod session;
pub mod submit;
