pub mod language;
pub mod message;
pub mod sidebar;
