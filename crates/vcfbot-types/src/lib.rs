//! Shared types for the VCF bot session manager.

pub mod jid;
mod message;
mod session;
mod settings;

pub use message::*;
pub use session::*;
pub use settings::*;
