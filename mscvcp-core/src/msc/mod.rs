//! USB Mass Storage Class, Bulk-Only Transport.

pub mod cases;
mod handlers;
pub mod machine;
pub mod media;
pub mod scsi;
pub mod session;
pub mod wrapper;

pub use machine::{BotError, BotMachine};
pub use session::{BotState, Session};
