//! Core SMTP types.

mod extension;
mod reply;

pub use extension::Extensions;
pub use reply::{Reply, ReplyCode};
