//! REST endpoint handlers organized by resource.

pub mod key_exchange;
pub mod system;
