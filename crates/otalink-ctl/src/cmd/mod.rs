//! CLI command modules.

pub mod digest;
pub mod image;
pub mod push;
