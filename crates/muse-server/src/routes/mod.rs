//! HTTP handlers, grouped by concern.

pub mod inference;
pub mod system;
