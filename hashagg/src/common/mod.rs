//! Common utilities shared by the modules in the crate

pub mod client_context;
pub mod profiler;
pub mod utils;
pub mod uuid;
