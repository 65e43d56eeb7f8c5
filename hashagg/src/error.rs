//! Error in hashagg

/// Sendable error, the boxed source of the errors that cross the operator boundary
pub type SendableError = Box<dyn std::error::Error + Send + Sync>;
