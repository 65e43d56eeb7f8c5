//! [`ClientContext`] holds the information relevant to the current client session during
//! the query

use std::sync::atomic::{AtomicBool, Ordering};

use super::uuid::QueryId;
use crate::STANDARD_BATCH_SIZE;

/// Holds the information relevant to the current client session
#[derive(Debug)]
pub struct ClientContext {
    /// Query id
    pub query_id: QueryId,
    /// Execution args
    pub exec_args: ExecArgs,
    cancelled: AtomicBool,
}

impl ClientContext {
    /// Create a new context for the query
    pub fn new(query_id: QueryId, exec_args: ExecArgs) -> Self {
        Self {
            query_id,
            exec_args,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Cancel the query. Operators observe the cancellation cooperatively, between rows
    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns true if the query is cancelled
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Arguments for execution
#[derive(Debug, Clone)]
pub struct ExecArgs {
    /// Number of rows in the batches created by the operators
    pub batch_size: usize,
    /// Maximum number of bytes each operator may allocate for its state, `None` means
    /// unlimited
    pub mem_limit: Option<usize>,
}

impl Default for ExecArgs {
    fn default() -> Self {
        Self {
            batch_size: STANDARD_BATCH_SIZE,
            mem_limit: None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mock_client_context() -> ClientContext {
        ClientContext::new(
            QueryId::from_u128(44),
            ExecArgs {
                batch_size: 4,
                mem_limit: None,
            },
        )
    }

    #[test]
    fn test_cancel() {
        let client_ctx = mock_client_context();
        assert!(!client_ctx.is_cancelled());
        client_ctx.cancel();
        assert!(client_ctx.is_cancelled());
    }
}
