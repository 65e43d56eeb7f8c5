#![warn(clippy::todo)]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    rustdoc::private_intra_doc_links,
    rust_2018_idioms,
    missing_docs,
    clippy::needless_borrow,
    clippy::redundant_clone,
    missing_debug_implementations
)]

//! # HashAgg
//!
//! `HashAgg` is the in-memory hash based `GROUP BY` operator of a row oriented query
//! engine. It pulls [`RowBatch`]es from its child, builds one intermediate tuple per
//! distinct grouping key in a swiss table and emits one output row per group after the
//! input is exhausted.
//!
//! [`RowBatch`]: tuple_block::batch::RowBatch

pub mod common;
pub mod error;
pub mod exec;

/// The default number of rows in the [`RowBatch`](tuple_block::batch::RowBatch)
pub const STANDARD_BATCH_SIZE: usize = 1024;
