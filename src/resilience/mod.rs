//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (enforce the hard fetch deadline)
//!     → On failure: surface immediately as an error response
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No automatic retries; a failed fetch is the caller's to retry

pub mod timeouts;

pub use timeouts::with_deadline;
