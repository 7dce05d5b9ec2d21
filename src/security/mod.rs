//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound fetch:
//!     → limits.rs (wait for a fetch slot)
//!
//! Upstream response:
//!     → headers.rs (strip framing denials, inject permissive set)
//!     → Emit to caller
//! ```
//!
//! # Design Decisions
//! - The proxy exists to lift framing restrictions, so "security" here means
//!   bounding resource use, not protecting the embedded page
//! - Header rules are fixed tables, applied identically to every response

pub mod headers;
pub mod limits;

pub use headers::{apply_cors_headers, sanitize_headers};
pub use limits::FetchLimiter;
