//! Slug Core: value machinery shared by the Slug runtime
//!
//! This crate holds the leaf value types that everything above it builds on.
//! Today that is `Dec64`, the packed decimal number type that backs every
//! Slug `Number`. It deliberately has no runtime dependencies so the
//! arithmetic can be tested and reasoned about in isolation.

pub mod dec64;

pub use dec64::{Dec64, ParseDec64Error, Rounding};
