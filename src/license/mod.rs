//! License policy evaluation.
//!
//! - [`policy`]: compiles the configured allow-list patterns and per-ecosystem
//!   package overrides into an immutable [`Policy`](policy::Policy) that every
//!   package constructor and resolver receives explicitly.

pub mod policy;
