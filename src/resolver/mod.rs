//! Resolution of requested packages to concrete, licensed packages.
//!
//! - [`requirement`], [`marker`], [`wheel`]: requirements-file parsing.
//! - [`pip`], [`installer`]: Python packages from before/after install snapshots.
//! - [`apt`]: system packages from Ubuntu copyright files, with an on-disk cache.

pub mod apt;
pub mod installer;
pub mod marker;
pub mod pip;
pub mod requirement;
pub mod wheel;
