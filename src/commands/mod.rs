//! The command catalog.
//!
//! Each submodule contributes the [`CommandSpec`]s for one area. The
//! registry is built once from [`catalog`] and never changes afterwards.

pub mod access;
pub mod info;
pub mod lifecycle;
pub mod run;
pub mod upload;

use crate::core::registry::CommandSpec;

/// Every command the agent serves.
pub fn catalog() -> Vec<CommandSpec> {
    let mut specs = Vec::new();
    specs.extend(access::specs());
    specs.extend(info::specs());
    specs.extend(lifecycle::specs());
    specs.extend(run::specs());
    specs.extend(upload::specs());
    specs
}
