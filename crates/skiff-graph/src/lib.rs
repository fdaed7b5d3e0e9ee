//! # skiff-graph
//!
//! The dev-mode module graph: nodes keyed by URL and resolved id, HMR
//! invalidation bookkeeping, and the guarded module-info view handed to
//! plugins. URL resolution is pluggable; the dev environment wires it to its
//! plugin container during init.

pub mod graph;
pub mod info;
pub mod node;

pub use graph::{ModuleGraph, ModuleResolver, SharedModuleNode};
pub use info::ModuleInfo;
pub use node::ModuleNode;
