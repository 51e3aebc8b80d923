// Optimizer Module: graph rewriting
//
// Rule traits, the rule database, profiles, the equilibrium engine and the
// generic (non-Scan) rules.

pub mod algebraic;
pub mod db;
pub mod engine;
pub mod merge;
pub mod pass;
pub mod profile;

// Re-exports
pub use db::{Rewrite, RewriteDb, RewriteEntry, Selection};
pub use engine::{EquilibriumEngine, RewriteReport};
pub use merge::MergeRewriter;
pub use pass::{GlobalRewriter, LocalRewriter, Replacement, RewriteContext};
pub use profile::RewriteProfile;
