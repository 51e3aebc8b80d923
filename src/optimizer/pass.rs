// Rewrite Infrastructure
//
// Local rewriters are matched per apply node by operation kind and propose
// replacements; the engine applies them. Global rewriters see the whole
// graph and perform their own replacements.

use crate::core::error::Result;
use crate::ir::{ApplyId, FunctionGraph, OpKind, VarId};
use crate::optimizer::db::RewriteDb;
use crate::optimizer::profile::RewriteProfile;

/// `(old, new)` pairs, one per replaced output
pub type Replacement = Vec<(VarId, VarId)>;

/// Per-node rewrite rule
pub trait LocalRewriter: Send + Sync {
    fn name(&self) -> &str;

    /// Operation kinds this rule can match
    fn tracks(&self) -> &[OpKind];

    /// Propose a replacement for `apply`, or `None` for no change
    ///
    /// New nodes may be created in the graph's arena; membership must not
    /// be changed.
    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        cx: &RewriteContext,
    ) -> Result<Option<Replacement>>;
}

/// Whole-graph rewrite rule
pub trait GlobalRewriter: Send + Sync {
    fn name(&self) -> &str;

    /// Run the rule; returns true if the graph was modified
    fn apply(&self, fgraph: &mut FunctionGraph, cx: &RewriteContext) -> Result<bool>;
}

/// State shared with rules during one engine run
#[derive(Clone, Copy)]
pub struct RewriteContext<'a> {
    pub db: &'a RewriteDb,
    pub profile: &'a RewriteProfile,
    /// Scan body nesting level, 0 for the top-level graph
    pub depth: usize,
}

impl<'a> RewriteContext<'a> {
    pub fn new(db: &'a RewriteDb, profile: &'a RewriteProfile) -> Self {
        Self { db, profile, depth: 0 }
    }

    /// Context for rewriting a nested body
    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..*self
        }
    }
}
