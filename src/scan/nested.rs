// Scan Body Rewriting
//
// Runs the same database and profile over each Scan body, one nesting level
// deeper, and swaps in the rewritten body when it changed.

use crate::core::error::Result;
use crate::ir::{ApplyId, FunctionGraph, GraphFingerprint, OpKind, Operation};
use crate::optimizer::engine::EquilibriumEngine;
use crate::optimizer::pass::{LocalRewriter, Replacement, RewriteContext};
use std::sync::Arc;

/// Recursive rewrite of Scan bodies
pub struct ScanBodyRewrite;

impl LocalRewriter for ScanBodyRewrite {
    fn name(&self) -> &str {
        "scan_body_rewrite"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Scan]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let node = fgraph.apply(apply)?;
        let Operation::Scan(scan) = &node.op else {
            return Ok(None);
        };
        let depth = cx.depth + 1;
        if depth > cx.profile.max_nesting_depth() {
            log::debug!(
                "Not rewriting body of scan '{}': nesting depth {} exceeds {}",
                scan.name(),
                depth,
                cx.profile.max_nesting_depth()
            );
            return Ok(None);
        }

        let scan = Arc::clone(scan);
        let inputs = node.inputs.clone();
        let outputs = node.outputs.clone();

        let mut body = scan.body().clone();
        let report = EquilibriumEngine::new(cx.db, cx.profile)
            .with_depth(depth)
            .rewrite(&mut body)?;
        if report.total_applied() == 0 {
            return Ok(None);
        }
        body.collect_garbage();
        if GraphFingerprint::of(&body) == *scan.body_digest() {
            return Ok(None);
        }
        log::debug!(
            "Body of scan '{}' rewritten: {} applications in {} passes",
            scan.name(),
            report.total_applied(),
            report.passes
        );

        let rewritten = scan.with_body(body)?;
        let new_apply = fgraph.make_apply(Operation::Scan(Arc::new(rewritten)), inputs)?;
        let new_outputs = fgraph.apply(new_apply)?.outputs.clone();
        let pairs = outputs
            .into_iter()
            .zip(new_outputs)
            .filter(|&(old, _)| !fgraph.clients(old).is_empty())
            .collect();
        Ok(Some(pairs))
    }
}
