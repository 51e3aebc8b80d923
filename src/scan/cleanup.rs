// Scan Cleanup Rewrites
//
// Structural simplifications that keep a Scan small after pushouts:
// - scan_merge_inouts: duplicate outer inputs and duplicate outputs
// - scan_forward_outputs: outputs that only copy an input
// - scan_remove_unused: outputs nobody reads, inputs the body ignores and
//   constant non-sequences

use crate::core::error::Result;
use crate::ir::{ApplyId, Dim, FunctionGraph, OpKind, VarId};
use crate::optimizer::pass::{LocalRewriter, Replacement, RewriteContext};
use crate::scan::op::StoreMode;
use crate::scan::parts::{InnerRole, InputPart, ScanParts};

fn seqs_of(parts: &mut ScanParts) -> &mut Vec<InputPart> {
    &mut parts.seqs
}

fn non_seqs_of(parts: &mut ScanParts) -> &mut Vec<InputPart> {
    &mut parts.non_seqs
}

/// Fold inputs sharing an outer variable into one; returns the number merged
fn dedup_inputs(
    parts: &mut ScanParts,
    select: fn(&mut ScanParts) -> &mut Vec<InputPart>,
    reason: &str,
) -> Result<usize> {
    let mut merged = 0;
    let mut i = 0;
    while i < select(parts).len() {
        let current = select(parts)[i];
        let first = select(parts)[..i]
            .iter()
            .find(|p| p.outer == current.outer)
            .copied();
        match first {
            Some(keep) => {
                parts.replace_inner(current.inner, keep.inner, reason)?;
                select(parts).remove(i);
                merged += 1;
            }
            None => i += 1,
        }
    }
    Ok(merged)
}

/// Merge duplicated sequences, non-sequences and per-step outputs
pub struct ScanMergeInouts;

impl LocalRewriter for ScanMergeInouts {
    fn name(&self) -> &str {
        "scan_merge_inouts"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Scan]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let Some(mut parts) = ScanParts::from_apply(fgraph, apply)? else {
            return Ok(None);
        };

        let mut merged = dedup_inputs(&mut parts, seqs_of, self.name())?;
        merged += dedup_inputs(&mut parts, non_seqs_of, self.name())?;

        // Outputs computed by the same inner variable with the same store mode
        let mut aliases: Vec<(VarId, usize)> = Vec::new();
        let mut p = 0;
        while p < parts.per_step.len() {
            let current = parts.per_step[p];
            let first = parts.per_step[..p]
                .iter()
                .position(|o| o.inner == current.inner && o.mode == current.mode);
            match first {
                Some(keep) => {
                    if let Some(old) = current.old_outer {
                        aliases.push((old, keep));
                    }
                    parts.per_step.remove(p);
                    merged += 1;
                }
                None => p += 1,
            }
        }

        if merged == 0 {
            return Ok(None);
        }
        log::trace!("Merged {} duplicate inputs/outputs of scan '{}'", merged, parts.name);

        let n_recurrent = parts.recurrent.len();
        let mut built = parts.build(fgraph)?;
        for (old, keep) in aliases {
            if !fgraph.clients(old).is_empty() {
                built.replacement.push((old, built.outputs[n_recurrent + keep]));
            }
        }
        Ok(Some(built.replacement))
    }
}

/// Bypass outputs that copy a sequence or a non-sequence
pub struct ScanForwardOutputs;

impl LocalRewriter for ScanForwardOutputs {
    fn name(&self) -> &str {
        "scan_forward_outputs"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Scan]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let Some(parts) = ScanParts::from_apply(fgraph, apply)? else {
            return Ok(None);
        };

        let mut pairs = Vec::new();
        for part in &parts.per_step {
            let Some(old) = part.old_outer else {
                continue;
            };
            if fgraph.clients(old).is_empty() {
                continue;
            }
            let source = match (parts.role_of(part.inner), part.mode) {
                // Every slice is emitted, so the stacked output is the sequence itself
                // when the loop visits all of it
                (Some(InnerRole::Seq(i)), StoreMode::AllSteps) => {
                    parts.covers(fgraph, i)?.then_some(parts.seqs[i].outer)
                }
                (Some(InnerRole::NonSeq(i)), StoreMode::LastStep) => Some(parts.non_seqs[i].outer),
                _ => None,
            };
            let Some(source) = source else {
                continue;
            };
            if fgraph.var_type(source)? == fgraph.var_type(old)? {
                pairs.push((old, source));
            }
        }

        if pairs.is_empty() {
            return Ok(None);
        }
        log::trace!("Forwarding {} outputs of scan '{}'", pairs.len(), parts.name);
        Ok(Some(pairs))
    }
}

/// Drop dead outputs, ignored inputs and constant non-sequences
pub struct ScanRemoveUnused;

impl ScanRemoveUnused {
    fn is_used(fgraph: &FunctionGraph, old: Option<VarId>) -> bool {
        old.is_some_and(|v| !fgraph.clients(v).is_empty())
    }

    /// Inner outputs of everything kept except recurrent part `skip`
    fn kept_outputs(parts: &ScanParts, skip: usize) -> Vec<VarId> {
        parts
            .recurrent
            .iter()
            .enumerate()
            .filter(|&(r, _)| r != skip)
            .map(|(_, p)| p.inner_out)
            .chain(parts.per_step.iter().map(|p| p.inner))
            .collect()
    }

    fn remove_outputs(fgraph: &FunctionGraph, parts: &mut ScanParts) -> Result<usize> {
        let before = parts.n_outputs();
        parts.per_step.retain(|p| Self::is_used(fgraph, p.old_outer));

        // A dead state can only go once nothing kept reads it
        loop {
            let mut dropped = None;
            for r in 0..parts.recurrent.len() {
                if Self::is_used(fgraph, parts.recurrent[r].old_outer) {
                    continue;
                }
                let needed = parts.inputs_used_by(&Self::kept_outputs(parts, r))?;
                if !needed.contains(&parts.recurrent[r].inner_in) {
                    dropped = Some(r);
                    break;
                }
            }
            match dropped {
                Some(r) => {
                    parts.recurrent.remove(r);
                }
                None => break,
            }
        }
        Ok(before - parts.n_outputs())
    }

    fn remove_inputs(fgraph: &FunctionGraph, parts: &mut ScanParts) -> Result<usize> {
        let mut removed = 0;
        let used = parts.inputs_used_by(&parts.inner_outputs())?;

        let before = parts.non_seqs.len();
        parts.non_seqs.retain(|p| used.contains(&p.inner));
        removed += before - parts.non_seqs.len();

        let mut i = 0;
        while i < parts.seqs.len() {
            if used.contains(&parts.seqs[i].inner) {
                i += 1;
                continue;
            }
            let len = parts.seq_len(fgraph, i)?;
            let others = (0..parts.seqs.len())
                .filter(|&j| j != i)
                .map(|j| parts.seq_len(fgraph, j))
                .collect::<Result<Vec<Dim>>>()?;

            // The step count must not change with the sequence gone
            let droppable = match (parts.n_steps, &len) {
                (Some(_), _) => true,
                (None, _) if others.contains(&len) => true,
                (None, Dim::Concrete(n)) if others.is_empty() => {
                    parts.n_steps = Some(*n);
                    true
                }
                _ => false,
            };
            if droppable {
                parts.seqs.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        Ok(removed)
    }

    fn inline_constants(fgraph: &FunctionGraph, parts: &mut ScanParts, reason: &str) -> Result<usize> {
        let mut inlined = 0;
        let mut i = 0;
        while i < parts.non_seqs.len() {
            let part = parts.non_seqs[i];
            let Some(value) = fgraph.constant_value(part.outer).cloned() else {
                i += 1;
                continue;
            };
            let dtype = fgraph.var_type(part.outer)?.scalar_type();
            let constant = parts.body.make_constant(value, dtype);
            parts.replace_inner(part.inner, constant, reason)?;
            parts.non_seqs.remove(i);
            inlined += 1;
        }
        Ok(inlined)
    }
}

impl LocalRewriter for ScanRemoveUnused {
    fn name(&self) -> &str {
        "scan_remove_unused"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Scan]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let Some(mut parts) = ScanParts::from_apply(fgraph, apply)? else {
            return Ok(None);
        };

        let outputs = Self::remove_outputs(fgraph, &mut parts)?;
        if parts.n_outputs() == 0 {
            return Ok(None);
        }
        let inlined = Self::inline_constants(fgraph, &mut parts, self.name())?;
        let inputs = Self::remove_inputs(fgraph, &mut parts)?;
        if outputs + inlined + inputs == 0 {
            return Ok(None);
        }
        log::trace!(
            "Scan '{}': dropped {} outputs and {} inputs, inlined {} constants",
            parts.name,
            outputs,
            inputs,
            inlined
        );
        Ok(Some(parts.build(fgraph)?.replacement))
    }
}
