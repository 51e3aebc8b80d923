// Equilibrium Rewrite Engine
//
// Runs the rules selected by a profile until a full pass changes nothing or
// the iteration cap is reached. Each pass runs the global rules, then drains
// a work-list of apply nodes seeded in topological order. A failed rule is
// recorded and skipped; only a graph left inconsistent aborts the run.

use crate::core::error::{ErrorKind, GraphError, Result};
use crate::ir::{ApplyId, Client, FunctionGraph, OpKind};
use crate::optimizer::db::RewriteDb;
use crate::optimizer::pass::{LocalRewriter, Replacement, RewriteContext};
use crate::optimizer::profile::RewriteProfile;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Visits allowed per pass, per apply present at the start of the pass
const VISITS_PER_NODE: usize = 32;

/// Outcome of one engine run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    /// A pass completed with no change
    pub converged: bool,
    pub passes: usize,
    /// Successful applications per rule
    pub applied: BTreeMap<String, usize>,
    /// Failed transforms or rejected replacements per rule
    pub rejected: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

impl RewriteReport {
    pub fn total_applied(&self) -> usize {
        self.applied.values().sum()
    }

    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }

    pub fn applied_count(&self, rule: &str) -> usize {
        self.applied.get(rule).copied().unwrap_or(0)
    }
}

/// Fixpoint driver over a rewrite database
pub struct EquilibriumEngine<'a> {
    db: &'a RewriteDb,
    profile: &'a RewriteProfile,
    depth: usize,
}

impl<'a> EquilibriumEngine<'a> {
    pub fn new(db: &'a RewriteDb, profile: &'a RewriteProfile) -> Self {
        Self {
            db,
            profile,
            depth: 0,
        }
    }

    /// Engine for a body nested `depth` Scans deep
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Rewrite `fgraph` in place
    pub fn rewrite(&self, fgraph: &mut FunctionGraph) -> Result<RewriteReport> {
        let selection = self.db.select(self.profile);
        let cx = RewriteContext {
            db: self.db,
            profile: self.profile,
            depth: self.depth,
        };
        let mut report = RewriteReport::default();

        if selection.is_empty() {
            report.converged = true;
            return Ok(report);
        }

        let mut by_kind: HashMap<OpKind, Vec<&dyn LocalRewriter>> = HashMap::new();
        for &rule in &selection.locals {
            for &kind in rule.tracks() {
                by_kind.entry(kind).or_default().push(rule);
            }
        }

        log::debug!(
            "Equilibrium rewrite at depth {}: {} local, {} global rules, {} applies",
            self.depth,
            selection.locals.len(),
            selection.globals.len(),
            fgraph.num_applies()
        );

        for pass in 0..self.profile.max_iterations() {
            report.passes = pass + 1;
            let mut changes = 0;

            for &global in &selection.globals {
                match global.apply(fgraph, &cx) {
                    Ok(true) => {
                        changes += 1;
                        *report.applied.entry(global.name().to_string()).or_insert(0) += 1;
                        log::debug!("Global rewrite '{}' modified the graph", global.name());
                    }
                    Ok(false) => {}
                    Err(err) => self.reject(fgraph, &mut report, global.name(), None, err)?,
                }
            }

            changes += self.local_pass(fgraph, &by_kind, &cx, &mut report)?;
            log::trace!(
                "Pass {} at depth {}: {} changes, {} applies",
                pass + 1,
                self.depth,
                changes,
                fgraph.num_applies()
            );

            if changes == 0 {
                report.converged = true;
                break;
            }
        }

        if !report.converged {
            let warning = format!(
                "rewriting did not converge within {} passes (profile {})",
                self.profile.max_iterations(),
                self.profile
            );
            log::warn!("{}", warning);
            report.warnings.push(warning);
        }
        Ok(report)
    }

    fn local_pass(
        &self,
        fgraph: &mut FunctionGraph,
        by_kind: &HashMap<OpKind, Vec<&dyn LocalRewriter>>,
        cx: &RewriteContext,
        report: &mut RewriteReport,
    ) -> Result<usize> {
        let mut queue: VecDeque<ApplyId> = fgraph.toposort().collect();
        let mut queued: HashSet<ApplyId> = queue.iter().copied().collect();
        let mut budget = (queue.len() + 1) * VISITS_PER_NODE;
        let mut changes = 0;

        while let Some(id) = queue.pop_front() {
            queued.remove(&id);
            if !fgraph.contains_apply(id) {
                continue;
            }
            if budget == 0 {
                log::debug!("Visit budget exhausted at depth {}", self.depth);
                // Unfinished work counts as a change so the next pass resumes it
                changes += 1;
                break;
            }
            budget -= 1;

            let kind = fgraph.apply(id)?.op.kind();
            let Some(rules) = by_kind.get(&kind) else {
                continue;
            };
            log::trace!("Visiting apply #{} ({:?})", id, kind);

            for &rule in rules {
                let mark = fgraph.next_apply_id();
                match try_rule(rule, fgraph, id, cx) {
                    Ok(Some(pairs)) => {
                        changes += 1;
                        *report.applied.entry(rule.name().to_string()).or_insert(0) += 1;
                        log::debug!("Rewrite '{}' fired on apply #{}", rule.name(), id);

                        let mut requeue = |apply: ApplyId| {
                            if fgraph.contains_apply(apply) && queued.insert(apply) {
                                queue.push_back(apply);
                            }
                        };
                        requeue(id);
                        for new_id in mark..fgraph.next_apply_id() {
                            requeue(new_id);
                        }
                        for &(_, new) in &pairs {
                            for client in fgraph.clients(new) {
                                if let Client::Apply { apply, .. } = *client {
                                    requeue(apply);
                                }
                            }
                        }
                        break;
                    }
                    Ok(None) => {}
                    Err(err) => self.reject(fgraph, report, rule.name(), Some(id), err)?,
                }
            }
        }
        Ok(changes)
    }

    /// Record a failed rule; abort only if the graph is no longer consistent
    fn reject(
        &self,
        fgraph: &FunctionGraph,
        report: &mut RewriteReport,
        rule: &str,
        apply: Option<ApplyId>,
        err: GraphError,
    ) -> Result<()> {
        *report.rejected.entry(rule.to_string()).or_insert(0) += 1;
        let at = apply.map(|a| format!(" on apply #{}", a)).unwrap_or_default();
        match err.kind() {
            ErrorKind::Inconsistency | ErrorKind::TypeMismatch | ErrorKind::Contract => {
                log::debug!("Rewrite '{}'{} rejected: {}", rule, at, err)
            }
            _ => log::warn!("Rewrite '{}'{} failed: {}", rule, at, err),
        }

        fgraph.check_integrity().map_err(|integrity| {
            GraphError::Inconsistency(format!(
                "graph left inconsistent after '{}' failed ({}): {}",
                rule, err, integrity
            ))
        })
    }
}

/// Run one rule and apply its replacement atomically
fn try_rule(
    rule: &dyn LocalRewriter,
    fgraph: &mut FunctionGraph,
    apply: ApplyId,
    cx: &RewriteContext,
) -> Result<Option<Replacement>> {
    let Some(pairs) = rule.transform(fgraph, apply, cx)? else {
        return Ok(None);
    };
    let pairs: Replacement = pairs.into_iter().filter(|(old, new)| old != new).collect();
    if pairs.is_empty() {
        return Ok(None);
    }
    fgraph.replace_all(&pairs, rule.name())?;
    Ok(Some(pairs))
}
