// Rewrite Database
//
// Explicit registration table of named, tagged, prioritized rules. One
// database is built per compiler and passed by reference; there is no
// process-wide registry.

use crate::core::error::{GraphError, Result};
use crate::optimizer::algebraic::{
    ConstantFolding, LocalAddZero, LocalMulOne, LocalNegNeg, LocalTransposeTranspose,
};
use crate::optimizer::merge::MergeRewriter;
use crate::optimizer::pass::{GlobalRewriter, LocalRewriter};
use crate::optimizer::profile::RewriteProfile;
use crate::scan::cleanup::{ScanForwardOutputs, ScanMergeInouts, ScanRemoveUnused};
use crate::scan::nested::ScanBodyRewrite;
use crate::scan::pushout::{ScanPushoutAdd, ScanPushoutNonSeqs, ScanPushoutSeqs};
use std::collections::BTreeSet;

/// A registered rule
pub enum Rewrite {
    Local(Box<dyn LocalRewriter>),
    Global(Box<dyn GlobalRewriter>),
}

pub struct RewriteEntry {
    pub name: String,
    pub tags: BTreeSet<String>,
    /// Lower runs first
    pub priority: i32,
    pub rewrite: Rewrite,
}

/// Rules chosen by a profile, in execution order
pub struct Selection<'a> {
    pub locals: Vec<&'a dyn LocalRewriter>,
    pub globals: Vec<&'a dyn GlobalRewriter>,
}

impl<'a> Selection<'a> {
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty() && self.globals.is_empty()
    }
}

/// Registration table of rewrite rules
#[derive(Default)]
pub struct RewriteDb {
    entries: Vec<RewriteEntry>,
}

impl RewriteDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database with every built-in rule
    pub fn standard() -> Result<Self> {
        let mut db = Self::new();
        let canon = ["canonicalize", "fast_run"];
        db.register_local(Box::new(LocalAddZero), &canon, 0)?;
        db.register_local(Box::new(LocalMulOne), &canon, 1)?;
        db.register_local(Box::new(LocalNegNeg), &canon, 2)?;
        db.register_local(Box::new(LocalTransposeTranspose), &canon, 3)?;
        db.register_local(Box::new(ConstantFolding), &canon, 10)?;

        db.register_global(Box::new(MergeRewriter), &["merge", "fast_run", "fast_compile"], 0)?;

        let scan = ["scan", "fast_run"];
        let pushout = ["scan", "scan_pushout", "fast_run"];
        db.register_local(Box::new(ScanBodyRewrite), &scan, 20)?;
        db.register_local(Box::new(ScanMergeInouts), &scan, 30)?;
        db.register_local(Box::new(ScanPushoutNonSeqs), &pushout, 40)?;
        db.register_local(Box::new(ScanPushoutSeqs), &pushout, 50)?;
        db.register_local(Box::new(ScanPushoutAdd), &pushout, 60)?;
        db.register_local(Box::new(ScanForwardOutputs), &scan, 70)?;
        db.register_local(Box::new(ScanRemoveUnused), &scan, 80)?;
        Ok(db)
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.entries.iter().any(|e| e.name == name) {
            return Err(GraphError::InvalidValue(format!(
                "rewrite '{}' is already registered",
                name
            )));
        }
        Ok(())
    }

    pub fn register_local(
        &mut self,
        rule: Box<dyn LocalRewriter>,
        tags: &[&str],
        priority: i32,
    ) -> Result<()> {
        let name = rule.name().to_string();
        self.check_name(&name)?;
        log::trace!("Registered local rewrite '{}' (priority {})", name, priority);
        self.entries.push(RewriteEntry {
            name,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            priority,
            rewrite: Rewrite::Local(rule),
        });
        Ok(())
    }

    pub fn register_global(
        &mut self,
        rule: Box<dyn GlobalRewriter>,
        tags: &[&str],
        priority: i32,
    ) -> Result<()> {
        let name = rule.name().to_string();
        self.check_name(&name)?;
        log::trace!("Registered global rewrite '{}' (priority {})", name, priority);
        self.entries.push(RewriteEntry {
            name,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            priority,
            rewrite: Rewrite::Global(rule),
        });
        Ok(())
    }

    /// Rules selected by `profile`, sorted by (priority, registration order)
    pub fn select(&self, profile: &RewriteProfile) -> Selection<'_> {
        let mut chosen: Vec<(i32, usize, &RewriteEntry)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| profile.selects(&e.name, &e.tags))
            .map(|(i, e)| (e.priority, i, e))
            .collect();
        chosen.sort_by_key(|&(priority, order, _)| (priority, order));

        let mut selection = Selection {
            locals: Vec::new(),
            globals: Vec::new(),
        };
        for (_, _, entry) in chosen {
            match &entry.rewrite {
                Rewrite::Local(rule) => selection.locals.push(rule.as_ref()),
                Rewrite::Global(rule) => selection.globals.push(rule.as_ref()),
            }
        }
        selection
    }

    pub fn entries(&self) -> &[RewriteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
