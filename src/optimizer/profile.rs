// Rewrite Profiles
//
// Selection of rules by name or tag, plus the iteration limits of the
// engine. Built-in profiles live in a static table; callers refine them
// with `including` / `excluding`.

use crate::core::error::{GraphError, Result};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

lazy_static::lazy_static! {
    /// Built-in profiles and the tags they include
    static ref BUILTIN_PROFILES: HashMap<&'static str, &'static [&'static str]> = {
        let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        m.insert("fast_run", &["canonicalize", "merge", "scan"]);
        m.insert("fast_compile", &["merge"]);
        m.insert("none", &[]);
        m
    };
}

pub const DEFAULT_MAX_ITERATIONS: usize = 64;
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 8;

/// Rule selection and engine limits for one compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteProfile {
    name: String,
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
    max_iterations: usize,
    max_nesting_depth: usize,
}

impl RewriteProfile {
    /// Look up a built-in profile
    pub fn named(name: &str) -> Result<Self> {
        let tags = BUILTIN_PROFILES
            .get(name)
            .ok_or_else(|| GraphError::UnknownProfile(name.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            include: tags.iter().map(|t| t.to_string()).collect(),
            exclude: BTreeSet::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        })
    }

    /// Profile that selects nothing
    pub fn none() -> Self {
        Self {
            name: "none".to_string(),
            include: BTreeSet::new(),
            exclude: BTreeSet::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }

    /// Also select rules with this name or tag
    pub fn including(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        self.exclude.remove(&tag);
        self.include.insert(tag);
        self
    }

    /// Never select rules with this name or tag
    pub fn excluding(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        self.include.remove(&tag);
        self.exclude.insert(tag);
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    pub fn with_max_nesting_depth(mut self, n: usize) -> Self {
        self.max_nesting_depth = n;
        self
    }

    /// A rule is selected when its name or a tag is included and neither
    /// its name nor any tag is excluded
    pub fn selects(&self, name: &str, tags: &BTreeSet<String>) -> bool {
        let included = self.include.contains(name) || tags.iter().any(|t| self.include.contains(t));
        let excluded = self.exclude.contains(name) || tags.iter().any(|t| self.exclude.contains(t));
        included && !excluded
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn max_nesting_depth(&self) -> usize {
        self.max_nesting_depth
    }
}

impl Default for RewriteProfile {
    fn default() -> Self {
        // The table always holds fast_run
        Self::named("fast_run").unwrap_or_else(|_| Self::none())
    }
}

impl FromStr for RewriteProfile {
    type Err = GraphError;

    /// Parse `<base>[,+tag]*[,-tag]*`, e.g. `fast_run,+scan,-scan_merge_inouts`
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',').map(str::trim);
        let base = parts
            .next()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| GraphError::UnknownProfile(format!("empty profile '{}'", s)))?;
        let mut profile = RewriteProfile::named(base)?;
        for part in parts {
            if let Some(tag) = part.strip_prefix('+') {
                profile = profile.including(tag);
            } else if let Some(tag) = part.strip_prefix('-') {
                profile = profile.excluding(tag);
            } else {
                return Err(GraphError::UnknownProfile(format!(
                    "'{}' in '{}' must start with + or -",
                    part, s
                )));
            }
        }
        Ok(profile)
    }
}

impl fmt::Display for RewriteProfile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for tag in &self.include {
            write!(f, ",+{}", tag)?;
        }
        for tag in &self.exclude {
            write!(f, ",-{}", tag)?;
        }
        Ok(())
    }
}
