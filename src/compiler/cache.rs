// Compile Cache: reuse rewritten graphs for repeated compile requests
//
// Cache key is based on: (graph fingerprint, boundary variable ids, profile)

use crate::compiler::compile::RewrittenGraph;
use crate::ir::{FunctionGraph, GraphFingerprint, VarId};
use crate::optimizer::profile::RewriteProfile;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cache key for a compile request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Structural hash of the imported graph
    fingerprint: GraphFingerprint,
    /// Boundary ids, so a hit hands back ids valid in the caller's arena
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    /// Rule selection and caps
    profile: String,
}

impl CacheKey {
    pub fn new(fgraph: &FunctionGraph, profile: &RewriteProfile) -> Self {
        Self {
            fingerprint: GraphFingerprint::of(fgraph),
            inputs: fgraph.inputs().to_vec(),
            outputs: fgraph.outputs().to_vec(),
            profile: format!(
                "{};iterations={};depth={}",
                profile,
                profile.max_iterations(),
                profile.max_nesting_depth()
            ),
        }
    }

    pub fn fingerprint(&self) -> &GraphFingerprint {
        &self.fingerprint
    }
}

struct CachedGraph {
    graph: Arc<RewrittenGraph>,
    /// Number of times this entry has been used
    use_count: usize,
}

/// Bounded cache of rewritten graphs with least-used eviction
pub struct CompileCache {
    entries: Mutex<HashMap<CacheKey, CachedGraph>>,
    max_entries: usize,
}

impl CompileCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CachedGraph>> {
        // A panic while holding the lock cannot leave a half-written entry
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<RewrittenGraph>> {
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        entry.use_count += 1;
        log::trace!("Compile cache hit for {}", key.fingerprint);
        Some(Arc::clone(&entry.graph))
    }

    pub fn insert(&self, key: CacheKey, graph: Arc<RewrittenGraph>) {
        if self.max_entries == 0 {
            return;
        }
        let mut entries = self.lock();
        while entries.len() >= self.max_entries {
            let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| e.use_count)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            log::trace!("Evicting compile cache entry {}", victim.fingerprint);
            entries.remove(&victim);
        }
        entries.insert(
            key,
            CachedGraph {
                graph,
                use_count: 1,
            },
        );
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CompileCache {
    fn default() -> Self {
        Self::new(128)
    }
}
