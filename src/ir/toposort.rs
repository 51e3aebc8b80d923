// Lazy Topological Order
//
// Kahn's algorithm over the member applies of a FunctionGraph. The ready set
// is ordered by apply id so ties resolve by insertion order.

use crate::ir::graph::{Client, FunctionGraph};
use crate::ir::node::ApplyId;
use std::collections::{BTreeSet, HashMap};

/// Iterator over apply ids in dependency order
///
/// Stops early if the graph contains a cycle; compare the yielded count
/// against `num_applies()` (or use `try_toposort`) to detect it.
pub struct Toposort<'a> {
    fgraph: &'a FunctionGraph,
    pending: HashMap<ApplyId, usize>,
    ready: BTreeSet<ApplyId>,
}

impl<'a> Toposort<'a> {
    pub(crate) fn new(fgraph: &'a FunctionGraph) -> Self {
        let mut pending = HashMap::new();
        let mut ready = BTreeSet::new();

        for id in fgraph.apply_nodes() {
            let Ok(node) = fgraph.apply(id) else {
                continue;
            };
            let waiting = node
                .inputs
                .iter()
                .filter(|&&input| {
                    fgraph
                        .variable(input)
                        .ok()
                        .and_then(|v| v.owner)
                        .is_some_and(|owner| fgraph.contains_apply(owner.apply))
                })
                .count();
            if waiting == 0 {
                ready.insert(id);
            } else {
                pending.insert(id, waiting);
            }
        }

        Self {
            fgraph,
            pending,
            ready,
        }
    }
}

impl<'a> Iterator for Toposort<'a> {
    type Item = ApplyId;

    fn next(&mut self) -> Option<ApplyId> {
        let id = self.ready.pop_first()?;
        if let Ok(node) = self.fgraph.apply(id) {
            for &output in &node.outputs {
                for client in self.fgraph.clients(output) {
                    let Client::Apply { apply, .. } = *client else {
                        continue;
                    };
                    if let Some(count) = self.pending.get_mut(&apply) {
                        *count -= 1;
                        if *count == 0 {
                            self.pending.remove(&apply);
                            self.ready.insert(apply);
                        }
                    }
                }
            }
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::builder::GraphBuilder;
    use crate::ir::types::{IRType, ScalarType};

    #[test]
    fn test_ties_follow_insertion_order() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", IRType::vector(ScalarType::Float64, 2));
        let a = b.exp(x).unwrap();
        let c = b.tanh(x).unwrap();
        let d = b.neg(x).unwrap();
        let s = b.add(a, c).unwrap();
        let t = b.add(s, d).unwrap();
        let fg = b.function_graph(vec![x], vec![t]).unwrap();

        let order: Vec<_> = fg.toposort().collect();
        let ids: Vec<_> = [a, c, d, s, t]
            .iter()
            .map(|&v| fg.owner_of(v).unwrap().id)
            .collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn test_repeated_input_counts_twice() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", IRType::vector(ScalarType::Float64, 2));
        let a = b.exp(x).unwrap();
        let sq = b.mul(a, a).unwrap();
        let fg = b.function_graph(vec![x], vec![sq]).unwrap();
        assert_eq!(fg.toposort().count(), 2);
    }
}
