// Merge Rewrite (structural common subexpression elimination)
//
// Identifies and eliminates redundant computations:
// - constants with equal dtype, shape and values
// - apply nodes with the same operation and the same inputs (in order)
//
// The earliest node is kept. Nodes are visited in topological order and
// inputs are read at visit time, so chains of duplicates collapse in one
// sweep.

use crate::core::error::Result;
use crate::ir::{ApplyId, FunctionGraph, Operation, ScalarType, VarId};
use crate::optimizer::pass::{GlobalRewriter, RewriteContext};
use std::collections::HashMap;

/// Global merge rule
pub struct MergeRewriter;

type ConstantKey = (ScalarType, Vec<usize>, Vec<u64>);

impl MergeRewriter {
    fn merge_constants(&self, fgraph: &mut FunctionGraph) -> Result<bool> {
        let mut canonical: HashMap<ConstantKey, VarId> = HashMap::new();
        let mut changed = false;

        let candidates: Vec<VarId> = fgraph.variables().collect();
        for var in candidates {
            if !fgraph.contains_variable(var) {
                continue;
            }
            let variable = fgraph.variable(var)?;
            let Some(value) = &variable.constant else {
                continue;
            };
            let key = (
                variable.ty.scalar_type(),
                value.shape().to_vec(),
                value.data().iter().map(|x| x.to_bits()).collect(),
            );
            match canonical.get(&key) {
                Some(&keep) => {
                    fgraph.replace(var, keep, self.name())?;
                    changed = true;
                }
                None => {
                    canonical.insert(key, var);
                }
            }
        }
        Ok(changed)
    }

    fn merge_applies(&self, fgraph: &mut FunctionGraph) -> Result<bool> {
        let mut canonical: HashMap<(Operation, Vec<VarId>), ApplyId> = HashMap::new();
        let mut changed = false;

        for id in fgraph.try_toposort()? {
            if !fgraph.contains_apply(id) {
                continue;
            }
            let node = fgraph.apply(id)?;
            let key = (node.op.clone(), node.inputs.clone());
            let outputs = node.outputs.clone();

            match canonical.get(&key) {
                Some(&keep) if fgraph.contains_apply(keep) => {
                    let pairs: Vec<(VarId, VarId)> = outputs
                        .into_iter()
                        .zip(fgraph.apply(keep)?.outputs.iter().copied())
                        .collect();
                    log::trace!("Merging apply #{} into #{}", id, keep);
                    fgraph.replace_all(&pairs, self.name())?;
                    changed = true;
                }
                _ => {
                    canonical.insert(key, id);
                }
            }
        }
        Ok(changed)
    }
}

impl GlobalRewriter for MergeRewriter {
    fn name(&self) -> &str {
        "merge"
    }

    fn apply(&self, fgraph: &mut FunctionGraph, _cx: &RewriteContext) -> Result<bool> {
        let constants = self.merge_constants(fgraph)?;
        let applies = self.merge_applies(fgraph)?;
        Ok(constants || applies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tensor::Tensor;
    use crate::ir::{GraphBuilder, IRType};
    use crate::optimizer::db::RewriteDb;
    use crate::optimizer::profile::RewriteProfile;

    #[test]
    fn test_merge_duplicate_chain() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", IRType::vector(ScalarType::Float64, 3));
        let e1 = b.exp(x).unwrap();
        let e2 = b.exp(x).unwrap();
        let t1 = b.tanh(e1).unwrap();
        let t2 = b.tanh(e2).unwrap();
        let s = b.add(t1, t2).unwrap();
        let mut fg = b.function_graph(vec![x], vec![s]).unwrap();
        assert_eq!(fg.num_applies(), 5);

        let db = RewriteDb::new();
        let profile = RewriteProfile::none();
        let cx = RewriteContext::new(&db, &profile);
        assert!(MergeRewriter.apply(&mut fg, &cx).unwrap());
        assert_eq!(fg.num_applies(), 3);
        assert!(!MergeRewriter.apply(&mut fg, &cx).unwrap());
        fg.check_integrity().unwrap();
    }

    #[test]
    fn test_merge_constants() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", IRType::vector(ScalarType::Float64, 2));
        let c1 = b.constant(Tensor::vector(vec![1.0, 2.0]));
        let c2 = b.constant(Tensor::vector(vec![1.0, 2.0]));
        let c3 = b.constant(Tensor::vector(vec![1.0, 3.0]));
        let a = b.add(x, c1).unwrap();
        let m = b.mul(a, c2).unwrap();
        let d = b.div(m, c3).unwrap();
        let mut fg = b.function_graph(vec![x], vec![d]).unwrap();

        let db = RewriteDb::new();
        let profile = RewriteProfile::none();
        assert!(MergeRewriter
            .apply(&mut fg, &RewriteContext::new(&db, &profile))
            .unwrap());
        assert!(!fg.contains_variable(c2));
        assert!(fg.contains_variable(c3));
        assert_eq!(fg.clients(c1).len(), 2);
    }
}
