// Structural Graph Fingerprints
//
// Sha256 over a canonical listing of a FunctionGraph: variables are
// renumbered in order of first appearance, operations are hashed by their
// structural signature and constants by dtype, shape and bit patterns.
// Two graphs with the same fingerprint compute the same function.

use crate::ir::graph::FunctionGraph;
use crate::ir::node::{Operation, VarId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Canonical structural hash of a function graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphFingerprint([u8; 32]);

impl GraphFingerprint {
    pub fn of(fgraph: &FunctionGraph) -> Self {
        let mut hasher = Sha256::new();
        let mut canonical: HashMap<VarId, u64> = HashMap::new();

        hasher.update(b"inputs");
        for &input in fgraph.inputs() {
            let id = canonical.len() as u64;
            canonical.insert(input, id);
            if let Ok(var) = fgraph.variable(input) {
                hasher.update(format!("{:?}", var.ty).as_bytes());
            }
        }

        for apply_id in fgraph.toposort() {
            let Ok(node) = fgraph.apply(apply_id) else {
                continue;
            };
            hasher.update(b"apply");
            hash_operation(&mut hasher, &node.op);
            for &input in &node.inputs {
                let id = canonical_id(&mut hasher, fgraph, &mut canonical, input);
                hasher.update(id.to_le_bytes());
            }
            for &output in &node.outputs {
                let id = canonical.len() as u64;
                canonical.insert(output, id);
                if let Ok(var) = fgraph.variable(output) {
                    hasher.update(format!("{:?}", var.ty).as_bytes());
                }
            }
        }

        hasher.update(b"outputs");
        for &output in fgraph.outputs() {
            let id = canonical_id(&mut hasher, fgraph, &mut canonical, output);
            hasher.update(id.to_le_bytes());
        }

        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        GraphFingerprint(hash)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for GraphFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

fn hash_operation(hasher: &mut Sha256, op: &Operation) {
    match op {
        Operation::Scan(scan) => {
            hasher.update(b"scan");
            hasher.update(format!("{:?}", scan.signature()).as_bytes());
            hasher.update(scan.body_digest().as_bytes());
        }
        other => hasher.update(format!("{:?}", other).as_bytes()),
    }
}

/// Canonical id of `var`, numbering constants on first appearance
fn canonical_id(
    hasher: &mut Sha256,
    fgraph: &FunctionGraph,
    canonical: &mut HashMap<VarId, u64>,
    var: VarId,
) -> u64 {
    if let Some(&id) = canonical.get(&var) {
        return id;
    }
    let id = canonical.len() as u64;
    canonical.insert(var, id);
    if let Ok(variable) = fgraph.variable(var) {
        hasher.update(b"const");
        hasher.update(format!("{:?}", variable.ty).as_bytes());
        if let Some(value) = &variable.constant {
            for x in value.data() {
                hasher.update(x.to_bits().to_le_bytes());
            }
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tensor::Tensor;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::types::{IRType, ScalarType};

    fn build(offset: f64, pad_arena: bool) -> FunctionGraph {
        let mut b = GraphBuilder::new();
        if pad_arena {
            let junk = b.input("junk", IRType::scalar(ScalarType::Float64));
            b.exp(junk).unwrap();
        }
        let x = b.input("x", IRType::vector(ScalarType::Float64, 2));
        let c = b.constant(Tensor::vector(vec![offset, 1.0]));
        let y = b.add(x, c).unwrap();
        b.function_graph(vec![x], vec![y]).unwrap()
    }

    #[test]
    fn test_independent_of_ids() {
        assert_eq!(
            GraphFingerprint::of(&build(0.5, false)),
            GraphFingerprint::of(&build(0.5, true))
        );
    }

    #[test]
    fn test_constants_distinguish() {
        assert_ne!(
            GraphFingerprint::of(&build(0.5, false)),
            GraphFingerprint::of(&build(0.25, false))
        );
        assert_eq!(GraphFingerprint::of(&build(0.5, false)).to_hex().len(), 64);
    }
}
