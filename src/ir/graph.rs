// IR Function Graph
//
// A mutable subgraph with declared inputs and outputs, the set of Apply
// nodes between them, and a client index mapping each variable to its
// consumers. All rewrites act on this container.

use crate::core::error::{GraphError, Result};
use crate::core::tensor::Tensor;
use crate::ir::arena::NodeArena;
use crate::ir::node::{ApplyId, ApplyNode, Operation, VarId, Variable};
use crate::ir::toposort::Toposort;
use crate::ir::types::{IRType, ScalarType};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// A consumer of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Client {
    /// Input `position` of a member apply
    Apply { apply: ApplyId, position: usize },
    /// Graph output slot
    Output(usize),
}

/// Mutable function graph
#[derive(Debug, Clone)]
pub struct FunctionGraph {
    arena: NodeArena,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    /// Member applies, ordered by id (insertion order)
    apply_nodes: BTreeSet<ApplyId>,
    /// Member variables, ordered by id
    variables: BTreeSet<VarId>,
    clients: HashMap<VarId, Vec<Client>>,
}

/// State saved before a replacement transaction
struct Checkpoint {
    outputs: Vec<VarId>,
    apply_nodes: BTreeSet<ApplyId>,
    variables: BTreeSet<VarId>,
    clients: HashMap<VarId, Vec<Client>>,
}

impl FunctionGraph {
    /// Build a graph by backward reachability from `outputs`
    ///
    /// Traversal stops at declared `inputs` and constants. Any other leaf
    /// is a `MissingInput` error. Node ids are preserved.
    pub fn import(arena: &NodeArena, inputs: Vec<VarId>, outputs: Vec<VarId>) -> Result<Self> {
        let mut seen = HashSet::new();
        for &input in &inputs {
            let var = arena.variable(input)?;
            if !var.is_free() {
                return Err(GraphError::InvalidValue(format!(
                    "graph input {} must be a free variable",
                    var.label()
                )));
            }
            if !seen.insert(input) {
                return Err(GraphError::InvalidValue(format!(
                    "graph input {} is declared twice",
                    var.label()
                )));
            }
        }

        let mut fgraph = FunctionGraph {
            arena: arena.clone(),
            inputs: inputs.clone(),
            outputs: Vec::with_capacity(outputs.len()),
            apply_nodes: BTreeSet::new(),
            variables: BTreeSet::new(),
            clients: HashMap::new(),
        };
        for &input in &inputs {
            fgraph.attach_leaf(input);
        }
        for (index, &output) in outputs.iter().enumerate() {
            fgraph.import_var(output)?;
            fgraph.outputs.push(output);
            fgraph.add_client(output, Client::Output(index));
        }

        log::trace!(
            "Imported graph: {} inputs, {} outputs, {} applies",
            fgraph.inputs.len(),
            fgraph.outputs.len(),
            fgraph.apply_nodes.len()
        );
        Ok(fgraph)
    }

    /// Re-import from this graph's arena with different boundaries
    pub fn rebuild(&self, inputs: Vec<VarId>, outputs: Vec<VarId>) -> Result<FunctionGraph> {
        FunctionGraph::import(&self.arena, inputs, outputs)
    }

    fn attach_leaf(&mut self, var: VarId) {
        self.variables.insert(var);
        self.clients.entry(var).or_default();
    }

    fn attach_apply(&mut self, apply_id: ApplyId) -> Result<()> {
        let node = self.arena.apply(apply_id)?;
        let inputs = node.inputs.clone();
        let outputs = node.outputs.clone();
        self.apply_nodes.insert(apply_id);
        for (position, input) in inputs.into_iter().enumerate() {
            self.add_client(
                input,
                Client::Apply {
                    apply: apply_id,
                    position,
                },
            );
        }
        for output in outputs {
            self.attach_leaf(output);
        }
        Ok(())
    }

    /// Pull `root` and its ancestry into the graph
    fn import_var(&mut self, root: VarId) -> Result<()> {
        let mut stack = vec![(root, false)];
        let mut in_progress = HashSet::new();

        while let Some((var, expanded)) = stack.pop() {
            if self.variables.contains(&var) {
                continue;
            }
            let variable = self.arena.variable(var)?;
            let Some(owner) = variable.owner else {
                if variable.is_constant() {
                    self.attach_leaf(var);
                    continue;
                }
                return Err(GraphError::MissingInput {
                    variable: var,
                    name: variable.name.clone(),
                });
            };

            if expanded {
                in_progress.remove(&var);
                self.attach_apply(owner.apply)?;
                continue;
            }
            if !in_progress.insert(var) {
                return Err(GraphError::Inconsistency(format!(
                    "variable %{} depends on itself",
                    var
                )));
            }
            stack.push((var, true));
            let node = self.arena.apply(owner.apply)?;
            for &input in node.inputs.iter().rev() {
                if !self.variables.contains(&input) {
                    stack.push((input, false));
                }
            }
        }
        Ok(())
    }

    fn add_client(&mut self, var: VarId, client: Client) {
        self.clients.entry(var).or_default().push(client);
    }

    fn remove_client(&mut self, var: VarId, client: Client) {
        if let Some(list) = self.clients.get_mut(&var) {
            if let Some(pos) = list.iter().position(|c| *c == client) {
                list.remove(pos);
            }
        }
    }

    // ===== Replacement =====

    /// Redirect every consumer of `old` to `new`
    pub fn replace(&mut self, old: VarId, new: VarId, reason: &str) -> Result<()> {
        self.replace_all(&[(old, new)], reason)
    }

    /// Apply several replacements as one atomic transaction
    ///
    /// On any failure the graph is restored to its exact prior state.
    pub fn replace_all(&mut self, pairs: &[(VarId, VarId)], reason: &str) -> Result<()> {
        for &(old, new) in pairs {
            if !self.variables.contains(&old) {
                return Err(GraphError::UnknownVariable(old));
            }
            let old_ty = &self.arena.variable(old)?.ty;
            let new_ty = &self.arena.variable(new)?.ty;
            if !new_ty.compatible_with(old_ty) {
                return Err(GraphError::Inconsistency(format!(
                    "{}: replacing %{} ({}) with %{} ({}) changes its type",
                    reason, old, old_ty, new, new_ty
                )));
            }
        }

        let checkpoint = self.checkpoint();
        let mut journal: HashMap<ApplyId, Vec<VarId>> = HashMap::new();
        match self.redirect(pairs, reason, &mut journal) {
            Ok(()) => {
                log::trace!("{}: replaced {:?}", reason, pairs);
                Ok(())
            }
            Err(err) => {
                self.restore(checkpoint, journal);
                Err(err)
            }
        }
    }

    fn redirect(
        &mut self,
        pairs: &[(VarId, VarId)],
        reason: &str,
        journal: &mut HashMap<ApplyId, Vec<VarId>>,
    ) -> Result<()> {
        // Capture consumers before importing, so `new` may itself consume `old`
        let captured: Vec<(VarId, VarId, Vec<Client>)> = pairs
            .iter()
            .map(|&(old, new)| (old, new, self.clients(old).to_vec()))
            .collect();

        for &(_, new) in pairs {
            self.import_var(new)?;
        }

        for (old, new, clients) in captured {
            if old == new || !self.variables.contains(&old) {
                continue;
            }
            for client in clients {
                match client {
                    Client::Output(index) => {
                        if self.outputs[index] != old {
                            continue;
                        }
                        self.outputs[index] = new;
                    }
                    Client::Apply { apply, position } => {
                        if !self.apply_nodes.contains(&apply) {
                            continue;
                        }
                        let node = self.arena.apply_mut(apply)?;
                        if node.inputs[position] != old {
                            continue;
                        }
                        journal
                            .entry(apply)
                            .or_insert_with(|| node.inputs.clone());
                        node.inputs[position] = new;
                    }
                }
                self.remove_client(old, client);
                self.add_client(new, client);
            }
            self.prune(old);
        }

        if self.try_toposort().is_err() {
            return Err(GraphError::Inconsistency(format!(
                "{}: replacement introduces a cycle",
                reason
            )));
        }
        Ok(())
    }

    /// Remove `var`'s producer (and its orphaned ancestry) when nothing consumes it
    fn prune(&mut self, var: VarId) {
        let mut worklist = vec![var];
        while let Some(var) = worklist.pop() {
            if !self.variables.contains(&var) || self.inputs.contains(&var) {
                continue;
            }
            if !self.clients(var).is_empty() {
                continue;
            }
            let Ok(variable) = self.arena.variable(var) else {
                continue;
            };
            let Some(owner) = variable.owner else {
                // Orphaned constant
                self.variables.remove(&var);
                self.clients.remove(&var);
                continue;
            };
            let Ok(node) = self.arena.apply(owner.apply) else {
                continue;
            };
            if !self.apply_nodes.contains(&node.id)
                || node.outputs.iter().any(|&out| !self.clients(out).is_empty())
            {
                continue;
            }

            let (id, inputs, outputs) = (node.id, node.inputs.clone(), node.outputs.clone());
            log::trace!("Pruning apply #{}", id);
            self.apply_nodes.remove(&id);
            for out in outputs {
                self.variables.remove(&out);
                self.clients.remove(&out);
            }
            for (position, input) in inputs.into_iter().enumerate() {
                self.remove_client(input, Client::Apply { apply: id, position });
                worklist.push(input);
            }
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            outputs: self.outputs.clone(),
            apply_nodes: self.apply_nodes.clone(),
            variables: self.variables.clone(),
            clients: self.clients.clone(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint, journal: HashMap<ApplyId, Vec<VarId>>) {
        for (apply, inputs) in journal {
            if let Ok(node) = self.arena.apply_mut(apply) {
                node.inputs = inputs;
            }
        }
        self.outputs = checkpoint.outputs;
        self.apply_nodes = checkpoint.apply_nodes;
        self.variables = checkpoint.variables;
        self.clients = checkpoint.clients;
    }

    // ===== Construction helpers for rewrites =====

    /// Create an apply in this graph's arena; it joins the graph once a
    /// replacement makes it reachable
    pub fn make_apply(&mut self, op: Operation, inputs: Vec<VarId>) -> Result<ApplyId> {
        self.arena.new_apply(op, inputs)
    }

    /// Create an apply and return its single output
    pub fn make_node(&mut self, op: Operation, inputs: Vec<VarId>) -> Result<VarId> {
        let apply = self.arena.new_apply(op, inputs)?;
        self.arena.single_output(apply)
    }

    pub fn make_constant(&mut self, value: Tensor, dtype: ScalarType) -> VarId {
        self.arena.new_constant(value, dtype)
    }

    /// Create a free variable in the arena without declaring it an input
    pub fn make_free_variable(&mut self, ty: IRType, name: Option<String>) -> VarId {
        self.arena.new_input(ty, name)
    }

    /// Declare a new graph input
    pub fn add_input(&mut self, ty: IRType, name: Option<String>) -> VarId {
        let var = self.arena.new_input(ty, name);
        self.inputs.push(var);
        self.attach_leaf(var);
        var
    }

    /// Drop arena entries that are no longer members
    pub fn collect_garbage(&mut self) {
        let variables: HashSet<VarId> = self.variables.iter().copied().collect();
        let applies: HashSet<ApplyId> = self.apply_nodes.iter().copied().collect();
        let before = self.arena.num_applies();
        self.arena.retain(&variables, &applies);
        log::trace!(
            "Collected {} dead applies",
            before.saturating_sub(self.arena.num_applies())
        );
    }

    // ===== Queries =====

    /// Lazy topological order of member applies
    pub fn toposort(&self) -> Toposort<'_> {
        Toposort::new(self)
    }

    /// Topological order, failing on a cycle
    pub fn try_toposort(&self) -> Result<Vec<ApplyId>> {
        let order: Vec<ApplyId> = self.toposort().collect();
        if order.len() != self.apply_nodes.len() {
            return Err(GraphError::Inconsistency(format!(
                "cycle among {} apply nodes",
                self.apply_nodes.len() - order.len()
            )));
        }
        Ok(order)
    }

    /// Current consumers of `var`
    pub fn clients(&self, var: VarId) -> &[Client] {
        self.clients.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Verify the client index, ownership and membership against the edges
    pub fn check_integrity(&self) -> Result<()> {
        let fail = |msg: String| Err(GraphError::Inconsistency(msg));
        let mut expected: HashMap<VarId, Vec<Client>> = HashMap::new();

        for &input in &self.inputs {
            if !self.variables.contains(&input) || !self.arena.variable(input)?.is_free() {
                return fail(format!("input %{} is not a free member variable", input));
            }
        }
        for &id in &self.apply_nodes {
            let node = self.arena.apply(id)?;
            for (position, &input) in node.inputs.iter().enumerate() {
                if !self.variables.contains(&input) {
                    return fail(format!("apply #{} reads non-member %{}", id, input));
                }
                expected
                    .entry(input)
                    .or_default()
                    .push(Client::Apply { apply: id, position });
            }
            for (index, &output) in node.outputs.iter().enumerate() {
                let owner = self.arena.variable(output)?.owner;
                if !self.variables.contains(&output)
                    || owner.map(|o| (o.apply, o.index)) != Some((id, index))
                {
                    return fail(format!("output %{} of apply #{} is not owned by it", output, id));
                }
            }
        }
        for (index, &output) in self.outputs.iter().enumerate() {
            if !self.variables.contains(&output) {
                return fail(format!("graph output %{} is not a member", output));
            }
            expected.entry(output).or_default().push(Client::Output(index));
        }
        for &var in &self.variables {
            let variable = self.arena.variable(var)?;
            let anchored = match variable.owner {
                Some(owner) => self.apply_nodes.contains(&owner.apply),
                None => variable.is_constant() || self.inputs.contains(&var),
            };
            if !anchored {
                return fail(format!("%{} is neither produced, constant nor an input", var));
            }
            let mut have = self.clients(var).to_vec();
            let mut want = expected.remove(&var).unwrap_or_default();
            have.sort();
            want.sort();
            if have != want {
                return fail(format!("client index for %{} is stale", var));
            }
        }
        if let Some(var) = expected.keys().next() {
            return fail(format!("edge to non-member %{}", var));
        }
        if self.clients.keys().any(|var| !self.variables.contains(var)) {
            return fail("client index lists a non-member variable".to_string());
        }
        self.try_toposort()?;
        Ok(())
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    pub fn apply_nodes(&self) -> impl Iterator<Item = ApplyId> + '_ {
        self.apply_nodes.iter().copied()
    }

    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        self.variables.iter().copied()
    }

    pub fn num_applies(&self) -> usize {
        self.apply_nodes.len()
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn contains_apply(&self, id: ApplyId) -> bool {
        self.apply_nodes.contains(&id)
    }

    pub fn contains_variable(&self, id: VarId) -> bool {
        self.variables.contains(&id)
    }

    pub fn apply(&self, id: ApplyId) -> Result<&ApplyNode> {
        self.arena.apply(id)
    }

    pub fn variable(&self, id: VarId) -> Result<&Variable> {
        self.arena.variable(id)
    }

    pub fn var_type(&self, id: VarId) -> Result<&IRType> {
        Ok(&self.arena.variable(id)?.ty)
    }

    /// Producing apply of a member variable, if any
    pub fn owner_of(&self, var: VarId) -> Option<&ApplyNode> {
        let owner = self.arena.variable(var).ok()?.owner?;
        self.arena.apply(owner.apply).ok()
    }

    /// Constant value of `var`, if it is a constant
    pub fn constant_value(&self, var: VarId) -> Option<&Tensor> {
        self.arena.variable(var).ok()?.constant.as_ref()
    }

    pub fn input_position(&self, var: VarId) -> Option<usize> {
        self.inputs.iter().position(|&v| v == var)
    }

    pub fn next_apply_id(&self) -> ApplyId {
        self.arena.next_apply_id()
    }
}

impl fmt::Display for FunctionGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = |v: VarId| match self.arena.variable(v) {
            Ok(var) => match (&var.name, &var.constant) {
                (Some(name), _) => format!("%{}:{}", v, name),
                (None, Some(_)) => format!("%{}:const", v),
                _ => format!("%{}", v),
            },
            Err(_) => format!("%{}?", v),
        };
        let inputs: Vec<String> = self.inputs.iter().map(|&v| label(v)).collect();
        writeln!(f, "fgraph({}) {{", inputs.join(", "))?;
        for id in self.toposort() {
            let Ok(node) = self.arena.apply(id) else {
                continue;
            };
            let outs: Vec<String> = node.outputs.iter().map(|&v| label(v)).collect();
            let ins: Vec<String> = node.inputs.iter().map(|&v| label(v)).collect();
            writeln!(f, "  {} = {}({})", outs.join(", "), node.op, ins.join(", "))?;
        }
        let outputs: Vec<String> = self.outputs.iter().map(|&v| label(v)).collect();
        write!(f, "}} -> ({})", outputs.join(", "))
    }
}
