// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::ir::{FuncId, InstKind, Module, ValueId};

use petgraph::algo::tarjan_scc;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{Graph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// The static call graph of a module: one node per function, one edge per
/// direct call site with a resolved callee. Used to attribute recursion
/// (which drives the inter-procedural analysis order) and to close
/// referenced-global sets over calls.
pub struct CallGraph {
    graph: Graph<FuncId, ()>,
}

impl CallGraph {
    pub fn new(module: &Module) -> CallGraph {
        let mut graph: Graph<FuncId, ()> = Graph::new();
        let nodes: Vec<NodeIndex> = module.functions().map(|(f, _)| graph.add_node(f)).collect();
        for (func, function) in module.functions() {
            for (_, inst) in function.instructions() {
                if let InstKind::Call {
                    callee: Some(callee),
                    ..
                } = &inst.kind
                {
                    graph.add_edge(nodes[func.0 as usize], nodes[callee.0 as usize], ());
                }
            }
        }
        CallGraph { graph }
    }

    /// Marks `does_not_recurse` on every function that sits in no call-graph
    /// cycle: a singleton strongly connected component without a self edge.
    pub fn mark_recursion_attributes(&self, module: &mut Module) {
        let mut recursive: HashSet<FuncId> = HashSet::new();
        for component in tarjan_scc(&self.graph) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .map(|n| self.graph.contains_edge(*n, *n))
                    .unwrap_or(false);
            if cyclic {
                for node in component {
                    recursive.insert(*self.graph.node_weight(node).unwrap());
                }
            }
        }
        let ids: Vec<FuncId> = module.functions().map(|(f, _)| f).collect();
        for func in ids {
            module.set_does_not_recurse(func, !recursive.contains(&func));
        }
    }

    /// The globals each function references, closed over its callees: a
    /// callee's globals become extra inputs of its summary, so a caller must
    /// account for every global its callees touch when instantiating.
    /// First-seen order is preserved so summary input lists are stable.
    pub fn referenced_globals(&self, module: &Module) -> HashMap<FuncId, Vec<ValueId>> {
        let mut result: HashMap<FuncId, Vec<ValueId>> = HashMap::new();
        for (func, function) in module.functions() {
            let mut seen = HashSet::new();
            let mut globals = vec![];
            for (_, inst) in function.instructions() {
                for operand in inst.kind.operands() {
                    if module.is_global(operand) && seen.insert(operand) {
                        globals.push(operand);
                    }
                }
            }
            result.insert(func, globals);
        }
        // Propagate along call edges until no set grows.
        let mut changed = true;
        while changed {
            changed = false;
            for edge in self.graph.edge_indices() {
                let (caller_n, callee_n) = self.graph.edge_endpoints(edge).unwrap();
                let caller = *self.graph.node_weight(caller_n).unwrap();
                let callee = *self.graph.node_weight(callee_n).unwrap();
                if caller == callee {
                    continue;
                }
                let callee_globals = result.get(&callee).cloned().unwrap_or_default();
                let caller_globals = result.entry(caller).or_default();
                for g in callee_globals {
                    if !caller_globals.contains(&g) {
                        caller_globals.push(g);
                        changed = true;
                    }
                }
            }
        }
        result
    }

    /// A Graphviz rendering with function names on the nodes.
    pub fn to_dot(&self, module: &Module) -> String {
        let named = self.graph.filter_map(
            |_, func| Some(&*module.function(*func).name),
            |_, _| Some(()),
        );
        format!("{:?}", Dot::with_config(&named, &[Config::EdgeNoLabel]))
    }
}
