// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::ir::{BlockId, Function, InstId};

use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::{DefaultIx, Graph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{HashMap, HashSet};

type NodeId = NodeIndex<DefaultIx>;

/// Whether one instruction executes strictly after another, over all paths,
/// over some path, or over none. Gates the kill decisions of the dependence
/// extractor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExecAfterCondition {
    Never,
    May,
    Must,
}

/// Per-function control-flow facts, computed once per analysis context:
/// the DFS back-edge set, block-level dominance and reachability, and
/// instruction positions within their blocks.
pub struct ControlFlowInfo {
    nodes: Vec<NodeId>,
    back_edges: HashSet<(BlockId, BlockId)>,
    dominators: Dominators<NodeId>,
    /// reachable[b] = set of blocks reachable from b along CFG edges
    /// (including b itself as the trivial path).
    reachable: Vec<HashSet<BlockId>>,
    positions: HashMap<InstId, (BlockId, u32)>,
}

impl ControlFlowInfo {
    pub fn new(function: &Function) -> ControlFlowInfo {
        let mut graph: Graph<BlockId, ()> = Graph::new();
        let nodes: Vec<NodeId> = (0..function.blocks.len())
            .map(|i| graph.add_node(BlockId(i as u32)))
            .collect();
        for (i, block) in function.blocks.iter().enumerate() {
            for succ in &block.succs {
                graph.add_edge(nodes[i], nodes[succ.0 as usize], ());
            }
        }

        let back_edges = find_back_edges(function);
        let dominators = dominators::simple_fast(&graph, nodes[0]);

        let mut reachable = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut set = HashSet::new();
            let mut bfs = Bfs::new(&graph, *node);
            while let Some(n) = bfs.next(&graph) {
                set.insert(*graph.node_weight(n).unwrap());
            }
            reachable.push(set);
        }

        let mut positions = HashMap::new();
        for (i, block) in function.blocks.iter().enumerate() {
            for (pos, inst) in block.insts.iter().enumerate() {
                positions.insert(*inst, (BlockId(i as u32), pos as u32));
            }
        }

        ControlFlowInfo {
            nodes,
            back_edges,
            dominators,
            reachable,
            positions,
        }
    }

    pub fn is_back_edge(&self, pred: BlockId, succ: BlockId) -> bool {
        self.back_edges.contains(&(pred, succ))
    }

    pub fn back_edges(&self) -> &HashSet<(BlockId, BlockId)> {
        &self.back_edges
    }

    /// Can control reach `to` after leaving `from`? For `from == to` this
    /// asks for a nontrivial path, i.e. whether the block sits on a cycle.
    fn reaches(&self, from: BlockId, to: BlockId) -> bool {
        if from != to {
            return self.reachable[from.0 as usize].contains(&to);
        }
        self.reachable[from.0 as usize]
            .iter()
            .any(|b| *b != from && self.reachable[b.0 as usize].contains(&from))
            || self.self_loop(from)
    }

    fn self_loop(&self, block: BlockId) -> bool {
        self.back_edges.contains(&(block, block))
    }

    /// Does `dominator`'s block dominate `block`? Unreachable blocks have no
    /// dominator information and dominate nothing.
    fn dominates(&self, dominator: BlockId, block: BlockId) -> bool {
        let target = self.nodes[block.0 as usize];
        let wanted = self.nodes[dominator.0 as usize];
        match self.dominators.dominators(target) {
            Some(mut doms) => doms.any(|d| d == wanted),
            None => false,
        }
    }

    /// Does instruction `u` execute strictly after instruction `v`?
    ///
    /// Within one block the instruction positions decide, with an earlier
    /// instruction only able to run after a later one when the block sits on
    /// a cycle. Across blocks: `Never` when v's block cannot reach u's;
    /// `Must` when v's block dominates u's (every execution of u was
    /// preceded by one of v); `May` otherwise.
    pub fn exec_after(&self, u: InstId, v: InstId) -> ExecAfterCondition {
        let (bu, pu) = match self.positions.get(&u) {
            Some(p) => *p,
            None => return ExecAfterCondition::May,
        };
        let (bv, pv) = match self.positions.get(&v) {
            Some(p) => *p,
            None => return ExecAfterCondition::May,
        };
        if bu == bv {
            if pu > pv {
                return ExecAfterCondition::Must;
            }
            return if self.reaches(bu, bu) {
                ExecAfterCondition::May
            } else {
                ExecAfterCondition::Never
            };
        }
        if !self.reaches(bv, bu) {
            ExecAfterCondition::Never
        } else if self.dominates(bv, bu) {
            ExecAfterCondition::Must
        } else {
            ExecAfterCondition::May
        }
    }
}

/// The loop-closing edges of the CFG: an edge into a block that is still on
/// the DFS stack when the edge is traversed.
fn find_back_edges(function: &Function) -> HashSet<(BlockId, BlockId)> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let n = function.blocks.len();
    let mut color = vec![Color::White; n];
    let mut back_edges = HashSet::new();
    if n == 0 {
        return back_edges;
    }
    // Iterative DFS from the entry block; (block, next successor index).
    let mut stack: Vec<(BlockId, usize)> = vec![(BlockId(0), 0)];
    color[0] = Color::Gray;
    while let Some((block, next)) = stack.pop() {
        let succs = &function.block(block).succs;
        if next < succs.len() {
            stack.push((block, next + 1));
            let succ = succs[next];
            match color[succ.0 as usize] {
                Color::Gray => {
                    back_edges.insert((block, succ));
                }
                Color::White => {
                    color[succ.0 as usize] = Color::Gray;
                    stack.push((succ, 0));
                }
                Color::Black => {}
            }
        } else {
            color[block.0 as usize] = Color::Black;
        }
    }
    back_edges
}
