// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::block_visitor::BlockVisitor;
use crate::body_visitor::BodyVisitor;
use crate::ir::BlockId;

use log_derive::logfn_inputs;
use std::collections::{HashSet, VecDeque};
use std::fmt::{Debug, Formatter, Result};

/// Drives the per-block transfer functions to an intra-procedural fixpoint.
/// Termination follows from the monotonicity of the transfer functions and
/// the finiteness of the per-function points-to lattice; the result does not
/// depend on traversal order because merges are commutative.
pub struct FixedPointVisitor<'fixed, 'analysis> {
    pub bv: &'fixed mut BodyVisitor<'analysis>,
}

impl<'fixed, 'analysis> Debug for FixedPointVisitor<'fixed, 'analysis> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "FixedPoint".fmt(f)
    }
}

impl<'fixed, 'analysis> FixedPointVisitor<'fixed, 'analysis> {
    pub fn new(body_visitor: &'fixed mut BodyVisitor<'analysis>) -> FixedPointVisitor<'fixed, 'analysis> {
        FixedPointVisitor { bv: body_visitor }
    }

    /// FIFO worklist over the basic blocks, seeded with every block in CFG
    /// order. A block whose committed output store changed re-enqueues all
    /// of its successors.
    #[logfn_inputs(TRACE)]
    pub fn visit_blocks(&mut self) {
        let block_count = self.bv.function().blocks.len();
        let mut worklist: VecDeque<BlockId> = (0..block_count)
            .map(|i| BlockId(i as u32))
            .collect();
        let mut workset: HashSet<BlockId> = worklist.iter().copied().collect();
        while let Some(block) = worklist.pop_front() {
            workset.remove(&block);
            let initial_state = self.bv.initial_state_for_block(block);
            let mut block_visitor = BlockVisitor::new(self.bv, initial_state);
            block_visitor.visit_basic_block(block);
            let state = block_visitor.into_state();
            if self.bv.options.debug_trace {
                debug!("bb{} out state {:?}", block.0, state);
            }
            if self.bv.commit_block(block, state) {
                let successors = self.bv.function().block(block).succs.clone();
                for succ in successors {
                    if workset.insert(succ) {
                        worklist.push_back(succ);
                    }
                }
            }
        }
    }
}
