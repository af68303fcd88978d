// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::body_visitor::BodyVisitor;
use crate::call_visitor::CallVisitor;
use crate::constraint::Constraint;
use crate::ir::{BlockId, InstKind, ValueId};
use crate::location::AbstractLocation;
use crate::store::{conjoin_point_to_map, merge_point_to_maps, AbstractStore, PointToMap};

use log_derive::logfn_inputs;
use std::fmt::{Debug, Formatter, Result};

/// Executes the transfer functions of one basic block over a working store.
/// The working store is owned; the register file and solver are reached
/// through the body visitor.
pub struct BlockVisitor<'block, 'analysis> {
    pub bv: &'block mut BodyVisitor<'analysis>,
    pub state: AbstractStore,
}

impl<'block, 'analysis> Debug for BlockVisitor<'block, 'analysis> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "BlockVisitor".fmt(f)
    }
}

impl<'block, 'analysis> BlockVisitor<'block, 'analysis> {
    pub fn new(
        bv: &'block mut BodyVisitor<'analysis>,
        state: AbstractStore,
    ) -> BlockVisitor<'block, 'analysis> {
        BlockVisitor { bv, state }
    }

    pub fn into_state(self) -> AbstractStore {
        self.state
    }

    /// Interprets every instruction of the block in order. Branches and
    /// switches have no store effect here; successor selection belongs to
    /// the fixpoint driver. Instructions the interpreter does not understand
    /// degrade to no-ops.
    #[logfn_inputs(TRACE)]
    pub fn visit_basic_block(&mut self, block: BlockId) {
        let module = self.bv.module;
        let function = module.function(self.bv.func);
        for inst_id in &function.block(block).insts {
            let inst = function.inst(*inst_id);
            match &inst.kind {
                InstKind::Alloca { .. } => self.visit_allocation(inst.value, false),
                InstKind::Call { .. } if module.is_malloc_call(self.bv.func, *inst_id) => {
                    self.visit_allocation(inst.value, true)
                }
                InstKind::Bitcast { operand } => {
                    self.bv.assign_alias_register(inst.value, *operand)
                }
                InstKind::GetElementPtr { pointer } => {
                    self.bv.assign_alias_register(inst.value, *pointer)
                }
                InstKind::Store { value, pointer } => self.visit_store(*value, *pointer),
                InstKind::Load { pointer } => self.visit_load(inst.value, *pointer),
                InstKind::Call { callee, args } => {
                    let args = args.clone();
                    CallVisitor::new(self).visit_call(inst.value, *callee, &args);
                }
                InstKind::Phi { incoming } => {
                    let values: Vec<ValueId> = incoming.iter().map(|(_, v)| *v).collect();
                    self.visit_phi(inst.value, &values);
                }
                InstKind::Select {
                    true_value,
                    false_value,
                    ..
                } => self.visit_phi(inst.value, &[*true_value, *false_value]),
                InstKind::Branch { .. } | InstKind::Switch { .. } | InstKind::Ret { .. } => {}
                InstKind::Other { .. } => self.visit_other(inst.value),
            }
        }
    }

    /// The points-to set an operand contributes when used as a stored value
    /// or a merge input. Non-pointer operands contribute an opaque program
    /// value when scalar tracking is on, otherwise nothing.
    fn operand_points_to(&self, value: ValueId) -> PointToMap {
        let register = self.bv.translate_alias(value);
        if let Some(map) = self.bv.regfile.get(&register) {
            if !map.is_empty() {
                return map.clone();
            }
        }
        let mut map = PointToMap::new();
        if self.bv.options.track_program_values
            && self.bv.module.ptr_nest_level(self.bv.module.type_of(value)) == 0
        {
            map.insert_mut(
                AbstractLocation::ProgramValue(value),
                Constraint::Top.weaken(),
            );
        }
        map
    }

    /// A fresh abstract cell per allocation site. The defining register
    /// points at it unconditionally; the cell itself starts empty. Array
    /// and scalar allocations are treated alike.
    #[logfn_inputs(TRACE)]
    fn visit_allocation(&mut self, result: ValueId, heap: bool) {
        let location = if heap {
            AbstractLocation::Heap(result)
        } else {
            AbstractLocation::Stack(result)
        };
        let mut map = PointToMap::new();
        map.insert_mut(location, Constraint::Top);
        self.bv.regfile.insert_mut(result, map);
    }

    /// `store value, pointer`. When the pointer resolves to exactly one cell
    /// under a constraint that always holds, the cell's contents are
    /// replaced (strong update). Otherwise every candidate cell absorbs the
    /// stored set disjunctively (weak update), each contribution gated by
    /// the constraint under which the pointer names that cell.
    #[logfn_inputs(TRACE)]
    fn visit_store(&mut self, value: ValueId, pointer: ValueId) {
        let register = self.bv.translate_alias(pointer);
        let pointer_map = match self.bv.regfile.get(&register) {
            Some(map) => map.clone(),
            None => {
                debug!("store through untracked pointer {:?}", pointer);
                return;
            }
        };
        let value_map = self.operand_points_to(value);
        if pointer_map.size() == 1 {
            let (location, c) = pointer_map.iter().next().expect("size checked above");
            let (location, c) = (*location, c.clone());
            if self.bv.smt_solver.test_validity(&c) {
                self.state
                    .update_value_at(location, conjoin_point_to_map(&value_map, &c));
                return;
            }
        }
        for (location, c) in pointer_map.iter() {
            let contribution = conjoin_point_to_map(&value_map, c);
            let merged = match self.state.value_at(location) {
                Some(cell) => merge_point_to_maps(cell, &contribution),
                None => contribution,
            };
            self.state.update_value_at(*location, merged);
        }
    }

    /// `result = load pointer`: the union over the pointer's candidate cells
    /// of their target sets, each edge conjoined with the constraint under
    /// which the pointer names that cell, deduplicated by target.
    #[logfn_inputs(TRACE)]
    fn visit_load(&mut self, result: ValueId, pointer: ValueId) {
        let register = self.bv.translate_alias(pointer);
        let pointer_map = match self.bv.regfile.get(&register) {
            Some(map) => map.clone(),
            None => {
                debug!("load through untracked pointer {:?}", pointer);
                PointToMap::new()
            }
        };
        let mut result_map = PointToMap::new();
        for (location, c_pointer) in pointer_map.iter() {
            if let Some(cell) = self.state.value_at(location) {
                for (target, c_target) in cell.iter() {
                    let c = c_pointer.and(c_target).simplify();
                    if c.is_bottom() {
                        continue;
                    }
                    let joined = match result_map.get(target) {
                        Some(existing) => existing.or(&c),
                        None => c,
                    };
                    result_map.insert_mut(*target, joined);
                }
            }
        }
        self.bv.regfile.insert_mut(result, result_map);
    }

    /// φ and select: the defined register's set is the disjunctive merge of
    /// the incoming sets. Incoming constraints are taken as-is; path
    /// predicates are not tracked separately.
    #[logfn_inputs(TRACE)]
    fn visit_phi(&mut self, result: ValueId, incoming: &[ValueId]) {
        let mut merged = PointToMap::new();
        for value in incoming {
            merged = merge_point_to_maps(&merged, &self.operand_points_to(*value));
        }
        self.bv.regfile.insert_mut(result, merged);
    }

    /// Any other value-producing instruction is opaque; with scalar tracking
    /// on it is pinned to its own program-value tag.
    fn visit_other(&mut self, result: ValueId) {
        if self.bv.options.track_program_values {
            let mut map = PointToMap::new();
            map.insert_mut(AbstractLocation::ProgramValue(result), Constraint::Top);
            self.bv.regfile.insert_mut(result, map);
        }
    }
}
