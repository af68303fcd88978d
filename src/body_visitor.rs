// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constraint::Constraint;
use crate::constraint_solver::ConstraintSolver;
use crate::control_flow::ControlFlowInfo;
use crate::ir::{BlockId, FuncId, Function, Module, ValueId};
use crate::location::AbstractLocation;
use crate::options::Options;
use crate::store::{AbstractRegFile, AbstractStore, PointToMap};
use crate::summaries::SummaryEnvironment;

use log_derive::logfn_inputs;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result};

/// Holds the state of one function analysis pass: the constraint solver
/// session, the control-flow facts, the entry store derived from the input
/// aliasing hypotheses, the register file, and the per-block store cache the
/// fixpoint iterates over. Everything here dies with the pass; the result
/// store is cloned into the summary on finalization.
pub struct BodyVisitor<'analysis> {
    pub module: &'analysis Module,
    pub env: &'analysis SummaryEnvironment,
    pub options: &'analysis Options,
    pub func: FuncId,
    /// The summary inputs: parameters followed by referenced globals.
    pub inputs: Vec<ValueId>,
    /// Input value -> its index in `inputs`.
    pub input_index: HashMap<ValueId, usize>,
    pub smt_solver: ConstraintSolver,
    pub control_flow: ControlFlowInfo,
    pub entry_store: AbstractStore,
    pub regfile: AbstractRegFile,
    /// Pointer-preserving instructions (bitcast, getelementptr) recorded as
    /// indexing rewrites: the defined register maps to the representative
    /// that holds the points-to entry.
    alias_registers: HashMap<ValueId, ValueId>,
    pub block_store_cache: HashMap<BlockId, AbstractStore>,
    /// Summarized call sites and the caller cells they may have written;
    /// the dependence extractor treats these as generalized store sites.
    pub update_history: HashMap<ValueId, PointToMap>,
    pub result_store: AbstractStore,
}

impl<'analysis> Debug for BodyVisitor<'analysis> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "BodyVisitor({})", self.module.function(self.func).name)
    }
}

impl<'analysis> BodyVisitor<'analysis> {
    pub fn new(
        module: &'analysis Module,
        env: &'analysis SummaryEnvironment,
        options: &'analysis Options,
        func: FuncId,
        inputs: Vec<ValueId>,
    ) -> BodyVisitor<'analysis> {
        let mut smt_solver = ConstraintSolver::new(inputs.len());
        reject_infeasible_aliases(module, &inputs, &mut smt_solver);
        let (entry_store, regfile) = build_entry_state(module, &inputs, &smt_solver);
        let input_index = inputs.iter().enumerate().map(|(i, v)| (*v, i)).collect();
        let control_flow = ControlFlowInfo::new(module.function(func));
        BodyVisitor {
            module,
            env,
            options,
            func,
            inputs,
            input_index,
            smt_solver,
            control_flow,
            entry_store,
            regfile,
            alias_registers: HashMap::new(),
            block_store_cache: HashMap::new(),
            update_history: HashMap::new(),
            result_store: AbstractStore::new(),
        }
    }

    pub fn function(&self) -> &'analysis Function {
        self.module.function(self.func)
    }

    /// Resolves a chain of register aliases back to the representative
    /// register that owns the points-to entry.
    pub fn translate_alias(&self, value: ValueId) -> ValueId {
        let mut current = value;
        while let Some(next) = self.alias_registers.get(&current) {
            current = *next;
        }
        current
    }

    /// Records the defined register as an alias of its pointer operand.
    /// Chains are compressed at insertion so lookups stay short.
    #[logfn_inputs(TRACE)]
    pub fn assign_alias_register(&mut self, register: ValueId, operand: ValueId) {
        let representative = self.translate_alias(operand);
        self.alias_registers.insert(register, representative);
    }

    /// The input store for a block: the pointwise merge of the cached output
    /// stores of every predecessor analysed so far. Back edges from
    /// not-yet-analysed predecessors contribute nothing; a missing store on
    /// a forward edge is recovered as an empty contribution and logged,
    /// since the worklist will revisit this block anyway. Only a block with
    /// no predecessors starts from the function's entry store.
    #[logfn_inputs(TRACE)]
    pub fn initial_state_for_block(&self, block: BlockId) -> AbstractStore {
        let function = self.function();
        let preds = &function.block(block).preds;
        if preds.is_empty() {
            return self.entry_store.clone();
        }
        let mut state: Option<AbstractStore> = None;
        for pred in preds {
            match self.block_store_cache.get(pred) {
                Some(pred_state) => {
                    state = Some(match state {
                        Some(s) => s.merge(pred_state),
                        None => pred_state.clone(),
                    });
                }
                None => {
                    if !self.control_flow.is_back_edge(*pred, block) {
                        debug!(
                            "no cached store for forward edge bb{} -> bb{}; treating as empty",
                            pred.0, block.0
                        );
                    }
                }
            }
        }
        state.unwrap_or_default()
    }

    /// Replaces the cached output store for the block and reports whether it
    /// changed. The store is re-installed even when the comparison finds it
    /// equivalent, so that no residue of unsimplified constraints survives.
    #[logfn_inputs(TRACE)]
    pub fn commit_block(&mut self, block: BlockId, state: AbstractStore) -> bool {
        match self.block_store_cache.get(&block) {
            None => {
                self.block_store_cache.insert(block, state);
                true
            }
            Some(previous) => {
                let changed = !state.equal(previous, &mut self.smt_solver);
                self.block_store_cache.insert(block, state);
                changed
            }
        }
    }

    /// Clones the final block's store, folds the register file in as
    /// `Register` keys and normalizes; this is the store a summary publishes.
    #[logfn_inputs(TRACE)]
    pub fn build_result_store(&mut self) {
        let function = self.function();
        let last = BlockId(function.blocks.len().saturating_sub(1) as u32);
        let mut result = self
            .block_store_cache
            .get(&last)
            .cloned()
            .unwrap_or_default();
        for (register, map) in self.regfile.iter() {
            result.update_value_at(AbstractLocation::Register(*register), map.clone());
        }
        result.normalize(&mut self.smt_solver);
        self.result_store = result;
    }
}

/// Issues the initial alias rejections between the inputs. A pair cannot
/// alias when either side is a non-pointer, when the pointer nesting levels
/// differ, or when both are distinct globals. Differing pointee types also
/// reject, which is unsound under type punning but prunes aggressively; see
/// DESIGN.md.
fn reject_infeasible_aliases(module: &Module, inputs: &[ValueId], solver: &mut ConstraintSolver) {
    let nest_levels: Vec<u32> = inputs
        .iter()
        .map(|v| module.ptr_nest_level(module.type_of(*v)))
        .collect();
    for i in 0..inputs.len() {
        for j in 0..i {
            let ty_i = module.type_of(inputs[i]);
            let ty_j = module.type_of(inputs[j]);
            if nest_levels[i] == 0 || nest_levels[j] == 0 {
                solver.reject_alias(i, j);
            } else if nest_levels[i] != nest_levels[j] {
                solver.reject_alias(i, j);
            } else if module.is_global(inputs[i]) && module.is_global(inputs[j]) {
                solver.reject_alias(i, j);
            } else if ty_i != ty_j {
                // TODO: exclude opaque pointers from this rule; rejecting on
                // pointee type alone is unsound under type punning.
                solver.reject_alias(i, j);
            }
        }
    }
}

/// Installs the entry state. Each pointer input's register points to its
/// own level-0 cell under the canonical self-witness, and to the level-0
/// cell of every earlier input it may still alias, under the canonical
/// witness for that pair. Deeper dereference cells are chained with
/// unconditional edges down to one level short of the nesting depth.
fn build_entry_state(
    module: &Module,
    inputs: &[ValueId],
    solver: &ConstraintSolver,
) -> (AbstractStore, AbstractRegFile) {
    let mut store = AbstractStore::new();
    let mut regfile = AbstractRegFile::new();
    for (i, input) in inputs.iter().enumerate() {
        let nest_level = module.ptr_nest_level(module.type_of(*input));
        if nest_level == 0 {
            continue;
        }
        let mut register_map = PointToMap::new();
        register_map.insert_mut(
            AbstractLocation::RuntimeMemory {
                input: *input,
                level: 0,
            },
            solver.make_alias_constraint(i, i),
        );
        for (j, earlier) in inputs.iter().enumerate().take(i) {
            if solver.test_alias(i, j) {
                register_map.insert_mut(
                    AbstractLocation::RuntimeMemory {
                        input: *earlier,
                        level: 0,
                    },
                    solver.make_alias_constraint(i, j),
                );
            }
        }
        regfile.insert_mut(*input, register_map);
        for level in 0..nest_level.saturating_sub(1) {
            let mut cell = PointToMap::new();
            cell.insert_mut(
                AbstractLocation::RuntimeMemory {
                    input: *input,
                    level: level + 1,
                },
                Constraint::Top,
            );
            store.update_value_at(
                AbstractLocation::RuntimeMemory {
                    input: *input,
                    level,
                },
                cell,
            );
        }
    }
    (store, regfile)
}
