// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::block_visitor::BlockVisitor;
use crate::constraint::Constraint;
use crate::expression::{Expression, ExpressionTrait};
use crate::ir::{FuncId, ValueId};
use crate::k_limits;
use crate::location::AbstractLocation;
use crate::store::{merge_point_to_maps, PointToMap};
use crate::summaries::FunctionSummary;

use log_derive::logfn_inputs;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// How a callee input renames into the calling context: either it resolves
/// to one of the caller's own inputs (so callee alias atoms become caller
/// alias atoms), or it is an opaque caller value such as an allocation site
/// (so alias atoms involving it are decided outright).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CallerTerm {
    Input(usize),
    Opaque(ValueId),
}

type DerefCache = HashMap<(usize, u32), Vec<(AbstractLocation, Constraint)>>;

/// Interprets call instructions: calls to summarized functions instantiate
/// the callee's store into the caller's, calls to declarations degrade to
/// weak tracking of an opaque result.
pub struct CallVisitor<'call, 'block, 'analysis> {
    pub block_visitor: &'call mut BlockVisitor<'block, 'analysis>,
}

impl<'call, 'block, 'analysis> Debug for CallVisitor<'call, 'block, 'analysis> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "CallVisitor".fmt(f)
    }
}

impl<'call, 'block, 'analysis> CallVisitor<'call, 'block, 'analysis> {
    pub fn new(
        block_visitor: &'call mut BlockVisitor<'block, 'analysis>,
    ) -> CallVisitor<'call, 'block, 'analysis> {
        CallVisitor { block_visitor }
    }

    #[logfn_inputs(TRACE)]
    pub fn visit_call(&mut self, result: ValueId, callee: Option<FuncId>, args: &[ValueId]) {
        let module = self.block_visitor.bv.module;
        let callee = match callee {
            // An indirect call whose target cannot be resolved behaves like
            // a call to a declaration.
            None => return self.visit_external_call(result, None),
            Some(f) => f,
        };
        if module.function(callee).is_declaration() {
            return self.visit_external_call(result, Some(callee));
        }
        match self.block_visitor.bv.env.summary(callee) {
            Some(summary) => self.visit_summarized_call(result, summary, args),
            None => {
                // The driver creates callee summaries before analyzing the
                // caller, so this indicates a frontend handed us a call the
                // driver never saw. Degrade rather than fail.
                warn!("no summary for callee {}", module.function(callee).name);
                self.visit_external_call(result, Some(callee));
            }
        }
    }

    /// Calls to functions without bodies are assumed not to change the
    /// points-to relation, which is an unsound simplification for functions
    /// that really do write through their pointer arguments. With scalar
    /// tracking on, the result register is pinned to the callee as an
    /// opaque program value.
    #[logfn_inputs(TRACE)]
    fn visit_external_call(&mut self, result: ValueId, callee: Option<FuncId>) {
        if !self.block_visitor.bv.options.track_program_values {
            return;
        }
        let module = self.block_visitor.bv.module;
        let tag = callee
            .map(|f| module.function(f).value)
            .unwrap_or(result);
        let mut map = PointToMap::new();
        map.insert_mut(
            AbstractLocation::ProgramValue(tag),
            Constraint::Top.weaken(),
        );
        self.block_visitor.bv.regfile.insert_mut(result, map);
    }

    /// Instantiates the callee's summary at this site. The callee's inputs
    /// are the actual arguments followed by the callee's referenced globals;
    /// every `RuntimeMemory` location of the callee is substituted by the
    /// caller's dereference set of the matching actual, alias atoms are
    /// renamed through the caller's own alias table, and every edge is
    /// weakened before being merged into the caller's store. Cells the
    /// callee may have written are recorded in the update history so the
    /// dependence extractor can treat this site as a generalized store.
    fn visit_summarized_call(&mut self, result: ValueId, summary: &FunctionSummary, args: &[ValueId]) {
        let mut actuals: Vec<ValueId> = args.to_vec();
        actuals.extend(summary.globals.iter().copied());
        if actuals.len() != summary.inputs.len() {
            warn!(
                "call provides {} inputs but summary expects {}",
                actuals.len(),
                summary.inputs.len()
            );
            return self.visit_external_call(result, Some(summary.func));
        }
        let terms: Vec<CallerTerm> = actuals
            .iter()
            .map(|a| {
                let register = self.block_visitor.bv.translate_alias(*a);
                match self.block_visitor.bv.input_index.get(&register) {
                    Some(index) => CallerTerm::Input(*index),
                    None => CallerTerm::Opaque(register),
                }
            })
            .collect();
        let callee_index: HashMap<ValueId, usize> = summary
            .inputs
            .iter()
            .enumerate()
            .map(|(i, v)| (*v, i))
            .collect();
        let mut cache = DerefCache::new();

        // Phase one: compute the instantiated edges against the pre-call
        // state, so substitution is not affected by the merge order.
        let mut merges: Vec<(AbstractLocation, AbstractLocation, Constraint)> = vec![];
        let mut written: HashMap<AbstractLocation, Constraint> = HashMap::new();
        for (location, cell) in summary.store.iter() {
            if location.is_register() {
                continue;
            }
            let sources = self.substitute_location(location, &callee_index, &actuals, &mut cache);
            if sources.is_empty() {
                continue;
            }
            let pristine = is_pristine_chain(location, cell);
            for (target, c_target) in cell.iter() {
                let mapped = self.map_constraint(c_target, &terms);
                if mapped.is_bottom() {
                    continue;
                }
                let targets =
                    self.substitute_location(target, &callee_index, &actuals, &mut cache);
                for (source_loc, c_source) in &sources {
                    for (target_loc, c_reach) in &targets {
                        let c = mapped.and(c_source).and(c_reach).simplify();
                        if c.is_bottom() {
                            continue;
                        }
                        merges.push((*source_loc, *target_loc, c));
                    }
                }
            }
            if !pristine {
                for (source_loc, c_source) in &sources {
                    let entry = written
                        .entry(*source_loc)
                        .or_insert(Constraint::Bottom);
                    let joined = entry.or(c_source);
                    *entry = joined;
                }
            }
        }

        for (location, target, c) in merges {
            let mut contribution = PointToMap::new();
            contribution.insert_mut(target, c);
            let merged = match self.block_visitor.state.value_at(&location) {
                Some(cell) => merge_point_to_maps(cell, &contribution),
                None => contribution,
            };
            self.block_visitor.state.update_value_at(location, merged);
        }

        if !written.is_empty() {
            let mut map = PointToMap::new();
            for (location, c) in written {
                map.insert_mut(location, c);
            }
            self.block_visitor.bv.update_history.insert(result, map);
        }

        self.assign_return_value(result, summary, &callee_index, &actuals, &terms, &mut cache);
    }

    /// The call's result register inherits the instantiated points-to set of
    /// the summary's return value.
    fn assign_return_value(
        &mut self,
        result: ValueId,
        summary: &FunctionSummary,
        callee_index: &HashMap<ValueId, usize>,
        actuals: &[ValueId],
        terms: &[CallerTerm],
        cache: &mut DerefCache,
    ) {
        let mut return_map = PointToMap::new();
        if let Some(return_value) = summary.return_value {
            if let Some(cell) = summary
                .store
                .value_at(&AbstractLocation::Register(return_value))
            {
                let cell = cell.clone();
                for (target, c_target) in cell.iter() {
                    let mapped = self.map_constraint(c_target, terms);
                    if mapped.is_bottom() {
                        continue;
                    }
                    for (target_loc, c_reach) in
                        self.substitute_location(target, callee_index, actuals, cache)
                    {
                        let c = mapped.and(&c_reach).simplify();
                        if c.is_bottom() {
                            continue;
                        }
                        let joined = match return_map.get(&target_loc) {
                            Some(existing) => existing.or(&c),
                            None => c,
                        };
                        return_map.insert_mut(target_loc, joined);
                    }
                }
            }
        }
        if return_map.is_empty() {
            if self.block_visitor.bv.options.track_program_values {
                return_map.insert_mut(
                    AbstractLocation::ProgramValue(result),
                    Constraint::Top.weaken(),
                );
            } else {
                return;
            }
        }
        self.block_visitor.bv.regfile.insert_mut(result, return_map);
    }

    /// Maps a callee location into caller terms. `RuntimeMemory` locations
    /// of callee inputs become the caller's dereference set of the matching
    /// actual; allocation sites and opaque values cross the boundary
    /// unchanged.
    fn substitute_location(
        &self,
        location: &AbstractLocation,
        callee_index: &HashMap<ValueId, usize>,
        actuals: &[ValueId],
        cache: &mut DerefCache,
    ) -> Vec<(AbstractLocation, Constraint)> {
        match location {
            AbstractLocation::RuntimeMemory { input, level } => {
                match callee_index.get(input) {
                    Some(index) => self.dereference_set(*index, actuals[*index], *level, cache),
                    None => vec![(*location, Constraint::Top)],
                }
            }
            _ => vec![(*location, Constraint::Top)],
        }
    }

    /// The caller locations reached by dereferencing `actual` `level + 1`
    /// times: level 0 is the register's own points-to set, each further
    /// level steps through the current store.
    fn dereference_set(
        &self,
        index: usize,
        actual: ValueId,
        level: u32,
        cache: &mut DerefCache,
    ) -> Vec<(AbstractLocation, Constraint)> {
        if let Some(cached) = cache.get(&(index, level)) {
            return cached.clone();
        }
        if level > k_limits::MAX_DEREFERENCE_LEVEL {
            warn!("dereference chain exceeds limit at level {level}");
            return vec![];
        }
        let result = if level == 0 {
            let register = self.block_visitor.bv.translate_alias(actual);
            match self.block_visitor.bv.regfile.get(&register) {
                Some(map) => map.iter().map(|(l, c)| (*l, c.clone())).collect(),
                None => {
                    debug!("call actual {:?} has no points-to entry", actual);
                    vec![]
                }
            }
        } else {
            let previous = self.dereference_set(index, actual, level - 1, cache);
            let mut accumulated: HashMap<AbstractLocation, Constraint> = HashMap::new();
            for (location, c) in previous {
                if let Some(cell) = self.block_visitor.state.value_at(&location) {
                    for (target, c_target) in cell.iter() {
                        let conjoined = c.and(c_target);
                        if conjoined.is_bottom() {
                            continue;
                        }
                        let entry = accumulated
                            .entry(*target)
                            .or_insert(Constraint::Bottom);
                        let joined = entry.or(&conjoined);
                        *entry = joined;
                    }
                }
            }
            accumulated.into_iter().collect()
        };
        cache.insert((index, level), result.clone());
        result
    }

    /// Conjoining image of a callee constraint: the alias atoms are renamed
    /// through the caller's input list and alias table, and the result is
    /// weakened, reflecting uncertainty about the callee's internal paths.
    fn map_constraint(&self, c: &Constraint, terms: &[CallerTerm]) -> Constraint {
        match c {
            Constraint::Bottom => Constraint::Bottom,
            _ => Constraint::from_expression(self.map_expression(&c.may_expression(), terms))
                .weaken(),
        }
    }

    fn map_expression(&self, e: &Rc<Expression>, terms: &[CallerTerm]) -> Rc<Expression> {
        match e.as_ref() {
            Expression::True => Expression::truth(),
            Expression::False => Expression::falsehood(),
            Expression::Equals { left, right } => {
                match (terms.get(*left), terms.get(*right)) {
                    (Some(CallerTerm::Input(p)), Some(CallerTerm::Input(q))) => {
                        if p == q {
                            Expression::truth()
                        } else if !self.block_visitor.bv.smt_solver.test_alias(*p, *q) {
                            Expression::falsehood()
                        } else {
                            Expression::equals(*p, *q)
                        }
                    }
                    (Some(CallerTerm::Opaque(a)), Some(CallerTerm::Opaque(b))) => {
                        // Distinct concrete sites never alias.
                        if a == b {
                            Expression::truth()
                        } else {
                            Expression::falsehood()
                        }
                    }
                    (Some(_), Some(_)) => Expression::falsehood(),
                    _ => {
                        debug!("alias atom outside the callee input range");
                        Expression::truth()
                    }
                }
            }
            Expression::Not { operand } => self.map_expression(operand, terms).logical_not(),
            Expression::And { left, right } => self
                .map_expression(left, terms)
                .and(&self.map_expression(right, terms)),
            Expression::Or { left, right } => self
                .map_expression(left, terms)
                .or(&self.map_expression(right, terms)),
        }
    }
}

/// True for a cell that still looks exactly like the entry chain the callee
/// started from: a single unconditional edge to the next dereference level
/// of the same input. Such cells were never written by the callee and do
/// not belong in the update history.
fn is_pristine_chain(location: &AbstractLocation, cell: &PointToMap) -> bool {
    if let AbstractLocation::RuntimeMemory { input, level } = location {
        if cell.size() == 1 {
            if let Some((target, constraint)) = cell.iter().next() {
                return *target
                    == AbstractLocation::RuntimeMemory {
                        input: *input,
                        level: level + 1,
                    }
                    && constraint.is_top();
            }
        }
    }
    false
}
