// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::body_visitor::BodyVisitor;
use crate::constraint::Constraint;
use crate::control_flow::ExecAfterCondition;
use crate::fixed_point_visitor::FixedPointVisitor;
use crate::ir::{FuncId, InstId, InstKind, Module, ValueId};
use crate::location::AbstractLocation;
use crate::options::Options;
use crate::store::PointToMap;
use crate::summaries::{analyze_function, SummaryEnvironment};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

/// What may have written the value a load observes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum DependencySource {
    /// A store instruction.
    Store(ValueId),
    /// A summarized call site that may write the loaded cell.
    Call(ValueId),
    /// A function input (argument or global) whose pre-existing memory was
    /// never overwritten on some path to the load.
    Input(ValueId),
}

impl DependencySource {
    pub fn value(&self) -> ValueId {
        match self {
            DependencySource::Store(v)
            | DependencySource::Call(v)
            | DependencySource::Input(v) => *v,
        }
    }
}

/// A read-after-write edge: the load may observe a value written by the
/// source, under the given input-aliasing hypothesis.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RawDependence {
    pub load: ValueId,
    pub source: DependencySource,
    pub constraint: Constraint,
}

/// The RAW program-dependence graph of one function, in a deterministic
/// order.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RawDependenceReport {
    pub func: FuncId,
    pub dependences: Vec<RawDependence>,
}

impl RawDependenceReport {
    /// (load-store, load-call, load-input) edge counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for dep in &self.dependences {
            match dep.source {
                DependencySource::Store(_) => counts.0 += 1,
                DependencySource::Call(_) => counts.1 += 1,
                DependencySource::Input(_) => counts.2 += 1,
            }
        }
        counts
    }

    pub fn render_text(&self, module: &Module) -> String {
        let mut out = String::from("[RAW deps]:\n");
        for dep in &self.dependences {
            let _ = writeln!(
                out,
                " ({} -> {}) ? {}",
                module.describe_value(dep.load),
                module.describe_value(dep.source.value()),
                dep.constraint
            );
        }
        out
    }

    pub fn render_dot(&self, module: &Module) -> String {
        let mut out = String::from("digraph PDG {\n");
        for dep in &self.dependences {
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\"]",
                module.describe_value(dep.source.value()),
                module.describe_value(dep.load),
                dep.constraint
            );
        }
        out.push_str("}\n");
        out
    }

    pub fn render(&self, module: &Module, options: &Options) -> String {
        if options.graphviz_output {
            self.render_dot(module)
        } else {
            self.render_text(module)
        }
    }
}

/// A writer accepted into a load's candidate dependency set. Inputs write
/// at function entry and carry no instruction; only stores take part in
/// strong kills, since calls and inputs over-approximate.
struct Candidate {
    source: DependencySource,
    at: Option<InstId>,
    constraint: Constraint,
    is_store: bool,
}

/// Computes the RAW dependence report for `func`, converging its summary
/// first if needed. A fresh analysis pass over the converged summaries
/// reconstructs the register file, the update history and the control-flow
/// facts the extraction needs; by idempotence of the fixpoint it reproduces
/// the converged store.
pub fn extract_raw_dependences(
    env: &mut SummaryEnvironment,
    module: &Module,
    options: &Options,
    func: FuncId,
) -> RawDependenceReport {
    if module.function(func).is_declaration() {
        return RawDependenceReport {
            func,
            dependences: vec![],
        };
    }
    analyze_function(env, module, options, func);
    let inputs = env
        .summary(func)
        .map(|s| s.inputs.clone())
        .unwrap_or_default();
    let mut bv = BodyVisitor::new(module, &*env, options, func, inputs);
    FixedPointVisitor::new(&mut bv).visit_blocks();

    let function = module.function(func);
    let mut loads: Vec<(InstId, ValueId, ValueId)> = vec![];
    let mut stores: Vec<(InstId, ValueId, ValueId)> = vec![];
    let mut calls: Vec<(InstId, ValueId, PointToMap)> = vec![];
    for (inst_id, inst) in function.instructions() {
        match &inst.kind {
            InstKind::Load { pointer } => loads.push((inst_id, inst.value, *pointer)),
            InstKind::Store { pointer, .. } => stores.push((inst_id, inst.value, *pointer)),
            InstKind::Call { .. } => {
                if let Some(map) = bv.update_history.get(&inst.value) {
                    calls.push((inst_id, inst.value, map.clone()));
                }
            }
            _ => {}
        }
    }

    let mut edges: HashMap<(ValueId, DependencySource), Constraint> = HashMap::new();
    for (load_id, load_value, load_pointer) in &loads {
        let pointer_map = bv
            .regfile
            .get(&bv.translate_alias(*load_pointer))
            .cloned()
            .unwrap_or_default();
        for (location, c_load) in pointer_map.iter() {
            let mut dependencies: Vec<Candidate> = vec![];

            // The pre-existing memory of an input is its first writer.
            if let AbstractLocation::RuntimeMemory { input, .. } = location {
                dependencies.push(Candidate {
                    source: DependencySource::Input(*input),
                    at: None,
                    constraint: Constraint::Top,
                    is_store: false,
                });
            }

            for (store_id, store_value, store_pointer) in &stores {
                if bv.control_flow.exec_after(*load_id, *store_id) == ExecAfterCondition::Never {
                    // The load can never observe this store.
                    continue;
                }
                let c_store = match bv
                    .regfile
                    .get(&bv.translate_alias(*store_pointer))
                    .and_then(|m| m.get(location))
                {
                    Some(c) => c.clone(),
                    None => continue,
                };
                let candidate = Candidate {
                    source: DependencySource::Store(*store_value),
                    at: Some(*store_id),
                    constraint: c_store,
                    is_store: true,
                };
                sweep_and_insert(&mut dependencies, candidate, &mut bv);
            }

            // Summarized calls are generalized stores with weakened
            // constraints: killable in principle but never killing.
            for (call_id, call_value, map) in &calls {
                if bv.control_flow.exec_after(*load_id, *call_id) == ExecAfterCondition::Never {
                    continue;
                }
                let c_call = match map.get(location) {
                    Some(c) => c.weaken(),
                    None => continue,
                };
                let candidate = Candidate {
                    source: DependencySource::Call(*call_value),
                    at: Some(*call_id),
                    constraint: c_call,
                    is_store: false,
                };
                sweep_and_insert(&mut dependencies, candidate, &mut bv);
            }

            for dep in dependencies {
                let key = (*load_value, dep.source);
                let c = c_load.and(&dep.constraint);
                let entry = edges.entry(key).or_insert(Constraint::Bottom);
                let joined = entry.or(&c);
                *entry = joined;
            }
        }
    }

    let mut dependences: Vec<RawDependence> = edges
        .into_iter()
        .filter_map(|((load, source), constraint)| {
            let constraint = constraint.simplify();
            if bv.smt_solver.test_satisfiability(&constraint) {
                Some(RawDependence {
                    load,
                    source,
                    constraint,
                })
            } else {
                None
            }
        })
        .collect();
    dependences.sort_by_key(|d| (d.load, d.source));
    RawDependenceReport { func, dependences }
}

/// The kill sweep. A store candidate removes an accepted writer that it
/// strongly overwrites: it must execute after that writer and its
/// constraint must imply the writer's. Symmetrically, the candidate is
/// suppressed when an accepted store must execute after it under an
/// implied constraint. Candidates that are not stores kill nothing.
fn sweep_and_insert(
    dependencies: &mut Vec<Candidate>,
    candidate: Candidate,
    bv: &mut BodyVisitor<'_>,
) {
    let mut kept: Vec<Candidate> = Vec::with_capacity(dependencies.len() + 1);
    let mut suppressed = false;
    let mut remaining = std::mem::take(dependencies).into_iter();
    for existing in remaining.by_ref() {
        if candidate.is_store {
            let candidate_after = match existing.at {
                // Everything executes after the function entry.
                None => ExecAfterCondition::Must,
                Some(at) => bv.control_flow.exec_after(candidate.at.expect("stores have sites"), at),
            };
            if candidate_after == ExecAfterCondition::Must
                && bv
                    .smt_solver
                    .test_implication(&candidate.constraint, &existing.constraint)
            {
                // The candidate strongly overwrites this writer.
                continue;
            }
        }
        if existing.is_store {
            let existing_after = match candidate.at {
                None => ExecAfterCondition::Must,
                Some(at) => bv
                    .control_flow
                    .exec_after(existing.at.expect("stores have sites"), at),
            };
            if existing_after == ExecAfterCondition::Must
                && bv
                    .smt_solver
                    .test_implication(&existing.constraint, &candidate.constraint)
            {
                suppressed = true;
                kept.push(existing);
                break;
            }
        }
        kept.push(existing);
    }
    kept.extend(remaining);
    *dependencies = kept;
    if !suppressed {
        dependencies.push(candidate);
    }
}
