// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::body_visitor::BodyVisitor;
use crate::call_graph::CallGraph;
use crate::fixed_point_visitor::FixedPointVisitor;
use crate::ir::{FuncId, InstKind, Module, ValueId};
use crate::k_limits;
use crate::options::Options;
use crate::store::AbstractStore;

use log_derive::logfn_inputs;
use mirai_annotations::checked_assume;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The per-function fixed point of the abstract interpretation,
/// parameterized by input-alias hypotheses. Callers specialize it by
/// substituting the runtime-memory locations of its inputs with their own
/// dereference sets and renaming the alias atoms; no per-call-site
/// re-analysis takes place.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionSummary {
    pub func: FuncId,
    /// Parameters followed by referenced globals; the order fixes the
    /// meaning of the alias atoms in the summary's constraints.
    pub inputs: Vec<ValueId>,
    pub globals: Vec<ValueId>,
    /// The defined functions this function calls directly.
    pub called_functions: Vec<FuncId>,
    /// The result store of the latest analysis pass, with the register file
    /// folded in as `Register` keys.
    pub store: AbstractStore,
    /// Distinguishes a computed empty store from the default one, so the
    /// convergence test never confuses "not yet analyzed" with "no effects".
    pub is_computed: bool,
    pub converged: bool,
    /// The value of the terminating return instruction, if any.
    pub return_value: Option<ValueId>,
}

/// The process-wide cache of function summaries, created lazily on first
/// reference and evicted only at shutdown. Summaries are mutated only by
/// the driver activation that holds the matching function on its analysis
/// stack; analysis contexts see the environment read-only.
#[derive(Default)]
pub struct SummaryEnvironment {
    summaries: HashMap<FuncId, FunctionSummary>,
    referenced_globals: HashMap<FuncId, Vec<ValueId>>,
}

impl std::fmt::Debug for SummaryEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SummaryEnvironment({} summaries)", self.summaries.len())
    }
}

impl SummaryEnvironment {
    pub fn new(module: &Module) -> SummaryEnvironment {
        let call_graph = CallGraph::new(module);
        SummaryEnvironment {
            summaries: HashMap::new(),
            referenced_globals: call_graph.referenced_globals(module),
        }
    }

    /// The summary for the function, created in its default state on first
    /// reference.
    #[logfn_inputs(TRACE)]
    pub fn lookup_summary(&mut self, module: &Module, func: FuncId) -> &FunctionSummary {
        if !self.summaries.contains_key(&func) {
            let summary = self.build_default_summary(module, func);
            self.summaries.insert(func, summary);
        }
        &self.summaries[&func]
    }

    pub fn summary(&self, func: FuncId) -> Option<&FunctionSummary> {
        self.summaries.get(&func)
    }

    fn summary_mut(&mut self, func: FuncId) -> &mut FunctionSummary {
        self.summaries
            .get_mut(&func)
            .expect("summary created before mutation")
    }

    fn build_default_summary(&self, module: &Module, func: FuncId) -> FunctionSummary {
        let function = module.function(func);
        let globals = self
            .referenced_globals
            .get(&func)
            .cloned()
            .unwrap_or_default();
        let mut inputs = function.params.clone();
        inputs.extend(globals.iter().copied());
        let mut called_functions = vec![];
        let mut seen = HashSet::new();
        let mut return_value = None;
        for (inst_id, inst) in function.instructions() {
            match &inst.kind {
                InstKind::Call {
                    callee: Some(callee),
                    ..
                } => {
                    if !module.function(*callee).is_declaration()
                        && !module.is_malloc_call(func, inst_id)
                        && seen.insert(*callee)
                    {
                        called_functions.push(*callee);
                    }
                }
                InstKind::Ret { value } => return_value = *value,
                _ => {}
            }
        }
        FunctionSummary {
            func,
            inputs,
            globals,
            called_functions,
            store: AbstractStore::new(),
            is_computed: false,
            converged: false,
            return_value,
        }
    }
}

/// Computes the summary of `func` to convergence, recursively computing
/// whatever callee summaries that requires. The entry point an embedder
/// calls after building the module.
pub fn analyze_function(
    env: &mut SummaryEnvironment,
    module: &Module,
    options: &Options,
    func: FuncId,
) {
    if module.function(func).is_declaration() {
        return;
    }
    env.lookup_summary(module, func);
    if env.summary(func).map(|s| s.converged).unwrap_or(false) {
        return;
    }
    let mut analysis_history: HashSet<FuncId> = HashSet::new();
    analyze_function_recursive(env, module, options, func, &mut analysis_history, true);
}

/// Computes summaries for every defined function in the module.
pub fn analyze_module(env: &mut SummaryEnvironment, module: &Module, options: &Options) {
    let funcs: Vec<FuncId> = module
        .functions()
        .filter(|(_, f)| !f.is_declaration())
        .map(|(f, _)| f)
        .collect();
    for func in funcs {
        analyze_function(env, module, options, func);
    }
}

/// One activation per function on the analysis stack. Non-recursive callees
/// are analyzed to convergence up front. Recursive callees get one pass per
/// iteration of the enclosing loop; a callee already on the stack is
/// skipped, its stale summary standing in until the loop at the component's
/// entry squeezes out the remaining changes. Only the outermost activation
/// for a function (`expect_converge`) loops; inner activations return after
/// a single pass.
fn analyze_function_recursive(
    env: &mut SummaryEnvironment,
    module: &Module,
    options: &Options,
    func: FuncId,
    analysis_history: &mut HashSet<FuncId>,
    expect_converge: bool,
) {
    if analysis_history.contains(&func) {
        return;
    }
    let called = env.lookup_summary(module, func).called_functions.clone();
    let mut recursive_callees = vec![];
    for callee in called {
        env.lookup_summary(module, callee);
        if module.function(callee).does_not_recurse {
            if !env.summary(callee).map(|s| s.converged).unwrap_or(false) {
                analyze_function_recursive(env, module, options, callee, analysis_history, true);
            }
            checked_assume!(env.summary(callee).map(|s| s.converged).unwrap_or(false));
        } else {
            recursive_callees.push(callee);
        }
    }

    analysis_history.insert(func);
    let mut iterations = 0;
    loop {
        let mut dependencies_converged = true;
        for callee in &recursive_callees {
            if !env.summary(*callee).map(|s| s.converged).unwrap_or(false) {
                analyze_function_recursive(env, module, options, *callee, analysis_history, false);
            }
            dependencies_converged &=
                env.summary(*callee).map(|s| s.converged).unwrap_or(false);
        }
        analyze_function_once(env, module, options, func, dependencies_converged);
        iterations += 1;
        let converged = env.summary(func).map(|s| s.converged).unwrap_or(true);
        if !expect_converge || converged {
            break;
        }
        if iterations >= k_limits::MAX_OUTER_FIXPOINT_ITERATIONS {
            warn!(
                "summary iterations for {} exceeded limit of {}",
                module.function(func).name,
                k_limits::MAX_OUTER_FIXPOINT_ITERATIONS
            );
            break;
        }
    }
    analysis_history.remove(&func);
}

/// Analyzes the function once, assuming the summaries of all called
/// functions are as good as they are going to get this iteration. The
/// summary converges when the result store stops changing; when it did
/// change, it still converges if every recursive callee's summary was
/// already converged, because the result is then a pure function of stable
/// inputs and re-running could not produce anything new.
#[logfn_inputs(TRACE)]
fn analyze_function_once(
    env: &mut SummaryEnvironment,
    module: &Module,
    options: &Options,
    func: FuncId,
    dependencies_converged: bool,
) {
    let (inputs, previously_computed) = match env.summary(func) {
        Some(summary) => {
            if summary.converged {
                return;
            }
            (summary.inputs.clone(), summary.is_computed)
        }
        None => return,
    };
    debug!("analyzing function {}", module.function(func).name);
    let (result_store, unchanged) = {
        let mut bv = BodyVisitor::new(module, &*env, options, func, inputs);
        FixedPointVisitor::new(&mut bv).visit_blocks();
        bv.build_result_store();
        let unchanged = previously_computed && {
            let previous = &env.summary(func).expect("summary exists").store;
            bv.result_store.equal(previous, &mut bv.smt_solver)
        };
        (std::mem::take(&mut bv.result_store), unchanged)
    };
    let summary = env.summary_mut(func);
    summary.store = result_store;
    summary.is_computed = true;
    summary.converged = unchanged || dependencies_converged;
}
