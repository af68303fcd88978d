// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use aliasflow::call_graph::CallGraph;
use aliasflow::constraint::Constraint;
use aliasflow::constraint_solver::ConstraintSolver;
use aliasflow::data_dependence::{extract_raw_dependences, DependencySource};
use aliasflow::ir::{FuncId, FunctionBuilder, Module};
use aliasflow::location::AbstractLocation;
use aliasflow::options::Options;
use aliasflow::summaries::{analyze_function, analyze_module, FunctionSummary, SummaryEnvironment};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn finalize(module: &mut Module) {
    CallGraph::new(module).mark_recursion_attributes(module);
}

/// f(p, q) { store 1, p; x = load q; ret x } with two i32* parameters.
fn aliasing_pair_module() -> (Module, FuncId) {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let f = module.declare_function("f", &[ptr, ptr], i32t);
    let params = module.function(f).params.clone();
    let one = module.const_int(i32t, 1);
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    b.store(one, params[0]);
    let x = b.load(params[1]);
    b.ret(Some(x));
    b.finish();
    finalize(&mut module);
    (module, f)
}

#[test]
fn distinct_globals_never_alias() {
    init_logging();
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let g = module.add_global("G", i32t);
    let h = module.add_global("H", i32t);
    let f = module.declare_function("f", &[], i32t);
    let one = module.const_int(i32t, 1);
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    b.store(one, g);
    let x = b.load(h);
    b.ret(Some(x));
    b.finish();
    finalize(&mut module);

    let options = Options::default();
    let mut env = SummaryEnvironment::new(&module);
    let report = extract_raw_dependences(&mut env, &module, &options, f);

    // The store through G cannot reach the load through H; the load reads
    // H's pre-existing memory unconditionally.
    assert_eq!(report.counts(), (0, 0, 1));
    assert_eq!(report.dependences[0].source, DependencySource::Input(h));
    assert!(report.dependences[0].constraint.is_top());

    let summary = env.summary(f).expect("summary exists");
    assert_eq!(summary.inputs, vec![g, h]);
    assert!(summary.converged);
}

#[test]
fn mutually_recursive_summaries_converge() {
    init_logging();
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let f = module.declare_function("f", &[ptr], i32t);
    let g = module.declare_function("g", &[ptr], i32t);
    let p = module.function(f).params[0];
    let q = module.function(g).params[0];
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    let r = b.call(g, &[p]);
    b.ret(Some(r));
    b.finish();
    let mut b = FunctionBuilder::new(&mut module, g);
    b.new_block();
    let r = b.call(f, &[q]);
    b.ret(Some(r));
    b.finish();
    finalize(&mut module);
    assert!(!module.function(f).does_not_recurse);
    assert!(!module.function(g).does_not_recurse);

    let options = Options::default();
    let mut env = SummaryEnvironment::new(&module);
    analyze_function(&mut env, &module, &options, f);

    assert!(env.summary(f).expect("f summary").converged);
    assert!(env.summary(g).expect("g summary").converged);
}

#[test]
fn callee_heap_escapes_into_the_caller() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let i64t = module.int_type(64);
    let ptr = module.ptr_type(i32t);
    let pptr = module.ptr_type(ptr);
    let malloc = module.declare_function("malloc", &[i64t], ptr);
    module.set_malloc_like(malloc);

    // g(q: i32**) { *q = malloc(4) }
    let g = module.declare_function("g", &[pptr], i32t);
    let q = module.function(g).params[0];
    let size = module.const_int(i64t, 4);
    let mut b = FunctionBuilder::new(&mut module, g);
    b.new_block();
    let cell = b.call(malloc, &[size]);
    b.store(cell, q);
    b.ret(None);
    b.finish();

    // f(p: i32**) { g(p); x = load p }
    let f = module.declare_function("f", &[pptr], ptr);
    let p = module.function(f).params[0];
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    let call = b.call(g, &[p]);
    let x = b.load(p);
    b.ret(Some(x));
    b.finish();
    finalize(&mut module);

    let options = Options::default();
    let mut env = SummaryEnvironment::new(&module);
    let report = extract_raw_dependences(&mut env, &module, &options, f);

    // The callee's write through its argument lands in the caller's cell
    // for *p, so the caller's load may read the callee's heap cell and the
    // call site shows up as a generalized writer. Being weakened, the call
    // cannot strongly kill the input's own contribution.
    let summary = env.summary(f).expect("f summary");
    let star_p = AbstractLocation::RuntimeMemory { input: p, level: 0 };
    let cell_targets = summary
        .store
        .value_at(&star_p)
        .expect("caller cell for *p");
    assert!(cell_targets.get(&AbstractLocation::Heap(cell)).is_some());

    assert_eq!(report.counts(), (0, 1, 1));
    assert!(report
        .dependences
        .iter()
        .any(|d| d.source == DependencySource::Call(call)));
    assert!(report
        .dependences
        .iter()
        .any(|d| d.source == DependencySource::Input(p)));
}

#[test]
fn external_call_results_are_tracked_as_program_values() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let strlen = module.declare_function("strlen", &[ptr], i32t);
    let f = module.declare_function("f", &[ptr], i32t);
    let p = module.function(f).params[0];
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    let y = b.call(strlen, &[p]);
    b.ret(Some(y));
    b.finish();
    finalize(&mut module);

    let options = Options {
        track_program_values: true,
        ..Options::default()
    };
    let mut env = SummaryEnvironment::new(&module);
    analyze_function(&mut env, &module, &options, f);

    let summary = env.summary(f).expect("f summary");
    let y_targets = summary
        .store
        .value_at(&AbstractLocation::Register(y))
        .expect("call register is tracked");
    let tag = AbstractLocation::ProgramValue(module.function(strlen).value);
    let constraint = y_targets.get(&tag).expect("opaque callee value");
    // Declaration-only callees are tracked weakly.
    let mut solver = ConstraintSolver::new(1);
    assert!(solver.test_satisfiability(constraint));
    assert!(!solver.test_validity(constraint));
}

#[test]
fn converged_stores_are_reproducible_and_well_formed() {
    let (module, f) = aliasing_pair_module();
    let options = Options::default();
    let mut env = SummaryEnvironment::new(&module);
    analyze_function(&mut env, &module, &options, f);
    let mut env2 = SummaryEnvironment::new(&module);
    analyze_function(&mut env2, &module, &options, f);

    let summary = env.summary(f).expect("f summary");
    let again = env2.summary(f).expect("f summary");
    let mut solver = ConstraintSolver::new(summary.inputs.len());
    assert!(summary.store.equal(&again.store, &mut solver));

    // Every surviving edge is satisfiable and respects must => may.
    for (_, targets) in summary.store.iter() {
        for (_, c) in targets.iter() {
            assert!(solver.test_satisfiability(c));
            assert!(solver.test_implication(
                &Constraint::from_expression(c.must_expression()),
                &Constraint::from_expression(c.may_expression()),
            ));
        }
    }

    // The alias hypotheses on the second input's register edges cover all
    // models: it points somewhere under every hypothesis.
    let q = summary.inputs[1];
    let q_targets = summary
        .store
        .value_at(&AbstractLocation::Register(q))
        .expect("input register survives");
    let mut covered = Constraint::Bottom;
    for (_, c) in q_targets.iter() {
        covered = covered.or(c);
    }
    assert!(solver.test_validity(&covered));

    // Second module-wide run over the converged environment is a no-op.
    analyze_module(&mut env, &module, &options);
    assert!(env.summary(f).expect("f summary").converged);
}

#[test]
fn summaries_serialize_and_deserialize() {
    let (module, f) = aliasing_pair_module();
    let options = Options::default();
    let mut env = SummaryEnvironment::new(&module);
    analyze_function(&mut env, &module, &options, f);

    let summary = env.summary(f).expect("f summary");
    let json = serde_json::to_string(summary).expect("summary serializes");
    let restored: FunctionSummary = serde_json::from_str(&json).expect("summary deserializes");
    assert_eq!(restored.func, summary.func);
    assert_eq!(restored.inputs, summary.inputs);
    assert_eq!(restored.converged, summary.converged);
    let mut solver = ConstraintSolver::new(summary.inputs.len());
    assert!(restored.store.equal(&summary.store, &mut solver));
}

#[test]
fn call_graph_renders_to_dot() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let f = module.declare_function("outer", &[], i32t);
    let g = module.declare_function("inner", &[], i32t);
    let mut b = FunctionBuilder::new(&mut module, g);
    b.new_block();
    b.ret(None);
    b.finish();
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    b.call(g, &[]);
    b.ret(None);
    b.finish();

    let call_graph = CallGraph::new(&module);
    let dot = call_graph.to_dot(&module);
    assert!(dot.contains("digraph"));
    assert!(dot.contains("outer"));
    assert!(dot.contains("inner"));
}
