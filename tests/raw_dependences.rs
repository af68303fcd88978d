// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use aliasflow::call_graph::CallGraph;
use aliasflow::data_dependence::{extract_raw_dependences, DependencySource, RawDependenceReport};
use aliasflow::ir::{FuncId, FunctionBuilder, Module, ValueId};
use aliasflow::options::Options;
use aliasflow::summaries::SummaryEnvironment;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn analyze(module: &mut Module, func: FuncId) -> (SummaryEnvironment, RawDependenceReport) {
    CallGraph::new(module).mark_recursion_attributes(module);
    let options = Options::default();
    let mut env = SummaryEnvironment::new(module);
    let report = extract_raw_dependences(&mut env, module, &options, func);
    (env, report)
}

fn store_edge<'r>(
    report: &'r RawDependenceReport,
    store: ValueId,
) -> Option<&'r aliasflow::data_dependence::RawDependence> {
    report
        .dependences
        .iter()
        .find(|d| d.source == DependencySource::Store(store))
}

#[test]
fn aliased_inputs_create_a_conditional_raw_edge() {
    init_logging();
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let f = module.declare_function("f", &[ptr, ptr], i32t);
    let params = module.function(f).params.clone();
    let one = module.const_int(i32t, 1);
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    let st = b.store(one, params[0]);
    let ld = b.load(params[1]);
    b.ret(Some(ld));
    b.finish();

    let (_, report) = analyze(&mut module, f);

    // Loading through q may read the store through p exactly when the two
    // inputs alias.
    let edge = store_edge(&report, st).expect("load <- store edge");
    assert_eq!(edge.load, ld);
    assert_eq!(edge.constraint.to_string(), "x0 == x1");
    // And it may still read q's pre-existing memory when they do not.
    let input = report
        .dependences
        .iter()
        .find(|d| d.source == DependencySource::Input(params[1]))
        .expect("load <- input edge");
    assert_eq!(input.constraint.to_string(), "x0 != x1");
    assert_eq!(report.counts(), (1, 0, 1));
}

#[test]
fn a_second_store_strongly_kills_the_first() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let f = module.declare_function("f", &[ptr], i32t);
    let p = module.function(f).params[0];
    let one = module.const_int(i32t, 1);
    let two = module.const_int(i32t, 2);
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    let _first = b.store(one, p);
    let second = b.store(two, p);
    let ld = b.load(p);
    b.ret(Some(ld));
    b.finish();

    let (_, report) = analyze(&mut module, f);

    // The second store must execute after the first with an implied
    // constraint, so only it survives; the input writer dies the same way.
    assert_eq!(report.dependences.len(), 1);
    let edge = store_edge(&report, second).expect("load <- second store");
    assert!(edge.constraint.is_top());
}

#[test]
fn a_branch_dependent_store_kills_only_weakly() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let f = module.declare_function("f", &[ptr], i32t);
    let p = module.function(f).params[0];
    let one = module.const_int(i32t, 1);
    let two = module.const_int(i32t, 2);
    let mut b = FunctionBuilder::new(&mut module, f);
    let bb0 = b.new_block();
    let bb1 = b.new_block();
    let bb2 = b.new_block();
    b.switch_to_block(bb0);
    let c = b.other(i32t, &[]);
    b.cond_branch(c, bb1, bb2);
    b.switch_to_block(bb1);
    let guarded = b.store(one, p);
    b.branch(bb2);
    b.switch_to_block(bb2);
    let unconditional = b.store(two, p);
    let ld = b.load(p);
    b.ret(Some(ld));
    b.finish();

    let (_, report) = analyze(&mut module, f);

    // The later store only may-execute-after the guarded one, so both
    // survive.
    assert!(store_edge(&report, guarded).is_some());
    assert!(store_edge(&report, unconditional).is_some());
    assert_eq!(report.counts(), (2, 0, 0));
}

#[test]
fn maybe_aliased_store_survives_a_later_exact_store() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let f = module.declare_function("f", &[ptr, ptr], i32t);
    let params = module.function(f).params.clone();
    let one = module.const_int(i32t, 1);
    let two = module.const_int(i32t, 2);
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    let through_q = b.store(one, params[1]);
    let through_p = b.store(two, params[0]);
    let ld = b.load(params[0]);
    b.ret(Some(ld));
    b.finish();

    let (_, report) = analyze(&mut module, f);

    // The exact store cannot strongly kill the earlier one: its constraint
    // does not imply the aliasing hypothesis under which q writes p's cell.
    let aliased = store_edge(&report, through_q).expect("aliased store survives");
    assert_eq!(aliased.constraint.to_string(), "x0 == x1");
    let exact = store_edge(&report, through_p).expect("exact store");
    assert!(exact.constraint.is_top());
    assert_eq!(report.counts(), (2, 0, 0));
}

#[test]
fn external_calls_do_not_kill_stores() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let strlen = module.declare_function("strlen", &[ptr], i32t);
    let f = module.declare_function("f", &[ptr], i32t);
    let p = module.function(f).params[0];
    let one = module.const_int(i32t, 1);
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    b.call(strlen, &[p]);
    let st = b.store(one, p);
    let ld = b.load(p);
    b.ret(Some(ld));
    b.finish();

    let (_, report) = analyze(&mut module, f);

    // strlen has no body: it neither records an update nor disturbs the
    // store/load pairing.
    assert_eq!(report.counts(), (1, 0, 0));
    assert!(store_edge(&report, st).is_some());
}

#[test]
fn register_aliases_and_phi_merge_points_to_sets() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let f = module.declare_function("f", &[ptr, ptr], i32t);
    let params = module.function(f).params.clone();
    let mut b = FunctionBuilder::new(&mut module, f);
    let bb0 = b.new_block();
    let bb1 = b.new_block();
    let bb2 = b.new_block();
    let bb3 = b.new_block();
    b.switch_to_block(bb0);
    let c = b.other(i32t, &[]);
    b.cond_branch(c, bb1, bb2);
    b.switch_to_block(bb1);
    let cast = b.bitcast(params[0], ptr);
    b.branch(bb3);
    b.switch_to_block(bb2);
    let gep = b.getelementptr(params[1]);
    b.branch(bb3);
    b.switch_to_block(bb3);
    let merged = b.phi(ptr, &[(bb1, cast), (bb2, gep)]);
    let ld = b.load(merged);
    b.ret(Some(ld));
    b.finish();

    let (_, report) = analyze(&mut module, f);

    // The φ of two register aliases reads both inputs' memory.
    assert_eq!(report.counts(), (0, 0, 2));
    let sources: Vec<DependencySource> =
        report.dependences.iter().map(|d| d.source).collect();
    assert!(sources.contains(&DependencySource::Input(params[0])));
    assert!(sources.contains(&DependencySource::Input(params[1])));
}

#[test]
fn select_merges_and_indirect_calls_degrade_gracefully() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let f = module.declare_function("f", &[ptr, ptr], i32t);
    let params = module.function(f).params.clone();
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    let c = b.other(i32t, &[]);
    b.indirect_call(i32t, &[params[0]]);
    let chosen = b.select(c, params[0], params[1]);
    let ld = b.load(chosen);
    b.ret(Some(ld));
    b.finish();

    let (_, report) = analyze(&mut module, f);

    // The unresolved call neither kills nor writes; the select reads both
    // inputs' memory.
    assert_eq!(report.counts(), (0, 0, 2));
    let sources: Vec<DependencySource> =
        report.dependences.iter().map(|d| d.source).collect();
    assert!(sources.contains(&DependencySource::Input(params[0])));
    assert!(sources.contains(&DependencySource::Input(params[1])));
}

#[test]
fn report_renders_as_text_and_dot() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let ptr = module.ptr_type(i32t);
    let f = module.declare_function("f", &[ptr], i32t);
    let p = module.function(f).params[0];
    let one = module.const_int(i32t, 1);
    let mut b = FunctionBuilder::new(&mut module, f);
    b.new_block();
    b.store(one, p);
    let ld = b.load(p);
    b.ret(Some(ld));
    b.finish();

    let (_, report) = analyze(&mut module, f);

    let text = report.render_text(&module);
    assert!(text.starts_with("[RAW deps]:"));
    assert!(text.contains("load"));
    assert!(text.contains(" ? "));

    let dot = report.render_dot(&module);
    assert!(dot.starts_with("digraph PDG {"));
    assert!(dot.ends_with("}\n"));
    assert!(dot.contains("->"));

    let mut options = Options::default();
    options.graphviz_output = true;
    assert_eq!(report.render(&module, &options), dot);
    options.graphviz_output = false;
    assert_eq!(report.render(&module, &options), text);
}
