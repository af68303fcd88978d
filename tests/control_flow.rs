// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use aliasflow::control_flow::{ControlFlowInfo, ExecAfterCondition};
use aliasflow::ir::{FunctionBuilder, InstId, Module, ValueId, ValueKind};

fn inst_of(module: &Module, value: ValueId) -> InstId {
    match module.value(value).kind {
        ValueKind::Inst { inst, .. } => inst,
        _ => panic!("not an instruction value"),
    }
}

#[test]
fn exec_after_in_a_diamond() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let f = module.declare_function("f", &[], i32t);
    let mut b = FunctionBuilder::new(&mut module, f);
    let bb0 = b.new_block();
    let bb1 = b.new_block();
    let bb2 = b.new_block();
    let bb3 = b.new_block();
    b.switch_to_block(bb0);
    let c = b.other(i32t, &[]);
    b.cond_branch(c, bb1, bb2);
    b.switch_to_block(bb1);
    let x1 = b.other(i32t, &[]);
    b.branch(bb3);
    b.switch_to_block(bb2);
    let x2 = b.other(i32t, &[]);
    b.branch(bb3);
    b.switch_to_block(bb3);
    let x3 = b.other(i32t, &[]);
    b.ret(Some(x3));
    b.finish();

    let cfi = ControlFlowInfo::new(module.function(f));
    assert!(cfi.back_edges().is_empty());

    let (c, x1, x2, x3) = (
        inst_of(&module, c),
        inst_of(&module, x1),
        inst_of(&module, x2),
        inst_of(&module, x3),
    );
    // Same block: position decides, and without a cycle there is no way
    // for the earlier instruction to run again.
    assert_eq!(cfi.exec_after(x1, c), ExecAfterCondition::Must);
    assert_eq!(cfi.exec_after(c, x1), ExecAfterCondition::Never);
    // The join executes after the entry on every path, after either arm on
    // some path only.
    assert_eq!(cfi.exec_after(x3, c), ExecAfterCondition::Must);
    assert_eq!(cfi.exec_after(x3, x1), ExecAfterCondition::May);
    assert_eq!(cfi.exec_after(x3, x2), ExecAfterCondition::May);
    // The two arms never follow one another.
    assert_eq!(cfi.exec_after(x1, x2), ExecAfterCondition::Never);
    assert_eq!(cfi.exec_after(x2, x1), ExecAfterCondition::Never);
}

#[test]
fn loops_make_earlier_instructions_reachable_again() {
    let mut module = Module::new();
    let i32t = module.int_type(32);
    let f = module.declare_function("f", &[], i32t);
    let mut b = FunctionBuilder::new(&mut module, f);
    let bb0 = b.new_block();
    let bb1 = b.new_block();
    let bb2 = b.new_block();
    b.switch_to_block(bb0);
    b.branch(bb1);
    b.switch_to_block(bb1);
    let body = b.other(i32t, &[]);
    let cond = b.other(i32t, &[]);
    b.cond_branch(cond, bb1, bb2);
    b.switch_to_block(bb2);
    b.ret(None);
    b.finish();

    let cfi = ControlFlowInfo::new(module.function(f));
    assert!(cfi.is_back_edge(bb1, bb1));
    assert!(!cfi.is_back_edge(bb0, bb1));

    let (body, cond) = (inst_of(&module, body), inst_of(&module, cond));
    assert_eq!(cfi.exec_after(cond, body), ExecAfterCondition::Must);
    // On a cycle the earlier instruction can execute after the later one in
    // a subsequent iteration.
    assert_eq!(cfi.exec_after(body, cond), ExecAfterCondition::May);
}
