// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::expression::Expression;

use std::rc::Rc;

/// The result of using the solver to solve an expression.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SmtResult {
    /// There is an assignment of alias classes to the input-location
    /// variables for which the expression is true.
    Satisfiable,
    /// There is a proof that no assignment of alias classes can make the
    /// expression true.
    Unsatisfiable,
    /// The solver gave up on this expression; callers must degrade to a
    /// conservative answer.
    Undefined,
}

/// The functionality a satisfiability backend must expose in order for the
/// constraint facade to use it. The facade owns one backend per analysis
/// context; asserted facts (the alias rejections) live in the backend's
/// outermost context and scoped queries bracket themselves with
/// `set_backtrack_position`/`backtrack`.
pub trait SmtSolver {
    /// Returns a string representation of the given expression for use in
    /// debugging.
    fn as_debug_string(&self, expression: &Rc<Expression>) -> String;

    /// Adds the given expression to the current context.
    fn assert(&mut self, expression: &Rc<Expression>);

    /// Create a nested context. When a matching backtrack is called, the
    /// state of the solver is restored to what it was when this was called.
    fn set_backtrack_position(&mut self);

    /// Destroy the current context and restore the containing context.
    fn backtrack(&mut self);

    /// Try to find an assignment of alias classes to the input-location
    /// variables so that the assertions in the current context are all true.
    fn solve(&self) -> SmtResult;

    /// Establish if the given expression can be satisfied (or not) without
    /// changing the current context.
    fn solve_expression(&mut self, expression: &Rc<Expression>) -> SmtResult {
        self.set_backtrack_position();
        self.assert(expression);
        let result = self.solve();
        self.backtrack();
        result
    }
}

/// A dummy implementation of SmtSolver to use in configurations where a real
/// backend is not available or required. Every query is `Undefined`, so the
/// facade answers everything conservatively.
#[derive(Default)]
pub struct SolverStub {}

impl SmtSolver for SolverStub {
    fn as_debug_string(&self, _: &Rc<Expression>) -> String {
        String::from("not implemented")
    }

    fn assert(&mut self, _: &Rc<Expression>) {}

    fn set_backtrack_position(&mut self) {}

    fn backtrack(&mut self) {}

    fn solve(&self) -> SmtResult {
        SmtResult::Undefined
    }
}
