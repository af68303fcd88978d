// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constraint::Constraint;
use crate::expression::{Expression, ExpressionTrait};
use crate::partition_solver::PartitionSolver;
use crate::smt_solver::{SmtResult, SmtSolver};

use log_derive::logfn_inputs;
use mirai_annotations::precondition;
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// The decision facade over points-to edge constraints. One instance is
/// scoped to one analysis context and destroyed with it.
///
/// Input aliasing is modelled as an equivalence relation over one symbolic
/// location variable per function input. Rejections (`reject_alias`) are
/// asserted once into the backend as global inequalities; the canonical
/// witness constraints built by `make_alias_constraint` always pick the
/// smallest-indexed live representative, so labels stay in a canonical form
/// and most equivalence tests reduce to cheap comparisons.
///
/// Whenever the backend answers `Undefined`, every query degrades to its
/// conservative answer: satisfiability holds, validity, equivalence and
/// implication do not.
pub struct ConstraintSolver {
    num_inputs: usize,
    /// Symmetric n*n table; `true` means aliasing has not been rejected.
    may_alias: Vec<bool>,
    solver: Box<dyn SmtSolver>,
}

impl Debug for ConstraintSolver {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "ConstraintSolver({} inputs)", self.num_inputs)
    }
}

impl ConstraintSolver {
    pub fn new(num_inputs: usize) -> ConstraintSolver {
        Self::with_solver(num_inputs, Box::new(PartitionSolver::new(num_inputs)))
    }

    pub fn with_solver(num_inputs: usize, solver: Box<dyn SmtSolver>) -> ConstraintSolver {
        ConstraintSolver {
            num_inputs,
            may_alias: vec![true; num_inputs * num_inputs],
            solver,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Could the constraint hold under some aliasing of the inputs?
    #[logfn_inputs(TRACE)]
    pub fn test_satisfiability(&mut self, c: &Constraint) -> bool {
        match c {
            Constraint::Bottom => false,
            Constraint::Top => true,
            Constraint::Expr { may, .. } => {
                !matches!(self.solver.solve_expression(may), SmtResult::Unsatisfiable)
            }
        }
    }

    /// Does the constraint hold under every aliasing of the inputs?
    #[logfn_inputs(TRACE)]
    pub fn test_validity(&mut self, c: &Constraint) -> bool {
        match c {
            Constraint::Bottom => false,
            Constraint::Top => true,
            Constraint::Expr { must, .. } => matches!(
                self.solver.solve_expression(&must.logical_not()),
                SmtResult::Unsatisfiable
            ),
        }
    }

    /// Componentwise equivalence; a literal is equivalent to an expression
    /// pair only when unsatisfiability (respectively validity) says so.
    #[logfn_inputs(TRACE)]
    pub fn test_equivalence(&mut self, c0: &Constraint, c1: &Constraint) -> bool {
        match (c0, c1) {
            (Constraint::Bottom, _) => c1.is_bottom() || !self.test_satisfiability(c1),
            (Constraint::Top, _) => c1.is_top() || self.test_validity(c1),
            (_, Constraint::Bottom) | (_, Constraint::Top) => self.test_equivalence(c1, c0),
            (
                Constraint::Expr {
                    may: may0,
                    must: must0,
                },
                Constraint::Expr {
                    may: may1,
                    must: must1,
                },
            ) => {
                let (may0, must0) = (may0.clone(), must0.clone());
                let (may1, must1) = (may1.clone(), must1.clone());
                self.formulas_equivalent(&may0, &may1) && self.formulas_equivalent(&must0, &must1)
            }
        }
    }

    fn formulas_equivalent(&mut self, e0: &Rc<Expression>, e1: &Rc<Expression>) -> bool {
        if e0 == e1 {
            return true;
        }
        matches!(
            self.solver.solve_expression(&e0.iff(e1).logical_not()),
            SmtResult::Unsatisfiable
        )
    }

    /// Validity of `c0 => c1`, judged on the under-approximations of both.
    #[logfn_inputs(TRACE)]
    pub fn test_implication(&mut self, c0: &Constraint, c1: &Constraint) -> bool {
        if c0.is_bottom() || c1.is_top() {
            return true;
        }
        let antecedent = c0.must_expression();
        let consequent = c1.must_expression();
        matches!(
            self.solver
                .solve_expression(&antecedent.implies(&consequent).logical_not()),
            SmtResult::Unsatisfiable
        )
    }

    /// Asserts that inputs `i` and `j` have distinct abstract locations.
    /// Idempotent; the inequality reaches the backend exactly once.
    #[logfn_inputs(TRACE)]
    pub fn reject_alias(&mut self, i: usize, j: usize) {
        precondition!(i != j);
        let (i, j) = (i.min(j), i.max(j));
        if self.may_alias[i * self.num_inputs + j] {
            self.solver.assert(&Expression::not_equals(i, j));
            self.may_alias[i * self.num_inputs + j] = false;
            self.may_alias[j * self.num_inputs + i] = false;
        }
    }

    /// Has aliasing between inputs `i` and `j` not been rejected?
    pub fn test_alias(&self, i: usize, j: usize) -> bool {
        if i == j {
            return true;
        }
        self.may_alias[i * self.num_inputs + j]
    }

    /// The canonical witness that input `i` is aliased to input `j` (with
    /// `j <= i`) rather than to some earlier representative: `x_j == x_i`
    /// conjoined with `x_k != x_i` for every `k < j` that could still alias
    /// `i`. For `i == j` only the inequalities remain. Bottom if the pair
    /// has been rejected.
    #[logfn_inputs(TRACE)]
    pub fn make_alias_constraint(&self, i: usize, j: usize) -> Constraint {
        precondition!(j <= i);
        if !self.test_alias(i, j) {
            return Constraint::Bottom;
        }
        let mut expr = Expression::truth();
        for k in 0..j {
            if self.test_alias(k, i) {
                expr = expr.and(&Expression::not_equals(k, i));
            }
        }
        if i != j {
            expr = expr.and(&Expression::equals(j, i));
        }
        Constraint::from_expression(expr)
    }
}
