// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::expression::{Expression, ExpressionTrait};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};
use std::rc::Rc;

/// The label on a points-to edge: under which input-aliasing hypotheses does
/// the edge exist. A constraint is either one of the two literals, or a pair
/// of formulas where `may` over-approximates (consulted by satisfiability)
/// and `must` under-approximates (consulted by validity and implication).
/// Invariant: `must implies may`; the all-false and all-true pairs are
/// normalized back to the literals.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Constraint {
    /// Infeasible; an edge labelled with this does not exist.
    Bottom,
    /// Holds under every hypothesis.
    Top,
    Expr {
        may: Rc<Expression>,
        must: Rc<Expression>,
    },
}

impl Constraint {
    /// An exact constraint: the formula serves as both approximations.
    pub fn from_expression(e: Rc<Expression>) -> Constraint {
        Constraint::normalized(e.clone(), e)
    }

    fn normalized(may: Rc<Expression>, must: Rc<Expression>) -> Constraint {
        match (may.as_bool_if_known(), must.as_bool_if_known()) {
            (Some(false), _) => Constraint::Bottom,
            (Some(true), Some(true)) => Constraint::Top,
            _ => Constraint::Expr { may, must },
        }
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Constraint::Bottom)
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Constraint::Top)
    }

    /// The over-approximating formula, with literals read as formulas.
    pub fn may_expression(&self) -> Rc<Expression> {
        match self {
            Constraint::Bottom => Expression::falsehood(),
            Constraint::Top => Expression::truth(),
            Constraint::Expr { may, .. } => may.clone(),
        }
    }

    /// The under-approximating formula, with literals read as formulas.
    pub fn must_expression(&self) -> Rc<Expression> {
        match self {
            Constraint::Bottom => Expression::falsehood(),
            Constraint::Top => Expression::truth(),
            Constraint::Expr { must, .. } => must.clone(),
        }
    }

    pub fn and(&self, other: &Constraint) -> Constraint {
        match (self, other) {
            (Constraint::Bottom, _) | (_, Constraint::Bottom) => Constraint::Bottom,
            (Constraint::Top, c) | (c, Constraint::Top) => c.clone(),
            _ => Constraint::normalized(
                self.may_expression().and(&other.may_expression()),
                self.must_expression().and(&other.must_expression()),
            ),
        }
    }

    pub fn or(&self, other: &Constraint) -> Constraint {
        match (self, other) {
            (Constraint::Top, _) | (_, Constraint::Top) => Constraint::Top,
            (Constraint::Bottom, c) | (c, Constraint::Bottom) => c.clone(),
            _ => Constraint::normalized(
                self.may_expression().or(&other.may_expression()),
                self.must_expression().or(&other.must_expression()),
            ),
        }
    }

    /// Discards the under-approximation, keeping only what may hold. Applied
    /// at call boundaries, where the callee's internal paths are uncertain.
    pub fn weaken(&self) -> Constraint {
        match self {
            Constraint::Bottom => Constraint::Bottom,
            _ => Constraint::Expr {
                may: self.may_expression(),
                must: Expression::falsehood(),
            },
        }
    }

    /// Folds both formulas and re-normalizes to a literal when they collapse.
    pub fn simplify(&self) -> Constraint {
        match self {
            Constraint::Expr { may, must } => Constraint::normalized(may.simplify(), must.simplify()),
            _ => self.clone(),
        }
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Constraint::Bottom => write!(f, "false"),
            Constraint::Top => write!(f, "true"),
            Constraint::Expr { may, .. } => write!(f, "{may}"),
        }
    }
}
