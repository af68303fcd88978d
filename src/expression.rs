// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};
use std::rc::Rc;

/// A quantifier-free propositional formula over input-aliasing atoms.
/// The atom vocabulary is tiny: one location variable per function input,
/// and equalities between them. `x_i == x_j` states that input `i` and
/// input `j` named the same runtime location at function entry.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Expression {
    /// An expression that is true in every model.
    True,
    /// An expression that is false in every model.
    False,
    /// An expression that is true when the two input-location variables
    /// denote the same runtime location. Kept with `left < right`.
    Equals { left: usize, right: usize },
    /// An expression that is true when operand is false.
    Not { operand: Rc<Expression> },
    /// An expression that is true when both operands are true.
    And {
        left: Rc<Expression>,
        right: Rc<Expression>,
    },
    /// An expression that is true when either operand is true.
    Or {
        left: Rc<Expression>,
        right: Rc<Expression>,
    },
}

impl Expression {
    pub fn truth() -> Rc<Expression> {
        Rc::new(Expression::True)
    }

    pub fn falsehood() -> Rc<Expression> {
        Rc::new(Expression::False)
    }

    /// The aliasing atom for inputs `i` and `j`, in canonical operand order.
    pub fn equals(i: usize, j: usize) -> Rc<Expression> {
        if i == j {
            return Self::truth();
        }
        Rc::new(Expression::Equals {
            left: i.min(j),
            right: i.max(j),
        })
    }

    pub fn not_equals(i: usize, j: usize) -> Rc<Expression> {
        Self::equals(i, j).logical_not()
    }

    /// If the expression is a literal, its truth value.
    pub fn as_bool_if_known(&self) -> Option<bool> {
        match self {
            Expression::True => Some(true),
            Expression::False => Some(false),
            _ => None,
        }
    }

    /// Evaluates the expression under an assignment of inputs to alias
    /// classes: two inputs alias exactly when they carry the same class.
    pub fn eval(&self, classes: &[usize]) -> bool {
        match self {
            Expression::True => true,
            Expression::False => false,
            Expression::Equals { left, right } => {
                match (classes.get(*left), classes.get(*right)) {
                    (Some(l), Some(r)) => l == r,
                    // An atom over a variable the model does not cover can
                    // never be constrained, so read it as an alias.
                    _ => true,
                }
            }
            Expression::Not { operand } => !operand.eval(classes),
            Expression::And { left, right } => left.eval(classes) && right.eval(classes),
            Expression::Or { left, right } => left.eval(classes) || right.eval(classes),
        }
    }

    /// The largest input index mentioned anywhere in the expression.
    pub fn max_input(&self) -> Option<usize> {
        match self {
            Expression::True | Expression::False => None,
            Expression::Equals { right, .. } => Some(*right),
            Expression::Not { operand } => operand.max_input(),
            Expression::And { left, right } | Expression::Or { left, right } => {
                match (left.max_input(), right.max_input()) {
                    (Some(l), Some(r)) => Some(l.max(r)),
                    (l, r) => l.or(r),
                }
            }
        }
    }
}

/// Constructors over shared expressions, in the style of an abstract value
/// domain: all of them fold literals so that `True`/`False` never appear as
/// interior nodes.
pub trait ExpressionTrait {
    fn and(&self, other: &Rc<Expression>) -> Rc<Expression>;
    fn or(&self, other: &Rc<Expression>) -> Rc<Expression>;
    fn logical_not(&self) -> Rc<Expression>;
    fn implies(&self, other: &Rc<Expression>) -> Rc<Expression>;
    fn iff(&self, other: &Rc<Expression>) -> Rc<Expression>;
    fn simplify(&self) -> Rc<Expression>;
}

impl ExpressionTrait for Rc<Expression> {
    fn and(&self, other: &Rc<Expression>) -> Rc<Expression> {
        match (self.as_bool_if_known(), other.as_bool_if_known()) {
            (Some(false), _) | (_, Some(false)) => Expression::falsehood(),
            (Some(true), _) => other.clone(),
            (_, Some(true)) => self.clone(),
            _ if self == other => self.clone(),
            _ => Rc::new(Expression::And {
                left: self.clone(),
                right: other.clone(),
            }),
        }
    }

    fn or(&self, other: &Rc<Expression>) -> Rc<Expression> {
        match (self.as_bool_if_known(), other.as_bool_if_known()) {
            (Some(true), _) | (_, Some(true)) => Expression::truth(),
            (Some(false), _) => other.clone(),
            (_, Some(false)) => self.clone(),
            _ if self == other => self.clone(),
            _ => Rc::new(Expression::Or {
                left: self.clone(),
                right: other.clone(),
            }),
        }
    }

    fn logical_not(&self) -> Rc<Expression> {
        match self.as_ref() {
            Expression::True => Expression::falsehood(),
            Expression::False => Expression::truth(),
            Expression::Not { operand } => operand.clone(),
            _ => Rc::new(Expression::Not {
                operand: self.clone(),
            }),
        }
    }

    fn implies(&self, other: &Rc<Expression>) -> Rc<Expression> {
        self.logical_not().or(other)
    }

    fn iff(&self, other: &Rc<Expression>) -> Rc<Expression> {
        self.implies(other).and(&other.implies(self))
    }

    /// Bottom-up constant folding plus the cheap local laws (involution,
    /// idempotence, complements). Heavier reasoning belongs to the solver.
    fn simplify(&self) -> Rc<Expression> {
        match self.as_ref() {
            Expression::Not { operand } => operand.simplify().logical_not(),
            Expression::And { left, right } => {
                let (l, r) = (left.simplify(), right.simplify());
                if l == r.logical_not() {
                    return Expression::falsehood();
                }
                l.and(&r)
            }
            Expression::Or { left, right } => {
                let (l, r) = (left.simplify(), right.simplify());
                if l == r.logical_not() {
                    return Expression::truth();
                }
                l.or(&r)
            }
            _ => self.clone(),
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Expression::True => write!(f, "true"),
            Expression::False => write!(f, "false"),
            Expression::Equals { left, right } => write!(f, "x{left} == x{right}"),
            Expression::Not { operand } => match operand.as_ref() {
                Expression::Equals { left, right } => write!(f, "x{left} != x{right}"),
                _ => write!(f, "!({operand})"),
            },
            Expression::And { left, right } => {
                let lhs = parenthesized_if_or(left);
                let rhs = parenthesized_if_or(right);
                write!(f, "{lhs} && {rhs}")
            }
            Expression::Or { left, right } => write!(f, "{left} || {right}"),
        }
    }
}

fn parenthesized_if_or(e: &Rc<Expression>) -> String {
    match e.as_ref() {
        Expression::Or { .. } => format!("({e})"),
        _ => format!("{e}"),
    }
}
