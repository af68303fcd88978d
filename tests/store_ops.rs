// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use aliasflow::constraint::Constraint;
use aliasflow::constraint_solver::ConstraintSolver;
use aliasflow::expression::Expression;
use aliasflow::ir::ValueId;
use aliasflow::location::AbstractLocation;
use aliasflow::store::{merge_point_to_maps, AbstractStore, PointToMap};

fn cell(v: u32) -> AbstractLocation {
    AbstractLocation::Stack(ValueId(v))
}

fn eq(i: usize, j: usize) -> Constraint {
    Constraint::from_expression(Expression::equals(i, j))
}

fn ne(i: usize, j: usize) -> Constraint {
    Constraint::from_expression(Expression::not_equals(i, j))
}

fn singleton(target: AbstractLocation, c: Constraint) -> PointToMap {
    let mut map = PointToMap::new();
    map.insert_mut(target, c);
    map
}

#[test]
fn merge_is_commutative_and_idempotent() {
    let mut a = AbstractStore::new();
    a.update_value_at(cell(1), singleton(cell(2), eq(0, 1)));
    let mut b = AbstractStore::new();
    b.update_value_at(cell(1), singleton(cell(3), ne(0, 1)));
    b.update_value_at(cell(4), singleton(cell(2), Constraint::Top));

    let mut solver = ConstraintSolver::new(2);
    let ab = a.merge(&b);
    let ba = b.merge(&a);
    assert!(ab.equal(&ba, &mut solver));
    assert!(a.merge(&a).equal(&a, &mut solver));
}

#[test]
fn merge_disjoins_shared_targets_and_keeps_lone_ones() {
    let mut a = AbstractStore::new();
    a.update_value_at(cell(1), singleton(cell(2), eq(0, 1)));
    let mut b = AbstractStore::new();
    let mut targets = singleton(cell(2), ne(0, 1));
    targets.insert_mut(cell(3), eq(0, 1));
    b.update_value_at(cell(1), targets);

    let merged = a.merge(&b);
    let merged_cell = merged.value_at(&cell(1)).expect("key survives the merge");
    // Shared target: constraints disjoin into a tautology.
    let mut solver = ConstraintSolver::new(2);
    let shared = merged_cell.get(&cell(2)).expect("shared target");
    assert!(solver.test_equivalence(shared, &Constraint::Top));
    // Lone target: the constraint crosses unchanged, preserving the path
    // sensitivity of the contributing side.
    assert_eq!(merged_cell.get(&cell(3)), Some(&eq(0, 1)));
}

#[test]
fn normalize_drops_unsatisfiable_edges_and_empty_cells() {
    let mut solver = ConstraintSolver::new(2);
    solver.reject_alias(0, 1);

    let mut store = AbstractStore::new();
    store.update_value_at(cell(1), singleton(cell(2), eq(0, 1)));
    let mut survivors = singleton(cell(4), ne(0, 1));
    survivors.insert_mut(cell(5), eq(0, 1));
    store.update_value_at(cell(3), survivors);

    store.normalize(&mut solver);
    // The whole cell(1) entry died with its only edge.
    assert!(store.value_at(&cell(1)).is_none());
    let kept = store.value_at(&cell(3)).expect("cell(3) keeps one edge");
    assert_eq!(kept.size(), 1);
    assert!(kept.get(&cell(4)).is_some());
}

#[test]
fn equality_treats_missing_keys_as_no_targets() {
    let mut solver = ConstraintSolver::new(2);
    solver.reject_alias(0, 1);

    // An edge whose constraint is unsatisfiable under the rejections is
    // indistinguishable from no edge at all.
    let empty = AbstractStore::new();
    let mut store = AbstractStore::new();
    store.update_value_at(cell(1), singleton(cell(2), eq(0, 1)));
    assert!(store.equal(&empty, &mut solver));
    assert!(empty.equal(&store, &mut solver));

    let mut other = AbstractStore::new();
    other.update_value_at(cell(1), singleton(cell(2), Constraint::Top));
    assert!(!store.equal(&other, &mut solver));
}

#[test]
fn updating_with_an_empty_map_removes_the_key() {
    let mut store = AbstractStore::new();
    store.update_value_at(cell(1), singleton(cell(2), Constraint::Top));
    store.update_value_at(cell(1), PointToMap::new());
    assert!(store.is_empty());
}

#[test]
fn point_to_map_merge_disjoins() {
    let a = singleton(cell(2), eq(0, 1));
    let b = singleton(cell(2), ne(0, 1));
    let merged = merge_point_to_maps(&a, &b);
    let mut solver = ConstraintSolver::new(2);
    assert!(solver.test_equivalence(merged.get(&cell(2)).unwrap(), &Constraint::Top));
}
