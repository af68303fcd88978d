// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constraint::Constraint;
use crate::constraint_solver::ConstraintSolver;
use crate::ir::ValueId;
use crate::location::AbstractLocation;

use log_derive::logfn_inputs;
use rpds::HashTrieMap;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Debug, Formatter, Result};

/// The constrained target set of one location: target -> constraint under
/// which the location may point to it. No two entries share a target; a
/// would-be duplicate is collapsed by disjoining its constraint.
pub type PointToMap = HashTrieMap<AbstractLocation, Constraint>;

/// The register file: SSA register -> points-to map. Registers are defined
/// exactly once per function analysis run and are therefore kept apart from
/// the store, whose entries merge at control-flow joins.
pub type AbstractRegFile = HashTrieMap<ValueId, PointToMap>;

/// The memory half of the abstract state: non-register location ->
/// points-to map. Cloned per basic block and merged at joins; the
/// persistent map makes those clones cheap.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct AbstractStore {
    map: HashTrieMap<AbstractLocation, PointToMap>,
}

// Persistent maps keyed by locations do not fit self-describing formats,
// so stores serialize as entry lists.
impl Serialize for AbstractStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let entries: Vec<(&AbstractLocation, Vec<(&AbstractLocation, &Constraint)>)> = self
            .map
            .iter()
            .map(|(location, targets)| (location, targets.iter().collect()))
            .collect();
        entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AbstractStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries: Vec<(AbstractLocation, Vec<(AbstractLocation, Constraint)>)> =
            Vec::deserialize(deserializer)?;
        let mut map = HashTrieMap::new();
        for (location, targets) in entries {
            let mut cell = PointToMap::new();
            for (target, constraint) in targets {
                cell.insert_mut(target, constraint);
            }
            map.insert_mut(location, cell);
        }
        Ok(AbstractStore { map })
    }
}

impl Debug for AbstractStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_map()
            .entries(self.map.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl AbstractStore {
    pub fn new() -> AbstractStore {
        AbstractStore::default()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn value_at(&self, location: &AbstractLocation) -> Option<&PointToMap> {
        self.map.get(location)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AbstractLocation, &PointToMap)> {
        self.map.iter()
    }

    /// Installs the given points-to map for the location, dropping the entry
    /// outright when the map is empty.
    pub fn update_value_at(&mut self, location: AbstractLocation, map: PointToMap) {
        if map.is_empty() {
            self.map.remove_mut(&location);
        } else {
            self.map.insert_mut(location, map);
        }
    }

    /// Pointwise union with `other`: a key present on both sides gets the
    /// disjunction of constraints per target; a target present on one side
    /// only keeps its constraint unchanged, which is what preserves the
    /// path sensitivity of edges contributed by a single branch.
    #[logfn_inputs(TRACE)]
    pub fn merge(&self, other: &AbstractStore) -> AbstractStore {
        let mut map = self.map.clone();
        for (location, other_targets) in other.map.iter() {
            let merged = match map.get(location) {
                Some(targets) => merge_point_to_maps(targets, other_targets),
                None => other_targets.clone(),
            };
            map.insert_mut(*location, merged);
        }
        AbstractStore { map }
    }

    /// Simplifies every constraint, drops unsatisfiable edges and then any
    /// location left without targets.
    #[logfn_inputs(TRACE)]
    pub fn normalize(&mut self, solver: &mut ConstraintSolver) {
        let mut map = HashTrieMap::new();
        for (location, targets) in self.map.iter() {
            let mut kept = PointToMap::new();
            for (target, constraint) in targets.iter() {
                let simplified = constraint.simplify();
                if solver.test_satisfiability(&simplified) {
                    kept.insert_mut(*target, simplified);
                }
            }
            if !kept.is_empty() {
                map.insert_mut(*location, kept);
            }
        }
        self.map = map;
    }

    /// Semantic equality under the solver: for every key in either store the
    /// constrained target sets must be equivalent, where a missing key has
    /// no targets.
    pub fn equal(&self, other: &AbstractStore, solver: &mut ConstraintSolver) -> bool {
        let keys: HashSet<&AbstractLocation> =
            self.map.keys().chain(other.map.keys()).collect();
        let empty = PointToMap::new();
        for key in keys {
            let left = self.map.get(key).unwrap_or(&empty);
            let right = other.map.get(key).unwrap_or(&empty);
            if !point_to_maps_equal(left, right, solver) {
                trace!("stores disagree at {:?}: {:?} vs {:?}", key, left, right);
                return false;
            }
        }
        true
    }
}

/// Disjunctive merge of two points-to maps.
pub fn merge_point_to_maps(a: &PointToMap, b: &PointToMap) -> PointToMap {
    let mut merged = a.clone();
    for (target, constraint) in b.iter() {
        let joined = match merged.get(target) {
            Some(existing) => existing.or(constraint),
            None => constraint.clone(),
        };
        merged.insert_mut(*target, joined);
    }
    merged
}

/// Conjoins every constraint in the map with `c`, dropping edges that
/// collapse to Bottom.
pub fn conjoin_point_to_map(map: &PointToMap, c: &Constraint) -> PointToMap {
    let mut result = PointToMap::new();
    for (target, constraint) in map.iter() {
        let conjoined = constraint.and(c);
        if !conjoined.is_bottom() {
            result.insert_mut(*target, conjoined);
        }
    }
    result
}

/// Per-target equivalence of two points-to maps under the solver; a target
/// missing on one side is an edge with an infeasible constraint.
pub fn point_to_maps_equal(a: &PointToMap, b: &PointToMap, solver: &mut ConstraintSolver) -> bool {
    let targets: HashSet<&AbstractLocation> = a.keys().chain(b.keys()).collect();
    for target in targets {
        let left = a.get(target).cloned().unwrap_or(Constraint::Bottom);
        let right = b.get(target).cloned().unwrap_or(Constraint::Bottom);
        if !solver.test_equivalence(&left, &right) {
            return false;
        }
    }
    true
}
