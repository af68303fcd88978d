// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//
// A whole-program, flow-sensitive, context-sensitive pointer analysis over an
// SSA intermediate representation. For every analyzed function the crate
// computes an abstract store: a points-to graph whose edges carry logical
// constraints over input-aliasing hypotheses. From the converged stores it
// derives a read-after-write program dependence graph relating every load to
// the stores, calls and function inputs that may supply its value.
//
// The IR is not parsed here. An embedder constructs a `Module` through the
// builders in the `ir` module and then asks the driver in `summaries` for
// converged function summaries, and the extractor in `data_dependence` for
// the RAW report.

#[macro_use]
extern crate log;

pub mod block_visitor;
pub mod body_visitor;
pub mod call_graph;
pub mod call_visitor;
pub mod constraint;
pub mod constraint_solver;
pub mod control_flow;
pub mod data_dependence;
pub mod expression;
pub mod fixed_point_visitor;
pub mod ir;
pub mod k_limits;
pub mod location;
pub mod options;
pub mod partition_solver;
pub mod smt_solver;
pub mod store;
pub mod summaries;
