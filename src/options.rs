// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

/// Represents the switches an embedder can set for an analysis run.
/// There is no command line parsing here; hosts construct this directly.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// When true, non-pointer values are tracked as opaque `ProgramValue`
    /// locations, so that scalar stores and the results of calls to functions
    /// without bodies still show up in points-to sets and in the dependence
    /// report.
    pub track_program_values: bool,
    /// When true, reports render as Graphviz digraphs rather than plain text.
    pub graphviz_output: bool,
    /// When true, the fixpoint drivers log per-block stores at debug level.
    pub debug_trace: bool,
}
