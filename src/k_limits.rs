// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Somewhat arbitrary constants used to limit things in the analysis that may
// take too long or use too much memory.

/// The largest number of input-location variables for which the enumerating
/// solver backend will attempt an exhaustive model search. Above this the
/// backend answers `Undefined` and the facade degrades to conservative
/// results.
pub const MAX_ALIAS_VARIABLES: usize = 10;

/// The point at which a mutually recursive group of summaries is assumed to
/// be diverging rather than converging.
pub const MAX_OUTER_FIXPOINT_ITERATIONS: usize = 50;

/// Bounds the pointer-nesting depth that call-site instantiation will chase
/// when substituting a callee's runtime-memory locations.
pub const MAX_DEREFERENCE_LEVEL: u32 = 16;
