// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::ir::{Module, ValueId};

use serde::{Deserialize, Serialize};

/// A symbolic name for a memory region or value tracked by the analysis.
/// Locations are immutable value objects with structural equality; points-to
/// graphs reference them by key rather than by owning handles, so cyclic
/// points-to relationships never materialize as reference cycles.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AbstractLocation {
    /// The SSA value itself; its contents are a points-to set held in the
    /// register file rather than in a store.
    Register(ValueId),
    /// The stack slot introduced by an alloca.
    Stack(ValueId),
    /// The heap cell introduced by a malloc-like call. Granularity is per
    /// allocation site, not per element.
    Heap(ValueId),
    /// The `level`-th dereference of a function input; memory that already
    /// existed when the function was entered.
    RuntimeMemory { input: ValueId, level: u32 },
    /// An opaque tag standing in for a non-pointer value, used when scalar
    /// tracking is enabled.
    ProgramValue(ValueId),
}

impl AbstractLocation {
    pub fn is_register(&self) -> bool {
        matches!(self, AbstractLocation::Register(..))
    }

    /// The value that introduced this location.
    pub fn definition(&self) -> ValueId {
        match self {
            AbstractLocation::Register(v)
            | AbstractLocation::Stack(v)
            | AbstractLocation::Heap(v)
            | AbstractLocation::RuntimeMemory { input: v, .. }
            | AbstractLocation::ProgramValue(v) => *v,
        }
    }

    /// A printable form resolved against the module's value names.
    pub fn render(&self, module: &Module) -> String {
        match self {
            AbstractLocation::Register(v) => module.value_name(*v),
            AbstractLocation::Stack(v) => format!("stack({})", module.value_name(*v)),
            AbstractLocation::Heap(v) => format!("heap({})", module.value_name(*v)),
            AbstractLocation::RuntimeMemory { input, level } => {
                let stars = "*".repeat(*level as usize + 1);
                format!("{stars}{}", module.value_name(*input))
            }
            AbstractLocation::ProgramValue(v) => format!("val({})", module.value_name(*v)),
        }
    }
}
