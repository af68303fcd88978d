// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result};

/// Identifies an interned type within a module.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TypeId(pub u32);

/// Identifies an SSA value within a module. Arguments, globals, constants,
/// functions and instruction results are all values.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ValueId(pub u32);

/// Identifies a function within a module.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FuncId(pub u32);

/// Identifies a basic block within its owning function.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BlockId(pub u32);

/// Identifies an instruction within its owning function.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct InstId(pub u32);

/// The types the analysis distinguishes. Pointer nesting is the only
/// structure that matters to the abstract domain; everything else is kept
/// only so that the frontend can express realistic signatures.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Type {
    Void,
    Int { bits: u32 },
    Ptr(TypeId),
    Array { element: TypeId, len: u64 },
    /// An opaque named type, used for distinct pointee types.
    Named(Box<str>),
}

/// What kind of value a `ValueId` names.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueKind {
    Argument { func: FuncId, index: u32 },
    Global,
    Function(FuncId),
    ConstInt(i64),
    Inst { func: FuncId, inst: InstId },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ValueInfo {
    pub ty: TypeId,
    pub name: Option<Box<str>>,
    pub kind: ValueKind,
}

/// The instruction variants the abstract interpreter distinguishes.
/// Anything else the frontend encounters should be encoded as `Other`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum InstKind {
    Alloca { element: TypeId },
    Store { value: ValueId, pointer: ValueId },
    Load { pointer: ValueId },
    /// A direct call when `callee` is known, otherwise an indirect call
    /// whose target could not be resolved.
    Call { callee: Option<FuncId>, args: Vec<ValueId> },
    Bitcast { operand: ValueId },
    GetElementPtr { pointer: ValueId },
    Phi { incoming: Vec<(BlockId, ValueId)> },
    Select { condition: ValueId, true_value: ValueId, false_value: ValueId },
    Branch { condition: Option<ValueId>, targets: Vec<BlockId> },
    Switch { operand: ValueId, targets: Vec<BlockId> },
    Ret { value: Option<ValueId> },
    Other { operands: Vec<ValueId> },
}

impl InstKind {
    /// The value operands of the instruction, in a fixed order.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            InstKind::Alloca { .. } => vec![],
            InstKind::Store { value, pointer } => vec![*value, *pointer],
            InstKind::Load { pointer } => vec![*pointer],
            InstKind::Call { args, .. } => args.clone(),
            InstKind::Bitcast { operand } => vec![*operand],
            InstKind::GetElementPtr { pointer } => vec![*pointer],
            InstKind::Phi { incoming } => incoming.iter().map(|(_, v)| *v).collect(),
            InstKind::Select {
                condition,
                true_value,
                false_value,
            } => vec![*condition, *true_value, *false_value],
            InstKind::Branch { condition, .. } => condition.iter().copied().collect(),
            InstKind::Switch { operand, .. } => vec![*operand],
            InstKind::Ret { value } => value.iter().copied().collect(),
            InstKind::Other { operands } => operands.clone(),
        }
    }

    /// The successor blocks if this is a terminator.
    pub fn successor_blocks(&self) -> Option<&[BlockId]> {
        match self {
            InstKind::Branch { targets, .. } | InstKind::Switch { targets, .. } => Some(targets),
            InstKind::Ret { .. } => Some(&[]),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Instruction {
    pub value: ValueId,
    pub block: BlockId,
    pub kind: InstKind,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BasicBlock {
    pub insts: Vec<InstId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Function {
    pub name: Box<str>,
    /// The value that names the function itself (usable as a call target and
    /// as an opaque program value).
    pub value: ValueId,
    pub params: Vec<ValueId>,
    pub return_type: TypeId,
    pub blocks: Vec<BasicBlock>,
    pub insts: Vec<Instruction>,
    /// Set by `call_graph::mark_recursion_attributes`; a function that does
    /// not participate in any call-graph cycle is analyzed to convergence
    /// before any of its callers.
    pub does_not_recurse: bool,
    /// A declaration whose calls allocate fresh heap cells (`malloc` et al).
    pub malloc_like: bool,
}

impl Function {
    /// A function without a body; calls to it are handled conservatively.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, block: BlockId) -> &BasicBlock {
        &self.blocks[block.0 as usize]
    }

    pub fn inst(&self, inst: InstId) -> &Instruction {
        &self.insts[inst.0 as usize]
    }

    /// All instructions in block order, which is the program order the
    /// dependence extractor scans in.
    pub fn instructions(&self) -> impl Iterator<Item = (InstId, &Instruction)> {
        self.blocks
            .iter()
            .flat_map(move |b| b.insts.iter().map(move |i| (*i, self.inst(*i))))
    }
}

/// An SSA module: the entire input of one whole-program analysis run.
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct Module {
    types: Vec<Type>,
    #[serde(skip)]
    type_ids: HashMap<Type, TypeId>,
    values: Vec<ValueInfo>,
    functions: Vec<Function>,
    globals: Vec<ValueId>,
}

impl Debug for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "Module({} functions, {} values)",
            self.functions.len(),
            self.values.len()
        )
    }
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    fn intern_type(&mut self, ty: Type) -> TypeId {
        if let Some(id) = self.type_ids.get(&ty) {
            return *id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.type_ids.insert(ty, id);
        id
    }

    pub fn void_type(&mut self) -> TypeId {
        self.intern_type(Type::Void)
    }

    pub fn int_type(&mut self, bits: u32) -> TypeId {
        self.intern_type(Type::Int { bits })
    }

    pub fn ptr_type(&mut self, pointee: TypeId) -> TypeId {
        self.intern_type(Type::Ptr(pointee))
    }

    pub fn array_type(&mut self, element: TypeId, len: u64) -> TypeId {
        self.intern_type(Type::Array { element, len })
    }

    pub fn named_type(&mut self, name: &str) -> TypeId {
        self.intern_type(Type::Named(name.into()))
    }

    pub fn type_info(&self, ty: TypeId) -> &Type {
        &self.types[ty.0 as usize]
    }

    /// How many pointer indirections the type carries. `i32** -> 2`.
    pub fn ptr_nest_level(&self, ty: TypeId) -> u32 {
        match self.type_info(ty) {
            Type::Ptr(pointee) => 1 + self.ptr_nest_level(*pointee),
            _ => 0,
        }
    }

    pub fn pointee(&self, ty: TypeId) -> Option<TypeId> {
        match self.type_info(ty) {
            Type::Ptr(pointee) => Some(*pointee),
            _ => None,
        }
    }

    fn add_value(&mut self, ty: TypeId, name: Option<&str>, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo {
            ty,
            name: name.map(|n| n.into()),
            kind,
        });
        id
    }

    pub fn const_int(&mut self, ty: TypeId, value: i64) -> ValueId {
        self.add_value(ty, None, ValueKind::ConstInt(value))
    }

    /// Adds a global variable. As in LLVM, the value of a global is the
    /// *address* of its storage, so its type is a pointer to `pointee`.
    pub fn add_global(&mut self, name: &str, pointee: TypeId) -> ValueId {
        let ty = self.ptr_type(pointee);
        let id = self.add_value(ty, Some(name), ValueKind::Global);
        self.globals.push(id);
        id
    }

    /// Declares a function. The declaration becomes a definition once a
    /// `FunctionBuilder` has given it a body.
    pub fn declare_function(&mut self, name: &str, params: &[TypeId], ret: TypeId) -> FuncId {
        let func = FuncId(self.functions.len() as u32);
        let value = self.add_value(ret, Some(name), ValueKind::Function(func));
        let params = params
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                self.add_value(
                    *ty,
                    None,
                    ValueKind::Argument {
                        func,
                        index: index as u32,
                    },
                )
            })
            .collect();
        self.functions.push(Function {
            name: name.into(),
            value,
            params,
            return_type: ret,
            blocks: vec![],
            insts: vec![],
            does_not_recurse: false,
            malloc_like: false,
        });
        func
    }

    pub fn set_malloc_like(&mut self, func: FuncId) {
        self.functions[func.0 as usize].malloc_like = true;
    }

    pub fn set_does_not_recurse(&mut self, func: FuncId, value: bool) {
        self.functions[func.0 as usize].does_not_recurse = value;
    }

    pub fn function(&self, func: FuncId) -> &Function {
        &self.functions[func.0 as usize]
    }

    pub(crate) fn function_mut(&mut self, func: FuncId) -> &mut Function {
        &mut self.functions[func.0 as usize]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    pub fn globals(&self) -> &[ValueId] {
        &self.globals
    }

    pub fn value(&self, value: ValueId) -> &ValueInfo {
        &self.values[value.0 as usize]
    }

    pub fn type_of(&self, value: ValueId) -> TypeId {
        self.value(value).ty
    }

    pub fn is_global(&self, value: ValueId) -> bool {
        matches!(self.value(value).kind, ValueKind::Global)
    }

    pub fn is_argument(&self, value: ValueId) -> bool {
        matches!(self.value(value).kind, ValueKind::Argument { .. })
    }

    /// The called function of a call instruction, if it can be resolved.
    pub fn called_function(&self, func: FuncId, inst: InstId) -> Option<FuncId> {
        match &self.function(func).inst(inst).kind {
            InstKind::Call { callee, .. } => *callee,
            _ => None,
        }
    }

    /// True for calls to malloc-like declarations; such calls introduce a
    /// fresh heap cell rather than being interpreted as calls.
    pub fn is_malloc_call(&self, func: FuncId, inst: InstId) -> bool {
        self.called_function(func, inst)
            .map(|callee| self.function(callee).malloc_like)
            .unwrap_or(false)
    }

    /// A short printable name for a value: `%x`, `@g`, a literal for
    /// constants, or a synthesized `%vN`.
    pub fn value_name(&self, value: ValueId) -> String {
        let info = self.value(value);
        match &info.kind {
            ValueKind::Global => format!("@{}", info.name.as_deref().unwrap_or("global")),
            ValueKind::Function(func) => format!("@{}", self.function(*func).name),
            ValueKind::ConstInt(v) => v.to_string(),
            _ => match &info.name {
                Some(name) => format!("%{name}"),
                None => format!("%v{}", value.0),
            },
        }
    }

    /// A one-line rendering of the value, used for report nodes; instruction
    /// values print in an assembly-like form.
    pub fn describe_value(&self, value: ValueId) -> String {
        let info = self.value(value);
        let (func, inst) = match info.kind {
            ValueKind::Inst { func, inst } => (func, inst),
            _ => return self.value_name(value),
        };
        let n = self.value_name(value);
        match &self.function(func).inst(inst).kind {
            InstKind::Alloca { .. } => format!("{n} = alloca"),
            InstKind::Store { value, pointer } => {
                format!("store {}, {}", self.value_name(*value), self.value_name(*pointer))
            }
            InstKind::Load { pointer } => format!("{n} = load {}", self.value_name(*pointer)),
            InstKind::Call { callee, args } => {
                let args = args.iter().map(|a| self.value_name(*a)).format(", ");
                match callee {
                    Some(f) => format!("{n} = call @{}({args})", self.function(*f).name),
                    None => format!("{n} = call ?({args})"),
                }
            }
            InstKind::Bitcast { operand } => {
                format!("{n} = bitcast {}", self.value_name(*operand))
            }
            InstKind::GetElementPtr { pointer } => {
                format!("{n} = getelementptr {}", self.value_name(*pointer))
            }
            InstKind::Phi { incoming } => {
                let vals = incoming.iter().map(|(_, v)| self.value_name(*v)).format(", ");
                format!("{n} = phi {vals}")
            }
            InstKind::Select {
                condition,
                true_value,
                false_value,
            } => format!(
                "{n} = select {}, {}, {}",
                self.value_name(*condition),
                self.value_name(*true_value),
                self.value_name(*false_value)
            ),
            InstKind::Branch { condition, targets } => match condition {
                Some(c) => format!(
                    "br {}, {}",
                    self.value_name(*c),
                    targets.iter().map(|b| format!("bb{}", b.0)).format(", ")
                ),
                None => format!("br {}", targets.iter().map(|b| format!("bb{}", b.0)).format(", ")),
            },
            InstKind::Switch { operand, .. } => format!("switch {}", self.value_name(*operand)),
            InstKind::Ret { value } => match value {
                Some(v) => format!("ret {}", self.value_name(*v)),
                None => "ret".to_string(),
            },
            InstKind::Other { operands } => {
                let ops = operands.iter().map(|o| self.value_name(*o)).format(", ");
                format!("{n} = op {ops}")
            }
        }
    }
}

/// Appends a body to a declared function, one block at a time. `finish`
/// wires up predecessor and successor lists from the block terminators.
pub struct FunctionBuilder<'m> {
    module: &'m mut Module,
    func: FuncId,
    current: Option<BlockId>,
}

impl<'m> FunctionBuilder<'m> {
    pub fn new(module: &'m mut Module, func: FuncId) -> FunctionBuilder<'m> {
        FunctionBuilder {
            module,
            func,
            current: None,
        }
    }

    pub fn new_block(&mut self) -> BlockId {
        let function = self.module.function_mut(self.func);
        let block = BlockId(function.blocks.len() as u32);
        function.blocks.push(BasicBlock::default());
        if self.current.is_none() {
            self.current = Some(block);
        }
        block
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    fn push(&mut self, ty: TypeId, kind: InstKind) -> ValueId {
        let func = self.func;
        let block = self.current.expect("a block must be created before instructions");
        let inst = InstId(self.module.function(func).insts.len() as u32);
        let value = self.module.add_value(ty, None, ValueKind::Inst { func, inst });
        let function = self.module.function_mut(func);
        function.insts.push(Instruction { value, block, kind });
        function.blocks[block.0 as usize].insts.push(inst);
        value
    }

    pub fn alloca(&mut self, element: TypeId) -> ValueId {
        let ty = self.module.ptr_type(element);
        self.push(ty, InstKind::Alloca { element })
    }

    pub fn store(&mut self, value: ValueId, pointer: ValueId) -> ValueId {
        let ty = self.module.void_type();
        self.push(ty, InstKind::Store { value, pointer })
    }

    pub fn load(&mut self, pointer: ValueId) -> ValueId {
        let ptr_ty = self.module.type_of(pointer);
        let ty = self.module.pointee(ptr_ty).unwrap_or(ptr_ty);
        self.push(ty, InstKind::Load { pointer })
    }

    pub fn call(&mut self, callee: FuncId, args: &[ValueId]) -> ValueId {
        let ty = self.module.function(callee).return_type;
        self.push(
            ty,
            InstKind::Call {
                callee: Some(callee),
                args: args.to_vec(),
            },
        )
    }

    /// A call whose target cannot be resolved; interpreted like a call to a
    /// declaration.
    pub fn indirect_call(&mut self, ret: TypeId, args: &[ValueId]) -> ValueId {
        self.push(
            ret,
            InstKind::Call {
                callee: None,
                args: args.to_vec(),
            },
        )
    }

    pub fn bitcast(&mut self, operand: ValueId, ty: TypeId) -> ValueId {
        self.push(ty, InstKind::Bitcast { operand })
    }

    pub fn getelementptr(&mut self, pointer: ValueId) -> ValueId {
        let ty = self.module.type_of(pointer);
        self.push(ty, InstKind::GetElementPtr { pointer })
    }

    pub fn phi(&mut self, ty: TypeId, incoming: &[(BlockId, ValueId)]) -> ValueId {
        self.push(
            ty,
            InstKind::Phi {
                incoming: incoming.to_vec(),
            },
        )
    }

    pub fn select(&mut self, condition: ValueId, true_value: ValueId, false_value: ValueId) -> ValueId {
        let ty = self.module.type_of(true_value);
        self.push(
            ty,
            InstKind::Select {
                condition,
                true_value,
                false_value,
            },
        )
    }

    pub fn branch(&mut self, target: BlockId) {
        let ty = self.module.void_type();
        self.push(
            ty,
            InstKind::Branch {
                condition: None,
                targets: vec![target],
            },
        );
    }

    pub fn cond_branch(&mut self, condition: ValueId, then_block: BlockId, else_block: BlockId) {
        let ty = self.module.void_type();
        self.push(
            ty,
            InstKind::Branch {
                condition: Some(condition),
                targets: vec![then_block, else_block],
            },
        );
    }

    pub fn switch(&mut self, operand: ValueId, targets: &[BlockId]) {
        let ty = self.module.void_type();
        self.push(
            ty,
            InstKind::Switch {
                operand,
                targets: targets.to_vec(),
            },
        );
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        let ty = self.module.void_type();
        self.push(ty, InstKind::Ret { value });
    }

    pub fn other(&mut self, ty: TypeId, operands: &[ValueId]) -> ValueId {
        self.push(
            ty,
            InstKind::Other {
                operands: operands.to_vec(),
            },
        )
    }

    /// Completes the body: derives successor and predecessor lists from the
    /// terminator of every block.
    pub fn finish(self) {
        let function = self.module.function_mut(self.func);
        let mut edges: Vec<(BlockId, BlockId)> = vec![];
        for (i, block) in function.blocks.iter().enumerate() {
            let from = BlockId(i as u32);
            if let Some(last) = block.insts.last() {
                if let Some(targets) = function.insts[last.0 as usize].kind.successor_blocks() {
                    for t in targets {
                        edges.push((from, *t));
                    }
                }
            }
        }
        for block in function.blocks.iter_mut() {
            block.preds.clear();
            block.succs.clear();
        }
        for (from, to) in edges {
            function.blocks[from.0 as usize].succs.push(to);
            function.blocks[to.0 as usize].preds.push(from);
        }
    }
}
