//! Heap-constructor opcode execution — tuples, arrays, and ADT instances
//! (spec.md §4.3, "heap constructors").
//!
//! Grounded on the teacher's `bytecode/vm/collections.rs`: pop the fixed or
//! variable-length operand run off the stack, allocate the matching
//! `HeapData` variant, push a `Ref` back.

use super::{CallFrame, Vm};
use crate::{
    bytecode::{builder::Code, op::Opcode},
    error::RunError,
    heap::{HeapData, HeapId},
    tracer::VmTracer,
    value::Value,
};

impl<'h, Tr: VmTracer> Vm<'h, Tr> {
    pub(super) fn exec_collection(
        &mut self,
        op: Opcode,
        code: &Code,
        frames: &mut Vec<CallFrame>,
        stack: &mut Vec<Value>,
    ) -> Result<(), RunError> {
        match op {
            Opcode::PushTuple => {
                let n = self.fetch_u32(code, frames) as usize;
                let items = pop_n(stack, n);
                let id = self.heap.allocate(HeapData::Tuple(items));
                stack.push(Value::Ref(id));
            }
            Opcode::PushArray => {
                let n = self.fetch_u32(code, frames) as usize;
                let items = pop_n(stack, n);
                let id = self.heap.allocate(HeapData::Array(items));
                stack.push(Value::Ref(id));
            }
            Opcode::PushTupleComponent => {
                let index = self.fetch_u32(code, frames) as usize;
                let id = expect_ref(stack.pop().expect("PushTupleComponent operand"));
                let HeapData::Tuple(items) = self.heap.get(id) else { panic!("PushTupleComponent operand must be a Tuple") };
                let value = self.bump_and_copy(items[index].shallow_copy());
                self.heap.dec_ref(id);
                stack.push(value);
            }
            Opcode::ArrayIndex => {
                let index = stack.pop().expect("ArrayIndex index").as_int().expect("ArrayIndex index must be Int");
                let id = expect_ref(stack.pop().expect("ArrayIndex array"));
                let HeapData::Array(items) = self.heap.get(id) else { panic!("ArrayIndex operand must be an Array") };
                if index < 0 || index as usize >= items.len() {
                    let length = items.len();
                    self.heap.dec_ref(id);
                    return Err(RunError::IndexOutOfBounds { index: index as i64, length });
                }
                let value = self.bump_and_copy(items[index as usize].shallow_copy());
                self.heap.dec_ref(id);
                stack.push(value);
            }
            Opcode::ArraySlice => {
                let to = stack.pop().expect("ArraySlice to").as_int().expect("ArraySlice to must be Int");
                let from = stack.pop().expect("ArraySlice from").as_int().expect("ArraySlice from must be Int");
                let id = expect_ref(stack.pop().expect("ArraySlice array"));
                let HeapData::Array(items) = self.heap.get(id) else { panic!("ArraySlice operand must be an Array") };
                let len = items.len() as i64;
                let from = from.clamp(0, len) as usize;
                let to = if to < 0 { len as usize } else { to.clamp(0, len) as usize };
                let copies: Vec<Value> = if from < to { items[from..to].iter().map(Value::shallow_copy).collect() } else { Vec::new() };
                self.heap.dec_ref(id);
                let slice: Vec<Value> = copies.into_iter().map(|v| self.bump_and_copy(v)).collect();
                let slice_id = self.heap.allocate(HeapData::Array(slice));
                stack.push(Value::Ref(slice_id));
            }
            Opcode::PushCustom => {
                let name = self.fetch_string(code, frames);
                let ctor_id = self.fetch_u32(code, frames);
                let arity = self.fetch_u32(code, frames);
                let fields = pop_n(stack, arity as usize);
                let name_id = self.interns.intern(&name);
                let id = self.heap.allocate(HeapData::Custom { ctor_id, name: name_id, fields });
                stack.push(Value::Ref(id));
            }
            Opcode::PushConstructorComponent => {
                let index = self.fetch_u32(code, frames) as usize;
                let id = expect_ref(stack.pop().expect("PushConstructorComponent operand"));
                let HeapData::Custom { fields, .. } = self.heap.get(id) else {
                    panic!("PushConstructorComponent operand must be a Custom")
                };
                let value = self.bump_and_copy(fields[index].shallow_copy());
                self.heap.dec_ref(id);
                stack.push(value);
            }
            Opcode::PushConstructorTag => {
                let id = expect_ref(stack.pop().expect("PushConstructorTag operand"));
                let HeapData::Custom { ctor_id, .. } = self.heap.get(id) else {
                    panic!("PushConstructorTag operand must be a Custom")
                };
                let tag = *ctor_id as i32;
                self.heap.dec_ref(id);
                stack.push(Value::Int(tag));
            }
            _ => unreachable!("exec_collection called with non-collection opcode {op:?}"),
        }
        Ok(())
    }

    /// Increments the target refcount for a [`Value::Ref`] copied out of a
    /// heap object via [`Value::shallow_copy`] (whose raw bits don't yet
    /// account for the new owner), leaving immediates untouched.
    fn bump_and_copy(&mut self, v: Value) -> Value {
        if let Value::Ref(id) = v {
            self.heap.inc_ref(id);
        }
        v
    }
}

fn expect_ref(v: Value) -> HeapId {
    match v {
        Value::Ref(id) => id,
        _ => panic!("expected a heap-allocated value"),
    }
}

fn pop_n(stack: &mut Vec<Value>, n: usize) -> Vec<Value> {
    let mut items: Vec<Value> = stack.split_off(stack.len() - n);
    items.shrink_to_fit();
    items
}
