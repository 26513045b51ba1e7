//! Arithmetic and comparison opcode execution (spec.md §4.3, the
//! "specialized per primitive" opcode groups).
//!
//! Grounded on the teacher's `bytecode/vm/binary.rs`: one dispatch function
//! per opcode group, popping both operands off the shared operand stack and
//! pushing the result. Division/modulo check for zero first, matching the
//! teacher's own `ZeroDivisionError` guard ahead of the native integer op.

use super::Vm;
use crate::{bytecode::op::Opcode, error::RunError, heap::HeapData, tracer::VmTracer, value::Value};

impl<'h, Tr: VmTracer> Vm<'h, Tr> {
    pub(super) fn exec_binary(&mut self, op: Opcode, stack: &mut Vec<Value>) -> Result<(), RunError> {
        let rhs = stack.pop().expect("binary op rhs");
        let lhs = stack.pop().expect("binary op lhs");
        let result = self.apply_binary(op, lhs, rhs)?;
        stack.push(result);
        Ok(())
    }

    fn apply_binary(&mut self, op: Opcode, lhs: Value, rhs: Value) -> Result<Value, RunError> {
        use Opcode::*;
        let result = match op {
            AddI32 => Value::Int(lhs.as_int().expect("AddI32 lhs") + rhs.as_int().expect("AddI32 rhs")),
            SubI32 => Value::Int(lhs.as_int().expect("SubI32 lhs") - rhs.as_int().expect("SubI32 rhs")),
            MulI32 => Value::Int(lhs.as_int().expect("MulI32 lhs") * rhs.as_int().expect("MulI32 rhs")),
            DivI32 => {
                let r = rhs.as_int().expect("DivI32 rhs");
                if r == 0 {
                    return Err(RunError::DivisionByZero);
                }
                Value::Int(lhs.as_int().expect("DivI32 lhs") / r)
            }
            ModI32 => {
                let r = rhs.as_int().expect("ModI32 rhs");
                if r == 0 {
                    return Err(RunError::DivisionByZero);
                }
                Value::Int(lhs.as_int().expect("ModI32 lhs") % r)
            }
            EqI32 => Value::Bool(lhs.as_int() == rhs.as_int()),
            NeqI32 => Value::Bool(lhs.as_int() != rhs.as_int()),
            LtI32 => Value::Bool(lhs.as_int().expect("LtI32 lhs") < rhs.as_int().expect("LtI32 rhs")),
            LteI32 => Value::Bool(lhs.as_int().expect("LteI32 lhs") <= rhs.as_int().expect("LteI32 rhs")),
            GtI32 => Value::Bool(lhs.as_int().expect("GtI32 lhs") > rhs.as_int().expect("GtI32 rhs")),
            GteI32 => Value::Bool(lhs.as_int().expect("GteI32 lhs") >= rhs.as_int().expect("GteI32 rhs")),

            AddF32 | SubF32 | MulF32 | DivF32 | EqF32 | NeqF32 | LtF32 | LteF32 | GtF32 | GteF32 => {
                let a = self.float_of(&lhs);
                let b = self.float_of(&rhs);
                lhs.drop_with_heap(self.heap);
                rhs.drop_with_heap(self.heap);
                return Ok(match op {
                    AddF32 => self.push_float(a + b),
                    SubF32 => self.push_float(a - b),
                    MulF32 => self.push_float(a * b),
                    DivF32 => {
                        if b == 0.0 {
                            return Err(RunError::DivisionByZero);
                        }
                        self.push_float(a / b)
                    }
                    EqF32 => Value::Bool(a == b),
                    NeqF32 => Value::Bool(a != b),
                    LtF32 => Value::Bool(a < b),
                    LteF32 => Value::Bool(a <= b),
                    GtF32 => Value::Bool(a > b),
                    GteF32 => Value::Bool(a >= b),
                    _ => unreachable!(),
                });
            }

            AddString | EqString | NeqString | LtString | LteString | GtString | GteString => {
                let a = self.string_of(&lhs).to_owned();
                let b = self.string_of(&rhs).to_owned();
                lhs.drop_with_heap(self.heap);
                rhs.drop_with_heap(self.heap);
                return Ok(match op {
                    AddString => {
                        let id = self.interns.intern(&(a + &b));
                        Value::Ref(self.heap.allocate(HeapData::Str(id)))
                    }
                    EqString => Value::Bool(a == b),
                    NeqString => Value::Bool(a != b),
                    LtString => Value::Bool(a < b),
                    LteString => Value::Bool(a <= b),
                    GtString => Value::Bool(a > b),
                    GteString => Value::Bool(a >= b),
                    _ => unreachable!(),
                });
            }

            AddChar => Value::Char(char_of(&lhs).wrapping_add(char_of(&rhs))),
            EqChar => Value::Bool(lhs == rhs),
            NeqChar => Value::Bool(lhs != rhs),
            LtChar => Value::Bool(char_of(&lhs) < char_of(&rhs)),
            LteChar => Value::Bool(char_of(&lhs) <= char_of(&rhs)),
            GtChar => Value::Bool(char_of(&lhs) > char_of(&rhs)),
            GteChar => Value::Bool(char_of(&lhs) >= char_of(&rhs)),

            EqBool => Value::Bool(lhs.as_bool() == rhs.as_bool()),
            NeqBool => Value::Bool(lhs.as_bool() != rhs.as_bool()),

            // Structural fallback for polymorphic `==`/`!=` (spec.md §4.3);
            // only reachable for immediates here, tuples/arrays/customs are
            // handled in `collections.rs` since they need heap recursion.
            EqGeneric => Value::Bool(self.structural_eq(&lhs, &rhs)),
            NeqGeneric => Value::Bool(!self.structural_eq(&lhs, &rhs)),

            _ => unreachable!("exec_binary called with non-binary opcode {op:?}"),
        };
        if !matches!(op, AddString | EqString | NeqString | LtString | LteString | GtString | GteString) {
            lhs.drop_with_heap(self.heap);
            rhs.drop_with_heap(self.heap);
        }
        Ok(result)
    }

    fn float_of(&self, v: &Value) -> f32 {
        let Value::Ref(id) = v else { panic!("expected a Float value") };
        let HeapData::Float(f) = self.heap.get(*id) else { panic!("expected a Float value") };
        *f
    }

    fn push_float(&mut self, f: f32) -> Value {
        Value::Ref(self.heap.allocate(HeapData::Float(f)))
    }

    fn string_of(&self, v: &Value) -> &str {
        let Value::Ref(id) = v else { panic!("expected a Str value") };
        let HeapData::Str(string_id) = self.heap.get(*id) else { panic!("expected a Str value") };
        self.interns.get(*string_id)
    }

    /// Deep structural equality over tuples/arrays/custom instances, used by
    /// the generic `==`/`!=` fallback when the operand type is still
    /// polymorphic at codegen time (spec.md §4.3).
    pub(super) fn structural_eq(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Ref(x), Value::Ref(y)) => match (self.heap.get(*x), self.heap.get(*y)) {
                (HeapData::Float(f1), HeapData::Float(f2)) => f1 == f2,
                (HeapData::Str(s1), HeapData::Str(s2)) => self.interns.get(*s1) == self.interns.get(*s2),
                (HeapData::Tuple(t1), HeapData::Tuple(t2)) | (HeapData::Array(t1), HeapData::Array(t2)) => {
                    t1.len() == t2.len() && t1.iter().zip(t2).all(|(u, v)| self.structural_eq(u, v))
                }
                (HeapData::Custom { ctor_id: c1, fields: f1, .. }, HeapData::Custom { ctor_id: c2, fields: f2, .. }) => {
                    c1 == c2 && f1.len() == f2.len() && f1.iter().zip(f2).all(|(u, v)| self.structural_eq(u, v))
                }
                _ => false,
            },
            _ => a == b,
        }
    }
}

fn char_of(v: &Value) -> u8 {
    match v {
        Value::Char(c) => *c,
        _ => panic!("expected a Char value"),
    }
}
