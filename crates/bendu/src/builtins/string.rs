//! `string.length`/`string.at` (spec.md §4.6, "Initial set").

use crate::{
    heap::{Heap, HeapData},
    intern::Interns,
    value::Value,
};

/// Reserved constructor ids for the built-in `Option` type, used only by
/// builtins that need to return one (spec.md §4.6: `string.at(s, i) ->
/// Option[Char]`). `Option` is not a user-declared ADT — there is no
/// corresponding `AdtRegistry` entry — so these ids live in their own
/// reserved space rather than sharing the user-ADT id sequence.
pub const NONE_CTOR_ID: u32 = 0;
pub const SOME_CTOR_ID: u32 = 1;

pub fn length(s: Value, heap: &mut Heap, interns: &Interns) -> Value {
    let Value::Ref(id) = s else { panic!("string.length argument must be a Str") };
    let HeapData::Str(string_id) = heap.get(id) else { panic!("string.length argument must be a Str") };
    let len = interns.get(*string_id).chars().count() as i32;
    heap.dec_ref(id);
    Value::Int(len)
}

pub fn at(s: Value, index: Value, heap: &mut Heap, interns: &mut Interns) -> Value {
    let Value::Ref(id) = s else { panic!("string.at first argument must be a Str") };
    let index = index.as_int().expect("string.at second argument must be an Int");
    let HeapData::Str(string_id) = heap.get(id) else { panic!("string.at first argument must be a Str") };
    let ch = interns.get(*string_id).chars().nth(index.max(0) as usize);
    heap.dec_ref(id);
    match ch {
        Some(c) if c.is_ascii() => {
            let name = interns.intern("Some");
            let inner = heap.allocate(HeapData::Custom { ctor_id: SOME_CTOR_ID, name, fields: vec![Value::Char(c as u8)] });
            Value::Ref(inner)
        }
        _ => {
            let name = interns.intern("None");
            let id = heap.allocate(HeapData::Custom { ctor_id: NONE_CTOR_ID, name, fields: Vec::new() });
            Value::Ref(id)
        }
    }
}
