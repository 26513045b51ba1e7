//! The bytecode virtual machine (spec.md §4.5 "Execution model").
//!
//! Grounded on the teacher's `bytecode/vm/mod.rs`: a stack-based dispatch
//! loop over a cached `(code, ip)` pair, a call stack of frames, and a
//! `VmTracer` hook fired once per dispatched instruction. Bendu's opcode set
//! (`op.rs`) is a small fraction of the teacher's CPython-sized one, so the
//! arithmetic/comparison and heap-constructor opcode groups are split into
//! `binary.rs`/`collections.rs` the same way the teacher splits `binary.rs`/
//! `collections.rs` out of its own `vm/mod.rs`, but there is no
//! `attr`/`exceptions`/`scheduler`/`async_exec` counterpart: Bendu has no
//! exceptions, classes, or coroutines (spec.md's Non-goals).

mod binary;
mod collections;

use crate::{
    bytecode::{builder::Code, op::Opcode},
    error::RunError,
    heap::{Heap, HeapData},
    intern::Interns,
    package::PackageTable,
    tracer::VmTracer,
    value::Value,
};

/// How deep the call stack may grow before [`RunError::RecursionLimitExceeded`]
/// (spec.md §4.5, "Resource limits"; the teacher's own default is
/// `resource::DEFAULT_MAX_RECURSION_DEPTH`, which this mirrors).
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

static EMPTY_PACKAGE_TABLE: PackageTable = PackageTable::const_empty();

/// One active call frame. `base` is the operand stack depth when the frame
/// was pushed, so `Ret` knows how much of the operand stack belongs to the
/// callee and must be collapsed down to its single return value.
struct CallFrame {
    ip: usize,
    base: usize,
    /// The frame's local-variable storage (spec.md §3, "Frame: ... growable
    /// value vector"). Lives on the heap so closures can outlive the call
    /// that created them.
    locals: crate::heap::HeapId,
    /// Which instruction stream `ip` indexes into: 0 is the package the
    /// `Vm` was constructed to run, `n > 0` is `imports.get(n)` (spec.md
    /// §4.5, "CALL_PACKAGE ... performs a standard call with the target
    /// package's frame as enclosing" — the callee's *code* also lives in
    /// the target package, not the caller's).
    package: u32,
}

/// What running a package's bytecode produced (spec.md §4.5: "Execution
/// halts when the instruction pointer runs past the init block's `RET`").
pub enum VmOutcome {
    /// The init block (or a `dis`/`test` standalone expression) finished,
    /// leaving this value on top of the operand stack.
    Finished(Value),
}

/// Executes one package's [`Code`] against a shared [`Heap`] (spec.md §4.5).
pub struct Vm<'h, Tr: VmTracer> {
    heap: &'h mut Heap,
    interns: &'h mut Interns,
    imports: &'h PackageTable,
    tracer: Tr,
    max_recursion_depth: usize,
}

impl<'h, Tr: VmTracer> Vm<'h, Tr> {
    pub fn new(heap: &'h mut Heap, interns: &'h mut Interns, tracer: Tr) -> Self {
        Self::with_imports(heap, interns, &EMPTY_PACKAGE_TABLE, tracer)
    }

    /// Like [`Self::new`], but resolves `CALL_PACKAGE`/`LOAD_PACKAGE`/
    /// `STORE_PACKAGE` against `imports` rather than erroring on them —
    /// used when running a package that actually has import statements.
    pub fn with_imports(heap: &'h mut Heap, interns: &'h mut Interns, imports: &'h PackageTable, tracer: Tr) -> Self {
        Self { heap, interns, imports, tracer, max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH }
    }

    pub fn with_max_recursion_depth(mut self, limit: usize) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    /// Consumes the VM and hands back its tracer, for callers that drive
    /// `run`/`run_package` themselves and want to read or fire a hook on the
    /// tracer afterward (`cache.rs`'s `load_into` uses this for
    /// [`VmTracer::on_package_load`], which needs the package's source id —
    /// information the `Vm` itself never sees).
    pub fn finish(self) -> Tr {
        self.tracer
    }

    fn code_for<'a>(&'a self, local: &'a Code, package: u32) -> &'a Code {
        if package == 0 { local } else { &self.imports.get(package).code }
    }

    /// Runs `code` from offset 0 to completion, starting with an empty root
    /// frame, and drops that root frame once finished — for a standalone
    /// expression (`dis --expression`, `test`) with no importer keeping a
    /// reference to it.
    pub fn run(&mut self, entry_code: &Code) -> Result<VmOutcome, RunError> {
        let (outcome, _root_frame) = self.run_inner(entry_code, false)?;
        Ok(outcome)
    }

    /// Like [`Self::run`], but keeps the root frame alive and returns its
    /// [`crate::heap::HeapId`] instead of dropping it (spec.md §4.5:
    /// "execute the bytecode to the first `RET`... the final frame is
    /// cached as the package's image") — used when loading a package whose
    /// public bindings other packages may still reach via `LOAD_PACKAGE`/
    /// `CALL_PACKAGE` after this call returns.
    pub fn run_package(&mut self, entry_code: &Code) -> Result<(Value, crate::heap::HeapId), RunError> {
        let (outcome, root_frame) = self.run_inner(entry_code, true)?;
        let VmOutcome::Finished(value) = outcome;
        Ok((value, root_frame.expect("run_inner always returns a frame id when keep_root_frame is set")))
    }

    fn run_inner(&mut self, entry_code: &Code, keep_root_frame: bool) -> Result<(VmOutcome, Option<crate::heap::HeapId>), RunError> {
        let root_locals = self.heap.allocate(HeapData::Frame { enclosing: None, slots: Vec::new() });
        let mut stack: Vec<Value> = Vec::new();
        let mut frames: Vec<CallFrame> = vec![CallFrame { ip: 0, base: 0, locals: root_locals, package: 0 }];

        loop {
            if self.heap.should_collect() {
                self.collect_garbage(&stack, &frames);
            }

            let frame_depth = frames.len();
            let (ip, package, base) = {
                let frame = frames.last().expect("at least the root frame is always present");
                (frame.ip, frame.package, frame.base)
            };
            let code = self.code_for(entry_code, package);
            let Some(&tag) = code.bytecode.get(ip) else {
                // Ran past the end of the stream without a `Ret` — only
                // reachable for a malformed image; treat it like an implicit
                // return of the top of the stack.
                let value = stack.pop().unwrap_or(Value::Unit);
                let root_frame = keep_root_frame.then_some(frames[0].locals);
                return Ok((VmOutcome::Finished(value), root_frame));
            };
            let Some(op) = Opcode::decode(tag) else {
                return Err(RunError::InvalidMagic);
            };
            self.tracer.on_instruction(ip, op, stack.len() - base, frame_depth);
            frames.last_mut().expect("present").ip += 1;

            match op {
                Opcode::Ret => {
                    let result = stack.pop().unwrap_or(Value::Unit);
                    let finished = frames.pop().expect("matches the frame this Ret belongs to");
                    stack.truncate(finished.base);
                    let is_root = frames.is_empty();
                    if !(is_root && keep_root_frame) {
                        self.dec_ref_frame(finished.locals);
                    }
                    self.tracer.on_return(frames.len());
                    if is_root {
                        let root_frame = keep_root_frame.then_some(finished.locals);
                        return Ok((VmOutcome::Finished(result), root_frame));
                    }
                    stack.push(result);
                }
                Opcode::Jmp => {
                    let target = self.fetch_u32(code, &mut frames);
                    frames.last_mut().expect("present").ip = target as usize;
                }
                Opcode::JmpFalse => {
                    let target = self.fetch_u32(code, &mut frames);
                    let cond = stack.pop().expect("JmpFalse operand");
                    if cond.as_bool() == Some(false) {
                        frames.last_mut().expect("present").ip = target as usize;
                    }
                }
                Opcode::JmpDupTrue => {
                    let target = self.fetch_u32(code, &mut frames);
                    let cond = stack.last().expect("JmpDupTrue operand").clone_ref(self.heap);
                    if cond.as_bool() == Some(true) {
                        frames.last_mut().expect("present").ip = target as usize;
                    }
                    cond.drop_with_heap(self.heap);
                }
                Opcode::JmpDupFalse => {
                    let target = self.fetch_u32(code, &mut frames);
                    let cond = stack.last().expect("JmpDupFalse operand").clone_ref(self.heap);
                    if cond.as_bool() == Some(false) {
                        frames.last_mut().expect("present").ip = target as usize;
                    }
                    cond.drop_with_heap(self.heap);
                }

                Opcode::PushI32Literal => {
                    let v = self.fetch_i32(code, &mut frames);
                    stack.push(Value::Int(v));
                }
                Opcode::PushF32Literal => {
                    let v = self.fetch_f32(code, &mut frames);
                    let id = self.heap.allocate(HeapData::Float(v));
                    stack.push(Value::Ref(id));
                }
                Opcode::PushU8Literal => {
                    let v = self.fetch_u8(code, &mut frames);
                    stack.push(Value::Char(v));
                }
                Opcode::PushStringLiteral => {
                    let s = self.fetch_string(code, &mut frames);
                    let string_id = self.interns.intern(&s);
                    let id = self.heap.allocate(HeapData::Str(string_id));
                    stack.push(Value::Ref(id));
                }
                Opcode::PushUnitLiteral => stack.push(Value::Unit),
                Opcode::PushBoolTrue => stack.push(Value::Bool(true)),
                Opcode::PushBoolFalse => stack.push(Value::Bool(false)),

                Opcode::Dup => {
                    let top = stack.last().expect("Dup operand").clone_ref(self.heap);
                    stack.push(top);
                }
                Opcode::Discard => {
                    let v = stack.pop().expect("Discard operand");
                    v.drop_with_heap(self.heap);
                }
                Opcode::NotBool => {
                    let v = stack.pop().expect("NotBool operand");
                    let b = v.as_bool().expect("NotBool operand must be Bool");
                    stack.push(Value::Bool(!b));
                }

                Opcode::Load => {
                    let (depth, slot) = self.fetch_u32_pair(code, &mut frames);
                    let locals = self.locals_at_depth(&frames, depth);
                    let value = self.read_slot(locals, slot);
                    stack.push(value);
                }
                Opcode::Store => {
                    let (depth, slot) = self.fetch_u32_pair(code, &mut frames);
                    let value = stack.pop().expect("Store operand");
                    let locals = self.locals_at_depth(&frames, depth);
                    self.write_slot(locals, slot, value);
                }

                Opcode::PushClosure => {
                    let (pkg_id, offset) = self.fetch_i32_u32(code, &mut frames);
                    let frame = frames.last().expect("present");
                    self.heap.inc_ref(frame.locals);
                    let id = self.heap.allocate(HeapData::Closure { package_id: pkg_id, offset, frame: frame.locals });
                    stack.push(Value::Ref(id));
                }
                Opcode::Call => {
                    let (offset, arity, depth) = self.fetch_u32_triple(code, &mut frames);
                    self.check_recursion(frames.len())?;
                    let mut args = Vec::with_capacity(arity as usize);
                    for _ in 0..arity {
                        args.push(stack.pop().expect("Call argument"));
                    }
                    args.reverse();
                    let enclosing = if depth == 0 { None } else { Some(self.locals_at_depth(&frames, depth)) };
                    let locals = self.heap.allocate(HeapData::Frame { enclosing, slots: args });
                    frames.push(CallFrame { ip: offset as usize, base: stack.len(), locals, package });
                    self.tracer.on_call(None, frames.len());
                }
                Opcode::CallClosure => {
                    let arity = self.fetch_u32(code, &mut frames);
                    self.check_recursion(frames.len())?;
                    let callee = stack.pop().expect("CallClosure callee");
                    let Value::Ref(closure_id) = callee else {
                        return Err(RunError::NonExhaustiveMatchAtRuntime);
                    };
                    let HeapData::Closure { package_id, offset, frame: enclosing } = self.heap.get(closure_id) else {
                        return Err(RunError::NonExhaustiveMatchAtRuntime);
                    };
                    let closure_package = *package_id as u32;
                    let offset = *offset;
                    let enclosing = *enclosing;
                    let mut args = Vec::with_capacity(arity as usize);
                    for _ in 0..arity {
                        args.push(stack.pop().expect("CallClosure argument"));
                    }
                    args.reverse();
                    self.heap.inc_ref(enclosing);
                    let locals = self.heap.allocate(HeapData::Frame { enclosing: Some(enclosing), slots: args });
                    self.heap.dec_ref(closure_id);
                    frames.push(CallFrame { ip: offset as usize, base: stack.len(), locals, package: closure_package });
                    self.tracer.on_call(None, frames.len());
                }
                Opcode::CallPackage => {
                    let (pkg_id, offset, arity) = self.fetch_i32_u32_u32(code, &mut frames);
                    self.check_recursion(frames.len())?;
                    let pkg_id = pkg_id as u32;
                    let target_frame = self.imports.get(pkg_id).frame;
                    let mut args = Vec::with_capacity(arity as usize);
                    for _ in 0..arity {
                        args.push(stack.pop().expect("CallPackage argument"));
                    }
                    args.reverse();
                    self.heap.inc_ref(target_frame);
                    let locals = self.heap.allocate(HeapData::Frame { enclosing: Some(target_frame), slots: args });
                    frames.push(CallFrame { ip: offset as usize, base: stack.len(), locals, package: pkg_id });
                    self.tracer.on_call(None, frames.len());
                }
                Opcode::LoadPackage => {
                    let (pkg_id, offset) = self.fetch_i32_u32(code, &mut frames);
                    let frame_id = self.imports.get(pkg_id as u32).frame;
                    let value = self.read_slot(frame_id, offset);
                    stack.push(value);
                }
                Opcode::StorePackage => {
                    let (pkg_id, offset) = self.fetch_i32_u32(code, &mut frames);
                    let value = stack.pop().expect("StorePackage operand");
                    let frame_id = self.imports.get(pkg_id as u32).frame;
                    self.write_slot(frame_id, offset, value);
                }

                op @ (Opcode::AddI32
                | Opcode::SubI32
                | Opcode::MulI32
                | Opcode::DivI32
                | Opcode::ModI32
                | Opcode::AddF32
                | Opcode::SubF32
                | Opcode::MulF32
                | Opcode::DivF32
                | Opcode::AddString
                | Opcode::EqI32
                | Opcode::NeqI32
                | Opcode::LtI32
                | Opcode::LteI32
                | Opcode::GtI32
                | Opcode::GteI32
                | Opcode::EqF32
                | Opcode::NeqF32
                | Opcode::LtF32
                | Opcode::LteF32
                | Opcode::GtF32
                | Opcode::GteF32
                | Opcode::EqString
                | Opcode::NeqString
                | Opcode::LtString
                | Opcode::LteString
                | Opcode::GtString
                | Opcode::GteString
                | Opcode::EqChar
                | Opcode::NeqChar
                | Opcode::LtChar
                | Opcode::LteChar
                | Opcode::GtChar
                | Opcode::GteChar
                | Opcode::EqBool
                | Opcode::NeqBool
                | Opcode::EqGeneric
                | Opcode::NeqGeneric) => {
                    self.exec_binary(op, &mut stack)?;
                }

                op @ (Opcode::PushTuple
                | Opcode::PushTupleComponent
                | Opcode::PushArray
                | Opcode::ArrayIndex
                | Opcode::ArraySlice
                | Opcode::PushCustom
                | Opcode::PushConstructorComponent
                | Opcode::PushConstructorTag) => {
                    self.exec_collection(op, code, &mut frames, &mut stack)?;
                }

                Opcode::CallBuiltin => {
                    let id = self.fetch_u32(code, &mut frames);
                    let arity = self.fetch_u32(code, &mut frames);
                    let mut args = Vec::with_capacity(arity as usize);
                    for _ in 0..arity {
                        args.push(stack.pop().expect("CallBuiltin argument"));
                    }
                    args.reverse();
                    let result = crate::builtins::call(id, args, self.heap, self.interns)?;
                    stack.push(result);
                }

                Opcode::Print | Opcode::PrintI32 | Opcode::PrintF32 | Opcode::PrintBool | Opcode::PrintChar | Opcode::PrintUnit => {
                    let v = stack.pop().expect("print operand");
                    print!("{}", self.render(&v));
                    v.drop_with_heap(self.heap);
                }
                Opcode::Println => {
                    let v = stack.pop().expect("println operand");
                    println!("{}", self.render(&v));
                    v.drop_with_heap(self.heap);
                }
            }
        }
    }

    /// Runs a mark-sweep pass rooted at the operand stack, every active
    /// call frame's locals, and every loaded import's package frame (spec.md
    /// §4.5, "GC ... every value reachable from the operand stack and every
    /// package frame remains allocated"). Refcounting (`inc_ref`/`dec_ref`)
    /// frees acyclic garbage immediately; this sweep is what reclaims the
    /// reference cycles refcounting alone can never collect.
    fn collect_garbage(&mut self, stack: &[Value], frames: &[CallFrame]) {
        let frame_roots: Vec<Value> =
            frames.iter().map(|f| Value::Ref(f.locals)).chain(self.imports.iter().map(|p| Value::Ref(p.frame))).collect();
        let mut roots: Vec<&Value> = stack.iter().collect();
        roots.extend(frame_roots.iter());
        self.heap.collect(&roots);
        self.tracer.on_gc_sweep();
    }

    fn check_recursion(&self, depth: usize) -> Result<(), RunError> {
        if depth >= self.max_recursion_depth { Err(RunError::RecursionLimitExceeded) } else { Ok(()) }
    }

    fn locals_at_depth(&self, frames: &[CallFrame], mut depth: u32) -> crate::heap::HeapId {
        let mut id = frames.last().expect("present").locals;
        while depth > 0 {
            let HeapData::Frame { enclosing, .. } = self.heap.get(id) else {
                panic!("Load/Store depth walked into a non-Frame heap object")
            };
            id = enclosing.expect("Load/Store depth exceeds the actual closure-capture chain");
            depth -= 1;
        }
        id
    }

    fn read_slot(&mut self, frame_id: crate::heap::HeapId, slot: u32) -> Value {
        let HeapData::Frame { slots, .. } = self.heap.get(frame_id) else { panic!("Load target is not a Frame") };
        let copy = slots[slot as usize].shallow_copy();
        if let Value::Ref(id) = copy {
            self.heap.inc_ref(id);
        }
        copy
    }

    fn write_slot(&mut self, frame_id: crate::heap::HeapId, slot: u32, value: Value) {
        let HeapData::Frame { slots, .. } = self.heap.get_mut(frame_id) else { panic!("Store target is not a Frame") };
        let slot = slot as usize;
        if slot >= slots.len() {
            slots.resize_with(slot + 1, || Value::Unit);
        }
        let old = std::mem::replace(&mut slots[slot], value);
        old.drop_with_heap(self.heap);
    }

    fn dec_ref_frame(&mut self, id: crate::heap::HeapId) {
        self.heap.dec_ref(id);
    }

    fn render(&self, v: &Value) -> String {
        match v {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Str(string_id) => self.interns.get(*string_id).to_owned(),
                HeapData::Float(f) => f.to_string(),
                _ => v.to_string(),
            },
            other => other.to_string(),
        }
    }

    // --- operand fetch helpers, shared by the arithmetic/collections exec
    // functions which need to read the same typed immediates ---

    pub(super) fn fetch_u8(&self, code: &Code, frames: &mut [CallFrame]) -> u8 {
        let frame = frames.last_mut().expect("present");
        let v = code.bytecode[frame.ip];
        frame.ip += 1;
        v
    }

    pub(super) fn fetch_u32(&self, code: &Code, frames: &mut [CallFrame]) -> u32 {
        let frame = frames.last_mut().expect("present");
        let v = u32::from_be_bytes(code.bytecode[frame.ip..frame.ip + 4].try_into().expect("4 bytes"));
        frame.ip += 4;
        v
    }

    pub(super) fn fetch_i32(&self, code: &Code, frames: &mut [CallFrame]) -> i32 {
        let frame = frames.last_mut().expect("present");
        let v = i32::from_be_bytes(code.bytecode[frame.ip..frame.ip + 4].try_into().expect("4 bytes"));
        frame.ip += 4;
        v
    }

    pub(super) fn fetch_f32(&self, code: &Code, frames: &mut [CallFrame]) -> f32 {
        let frame = frames.last_mut().expect("present");
        let v = f32::from_be_bytes(code.bytecode[frame.ip..frame.ip + 4].try_into().expect("4 bytes"));
        frame.ip += 4;
        v
    }

    pub(super) fn fetch_string(&self, code: &Code, frames: &mut [CallFrame]) -> String {
        let len = self.fetch_u32(code, frames) as usize;
        let frame = frames.last_mut().expect("present");
        let bytes = &code.bytecode[frame.ip..frame.ip + len];
        frame.ip += len;
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn fetch_u32_pair(&self, code: &Code, frames: &mut [CallFrame]) -> (u32, u32) {
        (self.fetch_u32(code, frames), self.fetch_u32(code, frames))
    }

    fn fetch_u32_triple(&self, code: &Code, frames: &mut [CallFrame]) -> (u32, u32, u32) {
        (self.fetch_u32(code, frames), self.fetch_u32(code, frames), self.fetch_u32(code, frames))
    }

    fn fetch_i32_u32(&self, code: &Code, frames: &mut [CallFrame]) -> (i32, u32) {
        (self.fetch_i32(code, frames), self.fetch_u32(code, frames))
    }

    fn fetch_i32_u32_u32(&self, code: &Code, frames: &mut [CallFrame]) -> (i32, u32, u32) {
        (self.fetch_i32(code, frames), self.fetch_u32(code, frames), self.fetch_u32(code, frames))
    }
}
