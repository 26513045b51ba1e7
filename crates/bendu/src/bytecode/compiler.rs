//! Lowers a typed module into bytecode plus an export/dependency table
//! (spec.md §4.3 "Bytecode Compiler").
//!
//! Grounded on the teacher's `bytecode/compiler.rs` AST-walking-emitter
//! shape (one method per expression form, delegating immediate emission to
//! `CodeBuilder`) but driven here by [`crate::infer::Inferencer::expr_types`]
//! rather than a tree that carries its own type annotations inline, since
//! `ast.rs` intentionally stays a plain surface AST (spec.md §1: the
//! lexer/parser are external collaborators, and the typed-AST contract in
//! §4.1 is satisfied by this side table instead of a second tree type).

use ahash::AHashMap;

use crate::{
    ast::{BinOp, Expr, ExprKind, Item, Literal, MatchArm, Module, Pattern, Span},
    bytecode::{
        builder::{Code, CodeBuilder, JumpLabel},
        op::Opcode,
    },
    error::CompileError,
    infer::ModuleTypes,
    types::{BOOL, CHAR, FLOAT, INT, STRING, Scheme, Ty},
    types_registry::AdtRegistry,
};

/// One exported `let`/`fn`/`type` entry, textualized by `signature.rs`
/// (spec.md §6 "Signature file", §4.3 "Export encoding").
#[derive(Debug, Clone, PartialEq)]
pub enum Export {
    Let { name: String, mutable: bool, scheme: String, frame_offset: u32 },
    Fn { name: String, mutable: bool, scheme: String, code_offset: u32, frame_offset: Option<u32> },
    Type { name: String, params: Vec<String>, ctors: Vec<(String, u32)> },
}

/// Resolves a `module.field` call expression to a builtin id (spec.md §4.6,
/// "Initial set"). Not a general module system — Bendu has no user-defined
/// modules exposing functions this way, so `string` is recognized here as
/// the one reserved builtin namespace rather than looked up as a binding.
fn builtin_id(module: &str, field: &str) -> Option<u32> {
    match (module, field) {
        ("string", "length") => Some(crate::builtins::STRING_LENGTH),
        ("string", "at") => Some(crate::builtins::STRING_AT),
        _ => None,
    }
}

/// Builds the `Internal` compile error for a binding the compiler's own
/// lexical-scope tracking lost — an invariant breach, since `infer.rs`
/// would have already reported `UnknownIdentifier` for a truly absent name.
fn unresolved_binding(name: &str, span: Span) -> CompileError {
    CompileError::Internal { message: format!("{span}: unresolved binding `{name}`") }
}

/// The result of compiling one module: everything `cache.rs` writes to disk
/// (spec.md §4.4 "Package Cache").
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub imports: Vec<String>,
    pub code: Code,
    pub exports: Vec<Export>,
}

/// One lexical frame: top-level package scope, or one nested function body.
/// Plain (non-lambda) `let`s append slots to the *current* frame rather
/// than pushing a new one (spec.md §4.3: "Let-bindings inside functions
/// become `STORE 0 i`").
#[derive(Debug, Default)]
struct Frame {
    /// `(name, slot)`, most recently bound last so shadowing resolves by
    /// scanning from the end.
    names: Vec<(String, u32)>,
    next_slot: u32,
}

impl Frame {
    fn declare(&mut self, name: &str) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.names.push((name.to_owned(), slot));
        slot
    }

    fn find(&self, name: &str) -> Option<u32> {
        self.names.iter().rev().find(|(n, _)| n == name).map(|(_, s)| *s)
    }
}

/// A top-level function compiled as a genuine code offset rather than a
/// runtime closure, so direct calls use `CALL offset arity depth=0` instead
/// of `PUSH_CLOSURE` + `CALL_CLOSURE` (spec.md §4.3, "Calling conventions").
struct TopLevelFn {
    arity: u32,
    frame_slot: u32,
    code_offset: Option<u32>,
}

pub struct Compiler<'a> {
    builder: CodeBuilder,
    frames: Vec<Frame>,
    top_level_fns: AHashMap<String, TopLevelFn>,
    /// Direct calls to a top-level function, recorded wherever they are
    /// compiled (init block or another function's body) and patched once
    /// every function offset is known (spec.md §4.3, "Calling
    /// conventions").
    pending_calls: Vec<(String, JumpLabel)>,
    expr_types: &'a AHashMap<Span, Ty>,
    adts: &'a AdtRegistry,
}

impl<'a> Compiler<'a> {
    pub fn new(expr_types: &'a AHashMap<Span, Ty>, adts: &'a AdtRegistry) -> Self {
        Self {
            builder: CodeBuilder::new(),
            frames: vec![Frame::default()],
            top_level_fns: AHashMap::new(),
            pending_calls: Vec::new(),
            expr_types,
            adts,
        }
    }

    /// Compiles a whole module, given the imports it declared and the types
    /// the inferencer already resolved for it.
    pub fn compile_module(mut self, module: &Module, module_types: &ModuleTypes) -> Result<CompiledModule, CompileError> {
        let imports: Vec<String> = module.items.iter().filter_map(|i| if let Item::Import(imp) = i { Some(imp.path.clone()) } else { None }).collect();

        // Pre-scan top-level `let`s so forward references between
        // functions resolve to a direct `CALL`, not an unresolved name.
        for item in &module.items {
            if let Item::Let(decl) = item
                && let ExprKind::Lambda { params, .. } = &decl.value.kind
            {
                let slot = self.frames[0].declare(&decl.name);
                self.top_level_fns.insert(decl.name.clone(), TopLevelFn { arity: params.len() as u32, frame_slot: slot, code_offset: None });
            }
        }

        let mut function_bodies: Vec<(String, &Expr)> = Vec::new();
        // Closure labels are patched once the function bodies below have
        // been emitted and their offsets are known; the push+store itself
        // must happen here, inside init, so a function used as a plain
        // value (passed on, returned) has its frame slot populated before
        // init's `RET` (spec.md §3: package loading runs to the first
        // `RET`, and never falls into code past it).
        let mut closure_labels = Vec::new();
        for item in &module.items {
            match item {
                Item::Let(decl) => {
                    if let ExprKind::Lambda { body, .. } = &decl.value.kind {
                        function_bodies.push((decl.name.clone(), body.as_ref()));
                        let f = self.top_level_fns.get(&decl.name).expect("declared in the pre-scan above");
                        let label = self.builder.emit_push_closure_placeholder(0);
                        self.builder.emit_frame_slot(Opcode::Store, 0, f.frame_slot);
                        closure_labels.push((decl.name.clone(), label));
                        continue;
                    }
                    let slot = self.frames[0].find(&decl.name).unwrap_or_else(|| self.frames[0].declare(&decl.name));
                    self.compile_expr(&decl.value)?;
                    self.builder.emit_frame_slot(Opcode::Store, 0, slot);
                }
                Item::Expr(expr) => {
                    self.compile_expr(expr)?;
                    self.builder.emit(Opcode::Discard);
                }
                Item::Type(_) | Item::Import(_) => {}
            }
        }
        self.builder.emit(Opcode::Ret);

        // Function bodies live after the init block's `RET`; init never
        // falls into them (only reached via `CALL`), matching "package
        // loading executes to the first RET" (spec.md §3, "Package").
        let mut offsets = AHashMap::new();
        for (name, body) in &function_bodies {
            let offset = self.builder.current_offset() as u32;
            offsets.insert(name.clone(), offset);
            self.frames.push(Frame::default());
            if let ExprKind::Lambda { params, .. } = &self.lambda_params_of(name, module) {
                for p in params {
                    self.frames.last_mut().expect("just pushed").declare(&p.name);
                }
            }
            self.compile_expr(body)?;
            self.builder.emit(Opcode::Ret);
            self.frames.pop();
        }
        for (name, offset) in &offsets {
            if let Some(f) = self.top_level_fns.get_mut(name) {
                f.code_offset = Some(*offset);
            }
        }
        for (name, label) in closure_labels {
            let offset = offsets[&name];
            self.builder.patch_jump_to(label, offset);
        }
        for (name, label) in std::mem::take(&mut self.pending_calls) {
            let offset = offsets.get(&name).copied().unwrap_or_else(|| self.top_level_fns[&name].code_offset.unwrap_or_default());
            self.builder.patch_jump_to(label, offset);
        }

        let exports = self.build_exports(module, module_types);
        Ok(CompiledModule { imports, code: self.builder.build(), exports })
    }

    fn lambda_params_of<'m>(&self, name: &str, module: &'m Module) -> ExprKind {
        for item in &module.items {
            if let Item::Let(decl) = item
                && decl.name == name
                && let lam @ ExprKind::Lambda { .. } = &decl.value.kind
            {
                return lam.clone();
            }
        }
        unreachable!("function body scheduled without a matching top-level let")
    }

    fn build_exports(&self, module: &Module, module_types: &ModuleTypes) -> Vec<Export> {
        let mut exports = Vec::new();
        for inferred in &module_types.lets {
            if !inferred.public {
                continue;
            }
            let scheme_text = scheme_to_text(&inferred.scheme);
            if let Some(f) = self.top_level_fns.get(&inferred.name) {
                exports.push(Export::Fn {
                    name: inferred.name.clone(),
                    mutable: false,
                    scheme: scheme_text,
                    code_offset: f.code_offset.unwrap_or_default(),
                    frame_offset: Some(f.frame_slot),
                });
            } else if let Some(slot) = self.frames[0].find(&inferred.name) {
                exports.push(Export::Let { name: inferred.name.clone(), mutable: false, scheme: scheme_text, frame_offset: slot });
            }
        }
        for item in &module.items {
            if let Item::Type(crate::ast::TypeDecl::Adt { name, params, .. }) = item
                && let Some(def) = self.adts.get(name)
            {
                let ctors = def.ctors.iter().map(|c| (c.name.clone(), c.id)).collect();
                exports.push(Export::Type { name: name.clone(), params: params.clone(), ctors });
            }
        }
        exports
    }

    fn lookup(&self, name: &str, span: Span) -> Result<(u32, u32), CompileError> {
        for (depth_from_top, frame) in self.frames.iter().rev().enumerate() {
            if let Some(slot) = frame.find(name) {
                return Ok((depth_from_top as u32, slot));
            }
        }
        Err(unresolved_binding(name, span))
    }

    fn ty_of(&self, span: Span) -> Ty {
        self.expr_types.get(&span).cloned().unwrap_or(Ty::Var(crate::types::TyVar(u32::MAX)))
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Literal(lit) => self.compile_literal(lit),
            ExprKind::Var(name) => self.compile_var(name, expr.span)?,
            ExprKind::Binary(op, lhs, rhs) => self.compile_binary(*op, lhs, rhs)?,
            ExprKind::Not(inner) => {
                self.compile_expr(inner)?;
                self.builder.emit(Opcode::NotBool);
            }
            ExprKind::Apply(callee, args) => self.compile_apply(callee, args)?,
            ExprKind::Lambda { params, body } => {
                // A lambda appearing outside a top-level `let` binding: a
                // genuine runtime closure over the current frame.
                let offset = self.compile_closure_body(params, body)?;
                self.builder.emit_push_closure(0, offset);
            }
            ExprKind::Let { name, value, body, .. } => {
                self.compile_expr(value)?;
                let slot = self.frames.last_mut().expect("a frame is always open").declare(name);
                self.builder.emit_frame_slot(Opcode::Store, 0, slot);
                self.compile_expr(body)?;
            }
            ExprKind::If { cond, then, otherwise } => {
                self.compile_expr(cond)?;
                let else_label = self.builder.emit_jump(Opcode::JmpFalse);
                self.compile_expr(then)?;
                let end_label = self.builder.emit_jump(Opcode::Jmp);
                self.builder.patch_jump(else_label);
                self.compile_expr(otherwise)?;
                self.builder.patch_jump(end_label);
            }
            ExprKind::Match { scrutinee, arms } => self.compile_match(scrutinee, arms)?,
            ExprKind::Tuple(elems) => {
                for e in elems {
                    self.compile_expr(e)?;
                }
                self.builder.emit_u32(Opcode::PushTuple, elems.len() as u32);
            }
            ExprKind::ArrayLit(elems) => {
                for e in elems {
                    self.compile_expr(e)?;
                }
                self.builder.emit_u32(Opcode::PushArray, elems.len() as u32);
            }
            ExprKind::ArrayIndex(array, index) => {
                self.compile_expr(array)?;
                self.compile_expr(index)?;
                self.builder.emit(Opcode::ArrayIndex);
            }
            ExprKind::ArraySlice { array, from, to } => {
                self.compile_expr(array)?;
                match from {
                    Some(e) => self.compile_expr(e)?,
                    None => self.builder.emit_i32(Opcode::PushI32Literal, 0),
                }
                match to {
                    Some(e) => self.compile_expr(e)?,
                    None => self.builder.emit_i32(Opcode::PushI32Literal, -1),
                }
                self.builder.emit(Opcode::ArraySlice);
            }
            ExprKind::RecordLit { fields, spread } => self.compile_record_lit(fields, spread.as_deref(), expr.span)?,
            ExprKind::FieldAccess(record, field) => self.compile_field_access(record, field)?,
            ExprKind::Annotated(inner, _) => self.compile_expr(inner)?,
            ExprKind::Block(stmts) => {
                let Some((last, init)) = stmts.split_last() else {
                    self.builder.emit(Opcode::PushUnitLiteral);
                    return Ok(());
                };
                for stmt in init {
                    self.compile_expr(stmt)?;
                    self.builder.emit(Opcode::Discard);
                }
                self.compile_expr(last)?;
            }
        }
        Ok(())
    }

    fn compile_literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Int(n) => self.builder.emit_i32(Opcode::PushI32Literal, *n),
            Literal::Float(f) => self.builder.emit_f32(Opcode::PushF32Literal, *f),
            Literal::Char(c) => self.builder.emit_u8(Opcode::PushU8Literal, *c),
            Literal::String(s) => self.builder.emit_string(Opcode::PushStringLiteral, s),
            Literal::Bool(true) => self.builder.emit(Opcode::PushBoolTrue),
            Literal::Bool(false) => self.builder.emit(Opcode::PushBoolFalse),
            Literal::Unit => self.builder.emit(Opcode::PushUnitLiteral),
        }
    }

    fn compile_var(&mut self, name: &str, span: Span) -> Result<(), CompileError> {
        // A nullary constructor used bare (e.g. `None`) builds its `Custom`
        // value directly; constructors with fields only reach here as the
        // callee of an `Apply`, handled in `compile_apply`.
        if let Some((_, ctor)) = self.adts.find_ctor(name)
            && ctor.fields.is_empty()
        {
            self.builder.emit_push_custom(name, ctor.id, 0);
            return Ok(());
        }
        let (depth, slot) = self.lookup(name, span)?;
        self.builder.emit_frame_slot(Opcode::Load, depth, slot);
        Ok(())
    }

    fn compile_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<(), CompileError> {
        if matches!(op, BinOp::And | BinOp::Or) {
            self.compile_expr(lhs)?;
            let short_circuit_op = if op == BinOp::And { Opcode::JmpDupFalse } else { Opcode::JmpDupTrue };
            let label = self.builder.emit_jump(short_circuit_op);
            self.builder.emit(Opcode::Discard);
            self.compile_expr(rhs)?;
            self.builder.patch_jump(label);
            return Ok(());
        }

        self.compile_expr(lhs)?;
        self.compile_expr(rhs)?;
        let operand_ty = self.ty_of(lhs.span);
        let opcode = arithmetic_or_comparison_opcode(op, &operand_ty);
        self.builder.emit(opcode);
        Ok(())
    }

    fn compile_apply(&mut self, callee: &Expr, args: &[Expr]) -> Result<(), CompileError> {
        if let ExprKind::FieldAccess(base, field) = &callee.kind
            && let ExprKind::Var(module) = &base.kind
            && let Some(id) = builtin_id(module, field)
        {
            for a in args {
                self.compile_expr(a)?;
            }
            self.builder.emit_u32_pair(Opcode::CallBuiltin, id, args.len() as u32);
            return Ok(());
        }
        if let ExprKind::Var(name) = &callee.kind
            && let Some((_, ctor)) = self.adts.find_ctor(name)
        {
            let id = ctor.id;
            for a in args {
                self.compile_expr(a)?;
            }
            self.builder.emit_push_custom(name, id, args.len() as u32);
            return Ok(());
        }
        if let ExprKind::Var(name) = &callee.kind
            && let Some(f) = self.top_level_fns.get(name)
        {
            let arity = f.arity;
            for a in args {
                self.compile_expr(a)?;
            }
            // Top-level functions are never closures: the callee's own
            // frame has no enclosing link, so `depth` is always 0
            // regardless of how deeply nested the call site is.
            let label = self.builder.emit_call_placeholder(arity, 0);
            self.pending_calls.push((name.clone(), label));
            return Ok(());
        }
        self.compile_expr(callee)?;
        for a in args {
            self.compile_expr(a)?;
        }
        self.builder.emit_u32(Opcode::CallClosure, args.len() as u32);
        Ok(())
    }

    /// Compiles a closure body into the function area, returning its entry
    /// offset. Used for lambdas that are not directly the value of a
    /// top-level `let` (those are handled as genuine top-level functions in
    /// [`Compiler::compile_module`]).
    fn compile_closure_body(&mut self, params: &[crate::ast::Param], body: &Expr) -> Result<u32, CompileError> {
        let skip = self.builder.emit_jump(Opcode::Jmp);
        let offset = self.builder.current_offset() as u32;
        self.frames.push(Frame::default());
        for p in params {
            self.frames.last_mut().expect("just pushed").declare(&p.name);
        }
        self.compile_expr(body)?;
        self.builder.emit(Opcode::Ret);
        self.frames.pop();
        self.builder.patch_jump(skip);
        Ok(offset)
    }

    fn compile_record_lit(&mut self, fields: &[(String, Expr)], spread: Option<&Expr>, span: Span) -> Result<(), CompileError> {
        let order = self.record_field_order(span);
        let mut by_name: AHashMap<&str, &Expr> = fields.iter().map(|(n, e)| (n.as_str(), e)).collect();
        if let Some(spread) = spread {
            // Evaluated for side effects and discarded: the compiler's
            // canonical-tuple encoding has no spare row-variable slots to
            // carry the spread's extra fields at runtime (they are only
            // meaningful to the static row type).
            self.compile_expr(spread)?;
            self.builder.emit(Opcode::Discard);
        }
        for name in &order {
            let Some(field_expr) = by_name.remove(name.as_str()) else {
                return Err(unresolved_binding(name, span));
            };
            self.compile_expr(field_expr)?;
        }
        self.builder.emit_u32(Opcode::PushTuple, order.len() as u32);
        Ok(())
    }

    fn compile_field_access(&mut self, record: &Expr, field: &str) -> Result<(), CompileError> {
        self.compile_expr(record)?;
        let order = self.record_field_order(record.span);
        let index = order.iter().position(|f| f == field).unwrap_or(0);
        self.builder.emit_u32(Opcode::PushTupleComponent, index as u32);
        Ok(())
    }

    /// Canonical, alphabetical field order for the record type at `span`
    /// (there is no runtime `Record` heap kind — spec.md §3 lists only
    /// `Array`/`Tuple`/`Custom`/`Closure`/`Frame`/`String`/`Float` heap
    /// objects — so records are laid out as tuples keyed on this order,
    /// shared between construction and field access).
    fn record_field_order(&self, span: Span) -> Vec<String> {
        match self.expr_types.get(&span) {
            Some(Ty::Record { fields, .. }) => {
                let mut names: Vec<String> = fields.keys().cloned().collect();
                names.sort();
                names
            }
            _ => Vec::new(),
        }
    }

    fn compile_match(&mut self, scrutinee: &Expr, arms: &[MatchArm]) -> Result<(), CompileError> {
        self.compile_expr(scrutinee)?;
        let mut end_labels = Vec::new();
        for (i, arm) in arms.iter().enumerate() {
            let is_last = i == arms.len() - 1;
            // Non-last arms test a duplicate of the scrutinee, preserving
            // one copy for the arms after it if the test fails; the last
            // arm is assumed exhaustive (proven at type-check time) and
            // consumes the scrutinee directly, with no duplicate to test.
            let next_label = if is_last {
                None
            } else {
                self.builder.emit(Opcode::Dup);
                Some(self.compile_pattern_test(&arm.pattern))
            };
            self.compile_pattern_bindings(&arm.pattern);
            if let Some(guard) = &arm.guard {
                self.compile_expr(guard)?;
                let guard_fail = self.builder.emit_jump(Opcode::JmpFalse);
                self.builder.emit(Opcode::Discard); // drop the scrutinee copy before yielding the arm's value
                self.compile_expr(&arm.body)?;
                end_labels.push(self.builder.emit_jump(Opcode::Jmp));
                self.builder.patch_jump(guard_fail);
            } else {
                self.builder.emit(Opcode::Discard);
                self.compile_expr(&arm.body)?;
                end_labels.push(self.builder.emit_jump(Opcode::Jmp));
            }
            if let Some(label) = next_label {
                self.builder.patch_jump(label);
            }
        }
        for label in end_labels {
            self.builder.patch_jump(label);
        }
        Ok(())
    }

    /// Emits a test against the duplicated scrutinee on top of the stack;
    /// returns a jump label taken to the *next* arm when it fails to match.
    /// Full Maranget-style specialization lives in `exhaustiveness.rs`
    /// (type-checking time); at codegen time a pattern only needs a linear
    /// match/no-match test since exhaustiveness is already proven.
    fn compile_pattern_test(&mut self, pattern: &Pattern) -> JumpLabel {
        match pattern {
            Pattern::Wildcard | Pattern::Var(_) => {
                // Always matches: discard the duplicated scrutinee (so the
                // stack stays balanced with the branches that actually
                // compare it) and push `true` as the "guard" condition.
                self.builder.emit(Opcode::Discard);
                self.builder.emit(Opcode::PushBoolTrue);
                self.builder.emit_jump(Opcode::JmpFalse)
            }
            Pattern::Literal(Literal::Int(n)) => {
                self.builder.emit_i32(Opcode::PushI32Literal, *n);
                self.builder.emit(Opcode::EqI32);
                self.builder.emit_jump(Opcode::JmpFalse)
            }
            Pattern::Literal(Literal::Float(f)) => {
                self.builder.emit_f32(Opcode::PushF32Literal, *f);
                self.builder.emit(Opcode::EqF32);
                self.builder.emit_jump(Opcode::JmpFalse)
            }
            Pattern::Literal(Literal::Char(c)) => {
                self.builder.emit_u8(Opcode::PushU8Literal, *c);
                self.builder.emit(Opcode::EqChar);
                self.builder.emit_jump(Opcode::JmpFalse)
            }
            Pattern::Literal(Literal::String(s)) => {
                self.builder.emit_string(Opcode::PushStringLiteral, s);
                self.builder.emit(Opcode::EqString);
                self.builder.emit_jump(Opcode::JmpFalse)
            }
            Pattern::Literal(Literal::Bool(b)) => {
                self.builder.emit(if *b { Opcode::PushBoolTrue } else { Opcode::PushBoolFalse });
                self.builder.emit(Opcode::EqBool);
                self.builder.emit_jump(Opcode::JmpFalse)
            }
            Pattern::Literal(Literal::Unit) => {
                // `Unit` has exactly one value: no comparison needed beyond
                // discarding the scrutinee copy this test was handed.
                self.builder.emit(Opcode::Discard);
                self.builder.emit(Opcode::PushBoolTrue);
                self.builder.emit_jump(Opcode::JmpFalse)
            }
            Pattern::Constructor { name, .. } => {
                let ctor_id = self.adts.find_ctor(name).map_or(u32::MAX, |(_, c)| c.id);
                self.builder.emit(Opcode::PushConstructorTag);
                self.builder.emit_i32(Opcode::PushI32Literal, ctor_id as i32);
                self.builder.emit(Opcode::EqI32);
                self.builder.emit_jump(Opcode::JmpFalse)
            }
            Pattern::Tuple(_) | Pattern::Record { .. } | Pattern::Annotated(..) => {
                // Shape is guaranteed by inference; no runtime test needed
                // beyond what nested component patterns perform when bound.
                self.builder.emit(Opcode::Discard);
                self.builder.emit(Opcode::PushBoolTrue);
                self.builder.emit_jump(Opcode::JmpFalse)
            }
        }
    }

    /// Emits `STORE`s for every variable a pattern introduces, consuming a
    /// duplicate of the scrutinee already proven (by `compile_pattern_test`)
    /// to match its shape.
    fn compile_pattern_bindings(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Wildcard | Pattern::Literal(_) => {}
            Pattern::Var(name) => {
                let slot = self.frames.last_mut().expect("a frame is always open").declare(name);
                self.builder.emit(Opcode::Dup);
                self.builder.emit_frame_slot(Opcode::Store, 0, slot);
            }
            Pattern::Tuple(elems) => {
                for (i, elem) in elems.iter().enumerate() {
                    if matches!(elem, Pattern::Wildcard | Pattern::Literal(_)) {
                        continue;
                    }
                    self.builder.emit(Opcode::Dup);
                    self.builder.emit_u32(Opcode::PushTupleComponent, i as u32);
                    self.bind_component(elem);
                }
            }
            Pattern::Record { fields, .. } => {
                for (i, (_, sub)) in fields.iter().enumerate() {
                    self.builder.emit(Opcode::Dup);
                    self.builder.emit_u32(Opcode::PushTupleComponent, i as u32);
                    self.bind_component(sub);
                }
            }
            Pattern::Constructor { args, .. } => {
                for (i, arg) in args.iter().enumerate() {
                    if matches!(arg, Pattern::Wildcard | Pattern::Literal(_)) {
                        continue;
                    }
                    self.builder.emit(Opcode::Dup);
                    self.builder.emit_u32(Opcode::PushConstructorComponent, i as u32);
                    self.bind_component(arg);
                }
            }
            Pattern::Annotated(inner, _) => self.compile_pattern_bindings(inner),
        }
    }

    /// Binds the value already pushed by the caller (a projected component)
    /// to whatever `pattern` names, then discards it if the pattern itself
    /// introduces no new binding at this level.
    fn bind_component(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Var(name) => {
                let slot = self.frames.last_mut().expect("a frame is always open").declare(name);
                self.builder.emit_frame_slot(Opcode::Store, 0, slot);
            }
            Pattern::Wildcard | Pattern::Literal(_) => self.builder.emit(Opcode::Discard),
            other => {
                self.compile_pattern_bindings(other);
                self.builder.emit(Opcode::Discard);
            }
        }
    }
}

/// Renders a scheme as the signature-file grammar's scheme text (spec.md
/// §6: "universally-quantified variables inferred and rendered as
/// lowercase letters"). Full alias/union/record pretty-printing is already
/// carried by `Ty`'s `Display`; this only needs to pick readable names for
/// the quantified variables before delegating.
pub(crate) fn scheme_to_text(scheme: &Scheme) -> String {
    if scheme.quantified.is_empty() {
        return scheme.body.to_string();
    }
    let names: AHashMap<crate::types::TyVar, String> =
        scheme.quantified.iter().enumerate().map(|(i, v)| (*v, quantified_var_name(i))).collect();
    render_with_var_names(&scheme.body, &names)
}

fn quantified_var_name(index: usize) -> String {
    let letter = (b'a' + (index % 26) as u8) as char;
    if index < 26 { letter.to_string() } else { format!("{letter}{}", index / 26) }
}

/// A display-only substitution: renders `Ty::Var`s present in `names` using
/// their assigned letters, deferring everything else to `Ty`'s own
/// `Display` impl by first replacing those variables structurally.
fn render_with_var_names(ty: &Ty, names: &AHashMap<crate::types::TyVar, String>) -> String {
    fn rename(ty: &Ty, names: &AHashMap<crate::types::TyVar, String>) -> Ty {
        match ty {
            Ty::Var(v) => names.get(v).map_or_else(|| ty.clone(), |n| Ty::Con(n.clone(), Vec::new())),
            Ty::Con(name, args) => Ty::Con(name.clone(), args.iter().map(|a| rename(a, names)).collect()),
            Ty::Alias(name, args) => Ty::Alias(name.clone(), args.iter().map(|a| rename(a, names)).collect()),
            Ty::Arr(domains, range) => Ty::Arr(domains.iter().map(|d| rename(d, names)).collect(), Box::new(rename(range, names))),
            Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| rename(e, names)).collect()),
            Ty::Record { fields, rest } => {
                Ty::Record { fields: fields.iter().map(|(k, v)| (k.clone(), rename(v, names))).collect(), rest: *rest }
            }
            Ty::Union(members) => Ty::Union(members.iter().map(|m| rename(m, names)).collect()),
            Ty::Intersect(members) => Ty::Intersect(members.iter().map(|m| rename(m, names)).collect()),
            Ty::LitString(s) => Ty::LitString(s.clone()),
            Ty::Recursive { var, body } => Ty::Recursive { var: *var, body: Box::new(rename(body, names)) },
        }
    }
    rename(ty, names).to_string()
}

/// Picks the monomorphic opcode for a binary operator once inference has
/// fixed an operand's type, falling back to the generic comparison ops for
/// `eq`/`neq` on still-polymorphic operands (spec.md §4.3, "Instruction
/// selection").
fn arithmetic_or_comparison_opcode(op: BinOp, operand_ty: &Ty) -> Opcode {
    let primitive = match operand_ty {
        Ty::Con(name, _) => name.as_str(),
        _ => "",
    };
    use BinOp::*;
    match (op, primitive) {
        (Add, INT) => Opcode::AddI32,
        (Sub, INT) => Opcode::SubI32,
        (Mul, INT) => Opcode::MulI32,
        (Div, INT) => Opcode::DivI32,
        (Mod, INT) => Opcode::ModI32,
        (Add, FLOAT) => Opcode::AddF32,
        (Sub, FLOAT) => Opcode::SubF32,
        (Mul, FLOAT) => Opcode::MulF32,
        (Div, FLOAT) => Opcode::DivF32,
        (Add, STRING) => Opcode::AddString,
        (Add, CHAR) => Opcode::AddChar,
        (Eq, INT) => Opcode::EqI32,
        (Neq, INT) => Opcode::NeqI32,
        (Lt, INT) => Opcode::LtI32,
        (Lte, INT) => Opcode::LteI32,
        (Gt, INT) => Opcode::GtI32,
        (Gte, INT) => Opcode::GteI32,
        (Eq, FLOAT) => Opcode::EqF32,
        (Neq, FLOAT) => Opcode::NeqF32,
        (Lt, FLOAT) => Opcode::LtF32,
        (Lte, FLOAT) => Opcode::LteF32,
        (Gt, FLOAT) => Opcode::GtF32,
        (Gte, FLOAT) => Opcode::GteF32,
        (Eq, STRING) => Opcode::EqString,
        (Neq, STRING) => Opcode::NeqString,
        (Lt, STRING) => Opcode::LtString,
        (Lte, STRING) => Opcode::LteString,
        (Gt, STRING) => Opcode::GtString,
        (Gte, STRING) => Opcode::GteString,
        (Eq, CHAR) => Opcode::EqChar,
        (Neq, CHAR) => Opcode::NeqChar,
        (Lt, CHAR) => Opcode::LtChar,
        (Lte, CHAR) => Opcode::LteChar,
        (Gt, CHAR) => Opcode::GtChar,
        (Gte, CHAR) => Opcode::GteChar,
        (Eq, BOOL) => Opcode::EqBool,
        (Neq, BOOL) => Opcode::NeqBool,
        (Eq, _) => Opcode::EqGeneric,
        (Neq, _) => Opcode::NeqGeneric,
        _ => Opcode::EqGeneric,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{Expr, ExprKind, LetDecl, Literal, Span},
        env::TypeEnv,
        infer::Inferencer,
    };

    fn compile_one_module(module: Module) -> (CompiledModule, AHashMap<Span, Ty>, AdtRegistry) {
        let mut env = TypeEnv::new();
        let mut inferencer = Inferencer::new(&mut env);
        let module_types = inferencer.infer_module(&module);
        assert!(inferencer.diagnostics.errors.is_empty(), "{:?}", inferencer.diagnostics.errors);
        let expr_types = inferencer.expr_types.clone();
        let adts = std::mem::take(&mut env.adts);
        let compiler = Compiler::new(&expr_types, &adts);
        (compiler.compile_module(&module, &module_types).unwrap(), expr_types, adts)
    }

    #[test]
    fn a_public_int_let_exports_a_frame_offset() {
        let module = Module {
            items: vec![Item::Let(LetDecl {
                name: "answer".to_owned(),
                mutable: false,
                public: true,
                recursive: false,
                annotation: None,
                value: Expr::new(ExprKind::Literal(Literal::Int(42)), Span::new(0, 2)),
                span: Span::new(0, 2),
            })],
        };
        let (compiled, _, _) = compile_one_module(module);
        assert!(matches!(compiled.exports.as_slice(), [Export::Let { name, frame_offset: 0, .. }] if name == "answer"));
        assert!(!compiled.code.bytecode.is_empty());
    }

    #[test]
    fn a_public_function_exports_a_code_offset() {
        let module = Module {
            items: vec![Item::Let(LetDecl {
                name: "identity".to_owned(),
                mutable: false,
                public: true,
                recursive: false,
                annotation: None,
                value: Expr::new(
                    ExprKind::Lambda {
                        params: vec![crate::ast::Param { name: "x".to_owned(), annotation: None, span: Span::new(0, 1) }],
                        body: Box::new(Expr::new(ExprKind::Var("x".to_owned()), Span::new(2, 3))),
                    },
                    Span::new(0, 3),
                ),
                span: Span::new(0, 3),
            })],
        };
        let (compiled, _, _) = compile_one_module(module);
        assert!(matches!(compiled.exports.as_slice(), [Export::Fn { name, .. }] if name == "identity"));
    }
}
