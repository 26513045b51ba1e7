//! End-to-end pipeline tests (spec.md §8, "End-to-end scenarios").
//!
//! No parser exists in this tree (spec.md §1/§6: the lexer/parser is an
//! external collaborator), so each scenario builds the `ast::Module` the
//! parser would otherwise have produced, runs it through inference and
//! compilation exactly as `bendu-cli`'s `compile_with_import_opt` does, then
//! executes the resulting bytecode.

use ahash::AHashMap;
use bendu::{
    ast::{BinOp, Expr, ExprKind, Item, LetDecl, Literal, Module, Param, Span},
    bytecode::{Compiler, Opcode, Vm, VmOutcome},
    env::TypeEnv,
    heap::{Heap, HeapData},
    infer::Inferencer,
    intern::Interns,
    tracer::NoopTracer,
    value::Value,
};

fn lit_int(n: i32, span: Span) -> Expr {
    Expr::new(ExprKind::Literal(Literal::Int(n)), span)
}

/// Infers and compiles a single bare expression, returning its bytecode and
/// run result. Mirrors `bendu-cli`'s `compile_with_import_opt(None)` path.
fn run_expr(expr: Expr) -> (Vec<u8>, Value) {
    let module = Module { items: vec![Item::Expr(expr)] };
    let mut env = TypeEnv::new();
    let mut inferencer = Inferencer::new(&mut env);
    let module_types = inferencer.infer_module(&module);
    assert!(inferencer.diagnostics.errors.is_empty(), "{:?}", inferencer.diagnostics.errors);
    let expr_types = inferencer.expr_types.clone();
    let compiler = Compiler::new(&expr_types, &env.adts);
    let compiled = compiler.compile_module(&module, &module_types).unwrap();

    let mut heap = Heap::new();
    let mut interns = Interns::new();
    let mut vm = Vm::new(&mut heap, &mut interns, NoopTracer);
    let VmOutcome::Finished(value) = vm.run(&compiled.code).unwrap();
    (compiled.code.bytecode, value)
}

#[test]
fn scenario_1_int_addition() {
    let span = Span::new(0, 5);
    let expr = Expr::new(
        ExprKind::Binary(BinOp::Add, Box::new(lit_int(1, Span::new(0, 1))), Box::new(lit_int(2, Span::new(4, 5)))),
        span,
    );
    let (bytecode, value) = run_expr(expr);
    assert_eq!(bytecode.first(), Some(&(Opcode::PushI32Literal as u8)));
    assert!(bytecode.contains(&(Opcode::AddI32 as u8)));
    assert_eq!(value, Value::Int(3));
}

#[test]
fn scenario_2_boolean_short_circuit_and() {
    let span = Span::new(0, 14);
    let expr = Expr::new(
        ExprKind::Binary(
            BinOp::And,
            Box::new(Expr::new(ExprKind::Literal(Literal::Bool(true)), Span::new(0, 4))),
            Box::new(Expr::new(ExprKind::Literal(Literal::Bool(false)), Span::new(8, 13))),
        ),
        span,
    );
    let (bytecode, value) = run_expr(expr);
    assert!(bytecode.contains(&(Opcode::JmpDupFalse as u8)));
    assert_eq!(value, Value::Bool(false));
}

#[test]
fn scenario_3_function_call_through_a_let() {
    let inc_body = Expr::new(
        ExprKind::Binary(
            BinOp::Add,
            Box::new(Expr::new(ExprKind::Var("a".to_owned()), Span::new(0, 1))),
            Box::new(lit_int(1, Span::new(4, 5))),
        ),
        Span::new(0, 5),
    );
    let inc = LetDecl {
        name: "inc".to_owned(),
        mutable: false,
        public: false,
        recursive: false,
        annotation: None,
        value: Expr::new(
            ExprKind::Lambda { params: vec![Param { name: "a".to_owned(), annotation: None, span: Span::new(0, 1) }], body: Box::new(inc_body) },
            Span::new(0, 5),
        ),
        span: Span::new(0, 5),
    };
    let call = Expr::new(
        ExprKind::Apply(Box::new(Expr::new(ExprKind::Var("inc".to_owned()), Span::new(10, 13))), vec![lit_int(1, Span::new(14, 15))]),
        Span::new(10, 16),
    );
    let module = Module { items: vec![Item::Let(inc), Item::Expr(call)] };

    let mut env = TypeEnv::new();
    let mut inferencer = Inferencer::new(&mut env);
    let module_types = inferencer.infer_module(&module);
    assert!(inferencer.diagnostics.errors.is_empty(), "{:?}", inferencer.diagnostics.errors);
    let expr_types = inferencer.expr_types.clone();
    let compiler = Compiler::new(&expr_types, &env.adts);
    let compiled = compiler.compile_module(&module, &module_types).unwrap();
    assert!(compiled.code.bytecode.contains(&(Opcode::Call as u8)));

    let mut heap = Heap::new();
    let mut interns = Interns::new();
    let mut vm = Vm::new(&mut heap, &mut interns, NoopTracer);
    let VmOutcome::Finished(value) = vm.run(&compiled.code).unwrap();
    assert_eq!(value, Value::Int(2));
}

#[test]
fn scenario_4_let_bound_identity_generalizes_across_call_sites() {
    let id_decl = LetDecl {
        name: "id".to_owned(),
        mutable: false,
        public: false,
        recursive: false,
        annotation: None,
        value: Expr::new(
            ExprKind::Lambda {
                params: vec![Param { name: "x".to_owned(), annotation: None, span: Span::new(0, 1) }],
                body: Box::new(Expr::new(ExprKind::Var("x".to_owned()), Span::new(2, 3))),
            },
            Span::new(0, 3),
        ),
        span: Span::new(0, 3),
    };
    let tuple = Expr::new(
        ExprKind::Tuple(vec![
            Expr::new(ExprKind::Apply(Box::new(Expr::new(ExprKind::Var("id".to_owned()), Span::new(10, 12))), vec![lit_int(1, Span::new(13, 14))]), Span::new(10, 15)),
            Expr::new(
                ExprKind::Apply(
                    Box::new(Expr::new(ExprKind::Var("id".to_owned()), Span::new(17, 19))),
                    vec![Expr::new(ExprKind::Literal(Literal::String("a".to_owned())), Span::new(20, 23))],
                ),
                Span::new(17, 24),
            ),
        ]),
        Span::new(9, 25),
    );
    let module = Module { items: vec![Item::Let(id_decl), Item::Expr(tuple)] };

    let mut env = TypeEnv::new();
    let mut inferencer = Inferencer::new(&mut env);
    let module_types = inferencer.infer_module(&module);
    assert!(inferencer.diagnostics.errors.is_empty(), "{:?}", inferencer.diagnostics.errors);
    let expr_types = inferencer.expr_types.clone();
    let compiler = Compiler::new(&expr_types, &env.adts);
    let compiled = compiler.compile_module(&module, &module_types).unwrap();

    let mut heap = Heap::new();
    let mut interns = Interns::new();
    let mut vm = Vm::new(&mut heap, &mut interns, NoopTracer);
    let VmOutcome::Finished(value) = vm.run(&compiled.code).unwrap();
    let Value::Ref(id) = value else { panic!("expected a heap tuple, got {value:?}") };
    let HeapData::Tuple(items) = heap.get(id) else { panic!("expected a tuple heap object") };
    assert_eq!(items[0], Value::Int(1));
    assert!(matches!(items[1], Value::Ref(_)), "expected the string result to be a heap ref, got {:?}", items[1]);
}

#[test]
fn scenario_6_array_index_out_of_bounds_is_a_fatal_run_error() {
    let array = Expr::new(
        ExprKind::ArrayLit(vec![lit_int(1, Span::new(1, 2)), lit_int(2, Span::new(3, 4))]),
        Span::new(0, 5),
    );
    let index = Expr::new(
        ExprKind::ArrayIndex(Box::new(array), Box::new(lit_int(10, Span::new(6, 8)))),
        Span::new(0, 8),
    );
    let module = Module { items: vec![Item::Expr(index)] };

    let mut env = TypeEnv::new();
    let mut inferencer = Inferencer::new(&mut env);
    let module_types = inferencer.infer_module(&module);
    assert!(inferencer.diagnostics.errors.is_empty(), "{:?}", inferencer.diagnostics.errors);
    let expr_types = inferencer.expr_types.clone();
    let compiler = Compiler::new(&expr_types, &env.adts);
    let compiled = compiler.compile_module(&module, &module_types).unwrap();

    let mut heap = Heap::new();
    let mut interns = Interns::new();
    let mut vm = Vm::new(&mut heap, &mut interns, NoopTracer);
    let err = vm.run(&compiled.code).unwrap_err();
    assert_eq!(err.to_string(), "Index out of bounds: index: 10, length: 2");
}

#[test]
fn scenario_7_annotation_mismatch_is_a_compile_time_type_error() {
    let decl = LetDecl {
        name: "x".to_owned(),
        mutable: false,
        public: false,
        recursive: false,
        annotation: Some(bendu::ast::TypeExpr::Con("String".to_owned(), vec![])),
        value: lit_int(42, Span::new(14, 16)),
        span: Span::new(0, 16),
    };
    let module = Module { items: vec![Item::Let(decl)] };

    let mut env = TypeEnv::new();
    let mut inferencer = Inferencer::new(&mut env);
    inferencer.infer_module(&module);
    assert!(!inferencer.diagnostics.errors.is_empty(), "expected a type mismatch to be reported");
    let message = inferencer.diagnostics.errors[0].to_string();
    assert!(message.contains("Int"), "{message}");
    assert!(message.contains("String"), "{message}");
}

/// Property #7 (spec.md §8): rendering a compiled signature and re-parsing
/// it yields an equivalent export list.
#[test]
fn signature_round_trips_through_its_text_form() {
    let decl = LetDecl {
        name: "answer".to_owned(),
        mutable: false,
        public: true,
        recursive: false,
        annotation: None,
        value: lit_int(42, Span::new(0, 2)),
        span: Span::new(0, 2),
    };
    let module = Module { items: vec![Item::Let(decl)] };

    let mut env = TypeEnv::new();
    let mut inferencer = Inferencer::new(&mut env);
    let module_types = inferencer.infer_module(&module);
    assert!(inferencer.diagnostics.errors.is_empty());
    let expr_types = inferencer.expr_types.clone();
    let compiler = Compiler::new(&expr_types, &env.adts);
    let compiled = compiler.compile_module(&module, &module_types).unwrap();

    let rendered = bendu::signature::render(&compiled.exports);
    let parsed = bendu::signature::parse(&rendered, "test").unwrap();
    assert_eq!(parsed, compiled.exports);
}
