use std::{env, fs, path::PathBuf, process::ExitCode};

use ahash::AHashMap;
use bendu::{
    ast::{self, Item, Module},
    bytecode::{Code, CompiledModule, Compiler, Export, Opcode, Vm, VmOutcome},
    cache::PackageCache,
    env::TypeEnv,
    infer::Inferencer,
    loader,
    tracer::{NoopTracer, StderrTracer},
    types::Scheme,
};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    match dispatch(&args[1..]) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Manual subcommand dispatch (spec.md §6, CLI contract: `compile
/// <file.bendu>`, `dis [--file <path> | --expression <expr>]`, `test
/// --expression <expr> --line <n> --bc <vm-path>`). The CLI argument parser
/// itself is out of scope (spec.md §1) — hand-rolled flag scanning, the way
/// the teacher's own driver reads `env::args()` directly rather than
/// reaching for a parsing crate.
fn dispatch(args: &[String]) -> Result<(), String> {
    match args.first().map(String::as_str) {
        Some("compile") => compile_cmd(&args[1..]),
        Some("dis") => dis_cmd(&args[1..]),
        Some("test") => test_cmd(&args[1..]),
        _ => Err("usage: bendu compile <file.bendu> | dis [--file <path> | --expression <hex>] | test --expression <hex> --line <n> --bc <vm-path>".to_owned()),
    }
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).map(String::as_str)
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd-length hex string".to_owned());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| format!("invalid hex digit at offset {i}")))
        .collect()
}

/// Decodes a `--expression` argument: a single [`ast::Expr`], postcard-
/// encoded then hex-encoded so it can travel as one `argv` entry. The
/// lexer/parser that would otherwise turn source text into this `Expr` is
/// an external collaborator (spec.md §1/§218); this CLI's job stops at
/// deserializing whatever it produced.
fn decode_expr_arg(hex: &str) -> Result<ast::Expr, String> {
    let bytes = hex_decode(hex)?;
    ast::decode_expr(&bytes).map_err(|e| format!("malformed expression: {e}"))
}

/// `bendu compile <file.bendu>`: reads a postcard-encoded [`Module`] and
/// persists its compiled artifacts through the package cache (spec.md §4.4).
fn compile_cmd(args: &[String]) -> Result<(), String> {
    let path = args.first().ok_or("compile: expected <file.bendu>")?;
    let bytes = fs::read(path).map_err(|e| format!("{path}: {e}"))?;
    let module = ast::decode_module(&bytes).map_err(|e| format!("{path}: malformed module: {e}"))?;
    let cache = PackageCache::from_env().map_err(|e| e.to_string())?;
    let entry = cache.entry_for(path).map_err(|e| e.to_string())?;
    entry.compile(&module).map_err(|e| e.to_string())?;
    println!("compiled {path}");
    Ok(())
}

/// `bendu dis [--file <path> | --expression <hex>]`: disassembles an
/// existing bytecode image, or compiles and runs a standalone expression
/// under a tracing VM and disassembles what got emitted for it.
fn dis_cmd(args: &[String]) -> Result<(), String> {
    if let Some(path) = flag_value(args, "--file") {
        let bytes = fs::read(path).map_err(|e| format!("{path}: {e}"))?;
        let image = loader::parse(&bytes).map_err(|e| e.to_string())?;
        disassemble(&image.code);
        return Ok(());
    }
    if let Some(hex) = flag_value(args, "--expression") {
        let expr = decode_expr_arg(hex)?;
        let module = Module { items: vec![Item::Expr(expr)] };
        let compiled = compile_standalone(&module)?;
        disassemble(&compiled.code);
        let mut heap = bendu::Heap::new();
        let mut interns = bendu::Interns::new();
        let mut vm = Vm::new(&mut heap, &mut interns, StderrTracer::new());
        let VmOutcome::Finished(value) = vm.run(&compiled.code).map_err(|e| e.to_string())?;
        println!("=> {value}");
        return Ok(());
    }
    Err("dis: expected --file <path> or --expression <hex>".to_owned())
}

/// `bendu test --expression <hex> --line <n> --bc <vm-path>`: the driver the
/// markdown test harness shells out to for each example block (the harness
/// itself is out of scope, spec.md §1). `--bc` names an already-compiled,
/// import-free package; its sibling `.bsig` (same stem, spec.md §4.4's
/// artifact layout) supplies the schemes the expression type-checks
/// against. A test passes when the expression runs to completion and
/// evaluates to `true`; `--line` only labels the failure message.
fn test_cmd(args: &[String]) -> Result<(), String> {
    let hex = flag_value(args, "--expression").ok_or("test: expected --expression <hex>")?;
    let line = flag_value(args, "--line").ok_or("test: expected --line <n>")?;
    let bc_path = flag_value(args, "--bc").ok_or("test: expected --bc <vm-path>")?;

    let bytes = fs::read(bc_path).map_err(|e| format!("{bc_path}: {e}"))?;
    let image = loader::parse(&bytes).map_err(|e| format!("line {line}: {e}"))?;
    if !image.imports.is_empty() {
        return Err(format!("line {line}: test subjects with their own imports are not supported"));
    }

    let sig_path = PathBuf::from(bc_path).with_extension("bsig");
    let sig_text = fs::read_to_string(&sig_path).map_err(|e| format!("{}: {e}", sig_path.display()))?;
    let exports = bendu::signature::parse(&sig_text, &sig_path.display().to_string()).map_err(|e| e.to_string())?;
    let mut schemes: AHashMap<String, Scheme> = AHashMap::new();
    for export in &exports {
        if let Export::Let { name, scheme, .. } | Export::Fn { name, scheme, .. } = export {
            let parsed = bendu::signature::parse_scheme(scheme, &sig_path.display().to_string()).map_err(|e| e.to_string())?;
            schemes.insert(name.clone(), parsed);
        }
    }

    let expr = decode_expr_arg(hex)?;
    let module = Module {
        items: vec![
            Item::Import(ast::Import { path: bc_path.to_owned(), kind: ast::ImportKind::Unqualified, span: ast::Span::DUMMY }),
            Item::Expr(expr),
        ],
    };
    let compiled = compile_with_import(&module, bc_path, schemes).map_err(|e| format!("line {line}: {e}"))?;

    let mut heap = bendu::Heap::new();
    let mut interns = bendu::Interns::new();
    let (_subject_value, subject_frame) = {
        let mut vm = Vm::new(&mut heap, &mut interns, NoopTracer);
        vm.run_package(&image.code).map_err(|e| format!("line {line}: {e}"))?
    };
    let loaded = bendu::package::LoadedPackage { source_id: bc_path.to_owned(), code: image.code, frame: subject_frame };
    let table = bendu::package::PackageTable::new(vec![loaded]);

    let result = {
        let mut vm = Vm::with_imports(&mut heap, &mut interns, &table, NoopTracer);
        vm.run(&compiled.code).map_err(|e| format!("line {line}: {e}"))?
    };
    let VmOutcome::Finished(value) = result;
    if value.as_bool() == Some(true) {
        println!("line {line}: ok");
        Ok(())
    } else {
        Err(format!("line {line}: expected true, got {value}"))
    }
}

fn compile_standalone(module: &Module) -> Result<CompiledModule, String> {
    compile_with_import_opt(module, None)
}

fn compile_with_import(module: &Module, import_path: &str, schemes: AHashMap<String, Scheme>) -> Result<CompiledModule, String> {
    compile_with_import_opt(module, Some((import_path, schemes)))
}

fn compile_with_import_opt(module: &Module, import: Option<(&str, AHashMap<String, Scheme>)>) -> Result<CompiledModule, String> {
    let mut env = TypeEnv::new();
    let mut inferencer = Inferencer::new(&mut env);
    if let Some((path, schemes)) = import {
        inferencer.provide_package_signature(path.to_owned(), schemes);
    }
    let module_types = inferencer.infer_module(module);
    if inferencer.diagnostics.has_errors() {
        let messages: Vec<String> = inferencer.diagnostics.errors.iter().map(ToString::to_string).collect();
        return Err(messages.join("\n"));
    }
    let expr_types = inferencer.expr_types.clone();
    let compiler = Compiler::new(&expr_types, &env.adts);
    compiler.compile_module(module, &module_types).map_err(|e| e.to_string())
}

/// A flat, one-instruction-per-line disassembly (spec.md §6, "Instruction
/// encoding"): each opcode's immediates are read with the same typed-width
/// rules the VM's own `fetch_*` helpers use, so this stays in lockstep with
/// `bytecode::vm` by construction rather than by a separately maintained
/// table.
fn disassemble(code: &Code) {
    let bytes = &code.bytecode;
    let mut ip = 0usize;
    while ip < bytes.len() {
        let start = ip;
        let tag = bytes[ip];
        ip += 1;
        let Some(op) = Opcode::decode(tag) else {
            println!("{start:>6}  <invalid opcode {tag}>");
            break;
        };
        let operands = match op {
            Opcode::Jmp | Opcode::JmpFalse | Opcode::JmpDupTrue | Opcode::JmpDupFalse => format!("{}", read_u32(bytes, &mut ip)),
            Opcode::PushI32Literal => format!("{}", read_i32(bytes, &mut ip)),
            Opcode::PushF32Literal => format!("{}", read_f32(bytes, &mut ip)),
            Opcode::PushU8Literal => format!("{}", read_u8(bytes, &mut ip)),
            Opcode::PushStringLiteral => format!("{:?}", read_string(bytes, &mut ip)),
            Opcode::Load | Opcode::Store => format!("{} {}", read_u32(bytes, &mut ip), read_u32(bytes, &mut ip)),
            Opcode::PushClosure | Opcode::LoadPackage | Opcode::StorePackage => {
                format!("{} {}", read_i32(bytes, &mut ip), read_u32(bytes, &mut ip))
            }
            Opcode::Call => format!("{} {} {}", read_u32(bytes, &mut ip), read_u32(bytes, &mut ip), read_u32(bytes, &mut ip)),
            Opcode::CallClosure => format!("{}", read_u32(bytes, &mut ip)),
            Opcode::CallPackage => format!("{} {} {}", read_i32(bytes, &mut ip), read_u32(bytes, &mut ip), read_u32(bytes, &mut ip)),
            Opcode::PushTuple | Opcode::PushArray => format!("{}", read_u32(bytes, &mut ip)),
            Opcode::PushTupleComponent | Opcode::PushConstructorComponent => format!("{}", read_u32(bytes, &mut ip)),
            Opcode::PushCustom => {
                format!("{:?} {} {}", read_string(bytes, &mut ip), read_u32(bytes, &mut ip), read_u32(bytes, &mut ip))
            }
            Opcode::CallBuiltin => format!("{} {}", read_u32(bytes, &mut ip), read_u32(bytes, &mut ip)),
            _ => String::new(),
        };
        if operands.is_empty() {
            println!("{start:>6}  {op:?}");
        } else {
            println!("{start:>6}  {op:?}  {operands}");
        }
    }
}

fn read_u8(bytes: &[u8], ip: &mut usize) -> u8 {
    let v = bytes[*ip];
    *ip += 1;
    v
}

fn read_u32(bytes: &[u8], ip: &mut usize) -> u32 {
    let v = u32::from_be_bytes(bytes[*ip..*ip + 4].try_into().expect("4 bytes"));
    *ip += 4;
    v
}

fn read_i32(bytes: &[u8], ip: &mut usize) -> i32 {
    let v = i32::from_be_bytes(bytes[*ip..*ip + 4].try_into().expect("4 bytes"));
    *ip += 4;
    v
}

fn read_f32(bytes: &[u8], ip: &mut usize) -> f32 {
    let v = f32::from_be_bytes(bytes[*ip..*ip + 4].try_into().expect("4 bytes"));
    *ip += 4;
    v
}

fn read_string(bytes: &[u8], ip: &mut usize) -> String {
    let len = read_u32(bytes, ip) as usize;
    let s = String::from_utf8_lossy(&bytes[*ip..*ip + len]).into_owned();
    *ip += len;
    s
}
