//! Bendu: a statically typed functional language compiled to a stack-based
//! bytecode VM (spec.md §OVERVIEW).
//!
//! The pipeline a source file passes through mirrors spec.md's module list
//! top to bottom: [`ast`] is the surface tree an external parser hands in,
//! [`infer`]/[`unify`]/[`subst`]/[`env`]/[`exhaustiveness`] assign and check
//! types, [`bytecode`] lowers a checked module to instructions and runs
//! them, and [`cache`]/[`loader`]/[`signature`]/[`package`] manage compiled
//! artifacts on disk across package boundaries.

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod cache;
pub mod env;
pub mod error;
pub mod exhaustiveness;
pub mod heap;
pub mod infer;
pub mod intern;
pub mod loader;
pub mod package;
pub mod signature;
pub mod subst;
pub mod tracer;
pub mod types;
pub mod types_registry;
pub mod unify;
pub mod value;

pub use ast::{decode_expr, decode_module, encode_expr, encode_module, Module};
pub use bytecode::{Code, Compiler, Vm, VmOutcome};
pub use cache::{CacheEntry, PackageCache};
pub use env::TypeEnv;
pub use error::BenduError;
pub use heap::Heap;
pub use infer::Inferencer;
pub use intern::Interns;
pub use tracer::{CoverageTracer, NoopTracer, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer};
