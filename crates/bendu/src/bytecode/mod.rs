//! The bytecode compiler and its instruction set (spec.md §4.3, §6).

pub mod builder;
pub mod compiler;
pub mod op;
pub mod vm;

pub use builder::{Code, CodeBuilder};
pub use compiler::{CompiledModule, Compiler, Export};
pub use op::Opcode;
pub use vm::{Vm, VmOutcome};
