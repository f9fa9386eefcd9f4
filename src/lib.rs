//! Compiler front end for the ember expression language.
//!
//! The pipeline is a straight line: characters become tokens (`lexer`),
//! tokens become a tree (`parser`, `ast`), and the tree drives whatever
//! implements the backend capability interface (`codegen`, `backend`). The
//! `driver` runs that pipeline one top-level unit at a time with per-unit
//! error recovery, then asks the backend to emit the artifact.

pub mod ast;
pub mod backend;
pub mod codegen;
pub mod driver;
pub mod lexer;
pub mod parser;

pub use backend::{AsmBackend, Backend, BackendError};
pub use codegen::{Codegen, CodegenError};
pub use driver::{Driver, UnitError, DEFAULT_OUTPUT_PATH};
pub use lexer::{lex, Token};
pub use parser::{Parser, ParserError};
