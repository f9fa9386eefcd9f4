use std::path::Path;

use log::debug;

use crate::backend::{Backend, BackendError};
use crate::codegen::{Codegen, CodegenError};
use crate::lexer::Token;
use crate::parser::{Parser, ParserError};

/// Where the artifact lands when the surrounding tooling doesn't say
/// otherwise.
pub const DEFAULT_OUTPUT_PATH: &str = "output.s";

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum UnitError {
    #[error(transparent)]
    Parse(#[from] ParserError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Top-level loop over declaration/expression units.
pub struct Driver<B: Backend> {
    parser: Parser,
    codegen: Codegen<B>,
}

impl<B: Backend> Driver<B> {
    pub fn new(backend: B) -> Self {
        Driver {
            parser: Parser::default(),
            codegen: Codegen::new(backend),
        }
    }

    /// Consume the whole token stack, one unit at a time. A failed unit is
    /// reported and then exactly one token is skipped, so a malformed unit
    /// never takes the rest of the input down with it.
    pub fn run(&mut self, input: &mut Vec<Token>) -> Vec<UnitError> {
        let mut errors = Vec::new();
        loop {
            let result = match input.last() {
                None => break,
                Some(Token::Delimiter) => {
                    input.pop();
                    continue;
                }
                Some(Token::Def) => self.handle_definition(input),
                Some(Token::Extern) => self.handle_extern(input),
                Some(_) => self.handle_top_level_expr(input),
            };
            if let Err(err) = result {
                eprintln!("error: {}", err);
                input.pop(); // skip one token to get back in sync
                errors.push(err);
            }
        }
        debug!("driver loop finished with {} failed unit(s)", errors.len());
        errors
    }

    fn handle_definition(&mut self, input: &mut Vec<Token>) -> Result<(), UnitError> {
        let function = self.parser.parse_definition(input)?;
        self.codegen.compile_fn(&function)?;
        println!("Read function definition: {}", function.prototype);
        Ok(())
    }

    fn handle_extern(&mut self, input: &mut Vec<Token>) -> Result<(), UnitError> {
        let prototype = self.parser.parse_extern(input)?;
        self.codegen.compile_proto(&prototype)?;
        println!("Read extern: {}", prototype);
        Ok(())
    }

    fn handle_top_level_expr(&mut self, input: &mut Vec<Token>) -> Result<(), UnitError> {
        let function = self.parser.parse_top_level_expr(input)?;
        let handle = self.codegen.compile_fn(&function)?;
        println!("Read top-level expression");
        // a bare expression is ephemeral: drop its wrapper right away so
        // the next one can reuse the reserved name
        self.codegen.backend_mut().erase_function(handle);
        Ok(())
    }

    pub fn backend(&self) -> &B {
        self.codegen.backend()
    }

    pub fn emit(&mut self, path: &Path) -> Result<(), BackendError> {
        debug!("emitting artifact to {}", path.display());
        self.codegen.backend_mut().finalize_and_emit(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ANONYMOUS_NAME;
    use crate::backend::AsmBackend;
    use crate::lexer::lex;

    fn run_source(source: &str) -> (Driver<AsmBackend>, Vec<UnitError>) {
        let mut driver = Driver::new(AsmBackend::new());
        let mut tokens = lex(source);
        let errors = driver.run(&mut tokens);
        (driver, errors)
    }

    #[test]
    fn a_whole_session_compiles() {
        let (driver, errors) = run_source("extern sin(x); def double(x) x + x; double(2);");
        assert!(errors.is_empty());
        assert!(driver.backend().get_function("sin").is_some());
        assert!(driver.backend().get_function("double").is_some());
        assert!(driver.backend().get_function(ANONYMOUS_NAME).is_none());
    }

    #[test]
    fn one_malformed_unit_yields_one_diagnostic() {
        let (driver, errors) = run_source("def bad( ; def ok(x) x");
        assert_eq!(errors.len(), 1);
        assert!(driver.backend().get_function("ok").is_some());
        assert!(driver.backend().get_function("bad").is_none());
    }

    #[test]
    fn semantic_failure_is_contained_to_its_unit() {
        let (driver, errors) = run_source("def f(x) y; def g(x) x;");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            UnitError::Codegen(CodegenError::UnknownVariable("y".to_string()))
        );
        assert!(driver.backend().get_function("f").is_none());
        assert!(driver.backend().get_function("g").is_some());
    }

    #[test]
    fn anonymous_expressions_are_idempotent() {
        let (driver, errors) = run_source("1 + 2; 1 + 2;");
        assert!(errors.is_empty());
        assert!(driver.backend().get_function(ANONYMOUS_NAME).is_none());
    }

    #[test]
    fn emitted_artifact_holds_the_defined_function() {
        let (mut driver, errors) = run_source("def average(x y) (x + y) * 5");
        assert!(errors.is_empty());

        let path = std::env::temp_dir().join("emberc_driver_emit_test.s");
        driver.emit(&path).unwrap();
        let asm = std::fs::read_to_string(&path).unwrap();
        assert!(asm.contains("    .globl average\n"));
        assert!(asm.contains("    imul"));
        std::fs::remove_file(&path).unwrap();
    }
}
