use std::collections::HashMap;

use log::debug;

use crate::ast::{ASTNode, Expression, Function, Prototype};
use crate::backend::Backend;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable name {0}")]
    UnknownVariable(String),
    #[error("invalid binary operator {0}")]
    UnknownOperator(String),
    #[error("unknown function referenced {0}")]
    UnknownFunction(String),
    #[error("incorrect number of arguments passed to {0}: expected {1}, found {2}")]
    InvalidCall(String, usize, usize),
    #[error("failed to verify function {0}")]
    InvalidFunction(String),
}

/// Walks the AST and drives the backend capability interface.
/// `named_values` is the per-function scope: cleared on entering a body,
/// never outliving one unit.
pub struct Codegen<B: Backend> {
    backend: B,
    named_values: HashMap<String, B::Value>,
}

impl<B: Backend> Codegen<B> {
    pub fn new(backend: B) -> Self {
        Codegen {
            backend,
            named_values: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn codegen_expr(&mut self, expr: &Expression) -> Result<B::Value, CodegenError> {
        match expr {
            // literals carry full decimals, but the language has a single
            // 32-bit integer type; materialization truncates
            Expression::Literal(value) => Ok(self.backend.const_i32(*value as i32)),
            Expression::Variable(name) => self
                .named_values
                .get(name)
                .copied()
                .ok_or_else(|| CodegenError::UnknownVariable(name.clone())),
            Expression::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left)?;
                let rhs = self.codegen_expr(right)?;

                match op.as_str() {
                    "+" => Ok(self.backend.build_add(lhs, rhs)),
                    "-" => Ok(self.backend.build_sub(lhs, rhs)),
                    "*" => Ok(self.backend.build_mul(lhs, rhs)),
                    "<" => {
                        let cmp = self.backend.build_ult(lhs, rhs);
                        Ok(self.backend.build_zext(cmp))
                    }
                    _ => Err(CodegenError::UnknownOperator(op.clone())),
                }
            }
            Expression::Call(callee, args) => {
                let function = self
                    .backend
                    .get_function(callee)
                    .ok_or_else(|| CodegenError::UnknownFunction(callee.clone()))?;

                let expected = self.backend.arity(function);
                if expected != args.len() {
                    return Err(CodegenError::InvalidCall(
                        callee.clone(),
                        expected,
                        args.len(),
                    ));
                }

                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.codegen_expr(arg)?);
                }

                Ok(self.backend.build_call(function, &values))
            }
        }
    }

    /// Reuse an existing declaration under this name, or declare it fresh
    /// with the fixed numeric type throughout. A reused declaration is taken
    /// as is; arity is not re-checked here.
    pub fn compile_proto(&mut self, proto: &Prototype) -> Result<B::Function, CodegenError> {
        match self.backend.get_function(&proto.name) {
            Some(function) => Ok(function),
            None => Ok(self.backend.add_function(&proto.name, proto.args.len())),
        }
    }

    pub fn compile_fn(&mut self, function: &Function) -> Result<B::Function, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;
        let handle = self.compile_proto(proto)?;

        self.named_values.clear();
        let params = self.backend.enter_body(handle);
        for (name, value) in proto.args.iter().zip(params) {
            self.named_values.insert(name.clone(), value);
        }

        let body = match self.codegen_expr(body) {
            Ok(value) => value,
            Err(err) => {
                // never leave a half-built function in the module
                self.backend.erase_function(handle);
                return Err(err);
            }
        };
        self.backend.build_return(body);

        if self.backend.verify(handle) {
            debug!("generated function {}", proto);
            Ok(handle)
        } else {
            self.backend.erase_function(handle);
            Err(CodegenError::InvalidFunction(proto.name.clone()))
        }
    }

    pub fn compile(&mut self, node: &ASTNode) -> Result<B::Function, CodegenError> {
        match node {
            ASTNode::Function(function) => self.compile_fn(function),
            ASTNode::Extern(proto) => self.compile_proto(proto),
        }
    }

    pub fn codegen(&mut self, ast_nodes: &[ASTNode]) -> Result<(), CodegenError> {
        for node in ast_nodes {
            self.compile(node)?;
        }
        Ok(())
    }
}
