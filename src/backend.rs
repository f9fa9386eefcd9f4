use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use log::debug;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to write artifact: {0}")]
    Emit(#[from] io::Error),
    #[error("function {0} needs {1} arguments but at most 6 register arguments are supported")]
    UnsupportedArity(String, usize),
}

/// Capability interface the code generator drives. The backend owns
/// instruction encoding and artifact emission; the code generator only
/// describes what to build.
pub trait Backend {
    type Value: Copy + fmt::Debug;
    type Function: Copy + fmt::Debug + PartialEq;

    fn const_i32(&mut self, value: i32) -> Self::Value;
    fn build_add(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn build_sub(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn build_mul(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    /// Unsigned less-than. The result is a boolean that must go through
    /// `build_zext` before it can be used as a number.
    fn build_ult(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn build_zext(&mut self, value: Self::Value) -> Self::Value;

    fn get_function(&self, name: &str) -> Option<Self::Function>;
    fn add_function(&mut self, name: &str, arity: usize) -> Self::Function;
    fn arity(&self, function: Self::Function) -> usize;

    /// Open a fresh body for `function` and return its parameter values in
    /// declaration order. `build_*` calls append to this body until the next
    /// `enter_body`.
    fn enter_body(&mut self, function: Self::Function) -> Vec<Self::Value>;
    fn build_call(&mut self, callee: Self::Function, args: &[Self::Value]) -> Self::Value;
    fn build_return(&mut self, value: Self::Value);

    fn verify(&self, function: Self::Function) -> bool;
    /// Remove a function and its name binding from the module entirely.
    fn erase_function(&mut self, function: Self::Function);
    /// Lower every defined function and write the artifact.
    fn finalize_and_emit(&mut self, path: &Path) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueId(usize);

#[derive(Debug, Clone, PartialEq)]
enum Inst {
    Param(usize),
    ConstI32(i32),
    Add(ValueId, ValueId),
    Sub(ValueId, ValueId),
    Mul(ValueId, ValueId),
    Ult(ValueId, ValueId),
    Zext(ValueId),
    // the callee is captured by name so erasing a function can never leave
    // a dangling handle inside another body
    Call { callee: String, args: Vec<ValueId> },
    Ret(ValueId),
}

impl Inst {
    fn operands(&self) -> Vec<ValueId> {
        match self {
            Inst::Param(_) | Inst::ConstI32(_) => Vec::new(),
            Inst::Add(a, b) | Inst::Sub(a, b) | Inst::Mul(a, b) | Inst::Ult(a, b) => {
                vec![*a, *b]
            }
            Inst::Zext(value) | Inst::Ret(value) => vec![*value],
            Inst::Call { args, .. } => args.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct FunctionData {
    name: String,
    arity: usize,
    body: Option<Vec<Inst>>,
}

/// Reference backend: records a flat virtual-register instruction list per
/// function and lowers every defined function to System V x86-64 AT&T
/// assembly. Each value gets a stack slot; `%eax` is the only scratch
/// register. Defined functions are exported under their source names with
/// one 32-bit integer per parameter and a 32-bit integer return, which is
/// what a linking consumer relies on.
#[derive(Debug, Default)]
pub struct AsmBackend {
    functions: Vec<Option<FunctionData>>,
    names: HashMap<String, FunctionId>,
    current: Option<FunctionId>,
}

const ARG_REGISTERS: [&str; 6] = ["%edi", "%esi", "%edx", "%ecx", "%r8d", "%r9d"];

impl AsmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self, function: FunctionId) -> &FunctionData {
        self.functions[function.0]
            .as_ref()
            .expect("use of an erased function handle")
    }

    fn push(&mut self, inst: Inst) -> ValueId {
        let current = self
            .current
            .expect("builder is not positioned inside a function");
        let body = self.functions[current.0]
            .as_mut()
            .expect("use of an erased function handle")
            .body
            .as_mut()
            .expect("enter_body must run before instructions are built");
        body.push(inst);
        ValueId(body.len() - 1)
    }

    /// Lower the whole module to assembly text. Extern-only declarations
    /// emit nothing; they resolve at link time.
    pub fn render(&self) -> Result<String, BackendError> {
        let mut out = String::new();
        out.push_str("    .text\n");
        for data in self.functions.iter().flatten() {
            if let Some(body) = &data.body {
                self.lower_function(data, body, &mut out)?;
            }
        }
        Ok(out)
    }

    fn lower_function(
        &self,
        data: &FunctionData,
        body: &[Inst],
        out: &mut String,
    ) -> Result<(), BackendError> {
        if data.arity > ARG_REGISTERS.len() {
            return Err(BackendError::UnsupportedArity(data.name.clone(), data.arity));
        }
        debug!("lowering {} ({} values)", data.name, body.len());

        // one 4-byte slot per value; frame rounded so calls stay 16-aligned
        let frame = (body.len() * 4 + 15) & !15;
        let slot = |value: &ValueId| format!("{}(%rbp)", -((value.0 as i64 + 1) * 4));

        out.push_str(&format!("    .globl {}\n", data.name));
        out.push_str(&format!("{}:\n", data.name));
        out.push_str("    push %rbp\n");
        out.push_str("    mov %rsp, %rbp\n");
        if frame > 0 {
            out.push_str(&format!("    sub ${}, %rsp\n", frame));
        }

        for (index, inst) in body.iter().enumerate() {
            let dst = slot(&ValueId(index));
            match inst {
                Inst::Param(n) => {
                    out.push_str(&format!("    mov {}, {}\n", ARG_REGISTERS[*n], dst));
                }
                Inst::ConstI32(value) => {
                    out.push_str(&format!("    movl ${}, {}\n", value, dst));
                }
                Inst::Add(a, b) => {
                    out.push_str(&format!("    mov {}, %eax\n", slot(a)));
                    out.push_str(&format!("    add {}, %eax\n", slot(b)));
                    out.push_str(&format!("    mov %eax, {}\n", dst));
                }
                Inst::Sub(a, b) => {
                    out.push_str(&format!("    mov {}, %eax\n", slot(a)));
                    out.push_str(&format!("    sub {}, %eax\n", slot(b)));
                    out.push_str(&format!("    mov %eax, {}\n", dst));
                }
                Inst::Mul(a, b) => {
                    out.push_str(&format!("    mov {}, %eax\n", slot(a)));
                    out.push_str(&format!("    imul {}, %eax\n", slot(b)));
                    out.push_str(&format!("    mov %eax, {}\n", dst));
                }
                Inst::Ult(a, b) => {
                    out.push_str(&format!("    mov {}, %eax\n", slot(a)));
                    out.push_str(&format!("    cmp {}, %eax\n", slot(b)));
                    out.push_str("    setb %al\n");
                    out.push_str("    movzbl %al, %eax\n");
                    out.push_str(&format!("    mov %eax, {}\n", dst));
                }
                Inst::Zext(value) => {
                    // the compare already materialized 0/1 in 32 bits, so
                    // the widen lowers to a move
                    out.push_str(&format!("    mov {}, %eax\n", slot(value)));
                    out.push_str(&format!("    mov %eax, {}\n", dst));
                }
                Inst::Call { callee, args } => {
                    if args.len() > ARG_REGISTERS.len() {
                        return Err(BackendError::UnsupportedArity(callee.clone(), args.len()));
                    }
                    for (reg, arg) in ARG_REGISTERS.iter().zip(args) {
                        out.push_str(&format!("    mov {}, {}\n", slot(arg), reg));
                    }
                    out.push_str(&format!("    call {}\n", callee));
                    out.push_str(&format!("    mov %eax, {}\n", dst));
                }
                Inst::Ret(value) => {
                    out.push_str(&format!("    mov {}, %eax\n", slot(value)));
                    out.push_str("    leave\n");
                    out.push_str("    ret\n");
                }
            }
        }
        Ok(())
    }
}

impl Backend for AsmBackend {
    type Value = ValueId;
    type Function = FunctionId;

    fn const_i32(&mut self, value: i32) -> ValueId {
        self.push(Inst::ConstI32(value))
    }

    fn build_add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(Inst::Add(lhs, rhs))
    }

    fn build_sub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(Inst::Sub(lhs, rhs))
    }

    fn build_mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(Inst::Mul(lhs, rhs))
    }

    fn build_ult(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(Inst::Ult(lhs, rhs))
    }

    fn build_zext(&mut self, value: ValueId) -> ValueId {
        self.push(Inst::Zext(value))
    }

    fn get_function(&self, name: &str) -> Option<FunctionId> {
        self.names.get(name).copied()
    }

    fn add_function(&mut self, name: &str, arity: usize) -> FunctionId {
        let id = FunctionId(self.functions.len());
        self.functions.push(Some(FunctionData {
            name: name.to_string(),
            arity,
            body: None,
        }));
        self.names.insert(name.to_string(), id);
        id
    }

    fn arity(&self, function: FunctionId) -> usize {
        self.data(function).arity
    }

    fn enter_body(&mut self, function: FunctionId) -> Vec<ValueId> {
        let arity = self.data(function).arity;
        let data = self.functions[function.0]
            .as_mut()
            .expect("use of an erased function handle");
        // re-entering a defined function replaces its old body
        data.body = Some((0..arity).map(Inst::Param).collect());
        self.current = Some(function);
        (0..arity).map(ValueId).collect()
    }

    fn build_call(&mut self, callee: FunctionId, args: &[ValueId]) -> ValueId {
        let callee = self.data(callee).name.clone();
        self.push(Inst::Call {
            callee,
            args: args.to_vec(),
        })
    }

    fn build_return(&mut self, value: ValueId) {
        self.push(Inst::Ret(value));
    }

    fn verify(&self, function: FunctionId) -> bool {
        let data = match self.functions.get(function.0).and_then(Option::as_ref) {
            Some(data) => data,
            None => return false,
        };
        let body = match &data.body {
            Some(body) => body,
            None => return false,
        };

        let returns = body.iter().filter(|inst| matches!(inst, Inst::Ret(_))).count();
        if returns != 1 || !matches!(body.last(), Some(Inst::Ret(_))) {
            return false;
        }
        // every operand must reference an already-built value
        body.iter()
            .enumerate()
            .all(|(index, inst)| inst.operands().into_iter().all(|value| value.0 < index))
    }

    fn erase_function(&mut self, function: FunctionId) {
        if let Some(data) = self.functions[function.0].take() {
            self.names.remove(&data.name);
        }
        if self.current == Some(function) {
            self.current = None;
        }
    }

    fn finalize_and_emit(&mut self, path: &Path) -> Result<(), BackendError> {
        let asm = self.render()?;
        fs::write(path, asm)?;
        Ok(())
    }
}
