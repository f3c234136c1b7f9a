//! Bytecode to IR: scans a method into basic blocks, then drives a back
//! end with typed operations over an operand stack and local slots.
//!
//! The translator never touches the stack or locals itself; it only decodes
//! opcodes, resolves symbolic references and tells the back end what to do.

use std::collections::BTreeMap;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use jclass::access_flags::{ClassAccessFlags, MethodAccessFlags};
use jclass::PoolEntry;

use crate::class::{Class, Method};
use crate::errors::VmError;
use crate::opcodes::{self, opc};

/// Operand types the translator distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValType {
    Int,
    Long,
    Ref,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

/// A half-open byte range `[start, end)` of straight-line code. Blocks are
/// disjoint, cover the whole method, and are shared with the back end by
/// start offset.
#[derive(Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub start: u32,
    pub end: u32,
}

/// The capability set a back end provides. The reference implementation is
/// the interpreter; [`DumpBackend`] is the non-executing stub a JIT would
/// grow from.
pub trait Backend {
    fn prologue(&mut self);
    fn begin(&mut self, block: &Arc<BasicBlock>);
    fn op_const(&mut self, ty: ValType, value: i64);
    fn op_load(&mut self, ty: ValType, index: u16);
    fn op_store(&mut self, ty: ValType, index: u16);
    fn op_pop(&mut self);
    fn op_dup(&mut self);
    fn op_dup_x1(&mut self);
    fn op_swap(&mut self);
    fn op_binary(&mut self, ty: ValType, op: BinOp);
    fn op_iinc(&mut self, index: u16, value: i8);
    fn op_if_cmp(&mut self, ty: ValType, op: CmpOp, target: &Arc<BasicBlock>);
    fn op_goto(&mut self, target: &Arc<BasicBlock>);
    fn op_ret(&mut self);
    fn op_ret_void(&mut self);
    fn op_new(&mut self);
    fn op_arraylength(&mut self);
    fn op_invokestatic(&mut self, target: &Arc<Method>);
}

pub struct Translator<'a> {
    method: &'a Method,
    blocks: BTreeMap<u32, Arc<BasicBlock>>,
}

impl<'a> Translator<'a> {
    pub fn new(method: &'a Method) -> Translator<'a> {
        Translator {
            method,
            blocks: BTreeMap::new(),
        }
    }

    /// Scans, then replays every block through the back end in ascending
    /// start order.
    pub fn translate<B: Backend>(mut self, backend: &mut B) -> Result<(), VmError> {
        self.scan()?;
        backend.prologue();
        let blocks: Vec<Arc<BasicBlock>> = self.blocks.values().cloned().collect();
        for block in &blocks {
            self.translate_block(block, backend)?;
        }
        Ok(())
    }

    /// One pass over `[0, code_length)`: a new block starts after every
    /// block-ending instruction that is not the last one.
    fn scan(&mut self) -> Result<(), VmError> {
        let code = &self.method.code;
        let code_length = code.len() as u32;
        let mut starts = vec![0u32];
        let mut pos = 0usize;
        while pos < code.len() {
            let opcode = code[pos];
            pos += opcodes::instruction_length(code, pos)?;
            if opcodes::is_block_end(opcode) && (pos as u32) < code_length {
                starts.push(pos as u32);
            }
        }
        if pos as u32 != code_length {
            return Err(VmError::MalformedBytecode(
                "last instruction overruns the method".into(),
            ));
        }
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(code_length);
            self.blocks.insert(start, Arc::new(BasicBlock { start, end }));
        }
        Ok(())
    }

    fn translate_block<B: Backend>(
        &self,
        block: &Arc<BasicBlock>,
        backend: &mut B,
    ) -> Result<(), VmError> {
        let code = &self.method.code;
        backend.begin(block);
        let mut pc = block.start as usize;
        while (pc as u32) < block.end {
            let opcode = code[pc];
            match opcode {
                opc::NOP => {}
                opc::ACONST_NULL => backend.op_const(ValType::Ref, 0),
                opc::ICONST_M1..=opc::ICONST_5 => {
                    backend.op_const(ValType::Int, i64::from(opcode) - i64::from(opc::ICONST_0));
                }
                opc::LCONST_0 | opc::LCONST_1 => {
                    backend.op_const(ValType::Long, i64::from(opcode - opc::LCONST_0));
                }
                opc::BIPUSH => backend.op_const(ValType::Int, i64::from(code[pc + 1] as i8)),
                opc::SIPUSH => {
                    backend.op_const(ValType::Int, i64::from(BigEndian::read_i16(&code[pc + 1..])));
                }
                opc::LDC => {
                    let index = u16::from(code[pc + 1]);
                    let owner = self.owner()?;
                    match owner.pool().get(index)? {
                        PoolEntry::Integer(value) => {
                            backend.op_const(ValType::Int, i64::from(*value));
                        }
                        // Float, String and Class constants are extensions.
                        _ => {
                            return Err(VmError::UnsupportedBytecode {
                                opcode,
                                pc: pc as u32,
                            })
                        }
                    }
                }
                opc::ILOAD => backend.op_load(ValType::Int, u16::from(code[pc + 1])),
                opc::LLOAD => backend.op_load(ValType::Long, u16::from(code[pc + 1])),
                opc::ALOAD => backend.op_load(ValType::Ref, u16::from(code[pc + 1])),
                opc::ILOAD_0..=opc::ILOAD_3 => {
                    backend.op_load(ValType::Int, u16::from(opcode - opc::ILOAD_0));
                }
                opc::LLOAD_0..=opc::LLOAD_3 => {
                    backend.op_load(ValType::Long, u16::from(opcode - opc::LLOAD_0));
                }
                opc::ALOAD_0..=opc::ALOAD_3 => {
                    backend.op_load(ValType::Ref, u16::from(opcode - opc::ALOAD_0));
                }
                opc::ISTORE => backend.op_store(ValType::Int, u16::from(code[pc + 1])),
                opc::LSTORE => backend.op_store(ValType::Long, u16::from(code[pc + 1])),
                opc::ASTORE => backend.op_store(ValType::Ref, u16::from(code[pc + 1])),
                opc::ISTORE_0..=opc::ISTORE_3 => {
                    backend.op_store(ValType::Int, u16::from(opcode - opc::ISTORE_0));
                }
                opc::LSTORE_0..=opc::LSTORE_3 => {
                    backend.op_store(ValType::Long, u16::from(opcode - opc::LSTORE_0));
                }
                opc::ASTORE_0..=opc::ASTORE_3 => {
                    backend.op_store(ValType::Ref, u16::from(opcode - opc::ASTORE_0));
                }
                opc::POP => backend.op_pop(),
                opc::DUP => backend.op_dup(),
                opc::DUP_X1 => backend.op_dup_x1(),
                opc::SWAP => backend.op_swap(),
                opc::IADD => backend.op_binary(ValType::Int, BinOp::Add),
                opc::LADD => backend.op_binary(ValType::Long, BinOp::Add),
                opc::ISUB => backend.op_binary(ValType::Int, BinOp::Sub),
                opc::LSUB => backend.op_binary(ValType::Long, BinOp::Sub),
                opc::IMUL => backend.op_binary(ValType::Int, BinOp::Mul),
                opc::LMUL => backend.op_binary(ValType::Long, BinOp::Mul),
                opc::IDIV => backend.op_binary(ValType::Int, BinOp::Div),
                opc::LDIV => backend.op_binary(ValType::Long, BinOp::Div),
                opc::IREM => backend.op_binary(ValType::Int, BinOp::Rem),
                opc::LREM => backend.op_binary(ValType::Long, BinOp::Rem),
                opc::IAND => backend.op_binary(ValType::Int, BinOp::And),
                opc::LAND => backend.op_binary(ValType::Long, BinOp::And),
                opc::IOR => backend.op_binary(ValType::Int, BinOp::Or),
                opc::LOR => backend.op_binary(ValType::Long, BinOp::Or),
                opc::IXOR => backend.op_binary(ValType::Int, BinOp::Xor),
                opc::LXOR => backend.op_binary(ValType::Long, BinOp::Xor),
                opc::IINC => backend.op_iinc(u16::from(code[pc + 1]), code[pc + 2] as i8),
                opc::IF_ICMPEQ..=opc::IF_ICMPLE => {
                    let offset = BigEndian::read_i16(&code[pc + 1..]);
                    let target = self.lookup(pc as i64 + i64::from(offset))?;
                    let cmp = match opcode {
                        opc::IF_ICMPEQ => CmpOp::Eq,
                        opc::IF_ICMPNE => CmpOp::Ne,
                        opc::IF_ICMPLT => CmpOp::Lt,
                        opc::IF_ICMPGE => CmpOp::Ge,
                        opc::IF_ICMPGT => CmpOp::Gt,
                        _ => CmpOp::Le,
                    };
                    backend.op_if_cmp(ValType::Int, cmp, &target);
                }
                opc::GOTO => {
                    let offset = BigEndian::read_i16(&code[pc + 1..]);
                    let target = self.lookup(pc as i64 + i64::from(offset))?;
                    backend.op_goto(&target);
                }
                opc::IRETURN | opc::LRETURN | opc::FRETURN | opc::DRETURN | opc::ARETURN => {
                    backend.op_ret();
                }
                opc::RETURN => backend.op_ret_void(),
                opc::NEW => backend.op_new(),
                opc::ARRAYLENGTH => backend.op_arraylength(),
                opc::INVOKESTATIC => {
                    let index = BigEndian::read_u16(&code[pc + 1..]);
                    let owner = self.owner()?;
                    let target = owner.resolve_method(index)?;
                    if !target.access_flags.contains(MethodAccessFlags::STATIC) {
                        return Err(VmError::IncompatibleClassChange(format!(
                            "invokestatic target {}{} is not static",
                            target.name, target.descriptor
                        )));
                    }
                    backend.op_invokestatic(&target);
                }
                opc::INVOKESPECIAL => {
                    let index = BigEndian::read_u16(&code[pc + 1..]);
                    let owner = self.owner()?;
                    let target = self.special_target(&owner, owner.resolve_method(index)?)?;
                    // Special dispatches like static in this IR.
                    backend.op_invokestatic(&target);
                }
                _ => {
                    return Err(VmError::UnsupportedBytecode {
                        opcode,
                        pc: pc as u32,
                    })
                }
            }
            pc += opcodes::instruction_length(code, pc)?;
        }
        Ok(())
    }

    /// The `ACC_SUPER` rule: a non-initializer target resolved into a
    /// proper superclass of the owner dispatches through the owner's direct
    /// superclass instead.
    fn special_target(
        &self,
        owner: &Arc<Class>,
        target: Arc<Method>,
    ) -> Result<Arc<Method>, VmError> {
        if !owner.access_flags.contains(ClassAccessFlags::SUPER) || target.is_init() {
            return Ok(target);
        }
        let (Some(super_class), Some(target_class)) = (owner.super_class(), target.class()) else {
            return Ok(target);
        };
        if Arc::ptr_eq(owner, &target_class) || !owner.is_subclass_of(&target_class) {
            return Ok(target);
        }
        super_class
            .lookup_method(&target.name, &target.descriptor)
            .ok_or_else(|| VmError::NoSuchMethod {
                class: super_class.name.clone(),
                name: target.name.clone(),
                descriptor: target.descriptor.clone(),
            })
    }

    /// Branch targets must land on a block discovered by the scan.
    fn lookup(&self, offset: i64) -> Result<Arc<BasicBlock>, VmError> {
        u32::try_from(offset)
            .ok()
            .and_then(|start| self.blocks.get(&start))
            .cloned()
            .ok_or_else(|| {
                VmError::MalformedBytecode(format!(
                    "branch target {offset} is not a basic block boundary"
                ))
            })
    }

    fn owner(&self) -> Result<Arc<Class>, VmError> {
        self.method
            .class()
            .ok_or_else(|| VmError::NoClassDefFound(format!("owner of {}", self.method.name)))
    }
}

/// Renders the IR as text, one line per operation. Used by the CLI's
/// `--dump-ir` and as the translator's test probe; a compiling back end
/// would start from this shape.
#[derive(Default)]
pub struct DumpBackend {
    lines: Vec<String>,
}

impl DumpBackend {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_text(self) -> String {
        self.lines.join("\n")
    }

    fn line(&mut self, text: String) {
        self.lines.push(text);
    }
}

impl Backend for DumpBackend {
    fn prologue(&mut self) {
        self.lines.clear();
    }

    fn begin(&mut self, block: &Arc<BasicBlock>) {
        self.line(format!("block @{} [{}..{})", block.start, block.start, block.end));
    }

    fn op_const(&mut self, ty: ValType, value: i64) {
        self.line(format!("  const {ty:?} {value}"));
    }

    fn op_load(&mut self, ty: ValType, index: u16) {
        self.line(format!("  load {ty:?} {index}"));
    }

    fn op_store(&mut self, ty: ValType, index: u16) {
        self.line(format!("  store {ty:?} {index}"));
    }

    fn op_pop(&mut self) {
        self.line("  pop".into());
    }

    fn op_dup(&mut self) {
        self.line("  dup".into());
    }

    fn op_dup_x1(&mut self) {
        self.line("  dup_x1".into());
    }

    fn op_swap(&mut self) {
        self.line("  swap".into());
    }

    fn op_binary(&mut self, ty: ValType, op: BinOp) {
        self.line(format!("  binary {ty:?} {op:?}"));
    }

    fn op_iinc(&mut self, index: u16, value: i8) {
        self.line(format!("  iinc {index} {value}"));
    }

    fn op_if_cmp(&mut self, ty: ValType, op: CmpOp, target: &Arc<BasicBlock>) {
        self.line(format!("  if_cmp {ty:?} {op:?} -> @{}", target.start));
    }

    fn op_goto(&mut self, target: &Arc<BasicBlock>) {
        self.line(format!("  goto -> @{}", target.start));
    }

    fn op_ret(&mut self) {
        self.line("  ret".into());
    }

    fn op_ret_void(&mut self) {
        self.line("  ret_void".into());
    }

    fn op_new(&mut self) {
        self.line("  new".into());
    }

    fn op_arraylength(&mut self) {
        self.line("  arraylength".into());
    }

    fn op_invokestatic(&mut self, target: &Arc<Method>) {
        self.line(format!("  invokestatic {}{}", target.name, target.descriptor));
    }
}
