//! The reference back end: records each block's typed operations, then
//! runs them over an operand stack and local slots.
//!
//! Values are untyped 64-bit words. Ints live in the low 32 bits, longs
//! take the whole word, references are the word form of [`ObjRef`] with 0
//! as null. Every value occupies one slot.

use std::collections::HashMap;
use std::sync::Arc;

use crate::class::Method;
use crate::errors::VmError;
use crate::heap::ObjRef;
use crate::thread::JvmThread;
use crate::translator::{Backend, BasicBlock, BinOp, CmpOp, Translator, ValType};
use crate::vm::Jvm;

enum Op {
    Const(ValType, i64),
    Load(u16),
    Store(u16),
    Pop,
    Dup,
    DupX1,
    Swap,
    Binary(ValType, BinOp),
    Iinc(u16, i8),
    IfCmp(CmpOp, u32),
    Goto(u32),
    Ret,
    RetVoid,
    New,
    ArrayLength,
    InvokeStatic(Arc<Method>),
}

/// Translates `method`, then runs it to completion on the current thread.
/// `args` land in the first local slots in descriptor order.
pub(crate) fn execute(jvm: &Jvm, method: &Arc<Method>, args: &[u64]) -> Result<Option<u64>, VmError> {
    let mut interp = Interpreter::default();
    Translator::new(method).translate(&mut interp)?;
    interp.run(jvm, method, args)
}

/// Recorded IR of one method, keyed by block start offset.
#[derive(Default)]
pub struct Interpreter {
    blocks: Vec<Vec<Op>>,
    index: HashMap<u32, usize>,
}

impl Backend for Interpreter {
    fn prologue(&mut self) {
        self.blocks.clear();
        self.index.clear();
    }

    fn begin(&mut self, block: &Arc<BasicBlock>) {
        self.index.insert(block.start, self.blocks.len());
        self.blocks.push(Vec::new());
    }

    fn op_const(&mut self, ty: ValType, value: i64) {
        self.push_op(Op::Const(ty, value));
    }

    fn op_load(&mut self, _ty: ValType, index: u16) {
        self.push_op(Op::Load(index));
    }

    fn op_store(&mut self, _ty: ValType, index: u16) {
        self.push_op(Op::Store(index));
    }

    fn op_pop(&mut self) {
        self.push_op(Op::Pop);
    }

    fn op_dup(&mut self) {
        self.push_op(Op::Dup);
    }

    fn op_dup_x1(&mut self) {
        self.push_op(Op::DupX1);
    }

    fn op_swap(&mut self) {
        self.push_op(Op::Swap);
    }

    fn op_binary(&mut self, ty: ValType, op: BinOp) {
        self.push_op(Op::Binary(ty, op));
    }

    fn op_iinc(&mut self, index: u16, value: i8) {
        self.push_op(Op::Iinc(index, value));
    }

    fn op_if_cmp(&mut self, _ty: ValType, op: CmpOp, target: &Arc<BasicBlock>) {
        self.push_op(Op::IfCmp(op, target.start));
    }

    fn op_goto(&mut self, target: &Arc<BasicBlock>) {
        self.push_op(Op::Goto(target.start));
    }

    fn op_ret(&mut self) {
        self.push_op(Op::Ret);
    }

    fn op_ret_void(&mut self) {
        self.push_op(Op::RetVoid);
    }

    fn op_new(&mut self) {
        self.push_op(Op::New);
    }

    fn op_arraylength(&mut self) {
        self.push_op(Op::ArrayLength);
    }

    fn op_invokestatic(&mut self, target: &Arc<Method>) {
        self.push_op(Op::InvokeStatic(Arc::clone(target)));
    }
}

impl Interpreter {
    fn push_op(&mut self, op: Op) {
        if let Some(ops) = self.blocks.last_mut() {
            ops.push(op);
        }
    }

    fn block_at(&self, start: u32) -> Result<usize, VmError> {
        self.index.get(&start).copied().ok_or_else(|| {
            VmError::MalformedBytecode(format!("no basic block starts at {start}"))
        })
    }

    /// One frame, run to return or unwind. The program counter is the
    /// (block, op) pair.
    fn run(&self, jvm: &Jvm, method: &Arc<Method>, args: &[u64]) -> Result<Option<u64>, VmError> {
        let thread = JvmThread::current();
        let mut locals = vec![0u64; (method.max_locals as usize).max(args.len())];
        locals[..args.len()].copy_from_slice(args);
        let mut stack: Vec<u64> = Vec::with_capacity(method.max_stack as usize);
        let mut block = 0usize;
        let mut ip = 0usize;
        loop {
            let Some(ops) = self.blocks.get(block) else {
                return Err(VmError::MalformedBytecode(
                    "control fell off the end of the method".into(),
                ));
            };
            let Some(op) = ops.get(ip) else {
                block += 1;
                ip = 0;
                continue;
            };
            ip += 1;
            match op {
                Op::Const(ty, value) => match ty {
                    ValType::Int => stack.push(int_word(*value as i32)),
                    _ => stack.push(*value as u64),
                },
                Op::Load(index) => {
                    let value = *locals
                        .get(*index as usize)
                        .ok_or_else(|| bad_local(*index))?;
                    stack.push(value);
                }
                Op::Store(index) => {
                    let value = pop(&mut stack)?;
                    *locals
                        .get_mut(*index as usize)
                        .ok_or_else(|| bad_local(*index))? = value;
                }
                Op::Pop => {
                    pop(&mut stack)?;
                }
                Op::Dup => {
                    let top = *stack.last().ok_or_else(underflow)?;
                    stack.push(top);
                }
                Op::DupX1 => {
                    let first = pop(&mut stack)?;
                    let second = pop(&mut stack)?;
                    stack.push(first);
                    stack.push(second);
                    stack.push(first);
                }
                Op::Swap => {
                    let first = pop(&mut stack)?;
                    let second = pop(&mut stack)?;
                    stack.push(first);
                    stack.push(second);
                }
                Op::Binary(ty, op) => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    let result = match ty {
                        ValType::Int => int_word(int_binary(as_int(left), as_int(right), *op)?),
                        _ => long_binary(left as i64, right as i64, *op)? as u64,
                    };
                    if matches!(*op, BinOp::Div | BinOp::Rem)
                        && thread.pending_exception().is_some()
                    {
                        return Err(VmError::UnhandledException);
                    }
                    stack.push(result);
                }
                Op::Iinc(index, value) => {
                    let slot = locals
                        .get_mut(*index as usize)
                        .ok_or_else(|| bad_local(*index))?;
                    *slot = int_word(as_int(*slot).wrapping_add(i32::from(*value)));
                }
                Op::IfCmp(op, target) => {
                    let right = as_int(pop(&mut stack)?);
                    let left = as_int(pop(&mut stack)?);
                    let taken = match op {
                        CmpOp::Eq => left == right,
                        CmpOp::Ne => left != right,
                        CmpOp::Lt => left < right,
                        CmpOp::Ge => left >= right,
                        CmpOp::Gt => left > right,
                        CmpOp::Le => left <= right,
                    };
                    if taken {
                        block = self.block_at(*target)?;
                        ip = 0;
                    }
                }
                Op::Goto(target) => {
                    block = self.block_at(*target)?;
                    ip = 0;
                }
                Op::Ret => return Ok(Some(pop(&mut stack)?)),
                Op::RetVoid => return Ok(None),
                Op::New => {
                    let object = thread.alloc_object(jvm.heap(), None)?;
                    if thread.pending_exception().is_some() {
                        return Err(VmError::UnhandledException);
                    }
                    stack.push(object.as_word());
                }
                Op::ArrayLength => {
                    let word = pop(&mut stack)?;
                    let Some(array) = ObjRef::from_word(word) else {
                        return Err(VmError::NullPointer);
                    };
                    // No verifier in front of this; the reference is trusted
                    // to come from an array allocation.
                    let length = unsafe { array.array_length() };
                    if thread.pending_exception().is_some() {
                        return Err(VmError::UnhandledException);
                    }
                    stack.push(u64::from(length));
                }
                Op::InvokeStatic(target) => {
                    let argc = target.args_count as usize;
                    if stack.len() < argc {
                        return Err(underflow());
                    }
                    let call_args = stack.split_off(stack.len() - argc);
                    if let Some(value) = execute(jvm, target, &call_args)? {
                        stack.push(value);
                    }
                }
            }
        }
    }
}

fn int_word(value: i32) -> u64 {
    u64::from(value as u32)
}

fn as_int(word: u64) -> i32 {
    word as u32 as i32
}

fn int_binary(left: i32, right: i32, op: BinOp) -> Result<i32, VmError> {
    Ok(match op {
        BinOp::Add => left.wrapping_add(right),
        BinOp::Sub => left.wrapping_sub(right),
        BinOp::Mul => left.wrapping_mul(right),
        BinOp::Div => {
            if right == 0 {
                return Err(VmError::Arithmetic);
            }
            left.wrapping_div(right)
        }
        BinOp::Rem => {
            if right == 0 {
                return Err(VmError::Arithmetic);
            }
            left.wrapping_rem(right)
        }
        BinOp::And => left & right,
        BinOp::Or => left | right,
        BinOp::Xor => left ^ right,
    })
}

fn long_binary(left: i64, right: i64, op: BinOp) -> Result<i64, VmError> {
    Ok(match op {
        BinOp::Add => left.wrapping_add(right),
        BinOp::Sub => left.wrapping_sub(right),
        BinOp::Mul => left.wrapping_mul(right),
        BinOp::Div => {
            if right == 0 {
                return Err(VmError::Arithmetic);
            }
            left.wrapping_div(right)
        }
        BinOp::Rem => {
            if right == 0 {
                return Err(VmError::Arithmetic);
            }
            left.wrapping_rem(right)
        }
        BinOp::And => left & right,
        BinOp::Or => left | right,
        BinOp::Xor => left ^ right,
    })
}

fn pop(stack: &mut Vec<u64>) -> Result<u64, VmError> {
    stack.pop().ok_or_else(underflow)
}

fn underflow() -> VmError {
    VmError::MalformedBytecode("operand stack underflow".into())
}

fn bad_local(index: u16) -> VmError {
    VmError::MalformedBytecode(format!("local slot {index} out of range"))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Weak;

    use jclass::access_flags::MethodAccessFlags;

    fn static_method(descriptor: &str, max_locals: u16, code: Vec<u8>) -> Arc<Method> {
        let (args_count, return_type) =
            jclass::descriptors::parse_method_descriptor(descriptor).unwrap();
        Arc::new(Method {
            class: Weak::new(),
            access_flags: MethodAccessFlags::STATIC,
            name: "t".into(),
            descriptor: descriptor.into(),
            return_type,
            args_count,
            max_stack: 8,
            max_locals,
            code,
        })
    }

    #[test]
    fn empty_static_method_returns_void() {
        let jvm = Jvm::new();
        let method = static_method("()V", 0, vec![0xb1]);
        assert_eq!(jvm.invoke(&method).unwrap(), None);
    }

    #[test]
    fn integer_add_returns_five() {
        let jvm = Jvm::new();
        let method = static_method("()I", 0, vec![0x05, 0x06, 0x60, 0xac]);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(5));
    }

    #[test]
    fn loop_sums_zero_one_two() {
        let jvm = Jvm::new();
        let code = vec![
            0x03, 0x3b, 0x03, 0x3c, 0xa7, 0x00, 0x0d, 0x1a, 0x1b, 0x60, 0x3b, 0x84, 0x01, 0x01,
            0xa7, 0x00, 0x03, 0x1b, 0x06, 0xa1, 0xff, 0xf4, 0x1a, 0xac,
        ];
        let method = static_method("()I", 2, code);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(3));
    }

    #[test]
    fn int_arithmetic_wraps_around() {
        let jvm = Jvm::new();
        // iconst_m1 * iconst_m1
        let method = static_method("()I", 0, vec![0x02, 0x02, 0x68, 0xac]);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(1));
        // iconst_m1 - iconst_m1
        let method = static_method("()I", 0, vec![0x02, 0x02, 0x64, 0xac]);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(0));
        // -1 comes back zero-extended in the low 32 bits of the word.
        let method = static_method("()I", 0, vec![0x02, 0xac]);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(0xffff_ffff));
    }

    #[test]
    fn long_constants_use_the_whole_word() {
        let jvm = Jvm::new();
        // lconst_1, lconst_1, lsub -> 0; lconst_0, lconst_1, lsub -> -1.
        let method = static_method("()J", 0, vec![0x0a, 0x0a, 0x65, 0xad]);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(0));
        let method = static_method("()J", 0, vec![0x09, 0x0a, 0x65, 0xad]);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(u64::MAX));
    }

    #[test]
    fn division_by_zero_unwinds_with_arithmetic_exception() {
        let jvm = Jvm::new();
        let method = static_method("()I", 0, vec![0x05, 0x03, 0x6c, 0xac]);
        assert!(matches!(jvm.invoke(&method), Err(VmError::Arithmetic)));
        let method = static_method("()I", 0, vec![0x05, 0x03, 0x70, 0xac]);
        assert!(matches!(jvm.invoke(&method), Err(VmError::Arithmetic)));
    }

    #[test]
    fn stack_ops_match_jvm_semantics() {
        let jvm = Jvm::new();
        // iconst_2, iconst_3, swap, isub -> 3 - 2 = 1
        let method = static_method("()I", 0, vec![0x05, 0x06, 0x5f, 0x64, 0xac]);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(1));
        // iconst_3, dup, imul -> 9
        let method = static_method("()I", 0, vec![0x06, 0x59, 0x68, 0xac]);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(9));
        // iconst_4, iconst_3, dup_x1, isub, isub -> 3 - (4 - 3) = 2
        let method = static_method("()I", 0, vec![0x07, 0x06, 0x5a, 0x64, 0x64, 0xac]);
        assert_eq!(jvm.invoke(&method).unwrap(), Some(2));
    }

    #[test]
    fn new_pushes_a_fresh_object() {
        let jvm = Jvm::new();
        // new, areturn
        let method = static_method("()Ljava/lang/Object;", 0, vec![0xbb, 0x00, 0x00, 0xb0]);
        let word = jvm.invoke(&method).unwrap().unwrap();
        assert!(ObjRef::from_word(word).is_some());
    }

    #[test]
    fn arraylength_reads_the_header_and_null_checks() {
        let jvm = Jvm::new();
        let thread = JvmThread::current();
        let array = thread.alloc_array(jvm.heap(), None, 7).unwrap();
        // aload_0, arraylength, ireturn
        let method = static_method("([I)I", 1, vec![0x2a, 0xbe, 0xac]);
        assert_eq!(
            execute(&jvm, &method, &[array.as_word()]).unwrap(),
            Some(7)
        );
        assert!(matches!(
            execute(&jvm, &method, &[0]),
            Err(VmError::NullPointer)
        ));
    }

    #[test]
    fn embedder_exception_unwinds_at_the_next_allocation() {
        let jvm = Jvm::new();
        let thread = JvmThread::current();
        let exception = thread.alloc_object(jvm.heap(), None).unwrap();
        jvm.throw_exception(exception);
        let method = static_method("()Ljava/lang/Object;", 0, vec![0xbb, 0x00, 0x00, 0xb0]);
        assert!(matches!(
            jvm.invoke(&method),
            Err(VmError::UnhandledException)
        ));
        assert_eq!(thread.take_exception(), Some(exception));
    }

    #[test]
    fn embedder_exception_unwinds_at_the_next_division() {
        let jvm = Jvm::new();
        let thread = JvmThread::current();
        let exception = thread.alloc_object(jvm.heap(), None).unwrap();
        jvm.throw_exception(exception);
        // iconst_2, iconst_1, idiv, ireturn: no allocation before the division.
        let method = static_method("()I", 0, vec![0x05, 0x04, 0x6c, 0xac]);
        assert!(matches!(
            jvm.invoke(&method),
            Err(VmError::UnhandledException)
        ));
        assert_eq!(thread.take_exception(), Some(exception));
    }

    #[test]
    fn embedder_exception_unwinds_at_the_next_dereference() {
        let jvm = Jvm::new();
        let thread = JvmThread::current();
        let array = thread.alloc_array(jvm.heap(), None, 7).unwrap();
        let exception = thread.alloc_object(jvm.heap(), None).unwrap();
        jvm.throw_exception(exception);
        // aload_0, arraylength, ireturn: no allocation before the dereference.
        let method = static_method("([I)I", 1, vec![0x2a, 0xbe, 0xac]);
        assert!(matches!(
            execute(&jvm, &method, &[array.as_word()]),
            Err(VmError::UnhandledException)
        ));
        assert_eq!(thread.take_exception(), Some(exception));
    }

    #[test]
    fn allocation_failure_is_out_of_memory() {
        let jvm = Jvm::with_options(crate::vm::JvmOptions {
            heap_block_size: 64,
            heap_block_budget: 0,
            ..Default::default()
        });
        let method = static_method("()Ljava/lang/Object;", 0, vec![0xbb, 0x00, 0x00, 0xb0]);
        assert!(matches!(jvm.invoke(&method), Err(VmError::OutOfMemory)));
    }

    #[test]
    fn unsupported_bytecode_fails_before_running() {
        let jvm = Jvm::new();
        let method = static_method("()I", 0, vec![0xff, 0xac]);
        assert!(matches!(
            jvm.invoke(&method),
            Err(VmError::UnsupportedBytecode {
                opcode: 0xff,
                pc: 0
            })
        ));
    }
}
