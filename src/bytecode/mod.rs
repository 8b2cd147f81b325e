//! The JIT backend: lowers a syntax tree to native code through cranelift.
//!
//! Emission keeps an internal value stack of JIT-level handles; the
//! discipline is part of the contract with the tree: literals and
//! conversions push, operators consume two and push one, string forms
//! occupy two slots (buffer pointer, then size). Generated code performs
//! all engine interaction through the callback ABI, registered here as
//! imported symbols.
//!
//! Runtime faults a trap would normally raise (division by zero, overflow
//! in division) are lowered as explicit guards that report through the
//! `error` callback and return early, so a render never takes the process
//! down.

use std::ffi::c_void;

use cranelift::codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift::codegen::ir::{types, AbiParam, FuncRef, InstBuilder, Signature, Type};
use cranelift::codegen::ir::Value as JitValue;
use cranelift::codegen::isa::CallConv;
use cranelift::frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use rustc_hash::FxHashMap;

use crate::ast::{
    EmitResult, Expression, ExprType, Filter, Statements, SyntaxTree, Variable as TplVariable,
};
use crate::error::{CompileError, Error};
use crate::generator::Generator;
use crate::runtime::{callbacks, Handler};

/// Signature of the generated entry function.
type ShowTemplate = unsafe extern "C" fn(*mut c_void);

/// A template compiled to native code. Read-only once built; safe to
/// invoke from multiple threads concurrently, each with its own handler.
pub struct Bytecode {
    /// The tree the code was generated from. Generated code holds
    /// pointers into its strings, so it lives exactly as long as the code.
    tree: SyntaxTree,
    /// Literal strings synthesized at emit time, kept alive the same way.
    #[allow(dead_code)]
    strings: Vec<String>,
    /// The module owning the executable memory.
    #[allow(dead_code)]
    module: JITModule,
    /// Entry point of the compiled template.
    entry: ShowTemplate,
}

// Safety: the compiled code and the tree are immutable after construction;
// every render carries its own handler.
unsafe impl Send for Bytecode {}
unsafe impl Sync for Bytecode {}

impl Bytecode {
    /// Compiles a syntax tree to native code.
    pub fn new(tree: SyntaxTree) -> Result<Self, Error> {
        let mut builder = JITBuilder::new(cranelift_module::default_libcall_names())
            .map_err(|e| CompileError::emit(format!("failed to create jit builder: {}", e)))?;
        register_symbols(&mut builder);

        let mut module = JITModule::new(builder);
        let ptr_type = module.target_config().pointer_type();
        let call_conv = c_call_conv(&module);

        // import the callback ABI
        let mut callback_ids = FxHashMap::default();
        for (name, sig) in callback_signatures(ptr_type, call_conv) {
            let func_id = module
                .declare_function(name, Linkage::Import, &sig)
                .map_err(|e| CompileError::emit(format!("failed to declare {}: {}", name, e)))?;
            callback_ids.insert(name, func_id);
        }

        // the one exported entry: void show_template(void *userdata)
        let mut entry_sig = Signature::new(call_conv);
        entry_sig.params.push(AbiParam::new(ptr_type));
        let entry_id = module
            .declare_function("show_template", Linkage::Export, &entry_sig)
            .map_err(|e| CompileError::emit(format!("failed to declare entry: {}", e)))?;

        let mut ctx = module.make_context();
        ctx.func.signature = entry_sig;

        let mut strings = Vec::new();
        let mut builder_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);

            let entry_block = builder.create_block();
            builder.append_block_params_for_function_params(entry_block);
            builder.switch_to_block(entry_block);
            let userdata = builder.block_params(entry_block)[0];

            let mut funcs = FxHashMap::default();
            for (name, func_id) in &callback_ids {
                funcs.insert(*name, module.declare_func_in_func(*func_id, builder.func));
            }

            let mut emitter = Emitter {
                builder,
                funcs,
                userdata,
                ptr_type,
                stack: Vec::new(),
                strings: &mut strings,
                var_counter: 0,
            };
            tree.generate(&mut emitter).map_err(Error::Compile)?;

            debug_assert!(emitter.stack.is_empty(), "value stack must drain");
            let mut builder = emitter.builder;
            builder.ins().return_(&[]);
            builder.seal_all_blocks();
            builder.finalize();
        }

        module
            .define_function(entry_id, &mut ctx)
            .map_err(|e| CompileError::emit(format!("jit compilation failed: {}", e)))?;
        module.clear_context(&mut ctx);
        module
            .finalize_definitions()
            .map_err(|e| CompileError::emit(format!("jit finalization failed: {}", e)))?;

        let entry_ptr = module.get_finalized_function(entry_id);
        log::trace!("jit-compiled template entry at {:p}", entry_ptr);
        // Safety: the declared signature matches ShowTemplate
        let entry = unsafe { std::mem::transmute::<*const u8, ShowTemplate>(entry_ptr) };

        Ok(Self {
            tree,
            strings,
            module,
            entry,
        })
    }

    /// Runs the compiled template against a handler.
    pub fn process(&self, handler: &mut Handler<'_>) {
        // Safety: the entry was compiled from this tree against the
        // callback ABI, and the handler outlives the call.
        unsafe { (self.entry)(handler as *mut Handler as *mut c_void) }
    }

    /// The tree this template was compiled from.
    pub fn tree(&self) -> &SyntaxTree {
        &self.tree
    }
}

/// The C calling convention for the current platform, so callback calls
/// match `extern "C"` exactly.
fn c_call_conv(module: &JITModule) -> CallConv {
    #[cfg(all(target_os = "windows", target_arch = "x86_64"))]
    {
        let _ = module;
        CallConv::WindowsFastcall
    }
    #[cfg(not(all(target_os = "windows", target_arch = "x86_64")))]
    {
        #[cfg(target_arch = "x86_64")]
        {
            let _ = module;
            CallConv::SystemV
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            module.target_config().default_call_conv
        }
    }
}

/// Registers the callback ABI as resolvable symbols on the JIT builder.
fn register_symbols(builder: &mut JITBuilder) {
    builder.symbol("smart_tpl_write", callbacks::smart_tpl_write as *const u8);
    builder.symbol("smart_tpl_output", callbacks::smart_tpl_output as *const u8);
    builder.symbol("smart_tpl_variable", callbacks::smart_tpl_variable as *const u8);
    builder.symbol("smart_tpl_member", callbacks::smart_tpl_member as *const u8);
    builder.symbol("smart_tpl_member_at", callbacks::smart_tpl_member_at as *const u8);
    builder.symbol("smart_tpl_to_string", callbacks::smart_tpl_to_string as *const u8);
    builder.symbol("smart_tpl_to_numeric", callbacks::smart_tpl_to_numeric as *const u8);
    builder.symbol("smart_tpl_to_boolean", callbacks::smart_tpl_to_boolean as *const u8);
    builder.symbol("smart_tpl_to_double", callbacks::smart_tpl_to_double as *const u8);
    builder.symbol("smart_tpl_size", callbacks::smart_tpl_size as *const u8);
    builder.symbol(
        "smart_tpl_numeric_to_string",
        callbacks::smart_tpl_numeric_to_string as *const u8,
    );
    builder.symbol(
        "smart_tpl_double_to_string",
        callbacks::smart_tpl_double_to_string as *const u8,
    );
    builder.symbol(
        "smart_tpl_string_to_numeric",
        callbacks::smart_tpl_string_to_numeric as *const u8,
    );
    builder.symbol(
        "smart_tpl_create_iterator",
        callbacks::smart_tpl_create_iterator as *const u8,
    );
    builder.symbol(
        "smart_tpl_valid_iterator",
        callbacks::smart_tpl_valid_iterator as *const u8,
    );
    builder.symbol(
        "smart_tpl_iterator_next",
        callbacks::smart_tpl_iterator_next as *const u8,
    );
    builder.symbol(
        "smart_tpl_iterator_key",
        callbacks::smart_tpl_iterator_key as *const u8,
    );
    builder.symbol(
        "smart_tpl_iterator_value",
        callbacks::smart_tpl_iterator_value as *const u8,
    );
    builder.symbol("smart_tpl_strcmp", callbacks::smart_tpl_strcmp as *const u8);
    builder.symbol("smart_tpl_modifier", callbacks::smart_tpl_modifier as *const u8);
    builder.symbol(
        "smart_tpl_modify_variable",
        callbacks::smart_tpl_modify_variable as *const u8,
    );
    builder.symbol("smart_tpl_assign", callbacks::smart_tpl_assign as *const u8);
    builder.symbol(
        "smart_tpl_assign_boolean",
        callbacks::smart_tpl_assign_boolean as *const u8,
    );
    builder.symbol(
        "smart_tpl_assign_numeric",
        callbacks::smart_tpl_assign_numeric as *const u8,
    );
    builder.symbol(
        "smart_tpl_assign_double",
        callbacks::smart_tpl_assign_double as *const u8,
    );
    builder.symbol(
        "smart_tpl_assign_string",
        callbacks::smart_tpl_assign_string as *const u8,
    );
    builder.symbol("smart_tpl_error", callbacks::smart_tpl_error as *const u8);
}

/// Builds the imported signature of every callback.
fn callback_signatures(ptr: Type, call_conv: CallConv) -> Vec<(&'static str, Signature)> {
    let sig = |params: &[Type], ret: Option<Type>| {
        let mut sig = Signature::new(call_conv);
        for &param in params {
            sig.params.push(AbiParam::new(param));
        }
        if let Some(ret) = ret {
            sig.returns.push(AbiParam::new(ret));
        }
        sig
    };

    vec![
        ("smart_tpl_write", sig(&[ptr, ptr, ptr], None)),
        ("smart_tpl_output", sig(&[ptr, ptr, types::I32], None)),
        ("smart_tpl_variable", sig(&[ptr, ptr, ptr], Some(ptr))),
        ("smart_tpl_member", sig(&[ptr, ptr, ptr, ptr], Some(ptr))),
        ("smart_tpl_member_at", sig(&[ptr, ptr, types::I64], Some(ptr))),
        ("smart_tpl_to_string", sig(&[ptr, ptr], Some(ptr))),
        ("smart_tpl_to_numeric", sig(&[ptr, ptr], Some(types::I64))),
        ("smart_tpl_to_boolean", sig(&[ptr, ptr], Some(types::I32))),
        ("smart_tpl_to_double", sig(&[ptr, ptr], Some(types::F64))),
        ("smart_tpl_size", sig(&[ptr, ptr], Some(ptr))),
        (
            "smart_tpl_numeric_to_string",
            sig(&[ptr, types::I64], Some(ptr)),
        ),
        (
            "smart_tpl_double_to_string",
            sig(&[ptr, types::F64], Some(ptr)),
        ),
        (
            "smart_tpl_string_to_numeric",
            sig(&[ptr, ptr, ptr], Some(types::I64)),
        ),
        ("smart_tpl_create_iterator", sig(&[ptr, ptr], Some(ptr))),
        ("smart_tpl_valid_iterator", sig(&[ptr, ptr], Some(types::I32))),
        ("smart_tpl_iterator_next", sig(&[ptr, ptr], None)),
        ("smart_tpl_iterator_key", sig(&[ptr, ptr], Some(ptr))),
        ("smart_tpl_iterator_value", sig(&[ptr, ptr], Some(ptr))),
        (
            "smart_tpl_strcmp",
            sig(&[ptr, ptr, ptr, ptr, ptr], Some(types::I32)),
        ),
        ("smart_tpl_modifier", sig(&[ptr, ptr, ptr], Some(ptr))),
        ("smart_tpl_modify_variable", sig(&[ptr, ptr, ptr], Some(ptr))),
        ("smart_tpl_assign", sig(&[ptr, ptr, ptr, ptr], None)),
        (
            "smart_tpl_assign_boolean",
            sig(&[ptr, ptr, ptr, types::I32], None),
        ),
        (
            "smart_tpl_assign_numeric",
            sig(&[ptr, ptr, ptr, types::I64], None),
        ),
        (
            "smart_tpl_assign_double",
            sig(&[ptr, ptr, ptr, types::F64], None),
        ),
        ("smart_tpl_assign_string", sig(&[ptr, ptr, ptr, ptr, ptr], None)),
        ("smart_tpl_error", sig(&[ptr, ptr, ptr], None)),
    ]
}

/// How `==` and `!=` lower, decided by the operands' static types.
enum CompareKind {
    Numeric,
    Double,
    Boolean,
    Strings,
}

fn compare_kind(left: &Expression, right: &Expression) -> Result<CompareKind, CompileError> {
    use ExprType::*;
    match (left.static_type(), right.static_type()) {
        (String, String) => Ok(CompareKind::Strings),
        (Boolean, Boolean) => Ok(CompareKind::Boolean),
        (String, _) | (_, String) | (Boolean, _) | (_, Boolean) => Err(CompileError::emit(
            "comparison between incompatible static types",
        )),
        (Double, _) | (_, Double) => Ok(CompareKind::Double),
        _ => Ok(CompareKind::Numeric),
    }
}

/// The function-level emitter implementing the generator contract.
struct Emitter<'a> {
    builder: FunctionBuilder<'a>,
    funcs: FxHashMap<&'static str, FuncRef>,
    userdata: JitValue,
    ptr_type: Type,
    /// The emit-time value stack.
    stack: Vec<JitValue>,
    /// Owned storage for literal strings baked into the code.
    strings: &'a mut Vec<String>,
    /// Counter handing out unique indices for `declare_var`.
    var_counter: usize,
}

impl Emitter<'_> {
    fn new_var(&mut self, ty: Type) -> Variable {
        let var = Variable::from_u32(self.var_counter as u32);
        self.var_counter += 1;
        self.builder.declare_var(var, ty);
        var
    }

    fn push(&mut self, value: JitValue) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<JitValue, CompileError> {
        self.stack
            .pop()
            .ok_or_else(|| CompileError::emit("internal: emitter value stack underflow"))
    }

    /// Calls a callback, returning its result value if it has one.
    fn call(&mut self, name: &'static str, args: &[JitValue]) -> Result<Option<JitValue>, CompileError> {
        let func = self
            .funcs
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::emit(format!("internal: unknown callback {}", name)))?;
        let call = self.builder.ins().call(func, args);
        Ok(self.builder.inst_results(call).first().copied())
    }

    fn call1(&mut self, name: &'static str, args: &[JitValue]) -> Result<JitValue, CompileError> {
        self.call(name, args)?
            .ok_or_else(|| CompileError::emit(format!("internal: {} returns nothing", name)))
    }

    /// Constants for a string that lives in the tree.
    fn name_const(&mut self, text: &str) -> (JitValue, JitValue) {
        let buf = self.builder.ins().iconst(self.ptr_type, text.as_ptr() as i64);
        let size = self.builder.ins().iconst(self.ptr_type, text.len() as i64);
        (buf, size)
    }

    /// Constants for a string synthesized during emission; a copy is kept
    /// alive next to the compiled code.
    fn interned_const(&mut self, text: &str) -> (JitValue, JitValue) {
        self.strings.push(text.to_owned());
        let owned = self.strings.last().map(|s| s.as_str()).unwrap_or("");
        let buf = self.builder.ins().iconst(self.ptr_type, owned.as_ptr() as i64);
        let size = self.builder.ins().iconst(self.ptr_type, owned.len() as i64);
        (buf, size)
    }

    /// Widens a callback boolean (i32) or comparison flag (i8) to the
    /// stack's integer width.
    fn widen(&mut self, value: JitValue) -> JitValue {
        self.builder.ins().uextend(types::I64, value)
    }

    /// Reports a runtime fault and leaves the generated function early.
    /// The current block is finished; emission continues in a fresh one.
    fn emit_error_exit(&mut self, message: &'static str) -> EmitResult {
        let (buf, size) = self.name_const(message);
        self.call("smart_tpl_error", &[self.userdata, buf, size])?;
        self.builder.ins().return_(&[]);
        Ok(())
    }

    /// Evaluates an expression down to a single stack slot.
    fn eval_numeric(&mut self, expression: &Expression) -> Result<JitValue, CompileError> {
        expression.numeric(self)?;
        self.pop()
    }

    fn eval_boolean(&mut self, expression: &Expression) -> Result<JitValue, CompileError> {
        expression.boolean(self)?;
        self.pop()
    }

    fn eval_double(&mut self, expression: &Expression) -> Result<JitValue, CompileError> {
        expression.double(self)?;
        let value = self.pop()?;
        // integer-typed sub-emissions (arithmetic operands) get widened here
        if self.builder.func.dfg.value_type(value) == types::F64 {
            Ok(value)
        } else {
            Ok(self.builder.ins().fcvt_from_sint(types::F64, value))
        }
    }

    /// Evaluates an expression's string form into (buffer, size).
    fn eval_string(&mut self, expression: &Expression) -> Result<(JitValue, JitValue), CompileError> {
        expression.string(self)?;
        let size = self.pop()?;
        let buf = self.pop()?;
        Ok((buf, size))
    }

    fn eval_pointer(&mut self, expression: &Expression) -> Result<JitValue, CompileError> {
        expression.pointer(self)?;
        self.pop()
    }

    /// Guards a divisor: reports on zero, and on the one overflowing
    /// signed division pair.
    fn guard_division(
        &mut self,
        left: JitValue,
        right: JitValue,
        zero_message: &'static str,
    ) -> EmitResult {
        let is_zero = self.builder.ins().icmp_imm(IntCC::Equal, right, 0);
        let zero_block = self.builder.create_block();
        let nonzero_block = self.builder.create_block();
        self.builder
            .ins()
            .brif(is_zero, zero_block, &[], nonzero_block, &[]);

        self.builder.switch_to_block(zero_block);
        self.emit_error_exit(zero_message)?;

        self.builder.switch_to_block(nonzero_block);
        let min = self.builder.ins().icmp_imm(IntCC::Equal, left, i64::MIN);
        let neg_one = self.builder.ins().icmp_imm(IntCC::Equal, right, -1);
        let overflows = self.builder.ins().band(min, neg_one);
        let overflow_block = self.builder.create_block();
        let ok_block = self.builder.create_block();
        self.builder
            .ins()
            .brif(overflows, overflow_block, &[], ok_block, &[]);

        self.builder.switch_to_block(overflow_block);
        self.emit_error_exit("Overflow during checked arithmetic operation")?;

        self.builder.switch_to_block(ok_block);
        Ok(())
    }

    /// Lowers one side of a short-circuit operator into a stored result.
    fn binary_comparison(
        &mut self,
        left: &Expression,
        right: &Expression,
        condition: IntCC,
    ) -> EmitResult {
        let l = self.eval_numeric(left)?;
        let r = self.eval_numeric(right)?;
        let flag = self.builder.ins().icmp(condition, l, r);
        let wide = self.widen(flag);
        self.push(wide);
        Ok(())
    }

    /// Lowers `==`/`!=` with the static-type dispatch of the contract.
    fn equality(&mut self, left: &Expression, right: &Expression, negate: bool) -> EmitResult {
        match compare_kind(left, right)? {
            CompareKind::Numeric => {
                let cc = if negate { IntCC::NotEqual } else { IntCC::Equal };
                self.binary_comparison(left, right, cc)
            }
            CompareKind::Boolean => {
                let l = self.eval_boolean(left)?;
                let r = self.eval_boolean(right)?;
                let cc = if negate { IntCC::NotEqual } else { IntCC::Equal };
                let flag = self.builder.ins().icmp(cc, l, r);
                let wide = self.widen(flag);
                self.push(wide);
                Ok(())
            }
            CompareKind::Double => {
                let l = self.eval_double(left)?;
                let r = self.eval_double(right)?;
                let cc = if negate {
                    FloatCC::NotEqual
                } else {
                    FloatCC::Equal
                };
                let flag = self.builder.ins().fcmp(cc, l, r);
                let wide = self.widen(flag);
                self.push(wide);
                Ok(())
            }
            CompareKind::Strings => {
                let (l_buf, l_size) = self.eval_string(left)?;
                let (r_buf, r_size) = self.eval_string(right)?;
                let cmp = self.call1(
                    "smart_tpl_strcmp",
                    &[self.userdata, l_buf, l_size, r_buf, r_size],
                )?;
                // the callback yields 0 for equal
                let cc = if negate { IntCC::NotEqual } else { IntCC::Equal };
                let flag = self.builder.ins().icmp_imm(cc, cmp, 0);
                let wide = self.widen(flag);
                self.push(wide);
                Ok(())
            }
        }
    }

    /// Leaves a value pointer for a filter base. Runtime-computed scalars
    /// go through the typed wrap callbacks; constant text has no channel
    /// into the value world and is rejected at emit time.
    fn filter_base_pointer(&mut self, base: &Expression) -> EmitResult {
        match base.static_type() {
            ExprType::Value => base.pointer(self),
            ExprType::Numeric => {
                let n = self.eval_numeric(base)?;
                let value = self.call1("smart_tpl_numeric_to_string", &[self.userdata, n])?;
                self.push(value);
                Ok(())
            }
            ExprType::Double => {
                let d = self.eval_double(base)?;
                let value = self.call1("smart_tpl_double_to_string", &[self.userdata, d])?;
                self.push(value);
                Ok(())
            }
            ExprType::String | ExprType::Boolean => Err(CompileError::emit(
                "modifiers cannot be applied to this expression",
            )),
        }
    }
}

impl Generator for Emitter<'_> {
    fn raw(&mut self, data: &str) -> EmitResult {
        if data.is_empty() {
            return Ok(());
        }
        let (buf, size) = self.name_const(data);
        self.call("smart_tpl_write", &[self.userdata, buf, size])?;
        Ok(())
    }

    fn output(&mut self, expression: &Expression, escape: bool) -> EmitResult {
        let value = self.eval_pointer(expression)?;
        let escape = self.builder.ins().iconst(types::I32, i64::from(escape));
        self.call("smart_tpl_output", &[self.userdata, value, escape])?;
        Ok(())
    }

    fn write(&mut self, expression: &Expression) -> EmitResult {
        match expression.static_type() {
            ExprType::String => {
                let (buf, size) = self.eval_string(expression)?;
                self.call("smart_tpl_write", &[self.userdata, buf, size])?;
                Ok(())
            }
            ExprType::Numeric | ExprType::Boolean => {
                self.numeric_to_string(expression)?;
                let size = self.pop()?;
                let buf = self.pop()?;
                self.call("smart_tpl_write", &[self.userdata, buf, size])?;
                Ok(())
            }
            ExprType::Double => {
                let d = self.eval_double(expression)?;
                let value = self.call1("smart_tpl_double_to_string", &[self.userdata, d])?;
                let buf = self.call1("smart_tpl_to_string", &[self.userdata, value])?;
                let size = self.call1("smart_tpl_size", &[self.userdata, value])?;
                self.call("smart_tpl_write", &[self.userdata, buf, size])?;
                Ok(())
            }
            ExprType::Value => Err(CompileError::emit(
                "internal: value-typed expressions go through output",
            )),
        }
    }

    fn var_pointer(&mut self, name: &str) -> EmitResult {
        let (buf, size) = self.name_const(name);
        let value = self.call1("smart_tpl_variable", &[self.userdata, buf, size])?;
        self.push(value);
        Ok(())
    }

    fn member_pointer(&mut self, parent: &TplVariable, name: &str) -> EmitResult {
        parent.pointer(self)?;
        let parent_ptr = self.pop()?;
        let (buf, size) = self.name_const(name);
        let value = self.call1("smart_tpl_member", &[self.userdata, parent_ptr, buf, size])?;
        self.push(value);
        Ok(())
    }

    fn member_pointer_at(&mut self, parent: &TplVariable, index: &Expression) -> EmitResult {
        parent.pointer(self)?;
        let parent_ptr = self.pop()?;
        if index.static_type() == ExprType::Numeric {
            let position = self.eval_numeric(index)?;
            let value = self.call1(
                "smart_tpl_member_at",
                &[self.userdata, parent_ptr, position],
            )?;
            self.push(value);
        } else {
            let (buf, size) = self.eval_string(index)?;
            let value = self.call1("smart_tpl_member", &[self.userdata, parent_ptr, buf, size])?;
            self.push(value);
        }
        Ok(())
    }

    fn string_literal(&mut self, value: &str) -> EmitResult {
        let (buf, size) = self.interned_const(value);
        self.push(buf);
        self.push(size);
        Ok(())
    }

    fn numeric_literal(&mut self, value: i64) -> EmitResult {
        let constant = self.builder.ins().iconst(types::I64, value);
        self.push(constant);
        Ok(())
    }

    fn double_literal(&mut self, value: f64) -> EmitResult {
        let constant = self.builder.ins().f64const(value);
        self.push(constant);
        Ok(())
    }

    fn string_value(&mut self, source: &Expression) -> EmitResult {
        let value = self.eval_pointer(source)?;
        let buf = self.call1("smart_tpl_to_string", &[self.userdata, value])?;
        let size = self.call1("smart_tpl_size", &[self.userdata, value])?;
        self.push(buf);
        self.push(size);
        Ok(())
    }

    fn numeric_value(&mut self, source: &Expression) -> EmitResult {
        let value = self.eval_pointer(source)?;
        let numeric = self.call1("smart_tpl_to_numeric", &[self.userdata, value])?;
        self.push(numeric);
        Ok(())
    }

    fn boolean_value(&mut self, source: &Expression) -> EmitResult {
        let value = self.eval_pointer(source)?;
        let boolean = self.call1("smart_tpl_to_boolean", &[self.userdata, value])?;
        let wide = self.widen(boolean);
        self.push(wide);
        Ok(())
    }

    fn double_value(&mut self, source: &Expression) -> EmitResult {
        let value = self.eval_pointer(source)?;
        let double = self.call1("smart_tpl_to_double", &[self.userdata, value])?;
        self.push(double);
        Ok(())
    }

    fn numeric_to_string(&mut self, expression: &Expression) -> EmitResult {
        let n = self.eval_numeric(expression)?;
        let value = self.call1("smart_tpl_numeric_to_string", &[self.userdata, n])?;
        let buf = self.call1("smart_tpl_to_string", &[self.userdata, value])?;
        let size = self.call1("smart_tpl_size", &[self.userdata, value])?;
        self.push(buf);
        self.push(size);
        Ok(())
    }

    fn string_to_numeric(&mut self, expression: &Expression) -> EmitResult {
        let (buf, size) = self.eval_string(expression)?;
        let numeric = self.call1("smart_tpl_string_to_numeric", &[self.userdata, buf, size])?;
        self.push(numeric);
        Ok(())
    }

    fn plus(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        let l = self.eval_numeric(left)?;
        let r = self.eval_numeric(right)?;
        let sum = self.builder.ins().iadd(l, r);
        self.push(sum);
        Ok(())
    }

    fn minus(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        let l = self.eval_numeric(left)?;
        let r = self.eval_numeric(right)?;
        let difference = self.builder.ins().isub(l, r);
        self.push(difference);
        Ok(())
    }

    fn multiply(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        let l = self.eval_numeric(left)?;
        let r = self.eval_numeric(right)?;
        let product = self.builder.ins().imul(l, r);
        self.push(product);
        Ok(())
    }

    fn divide(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        let l = self.eval_numeric(left)?;
        let r = self.eval_numeric(right)?;
        self.guard_division(l, r, "Division by zero")?;
        let quotient = self.builder.ins().sdiv(l, r);
        self.push(quotient);
        Ok(())
    }

    fn modulo(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        let l = self.eval_numeric(left)?;
        let r = self.eval_numeric(right)?;
        self.guard_division(l, r, "Modulo by zero")?;
        let remainder = self.builder.ins().srem(l, r);
        self.push(remainder);
        Ok(())
    }

    fn equals(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.equality(left, right, false)
    }

    fn not_equals(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.equality(left, right, true)
    }

    fn greater(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.binary_comparison(left, right, IntCC::SignedGreaterThan)
    }

    fn greater_equals(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.binary_comparison(left, right, IntCC::SignedGreaterThanOrEqual)
    }

    fn lesser(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.binary_comparison(left, right, IntCC::SignedLessThan)
    }

    fn lesser_equals(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.binary_comparison(left, right, IntCC::SignedLessThanOrEqual)
    }

    fn boolean_and(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        let result = self.new_var(types::I64);
        let l = self.eval_boolean(left)?;

        let right_block = self.builder.create_block();
        let short_block = self.builder.create_block();
        let end_block = self.builder.create_block();
        // the right arm only runs when the left is truthy
        self.builder.ins().brif(l, right_block, &[], short_block, &[]);

        self.builder.switch_to_block(short_block);
        self.builder.def_var(result, l);
        self.builder.ins().jump(end_block, &[]);

        self.builder.switch_to_block(right_block);
        let r = self.eval_boolean(right)?;
        self.builder.def_var(result, r);
        self.builder.ins().jump(end_block, &[]);

        self.builder.switch_to_block(end_block);
        let value = self.builder.use_var(result);
        self.push(value);
        Ok(())
    }

    fn boolean_or(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        let result = self.new_var(types::I64);
        let l = self.eval_boolean(left)?;

        let right_block = self.builder.create_block();
        let short_block = self.builder.create_block();
        let end_block = self.builder.create_block();
        // the right arm only runs when the left is falsy
        self.builder.ins().brif(l, short_block, &[], right_block, &[]);

        self.builder.switch_to_block(short_block);
        self.builder.def_var(result, l);
        self.builder.ins().jump(end_block, &[]);

        self.builder.switch_to_block(right_block);
        let r = self.eval_boolean(right)?;
        self.builder.def_var(result, r);
        self.builder.ins().jump(end_block, &[]);

        self.builder.switch_to_block(end_block);
        let value = self.builder.use_var(result);
        self.push(value);
        Ok(())
    }

    fn boolean_not(&mut self, expression: &Expression) -> EmitResult {
        let value = self.eval_boolean(expression)?;
        let flag = self.builder.ins().icmp_imm(IntCC::Equal, value, 0);
        let wide = self.widen(flag);
        self.push(wide);
        Ok(())
    }

    fn condition(
        &mut self,
        expression: &Expression,
        then_branch: &Statements,
        else_branch: Option<&Statements>,
    ) -> EmitResult {
        let cond = self.eval_boolean(expression)?;

        let then_block = self.builder.create_block();
        let end_block = self.builder.create_block();
        let else_block = else_branch.map(|_| self.builder.create_block());

        self.builder
            .ins()
            .brif(cond, then_block, &[], else_block.unwrap_or(end_block), &[]);

        self.builder.switch_to_block(then_block);
        then_branch.generate(self)?;
        self.builder.ins().jump(end_block, &[]);

        if let (Some(else_block), Some(else_branch)) = (else_block, else_branch) {
            self.builder.switch_to_block(else_block);
            else_branch.generate(self)?;
            self.builder.ins().jump(end_block, &[]);
        }

        self.builder.switch_to_block(end_block);
        Ok(())
    }

    fn foreach(
        &mut self,
        source: &TplVariable,
        key: Option<&str>,
        value: &str,
        body: &Statements,
        else_branch: Option<&Statements>,
    ) -> EmitResult {
        // capture the pre-loop bindings of the induction names so outer
        // scopes survive the loop
        let (value_buf, value_size) = self.name_const(value);
        let old_value = self.call1("smart_tpl_variable", &[self.userdata, value_buf, value_size])?;
        let key_consts = match key {
            Some(key) => {
                let (key_buf, key_size) = self.name_const(key);
                let old_key =
                    self.call1("smart_tpl_variable", &[self.userdata, key_buf, key_size])?;
                Some((key_buf, key_size, old_key))
            }
            None => None,
        };

        source.pointer(self)?;
        let src = self.pop()?;
        let iterator = self.call1("smart_tpl_create_iterator", &[self.userdata, src])?;
        let valid_on_entry = self.call1("smart_tpl_valid_iterator", &[self.userdata, iterator])?;

        let loop_block = self.builder.create_block();
        let end_block = self.builder.create_block();
        let else_block = else_branch.map(|_| self.builder.create_block());

        self.builder.ins().brif(
            valid_on_entry,
            loop_block,
            &[],
            else_block.unwrap_or(end_block),
            &[],
        );

        self.builder.switch_to_block(loop_block);
        if let Some((key_buf, key_size, _)) = key_consts {
            let current_key = self.call1("smart_tpl_iterator_key", &[self.userdata, iterator])?;
            self.call(
                "smart_tpl_assign",
                &[self.userdata, key_buf, key_size, current_key],
            )?;
        }
        let current_value = self.call1("smart_tpl_iterator_value", &[self.userdata, iterator])?;
        self.call(
            "smart_tpl_assign",
            &[self.userdata, value_buf, value_size, current_value],
        )?;

        body.generate(self)?;

        self.call("smart_tpl_iterator_next", &[self.userdata, iterator])?;
        let still_valid = self.call1("smart_tpl_valid_iterator", &[self.userdata, iterator])?;
        self.builder
            .ins()
            .brif(still_valid, loop_block, &[], end_block, &[]);

        if let (Some(else_block), Some(else_branch)) = (else_block, else_branch) {
            self.builder.switch_to_block(else_block);
            else_branch.generate(self)?;
            self.builder.ins().jump(end_block, &[]);
        }

        self.builder.switch_to_block(end_block);
        self.call(
            "smart_tpl_assign",
            &[self.userdata, value_buf, value_size, old_value],
        )?;
        if let Some((key_buf, key_size, old_key)) = key_consts {
            self.call("smart_tpl_assign", &[self.userdata, key_buf, key_size, old_key])?;
        }
        Ok(())
    }

    fn assign(&mut self, name: &str, expression: &Expression) -> EmitResult {
        let (name_buf, name_size) = self.name_const(name);
        match expression.static_type() {
            ExprType::Numeric => {
                let n = self.eval_numeric(expression)?;
                self.call(
                    "smart_tpl_assign_numeric",
                    &[self.userdata, name_buf, name_size, n],
                )?;
            }
            ExprType::Double => {
                let d = self.eval_double(expression)?;
                self.call(
                    "smart_tpl_assign_double",
                    &[self.userdata, name_buf, name_size, d],
                )?;
            }
            ExprType::Boolean => {
                let b = self.eval_boolean(expression)?;
                let narrow = self.builder.ins().ireduce(types::I32, b);
                self.call(
                    "smart_tpl_assign_boolean",
                    &[self.userdata, name_buf, name_size, narrow],
                )?;
            }
            ExprType::String => {
                let (buf, size) = self.eval_string(expression)?;
                self.call(
                    "smart_tpl_assign_string",
                    &[self.userdata, name_buf, name_size, buf, size],
                )?;
            }
            ExprType::Value => {
                let value = self.eval_pointer(expression)?;
                self.call(
                    "smart_tpl_assign",
                    &[self.userdata, name_buf, name_size, value],
                )?;
            }
        }
        Ok(())
    }

    fn modifiers(&mut self, filter: &Filter) -> EmitResult {
        self.filter_base_pointer(&filter.base)?;
        for modifier in &filter.chain {
            let (token_buf, token_size) = self.name_const(&modifier.token);
            let handle = self.call1("smart_tpl_modifier", &[self.userdata, token_buf, token_size])?;
            let value = self.pop()?;
            let modified =
                self.call1("smart_tpl_modify_variable", &[self.userdata, handle, value])?;
            self.push(modified);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use crate::escaper;
    use crate::parser;

    fn render(source: &str, data: &Data) -> Result<String, String> {
        let tree = parser::parse(source).map_err(|e| e.to_string())?;
        let bytecode = Bytecode::new(tree).map_err(|e| e.to_string())?;
        let mut handler = Handler::new(data, escaper::get("raw"));
        bytecode.process(&mut handler);
        if handler.failed() {
            return Err(handler.error_message().unwrap_or("failed").to_string());
        }
        Ok(handler.into_output())
    }

    #[test]
    fn raw_text_passthrough() {
        let data = Data::new();
        assert_eq!(render("plain text\n", &data).unwrap(), "plain text\n");
    }

    #[test]
    fn arithmetic_output() {
        let data = Data::new();
        assert_eq!(render("{1+3-2*10}", &data).unwrap(), "-16");
        assert_eq!(render("{(1+3-2)*10}", &data).unwrap(), "20");
        assert_eq!(render("{1+3*10%5}", &data).unwrap(), "1");
    }

    #[test]
    fn division_by_zero_reports() {
        let data = Data::new();
        let err = render("{1/0}", &data).unwrap_err();
        assert!(err.contains("Division by zero"));
    }

    #[test]
    fn incompatible_comparison_fails_at_emit_time() {
        let tree = parser::parse("{if \"a\" == 1}x{/if}").unwrap();
        assert!(Bytecode::new(tree).is_err());
    }
}
