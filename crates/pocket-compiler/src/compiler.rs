//! compiler.rs — the single-pass Pratt parser/codegen (§4.6).
//!
//! A lex-then-emit-directly pipeline: scopes, upvalues, control flow,
//! functions, classes, and imports, all emitted straight to byte-code as
//! each grammar production is recognized. No separate AST is ever built.

use pocket_bytecode::Op;
use pocket_core::heap::{FnObj, Heap, ModuleObj, Obj, ObjRef};
use pocket_core::value::Value;
use pocket_lexer::{Lexer, Pos, Token, TokenKind};
use tracing::trace;

use crate::error::{CompileError, Diagnostics};
use crate::precedence::{infix_precedence, Precedence};
use crate::scope::{FuncScope, LoopScope};

/// Placeholder global-slot operand for a forward reference, patched once
/// the whole module has been parsed (§4.6 "Forward-name fixup").
const PENDING_GLOBAL_PLACEHOLDER: u8 = u8::MAX;

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Disables the tail-call rewrite (§4.6: "unless compiling in debug
    /// mode" — §9 flags this as a real, preserved quirk of the original).
    pub debug: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { debug: false }
    }
}

struct PendingPatch {
    func: ObjRef,
    op_index: usize,
    name: String,
    pos: Pos,
}

/// Where a resolved name lives, for both reads and assignment targets.
#[derive(Debug, Clone, Copy)]
enum NameRef {
    Local(u8),
    Upvalue(u8),
    Global(u8),
    Unresolved,
}

/// One function's worth of compile state, paired with the `Fn` object
/// being built in the heap.
struct Frame {
    scope: FuncScope,
    func: ObjRef,
    /// `true` only for the module's synthesized `@main` body — assignment
    /// to an unresolved name there declares a *global*; everywhere else it
    /// declares a *local* (§4.6).
    is_module_body: bool,
}

pub struct Compiler<'h> {
    heap: &'h mut Heap,
    tokens: Vec<Token>,
    pos: usize,
    module: ObjRef,
    frames: Vec<Frame>,
    pending: Vec<PendingPatch>,
    diags: Diagnostics,
    options: CompileOptions,
}

pub fn compile_module(
    heap: &mut Heap,
    source: &str,
    module_name: &str,
    options: CompileOptions,
) -> Result<ObjRef, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;

    let module = heap.alloc(Obj::Module(ModuleObj::new(module_name)));
    let main_fn = heap.alloc(Obj::Fn(FnObj::new_bytecode("@main", module, 0, 0)));

    let mut compiler = Compiler {
        heap,
        tokens,
        pos: 0,
        module,
        frames: vec![Frame {
            scope: FuncScope::new(),
            func: main_fn,
            is_module_body: true,
        }],
        pending: Vec::new(),
        diags: Diagnostics::default(),
        options,
    };

    compiler.parse_block_until(&TokenKind::Eof);
    compiler.emit_function_end();
    compiler.resolve_pending();

    if compiler.diags.has_errors() {
        return Err(CompileError::Diagnostics(compiler.diags.errors));
    }

    if let Some(Obj::Module(m)) = compiler.heap.get_mut(module) {
        m.body = Some(main_fn);
    }
    trace!(module = module_name, "compiled module");
    Ok(module)
}

impl<'h> Compiler<'h> {
    // ---------- token stream ----------

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_pos(&self) -> Pos {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, msg: &str) -> Option<()> {
        if self.check(&kind) {
            self.advance();
            Some(())
        } else {
            let pos = self.peek_pos();
            self.diags.err(pos, msg.to_string());
            None
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek(), TokenKind::Line | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn expect_name(&mut self, msg: &str) -> Option<String> {
        if let TokenKind::Name(n) = self.peek().clone() {
            self.advance();
            Some(n)
        } else {
            let pos = self.peek_pos();
            self.diags.err(pos, msg.to_string());
            None
        }
    }

    // ---------- emission ----------

    fn current_func_mut(&mut self) -> &mut FnObj {
        let r = self.frames.last().unwrap().func;
        match self.heap.get_mut(r).expect("live compiling Fn") {
            Obj::Fn(f) => f,
            _ => unreachable!("frame.func always names an Fn"),
        }
    }

    fn op_count(&mut self) -> usize {
        match &self.current_func_mut().body {
            pocket_core::heap::FnBody::Bytecode { opcodes, .. } => opcodes.len(),
            pocket_core::heap::FnBody::Native(_) => unreachable!(),
        }
    }

    fn emit(&mut self, op: Op, line: u32) -> usize {
        match &mut self.current_func_mut().body {
            pocket_core::heap::FnBody::Bytecode {
                opcodes, oplines, ..
            } => {
                opcodes.push(op);
                oplines.push(line);
                opcodes.len() - 1
            }
            pocket_core::heap::FnBody::Native(_) => unreachable!(),
        }
    }

    fn emit_here(&mut self, op: Op) -> usize {
        let line = self.peek_pos().line;
        self.emit(op, line)
    }

    fn patch_op(&mut self, index: usize, op: Op) {
        match &mut self.current_func_mut().body {
            pocket_core::heap::FnBody::Bytecode { opcodes, .. } => opcodes[index] = op,
            pocket_core::heap::FnBody::Native(_) => unreachable!(),
        }
    }

    /// Patches a forward jump emitted at `index` to land on the
    /// instruction that follows the current one (§4.6 "patch_jump").
    fn patch_jump(&mut self, index: usize) {
        let target = self.op_count();
        let offset = (target - index - 1) as u16;
        let patched = match self.current_func_mut().body {
            pocket_core::heap::FnBody::Bytecode { ref opcodes, .. } => opcodes[index],
            pocket_core::heap::FnBody::Native(_) => unreachable!(),
        };
        let op = match patched {
            Op::Jump(_) => Op::Jump(offset),
            Op::JumpIf(_) => Op::JumpIf(offset),
            Op::JumpIfNot(_) => Op::JumpIfNot(offset),
            Op::Or(_) => Op::Or(offset),
            Op::And(_) => Op::And(offset),
            Op::Iter(var_ix, _) => Op::Iter(var_ix, offset),
            other => other,
        };
        self.patch_op(index, op);
    }

    /// Emits a backward `LOOP` jump to `target` (§4.6 "emit_loop_jump").
    fn emit_loop_jump(&mut self, target: usize, line: u32) {
        let here = self.op_count();
        let offset = (here - target + 1) as u16;
        self.emit(Op::Loop(offset), line);
    }

    /// Terminates a function body with the implicit `push null; RETURN`
    /// followed by the `END` sentinel (§4.6 "emit_function_end").
    fn emit_function_end(&mut self) {
        let line = self.frames.last().map_or(1, |_| self.peek_pos().line);
        self.emit(Op::PushNull, line);
        self.emit(Op::Return, line);
        self.emit(Op::End, line);
    }

    // ---------- name resolution ----------

    fn resolve_name(&mut self, name: &str) -> NameRef {
        if let Some(ix) = self.frames.last().unwrap().scope.resolve_local(name) {
            return NameRef::Local(ix as u8);
        }
        if let Some(ix) = self.resolve_upvalue(self.frames.len() - 1, name) {
            return NameRef::Upvalue(ix);
        }
        if let Some(ix) = self.module_global_index(name) {
            return NameRef::Global(ix as u8);
        }
        NameRef::Unresolved
    }

    fn module_global_index(&self, name: &str) -> Option<u32> {
        match self.heap.get(self.module) {
            Some(Obj::Module(m)) => m.get_global_index(name),
            _ => None,
        }
    }

    /// Recursive upvalue search (§4.6 "Name resolution order"): a local
    /// found in an enclosing function is marked `is_upvalue`, and every
    /// function between it and the requester gets a capture-table entry.
    fn resolve_upvalue(&mut self, frame_ix: usize, name: &str) -> Option<u8> {
        if frame_ix == 0 {
            return None; // module body holds no capturable locals
        }
        let enclosing_ix = frame_ix - 1;
        if self.frames[enclosing_ix].is_module_body {
            return None;
        }
        if let Some(local_ix) = self.frames[enclosing_ix].scope.resolve_local(name) {
            self.frames[enclosing_ix].scope.locals[local_ix].is_upvalue = true;
            let up = self.frames[frame_ix]
                .scope
                .add_upvalue(local_ix as u8, true);
            return Some(up);
        }
        if let Some(outer_up) = self.resolve_upvalue(enclosing_ix, name) {
            let up = self.frames[frame_ix].scope.add_upvalue(outer_up, false);
            return Some(up);
        }
        None
    }

    /// Defines `name` in the current scope per the declaration-by-assignment
    /// rule, returning how to store into it.
    fn declare(&mut self, name: &str, line: u32) -> NameRef {
        if self.frames.last().unwrap().is_module_body {
            let name_ix = match self.heap.get_mut(self.module) {
                Some(Obj::Module(m)) => m.add_name(name),
                _ => unreachable!(),
            };
            let global_ix = match self.heap.get_mut(self.module) {
                Some(Obj::Module(m)) => m.set_global(name_ix, Value::Null),
                _ => unreachable!(),
            };
            NameRef::Global(global_ix as u8)
        } else {
            match self.frames.last_mut().unwrap().scope.add_local(name, line) {
                Some(ix) => NameRef::Local(ix as u8),
                None => {
                    self.diags
                        .err(self.peek_pos(), "too many locals in one function");
                    NameRef::Unresolved
                }
            }
        }
    }

    fn emit_read(&mut self, r: NameRef, name: &str, pos: Pos) {
        match r {
            NameRef::Local(ix) => self.emit(push_local(ix), pos.line),
            NameRef::Upvalue(ix) => self.emit(Op::PushUpvalue(ix), pos.line),
            NameRef::Global(ix) => self.emit(Op::PushGlobal(ix), pos.line),
            NameRef::Unresolved => {
                let idx = self.emit(Op::PushGlobal(PENDING_GLOBAL_PLACEHOLDER), pos.line);
                let func = self.frames.last().unwrap().func;
                self.pending.push(PendingPatch {
                    func,
                    op_index: idx,
                    name: name.to_string(),
                    pos,
                });
            }
        }
    }

    fn emit_store(&mut self, r: NameRef, pos: Pos) {
        match r {
            NameRef::Local(ix) => {
                self.emit(store_local(ix), pos.line);
            }
            NameRef::Upvalue(ix) => {
                self.emit(Op::StoreUpvalue(ix), pos.line);
            }
            NameRef::Global(ix) => {
                self.emit(Op::StoreGlobal(ix), pos.line);
            }
            NameRef::Unresolved => {
                self.diags.err(pos, "cannot assign to an unresolved name");
            }
        }
    }

    /// Resolves every forward-referenced name left unpatched during parsing,
    /// per §4.6's name resolution order: a module global (now that the
    /// whole module has been seen) takes priority over a same-named builtin,
    /// so a script is always free to shadow `print` or `Fiber` with its own
    /// global.
    fn resolve_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            let op = if let Some(ix) = self.module_global_index(&p.name) {
                if ix <= u32::from(u8::MAX) {
                    Some(Op::PushGlobal(ix as u8))
                } else {
                    self.diags
                        .err(p.pos, format!("too many globals to resolve `{}`", p.name));
                    None
                }
            } else if let Some(ix) = pocket_core::builtins::builtin_fn_index(&p.name) {
                Some(Op::PushBuiltinFn(ix))
            } else if let Some(ix) = pocket_core::builtins::builtin_ty_index(&p.name) {
                Some(Op::PushBuiltinTy(ix))
            } else {
                self.diags
                    .err(p.pos, format!("undefined name `{}`", p.name));
                None
            };
            if let Some(op) = op {
                if let Some(Obj::Fn(f)) = self.heap.get_mut(p.func) {
                    if let pocket_core::heap::FnBody::Bytecode { opcodes, .. } = &mut f.body {
                        opcodes[p.op_index] = op;
                    }
                }
            }
        }
    }

    // ---------- statements ----------

    fn parse_block_until(&mut self, terminator: &TokenKind) {
        self.skip_terminators();
        while !self.check(terminator) && !self.check(&TokenKind::Eof) {
            self.parse_statement();
            self.skip_terminators();
        }
    }

    fn parse_statement(&mut self) {
        match self.peek().clone() {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Def => self.parse_def(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => self.parse_break(),
            TokenKind::Continue => self.parse_continue(),
            TokenKind::Class => self.parse_class(),
            TokenKind::Import => self.parse_import(),
            TokenKind::From => self.parse_from_import(),
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_if(&mut self) {
        self.advance(); // if
        self.compile_if_tail();
    }

    /// Compiles one `if`/`elsif` condition-and-block, recursing for a
    /// following `elsif` and patching its own "jump past the rest of the
    /// chain" only after that recursive call returns — so it lands after
    /// every later `elsif`/`else` block too, not just its own.
    fn compile_if_tail(&mut self) {
        self.parse_expression(Precedence::Lowest);
        self.expect(TokenKind::Then, "expected 'then' after if-condition");
        let else_jump = self.emit_here(Op::JumpIfNot(0));

        self.begin_scope();
        self.parse_block_until_any(&[TokenKind::Elsif, TokenKind::Else, TokenKind::End]);
        self.end_scope();

        let end_jump = self.emit_here(Op::Jump(0));
        self.patch_jump(else_jump);

        match self.peek().clone() {
            TokenKind::Elsif => {
                self.advance();
                self.compile_if_tail();
            }
            TokenKind::Else => {
                self.advance();
                self.begin_scope();
                self.parse_block_until(&TokenKind::End);
                self.end_scope();
                self.expect(TokenKind::End, "expected 'end' to close 'if'");
            }
            _ => {
                self.expect(TokenKind::End, "expected 'end' to close 'if'");
            }
        }
        self.patch_jump(end_jump);
    }

    fn parse_block_until_any(&mut self, terminators: &[TokenKind]) {
        self.skip_terminators();
        while !terminators.iter().any(|t| self.check(t)) && !self.check(&TokenKind::Eof) {
            self.parse_statement();
            self.skip_terminators();
        }
    }

    fn parse_while(&mut self) {
        self.advance(); // while
        let loop_top = self.op_count();
        self.parse_expression(Precedence::Lowest);
        self.expect(TokenKind::Then, "expected 'then' after while-condition");
        let exit_jump = self.emit_here(Op::JumpIfNot(0));

        let locals_at_entry = self.frames.last().unwrap().scope.locals.len();
        self.frames.last_mut().unwrap().scope.loops.push(LoopScope {
            continue_target: loop_top,
            break_jumps: Vec::new(),
            locals_at_entry,
        });

        self.begin_scope();
        self.parse_block_until(&TokenKind::End);
        self.end_scope();
        self.expect(TokenKind::End, "expected 'end' to close 'while'");

        let line = self.peek_pos().line;
        self.emit_loop_jump(loop_top, line);
        self.patch_jump(exit_jump);

        let loop_scope = self.frames.last_mut().unwrap().scope.loops.pop().unwrap();
        for b in loop_scope.break_jumps {
            self.patch_jump(b);
        }
    }

    /// Desugared per §4.6: three hidden locals (`@seq`, `@iter`, the named
    /// iteration value, in that slot order), one `ITER_TEST`, and an `ITER`
    /// at the top of each pass that advances the iterator and exits on
    /// exhaustion. `ITER_TEST`/`ITER` both address `@seq`/`@iter` relative
    /// to the loop variable's own local index (`var_ix - 2`/`var_ix - 1`).
    fn parse_for(&mut self) {
        self.advance(); // for
        let pos = self.peek_pos();
        let var_name = self.expect_name("expected a loop variable name").unwrap_or_default();
        self.expect(TokenKind::In, "expected 'in' in for-loop");
        self.parse_expression(Precedence::Lowest);

        self.begin_scope();
        self.declare_fixed_local("@seq", pos.line);
        self.emit(Op::Push0, pos.line); // @iter: iterator cursor, starts at 0
        self.declare_fixed_local("@iter", pos.line);
        // `var`'s slot is pre-seeded with null here so ITER can overwrite
        // it in place on every pass (including the first) instead of
        // pushing a fresh slot each time, which would grow the stack by
        // one every iteration.
        self.emit(Op::PushNull, pos.line);
        let var_ix = self.declare_fixed_local(&var_name, pos.line);

        self.emit(Op::IterTest(var_ix), pos.line);
        let loop_top = self.op_count();
        let exit_jump = self.emit_here(Op::Iter(var_ix, 0));

        let locals_at_entry = self.frames.last().unwrap().scope.locals.len();
        self.frames.last_mut().unwrap().scope.loops.push(LoopScope {
            continue_target: loop_top,
            break_jumps: Vec::new(),
            locals_at_entry,
        });

        self.parse_block_until(&TokenKind::End);
        self.expect(TokenKind::End, "expected 'end' to close 'for'");

        let line = self.peek_pos().line;
        self.emit_loop_jump(loop_top, line);
        self.patch_jump(exit_jump);

        let loop_scope = self.frames.last_mut().unwrap().scope.loops.pop().unwrap();
        for b in loop_scope.break_jumps {
            self.patch_jump(b);
        }
        self.end_scope();
    }

    fn declare_fixed_local(&mut self, name: &str, line: u32) -> u8 {
        self.frames
            .last_mut()
            .unwrap()
            .scope
            .add_local(name, line)
            .unwrap_or(0) as u8
    }

    fn parse_break(&mut self) {
        let pos = self.peek_pos();
        self.advance();
        self.emit_loop_exit_pops(pos.line);
        if let Some(loop_scope) = self.frames.last_mut().unwrap().scope.loops.last() {
            let _ = loop_scope;
        } else {
            self.diags.err(pos, "'break' outside a loop");
            return;
        }
        let j = self.emit(Op::Jump(0), pos.line);
        self.frames
            .last_mut()
            .unwrap()
            .scope
            .loops
            .last_mut()
            .unwrap()
            .break_jumps
            .push(j);
    }

    fn parse_continue(&mut self) {
        let pos = self.peek_pos();
        self.advance();
        self.emit_loop_exit_pops(pos.line);
        let Some(target) = self.frames.last().unwrap().scope.loops.last().map(|l| l.continue_target)
        else {
            self.diags.err(pos, "'continue' outside a loop");
            return;
        };
        self.emit_loop_jump(target, pos.line);
    }

    /// Pops locals declared since loop entry before a `break`/`continue`
    /// jump (§4.6: "using CLOSE_UPVALUE for captured locals, POP otherwise").
    fn emit_loop_exit_pops(&mut self, line: u32) {
        let Some(entry) = self.frames.last().unwrap().scope.loops.last().map(|l| l.locals_at_entry)
        else {
            return;
        };
        let locals = &self.frames.last().unwrap().scope.locals;
        let to_pop: Vec<bool> = locals[entry..].iter().map(|l| l.is_upvalue).collect();
        for is_up in to_pop.into_iter().rev() {
            if is_up {
                self.emit(Op::CloseUpvalue, line);
            } else {
                self.emit(Op::Pop, line);
            }
        }
    }

    fn parse_return(&mut self) {
        let pos = self.peek_pos();
        self.advance();
        let mut was_direct_call = false;
        if matches!(self.peek(), TokenKind::Line | TokenKind::Semicolon | TokenKind::End) {
            self.emit(Op::PushNull, pos.line);
        } else {
            was_direct_call = self.parse_expression_is_call(Precedence::Lowest);
        }
        if was_direct_call && !self.options.debug {
            self.rewrite_last_call_to_tail_call();
        }
        self.emit(Op::Return, pos.line);
    }

    /// Rewrites a just-emitted `CALL` into `TAIL_CALL` in place (§4.6:
    /// "if a return's expression was a direct CALL").
    fn rewrite_last_call_to_tail_call(&mut self) {
        let idx = self.op_count().wrapping_sub(1);
        let op = match self.current_func_mut().body {
            pocket_core::heap::FnBody::Bytecode { ref opcodes, .. } => opcodes.get(idx).copied(),
            pocket_core::heap::FnBody::Native(_) => None,
        };
        if let Some(Op::Call(argc)) = op {
            self.patch_op(idx, Op::TailCall(argc));
        }
    }

    fn parse_def(&mut self) {
        let pos = self.peek_pos();
        self.advance(); // def
        let Some(name) = self.expect_name("expected a function name after 'def'") else {
            return;
        };
        let target = self.declare(&name, pos.line);
        self.parse_function_body(&name, pos);
        self.emit_store(target, pos);
    }

    /// Parses `(params) ... end` and leaves the resulting closure on the
    /// stack (§4.6 "Functions").
    fn parse_function_body(&mut self, name: &str, pos: Pos) {
        self.expect(TokenKind::LParen, "expected '(' after function name");
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                if let Some(p) = self.expect_name("expected a parameter name") {
                    params.push(p);
                }
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "expected ')' after parameters");

        let owner_module = self.module;
        let fn_ref = self
            .heap
            .alloc(Obj::Fn(FnObj::new_bytecode(name, owner_module, params.len() as i32, 0)));

        self.frames.push(Frame {
            scope: FuncScope::new(),
            func: fn_ref,
            is_module_body: false,
        });
        for p in &params {
            self.frames.last_mut().unwrap().scope.add_local(p, pos.line);
        }

        self.parse_block_until(&TokenKind::End);
        self.expect(TokenKind::End, "expected 'end' to close function body");
        self.emit_function_end();

        let finished = self.frames.pop().unwrap();
        let upvalue_count = finished.scope.upvalues.len() as u16;
        if let Some(Obj::Fn(f)) = self.heap.get_mut(fn_ref) {
            f.upvalue_count = upvalue_count;
        }

        let const_ix = match self.heap.get_mut(self.module) {
            Some(Obj::Module(m)) => m.add_const(Value::Obj(fn_ref)),
            _ => unreachable!(),
        };
        self.emit(Op::PushClosure(const_ix as u16), pos.line);
        for up in &finished.scope.upvalues {
            self.emit(
                Op::CaptureUpvalue {
                    is_immediate: up.is_immediate,
                    index: up.index,
                },
                pos.line,
            );
        }
    }

    fn parse_class(&mut self) {
        let pos = self.peek_pos();
        self.advance(); // class
        let Some(name) = self.expect_name("expected a class name") else {
            return;
        };
        let target = self.declare(&name, pos.line);

        let name_ix = match self.heap.get_mut(self.module) {
            Some(Obj::Module(m)) => m.add_name(&name),
            _ => unreachable!(),
        };
        self.emit(Op::CreateClass(name_ix as u16), pos.line);

        let mut seen_fields = std::collections::HashSet::new();
        let mut field_decls: Vec<(String, Pos)> = Vec::new();
        self.skip_terminators();
        while !self.check(&TokenKind::End) && !self.check(&TokenKind::Eof) {
            if self.check(&TokenKind::Def) {
                self.advance();
                let mpos = self.peek_pos();
                let Some(mname) = self.expect_name("expected a method name") else {
                    break;
                };
                self.parse_function_body(&mname, mpos);
                self.emit(Op::BindMethod, mpos.line);
            } else if let TokenKind::Name(fname) = self.peek().clone() {
                let fpos = self.peek_pos();
                self.advance();
                self.expect(TokenKind::Eq, "expected '=' in a field declaration");
                if !seen_fields.insert(fname.clone()) {
                    self.diags
                        .err(fpos, format!("duplicate field `{fname}` in class `{name}`"));
                }
                self.parse_function_body_for_field_default(&fname, fpos);
                self.emit(Op::BindMethod, fpos.line);
                field_decls.push((fname, fpos));
            } else {
                let p = self.peek_pos();
                self.diags.err(p, "expected a method or field declaration in class body");
                self.advance();
            }
            self.skip_terminators();
        }
        self.expect(TokenKind::End, "expected 'end' to close 'class'");
        // Intern every declared field's bare name too, ahead of BindMethod
        // running: pocket-vm strips the `@field:` prefix back off at
        // instantiation time and needs the name-pool index to record it in
        // `ClassObj::field_names`.
        if let Some(Obj::Module(m)) = self.heap.get_mut(self.module) {
            for (fname, _) in &field_decls {
                m.add_name(fname);
            }
        }
        self.emit_store(target, pos);
    }

    /// A field default compiles to a zero-arg closure named `@field:<name>`
    /// bound onto the class exactly like a method (§4.6 class fields);
    /// `pocket-vm`'s instantiation path recognizes the prefix and runs each
    /// one against the fresh instance instead of exposing it as a callable
    /// attribute. Keeps the ISA free of a dedicated field-default op.
    fn parse_function_body_for_field_default(&mut self, field_name: &str, pos: Pos) {
        let synthetic = format!("@field:{field_name}");
        let owner_module = self.module;
        let fn_ref = self
            .heap
            .alloc(Obj::Fn(FnObj::new_bytecode(&synthetic, owner_module, 0, 0)));
        self.frames.push(Frame {
            scope: FuncScope::new(),
            func: fn_ref,
            is_module_body: false,
        });
        self.parse_expression(Precedence::Lowest);
        self.emit(Op::Return, pos.line);
        self.emit(Op::End, pos.line);

        let finished = self.frames.pop().unwrap();
        let upvalue_count = finished.scope.upvalues.len() as u16;
        if let Some(Obj::Fn(f)) = self.heap.get_mut(fn_ref) {
            f.upvalue_count = upvalue_count;
        }

        let const_ix = match self.heap.get_mut(self.module) {
            Some(Obj::Module(m)) => m.add_const(Value::Obj(fn_ref)),
            _ => unreachable!(),
        };
        self.emit(Op::PushClosure(const_ix as u16), pos.line);
        for up in &finished.scope.upvalues {
            self.emit(
                Op::CaptureUpvalue {
                    is_immediate: up.is_immediate,
                    index: up.index,
                },
                pos.line,
            );
        }
    }

    fn parse_import(&mut self) {
        let pos = self.peek_pos();
        self.advance(); // import
        loop {
            let Some(path) = self.expect_name("expected a module name") else {
                break;
            };
            let mut alias = path.clone();
            if self.matches(&TokenKind::As) {
                if let Some(a) = self.expect_name("expected an alias after 'as'") {
                    alias = a;
                }
            }
            let path_ix = match self.heap.get_mut(self.module) {
                Some(Obj::Module(m)) => m.add_name(&path),
                _ => unreachable!(),
            };
            self.emit(Op::Import(path_ix as u16), pos.line);
            let target = self.declare(&alias, pos.line);
            self.emit_store(target, pos);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
    }

    fn parse_from_import(&mut self) {
        let pos = self.peek_pos();
        self.advance(); // from
        let Some(path) = self.expect_name("expected a module name after 'from'") else {
            return;
        };
        self.expect(TokenKind::Import, "expected 'import' after module path");
        let path_ix = match self.heap.get_mut(self.module) {
            Some(Obj::Module(m)) => m.add_name(&path),
            _ => unreachable!(),
        };
        self.emit(Op::Import(path_ix as u16), pos.line);

        if self.matches(&TokenKind::Star) {
            // `from m import *`: left to the VM's IMPORT handler, which
            // binds every non-`@`-prefixed global of the loaded module
            // into the current one. Nothing further to compile here
            // beyond discarding the pushed module value.
            self.emit(Op::Pop, pos.line);
            return;
        }

        loop {
            let Some(attr) = self.expect_name("expected an imported name") else {
                break;
            };
            let mut local_name = attr.clone();
            if self.matches(&TokenKind::As) {
                if let Some(a) = self.expect_name("expected an alias after 'as'") {
                    local_name = a;
                }
            }
            let attr_ix = match self.heap.get_mut(self.module) {
                Some(Obj::Module(m)) => m.add_name(&attr),
                _ => unreachable!(),
            };
            // Keeps the module value itself underneath each looked-up
            // attribute, so the next iteration finds it in the same spot.
            self.emit(Op::GetAttribKeep(attr_ix as u16), pos.line);
            let target = self.declare(&local_name, pos.line);
            self.emit_store(target, pos);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.emit(Op::Pop, pos.line); // discard the module value itself
    }

    fn parse_expr_statement(&mut self) {
        if matches!(self.peek(), TokenKind::Name(_)) {
            if let Some(step_count) = self.scan_is_assignment_target() {
                self.compile_assignment(step_count);
                return;
            }
        }
        self.parse_expression(Precedence::Lowest);
        self.emit_here(Op::Pop);
    }

    // ---------- expressions ----------

    fn begin_scope(&mut self) {
        self.frames.last_mut().unwrap().scope.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let frame = self.frames.last_mut().unwrap();
        frame.scope.scope_depth -= 1;
        let depth = frame.scope.scope_depth;
        let popped = frame.scope.pop_scope(depth);
        let line = self.peek_pos().line;
        for is_up in popped {
            if is_up {
                self.emit(Op::CloseUpvalue, line);
            } else {
                self.emit(Op::Pop, line);
            }
        }
    }

    /// Pure token-level lookahead: does the statement starting at the
    /// current `Name` form an assignment target (`name`, `name.attr`, or
    /// `name[idx]`, any number of steps deep) followed by an assignment
    /// operator? Returns the step count on success. Never emits byte-code —
    /// subscript contents are skipped by bracket-balance only — so the
    /// cursor can be rewound for free on a `None` result, and the caller
    /// re-parses (and emits) the chain exactly once either way.
    fn scan_is_assignment_target(&mut self) -> Option<usize> {
        let save = self.pos;
        if !matches!(self.peek(), TokenKind::Name(_)) {
            return None;
        }
        self.advance();
        let mut steps = 0usize;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    if !matches!(self.peek(), TokenKind::Name(_)) {
                        self.pos = save;
                        return None;
                    }
                    self.advance();
                    steps += 1;
                }
                TokenKind::LBracket => {
                    self.advance();
                    let mut depth = 1i32;
                    while depth > 0 {
                        match self.peek() {
                            TokenKind::LBracket | TokenKind::LParen | TokenKind::LBrace => depth += 1,
                            TokenKind::RBracket | TokenKind::RParen | TokenKind::RBrace => depth -= 1,
                            TokenKind::Eof => {
                                self.pos = save;
                                return None;
                            }
                            _ => {}
                        }
                        self.advance();
                    }
                    steps += 1;
                }
                _ => break,
            }
        }
        let found = is_assign_op(self.peek());
        self.pos = save;
        if found {
            Some(steps)
        } else {
            None
        }
    }

    /// Real (emitting) compile of a confirmed assignment target, given the
    /// step count `scan_is_assignment_target` already found.
    fn compile_assignment(&mut self, step_count: usize) {
        let pos = self.peek_pos();
        let name = match self.advance().kind {
            TokenKind::Name(n) => n,
            _ => unreachable!("caller only invokes this after seeing a Name"),
        };

        if step_count == 0 {
            let op = self.peek().clone();
            self.advance();
            self.compile_name_assignment(&name, op, pos);
            return;
        }

        let existing = self.resolve_name(&name);
        self.emit_read(existing, &name, pos);

        let mut last: Option<LastStep> = None;
        for i in 0..step_count {
            let is_last = i + 1 == step_count;
            match self.peek().clone() {
                TokenKind::Dot => {
                    self.advance();
                    let apos = self.peek_pos();
                    let attr = self
                        .expect_name("expected an attribute name after '.'")
                        .unwrap_or_default();
                    if is_last {
                        let recv_local = self.stash_in_hidden_local(apos);
                        last = Some(LastStep::Attrib(recv_local, attr, apos));
                    } else {
                        let ix = match self.heap.get_mut(self.module) {
                            Some(Obj::Module(m)) => m.add_name(&attr),
                            _ => unreachable!(),
                        };
                        self.emit(Op::GetAttrib(ix as u16), apos.line);
                    }
                }
                TokenKind::LBracket => {
                    let bpos = self.peek_pos();
                    if is_last {
                        let recv_local = self.stash_in_hidden_local(bpos);
                        self.advance();
                        self.parse_expression(Precedence::Lowest);
                        self.expect(TokenKind::RBracket, "expected ']' after subscript");
                        let key_local = self.stash_in_hidden_local(bpos);
                        last = Some(LastStep::Subscript(recv_local, key_local, bpos));
                    } else {
                        self.advance();
                        self.parse_expression(Precedence::Lowest);
                        self.expect(TokenKind::RBracket, "expected ']' after subscript");
                        self.emit(Op::GetSubscript, bpos.line);
                    }
                }
                _ => unreachable!("scan_is_assignment_target guarantees only Dot/LBracket steps"),
            }
        }

        let op = self.peek().clone();
        self.advance();
        match last.expect("step_count > 0 guarantees a last step was recorded") {
            LastStep::Attrib(recv_local, attr, apos) => {
                self.finish_attrib_set(recv_local, &attr, op, apos)
            }
            LastStep::Subscript(recv_local, key_local, bpos) => {
                self.finish_subscript_set(recv_local, key_local, op, bpos)
            }
        }
    }

    fn compile_name_assignment(&mut self, name: &str, op: TokenKind, pos: Pos) {
        let existing = self.resolve_name(name);
        let target = match existing {
            NameRef::Unresolved if matches!(op, TokenKind::Eq) => self.declare(name, pos.line),
            NameRef::Unresolved => {
                self.diags
                    .err(pos, format!("compound assignment to undefined name `{name}`"));
                return;
            }
            other => other,
        };

        if matches!(op, TokenKind::Eq) {
            self.parse_expression(Precedence::Lowest);
            // A brand-new local is already sitting at the correct stack
            // slot (locals are stack slots); only overwriting an existing
            // binding needs an explicit store.
            if !matches!((existing, target), (NameRef::Unresolved, NameRef::Local(_))) {
                self.emit_store(target, pos);
            }
            return;
        }

        self.emit_read(target, name, pos);
        self.parse_expression(Precedence::Lowest);
        self.emit(compound_op(&op), pos.line);
        self.emit_store(target, pos);
    }

    /// Finishes `recv.attr (op) rhs` given `recv` already stashed in
    /// `recv_local` (§4.6: evaluate the receiver exactly once).
    fn finish_attrib_set(&mut self, recv_local: u8, attr: &str, op: TokenKind, pos: Pos) {
        let attr_ix = match self.heap.get_mut(self.module) {
            Some(Obj::Module(m)) => m.add_name(attr),
            _ => unreachable!(),
        };
        if matches!(op, TokenKind::Eq) {
            self.emit(push_local(recv_local), pos.line);
            self.parse_expression(Precedence::Lowest);
            self.emit(Op::SetAttrib(attr_ix as u16), pos.line);
            return;
        }
        self.emit(push_local(recv_local), pos.line);
        self.emit(Op::GetAttrib(attr_ix as u16), pos.line);
        self.parse_expression(Precedence::Lowest);
        self.emit(compound_op(&op), pos.line);
        self.emit(push_local(recv_local), pos.line);
        self.emit(Op::Swap, pos.line);
        self.emit(Op::SetAttrib(attr_ix as u16), pos.line);
    }

    /// Finishes `recv[key] (op) rhs` given both already stashed in hidden
    /// locals. `SET_SUBSCRIPT` takes `recv, key, value` and leaves `value`
    /// as a residual (so a chained `a[i] = b[j] = 1` works), hence the
    /// trailing `Pop` in statement position.
    fn finish_subscript_set(&mut self, recv_local: u8, key_local: u8, op: TokenKind, pos: Pos) {
        if matches!(op, TokenKind::Eq) {
            self.emit(push_local(recv_local), pos.line);
            self.emit(push_local(key_local), pos.line);
            self.parse_expression(Precedence::Lowest);
            self.emit(Op::SetSubscript, pos.line);
            self.emit_here(Op::Pop);
            return;
        }
        self.emit(push_local(recv_local), pos.line);
        self.emit(push_local(key_local), pos.line);
        self.emit(push_local(recv_local), pos.line);
        self.emit(push_local(key_local), pos.line);
        self.emit(Op::GetSubscript, pos.line);
        self.parse_expression(Precedence::Lowest);
        self.emit(compound_op(&op), pos.line);
        self.emit(Op::SetSubscript, pos.line);
        self.emit_here(Op::Pop);
    }

    fn stash_in_hidden_local(&mut self, pos: Pos) -> u8 {
        let name = format!("@tmp{}", self.frames.last().unwrap().scope.locals.len());
        self.declare_fixed_local(&name, pos.line)
    }

    /// Parses an expression; returns `true` if the outermost production
    /// was exactly a direct call (for the tail-call check in `return`).
    fn parse_expression_is_call(&mut self, min_prec: Precedence) -> bool {
        let before = self.op_count();
        self.parse_expression(min_prec);
        let last = match self.current_func_mut().body {
            pocket_core::heap::FnBody::Bytecode { ref opcodes, .. } => opcodes.last().copied(),
            pocket_core::heap::FnBody::Native(_) => None,
        };
        let _ = before;
        matches!(last, Some(Op::Call(_)))
    }

    fn parse_expression(&mut self, min_prec: Precedence) {
        self.parse_prefix();
        loop {
            let prec = match infix_precedence(self.peek()) {
                Some(p) => p,
                None => break,
            };
            if prec < min_prec {
                break;
            }
            self.parse_infix(prec);
        }
    }

    fn parse_prefix(&mut self) {
        let pos = self.peek_pos();
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                self.emit_number(n, pos);
            }
            TokenKind::Str(s) => {
                self.advance();
                self.emit_string_const(s, pos);
            }
            TokenKind::StringInterp(s) => {
                self.advance();
                self.parse_string_interpolation(s, pos);
            }
            TokenKind::True => {
                self.advance();
                self.emit(Op::PushTrue, pos.line);
            }
            TokenKind::False => {
                self.advance();
                self.emit(Op::PushFalse, pos.line);
            }
            TokenKind::Null => {
                self.advance();
                self.emit(Op::PushNull, pos.line);
            }
            TokenKind::SelfKw => {
                self.advance();
                self.emit(Op::PushSelf, pos.line);
            }
            TokenKind::Name(name) => {
                self.advance();
                let r = self.resolve_name(&name);
                self.emit_read(r, &name, pos);
            }
            TokenKind::Minus => {
                self.advance();
                self.parse_expression(Precedence::Unary);
                self.emit(Op::Negative, pos.line);
            }
            TokenKind::Not => {
                self.advance();
                self.parse_expression(Precedence::Unary);
                self.emit(Op::Not, pos.line);
            }
            TokenKind::Tilde => {
                self.advance();
                self.parse_expression(Precedence::Unary);
                self.emit(Op::BitNot, pos.line);
            }
            TokenKind::Plus => {
                self.advance();
                self.parse_expression(Precedence::Unary);
                self.emit(Op::Positive, pos.line);
            }
            TokenKind::LParen => {
                self.advance();
                self.parse_expression(Precedence::Lowest);
                self.expect(TokenKind::RParen, "expected ')' after expression");
            }
            TokenKind::LBracket => {
                self.advance();
                self.parse_list_literal(pos);
            }
            TokenKind::LBrace => {
                self.advance();
                self.parse_map_literal(pos);
            }
            TokenKind::Func => {
                self.advance();
                self.parse_function_body("<anonymous>", pos);
            }
            other => {
                self.diags.err(pos, format!("expected an expression, found {other:?}"));
                self.advance();
            }
        }
    }

    fn parse_infix(&mut self, prec: Precedence) {
        let pos = self.peek_pos();
        let op = self.peek().clone();
        match op {
            TokenKind::Plus => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::Add(0), pos.line);
            }
            TokenKind::Minus => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::Subtract(0), pos.line);
            }
            TokenKind::Star => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::Multiply(0), pos.line);
            }
            TokenKind::Slash => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::Divide(0), pos.line);
            }
            TokenKind::Percent => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::Mod(0), pos.line);
            }
            TokenKind::Amp => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::BitAnd(0), pos.line);
            }
            TokenKind::Pipe => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::BitOr(0), pos.line);
            }
            TokenKind::Caret => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::BitXor(0), pos.line);
            }
            TokenKind::Shl => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::LShift(0), pos.line);
            }
            TokenKind::Shr => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::RShift(0), pos.line);
            }
            TokenKind::EqEq => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::EqEq, pos.line);
            }
            TokenKind::BangEq => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::NotEq, pos.line);
            }
            TokenKind::Lt => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::Lt, pos.line);
            }
            TokenKind::LtEq => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::LtEq, pos.line);
            }
            TokenKind::Gt => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::Gt, pos.line);
            }
            TokenKind::GtEq => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::GtEq, pos.line);
            }
            TokenKind::Range => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::Range, pos.line);
            }
            TokenKind::In => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::In, pos.line);
            }
            TokenKind::Is => {
                self.advance();
                self.parse_expression(prec.next());
                self.emit(Op::Is, pos.line);
            }
            TokenKind::And => {
                self.advance();
                let j = self.emit_here(Op::And(0));
                self.parse_expression(prec.next());
                self.patch_jump(j);
            }
            TokenKind::Or => {
                self.advance();
                let j = self.emit_here(Op::Or(0));
                self.parse_expression(prec.next());
                self.patch_jump(j);
            }
            TokenKind::Dot => {
                self.advance();
                let Some(attr) = self.expect_name("expected an attribute name after '.'") else {
                    return;
                };
                let attr_ix = match self.heap.get_mut(self.module) {
                    Some(Obj::Module(m)) => m.add_name(&attr),
                    _ => unreachable!(),
                };
                self.emit(Op::GetAttrib(attr_ix as u16), pos.line);
            }
            TokenKind::LBracket => {
                self.advance();
                self.parse_expression(Precedence::Lowest);
                self.expect(TokenKind::RBracket, "expected ']' after subscript");
                self.emit(Op::GetSubscript, pos.line);
            }
            TokenKind::LParen => {
                self.advance();
                let argc = self.parse_call_args();
                self.emit(Op::Call(argc), pos.line);
            }
            _ => unreachable!("infix_precedence only returns Some for handled tokens"),
        }
    }

    fn parse_call_args(&mut self) -> u8 {
        let mut argc = 0u8;
        if !self.check(&TokenKind::RParen) {
            loop {
                self.parse_expression(Precedence::Lowest);
                argc += 1;
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "expected ')' after call arguments");
        argc
    }

    fn parse_list_literal(&mut self, pos: Pos) {
        let mut n: u16 = 0;
        if !self.check(&TokenKind::RBracket) {
            loop {
                self.parse_expression(Precedence::Lowest);
                n += 1;
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket, "expected ']' to close a list literal");
        self.emit(Op::PushList(n), pos.line);
    }

    fn parse_map_literal(&mut self, pos: Pos) {
        self.emit(Op::PushMap, pos.line);
        if !self.check(&TokenKind::RBrace) {
            loop {
                self.parse_expression(Precedence::Lowest);
                self.expect(TokenKind::Colon, "expected ':' in a map literal");
                self.parse_expression(Precedence::Lowest);
                self.emit(Op::MapInsert, pos.line);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' to close a map literal");
    }

    fn emit_number(&mut self, n: f64, pos: Pos) {
        if n == 0.0 {
            self.emit(Op::Push0, pos.line);
            return;
        }
        let ix = match self.heap.get_mut(self.module) {
            Some(Obj::Module(m)) => m.add_const(Value::Num(n)),
            _ => unreachable!(),
        };
        self.emit(Op::PushConstant(ix as u16), pos.line);
    }

    fn emit_string_const(&mut self, s: String, pos: Pos) {
        let r = self
            .heap
            .alloc(Obj::Str(pocket_core::heap::PkString::new(s)));
        let ix = match self.heap.get_mut(self.module) {
            Some(Obj::Module(m)) => m.add_const(Value::Obj(r)),
            _ => unreachable!(),
        };
        self.emit(Op::PushConstant(ix as u16), pos.line);
    }

    /// Compiles the token sequence produced for `"a $name b"` / `"a
    /// ${expr} b"` (§4.5) into repeated string concatenation: each
    /// `StringInterp` piece and its following `Name`/expression tokens are
    /// pushed and `ADD`-folded left to right, ending on the trailing
    /// `Str` piece (§4.8: `+` is overloaded for `string + string`).
    fn parse_string_interpolation(&mut self, first: String, pos: Pos) {
        self.emit_string_const(first, pos);
        loop {
            // one interpolated piece: either a bare NAME or a full
            // sub-expression, followed by either another STRING-INTERP
            // (more pieces) or the final STRING piece.
            self.parse_expression(Precedence::Lowest);
            self.emit(Op::Add(0), pos.line);
            match self.peek().clone() {
                TokenKind::StringInterp(piece) => {
                    self.advance();
                    self.emit_string_const(piece, pos);
                }
                TokenKind::Str(piece) => {
                    self.advance();
                    self.emit_string_const(piece, pos);
                    self.emit(Op::Add(0), pos.line);
                    break;
                }
                _ => {
                    self.diags.err(pos, "malformed string interpolation");
                    break;
                }
            }
        }
    }

}

enum LastStep {
    Attrib(u8, String, Pos),
    Subscript(u8, u8, Pos),
}

fn is_assign_op(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Eq
            | TokenKind::PlusEq
            | TokenKind::MinusEq
            | TokenKind::StarEq
            | TokenKind::SlashEq
            | TokenKind::PercentEq
            | TokenKind::AmpEq
            | TokenKind::PipeEq
            | TokenKind::CaretEq
            | TokenKind::ShlEq
            | TokenKind::ShrEq
    )
}

fn compound_op(kind: &TokenKind) -> Op {
    match kind {
        TokenKind::PlusEq => Op::Add(1),
        TokenKind::MinusEq => Op::Subtract(1),
        TokenKind::StarEq => Op::Multiply(1),
        TokenKind::SlashEq => Op::Divide(1),
        TokenKind::PercentEq => Op::Mod(1),
        TokenKind::AmpEq => Op::BitAnd(1),
        TokenKind::PipeEq => Op::BitOr(1),
        TokenKind::CaretEq => Op::BitXor(1),
        TokenKind::ShlEq => Op::LShift(1),
        TokenKind::ShrEq => Op::RShift(1),
        _ => unreachable!("is_assign_op gates every caller"),
    }
}

fn push_local(ix: u8) -> Op {
    match ix {
        0 => Op::PushLocal0,
        1 => Op::PushLocal1,
        2 => Op::PushLocal2,
        3 => Op::PushLocal3,
        4 => Op::PushLocal4,
        5 => Op::PushLocal5,
        6 => Op::PushLocal6,
        7 => Op::PushLocal7,
        8 => Op::PushLocal8,
        n => Op::PushLocalN(n),
    }
}

fn store_local(ix: u8) -> Op {
    match ix {
        0 => Op::StoreLocal0,
        1 => Op::StoreLocal1,
        2 => Op::StoreLocal2,
        3 => Op::StoreLocal3,
        4 => Op::StoreLocal4,
        5 => Op::StoreLocal5,
        6 => Op::StoreLocal6,
        7 => Op::StoreLocal7,
        8 => Op::StoreLocal8,
        n => Op::StoreLocalN(n),
    }
}
