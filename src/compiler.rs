//! # Pratt Compiler
//!
//! Single-pass compiler: scans tokens one at a time and emits bytecode
//! directly into the chunk of the function currently being compiled,
//! with no intermediate AST. Grounded on clox's `compiler.c` — the only
//! reference available that implements this exact algorithm — translated
//! into the idiom the teacher's crate uses for hand-rolled recursive
//! descent (`native/build.rs`): explicit parser state, no global mutable
//! interpreter context (`spec.md` §9, "extern mutable VM singleton").

use crate::chunk::OpCode;
use crate::error::CompileError;
use crate::gc::{Heap, ObjRef};
use crate::object::{ObjFunction, ObjUpvalue, UpvalueState};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_CONSTANTS: usize = 256;
const MAX_ARGS: usize = 255;
const MAX_JUMP: usize = u16::MAX as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src> = fn(&mut Compiler<'src, '_>, bool);

struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

fn rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    use Precedence as P;
    use TokenKind as T;
    match kind {
        T::LeftParen => ParseRule { prefix: Some(Compiler::grouping), infix: Some(Compiler::call), precedence: P::Call },
        T::Dot => ParseRule { prefix: None, infix: Some(Compiler::dot), precedence: P::Call },
        T::Minus => ParseRule { prefix: Some(Compiler::unary), infix: Some(Compiler::binary), precedence: P::Term },
        T::Plus => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: P::Term },
        T::Slash => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: P::Factor },
        T::Star => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: P::Factor },
        T::Bang => ParseRule { prefix: Some(Compiler::unary), infix: None, precedence: P::None },
        T::BangEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: P::Equality },
        T::EqualEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: P::Equality },
        T::Greater => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: P::Comparison },
        T::GreaterEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: P::Comparison },
        T::Less => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: P::Comparison },
        T::LessEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: P::Comparison },
        T::Identifier => ParseRule { prefix: Some(Compiler::variable), infix: None, precedence: P::None },
        T::String => ParseRule { prefix: Some(Compiler::string), infix: None, precedence: P::None },
        T::Number => ParseRule { prefix: Some(Compiler::number), infix: None, precedence: P::None },
        T::And => ParseRule { prefix: None, infix: Some(Compiler::and), precedence: P::And },
        T::Or => ParseRule { prefix: None, infix: Some(Compiler::or), precedence: P::Or },
        T::False => ParseRule { prefix: Some(Compiler::literal), infix: None, precedence: P::None },
        T::True => ParseRule { prefix: Some(Compiler::literal), infix: None, precedence: P::None },
        T::Nil => ParseRule { prefix: Some(Compiler::literal), infix: None, precedence: P::None },
        T::This => ParseRule { prefix: Some(Compiler::this), infix: None, precedence: P::None },
        T::Super => ParseRule { prefix: Some(Compiler::super_), infix: None, precedence: P::None },
        _ => ParseRule { prefix: None, infix: None, precedence: P::None },
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Function,
    Script,
    Method,
    Initializer,
}

struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

struct UpvalueSlot {
    index: u8,
    is_local: bool,
}

struct FnState<'src> {
    function: ObjFunction,
    fn_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueSlot>,
    scope_depth: i32,
}

impl<'src> FnState<'src> {
    fn new(fn_type: FunctionType, name: Option<ObjRef>) -> Self {
        let slot0 = if matches!(fn_type, FunctionType::Method | FunctionType::Initializer) {
            "this"
        } else {
            ""
        };
        FnState {
            function: ObjFunction::new(name),
            fn_type,
            locals: vec![Local { name: slot0, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

/// Drives the scanner and emits bytecode. `'src` is the lifetime of the
/// source text (token lexemes borrow from it); `'heap` is the lifetime of
/// the mutable heap handle used to allocate strings and nested function
/// objects as compilation proceeds.
pub struct Compiler<'src, 'heap> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    heap: &'heap mut Heap,
    fn_stack: Vec<FnState<'src>>,
    class_stack: Vec<ClassState>,
    errors: Vec<CompileError>,
    panic_mode: bool,
}

impl<'src, 'heap> Compiler<'src, 'heap> {
    pub fn compile(source: &'src str, heap: &'heap mut Heap) -> Result<ObjFunction, Vec<CompileError>> {
        let mut compiler = Compiler {
            scanner: Scanner::new(source),
            previous: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
            current: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
            heap,
            fn_stack: vec![FnState::new(FunctionType::Script, None)],
            class_stack: Vec::new(),
            errors: Vec::new(),
            panic_mode: false,
        };
        compiler.advance();
        while !compiler.check(TokenKind::Eof) {
            compiler.declaration();
        }
        compiler.consume(TokenKind::Eof, "Expect end of expression.");
        let function = compiler.end_function();
        if compiler.errors.is_empty() {
            Ok(function)
        } else {
            Err(compiler.errors)
        }
    }

    // --- token stream plumbing ---

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme.to_string());
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message.to_string());
        }
    }

    fn error_at_current(&mut self, message: String) {
        self.record_error(self.current.line, message);
    }

    fn error(&mut self, message: impl Into<String>) {
        self.record_error(self.previous.line, message.into());
    }

    fn record_error(&mut self, line: u32, message: String) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errors.push(CompileError::new(line, message));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // --- chunk emission helpers ---

    fn fn_state(&mut self) -> &mut FnState<'src> {
        self.fn_stack.last_mut().unwrap()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.fn_state().function.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, a: OpCode, b: u8) {
        self.emit_op(a);
        self.emit_byte(b);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let idx = self.fn_state().function.chunk.add_constant(value);
        if idx >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_ops(OpCode::Constant, idx);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let r = self.heap.intern_string(name);
        self.make_constant(Value::Obj(r))
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.fn_state().function.chunk.code_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.fn_state().function.chunk.code_len() - offset - 2;
        if jump > MAX_JUMP {
            self.error("Too much code to jump over.");
        }
        let code = &mut self.fn_state().function.chunk.code;
        code[offset] = ((jump >> 8) & 0xff) as u8;
        code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.fn_state().function.chunk.code_len() - loop_start + 2;
        if offset > MAX_JUMP {
            self.error("Loop body too large.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn emit_return(&mut self) {
        if self.fn_state().fn_type == FunctionType::Initializer {
            self.emit_ops(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn end_function(&mut self) -> ObjFunction {
        self.emit_return();
        let state = self.fn_stack.pop().unwrap();
        state.function
    }

    // --- scopes & locals ---

    fn begin_scope(&mut self) {
        self.fn_state().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.fn_state().scope_depth -= 1;
        let depth = self.fn_state().scope_depth;
        while let Some(local) = self.fn_state().locals.last() {
            if local.depth <= depth {
                break;
            }
            if self.fn_state().locals.last().unwrap().is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.fn_state().locals.pop();
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.fn_state().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.fn_state().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.fn_state().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let depth = self.fn_state().scope_depth;
        for local in self.fn_state().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                self.error("Already a variable with this name in this scope.");
                return;
            }
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        if self.fn_state().scope_depth == 0 {
            return;
        }
        let depth = self.fn_state().scope_depth;
        self.fn_state().locals.last_mut().unwrap().depth = depth;
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.fn_state().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.identifier_constant(name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.fn_state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_ops(OpCode::DefineGlobal, global);
    }

    fn resolve_local(fn_index: usize, fn_stack: &[FnState<'src>], name: &str) -> Option<(u8, bool)> {
        let state = &fn_stack[fn_index];
        for (i, local) in state.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Some((i as u8, true)); // sentinel: caller checks `initialized`
                }
                return Some((i as u8, false));
            }
        }
        None
    }

    fn resolve_upvalue(
        fn_index: usize,
        fn_stack: &mut [FnState<'src>],
        name: &str,
        errors: &mut Vec<CompileError>,
        line: u32,
    ) -> Option<u8> {
        if fn_index == 0 {
            return None;
        }
        if let Some((slot, uninitialized)) = Self::resolve_local(fn_index - 1, fn_stack, name) {
            if uninitialized {
                return None;
            }
            fn_stack[fn_index - 1].locals[slot as usize].is_captured = true;
            return Some(Self::add_upvalue(fn_index, fn_stack, slot, true, errors, line));
        }
        if let Some(upvalue) = Self::resolve_upvalue(fn_index - 1, fn_stack, name, errors, line) {
            return Some(Self::add_upvalue(fn_index, fn_stack, upvalue, false, errors, line));
        }
        None
    }

    fn add_upvalue(
        fn_index: usize,
        fn_stack: &mut [FnState<'src>],
        index: u8,
        is_local: bool,
        errors: &mut Vec<CompileError>,
        line: u32,
    ) -> u8 {
        let state = &mut fn_stack[fn_index];
        for (i, up) in state.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if state.upvalues.len() >= MAX_UPVALUES {
            errors.push(CompileError { line, message: "Too many closure variables in function.".to_string() });
            return (state.upvalues.len() - 1) as u8;
        }
        state.upvalues.push(UpvalueSlot { index, is_local });
        state.function.upvalue_count = state.upvalues.len() as u32;
        (state.upvalues.len() - 1) as u8
    }

    // --- expressions ---

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = rule(self.previous.kind).prefix;
        let prefix = match prefix {
            Some(f) => f,
            None => {
                self.error("Expect expression.");
                return;
            }
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            let infix = rule(self.previous.kind).infix.unwrap();
            infix(self, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let r = self.heap.intern_string(text);
        self.emit_constant(Value::Obj(r));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!(),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let kind = self.previous.kind;
        let r = rule(kind);
        self.parse_precedence(r.precedence.next());
        match kind {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!(),
        }
    }

    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == MAX_ARGS {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_ops(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_ops(OpCode::SetProperty, name);
        } else if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_ops(OpCode::Invoke, name);
            self.emit_byte(argc);
        } else {
            self.emit_ops(OpCode::GetProperty, name);
        }
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let fn_index = self.fn_stack.len() - 1;
        let local = Self::resolve_local(fn_index, &self.fn_stack, name);
        let (get_op, set_op, arg): (OpCode, OpCode, u8) = if let Some((slot, uninitialized)) = local {
            if uninitialized {
                self.error("Can't read local variable in its own initializer.");
            }
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(upvalue) = {
            let line = self.previous.line;
            Self::resolve_upvalue(fn_index, &mut self.fn_stack, name, &mut self.errors, line)
        } {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, upvalue)
        } else {
            let constant = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_ops(set_op, arg);
        } else {
            self.emit_ops(get_op, arg);
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn this(&mut self, _can_assign: bool) {
        if self.class_stack.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable("this", false);
    }

    fn super_(&mut self, _can_assign: bool) {
        match self.class_stack.last() {
            None => self.error("Can't use 'super' outside of a class."),
            Some(c) if !c.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.")
            }
            _ => {}
        }
        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);
        self.named_variable("this", false);
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_ops(OpCode::SuperInvoke, name);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_ops(OpCode::GetSuper, name);
        }
    }

    // --- statements ---

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.fn_state().function.chunk.code_len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // no initializer
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.fn_state().function.chunk.code_len();
        let mut exit_jump: Option<usize> = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.fn_state().function.chunk.code_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.fn_stack.last().unwrap().fn_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.fn_stack.last().unwrap().fn_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn function(&mut self, fn_type: FunctionType) {
        let name = self.heap.intern_string(self.previous.lexeme);
        self.fn_stack.push(FnState::new(fn_type, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.fn_state().function.arity += 1;
                if self.fn_state().function.arity as usize > MAX_ARGS {
                    self.error("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let upvalues: Vec<UpvalueSlot> = {
            let state = self.fn_stack.last_mut().unwrap();
            std::mem::take(&mut state.upvalues)
        };
        let function = self.end_function();
        let function_ref = self.heap.alloc_function(function);
        let constant = self.make_constant(Value::Obj(function_ref));
        self.emit_ops(OpCode::Closure, constant);
        for up in &upvalues {
            self.emit_byte(if up.is_local { 1 } else { 0 });
            self.emit_byte(up.index);
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let constant = self.identifier_constant(name);
        let fn_type = if name == "init" { FunctionType::Initializer } else { FunctionType::Method };
        self.function(fn_type);
        self.emit_ops(OpCode::Method, constant);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_ops(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.class_stack.push(ClassState { has_superclass: false });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_name = self.previous.lexeme;
            self.variable(false);
            if superclass_name == class_name {
                self.error("A class can't inherit from itself.");
            }
            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            self.class_stack.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let class_state = self.class_stack.pop().unwrap();
        if class_state.has_superclass {
            self.end_scope();
        }
    }
}
