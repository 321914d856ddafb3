use crate::language::ast::*;
use crate::language::checker;
use crate::language::errors::CheckErrors;
use crate::language::parser::parse_module;
use crate::language::scope::{Object, ObjectData, ObjectNode, Scope};
use crate::language::span::Span;
use crate::runtime::builtin::Registry;
use crate::runtime::context::{Context, Frame, ProgramPoint};
use crate::runtime::error::{EvalError, EvalErrorKind, EvalResult};
use crate::runtime::register::Register;
use crate::runtime::resolver::{Directory, Resolver};
use crate::runtime::solver::Request;
use crate::runtime::value::{OptFragment, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, debug_span, info_span, trace};

/// Filename used for modules imported through a filesystem expression.
pub const MODULE_FILENAME: &str = "module.hlb";

/// Opaque handle to the external build engine. The core only passes it
/// through to callables.
pub trait BuildClient {}

pub struct NoClient;

impl BuildClient for NoClient {}

/// External debugger interface; invoked before each call, at function entry,
/// and at module entry.
pub trait Debugger {
    fn debug(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        name: &str,
        ret: &Register,
        options: Option<&[OptFragment]>,
    ) -> EvalResult<()>;
}

pub struct NoopDebugger;

impl Debugger for NoopDebugger {
    fn debug(
        &self,
        _ctx: &Context,
        _scope: &Rc<Scope>,
        _name: &str,
        _ret: &Register,
        _options: Option<&[OptFragment]>,
    ) -> EvalResult<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Target {
    pub name: String,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A linked bind clause routed to a specific call. `scope` is the scope the
/// clause appeared in, so a sub-closure sees the enclosing call's bound
/// parameters.
#[derive(Clone)]
pub struct Binding {
    pub bind: Rc<BindClause>,
    pub name: String,
    pub closure: Rc<FuncDecl>,
    pub scope: Rc<Scope>,
}

/// Handle a callable can use to re-enter the evaluator and synthesise the
/// binding's sub-value.
#[derive(Clone)]
pub struct BindingHandle {
    binding: Binding,
    cg: CodeGen,
}

impl BindingHandle {
    pub fn name(&self) -> &str {
        &self.binding.name
    }

    pub fn has_closure_block(&self) -> bool {
        self.binding.bind.block.is_some()
    }

    pub fn invoke(&self, ctx: &Context) -> EvalResult<Value> {
        let ret = Register::new();
        self.cg.emit_binding(ctx, self.binding.clone(), &[], &ret)?;
        ret.value()
    }
}

/// The code generator. Cloning shares the same generator so register
/// closures and binding handles can re-enter it.
#[derive(Clone)]
pub struct CodeGen {
    inner: Rc<Inner>,
}

struct Inner {
    debugger: Box<dyn Debugger>,
    client: Arc<dyn BuildClient>,
    resolver: Arc<dyn Resolver>,
    registry: &'static Registry,
    /// Modules already loaded through imports, keyed by directory and
    /// filename; an installed module is never rewritten.
    loaded: RefCell<std::collections::HashMap<String, Rc<Module>>>,
    /// Cross-module members currently being emitted; a repeat is an import
    /// cycle, since the language has no conditionals to break recursion.
    import_stack: RefCell<Vec<String>>,
}

impl CodeGen {
    pub fn new(client: Arc<dyn BuildClient>, resolver: Arc<dyn Resolver>) -> EvalResult<CodeGen> {
        Self::with_debugger(client, resolver, Box::new(NoopDebugger))
    }

    pub fn with_debugger(
        client: Arc<dyn BuildClient>,
        resolver: Arc<dyn Resolver>,
        debugger: Box<dyn Debugger>,
    ) -> EvalResult<CodeGen> {
        let registry = Registry::global().map_err(|err| EvalError::internal(err.to_string()))?;
        Ok(CodeGen {
            inner: Rc::new(Inner {
                debugger,
                client,
                resolver,
                registry,
                loaded: RefCell::new(std::collections::HashMap::new()),
                import_stack: RefCell::new(Vec::new()),
            }),
        })
    }

    /// Compile the named targets of a checked module into a single request.
    pub fn generate(
        &self,
        ctx: &Context,
        module: &Rc<Module>,
        targets: &[Target],
    ) -> EvalResult<Request> {
        let span = info_span!("generate", module = %module.filename);
        let _enter = span.enter();

        let mut requests = Vec::new();
        for target in targets {
            ctx.check_cancelled()?;
            if module.scope.lookup_local(&target.name).is_none() {
                return Err(EvalError::new(EvalErrorKind::UndefinedTarget {
                    name: target.name.clone(),
                    filename: module.filename.to_string(),
                }));
            }

            // Yield before compiling anything.
            let ret = Register::new();
            self.debug(ctx, &module.scope, &module.filename, &ret, None)?;

            let ie = IdentExpr::plain(Ident::new(target.name.clone(), Span::default()));
            let lookup = ie.ident.clone();
            self.emit_ident_expr(
                ctx,
                &module.scope,
                &ie,
                &lookup,
                Vec::new(),
                Vec::new(),
                None,
                &ret,
            )?;

            let value = ret.value()?;
            requests.push(value.request()?);
        }

        Ok(Request::parallel(requests))
    }

    fn debug(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        name: &str,
        ret: &Register,
        options: Option<&[OptFragment]>,
    ) -> EvalResult<()> {
        self.inner.debugger.debug(ctx, scope, name, ret, options)
    }

    fn point(&self, scope: &Rc<Scope>, span: Span) -> Option<ProgramPoint> {
        scope.owning_module().map(|module| ProgramPoint {
            filename: module.filename.clone(),
            source: module.source.clone(),
            span,
        })
    }

    fn emit_expr(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        expr: &Rc<Expr>,
        b: Option<&Binding>,
        ret: &Register,
    ) -> EvalResult<()> {
        let ctx = match self.point(scope, expr.span()) {
            Some(point) => ctx.with_program_counter(point),
            None => ctx.clone(),
        };

        match &**expr {
            Expr::FuncLit(lit) => self.emit_block(&ctx, scope, &lit.body, b, ret),
            Expr::BasicLit(lit) => self.emit_basic_lit(&ctx, scope, lit, ret),
            Expr::Call(call) => {
                let cg = self.clone();
                let scope = scope.clone();
                let call = call.clone();
                let b = b.cloned();
                ret.set_async(move |v| {
                    cg.lookup_call(&ctx, &scope, &call.name.ident)?;
                    let inner = Register::new();
                    inner.set(v);
                    cg.emit_call_stmt(&ctx, &scope, &call, b.as_ref(), &inner)?;
                    inner.value()
                });
                Ok(())
            }
        }
    }

    fn emit_basic_lit(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        lit: &BasicLit,
        ret: &Register,
    ) -> EvalResult<()> {
        match lit {
            BasicLit::Int(value, _) => {
                ret.set(Value::Int(*value));
                Ok(())
            }
            BasicLit::Bool(value, _) => {
                ret.set(Value::Bool(*value));
                Ok(())
            }
            BasicLit::Str(string) => self.emit_string_lit(ctx, scope, string, ret),
            BasicLit::RawStr(raw) => {
                ret.set(Value::Str(raw.text.clone()));
                Ok(())
            }
            BasicLit::Heredoc(heredoc) | BasicLit::RawHeredoc(heredoc) => {
                self.emit_heredoc(ctx, scope, heredoc, ret)
            }
        }
    }

    fn emit_string_lit(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        lit: &StringLit,
        ret: &Register,
    ) -> EvalResult<()> {
        let ctx = ctx.with_return_kind(Kind::String);
        let mut pieces = Vec::new();
        for fragment in &lit.fragments {
            match fragment {
                Fragment::Text(text) | Fragment::Spaces(text) => pieces.push(text.clone()),
                Fragment::Escaped(sequence) => {
                    pieces.push(unescape(sequence).map_err(|message| {
                        self.error_at(scope, lit.span, EvalErrorKind::InvalidArgument { message })
                    })?);
                }
                Fragment::Interpolated { expr, .. } => {
                    pieces.push(self.emit_interpolation(&ctx, scope, expr)?);
                }
            }
        }
        ret.set(Value::Str(pieces.concat()));
        Ok(())
    }

    fn emit_interpolation(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        expr: &Rc<Expr>,
    ) -> EvalResult<String> {
        let reg = Register::new();
        self.emit_expr(ctx, scope, expr, None, &reg)?;
        let value = reg.value()?;
        value.coerce_string().map_err(|err| {
            err.with_point(
                self.point(scope, expr.span())
                    .unwrap_or_else(|| ProgramPoint {
                        filename: Rc::from("<unknown>"),
                        source: Rc::from(""),
                        span: expr.span(),
                    }),
            )
        })
    }

    fn emit_heredoc(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        heredoc: &HeredocLit,
        ret: &Register,
    ) -> EvalResult<()> {
        let ctx = ctx.with_return_kind(Kind::String);
        let mut pieces = Vec::new();
        for fragment in &heredoc.fragments {
            match fragment {
                Fragment::Text(text) | Fragment::Spaces(text) => pieces.push(text.clone()),
                // Heredocs only process the `\$` escape; everything else is
                // carried through verbatim.
                Fragment::Escaped(sequence) => {
                    if sequence == "\\$" {
                        pieces.push("$".to_string());
                    } else {
                        pieces.push(sequence.clone());
                    }
                }
                Fragment::Interpolated { expr, .. } => {
                    pieces.push(self.emit_interpolation(&ctx, scope, expr)?);
                }
            }
        }
        ret.set(Value::Str(elaborate_heredoc(&heredoc.opener, &pieces.concat())));
        Ok(())
    }

    fn emit_block(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        block: &Rc<BlockStmt>,
        b: Option<&Binding>,
        ret: &Register,
    ) -> EvalResult<()> {
        let ctx = ctx.with_return_kind(block.kind.clone());
        for stmt in &block.stmts {
            match stmt {
                Stmt::Call(call) => {
                    let cg = self.clone();
                    let ctx = ctx.clone();
                    let scope = scope.clone();
                    let call = call.clone();
                    let b = b.cloned();
                    ret.set_async(move |v| {
                        cg.lookup_call(&ctx, &scope, &call.name.ident)?;
                        let inner = Register::new();
                        inner.set(v);
                        cg.emit_call_stmt(&ctx, &scope, &call, b.as_ref(), &inner)?;
                        inner.value()
                    });
                }
                Stmt::Expr(expr) => self.emit_expr(&ctx, scope, expr, b, ret)?,
            }
        }
        Ok(())
    }

    fn emit_call_stmt(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        call: &Rc<CallStmt>,
        b: Option<&Binding>,
        ret: &Register,
    ) -> EvalResult<()> {
        let ctx = ctx.with_frame(Frame {
            name: call.name.ident.text.clone(),
            point: self.point(scope, call.name.span),
        });
        ctx.check_cancelled()?;

        let kinds = self.arg_kinds(&ctx, scope, call)?;
        let args = self.evaluate(&ctx, scope, b, &kinds, &call.args)?;

        let mut opts = Vec::new();
        if let Some(with) = &call.with {
            // The type hint avoids ambiguous lookups; the with-clause also
            // gives option expressions access to the binding.
            let kind = Kind::option_of(&call.name.ident.text);
            let values =
                self.evaluate(&ctx, scope, b, &[kind], std::slice::from_ref(&with.expr))?;
            opts = values[0].as_option()?;
        }

        if call.is_breakpoint(ctx.return_kind()) {
            let mut command = Vec::new();
            for arg in &args {
                let text = arg.as_str().map_err(|_| {
                    self.error_at(
                        scope,
                        call.span,
                        EvalErrorKind::InvalidArgument {
                            message: "breakpoint args must be strings".to_string(),
                        },
                    )
                })?;
                command.push(text.to_string());
            }
            if !command.is_empty() {
                opts.push(OptFragment::BreakpointCommand { command });
            }
        }

        // Yield before executing the next call statement.
        self.debug(&ctx, scope, &call.name.ident.text, ret, Some(&opts))?;

        // Pass the binding if this is the matching call; a call with its own
        // sub-closure binds itself so the callable can re-enter it.
        let matches_active = matches!((b, &call.bind), (Some(b), Some(bc)) if Rc::ptr_eq(bc, &b.bind));
        let binding = if matches_active {
            b.cloned()
        } else {
            call.bind.as_ref().and_then(|bc| {
                if bc.block.is_some() {
                    bc.closure.borrow().clone().map(|closure| Binding {
                        bind: bc.clone(),
                        name: bc.name.text.clone(),
                        closure,
                        scope: scope.clone(),
                    })
                } else {
                    None
                }
            })
        };
        let capture = matches_active && call.bind.as_ref().is_some_and(|bc| bc.block.is_none());

        self.emit_ident_expr(
            &ctx,
            scope,
            &call.name,
            &call.name.ident,
            args,
            opts,
            binding,
            ret,
        )?;

        if capture {
            let value = ret.value()?;
            if let Some(b) = b {
                b.bind.captured.replace(Some(value));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_ident_expr(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        ie: &IdentExpr,
        lookup: &Ident,
        args: Vec<Value>,
        opts: Vec<OptFragment>,
        binding: Option<Binding>,
        ret: &Register,
    ) -> EvalResult<()> {
        let ctx = match self.point(scope, ie.span) {
            Some(point) => ctx.with_program_counter(point),
            None => ctx.clone(),
        };

        let Some(obj) = scope.lookup(&lookup.text) else {
            return Err(ctx.error(EvalErrorKind::UndefinedIdent {
                name: lookup.text.clone(),
            }));
        };

        match obj.node.clone() {
            ObjectNode::Builtin(bd) => {
                let cg = self.clone();
                let ctx = ctx.clone();
                ret.set_async(move |v| cg.emit_builtin_call(&ctx, &bd, args, opts, binding, v));
                Ok(())
            }
            ObjectNode::Func(fd) => self.emit_func_decl(&ctx, &fd, &args, None, ret),
            ObjectNode::Bind(bc) => {
                let closure = bc.closure.borrow().clone().ok_or_else(|| {
                    ctx.error(EvalErrorKind::Internal {
                        message: format!("binding `{}` has no linked closure", lookup.text),
                    })
                })?;
                let binding = Binding {
                    bind: bc.clone(),
                    name: lookup.text.clone(),
                    closure,
                    scope: scope.clone(),
                };
                self.emit_binding(&ctx, binding, &args, ret)
            }
            ObjectNode::Import(_) => {
                let Some(imod) = obj.module_data() else {
                    return Err(ctx.error(EvalErrorKind::Internal {
                        message: "expected imported module to be resolved".to_string(),
                    }));
                };
                let Some(member) = ie.reference.clone() else {
                    return Err(ctx.error(EvalErrorKind::Internal {
                        message: format!("import `{}` used without a member", lookup.text),
                    }));
                };

                let key = format!("{:p}.{}", Rc::as_ptr(&imod), member.text);
                if self.inner.import_stack.borrow().contains(&key) {
                    return Err(ctx.error(EvalErrorKind::ImportCycle {
                        filename: imod.filename.to_string(),
                    }));
                }
                self.inner.import_stack.borrow_mut().push(key);
                // Force the register inside the tracked window; the member's
                // body is deferred otherwise and a cycle would go unnoticed.
                let result = self
                    .emit_ident_expr(&ctx, &imod.scope, ie, &member, args, opts, None, ret)
                    .and_then(|_| ret.value().map(|_| ()));
                self.inner.import_stack.borrow_mut().pop();
                result
            }
            ObjectNode::Field(_) => {
                let Some(value) = obj.value_data() else {
                    return Err(ctx.error(EvalErrorKind::Internal {
                        message: format!("parameter `{}` has no bound value", lookup.text),
                    }));
                };
                let current = ret.value()?;
                if value.kind().is_option() && current.kind().is_option() {
                    let mut fragments = current.as_option()?;
                    fragments.extend(value.as_option()?);
                    ret.set(Value::Option(fragments));
                } else {
                    ret.set(value);
                }
                Ok(())
            }
        }
    }

    fn emit_builtin_call(
        &self,
        ctx: &Context,
        bd: &Rc<BuiltinDecl>,
        args: Vec<Value>,
        opts: Vec<OptFragment>,
        binding: Option<Binding>,
        incoming: Value,
    ) -> EvalResult<Value> {
        ctx.check_cancelled()?;

        let kind = ctx.return_kind().clone();
        let callable = if kind != Kind::None {
            self.inner.registry.get(&kind, &bd.name)
        } else {
            bd.kinds
                .iter()
                .find_map(|k| self.inner.registry.get(k, &bd.name))
        };
        let Some(callable) = callable else {
            return Err(ctx.error(EvalErrorKind::Internal {
                message: format!("unrecognized builtin `{}`", bd.name),
            }));
        };

        let signature = callable.signature();
        if !signature.accepts(args.len()) {
            return Err(ctx.error(EvalErrorKind::Arity {
                name: bd.name.clone(),
                expected: signature.min_args(),
                received: args.len(),
            }));
        }

        let ctx = match binding {
            Some(binding) => ctx.with_binding(BindingHandle {
                binding,
                cg: self.clone(),
            }),
            None => ctx.clone(),
        };

        trace!(name = %bd.name, kind = %kind, "dispatching builtin");
        callable
            .call(&ctx, self.inner.client.as_ref(), incoming, &opts, &args)
            .map_err(|err| {
                let err = err.with_frames(ctx.frames());
                match ctx.program_counter() {
                    Some(point) => err.with_point(point.clone()),
                    None => err,
                }
            })
    }

    fn emit_func_decl(
        &self,
        ctx: &Context,
        fun: &Rc<FuncDecl>,
        args: &[Value],
        b: Option<&Binding>,
        ret: &Register,
    ) -> EvalResult<()> {
        let Some(decl_scope) = fun.scope.borrow().clone() else {
            return Err(ctx.error(EvalErrorKind::Internal {
                message: format!("function `{}` was not checked", fun.name.text),
            }));
        };
        let ctx = match self.point(&decl_scope, fun.name.span) {
            Some(point) => ctx.with_program_counter(point),
            None => ctx.clone(),
        };

        if fun.params.len() != args.len() {
            let name = match b {
                Some(b) => b.name.clone(),
                None => fun.name.text.clone(),
            };
            return Err(ctx.error(EvalErrorKind::Arity {
                name,
                expected: fun.params.len(),
                received: args.len(),
            }));
        }

        let scope = Scope::func(fun.clone(), decl_scope);
        for (param, arg) in fun.params.iter().zip(args.iter()) {
            scope.insert(Object::with_value(
                param.kind.clone(),
                param.name.clone(),
                ObjectNode::Field(param.clone()),
                arg.clone(),
            ));
        }

        // Yield before executing a function.
        self.debug(&ctx, &scope, &fun.name.text, ret, None)?;

        self.emit_block(&ctx, &scope, &fun.body, b, ret)
    }

    fn emit_binding(
        &self,
        ctx: &Context,
        binding: Binding,
        args: &[Value],
        ret: &Register,
    ) -> EvalResult<()> {
        binding.bind.captured.replace(None);
        if binding.bind.block.is_some() {
            // The sub-closure evaluates in the scope the clause appeared
            // in, so the enclosing call's bound parameters stay visible.
            let scope = Scope::func(binding.closure.clone(), binding.scope.clone());
            self.debug(ctx, &scope, &binding.name, ret, None)?;
            return self.emit_block(ctx, &scope, &binding.closure.body.clone(), Some(&binding), ret);
        }

        self.emit_func_decl(ctx, &binding.closure.clone(), args, Some(&binding), ret)?;
        // Force the closure so the bound call has published its value.
        ret.value()?;
        if let Some(captured) = binding.bind.captured.replace(None) {
            ret.set(captured);
        }
        Ok(())
    }

    /// The declared kinds of a call's arguments, used as evaluation hints.
    fn arg_kinds(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        call: &Rc<CallStmt>,
    ) -> EvalResult<Vec<Kind>> {
        let obj = if let Some(member) = &call.name.reference {
            let iobj = scope.lookup(&call.name.ident.text).ok_or_else(|| {
                ctx.error(EvalErrorKind::UndefinedIdent {
                    name: call.name.ident.text.clone(),
                })
            })?;
            let imod = iobj.module_data().ok_or_else(|| {
                ctx.error(EvalErrorKind::Internal {
                    message: "expected imported module to be resolved".to_string(),
                })
            })?;
            imod.scope.lookup_local(&member.text).ok_or_else(|| {
                ctx.error(EvalErrorKind::UndefinedIdent {
                    name: format!("{}.{}", call.name.ident.text, member.text),
                })
            })?
        } else {
            scope.lookup(&call.name.ident.text).ok_or_else(|| {
                ctx.error(EvalErrorKind::UndefinedIdent {
                    name: call.name.ident.text.clone(),
                })
            })?
        };

        let count = call.args.len();
        let kinds = match &obj.node {
            ObjectNode::Builtin(bd) => {
                let proto = bd
                    .proto_for(ctx.return_kind())
                    .or_else(|| bd.protos.first().map(|(_, p)| *p));
                match proto {
                    Some(proto) => (0..count)
                        .map(|i| proto.param_kind(i).unwrap_or(Kind::None))
                        .collect(),
                    None => vec![Kind::None; count],
                }
            }
            ObjectNode::Func(fd) => (0..count)
                .map(|i| fd.params.get(i).map(|p| p.kind.clone()).unwrap_or(Kind::None))
                .collect(),
            ObjectNode::Bind(bc) => {
                let closure = bc.closure.borrow().clone();
                (0..count)
                    .map(|i| {
                        closure
                            .as_ref()
                            .and_then(|c| c.params.get(i))
                            .map(|p| p.kind.clone())
                            .unwrap_or(Kind::None)
                    })
                    .collect()
            }
            _ => vec![Kind::None; count],
        };
        Ok(kinds)
    }

    /// Evaluate expressions eagerly, each into its own register, under the
    /// given kind hints.
    fn evaluate(
        &self,
        ctx: &Context,
        scope: &Rc<Scope>,
        b: Option<&Binding>,
        kinds: &[Kind],
        exprs: &[Rc<Expr>],
    ) -> EvalResult<Vec<Value>> {
        if kinds.len() != exprs.len() {
            return Err(ctx.error(EvalErrorKind::Internal {
                message: format!("expected {} kinds but got {}", exprs.len(), kinds.len()),
            }));
        }

        let mut values = Vec::with_capacity(exprs.len());
        for (expr, kind) in exprs.iter().zip(kinds.iter()) {
            let mut ctx = ctx.with_return_kind(kind.clone());
            if let Some(point) = self.point(scope, expr.span()) {
                ctx = ctx.with_program_counter(point);
            }

            let reg = Register::new();
            self.emit_expr(&ctx, scope, expr, b, &reg)?;
            let value = reg.value()?;

            // An empty option block evaluates to unit; that still satisfies
            // an option hint (it reads back as an empty list).
            let empty_option = value == Value::Unit && kind.is_option();
            if *kind != Kind::None && !empty_option && !value.kind().matches(kind) {
                return Err(self.error_at(
                    scope,
                    expr.span(),
                    EvalErrorKind::KindMismatch {
                        expected: kind.clone(),
                        found: value.kind(),
                    },
                ));
            }
            values.push(value);
        }
        Ok(values)
    }

    /// Resolve a call's name before evaluating it, loading and checking the
    /// imported module on first use.
    fn lookup_call(&self, ctx: &Context, scope: &Rc<Scope>, lookup: &Ident) -> EvalResult<()> {
        let Some(obj) = scope.lookup(&lookup.text) else {
            return Err(self.error_at(
                scope,
                lookup.span,
                EvalErrorKind::UndefinedIdent {
                    name: lookup.text.clone(),
                },
            ));
        };

        if let ObjectNode::Import(id) = obj.node.clone() {
            if obj.module_data().is_some() {
                return Ok(());
            }

            let Some(module) = scope.owning_module() else {
                return Err(ctx.error(EvalErrorKind::Internal {
                    message: "scope has no owning module".to_string(),
                }));
            };

            let imod = self.emit_import(ctx, &module, &id)?;
            obj.data.replace(ObjectData::Module(imod));

            checker::check_references(&module, &id.name.text)
                .map_err(|errors| check_errors_to_eval(&module, &errors))?;
        }

        Ok(())
    }

    /// Evaluate an import's expression, resolve it to a directory, then
    /// parse and check the module it names.
    fn emit_import(
        &self,
        ctx: &Context,
        module: &Rc<Module>,
        id: &Rc<ImportDecl>,
    ) -> EvalResult<Rc<Module>> {
        let span = debug_span!("import", name = %id.name.text);
        let _enter = span.enter();
        ctx.check_cancelled()?;

        // Import expression can be string or fs.
        let ctx_eval = ctx.with_return_kind(Kind::None);
        let reg = Register::new();
        self.emit_expr(&ctx_eval, &module.scope, &id.expr, None, &reg)?;
        let value = reg.value()?;

        let mut dir: Arc<dyn Directory> = module.directory.borrow().clone().ok_or_else(|| {
            self.error_at(
                &module.scope,
                id.span,
                EvalErrorKind::Internal {
                    message: format!("module `{}` has no directory", module.filename),
                },
            )
        })?;

        let filename = match value.kind() {
            Kind::Filesystem => {
                let fs = value.as_filesystem()?;
                dir = self.inner.resolver.resolve(ctx, id, &fs)?;
                MODULE_FILENAME.to_string()
            }
            Kind::String => value.as_str()?.to_string(),
            found => {
                return Err(self.error_at(
                    &module.scope,
                    id.expr.span(),
                    EvalErrorKind::KindMismatch {
                        expected: Kind::Filesystem,
                        found,
                    },
                ));
            }
        };

        let key = format!("{}::{}", dir.locate(), filename);
        if let Some(cached) = self.inner.loaded.borrow().get(&key) {
            return Ok(cached.clone());
        }
        let imod = self.load_import(ctx, module, id, dir, &filename)?;
        self.inner.loaded.borrow_mut().insert(key, imod.clone());
        Ok(imod)
    }

    fn load_import(
        &self,
        _ctx: &Context,
        module: &Rc<Module>,
        id: &Rc<ImportDecl>,
        dir: Arc<dyn Directory>,
        filename: &str,
    ) -> EvalResult<Rc<Module>> {
        let mut reader = dir.open(filename).map_err(|err| {
            if err.is_not_exist() {
                self.error_at(
                    &module.scope,
                    id.expr.span(),
                    EvalErrorKind::ImportPathNotExist {
                        filename: filename.to_string(),
                    },
                )
            } else {
                self.error_at(
                    &module.scope,
                    id.expr.span(),
                    EvalErrorKind::Io {
                        message: err.to_string(),
                    },
                )
            }
        })?;

        let mut source = String::new();
        reader.read_to_string(&mut source).map_err(|err| {
            self.error_at(
                &module.scope,
                id.expr.span(),
                EvalErrorKind::Io {
                    message: format!("reading `{filename}`: {err}"),
                },
            )
        })?;

        let imod = parse_module(filename, &source).map_err(|errors| {
            let first = &errors.errors[0];
            EvalError::at(
                EvalErrorKind::ImportParse {
                    filename: filename.to_string(),
                    message: first.message.clone(),
                },
                ProgramPoint {
                    filename: Rc::from(filename),
                    source: Rc::from(source.as_str()),
                    span: first.span,
                },
            )
        })?;
        imod.directory.replace(Some(dir));

        checker::semantic_pass(&imod).map_err(|errors| check_errors_to_eval(&imod, &errors))?;
        checker::check(&imod).map_err(|errors| check_errors_to_eval(&imod, &errors))?;

        debug!(filename = %imod.filename, "imported module checked");
        Ok(imod)
    }

    fn error_at(&self, scope: &Rc<Scope>, span: Span, kind: EvalErrorKind) -> EvalError {
        match self.point(scope, span) {
            Some(point) => EvalError::at(kind, point),
            None => EvalError::new(kind),
        }
    }
}

fn check_errors_to_eval(module: &Rc<Module>, errors: &CheckErrors) -> EvalError {
    let first = &errors.errors[0];
    EvalError::at(
        EvalErrorKind::ImportCheck {
            filename: module.filename.to_string(),
            message: first.message.clone(),
        },
        ProgramPoint {
            filename: module.filename.clone(),
            source: module.source.clone(),
            span: first.span,
        },
    )
}

/// Interpret a string escape sequence (`\n`, `\t`, `\\`, `\"`, `\xNN`,
/// `\$`, ...).
fn unescape(sequence: &str) -> Result<String, String> {
    let rest = &sequence[1..];
    let mut chars = rest.chars();
    let marker = chars
        .next()
        .ok_or_else(|| "empty escape sequence".to_string())?;
    let out = match marker {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        '0' => '\0',
        '\\' => '\\',
        '"' => '"',
        '\'' => '\'',
        '$' => '$',
        'x' => {
            let digits: String = chars.collect();
            let code = u8::from_str_radix(&digits, 16)
                .map_err(|_| format!("invalid \\x escape `{sequence}`"))?;
            code as char
        }
        other => return Err(format!("unknown escape `\\{other}`")),
    };
    Ok(out.to_string())
}

/// Apply heredoc post-processing: strip one layer of leading/trailing
/// newlines, then dedent for `<<-` or fold for `<<~`.
fn elaborate_heredoc(opener: &str, raw: &str) -> String {
    let raw = raw
        .trim_start_matches('\n')
        .trim_end_matches(['\n', '\t']);
    match opener {
        "<<-" => dedent(raw),
        "<<~" => fold(raw),
        _ => raw.to_string(),
    }
}

/// Remove the longest common leading whitespace prefix from every line.
fn dedent(text: &str) -> String {
    let mut prefix: Option<&str> = None;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent_len = line.len() - line.trim_start_matches([' ', '\t']).len();
        let indent = &line[..indent_len];
        prefix = Some(match prefix {
            None => indent,
            Some(current) => {
                let common = current
                    .bytes()
                    .zip(indent.bytes())
                    .take_while(|(a, b)| a == b)
                    .count();
                &current[..common]
            }
        });
    }
    let Some(prefix) = prefix.filter(|p| !p.is_empty()) else {
        return text.to_string();
    };
    text.lines()
        .map(|line| line.strip_prefix(prefix).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse the heredoc onto one line: trim every line and join with single
/// spaces.
fn fold(text: &str) -> String {
    text.trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedent_strips_common_indent() {
        assert_eq!(dedent("\thello\n\tworld"), "hello\nworld");
        assert_eq!(dedent("  a\n    b"), "a\n  b");
        assert_eq!(dedent("no indent\n\tsome"), "no indent\n\tsome");
    }

    #[test]
    fn fold_joins_trimmed_lines() {
        assert_eq!(fold("  a\n  b\n\n  c  "), "a b c");
    }

    #[test]
    fn heredoc_trims_outer_newlines() {
        assert_eq!(elaborate_heredoc("<<", "\nbody\n"), "body");
        assert_eq!(elaborate_heredoc("<<-", "\thello\n\tworld\n"), "hello\nworld");
        assert_eq!(elaborate_heredoc("<<~", "  a\n  b\n"), "a b");
    }

    #[test]
    fn unescape_handles_hex_and_dollar() {
        assert_eq!(unescape("\\n").unwrap(), "\n");
        assert_eq!(unescape("\\x41").unwrap(), "A");
        assert_eq!(unescape("\\$").unwrap(), "$");
        assert!(unescape("\\q").is_err());
    }
}
