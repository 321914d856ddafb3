use crate::language::ast::*;
use crate::language::builtin;
use crate::language::errors::{CheckError, CheckErrorKind, CheckErrors};
use crate::language::scope::{Object, ObjectNode, Scope};
use std::cell::RefCell;
use std::rc::Rc;

/// Build scopes and report structural findings: duplicate names, variadic
/// misuse, call arity, `with` kinds, and bind-clause linkage. Must run
/// before `check`.
pub fn semantic_pass(module: &Rc<Module>) -> Result<(), CheckErrors> {
    let mut checker = Checker::default();
    checker.semantic_pass(module);
    checker.finish()
}

/// Resolve every reference and enforce kind agreement. Assumes
/// `semantic_pass` succeeded.
pub fn check(module: &Rc<Module>) -> Result<(), CheckErrors> {
    let mut checker = Checker::default();
    checker.check_module(module);
    checker.finish()
}

/// Validate every qualified reference through the named import once its
/// module has been loaded and checked.
pub fn check_references(module: &Rc<Module>, import_name: &str) -> Result<(), CheckErrors> {
    let mut checker = Checker::default();
    checker.check_references(module, import_name);
    checker.finish()
}

#[derive(Default)]
struct Checker {
    errors: Vec<CheckError>,
}

impl Checker {
    fn finish(self) -> Result<(), CheckErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CheckErrors::new(self.errors))
        }
    }

    fn error(&mut self, kind: CheckErrorKind, message: impl Into<String>, span: crate::language::span::Span) {
        self.errors.push(CheckError::new(kind, message, span));
    }

    // Semantic pass.

    fn semantic_pass(&mut self, module: &Rc<Module>) {
        for bd in builtin::builtin_decls() {
            let ident = builtin::builtin_ident(&bd.name);
            module
                .scope
                .insert(Object::new(Kind::None, ident, ObjectNode::Builtin(bd)));
        }

        for decl in &module.decls {
            match decl {
                Decl::Func(func) => {
                    self.declare(module, &func.name, Kind::clone(&func.kind), ObjectNode::Func(func.clone()));
                }
                Decl::Import(import) => {
                    self.declare(module, &import.name, Kind::None, ObjectNode::Import(import.clone()));
                }
                Decl::Export(_) => {}
            }
        }

        for decl in &module.decls {
            if let Decl::Export(export) = decl {
                match module.scope.lookup_local(&export.name.text) {
                    Some(obj) if matches!(obj.node, ObjectNode::Func(_)) => {}
                    _ => self.error(
                        CheckErrorKind::UndefinedIdent,
                        format!("Exported name `{}` is not a function in this module", export.name.text),
                        export.name.span,
                    ),
                }
            }
        }

        for decl in &module.decls {
            let Decl::Func(func) = decl else { continue };
            self.build_func_scope(module, func);
        }

        for decl in &module.decls {
            let Decl::Func(func) = decl else { continue };
            let scope = func.scope.borrow().clone().unwrap_or_else(|| module.scope.clone());
            self.semantic_block(module, func, &scope, &func.body);
        }
    }

    fn declare(&mut self, module: &Rc<Module>, name: &Ident, kind: Kind, node: ObjectNode) {
        if let Some(existing) = module.scope.lookup_local(&name.text) {
            // Builtins may be shadowed; user declarations may not collide.
            if !matches!(existing.node, ObjectNode::Builtin(_)) {
                self.error(
                    CheckErrorKind::DuplicateName,
                    format!("`{}` is already declared in this module", name.text),
                    name.span,
                );
                return;
            }
        }
        module.scope.insert(Object::new(kind, name.clone(), node));
    }

    fn build_func_scope(&mut self, module: &Rc<Module>, func: &Rc<FuncDecl>) {
        let scope = Scope::func(func.clone(), module.scope.clone());
        for param in &func.params {
            if param.variadic {
                self.error(
                    CheckErrorKind::InvalidBind,
                    "Only builtin prototypes declare variadic parameters",
                    param.span,
                );
            }
            if scope.lookup_local(&param.name.text).is_some() {
                self.error(
                    CheckErrorKind::DuplicateName,
                    format!("Duplicate parameter `{}`", param.name.text),
                    param.name.span,
                );
                continue;
            }
            scope.insert(Object::new(
                param.kind.clone(),
                param.name.clone(),
                ObjectNode::Field(param.clone()),
            ));
        }
        func.scope.replace(Some(scope));
    }

    fn semantic_block(
        &mut self,
        module: &Rc<Module>,
        enclosing: &Rc<FuncDecl>,
        scope: &Rc<Scope>,
        block: &Rc<BlockStmt>,
    ) {
        for stmt in &block.stmts {
            match stmt {
                Stmt::Call(call) => self.semantic_call(module, enclosing, scope, &block.kind, call),
                Stmt::Expr(expr) => {
                    if let Expr::FuncLit(lit) = &**expr {
                        self.semantic_block(module, enclosing, scope, &lit.body);
                    }
                }
            }
        }
    }

    fn semantic_call(
        &mut self,
        module: &Rc<Module>,
        enclosing: &Rc<FuncDecl>,
        scope: &Rc<Scope>,
        block_kind: &Kind,
        call: &Rc<CallStmt>,
    ) {
        // Arity against a resolvable callee; undefined names are the check
        // pass's finding.
        if call.name.reference.is_none() {
            if let Some(obj) = scope.lookup(&call.name.ident.text) {
                match &obj.node {
                    ObjectNode::Builtin(bd) => {
                        if let Some(proto) = bd.proto_for(block_kind) {
                            let min = proto.min_args();
                            let max_ok = proto.is_variadic() || call.args.len() <= proto.params.len();
                            if call.args.len() < min || !max_ok {
                                self.error(
                                    CheckErrorKind::Arity,
                                    format!(
                                        "`{}` expected {} args, got {}",
                                        call.name.ident.text,
                                        if proto.is_variadic() {
                                            format!("at least {min}")
                                        } else {
                                            format!("{}", proto.params.len())
                                        },
                                        call.args.len()
                                    ),
                                    call.span,
                                );
                            }
                        }
                    }
                    ObjectNode::Func(fd) => {
                        if call.args.len() != fd.params.len() {
                            self.error(
                                CheckErrorKind::Arity,
                                format!(
                                    "`{}` expected {} args, got {}",
                                    call.name.ident.text,
                                    fd.params.len(),
                                    call.args.len()
                                ),
                                call.span,
                            );
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(with) = &call.with {
            if let Expr::FuncLit(lit) = &*with.expr {
                let expected = Kind::option_of(&call.name.ident.text);
                if !lit.kind.matches(&expected) {
                    self.error(
                        CheckErrorKind::InvalidWith,
                        format!(
                            "`with` expression for `{}` must have kind `{}`, found `{}`",
                            call.name.ident.text, expected, lit.kind
                        ),
                        lit.span,
                    );
                }
                self.semantic_block(module, enclosing, scope, &lit.body);
            }
        }

        for arg in &call.args {
            if let Expr::FuncLit(lit) = &**arg {
                self.semantic_block(module, enclosing, scope, &lit.body);
            }
        }

        if let Some(bind) = &call.bind {
            self.link_bind(module, enclosing, scope, block_kind, call, bind);
            if let Some(block) = &bind.block {
                self.semantic_block(module, enclosing, scope, block);
            }
        }
    }

    fn link_bind(
        &mut self,
        module: &Rc<Module>,
        enclosing: &Rc<FuncDecl>,
        scope: &Rc<Scope>,
        block_kind: &Kind,
        call: &Rc<CallStmt>,
        bind: &Rc<BindClause>,
    ) {
        let closure = match &bind.block {
            Some(block) => {
                let synth = Rc::new(FuncDecl {
                    kind: block.kind.clone(),
                    name: bind.name.clone(),
                    params: Vec::new(),
                    effects: Vec::new(),
                    body: block.clone(),
                    span: bind.span,
                    scope: RefCell::new(None),
                });
                synth.scope.replace(Some(Scope::func(synth.clone(), scope.clone())));
                synth
            }
            None => enclosing.clone(),
        };
        let closure_kind = closure.kind.clone();
        bind.closure.replace(Some(closure));

        if !bind.effects.is_empty() {
            let declared = self.callee_effect_count(scope, block_kind, call);
            if bind.effects.len() > declared {
                self.error(
                    CheckErrorKind::InvalidBind,
                    format!(
                        "`{}` declares {} effect parameter(s), cannot bind {}",
                        call.name.ident.text,
                        declared,
                        bind.effects.len()
                    ),
                    bind.span,
                );
            }
        }

        self.declare(module, &bind.name, closure_kind, ObjectNode::Bind(bind.clone()));
    }

    fn callee_effect_count(&self, scope: &Rc<Scope>, block_kind: &Kind, call: &Rc<CallStmt>) -> usize {
        let Some(obj) = scope.lookup(&call.name.ident.text) else {
            return 0;
        };
        match &obj.node {
            ObjectNode::Builtin(bd) => bd
                .proto_for(block_kind)
                .map(|proto| proto.effects.len())
                .unwrap_or(0),
            ObjectNode::Func(fd) => fd.effects.len(),
            _ => 0,
        }
    }

    // Check pass.

    fn check_module(&mut self, module: &Rc<Module>) {
        for decl in &module.decls {
            let Decl::Func(func) = decl else { continue };
            let scope = func.scope.borrow().clone().unwrap_or_else(|| module.scope.clone());
            self.check_block(&scope, &func.body);
        }
    }

    fn check_block(&mut self, scope: &Rc<Scope>, block: &Rc<BlockStmt>) {
        for stmt in &block.stmts {
            match stmt {
                Stmt::Call(call) => self.check_call(scope, &block.kind, call),
                Stmt::Expr(expr) => self.check_expr(scope, &block.kind, expr),
            }
        }
    }

    fn check_expr(&mut self, scope: &Rc<Scope>, expected: &Kind, expr: &Rc<Expr>) {
        match &**expr {
            Expr::BasicLit(lit) => {
                let found = lit.kind();
                if !found.matches(expected) {
                    self.error(
                        CheckErrorKind::KindMismatch,
                        format!("Expected kind `{expected}` but found `{found}`"),
                        lit.span(),
                    );
                }
            }
            Expr::FuncLit(lit) => {
                if !lit.kind.matches(expected) {
                    self.error(
                        CheckErrorKind::KindMismatch,
                        format!("Expected kind `{expected}` but found `{}`", lit.kind),
                        lit.span,
                    );
                }
                self.check_block(scope, &lit.body);
            }
            Expr::Call(call) => self.check_call(scope, expected, call),
        }
    }

    fn check_call(&mut self, scope: &Rc<Scope>, expected: &Kind, call: &Rc<CallStmt>) {
        if let Some(member) = &call.name.reference {
            // Member resolution is deferred until the import is evaluated;
            // only the import object itself can be verified here.
            match scope.lookup(&call.name.ident.text) {
                None => self.error(
                    CheckErrorKind::UndefinedIdent,
                    format!("Undefined identifier `{}`", call.name.ident.text),
                    call.name.ident.span,
                ),
                Some(obj) if !matches!(obj.node, ObjectNode::Import(_)) => self.error(
                    CheckErrorKind::InvalidImport,
                    format!("`{}` is not an import; `.{}` cannot be resolved", call.name.ident.text, member.text),
                    call.name.span,
                ),
                Some(_) => {}
            }
            return;
        }

        let Some(obj) = scope.lookup(&call.name.ident.text) else {
            self.error(
                CheckErrorKind::UndefinedIdent,
                format!("Undefined identifier `{}`", call.name.ident.text),
                call.name.ident.span,
            );
            return;
        };

        match &obj.node {
            ObjectNode::Builtin(bd) => {
                if !bd.kinds.iter().any(|k| k.matches(expected)) {
                    self.error(
                        CheckErrorKind::KindMismatch,
                        format!(
                            "`{}` does not produce kind `{}` (declared: {})",
                            call.name.ident.text,
                            expected,
                            bd.kinds
                                .iter()
                                .map(|k| k.to_string())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                        call.name.ident.span,
                    );
                } else if let Some(proto) = bd.proto_for(expected) {
                    for (i, arg) in call.args.iter().enumerate() {
                        if let Some(kind) = proto.param_kind(i) {
                            self.check_expr(scope, &kind, arg);
                        }
                    }
                }
            }
            ObjectNode::Func(fd) => {
                if !fd.kind.matches(expected) {
                    self.error(
                        CheckErrorKind::KindMismatch,
                        format!(
                            "`{}` returns `{}` but `{}` is expected",
                            call.name.ident.text, fd.kind, expected
                        ),
                        call.name.ident.span,
                    );
                }
                for (i, arg) in call.args.iter().enumerate() {
                    if let Some(param) = fd.params.get(i) {
                        self.check_expr(scope, &param.kind, arg);
                    }
                }
            }
            ObjectNode::Bind(bind) => {
                let closure_kind = bind
                    .closure
                    .borrow()
                    .as_ref()
                    .map(|c| c.kind.clone())
                    .unwrap_or(Kind::None);
                if !closure_kind.matches(expected) {
                    self.error(
                        CheckErrorKind::KindMismatch,
                        format!(
                            "Binding `{}` produces `{}` but `{}` is expected",
                            call.name.ident.text, closure_kind, expected
                        ),
                        call.name.ident.span,
                    );
                }
            }
            ObjectNode::Field(field) => {
                if !field.kind.matches(expected) {
                    self.error(
                        CheckErrorKind::KindMismatch,
                        format!(
                            "`{}` has kind `{}` but `{}` is expected",
                            call.name.ident.text, field.kind, expected
                        ),
                        call.name.ident.span,
                    );
                }
                if !call.args.is_empty() {
                    self.error(
                        CheckErrorKind::Arity,
                        format!("Parameter `{}` takes no arguments", call.name.ident.text),
                        call.span,
                    );
                }
            }
            ObjectNode::Import(_) => {
                self.error(
                    CheckErrorKind::InvalidImport,
                    format!(
                        "Import `{}` must be referenced as `{}.member`",
                        call.name.ident.text, call.name.ident.text
                    ),
                    call.name.span,
                );
            }
        }

        if let Some(with) = &call.with {
            let option_kind = Kind::option_of(&call.name.ident.text);
            match &*with.expr {
                Expr::FuncLit(lit) => self.check_block(scope, &lit.body),
                Expr::Call(option_call) => self.check_call(scope, &option_kind, option_call),
                Expr::BasicLit(lit) => self.error(
                    CheckErrorKind::InvalidWith,
                    format!("`with` expression must have kind `{option_kind}`"),
                    lit.span(),
                ),
            }
        }

        if let Some(bind) = &call.bind {
            if let Some(block) = &bind.block {
                self.check_block(scope, block);
            }
        }
    }

    // Deferred import references.

    fn check_references(&mut self, module: &Rc<Module>, import_name: &str) {
        let Some(obj) = module.scope.lookup_local(import_name) else {
            return;
        };
        let Some(imod) = obj.module_data() else {
            return;
        };

        let mut references = Vec::new();
        for decl in &module.decls {
            let Decl::Func(func) = decl else { continue };
            collect_references(&func.body, import_name, &mut references);
        }

        for ident_expr in references {
            let Some(member) = &ident_expr.reference else {
                self.error(
                    CheckErrorKind::InvalidImport,
                    format!("Import `{import_name}` must be referenced as `{import_name}.member`"),
                    ident_expr.span,
                );
                continue;
            };
            let Some(mobj) = imod.scope.lookup_local(&member.text) else {
                self.error(
                    CheckErrorKind::UndefinedIdent,
                    format!("`{}` is not defined in `{}`", member.text, imod.filename),
                    member.span,
                );
                continue;
            };
            if !matches!(mobj.node, ObjectNode::Func(_)) {
                self.error(
                    CheckErrorKind::InvalidImport,
                    format!("`{}.{}` is not a function", import_name, member.text),
                    member.span,
                );
                continue;
            }
            if !imod.is_exported(&member.text) {
                self.error(
                    CheckErrorKind::NotExported,
                    format!("`{}` is not exported by `{}`", member.text, imod.filename),
                    member.span,
                );
            }
        }
    }
}

/// Collect every reference to `name` inside a block, including nested
/// literal blocks, argument expressions, `with` clauses, and bind closures.
fn collect_references(block: &Rc<BlockStmt>, name: &str, out: &mut Vec<IdentExpr>) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Call(call) => collect_call_references(call, name, out),
            Stmt::Expr(expr) => collect_expr_references(expr, name, out),
        }
    }
}

fn collect_call_references(call: &Rc<CallStmt>, name: &str, out: &mut Vec<IdentExpr>) {
    if call.name.ident.text == name {
        out.push(call.name.clone());
    }
    for arg in &call.args {
        collect_expr_references(arg, name, out);
    }
    if let Some(with) = &call.with {
        collect_expr_references(&with.expr, name, out);
    }
    if let Some(bind) = &call.bind {
        if let Some(block) = &bind.block {
            collect_references(block, name, out);
        }
    }
}

fn collect_expr_references(expr: &Rc<Expr>, name: &str, out: &mut Vec<IdentExpr>) {
    match &**expr {
        Expr::Call(call) => collect_call_references(call, name, out),
        Expr::FuncLit(lit) => collect_references(&lit.body, name, out),
        Expr::BasicLit(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::parser::parse_module;

    fn checked(source: &str) -> Rc<Module> {
        let module = parse_module("test.hlb", source).expect("parse");
        semantic_pass(&module).expect("semantic");
        check(&module).expect("check");
        module
    }

    fn check_fails(source: &str) -> CheckErrors {
        let module = parse_module("test.hlb", source).expect("parse");
        if let Err(errors) = semantic_pass(&module) {
            return errors;
        }
        check(&module).expect_err("expected check errors")
    }

    #[test]
    fn resolves_builtin_calls() {
        checked("fs default() {\n\tscratch\n\trun \"echo hi\"\n}\n");
    }

    #[test]
    fn resolves_function_calls_and_params() {
        checked(
            "fs base(string tag) {\n\timage tag\n}\nfs app() {\n\tbase \"alpine\"\n}\n",
        );
    }

    #[test]
    fn duplicate_decl_is_reported() {
        let errors = check_fails("fs a() { scratch; }\nfs a() { scratch; }\n");
        assert_eq!(errors.errors[0].kind, CheckErrorKind::DuplicateName);
    }

    #[test]
    fn undefined_ident_is_reported() {
        let errors = check_fails("fs a() {\n\tnope\n}\n");
        assert_eq!(errors.errors[0].kind, CheckErrorKind::UndefinedIdent);
    }

    #[test]
    fn kind_mismatch_has_position() {
        let source = "fs a() {\n\tlocalArch\n}\n";
        let errors = check_fails(source);
        let err = &errors.errors[0];
        assert_eq!(err.kind, CheckErrorKind::KindMismatch);
        assert_eq!(&source[err.span.start..err.span.end], "localArch");
    }

    #[test]
    fn arity_counts_variadics() {
        checked("fs a() {\n\trun\n\trun \"x\" \"y\" \"z\"\n}\n");
        let errors = check_fails("fs a() {\n\tcopy\n}\n");
        assert_eq!(errors.errors[0].kind, CheckErrorKind::Arity);
    }

    #[test]
    fn with_kind_must_match_callee() {
        let errors = check_fails(
            "fs a() {\n\timage \"x\"\n\trun \"c\" with option::mkdir { createParents; }\n}\n",
        );
        assert_eq!(errors.errors[0].kind, CheckErrorKind::InvalidWith);
    }

    #[test]
    fn with_named_option_function() {
        checked(
            "option::run cache() {\n\tignoreCache\n}\nfs a() {\n\timage \"x\"\n\trun \"c\" with cache\n}\n",
        );
    }

    #[test]
    fn bind_clause_registers_module_target() {
        let module = checked(
            "fs a() {\n\timage \"x\"\n\trun \"make\" as built\n}\n",
        );
        let obj = module.scope.lookup_local("built").expect("bind target");
        assert!(matches!(obj.node, ObjectNode::Bind(_)));
        assert_eq!(obj.kind, Kind::Filesystem);
    }

    #[test]
    fn bind_block_closure_takes_option_kind() {
        let module = checked(
            "fs a() {\n\timage \"x\"\n\trun \"make\" as built { mount fs { scratch; } \"/in\"; }\n}\n",
        );
        let obj = module.scope.lookup_local("built").expect("bind target");
        assert_eq!(obj.kind, Kind::option_of("run"));
    }

    #[test]
    fn bind_effects_arity_is_checked() {
        let errors = check_fails(
            "fs a() {\n\timage \"x\"\n\trun \"make\" as built(a, b)\n}\n",
        );
        assert_eq!(errors.errors[0].kind, CheckErrorKind::InvalidBind);
    }

    #[test]
    fn variadic_user_params_are_rejected() {
        let errors = check_fails("fs a(string variadic xs) { scratch; }\n");
        assert_eq!(errors.errors[0].kind, CheckErrorKind::InvalidBind);
    }

    #[test]
    fn import_must_be_member_referenced() {
        let errors = check_fails(
            "import util `./util.hlb`\nfs a() {\n\tutil\n}\n",
        );
        assert_eq!(errors.errors[0].kind, CheckErrorKind::InvalidImport);
    }

    #[test]
    fn qualified_references_are_deferred() {
        checked("import util `./util.hlb`\nfs a() {\n\tutil.base\n}\n");
    }

    #[test]
    fn export_of_unknown_name_fails() {
        let errors = check_fails("export missing\n");
        assert_eq!(errors.errors[0].kind, CheckErrorKind::UndefinedIdent);
    }
}
