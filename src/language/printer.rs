use crate::language::ast::*;

/// Reprint a module in canonical form. Printing is stable: parsing the
/// output and printing again yields the same text, which is what the
/// round-trip tests lean on.
pub fn print_module(module: &Module) -> String {
    let mut printer = Printer::default();
    for (i, decl) in module.decls.iter().enumerate() {
        if i > 0 {
            printer.out.push('\n');
        }
        printer.write_decl(decl);
    }
    printer.out
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
    line: String,
    pending_heredocs: Vec<(String, String)>,
}

impl Printer {
    fn write_decl(&mut self, decl: &Decl) {
        match decl {
            Decl::Import(import) => {
                self.line.push_str(&format!("import {} ", import.name.text));
                self.write_expr(&import.expr);
                self.end_line();
            }
            Decl::Export(export) => {
                self.line.push_str(&format!("export {}", export.name.text));
                self.end_line();
            }
            Decl::Func(func) => {
                self.line
                    .push_str(&format!("{} {}(", func.kind, func.name.text));
                self.write_params(&func.params);
                self.line.push(')');
                if !func.effects.is_empty() {
                    self.line.push_str(" (");
                    self.write_params(&func.effects);
                    self.line.push(')');
                }
                self.line.push(' ');
                self.write_block(&func.body);
                self.end_line();
            }
        }
    }

    fn write_params(&mut self, params: &[std::rc::Rc<Field>]) {
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                self.line.push_str(", ");
            }
            self.line.push_str(&param.kind.to_string());
            if param.variadic {
                self.line.push_str(" variadic");
            }
            self.line.push(' ');
            self.line.push_str(&param.name.text);
        }
    }

    fn write_block(&mut self, block: &BlockStmt) {
        self.line.push('{');
        self.end_line();
        self.indent += 1;
        for stmt in &block.stmts {
            self.start_line();
            match stmt {
                Stmt::Call(call) => self.write_call_stmt(call),
                Stmt::Expr(expr) => self.write_expr(expr),
            }
            self.end_line();
        }
        self.indent -= 1;
        self.start_line();
        self.line.push('}');
    }

    fn write_call_stmt(&mut self, call: &CallStmt) {
        self.write_ident_expr(&call.name);
        if call.parens {
            self.line.push('(');
            for (i, arg) in call.args.iter().enumerate() {
                if i > 0 {
                    self.line.push_str(", ");
                }
                self.write_expr(arg);
            }
            self.line.push(')');
        } else {
            for arg in &call.args {
                self.line.push(' ');
                self.write_expr(arg);
            }
        }
        if let Some(bind) = &call.bind {
            self.line.push_str(&format!(" as {}", bind.name.text));
            if !bind.effects.is_empty() {
                self.line.push('(');
                for (i, effect) in bind.effects.iter().enumerate() {
                    if i > 0 {
                        self.line.push_str(", ");
                    }
                    self.line.push_str(&effect.text);
                }
                self.line.push(')');
            }
            if let Some(block) = &bind.block {
                self.line.push(' ');
                self.write_block(block);
            }
        }
        if let Some(with) = &call.with {
            self.line.push_str(" with ");
            self.write_expr(&with.expr);
        }
    }

    fn write_ident_expr(&mut self, ie: &IdentExpr) {
        self.line.push_str(&ie.ident.text);
        if let Some(member) = &ie.reference {
            self.line.push('.');
            self.line.push_str(&member.text);
        }
    }

    fn write_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::FuncLit(lit) => {
                self.line.push_str(&lit.kind.to_string());
                self.line.push(' ');
                self.write_block(&lit.body);
            }
            Expr::BasicLit(lit) => self.write_basic_lit(lit),
            Expr::Call(call) => {
                self.write_ident_expr(&call.name);
                if call.parens || !call.args.is_empty() {
                    self.line.push('(');
                    for (i, arg) in call.args.iter().enumerate() {
                        if i > 0 {
                            self.line.push_str(", ");
                        }
                        self.write_expr(arg);
                    }
                    self.line.push(')');
                }
            }
        }
    }

    fn write_basic_lit(&mut self, lit: &BasicLit) {
        match lit {
            BasicLit::Int(value, _) => self.line.push_str(&value.to_string()),
            BasicLit::Bool(value, _) => self.line.push_str(&value.to_string()),
            BasicLit::Str(string) => {
                self.line.push('"');
                for fragment in &string.fragments {
                    self.write_fragment(fragment);
                }
                self.line.push('"');
            }
            BasicLit::RawStr(raw) => {
                self.line.push('`');
                self.line.push_str(&raw.text);
                self.line.push('`');
            }
            BasicLit::Heredoc(heredoc) | BasicLit::RawHeredoc(heredoc) => {
                self.line.push_str(&heredoc.opener);
                if heredoc.raw {
                    self.line.push('`');
                    self.line.push_str(&heredoc.terminator);
                    self.line.push('`');
                } else {
                    self.line.push_str(&heredoc.terminator);
                }
                self.pending_heredocs
                    .push((heredoc.body.clone(), heredoc.terminator.clone()));
            }
        }
    }

    fn write_fragment(&mut self, fragment: &Fragment) {
        match fragment {
            Fragment::Text(text) | Fragment::Spaces(text) | Fragment::Escaped(text) => {
                self.line.push_str(text)
            }
            Fragment::Interpolated { raw, .. } => self.line.push_str(raw),
        }
    }

    fn start_line(&mut self) {
        for _ in 0..self.indent {
            self.line.push('\t');
        }
    }

    /// Finish the current line and flush any heredoc bodies opened on it.
    fn end_line(&mut self) {
        self.out.push_str(&self.line);
        self.out.push('\n');
        self.line.clear();
        for (body, terminator) in std::mem::take(&mut self.pending_heredocs) {
            self.out.push_str(&body);
            if !body.ends_with('\n') {
                self.out.push('\n');
            }
            self.out.push_str(&terminator);
            self.out.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::language::parser::parse_module;

    fn round_trips(source: &str) {
        let module = parse_module("test.hlb", source).expect("first parse");
        let printed = super::print_module(&module);
        let reparsed = parse_module("test.hlb", &printed)
            .unwrap_or_else(|e| panic!("reparse of {printed:?}: {e:?}"));
        let reprinted = super::print_module(&reparsed);
        assert_eq!(printed, reprinted);
    }

    #[test]
    fn round_trips_simple_module() {
        round_trips("fs default() {\n\tscratch\n}\n");
    }

    #[test]
    fn round_trips_params_effects_and_with() {
        round_trips(
            "fs build(string tag, fs variadic extra) (fs out) {\n\timage \"alpine\"\n\trun \"make\" with option { env \"K\" \"V\"; dir \"/src\"; }\n}\n",
        );
    }

    #[test]
    fn round_trips_bind_and_qualified_calls() {
        round_trips(
            "import util `./util.hlb`\nfs a() {\n\trun \"cmd\" as id { mount fs { scratch; } \"/in\"; }\n\tutil.base\n}\n",
        );
    }

    #[test]
    fn round_trips_strings_and_heredocs() {
        round_trips(
            "string greeting() {\n\t\"hi $x \\$5 ${format(\"%s\", y)}\"\n}\nfs f() {\n\tmkfile \"m\" 0o644 <<-EOF\n\thello\n\tworld\nEOF\n}\n",
        );
    }

    #[test]
    fn round_trips_paren_calls_and_literals() {
        round_trips(
            "string s() {\n\tformat(\"%s\", localArch)\n}\npipeline p() {\n\tstage fs { scratch; }\n}\n",
        );
    }
}
