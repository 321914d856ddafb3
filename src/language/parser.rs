use crate::language::{
    ast::*,
    errors::{SyntaxError, SyntaxErrors},
    lexer::lex,
    span::Span,
    token::{HeredocToken, Token, TokenKind},
};
use std::rc::Rc;

/// Parse a whole module. The source is retained on the module so diagnostics
/// can render offending lines. An empty filename falls back to `<stdin>`.
pub fn parse_module(filename: &str, source: &str) -> Result<Rc<Module>, SyntaxErrors> {
    let filename = if filename.is_empty() {
        "<stdin>"
    } else {
        filename
    };
    let tokens = match lex(source) {
        Ok(tokens) => tokens,
        Err(errors) => {
            let errs = errors
                .into_iter()
                .map(|err| SyntaxError::new(err.message, err.span))
                .collect();
            return Err(SyntaxErrors::new(errs));
        }
    };
    let decls = Parser::new(tokens).parse()?;
    Ok(Module::new(filename, source, decls))
}

/// Parse a single expression, used for string interpolations. Token spans
/// are shifted by `base` so they index into the enclosing source.
pub fn parse_interpolated_expr(source: &str, base: usize) -> Result<Rc<Expr>, SyntaxError> {
    let mut tokens = lex(source).map_err(|mut errors| {
        let mut err = errors.remove(0);
        err.span.start += base;
        err.span.end += base;
        SyntaxError::new(err.message, err.span)
    })?;
    for token in &mut tokens {
        token.span.start += base;
        token.span.end += base;
    }
    let mut parser = Parser::new(tokens);
    parser.skip_separators();
    let expr = parser.parse_expr()?;
    parser.skip_separators();
    if !parser.check(&TokenKind::Eof) {
        return Err(parser.error_here("Expected a single interpolated expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<SyntaxError>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<Vec<Decl>, SyntaxErrors> {
        let mut decls = Vec::new();

        while !self.is_eof() {
            if self.matches(&TokenKind::Newline) || self.matches(&TokenKind::Semi) {
                continue;
            }

            match self.parse_decl() {
                Ok(decl) => decls.push(decl),
                Err(err) => {
                    self.report(err);
                    self.synchronize_decl();
                }
            }
        }

        if self.errors.is_empty() {
            Ok(decls)
        } else {
            Err(SyntaxErrors::new(self.errors))
        }
    }

    fn parse_decl(&mut self) -> Result<Decl, SyntaxError> {
        if self.check(&TokenKind::Import) {
            return self.parse_import().map(|d| Decl::Import(Rc::new(d)));
        }
        if self.check(&TokenKind::Export) {
            return self.parse_export().map(|d| Decl::Export(Rc::new(d)));
        }
        self.parse_func().map(|d| Decl::Func(Rc::new(d)))
    }

    fn parse_import(&mut self) -> Result<ImportDecl, SyntaxError> {
        let start = self.expect(TokenKind::Import)?.span.start;
        let name = self.expect_identifier("Expected import name")?;
        let expr = self.parse_expr()?;
        let end = expr.span().end;
        Ok(ImportDecl {
            name,
            expr,
            span: Span::new(start, end),
        })
    }

    fn parse_export(&mut self) -> Result<ExportDecl, SyntaxError> {
        let start = self.expect(TokenKind::Export)?.span.start;
        let name = self.expect_identifier("Expected exported name")?;
        let end = name.span.end;
        Ok(ExportDecl {
            name,
            span: Span::new(start, end),
        })
    }

    fn parse_func(&mut self) -> Result<FuncDecl, SyntaxError> {
        let start = self.current_span().start;
        let kind = self.parse_kind()?;
        let name = self.expect_identifier("Expected function name")?;

        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;

        let effects = if self.check(&TokenKind::LParen) {
            self.expect(TokenKind::LParen)?;
            let effects = self.parse_params()?;
            self.expect(TokenKind::RParen)?;
            effects
        } else {
            Vec::new()
        };

        let body = self.parse_block(kind.clone())?;
        let end = body.span.end;
        Ok(FuncDecl {
            kind,
            name,
            params,
            effects,
            body,
            span: Span::new(start, end),
            scope: std::cell::RefCell::new(None),
        })
    }

    fn parse_kind(&mut self) -> Result<Kind, SyntaxError> {
        let ident = self.expect_identifier("Expected a kind")?;
        let Some(kind) = Kind::from_name(&ident.text) else {
            return Err(SyntaxError::new(
                format!("Unknown kind `{}`", ident.text),
                ident.span,
            )
            .with_help("Kinds are `fs`, `string`, `int`, `bool`, `pipeline`, and `option`"));
        };
        if kind == Kind::Option(None) && self.matches(&TokenKind::DoubleColon) {
            let callee = self.expect_identifier("Expected callee after `option::`")?;
            return Ok(Kind::option_of(&callee.text));
        }
        Ok(kind)
    }

    fn parse_params(&mut self) -> Result<Vec<Rc<Field>>, SyntaxError> {
        let mut params = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let start = self.current_span().start;
            let kind = self.parse_kind()?;
            let variadic = self.matches(&TokenKind::Variadic);
            let name = self.expect_identifier("Expected parameter name")?;
            let end = name.span.end;
            params.push(Rc::new(Field {
                kind,
                name,
                variadic,
                span: Span::new(start, end),
            }));
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_block(&mut self, kind: Kind) -> Result<Rc<BlockStmt>, SyntaxError> {
        let start = self.expect(TokenKind::LBrace)?.span.start;
        let mut stmts = Vec::new();

        loop {
            self.skip_separators();
            if self.check(&TokenKind::RBrace) || self.is_eof() {
                break;
            }
            stmts.push(self.parse_stmt()?);
        }

        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(Rc::new(BlockStmt {
            kind,
            stmts,
            span: Span::new(start, end),
        }))
    }

    fn parse_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        if let TokenKind::Identifier(name) = &self.current().kind {
            // A kind name opening a literal block is an expression
            // statement; any other identifier starts a call statement.
            let is_func_lit = Kind::from_name(name).is_some()
                && matches!(
                    self.peek_kind(),
                    Some(TokenKind::LBrace) | Some(TokenKind::DoubleColon)
                );
            if !is_func_lit {
                let call = self.parse_call_stmt()?;
                return Ok(Stmt::Call(Rc::new(call)));
            }
        }
        let expr = self.parse_expr()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_call_stmt(&mut self) -> Result<CallStmt, SyntaxError> {
        let name = self.parse_ident_expr()?;
        let start = name.span.start;

        let mut args = Vec::new();
        let parens = self.check(&TokenKind::LParen);
        if parens {
            self.expect(TokenKind::LParen)?;
            if !self.check(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
        } else {
            while self.starts_arg() {
                args.push(self.parse_arg()?);
            }
        }

        let bind = if self.matches(&TokenKind::As) {
            Some(Rc::new(self.parse_bind_clause(&name.ident.text)?))
        } else {
            None
        };

        let with = if self.matches(&TokenKind::With) {
            let expr = self.parse_with_expr(&name.ident.text)?;
            let span = expr.span();
            Some(WithClause { expr, span })
        } else {
            None
        };

        let end = self.previous_span().end;
        Ok(CallStmt {
            name,
            args,
            parens,
            bind,
            with,
            span: Span::new(start, end),
        })
    }

    fn starts_arg(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Identifier(_)
                | TokenKind::Integer(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::String(_)
                | TokenKind::RawString(_)
                | TokenKind::Heredoc(_)
        )
    }

    fn parse_ident_expr(&mut self) -> Result<IdentExpr, SyntaxError> {
        let ident = self.expect_identifier("Expected a name")?;
        let start = ident.span.start;
        if self.matches(&TokenKind::Dot) {
            let member = self.expect_identifier("Expected member after `.`")?;
            let end = member.span.end;
            return Ok(IdentExpr {
                ident,
                reference: Some(member),
                span: Span::new(start, end),
            });
        }
        Ok(IdentExpr::plain(ident))
    }

    fn parse_arg(&mut self) -> Result<Rc<Expr>, SyntaxError> {
        self.parse_expr()
    }

    fn parse_expr(&mut self) -> Result<Rc<Expr>, SyntaxError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Rc::new(Expr::BasicLit(BasicLit::Int(value, token.span))))
            }
            TokenKind::True => {
                self.advance();
                Ok(Rc::new(Expr::BasicLit(BasicLit::Bool(true, token.span))))
            }
            TokenKind::False => {
                self.advance();
                Ok(Rc::new(Expr::BasicLit(BasicLit::Bool(false, token.span))))
            }
            TokenKind::String(raw) => {
                self.advance();
                let fragments = elaborate_fragments(&raw, token.span.start + 1, false)?;
                Ok(Rc::new(Expr::BasicLit(BasicLit::Str(Rc::new(StringLit {
                    fragments,
                    span: token.span,
                })))))
            }
            TokenKind::RawString(text) => {
                self.advance();
                Ok(Rc::new(Expr::BasicLit(BasicLit::RawStr(RawStringLit {
                    text,
                    span: token.span,
                }))))
            }
            TokenKind::Heredoc(heredoc) => {
                self.advance();
                let lit = self.elaborate_heredoc(&heredoc, token.span)?;
                let lit = Rc::new(lit);
                if heredoc.raw {
                    Ok(Rc::new(Expr::BasicLit(BasicLit::RawHeredoc(lit))))
                } else {
                    Ok(Rc::new(Expr::BasicLit(BasicLit::Heredoc(lit))))
                }
            }
            TokenKind::Identifier(name) => {
                let is_func_lit = Kind::from_name(&name).is_some()
                    && matches!(
                        self.peek_kind(),
                        Some(TokenKind::LBrace) | Some(TokenKind::DoubleColon)
                    );
                if is_func_lit {
                    return self.parse_func_lit().map(|lit| Rc::new(Expr::FuncLit(Rc::new(lit))));
                }
                self.parse_call_expr().map(|call| Rc::new(Expr::Call(Rc::new(call))))
            }
            _ => Err(self.error_here("Expected an expression")),
        }
    }

    fn parse_func_lit(&mut self) -> Result<FuncLit, SyntaxError> {
        let start = self.current_span().start;
        let kind = self.parse_kind()?;
        let body = self.parse_block(kind.clone())?;
        let end = body.span.end;
        Ok(FuncLit {
            kind,
            body,
            span: Span::new(start, end),
        })
    }

    /// A call in expression position: a bare name or `name(arg, ...)`.
    fn parse_call_expr(&mut self) -> Result<CallStmt, SyntaxError> {
        let name = self.parse_ident_expr()?;
        let start = name.span.start;
        let mut args = Vec::new();
        let parens = self.matches(&TokenKind::LParen);
        if parens {
            if !self.check(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        let end = self.previous_span().end;
        Ok(CallStmt {
            name,
            args,
            parens,
            bind: None,
            with: None,
            span: Span::new(start, end),
        })
    }

    /// The `with` clause expression. A bare `option` literal is retagged to
    /// `option::<callee>` so its block resolves the callee's constructors.
    fn parse_with_expr(&mut self, callee: &str) -> Result<Rc<Expr>, SyntaxError> {
        let expr = self.parse_expr()?;
        if let Expr::FuncLit(lit) = &*expr {
            if lit.kind == Kind::Option(None) {
                let retagged = retag_block(&lit.body, Kind::option_of(callee));
                return Ok(Rc::new(Expr::FuncLit(Rc::new(FuncLit {
                    kind: Kind::option_of(callee),
                    body: retagged,
                    span: lit.span,
                }))));
            }
        }
        Ok(expr)
    }

    fn parse_bind_clause(&mut self, callee: &str) -> Result<BindClause, SyntaxError> {
        let name = self.expect_identifier("Expected binding name after `as`")?;
        let start = name.span.start;

        let mut effects = Vec::new();
        if self.matches(&TokenKind::LParen) {
            if !self.check(&TokenKind::RParen) {
                loop {
                    effects.push(self.expect_identifier("Expected effect name")?);
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        let block = if self.check(&TokenKind::LBrace) {
            Some(self.parse_block(Kind::option_of(callee))?)
        } else {
            None
        };

        let end = self.previous_span().end;
        Ok(BindClause {
            name,
            effects,
            block,
            span: Span::new(start, end),
            closure: std::cell::RefCell::new(None),
            captured: std::cell::RefCell::new(None),
        })
    }

    fn elaborate_heredoc(
        &mut self,
        heredoc: &HeredocToken,
        span: Span,
    ) -> Result<HeredocLit, SyntaxError> {
        let fragments = elaborate_heredoc_fragments(&heredoc.body, span.start, heredoc.raw)?;
        Ok(HeredocLit {
            opener: heredoc.opener.clone(),
            terminator: heredoc.terminator.clone(),
            raw: heredoc.raw,
            body: heredoc.body.clone(),
            fragments,
            span,
        })
    }

    // Cursor helpers.

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_span(&self) -> Span {
        self.current().span
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            return self.current_span();
        }
        self.tokens[self.pos - 1].span
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| &t.kind)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn is_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, SyntaxError> {
        if self.check(&kind) {
            let token = self.current().clone();
            self.advance();
            return Ok(token);
        }
        Err(self.error_here(format!(
            "Expected {} but found {}",
            kind.describe(),
            self.current().kind.describe()
        )))
    }

    fn expect_identifier(&mut self, message: &str) -> Result<Ident, SyntaxError> {
        if let TokenKind::Identifier(name) = &self.current().kind {
            let ident = Ident::new(name.clone(), self.current().span);
            self.advance();
            return Ok(ident);
        }
        Err(self.error_here(message.to_string()))
    }

    fn skip_separators(&mut self) {
        while self.matches(&TokenKind::Newline) || self.matches(&TokenKind::Semi) {}
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.current_span())
    }

    fn report(&mut self, err: SyntaxError) {
        self.errors.push(err);
    }

    /// Skip to the start of the next plausible declaration after an error.
    fn synchronize_decl(&mut self) {
        let mut depth = 0usize;
        while !self.is_eof() {
            match &self.current().kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                }
                TokenKind::Newline if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }
}

/// Rebuild a block (and nested literal blocks of bare `option` kind) with a
/// refined kind tag.
fn retag_block(block: &Rc<BlockStmt>, kind: Kind) -> Rc<BlockStmt> {
    Rc::new(BlockStmt {
        kind,
        stmts: block.stmts.clone(),
        span: block.span,
    })
}

/// Split the raw inner text of an interpreted string into fragments.
/// `base` is the byte offset of the text within the module source.
pub fn elaborate_fragments(
    raw: &str,
    base: usize,
    skip_escapes: bool,
) -> Result<Vec<Fragment>, SyntaxError> {
    let mut fragments = Vec::new();
    let mut text = String::new();
    let mut chars = raw.char_indices().peekable();

    while let Some((at, ch)) = chars.next() {
        match ch {
            '\\' if !skip_escapes => {
                let Some((_, esc)) = chars.next() else {
                    return Err(SyntaxError::new(
                        "Trailing backslash in string literal",
                        Span::new(base + at, base + raw.len()),
                    ));
                };
                let mut sequence = String::from('\\');
                sequence.push(esc);
                if esc == 'x' {
                    for _ in 0..2 {
                        let Some((_, digit)) = chars.next() else {
                            return Err(SyntaxError::new(
                                "Truncated \\x escape",
                                Span::new(base + at, base + raw.len()),
                            ));
                        };
                        sequence.push(digit);
                    }
                }
                flush_text(&mut fragments, &mut text);
                fragments.push(Fragment::Escaped(sequence));
            }
            '$' if !skip_escapes => {
                let next = chars.peek().map(|(_, c)| *c);
                match next {
                    Some('{') => {
                        chars.next();
                        let inner_start = at + 2;
                        let mut depth = 1usize;
                        let mut inner_end = None;
                        while let Some((i, c)) = chars.next() {
                            match c {
                                '{' => depth += 1,
                                '}' => {
                                    depth -= 1;
                                    if depth == 0 {
                                        inner_end = Some(i);
                                        break;
                                    }
                                }
                                // Braces inside a nested string do not count.
                                '"' => {
                                    while let Some((_, c)) = chars.next() {
                                        match c {
                                            '\\' => {
                                                chars.next();
                                            }
                                            '"' => break,
                                            _ => {}
                                        }
                                    }
                                }
                                _ => {}
                            }
                        }
                        let Some(inner_end) = inner_end else {
                            return Err(SyntaxError::new(
                                "Unterminated interpolation",
                                Span::new(base + at, base + raw.len()),
                            ));
                        };
                        let inner = &raw[inner_start..inner_end];
                        let expr = parse_interpolated_expr(inner, base + inner_start)?;
                        flush_text(&mut fragments, &mut text);
                        fragments.push(Fragment::Interpolated {
                            raw: raw[at..inner_end + 1].to_string(),
                            expr,
                        });
                    }
                    Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                        let ident_start = at + 1;
                        let mut ident_end = raw.len();
                        while let Some((i, c)) = chars.peek().copied() {
                            if c.is_ascii_alphanumeric() || c == '_' {
                                chars.next();
                            } else {
                                ident_end = i;
                                break;
                            }
                        }
                        if chars.peek().is_none() {
                            ident_end = raw.len();
                        }
                        let name = &raw[ident_start..ident_end];
                        let ident =
                            Ident::new(name, Span::new(base + ident_start, base + ident_end));
                        let span = ident.span;
                        let expr = Rc::new(Expr::Call(Rc::new(CallStmt {
                            name: IdentExpr::plain(ident),
                            args: Vec::new(),
                            parens: false,
                            bind: None,
                            with: None,
                            span,
                        })));
                        flush_text(&mut fragments, &mut text);
                        fragments.push(Fragment::Interpolated {
                            raw: raw[at..ident_end].to_string(),
                            expr,
                        });
                    }
                    _ => text.push('$'),
                }
            }
            _ => text.push(ch),
        }
    }

    flush_text(&mut fragments, &mut text);
    Ok(fragments)
}

/// Heredoc bodies additionally split leading line whitespace into `Spaces`
/// fragments so dedent can see it.
fn elaborate_heredoc_fragments(
    body: &str,
    base: usize,
    raw: bool,
) -> Result<Vec<Fragment>, SyntaxError> {
    let mut fragments = Vec::new();
    let mut offset = 0usize;
    for line in body.split_inclusive('\n') {
        let indent_len = line.len() - line.trim_start_matches([' ', '\t']).len();
        if indent_len > 0 {
            fragments.push(Fragment::Spaces(line[..indent_len].to_string()));
        }
        let rest = &line[indent_len..];
        if !rest.is_empty() {
            fragments.extend(elaborate_fragments(rest, base + offset + indent_len, raw)?);
        }
        offset += line.len();
    }
    Ok(fragments)
}

fn flush_text(fragments: &mut Vec<Fragment>, text: &mut String) {
    if !text.is_empty() {
        fragments.push(Fragment::Text(std::mem::take(text)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Rc<Module> {
        parse_module("test.hlb", source).expect("parse")
    }

    #[test]
    fn parses_func_decl() {
        let module = parse("fs default() {\n\tscratch\n}\n");
        assert_eq!(module.decls.len(), 1);
        let Decl::Func(func) = &module.decls[0] else {
            panic!("expected func decl");
        };
        assert_eq!(func.kind, Kind::Filesystem);
        assert_eq!(func.name.text, "default");
        assert_eq!(func.body.stmts.len(), 1);
    }

    #[test]
    fn parses_params_and_effects() {
        let module = parse("fs build(string tag, fs variadic inputs) (fs out) { scratch; }\n");
        let Decl::Func(func) = &module.decls[0] else {
            panic!("expected func decl");
        };
        assert_eq!(func.params.len(), 2);
        assert_eq!(func.params[0].kind, Kind::String);
        assert!(func.params[1].variadic);
        assert_eq!(func.effects.len(), 1);
    }

    #[test]
    fn parses_with_clause_and_retags_option_block() {
        let module = parse("fs a() {\n\timage \"alpine\"\n\trun \"echo hi\" with option { env \"K\" \"V\"; }\n}\n");
        let Decl::Func(func) = &module.decls[0] else {
            panic!("expected func decl");
        };
        let Stmt::Call(run) = &func.body.stmts[1] else {
            panic!("expected call stmt");
        };
        let with = run.with.as_ref().expect("with clause");
        let Expr::FuncLit(lit) = &*with.expr else {
            panic!("expected func lit");
        };
        assert_eq!(lit.kind, Kind::option_of("run"));
        assert_eq!(lit.body.kind, Kind::option_of("run"));
    }

    #[test]
    fn parses_bind_clause_with_block() {
        let module = parse("fs a() {\n\trun \"cmd\" as id { mount fs { scratch; } \"/in\"; }\n}\n");
        let Decl::Func(func) = &module.decls[0] else {
            panic!("expected func decl");
        };
        let Stmt::Call(run) = &func.body.stmts[0] else {
            panic!("expected call stmt");
        };
        let bind = run.bind.as_ref().expect("bind clause");
        assert_eq!(bind.name.text, "id");
        let block = bind.block.as_ref().expect("bind block");
        assert_eq!(block.kind, Kind::option_of("run"));
    }

    #[test]
    fn parses_import_and_export() {
        let module = parse("import util \"./util.hlb\"\nexport build\nfs build() { scratch; }\n");
        assert!(matches!(module.decls[0], Decl::Import(_)));
        assert!(matches!(module.decls[1], Decl::Export(_)));
        assert!(module.is_exported("build"));
    }

    #[test]
    fn parses_qualified_call() {
        let module = parse("fs a() {\n\tutil.base\n}\nimport util \"./util.hlb\"\n");
        let Decl::Func(func) = &module.decls[0] else {
            panic!("expected func decl");
        };
        let Stmt::Call(call) = &func.body.stmts[0] else {
            panic!("expected call stmt");
        };
        assert_eq!(call.name.ident.text, "util");
        assert_eq!(call.name.reference.as_ref().unwrap().text, "base");
    }

    #[test]
    fn string_fragments_split_interpolations() {
        let module = parse("string greet() {\n\t\"hello $x and ${y} \\$5\"\n}\n");
        let Decl::Func(func) = &module.decls[0] else {
            panic!("expected func decl");
        };
        let Stmt::Expr(expr) = &func.body.stmts[0] else {
            panic!("expected expr stmt");
        };
        let Expr::BasicLit(BasicLit::Str(lit)) = &**expr else {
            panic!("expected string literal");
        };
        let shapes: Vec<&str> = lit
            .fragments
            .iter()
            .map(|f| match f {
                Fragment::Text(_) => "text",
                Fragment::Spaces(_) => "spaces",
                Fragment::Escaped(_) => "escaped",
                Fragment::Interpolated { .. } => "interp",
            })
            .collect();
        assert_eq!(
            shapes,
            ["text", "interp", "text", "interp", "text", "escaped", "text"]
        );
    }

    #[test]
    fn call_expr_args_use_parens() {
        let module = parse("string a() {\n\tformat(\"%s\", localArch)\n}\n");
        let Decl::Func(func) = &module.decls[0] else {
            panic!("expected func decl");
        };
        let Stmt::Call(call) = &func.body.stmts[0] else {
            panic!("expected call stmt");
        };
        assert_eq!(call.name.ident.text, "format");
        assert_eq!(call.args.len(), 2);
    }

    #[test]
    fn reports_unknown_kind() {
        let err = parse_module("test.hlb", "widget w() { scratch; }\n").unwrap_err();
        assert!(err.errors[0].message.contains("Unknown kind"));
    }

    #[test]
    fn recovers_after_bad_decl() {
        let err = parse_module("test.hlb", "fs () {}\nfs ok() { scratch; }\n,\n").unwrap_err();
        assert!(!err.errors.is_empty());
    }
}
