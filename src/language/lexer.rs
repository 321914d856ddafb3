use crate::language::{
    span::Span,
    token::{HeredocToken, Token, TokenKind},
};

#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

pub fn lex(source: &str) -> Result<Vec<Token>, Vec<LexError>> {
    let lexer = Lexer::new(source);
    lexer.run()
}

struct Lexer<'a> {
    src: &'a str,
    chars: std::str::Chars<'a>,
    current: Option<char>,
    offset: usize,
    tokens: Vec<Token>,
    errors: Vec<LexError>,
    /// Token indices of heredoc openers whose bodies follow the next newline.
    pending_heredocs: Vec<usize>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        let mut chars = src.chars();
        let current = chars.next();
        Self {
            src,
            chars,
            current,
            offset: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
            pending_heredocs: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, Vec<LexError>> {
        while let Some(ch) = self.current {
            match ch {
                '#' => self.eat_line_comment(),
                '\n' => {
                    let start = self.offset;
                    self.bump();
                    self.push_token(TokenKind::Newline, start, self.offset);
                    self.consume_heredoc_bodies();
                }
                ch if ch.is_whitespace() => {
                    self.bump();
                }
                ch if ch.is_ascii_alphabetic() || ch == '_' => self.lex_identifier(),
                ch if ch.is_ascii_digit() => self.lex_number(),
                '"' => self.lex_string(),
                '`' => self.lex_raw_string(),
                '<' if self.peek() == Some('<') => self.lex_heredoc_opener(),
                _ => self.lex_symbol(),
            }
        }
        self.push_token(TokenKind::Eof, self.offset, self.offset);

        if self.errors.is_empty() {
            Ok(self.tokens)
        } else {
            Err(self.errors)
        }
    }

    fn bump(&mut self) -> Option<char> {
        if let Some(ch) = self.current {
            self.offset += ch.len_utf8();
        }
        self.current = self.chars.next();
        self.current
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn push_token(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, end),
        });
    }

    fn error(&mut self, start: usize, end: usize, message: impl Into<String>) {
        self.errors.push(LexError {
            message: message.into(),
            span: Span::new(start, end),
        });
    }

    fn eat_line_comment(&mut self) {
        while let Some(ch) = self.current {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_identifier(&mut self) {
        let start = self.offset;
        while let Some(ch) = self.current {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }

        let end = self.offset;
        let slice = &self.src[start..end];
        let kind = match slice {
            "with" => TokenKind::With,
            "as" => TokenKind::As,
            "import" => TokenKind::Import,
            "export" => TokenKind::Export,
            "variadic" => TokenKind::Variadic,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Identifier(slice.to_string()),
        };
        self.push_token(kind, start, end);
    }

    fn lex_number(&mut self) {
        let start = self.offset;
        let radix = if self.current == Some('0') {
            match self.peek() {
                Some('x') | Some('X') => 16,
                Some('o') | Some('O') => 8,
                Some('b') | Some('B') => 2,
                _ => 10,
            }
        } else {
            10
        };
        if radix != 10 {
            self.bump();
            self.bump();
        }

        let digits_start = self.offset;
        while let Some(ch) = self.current {
            if ch.is_digit(radix) || (radix == 10 && ch.is_ascii_digit()) {
                self.bump();
            } else {
                break;
            }
        }

        let end = self.offset;
        let text = if radix == 10 {
            &self.src[start..end]
        } else {
            &self.src[digits_start..end]
        };
        match i64::from_str_radix(text, radix) {
            Ok(value) => self.push_token(TokenKind::Integer(value), start, end),
            Err(_) => self.error(start, end, "Invalid integer literal"),
        }
    }

    /// Capture the raw inner text of an interpreted string. Escapes and
    /// `$ident` / `${expr}` interpolations are left intact for the parser;
    /// the scan only needs to find the closing quote, which means stepping
    /// over `${ ... }` groups that may themselves contain quotes.
    fn lex_string(&mut self) {
        let start = self.offset;
        self.bump();
        let inner_start = self.offset;
        while let Some(ch) = self.current {
            match ch {
                '"' => {
                    let inner = self.src[inner_start..self.offset].to_string();
                    self.bump();
                    self.push_token(TokenKind::String(inner), start, self.offset);
                    return;
                }
                '\\' => {
                    self.bump();
                    self.bump();
                }
                '$' if self.peek() == Some('{') => {
                    self.bump();
                    self.bump();
                    self.skip_interpolation(start);
                }
                '\n' => break,
                _ => {
                    self.bump();
                }
            }
        }
        self.error(start, self.offset, "Unterminated string literal");
    }

    /// Step over a `${ ... }` group, balancing braces and skipping quoted
    /// sections so a `}` inside a nested string does not end the group.
    fn skip_interpolation(&mut self, start: usize) {
        let mut depth = 1usize;
        while let Some(ch) = self.current {
            match ch {
                '{' => {
                    depth += 1;
                    self.bump();
                }
                '}' => {
                    depth -= 1;
                    self.bump();
                    if depth == 0 {
                        return;
                    }
                }
                '"' => {
                    self.bump();
                    while let Some(inner) = self.current {
                        match inner {
                            '\\' => {
                                self.bump();
                                self.bump();
                            }
                            '"' => {
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
        self.error(start, self.offset, "Unterminated interpolation");
    }

    fn lex_raw_string(&mut self) {
        let start = self.offset;
        self.bump();
        let inner_start = self.offset;
        while let Some(ch) = self.current {
            if ch == '`' {
                let inner = self.src[inner_start..self.offset].to_string();
                self.bump();
                self.push_token(TokenKind::RawString(inner), start, self.offset);
                return;
            }
            self.bump();
        }
        self.error(start, self.offset, "Unterminated raw string literal");
    }

    /// Lex a heredoc opener: `<<TERM`, `<<-TERM`, `<<~TERM`, or a raw form
    /// with the terminator wrapped in back-ticks. The body follows the next
    /// newline and is attached to this token once it is consumed.
    fn lex_heredoc_opener(&mut self) {
        let start = self.offset;
        self.bump();
        self.bump();
        let mut opener = String::from("<<");
        match self.current {
            Some('-') => {
                opener.push('-');
                self.bump();
            }
            Some('~') => {
                opener.push('~');
                self.bump();
            }
            _ => {}
        }
        while self.current == Some(' ') || self.current == Some('\t') {
            self.bump();
        }

        let raw = self.current == Some('`');
        if raw {
            self.bump();
        }
        let term_start = self.offset;
        while let Some(ch) = self.current {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let terminator = self.src[term_start..self.offset].to_string();
        if terminator.is_empty() {
            self.error(start, self.offset, "Expected heredoc terminator");
            return;
        }
        if raw {
            if self.current == Some('`') {
                self.bump();
            } else {
                self.error(start, self.offset, "Unterminated raw heredoc terminator");
                return;
            }
        }

        self.pending_heredocs.push(self.tokens.len());
        self.push_token(
            TokenKind::Heredoc(HeredocToken {
                opener,
                terminator,
                raw,
                body: String::new(),
            }),
            start,
            self.offset,
        );
    }

    /// After a newline, consume the bodies of any heredocs opened on the
    /// finished line, in opening order.
    fn consume_heredoc_bodies(&mut self) {
        let pending = std::mem::take(&mut self.pending_heredocs);
        for index in pending {
            let terminator = match &self.tokens[index].kind {
                TokenKind::Heredoc(h) => h.terminator.clone(),
                _ => continue,
            };
            let body_start = self.offset;
            let mut body = String::new();
            let mut terminated = false;
            while self.current.is_some() {
                let line_start = self.offset;
                while let Some(ch) = self.current {
                    self.bump();
                    if ch == '\n' {
                        break;
                    }
                }
                let line = &self.src[line_start..self.offset];
                if line.trim_end_matches('\n').trim() == terminator {
                    terminated = true;
                    break;
                }
                body.push_str(line);
            }
            if !terminated {
                self.error(body_start, self.offset, "Unterminated heredoc");
                return;
            }
            let end = self.offset;
            if let TokenKind::Heredoc(h) = &mut self.tokens[index].kind {
                h.body = body;
            }
            self.tokens[index].span.end = end;
        }
    }

    fn lex_symbol(&mut self) {
        let start = self.offset;
        match self.current {
            Some('(') => self.single(TokenKind::LParen),
            Some(')') => self.single(TokenKind::RParen),
            Some('{') => self.single(TokenKind::LBrace),
            Some('}') => self.single(TokenKind::RBrace),
            Some(',') => self.single(TokenKind::Comma),
            Some(';') => self.single(TokenKind::Semi),
            Some('.') => self.single(TokenKind::Dot),
            Some(':') => {
                self.bump();
                if self.current == Some(':') {
                    self.bump();
                    self.push_token(TokenKind::DoubleColon, start, self.offset);
                } else {
                    self.error(start, self.offset, "Unexpected character ':'");
                }
            }
            Some(ch) => {
                self.bump();
                self.error(start, self.offset, format!("Unexpected character '{}'", ch));
            }
            None => {}
        }
    }

    fn single(&mut self, kind: TokenKind) {
        let start = self.offset;
        self.bump();
        self.push_token(kind, start, self.offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source)
            .expect("lex")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_decl_tokens() {
        let toks = kinds("fs default() {\n\tscratch\n}\n");
        assert_eq!(toks[0], TokenKind::Identifier("fs".into()));
        assert_eq!(toks[1], TokenKind::Identifier("default".into()));
        assert_eq!(toks[2], TokenKind::LParen);
        assert_eq!(toks[3], TokenKind::RParen);
        assert_eq!(toks[4], TokenKind::LBrace);
        assert_eq!(toks[5], TokenKind::Newline);
        assert_eq!(toks[6], TokenKind::Identifier("scratch".into()));
    }

    #[test]
    fn string_keeps_raw_inner_text() {
        let toks = kinds(r#""hello \t ${format("%s", x)} $y""#);
        assert_eq!(
            toks[0],
            TokenKind::String(r#"hello \t ${format("%s", x)} $y"#.into())
        );
    }

    #[test]
    fn integer_radixes() {
        assert_eq!(kinds("0o644")[0], TokenKind::Integer(0o644));
        assert_eq!(kinds("0x1f")[0], TokenKind::Integer(0x1f));
        assert_eq!(kinds("42")[0], TokenKind::Integer(42));
    }

    #[test]
    fn heredoc_body_attaches_to_opener() {
        let toks = kinds("mkfile \"f\" 0o644 <<-EOF\n\thello\n\tworld\nEOF\n");
        let heredoc = toks
            .iter()
            .find_map(|t| match t {
                TokenKind::Heredoc(h) => Some(h.clone()),
                _ => None,
            })
            .expect("heredoc token");
        assert_eq!(heredoc.opener, "<<-");
        assert_eq!(heredoc.terminator, "EOF");
        assert_eq!(heredoc.body, "\thello\n\tworld\n");
        assert!(!heredoc.raw);
    }

    #[test]
    fn raw_heredoc_uses_backtick_terminator() {
        let toks = kinds("run <<`END`\n$not_interpolated\nEND\n");
        let heredoc = toks
            .iter()
            .find_map(|t| match t {
                TokenKind::Heredoc(h) => Some(h.clone()),
                _ => None,
            })
            .expect("heredoc token");
        assert!(heredoc.raw);
        assert_eq!(heredoc.body, "$not_interpolated\n");
    }

    #[test]
    fn comments_are_skipped() {
        let toks = kinds("# a comment\nscratch\n");
        assert_eq!(toks[0], TokenKind::Newline);
        assert_eq!(toks[1], TokenKind::Identifier("scratch".into()));
    }

    #[test]
    fn unterminated_string_reports_error() {
        assert!(lex("\"oops\n").is_err());
    }
}
