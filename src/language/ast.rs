use crate::language::scope::Scope;
use crate::language::span::Span;
use crate::runtime::resolver::Directory;
use crate::runtime::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// The closed kind set. `Option(None)` is the bare `option` kind used by
/// literals before a callee is known; `Option(Some(name))` is the
/// parameterised `option::<callee>` family.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    None,
    Filesystem,
    String,
    Int,
    Bool,
    Pipeline,
    Option(Option<Arc<str>>),
}

impl Kind {
    pub fn option_of(callee: &str) -> Kind {
        Kind::Option(Some(Arc::from(callee)))
    }

    pub fn from_name(name: &str) -> Option<Kind> {
        match name {
            "fs" => Some(Kind::Filesystem),
            "string" => Some(Kind::String),
            "int" => Some(Kind::Int),
            "bool" => Some(Kind::Bool),
            "pipeline" => Some(Kind::Pipeline),
            "option" => Some(Kind::Option(None)),
            _ => None,
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self, Kind::Option(_))
    }

    /// Whether a value of this kind satisfies an expected kind. A bare
    /// `option` satisfies any `option::<callee>` and vice versa.
    pub fn matches(&self, expected: &Kind) -> bool {
        match (self, expected) {
            (a, b) if a == b => true,
            (Kind::Option(_), Kind::Option(None)) => true,
            (Kind::Option(None), Kind::Option(_)) => true,
            _ => false,
        }
    }
}

impl Default for Kind {
    fn default() -> Self {
        Kind::None
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::None => write!(f, "none"),
            Kind::Filesystem => write!(f, "fs"),
            Kind::String => write!(f, "string"),
            Kind::Int => write!(f, "int"),
            Kind::Bool => write!(f, "bool"),
            Kind::Pipeline => write!(f, "pipeline"),
            Kind::Option(None) => write!(f, "option"),
            Kind::Option(Some(callee)) => write!(f, "option::{}", callee),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ident {
    pub text: String,
    pub span: Span,
}

impl Ident {
    pub fn new(text: impl Into<String>, span: Span) -> Self {
        Self {
            text: text.into(),
            span,
        }
    }
}

/// A parsed, checkable compilation unit. The root scope back-references the
/// module so codegen can recover it from any inner scope.
pub struct Module {
    pub filename: Rc<str>,
    pub source: Rc<str>,
    pub directory: RefCell<Option<Arc<dyn Directory>>>,
    pub scope: Rc<Scope>,
    pub decls: Vec<Decl>,
}

impl Module {
    pub fn new(filename: impl Into<Rc<str>>, source: impl Into<Rc<str>>, decls: Vec<Decl>) -> Rc<Module> {
        let filename = filename.into();
        let source = source.into();
        Rc::new_cyclic(|weak: &Weak<Module>| Module {
            filename,
            source,
            directory: RefCell::new(None),
            scope: Scope::module(weak.clone()),
            decls,
        })
    }

    pub fn is_exported(&self, name: &str) -> bool {
        self.decls.iter().any(|decl| match decl {
            Decl::Export(export) => export.name.text == name,
            _ => false,
        })
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("filename", &self.filename)
            .field("decls", &self.decls.len())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum Decl {
    Func(Rc<FuncDecl>),
    Import(Rc<ImportDecl>),
    Export(Rc<ExportDecl>),
}

#[derive(Debug)]
pub struct FuncDecl {
    pub kind: Kind,
    pub name: Ident,
    pub params: Vec<Rc<Field>>,
    pub effects: Vec<Rc<Field>>,
    pub body: Rc<BlockStmt>,
    pub span: Span,
    /// Function scope seeded with parameters; installed by the checker.
    pub scope: RefCell<Option<Rc<Scope>>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub kind: Kind,
    pub name: Ident,
    pub variadic: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct ImportDecl {
    pub name: Ident,
    pub expr: Rc<Expr>,
    pub span: Span,
}

#[derive(Debug)]
pub struct ExportDecl {
    pub name: Ident,
    pub span: Span,
}

/// Synthesised declaration for a registered builtin; one per unique name,
/// carrying every kind the name is registered under.
#[derive(Debug)]
pub struct BuiltinDecl {
    pub name: String,
    pub kinds: Vec<Kind>,
    pub protos: Vec<(Kind, &'static crate::language::builtin::BuiltinProto)>,
}

impl BuiltinDecl {
    pub fn proto_for(&self, kind: &Kind) -> Option<&'static crate::language::builtin::BuiltinProto> {
        self.protos
            .iter()
            .find(|(k, _)| k.matches(kind))
            .map(|(_, proto)| *proto)
    }
}

#[derive(Debug)]
pub struct BlockStmt {
    pub kind: Kind,
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Call(Rc<CallStmt>),
    Expr(Rc<Expr>),
}

#[derive(Debug)]
pub struct CallStmt {
    pub name: IdentExpr,
    pub args: Vec<Rc<Expr>>,
    /// Whether the arguments were written in parenthesised form
    /// (`name(a, b)`) rather than command form (`name a b`).
    pub parens: bool,
    pub bind: Option<Rc<BindClause>>,
    pub with: Option<WithClause>,
    pub span: Span,
}

impl CallStmt {
    /// A `breakpoint` call yields to the debugger when the surrounding block
    /// produces a filesystem.
    pub fn is_breakpoint(&self, return_kind: &Kind) -> bool {
        self.name.reference.is_none()
            && self.name.ident.text == "breakpoint"
            && *return_kind == Kind::Filesystem
    }
}

#[derive(Clone, Debug)]
pub struct IdentExpr {
    pub ident: Ident,
    /// Present for qualified references through an import: `import.member`.
    pub reference: Option<Ident>,
    pub span: Span,
}

impl IdentExpr {
    pub fn plain(ident: Ident) -> Self {
        let span = ident.span;
        Self {
            ident,
            reference: None,
            span,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WithClause {
    pub expr: Rc<Expr>,
    pub span: Span,
}

/// `as name(effects...) { block }` on a call statement. The checker links a
/// closure: the given block when present, the enclosing function otherwise.
/// `captured` holds the value the bound call produced during the most recent
/// bound evaluation.
#[derive(Debug)]
pub struct BindClause {
    pub name: Ident,
    pub effects: Vec<Ident>,
    pub block: Option<Rc<BlockStmt>>,
    pub span: Span,
    pub closure: RefCell<Option<Rc<FuncDecl>>>,
    pub captured: RefCell<Option<Value>>,
}

#[derive(Debug)]
pub enum Expr {
    FuncLit(Rc<FuncLit>),
    BasicLit(BasicLit),
    Call(Rc<CallStmt>),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::FuncLit(lit) => lit.span,
            Expr::BasicLit(lit) => lit.span(),
            Expr::Call(call) => call.span,
        }
    }
}

#[derive(Debug)]
pub struct FuncLit {
    pub kind: Kind,
    pub body: Rc<BlockStmt>,
    pub span: Span,
}

#[derive(Debug)]
pub enum BasicLit {
    Int(i64, Span),
    Bool(bool, Span),
    Str(Rc<StringLit>),
    RawStr(RawStringLit),
    Heredoc(Rc<HeredocLit>),
    RawHeredoc(Rc<HeredocLit>),
}

impl BasicLit {
    pub fn span(&self) -> Span {
        match self {
            BasicLit::Int(_, span) | BasicLit::Bool(_, span) => *span,
            BasicLit::Str(lit) => lit.span,
            BasicLit::RawStr(lit) => lit.span,
            BasicLit::Heredoc(lit) | BasicLit::RawHeredoc(lit) => lit.span,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            BasicLit::Int(..) => Kind::Int,
            BasicLit::Bool(..) => Kind::Bool,
            _ => Kind::String,
        }
    }
}

#[derive(Debug)]
pub struct StringLit {
    pub fragments: Vec<Fragment>,
    pub span: Span,
}

#[derive(Debug)]
pub struct RawStringLit {
    pub text: String,
    pub span: Span,
}

#[derive(Debug)]
pub struct HeredocLit {
    pub opener: String,
    pub terminator: String,
    pub raw: bool,
    pub body: String,
    pub fragments: Vec<Fragment>,
    pub span: Span,
}

/// A piece of an interpreted string or heredoc, elaborated at codegen time.
/// `Spaces` only occurs in heredocs (leading line whitespace, kept separate
/// for dedent).
#[derive(Debug)]
pub enum Fragment {
    Text(String),
    Spaces(String),
    /// Two-or-more character escape sequence starting with `\`, verbatim.
    Escaped(String),
    Interpolated {
        raw: String,
        expr: Rc<Expr>,
    },
}
