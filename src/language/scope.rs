use crate::language::ast::{
    BindClause, BuiltinDecl, Field, FuncDecl, Ident, ImportDecl, Kind, Module,
};
use crate::runtime::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// What a scope belongs to. The module owner is a weak back-reference; the
/// module keeps the scope alive, not the other way around.
#[derive(Clone)]
pub enum ScopeOwner {
    Module(Weak<Module>),
    Func(Rc<FuncDecl>),
}

/// A level of the name-resolution tree. Objects are kept in insertion order
/// so diagnostics enumerate deterministically.
pub struct Scope {
    pub owner: ScopeOwner,
    pub outer: Option<Rc<Scope>>,
    objects: RefCell<ObjectTable>,
}

#[derive(Default)]
struct ObjectTable {
    order: Vec<Rc<Object>>,
    index: HashMap<String, usize>,
}

pub struct Object {
    pub kind: Kind,
    pub ident: Ident,
    pub node: ObjectNode,
    pub data: RefCell<ObjectData>,
}

#[derive(Clone)]
pub enum ObjectNode {
    Builtin(Rc<BuiltinDecl>),
    Func(Rc<FuncDecl>),
    Bind(Rc<BindClause>),
    Import(Rc<ImportDecl>),
    Field(Rc<Field>),
}

/// Mutable payload attached to an object: a resolved module for imports, a
/// bound value for function parameters.
pub enum ObjectData {
    None,
    Module(Rc<Module>),
    Value(Value),
}

impl Scope {
    pub fn module(module: Weak<Module>) -> Rc<Scope> {
        Rc::new(Scope {
            owner: ScopeOwner::Module(module),
            outer: None,
            objects: RefCell::new(ObjectTable::default()),
        })
    }

    pub fn func(func: Rc<FuncDecl>, outer: Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            owner: ScopeOwner::Func(func),
            outer: Some(outer),
            objects: RefCell::new(ObjectTable::default()),
        })
    }

    /// Insert an object into this scope, replacing any previous binding of
    /// the same name. Duplicate detection is the checker's concern.
    pub fn insert(&self, object: Object) {
        let name = object.ident.text.clone();
        let mut table = self.objects.borrow_mut();
        if let Some(&at) = table.index.get(&name) {
            table.order[at] = Rc::new(object);
        } else {
            let index = table.order.len();
            table.index.insert(name, index);
            table.order.push(Rc::new(object));
        }
    }

    /// Look up a name in this scope only.
    pub fn lookup_local(&self, name: &str) -> Option<Rc<Object>> {
        let table = self.objects.borrow();
        table.index.get(name).map(|&at| table.order[at].clone())
    }

    /// Look up a name, walking outward through enclosing scopes.
    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Rc<Object>> {
        let mut scope = self.clone();
        loop {
            if let Some(object) = scope.lookup_local(name) {
                return Some(object);
            }
            match &scope.outer {
                Some(outer) => scope = outer.clone(),
                None => return None,
            }
        }
    }

    /// Objects of this scope in insertion order.
    pub fn defined(&self) -> Vec<Rc<Object>> {
        self.objects.borrow().order.clone()
    }

    pub fn root(self: &Rc<Self>) -> Rc<Scope> {
        let mut scope = self.clone();
        while let Some(outer) = scope.outer.clone() {
            scope = outer;
        }
        scope
    }

    /// The module owning the root of this scope tree.
    pub fn owning_module(self: &Rc<Self>) -> Option<Rc<Module>> {
        match &self.root().owner {
            ScopeOwner::Module(weak) => weak.upgrade(),
            ScopeOwner::Func(_) => None,
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.objects.borrow();
        let names: Vec<&str> = table.order.iter().map(|o| o.ident.text.as_str()).collect();
        f.debug_struct("Scope").field("objects", &names).finish()
    }
}

impl Object {
    pub fn new(kind: Kind, ident: Ident, node: ObjectNode) -> Self {
        Self {
            kind,
            ident,
            node,
            data: RefCell::new(ObjectData::None),
        }
    }

    pub fn with_value(kind: Kind, ident: Ident, node: ObjectNode, value: Value) -> Self {
        Self {
            kind,
            ident,
            node,
            data: RefCell::new(ObjectData::Value(value)),
        }
    }

    pub fn module_data(&self) -> Option<Rc<Module>> {
        match &*self.data.borrow() {
            ObjectData::Module(module) => Some(module.clone()),
            _ => None,
        }
    }

    pub fn value_data(&self) -> Option<Value> {
        match &*self.data.borrow() {
            ObjectData::Value(value) => Some(value.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::span::Span;

    fn object(name: &str, kind: Kind) -> Object {
        let field = Rc::new(Field {
            kind: kind.clone(),
            name: Ident::new(name, Span::default()),
            variadic: false,
            span: Span::default(),
        });
        Object::new(kind, Ident::new(name, Span::default()), ObjectNode::Field(field))
    }

    #[test]
    fn lookup_walks_outward() {
        let module = Module::new("test.hlb", "", Vec::new());
        module.scope.insert(object("outer", Kind::String));

        let func = Rc::new(FuncDecl {
            kind: Kind::Filesystem,
            name: Ident::new("f", Span::default()),
            params: Vec::new(),
            effects: Vec::new(),
            body: Rc::new(crate::language::ast::BlockStmt {
                kind: Kind::Filesystem,
                stmts: Vec::new(),
                span: Span::default(),
            }),
            span: Span::default(),
            scope: RefCell::new(None),
        });
        let inner = Scope::func(func, module.scope.clone());
        inner.insert(object("inner", Kind::Int));

        assert!(inner.lookup("inner").is_some());
        assert!(inner.lookup("outer").is_some());
        assert!(inner.lookup("missing").is_none());
        assert!(module.scope.lookup("inner").is_none());
    }

    #[test]
    fn defined_preserves_insertion_order() {
        let module = Module::new("test.hlb", "", Vec::new());
        for name in ["c", "a", "b"] {
            module.scope.insert(object(name, Kind::String));
        }
        let names: Vec<String> = module
            .scope
            .defined()
            .iter()
            .map(|o| o.ident.text.clone())
            .collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn root_scope_recovers_module() {
        let module = Module::new("test.hlb", "", Vec::new());
        let recovered = module.scope.owning_module().expect("module");
        assert_eq!(recovered.filename, module.filename);
    }
}
