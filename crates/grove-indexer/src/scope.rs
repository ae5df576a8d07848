//! Lexical scopes recorded during extraction

use grove_core::ByteRange;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScopeKind {
    Module,
    Class,
    Function,
}

/// What a name declared in a scope stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decl {
    /// Index into the file's symbol list.
    Symbol(usize),
    /// Parameter or local variable. Shadows outer names but has no graph node.
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub range: ByteRange,
    /// Symbol whose body this scope is; `None` for the module and anonymous functions.
    pub owner: Option<usize>,
    definitions: BTreeMap<String, Decl>,
    imports: BTreeMap<String, usize>,
    wildcards: Vec<usize>,
}

impl Scope {
    fn new(kind: ScopeKind, parent: Option<ScopeId>, range: ByteRange, owner: Option<usize>) -> Self {
        Scope {
            kind,
            parent,
            range,
            owner,
            definitions: BTreeMap::new(),
            imports: BTreeMap::new(),
            wildcards: Vec::new(),
        }
    }

    pub fn definition(&self, name: &str) -> Option<Decl> {
        self.definitions.get(name).copied()
    }

    /// Import bound to exactly this local name (dotted for `import a.b`).
    pub fn import(&self, name: &str) -> Option<usize> {
        self.imports.get(name).copied()
    }

    pub fn wildcards(&self) -> &[usize] {
        &self.wildcards
    }

    pub fn definitions(&self) -> impl Iterator<Item = (&str, Decl)> {
        self.definitions.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    pub const ROOT: ScopeId = ScopeId(0);

    pub fn new(range: ByteRange) -> Self {
        ScopeTree {
            scopes: vec![Scope::new(ScopeKind::Module, None, range, None)],
        }
    }

    pub fn push(
        &mut self,
        kind: ScopeKind,
        parent: ScopeId,
        range: ByteRange,
        owner: Option<usize>,
    ) -> ScopeId {
        self.scopes.push(Scope::new(kind, Some(parent), range, owner));
        ScopeId(self.scopes.len() - 1)
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn root(&self) -> &Scope {
        &self.scopes[0]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Declare `name` in `scope`. Symbols replace whatever the name meant
    /// before (last declaration wins); locals never hide a symbol declared
    /// in the same scope.
    pub fn define(&mut self, scope: ScopeId, name: &str, decl: Decl) {
        let definitions = &mut self.scopes[scope.0].definitions;
        match decl {
            Decl::Symbol(_) => {
                definitions.insert(name.to_string(), decl);
            }
            Decl::Local => {
                definitions.entry(name.to_string()).or_insert(decl);
            }
        }
    }

    pub fn bind_import(&mut self, scope: ScopeId, name: &str, import: usize) {
        self.scopes[scope.0].imports.insert(name.to_string(), import);
    }

    pub fn bind_wildcard(&mut self, scope: ScopeId, import: usize) {
        self.scopes[scope.0].wildcards.push(import);
    }

    /// Scopes from `from` outwards to the module, innermost first.
    pub fn chain(&self, from: ScopeId) -> impl Iterator<Item = (ScopeId, &Scope)> {
        let mut next = Some(from);
        std::iter::from_fn(move || {
            let id = next?;
            let scope = self.scopes.get(id.0)?;
            next = scope.parent;
            Some((id, scope))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_and_shadowing() {
        let mut tree = ScopeTree::new(ByteRange::new(0, 100));
        let class = tree.push(ScopeKind::Class, ScopeTree::ROOT, ByteRange::new(0, 50), Some(0));
        let method = tree.push(ScopeKind::Function, class, ByteRange::new(10, 40), Some(1));

        tree.define(ScopeTree::ROOT, "x", Decl::Symbol(2));
        tree.define(method, "x", Decl::Local);
        tree.define(ScopeTree::ROOT, "x", Decl::Local);

        let chain: Vec<ScopeId> = tree.chain(method).map(|(id, _)| id).collect();
        assert_eq!(chain, vec![method, class, ScopeTree::ROOT]);
        assert_eq!(tree.get(method).definition("x"), Some(Decl::Local));
        // A later local assignment does not hide the module-level symbol.
        assert_eq!(tree.root().definition("x"), Some(Decl::Symbol(2)));
    }
}
