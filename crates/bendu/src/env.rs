//! The type environment (spec.md §3, "Type Environment").

use ahash::AHashMap;

use crate::{
    ast::Span,
    types::{Scheme, TyVar},
    types_registry::{AdtRegistry, AliasRegistry},
};

/// One binding in a scope: where it was introduced, whether it is mutable
/// (`!`), and its principal scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub span: Span,
    pub mutable: bool,
    pub scheme: Scheme,
}

#[derive(Debug, Default)]
struct Scope {
    bindings: AHashMap<String, Binding>,
}

/// A stack of scopes plus the declaration tables that travel with it
/// (spec.md §3). Shadowing within the same scope is an error; across
/// scopes it is silent — enforced by [`TypeEnv::bind`] vs. the caller
/// pushing a new scope for each nested binding construct (`let`, lambda
/// params, match-arm bindings).
#[derive(Debug)]
pub struct TypeEnv {
    scopes: Vec<Scope>,
    pub adts: AdtRegistry,
    pub aliases: AliasRegistry,
    /// Imports table keyed by alias, or `""` for an unqualified import
    /// (spec.md §3).
    imports: AHashMap<String, Vec<(String, Binding)>>,
}

impl Default for TypeEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeEnv {
    pub fn new() -> Self {
        Self { scopes: vec![Scope::default()], adts: AdtRegistry::new(), aliases: AliasRegistry::new(), imports: AHashMap::new() }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        debug_assert!(!self.scopes.is_empty(), "the root scope must never be popped");
    }

    /// Binds `name` in the innermost scope. Returns `Err` if `name` is
    /// already bound *in that same scope* (spec.md §3: "Shadowing within
    /// the same scope is an error").
    pub fn bind(&mut self, name: &str, binding: Binding) -> Result<(), Span> {
        let scope = self.scopes.last_mut().expect("root scope always present");
        if let Some(existing) = scope.bindings.get(name) {
            return Err(existing.span);
        }
        scope.bindings.insert(name.to_owned(), binding);
        Ok(())
    }

    /// Like [`TypeEnv::bind`] but overwrites an existing binding in the same
    /// scope; used for `let rec` self-reference (bind a placeholder
    /// monotype, then rebind the generalized scheme after inference).
    pub fn rebind(&mut self, name: &str, binding: Binding) {
        self.scopes.last_mut().expect("root scope always present").bindings.insert(name.to_owned(), binding);
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.bindings.get(name))
    }

    /// Free type variables of every binding currently in scope, used when
    /// generalizing a `let`-bound value (spec.md §4.1: "Generalize at `let`
    /// boundaries using `FTV(env)` at that point").
    pub fn free_vars(&self) -> Vec<TyVar> {
        let mut out = Vec::new();
        for scope in &self.scopes {
            for binding in scope.bindings.values() {
                for v in binding.scheme.body.free_vars() {
                    if !binding.scheme.quantified.contains(&v) && !out.contains(&v) {
                        out.push(v);
                    }
                }
            }
        }
        out
    }

    /// Installs one export from an imported package under `alias`
    /// (`""` for unqualified) — see spec.md §4.1 "Imports".
    pub fn install_import(&mut self, alias: &str, name: String, binding: Binding) {
        if alias.is_empty() {
            // Unqualified: also visible directly, as if bound in the root scope.
            self.scopes[0].bindings.entry(name.clone()).or_insert_with(|| binding.clone());
        }
        self.imports.entry(alias.to_owned()).or_default().push((name, binding));
    }

    /// Looks up `name` under a namespace alias established by a qualified
    /// import (`import foo as f` then `f.name`).
    pub fn lookup_qualified(&self, alias: &str, name: &str) -> Option<&Binding> {
        self.imports.get(alias)?.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    /// All currently-bound identifier names, innermost scope first; used to
    /// build Levenshtein suggestions for `UnknownIdentifier`.
    pub fn all_names(&self) -> Vec<&str> {
        self.scopes.iter().flat_map(|s| s.bindings.keys().map(String::as_str)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Scheme, Ty};

    fn binding(ty: Ty) -> Binding {
        Binding { span: Span::DUMMY, mutable: false, scheme: Scheme::monomorphic(ty) }
    }

    #[test]
    fn shadowing_in_same_scope_is_rejected() {
        let mut env = TypeEnv::new();
        env.bind("x", binding(Ty::int())).unwrap();
        assert!(env.bind("x", binding(Ty::bool())).is_err());
    }

    #[test]
    fn shadowing_across_scopes_is_silent() {
        let mut env = TypeEnv::new();
        env.bind("x", binding(Ty::int())).unwrap();
        env.push_scope();
        env.bind("x", binding(Ty::bool())).unwrap();
        assert_eq!(env.lookup("x").unwrap().scheme.body, Ty::bool());
        env.pop_scope();
        assert_eq!(env.lookup("x").unwrap().scheme.body, Ty::int());
    }
}
