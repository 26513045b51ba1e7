//! The inferencer's type universe (spec.md §3, "Types").
//!
//! This mirrors the shape of the teacher's `types::type::Type` runtime-type
//! tag in spirit (a single enum discriminating the primitive/compound
//! forms) but for a *static* type system: these values live only for the
//! duration of one inference run and are never executed.

use std::{collections::BTreeMap, fmt};

use indexmap::IndexMap;

/// A fresh type variable, identified by the monotonic "pump" counter
/// (spec.md GLOSSARY, "Fresh variable").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TyVar(pub u32);

impl fmt::Display for TyVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Monotonic counter minting fresh type variables ("the pump").
#[derive(Debug, Default)]
pub struct Pump {
    next: u32,
}

impl Pump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> TyVar {
        let id = self.next;
        self.next += 1;
        TyVar(id)
    }
}

/// One alternative/member set used by `TyUnion`/`TyIntersect`. Order is not
/// semantically meaningful; kept as a `Vec` (rather than a `HashSet`) so
/// error messages render members in the order the programmer wrote them.
pub type TySet = Vec<Ty>;

/// The inferencer's type representation (spec.md §3, Types table).
#[derive(Debug, Clone, PartialEq)]
pub enum Ty {
    Var(TyVar),
    /// `name` + ordered type arguments. Covers the primitive set
    /// (`Bool`, `Char`, `Float`, `Int`, `String`, `Unit`, `Error`) and
    /// user-declared ADTs, which all share this shape per spec.md §3.
    Con(String, Vec<Ty>),
    /// An n-ary function; currying is a surface-syntax concern only.
    Arr(Vec<Ty>, Box<Ty>),
    /// Arity >= 2.
    Tuple(Vec<Ty>),
    /// A record type. `rest` is `Some(row var)` when open, `None` when
    /// closed — "the *set of explicit fields* is still fixed" even for open
    /// records (spec.md §3 invariant).
    Record { fields: IndexMap<String, Ty>, rest: Option<TyVar> },
    /// Set of alternatives, |members| >= 2.
    Union(TySet),
    /// Set of members, |members| >= 2.
    Intersect(TySet),
    /// A singleton string-literal type, used as a discriminator (e.g. tags
    /// in a tagged union encoded over records).
    LitString(String),
    /// An alias reference pending expansion via the alias registry.
    Alias(String, Vec<Ty>),
    /// A μ-binder introduced when an alias expansion would otherwise be
    /// directly cyclic (spec.md §9, "Cyclic references"). `var` is bound
    /// inside `body` and stands for "the whole recursive type" again.
    Recursive { var: TyVar, body: Box<Ty> },
}

pub const BOOL: &str = "Bool";
pub const CHAR: &str = "Char";
pub const FLOAT: &str = "Float";
pub const INT: &str = "Int";
pub const STRING: &str = "String";
pub const UNIT: &str = "Unit";
pub const ERROR: &str = "Error";
pub const ARRAY: &str = "Array";

impl Ty {
    pub fn con(name: &str) -> Ty {
        Ty::Con(name.to_owned(), Vec::new())
    }

    pub fn bool() -> Ty {
        Ty::con(BOOL)
    }
    pub fn char() -> Ty {
        Ty::con(CHAR)
    }
    pub fn float() -> Ty {
        Ty::con(FLOAT)
    }
    pub fn int() -> Ty {
        Ty::con(INT)
    }
    pub fn string() -> Ty {
        Ty::con(STRING)
    }
    pub fn unit() -> Ty {
        Ty::con(UNIT)
    }
    pub fn array(elem: Ty) -> Ty {
        Ty::Con(ARRAY.to_owned(), vec![elem])
    }

    /// Free type variables, in first-occurrence order (so schemes and error
    /// messages quantify/report variables in a stable, readable order).
    pub fn free_vars(&self) -> Vec<TyVar> {
        let mut out = Vec::new();
        self.collect_free_vars(&mut out);
        out
    }

    fn collect_free_vars(&self, out: &mut Vec<TyVar>) {
        match self {
            Ty::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Ty::Con(_, args) | Ty::Alias(_, args) => {
                for a in args {
                    a.collect_free_vars(out);
                }
            }
            Ty::Arr(domains, range) => {
                for d in domains {
                    d.collect_free_vars(out);
                }
                range.collect_free_vars(out);
            }
            Ty::Tuple(elems) => {
                for e in elems {
                    e.collect_free_vars(out);
                }
            }
            Ty::Record { fields, rest } => {
                for t in fields.values() {
                    t.collect_free_vars(out);
                }
                if let Some(r) = rest
                    && !out.contains(r)
                {
                    out.push(*r);
                }
            }
            Ty::Union(members) | Ty::Intersect(members) => {
                for m in members {
                    m.collect_free_vars(out);
                }
            }
            Ty::LitString(_) => {}
            Ty::Recursive { var, body } => {
                body.collect_free_vars(out);
                out.retain(|v| v != var);
            }
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Ty::Arr(..))
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Var(v) => write!(f, "{v}"),
            Ty::Con(name, args) if args.is_empty() => write!(f, "{name}"),
            Ty::Con(name, args) => {
                write!(f, "{name}[")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, "]")
            }
            Ty::Arr(domains, range) => {
                write!(f, "(")?;
                for (i, d) in domains.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{d}")?;
                }
                write!(f, ") -> {range}")
            }
            Ty::Tuple(elems) => {
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, " * ")?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
            Ty::Record { fields, rest } => {
                write!(f, "{{")?;
                for (i, (name, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {t}")?;
                }
                match rest {
                    Some(r) => write!(f, " | {r}}}"),
                    None => write!(f, "}}"),
                }
            }
            Ty::Union(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
            Ty::Intersect(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
            Ty::LitString(s) => write!(f, "{s:?}"),
            Ty::Alias(name, args) if args.is_empty() => write!(f, "{name}"),
            Ty::Alias(name, args) => {
                write!(f, "{name}[")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, "]")
            }
            Ty::Recursive { var, body } => write!(f, "rec {var}. {body}"),
        }
    }
}

/// `∀ᾱ. τ` — a universally quantified type (GLOSSARY, "Scheme").
#[derive(Debug, Clone, PartialEq)]
pub struct Scheme {
    pub quantified: Vec<TyVar>,
    pub body: Ty,
}

impl Scheme {
    pub fn monomorphic(body: Ty) -> Self {
        Self { quantified: Vec::new(), body }
    }

    /// Replaces each quantified variable with a fresh one (GLOSSARY,
    /// "Instantiation").
    pub fn instantiate(&self, pump: &mut Pump) -> Ty {
        if self.quantified.is_empty() {
            return self.body.clone();
        }
        let mapping: BTreeMap<TyVar, Ty> = self.quantified.iter().map(|v| (*v, Ty::Var(pump.fresh()))).collect();
        substitute_vars(&self.body, &mapping)
    }
}

fn substitute_vars(ty: &Ty, mapping: &BTreeMap<TyVar, Ty>) -> Ty {
    match ty {
        Ty::Var(v) => mapping.get(v).cloned().unwrap_or_else(|| ty.clone()),
        Ty::Con(name, args) => Ty::Con(name.clone(), args.iter().map(|a| substitute_vars(a, mapping)).collect()),
        Ty::Alias(name, args) => Ty::Alias(name.clone(), args.iter().map(|a| substitute_vars(a, mapping)).collect()),
        Ty::Arr(domains, range) => Ty::Arr(
            domains.iter().map(|d| substitute_vars(d, mapping)).collect(),
            Box::new(substitute_vars(range, mapping)),
        ),
        Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| substitute_vars(e, mapping)).collect()),
        Ty::Record { fields, rest } => Ty::Record {
            fields: fields.iter().map(|(k, v)| (k.clone(), substitute_vars(v, mapping))).collect(),
            rest: rest.map(|r| match mapping.get(&r) {
                Some(Ty::Var(fresh)) => *fresh,
                _ => r,
            }),
        },
        Ty::Union(members) => Ty::Union(members.iter().map(|m| substitute_vars(m, mapping)).collect()),
        Ty::Intersect(members) => Ty::Intersect(members.iter().map(|m| substitute_vars(m, mapping)).collect()),
        Ty::LitString(s) => Ty::LitString(s.clone()),
        Ty::Recursive { var, body } => Ty::Recursive { var: *var, body: Box::new(substitute_vars(body, mapping)) },
    }
}

/// Generalizes `ty` into a scheme: closes over `FTV(ty) \ FTV(env)`
/// (GLOSSARY, "Generalization").
pub fn generalize(ty: &Ty, env_free_vars: &[TyVar]) -> Scheme {
    let quantified: Vec<TyVar> = ty.free_vars().into_iter().filter(|v| !env_free_vars.contains(v)).collect();
    Scheme { quantified, body: ty.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiate_replaces_quantified_vars_with_fresh_ones() {
        let mut pump = Pump::new();
        let a = pump.fresh();
        let scheme = Scheme { quantified: vec![a], body: Ty::Arr(vec![Ty::Var(a)], Box::new(Ty::Var(a))) };
        let t1 = scheme.instantiate(&mut pump);
        let t2 = scheme.instantiate(&mut pump);
        assert_ne!(t1, t2, "each instantiation mints fresh variables");
    }

    #[test]
    fn generalize_only_quantifies_vars_not_free_in_env() {
        let mut pump = Pump::new();
        let a = pump.fresh();
        let b = pump.fresh();
        let ty = Ty::Arr(vec![Ty::Var(a)], Box::new(Ty::Var(b)));
        let scheme = generalize(&ty, &[b]);
        assert_eq!(scheme.quantified, vec![a]);
    }
}
