//! The type-declaration table (ADTs) and the type-alias registry (spec.md
//! §3, "Type Environment": "(a) a type-declaration table ... (b) a
//! type-alias registry with recursive-definition support").

use ahash::AHashMap;

use crate::{
    subst::Subst,
    types::{Pump, Ty, TyVar},
};

/// One constructor of an ADT, e.g. `Cons[a, List[a]]` in
/// `type List[a] = Nil | Cons[a, List[a]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CtorDef {
    pub name: String,
    pub adt_name: String,
    /// Stable small id used by `PUSH_CUSTOM`/`PUSH_CONSTRUCTOR_COMPONENT`
    /// (spec.md §4.3).
    pub id: u32,
    /// Field types, expressed in terms of the ADT's own parameters.
    pub fields: Vec<Ty>,
}

/// One ADT declaration: a nominal type constructor plus its constructors
/// (spec.md §9, "Cyclic references": recursion is carried by the name, not
/// a cyclic object graph).
#[derive(Debug, Clone, PartialEq)]
pub struct AdtDef {
    pub name: String,
    pub params: Vec<TyVar>,
    pub ctors: Vec<CtorDef>,
}

/// The type-declaration table.
#[derive(Debug, Default)]
pub struct AdtRegistry {
    defs: AHashMap<String, AdtDef>,
}

impl AdtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: AdtDef) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&AdtDef> {
        self.defs.get(name)
    }

    pub fn find_ctor(&self, name: &str) -> Option<(&AdtDef, &CtorDef)> {
        self.defs.values().find_map(|adt| adt.ctors.iter().find(|c| c.name == name).map(|c| (adt, c)))
    }
}

/// One alias definition. `params` are placeholder type variables minted at
/// registration time; `body` refers to them structurally.
#[derive(Debug, Clone, PartialEq)]
struct AliasDef {
    params: Vec<TyVar>,
    body: Ty,
}

/// The type-alias registry (spec.md §3, §4.2 "TyAlias").
#[derive(Debug, Default)]
pub struct AliasRegistry {
    defs: AHashMap<String, AliasDef>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: String, params: Vec<TyVar>, body: Ty) {
        self.defs.insert(name, AliasDef { params, body });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Expands `name[args...]` one level, materializing an explicit
    /// `Ty::Recursive` μ-binder if the body structurally refers back to
    /// `name` (spec.md §9). Returns `Err(())` for a genuinely circular
    /// alias with no structural protection (e.g. `type T = T`).
    pub fn expand(&self, name: &str, args: &[Ty], pump: &mut Pump) -> Result<Ty, ()> {
        let def = self.defs.get(name).ok_or(())?;
        if def.params.len() != args.len() {
            return Err(());
        }
        let mut param_subst = Subst::new();
        for (p, a) in def.params.iter().zip(args) {
            param_subst.extend(*p, a.clone());
        }
        let mu = pump.fresh();
        let mut expanding = vec![(name.to_owned(), mu)];
        let (expanded, used_mu) = self.expand_body(&def.body, &param_subst, &mut expanding, false, pump)?;
        if used_mu { Ok(Ty::Recursive { var: mu, body: Box::new(expanded) }) } else { Ok(expanded) }
    }

    #[allow(clippy::only_used_in_recursion)]
    fn expand_body(
        &self,
        ty: &Ty,
        param_subst: &Subst,
        expanding: &mut Vec<(String, TyVar)>,
        protected: bool,
        pump: &mut Pump,
    ) -> Result<(Ty, bool), ()> {
        match ty {
            Ty::Alias(name, args) => {
                let resolved_args: Result<Vec<Ty>, ()> = args
                    .iter()
                    .map(|a| self.expand_body(a, param_subst, expanding, true, pump).map(|(t, _)| t))
                    .collect();
                let resolved_args = resolved_args?;
                if let Some((_, mu)) = expanding.iter().find(|(n, _)| n == name) {
                    if protected {
                        return Ok((Ty::Var(*mu), true));
                    }
                    // Same alias referenced again with no intervening
                    // constructor: an unprotected cycle (spec.md §9).
                    return Err(());
                }
                if let Some(def) = self.defs.get(name) {
                    if def.params.len() != resolved_args.len() {
                        return Err(());
                    }
                    let mut nested_subst = Subst::new();
                    for (p, a) in def.params.iter().zip(&resolved_args) {
                        nested_subst.extend(*p, a.clone());
                    }
                    let mu = pump.fresh();
                    expanding.push((name.clone(), mu));
                    let (body, used_mu) = self.expand_body(&def.body, &nested_subst, expanding, protected, pump)?;
                    expanding.pop();
                    if used_mu {
                        Ok((Ty::Recursive { var: mu, body: Box::new(body) }, false))
                    } else {
                        Ok((body, false))
                    }
                } else {
                    Ok((Ty::Alias(name.clone(), resolved_args), false))
                }
            }
            Ty::Var(v) => Ok((param_subst.get(*v).cloned().unwrap_or_else(|| ty.clone()), false)),
            Ty::Con(name, args) => {
                let mut used = false;
                let mut out = Vec::with_capacity(args.len());
                for a in args {
                    let (t, u) = self.expand_body(a, param_subst, expanding, true, pump)?;
                    used |= u;
                    out.push(t);
                }
                Ok((Ty::Con(name.clone(), out), used))
            }
            Ty::Arr(domains, range) => {
                let mut used = false;
                let mut out = Vec::with_capacity(domains.len());
                for d in domains {
                    let (t, u) = self.expand_body(d, param_subst, expanding, true, pump)?;
                    used |= u;
                    out.push(t);
                }
                let (r, u) = self.expand_body(range, param_subst, expanding, true, pump)?;
                used |= u;
                Ok((Ty::Arr(out, Box::new(r)), used))
            }
            Ty::Tuple(elems) => {
                let mut used = false;
                let mut out = Vec::with_capacity(elems.len());
                for e in elems {
                    let (t, u) = self.expand_body(e, param_subst, expanding, true, pump)?;
                    used |= u;
                    out.push(t);
                }
                Ok((Ty::Tuple(out), used))
            }
            Ty::Record { fields, rest } => {
                let mut used = false;
                let mut out = indexmap::IndexMap::new();
                for (k, v) in fields {
                    let (t, u) = self.expand_body(v, param_subst, expanding, true, pump)?;
                    used |= u;
                    out.insert(k.clone(), t);
                }
                Ok((Ty::Record { fields: out, rest: *rest }, used))
            }
            Ty::Union(members) => {
                let mut used = false;
                let mut out = Vec::with_capacity(members.len());
                for m in members {
                    let (t, u) = self.expand_body(m, param_subst, expanding, true, pump)?;
                    used |= u;
                    out.push(t);
                }
                Ok((Ty::Union(out), used))
            }
            Ty::Intersect(members) => {
                let mut used = false;
                let mut out = Vec::with_capacity(members.len());
                for m in members {
                    let (t, u) = self.expand_body(m, param_subst, expanding, true, pump)?;
                    used |= u;
                    out.push(t);
                }
                Ok((Ty::Intersect(out), used))
            }
            Ty::LitString(s) => Ok((Ty::LitString(s.clone()), false)),
            Ty::Recursive { var, body } => {
                let (b, used) = self.expand_body(body, param_subst, expanding, true, pump)?;
                Ok((Ty::Recursive { var: *var, body: Box::new(b) }, used))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_recursive_alias_expands_directly() {
        let mut pump = Pump::new();
        let mut reg = AliasRegistry::new();
        let a = pump.fresh();
        reg.define("Pair".to_owned(), vec![a], Ty::Tuple(vec![Ty::Var(a), Ty::Var(a)]));
        let expanded = reg.expand("Pair", &[Ty::int()], &mut pump).unwrap();
        assert_eq!(expanded, Ty::Tuple(vec![Ty::int(), Ty::int()]));
    }

    #[test]
    fn recursive_alias_gets_a_mu_binder() {
        let mut pump = Pump::new();
        let mut reg = AliasRegistry::new();
        let a = pump.fresh();
        // type T[a] = { head: a, tail: T[a] }
        let mut fields = indexmap::IndexMap::new();
        fields.insert("head".to_owned(), Ty::Var(a));
        fields.insert("tail".to_owned(), Ty::Alias("T".to_owned(), vec![Ty::Var(a)]));
        reg.define("T".to_owned(), vec![a], Ty::Record { fields, rest: None });
        let expanded = reg.expand("T", &[Ty::int()], &mut pump).unwrap();
        match expanded {
            Ty::Recursive { body, .. } => match *body {
                Ty::Record { fields, .. } => {
                    assert!(matches!(fields.get("tail"), Some(Ty::Var(_))));
                }
                other => panic!("expected record body, got {other:?}"),
            },
            other => panic!("expected a Recursive wrapper, got {other:?}"),
        }
    }

    #[test]
    fn directly_circular_alias_is_rejected() {
        let mut pump = Pump::new();
        let mut reg = AliasRegistry::new();
        // type T = T
        reg.define("T".to_owned(), vec![], Ty::Alias("T".to_owned(), vec![]));
        assert!(reg.expand("T", &[], &mut pump).is_err());
    }
}
