//! Substitutions: finite maps from type variables to types, applied
//! structurally (spec.md §3, "Substitution"; §4.2, "Substitution
//! composition").

use std::collections::BTreeMap;

use crate::types::{Ty, TyVar};

/// A finite map `TyVar -> Ty`. Empty by default (the identity substitution).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subst(BTreeMap<TyVar, Ty>);

impl Subst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(var: TyVar, ty: Ty) -> Self {
        let mut map = BTreeMap::new();
        map.insert(var, ty);
        Self(map)
    }

    pub fn get(&self, var: TyVar) -> Option<&Ty> {
        self.0.get(&var)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies this substitution structurally to `ty`, following chains of
    /// bound variables to a fixed point (so `{a -> b, b -> Int}` resolves
    /// `a` all the way to `Int`).
    pub fn apply(&self, ty: &Ty) -> Ty {
        match ty {
            Ty::Var(v) => match self.0.get(v) {
                Some(bound) => self.apply(bound),
                None => ty.clone(),
            },
            Ty::Con(name, args) => Ty::Con(name.clone(), args.iter().map(|a| self.apply(a)).collect()),
            Ty::Alias(name, args) => Ty::Alias(name.clone(), args.iter().map(|a| self.apply(a)).collect()),
            Ty::Arr(domains, range) => {
                Ty::Arr(domains.iter().map(|d| self.apply(d)).collect(), Box::new(self.apply(range)))
            }
            Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| self.apply(e)).collect()),
            Ty::Record { fields, rest } => {
                let mut applied_fields: indexmap::IndexMap<String, Ty> =
                    fields.iter().map(|(k, v)| (k.clone(), self.apply(v))).collect();
                let applied_rest = match rest {
                    None => None,
                    Some(r) => match self.apply(&Ty::Var(*r)) {
                        Ty::Var(r2) => Some(r2),
                        Ty::Record { fields: more, rest: inner_rest } => {
                            for (k, v) in more {
                                applied_fields.entry(k).or_insert(v);
                            }
                            inner_rest
                        }
                        // A row variable bound to anything else (e.g. a
                        // record unified directly against a closed record)
                        // closes the row: no fields remain to absorb.
                        _ => None,
                    },
                };
                Ty::Record { fields: applied_fields, rest: applied_rest }
            }
            Ty::Union(members) => Ty::Union(members.iter().map(|m| self.apply(m)).collect()),
            Ty::Intersect(members) => Ty::Intersect(members.iter().map(|m| self.apply(m)).collect()),
            Ty::LitString(s) => Ty::LitString(s.clone()),
            Ty::Recursive { var, body } => Ty::Recursive { var: *var, body: Box::new(self.apply(body)) },
        }
    }

    /// `self.compose(earlier)` = apply `earlier` first, then `self`
    /// (`s2 ∘ s1` in spec.md notation, left-biased: `self` shadows on
    /// overlap).
    pub fn compose(&self, earlier: &Subst) -> Subst {
        let mut result: BTreeMap<TyVar, Ty> = earlier.0.iter().map(|(v, t)| (*v, self.apply(t))).collect();
        for (v, t) in &self.0 {
            result.insert(*v, t.clone());
        }
        Subst(result)
    }

    pub fn extend(&mut self, var: TyVar, ty: Ty) {
        let ty = self.apply(&ty);
        for bound in self.0.values_mut() {
            *bound = Subst::single(var, ty.clone()).apply(bound);
        }
        self.0.insert(var, ty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pump;

    #[test]
    fn apply_follows_chains_to_a_fixed_point() {
        let mut pump = Pump::new();
        let a = pump.fresh();
        let b = pump.fresh();
        let mut s = Subst::new();
        s.extend(b, Ty::int());
        s.extend(a, Ty::Var(b));
        assert_eq!(s.apply(&Ty::Var(a)), Ty::int());
    }

    #[test]
    fn compose_is_left_biased_on_overlap() {
        let mut pump = Pump::new();
        let a = pump.fresh();
        let s1 = Subst::single(a, Ty::int());
        let s2 = Subst::single(a, Ty::bool());
        let composed = s2.compose(&s1);
        assert_eq!(composed.apply(&Ty::Var(a)), Ty::bool());
    }
}
