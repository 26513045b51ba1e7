//! The unifier (spec.md §4.2).

use indexmap::IndexMap;

use crate::{
    ast::Span,
    error::{Origin, TypeError},
    subst::Subst,
    types::{Pump, Ty, TyVar, ERROR},
    types_registry::AliasRegistry,
};

fn is_error_sentinel(ty: &Ty) -> bool {
    matches!(ty, Ty::Con(name, _) if name == ERROR)
}

/// `unify(t, u, origin) -> substitution'` or error (spec.md §4.2 contract).
pub struct Unifier<'a> {
    pub pump: &'a mut Pump,
    pub aliases: &'a AliasRegistry,
}

impl<'a> Unifier<'a> {
    pub fn new(pump: &'a mut Pump, aliases: &'a AliasRegistry) -> Self {
        Self { pump, aliases }
    }

    pub fn unify(&mut self, t: &Ty, u: &Ty, origin: Origin, span: Span) -> Result<Subst, TypeError> {
        self.unify_depth(t, u, origin, span, 0)
    }

    fn unify_depth(&mut self, t: &Ty, u: &Ty, origin: Origin, span: Span, depth: u32) -> Result<Subst, TypeError> {
        if depth > 256 {
            return Err(TypeError::Internal { message: "unification recursion limit exceeded".into() });
        }
        match (t, u) {
            // Identical types ⇒ no-op.
            _ if t == u => Ok(Subst::new()),

            // The inferencer substitutes this sentinel for an expression that
            // already produced a diagnostic; swallow it here so one error
            // doesn't cascade into a chain of spurious mismatches.
            _ if is_error_sentinel(t) || is_error_sentinel(u) => Ok(Subst::new()),

            (Ty::Alias(name, args), _) => {
                let expanded = self.expand_alias(name, args, span)?;
                self.unify_depth(&expanded, u, origin, span, depth + 1)
            }
            (_, Ty::Alias(name, args)) => {
                let expanded = self.expand_alias(name, args, span)?;
                self.unify_depth(t, &expanded, origin, span, depth + 1)
            }

            (Ty::Var(a), _) => self.bind(*a, u, origin, span),
            (_, Ty::Var(b)) => self.bind(*b, t, origin, span),

            (Ty::Arr(d1, r1), Ty::Arr(d2, r2)) => {
                if d1.len() != d2.len() {
                    return Err(mismatch(t, u, origin, span));
                }
                let mut subst = Subst::new();
                for (a, b) in d1.iter().zip(d2.iter()) {
                    let s = self.unify_depth(&subst.apply(a), &subst.apply(b), origin, span, depth + 1)?;
                    subst = s.compose(&subst);
                }
                let s = self.unify_depth(&subst.apply(r1), &subst.apply(r2), origin, span, depth + 1)?;
                Ok(s.compose(&subst))
            }

            (Ty::Tuple(e1), Ty::Tuple(e2)) => {
                if e1.len() != e2.len() {
                    return Err(mismatch(t, u, origin, span));
                }
                let mut subst = Subst::new();
                for (a, b) in e1.iter().zip(e2.iter()) {
                    let s = self.unify_depth(&subst.apply(a), &subst.apply(b), origin, span, depth + 1)?;
                    subst = s.compose(&subst);
                }
                Ok(subst)
            }

            (Ty::Con(n1, a1), Ty::Con(n2, a2)) => {
                if n1 != n2 || a1.len() != a2.len() {
                    return Err(mismatch(t, u, origin, span));
                }
                let mut subst = Subst::new();
                for (a, b) in a1.iter().zip(a2.iter()) {
                    let s = self.unify_depth(&subst.apply(a), &subst.apply(b), origin, span, depth + 1)?;
                    subst = s.compose(&subst);
                }
                Ok(subst)
            }

            (Ty::Record { fields: f1, rest: r1 }, Ty::Record { fields: f2, rest: r2 }) => {
                self.unify_records(f1, *r1, f2, *r2, origin, span, depth)
            }

            (Ty::Union(members), other) | (other, Ty::Union(members)) => {
                self.unify_union(members, other, origin, span, depth)
            }

            (Ty::Intersect(members), other) | (other, Ty::Intersect(members)) => {
                self.unify_intersect(members, other, origin, span, depth)
            }

            (Ty::Recursive { var, body }, other) | (other, Ty::Recursive { var, body }) => {
                let unrolled = Subst::single(*var, Ty::Recursive { var: *var, body: body.clone() }).apply(body);
                self.unify_depth(&unrolled, other, origin, span, depth + 1)
            }

            _ => Err(mismatch(t, u, origin, span)),
        }
    }

    fn expand_alias(&mut self, name: &str, args: &[Ty], span: Span) -> Result<Ty, TypeError> {
        self.aliases.expand(name, args, self.pump).map_err(|()| TypeError::CircularTypeAlias { name: name.to_owned(), span })
    }

    /// Binds a type variable, enforcing the occurs check except through the
    /// structural barriers the spec names (records, functions, tuples,
    /// unions) — those protect recursive types from infinite expansion.
    fn bind(&mut self, var: TyVar, ty: &Ty, origin: Origin, span: Span) -> Result<Subst, TypeError> {
        if let Ty::Var(other) = ty
            && *other == var
        {
            return Ok(Subst::new());
        }
        if occurs_unprotected(var, ty) {
            return Err(TypeError::OccursCheck { var: var.to_string(), ty: ty.clone(), span });
        }
        let _ = origin;
        Ok(Subst::single(var, ty.clone()))
    }

    #[allow(clippy::too_many_arguments)]
    fn unify_records(
        &mut self,
        f1: &IndexMap<String, Ty>,
        r1: Option<TyVar>,
        f2: &IndexMap<String, Ty>,
        r2: Option<TyVar>,
        origin: Origin,
        span: Span,
        depth: u32,
    ) -> Result<Subst, TypeError> {
        let mut subst = Subst::new();
        let mut only_in_l = IndexMap::new();
        let mut only_in_r = IndexMap::new();

        for (name, t1) in f1 {
            if let Some(t2) = f2.get(name) {
                let s = self.unify_depth(&subst.apply(t1), &subst.apply(t2), origin, span, depth + 1)?;
                subst = s.compose(&subst);
            } else {
                only_in_l.insert(name.clone(), t1.clone());
            }
        }
        for (name, t2) in f2 {
            if !f1.contains_key(name) {
                only_in_r.insert(name.clone(), t2.clone());
            }
        }

        match (r1, r2) {
            (None, None) => {
                if !only_in_l.is_empty() || !only_in_r.is_empty() {
                    return Err(TypeError::TypeMismatch {
                        expected: Ty::Record { fields: f1.clone(), rest: None },
                        actual: Ty::Record { fields: f2.clone(), rest: None },
                        origin,
                        span,
                    });
                }
                Ok(subst)
            }
            (Some(row), None) => {
                if !only_in_r.is_empty() {
                    return Err(TypeError::TypeMismatch {
                        expected: Ty::Record { fields: f1.clone(), rest: Some(row) },
                        actual: Ty::Record { fields: f2.clone(), rest: None },
                        origin,
                        span,
                    });
                }
                let binding = Subst::single(row, Ty::Record { fields: only_in_l, rest: None });
                Ok(binding.compose(&subst))
            }
            (None, Some(row)) => {
                if !only_in_l.is_empty() {
                    return Err(TypeError::TypeMismatch {
                        expected: Ty::Record { fields: f1.clone(), rest: None },
                        actual: Ty::Record { fields: f2.clone(), rest: Some(row) },
                        origin,
                        span,
                    });
                }
                let binding = Subst::single(row, Ty::Record { fields: only_in_r, rest: None });
                Ok(binding.compose(&subst))
            }
            (Some(row_l), Some(row_r)) => {
                let fresh = Ty::Var(self.pump.fresh());
                let bind_l = Subst::single(row_l, extend_row(only_in_r, fresh.clone()));
                let bind_r = Subst::single(row_r, extend_row(only_in_l, fresh));
                Ok(bind_r.compose(&bind_l.compose(&subst)))
            }
        }
    }

    fn unify_union(&mut self, members: &[Ty], other: &Ty, origin: Origin, span: Span, depth: u32) -> Result<Subst, TypeError> {
        if let Ty::Union(other_members) = other {
            // Union ~ union: every member on each side must unify with some
            // member on the other (subset matching in both directions).
            for m in members {
                if !other_members.iter().any(|o| self.unify_depth(m, o, origin, span, depth + 1).is_ok()) {
                    return Err(mismatch(&Ty::Union(members.to_vec()), other, origin, span));
                }
            }
            for o in other_members {
                if !members.iter().any(|m| self.unify_depth(m, o, origin, span, depth + 1).is_ok()) {
                    return Err(mismatch(&Ty::Union(members.to_vec()), other, origin, span));
                }
            }
            return Ok(Subst::new());
        }
        for m in members {
            if let Ok(subst) = self.unify_depth(m, other, origin, span, depth + 1) {
                return Ok(subst);
            }
        }
        Err(mismatch(&Ty::Union(members.to_vec()), other, origin, span))
    }

    fn unify_intersect(&mut self, members: &[Ty], other: &Ty, origin: Origin, span: Span, depth: u32) -> Result<Subst, TypeError> {
        // Every member of the intersection must unify with the other side;
        // residual substitutions are composed together (spec.md §4.2).
        let mut subst = Subst::new();
        for m in members {
            let s = self.unify_depth(&subst.apply(m), &subst.apply(other), origin, span, depth + 1)?;
            subst = s.compose(&subst);
        }
        Ok(subst)
    }
}

fn extend_row(fields: IndexMap<String, Ty>, rest: Ty) -> Ty {
    match rest {
        Ty::Var(v) => Ty::Record { fields, rest: Some(v) },
        other => {
            let _ = other;
            Ty::Record { fields, rest: None }
        }
    }
}

fn mismatch(expected: &Ty, actual: &Ty, origin: Origin, span: Span) -> TypeError {
    TypeError::TypeMismatch { expected: expected.clone(), actual: actual.clone(), origin, span }
}

/// Occurs check, skipping the structural barriers named in spec.md §3:
/// records, functions, tuples and unions may carry `var` in their *shape*
/// (as an argument that will itself be resolved later) without that being a
/// cyclic binding, since these types aren't eagerly unfolded the way a
/// bare `Ty::Var -> Ty::Var` chain would be. Only a *direct* occurrence as
/// the binding's own value (not nested under one of those constructors) is
/// rejected.
fn occurs_unprotected(var: TyVar, ty: &Ty) -> bool {
    match ty {
        Ty::Var(v) => *v == var,
        Ty::Con(_, args) | Ty::Alias(_, args) => args.iter().any(|a| occurs_direct(var, a)),
        Ty::Arr(_, _) | Ty::Tuple(_) | Ty::Record { .. } | Ty::Union(_) | Ty::Intersect(_) => false,
        Ty::LitString(_) => false,
        Ty::Recursive { var: bound, body } => *bound != var && occurs_unprotected(var, body),
    }
}

fn occurs_direct(var: TyVar, ty: &Ty) -> bool {
    matches!(ty, Ty::Var(v) if *v == var) || ty.free_vars().contains(&var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types_registry::AliasRegistry;

    fn unifier(pump: &mut Pump, aliases: &AliasRegistry) -> Unifier<'_> {
        Unifier::new(pump, aliases)
    }

    #[test]
    fn identical_types_unify_trivially() {
        let mut pump = Pump::new();
        let aliases = AliasRegistry::new();
        let mut u = unifier(&mut pump, &aliases);
        let s = u.unify(&Ty::int(), &Ty::int(), Origin::Unification, Span::DUMMY).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn mismatched_constructors_fail() {
        let mut pump = Pump::new();
        let aliases = AliasRegistry::new();
        let mut u = unifier(&mut pump, &aliases);
        assert!(u.unify(&Ty::int(), &Ty::bool(), Origin::Unification, Span::DUMMY).is_err());
    }

    #[test]
    fn occurs_check_rejects_unprotected_self_reference() {
        let mut pump = Pump::new();
        let a = pump.fresh();
        let aliases = AliasRegistry::new();
        let mut u = unifier(&mut pump, &aliases);
        let t = Ty::Con("Box".into(), vec![Ty::Var(a)]);
        let result = u.unify(&Ty::Var(a), &t, Origin::Unification, Span::DUMMY);
        assert!(result.is_err());
    }

    #[test]
    fn unify_is_symmetric_up_to_binding_direction() {
        let mut pump = Pump::new();
        let a = pump.fresh();
        let aliases = AliasRegistry::new();
        let mut u1 = unifier(&mut pump, &aliases);
        let s1 = u1.unify(&Ty::Var(a), &Ty::int(), Origin::Unification, Span::DUMMY).unwrap();
        let mut pump2 = Pump::new();
        let a2 = pump2.fresh();
        let mut u2 = unifier(&mut pump2, &aliases);
        let s2 = u2.unify(&Ty::int(), &Ty::Var(a2), Origin::Unification, Span::DUMMY).unwrap();
        assert_eq!(s1.apply(&Ty::Var(a)), s2.apply(&Ty::Var(a2)));
    }

    #[test]
    fn open_record_accepts_superset_of_fields() {
        let mut pump = Pump::new();
        let row = pump.fresh();
        let aliases = AliasRegistry::new();
        let mut u = unifier(&mut pump, &aliases);
        let open = Ty::Record { fields: IndexMap::from([("name".to_owned(), Ty::string())]), rest: Some(row) };
        let closed = Ty::Record {
            fields: IndexMap::from([("name".to_owned(), Ty::string()), ("age".to_owned(), Ty::int())]),
            rest: None,
        };
        let subst = u.unify(&open, &closed, Origin::Unification, Span::DUMMY).unwrap();
        match subst.apply(&Ty::Var(row)) {
            Ty::Record { fields, rest: None } => {
                assert_eq!(fields.get("age"), Some(&Ty::int()));
            }
            other => panic!("expected row to bind to the extension record, got {other:?}"),
        }
    }

    #[test]
    fn closed_record_rejects_extra_fields() {
        let mut pump = Pump::new();
        let aliases = AliasRegistry::new();
        let mut u = unifier(&mut pump, &aliases);
        let closed1 = Ty::Record { fields: IndexMap::from([("x".to_owned(), Ty::int())]), rest: None };
        let closed2 = Ty::Record {
            fields: IndexMap::from([("x".to_owned(), Ty::int()), ("y".to_owned(), Ty::int())]),
            rest: None,
        };
        assert!(u.unify(&closed1, &closed2, Origin::Unification, Span::DUMMY).is_err());
    }
}
