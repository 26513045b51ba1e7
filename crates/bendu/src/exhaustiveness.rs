//! Pattern-match exhaustiveness and redundancy checking (spec.md §4.1,
//! "Pattern exhaustiveness"): a Maranget-style usefulness check over the
//! pattern matrix, specialized per head constructor.

use crate::{
    ast::{Literal, Pattern},
    types_registry::AdtRegistry,
};

/// A normalized view of a pattern's head constructor, used to group rows
/// in the pattern matrix during specialization.
#[derive(Debug, Clone, PartialEq)]
enum Ctor {
    Bool(bool),
    Int(i32),
    /// Compared by bit pattern so `Ctor` can derive `PartialEq` without
    /// relying on float equality semantics.
    FloatBits(u32),
    Char(u8),
    Str(String),
    Unit,
    Tuple(usize),
    Record(Vec<String>),
    Adt(String),
}

impl Ctor {
    fn arity(&self) -> usize {
        match self {
            Ctor::Bool(_) | Ctor::Int(_) | Ctor::FloatBits(_) | Ctor::Char(_) | Ctor::Str(_) | Ctor::Unit => 0,
            Ctor::Tuple(n) => *n,
            Ctor::Record(fields) => fields.len(),
            Ctor::Adt(_) => 0, // resolved per-name via the ADT registry, see `resolve_arity`
        }
    }
}

fn strip_annotation(pat: &Pattern) -> &Pattern {
    match pat {
        Pattern::Annotated(inner, _) => strip_annotation(inner),
        other => other,
    }
}

fn head_ctor(pat: &Pattern) -> Option<Ctor> {
    match strip_annotation(pat) {
        Pattern::Wildcard | Pattern::Var(_) => None,
        Pattern::Literal(lit) => Some(match lit {
            Literal::Bool(b) => Ctor::Bool(*b),
            Literal::Int(i) => Ctor::Int(*i),
            Literal::Float(f) => Ctor::FloatBits(f.to_bits()),
            Literal::Char(c) => Ctor::Char(*c),
            Literal::String(s) => Ctor::Str(s.clone()),
            Literal::Unit => Ctor::Unit,
        }),
        Pattern::Tuple(elems) => Some(Ctor::Tuple(elems.len())),
        Pattern::Record { fields, .. } => Some(Ctor::Record(fields.iter().map(|(n, _)| n.clone()).collect())),
        Pattern::Constructor { name, .. } => Some(Ctor::Adt(name.clone())),
        Pattern::Annotated(..) => unreachable!("stripped above"),
    }
}

/// Sub-patterns for `pat`, assuming it matches the head constructor of
/// arity `arity` (or is a wildcard, in which case it expands to `arity`
/// wildcards).
fn sub_patterns(pat: &Pattern, arity: usize) -> Vec<Pattern> {
    match strip_annotation(pat) {
        Pattern::Wildcard | Pattern::Var(_) => vec![Pattern::Wildcard; arity],
        Pattern::Tuple(elems) => elems.clone(),
        Pattern::Record { fields, .. } => fields.iter().map(|(_, p)| p.clone()).collect(),
        Pattern::Constructor { args, .. } => args.clone(),
        Pattern::Literal(_) => Vec::new(),
        Pattern::Annotated(..) => unreachable!("stripped above"),
    }
}

/// A missing-case witness, rendered for diagnostics (spec.md §4.1:
/// "Missing cases -> NonExhaustivePatternMatch carrying a witness").
#[derive(Debug, Clone, PartialEq)]
pub enum Witness {
    Wildcard,
    Literal(Literal),
    Tuple(Vec<Witness>),
    Constructor(String, Vec<Witness>),
}

impl std::fmt::Display for Witness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Witness::Wildcard => write!(f, "_"),
            Witness::Literal(Literal::Bool(b)) => write!(f, "{b}"),
            Witness::Literal(Literal::Int(i)) => write!(f, "{i}"),
            Witness::Literal(Literal::Float(v)) => write!(f, "{v}"),
            Witness::Literal(Literal::Char(c)) => write!(f, "{:?}", *c as char),
            Witness::Literal(Literal::String(s)) => write!(f, "{s:?}"),
            Witness::Literal(Literal::Unit) => write!(f, "()"),
            Witness::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
            Witness::Constructor(name, args) => {
                if args.is_empty() {
                    write!(f, "{name}")
                } else {
                    write!(f, "{name}(")?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{a}")?;
                    }
                    write!(f, ")")
                }
            }
        }
    }
}

type Row = Vec<Pattern>;

/// Checks a sequence of single-pattern match arms: returns a witness for
/// the first uncovered value (if any) and the indices of arms that are
/// unreachable given the arms before them.
pub fn check_match(patterns: &[Pattern], adts: &AdtRegistry) -> (Option<Witness>, Vec<usize>) {
    let mut matrix: Vec<Row> = Vec::new();
    let mut redundant = Vec::new();
    for (i, pat) in patterns.iter().enumerate() {
        let q = vec![pat.clone()];
        if usefulness(&matrix, &q, adts).is_none() {
            redundant.push(i);
        }
        matrix.push(q);
    }
    let witness =
        usefulness(&matrix, &[Pattern::Wildcard], adts).map(|w| w.into_iter().next().unwrap_or(Witness::Wildcard));
    (witness, redundant)
}

/// Returns `Some(witness row)` if `q` is useful relative to `matrix` (there
/// is a value vector matched by `q` but by no row of `matrix`), else
/// `None`.
fn usefulness(matrix: &[Row], q: &[Pattern], adts: &AdtRegistry) -> Option<Vec<Witness>> {
    if q.is_empty() {
        return if matrix.is_empty() { Some(Vec::new()) } else { None };
    }

    let head = &q[0];
    match head_ctor(head) {
        Some(ctor) => {
            let arity = resolve_arity(&ctor, head, adts);
            let specialized = specialize(matrix, &ctor, arity);
            let mut q_prime = sub_patterns(head, arity);
            q_prime.extend(q[1..].iter().cloned());
            usefulness(&specialized, &q_prime, adts).map(|mut w| {
                let args = w.drain(..arity).collect();
                let mut result = vec![reify(&ctor, args)];
                result.extend(w);
                result
            })
        }
        None => {
            let signature = column_ctors(matrix);
            match complete_signature(&signature, adts) {
                Some(all_ctors) => {
                    for ctor in all_ctors {
                        let arity = resolve_arity(&ctor, head, adts);
                        let specialized = specialize(matrix, &ctor, arity);
                        let mut q_prime = vec![Pattern::Wildcard; arity];
                        q_prime.extend(q[1..].iter().cloned());
                        if let Some(mut w) = usefulness(&specialized, &q_prime, adts) {
                            let args = w.drain(..arity).collect();
                            let mut result = vec![reify(&ctor, args)];
                            result.extend(w);
                            return Some(result);
                        }
                    }
                    None
                }
                None => {
                    let default_matrix = default(matrix);
                    usefulness(&default_matrix, &q[1..], adts).map(|mut w| {
                        w.insert(0, missing_representative(&signature));
                        w
                    })
                }
            }
        }
    }
}

fn resolve_arity(ctor: &Ctor, pat: &Pattern, adts: &AdtRegistry) -> usize {
    match ctor {
        Ctor::Adt(name) => adts.find_ctor(name).map_or_else(
            || match strip_annotation(pat) {
                Pattern::Constructor { args, .. } => args.len(),
                _ => 0,
            },
            |(_, c)| c.fields.len(),
        ),
        other => other.arity(),
    }
}

fn specialize(matrix: &[Row], ctor: &Ctor, arity: usize) -> Vec<Row> {
    let mut out = Vec::new();
    for row in matrix {
        let head = &row[0];
        match head_ctor(head) {
            Some(head_c) if ctors_match(&head_c, ctor) => {
                let mut new_row = sub_patterns(head, arity);
                new_row.extend(row[1..].iter().cloned());
                out.push(new_row);
            }
            Some(_) => {}
            None => {
                let mut new_row = vec![Pattern::Wildcard; arity];
                new_row.extend(row[1..].iter().cloned());
                out.push(new_row);
            }
        }
    }
    out
}

fn default(matrix: &[Row]) -> Vec<Row> {
    matrix.iter().filter(|row| head_ctor(&row[0]).is_none()).map(|row| row[1..].to_vec()).collect()
}

fn ctors_match(a: &Ctor, b: &Ctor) -> bool {
    match (a, b) {
        (Ctor::Adt(x), Ctor::Adt(y)) => x == y,
        _ => a == b,
    }
}

fn column_ctors(matrix: &[Row]) -> Vec<Ctor> {
    let mut out = Vec::new();
    for row in matrix {
        if let Some(c) = head_ctor(&row[0])
            && !out.iter().any(|o| ctors_match(o, &c))
        {
            out.push(c);
        }
    }
    out
}

/// Returns `Some(all constructors)` when `present` already demonstrates a
/// type whose constructor set is enumerable and fully covered by
/// `present`; `None` when the signature is known-incomplete (an ADT
/// missing a variant) or inherently infinite (numeric/string literals).
fn complete_signature(present: &[Ctor], adts: &AdtRegistry) -> Option<Vec<Ctor>> {
    if present.is_empty() {
        return None;
    }
    match &present[0] {
        Ctor::Bool(_) => {
            let has_true = present.contains(&Ctor::Bool(true));
            let has_false = present.contains(&Ctor::Bool(false));
            if has_true && has_false { Some(vec![Ctor::Bool(true), Ctor::Bool(false)]) } else { None }
        }
        Ctor::Unit => Some(vec![Ctor::Unit]),
        Ctor::Tuple(n) => Some(vec![Ctor::Tuple(*n)]),
        Ctor::Record(fields) => Some(vec![Ctor::Record(fields.clone())]),
        Ctor::Adt(name) => {
            let adt = adts.find_ctor(name).map(|(adt, _)| adt)?;
            let all: Vec<Ctor> = adt.ctors.iter().map(|c| Ctor::Adt(c.name.clone())).collect();
            let covers_all = all.iter().all(|c| present.iter().any(|p| ctors_match(p, c)));
            if covers_all { Some(all) } else { None }
        }
        Ctor::Int(_) | Ctor::FloatBits(_) | Ctor::Char(_) | Ctor::Str(_) => None,
    }
}

fn missing_representative(present: &[Ctor]) -> Witness {
    match present.first() {
        None => Witness::Wildcard,
        Some(Ctor::Bool(_)) => {
            let missing = !present.contains(&Ctor::Bool(true));
            Witness::Literal(Literal::Bool(missing))
        }
        _ => Witness::Wildcard,
    }
}

fn reify(ctor: &Ctor, args: Vec<Witness>) -> Witness {
    match ctor {
        Ctor::Bool(b) => Witness::Literal(Literal::Bool(*b)),
        Ctor::Int(i) => Witness::Literal(Literal::Int(*i)),
        Ctor::FloatBits(bits) => Witness::Literal(Literal::Float(f32::from_bits(*bits))),
        Ctor::Char(c) => Witness::Literal(Literal::Char(*c)),
        Ctor::Str(s) => Witness::Literal(Literal::String(s.clone())),
        Ctor::Unit => Witness::Literal(Literal::Unit),
        Ctor::Tuple(_) | Ctor::Record(_) => Witness::Tuple(args),
        Ctor::Adt(name) => Witness::Constructor(name.clone(), args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types_registry::{AdtDef, AdtRegistry, CtorDef};

    fn bool_patterns(pats: &[Pattern]) -> (Option<Witness>, Vec<usize>) {
        check_match(pats, &AdtRegistry::new())
    }

    #[test]
    fn bool_match_needs_both_arms() {
        let pats = [Pattern::Literal(Literal::Bool(true))];
        let (witness, _) = bool_patterns(&pats);
        assert!(witness.is_some(), "missing `false` arm must be reported");
    }

    #[test]
    fn bool_match_with_both_arms_is_exhaustive() {
        let pats = [Pattern::Literal(Literal::Bool(true)), Pattern::Literal(Literal::Bool(false))];
        let (witness, _) = bool_patterns(&pats);
        assert!(witness.is_none());
    }

    #[test]
    fn wildcard_catch_all_is_always_exhaustive() {
        let pats = [Pattern::Literal(Literal::Int(1)), Pattern::Wildcard];
        let (witness, _) = bool_patterns(&pats);
        assert!(witness.is_none());
    }

    #[test]
    fn unreachable_literal_after_wildcard_is_flagged_redundant() {
        let pats = [Pattern::Wildcard, Pattern::Literal(Literal::Int(1))];
        let (_, redundant) = bool_patterns(&pats);
        assert_eq!(redundant, vec![1]);
    }

    #[test]
    fn adt_match_missing_a_variant_is_flagged() {
        let mut adts = AdtRegistry::new();
        adts.insert(AdtDef {
            name: "List".into(),
            params: vec![],
            ctors: vec![
                CtorDef { name: "Nil".into(), adt_name: "List".into(), id: 0, fields: vec![] },
                CtorDef { name: "Cons".into(), adt_name: "List".into(), id: 1, fields: vec![] },
            ],
        });
        let pats = [Pattern::Constructor { name: "Nil".into(), args: vec![] }];
        let (witness, _) = check_match(&pats, &adts);
        assert!(matches!(witness, Some(Witness::Constructor(name, _)) if name == "Cons"));
    }

    #[test]
    fn adt_match_covering_every_variant_is_exhaustive() {
        let mut adts = AdtRegistry::new();
        adts.insert(AdtDef {
            name: "List".into(),
            params: vec![],
            ctors: vec![
                CtorDef { name: "Nil".into(), adt_name: "List".into(), id: 0, fields: vec![] },
                CtorDef { name: "Cons".into(), adt_name: "List".into(), id: 1, fields: vec![] },
            ],
        });
        let pats = [
            Pattern::Constructor { name: "Nil".into(), args: vec![] },
            Pattern::Constructor { name: "Cons".into(), args: vec![Pattern::Wildcard, Pattern::Wildcard] },
        ];
        let (witness, _) = check_match(&pats, &adts);
        assert!(witness.is_none());
    }
}
