//! The constraint-based type inferencer (spec.md §4.1).
//!
//! Drives the whole pipeline: walks the surface AST, generating and
//! immediately solving unification constraints (rather than collecting a
//! constraint set up front and solving it in a second pass — the teacher's
//! own type-checking crates favour this eager style too, and it lets
//! `let`-generalization read `FTV(env)` at exactly the right moment).
//! Failures are accumulated into [`Diagnostics`] rather than aborting: a
//! sub-expression that fails to type-check is replaced by the `Error`
//! sentinel type so the rest of the module still gets checked.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::{BinOp, CtorDecl, Expr, ExprKind, Import, ImportKind, Item, Literal, MatchArm, Module, Param, Pattern, Span, TypeDecl, TypeExpr},
    env::{Binding, TypeEnv},
    error::{Diagnostics, Origin, TypeError, Warning, suggest_similar},
    exhaustiveness,
    types::{ERROR, Pump, Scheme, Ty, TyVar, generalize},
    types_registry::{AdtDef, CtorDef},
    unify::Unifier,
};

/// One exported `let` binding's inferred scheme, handed to the bytecode
/// compiler for export-table encoding (spec.md §4.3, "Export encoding").
#[derive(Debug, Clone)]
pub struct InferredLet {
    pub name: String,
    pub public: bool,
    pub scheme: Scheme,
}

/// Result of inferring a whole module.
#[derive(Debug, Default)]
pub struct ModuleTypes {
    pub lets: Vec<InferredLet>,
}

pub struct Inferencer<'a> {
    env: &'a mut TypeEnv,
    pump: Pump,
    pub diagnostics: Diagnostics,
    /// Exported schemes of already-loaded packages, keyed by import path;
    /// supplied by the driver (spec.md §4.4/§4.5 own package resolution —
    /// the inferencer only consumes what it is handed).
    import_signatures: AHashMap<String, AHashMap<String, Scheme>>,
    /// The resolved type of every expression node, keyed by its span. Handed
    /// to the bytecode compiler so instruction selection can stay
    /// type-driven (spec.md §4.3: "once inference fixes both operands of
    /// `+` to `Int`, emit `ADD_I32`") without re-running inference.
    pub expr_types: AHashMap<Span, Ty>,
}

impl<'a> Inferencer<'a> {
    pub fn new(env: &'a mut TypeEnv) -> Self {
        Self {
            env,
            pump: Pump::new(),
            diagnostics: Diagnostics::new(),
            import_signatures: AHashMap::new(),
            expr_types: AHashMap::new(),
        }
    }

    /// Registers the exported schemes of an already-resolved package so
    /// `import` items in this module can bind against them.
    pub fn provide_package_signature(&mut self, path: String, exports: AHashMap<String, Scheme>) {
        self.import_signatures.insert(path, exports);
    }

    pub fn infer_module(&mut self, module: &Module) -> ModuleTypes {
        // Two passes over top-level items: type declarations and imports
        // first (so forward references between `let`s and types resolve),
        // then `let`/bare-expression items in order.
        for item in &module.items {
            if let Item::Type(decl) = item {
                self.declare_type(decl);
            }
        }
        for item in &module.items {
            if let Item::Import(import) = item {
                self.process_import(import);
            }
        }

        let mut result = ModuleTypes::default();
        for item in &module.items {
            match item {
                Item::Let(decl) => {
                    let scheme = self.infer_let(decl.name.clone(), decl.mutable, decl.recursive, &decl.annotation, &decl.value, decl.span);
                    result.lets.push(InferredLet { name: decl.name.clone(), public: decl.public, scheme });
                }
                Item::Expr(expr) => {
                    self.infer_expr(expr);
                }
                Item::Type(_) | Item::Import(_) => {}
            }
        }
        result
    }

    fn declare_type(&mut self, decl: &TypeDecl) {
        match decl {
            TypeDecl::Adt { name, params, ctors } => {
                let mut var_map = AHashMap::new();
                let param_vars: Vec<TyVar> = params
                    .iter()
                    .map(|p| {
                        let v = self.pump.fresh();
                        var_map.insert(p.clone(), v);
                        v
                    })
                    .collect();
                let ctor_defs: Vec<CtorDef> = ctors
                    .iter()
                    .enumerate()
                    .map(|(id, c): (usize, &CtorDecl)| CtorDef {
                        name: c.name.clone(),
                        adt_name: name.clone(),
                        id: id as u32,
                        fields: c.fields.iter().map(|f| self.resolve_type_expr(f, &var_map)).collect(),
                    })
                    .collect();
                self.env.adts.insert(AdtDef { name: name.clone(), params: param_vars, ctors: ctor_defs });
            }
            TypeDecl::Alias { name, params, body } => {
                let mut var_map = AHashMap::new();
                let param_vars: Vec<TyVar> = params
                    .iter()
                    .map(|p| {
                        let v = self.pump.fresh();
                        var_map.insert(p.clone(), v);
                        v
                    })
                    .collect();
                let resolved = self.resolve_type_expr(body, &var_map);
                self.env.aliases.define(name.clone(), param_vars, resolved);
            }
        }
    }

    fn process_import(&mut self, import: &Import) {
        let Some(exports) = self.import_signatures.get(&import.path).cloned() else {
            return;
        };
        match &import.kind {
            ImportKind::Unqualified => {
                for (name, scheme) in exports {
                    self.env.install_import("", name.clone(), Binding { span: import.span, mutable: false, scheme });
                }
            }
            ImportKind::Qualified(alias) => {
                for (name, scheme) in exports {
                    self.env.install_import(alias, name.clone(), Binding { span: import.span, mutable: false, scheme });
                }
            }
            ImportKind::Selective(names) => {
                for (name, rename) in names {
                    let Some(scheme) = exports.get(name) else {
                        self.diagnostics.error(TypeError::UnknownIdentifier {
                            name: name.clone(),
                            span: import.span,
                            suggestions: suggest_similar(name, exports.keys().map(String::as_str)),
                        });
                        continue;
                    };
                    let bound_name = rename.clone().unwrap_or_else(|| name.clone());
                    self.env.install_import(
                        "",
                        bound_name,
                        Binding { span: import.span, mutable: false, scheme: scheme.clone() },
                    );
                }
            }
        }
    }

    fn infer_let(&mut self, name: String, mutable: bool, recursive: bool, annotation: &Option<TypeExpr>, value: &Expr, span: Span) -> Scheme {
        let declared = annotation.as_ref().map(|t| self.resolve_type_expr(t, &AHashMap::new()));

        // `let rec` binds a monomorphic placeholder for `name` before
        // checking the value, so self-references inside it resolve instead
        // of reporting `UnknownIdentifier`.
        let placeholder = if recursive {
            let p = declared.clone().unwrap_or_else(|| Ty::Var(self.pump.fresh()));
            self.env.rebind(&name, Binding { span, mutable, scheme: Scheme::monomorphic(p.clone()) });
            Some(p)
        } else {
            None
        };

        let mut ty = self.infer_expr(value);
        if let Some(p) = &placeholder {
            ty = self.unify_at(p, &ty, Origin::Inference, span);
        }
        if let Some(declared) = &declared {
            ty = self.unify_at(declared, &ty, Origin::Inference, span);
        }

        // Mutable bindings are not generalized: they may be reassigned to
        // another monomorphic instance later, so treating them as
        // polymorphic would let two reassignments disagree in type
        // (spec.md §9, Open Question on mutable-binding atomicity —
        // resolved here by keeping a mutable slot monomorphic for its
        // whole lifetime).
        let scheme = if mutable { Scheme::monomorphic(ty) } else { generalize(&ty, &self.env.free_vars()) };
        self.env.rebind(&name, Binding { span, mutable, scheme: scheme.clone() });
        scheme
    }

    fn unify_at(&mut self, expected: &Ty, actual: &Ty, origin: Origin, span: Span) -> Ty {
        let mut unifier = Unifier::new(&mut self.pump, &self.env.aliases);
        match unifier.unify(expected, actual, origin, span) {
            Ok(subst) => subst.apply(actual),
            Err(err) => {
                self.diagnostics.error(err);
                Ty::con(ERROR)
            }
        }
    }

    fn infer_expr(&mut self, expr: &Expr) -> Ty {
        let ty = self.infer_expr_kind(expr);
        self.expr_types.insert(expr.span, ty.clone());
        ty
    }

    fn infer_expr_kind(&mut self, expr: &Expr) -> Ty {
        match &expr.kind {
            ExprKind::Literal(lit) => literal_type(lit),

            ExprKind::Var(name) => self.lookup_var(name, expr.span),

            ExprKind::Binary(op, lhs, rhs) => self.infer_binary(*op, lhs, rhs, expr.span),

            ExprKind::Not(inner) => {
                let t = self.infer_expr(inner);
                self.unify_at(&Ty::bool(), &t, Origin::Unification, inner.span);
                Ty::bool()
            }

            ExprKind::Apply(callee, args) => self.infer_apply(callee, args, expr.span),

            ExprKind::Lambda { params, body } => self.infer_lambda(params, body),

            ExprKind::Let { name, mutable, recursive, value, body } => {
                self.env.push_scope();
                self.infer_let(name.clone(), *mutable, *recursive, &None, value, expr.span);
                let result = self.infer_expr(body);
                self.env.pop_scope();
                result
            }

            ExprKind::If { cond, then, otherwise } => {
                let cond_ty = self.infer_expr(cond);
                self.unify_at(&Ty::bool(), &cond_ty, Origin::Unification, cond.span);
                let then_ty = self.infer_expr(then);
                let else_ty = self.infer_expr(otherwise);
                self.unify_at(&then_ty, &else_ty, Origin::Unification, expr.span)
            }

            ExprKind::Match { scrutinee, arms } => self.infer_match(scrutinee, arms, expr.span),

            ExprKind::RecordLit { fields, spread } => self.infer_record_lit(fields, spread),

            ExprKind::FieldAccess(base, field) => self.infer_field_access(base, field, expr.span),

            ExprKind::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| self.infer_expr(e)).collect()),

            ExprKind::ArrayLit(elems) => {
                let elem_ty = Ty::Var(self.pump.fresh());
                let mut current = elem_ty;
                for e in elems {
                    let t = self.infer_expr(e);
                    current = self.unify_at(&current, &t, Origin::Unification, e.span);
                }
                Ty::array(current)
            }

            ExprKind::ArrayIndex(array, index) => {
                let elem = Ty::Var(self.pump.fresh());
                let arr_ty = self.infer_expr(array);
                self.unify_at(&Ty::array(elem.clone()), &arr_ty, Origin::Unification, array.span);
                let idx_ty = self.infer_expr(index);
                self.unify_at(&Ty::int(), &idx_ty, Origin::Unification, index.span);
                elem
            }

            ExprKind::ArraySlice { array, from, to } => {
                let elem = Ty::Var(self.pump.fresh());
                let arr_ty = self.infer_expr(array);
                let result = self.unify_at(&Ty::array(elem), &arr_ty, Origin::Unification, array.span);
                if let Some(from) = from {
                    let t = self.infer_expr(from);
                    self.unify_at(&Ty::int(), &t, Origin::Unification, from.span);
                }
                if let Some(to) = to {
                    let t = self.infer_expr(to);
                    self.unify_at(&Ty::int(), &t, Origin::Unification, to.span);
                }
                result
            }

            ExprKind::Annotated(inner, type_expr) => {
                let declared = self.resolve_type_expr(type_expr, &AHashMap::new());
                let actual = self.infer_expr(inner);
                self.unify_at(&declared, &actual, Origin::Inference, expr.span)
            }

            ExprKind::Block(exprs) => {
                self.env.push_scope();
                let mut last = Ty::unit();
                for e in exprs {
                    last = self.infer_expr(e);
                }
                self.env.pop_scope();
                last
            }
        }
    }

    fn lookup_var(&mut self, name: &str, span: Span) -> Ty {
        if let Some(binding) = self.env.lookup(name) {
            return binding.scheme.instantiate(&mut self.pump);
        }
        if let Some((alias, bare)) = name.split_once('.')
            && let Some(binding) = self.env.lookup_qualified(alias, bare)
        {
            return binding.scheme.instantiate(&mut self.pump);
        }
        let suggestions = suggest_similar(name, self.env.all_names().into_iter());
        self.diagnostics.error(TypeError::UnknownIdentifier { name: name.to_owned(), span, suggestions });
        Ty::con(ERROR)
    }

    fn infer_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, span: Span) -> Ty {
        let lhs_ty = self.infer_expr(lhs);
        let rhs_ty = self.infer_expr(rhs);
        match op {
            BinOp::Add => {
                let operand = self.unify_at(&lhs_ty, &rhs_ty, Origin::Unification, span);
                self.unify_at(&operand, &Ty::Union(vec![Ty::int(), Ty::float(), Ty::string(), Ty::char()]), Origin::Typeclass, span);
                operand
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let operand = self.unify_at(&lhs_ty, &rhs_ty, Origin::Unification, span);
                self.unify_at(&operand, &Ty::Union(vec![Ty::int(), Ty::float()]), Origin::Typeclass, span);
                operand
            }
            BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
                let operand = self.unify_at(&lhs_ty, &rhs_ty, Origin::Unification, span);
                self.unify_at(&operand, &Ty::Union(vec![Ty::int(), Ty::float(), Ty::char(), Ty::string()]), Origin::Typeclass, span);
                Ty::bool()
            }
            BinOp::Eq | BinOp::Neq => {
                self.unify_at(&lhs_ty, &rhs_ty, Origin::Unification, span);
                Ty::bool()
            }
            BinOp::And | BinOp::Or => {
                self.unify_at(&Ty::bool(), &lhs_ty, Origin::Unification, lhs.span);
                self.unify_at(&Ty::bool(), &rhs_ty, Origin::Unification, rhs.span);
                Ty::bool()
            }
        }
    }

    fn infer_apply(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Ty {
        let callee_ty = self.infer_expr(callee);
        let arg_tys: Vec<Ty> = args.iter().map(|a| self.infer_expr(a)).collect();
        let result = Ty::Var(self.pump.fresh());
        let expected = Ty::Arr(arg_tys, Box::new(result.clone()));
        let applied = self.unify_at(&expected, &callee_ty, Origin::Unification, span);
        match applied {
            Ty::Arr(_, range) => *range,
            _ => result,
        }
    }

    fn infer_lambda(&mut self, params: &[Param], body: &Expr) -> Ty {
        self.env.push_scope();
        let mut param_tys = Vec::with_capacity(params.len());
        for p in params {
            let ty = match &p.annotation {
                Some(annot) => self.resolve_type_expr(annot, &AHashMap::new()),
                None => Ty::Var(self.pump.fresh()),
            };
            let _ = self.env.bind(&p.name, Binding { span: p.span, mutable: false, scheme: Scheme::monomorphic(ty.clone()) });
            param_tys.push(ty);
        }
        let body_ty = self.infer_expr(body);
        self.env.pop_scope();
        Ty::Arr(param_tys, Box::new(body_ty))
    }

    fn infer_match(&mut self, scrutinee: &Expr, arms: &[MatchArm], span: Span) -> Ty {
        let scrutinee_ty = self.infer_expr(scrutinee);
        let result_ty = Ty::Var(self.pump.fresh());
        let mut result = result_ty;

        for arm in arms {
            self.env.push_scope();
            self.bind_pattern(&arm.pattern, &scrutinee_ty);
            if let Some(guard) = &arm.guard {
                let guard_ty = self.infer_expr(guard);
                self.unify_at(&Ty::bool(), &guard_ty, Origin::Unification, guard.span);
            }
            let body_ty = self.infer_expr(&arm.body);
            result = self.unify_at(&result, &body_ty, Origin::Unification, arm.body.span);
            self.env.pop_scope();
        }

        let patterns: Vec<Pattern> = arms.iter().map(|a| a.pattern.clone()).collect();
        let (witness, redundant) = exhaustiveness::check_match(&patterns, &self.env.adts);
        if let Some(w) = witness {
            self.diagnostics.error(TypeError::NonExhaustivePatternMatch { witness: w.to_string(), span });
        }
        for idx in redundant {
            self.diagnostics.warn(Warning::OverlappingPattern { span: arms[idx].body.span });
        }

        result
    }

    /// Binds pattern variables against `scrutinee_ty`, unifying structural
    /// shape as it goes (spec.md §4.1, "Pattern typing").
    fn bind_pattern(&mut self, pattern: &Pattern, scrutinee_ty: &Ty) {
        match pattern {
            Pattern::Wildcard => {}
            Pattern::Var(name) => {
                let _ = self.env.bind(
                    name,
                    Binding { span: Span::DUMMY, mutable: false, scheme: Scheme::monomorphic(scrutinee_ty.clone()) },
                );
            }
            Pattern::Literal(lit) => {
                let lit_ty = literal_type(lit);
                self.unify_at(scrutinee_ty, &lit_ty, Origin::Unification, Span::DUMMY);
            }
            Pattern::Tuple(elems) => {
                let elem_tys: Vec<Ty> = elems.iter().map(|_| Ty::Var(self.pump.fresh())).collect();
                let applied = self.unify_at(&Ty::Tuple(elem_tys.clone()), scrutinee_ty, Origin::Unification, Span::DUMMY);
                match applied {
                    Ty::Tuple(tys) => {
                        for (p, t) in elems.iter().zip(tys.iter()) {
                            self.bind_pattern(p, t);
                        }
                    }
                    _ => {
                        for (p, t) in elems.iter().zip(elem_tys.iter()) {
                            self.bind_pattern(p, t);
                        }
                    }
                }
            }
            Pattern::Record { fields, rest } => {
                let field_tys: IndexMap<String, Ty> =
                    fields.iter().map(|(name, _)| (name.clone(), Ty::Var(self.pump.fresh()))).collect();
                let row = if *rest { Some(self.pump.fresh()) } else { None };
                let expected = Ty::Record { fields: field_tys.clone(), rest: row };
                self.unify_at(&expected, scrutinee_ty, Origin::Unification, Span::DUMMY);
                for (name, sub_pat) in fields {
                    let ty = field_tys.get(name).cloned().unwrap_or_else(|| Ty::Var(self.pump.fresh()));
                    self.bind_pattern(sub_pat, &ty);
                }
            }
            Pattern::Constructor { name, args } => {
                // Pull everything we need out of the registry as owned data
                // before any `&mut self` call, so the borrow of `self.env`
                // doesn't outlive it.
                let found = self.env.adts.find_ctor(name).map(|(adt, ctor)| (adt.name.clone(), adt.params.clone(), ctor.fields.clone()));
                let Some((adt_name, params, fields)) = found else {
                    self.diagnostics.error(TypeError::UnknownIdentifier { name: name.clone(), span: Span::DUMMY, suggestions: Vec::new() });
                    for a in args {
                        self.bind_pattern(a, &Ty::con(ERROR));
                    }
                    return;
                };
                let mapping: std::collections::BTreeMap<TyVar, Ty> =
                    params.iter().map(|p| (*p, Ty::Var(self.pump.fresh()))).collect();
                let adt_ty = Ty::Con(adt_name, params.iter().map(|p| mapping[p].clone()).collect());
                self.unify_at(&adt_ty, scrutinee_ty, Origin::Unification, Span::DUMMY);
                let field_tys: Vec<Ty> = fields.iter().map(|t| substitute(t, &mapping)).collect();
                for (a, t) in args.iter().zip(field_tys.iter()) {
                    self.bind_pattern(a, t);
                }
            }
            Pattern::Annotated(inner, type_expr) => {
                let declared = self.resolve_type_expr(type_expr, &AHashMap::new());
                self.unify_at(&declared, scrutinee_ty, Origin::Inference, Span::DUMMY);
                self.bind_pattern(inner, &declared);
            }
        }
    }

    fn infer_record_lit(&mut self, fields: &[(String, Expr)], spread: &Option<Box<Expr>>) -> Ty {
        let mut field_tys = IndexMap::new();
        for (name, value) in fields {
            field_tys.insert(name.clone(), self.infer_expr(value));
        }
        if let Some(base) = spread {
            let row = self.pump.fresh();
            let base_ty = self.infer_expr(base);
            let expected = Ty::Record { fields: IndexMap::new(), rest: Some(row) };
            let applied = self.unify_at(&expected, &base_ty, Origin::Unification, base.span);
            if let Ty::Record { fields: base_fields, .. } = applied {
                for (name, ty) in base_fields {
                    field_tys.entry(name).or_insert(ty);
                }
            }
        }
        Ty::Record { fields: field_tys, rest: None }
    }

    fn infer_field_access(&mut self, base: &Expr, field: &str, span: Span) -> Ty {
        let base_ty = self.infer_expr(base);
        let field_ty = Ty::Var(self.pump.fresh());
        let row = self.pump.fresh();
        let mut expected_fields = IndexMap::new();
        expected_fields.insert(field.to_owned(), field_ty.clone());
        let expected = Ty::Record { fields: expected_fields, rest: Some(row) };
        let applied = self.unify_at(&expected, &base_ty, Origin::Unification, span);
        match applied {
            Ty::Record { fields, .. } => fields.get(field).cloned().unwrap_or(field_ty),
            _ => field_ty,
        }
    }

    /// Resolves a surface type annotation to an inferencer `Ty`, minting a
    /// fresh variable per distinct lowercase type-variable name the first
    /// time it's seen within this annotation's `var_map`.
    fn resolve_type_expr(&mut self, expr: &TypeExpr, var_map: &AHashMap<String, TyVar>) -> Ty {
        match expr {
            TypeExpr::Var(name) => {
                if let Some(v) = var_map.get(name) {
                    Ty::Var(*v)
                } else {
                    Ty::Var(self.pump.fresh())
                }
            }
            TypeExpr::Con(name, args) => {
                let resolved_args: Vec<Ty> = args.iter().map(|a| self.resolve_type_expr(a, var_map)).collect();
                match name.as_str() {
                    "Bool" | "Char" | "Float" | "Int" | "String" | "Unit" | "Error" | "Array" => {
                        Ty::Con(name.clone(), resolved_args)
                    }
                    _ if self.env.adts.get(name).is_some() => Ty::Con(name.clone(), resolved_args),
                    _ if self.env.aliases.contains(name) => Ty::Alias(name.clone(), resolved_args),
                    _ => Ty::Con(name.clone(), resolved_args),
                }
            }
            TypeExpr::Arrow(domains, range) => Ty::Arr(
                domains.iter().map(|d| self.resolve_type_expr(d, var_map)).collect(),
                Box::new(self.resolve_type_expr(range, var_map)),
            ),
            TypeExpr::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| self.resolve_type_expr(e, var_map)).collect()),
            TypeExpr::Record { fields, rest } => {
                let resolved_fields: IndexMap<String, Ty> =
                    fields.iter().map(|(name, t)| (name.clone(), self.resolve_type_expr(t, var_map))).collect();
                let resolved_rest = rest.as_ref().map(|name| {
                    if let Some(v) = var_map.get(name) { *v } else { self.pump.fresh() }
                });
                Ty::Record { fields: resolved_fields, rest: resolved_rest }
            }
            TypeExpr::Union(members) => Ty::Union(members.iter().map(|m| self.resolve_type_expr(m, var_map)).collect()),
            TypeExpr::Intersect(members) => {
                Ty::Intersect(members.iter().map(|m| self.resolve_type_expr(m, var_map)).collect())
            }
            TypeExpr::LitString(s) => Ty::LitString(s.clone()),
        }
    }
}

fn literal_type(lit: &Literal) -> Ty {
    match lit {
        Literal::Int(_) => Ty::int(),
        Literal::Float(_) => Ty::float(),
        Literal::Char(_) => Ty::char(),
        Literal::String(_) => Ty::string(),
        Literal::Bool(_) => Ty::bool(),
        Literal::Unit => Ty::unit(),
    }
}

fn substitute(ty: &Ty, mapping: &std::collections::BTreeMap<TyVar, Ty>) -> Ty {
    match ty {
        Ty::Var(v) => mapping.get(v).cloned().unwrap_or_else(|| ty.clone()),
        Ty::Con(name, args) => Ty::Con(name.clone(), args.iter().map(|a| substitute(a, mapping)).collect()),
        Ty::Alias(name, args) => Ty::Alias(name.clone(), args.iter().map(|a| substitute(a, mapping)).collect()),
        Ty::Arr(domains, range) => {
            Ty::Arr(domains.iter().map(|d| substitute(d, mapping)).collect(), Box::new(substitute(range, mapping)))
        }
        Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| substitute(e, mapping)).collect()),
        Ty::Record { fields, rest } => {
            Ty::Record { fields: fields.iter().map(|(k, v)| (k.clone(), substitute(v, mapping))).collect(), rest: *rest }
        }
        Ty::Union(members) => Ty::Union(members.iter().map(|m| substitute(m, mapping)).collect()),
        Ty::Intersect(members) => Ty::Intersect(members.iter().map(|m| substitute(m, mapping)).collect()),
        Ty::LitString(s) => Ty::LitString(s.clone()),
        Ty::Recursive { var, body } => Ty::Recursive { var: *var, body: Box::new(substitute(body, mapping)) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, ExprKind, Literal, Span};

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(kind, Span::DUMMY)
    }

    #[test]
    fn literal_addition_infers_int() {
        let mut env = TypeEnv::new();
        let mut inf = Inferencer::new(&mut env);
        let e = expr(ExprKind::Binary(
            BinOp::Add,
            Box::new(expr(ExprKind::Literal(Literal::Int(1)))),
            Box::new(expr(ExprKind::Literal(Literal::Int(2)))),
        ));
        let ty = inf.infer_expr(&e);
        assert_eq!(ty, Ty::int());
        assert!(!inf.diagnostics.has_errors());
    }

    #[test]
    fn unknown_identifier_is_reported_with_a_suggestion() {
        let mut env = TypeEnv::new();
        env.bind("length", Binding { span: Span::DUMMY, mutable: false, scheme: Scheme::monomorphic(Ty::int()) }).unwrap();
        let mut inf = Inferencer::new(&mut env);
        let e = expr(ExprKind::Var("lenght".to_owned()));
        inf.infer_expr(&e);
        assert_eq!(inf.diagnostics.errors.len(), 1);
        match &inf.diagnostics.errors[0] {
            TypeError::UnknownIdentifier { suggestions, .. } => assert_eq!(suggestions.first().unwrap(), "length"),
            other => panic!("expected UnknownIdentifier, got {other:?}"),
        }
    }

    #[test]
    fn if_branches_must_unify() {
        let mut env = TypeEnv::new();
        let mut inf = Inferencer::new(&mut env);
        let e = expr(ExprKind::If {
            cond: Box::new(expr(ExprKind::Literal(Literal::Bool(true)))),
            then: Box::new(expr(ExprKind::Literal(Literal::Int(1)))),
            otherwise: Box::new(expr(ExprKind::Literal(Literal::Bool(false)))),
        });
        inf.infer_expr(&e);
        assert!(inf.diagnostics.has_errors());
    }

    #[test]
    fn lambda_infers_an_arrow_type() {
        let mut env = TypeEnv::new();
        let mut inf = Inferencer::new(&mut env);
        let param = Param { name: "x".to_owned(), annotation: Some(TypeExpr::Con("Int".to_owned(), vec![])), span: Span::DUMMY };
        let e = expr(ExprKind::Lambda { params: vec![param], body: Box::new(expr(ExprKind::Var("x".to_owned()))) });
        let ty = inf.infer_expr(&e);
        assert_eq!(ty, Ty::Arr(vec![Ty::int()], Box::new(Ty::int())));
    }

    #[test]
    fn non_exhaustive_match_on_bool_is_reported() {
        let mut env = TypeEnv::new();
        let mut inf = Inferencer::new(&mut env);
        let arm = MatchArm { pattern: Pattern::Literal(Literal::Bool(true)), guard: None, body: expr(ExprKind::Literal(Literal::Int(1))) };
        let e = expr(ExprKind::Match { scrutinee: Box::new(expr(ExprKind::Literal(Literal::Bool(true)))), arms: vec![arm] });
        inf.infer_expr(&e);
        assert!(inf.diagnostics.errors.iter().any(|e| matches!(e, TypeError::NonExhaustivePatternMatch { .. })));
    }
}
