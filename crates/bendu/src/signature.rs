//! The textual signature-file grammar (spec.md §6, "Signature file"): one
//! semicolon-terminated record per exported `let`/`fn`/`type`.
//!
//! Grounded on the teacher's general text-format modules (hand-written
//! `Display`/parse pairs with a dedicated error type, e.g. `signature.rs`'s
//! own argument-binding grammar) rather than a derive-based serde format —
//! the signature file is meant to be read by a human running `bendu dis`,
//! so it keeps the exact line shapes spec.md §6 specifies instead of a
//! generic structured encoding.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    bytecode::compiler::Export,
    error::CacheError,
    types::{Pump, Scheme, Ty, TyVar},
};

/// Renders one module's exports as the signature-file text (spec.md §6).
/// One line per export, in declaration order, each ending with `;`.
pub fn render(exports: &[Export]) -> String {
    let mut out = String::new();
    for export in exports {
        render_one(export, &mut out);
    }
    out
}

fn render_one(export: &Export, out: &mut String) {
    match export {
        Export::Let { name, mutable, scheme, frame_offset } => {
            let bang = if *mutable { "!" } else { "" };
            out.push_str(&format!("let {name}{bang}: {scheme} = {frame_offset};\n"));
        }
        Export::Fn { name, mutable, scheme, code_offset, frame_offset } => {
            let bang = if *mutable { "!" } else { "" };
            match frame_offset {
                Some(f) => out.push_str(&format!("fn {name}{bang}: {scheme} = {code_offset} {f};\n")),
                None => out.push_str(&format!("fn {name}{bang}: {scheme} = {code_offset};\n")),
            }
        }
        Export::Type { name, params, ctors } => {
            let params_text = if params.is_empty() { String::new() } else { format!("[{}]", params.join(", ")) };
            if ctors.is_empty() {
                out.push_str(&format!("type {name}{params_text};\n"));
            } else {
                let ctors_text = ctors.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>().join(" | ");
                out.push_str(&format!("type {name}{params_text} = {ctors_text};\n"));
            }
        }
    }
}

/// Parses a signature file back into [`Export`] records (spec.md §8,
/// "Bytecode round-trip": "disassembling then re-parsing the signature file
/// yields an equivalent `ScriptExports` structure").
///
/// `type` records don't carry constructor ids in the text form — a
/// reader only needs the ids to interpret `PUSH_CUSTOM`/pattern matches
/// against bytecode already compiled against them, which is exactly the
/// case the dependent-package path (`cache.rs`) exercises — so ids are
/// reconstructed as a fresh 0.. sequence per type, matching the order the
/// compiler originally assigned them within one ADT (`types_registry.rs`).
pub fn parse(text: &str, path: &str) -> Result<Vec<Export>, CacheError> {
    let mut exports = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line = line.strip_suffix(';').unwrap_or(line);
        exports.push(parse_line(line, path)?);
    }
    Ok(exports)
}

fn parse_line(line: &str, path: &str) -> Result<Export, CacheError> {
    let malformed = |detail: &str| CacheError::MalformedSignature { path: path.to_owned(), detail: detail.to_owned() };

    if let Some(rest) = line.strip_prefix("let ") {
        let (name_part, rest) = rest.split_once(':').ok_or_else(|| malformed("missing `:` in let record"))?;
        let (scheme, offset) = rest.split_once('=').ok_or_else(|| malformed("missing `=` in let record"))?;
        let (name, mutable) = strip_bang(name_part.trim());
        let frame_offset = offset.trim().parse().map_err(|_| malformed("non-numeric frame offset"))?;
        return Ok(Export::Let { name, mutable, scheme: scheme.trim().to_owned(), frame_offset });
    }

    if let Some(rest) = line.strip_prefix("fn ") {
        let (name_part, rest) = rest.split_once(':').ok_or_else(|| malformed("missing `:` in fn record"))?;
        let (scheme, offsets) = rest.split_once('=').ok_or_else(|| malformed("missing `=` in fn record"))?;
        let (name, mutable) = strip_bang(name_part.trim());
        let mut parts = offsets.split_whitespace();
        let code_offset = parts.next().ok_or_else(|| malformed("missing code offset"))?;
        let code_offset = code_offset.parse().map_err(|_| malformed("non-numeric code offset"))?;
        let frame_offset = parts.next().map(|s| s.parse()).transpose().map_err(|_| malformed("non-numeric frame offset"))?;
        return Ok(Export::Fn { name, mutable, scheme: scheme.trim().to_owned(), code_offset, frame_offset });
    }

    if let Some(rest) = line.strip_prefix("type ") {
        let (head, ctors_text) = rest.split_once('=').map(|(h, c)| (h, Some(c))).unwrap_or((rest, None));
        let head = head.trim();
        let (name, params) = match head.split_once('[') {
            Some((name, rest)) => {
                let params_text = rest.strip_suffix(']').ok_or_else(|| malformed("unterminated type parameter list"))?;
                let params = params_text.split(',').map(|p| p.trim().to_owned()).filter(|p| !p.is_empty()).collect();
                (name.trim().to_owned(), params)
            }
            None => (head.to_owned(), Vec::new()),
        };
        let ctors = ctors_text
            .map(|text| {
                text.split('|')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .enumerate()
                    .map(|(id, n)| (n.to_owned(), id as u32))
                    .collect()
            })
            .unwrap_or_default();
        return Ok(Export::Type { name, params, ctors });
    }

    Err(malformed("unrecognized record kind"))
}

fn strip_bang(name: &str) -> (String, bool) {
    match name.strip_suffix('!') {
        Some(base) => (base.to_owned(), true),
        None => (name.to_owned(), false),
    }
}

/// Re-hydrates a scheme's rendered text (spec.md §4.4: "Signature reading is
/// parsed by a small grammar that re-hydrates schemes into the type
/// system") back into a [`Scheme`]. This is the inverse of `scheme_to_text`
/// in the bytecode compiler: quantified variables round-trip as bare
/// lowercase identifiers (the same convention `scheme_to_text` renders them
/// with), which this promotes back to fresh [`TyVar`]s on the way in.
pub fn parse_scheme(text: &str, path: &str) -> Result<Scheme, CacheError> {
    let malformed = |detail: &str| CacheError::MalformedSignature { path: path.to_owned(), detail: detail.to_owned() };
    let tokens = scheme_text::tokenize(text).map_err(|e| malformed(&e))?;
    let mut cursor = scheme_text::Cursor::new(&tokens);
    let raw = scheme_text::parse_union(&mut cursor).map_err(|e| malformed(&e))?;
    if !cursor.at_end() {
        return Err(malformed("trailing tokens after scheme"));
    }
    let mut pump = Pump::new();
    let mut quantified = Vec::new();
    let mut assigned: AHashMap<String, TyVar> = AHashMap::new();
    let body = scheme_text::promote_vars(raw, &mut pump, &mut assigned, &mut quantified);
    Ok(Scheme { quantified, body })
}

/// The scheme-text grammar's tokenizer and recursive-descent parser. Kept
/// as a private submodule since nothing outside `parse_scheme` needs these
/// pieces individually.
mod scheme_text {
    use super::{IndexMap, Ty};

    #[derive(Debug, Clone, PartialEq)]
    pub(super) enum Tok {
        Ident(String),
        Str(String),
        Arrow,
        LParen,
        RParen,
        LBrace,
        RBrace,
        LBracket,
        RBracket,
        Comma,
        Colon,
        Pipe,
        Amp,
        Star,
        Dot,
    }

    pub(super) fn tokenize(text: &str) -> Result<Vec<Tok>, String> {
        let chars: Vec<char> = text.chars().collect();
        let mut toks = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            match c {
                c if c.is_whitespace() => i += 1,
                '(' => { toks.push(Tok::LParen); i += 1; }
                ')' => { toks.push(Tok::RParen); i += 1; }
                '{' => { toks.push(Tok::LBrace); i += 1; }
                '}' => { toks.push(Tok::RBrace); i += 1; }
                '[' => { toks.push(Tok::LBracket); i += 1; }
                ']' => { toks.push(Tok::RBracket); i += 1; }
                ',' => { toks.push(Tok::Comma); i += 1; }
                ':' => { toks.push(Tok::Colon); i += 1; }
                '|' => { toks.push(Tok::Pipe); i += 1; }
                '&' => { toks.push(Tok::Amp); i += 1; }
                '*' => { toks.push(Tok::Star); i += 1; }
                '.' => { toks.push(Tok::Dot); i += 1; }
                '-' if chars.get(i + 1) == Some(&'>') => { toks.push(Tok::Arrow); i += 2; }
                '"' => {
                    let mut s = String::new();
                    i += 1;
                    while i < chars.len() && chars[i] != '"' {
                        if chars[i] == '\\' && i + 1 < chars.len() {
                            i += 1;
                        }
                        s.push(chars[i]);
                        i += 1;
                    }
                    if i >= chars.len() {
                        return Err("unterminated string literal".to_owned());
                    }
                    i += 1;
                    toks.push(Tok::Str(s));
                }
                c if c.is_alphanumeric() || c == '_' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    toks.push(Tok::Ident(chars[start..i].iter().collect()));
                }
                other => return Err(format!("unexpected character `{other}` in scheme text")),
            }
        }
        Ok(toks)
    }

    pub(super) struct Cursor<'a> {
        toks: &'a [Tok],
        pos: usize,
    }

    impl<'a> Cursor<'a> {
        pub(super) fn new(toks: &'a [Tok]) -> Self {
            Self { toks, pos: 0 }
        }

        pub(super) fn at_end(&self) -> bool {
            self.pos >= self.toks.len()
        }

        fn peek(&self) -> Option<&Tok> {
            self.toks.get(self.pos)
        }

        fn bump(&mut self) -> Option<&Tok> {
            let t = self.toks.get(self.pos);
            self.pos += 1;
            t
        }

        fn eat(&mut self, tok: &Tok) -> bool {
            if self.peek() == Some(tok) {
                self.pos += 1;
                true
            } else {
                false
            }
        }

        fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), String> {
            if self.eat(tok) { Ok(()) } else { Err(format!("expected {what}")) }
        }
    }

    pub(super) fn parse_union(c: &mut Cursor) -> Result<Ty, String> {
        let mut members = vec![parse_intersect(c)?];
        while c.eat(&Tok::Pipe) {
            members.push(parse_intersect(c)?);
        }
        Ok(if members.len() == 1 { members.pop().expect("just pushed") } else { Ty::Union(members) })
    }

    fn parse_intersect(c: &mut Cursor) -> Result<Ty, String> {
        let mut members = vec![parse_tuple(c)?];
        while c.eat(&Tok::Amp) {
            members.push(parse_tuple(c)?);
        }
        Ok(if members.len() == 1 { members.pop().expect("just pushed") } else { Ty::Intersect(members) })
    }

    fn parse_tuple(c: &mut Cursor) -> Result<Ty, String> {
        let mut elems = vec![parse_atom(c)?];
        while c.eat(&Tok::Star) {
            elems.push(parse_atom(c)?);
        }
        Ok(if elems.len() == 1 { elems.pop().expect("just pushed") } else { Ty::Tuple(elems) })
    }

    fn parse_atom(c: &mut Cursor) -> Result<Ty, String> {
        match c.peek() {
            Some(Tok::LParen) => {
                c.bump();
                let mut domains = Vec::new();
                if !c.eat(&Tok::RParen) {
                    domains.push(parse_union(c)?);
                    while c.eat(&Tok::Comma) {
                        domains.push(parse_union(c)?);
                    }
                    c.expect(&Tok::RParen, "`)` to close a function type's domains")?;
                }
                c.expect(&Tok::Arrow, "`->` after a function type's domains")?;
                let range = parse_atom(c)?;
                Ok(Ty::Arr(domains, Box::new(range)))
            }
            Some(Tok::LBrace) => {
                c.bump();
                let mut fields = IndexMap::new();
                let mut rest = None;
                if !c.eat(&Tok::RBrace) {
                    loop {
                        let name = match c.bump() {
                            Some(Tok::Ident(n)) => n.clone(),
                            _ => return Err("expected a field name in a record type".to_owned()),
                        };
                        c.expect(&Tok::Colon, "`:` after a record field name")?;
                        let ty = parse_union(c)?;
                        fields.insert(name, ty);
                        if c.eat(&Tok::Comma) {
                            continue;
                        }
                        break;
                    }
                    if c.eat(&Tok::Pipe) {
                        match c.bump() {
                            Some(Tok::Ident(n)) => rest = Some(parse_raw_tyvar(n)?),
                            _ => return Err("expected a row variable after `|` in a record type".to_owned()),
                        }
                    }
                    c.expect(&Tok::RBrace, "`}` to close a record type")?;
                }
                Ok(Ty::Record { fields, rest })
            }
            Some(Tok::Str(_)) => {
                let Some(Tok::Str(s)) = c.bump().cloned() else { unreachable!() };
                Ok(Ty::LitString(s))
            }
            Some(Tok::Ident(n)) if n == "rec" => {
                c.bump();
                let var = match c.bump() {
                    Some(Tok::Ident(n)) => parse_raw_tyvar(n)?,
                    _ => return Err("expected a type variable after `rec`".to_owned()),
                };
                c.expect(&Tok::Dot, "`.` after a `rec` binder")?;
                let body = parse_union(c)?;
                Ok(Ty::Recursive { var, body: Box::new(body) })
            }
            Some(Tok::Ident(_)) => {
                let Some(Tok::Ident(name)) = c.bump().cloned() else { unreachable!() };
                let mut args = Vec::new();
                if c.eat(&Tok::LBracket) {
                    args.push(parse_union(c)?);
                    while c.eat(&Tok::Comma) {
                        args.push(parse_union(c)?);
                    }
                    c.expect(&Tok::RBracket, "`]` to close a type's argument list")?;
                }
                Ok(Ty::Con(name, args))
            }
            _ => Err("expected a type".to_owned()),
        }
    }

    /// Parses `tN`-shaped identifiers (the `Display` form of a raw, non-
    /// quantified `TyVar`, e.g. a `rec` binder) back into a [`TyVar`].
    fn parse_raw_tyvar(ident: &str) -> Result<crate::types::TyVar, String> {
        ident
            .strip_prefix('t')
            .and_then(|rest| rest.parse().ok())
            .map(crate::types::TyVar)
            .ok_or_else(|| format!("expected a type variable, found `{ident}`"))
    }

    /// Walks a freshly parsed type, promoting every bare lowercase
    /// identifier (the quantified-variable convention `scheme_to_text`
    /// renders with) to a fresh [`TyVar`], collecting the set into
    /// `quantified` in first-appearance order.
    pub(super) fn promote_vars(
        ty: Ty,
        pump: &mut crate::types::Pump,
        assigned: &mut super::AHashMap<String, crate::types::TyVar>,
        quantified: &mut Vec<crate::types::TyVar>,
    ) -> Ty {
        match ty {
            Ty::Con(name, args) if args.is_empty() && name.chars().next().is_some_and(char::is_lowercase) => {
                let var = *assigned.entry(name).or_insert_with(|| {
                    let v = pump.fresh();
                    quantified.push(v);
                    v
                });
                Ty::Var(var)
            }
            Ty::Con(name, args) => {
                Ty::Con(name, args.into_iter().map(|a| promote_vars(a, pump, assigned, quantified)).collect())
            }
            Ty::Alias(name, args) => {
                Ty::Alias(name, args.into_iter().map(|a| promote_vars(a, pump, assigned, quantified)).collect())
            }
            Ty::Arr(domains, range) => Ty::Arr(
                domains.into_iter().map(|d| promote_vars(d, pump, assigned, quantified)).collect(),
                Box::new(promote_vars(*range, pump, assigned, quantified)),
            ),
            Ty::Tuple(elems) => Ty::Tuple(elems.into_iter().map(|e| promote_vars(e, pump, assigned, quantified)).collect()),
            Ty::Record { fields, rest } => Ty::Record {
                fields: fields.into_iter().map(|(k, v)| (k, promote_vars(v, pump, assigned, quantified))).collect(),
                rest,
            },
            Ty::Union(members) => Ty::Union(members.into_iter().map(|m| promote_vars(m, pump, assigned, quantified)).collect()),
            Ty::Intersect(members) => {
                Ty::Intersect(members.into_iter().map(|m| promote_vars(m, pump, assigned, quantified)).collect())
            }
            other @ (Ty::Var(_) | Ty::LitString(_) | Ty::Recursive { .. }) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_scheme_with_a_quantified_variable_round_trips() {
        let scheme = Scheme { quantified: vec![TyVar(0)], body: Ty::Arr(vec![Ty::Var(TyVar(0))], Box::new(Ty::Var(TyVar(0)))) };
        let text = crate::bytecode::compiler::scheme_to_text(&scheme);
        let parsed = parse_scheme(&text, "test").unwrap();
        assert_eq!(parsed.quantified.len(), 1);
        assert_eq!(parsed.body, Ty::Arr(vec![Ty::Var(parsed.quantified[0])], Box::new(Ty::Var(parsed.quantified[0]))));
    }

    #[test]
    fn a_monomorphic_scheme_round_trips() {
        let scheme = Scheme::monomorphic(Ty::con(crate::types::INT));
        let text = crate::bytecode::compiler::scheme_to_text(&scheme);
        let parsed = parse_scheme(&text, "test").unwrap();
        assert_eq!(parsed, scheme);
    }

    #[test]
    fn a_let_record_round_trips() {
        let exports = vec![Export::Let { name: "answer".to_owned(), mutable: false, scheme: "Int".to_owned(), frame_offset: 3 }];
        let text = render(&exports);
        assert_eq!(text, "let answer: Int = 3;\n");
        let parsed = parse(&text, "test").unwrap();
        assert_eq!(parsed, exports);
    }

    #[test]
    fn a_mutable_fn_record_round_trips() {
        let exports =
            vec![Export::Fn { name: "inc".to_owned(), mutable: true, scheme: "Int -> Int".to_owned(), code_offset: 5, frame_offset: Some(0) }];
        let text = render(&exports);
        assert_eq!(text, "fn inc!: Int -> Int = 5 0;\n");
        let parsed = parse(&text, "test").unwrap();
        assert_eq!(parsed, exports);
    }

    #[test]
    fn a_type_record_with_ctors_round_trips() {
        let exports = vec![Export::Type {
            name: "Option".to_owned(),
            params: vec!["a".to_owned()],
            ctors: vec![("Some".to_owned(), 0), ("None".to_owned(), 1)],
        }];
        let text = render(&exports);
        assert_eq!(text, "type Option[a] = Some | None;\n");
        let parsed = parse(&text, "test").unwrap();
        assert_eq!(parsed, exports);
    }

    #[test]
    fn a_malformed_line_reports_the_path() {
        let err = parse("not a record", "bad.sig").unwrap_err();
        assert!(matches!(err, CacheError::MalformedSignature { path, .. } if path == "bad.sig"));
    }
}
