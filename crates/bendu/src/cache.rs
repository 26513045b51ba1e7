//! On-disk package cache (spec.md §4.4 "Package Cache").
//!
//! No direct teacher analogue exists — the teacher ships Python source
//! files straight to its interpreter, with no compiled-artifact cache of
//! its own — so this follows spec.md's contract directly, in the same
//! small-hand-written-module-plus-dedicated-error-type shape the other
//! "no teacher analogue" pieces of this pipeline use (`loader.rs`,
//! `package.rs`). It also owns the eager, leaves-first dependency-DAG
//! resolution `package.rs`'s `PackageTable` doc comment describes: loading
//! every import before a package's own init block runs turns the VM's
//! `CALL_PACKAGE`/`LOAD_PACKAGE`/`STORE_PACKAGE` into plain table lookups.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use ahash::AHashMap;

use crate::{
    ast::{Item, Module},
    bytecode::{Code, Compiler, CompiledModule, Export, Vm},
    env::TypeEnv,
    error::{BenduError, CacheError, CompileError},
    heap::Heap,
    infer::Inferencer,
    intern::Interns,
    loader::{self, RawImage},
    package::{LoadedPackage, PackageTable},
    signature,
    tracer::VmTracer,
};

/// One recorded dependency timestamp (spec.md §6 "Dependency file": one
/// line per dependency, `<source-id> <last-modified-milliseconds>`).
#[derive(Debug, Clone, PartialEq)]
struct DependencyRecord {
    source_id: String,
    modified_ms: u128,
}

fn io_err(path: &Path, e: std::io::Error) -> CacheError {
    CacheError::Io { path: path.display().to_string(), detail: e.to_string() }
}

fn modified_ms(meta: &fs::Metadata) -> Result<u128, CacheError> {
    let detail_err = |detail: String| CacheError::Io { path: String::new(), detail };
    let modified = meta.modified().map_err(|e| detail_err(e.to_string()))?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).map_err(|e| detail_err(e.to_string()))?;
    Ok(since_epoch.as_millis())
}

fn read_dependency_file(path: &Path) -> Result<Vec<DependencyRecord>, CacheError> {
    let text = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let malformed = |detail: &str| CacheError::MalformedDependencyFile { path: path.display().to_string(), detail: detail.to_owned() };
    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (source_id, ms) = line.rsplit_once(' ').ok_or_else(|| malformed("missing timestamp column"))?;
        let modified_ms = ms.parse().map_err(|_| malformed("non-numeric timestamp"))?;
        records.push(DependencyRecord { source_id: source_id.to_owned(), modified_ms });
    }
    Ok(records)
}

fn write_dependency_file(path: &Path, records: &[DependencyRecord]) -> Result<(), CacheError> {
    let mut text = String::new();
    for r in records {
        text.push_str(&format!("{} {}\n", r.source_id, r.modified_ms));
    }
    fs::write(path, text).map_err(|e| io_err(path, e))
}

/// Owns the cache root (spec.md §9, "Global state": "the cache root" is one
/// of the two process-wide components, threaded through as a context
/// parameter rather than reached for as a global).
#[derive(Debug, Clone)]
pub struct PackageCache {
    root: PathBuf,
}

impl PackageCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Reads the cache root from `$HOME/.bendu` (spec.md §6, CLI contract:
    /// "Environment variable `HOME` locates the cache root").
    pub fn from_env() -> Result<Self, CacheError> {
        let home = std::env::var("HOME")
            .map_err(|_| CacheError::Io { path: "$HOME".to_owned(), detail: "environment variable not set".to_owned() })?;
        Ok(Self::new(PathBuf::from(home).join(".bendu")))
    }

    pub fn entry_for(&self, source: impl AsRef<Path>) -> Result<CacheEntry<'_>, CacheError> {
        let source = source.as_ref();
        let absolute = fs::canonicalize(source).map_err(|e| io_err(source, e))?;
        Ok(CacheEntry { cache: self, source: absolute })
    }
}

/// `entryFor(source)`'s result: one source file's compiled-artifact paths
/// and cache operations (spec.md §4.4 "Contract").
pub struct CacheEntry<'c> {
    cache: &'c PackageCache,
    source: PathBuf,
}

impl<'c> CacheEntry<'c> {
    pub fn script(&self) -> &Path {
        &self.source
    }

    pub fn source_id(&self) -> String {
        self.source.display().to_string()
    }

    /// `<user-cache-root>/<absolute-source-parent>` (spec.md §4.4).
    fn cache_dir(&self) -> PathBuf {
        let parent = self.source.parent().unwrap_or_else(|| Path::new("/"));
        let relative = parent.strip_prefix("/").unwrap_or(parent);
        self.cache.root.join(relative)
    }

    fn stem(&self) -> String {
        self.source.file_stem().and_then(|s| s.to_str()).unwrap_or("module").to_owned()
    }

    pub fn signature_file(&self) -> PathBuf {
        self.cache_dir().join(format!("{}.bsig", self.stem()))
    }

    pub fn byte_code_file(&self) -> PathBuf {
        self.cache_dir().join(format!("{}.bbc", self.stem()))
    }

    fn dependency_file(&self) -> PathBuf {
        self.cache_dir().join(format!("{}.bdep", self.stem()))
    }

    /// Resolves an import path against this source's directory, forming
    /// the lazy dependency DAG (spec.md §4.4, "`relativeEntry`").
    pub fn relative_entry(&self, import_path: &str) -> Result<CacheEntry<'c>, CacheError> {
        let parent = self.source.parent().unwrap_or_else(|| Path::new("."));
        let mut target = parent.join(import_path);
        if target.extension().is_none() {
            target.set_extension("bendu");
        }
        let absolute = fs::canonicalize(&target).map_err(|e| io_err(&target, e))?;
        Ok(CacheEntry { cache: self.cache, source: absolute })
    }

    /// Fresh iff the dependency file exists, every recorded timestamp
    /// matches the file system, and every dependency's bytecode exists
    /// (spec.md §4.4, "`upToDate`").
    pub fn up_to_date(&self) -> Result<bool, CacheError> {
        let dep_file = self.dependency_file();
        if !dep_file.exists() || !self.byte_code_file().exists() || !self.signature_file().exists() {
            return Ok(false);
        }
        for dep in read_dependency_file(&dep_file)? {
            let path = PathBuf::from(&dep.source_id);
            let Ok(meta) = fs::metadata(&path) else { return Ok(false) };
            if modified_ms(&meta)? != dep.modified_ms {
                return Ok(false);
            }
            if dep.source_id != self.source_id() {
                let dep_entry = CacheEntry { cache: self.cache, source: path };
                if !dep_entry.byte_code_file().exists() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    pub fn read_signature(&self) -> Result<Vec<Export>, CacheError> {
        let path = self.signature_file();
        let text = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        signature::parse(&text, &path.display().to_string())
    }

    /// Recursively gathers every source this entry transitively depends on,
    /// including itself (spec.md §4.4: "the cache thus forms a lazy DAG").
    pub fn include_dependencies(&self, deps: &mut HashSet<String>) -> Result<(), CacheError> {
        if !deps.insert(self.source_id()) {
            return Ok(());
        }
        for dep in read_dependency_file(&self.dependency_file())? {
            if dep.source_id == self.source_id() {
                continue;
            }
            let entry = CacheEntry { cache: self.cache, source: PathBuf::from(&dep.source_id) };
            entry.include_dependencies(deps)?;
        }
        Ok(())
    }

    /// Invokes inference then bytecode emission and persists the three
    /// artifacts on success; nothing is written on failure (spec.md §4.4,
    /// "`compile`"). Each `import` item must already have an up-to-date
    /// cache entry — recompiling a stale import from scratch would need its
    /// parsed AST, which this implementation does not produce (the
    /// lexer/parser is an external collaborator, spec.md §1).
    pub fn compile(&self, module: &Module) -> Result<Vec<Export>, BenduError> {
        let dir = self.cache_dir();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let mut type_env = TypeEnv::new();
        let mut inferencer = Inferencer::new(&mut type_env);
        for item in &module.items {
            let Item::Import(import) = item else { continue };
            let dep_entry = self.relative_entry(&import.path)?;
            if !dep_entry.up_to_date()? {
                return Err(BenduError::Compile(CompileError::UnresolvedImport { path: import.path.clone(), span: import.span }));
            }
            let exports = dep_entry.read_signature()?;
            let mut schemes = AHashMap::new();
            let sig_path = dep_entry.signature_file().display().to_string();
            for export in &exports {
                if let Export::Let { name, scheme, .. } | Export::Fn { name, scheme, .. } = export {
                    schemes.insert(name.clone(), signature::parse_scheme(scheme, &sig_path)?);
                }
            }
            inferencer.provide_package_signature(import.path.clone(), schemes);
        }

        let module_types = inferencer.infer_module(module);
        if inferencer.diagnostics.has_errors() {
            return Err(BenduError::Type(inferencer.diagnostics.errors.clone()));
        }
        let expr_types = inferencer.expr_types.clone();
        let compiler = Compiler::new(&expr_types, &type_env.adts);
        let compiled: CompiledModule = compiler.compile_module(module, &module_types)?;

        fs::write(self.signature_file(), signature::render(&compiled.exports)).map_err(|e| io_err(&self.signature_file(), e))?;
        let image = RawImage { imports: compiled.imports.clone(), code: compiled.code.clone() };
        fs::write(self.byte_code_file(), loader::write(&image)).map_err(|e| io_err(&self.byte_code_file(), e))?;

        let mut deps = vec![DependencyRecord {
            source_id: self.source_id(),
            modified_ms: modified_ms(&fs::metadata(&self.source).map_err(|e| io_err(&self.source, e))?)?,
        }];
        for import_path in &compiled.imports {
            let dep_entry = self.relative_entry(import_path)?;
            let meta = fs::metadata(dep_entry.script()).map_err(|e| io_err(dep_entry.script(), e))?;
            deps.push(DependencyRecord { source_id: dep_entry.source_id(), modified_ms: modified_ms(&meta)? });
        }
        write_dependency_file(&self.dependency_file(), &deps)?;

        Ok(compiled.exports)
    }

    /// Eagerly loads this package and every package it transitively
    /// imports, leaves first, executing each one's init block to
    /// materialize its frame (spec.md §4.5 "Package loading"). See the
    /// Open Question note on [`crate::package::PackageTable`] for why this
    /// resolves the whole DAG up front rather than lazily, as spec.md's
    /// prose literally describes.
    pub fn load<Tr: VmTracer + Default>(&self, heap: &mut Heap, interns: &mut Interns) -> Result<LoadedPackage, BenduError> {
        let mut loaded: HashMap<String, LoadedPackage> = HashMap::new();
        self.load_into::<Tr>(heap, interns, &mut loaded)
    }

    fn load_into<Tr: VmTracer + Default>(
        &self,
        heap: &mut Heap,
        interns: &mut Interns,
        loaded: &mut HashMap<String, LoadedPackage>,
    ) -> Result<LoadedPackage, BenduError> {
        if let Some(existing) = loaded.get(&self.source_id()) {
            return Ok(existing.clone());
        }
        let bc_path = self.byte_code_file();
        let bytes = fs::read(&bc_path).map_err(|e| io_err(&bc_path, e))?;
        let image = loader::parse(&bytes)?;

        let mut imports = Vec::with_capacity(image.imports.len());
        for import_source_id in &image.imports {
            let dep_entry = CacheEntry { cache: self.cache, source: PathBuf::from(import_source_id) };
            imports.push(dep_entry.load_into::<Tr>(heap, interns, loaded)?);
        }

        let table = PackageTable::new(imports);
        let mut vm = Vm::with_imports(heap, interns, &table, Tr::default());
        let (_value, frame) = vm.run_package(&image.code)?;
        vm.finish().on_package_load(&self.source_id());

        let loaded_package = LoadedPackage { source_id: self.source_id(), code: image.code, frame };
        loaded.insert(self.source_id(), loaded_package.clone());
        Ok(loaded_package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bendu-cache-test-{name}-{:p}", &name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn a_missing_dependency_file_is_never_up_to_date() {
        let dir = temp_dir("missing-dep");
        let source = dir.join("a.bendu");
        fs::write(&source, "let x = 1;").unwrap();
        let cache = PackageCache::new(dir.join(".bendu-cache"));
        let entry = cache.entry_for(&source).unwrap();
        assert!(!entry.up_to_date().unwrap());
    }

    #[test]
    fn compiling_then_up_to_date_reports_fresh() {
        let dir = temp_dir("compile-fresh");
        let source = dir.join("a.bendu");
        fs::write(&source, "let x = 1;").unwrap();
        let cache = PackageCache::new(dir.join(".bendu-cache"));
        let entry = cache.entry_for(&source).unwrap();

        let module = Module {
            items: vec![Item::Let(crate::ast::LetDecl {
                name: "x".to_owned(),
                mutable: false,
                public: true,
                recursive: false,
                annotation: None,
                value: crate::ast::Expr::new(
                    crate::ast::ExprKind::Literal(crate::ast::Literal::Int(1)),
                    crate::ast::Span::DUMMY,
                ),
                span: crate::ast::Span::DUMMY,
            })],
        };
        entry.compile(&module).unwrap();
        assert!(entry.up_to_date().unwrap());

        let exports = entry.read_signature().unwrap();
        assert_eq!(exports.len(), 1);
    }
}
