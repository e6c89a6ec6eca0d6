use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::context::{ctx_value, get_as, top, Context, ContextRef};
use crate::env::{self, Env, EnvRef};
use crate::error::JexError;
use crate::exp::Exp;
use crate::interp::{evaluator, Interp, Interpret};
use crate::kernel::{ensure_level, eval_level, EvalLevel};
use crate::parser::{JsonParser, FILE_NAME_KEY, MODULE_NAME_KEY};
use crate::prelude;

pub const MODULE_TABLE_KEY: &str = "module-table";
pub const CURRENT_MODULE_KEY: &str = "current-module";
pub const MODULE_LOADER_KEY: &str = "module-loader";
pub const PRELUDE_MODULE_NAME: &str = "prelude";

pub type ModuleRef = Arc<RwLock<Module>>;
pub type ModuleTable = Arc<RwLock<HashMap<String, ModuleRef>>>;

/// An import cell. Implicit (prelude-seeded) cells lose against
/// explicit imports; two implicit sources for one name poison the cell
/// with the ambiguous sentinel.
#[derive(Clone, Debug)]
pub struct ImportVal {
    pub value: Exp,
    pub explicit: bool,
}

/// Present only while a module's body is being evaluated; cleared when
/// loading completes.
#[derive(Debug)]
pub struct LoadingState {
    pub importing_stage: bool,
    /// export alias -> defined name
    pub export_names: HashMap<String, String>,
}

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub filename: String,
    pub import_values: HashMap<String, ImportVal>,
    pub export_values: HashMap<String, Exp>,
    pub loading: Option<LoadingState>,
}

impl Module {
    pub fn new(name: &str, filename: &str, import_values: HashMap<String, ImportVal>) -> Self {
        Self {
            name: name.to_string(),
            filename: filename.to_string(),
            import_values,
            export_values: HashMap::new(),
            loading: Some(LoadingState {
                importing_stage: true,
                export_names: HashMap::new(),
            }),
        }
    }

    /// A module that was never loaded from source, only installed: the
    /// prelude.
    pub fn loaded(name: &str, export_values: HashMap<String, Exp>) -> Self {
        Self {
            name: name.to_string(),
            filename: String::new(),
            import_values: HashMap::new(),
            export_values,
            loading: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loading.is_none()
    }

    pub fn finish_loading(&mut self) {
        self.loading = None;
    }
}

/// The process-wide table for one interpret root, living on the top
/// context frame so it survives child frames but not a chained pass's
/// protected copy. Installed lazily with the prelude pre-registered.
pub fn module_table(ctx: &ContextRef) -> ModuleTable {
    if let Some(table) = get_as::<ModuleTable>(ctx, MODULE_TABLE_KEY) {
        return table;
    }
    let table: ModuleTable = Arc::new(RwLock::new(HashMap::from([(
        PRELUDE_MODULE_NAME.to_string(),
        prelude::prelude_module(),
    )])));
    top(ctx)
        .write()
        .unwrap()
        .set(MODULE_TABLE_KEY, ctx_value(table.clone()));
    table
}

fn current_module(ctx: &ContextRef) -> Result<ModuleRef, JexError> {
    let name = get_as::<String>(ctx, CURRENT_MODULE_KEY)
        .ok_or_else(|| JexError::staging("not inside a module"))?;
    let table = module_table(ctx);
    let module = table.read().unwrap().get(&name).cloned();
    module.ok_or_else(|| JexError::internal(format!("current module {:?} is not in the table", name)))
}

fn module_loader(ctx: &ContextRef) -> Result<Arc<dyn ModuleLoader>, JexError> {
    get_as::<Arc<dyn ModuleLoader>>(ctx, MODULE_LOADER_KEY)
        .ok_or_else(|| JexError::internal("no module loader installed"))
}

/// Seed import cells from the prelude's exports, all implicit.
fn prelude_import_values(ctx: &ContextRef) -> Result<HashMap<String, ImportVal>, JexError> {
    let table = module_table(ctx);
    let prelude = table
        .read()
        .unwrap()
        .get(PRELUDE_MODULE_NAME)
        .cloned()
        .ok_or_else(|| JexError::internal("missing prelude module"))?;
    let guard = prelude.read().unwrap();
    if !guard.is_loaded() {
        return Err(JexError::internal("prelude module is not loaded"));
    }
    Ok(guard
        .export_values
        .iter()
        .map(|(name, value)| {
            (
                name.clone(),
                ImportVal {
                    value: value.clone(),
                    explicit: false,
                },
            )
        })
        .collect())
}

pub fn register(interp: &mut Interp) {
    interp.register_evaluator("module", Some(evaluator(module_eval)));
    interp.register_evaluator("import", Some(evaluator(import_eval)));
    interp.register_evaluator("export", Some(evaluator(export_eval)));
}

fn is_import(exp: &Exp) -> bool {
    matches!(exp, Exp::Redex(redex) if redex.name == "import")
}

fn map_string(entries: &im::HashMap<String, Exp>, key: &str) -> Result<String, JexError> {
    let value = entries
        .get(key)
        .ok_or_else(|| JexError::syntax(format!("module redex is missing {:?}", key)))?;
    Ok(value.as_str()?.to_string())
}

/// `module`: the loader hands us `{name, file, body}`; evaluate the
/// body in two stages (imports first, then everything else) and
/// resolve the export list against the module environment.
fn module_eval(
    ctx: &ContextRef,
    interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    if eval_level(ctx) != EvalLevel::Module {
        return Err(JexError::staging(format!(
            "cannot evaluate module at {}",
            eval_level(ctx)
        )));
    }

    let entries = exp.as_map_exp()?;
    let name = map_string(entries, "name")?;
    let filename = map_string(entries, "file")?;
    let body = entries
        .get("body")
        .ok_or_else(|| JexError::syntax("module redex is missing \"body\""))?
        .as_list_exp()?
        .to_vec();

    let table = module_table(ctx);
    if let Some(existing) = table.read().unwrap().get(&name).cloned() {
        return if existing.read().unwrap().is_loaded() {
            Ok(Exp::Null)
        } else {
            Err(JexError::circular_loading(name))
        };
    }

    let module = Arc::new(RwLock::new(Module::new(
        &name,
        &filename,
        prelude_import_values(ctx)?,
    )));
    table.write().unwrap().insert(name.clone(), module.clone());

    let body_ctx = Context::child_of(ctx, vec![(CURRENT_MODULE_KEY, ctx_value(name.clone()))]);
    for element in &body {
        let still_importing = module
            .read()
            .unwrap()
            .loading
            .as_ref()
            .map(|state| state.importing_stage)
            .unwrap_or(false);
        if still_importing && !is_import(element) {
            // The importing stage is over: install everything the
            // imports collected, ambiguous cells included, and only
            // then run the rest of the body.
            let mut guard = module.write().unwrap();
            for (local, cell) in &guard.import_values {
                env.write().unwrap().define(local, cell.value.clone());
            }
            if let Some(state) = guard.loading.as_mut() {
                state.importing_stage = false;
            }
        }
        interp.interpret(&body_ctx, element, env)?;
    }

    let export_names = {
        let guard = module.read().unwrap();
        guard
            .loading
            .as_ref()
            .map(|state| state.export_names.clone())
            .unwrap_or_default()
    };
    let mut export_values = HashMap::with_capacity(export_names.len());
    for (alias, defined) in export_names {
        let value = env
            .read()
            .unwrap()
            .get(&defined)
            .ok_or_else(|| JexError::name_not_found(defined.clone()))?;
        export_values.insert(alias, value);
    }
    {
        let mut guard = module.write().unwrap();
        guard.export_values = export_values;
        guard.finish_loading();
    }
    Ok(Exp::Null)
}

struct ImportItem {
    name: String,
    alias: Option<String>,
    explicit: bool,
}

impl ImportItem {
    fn local(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

fn parse_import_spec(spec: &Exp) -> Result<Vec<ImportItem>, JexError> {
    let items = spec.as_list_exp()?;
    items
        .iter()
        .map(|item| {
            let parts = item.as_list_exp()?;
            match parts {
                [name, explicit] => Ok(ImportItem {
                    name: name.as_str()?.to_string(),
                    alias: None,
                    explicit: explicit.as_bool()?,
                }),
                [name, alias, explicit] => Ok(ImportItem {
                    name: name.as_str()?.to_string(),
                    alias: Some(alias.as_str()?.to_string()),
                    explicit: explicit.as_bool()?,
                }),
                _ => Err(JexError::syntax(
                    "import spec items are [name, explicit] or [name, alias, explicit]",
                )),
            }
        })
        .collect()
}

/// Merge one imported binding into a module's import cells, resolving
/// conflicts: explicit beats implicit, two explicits clash, two
/// implicits poison the cell.
fn merge_import(
    cells: &mut HashMap<String, ImportVal>,
    local: &str,
    value: Exp,
    explicit: bool,
) -> Result<(), JexError> {
    match cells.get(local) {
        None => {
            cells.insert(local.to_string(), ImportVal { value, explicit });
        }
        Some(existing) => match (existing.explicit, explicit) {
            (true, true) => {
                return Err(JexError::ambiguous(format!(
                    "{} is explicitly imported twice",
                    local
                )))
            }
            (false, true) => {
                cells.insert(local.to_string(), ImportVal { value, explicit: true });
            }
            (true, false) => {}
            (false, false) => {
                cells.insert(
                    local.to_string(),
                    ImportVal {
                        value: Exp::Ambiguous,
                        explicit: false,
                    },
                );
            }
        },
    }
    Ok(())
}

/// `import`: load each requested module and route its exports either
/// straight into the environment (top level) or into the current
/// module's import cells (module level, importing stage only).
fn import_eval(
    ctx: &ContextRef,
    interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    let level = eval_level(ctx);
    if level != EvalLevel::Top && level != EvalLevel::Module {
        return Err(JexError::staging(format!(
            "cannot evaluate import at {}",
            level
        )));
    }

    let entries = exp.as_map_exp()?;
    if entries.is_empty() {
        return Err(JexError::syntax("empty import body"));
    }

    if level == EvalLevel::Module {
        let module = current_module(ctx)?;
        let guard = module.read().unwrap();
        let importing = guard
            .loading
            .as_ref()
            .map(|state| state.importing_stage)
            .unwrap_or(false);
        if !importing {
            return Err(JexError::staging(
                "import must be at the start of the module",
            ));
        }
    }

    let loader = module_loader(ctx)?;

    let mut module_names: Vec<&String> = entries.keys().collect();
    module_names.sort();
    let mut top_level_binds: HashMap<String, Exp> = HashMap::new();
    for module_name in module_names {
        let items = parse_import_spec(&entries[module_name])?;
        let target = loader.load(ctx, interp, module_name)?;
        let target = target.read().unwrap();
        for item in items {
            let value = target.export_values.get(&item.name).cloned().ok_or_else(|| {
                JexError::name_not_found(format!(
                    "no export {:?} in module {:?}",
                    item.name, module_name
                ))
            })?;
            if level == EvalLevel::Top {
                // Eager-reject rule: two bindings for one local name
                // within a single import form conflict.
                if top_level_binds.insert(item.local().to_string(), value).is_some() {
                    return Err(JexError::ambiguous(format!(
                        "{} is imported twice",
                        item.local()
                    )));
                }
            } else {
                let module = current_module(ctx)?;
                let mut guard = module.write().unwrap();
                merge_import(&mut guard.import_values, item.local(), value, item.explicit)?;
            }
        }
    }

    for (local, value) in top_level_binds {
        env.write().unwrap().define(&local, value);
    }
    Ok(Exp::Null)
}

/// `export`: record alias/defined-name pairs on the loading state;
/// values are resolved after the whole body ran.
fn export_eval(
    ctx: &ContextRef,
    _interp: &dyn Interpret,
    exp: &Exp,
    _env: &EnvRef,
) -> Result<Exp, JexError> {
    if eval_level(ctx) != EvalLevel::Module {
        return Err(JexError::staging(format!(
            "cannot evaluate export at {}",
            eval_level(ctx)
        )));
    }
    let module = current_module(ctx)?;
    let items = exp.as_list_exp()?.to_vec();

    let mut guard = module.write().unwrap();
    let state = guard
        .loading
        .as_mut()
        .ok_or_else(|| JexError::staging("export outside of a loading module"))?;
    for item in &items {
        let (defined, alias) = match item {
            Exp::Str(name) => (name.clone(), name.clone()),
            other => {
                let parts = other.as_list_exp()?;
                match parts {
                    [defined, alias] => {
                        (defined.as_str()?.to_string(), alias.as_str()?.to_string())
                    }
                    _ => {
                        return Err(JexError::syntax(
                            "export items are \"name\" or [name, alias]",
                        ))
                    }
                }
            }
        };
        if state.export_names.contains_key(&alias) {
            return Err(JexError::syntax(format!("duplicate export {:?}", alias)));
        }
        state.export_names.insert(alias, defined);
    }
    Ok(Exp::Null)
}

/// Resolves logical names against the filesystem: either
/// `<root>/<path>.jsonp` or `<root>/<path>/main.jsonp` under one of
/// the find paths, parsed with the module parser and evaluated at
/// module level.
pub struct FileModuleLoader {
    find_paths: RwLock<Vec<String>>,
    parser: JsonParser,
}

impl FileModuleLoader {
    pub fn new(find_paths: Vec<String>, parser: JsonParser) -> Self {
        Self {
            find_paths: RwLock::new(find_paths),
            parser,
        }
    }

    /// Logical module name to (canonical name, file path). A module
    /// addressed as `a/b/main` that resolves to a plain file collapses
    /// to the directory name `a/b`.
    fn normalize(&self, module_name: &str) -> Result<(String, PathBuf), JexError> {
        let parts: Vec<&str> = module_name.split('/').collect();
        if parts.is_empty() || parts.iter().any(|part| part.is_empty()) {
            return Err(JexError::syntax(format!(
                "invalid module name {:?}",
                module_name
            )));
        }
        let relative = parts.join("/");

        for root in self.find_paths.read().unwrap().iter() {
            let file = Path::new(root).join(format!("{}.jsonp", relative));
            if is_file(&file) {
                let name = if parts.len() > 1 && *parts.last().unwrap() == "main" {
                    parts[..parts.len() - 1].join("/")
                } else {
                    module_name.to_string()
                };
                return Ok((name, file));
            }
            let file = Path::new(root).join(&relative).join("main.jsonp");
            if is_file(&file) {
                return Ok((module_name.to_string(), file));
            }
        }

        Err(JexError::io(format!(
            "cannot find module {} in paths {:?}",
            module_name,
            self.find_paths.read().unwrap()
        )))
    }
}

fn is_file(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}

pub trait ModuleLoader: Send + Sync {
    fn load(
        &self,
        ctx: &ContextRef,
        interp: &dyn Interpret,
        name: &str,
    ) -> Result<ModuleRef, JexError>;

    /// Prepend roots to the module search. Loaders without a search
    /// path ignore this.
    fn add_paths(&self, _paths: Vec<String>) {}
}

/// Shared tail of both loaders: bail out or reuse via the table, then
/// evaluate the parsed module form at module level in a fresh
/// environment and pick up the record it registered.
fn load_parsed(
    ctx: &ContextRef,
    interp: &dyn Interpret,
    name: &str,
    exp: &Exp,
) -> Result<ModuleRef, JexError> {
    let module_ctx = ensure_level(ctx, EvalLevel::Module);
    let module_env = env::new_ref(Env::default());
    interp.interpret(&module_ctx, exp, &module_env)?;

    let table = module_table(ctx);
    let module = table.read().unwrap().get(name).cloned();
    module.ok_or_else(|| {
        JexError::internal(format!("module {:?} did not register itself", name))
    })
}

fn table_hit(ctx: &ContextRef, name: &str) -> Result<Option<ModuleRef>, JexError> {
    let table = module_table(ctx);
    let existing = table.read().unwrap().get(name).cloned();
    match existing {
        None => Ok(None),
        Some(module) => {
            if module.read().unwrap().is_loaded() {
                Ok(Some(module))
            } else {
                Err(JexError::circular_loading(name))
            }
        }
    }
}

impl ModuleLoader for FileModuleLoader {
    fn load(
        &self,
        ctx: &ContextRef,
        interp: &dyn Interpret,
        name: &str,
    ) -> Result<ModuleRef, JexError> {
        let (module_name, filename) = self.normalize(name)?;
        if let Some(module) = table_hit(ctx, &module_name)? {
            return Ok(module);
        }

        let file = File::open(&filename)
            .map_err(|e| JexError::io(format!("cannot open {}: {}", filename.display(), e)))?;
        let parse_ctx = Context::child_of(
            ctx,
            vec![
                (MODULE_NAME_KEY, ctx_value(module_name.clone())),
                (FILE_NAME_KEY, ctx_value(filename.display().to_string())),
            ],
        );
        let exp = self.parser.parse_module(&parse_ctx, BufReader::new(file))?;
        load_parsed(ctx, interp, &module_name, &exp)
    }

    fn add_paths(&self, paths: Vec<String>) {
        let mut guard = self.find_paths.write().unwrap();
        let existing = std::mem::take(&mut *guard);
        *guard = paths.into_iter().chain(existing).collect();
    }
}

/// An in-memory table of pre-parsed module forms, mainly for tests and
/// embedding.
#[derive(Default)]
pub struct MemoryModuleLoader {
    modules: HashMap<String, Exp>,
}

impl MemoryModuleLoader {
    pub fn new(modules: HashMap<String, Exp>) -> Self {
        Self { modules }
    }

    pub fn insert(&mut self, name: &str, module: Exp) {
        self.modules.insert(name.to_string(), module);
    }
}

impl ModuleLoader for MemoryModuleLoader {
    fn load(
        &self,
        ctx: &ContextRef,
        interp: &dyn Interpret,
        name: &str,
    ) -> Result<ModuleRef, JexError> {
        if let Some(module) = table_hit(ctx, name)? {
            return Ok(module);
        }
        let exp = self
            .modules
            .get(name)
            .cloned()
            .ok_or_else(|| JexError::io(format!("cannot find module {}", name)))?;
        load_parsed(ctx, interp, name, &exp)
    }
}
