use std::sync::Arc;

use jex_core::context::{ctx_value, Context, ContextRef};
use jex_core::error::JexError;
use jex_core::exp::Exp;
use jex_core::kernel::{new_kernel_interp, EvalLevel, EVAL_LEVEL_KEY};
use jex_core::module::{
    module_table, MemoryModuleLoader, ModuleLoader, MODULE_LOADER_KEY,
};
use jex_core::parser::{JsonParser, MODULE_NAME_KEY};
use jex_core::repl::Repl;

const FACT_MODULE: &str = r#"
{"def": {
    "factRec": {"func": [["n"],
               {"if": [["<=", "n", 0],
                       1,
                       ["*", "n", ["factRec", ["-", "n", 1]]]]}
        ]},
    "factIter": {"func": [["n", "a"],
        {"if": [["<=", "n", 0],
                "a",
                ["factIter", ["-", "n", 1], ["*", "n", "a"]]]}
        ]}
}}

{"export": ["factRec", "factIter"]}"#;

const FACT2_MODULE: &str = r#"
{"import": {"fact": ["factIter"]}}

{"def": {"fact": {"func": [["n"], ["factIter", "n", 1]]}}}

{"export": ["fact"]}"#;

fn module_exp(name: &str, source: &str) -> Exp {
    let parser = JsonParser::kernel();
    let ctx = Context::root(vec![(MODULE_NAME_KEY, ctx_value(name.to_string()))]);
    parser.parse_module_source(&ctx, source).unwrap()
}

fn repl_with(modules: &[(&str, &str)]) -> Repl {
    let mut loader = MemoryModuleLoader::default();
    for (name, source) in modules {
        loader.insert(name, module_exp(name, source));
    }
    Repl::new(JsonParser::kernel(), new_kernel_interp(), Arc::new(loader))
}

fn standard_repl() -> Repl {
    repl_with(&[
        ("fact", FACT_MODULE),
        ("fact2", FACT2_MODULE),
        (
            "main",
            r#"
            {"import": {"fact2": ["fact"]}}
            {"def": {"result": ["fact", 6]}}
            {"export": ["result"]}"#,
        ),
    ])
}

fn eval(repl: &Repl, source: &str) -> Result<Exp, JexError> {
    let exp = repl.parse_source(source)?;
    repl.eval_interactive(&exp)
}

#[test]
fn import_and_call_across_modules() {
    let repl = standard_repl();
    let out = eval(
        &repl,
        r#"{"begin": [
            {"import": {"fact2": ["fact"]}},
            ["fact", 6]
        ]}"#,
    )
    .unwrap();
    assert_eq!(out, Exp::Number(720.0));
}

#[test]
fn import_from_two_modules_at_once() {
    let repl = standard_repl();
    let out = eval(
        &repl,
        r#"{"begin": [
            {"import": {"fact2": ["fact"], "fact": ["factRec"]}},
            ["+", ["fact", 6], ["factRec", 5]]
        ]}"#,
    )
    .unwrap();
    assert_eq!(out, Exp::Number(840.0));
}

#[test]
fn import_with_alias() {
    let repl = standard_repl();
    let out = eval(
        &repl,
        r#"{"begin": [
            {"import": {"fact2": [["fact", "factorial"]]}},
            ["factorial", 5]
        ]}"#,
    )
    .unwrap();
    assert_eq!(out, Exp::Number(120.0));
}

#[test]
fn export_with_alias() {
    let repl = repl_with(&[
        ("fact", FACT_MODULE),
        (
            "short",
            r#"
            {"import": {"fact": ["factIter"]}}
            {"export": [["factIter", "fi"]]}"#,
        ),
    ]);
    let out = eval(
        &repl,
        r#"{"begin": [
            {"import": {"short": ["fi"]}},
            ["fi", 4, 1]
        ]}"#,
    )
    .unwrap();
    assert_eq!(out, Exp::Number(24.0));
}

#[test]
fn batch_mode_loads_a_module() {
    let repl = standard_repl();
    repl.eval_batch("main").unwrap();
}

#[test]
fn modules_load_once_per_root() {
    let repl = standard_repl();
    // fact is loaded both directly and through fact2 within one root
    // context; the second request reuses the table entry.
    let out = eval(
        &repl,
        r#"{"begin": [
            {"import": {"fact": ["factIter"], "fact2": ["fact"]}},
            ["+", ["factIter", 3, 1], ["fact", 3]]
        ]}"#,
    )
    .unwrap();
    assert_eq!(out, Exp::Number(12.0));
}

#[test]
fn circular_imports_fail_and_stay_unloaded() {
    let loader = Arc::new({
        let mut loader = MemoryModuleLoader::default();
        loader.insert(
            "a",
            module_exp(
                "a",
                r#"{"import": {"b": ["y"]}} {"def": {"x": 1}} {"export": ["x"]}"#,
            ),
        );
        loader.insert(
            "b",
            module_exp(
                "b",
                r#"{"import": {"a": ["x"]}} {"def": {"y": 2}} {"export": ["y"]}"#,
            ),
        );
        loader
    });

    let interp = new_kernel_interp();
    let ctx: ContextRef = Context::root(vec![
        (EVAL_LEVEL_KEY, ctx_value(EvalLevel::Module)),
        (
            MODULE_LOADER_KEY,
            ctx_value::<Arc<dyn ModuleLoader>>(loader.clone()),
        ),
    ]);

    let err = loader.load(&ctx, &interp, "a").unwrap_err();
    assert!(matches!(err, JexError::CircularLoading(_)), "{}", err);

    // Both records are in the table, neither marked loaded.
    let table = module_table(&ctx);
    let table = table.read().unwrap();
    for name in ["a", "b"] {
        let module = table.get(name).expect("partially loaded module stays");
        assert!(!module.read().unwrap().is_loaded());
    }
}

#[test]
fn importing_a_missing_export_fails() {
    let repl = standard_repl();
    let err = eval(&repl, r#"{"begin": [{"import": {"fact": ["nope"]}}, 1]}"#).unwrap_err();
    assert!(matches!(err, JexError::NameNotFound(_)), "{}", err);
}

#[test]
fn importing_an_unknown_module_fails() {
    let repl = standard_repl();
    let err = eval(&repl, r#"{"begin": [{"import": {"ghost": ["x"]}}, 1]}"#).unwrap_err();
    assert!(matches!(err, JexError::Io(_)), "{}", err);
}

#[test]
fn top_level_imports_eagerly_reject_conflicts() {
    let repl = repl_with(&[
        ("m1", r#"{"def": {"x": 1}} {"export": ["x"]}"#),
        ("m2", r#"{"def": {"x": 2}} {"export": ["x"]}"#),
    ]);
    let err = eval(
        &repl,
        r#"{"begin": [{"import": {"m1": ["x"], "m2": ["x"]}}, "x"]}"#,
    )
    .unwrap_err();
    assert!(matches!(err, JexError::AmbiguousValue(_)), "{}", err);
}

#[test]
fn module_level_explicit_conflicts_fail() {
    let repl = repl_with(&[
        ("m1", r#"{"def": {"x": 1}} {"export": ["x"]}"#),
        ("m2", r#"{"def": {"x": 2}} {"export": ["x"]}"#),
        (
            "clash",
            r#"
            {"import": {"m1": ["x"], "m2": ["x"]}}
            {"def": {"y": "x"}}
            {"export": ["y"]}"#,
        ),
    ]);
    let err = eval(&repl, r#"{"begin": [{"import": {"clash": ["y"]}}, 1]}"#).unwrap_err();
    assert!(matches!(err, JexError::AmbiguousValue(_)), "{}", err);
}

#[test]
fn explicit_imports_shadow_the_prelude() {
    // The module's own "+" (imported explicitly) replaces the
    // implicit prelude cell.
    let repl = repl_with(&[
        (
            "strangemath",
            r#"{"def": {"plus": {"func": [["a", "b"], ["-", "a", "b"]]}}}
               {"export": [["plus", "+"]]}"#,
        ),
        (
            "user",
            r#"
            {"import": {"strangemath": ["+"]}}
            {"def": {"r": ["+", 10, 4]}}
            {"export": ["r"]}"#,
        ),
    ]);
    let out = eval(
        &repl,
        r#"{"begin": [{"import": {"user": ["r"]}}, "r"]}"#,
    )
    .unwrap();
    assert_eq!(out, Exp::Number(6.0));
}

#[test]
fn implicit_import_conflicts_poison_the_cell() {
    // Two implicit sources for one name: hand-build the import specs
    // with explicit = false (surface imports are always explicit).
    let implicit_import = |module: &str| {
        Exp::redex(
            "import",
            Exp::MapExp(im::hashmap! {
                module.to_string() => Exp::ListExp(vec![Exp::ListExp(vec![
                    Exp::string("x"),
                    Exp::Bool(false),
                ])]),
            }),
        )
    };
    let body = vec![
        implicit_import("m1"),
        implicit_import("m2"),
        Exp::redex("var", Exp::string("x")),
    ];
    let poisoned = Exp::redex(
        "module",
        Exp::MapExp(im::hashmap! {
            "name".to_string() => Exp::string("poisoned"),
            "file".to_string() => Exp::string(""),
            "body".to_string() => Exp::ListExp(body),
        }),
    );

    let mut loader = MemoryModuleLoader::default();
    loader.insert("m1", module_exp("m1", r#"{"def": {"x": 1}} {"export": ["x"]}"#));
    loader.insert("m2", module_exp("m2", r#"{"def": {"x": 2}} {"export": ["x"]}"#));
    loader.insert("poisoned", poisoned);
    let repl = Repl::new(
        JsonParser::kernel(),
        new_kernel_interp(),
        Arc::new(loader),
    );

    let err = eval(&repl, r#"{"begin": [{"import": {"poisoned": []}}, 1]}"#).unwrap_err();
    assert!(matches!(err, JexError::AmbiguousValue(_)), "{}", err);
}

#[test]
fn imports_after_the_importing_stage_fail() {
    let repl = repl_with(&[
        ("fact", FACT_MODULE),
        (
            "late",
            r#"
            {"def": {"x": 1}}
            {"import": {"fact": ["factIter"]}}
            {"export": ["x"]}"#,
        ),
    ]);
    let err = eval(&repl, r#"{"begin": [{"import": {"late": ["x"]}}, 1]}"#).unwrap_err();
    assert!(matches!(err, JexError::StagingViolation(_)), "{}", err);
}

#[test]
fn duplicate_export_aliases_fail() {
    let repl = repl_with(&[(
        "dup",
        r#"
        {"def": {"a": 1, "b": 2}}
        {"export": ["a", ["b", "a"]]}"#,
    )]);
    let err = eval(&repl, r#"{"begin": [{"import": {"dup": ["a"]}}, 1]}"#).unwrap_err();
    assert!(matches!(err, JexError::Syntax(_)), "{}", err);
}

#[test]
fn exporting_an_undefined_name_fails() {
    let repl = repl_with(&[("bad", r#"{"export": ["ghost"]}"#)]);
    let err = eval(&repl, r#"{"begin": [{"import": {"bad": ["ghost"]}}, 1]}"#).unwrap_err();
    assert!(matches!(err, JexError::NameNotFound(_)), "{}", err);
}

#[test]
fn export_at_top_level_is_a_staging_violation() {
    let repl = standard_repl();
    let err = eval(&repl, r#"{"begin": [{"export": ["x"]}, 1]}"#).unwrap_err();
    assert!(matches!(err, JexError::StagingViolation(_)), "{}", err);
}
