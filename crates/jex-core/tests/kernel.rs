use jex_core::error::JexError;
use jex_core::eval_source;
use jex_core::exp::Exp;

#[test]
fn factorial_recursive() {
    let source = r#"
    {"begin": [
        {"def": {
          "fact": {"func": [["n"],
                     {"if": [["<=", "n", 0],
                             1,
                             ["*", "n", ["fact", ["-", "n", 1]]]]}
                  ]}
        }},
        ["fact", 5]
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Number(120.0));
}

#[test]
fn factorial_iterative_runs_in_tail_position() {
    let source = r#"
    {"begin": [
        {"def": {
          "fact": {"func": [["n", "a"],
                     {"if": [["<=", "n", 0],
                             "a",
                             ["fact", ["-", "n", 1], ["*", "n", "a"]]]}
                  ]}
        }},
        ["fact", 5, 1]
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Number(120.0));
}

#[test]
fn deep_tail_recursion_does_not_grow_the_host_stack() {
    // 100k tail calls would overflow any per-call host frame scheme;
    // the delayed trampoline keeps this flat.
    let source = r#"
    {"begin": [
        {"def": {
          "count": {"func": [["n"],
                     {"if": [["<=", "n", 0],
                             0,
                             ["count", ["-", "n", 1]]]}
                  ]}
        }},
        ["count", 100000]
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Number(0.0));
}

#[test]
fn arithmetic_composes() {
    assert_eq!(
        eval_source(r#"["+", ["*", 2, 3], ["-", 10, 4]]"#).unwrap(),
        Exp::Number(12.0)
    );
}

#[test]
fn dead_branches_are_never_evaluated() {
    // Normal order: the taken branch is picked before any reduction,
    // so the unbound name in the dead branch is never looked up.
    assert_eq!(
        eval_source(r#"{"if": [false, ["undefined-var"], 42]}"#).unwrap(),
        Exp::Number(42.0)
    );
}

#[test]
fn if_requires_a_boolean_test() {
    assert!(matches!(
        eval_source(r#"{"if": [1, 2, 3]}"#),
        Err(JexError::TypeMismatch { .. })
    ));
}

#[test]
fn def_initializers_see_uninitialized_peers() {
    // "a" reads "b" while the frame still holds the sentinel.
    let source = r#"{"begin": [{"def": {"a": "b", "b": 1}}]}"#;
    // Map-entry evaluation order is unspecified: either "b" was
    // initialized first (then "a" becomes 1) or the read fails with
    // uninitialized-value. Both respect the frame invariant; what can
    // never happen is a partially evaluated intermediate.
    match eval_source(source) {
        Ok(value) => assert_eq!(value, Exp::Null),
        Err(err) => assert!(matches!(err, JexError::UninitializedValue(_)), "{}", err),
    }
}

#[test]
fn def_with_an_acyclic_initializer_order_succeeds() {
    let source = r#"
    {"begin": [
        {"def": {"a": 2}},
        {"def": {"b": ["+", "a", 1]}},
        "b"
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Number(3.0));
}

#[test]
fn mutual_recursion_through_one_def() {
    let source = r#"
    {"begin": [
        {"def": {
          "even": {"func": [["n"], {"if": [["=", "n", 0], true, ["odd", ["-", "n", 1]]]}]},
          "odd":  {"func": [["n"], {"if": [["=", "n", 0], false, ["even", ["-", "n", 1]]]}]}
        }},
        ["even", 10]
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Bool(true));
}

#[test]
fn set_mutates_the_defining_frame() {
    let source = r#"
    {"begin": [
        {"def": {"x": 1}},
        {"block": [
            {"set": {"x": 5}}
        ]},
        "x"
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Number(5.0));
}

#[test]
fn set_of_an_unbound_name_fails() {
    assert!(matches!(
        eval_source(r#"{"set": {"nope": 1}}"#),
        Err(JexError::NameNotFound(_))
    ));
}

#[test]
fn block_definitions_stay_local() {
    let source = r#"
    {"begin": [
        {"def": {"x": 1}},
        {"block": [
            {"def": {"x": 2}},
            "x"
        ]}
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Number(2.0));

    let source = r#"
    {"begin": [
        {"def": {"x": 1}},
        {"block": [{"def": {"x": 2}}]},
        "x"
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Number(1.0));
}

#[test]
fn closures_capture_their_environment() {
    let source = r#"
    {"begin": [
        {"def": {"make": {"func": [["n"], {"func": [["m"], ["+", "n", "m"]]}]}}},
        {"def": {"add3": ["make", 3]}},
        ["add3", 4]
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Number(7.0));
}

#[test]
fn zero_parameter_closures_apply() {
    let source = r#"
    {"begin": [
        {"def": {"answer": {"func": [[], 42]}}},
        ["answer"]
    ]}"#;
    assert_eq!(eval_source(source).unwrap(), Exp::Number(42.0));
}

#[test]
fn arity_mismatches_are_rejected() {
    let source = r#"
    {"begin": [
        {"def": {"id": {"func": [["x"], "x"]}}},
        ["id", 1, 2]
    ]}"#;
    assert!(matches!(
        eval_source(source),
        Err(JexError::ArityMismatch(_))
    ));

    assert!(matches!(
        eval_source(r#"["+", 1]"#),
        Err(JexError::ArityMismatch(_))
    ));
}

#[test]
fn duplicate_and_reserved_parameters_are_rejected() {
    assert!(matches!(
        eval_source(r#"{"func": [["a", "a"], 1]}"#),
        Err(JexError::Syntax(_))
    ));
    assert!(matches!(
        eval_source(r#"{"func": [["..."], 1]}"#),
        Err(JexError::Syntax(_))
    ));
}

#[test]
fn applying_a_non_callable_fails() {
    assert!(matches!(
        eval_source(r#"[{"data": 3}, 1]"#),
        Err(JexError::TypeMismatch { .. })
    ));
}

#[test]
fn unbound_variables_fail() {
    assert!(matches!(
        eval_source(r#"["missing"]"#),
        Err(JexError::NameNotFound(_))
    ));
}

#[test]
fn data_literals_are_inert() {
    assert_eq!(
        eval_source(r#"{"data": ["x", 1, {"k": true}]}"#).unwrap(),
        Exp::ListValue(vec![
            Exp::string("x"),
            Exp::Number(1.0),
            Exp::MapValue(im::hashmap! {"k".to_string() => Exp::Bool(true)}),
        ])
    );
}

#[test]
fn def_is_rejected_at_expr_level() {
    // A def in argument position sits at expr level.
    let source = r#"
    {"begin": [
        {"def": {"id": {"func": [["x"], "x"]}}},
        ["id", {"def": {"y": 1}}]
    ]}"#;
    assert!(matches!(
        eval_source(source),
        Err(JexError::StagingViolation(_))
    ));
}

#[test]
fn values_evaluate_to_themselves() {
    assert_eq!(eval_source("null").unwrap(), Exp::Null);
    assert_eq!(eval_source("true").unwrap(), Exp::Bool(true));
    assert_eq!(eval_source("3.5").unwrap(), Exp::Number(3.5));
}
