use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::error::JexError;
use crate::exp::{Exp, Primitive};
use crate::module::{Module, ModuleRef, PRELUDE_MODULE_NAME};

/// Install a host function under `name` with an exact arity.
macro_rules! def_primitive {
    ($exports:expr, $name:expr, $arity:expr, |$args:ident| $body:expr) => {
        $exports.insert(
            $name.to_string(),
            Exp::Primitive(Arc::new(Primitive {
                name: $name.to_string(),
                arity: $arity,
                func: Box::new(move |$args: &[Exp]| -> Result<Exp, JexError> { $body }),
            })),
        );
    };
}

fn arith(args: &[Exp], op: impl Fn(f64, f64) -> f64) -> Result<Exp, JexError> {
    Ok(Exp::Number(op(args[0].as_number()?, args[1].as_number()?)))
}

fn compare(args: &[Exp], op: impl Fn(f64, f64) -> bool) -> Result<Exp, JexError> {
    Ok(Exp::Bool(op(args[0].as_number()?, args[1].as_number()?)))
}

/// The export set of the built-in prelude module: arithmetic,
/// comparison, equality, string concatenation, and printing.
pub fn prelude_exports() -> HashMap<String, Exp> {
    let mut exports = HashMap::new();
    def_primitive!(exports, "+", 2, |args| arith(args, |a, b| a + b));
    def_primitive!(exports, "-", 2, |args| arith(args, |a, b| a - b));
    def_primitive!(exports, "*", 2, |args| arith(args, |a, b| a * b));
    def_primitive!(exports, "/", 2, |args| arith(args, |a, b| a / b));
    def_primitive!(exports, "<", 2, |args| compare(args, |a, b| a < b));
    def_primitive!(exports, ">", 2, |args| compare(args, |a, b| a > b));
    def_primitive!(exports, "<=", 2, |args| compare(args, |a, b| a <= b));
    def_primitive!(exports, ">=", 2, |args| compare(args, |a, b| a >= b));
    def_primitive!(exports, "=", 2, |args| Ok(Exp::Bool(args[0].equal(&args[1]))));
    def_primitive!(exports, "concat", 2, |args| {
        let mut joined = args[0].as_str()?.to_string();
        joined.push_str(args[1].as_str()?);
        Ok(Exp::Str(joined))
    });
    def_primitive!(exports, "print", 1, |args| {
        println!("{}", args[0]);
        Ok(Exp::Null)
    });
    def_primitive!(exports, "printString", 1, |args| {
        println!("{}", args[0].as_str()?);
        Ok(Exp::Null)
    });
    exports
}

static PRELUDE: Lazy<ModuleRef> = Lazy::new(|| {
    Arc::new(RwLock::new(Module::loaded(
        PRELUDE_MODULE_NAME,
        prelude_exports(),
    )))
});

/// The shared prelude module record, already loaded. Safe to share
/// between interpret roots: it is immutable once built.
pub fn prelude_module() -> ModuleRef {
    PRELUDE.clone()
}

/// A fresh environment seeded with the prelude exports, for top-level
/// evaluation.
pub fn prelude_env() -> crate::env::EnvRef {
    crate::env::new_ref(crate::env::Env::with_bindings(prelude_exports()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Exp]) -> Result<Exp, JexError> {
        let exports = prelude_exports();
        let primitive = exports[name].as_primitive().unwrap().clone();
        (primitive.func)(args)
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert_eq!(
            call("+", &[Exp::Number(2.0), Exp::Number(3.0)]).unwrap(),
            Exp::Number(5.0)
        );
        assert_eq!(
            call("<=", &[Exp::Number(2.0), Exp::Number(2.0)]).unwrap(),
            Exp::Bool(true)
        );
    }

    #[test]
    fn equality_is_structural() {
        let a = Exp::ListValue(vec![Exp::Number(1.0), Exp::string("x")]);
        let b = Exp::ListValue(vec![Exp::Number(1.0), Exp::string("x")]);
        assert_eq!(call("=", &[a, b]).unwrap(), Exp::Bool(true));
    }

    #[test]
    fn concat_joins_strings() {
        assert_eq!(
            call("concat", &[Exp::string("foo"), Exp::string("bar")]).unwrap(),
            Exp::string("foobar")
        );
        assert!(call("concat", &[Exp::Number(1.0), Exp::string("bar")]).is_err());
    }

    #[test]
    fn type_errors_propagate() {
        assert!(matches!(
            call("+", &[Exp::string("no"), Exp::Number(1.0)]),
            Err(JexError::TypeMismatch { .. })
        ));
    }
}
