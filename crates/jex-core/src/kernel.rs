use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::{ctx_value, get_as, Context, ContextRef};
use crate::env::{self, EnvRef};
use crate::error::JexError;
use crate::exp::{Closure, Exp, Kind};
use crate::interp::{evaluator, Interp, Interpret};
use crate::matcher::{match_exp, ListItem, Pattern};
use crate::module;

pub const EVAL_LEVEL_KEY: &str = "eval-level";

/// Staging tag carried in the dynamic context. Certain forms are legal
/// only at certain levels; evaluators that reduce children pick the
/// children's level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalLevel {
    Top,
    Module,
    Block,
    Expr,
}

impl fmt::Display for EvalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalLevel::Top => f.write_str("top level"),
            EvalLevel::Module => f.write_str("module level"),
            EvalLevel::Block => f.write_str("block level"),
            EvalLevel::Expr => f.write_str("expr level"),
        }
    }
}

pub fn eval_level(ctx: &ContextRef) -> EvalLevel {
    get_as::<EvalLevel>(ctx, EVAL_LEVEL_KEY).unwrap_or(EvalLevel::Top)
}

/// A context whose eval level is `level`: the given one when it
/// already matches, otherwise a child frame carrying the new level.
pub fn ensure_level(ctx: &ContextRef, level: EvalLevel) -> ContextRef {
    if eval_level(ctx) == level {
        ctx.clone()
    } else {
        Context::child_of(ctx, vec![(EVAL_LEVEL_KEY, ctx_value(level))])
    }
}

fn require_level(ctx: &ContextRef, allowed: &[EvalLevel], form: &str) -> Result<(), JexError> {
    let level = eval_level(ctx);
    if allowed.contains(&level) {
        Ok(())
    } else {
        Err(JexError::staging(format!(
            "cannot evaluate {} at {}",
            form, level
        )))
    }
}

/// The kernel language: a normal-order interpreter with the eight core
/// evaluators plus the module subsystem registered. Fallback is off;
/// an unknown redex is a hard error.
pub fn new_kernel_interp() -> Interp {
    let mut interp = Interp::normal(false);
    interp.register_evaluator("var", Some(evaluator(var_eval)));
    interp.register_evaluator("func", Some(evaluator(func_eval)));
    interp.register_evaluator("apply", Some(evaluator(apply_eval)));
    interp.register_evaluator("def", Some(evaluator(def_eval)));
    interp.register_evaluator("set", Some(evaluator(set_eval)));
    interp.register_evaluator("begin", Some(evaluator(begin_eval)));
    interp.register_evaluator("if", Some(evaluator(if_eval)));
    interp.register_evaluator("block", Some(evaluator(block_eval)));
    module::register(&mut interp);
    interp
}

fn var_eval(
    _ctx: &ContextRef,
    _interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    let name = exp.as_str()?;
    let value = env
        .read()
        .unwrap()
        .get(name)
        .ok_or_else(|| JexError::name_not_found(name))?;
    match value {
        Exp::Uninitialized => Err(JexError::uninitialized(name)),
        Exp::Ambiguous => Err(JexError::ambiguous(format!(
            "{} was implicitly imported from more than one module",
            name
        ))),
        value => Ok(value),
    }
}

fn valid_param_name(name: &str) -> Result<(), JexError> {
    if name.is_empty() || name == "..." {
        Err(JexError::syntax(format!("illegal parameter name {:?}", name)))
    } else {
        Ok(())
    }
}

fn func_eval(
    _ctx: &ContextRef,
    _interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    let binds = match_exp(
        exp,
        &Pattern::List(vec![
            ListItem::One(Pattern::capture(
                "params",
                Pattern::of_kind(&[Kind::ListExp]),
            )),
            ListItem::One(Pattern::capture("body", Pattern::Any)),
        ]),
    )?;

    let param_exps = binds["params"].as_list_exp()?.to_vec();
    let mut params = Vec::with_capacity(param_exps.len());
    for param_exp in &param_exps {
        let param = param_exp.as_str()?;
        valid_param_name(param)?;
        if params.iter().any(|p| p == param) {
            return Err(JexError::syntax(format!("duplicated parameter {:?}", param)));
        }
        params.push(param.to_string());
    }

    Ok(Exp::Closure(Arc::new(Closure {
        params,
        body: binds["body"].clone(),
        env: env.clone(),
    })))
}

fn apply_eval(
    ctx: &ContextRef,
    interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    let list = exp.as_list_exp()?;
    let (head, args) = list
        .split_first()
        .ok_or_else(|| JexError::syntax("expect [func args ...]"))?;

    let expr_ctx = ensure_level(ctx, EvalLevel::Expr);
    let callee = interp.interpret(&expr_ctx, head, env)?;

    match &callee {
        Exp::Primitive(primitive) => {
            if args.len() != primitive.arity {
                return Err(JexError::arity(format!(
                    "{} expects {} args, got {}",
                    primitive.name,
                    primitive.arity,
                    args.len()
                )));
            }
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(interp.interpret(&expr_ctx, arg, env)?);
            }
            (primitive.func)(&values)
        }
        Exp::Closure(closure) => {
            if args.len() != closure.params.len() {
                return Err(JexError::arity(format!(
                    "closure expects {} args, got {}",
                    closure.params.len(),
                    args.len()
                )));
            }
            let mut kvs = HashMap::with_capacity(args.len());
            for (param, arg) in closure.params.iter().zip(args) {
                kvs.insert(param.clone(), interp.interpret(&expr_ctx, arg, env)?);
            }
            let call_env = env::extend(&closure.env, kvs);
            let block_ctx = ensure_level(ctx, EvalLevel::Block);
            // Delayed rather than a recursive interpret: this is what
            // keeps user-level tail calls off the host stack.
            Ok(Exp::delayed(block_ctx, closure.body.clone(), call_env))
        }
        other => Err(JexError::type_mismatch(
            "closure or primitive",
            other.kind().name(),
        )),
    }
}

fn def_eval(
    ctx: &ContextRef,
    interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    require_level(
        ctx,
        &[EvalLevel::Top, EvalLevel::Module, EvalLevel::Block],
        "def",
    )?;
    let entries = exp.as_map_exp()?;

    // Name every binding first so initializers can refer to their
    // peers; a peer read before its initializer ran reports
    // uninitialized instead of unbound.
    for name in entries.keys() {
        env.write().unwrap().define(name, Exp::Uninitialized);
    }

    let expr_ctx = ensure_level(ctx, EvalLevel::Expr);
    let mut values = Vec::with_capacity(entries.len());
    for (name, init) in entries {
        values.push((name.clone(), interp.interpret(&expr_ctx, init, env)?));
    }

    for (name, value) in values {
        env.write().unwrap().define(&name, value);
    }
    Ok(Exp::Null)
}

fn set_eval(
    ctx: &ContextRef,
    interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    let entries = exp.as_map_exp()?;
    let expr_ctx = ensure_level(ctx, EvalLevel::Expr);

    let mut values = Vec::with_capacity(entries.len());
    for (name, rhs) in entries {
        values.push((name.clone(), interp.interpret(&expr_ctx, rhs, env)?));
    }

    for (name, value) in values {
        if !env.write().unwrap().set_in_chain(&name, value) {
            return Err(JexError::name_not_found(name));
        }
    }
    Ok(Exp::Null)
}

fn begin_eval(
    ctx: &ContextRef,
    interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    let list = exp.as_list_exp()?;
    let (last, init) = list
        .split_last()
        .ok_or_else(|| JexError::syntax("empty begin sequence"))?;

    for item in init {
        interp.interpret(ctx, item, env)?;
    }
    Ok(Exp::delayed(ctx.clone(), last.clone(), env.clone()))
}

fn if_eval(
    ctx: &ContextRef,
    interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    let binds = match_exp(
        exp,
        &Pattern::List(vec![
            ListItem::One(Pattern::capture("test", Pattern::Any)),
            ListItem::One(Pattern::capture("then", Pattern::Any)),
            ListItem::One(Pattern::capture("else", Pattern::Any)),
        ]),
    )?;

    let expr_ctx = ensure_level(ctx, EvalLevel::Expr);
    let test = interp.interpret(&expr_ctx, &binds["test"], env)?;
    let branch = if test.as_bool()? {
        binds["then"].clone()
    } else {
        binds["else"].clone()
    };
    Ok(Exp::delayed(ctx.clone(), branch, env.clone()))
}

fn block_eval(
    ctx: &ContextRef,
    _interp: &dyn Interpret,
    exp: &Exp,
    env: &EnvRef,
) -> Result<Exp, JexError> {
    let block_env = env::extend(env, HashMap::new());
    let block_ctx = ensure_level(ctx, EvalLevel::Block);
    Ok(Exp::delayed(block_ctx, exp.clone(), block_env))
}
