use std::collections::HashMap;
use std::sync::Arc;

use im::HashMap as ImHashMap;

use crate::context::{Context, ContextRef};
use crate::env::{self, EnvRef};
use crate::error::JexError;
use crate::exp::{Exp, Redex};

/// A per-redex evaluator. `interp` is the interpreter that dispatched
/// here, so the evaluator can reduce sub-expressions recursively; the
/// shape of `exp` (reduced or raw) depends on the evaluation order.
pub type RedexEvaluator = Arc<
    dyn Fn(&ContextRef, &dyn Interpret, &Exp, &EnvRef) -> Result<Exp, JexError> + Send + Sync,
>;

/// Hook invoked by [`chain`] after the first pass: copy derived facts
/// out of the protected context/environment into the outer ones.
pub type InfoExtractor = Arc<
    dyn Fn(&ContextRef, &ContextRef, &EnvRef, &EnvRef) -> Result<(), JexError> + Send + Sync,
>;

pub trait Interpret: Send + Sync {
    /// Reduce `exp` to a value or fail. The result satisfies
    /// `Exp::is_value`.
    fn interpret(&self, ctx: &ContextRef, exp: &Exp, env: &EnvRef) -> Result<Exp, JexError>;

    fn extract_info(
        &self,
        _from_ctx: &ContextRef,
        _to_ctx: &ContextRef,
        _from_env: &EnvRef,
        _to_env: &EnvRef,
    ) -> Result<(), JexError> {
        Ok(())
    }
}

/// Evaluation-order policy of an [`Interp`]. The policy decides what a
/// registered evaluator receives and what happens to unregistered
/// redexes; individual evaluators stay order-agnostic.
pub enum Order {
    /// Reduce a redex's inner expression to a value before dispatch
    /// (call by value).
    Applicative,
    /// Hand the evaluator the raw inner expression; the evaluator
    /// decides what to reduce. The kernel runs in this order.
    Normal,
    /// Delegate unknown redexes, whole, to an inner interpreter.
    Layered(Arc<dyn Interpret>),
}

/// The extensible tree-walking interpreter: a trampoline plus a
/// registry of per-redex evaluators.
pub struct Interp {
    order: Order,
    fallback: bool,
    evaluators: HashMap<String, RedexEvaluator>,
    extractor: Option<InfoExtractor>,
}

impl Interp {
    pub fn applicative(fallback: bool) -> Self {
        Self::with_order(Order::Applicative, fallback)
    }

    pub fn normal(fallback: bool) -> Self {
        Self::with_order(Order::Normal, fallback)
    }

    pub fn layered(inner: Arc<dyn Interpret>) -> Self {
        Self::with_order(Order::Layered(inner), false)
    }

    fn with_order(order: Order, fallback: bool) -> Self {
        Self {
            order,
            fallback,
            evaluators: HashMap::new(),
            extractor: None,
        }
    }

    /// Idempotent replacement; `None` unregisters. Returns the
    /// previous evaluator, if any.
    pub fn register_evaluator(
        &mut self,
        name: &str,
        evaluator: Option<RedexEvaluator>,
    ) -> Option<RedexEvaluator> {
        match evaluator {
            Some(f) => self.evaluators.insert(name.to_string(), f),
            None => self.evaluators.remove(name),
        }
    }

    pub fn register_info_extractor(
        &mut self,
        extractor: Option<InfoExtractor>,
    ) -> Option<InfoExtractor> {
        std::mem::replace(&mut self.extractor, extractor)
    }

    /// One trampoline run. The bool is the "expanded" flag: whether
    /// this step did any rewriting, which is what tells the loop (and
    /// list/map aggregation) quiescence from continued work.
    fn reduce(&self, ctx: &ContextRef, exp: &Exp, env: &EnvRef) -> Result<(Exp, bool), JexError> {
        let mut ctx = ctx.clone();
        let mut env = env.clone();
        let mut exp = exp.clone();
        let mut expanded = true;
        while expanded {
            let (next, next_expanded) = match exp {
                Exp::ListExp(items) => self.reduce_list(&ctx, items, &env)?,
                Exp::MapExp(entries) => self.reduce_map(&ctx, entries, &env)?,
                Exp::SuspendExp(redex) => {
                    let (inner, inner_expanded) = self.reduce(&ctx, &redex.exp, &env)?;
                    (
                        Exp::suspend_exp(Redex::new(redex.name, inner)),
                        inner_expanded,
                    )
                }
                Exp::Delayed(delayed) => {
                    // The tail-call mechanism: swap loop state for the
                    // thunk's and keep going on this host frame.
                    ctx = delayed.ctx;
                    env = delayed.env;
                    (delayed.exp, true)
                }
                Exp::Redex(redex) => self.reduce_redex(&ctx, *redex, &env)?,
                value => return Ok((value, false)),
            };
            exp = next;
            expanded = next_expanded;
        }
        Ok((exp, false))
    }

    fn reduce_list(
        &self,
        ctx: &ContextRef,
        items: Vec<Exp>,
        env: &EnvRef,
    ) -> Result<(Exp, bool), JexError> {
        let mut reduced = Vec::with_capacity(items.len());
        let mut any_expanded = false;
        for item in &items {
            let (new_item, expanded) = self.reduce(ctx, item, env)?;
            any_expanded = any_expanded || expanded;
            reduced.push(new_item);
        }
        if any_expanded {
            Ok((Exp::ListExp(reduced), true))
        } else {
            Ok((Exp::ListValue(reduced), false))
        }
    }

    fn reduce_map(
        &self,
        ctx: &ContextRef,
        entries: ImHashMap<String, Exp>,
        env: &EnvRef,
    ) -> Result<(Exp, bool), JexError> {
        let mut reduced = ImHashMap::new();
        let mut any_expanded = false;
        for (key, entry) in &entries {
            let (new_entry, expanded) = self.reduce(ctx, entry, env)?;
            any_expanded = any_expanded || expanded;
            reduced.insert(key.clone(), new_entry);
        }
        if any_expanded {
            Ok((Exp::MapExp(reduced), true))
        } else {
            Ok((Exp::MapValue(reduced), false))
        }
    }

    fn reduce_redex(
        &self,
        ctx: &ContextRef,
        redex: Redex,
        env: &EnvRef,
    ) -> Result<(Exp, bool), JexError> {
        let evaluator = self.evaluators.get(&redex.name).cloned();
        match &self.order {
            Order::Normal => match evaluator {
                Some(f) => Ok((f(ctx, self, &redex.exp, env)?, true)),
                None if self.fallback => Ok((Exp::suspend_value(redex), false)),
                None => Err(JexError::unhandled_redex(redex.name)),
            },
            Order::Applicative => {
                if evaluator.is_none() && !self.fallback {
                    return Err(JexError::unhandled_redex(redex.name));
                }
                let (inner, inner_expanded) = self.reduce(ctx, &redex.exp, env)?;
                match evaluator {
                    Some(f) => Ok((f(ctx, self, &inner, env)?, true)),
                    None => Ok((
                        Exp::suspend_value(Redex::new(redex.name, inner)),
                        inner_expanded,
                    )),
                }
            }
            Order::Layered(inner_interp) => match evaluator {
                Some(f) => Ok((f(ctx, self, &redex.exp, env)?, true)),
                None => Ok((inner_interp.interpret(ctx, &Exp::Redex(Box::new(redex)), env)?, false)),
            },
        }
    }
}

impl Interpret for Interp {
    fn interpret(&self, ctx: &ContextRef, exp: &Exp, env: &EnvRef) -> Result<Exp, JexError> {
        let (value, _) = self.reduce(ctx, exp, env)?;
        Ok(value)
    }

    fn extract_info(
        &self,
        from_ctx: &ContextRef,
        to_ctx: &ContextRef,
        from_env: &EnvRef,
        to_env: &EnvRef,
    ) -> Result<(), JexError> {
        match &self.extractor {
            Some(extract) => extract(from_ctx, to_ctx, from_env, to_env),
            None => Ok(()),
        }
    }
}

/// The interpreter that does nothing: every expression is already its
/// own result.
pub struct IdentityInterp;

impl Interpret for IdentityInterp {
    fn interpret(&self, _ctx: &ContextRef, exp: &Exp, _env: &EnvRef) -> Result<Exp, JexError> {
        Ok(exp.clone())
    }
}

/// Suspend normalization, the seam between staged interpreters.
///
/// With `flag` true every redex reachable through list/map/suspend exp
/// nodes becomes an inert suspend value and suspend exps are promoted;
/// with `flag` false suspend wrappers unwrap back to plain redexes.
/// A delayed node can never be suspended.
pub fn suspend(exp: &Exp, flag: bool) -> Result<Exp, JexError> {
    match exp {
        Exp::Delayed(_) => Err(JexError::internal("cannot suspend a delayed exp")),
        Exp::SuspendValue(redex) => {
            if flag {
                Ok(exp.clone())
            } else {
                Ok(Exp::Redex(redex.clone()))
            }
        }
        Exp::SuspendExp(redex) => {
            if flag {
                Ok(Exp::SuspendValue(redex.clone()))
            } else {
                Ok(Exp::Redex(redex.clone()))
            }
        }
        Exp::Redex(redex) => {
            if flag {
                Ok(Exp::SuspendValue(redex.clone()))
            } else {
                Ok(exp.clone())
            }
        }
        Exp::ListExp(items) => {
            let converted = items
                .iter()
                .map(|item| suspend(item, flag))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Exp::ListExp(converted))
        }
        Exp::MapExp(entries) => {
            let mut converted = ImHashMap::new();
            for (key, entry) in entries {
                converted.insert(key.clone(), suspend(entry, flag)?);
            }
            Ok(Exp::MapExp(converted))
        }
        other => Ok(other.clone()),
    }
}

/// Sequence two interpreters: run `first` on protected copies of the
/// context and environment, extract derived info back out, normalize
/// leftover suspend values into plain redexes, then run `second` on
/// the originals. Scratch state of the first pass cannot leak.
pub struct ChainInterp {
    first: Arc<dyn Interpret>,
    second: Arc<dyn Interpret>,
}

impl Interpret for ChainInterp {
    fn interpret(&self, ctx: &ContextRef, exp: &Exp, env: &EnvRef) -> Result<Exp, JexError> {
        let scratch_ctx = Context::protect(ctx);
        let scratch_env = env::protect(env);

        let staged = self.first.interpret(&scratch_ctx, exp, &scratch_env)?;
        self.first
            .extract_info(&scratch_ctx, ctx, &scratch_env, env)?;
        let next = suspend(&staged, false)?;
        self.second.interpret(ctx, &next, env)
    }

    fn extract_info(
        &self,
        from_ctx: &ContextRef,
        to_ctx: &ContextRef,
        from_env: &EnvRef,
        to_env: &EnvRef,
    ) -> Result<(), JexError> {
        self.second.extract_info(from_ctx, to_ctx, from_env, to_env)
    }
}

/// Right-fold a pipeline of interpreters into a chain. Zero stages is
/// the identity, one stage is itself.
pub fn chain(mut stages: Vec<Arc<dyn Interpret>>) -> Arc<dyn Interpret> {
    match stages.len() {
        0 => Arc::new(IdentityInterp),
        1 => stages.pop().unwrap(),
        _ => {
            let mut result = stages.pop().unwrap();
            while let Some(first) = stages.pop() {
                result = Arc::new(ChainInterp {
                    first,
                    second: result,
                });
            }
            result
        }
    }
}

/// Wrap a closure as a registrable evaluator.
pub fn evaluator<F>(f: F) -> RedexEvaluator
where
    F: Fn(&ContextRef, &dyn Interpret, &Exp, &EnvRef) -> Result<Exp, JexError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}
