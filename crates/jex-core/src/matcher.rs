use std::collections::HashMap;
use std::fmt;

use im::HashMap as ImHashMap;
use regex::Regex;

use crate::error::JexError;
use crate::exp::{Exp, Kind, Redex};

/// Captured name to matched expression.
pub type Bindings = HashMap<String, Exp>;

/// Repetition bound; negative means unbounded.
pub type Times = i32;

pub const INFINITE: Times = -1;

/// The pattern language used by redex evaluators to destructure
/// expressions. Matching is deterministic: `SeqOr` and `Repeat` take
/// the first success and never backtrack across captures.
pub enum Pattern {
    /// Matches anything.
    Any,
    /// Matches any expression whose kind is in the set; an empty set
    /// matches anything.
    OfKind(Vec<Kind>),
    /// Matches exactly this expression under structural equality.
    Equal(Exp),
    /// Matches the inner pattern and binds the matched expression.
    Capture(String, Box<Pattern>),
    /// First-match-wins alternatives.
    SeqOr(Vec<Pattern>),
    /// A redex with this name whose inner matches. Inside a
    /// suspend-value scope, also accepts the suspended forms.
    Redex(String, Box<Pattern>),
    /// A suspend exp (or, while the subject sits under a suspend
    /// value, a bare redex) with this name.
    SuspendExp(String, Box<Pattern>),
    /// A suspend value with this name; opens the scope in which inner
    /// redex patterns accept suspended forms too.
    SuspendValue(String, Box<Pattern>),
    /// A list exp, consumed item by item; must be consumed fully.
    List(Vec<ListItem>),
    /// A map exp, consumed entry by entry; must be consumed fully.
    Map(Vec<MapItem>),
}

pub enum ListItem {
    One(Pattern),
    Repeat(Pattern, Times, Times),
}

pub struct MapItem {
    pub key: Regex,
    pub pattern: Pattern,
    pub repeat: Option<(Times, Times)>,
}

impl MapItem {
    pub fn new(key: &str, pattern: Pattern) -> Result<Self, JexError> {
        Ok(Self {
            key: compile_key(key)?,
            pattern,
            repeat: None,
        })
    }

    pub fn repeated(key: &str, pattern: Pattern, from: Times, to: Times) -> Result<Self, JexError> {
        Ok(Self {
            key: compile_key(key)?,
            pattern,
            repeat: Some((from, to)),
        })
    }
}

fn compile_key(key: &str) -> Result<Regex, JexError> {
    Regex::new(key).map_err(|e| JexError::syntax(format!("bad key pattern {:?}: {}", key, e)))
}

impl Pattern {
    pub fn capture(name: &str, pattern: Pattern) -> Pattern {
        Pattern::Capture(name.to_string(), Box::new(pattern))
    }

    pub fn redex(name: &str, pattern: Pattern) -> Pattern {
        Pattern::Redex(name.to_string(), Box::new(pattern))
    }

    pub fn suspend_exp(name: &str, pattern: Pattern) -> Pattern {
        Pattern::SuspendExp(name.to_string(), Box::new(pattern))
    }

    pub fn suspend_value(name: &str, pattern: Pattern) -> Pattern {
        Pattern::SuspendValue(name.to_string(), Box::new(pattern))
    }

    pub fn of_kind(kinds: &[Kind]) -> Pattern {
        Pattern::OfKind(kinds.to_vec())
    }
}

/// Match `exp` against `pat`, producing the bindings of every capture.
pub fn match_exp(exp: &Exp, pat: &Pattern) -> Result<Bindings, JexError> {
    let mut binds = Bindings::new();
    match_pattern(pat, exp, &mut binds, SuspendMode::default())?;
    Ok(binds)
}

/// Suspension scope carried down the recursion. `pattern` is set once
/// matching has entered a suspend-value pattern; `exp` records whether
/// the current subject arrived through a suspend wrapper, so redexes
/// below it may appear unwrapped.
#[derive(Clone, Copy, Default)]
struct SuspendMode {
    pattern: bool,
    exp: bool,
}

fn fail(pat: &Pattern, exp: &Exp) -> JexError {
    JexError::match_failure(format!("expect {}, but found {}", pat, exp))
}

/// The redex under a suspend wrapper, plus whether the result should
/// be treated as still suspended. A bare redex is admitted only when
/// the subject already sits under a suspend value.
fn unwrap_suspend(exp: &Exp, exp_suspend: bool) -> Result<(Redex, bool), JexError> {
    match exp {
        Exp::SuspendExp(redex) => Ok(((**redex).clone(), exp_suspend)),
        Exp::SuspendValue(redex) => Ok(((**redex).clone(), true)),
        Exp::Redex(redex) if exp_suspend => Ok(((**redex).clone(), exp_suspend)),
        other => Err(JexError::match_failure(format!(
            "expect a suspended redex, but found {}",
            other
        ))),
    }
}

fn match_pattern(
    pat: &Pattern,
    exp: &Exp,
    binds: &mut Bindings,
    mode: SuspendMode,
) -> Result<(), JexError> {
    match pat {
        Pattern::Any => Ok(()),
        Pattern::OfKind(kinds) => {
            if kinds.is_empty() || kinds.contains(&exp.kind()) {
                Ok(())
            } else {
                Err(fail(pat, exp))
            }
        }
        Pattern::Equal(expected) => {
            if expected.equal(exp) {
                Ok(())
            } else {
                Err(fail(pat, exp))
            }
        }
        Pattern::Capture(name, inner) => {
            match_pattern(inner, exp, binds, mode)?;
            if binds.contains_key(name) {
                return Err(JexError::match_failure(format!(
                    "duplicated capture name {}",
                    name
                )));
            }
            binds.insert(name.clone(), exp.clone());
            Ok(())
        }
        Pattern::SeqOr(alternatives) => {
            for alternative in alternatives {
                if match_pattern(alternative, exp, binds, mode).is_ok() {
                    return Ok(());
                }
            }
            Err(fail(pat, exp))
        }
        Pattern::Redex(name, inner) => {
            if mode.pattern {
                let (redex, suspended) = unwrap_suspend(exp, mode.exp).map_err(|_| fail(pat, exp))?;
                if redex.name != *name {
                    return Err(fail(pat, exp));
                }
                let next = SuspendMode {
                    pattern: true,
                    exp: suspended,
                };
                match_pattern(inner, &redex.exp, binds, next)
            } else {
                if mode.exp {
                    return Err(fail(pat, exp));
                }
                let redex = exp.as_redex().map_err(|_| fail(pat, exp))?;
                if redex.name != *name {
                    return Err(fail(pat, exp));
                }
                match_pattern(inner, &redex.exp, binds, mode)
            }
        }
        Pattern::SuspendExp(name, inner) => {
            let (redex, suspended) = unwrap_suspend(exp, mode.exp).map_err(|_| fail(pat, exp))?;
            if redex.name != *name {
                return Err(fail(pat, exp));
            }
            let next = SuspendMode {
                pattern: mode.pattern,
                exp: suspended,
            };
            match_pattern(inner, &redex.exp, binds, next)
        }
        Pattern::SuspendValue(name, inner) => {
            let (redex, suspended) = unwrap_suspend(exp, mode.exp).map_err(|_| fail(pat, exp))?;
            if redex.name != *name {
                return Err(fail(pat, exp));
            }
            let next = SuspendMode {
                pattern: true,
                exp: suspended,
            };
            match_pattern(inner, &redex.exp, binds, next)
        }
        Pattern::List(items) => {
            let list = exp.as_list_exp().map_err(|_| fail(pat, exp))?;
            let mut rest = list;
            for item in items {
                rest = match_list_item(item, rest, binds, mode)?;
            }
            if rest.is_empty() {
                Ok(())
            } else {
                Err(fail(pat, exp))
            }
        }
        Pattern::Map(items) => {
            let entries = exp.as_map_exp().map_err(|_| fail(pat, exp))?;
            // Work on a cheap persistent copy; matched entries are
            // removed so later items cannot alias them.
            let mut working = entries.clone();
            for item in items {
                working = match_map_item(item, working, binds, mode)?;
            }
            if working.is_empty() {
                Ok(())
            } else {
                Err(fail(pat, exp))
            }
        }
    }
}

fn bounded_len(len: usize, to: Times) -> usize {
    if to < 0 {
        len
    } else {
        len.min(to as usize)
    }
}

/// Merge one iteration's captures into the repetition accumulator,
/// refusing names already captured outside the repetition.
fn collect_repeat(
    iteration: Bindings,
    binds: &Bindings,
    collecting: &mut HashMap<String, Vec<Exp>>,
) -> Result<(), JexError> {
    for (name, value) in iteration {
        if binds.contains_key(&name) {
            return Err(JexError::match_failure(format!(
                "duplicated capture name {}",
                name
            )));
        }
        collecting.entry(name).or_default().push(value);
    }
    Ok(())
}

fn match_list_item<'a>(
    item: &ListItem,
    exps: &'a [Exp],
    binds: &mut Bindings,
    mode: SuspendMode,
) -> Result<&'a [Exp], JexError> {
    match item {
        ListItem::One(pat) => {
            let first = exps.first().ok_or_else(|| {
                JexError::match_failure(format!("expect {}, but the list is exhausted", pat))
            })?;
            match_pattern(pat, first, binds, mode)?;
            Ok(&exps[1..])
        }
        ListItem::Repeat(pat, from, to) => {
            let limit = bounded_len(exps.len(), *to);
            if (limit as i64) < *from as i64 {
                return Err(JexError::match_failure(format!(
                    "expect at least {} of {}, but found {}",
                    from,
                    pat,
                    exps.len()
                )));
            }
            let mut collecting: HashMap<String, Vec<Exp>> = HashMap::new();
            let mut taken = limit;
            for (i, exp) in exps[..limit].iter().enumerate() {
                let mut iteration = Bindings::new();
                if match_pattern(pat, exp, &mut iteration, mode).is_err() {
                    taken = i;
                    break;
                }
                collect_repeat(iteration, binds, &mut collecting)?;
            }
            if (taken as i64) < *from as i64 {
                return Err(JexError::match_failure(format!(
                    "expect at least {} of {}, but matched {}",
                    from, pat, taken
                )));
            }
            for (name, values) in collecting {
                binds.insert(name, Exp::ListExp(values));
            }
            Ok(&exps[taken..])
        }
    }
}

/// One non-repeated map item: the first entry (in key order) whose key
/// matches the regex decides; its value must match.
fn match_single_map_item(
    key_pat: &Regex,
    value_pat: &Pattern,
    entries: ImHashMap<String, Exp>,
    binds: &mut Bindings,
    mode: SuspendMode,
) -> Result<ImHashMap<String, Exp>, JexError> {
    let mut keys: Vec<String> = entries.keys().cloned().collect();
    keys.sort();
    for key in keys {
        if !key_pat.is_match(&key) {
            continue;
        }
        let Some(value) = entries.get(&key).cloned() else {
            continue;
        };
        match_pattern(value_pat, &value, binds, mode)?;
        let mut rest = entries.clone();
        rest.remove(&key);
        return Ok(rest);
    }
    Err(JexError::match_failure(format!(
        "no entry with key matching {:?}",
        key_pat.as_str()
    )))
}

fn match_map_item(
    item: &MapItem,
    entries: ImHashMap<String, Exp>,
    binds: &mut Bindings,
    mode: SuspendMode,
) -> Result<ImHashMap<String, Exp>, JexError> {
    match item.repeat {
        None => match_single_map_item(&item.key, &item.pattern, entries, binds, mode),
        Some((from, to)) => {
            let limit = bounded_len(entries.len(), to);
            if (limit as i64) < from as i64 {
                return Err(JexError::match_failure(format!(
                    "expect at least {} entries matching {:?}, but found {}",
                    from,
                    item.key.as_str(),
                    entries.len()
                )));
            }
            let mut collecting: HashMap<String, Vec<Exp>> = HashMap::new();
            let mut working = entries;
            let mut taken = 0;
            for _ in 0..limit {
                let mut iteration = Bindings::new();
                match match_single_map_item(&item.key, &item.pattern, working.clone(), &mut iteration, mode)
                {
                    Ok(rest) => {
                        working = rest;
                        collect_repeat(iteration, binds, &mut collecting)?;
                        taken += 1;
                    }
                    Err(_) => break,
                }
            }
            if (taken as i64) < from as i64 {
                return Err(JexError::match_failure(format!(
                    "expect at least {} entries matching {:?}, but matched {}",
                    from,
                    item.key.as_str(),
                    taken
                )));
            }
            for (name, values) in collecting {
                binds.insert(name, Exp::ListExp(values));
            }
            Ok(working)
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => write!(f, "{{\"any\": null}}"),
            Pattern::OfKind(kinds) => {
                write!(f, "{{\"ofKind\": [")?;
                for (i, kind) in kinds.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\"", kind)?;
                }
                write!(f, "]}}")
            }
            Pattern::Equal(exp) => write!(f, "{{\"equal\": {}}}", exp),
            Pattern::Capture(name, inner) => write!(f, "{{\"as\": [{}, {:?}]}}", inner, name),
            Pattern::SeqOr(alternatives) => {
                write!(f, "{{\"seqOr\": [")?;
                for (i, alternative) in alternatives.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", alternative)?;
                }
                write!(f, "]}}")
            }
            Pattern::Redex(name, inner) => write!(f, "{{\"redex\": [{:?}, {}]}}", name, inner),
            Pattern::SuspendExp(name, inner) => {
                write!(f, "{{\"suspendExp\": [{:?}, {}]}}", name, inner)
            }
            Pattern::SuspendValue(name, inner) => {
                write!(f, "{{\"suspendValue\": [{:?}, {}]}}", name, inner)
            }
            Pattern::List(items) => {
                write!(f, "{{\"list\": [")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        ListItem::One(pat) => write!(f, "{}", pat)?,
                        ListItem::Repeat(pat, from, to) => {
                            write!(f, "{{\"repeat\": [{}, {}, {}]}}", pat, from, bound(*to))?
                        }
                    }
                }
                write!(f, "]}}")
            }
            Pattern::Map(items) => {
                write!(f, "{{\"map\": [")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item.repeat {
                        None => write!(
                            f,
                            "{{\"item\": [{:?}, {}]}}",
                            item.key.as_str(),
                            item.pattern
                        )?,
                        Some((from, to)) => write!(
                            f,
                            "{{\"repeat\": [{:?}, {}, {}, {}]}}",
                            item.key.as_str(),
                            item.pattern,
                            from,
                            bound(to)
                        )?,
                    }
                }
                write!(f, "]}}")
            }
        }
    }
}

fn bound(to: Times) -> String {
    if to < 0 {
        "\"*\"".to_string()
    } else {
        to.to_string()
    }
}
