use std::fmt;
use std::sync::Arc;

use im::HashMap;

use crate::context::ContextRef;
use crate::env::EnvRef;
use crate::error::JexError;

/// Discriminator for every expression node. The first group are value
/// kinds (no further reduction needed), the second group may still
/// reduce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Number,
    Str,
    ListValue,
    MapValue,
    SuspendValue,
    Closure,
    Primitive,
    Uninitialized,
    Ambiguous,
    ListExp,
    MapExp,
    Redex,
    SuspendExp,
    Delayed,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Number => "number",
            Kind::Str => "string",
            Kind::ListValue => "list value",
            Kind::MapValue => "map value",
            Kind::SuspendValue => "suspend value",
            Kind::Closure => "closure",
            Kind::Primitive => "primitive",
            Kind::Uninitialized => "uninitialized",
            Kind::Ambiguous => "ambiguous",
            Kind::ListExp => "list exp",
            Kind::MapExp => "map exp",
            Kind::Redex => "redex",
            Kind::SuspendExp => "suspend exp",
            Kind::Delayed => "delayed",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named reducible expression: the unit of dispatch for the
/// interpreter and the payload of both suspend wrappers.
#[derive(Clone)]
pub struct Redex {
    pub name: String,
    pub exp: Exp,
}

impl Redex {
    pub fn new(name: impl Into<String>, exp: Exp) -> Self {
        Self {
            name: name.into(),
            exp,
        }
    }

    pub fn equal(&self, other: &Redex) -> bool {
        self.name == other.name && self.exp.equal(&other.exp)
    }
}

/// A thunk returned by a redex evaluator to the interpreter loop. Not
/// first class: never stored in a binding, never printed, never equal
/// to anything.
#[derive(Clone)]
pub struct Delayed {
    pub ctx: ContextRef,
    pub exp: Exp,
    pub env: EnvRef,
}

/// A user function: parameter names, body, and the captured lexical
/// environment. Compared by identity.
pub struct Closure {
    pub params: Vec<String>,
    pub body: Exp,
    pub env: EnvRef,
}

/// A host function installed by the prelude. Arity is exact.
pub struct Primitive {
    pub name: String,
    pub arity: usize,
    pub func: Box<dyn Fn(&[Exp]) -> Result<Exp, JexError> + Send + Sync>,
}

/// The whole expression algebra as one tagged variant: the syntax tree,
/// the expression type, and the value type share this representation.
#[derive(Clone)]
pub enum Exp {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    ListValue(Vec<Exp>),
    MapValue(HashMap<String, Exp>),
    SuspendValue(Box<Redex>),
    Closure(Arc<Closure>),
    Primitive(Arc<Primitive>),
    Uninitialized,
    Ambiguous,
    ListExp(Vec<Exp>),
    MapExp(HashMap<String, Exp>),
    Redex(Box<Redex>),
    SuspendExp(Box<Redex>),
    Delayed(Box<Delayed>),
}

impl Exp {
    pub fn string(s: impl Into<String>) -> Exp {
        Exp::Str(s.into())
    }

    pub fn redex(name: impl Into<String>, exp: Exp) -> Exp {
        Exp::Redex(Box::new(Redex::new(name, exp)))
    }

    pub fn suspend_exp(redex: Redex) -> Exp {
        Exp::SuspendExp(Box::new(redex))
    }

    pub fn suspend_value(redex: Redex) -> Exp {
        Exp::SuspendValue(Box::new(redex))
    }

    pub fn delayed(ctx: ContextRef, exp: Exp, env: EnvRef) -> Exp {
        Exp::Delayed(Box::new(Delayed { ctx, exp, env }))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Exp::Null => Kind::Null,
            Exp::Bool(_) => Kind::Bool,
            Exp::Number(_) => Kind::Number,
            Exp::Str(_) => Kind::Str,
            Exp::ListValue(_) => Kind::ListValue,
            Exp::MapValue(_) => Kind::MapValue,
            Exp::SuspendValue(_) => Kind::SuspendValue,
            Exp::Closure(_) => Kind::Closure,
            Exp::Primitive(_) => Kind::Primitive,
            Exp::Uninitialized => Kind::Uninitialized,
            Exp::Ambiguous => Kind::Ambiguous,
            Exp::ListExp(_) => Kind::ListExp,
            Exp::MapExp(_) => Kind::MapExp,
            Exp::Redex(_) => Kind::Redex,
            Exp::SuspendExp(_) => Kind::SuspendExp,
            Exp::Delayed(_) => Kind::Delayed,
        }
    }

    /// A value needs no further reduction: every value kind, a
    /// list/map exp all of whose children are values, and a suspend
    /// exp wrapping a value. Redexes and delayed thunks never are.
    pub fn is_value(&self) -> bool {
        match self {
            Exp::Delayed(_) | Exp::Redex(_) => false,
            Exp::ListExp(items) => items.iter().all(Exp::is_value),
            Exp::MapExp(entries) => entries.values().all(Exp::is_value),
            Exp::SuspendExp(redex) => redex.exp.is_value(),
            _ => true,
        }
    }

    /// Structural equality. Lists and maps compare pointwise, suspend
    /// wrappers compare their redexes, closures and primitives compare
    /// by identity, delayed thunks are never equal.
    pub fn equal(&self, other: &Exp) -> bool {
        match (self, other) {
            (Exp::Null, Exp::Null) => true,
            (Exp::Bool(a), Exp::Bool(b)) => a == b,
            (Exp::Number(a), Exp::Number(b)) => a == b,
            (Exp::Str(a), Exp::Str(b)) => a == b,
            (Exp::ListValue(a), Exp::ListValue(b)) | (Exp::ListExp(a), Exp::ListExp(b)) => {
                equal_lists(a, b)
            }
            (Exp::MapValue(a), Exp::MapValue(b)) | (Exp::MapExp(a), Exp::MapExp(b)) => {
                equal_maps(a, b)
            }
            (Exp::SuspendValue(a), Exp::SuspendValue(b)) => a.equal(b),
            (Exp::SuspendExp(a), Exp::SuspendExp(b)) => a.equal(b),
            (Exp::Redex(a), Exp::Redex(b)) => a.equal(b),
            (Exp::Closure(a), Exp::Closure(b)) => Arc::ptr_eq(a, b),
            (Exp::Primitive(a), Exp::Primitive(b)) => Arc::ptr_eq(a, b),
            (Exp::Uninitialized, Exp::Uninitialized) => true,
            (Exp::Ambiguous, Exp::Ambiguous) => true,
            _ => false,
        }
    }

    // Accessors in the style of the usual `as_*` family: a kind check
    // plus the payload, with a type-mismatch error otherwise.

    pub fn as_bool(&self) -> Result<bool, JexError> {
        match self {
            Exp::Bool(b) => Ok(*b),
            other => Err(mismatch(Kind::Bool, other)),
        }
    }

    pub fn as_number(&self) -> Result<f64, JexError> {
        match self {
            Exp::Number(n) => Ok(*n),
            other => Err(mismatch(Kind::Number, other)),
        }
    }

    pub fn as_str(&self) -> Result<&str, JexError> {
        match self {
            Exp::Str(s) => Ok(s),
            other => Err(mismatch(Kind::Str, other)),
        }
    }

    pub fn as_list_value(&self) -> Result<&[Exp], JexError> {
        match self {
            Exp::ListValue(items) => Ok(items),
            other => Err(mismatch(Kind::ListValue, other)),
        }
    }

    pub fn as_list_exp(&self) -> Result<&[Exp], JexError> {
        match self {
            Exp::ListExp(items) => Ok(items),
            other => Err(mismatch(Kind::ListExp, other)),
        }
    }

    pub fn as_map_exp(&self) -> Result<&HashMap<String, Exp>, JexError> {
        match self {
            Exp::MapExp(entries) => Ok(entries),
            other => Err(mismatch(Kind::MapExp, other)),
        }
    }

    pub fn as_redex(&self) -> Result<&Redex, JexError> {
        match self {
            Exp::Redex(redex) => Ok(redex),
            other => Err(mismatch(Kind::Redex, other)),
        }
    }

    pub fn as_primitive(&self) -> Result<&Arc<Primitive>, JexError> {
        match self {
            Exp::Primitive(primitive) => Ok(primitive),
            other => Err(mismatch(Kind::Primitive, other)),
        }
    }
}

fn mismatch(expected: Kind, actual: &Exp) -> JexError {
    JexError::type_mismatch(expected.name(), actual.kind().name())
}

pub fn equal_lists(a: &[Exp], b: &[Exp]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equal(y))
}

pub fn equal_maps(a: &HashMap<String, Exp>, b: &HashMap<String, Exp>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.get(k).map(|w| v.equal(w)).unwrap_or(false))
}

impl PartialEq for Exp {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in s.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("\"")
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Exp]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str("]")
}

fn write_map(f: &mut fmt::Formatter<'_>, entries: &HashMap<String, Exp>) -> fmt::Result {
    // Key order is not observable; print sorted so output is stable.
    let mut keys: Vec<&String> = entries.keys().collect();
    keys.sort();
    f.write_str("{")?;
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_escaped(f, key)?;
        f.write_str(": ")?;
        write!(f, "{}", entries[key])?;
    }
    f.write_str("}")
}

impl fmt::Display for Redex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.name)?;
        f.write_str(": ")?;
        write!(f, "{}", self.exp)
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exp::Null => f.write_str("null"),
            Exp::Bool(b) => write!(f, "{}", b),
            Exp::Number(n) => write!(f, "{}", n),
            Exp::Str(s) => write_escaped(f, s),
            Exp::ListValue(items) | Exp::ListExp(items) => write_list(f, items),
            Exp::MapValue(entries) | Exp::MapExp(entries) => write_map(f, entries),
            Exp::SuspendValue(redex) => write!(f, "{{\"data\": {{{}}}}}", redex),
            Exp::SuspendExp(redex) => write!(f, "{{\"suspend\": {{{}}}}}", redex),
            Exp::Redex(redex) => write!(f, "{{{}}}", redex),
            Exp::Closure(closure) => {
                f.write_str("{\"closure\": [")?;
                for (i, param) in closure.params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_escaped(f, param)?;
                }
                f.write_str("]}")
            }
            Exp::Primitive(primitive) => {
                f.write_str("{\"primitive\": ")?;
                write_escaped(f, &primitive.name)?;
                f.write_str("}")
            }
            Exp::Uninitialized => f.write_str("{\"uninitialized\": null}"),
            Exp::Ambiguous => f.write_str("{\"ambiguous\": null}"),
            Exp::Delayed(delayed) => write!(f, "{{\"delayed\": {}}}", delayed.exp),
        }
    }
}

impl fmt::Debug for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
