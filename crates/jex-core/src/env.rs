use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::exp::Exp;

pub type EnvRef = Arc<RwLock<Env>>;

/// A chain of lexical frames holding user bindings. Closures share
/// their captured environment by reference: a `set` in a captured
/// frame is visible to every holder.
#[derive(Clone, Default)]
pub struct Env {
    data: HashMap<String, Exp>,
    outer: Option<EnvRef>,
}

impl Env {
    pub fn with_bindings(kvs: HashMap<String, Exp>) -> Self {
        Self {
            data: kvs,
            outer: None,
        }
    }

    pub fn new_child(outer: EnvRef) -> Self {
        Self {
            data: HashMap::new(),
            outer: Some(outer),
        }
    }

    /// Chain lookup. Absence is the caller's name-not-found error.
    pub fn get(&self, name: &str) -> Option<Exp> {
        if let Some(v) = self.data.get(name) {
            return Some(v.clone());
        }
        match &self.outer {
            Some(outer) => outer.read().unwrap().get(name),
            None => None,
        }
    }

    /// Write into the innermost frame, shadowing any outer binding.
    pub fn define(&mut self, name: &str, value: Exp) {
        self.data.insert(name.to_string(), value);
    }

    /// Mutate the frame that defined `name`. Returns false when the
    /// name is unbound in the whole chain.
    pub fn set_in_chain(&mut self, name: &str, value: Exp) -> bool {
        if self.data.contains_key(name) {
            self.data.insert(name.to_string(), value);
            return true;
        }
        match &self.outer {
            Some(outer) => outer.write().unwrap().set_in_chain(name, value),
            None => false,
        }
    }
}

pub fn new_ref(env: Env) -> EnvRef {
    Arc::new(RwLock::new(env))
}

/// Push a new frame populated with `kvs` on top of `env`.
pub fn extend(env: &EnvRef, kvs: HashMap<String, Exp>) -> EnvRef {
    let mut child = Env::new_child(env.clone());
    child.data = kvs;
    new_ref(child)
}

/// Shallow-copy the innermost frame so define/set on the result do not
/// affect the original, while lookups still chain through the same
/// parents.
pub fn protect(env: &EnvRef) -> EnvRef {
    let guard = env.read().unwrap();
    new_ref(Env {
        data: guard.data.clone(),
        outer: guard.outer.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Exp {
        Exp::Number(n)
    }

    #[test]
    fn define_and_get_chain() {
        let base = new_ref(Env::default());
        base.write().unwrap().define("x", num(1.0));
        let child = extend(&base, HashMap::new());
        assert_eq!(child.read().unwrap().get("x"), Some(num(1.0)));
        child.write().unwrap().define("x", num(2.0));
        assert_eq!(child.read().unwrap().get("x"), Some(num(2.0)));
        assert_eq!(base.read().unwrap().get("x"), Some(num(1.0)));
    }

    #[test]
    fn set_mutates_the_defining_frame() {
        let base = new_ref(Env::default());
        base.write().unwrap().define("x", num(1.0));
        let child = extend(&base, HashMap::new());
        assert!(child.write().unwrap().set_in_chain("x", num(5.0)));
        assert_eq!(base.read().unwrap().get("x"), Some(num(5.0)));
        assert!(!child.write().unwrap().set_in_chain("missing", num(0.0)));
    }

    #[test]
    fn sibling_extends_do_not_see_each_other() {
        let base = new_ref(Env::default());
        let left = extend(
            &base,
            HashMap::from([("a".to_string(), num(1.0))]),
        );
        let right = extend(
            &base,
            HashMap::from([("b".to_string(), num(2.0))]),
        );
        assert_eq!(left.read().unwrap().get("b"), None);
        assert_eq!(right.read().unwrap().get("a"), None);
    }

    #[test]
    fn protect_isolates_writes_but_keeps_lookups() {
        let base = new_ref(Env::default());
        base.write().unwrap().define("x", num(1.0));
        let child = extend(&base, HashMap::from([("y".to_string(), num(2.0))]));
        let shielded = protect(&child);

        shielded.write().unwrap().define("y", num(9.0));
        shielded.write().unwrap().define("z", num(3.0));
        assert_eq!(child.read().unwrap().get("y"), Some(num(2.0)));
        assert_eq!(child.read().unwrap().get("z"), None);
        assert_eq!(shielded.read().unwrap().get("x"), Some(num(1.0)));
        assert_eq!(shielded.read().unwrap().get("y"), Some(num(9.0)));
    }
}
