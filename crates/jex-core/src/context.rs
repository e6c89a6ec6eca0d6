use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub type ContextRef = Arc<RwLock<Context>>;

/// Host-side metadata slot. The context never holds user bindings, so
/// the payload is an opaque host value recovered with [`get_as`].
pub type CtxValue = Arc<dyn Any + Send + Sync>;

pub fn ctx_value<T: Send + Sync + 'static>(value: T) -> CtxValue {
    Arc::new(value)
}

/// A chain of dynamic-scope frames. Evaluation metadata (eval level,
/// module table, loader handle, current module) lives here; lexical
/// user bindings live in [`crate::env::Env`].
///
/// `protect` pushes a frame that becomes the `top` seen by its
/// descendants, which is how a chained interpreter pass gets its own
/// module-table root without touching the caller's.
pub struct Context {
    data: HashMap<String, CtxValue>,
    parent: Option<ContextRef>,
    protected: bool,
}

impl Context {
    pub fn root(kvs: Vec<(&str, CtxValue)>) -> ContextRef {
        Arc::new(RwLock::new(Context {
            data: kvs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            parent: None,
            protected: true,
        }))
    }

    pub fn child_of(parent: &ContextRef, kvs: Vec<(&str, CtxValue)>) -> ContextRef {
        Arc::new(RwLock::new(Context {
            data: kvs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            parent: Some(parent.clone()),
            protected: false,
        }))
    }

    pub fn protect(parent: &ContextRef) -> ContextRef {
        Arc::new(RwLock::new(Context {
            data: HashMap::new(),
            parent: Some(parent.clone()),
            protected: true,
        }))
    }

    pub fn get(&self, key: &str) -> Option<CtxValue> {
        if let Some(v) = self.data.get(key) {
            return Some(v.clone());
        }
        match &self.parent {
            Some(parent) => parent.read().unwrap().get(key),
            None => None,
        }
    }

    pub fn set(&mut self, key: &str, value: CtxValue) {
        self.data.insert(key.to_string(), value);
    }
}

/// The nearest protected frame at or above `ctx`. The root frame is
/// always protected, so this terminates there at the latest.
pub fn top(ctx: &ContextRef) -> ContextRef {
    let mut current = ctx.clone();
    loop {
        let parent = {
            let guard = current.read().unwrap();
            if guard.protected {
                None
            } else {
                guard.parent.clone()
            }
        };
        match parent {
            None => return current,
            Some(parent) => current = parent,
        }
    }
}

/// Typed chain lookup: the value under `key`, if present and of type
/// `T`.
pub fn get_as<T: Clone + Send + Sync + 'static>(ctx: &ContextRef, key: &str) -> Option<T> {
    let value = ctx.read().unwrap().get(key)?;
    value.downcast_ref::<T>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_walks_the_chain() {
        let root = Context::root(vec![("a", ctx_value(1u32))]);
        let child = Context::child_of(&root, vec![("b", ctx_value(2u32))]);
        assert_eq!(get_as::<u32>(&child, "a"), Some(1));
        assert_eq!(get_as::<u32>(&child, "b"), Some(2));
        assert_eq!(get_as::<u32>(&root, "b"), None);
    }

    #[test]
    fn set_shadows_only_the_current_frame() {
        let root = Context::root(vec![("a", ctx_value(1u32))]);
        let child = Context::child_of(&root, vec![]);
        child.write().unwrap().set("a", ctx_value(9u32));
        assert_eq!(get_as::<u32>(&child, "a"), Some(9));
        assert_eq!(get_as::<u32>(&root, "a"), Some(1));
    }

    #[test]
    fn top_is_the_nearest_protected_frame() {
        let root = Context::root(vec![]);
        let child = Context::child_of(&root, vec![]);
        let grandchild = Context::child_of(&child, vec![]);
        assert!(Arc::ptr_eq(&top(&grandchild), &root));

        let protected = Context::protect(&grandchild);
        let below = Context::child_of(&protected, vec![]);
        assert!(Arc::ptr_eq(&top(&below), &protected));
        // Writes on the re-rooted top stay invisible to the original root.
        top(&below).write().unwrap().set("k", ctx_value(3u32));
        assert_eq!(get_as::<u32>(&root, "k"), None);
        assert_eq!(get_as::<u32>(&below, "k"), Some(3));
    }
}
