//! Shared-structure document graph handed to adapter extensions.
//!
//! Extension artifacts are graphs, not trees: a node may appear under several
//! parents or reference itself, and map entries may hold native callbacks.
//! [`clone_node`] gives each extension a private copy that preserves sharing
//! and cycles while dropping every callback, so an extension can neither
//! mutate its predecessor's view nor smuggle executable state forward.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// A shared, mutable handle to one document node.
pub type Node = Rc<RefCell<Value>>;

/// Native callback attached to a document node. Never survives a clone.
pub type NativeFn = dyn Fn(&[Node]) -> Node;

pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Node>),
    Map(BTreeMap<String, Node>),
    Func(Rc<NativeFn>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(items) => write!(f, "List(len={})", items.len()),
            Value::Map(entries) => write!(f, "Map(len={})", entries.len()),
            Value::Func(_) => f.write_str("Func"),
        }
    }
}

pub fn node(value: Value) -> Node {
    Rc::new(RefCell::new(value))
}

/// Deep-clones a node graph.
///
/// Sharing is preserved by identity: a node reached twice clones once, and
/// self references point back into the clone. `Func` values vanish — map
/// entries and list elements holding one are omitted, and a bare `Func` root
/// clones to `Null`.
pub fn clone_node(source: &Node) -> Node {
    let mut visited: HashMap<*const RefCell<Value>, Node> = HashMap::new();
    clone_into(source, &mut visited)
}

fn clone_into(source: &Node, visited: &mut HashMap<*const RefCell<Value>, Node>) -> Node {
    let key = Rc::as_ptr(source);
    if let Some(existing) = visited.get(&key) {
        return Rc::clone(existing);
    }
    // Register the placeholder before descending so cycles resolve to it.
    let target = node(Value::Null);
    visited.insert(key, Rc::clone(&target));

    let cloned = match &*source.borrow() {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(*b),
        Value::Number(n) => Value::Number(*n),
        Value::String(s) => Value::String(s.clone()),
        Value::Func(_) => Value::Null,
        Value::List(items) => Value::List(
            items
                .iter()
                .filter(|item| !is_func(item))
                .map(|item| clone_into(item, visited))
                .collect(),
        ),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .filter(|(_, child)| !is_func(child))
                .map(|(name, child)| (name.clone(), clone_into(child, visited)))
                .collect(),
        ),
    };
    *target.borrow_mut() = cloned;
    target
}

fn is_func(node: &Node) -> bool {
    matches!(&*node.borrow(), Value::Func(_))
}

/// Builds a document graph from plain JSON. The result is always a tree.
pub fn from_json(value: &serde_json::Value) -> Node {
    let converted = match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(from_json).collect()),
        serde_json::Value::Object(entries) => Value::Map(
            entries
                .iter()
                .map(|(name, child)| (name.clone(), from_json(child)))
                .collect(),
        ),
    };
    node(converted)
}

/// Projects a graph back to JSON. Callbacks are omitted the same way
/// [`clone_node`] omits them; a back reference closing a cycle becomes
/// `null`, since JSON cannot express it.
pub fn to_json(source: &Node) -> serde_json::Value {
    let mut in_progress: HashSet<*const RefCell<Value>> = HashSet::new();
    to_json_inner(source, &mut in_progress)
}

fn to_json_inner(
    source: &Node,
    in_progress: &mut HashSet<*const RefCell<Value>>,
) -> serde_json::Value {
    let key = Rc::as_ptr(source);
    if !in_progress.insert(key) {
        return serde_json::Value::Null;
    }
    let result = match &*source.borrow() {
        Value::Null | Value::Func(_) => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .filter(|item| !is_func(item))
                .map(|item| to_json_inner(item, in_progress))
                .collect(),
        ),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .filter(|(_, child)| !is_func(child))
                .map(|(name, child)| (name.clone(), to_json_inner(child, in_progress)))
                .collect(),
        ),
    };
    in_progress.remove(&key);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn clone_preserves_self_reference_and_drops_funcs() {
        let root = node(Value::Map(BTreeMap::new()));
        {
            let mut entries = BTreeMap::new();
            entries.insert("self".to_string(), Rc::clone(&root));
            entries.insert(
                "fn".to_string(),
                node(Value::Func(Rc::new(|_| node(Value::Null)))),
            );
            entries.insert("label".to_string(), node(Value::String("acme".into())));
            *root.borrow_mut() = Value::Map(entries);
        }

        let cloned = clone_node(&root);
        assert!(!Rc::ptr_eq(&cloned, &root));
        let borrowed = cloned.borrow();
        let Value::Map(entries) = &*borrowed else {
            panic!("clone is not a map");
        };
        assert!(!entries.contains_key("fn"));
        let self_ref = entries.get("self").expect("self entry survives");
        assert!(Rc::ptr_eq(self_ref, &cloned), "self reference must close on the clone");
        assert!(matches!(
            &*entries.get("label").expect("label").borrow(),
            Value::String(s) if s == "acme"
        ));
    }

    #[test]
    fn clone_preserves_shared_nodes_once() {
        let shared = node(Value::String("shared".into()));
        let root = node(Value::List(vec![Rc::clone(&shared), Rc::clone(&shared)]));

        let cloned = clone_node(&root);
        let borrowed = cloned.borrow();
        let Value::List(items) = &*borrowed else {
            panic!("clone is not a list");
        };
        assert_eq!(items.len(), 2);
        assert!(Rc::ptr_eq(&items[0], &items[1]));
        assert!(!Rc::ptr_eq(&items[0], &shared));
    }

    #[test]
    fn clone_is_deep_for_mutation() {
        let root = from_json(&serde_json::json!({ "count": 1.0 }));
        let cloned = clone_node(&root);
        if let Value::Map(entries) = &mut *cloned.borrow_mut() {
            entries.insert("count".to_string(), node(Value::Number(2.0)));
        }
        assert_eq!(to_json(&root), serde_json::json!({ "count": 1.0 }));
        assert_eq!(to_json(&cloned), serde_json::json!({ "count": 2.0 }));
    }

    #[test]
    fn json_round_trip_omits_funcs() {
        let root = from_json(&serde_json::json!({ "a": [1.0, "two"], "b": null }));
        if let Value::Map(entries) = &mut *root.borrow_mut() {
            entries.insert(
                "cb".to_string(),
                node(Value::Func(Rc::new(|_| node(Value::Null)))),
            );
        }
        assert_eq!(
            to_json(&root),
            serde_json::json!({ "a": [1.0, "two"], "b": null })
        );
    }
}
