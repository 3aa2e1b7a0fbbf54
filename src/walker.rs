//! Depth-first document traversal.
//!
//! The walker is where a node is recognized as a reference: a mapping with a
//! string-valued `$ref` key. Reference nodes are yielded as
//! [`Node::Reference`] and their children are never visited, so sibling keys
//! of a reference are inert.

use serde_json::{Map, Value};

use crate::pointer::Pointer;

/// Key marking a JSON Reference object.
pub const REF_KEY: &str = "$ref";

/// A reference object as found in the tree.
#[derive(Debug, Clone, Copy)]
pub struct RefNode<'a> {
    /// The `$ref` string.
    pub uri: &'a str,
    /// The whole reference object, `$ref` included.
    pub object: &'a Map<String, Value>,
}

impl<'a> RefNode<'a> {
    /// Recognize `value` as a reference object.
    pub fn new(value: &'a Value) -> Option<Self> {
        let object = value.as_object()?;
        let uri = object.get(REF_KEY)?.as_str()?;
        Some(Self { uri, object })
    }

    /// Keys other than `$ref`, in document order.
    pub fn extra_keys(&self) -> Vec<&'a str> {
        self.object
            .keys()
            .filter(|k| k.as_str() != REF_KEY)
            .map(String::as_str)
            .collect()
    }
}

/// True if `value` is a JSON Reference object.
pub fn is_reference(value: &Value) -> bool {
    RefNode::new(value).is_some()
}

/// What the walker found at a location.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Value(&'a Value),
    Reference(RefNode<'a>),
}

/// One step of a traversal.
#[derive(Debug, Clone)]
pub struct Visit<'a> {
    pub pointer: Pointer,
    pub node: Node<'a>,
}

/// Lazy pre-order traversal over a document.
#[derive(Debug)]
pub struct Walk<'a> {
    pending: Vec<(Pointer, &'a Value)>,
}

/// Walk `document` depth-first, pre-order. Mapping children are visited in
/// insertion order, sequence children in index order. Each call starts a
/// fresh traversal.
pub fn walk(document: &Value) -> Walk<'_> {
    Walk {
        pending: vec![(Pointer::root(), document)],
    }
}

impl<'a> Walk<'a> {
    /// Only the reference nodes, in discovery order.
    pub fn references(self) -> impl Iterator<Item = (Pointer, RefNode<'a>)> {
        self.filter_map(|visit| match visit.node {
            Node::Reference(node) => Some((visit.pointer, node)),
            Node::Value(_) => None,
        })
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = Visit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (pointer, value) = self.pending.pop()?;

        if let Some(node) = RefNode::new(value) {
            return Some(Visit {
                pointer,
                node: Node::Reference(node),
            });
        }

        // Pushed in reverse so the first child is popped first
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter().rev() {
                    self.pending.push((pointer.child(key.as_str()), child));
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate().rev() {
                    self.pending.push((pointer.child(i.to_string()), child));
                }
            }
            _ => {}
        }

        Some(Visit {
            pointer,
            node: Node::Value(value),
        })
    }
}
