//! In-memory model of a ComfyUI API-format workflow graph.
//!
//! A graph document is a JSON object keyed by node id:
//!
//! ```json
//! {
//!   "3": {
//!     "class_type": "KSampler",
//!     "inputs": { "seed": 42, "model": ["1", 0] },
//!     "_meta": { "title": "KSampler" }
//!   }
//! }
//! ```
//!
//! Nodes are kept in document order. Parsing is deliberately lenient:
//! unknown class types and missing `inputs` are accepted, because the
//! extractor and injector treat absence as "not applicable".

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Optional metadata attached to a node by the graph editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Any other metadata keys, carried through untouched. A non-string
    /// `title` lands here too.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeMeta {
    fn from_map(map: Map<String, Value>) -> Self {
        let mut meta = Self::default();
        for (key, value) in map {
            let value = match (key.as_str(), value) {
                ("title", Value::String(title)) => {
                    meta.title = Some(title);
                    continue;
                }
                (_, value) => value,
            };
            meta.extra.insert(key, value);
        }
        meta
    }

    fn is_empty(&self) -> bool {
        self.title.is_none() && self.extra.is_empty()
    }
}

/// A single processing step in a graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// ComfyUI class type (e.g. `"KSampler"`). Empty when absent.
    pub class_type: String,
    /// Named inputs. Literal values or `[node_id, output_index]` links.
    pub inputs: Map<String, Value>,
    pub meta: NodeMeta,
    /// Unrecognised top-level node fields, preserved for re-serialization.
    /// Known fields of an unexpected JSON type are kept here verbatim.
    pub extra: Map<String, Value>,
}

impl Node {
    /// Read a node from its JSON object without rejecting anything.
    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut node = Self::default();
        for (key, value) in map {
            let value = match (key.as_str(), value) {
                ("class_type", Value::String(class_type)) => {
                    node.class_type = class_type;
                    continue;
                }
                ("inputs", Value::Object(inputs)) => {
                    node.inputs = inputs;
                    continue;
                }
                ("_meta", Value::Object(meta)) => {
                    node.meta = NodeMeta::from_map(meta);
                    continue;
                }
                (_, value) => value,
            };
            node.extra.insert(key, value);
        }
        node
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        // A raw value kept in `extra` takes the place of the typed field.
        if !self.extra.contains_key("class_type") {
            map.serialize_entry("class_type", &self.class_type)?;
        }
        if !self.extra.contains_key("inputs") {
            map.serialize_entry("inputs", &self.inputs)?;
        }
        if !self.meta.is_empty() {
            map.serialize_entry("_meta", &self.meta)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Node {
    /// Create a node with the given class type and inputs.
    pub fn new(class_type: impl Into<String>, inputs: Map<String, Value>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs,
            ..Default::default()
        }
    }

    /// Editor-assigned title, if any.
    pub fn title(&self) -> Option<&str> {
        self.meta.title.as_deref()
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    pub fn has_input(&self, key: &str) -> bool {
        self.inputs.contains_key(key)
    }

    /// A literal string input. Links and non-string values yield `None`.
    pub fn str_input(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(Value::as_str)
    }

    /// Overwrite an input only if the node already declares it.
    ///
    /// Returns `true` when the value was written.
    pub fn replace_input(&mut self, key: &str, value: Value) -> bool {
        match self.inputs.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(map) => Ok(Node::from_map(map)),
            other => Err(serde::de::Error::custom(format!(
                "node must be an object, got {other}"
            ))),
        }
    }
}

/// `true` for ComfyUI link references (`["4", 0]`), which are never
/// editable literal values.
pub fn is_link(value: &Value) -> bool {
    matches!(
        value.as_array(),
        Some(arr) if arr.len() == 2 && (arr[0].is_string() || arr[0].is_u64())
    )
}

/// A parsed workflow graph: node id to [`Node`], in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: Vec<(String, Node)>,
}

impl Graph {
    /// Parse a graph from JSON text.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| CoreError::MalformedGraph(format!("Invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Build a graph from an already-decoded JSON document.
    ///
    /// Fails with [`CoreError::MalformedGraph`] unless the document is an
    /// object whose values are all node objects. Node contents are not
    /// validated.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let Value::Object(obj) = value else {
            return Err(CoreError::MalformedGraph(
                "Workflow JSON must be an object".to_string(),
            ));
        };

        let mut nodes = Vec::with_capacity(obj.len());
        for (node_id, node_value) in obj {
            let Value::Object(node_map) = node_value else {
                return Err(CoreError::MalformedGraph(format!(
                    "Node '{node_id}' is not an object"
                )));
            };
            nodes.push((node_id, Node::from_map(node_map)));
        }

        Ok(Self { nodes })
    }

    /// Read and parse a graph file.
    pub fn load(path: &std::path::Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        Self::parse(&text)
    }

    /// Serialize back to a JSON document, preserving node order.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::with_capacity(self.nodes.len());
        for (id, node) in &self.nodes {
            let node_value = serde_json::to_value(node).unwrap_or(Value::Null);
            obj.insert(id.clone(), node_value);
        }
        Value::Object(obj)
    }

    /// Iterate `(node_id, node)` pairs in document order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = (&str, &mut Node)> {
        self.nodes.iter_mut().map(|(id, node)| (id.as_str(), node))
    }

    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|(id, _)| id == node_id)
            .map(|(_, node)| node)
    }

    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|(id, _)| id == node_id)
            .map(|(_, node)| node)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a node. Test fixtures and programmatic builders only; the
    /// injector never adds nodes.
    pub fn insert(&mut self, node_id: impl Into<String>, node: Node) {
        let node_id = node_id.into();
        match self.get_mut(&node_id) {
            Some(existing) => *existing = node,
            None => self.nodes.push((node_id, node)),
        }
    }
}

impl Serialize for Graph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for (id, node) in &self.nodes {
            map.serialize_entry(id, node)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Graph {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Graph::from_value(value).map_err(serde::de::Error::custom)
    }
}
