//! Address space implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::error::AddressSpaceError;
use crate::monitor::MonitoredItem;
use crate::node::{DataValue, NodeClass, NodeId, Variant};

const RESERVED_NAMESPACES: [&str; 2] = ["urn:address-space:core", "urn:address-space:server"];

/// Root folder that application objects hang off
pub const OBJECTS_FOLDER: NodeId = NodeId::new(0, 85);

struct Node {
    browse_name: String,
    class: NodeClass,
    children: Vec<NodeId>,
    value: Option<watch::Sender<DataValue>>,
}

struct SpaceInner {
    namespaces: Vec<String>,
    next_ids: HashMap<u16, u32>,
    nodes: HashMap<NodeId, Node>,
}

/// Shared handle to an address space. Cloning is cheap and every clone sees the
/// same nodes.
#[derive(Clone)]
pub struct AddressSpace {
    inner: Arc<RwLock<SpaceInner>>,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("AddressSpace")
            .field("namespaces", &inner.namespaces)
            .field("nodes", &inner.nodes.len())
            .finish()
    }
}

impl AddressSpace {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            OBJECTS_FOLDER,
            Node {
                browse_name: "Objects".to_string(),
                class: NodeClass::Object,
                children: Vec::new(),
                value: None,
            },
        );

        Self {
            inner: Arc::new(RwLock::new(SpaceInner {
                namespaces: RESERVED_NAMESPACES.iter().map(|s| s.to_string()).collect(),
                next_ids: HashMap::new(),
                nodes,
            })),
        }
    }

    pub fn objects_folder(&self) -> NodeId {
        OBJECTS_FOLDER
    }

    /// Register a namespace URI and return its index. Registering the same URI
    /// twice returns the existing index.
    pub fn register_namespace(&self, uri: &str) -> u16 {
        let mut inner = self.inner.write();
        if let Some(idx) = inner.namespaces.iter().position(|ns| ns == uri) {
            return idx as u16;
        }
        inner.namespaces.push(uri.to_string());
        let idx = (inner.namespaces.len() - 1) as u16;
        tracing::debug!("Registered namespace {} at index {}", uri, idx);
        idx
    }

    pub fn namespace_uri(&self, index: u16) -> Option<String> {
        self.inner.read().namespaces.get(index as usize).cloned()
    }

    /// Add an object node under `parent`
    pub fn add_object(
        &self,
        parent: NodeId,
        namespace: u16,
        name: &str,
    ) -> Result<NodeId, AddressSpaceError> {
        self.add_node(parent, namespace, name, NodeClass::Object, None)
    }

    /// Add a variable node under `parent`. The initial value fixes the
    /// variable's type.
    pub fn add_variable(
        &self,
        parent: NodeId,
        namespace: u16,
        name: &str,
        initial: impl Into<Variant>,
    ) -> Result<NodeId, AddressSpaceError> {
        let (tx, _) = watch::channel(DataValue::now(initial.into()));
        self.add_node(parent, namespace, name, NodeClass::Variable, Some(tx))
    }

    fn add_node(
        &self,
        parent: NodeId,
        namespace: u16,
        name: &str,
        class: NodeClass,
        value: Option<watch::Sender<DataValue>>,
    ) -> Result<NodeId, AddressSpaceError> {
        let mut inner = self.inner.write();
        if namespace as usize >= inner.namespaces.len() {
            return Err(AddressSpaceError::UnknownNamespace(namespace));
        }

        let duplicate = {
            let parent_node = inner
                .nodes
                .get(&parent)
                .ok_or_else(|| AddressSpaceError::NodeNotFound(parent.to_string()))?;
            parent_node
                .children
                .iter()
                .any(|child| inner.nodes.get(child).is_some_and(|n| n.browse_name == name))
        };
        if duplicate {
            return Err(AddressSpaceError::DuplicateBrowseName { parent, name: name.to_string() });
        }

        let next = inner.next_ids.entry(namespace).or_insert(1);
        let node_id = NodeId::new(namespace, *next);
        *next += 1;

        inner.nodes.insert(
            node_id,
            Node { browse_name: name.to_string(), class, children: Vec::new(), value },
        );
        if let Some(parent_node) = inner.nodes.get_mut(&parent) {
            parent_node.children.push(node_id);
        }

        Ok(node_id)
    }

    /// Look up a direct child of `parent` by browse name
    pub fn find_child(&self, parent: NodeId, name: &str) -> Result<NodeId, AddressSpaceError> {
        let inner = self.inner.read();
        let parent_node = inner
            .nodes
            .get(&parent)
            .ok_or_else(|| AddressSpaceError::NodeNotFound(parent.to_string()))?;
        parent_node
            .children
            .iter()
            .copied()
            .find(|child| inner.nodes.get(child).is_some_and(|n| n.browse_name == name))
            .ok_or_else(|| AddressSpaceError::NodeNotFound(format!("{parent}/{name}")))
    }

    pub fn browse_name(&self, node: NodeId) -> Option<String> {
        self.inner.read().nodes.get(&node).map(|n| n.browse_name.clone())
    }

    pub fn node_class(&self, node: NodeId) -> Option<NodeClass> {
        self.inner.read().nodes.get(&node).map(|n| n.class)
    }

    /// Children of `node` in creation order
    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>, AddressSpaceError> {
        let inner = self.inner.read();
        inner
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .ok_or_else(|| AddressSpaceError::NodeNotFound(node.to_string()))
    }

    pub fn write_value(
        &self,
        node: NodeId,
        value: impl Into<Variant>,
    ) -> Result<(), AddressSpaceError> {
        self.write_values(&[(node, value.into())])
    }

    /// Write several variables as one update. Either every value is written or
    /// none is, and concurrent readers never observe a partial write.
    pub fn write_values(&self, writes: &[(NodeId, Variant)]) -> Result<(), AddressSpaceError> {
        let inner = self.inner.write();

        let mut senders = Vec::with_capacity(writes.len());
        for (node, value) in writes {
            let sender = variable(&inner, *node)?;
            let current = sender.borrow().value.type_name();
            if current != value.type_name() {
                return Err(AddressSpaceError::TypeMismatch {
                    node: *node,
                    expected: current,
                    found: value.type_name(),
                });
            }
            senders.push(sender);
        }

        for (sender, (_, value)) in senders.into_iter().zip(writes) {
            sender.send_replace(DataValue::now(value.clone()));
        }
        Ok(())
    }

    pub fn read_value(&self, node: NodeId) -> Result<DataValue, AddressSpaceError> {
        let inner = self.inner.read();
        let value = variable(&inner, node)?.borrow().clone();
        Ok(value)
    }

    /// Read several variables under one lock, so the result is consistent with
    /// a single [`write_values`](Self::write_values) batch.
    pub fn read_values(&self, nodes: &[NodeId]) -> Result<Vec<DataValue>, AddressSpaceError> {
        let inner = self.inner.read();
        nodes.iter().map(|node| Ok(variable(&inner, *node)?.borrow().clone())).collect()
    }

    /// Subscribe to changes of a variable, sampled at most once per `interval`
    pub fn subscribe(
        &self,
        node: NodeId,
        interval: Duration,
    ) -> Result<MonitoredItem, AddressSpaceError> {
        let inner = self.inner.read();
        let receiver = variable(&inner, node)?.subscribe();
        Ok(MonitoredItem::new(node, receiver, interval))
    }
}

fn variable(inner: &SpaceInner, node: NodeId) -> Result<&watch::Sender<DataValue>, AddressSpaceError> {
    let n = inner.nodes.get(&node).ok_or_else(|| AddressSpaceError::NodeNotFound(node.to_string()))?;
    n.value.as_ref().ok_or(AddressSpaceError::NotAVariable(node))
}
