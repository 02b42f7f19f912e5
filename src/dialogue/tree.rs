use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, warn};

use crate::dialogue::node::{Node, NodeClass, NodeId, NodeKind};
use crate::directory::UserDirectory;
use crate::error::TreeError;

/// External data a tree needs before a session may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataInjection {
    SlackUsers,
}

impl DataInjection {
    /// Node class that consumes this injection.
    pub fn node_class(self) -> NodeClass {
        match self {
            DataInjection::SlackUsers => NodeClass::SlackUserChoice,
        }
    }
}

/// Payload broadcast to every node of the matching class.
#[derive(Debug, Clone)]
pub enum InjectionPayload {
    SlackUsers(Arc<UserDirectory>),
}

impl InjectionPayload {
    pub fn request(&self) -> DataInjection {
        match self {
            InjectionPayload::SlackUsers(_) => DataInjection::SlackUsers,
        }
    }
}

/// The full dialogue graph: a map of node-id -> Node plus tree metadata.
///
/// Immutable after construction except for [`Tree::inject_data`], which
/// takes `&mut self` and therefore cannot overlap a running session.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub id: i64,
    pub urgent: bool,
    nodes: BTreeMap<NodeId, Node>,
    classes: BTreeSet<NodeClass>,
    injected: BTreeSet<DataInjection>,
}

impl Tree {
    pub fn new(id: i64, urgent: bool) -> Self {
        Self {
            id,
            urgent,
            ..Self::default()
        }
    }

    /// Insert a node, rejecting ids already present.
    pub fn add_node(&mut self, node: Node) -> Result<(), TreeError> {
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::DuplicateNodeId(node.id));
        }
        self.classes.insert(node.class());
        self.nodes.insert(node.id, node);
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_class(&self, class: NodeClass) -> bool {
        self.classes.contains(&class)
    }

    pub fn requested_data_injections(&self) -> Vec<DataInjection> {
        [DataInjection::SlackUsers]
            .into_iter()
            .filter(|req| self.has_class(req.node_class()))
            .collect()
    }

    /// Requested injections that have not been supplied yet.
    pub fn pending_injections(&self) -> Vec<DataInjection> {
        self.requested_data_injections()
            .into_iter()
            .filter(|req| !self.injected.contains(req))
            .collect()
    }

    /// Broadcast `payload` to every node of the consuming class.
    pub fn inject_data(&mut self, payload: InjectionPayload) {
        let request = payload.request();
        let mut count = 0;
        for node in self.nodes.values_mut() {
            if let (NodeKind::SlackUserChoice(slack), InjectionPayload::SlackUsers(directory)) =
                (&mut node.kind, &payload)
            {
                slack.inject(Arc::clone(directory));
                count += 1;
            }
        }

        if let InjectionPayload::SlackUsers(directory) = &payload {
            let dupes = directory.duplicate_display_names();
            if !dupes.is_empty() {
                warn!(
                    "Tree {}: user directory has ambiguous display names {:?}",
                    self.id, dupes
                );
            }
        }

        debug!("Tree {}: injected {:?} into {count} node(s)", self.id, request);
        self.injected.insert(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::node::SlackUserChoice;
    use crate::directory::SlackUser;

    fn users() -> Arc<UserDirectory> {
        Arc::new(UserDirectory::new(vec![SlackUser {
            id: "U1".into(),
            name: "dana".into(),
            real_name: None,
            display_name: "Dana".into(),
        }]))
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut tree = Tree::new(1, false);
        tree.add_node(Node::new(1, "a", NodeKind::End)).unwrap();
        let err = tree.add_node(Node::new(1, "b", NodeKind::End)).unwrap_err();
        assert!(matches!(err, TreeError::DuplicateNodeId(1)));
        assert_eq!(tree.get(1).map(|n| n.text.as_str()), Some("a"));
    }

    #[test]
    fn test_injection_requests_follow_present_classes() {
        let mut tree = Tree::new(1, false);
        tree.add_node(Node::new(1, "q", NodeKind::GenericQuestion { next: Some(2) }))
            .unwrap();
        tree.add_node(Node::new(2, "end", NodeKind::End)).unwrap();
        assert!(tree.requested_data_injections().is_empty());

        tree.add_node(Node::new(
            3,
            "who",
            NodeKind::SlackUserChoice(SlackUserChoice::new(Some(2))),
        ))
        .unwrap();
        assert_eq!(tree.requested_data_injections(), vec![DataInjection::SlackUsers]);
        assert_eq!(tree.pending_injections(), vec![DataInjection::SlackUsers]);
    }

    #[test]
    fn test_inject_broadcasts_to_every_slack_node() {
        let mut tree = Tree::new(1, false);
        for id in [1, 2] {
            tree.add_node(Node::new(
                id,
                "who",
                NodeKind::SlackUserChoice(SlackUserChoice::new(Some(3))),
            ))
            .unwrap();
        }
        tree.add_node(Node::new(3, "end", NodeKind::End)).unwrap();

        tree.inject_data(InjectionPayload::SlackUsers(users()));

        assert!(tree.pending_injections().is_empty());
        for id in [1, 2] {
            assert!(tree.get(id).unwrap().verify(Some("Dana")).is_ok());
        }
    }
}
