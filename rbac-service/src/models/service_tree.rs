//! Service tree node model - the packages and functions a workspace hosts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::action::{actions_for, ActionCode, ResourceType};

/// Structural kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Workspace root.
    App,
    Package,
    Function,
}

/// Template a function node renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateType {
    Table,
    Form,
    Chart,
}

impl From<TemplateType> for ResourceType {
    fn from(t: TemplateType) -> Self {
        match t {
            TemplateType::Table => ResourceType::Table,
            TemplateType::Form => ResourceType::Form,
            TemplateType::Chart => ResourceType::Chart,
        }
    }
}

/// A node of the service tree as handed to the permission calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTreeNode {
    pub full_code_path: String,
    pub node_kind: NodeKind,
    #[serde(default)]
    pub template_type: Option<TemplateType>,
    #[serde(default)]
    pub children: Vec<ServiceTreeNode>,
}

impl ServiceTreeNode {
    pub fn package(path: impl Into<String>, children: Vec<ServiceTreeNode>) -> Self {
        Self {
            full_code_path: path.into(),
            node_kind: NodeKind::Package,
            template_type: None,
            children,
        }
    }

    pub fn function(path: impl Into<String>, template_type: TemplateType) -> Self {
        Self {
            full_code_path: path.into(),
            node_kind: NodeKind::Function,
            template_type: Some(template_type),
            children: Vec::new(),
        }
    }

    pub fn resource_type(&self) -> Option<ResourceType> {
        resource_type_of(self.node_kind, self.template_type)
    }

    /// Depth-first iterator over this node and its descendants.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceTreeNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }
}

/// Resource type of a node, determined by kind and template only.
///
/// Function nodes without a template have no resource type.
pub fn resource_type_of(kind: NodeKind, template: Option<TemplateType>) -> Option<ResourceType> {
    match kind {
        NodeKind::App => Some(ResourceType::App),
        NodeKind::Package => Some(ResourceType::Directory),
        NodeKind::Function => template.map(ResourceType::from),
    }
}

/// Actions a node must report on; empty when its type cannot be determined.
pub fn actions_required_for(kind: NodeKind, template: Option<TemplateType>) -> BTreeSet<ActionCode> {
    resource_type_of(kind, template)
        .map(actions_for)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_actions() {
        assert_eq!(actions_required_for(NodeKind::Package, None).len(), 5);
        assert_eq!(
            actions_required_for(NodeKind::Function, Some(TemplateType::Form)).len(),
            3
        );
        assert!(actions_required_for(NodeKind::Function, None).is_empty());
    }

    #[test]
    fn test_iter_visits_every_node() {
        let tree = ServiceTreeNode::package(
            "/t/w/a",
            vec![
                ServiceTreeNode::function("/t/w/a/f1", TemplateType::Table),
                ServiceTreeNode::package(
                    "/t/w/a/b",
                    vec![ServiceTreeNode::function("/t/w/a/b/f2", TemplateType::Chart)],
                ),
            ],
        );
        let paths: Vec<&str> = tree.iter().map(|n| n.full_code_path.as_str()).collect();
        assert_eq!(paths, vec!["/t/w/a", "/t/w/a/f1", "/t/w/a/b", "/t/w/a/b/f2"]);
    }
}
