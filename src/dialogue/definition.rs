//! Builds a [`Tree`] from its JSON definition.
//!
//! ```json
//! {"id": 4, "urgent": false, "nodes": {"1": {"type": "question", "text": "Hi?", "next_node": 2},
//!                                     "2": {"type": "end", "text": "Bye"}}}
//! ```
//!
//! Ids, bounds and thresholds may be JSON numbers or numeric strings.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::dialogue::node::{
    Choice, Interval, Node, NodeId, NodeKind, Quantifiable, SlackUserChoice, SubRange, Threshold,
    TERMINAL,
};
use crate::dialogue::tree::Tree;
use crate::error::TreeError;

// ---------------------------------------------------------------------------
// Raw definitions
// ---------------------------------------------------------------------------

/// A number that may have been written as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Lenient {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Lenient {
    fn to_f64(&self, node: NodeId) -> Result<f64, TreeError> {
        match self {
            Lenient::Int(n) => Ok(*n as f64),
            Lenient::Float(f) => Ok(*f),
            Lenient::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .ok_or_else(|| TreeError::InvalidNumber {
                    node,
                    value: s.clone(),
                }),
        }
    }

    fn to_id(&self, node: NodeId) -> Result<NodeId, TreeError> {
        match self {
            Lenient::Int(n) => Ok(*n),
            Lenient::Float(f) if f.fract() == 0.0 => Ok(*f as NodeId),
            Lenient::Float(f) => Err(TreeError::InvalidNumber {
                node,
                value: f.to_string(),
            }),
            Lenient::Text(s) => s.trim().parse().map_err(|_| TreeError::InvalidNumber {
                node,
                value: s.clone(),
            }),
        }
    }
}

fn nullable_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct TreeDefinition {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    urgent: bool,
    nodes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RangeDefinition {
    target_id: Lenient,
    min: Option<Lenient>,
    max: Option<Lenient>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThresholdDefinition {
    Pair(Lenient, Option<Lenient>),
    Bare(Lenient),
}

/// One node as authored. The `type` tag selects the variant; unknown tags
/// fail deserialization.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum NodeDefinition {
    Choice {
        #[serde(deserialize_with = "nullable_text")]
        text: String,
        choices: Map<String, Value>,
    },
    Quantifiable {
        #[serde(deserialize_with = "nullable_text")]
        text: String,
        #[serde(default)]
        min_value: Option<Lenient>,
        #[serde(default)]
        max_value: Option<Lenient>,
        choices: Vec<RangeDefinition>,
    },
    Interval {
        #[serde(deserialize_with = "nullable_text")]
        text: String,
        choices: Vec<ThresholdDefinition>,
    },
    #[serde(rename = "question")]
    GenericQuestion {
        #[serde(deserialize_with = "nullable_text")]
        text: String,
        #[serde(default)]
        next_node: Option<Lenient>,
    },
    #[serde(rename = "slack_users")]
    SlackUserChoice {
        #[serde(deserialize_with = "nullable_text")]
        text: String,
        #[serde(default)]
        next_node: Option<Lenient>,
    },
    Notification {
        #[serde(deserialize_with = "nullable_text")]
        text: String,
        #[serde(default)]
        next_node: Option<Lenient>,
    },
    End {
        #[serde(deserialize_with = "nullable_text")]
        text: String,
    },
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn optional_id(value: Option<Lenient>, node: NodeId) -> Result<Option<NodeId>, TreeError> {
    value.map(|v| v.to_id(node)).transpose()
}

fn optional_f64(value: Option<Lenient>, node: NodeId) -> Result<Option<f64>, TreeError> {
    value.map(|v| v.to_f64(node)).transpose()
}

fn parse_node_id(key: &str) -> Result<NodeId, TreeError> {
    match key.trim().parse::<NodeId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(TreeError::InvalidNodeId(key.to_string())),
    }
}

fn choice_label(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl NodeDefinition {
    fn into_node(self, id: NodeId) -> Result<Node, TreeError> {
        let node = match self {
            NodeDefinition::Choice { text, choices } => {
                let choices = choices
                    .into_iter()
                    .map(|(key, label)| {
                        Ok(Choice {
                            target: key
                                .trim()
                                .parse()
                                .map_err(|_| TreeError::InvalidNumber { node: id, value: key.clone() })?,
                            label: choice_label(label),
                        })
                    })
                    .collect::<Result<Vec<_>, TreeError>>()?;
                Node::new(id, text, NodeKind::Choice(choices))
            }
            NodeDefinition::Quantifiable {
                text,
                min_value,
                max_value,
                choices,
            } => {
                let ranges = choices
                    .into_iter()
                    .map(|c| {
                        Ok(SubRange {
                            target: c.target_id.to_id(id)?,
                            min: optional_f64(c.min, id)?,
                            max: optional_f64(c.max, id)?,
                        })
                    })
                    .collect::<Result<Vec<_>, TreeError>>()?;

                // Missing global bounds fall back to the extremes of the sub-ranges.
                let min = match optional_f64(min_value, id)? {
                    Some(min) => min,
                    None => ranges.iter().filter_map(|r| r.min).reduce(f64::min).unwrap_or(0.0),
                };
                let max = match optional_f64(max_value, id)? {
                    Some(max) => max,
                    None => ranges.iter().filter_map(|r| r.max).reduce(f64::max).unwrap_or(0.0),
                };
                Node::new(id, text, NodeKind::Quantifiable(Quantifiable { min, max, ranges }))
            }
            NodeDefinition::Interval { text, choices } => {
                let thresholds = choices
                    .into_iter()
                    .map(|entry| {
                        let (value, target) = match entry {
                            ThresholdDefinition::Pair(value, target) => {
                                (value.to_f64(id)?, optional_id(target, id)?)
                            }
                            ThresholdDefinition::Bare(value) => (value.to_f64(id)?, None),
                        };
                        Ok(Threshold {
                            value,
                            target: target.filter(|t| *t != TERMINAL),
                        })
                    })
                    .collect::<Result<Vec<_>, TreeError>>()?;
                Node::new(id, text, NodeKind::Interval(Interval::new(thresholds)))
            }
            NodeDefinition::GenericQuestion { text, next_node } => Node::new(
                id,
                text,
                NodeKind::GenericQuestion {
                    next: optional_id(next_node, id)?,
                },
            ),
            NodeDefinition::SlackUserChoice { text, next_node } => Node::new(
                id,
                text,
                NodeKind::SlackUserChoice(SlackUserChoice::new(optional_id(next_node, id)?)),
            ),
            NodeDefinition::Notification { text, next_node } => Node::new(
                id,
                text,
                NodeKind::Notification {
                    next: optional_id(next_node, id)?,
                },
            ),
            NodeDefinition::End { text } => Node::new(id, text, NodeKind::End),
        };
        Ok(node)
    }
}

/// Build one node from its loosely-typed JSON definition.
pub fn from_definition(id: NodeId, definition: Value) -> Result<Node, TreeError> {
    let def: NodeDefinition = serde_json::from_value(definition)
        .map_err(|source| TreeError::InvalidNode { node: id, source })?;
    def.into_node(id)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

impl Tree {
    /// Build a tree from an in-memory JSON document.
    pub fn from_value(value: Value) -> Result<Tree, TreeError> {
        let def: TreeDefinition = serde_json::from_value(value)?;
        let mut tree = Tree::new(def.id, def.urgent);
        for (key, node_def) in def.nodes {
            let id = parse_node_id(&key)?;
            tree.add_node(from_definition(id, node_def)?)?;
        }
        debug!("Built tree {} with {} nodes", tree.id, tree.len());
        Ok(tree)
    }

    pub fn from_json_str(s: &str) -> Result<Tree, TreeError> {
        Tree::from_value(serde_json::from_str(s)?)
    }

    /// Build a tree from a JSON file. Reading the file is the only I/O.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Tree, TreeError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| TreeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tree = Tree::from_json_str(&raw)?;
        info!("Loaded tree {} from {}", tree.id, path.display());
        Ok(tree)
    }
}
