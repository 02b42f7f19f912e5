use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::dialogue::transcript::AnswerValue;
use crate::directory::UserDirectory;

/// Node identifier. Positive and unique within a tree; the root is always 1.
pub type NodeId = i64;

/// Wire-level "no successor" sentinel.
pub const TERMINAL: NodeId = -1;

/// Id of the node every session starts from.
pub const ROOT: NodeId = 1;

// ---------------------------------------------------------------------------
// Answer verification
// ---------------------------------------------------------------------------

/// Result of checking a raw answer against a node's contract.
///
/// `NotEnoughArguments` and `TooManyArguments` are reserved for multi-value
/// nodes and are never produced by the current variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Ok,
    ExpectedNumber,
    OutOfRange,
    NotEnoughArguments,
    TooManyArguments,
    UserNotFound,
}

impl Verification {
    pub fn is_ok(self) -> bool {
        self == Verification::Ok
    }

    /// User-facing explanation of a rejected answer.
    pub fn message(self) -> Option<&'static str> {
        match self {
            Verification::Ok => None,
            Verification::ExpectedNumber => Some("Expecting number as an answer"),
            Verification::OutOfRange => Some("Your answer is out of range"),
            Verification::NotEnoughArguments => Some("You haven't supplied enough arguments"),
            Verification::TooManyArguments => Some("You have supplied too many arguments"),
            Verification::UserNotFound => Some("Slack user not found"),
        }
    }
}

// ---------------------------------------------------------------------------
// Variant payloads
// ---------------------------------------------------------------------------

/// One labelled edge of a choice node.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub target: NodeId,
    pub label: String,
}

/// A `[min, max]` band of a quantifiable node routing to `target`.
/// Bounds stay optional so the validator can report missing ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SubRange {
    pub target: NodeId,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl SubRange {
    fn contains(&self, value: f64) -> bool {
        match (self.min, self.max) {
            (Some(min), Some(max)) => min <= value && value <= max,
            _ => false,
        }
    }
}

/// A step of an interval node. A `None` target only marks a bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub value: f64,
    pub target: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quantifiable {
    pub min: f64,
    pub max: f64,
    pub ranges: Vec<SubRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub thresholds: Vec<Threshold>,
    min: f64,
    max: f64,
}

impl Interval {
    /// Overall bounds are the extremes of the thresholds (0..0 when empty).
    pub fn new(thresholds: Vec<Threshold>) -> Self {
        let mut bounds: Option<(f64, f64)> = None;
        for t in &thresholds {
            bounds = Some(match bounds {
                None => (t.value, t.value),
                Some((lo, hi)) => (lo.min(t.value), hi.max(t.value)),
            });
        }
        let (min, max) = bounds.unwrap_or((0.0, 0.0));
        Self { thresholds, min, max }
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Target of the lowest threshold `>= value`, ignoring bound markers.
    /// Equal thresholds resolve to the first one stored.
    fn route(&self, value: f64) -> Option<NodeId> {
        self.thresholds
            .iter()
            .filter(|t| t.target.is_some() && t.value >= value)
            .min_by(|a, b| a.value.total_cmp(&b.value))
            .and_then(|t| t.target)
    }
}

/// Free-text node whose answer is checked against the injected user directory.
#[derive(Debug, Clone, PartialEq)]
pub struct SlackUserChoice {
    pub next: Option<NodeId>,
    directory: Option<Arc<UserDirectory>>,
}

impl SlackUserChoice {
    pub fn new(next: Option<NodeId>) -> Self {
        Self {
            next,
            directory: None,
        }
    }

    pub fn inject(&mut self, directory: Arc<UserDirectory>) {
        self.directory = Some(directory);
    }

    pub fn is_injected(&self) -> bool {
        self.directory.is_some()
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Discriminant of [`NodeKind`]; also the `type` string of a JSON definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    Choice,
    Quantifiable,
    Interval,
    #[serde(rename = "question")]
    GenericQuestion,
    #[serde(rename = "slack_users")]
    SlackUserChoice,
    Notification,
    End,
}

impl NodeClass {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeClass::Choice => "choice",
            NodeClass::Quantifiable => "quantifiable",
            NodeClass::Interval => "interval",
            NodeClass::GenericQuestion => "question",
            NodeClass::SlackUserChoice => "slack_users",
            NodeClass::Notification => "notification",
            NodeClass::End => "end",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Labelled edges; insertion order defines the 1-based numbering.
    Choice(Vec<Choice>),
    Quantifiable(Quantifiable),
    Interval(Interval),
    GenericQuestion { next: Option<NodeId> },
    SlackUserChoice(SlackUserChoice),
    Notification { next: Option<NodeId> },
    End,
}

/// A single node of a dialogue tree: one prompt plus routing and verification.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Display prompt. Emptiness is reported by the validator, not rejected here.
    pub text: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: NodeId, text: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id,
            text: text.into(),
            kind,
        }
    }

    pub fn class(&self) -> NodeClass {
        match &self.kind {
            NodeKind::Choice(_) => NodeClass::Choice,
            NodeKind::Quantifiable(_) => NodeClass::Quantifiable,
            NodeKind::Interval(_) => NodeClass::Interval,
            NodeKind::GenericQuestion { .. } => NodeClass::GenericQuestion,
            NodeKind::SlackUserChoice(_) => NodeClass::SlackUserChoice,
            NodeKind::Notification { .. } => NodeClass::Notification,
            NodeKind::End => NodeClass::End,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, NodeKind::End)
    }

    /// Forward edges, dangling ones included. Interval bound markers are skipped.
    pub fn targets(&self) -> Vec<NodeId> {
        match &self.kind {
            NodeKind::Choice(choices) => choices.iter().map(|c| c.target).collect(),
            NodeKind::Quantifiable(q) => q.ranges.iter().map(|r| r.target).collect(),
            NodeKind::Interval(i) => i.thresholds.iter().filter_map(|t| t.target).collect(),
            NodeKind::GenericQuestion { next } | NodeKind::Notification { next } => {
                next.iter().copied().collect()
            }
            NodeKind::SlackUserChoice(s) => s.next.iter().copied().collect(),
            NodeKind::End => Vec::new(),
        }
    }

    /// Render the prompt shown to the user.
    pub fn question(&self) -> String {
        match &self.kind {
            NodeKind::Choice(choices) => {
                let mut s = self.text.clone();
                for (i, choice) in choices.iter().enumerate() {
                    s.push_str(&format!("\n   {}) {}", i + 1, choice.label));
                }
                s
            }
            NodeKind::Quantifiable(q) => format!("{} [{}..{}]", self.text, q.min, q.max),
            NodeKind::Interval(i) => {
                let (min, max) = i.bounds();
                format!("{} [{min}..{max}]", self.text)
            }
            _ => self.text.clone(),
        }
    }

    pub fn verify(&self, answer: Option<&str>) -> Verification {
        let answer = answer.unwrap_or_default();
        match &self.kind {
            NodeKind::Choice(choices) => match answer.trim().parse::<i64>() {
                Ok(n) if n >= 1 && (n as usize) <= choices.len() => Verification::Ok,
                Ok(_) => Verification::OutOfRange,
                Err(_) => Verification::ExpectedNumber,
            },
            NodeKind::Quantifiable(q) => verify_in_range(answer, q.min, q.max),
            NodeKind::Interval(i) => {
                let (min, max) = i.bounds();
                verify_in_range(answer, min, max)
            }
            NodeKind::SlackUserChoice(s) => {
                let known = s
                    .directory
                    .as_ref()
                    .is_some_and(|d| d.contains_display_name(answer));
                if known {
                    Verification::Ok
                } else {
                    Verification::UserNotFound
                }
            }
            NodeKind::GenericQuestion { .. } | NodeKind::Notification { .. } | NodeKind::End => {
                Verification::Ok
            }
        }
    }

    /// Resolve the successor for a verified answer. `None` means no successor.
    pub fn next(&self, answer: Option<&str>) -> Option<NodeId> {
        let answer = answer.unwrap_or_default();
        match &self.kind {
            NodeKind::Choice(choices) => {
                let n = answer.trim().parse::<usize>().ok()?;
                choices.get(n.checked_sub(1)?).map(|c| c.target)
            }
            NodeKind::Quantifiable(q) => {
                let value = parse_number(answer)?;
                q.ranges.iter().find(|r| r.contains(value)).map(|r| r.target)
            }
            NodeKind::Interval(i) => i.route(parse_number(answer)?),
            NodeKind::GenericQuestion { next } | NodeKind::Notification { next } => *next,
            NodeKind::SlackUserChoice(s) => s.next,
            NodeKind::End => None,
        }
    }

    /// Typed form of a verified answer, as recorded in the transcript.
    pub fn normalize(&self, answer: Option<&str>) -> AnswerValue {
        let raw = answer.unwrap_or_default();
        match &self.kind {
            NodeKind::Choice(_) => raw
                .trim()
                .parse()
                .map(AnswerValue::Index)
                .unwrap_or_else(|_| AnswerValue::Text(raw.to_string())),
            NodeKind::Quantifiable(_) | NodeKind::Interval(_) => parse_number(raw)
                .map(AnswerValue::Number)
                .unwrap_or_else(|| AnswerValue::Text(raw.to_string())),
            NodeKind::GenericQuestion { .. }
            | NodeKind::SlackUserChoice(_)
            | NodeKind::Notification { .. } => AnswerValue::Text(raw.to_string()),
            NodeKind::End => AnswerValue::Empty,
        }
    }
}

fn parse_number(answer: &str) -> Option<f64> {
    answer.trim().parse::<f64>().ok()
}

fn verify_in_range(answer: &str, min: f64, max: f64) -> Verification {
    match parse_number(answer) {
        Some(v) if min <= v && v <= max => Verification::Ok,
        Some(_) => Verification::OutOfRange,
        None => Verification::ExpectedNumber,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::SlackUser;
    use rstest::rstest;

    fn choice_node() -> Node {
        Node::new(
            1,
            "Pick one",
            NodeKind::Choice(vec![
                Choice {
                    target: 7,
                    label: "seven".into(),
                },
                Choice {
                    target: 3,
                    label: "three".into(),
                },
            ]),
        )
    }

    fn quantifiable_node() -> Node {
        Node::new(
            1,
            "How many?",
            NodeKind::Quantifiable(Quantifiable {
                min: 0.0,
                max: 20.0,
                ranges: vec![
                    SubRange {
                        target: 2,
                        min: Some(0.0),
                        max: Some(10.0),
                    },
                    SubRange {
                        target: 3,
                        min: Some(10.0),
                        max: Some(20.0),
                    },
                ],
            }),
        )
    }

    fn interval_node() -> Node {
        Node::new(
            1,
            "Score",
            NodeKind::Interval(Interval::new(vec![
                Threshold {
                    value: 0.0,
                    target: None,
                },
                Threshold {
                    value: 10.0,
                    target: Some(5),
                },
                Threshold {
                    value: 20.0,
                    target: Some(6),
                },
            ])),
        )
    }

    #[rstest]
    #[case("0", Verification::OutOfRange)]
    #[case("1", Verification::Ok)]
    #[case(" 2 ", Verification::Ok)]
    #[case("3", Verification::OutOfRange)]
    #[case("-1", Verification::OutOfRange)]
    #[case("1.5", Verification::ExpectedNumber)]
    #[case("yes", Verification::ExpectedNumber)]
    fn test_choice_verify(#[case] answer: &str, #[case] expected: Verification) {
        assert_eq!(choice_node().verify(Some(answer)), expected);
    }

    #[test]
    fn test_choice_routes_by_display_index() {
        let node = choice_node();
        assert_eq!(node.next(Some("1")), Some(7));
        assert_eq!(node.next(Some("2")), Some(3));
        assert_eq!(
            node.question(),
            "Pick one\n   1) seven\n   2) three"
        );
    }

    #[rstest]
    #[case("10", Verification::Ok)]
    #[case("0", Verification::Ok)]
    #[case("20", Verification::Ok)]
    #[case("20.5", Verification::OutOfRange)]
    #[case("ten", Verification::ExpectedNumber)]
    fn test_quantifiable_verify(#[case] answer: &str, #[case] expected: Verification) {
        assert_eq!(quantifiable_node().verify(Some(answer)), expected);
    }

    #[test]
    fn test_quantifiable_shared_boundary_goes_to_first_stored_range() {
        let node = quantifiable_node();
        assert_eq!(node.next(Some("10")), Some(2));
        assert_eq!(node.next(Some("10.01")), Some(3));
        assert_eq!(node.next(Some("25")), None);
    }

    #[test]
    fn test_interval_routing() {
        let node = interval_node();
        assert_eq!(node.next(Some("15")), Some(6));
        assert_eq!(node.next(Some("10")), Some(5));
        assert_eq!(node.next(Some("0")), Some(5));
        assert_eq!(node.verify(Some("21")), Verification::OutOfRange);
        assert_eq!(node.question(), "Score [0..20]");
        assert_eq!(node.targets(), vec![5, 6]);
    }

    #[test]
    fn test_slack_user_needs_injection() {
        let mut inner = SlackUserChoice::new(Some(2));
        let node = Node::new(1, "Who?", NodeKind::SlackUserChoice(inner.clone()));
        assert_eq!(node.verify(Some("alice")), Verification::UserNotFound);

        inner.inject(Arc::new(UserDirectory::new(vec![SlackUser {
            id: "U1".into(),
            name: "alice.smith".into(),
            real_name: None,
            display_name: "alice".into(),
        }])));
        let node = Node::new(1, "Who?", NodeKind::SlackUserChoice(inner));
        assert_eq!(node.verify(Some("alice")), Verification::Ok);
        assert_eq!(node.verify(Some("Alice")), Verification::UserNotFound);
        assert_eq!(node.next(Some("alice")), Some(2));
    }

    #[test]
    fn test_end_node_accepts_without_input() {
        let node = Node::new(9, "Bye", NodeKind::End);
        assert!(node.verify(None).is_ok());
        assert_eq!(node.next(None), None);
        assert_eq!(node.normalize(None), AnswerValue::Empty);
    }

    #[test]
    fn test_normalize_per_variant() {
        assert_eq!(choice_node().normalize(Some("2")), AnswerValue::Index(2));
        assert_eq!(
            quantifiable_node().normalize(Some("12.5")),
            AnswerValue::Number(12.5)
        );
        let q = Node::new(4, "Name?", NodeKind::GenericQuestion { next: Some(5) });
        assert_eq!(q.normalize(Some(" Bob ")), AnswerValue::Text(" Bob ".into()));
    }
}
