//! Static analysis of a built [`Tree`].
//!
//! Validation never fails: every defect is collected into a
//! [`ReportSummary`] so an author sees all of them at once. Reports fall in
//! two groups. Authoring mistakes (empty text, dead ends, unreachable nodes,
//! range gaps) are ordinary. Malformed data (dangling targets, duplicate
//! edges, null bounds) cannot be produced by the authoring tool and is
//! logged under the `dialogue_tree::tamper` target for monitoring.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::dialogue::node::{
    Interval, Node, NodeId, NodeKind, Quantifiable, SubRange, ROOT, TERMINAL,
};
use crate::dialogue::tree::Tree;
use crate::error::TreeError;

/// Log target for reports that indicate tampered or buggy input.
pub const TAMPER_TARGET: &str = "dialogue_tree::tamper";

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum ReportKind {
    /// Node text is empty.
    InvalidNodeName,
    /// Choice labels left empty, by target id.
    InvalidChoiceNoAnswer { targets: Vec<NodeId> },
    /// Sub-ranges that leave a gap, overlap, collapse to a point or run backwards.
    InvalidQuantifiableChoice { ranges: Vec<SubRange> },
    /// Global bounds with `min > max`; no answer can ever verify.
    InvalidQuantifiableBounds { min: f64, max: f64 },
    InvalidIntervalSameNumber { target: Option<NodeId>, threshold: f64 },
    /// The highest threshold only marks a bound, so answers above the last
    /// real threshold verify but have nowhere to go.
    InvalidIntervalOpenEnd { threshold: f64 },
    /// Non-terminal node without outgoing edges.
    NoEdgesOnNode,
    NodeNotTraversableToNodeId1,
    /// Edges pointing at ids that are not in the tree.
    InvalidTargetNodeId { targets: Vec<NodeId> },
    /// Two edges of one node lead to the same target. Reported as
    /// `InvalidIntervalSameTargetId` by earlier tooling; covers choice and
    /// quantifiable nodes as well.
    InvalidSameTargetId { target: NodeId },
    InvalidQuantifiableNoneChoice,
}

impl ReportKind {
    /// True for defects the authoring tool cannot produce.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ReportKind::InvalidTargetNodeId { .. }
                | ReportKind::InvalidSameTargetId { .. }
                | ReportKind::InvalidQuantifiableNoneChoice
        )
    }
}

fn fmt_list<T: fmt::Display>(items: &[T]) -> String {
    let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
    format!("({})", parts.join(", "))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub kind: ReportKind,
    pub message: String,
}

impl Report {
    fn new(node_id: NodeId, kind: ReportKind) -> Self {
        let message = match &kind {
            ReportKind::InvalidNodeName => {
                format!("Node with id={node_id} has not filled the question text")
            }
            ReportKind::InvalidChoiceNoAnswer { targets } => format!(
                "Choice text is empty in node with id={node_id}, choice target id(s)={}",
                fmt_list(targets)
            ),
            ReportKind::InvalidQuantifiableChoice { ranges } => {
                let ranges: Vec<String> = ranges
                    .iter()
                    .map(|r| {
                        format!(
                            "[target_id={}, min={}, max={}]",
                            r.target,
                            r.min.unwrap_or(f64::NAN),
                            r.max.unwrap_or(f64::NAN)
                        )
                    })
                    .collect();
                format!(
                    "Intervals of node with id={node_id} must be contiguous with no gaps: {}",
                    fmt_list(&ranges)
                )
            }
            ReportKind::InvalidIntervalSameNumber { target, threshold } => format!(
                "Same number used twice in the interval, node_id={node_id}, target_id={}, number={threshold}",
                target.unwrap_or(TERMINAL)
            ),
            ReportKind::InvalidQuantifiableBounds { min, max } => format!(
                "Quantifiable node with id={node_id} has min={min} greater than max={max}"
            ),
            ReportKind::InvalidIntervalOpenEnd { threshold } => format!(
                "Interval of node with id={node_id} ends at {threshold} without a target node"
            ),
            ReportKind::NoEdgesOnNode => format!("Node with node_id={node_id} has no answers."),
            ReportKind::NodeNotTraversableToNodeId1 => format!(
                "Node with node_id={node_id} not connected to the rest of the graph."
            ),
            ReportKind::InvalidTargetNodeId { targets } => format!(
                "Node with id={node_id} has invalid choice target node id(s): {}",
                fmt_list(targets)
            ),
            ReportKind::InvalidSameTargetId { target } => format!(
                "Node with id={node_id} has 2 answers for same target node target_id={target}"
            ),
            ReportKind::InvalidQuantifiableNoneChoice => {
                format!("Quantifiable node with id={node_id} has an unset bound in its intervals.")
            }
        };
        Self {
            node_id,
            kind,
            message,
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.kind.is_malformed()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Reports grouped by node id, in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReportSummary {
    reports: BTreeMap<NodeId, Vec<Report>>,
}

impl ReportSummary {
    fn add(&mut self, report: Report) {
        self.reports.entry(report.node_id).or_default().push(report);
    }

    pub fn reports(&self) -> &BTreeMap<NodeId, Vec<Report>> {
        &self.reports
    }

    pub fn for_node(&self, id: NodeId) -> &[Report] {
        self.reports.get(&id).map_or(&[][..], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Report> {
        self.reports.values().flatten()
    }

    pub fn is_clean(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reports.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.is_clean()
    }

    pub fn has_malformed(&self) -> bool {
        self.iter().any(Report::is_malformed)
    }

    pub fn malformed(&self) -> impl Iterator<Item = &Report> {
        self.iter().filter(|r| r.is_malformed())
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Validate every node of `tree`.
pub fn validate(tree: &Tree) -> ReportSummary {
    Validator::new(tree).run()
}

struct Validator<'t> {
    tree: &'t Tree,
    /// Node id -> forward target ids, built once.
    adjacency: HashMap<NodeId, Vec<NodeId>>,
}

impl<'t> Validator<'t> {
    fn new(tree: &'t Tree) -> Self {
        let adjacency = tree.nodes().map(|n| (n.id, n.targets())).collect();
        Self { tree, adjacency }
    }

    fn run(&self) -> ReportSummary {
        let reachable = self.reachable_from_root();
        let mut summary = ReportSummary::default();

        for node in self.tree.nodes() {
            let mut reports = self.check_node(node);
            if !reachable.contains(&node.id) {
                reports.push(ReportKind::NodeNotTraversableToNodeId1);
            }
            for kind in reports {
                let report = Report::new(node.id, kind);
                if report.is_malformed() {
                    warn!(target: TAMPER_TARGET, "tree {}: {}", self.tree.id, report);
                } else {
                    debug!("tree {}: {}", self.tree.id, report);
                }
                summary.add(report);
            }
        }

        summary
    }

    /// Breadth-first walk from the root over the adjacency list.
    fn reachable_from_root(&self) -> HashSet<NodeId> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();

        if self.tree.contains(ROOT) {
            reachable.insert(ROOT);
            queue.push_back(ROOT);
        }

        while let Some(current) = queue.pop_front() {
            let Some(targets) = self.adjacency.get(&current) else {
                continue;
            };
            for &target in targets {
                if self.tree.contains(target) && reachable.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        reachable
    }

    fn check_node(&self, node: &Node) -> Vec<ReportKind> {
        let mut reports = Vec::new();
        if node.text.is_empty() {
            reports.push(ReportKind::InvalidNodeName);
        }

        match &node.kind {
            NodeKind::Choice(choices) => {
                let empty: Vec<NodeId> = choices
                    .iter()
                    .filter(|c| c.label.is_empty())
                    .map(|c| c.target)
                    .collect();
                if !empty.is_empty() {
                    reports.push(ReportKind::InvalidChoiceNoAnswer { targets: empty });
                }
            }
            NodeKind::Quantifiable(q) => check_quantifiable(q, &mut reports),
            NodeKind::Interval(i) => check_interval(i, &mut reports),
            NodeKind::GenericQuestion { .. }
            | NodeKind::SlackUserChoice(_)
            | NodeKind::Notification { .. }
            | NodeKind::End => {}
        }

        if node.is_terminal() {
            return reports;
        }

        let targets = self.adjacency.get(&node.id).map_or(&[][..], Vec::as_slice);
        if targets.is_empty() {
            reports.push(ReportKind::NoEdgesOnNode);
            return reports;
        }

        let dangling: Vec<NodeId> = targets
            .iter()
            .copied()
            .filter(|t| !self.tree.contains(*t))
            .collect();
        if !dangling.is_empty() {
            reports.push(ReportKind::InvalidTargetNodeId { targets: dangling });
        }

        let mut sorted = targets.to_vec();
        sorted.sort_unstable();
        let mut last_dup = None;
        for pair in sorted.windows(2) {
            if pair[0] == pair[1] && last_dup != Some(pair[0]) {
                reports.push(ReportKind::InvalidSameTargetId { target: pair[0] });
                last_dup = Some(pair[0]);
            }
        }

        reports
    }
}

/// Sub-ranges sorted by lower bound must tile `[q.min, q.max]`.
fn check_quantifiable(q: &Quantifiable, reports: &mut Vec<ReportKind>) {
    if q.ranges.iter().any(|r| r.min.is_none() || r.max.is_none()) {
        reports.push(ReportKind::InvalidQuantifiableNoneChoice);
    }
    if q.min > q.max {
        reports.push(ReportKind::InvalidQuantifiableBounds {
            min: q.min,
            max: q.max,
        });
    }

    let mut bounded: Vec<(SubRange, f64, f64)> = q
        .ranges
        .iter()
        .filter_map(|r| Some((*r, r.min?, r.max?)))
        .collect();
    bounded.sort_by(|a, b| a.1.total_cmp(&b.1));

    fn flag(invalid: &mut Vec<SubRange>, range: SubRange) {
        if !invalid.contains(&range) {
            invalid.push(range);
        }
    }

    let mut invalid = Vec::new();
    for (range, min, max) in &bounded {
        if min >= max {
            flag(&mut invalid, *range);
        }
    }
    for pair in bounded.windows(2) {
        let (prev, _, prev_max) = pair[0];
        let (_, next_min, _) = pair[1];
        if prev_max != next_min {
            flag(&mut invalid, prev);
        }
    }
    if let (Some(first), Some(last)) = (bounded.first(), bounded.last()) {
        if first.1 != q.min {
            flag(&mut invalid, first.0);
        }
        if last.2 != q.max {
            flag(&mut invalid, last.0);
        }
    }

    if !invalid.is_empty() {
        reports.push(ReportKind::InvalidQuantifiableChoice { ranges: invalid });
    }
}

fn check_interval(interval: &Interval, reports: &mut Vec<ReportKind>) {
    let mut sorted = interval.thresholds.clone();
    sorted.sort_by(|a, b| a.value.total_cmp(&b.value));
    for pair in sorted.windows(2) {
        if pair[0].value == pair[1].value {
            reports.push(ReportKind::InvalidIntervalSameNumber {
                target: pair[1].target,
                threshold: pair[1].value,
            });
        }
    }

    // Routing picks the lowest real threshold >= v, so the top one must be real.
    // Marker-only intervals are reported as having no edges instead.
    let top_routed = sorted.iter().rev().find(|t| t.target.is_some());
    if let (Some(top), Some(routed)) = (sorted.last(), top_routed) {
        if top.value > routed.value {
            reports.push(ReportKind::InvalidIntervalOpenEnd { threshold: top.value });
        }
    }
}

// ---------------------------------------------------------------------------
// Publication gate
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Construction(#[from] TreeError),

    #[error("tree {tree} has {} validation report(s)", .summary.len())]
    Rejected { tree: i64, summary: ReportSummary },
}

/// Build and validate a tree definition; only a report-free tree may be published.
pub fn prepare_for_publication(definition: Value) -> Result<Tree, PublishError> {
    let tree = Tree::from_value(definition)?;
    let summary = validate(&tree);
    if summary.is_clean() {
        return Ok(tree);
    }
    if summary.has_malformed() {
        warn!(
            target: TAMPER_TARGET,
            "tree {} rejected with {} malformed-data report(s)",
            tree.id,
            summary.malformed().count()
        );
    }
    Err(PublishError::Rejected {
        tree: tree.id,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(nodes: Value) -> Tree {
        Tree::from_value(json!({ "id": 1, "nodes": nodes })).unwrap()
    }

    fn kinds(summary: &ReportSummary, id: NodeId) -> Vec<ReportKind> {
        summary.for_node(id).iter().map(|r| r.kind.clone()).collect()
    }

    #[test]
    fn test_clean_tree_has_no_reports() {
        let tree = build(json!({
            "1": {"type": "choice", "text": "Go?", "choices": {"2": "yes", "3": "no"}},
            "2": {"type": "question", "text": "Why?", "next_node": 3},
            "3": {"type": "end", "text": "Bye"}
        }));
        assert!(validate(&tree).is_clean());
    }

    #[test]
    fn test_isolated_node_is_the_only_unreachable_one() {
        let tree = build(json!({
            "1": {"type": "question", "text": "a", "next_node": 2},
            "2": {"type": "notification", "text": "b", "next_node": 3},
            "3": {"type": "end", "text": "c"},
            "5": {"type": "end", "text": "island"}
        }));
        let summary = validate(&tree);
        let unreachable: Vec<NodeId> = summary
            .iter()
            .filter(|r| r.kind == ReportKind::NodeNotTraversableToNodeId1)
            .map(|r| r.node_id)
            .collect();
        assert_eq!(unreachable, vec![5]);
        assert_eq!(summary.len(), 1);
    }

    #[test]
    fn test_everything_unreachable_without_root() {
        let tree = build(json!({
            "2": {"type": "question", "text": "a", "next_node": 3},
            "3": {"type": "end", "text": "c"}
        }));
        let summary = validate(&tree);
        assert_eq!(kinds(&summary, 2), vec![ReportKind::NodeNotTraversableToNodeId1]);
        assert_eq!(kinds(&summary, 3), vec![ReportKind::NodeNotTraversableToNodeId1]);
    }

    #[test]
    fn test_cycles_terminate() {
        let tree = build(json!({
            "1": {"type": "choice", "text": "loop?", "choices": {"2": "again", "3": "stop"}},
            "2": {"type": "question", "text": "back", "next_node": 1},
            "3": {"type": "end", "text": "done"}
        }));
        assert!(validate(&tree).is_clean());
    }

    #[test]
    fn test_dangling_targets_and_null_bounds_never_panic() {
        let tree = build(json!({
            "1": {"type": "choice", "text": "", "choices": {"9": "", "2": "ok"}},
            "2": {"type": "quantifiable", "text": "n",
                  "choices": [{"target_id": 3, "min": null, "max": 5},
                              {"target_id": 8, "min": 5, "max": 10}]},
            "3": {"type": "slack_users", "text": "who", "next_node": null},
            "4": {"type": "end", "text": ""}
        }));
        let summary = validate(&tree);

        assert_eq!(
            kinds(&summary, 1),
            vec![
                ReportKind::InvalidNodeName,
                ReportKind::InvalidChoiceNoAnswer { targets: vec![9] },
                ReportKind::InvalidTargetNodeId { targets: vec![9] },
            ]
        );
        let node2 = kinds(&summary, 2);
        assert!(node2.contains(&ReportKind::InvalidQuantifiableNoneChoice));
        assert!(node2.contains(&ReportKind::InvalidTargetNodeId { targets: vec![8] }));
        assert_eq!(kinds(&summary, 3), vec![ReportKind::NoEdgesOnNode]);
        assert_eq!(
            kinds(&summary, 4),
            vec![
                ReportKind::InvalidNodeName,
                ReportKind::NodeNotTraversableToNodeId1
            ]
        );
        assert!(summary.has_malformed());
    }

    #[test]
    fn test_quantifiable_gap_overlap_and_point_ranges() {
        let tree = build(json!({
            "1": {"type": "quantifiable", "text": "n",
                  "choices": [{"target_id": 2, "min": 0, "max": 4},
                              {"target_id": 3, "min": 5, "max": 10},
                              {"target_id": 4, "min": 10, "max": 10}]},
            "2": {"type": "end", "text": "a"},
            "3": {"type": "end", "text": "b"},
            "4": {"type": "end", "text": "c"}
        }));
        let summary = validate(&tree);
        match &kinds(&summary, 1)[..] {
            [ReportKind::InvalidQuantifiableChoice { ranges }] => {
                let targets: Vec<NodeId> = ranges.iter().map(|r| r.target).collect();
                assert_eq!(targets, vec![4, 2]);
            }
            other => panic!("unexpected reports {other:?}"),
        }
        assert!(!summary.has_malformed());
    }

    #[test]
    fn test_quantifiable_must_cover_global_bounds() {
        let tree = build(json!({
            "1": {"type": "quantifiable", "text": "n", "min_value": 0, "max_value": 30,
                  "choices": [{"target_id": 2, "min": 0, "max": 10},
                              {"target_id": 3, "min": 10, "max": 20}]},
            "2": {"type": "end", "text": "a"},
            "3": {"type": "end", "text": "b"}
        }));
        let summary = validate(&tree);
        assert!(matches!(
            &kinds(&summary, 1)[..],
            [ReportKind::InvalidQuantifiableChoice { ranges }] if ranges[0].target == 3
        ));
    }

    #[test]
    fn test_interval_duplicates() {
        let tree = build(json!({
            "1": {"type": "interval", "text": "n",
                  "choices": [0, [10, 2], [10, 3], [20, 2]]},
            "2": {"type": "end", "text": "a"},
            "3": {"type": "end", "text": "b"}
        }));
        let summary = validate(&tree);
        assert_eq!(
            kinds(&summary, 1),
            vec![
                ReportKind::InvalidIntervalSameNumber {
                    target: Some(3),
                    threshold: 10.0
                },
                ReportKind::InvalidSameTargetId { target: 2 },
            ]
        );
    }

    #[test]
    fn test_interval_ending_in_a_marker_is_reported() {
        let tree = build(json!({
            "1": {"type": "interval", "text": "n", "choices": [[0, 2], [10, 3], 20]},
            "2": {"type": "end", "text": "a"},
            "3": {"type": "end", "text": "b"}
        }));
        let summary = validate(&tree);
        assert_eq!(
            kinds(&summary, 1),
            vec![ReportKind::InvalidIntervalOpenEnd { threshold: 20.0 }]
        );
        assert!(!summary.has_malformed());

        // Without the report this answer verifies but cannot be routed.
        let root = tree.get(1).unwrap();
        assert!(root.verify(Some("15")).is_ok());
        assert_eq!(root.next(Some("15")), None);
    }

    #[test]
    fn test_inverted_quantifiable_ranges_are_reported() {
        let tree = build(json!({
            "1": {"type": "quantifiable", "text": "n",
                  "choices": [{"target_id": 2, "min": 10, "max": 0}]},
            "2": {"type": "end", "text": "a"}
        }));
        let summary = validate(&tree);
        let reports = kinds(&summary, 1);
        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports[0],
            ReportKind::InvalidQuantifiableBounds {
                min: 10.0,
                max: 0.0
            }
        );
        assert!(matches!(
            &reports[1],
            ReportKind::InvalidQuantifiableChoice { ranges } if ranges[0].target == 2
        ));
    }

    #[test]
    fn test_inverted_range_among_valid_ones() {
        let tree = build(json!({
            "1": {"type": "quantifiable", "text": "n", "min_value": 0, "max_value": 10,
                  "choices": [{"target_id": 2, "min": 0, "max": 5},
                              {"target_id": 3, "min": 10, "max": 5}]},
            "2": {"type": "end", "text": "a"},
            "3": {"type": "end", "text": "b"}
        }));
        let summary = validate(&tree);
        assert!(matches!(
            &kinds(&summary, 1)[..],
            [ReportKind::InvalidQuantifiableChoice { ranges }] if ranges.iter().any(|r| r.target == 3)
        ));
    }

    #[test]
    fn test_interval_with_only_markers_has_no_edges() {
        let tree = build(json!({
            "1": {"type": "interval", "text": "n", "choices": [0, 10]}
        }));
        assert_eq!(kinds(&validate(&tree), 1), vec![ReportKind::NoEdgesOnNode]);
    }

    #[test]
    fn test_validation_is_repeatable() {
        let tree = build(json!({
            "1": {"type": "choice", "text": "", "choices": {"7": ""}},
            "4": {"type": "question", "text": "x", "next_node": 1}
        }));
        assert_eq!(validate(&tree), validate(&tree));
    }

    #[test]
    fn test_publication_gate() {
        let good = json!({"id": 3, "nodes": {
            "1": {"type": "question", "text": "a", "next_node": 2},
            "2": {"type": "end", "text": "b"}
        }});
        assert!(prepare_for_publication(good).is_ok());

        let bad = json!({"id": 4, "nodes": {
            "1": {"type": "question", "text": "a", "next_node": 9}
        }});
        match prepare_for_publication(bad) {
            Err(PublishError::Rejected { tree, summary }) => {
                assert_eq!(tree, 4);
                assert!(summary.has_malformed());
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        assert!(matches!(
            prepare_for_publication(json!({"nodes": {"1": {"type": "nope"}}})),
            Err(PublishError::Construction(_))
        ));
    }

    #[test]
    fn test_demo_tree_is_publishable() {
        let demo: Value = serde_json::from_str(include_str!("../../demos/checkin.json")).unwrap();
        let tree = prepare_for_publication(demo).unwrap();
        assert_eq!(tree.len(), 7);
    }

    #[test]
    fn test_summary_serializes_by_node() {
        let tree = build(json!({"1": {"type": "question", "text": "", "next_node": 1}}));
        let value = serde_json::to_value(validate(&tree)).unwrap();
        assert_eq!(value["1"][0]["kind"], "InvalidNodeName");
        assert_eq!(value["1"][0]["node_id"], 1);
    }
}
