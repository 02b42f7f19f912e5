use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::dialogue::node::NodeId;

/// Timestamp reported for an empty transcript.
pub const NO_TIME: f64 = -1.0;

/// Normalized answer value. Choice answers keep their 1-based index, numeric
/// nodes their parsed value, free-text nodes the raw string; end nodes have none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Index(i64),
    Number(f64),
    Text(String),
    Empty,
}

/// A single recorded answer. Times are seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: NodeId,
    pub answer: AnswerValue,
    pub time: f64,
}

/// Answers in arrival order for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    answers: Vec<Answer>,
}

/// Wire shape shared by every serializer; `A` is borrowed on the way out.
#[derive(Serialize, Deserialize)]
struct TranscriptDocument<A> {
    time_start: f64,
    time_end: f64,
    answers: A,
}

fn now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an answer stamped with the current time. Stamps never go
    /// backwards within a transcript.
    pub fn record(&mut self, id: NodeId, answer: AnswerValue) {
        let time = match self.answers.last() {
            Some(last) => now().max(last.time),
            None => now(),
        };
        self.answers.push(Answer { id, answer, time });
    }

    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn time_start(&self) -> f64 {
        self.answers.first().map_or(NO_TIME, |a| a.time)
    }

    pub fn time_end(&self) -> f64 {
        self.answers.last().map_or(NO_TIME, |a| a.time)
    }

    fn document(&self) -> TranscriptDocument<&[Answer]> {
        TranscriptDocument {
            time_start: self.time_start(),
            time_end: self.time_end(),
            answers: &self.answers,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self.document())
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.document())
    }

    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        let doc: TranscriptDocument<Vec<Answer>> = serde_json::from_str(s)?;
        Ok(Self {
            answers: doc.answers,
        })
    }
}
