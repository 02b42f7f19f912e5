use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde_json::Value;

use crate::dialogue::transcript::Transcript;
use crate::dialogue::tree::Tree;
use crate::dialogue::validate::prepare_for_publication;

/// An authored tree as kept by a store: the raw definition plus bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTree {
    pub id: i64,
    pub author: i64,
    pub title: String,
    pub definition: Value,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub update_count: u32,
}

/// One respondent's run through a published tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: i64,
    pub tree_id: i64,
    pub respondent: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub answers: Option<Value>,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistence for tree definitions and finished sessions.
pub trait TreeStore {
    /// Insert a new tree when `id` is `None`, otherwise overwrite the author's
    /// existing one. Saving always clears the published flag.
    fn save_tree(&mut self, id: Option<i64>, author: i64, title: &str, definition: Value)
        -> Result<i64>;

    /// Trees are only visible to their author.
    fn fetch_tree(&self, id: i64, author: i64) -> Result<Option<StoredTree>>;

    fn set_published(&mut self, id: i64) -> Result<()>;

    /// Open one session per respondent, returning their ids in the same order.
    fn open_sessions(&mut self, tree_id: i64, respondents: &[String]) -> Result<Vec<i64>>;

    /// Attach the finished transcript to an open session.
    fn finish_session(&mut self, session_id: i64, transcript: &Transcript) -> Result<()>;

    /// Build and validate a stored tree, flagging it published only when
    /// validation is clean. A rejection downcasts to `PublishError`.
    fn publish(&mut self, id: i64, author: i64) -> Result<Tree> {
        let stored = self
            .fetch_tree(id, author)?
            .with_context(|| format!("tree {id} not found for author {author}"))?;
        let mut tree = prepare_for_publication(stored.definition)?;
        tree.id = stored.id;
        self.set_published(id)?;
        info!("Published tree {id} ({})", stored.title);
        Ok(tree)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    trees: BTreeMap<i64, StoredTree>,
    sessions: BTreeMap<i64, SessionRecord>,
    last_tree: i64,
    last_session: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, id: i64) -> Option<&SessionRecord> {
        self.sessions.get(&id)
    }

    /// Trees owned by `author`, in id order.
    pub fn trees_of(&self, author: i64) -> impl Iterator<Item = &StoredTree> {
        self.trees.values().filter(move |t| t.author == author)
    }
}

impl TreeStore for MemoryStore {
    fn save_tree(
        &mut self,
        id: Option<i64>,
        author: i64,
        title: &str,
        definition: Value,
    ) -> Result<i64> {
        let now = Utc::now();
        match id {
            Some(id) => {
                let stored = match self.trees.get_mut(&id) {
                    Some(stored) if stored.author == author => stored,
                    _ => bail!("tree {id} not found for author {author}"),
                };
                stored.title = title.to_string();
                stored.definition = definition;
                stored.published = false;
                stored.updated_at = now;
                stored.update_count += 1;
                Ok(id)
            }
            None => {
                self.last_tree += 1;
                let id = self.last_tree;
                self.trees.insert(
                    id,
                    StoredTree {
                        id,
                        author,
                        title: title.to_string(),
                        definition,
                        published: false,
                        created_at: now,
                        updated_at: now,
                        update_count: 0,
                    },
                );
                Ok(id)
            }
        }
    }

    fn fetch_tree(&self, id: i64, author: i64) -> Result<Option<StoredTree>> {
        Ok(self
            .trees
            .get(&id)
            .filter(|t| t.author == author)
            .cloned())
    }

    fn set_published(&mut self, id: i64) -> Result<()> {
        let stored = self.trees.get_mut(&id).with_context(|| format!("tree {id} not found"))?;
        stored.published = true;
        Ok(())
    }

    fn open_sessions(&mut self, tree_id: i64, respondents: &[String]) -> Result<Vec<i64>> {
        match self.trees.get(&tree_id) {
            Some(stored) if stored.published => {}
            Some(_) => bail!("tree {tree_id} is not published"),
            None => bail!("tree {tree_id} not found"),
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(respondents.len());
        for respondent in respondents {
            self.last_session += 1;
            let id = self.last_session;
            self.sessions.insert(
                id,
                SessionRecord {
                    id,
                    tree_id,
                    respondent: respondent.clone(),
                    started_at: now,
                    finished_at: None,
                    answers: None,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    fn finish_session(&mut self, session_id: i64, transcript: &Transcript) -> Result<()> {
        let record = self
            .sessions
            .get_mut(&session_id)
            .with_context(|| format!("session {session_id} not found"))?;
        if record.finished_at.is_some() {
            bail!("session {session_id} is already finished");
        }
        record.answers = Some(transcript.to_json()?);
        record.finished_at = Some(Utc::now());
        info!(
            "Session {session_id} on tree {} finished with {} answer(s)",
            record.tree_id,
            transcript.answers().len()
        );
        Ok(())
    }
}
