pub mod definition;
pub mod node;
pub mod transcript;
pub mod tree;
pub mod validate;

use anyhow::Result;
use log::{debug, info, warn};

use crate::error::SessionError;
use node::{Node, Verification, ROOT};
use transcript::Transcript;
use tree::Tree;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// What happened to a submitted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// Answer recorded; the session moved to another node.
    Advanced,
    /// Answer refused; the same node must be asked again.
    Rejected(Verification),
    /// Answer recorded and the dialogue is over.
    Finished,
}

/// One walk through a tree, one answer at a time.
///
/// The session never blocks: the caller renders [`Session::question`],
/// obtains an answer however it likes and hands it to [`Session::submit`].
/// Any number of sessions can share one tree.
pub struct Session<'t> {
    tree: &'t Tree,
    /// `None` once the dialogue is over.
    current: Option<&'t Node>,
    transcript: Transcript,
}

impl<'t> Session<'t> {
    /// Start at the root. Fails while the tree still waits for injected data.
    pub fn start(tree: &'t Tree) -> Result<Self, SessionError> {
        if let Some(pending) = tree.pending_injections().into_iter().next() {
            return Err(SessionError::PendingInjection(pending));
        }
        let root = tree.get(ROOT).ok_or(SessionError::MissingRoot)?;
        info!("Session started on tree {} at node {}", tree.id, root.id);
        Ok(Self {
            tree,
            current: Some(root),
            transcript: Transcript::new(),
        })
    }

    pub fn current(&self) -> Option<&'t Node> {
        self.current
    }

    pub fn question(&self) -> Option<String> {
        self.current.map(Node::question)
    }

    /// End nodes are rendered but take no input.
    pub fn awaits_answer(&self) -> bool {
        self.current.is_some_and(|n| !n.is_terminal())
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_none()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn into_transcript(self) -> Transcript {
        self.transcript
    }

    /// Verify `answer` against the current node and advance on success.
    pub fn submit(&mut self, answer: Option<&str>) -> Result<Turn, SessionError> {
        let node = self.current.ok_or(SessionError::Finished)?;
        let answer = if node.is_terminal() { None } else { answer };

        let verification = node.verify(answer);
        if !verification.is_ok() {
            debug!("Node {}: rejected {:?} ({:?})", node.id, answer, verification);
            return Ok(Turn::Rejected(verification));
        }

        debug!("Node {}: accepted {:?}", node.id, answer);
        self.transcript.record(node.id, node.normalize(answer));

        let Some(next_id) = node.next(answer) else {
            if !node.is_terminal() {
                self.current = None;
                return Err(SessionError::RoutingFallthrough(node.id));
            }
            info!("Session on tree {} finished at node {}", self.tree.id, node.id);
            self.current = None;
            return Ok(Turn::Finished);
        };

        match self.tree.get(next_id) {
            Some(next) => {
                info!("Transition: {} -> {}", node.id, next.id);
                self.current = Some(next);
                Ok(Turn::Advanced)
            }
            None => {
                warn!(
                    "Node {} routed to missing node {next_id}; ending session",
                    node.id
                );
                self.current = None;
                Ok(Turn::Finished)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Capabilities a transport (chat, terminal, HTTP) lends to the interpreter.
pub trait DialogueIo {
    fn display(&mut self, text: &str) -> Result<()>;

    /// Next raw answer, or `None` when the input side has gone away.
    fn next_answer(&mut self) -> Result<Option<String>>;

    /// Called once with the finished transcript.
    fn end_dialogue(&mut self, transcript: &Transcript) -> Result<()>;
}

impl<T: DialogueIo + ?Sized> DialogueIo for &mut T {
    fn display(&mut self, text: &str) -> Result<()> {
        (**self).display(text)
    }

    fn next_answer(&mut self) -> Result<Option<String>> {
        (**self).next_answer()
    }

    fn end_dialogue(&mut self, transcript: &Transcript) -> Result<()> {
        (**self).end_dialogue(transcript)
    }
}

pub fn retry_message(verification: Verification) -> String {
    format!(
        "{}, please try again...",
        verification.message().unwrap_or("Invalid answer")
    )
}

/// Drives a [`Session`] to completion through a [`DialogueIo`].
pub struct Interpreter<'t, I> {
    session: Session<'t>,
    io: I,
}

impl<'t, I: DialogueIo> Interpreter<'t, I> {
    pub fn new(tree: &'t Tree, io: I) -> Result<Self, SessionError> {
        Ok(Self {
            session: Session::start(tree)?,
            io,
        })
    }

    pub fn run(mut self) -> Result<Transcript, SessionError> {
        while let Some(question) = self.session.question() {
            self.io.display(&question)?;

            let answer = if self.session.awaits_answer() {
                Some(self.io.next_answer()?.ok_or(SessionError::InputClosed)?)
            } else {
                None
            };

            if let Turn::Rejected(verification) = self.session.submit(answer.as_deref())? {
                self.io.display(&retry_message(verification))?;
            }
        }

        let transcript = self.session.into_transcript();
        self.io.end_dialogue(&transcript)?;
        Ok(transcript)
    }
}
