//! Graph-based conversational flows: dialogue trees authored as JSON,
//! validated before publication and interpreted one question at a time.

pub mod dialogue;
pub mod directory;
pub mod error;
pub mod store;
pub mod terminal;

pub use dialogue::node::{Node, NodeClass, NodeId, NodeKind, Verification};
pub use dialogue::transcript::{Answer, AnswerValue, Transcript};
pub use dialogue::tree::{DataInjection, InjectionPayload, Tree};
pub use dialogue::validate::{validate, Report, ReportKind, ReportSummary};
pub use dialogue::{DialogueIo, Interpreter, Session, Turn};
pub use error::{SessionError, TreeError};
pub use store::{MemoryStore, TreeStore};
