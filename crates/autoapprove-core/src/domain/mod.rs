//! Domain model for change evaluation.
//!
//! - `ChangeRequest` / `FileDelta`: the change snapshot under evaluation
//! - `ReviewRecord` / `CommentRecord`: existing human feedback
//! - `CombinedStatus` / `CheckRun`: CI signal for the head commit
//! - `AnalysisVerdict` / `ConsensusVerdict`: AI analysis outputs
//! - `Decision`: the engine's answer

pub mod change;
pub mod ci;
pub mod decision;
pub mod error;
pub mod feedback;
pub mod verdict;

pub use change::{
    Author, AuthorAssociation, ChangeId, ChangeRequest, ChangeState, FileDelta, RepoPermission,
};
pub use ci::{CheckConclusion, CheckRun, CheckRunStatus, CombinedStatus, CommitStatus, StatusState};
pub use decision::Decision;
pub use error::{
    EngineError, EngineResult, HostingError, HostingResult, ModelError, ModelResult,
    ValidationError,
};
pub use feedback::{CommentKind, CommentRecord, ReviewRecord, ReviewState};
pub use verdict::{AnalysisVerdict, Category, ConsensusVerdict, VetoFlags};
