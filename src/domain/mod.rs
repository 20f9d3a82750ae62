//! Domain types for cyclr
//!
//! - IssueCycle: one issue's journey, with its append-only history
//! - CycleState / Action: the fixed lifecycle topology
//! - Outcome: classified action results and their payloads
//! - Feedback: what code generation receives on a loop-back
//! - IssueContext: requirements and file references parsed from the issue

pub mod comment;
pub mod context;
pub mod cycle;
pub mod feedback;
pub mod outcome;
pub mod state;

pub use context::{IssueContext, TaskType};
pub use cycle::{AbandonReason, CycleSummary, HistoryRecord, Issue, IssueCycle, Verdict};
pub use feedback::{Feedback, FeedbackFormatter, FeedbackSource};
pub use outcome::{
    Change, CiReport, CiVerdict, FailedCheck, Outcome, Payload, ReviewComment, ReviewReport,
    ReviewVerdict, Severity, Signal,
};
pub use state::{Action, CycleState};
