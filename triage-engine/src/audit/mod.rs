//! Audit log — append-only record of every state-affecting event
//!
//! The log is the ground truth; `TriageTask` rows are a cached projection
//! written in the same atomic commit as the entries that produced them.
//!
//! ```text
//! operation ──▶ build entries ──▶ apply() to projection ──▶ commit(projection, entries)
//!                                      ▲
//! stored log ──────────────────────────┘  rebuild() / diff() for verification
//! ```

pub mod projection;
pub mod types;

pub use projection::{apply, closure_consistent, diff, rebuild, Divergence, ReplayError};
pub use types::{LogAction, LogDetails, TriageTaskLog};
