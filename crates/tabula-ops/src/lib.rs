//! Project lifecycle operations: create, open, rename, copy, delete,
//! backup, and restore, plus the external-tool runner and background
//! work queue they execute on.

mod backup;
mod lifecycle;
mod prefs;
mod process;
mod queue;

pub use backup::BackupLimiter;
pub use lifecycle::{NoHooks, OpenHooks, ProjectManager};
pub use prefs::{keys as preference_keys, JsonPreferences, PreferenceStore, MAX_RECENT_PROJECTS};
pub use process::ProcessOrchestrator;
pub use queue::{Job, WorkQueue};
