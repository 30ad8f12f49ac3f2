//! Tabula schema management
//!
//! (Re)creates the internal tables and the versioned catalog of
//! server-side plpgsql functions the rest of the system uses to
//! introspect table structure. Function creation is idempotent: any
//! previous definition is dropped regardless of its parameter signature
//! before the replacement is emitted, so exactly one version of each
//! function exists after a build.

mod columns;
mod ddl;
mod functions;
mod internal;

pub use columns::{StructureColumns, StructureColumnProvider};
pub use ddl::{owner_command, DatabaseObject};
pub use functions::FunctionBuilder;
pub use internal::InternalTable;
