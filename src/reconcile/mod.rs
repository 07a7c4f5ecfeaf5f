// Offline reconciliation of recorded time columns.

pub mod convert;
pub mod periods;
pub mod reader;
pub mod timeline;
