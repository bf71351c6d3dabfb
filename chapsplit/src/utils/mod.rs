//! Small helpers shared by the library and the CLI.

pub mod filename;
pub mod format;
