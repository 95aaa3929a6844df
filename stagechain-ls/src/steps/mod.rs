//! The four stages of the ls pipeline and the context they share.

mod filter_files;
mod list_files;
mod parse_arguments;
mod print_files;

use parking_lot::RwLock;
use std::path::{Path, PathBuf};

pub use filter_files::FilterFiles;
pub use list_files::ListFiles;
pub use parse_arguments::ParseArguments;
pub use print_files::PrintFiles;

/// State shared by every stage of one ls run.
///
/// `ParseArguments` writes the wildcard before emitting its marker, so any
/// stage reading it after receiving an item sees the final value.
#[derive(Debug)]
pub struct LsContext {
    wildcard: RwLock<String>,
    argument: Option<String>,
    dir: PathBuf,
}

impl LsContext {
    pub fn new(argument: Option<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            wildcard: RwLock::new(String::new()),
            argument,
            dir: dir.into(),
        }
    }

    /// The raw pattern argument, if one was given.
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// The directory being listed.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn wildcard(&self) -> String {
        self.wildcard.read().clone()
    }

    pub fn set_wildcard(&self, wildcard: impl Into<String>) {
        *self.wildcard.write() = wildcard.into();
    }
}
