use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use crate::directory::{Directory, FileDirectory, MemoryDirectory};

pub const DIRECTORY_ENV: &str = "SAFE_THING_DIRECTORY";
pub const LOG_ENV: &str = "SAFE_THING_LOG";

const DEFAULT_LOG_FILTER: &str = "info";

/// Snapshot of the settings read from the process environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// Root of the file-backed publication directory. Published things
    /// only live in memory when this is unset.
    pub directory_root: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let directory_root = lookup(DIRECTORY_ENV)
            .filter(|root| !root.trim().is_empty())
            .map(PathBuf::from);
        let log_filter = lookup(LOG_ENV)
            .filter(|filter| !filter.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned());

        Self {
            directory_root,
            log_filter,
        }
    }

    /// Open the configured publication directory, falling back to memory
    /// when the root cannot be prepared.
    pub fn directory(&self) -> Arc<dyn Directory> {
        match &self.directory_root {
            Some(root) => match FileDirectory::open(root) {
                Ok(directory) => Arc::new(directory),
                Err(e) => {
                    log::error!(
                        "cannot open directory at {}, keeping things in memory: {}",
                        root.display(),
                        e
                    );
                    Arc::new(MemoryDirectory::new())
                }
            },
            None => Arc::new(MemoryDirectory::new()),
        }
    }
}
