//! Process Lineage
//!
//! A user's shell and the commands it spawns share one authentication. On
//! POSIX the lineage is keyed by the parent process id; elsewhere a fixed
//! index name is used.

use std::fmt;

/// Index file name used where no parent pid is available
pub const FIXED_INDEX_NAME: &str = "cookiefile";

/// Key naming the token index file of this process lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageKey {
    ParentPid(u32),
    Fixed,
}

impl LineageKey {
    /// Lineage of the running process
    pub fn current() -> Self {
        #[cfg(unix)]
        {
            LineageKey::ParentPid(std::os::unix::process::parent_id())
        }
        #[cfg(not(unix))]
        {
            LineageKey::Fixed
        }
    }

    /// Basename of the index file under `<install_dir>/cookie`
    pub fn index_file_name(&self) -> String {
        match self {
            LineageKey::ParentPid(pid) => pid.to_string(),
            LineageKey::Fixed => FIXED_INDEX_NAME.to_string(),
        }
    }

    /// Token payload file name when the caller does not choose one
    pub fn default_token_file_name(&self, username: &str) -> String {
        match self {
            LineageKey::ParentPid(pid) => format!("{}cookie{}", username, pid),
            LineageKey::Fixed => format!("{}cookie", username),
        }
    }
}

impl fmt::Display for LineageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineageKey::ParentPid(pid) => write!(f, "ppid {}", pid),
            LineageKey::Fixed => f.write_str("fixed"),
        }
    }
}
