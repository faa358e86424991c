//! Shared data types for the sockexec protocol

use serde::{Deserialize, Serialize};

/// Kind of a workspace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// One entry of a workspace listing
///
/// Derived from the filesystem at list time; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time, RFC 3339 in UTC with millisecond precision
    pub modified: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_json_shape() {
        let json = r#"{"name":"build","size":0,"modified":"2024-01-02T03:04:05.006Z","type":"directory"}"#;
        let entry: FileEntry = serde_json::from_str(json).unwrap();
        assert!(entry.is_dir());
        assert_eq!(entry.name, "build");
        assert_eq!(serde_json::to_string(&entry).unwrap(), json);
    }
}
