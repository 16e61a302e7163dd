//! Per-channel state persistence.
//!
//! Each channel's topic and key live in one small TOML file under the state
//! directory, named by the filesystem-safe transform of the folded channel
//! name. Files are replaced atomically: the new contents go to a sibling
//! temp file which is then renamed over the target, so a crash mid-write
//! leaves either the old version or the new one, never a torn file.
//!
//! Persistence failures never break the server. A file that is missing or
//! unparsable reads as an empty topic and no key; a failed write is logged
//! and the in-memory state stays authoritative until the next mutation
//! retries.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::irc::safe_file_stem;

/// The on-disk record. Strictly parsed; never evaluated.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelRecord {
    pub topic: String,
    pub key: Option<String>,
}

/// Reads and writes channel records under one state directory.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, folded_name: &str) -> PathBuf {
        self.dir.join(safe_file_stem(folded_name))
    }

    /// Load the record for a channel. Absent or unreadable state reads as
    /// the default record.
    pub fn load(&self, folded_name: &str) -> ChannelRecord {
        let path = self.path(folded_name);
        let contents = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ChannelRecord::default(),
            Err(e) => {
                warn!(path = %path.display(), "could not read channel state: {e}");
                return ChannelRecord::default();
            }
        };
        match toml::from_str(&contents) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), "bad channel state file: {e}");
                ChannelRecord::default()
            }
        }
    }

    /// Write the record for a channel via a sibling temp file and rename.
    pub fn save(&self, folded_name: &str, record: &ChannelRecord) {
        let path = self.path(folded_name);
        let contents = match toml::to_string_pretty(record) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), "could not serialize channel state: {e}");
                return;
            }
        };
        let tmp = tmp_path(&path);
        if let Err(e) = std::fs::write(&tmp, &contents) {
            warn!(path = %tmp.display(), "could not write channel state: {e}");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            warn!(path = %path.display(), "could not replace channel state: {e}");
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_default() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        assert_eq!(store.load("#nowhere"), ChannelRecord::default());
    }

    #[test]
    fn round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        let record = ChannelRecord {
            topic: "hello world".into(),
            key: Some("sekrit".into()),
        };
        store.save("#room", &record);
        assert_eq!(store.load("#room"), record);

        let cleared = ChannelRecord {
            topic: "hello world".into(),
            key: None,
        };
        store.save("#room", &cleared);
        assert_eq!(store.load("#room"), cleared);
    }

    #[test]
    fn corrupt_file_reads_as_default() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        std::fs::write(dir.path().join(safe_file_stem("#bad")), "topic = [broken").unwrap();
        assert_eq!(store.load("#bad"), ChannelRecord::default());
    }

    #[test]
    fn write_goes_through_sibling_tmp() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store.save(
            "#a_b/c",
            &ChannelRecord {
                topic: "t".into(),
                key: None,
            },
        );
        // The target exists under the transformed name and no temp file
        // is left behind.
        assert!(dir.path().join("#a__b_c").exists());
        assert!(!dir.path().join("#a__b_c.tmp").exists());
    }

    #[test]
    fn state_file_is_not_code() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store.save(
            "#room",
            &ChannelRecord {
                topic: "import os".into(),
                key: Some("__other__".into()),
            },
        );
        let raw = std::fs::read_to_string(dir.path().join("#room")).unwrap();
        let parsed: ChannelRecord = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.topic, "import os");
    }
}
