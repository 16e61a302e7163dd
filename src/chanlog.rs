//! Append-only per-channel transcript logs.
//!
//! One log file per channel under the log directory, named like the state
//! files by the safe transform of the folded channel name plus `.log`. The
//! file is opened, appended, and closed for every event so external log
//! rotation keeps working.

use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

use crate::irc::safe_file_stem;

pub struct ChannelLog {
    dir: PathBuf,
}

impl ChannelLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Log a PRIVMSG/NOTICE to a channel: `[ts] <nick> text`.
    pub fn speech(&self, channel: &str, nick: &str, text: &str) {
        self.append(channel, &format!("[{}] <{}> {}\n", timestamp(), nick, text));
    }

    /// Log a membership or state change: `[ts] * nick text`.
    pub fn meta(&self, channel: &str, nick: &str, text: &str) {
        self.append(channel, &format!("[{}] * {} {}\n", timestamp(), nick, text));
    }

    fn append(&self, channel: &str, line: &str) {
        let path = self.dir.join(format!("{}.log", safe_file_stem(channel)));
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(path = %path.display(), "could not append to channel log: {e}");
        }
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn speech_and_meta_lines() {
        let dir = tempdir().unwrap();
        let log = ChannelLog::new(dir.path().to_path_buf());
        log.speech("#Room", "alice", "hello");
        log.meta("#Room", "bob", "joined");

        let contents = std::fs::read_to_string(dir.path().join("#room.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] <alice> hello"));
        assert!(lines[1].ends_with("] * bob joined"));
        assert!(lines[0].contains(" UTC] "));
    }

    #[test]
    fn log_name_transform() {
        let dir = tempdir().unwrap();
        let log = ChannelLog::new(dir.path().to_path_buf());
        log.meta("#A_b/c", "alice", "joined");
        assert!(dir.path().join("#a__b_c.log").exists());
    }
}
