//! Backup models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::artifact::Release;

/// Manifest of one stored snapshot of the live deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    /// Monotonic per-host sequence number
    pub seq: u64,

    /// Snapshot time
    pub created_at: DateTime<Utc>,

    /// Release that was live when the snapshot was taken, if any
    pub release: Option<Release>,

    /// Content digest of the snapshot
    pub digest: String,
}

impl Backup {
    /// Directory name in the backup store: `<seq:06>-<YYYYmmddTHHMMSSZ>`
    pub fn dir_name(&self) -> String {
        format!("{:06}-{}", self.seq, self.created_at.format("%Y%m%dT%H%M%SZ"))
    }

    /// Parse the sequence number back out of a store directory name
    pub fn parse_seq(dir_name: &str) -> Option<u64> {
        let (seq, _) = dir_name.split_once('-')?;
        seq.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dir_name_round_trips_seq() {
        let backup = Backup {
            seq: 42,
            created_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap(),
            release: None,
            digest: "sha256:00".to_string(),
        };
        assert_eq!(backup.dir_name(), "000042-20240309T140500Z");
        assert_eq!(Backup::parse_seq(&backup.dir_name()), Some(42));
        assert_eq!(Backup::parse_seq(".tmp-abc"), None);
    }
}
