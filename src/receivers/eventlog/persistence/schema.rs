// SPDX-License-Identifier: Apache-2.0

//! On-disk checkpoint format.
//!
//! ```json
//! {
//!   "CurrentPos": 1024,
//!   "Date": "2024-05-01T12:00:00.123456789Z",
//!   "LogLastMod": "2024-05-01T11:59:58Z",
//!   "Inode": 393219
//! }
//! ```
//!
//! `Date` carries sub-second precision, `LogLastMod` is whole seconds.

use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::receivers::eventlog::error::CheckpointError;

/// Resume point: everything before `position` in the file identified by
/// `inode` has been segmented and handed to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub position: u64,
    pub checkpoint_time: DateTime<Utc>,
    pub log_mod_time: DateTime<Utc>,
    pub inode: u64,
}

impl Checkpoint {
    /// A checkpoint stamped with the current time.
    pub fn now(position: u64, inode: u64, log_mod_time: SystemTime) -> Self {
        Self {
            position,
            checkpoint_time: Utc::now(),
            log_mod_time: DateTime::<Utc>::from(log_mod_time).trunc_subsecs(0),
            inode,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    #[serde(rename = "CurrentPos")]
    current_pos: i64,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "LogLastMod")]
    log_last_mod: String,
    #[serde(rename = "Inode")]
    inode: u64,
}

pub fn encode(checkpoint: &Checkpoint) -> Result<Vec<u8>, CheckpointError> {
    let current_pos = i64::try_from(checkpoint.position).map_err(|_| {
        CheckpointError::Write(format!("position {} out of range", checkpoint.position))
    })?;
    let record = CheckpointRecord {
        current_pos,
        date: checkpoint
            .checkpoint_time
            .to_rfc3339_opts(SecondsFormat::Nanos, true),
        log_last_mod: checkpoint
            .log_mod_time
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        inode: checkpoint.inode,
    };
    serde_json::to_vec_pretty(&record).map_err(|e| CheckpointError::Write(e.to_string()))
}

pub fn decode(data: &[u8]) -> Result<Checkpoint, CheckpointError> {
    let record: CheckpointRecord =
        serde_json::from_slice(data).map_err(|e| CheckpointError::Corrupt(e.to_string()))?;

    let position = u64::try_from(record.current_pos).map_err(|_| {
        CheckpointError::Corrupt(format!("negative CurrentPos {}", record.current_pos))
    })?;

    Ok(Checkpoint {
        position,
        checkpoint_time: parse_timestamp("Date", &record.date)?,
        log_mod_time: parse_timestamp("LogLastMod", &record.log_last_mod)?.trunc_subsecs(0),
        inode: record.inode,
    })
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, CheckpointError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| CheckpointError::Timestamp {
            field,
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Checkpoint {
        Checkpoint {
            position: 4096,
            checkpoint_time: Utc.timestamp_opt(1_714_564_800, 123_456_789).unwrap(),
            log_mod_time: Utc.timestamp_opt(1_714_564_798, 0).unwrap(),
            inode: 42,
        }
    }

    #[test]
    fn test_wire_field_names_and_precision() {
        let bytes = encode(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["CurrentPos"], 4096);
        assert_eq!(value["Inode"], 42);
        assert_eq!(value["Date"], "2024-05-01T12:00:00.123456789Z");
        assert_eq!(value["LogLastMod"], "2024-05-01T11:59:58Z");
    }

    #[test]
    fn test_decode_restores_fields() {
        let cp = sample();
        assert_eq!(decode(&encode(&cp).unwrap()).unwrap(), cp);
    }

    #[test]
    fn test_log_mod_time_is_truncated_to_seconds() {
        let mut cp = sample();
        cp.log_mod_time = Utc.timestamp_opt(1_714_564_798, 999_000_000).unwrap();

        let restored = decode(&encode(&cp).unwrap()).unwrap();
        assert_eq!(
            restored.log_mod_time,
            Utc.timestamp_opt(1_714_564_798, 0).unwrap()
        );
        assert_eq!(restored.checkpoint_time, cp.checkpoint_time);
    }

    #[test]
    fn test_decode_accepts_offsets() {
        let data = br#"{"CurrentPos":10,"Date":"2024-05-01T14:00:00.5+02:00","LogLastMod":"2024-05-01T13:59:00+02:00","Inode":7}"#;
        let cp = decode(data).unwrap();
        assert_eq!(
            cp.checkpoint_time,
            Utc.timestamp_opt(1_714_564_800, 500_000_000).unwrap()
        );
        assert_eq!(cp.log_mod_time, Utc.timestamp_opt(1_714_564_740, 0).unwrap());
    }

    #[test]
    fn test_bad_timestamp_names_the_field() {
        let data = br#"{"CurrentPos":0,"Date":"2024-05-01T12:00:00Z","LogLastMod":"yesterday","Inode":1}"#;
        match decode(data) {
            Err(CheckpointError::Timestamp { field, value, .. }) => {
                assert_eq!(field, "LogLastMod");
                assert_eq!(value, "yesterday");
            }
            other => panic!("expected timestamp error, got {:?}", other),
        }

        let data = br#"{"CurrentPos":0,"Date":"01/05/2024","LogLastMod":"2024-05-01T12:00:00Z","Inode":1}"#;
        assert!(matches!(
            decode(data),
            Err(CheckpointError::Timestamp { field: "Date", .. })
        ));
    }

    #[test]
    fn test_corrupt_content() {
        assert!(matches!(decode(b"{not json"), Err(CheckpointError::Corrupt(_))));
        assert!(matches!(
            decode(br#"{"CurrentPos":0}"#),
            Err(CheckpointError::Corrupt(_))
        ));
        let negative = br#"{"CurrentPos":-1,"Date":"2024-05-01T12:00:00Z","LogLastMod":"2024-05-01T12:00:00Z","Inode":1}"#;
        assert!(matches!(decode(negative), Err(CheckpointError::Corrupt(_))));
    }
}
