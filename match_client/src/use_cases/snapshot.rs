// Movement payload decoding: every accepted shape normalizes to identity + position.

use crate::domain::{DecodeError, Position, RemoteEntityState};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Which payload shape produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotShape {
    Empty,
    Full,
    Single,
    PositionOnly,
}

/// One decode attempt. Strategies are tried in `DECODE_ORDER`; first success wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    EmptySentinel,
    KeyedSnapshot,
    SingleState,
    PositionOnly,
}

pub const DECODE_ORDER: [DecodeStrategy; 4] = [
    DecodeStrategy::EmptySentinel,
    DecodeStrategy::KeyedSnapshot,
    DecodeStrategy::SingleState,
    DecodeStrategy::PositionOnly,
];

/// Decoded movement payload in one record shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSnapshot {
    pub shape: SnapshotShape,
    pub entries: Vec<RemoteEntityState>,
    /// Keys of a full snapshot whose records were malformed. Still present,
    /// so they never count as absent.
    pub skipped: Vec<String>,
}

impl NormalizedSnapshot {
    /// Only a full snapshot enumerates every present entity, so only it may
    /// imply departure by absence.
    pub fn is_complete(&self) -> bool {
        self.shape == SnapshotShape::Full
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `identity` was named by this snapshot, well-formed or not.
    pub fn mentions(&self, identity: &str) -> bool {
        self.entries.iter().any(|entry| entry.identity == identity)
            || self.skipped.iter().any(|key| key == identity)
    }

    fn partial(shape: SnapshotShape, entries: Vec<RemoteEntityState>) -> Self {
        Self {
            shape,
            entries,
            skipped: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlayerStateRecord {
    #[serde(default)]
    user_id: Option<String>,
    x: f32,
    y: f32,
}

#[derive(Debug, Deserialize)]
struct SingleStateRecord {
    // Required: a record without a string user_id is the position-only shape.
    user_id: String,
    x: f32,
    y: f32,
}

#[derive(Debug, Deserialize)]
struct PositionRecord {
    x: f32,
    y: f32,
}

pub fn decode(payload: &[u8], sender: Option<&str>) -> Result<NormalizedSnapshot, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let sender = sender.filter(|sender| !sender.is_empty());

    for strategy in DECODE_ORDER {
        if let Some(snapshot) = attempt(strategy, text, sender) {
            return Ok(snapshot);
        }
    }

    Err(DecodeError::UnrecognizedShape {
        bytes: payload.len(),
        sender: sender.map(str::to_string),
    })
}

fn attempt(strategy: DecodeStrategy, text: &str, sender: Option<&str>) -> Option<NormalizedSnapshot> {
    match strategy {
        DecodeStrategy::EmptySentinel => decode_empty(text),
        DecodeStrategy::KeyedSnapshot => decode_keyed(text),
        DecodeStrategy::SingleState => decode_single(text, sender),
        DecodeStrategy::PositionOnly => decode_position_only(text, sender),
    }
}

fn decode_empty(text: &str) -> Option<NormalizedSnapshot> {
    let trimmed = text.trim();
    (trimmed.is_empty() || trimmed == "null")
        .then(|| NormalizedSnapshot::partial(SnapshotShape::Empty, Vec::new()))
}

fn decode_keyed(text: &str) -> Option<NormalizedSnapshot> {
    let records: BTreeMap<String, Value> = serde_json::from_str(text).ok()?;

    let mut entries = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();
    for (identity, value) in records {
        let Some(position) = keyed_position(&identity, value) else {
            skipped.push(identity);
            continue;
        };
        entries.push(RemoteEntityState::new(identity, position));
    }

    // One well-formed record makes it a snapshot; otherwise let later shapes try.
    if entries.is_empty() {
        return None;
    }
    if !skipped.is_empty() {
        debug!(skipped = ?skipped, kept = entries.len(), "malformed snapshot records skipped");
    }

    Some(NormalizedSnapshot {
        shape: SnapshotShape::Full,
        entries,
        skipped,
    })
}

fn keyed_position(identity: &str, value: Value) -> Option<Position> {
    if identity.is_empty() {
        return None;
    }
    let record: PlayerStateRecord = serde_json::from_value(value).ok()?;
    let position = Position::new(record.x, record.y);
    if !position.is_finite() {
        return None;
    }
    if let Some(user_id) = record.user_id.as_deref() {
        if !user_id.is_empty() && user_id != identity {
            warn!(key = %identity, user_id, "snapshot record disagrees with its key; using key");
        }
    }
    Some(position)
}

fn decode_single(text: &str, sender: Option<&str>) -> Option<NormalizedSnapshot> {
    let record: SingleStateRecord = serde_json::from_str(text).ok()?;
    let position = Position::new(record.x, record.y);
    if !position.is_finite() {
        return None;
    }

    let identity = if record.user_id.is_empty() {
        sender?.to_string()
    } else {
        record.user_id
    };

    Some(NormalizedSnapshot::partial(
        SnapshotShape::Single,
        vec![RemoteEntityState::new(identity, position)],
    ))
}

fn decode_position_only(text: &str, sender: Option<&str>) -> Option<NormalizedSnapshot> {
    let sender = sender?;
    let record: PositionRecord = serde_json::from_str(text).ok()?;
    let position = Position::new(record.x, record.y);
    if !position.is_finite() {
        return None;
    }

    Some(NormalizedSnapshot::partial(
        SnapshotShape::PositionOnly,
        vec![RemoteEntityState::new(sender, position)],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_payload_is_null_or_blank_then_snapshot_is_empty_and_partial() {
        for payload in ["null", "", "  \n", " null "] {
            let snapshot = decode(payload.as_bytes(), None).expect("empty sentinel decodes");
            assert_eq!(snapshot.shape, SnapshotShape::Empty);
            assert!(snapshot.is_empty());
            assert!(!snapshot.is_complete());
        }
    }

    #[test]
    fn when_payload_is_keyed_map_then_snapshot_is_full_and_complete() {
        let payload = br#"{"u1":{"user_id":"u1","x":3,"y":4},"u2":{"user_id":"u2","x":5,"y":6}}"#;

        let snapshot = decode(payload, None).expect("keyed snapshot decodes");

        assert_eq!(snapshot.shape, SnapshotShape::Full);
        assert!(snapshot.is_complete());
        assert_eq!(
            snapshot.entries,
            vec![
                RemoteEntityState::new("u1", Position::new(3.0, 4.0)),
                RemoteEntityState::new("u2", Position::new(5.0, 6.0)),
            ]
        );
    }

    #[test]
    fn when_some_keyed_records_are_malformed_then_the_rest_still_decode_as_full() {
        let payloads: [&[u8]; 3] = [
            br#"{"u1":null,"u2":{"user_id":"u2","x":1,"y":2}}"#,
            br#"{"u1":{"x":"oops"},"u2":{"user_id":"u2","x":1,"y":2}}"#,
            br#"{"u1":{"x":1e39,"y":0},"u2":{"x":1,"y":2}}"#,
        ];
        for payload in payloads {
            let snapshot = decode(payload, None).expect("well-formed record keeps the snapshot");

            assert_eq!(snapshot.shape, SnapshotShape::Full);
            assert_eq!(
                snapshot.entries,
                vec![RemoteEntityState::new("u2", Position::new(1.0, 2.0))]
            );
            assert_eq!(snapshot.skipped, vec!["u1".to_string()]);
            assert!(snapshot.mentions("u1"));
        }
    }

    #[test]
    fn when_record_user_id_disagrees_with_key_then_key_wins() {
        let payload = br#"{"u1":{"user_id":"someone-else","x":1,"y":2}}"#;

        let snapshot = decode(payload, None).expect("keyed snapshot decodes");

        assert_eq!(snapshot.entries[0].identity, "u1");
    }

    #[test]
    fn when_position_only_is_keyed_by_sender_then_exact_floats_survive() {
        let outbound = serde_json::to_string(&serde_json::json!({"x": 1.5, "y": -2.25}))
            .expect("serialize position");
        let keyed = format!(r#"{{"sender-1":{outbound}}}"#);

        let snapshot = decode(keyed.as_bytes(), None).expect("keyed snapshot decodes");

        assert_eq!(
            snapshot.entries,
            vec![RemoteEntityState::new("sender-1", Position::new(1.5, -2.25))]
        );
    }

    #[test]
    fn when_single_record_has_user_id_then_it_names_the_entity() {
        let snapshot =
            decode(br#"{"user_id":"u7","x":1,"y":2}"#, Some("relay")).expect("single decodes");

        assert_eq!(snapshot.shape, SnapshotShape::Single);
        assert!(!snapshot.is_complete());
        assert_eq!(snapshot.entries[0].identity, "u7");
    }

    #[test]
    fn when_single_record_user_id_is_empty_then_sender_names_the_entity() {
        let snapshot =
            decode(br#"{"user_id":"","x":1,"y":2}"#, Some("u9")).expect("single decodes");

        assert_eq!(snapshot.shape, SnapshotShape::Single);
        assert_eq!(snapshot.entries[0].identity, "u9");
    }

    #[test]
    fn when_payload_is_position_only_then_sender_is_required() {
        let snapshot = decode(br#"{"x":1.5,"y":-2.25}"#, Some("u3")).expect("position decodes");
        assert_eq!(snapshot.shape, SnapshotShape::PositionOnly);
        assert_eq!(
            snapshot.entries,
            vec![RemoteEntityState::new("u3", Position::new(1.5, -2.25))]
        );

        let missing = decode(br#"{"x":1.5,"y":-2.25}"#, None);
        assert_eq!(
            missing,
            Err(DecodeError::UnrecognizedShape {
                bytes: 19,
                sender: None
            })
        );
    }

    #[test]
    fn when_user_id_is_not_a_string_then_position_only_applies() {
        let snapshot = decode(br#"{"user_id":7,"x":1,"y":2}"#, Some("u4")).expect("decodes");

        assert_eq!(snapshot.shape, SnapshotShape::PositionOnly);
        assert_eq!(snapshot.entries[0].identity, "u4");
    }

    #[test]
    fn when_payload_is_unrecognized_then_decode_fails() {
        let payloads: [&[u8]; 4] = [b"{}", b"[]", b"\"text\"", b"{\"u1\":{\"x\":1}}"];
        for payload in payloads {
            assert!(matches!(
                decode(payload, Some("u1")),
                Err(DecodeError::UnrecognizedShape { .. })
            ));
        }
    }

    #[test]
    fn when_coordinates_overflow_then_record_is_rejected() {
        assert!(decode(br#"{"x":1e39,"y":0}"#, Some("u1")).is_err());
        assert!(decode(br#"{"u1":{"x":1e39,"y":0}}"#, None).is_err());
    }

    #[test]
    fn when_payload_is_not_utf8_then_decode_fails() {
        assert_eq!(decode(&[0xff, 0xfe], Some("u1")), Err(DecodeError::NotUtf8));
    }
}
