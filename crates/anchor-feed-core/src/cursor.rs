//! Opaque pagination cursors.
//!
//! A cursor records the sort position of the last item a client has seen.
//! On the wire it is URL-safe base64 (no padding) of a small JSON object:
//!
//! ```json
//! { "score": 42, "createdAt": "2024-05-01T12:00:00Z", "id": "4f1c…" }
//! ```
//!
//! `score` is present only for score-sorted feeds. The token is an opacity
//! convenience; it carries no signature and is not a security boundary.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CursorError;

/// Which sort keys a feed variant paginates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShape {
    /// `(timestamp, id)`
    Recency,
    /// `(score, timestamp, id)`
    Scored,
}

impl CursorShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorShape::Recency => "recency",
            CursorShape::Scored => "scored",
        }
    }
}

/// A decoded sort position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCursor {
    pub score: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub id: Uuid,
}

impl FeedCursor {
    pub fn recency(timestamp: DateTime<Utc>, id: Uuid) -> Self {
        Self {
            score: None,
            timestamp,
            id,
        }
    }

    pub fn scored(score: i64, timestamp: DateTime<Utc>, id: Uuid) -> Self {
        Self {
            score: Some(score),
            timestamp,
            id,
        }
    }

    pub fn shape(&self) -> CursorShape {
        if self.score.is_some() {
            CursorShape::Scored
        } else {
            CursorShape::Recency
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CursorWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<i64>,
    created_at: DateTime<Utc>,
    id: String,
}

/// Encode a cursor into an opaque token.
pub fn encode(cursor: &FeedCursor) -> String {
    let wire = CursorWire {
        score: cursor.score,
        created_at: cursor.timestamp,
        id: cursor.id.to_string(),
    };
    // Serializing a struct of plain fields cannot fail.
    let json = serde_json::to_vec(&wire).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a token, requiring it to match `shape`.
pub fn decode(token: &str, shape: CursorShape) -> Result<FeedCursor, CursorError> {
    let bytes = URL_SAFE_NO_PAD.decode(token.trim())?;
    let wire: CursorWire = serde_json::from_slice(&bytes)?;

    match (shape, wire.score) {
        (CursorShape::Scored, None) | (CursorShape::Recency, Some(_)) => {
            return Err(CursorError::ShapeMismatch {
                expected: shape.as_str(),
            })
        }
        _ => {}
    }

    let id = Uuid::parse_str(&wire.id)?;

    Ok(FeedCursor {
        score: wire.score,
        timestamp: wire.created_at,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
            + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn test_roundtrip_recency() {
        let c = FeedCursor::recency(ts(), Uuid::new_v4());
        let token = encode(&c);
        assert_eq!(decode(&token, CursorShape::Recency).unwrap(), c);
    }

    #[test]
    fn test_roundtrip_scored_zero_and_large() {
        for score in [0, 7, i64::from(i32::MAX) * 4] {
            let c = FeedCursor::scored(score, ts(), Uuid::new_v4());
            let token = encode(&c);
            assert_eq!(decode(&token, CursorShape::Scored).unwrap(), c);
        }
    }

    #[test]
    fn test_token_is_url_safe() {
        let token = encode(&FeedCursor::scored(99, ts(), Uuid::new_v4()));
        assert!(token
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
    }

    #[test]
    fn test_wire_field_names() {
        let id = Uuid::new_v4();
        let token = encode(&FeedCursor::scored(5, ts(), id));
        let json: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(token).unwrap()).unwrap();
        assert_eq!(json["score"], 5);
        assert_eq!(json["id"], id.to_string());
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn test_documented_token_decodes() {
        let token = "eyJzY29yZSI6NDIsImNyZWF0ZWRBdCI6IjIwMjQtMDUtMDFUMTI6MDA6MDBaIiwiaWQiOiI0ZjFjMmE5ZS04ZDNiLTRjNWEtOWU3Zi0xYTJiM2M0ZDVlNmYifQ";
        let cursor = decode(token, CursorShape::Scored).unwrap();
        assert_eq!(cursor.score, Some(42));
        assert_eq!(cursor.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        assert_eq!(
            cursor.id,
            Uuid::parse_str("4f1c2a9e-8d3b-4c5a-9e7f-1a2b3c4d5e6f").unwrap()
        );
        assert_eq!(encode(&cursor), token);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let recency = encode(&FeedCursor::recency(ts(), Uuid::new_v4()));
        assert!(matches!(
            decode(&recency, CursorShape::Scored),
            Err(CursorError::ShapeMismatch { .. })
        ));

        let scored = encode(&FeedCursor::scored(1, ts(), Uuid::new_v4()));
        assert!(matches!(
            decode(&scored, CursorShape::Recency),
            Err(CursorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            decode("***not base64***", CursorShape::Recency),
            Err(CursorError::Encoding(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            decode(&not_json, CursorShape::Recency),
            Err(CursorError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let raw = format!(
            r#"{{"createdAt":"2024-05-01T00:00:00Z","id":"{}","offset":10}}"#,
            Uuid::new_v4()
        );
        let token = URL_SAFE_NO_PAD.encode(raw);
        assert!(matches!(
            decode(&token, CursorShape::Recency),
            Err(CursorError::Malformed(_))
        ));
    }

    #[test]
    fn test_malformed_id_rejected() {
        let raw = r#"{"createdAt":"2024-05-01T00:00:00Z","id":"not-an-id"}"#;
        let token = URL_SAFE_NO_PAD.encode(raw);
        assert!(matches!(
            decode(&token, CursorShape::Recency),
            Err(CursorError::InvalidId(_))
        ));
    }
}
