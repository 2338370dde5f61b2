use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Opaque listing cursor over a `(created_at, id)` pair.
/// Format before encoding: "{created_at_rfc3339}|{uuid}".
pub fn encode(created_at: DateTime<Utc>, id: Uuid) -> String {
    let raw = format!("{}|{}", created_at.to_rfc3339(), id);
    URL_SAFE_NO_PAD.encode(raw)
}

pub fn decode(cursor: &str) -> Result<(DateTime<Utc>, Uuid), String> {
    let decoded = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| format!("base64 decode error: {}", e))?;
    let s = String::from_utf8(decoded).map_err(|e| format!("utf8 error: {}", e))?;
    let (ts_str, id_str) = s
        .split_once('|')
        .ok_or_else(|| "missing id in cursor".to_string())?;
    let ts = DateTime::parse_from_rfc3339(ts_str)
        .map_err(|e| format!("timestamp parse error: {}", e))?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id_str).map_err(|e| format!("uuid parse error: {}", e))?;
    Ok((ts, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_what_it_encodes() {
        let created_at = Utc::now();
        let id = Uuid::new_v4();
        let cursor = encode(created_at, id);
        assert!(!cursor.contains('='));
        assert_eq!(decode(&cursor).unwrap(), (created_at, id));
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("not a cursor!").is_err());
        assert!(decode(&URL_SAFE_NO_PAD.encode("2024-01-01T00:00:00Z")).is_err());
        assert!(decode(&URL_SAFE_NO_PAD.encode("yesterday|abc")).is_err());
    }
}
