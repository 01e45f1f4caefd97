use chrono::{DateTime, Utc};

/// Build a content-addressed storage path for a batch written on
/// behalf of `app_id` at `timestamp`.
///
/// Hash-in-the-path is what makes a redelivered (but not yet acked)
/// batch idempotent: writing the same bytes twice produces the same
/// path, so the second write simply overwrites the first with
/// identical content rather than creating a duplicate file.
pub fn generate_path(app_id: &str, timestamp: DateTime<Utc>, content_hash_hex: &str) -> String {
    format!(
        "logs/{app_id}/{year:04}/{month:02}/{day:02}/{hash}.parquet",
        app_id = sanitize(app_id),
        year = timestamp.format("%Y"),
        month = timestamp.format("%m"),
        day = timestamp.format("%d"),
        hash = &content_hash_hex[..content_hash_hex.len().min(32)],
    )
}

fn sanitize(app_id: &str) -> String {
    app_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_stable_for_same_hash() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let p1 = generate_path("svc", ts, "abcdef0123456789");
        let p2 = generate_path("svc", ts, "abcdef0123456789");
        assert_eq!(p1, p2);
        assert!(p1.starts_with("logs/svc/2026/01/02/"));
    }

    #[test]
    fn sanitizes_unsafe_app_id_characters() {
        let ts = Utc::now();
        let path = generate_path("svc/../weird name", ts, "aaaa");
        assert!(!path.contains(".."));
        assert!(path.starts_with("logs/svc___weird_name/"));
    }
}
