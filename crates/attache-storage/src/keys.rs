//! Shared key generation for derived assets.

use attache_core::models::DerivedKind;
use uuid::Uuid;

/// Generate a fresh storage key for a derived asset.
///
/// The uuid prefix keeps retries of the same job from overwriting each other's
/// output; the suggested name is reduced to `[A-Za-z0-9._-]`.
pub fn derived_key(kind: DerivedKind, suggested_name: &str) -> String {
    format!(
        "derived/{}/{}-{}",
        kind.as_str(),
        Uuid::new_v4(),
        sanitize_name(suggested_name)
    )
}

pub fn sanitize_name(name: &str) -> String {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "asset".to_string()
    } else {
        cleaned.to_string()
    }
}
