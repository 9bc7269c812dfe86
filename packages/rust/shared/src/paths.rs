//! Filesystem- and object-name helpers.

use sha2::{Digest, Sha256};

/// Hex digits of the raw-ID digest appended by [`course_key`].
const COURSE_KEY_HASH_LEN: usize = 12;

/// Make an identifier safe to use as a single path component.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`, and a leading dot is
/// replaced so `..` can never escape the parent directory.
pub fn sanitize_component(raw: &str) -> String {
    let mut cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.starts_with('.') {
        cleaned.replace_range(..1, "_");
    }
    if cleaned.is_empty() {
        cleaned.push('_');
    }
    cleaned
}

/// Directory and object-prefix key for a course: `<sanitized>-<sha256 prefix>`.
///
/// Sanitizing alone maps `a b` and `a_b` to the same component; the digest
/// of the raw ID keeps distinct courses apart.
pub fn course_key(course_id: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(course_id.as_bytes()));
    format!(
        "{}-{}",
        sanitize_component(course_id),
        &digest[..COURSE_KEY_HASH_LEN]
    )
}

/// Name a course file gets on disk and in the durable store: `<id>_<filename>`.
pub fn file_object_name(id: &str, filename: &str) -> String {
    format!("{}_{}", sanitize_component(id), sanitize_component(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_names() {
        assert_eq!(sanitize_component("Chapter_3.pdf"), "Chapter_3.pdf");
        assert_eq!(sanitize_component("Lab Manual (v2).pdf"), "Lab_Manual__v2_.pdf");
    }

    #[test]
    fn sanitize_blocks_traversal() {
        assert_eq!(sanitize_component("../etc"), "_._etc");
        assert_eq!(sanitize_component(".."), "_.");
        assert_eq!(sanitize_component(""), "_");
    }

    #[test]
    fn course_keys_stay_distinct_after_sanitizing() {
        assert_eq!(sanitize_component("a b"), sanitize_component("a_b"));

        let spaced = course_key("a b");
        let underscored = course_key("a_b");
        let slashed = course_key("a/b");
        assert_ne!(spaced, underscored);
        assert_ne!(spaced, slashed);
        assert_ne!(underscored, slashed);

        assert!(underscored.starts_with("a_b-"));
        assert_eq!(underscored.len(), "a_b-".len() + COURSE_KEY_HASH_LEN);
        assert_eq!(course_key("a_b"), underscored);
    }

    #[test]
    fn course_key_is_a_single_safe_component() {
        let key = course_key("../../etc");
        assert!(!key.contains('/'));
        assert!(!key.starts_with('.'));
    }

    #[test]
    fn object_name_prefixes_id() {
        assert_eq!(file_object_name("101", "Chapter 3.pdf"), "101_Chapter_3.pdf");
    }
}
