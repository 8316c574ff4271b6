use sha2::{Digest, Sha256};

use crate::{format, types::Exercise};

/// Compute SHA-256 hash of bytes, returning lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content-derived record id: SHA-256 over the canonical form of the
/// normalized exercise. Same content, same id, whatever the whitespace.
pub fn content_id(exercise: &Exercise) -> String {
    let canonical = format::render_exercise(&exercise.normalized());
    sha256_hex(canonical.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DialogMatching, OtherExercise};

    #[test]
    fn sha256_hello() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn content_id_is_stable_and_type_sensitive() {
        let other = Exercise::Other(OtherExercise {
            kind: "listening".into(),
            content: "A".into(),
            solution: String::new(),
        });
        let dialogs = Exercise::DialogMatching(DialogMatching {
            dialogs: vec!["A".into()],
            images: vec![],
            correct_matches: Default::default(),
        });
        assert_eq!(content_id(&other), content_id(&other.clone()));
        assert_ne!(content_id(&other), content_id(&dialogs));
        assert!(content_id(&other).chars().all(|c| c.is_ascii_hexdigit()));
    }
}
