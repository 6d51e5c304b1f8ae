use sha2::{Digest, Sha256};

/// Hex SHA-256 of a logical cache key; safe to use as a file name.
pub(crate) fn cache_file_stem(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_is_stable_and_path_safe() {
        let a = cache_file_stem("explorer:contract:0xAbC/../../etc");
        let b = cache_file_stem("explorer:contract:0xAbC/../../etc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, cache_file_stem("explorer:contract:0xabc"));
    }
}
