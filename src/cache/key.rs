//! Blob file-name derivation for the façade's inline/file threshold policy

/// Synthesize the blob file name the façade uses when a value exceeds the
/// inline threshold and the caller did not supply one explicitly: the
/// hex-encoded MD5 digest of the cache key.
pub fn file_name_for_key(key: &str) -> String {
    let digest = md5::compute(key.as_bytes());
    hex::encode(digest.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(file_name_for_key("a"), file_name_for_key("a"));
    }

    #[test]
    fn distinguishes_keys() {
        assert_ne!(file_name_for_key("a"), file_name_for_key("b"));
    }

    #[test]
    fn is_lowercase_hex_of_expected_length() {
        let name = file_name_for_key("hello");
        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
