//! Credential masking for logs and diagnostics

/// Keys shorter than this are fully redacted — showing four characters from
/// each end of a short key would reconstruct most or all of it.
const MIN_MASKABLE_LEN: usize = 9;

/// Render a credential as `abcd...5678` (first four and last four characters).
///
/// Short keys collapse to `****` so no part of the value leaks. The output is
/// safe for log lines and the `/status` diagnostics surface; it is not meant
/// to be reversible, only recognizable to an operator who knows the key.
pub fn mask(key: &str) -> String {
    if key.len() < MIN_MASKABLE_LEN || !key.is_ascii() {
        return "****".to_string();
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_shows_first_and_last_four() {
        assert_eq!(mask("abcd1234efgh5678"), "abcd...5678");
        assert_eq!(mask("AAAA1111BBBB2222"), "AAAA...2222");
    }

    #[test]
    fn mask_never_reveals_short_keys() {
        for key in ["", "a", "short", "12345678"] {
            let masked = mask(key);
            assert_eq!(masked, "****", "short key {key:?} must be fully redacted");
            if !key.is_empty() {
                assert!(!masked.contains(key));
            }
        }
    }

    #[test]
    fn mask_output_never_contains_middle_of_key() {
        let masked = mask("AIzaSyA-middle-secret-part-Xq9z");
        assert!(!masked.contains("middle-secret"));
        assert_eq!(masked, "AIza...-Xq9z");
    }

    #[test]
    fn mask_non_ascii_is_fully_redacted() {
        // Byte-index slicing would panic on multi-byte boundaries
        assert_eq!(mask("ключ-секрет-один"), "****");
    }
}
