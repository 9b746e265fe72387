use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Sign an outgoing provider request body with HMAC-SHA256.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> String {
    let data = format!("{}.{}", timestamp, body);
    // HMAC-SHA256 accepts any key length, so this cannot fail
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts any key length");
    mac.update(data.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Order-independent digest of a token list.
pub fn hash_tokens(tokens: &[String]) -> String {
    let mut sorted: Vec<&str> = tokens.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for token in sorted {
        hasher.update(token.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_payload_format() {
        let sig = sign_payload("secret", 1_700_000_000, r#"{"a":1}"#);
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
    }

    #[test]
    fn test_sign_payload_deterministic() {
        let a = sign_payload("secret", 42, "body");
        let b = sign_payload("secret", 42, "body");
        assert_eq!(a, b);
    }

    #[test]
    fn test_sign_payload_depends_on_timestamp_and_secret() {
        let base = sign_payload("secret", 42, "body");
        assert_ne!(base, sign_payload("secret", 43, "body"));
        assert_ne!(base, sign_payload("other", 42, "body"));
    }

    #[test]
    fn test_hash_tokens_order_independent() {
        let a = hash_tokens(&["x".to_string(), "y".to_string()]);
        let b = hash_tokens(&["y".to_string(), "x".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, hash_tokens(&["x".to_string()]));
    }

    #[test]
    fn test_hash_tokens_separates_boundaries() {
        let joined = hash_tokens(&["ab".to_string()]);
        let split = hash_tokens(&["a".to_string(), "b".to_string()]);
        assert_ne!(joined, split);
    }
}
