//! Resource naming.
//!
//! Kubernetes object names must be DNS-1123 subdomains: lowercase
//! alphanumerics, `-` and `.`, at most 253 characters. Identifiers that are
//! not guaranteed to fit (client IDs, emails, user/connector pairs) are
//! hashed with 64-bit FNV-1 and encoded with a lowercase base32 alphabet,
//! which always yields a 13 character legal name.
//!
//! Two distinct identifiers can hash to the same name. With 64 bits the
//! probability is negligible for the object counts involved and is accepted;
//! lookups treat "no object under the expected name" as an ordinary
//! not-found outcome.

use std::sync::LazyLock;

use regex::Regex;
use warden_storage::{StorageError, StorageResult};

/// Maximum length of an object name.
pub const MAX_NAME_LEN: usize = 253;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("Invalid resource name regex")
});

/// 64-bit FNV-1 state. A fresh value is created for every name.
struct Fnv64(u64);

impl Fnv64 {
    fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 = self.0.wrapping_mul(FNV_PRIME);
            self.0 ^= u64::from(*byte);
        }
    }

    fn finish(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

/// Encodes bytes as unpadded base32 over `[a-z2-7]`.
fn encode_base32(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for byte in bytes {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = (buffer >> bits) & 0x1f;
            out.push(char::from(BASE32_ALPHABET[index as usize]));
        }
        buffer &= (1 << bits) - 1;
    }

    if bits > 0 {
        let index = (buffer << (5 - bits)) & 0x1f;
        out.push(char::from(BASE32_ALPHABET[index as usize]));
    }

    out
}

/// Derives an object name from an arbitrary identifier.
#[must_use]
pub fn id_to_name(id: &str) -> String {
    let mut hash = Fnv64::new();
    hash.write(id.as_bytes());
    encode_base32(&hash.finish())
}

/// Derives the object name of the offline sessions of a user/connector pair.
#[must_use]
pub fn offline_token_name(user_id: &str, conn_id: &str) -> String {
    let mut hash = Fnv64::new();
    hash.write(user_id.as_bytes());
    hash.write(conn_id.as_bytes());
    encode_base32(&hash.finish())
}

/// Checks that `name` is a legal object name.
///
/// # Errors
///
/// Returns `InvalidName` if the name is empty, too long, or outside the
/// DNS-1123 subdomain grammar.
pub fn validate_name(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::invalid_name(name, "name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StorageError::invalid_name(
            name,
            format!("name exceeds {MAX_NAME_LEN} characters"),
        ));
    }
    if !NAME_REGEX.is_match(name) {
        return Err(StorageError::invalid_name(
            name,
            "name must consist of lowercase alphanumerics, '-' or '.', and start and end with an alphanumeric",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(id_to_name(""), "zpzjzzeeeirsk");
        assert_eq!(id_to_name("a"), "v5r32tegag334");
        assert_eq!(id_to_name("foobar"), "gqgyozne3wu4e");
        assert_eq!(id_to_name("jane@example.com"), "4cmhosygser5m");
    }

    #[test]
    fn test_offline_token_name() {
        assert_eq!(offline_token_name("user-1", "conn-1"), "2fvnswwztvlje");
        // Both parts feed one hash, so the split point does not matter.
        assert_eq!(
            offline_token_name("user-1", "conn-1"),
            id_to_name("user-1conn-1")
        );
    }

    #[test]
    fn test_names_are_legal() {
        for id in [
            "",
            "example-app",
            "Jane.Doe@Example.COM",
            "client with spaces",
            "日本語",
            &"x".repeat(1000),
        ] {
            let name = id_to_name(id);
            assert_eq!(name.len(), 13);
            assert!(validate_name(&name).is_ok(), "{name} is not legal");
        }
    }

    #[test]
    fn test_deterministic_across_threads() {
        let expected = id_to_name("example-app");
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| id_to_name("example-app")))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn test_validate_name_accepts() {
        assert!(validate_name("openid-connect-keys").is_ok());
        assert!(validate_name("authcodes.warden.dev").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_validate_name_rejects() {
        for name in [
            "",
            "Upper",
            "-leading",
            "trailing-",
            "has space",
            "slash/name",
            "a..b",
            "under_score",
        ] {
            let err = validate_name(name).unwrap_err();
            assert!(matches!(err, StorageError::InvalidName { .. }), "{name}");
        }
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
