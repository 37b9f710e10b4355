//! Cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::types::Value;

/// Fixed-length key identifying one statement plus its bound arguments.
///
/// Statement text is trimmed but otherwise hashed verbatim; collapsing
/// inner whitespace could merge statements that differ inside literals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(statement: &str, args: &[Value]) -> Self {
        let statement = statement.trim();
        let mut hasher = Sha256::new();
        hasher.update((statement.len() as u64).to_le_bytes());
        hasher.update(statement.as_bytes());
        hasher.update((args.len() as u64).to_le_bytes());
        for arg in args {
            match arg {
                Value::Null => hasher.update(b"n"),
                Value::Bool(b) => {
                    hasher.update(b"b");
                    hasher.update([u8::from(*b)]);
                }
                Value::Int(i) => {
                    hasher.update(b"i");
                    hasher.update(i.to_le_bytes());
                }
                Value::Float(f) => {
                    hasher.update(b"f");
                    hasher.update(f.to_bits().to_le_bytes());
                }
                Value::Text(s) => {
                    hasher.update(b"t");
                    hasher.update((s.len() as u64).to_le_bytes());
                    hasher.update(s.as_bytes());
                }
                Value::Bytes(bytes) => {
                    hasher.update(b"x");
                    hasher.update((bytes.len() as u64).to_le_bytes());
                    hasher.update(bytes);
                }
            }
        }
        Self(format!("q:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELECT: &str = "SELECT id, name FROM todo WHERE id = ?";

    #[test]
    fn test_same_statement_same_key() {
        let a = CacheKey::new(SELECT, &["1".into()]);
        let b = CacheKey::new(&format!("  {SELECT}\n"), &["1".into()]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 2 + 64);
    }

    #[test]
    fn test_args_are_part_of_key() {
        let text = CacheKey::new(SELECT, &["1".into()]);
        assert_ne!(text, CacheKey::new(SELECT, &["2".into()]));
        // Same rendering, different type
        assert_ne!(text, CacheKey::new(SELECT, &[Value::Int(1)]));
        assert_ne!(text, CacheKey::new(SELECT, &[]));
    }

    #[test]
    fn test_arg_boundaries_are_unambiguous() {
        let split_one = CacheKey::new(SELECT, &["ab".into(), "c".into()]);
        let split_two = CacheKey::new(SELECT, &["a".into(), "bc".into()]);
        assert_ne!(split_one, split_two);
    }

    #[test]
    fn test_statement_cannot_absorb_args() {
        let bound = CacheKey::new("SELECT 1", &[Value::Null]);
        let inlined = CacheKey::new("SELECT 1\x1fn", &[]);
        assert_ne!(bound, inlined);
    }
}
