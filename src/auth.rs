//! Stream key validation
//!
//! Broadcasters authenticate with a stream key. Candidates are compared
//! against every configured key with a fixed-time byte comparison so the
//! response time does not reveal how much of a key was guessed correctly.

use parking_lot::{Mutex, RwLock};

/// Validates stream keys presented by broadcasters
#[derive(Debug, Default)]
pub struct StreamKeyValidator {
    /// Configured keys
    keys: RwLock<Vec<String>>,

    /// Temporary override; when set it is the only accepted key
    override_key: Option<String>,

    /// Key that last passed validation
    last_matched: Mutex<Option<String>>,
}

impl StreamKeyValidator {
    /// Create a validator for a set of keys
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys: RwLock::new(keys),
            override_key: None,
            last_matched: Mutex::new(None),
        }
    }

    /// Create a validator that accepts only the given override key
    pub fn with_override(keys: Vec<String>, override_key: Option<String>) -> Self {
        Self {
            keys: RwLock::new(keys),
            override_key: override_key.filter(|k| !k.is_empty()),
            last_matched: Mutex::new(None),
        }
    }

    /// Replace the configured key list
    pub fn set_keys(&self, keys: Vec<String>) {
        *self.keys.write() = keys;
    }

    /// Check a candidate key
    ///
    /// Every configured key is compared even after a match.
    pub fn validate(&self, candidate: &str) -> bool {
        let matched = match self.override_key {
            Some(ref key) => constant_time_eq(candidate.as_bytes(), key.as_bytes()),
            None => {
                let keys = self.keys.read();
                let mut matched = false;
                for key in keys.iter() {
                    matched |= constant_time_eq(candidate.as_bytes(), key.as_bytes());
                }
                matched
            }
        };

        if matched {
            *self.last_matched.lock() = Some(candidate.to_string());
        }

        matched
    }

    /// Key that most recently passed validation
    pub fn last_matched(&self) -> Option<String> {
        self.last_matched.lock().clone()
    }

    /// Forget the last matched key if it is `key`
    pub fn clear_last_matched(&self, key: &str) {
        let mut last = self.last_matched.lock();
        if last.as_deref() == Some(key) {
            *last = None;
        }
    }
}

/// Constant-time byte comparison to prevent timing attacks.
///
/// Length is not secret; only the position of the first differing byte is.
/// Equal-length inputs always visit every byte, so that position does not
/// change the running time.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_mismatch_position_does_not_change_timing() {
        use std::hint::black_box;
        use std::time::{Duration, Instant};

        let key = vec![b'k'; 256];
        let mut first = key.clone();
        first[0] = b'x';
        let mut last = key.clone();
        last[255] = b'x';

        let time = |candidate: &[u8]| {
            (0..5)
                .map(|_| {
                    let start = Instant::now();
                    for _ in 0..2000 {
                        black_box(constant_time_eq(black_box(candidate), black_box(&key)));
                    }
                    start.elapsed()
                })
                .min()
                .unwrap_or(Duration::ZERO)
                .as_nanos()
                .max(1) as f64
        };

        let early = time(&first);
        let late = time(&last);
        let ratio = early.max(late) / early.min(late);
        assert!(ratio < 4.0, "mismatch position changed timing by {ratio:.1}x");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc123", b"abc123"));
        assert!(!constant_time_eq(b"abc123", b"abc124"));
        assert!(!constant_time_eq(b"abc123", b"xbc123"));
        assert!(!constant_time_eq(b"abc123", b"abc12"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_validate_against_key_list() {
        let validator = StreamKeyValidator::new(keys(&["abc123", "def456"]));

        assert!(validator.validate("abc123"));
        assert!(validator.validate("def456"));
        assert!(!validator.validate("ghi789"));
        assert!(!validator.validate(""));
    }

    #[test]
    fn test_override_replaces_key_list() {
        let validator =
            StreamKeyValidator::with_override(keys(&["abc123"]), Some("temp-key".into()));

        assert!(validator.validate("temp-key"));
        assert!(!validator.validate("abc123"));
    }

    #[test]
    fn test_empty_override_is_ignored() {
        let validator = StreamKeyValidator::with_override(keys(&["abc123"]), Some(String::new()));

        assert!(validator.validate("abc123"));
        assert!(!validator.validate(""));
    }

    #[test]
    fn test_last_matched_tracking() {
        let validator = StreamKeyValidator::new(keys(&["abc123"]));
        assert!(validator.last_matched().is_none());

        assert!(validator.validate("abc123"));
        assert_eq!(validator.last_matched().as_deref(), Some("abc123"));

        // A failed attempt does not overwrite it
        assert!(!validator.validate("wrong"));
        assert_eq!(validator.last_matched().as_deref(), Some("abc123"));

        validator.clear_last_matched("other");
        assert_eq!(validator.last_matched().as_deref(), Some("abc123"));

        validator.clear_last_matched("abc123");
        assert!(validator.last_matched().is_none());
    }

    #[test]
    fn test_set_keys() {
        let validator = StreamKeyValidator::new(keys(&["abc123"]));
        validator.set_keys(keys(&["new-key"]));

        assert!(!validator.validate("abc123"));
        assert!(validator.validate("new-key"));
    }

    #[test]
    fn test_mismatch_at_either_end() {
        let validator = StreamKeyValidator::new(keys(&["0123456789abcdef"]));

        assert!(!validator.validate("x123456789abcdef"));
        assert!(!validator.validate("0123456789abcdex"));
        assert!(validator.validate("0123456789abcdef"));
    }
}
