//! Ticket number generation.
//!
//! Numbers look like `JP-M2K1X9QZ-4F7A2C9B`: a prefix, the purchase time in
//! base36 milliseconds, and eight random base36 characters. The database
//! unique constraint is the real guarantee; collisions are retried by the
//! issuer.

use chrono::Utc;
use rand::Rng;

pub const TICKET_PREFIX: &str = "JP";

/// Length of the random suffix
pub const SUFFIX_LEN: usize = 8;

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Source of candidate ticket numbers
pub trait NumberSource: Send + Sync {
    fn next_number(&self) -> String;
}

/// Timestamp plus random suffix from the thread RNG
#[derive(Debug, Clone)]
pub struct RandomNumberSource {
    prefix: String,
}

impl RandomNumberSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for RandomNumberSource {
    fn default() -> Self {
        Self::new(TICKET_PREFIX)
    }
}

impl NumberSource for RandomNumberSource {
    fn next_number(&self) -> String {
        let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        format_ticket_number(&self.prefix, millis, &mut rand::rng())
    }
}

/// Build a ticket number from a timestamp and an RNG
pub fn format_ticket_number<R: Rng + ?Sized>(prefix: &str, millis: u64, rng: &mut R) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
        .collect();
    format!("{prefix}-{}-{suffix}", to_base36(millis))
}

/// Uppercase base36 rendering of `n`
pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "LOYW3V28");
    }

    #[test]
    fn test_format() {
        let mut rng = StdRng::seed_from_u64(1);
        let number = format_ticket_number("JP", 36, &mut rng);
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "JP");
        assert_eq!(parts[1], "10");
        assert_eq!(parts[2].len(), SUFFIX_LEN);
    }

    #[test]
    fn test_random_source_uses_prefix() {
        let source = RandomNumberSource::new("TST");
        assert!(source.next_number().starts_with("TST-"));
    }

    proptest! {
        #[test]
        fn prop_number_is_uppercase_base36(millis in any::<u64>(), seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let number = format_ticket_number("JP", millis, &mut rng);
            let body = number.trim_start_matches("JP-");
            prop_assert!(body.chars().all(|c| c == '-' || c.is_ascii_digit() || c.is_ascii_uppercase()));
            prop_assert!(number.len() <= "JP-".len() + 13 + 1 + SUFFIX_LEN);
        }

        #[test]
        fn prop_base36_round_trips(n in any::<u64>()) {
            prop_assert_eq!(u64::from_str_radix(&to_base36(n), 36).unwrap(), n);
        }
    }
}
