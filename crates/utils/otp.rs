use rand::{Rng, rngs::OsRng};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::value_objects::enums::parties::Party;

pub const OTP_DIGITS: usize = 6;

/// Six decimal digits from the OS RNG, zero padded.
pub fn generate_code() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{value:0width$}", width = OTP_DIGITS)
}

/// Digest stored in place of the code. Binding the booking and party means a
/// code can never be replayed against another booking or by the other side.
pub fn hash_code(booking_id: Uuid, party: Party, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(booking_id.as_bytes());
    hasher.update(party.as_str().as_bytes());
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_code(booking_id: Uuid, party: Party, code: &str, stored_hash: &str) -> bool {
    let candidate = hash_code(booking_id, party, code);
    constant_time_eq(candidate.as_bytes(), stored_hash.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), OTP_DIGITS);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn digest_is_bound_to_booking_and_party() {
        let booking_id = Uuid::new_v4();
        let hash = hash_code(booking_id, Party::Client, "123456");

        assert!(verify_code(booking_id, Party::Client, "123456", &hash));
        assert!(verify_code(booking_id, Party::Client, " 123456 ", &hash));
        assert!(!verify_code(booking_id, Party::Companion, "123456", &hash));
        assert!(!verify_code(Uuid::new_v4(), Party::Client, "123456", &hash));
        assert!(!verify_code(booking_id, Party::Client, "654321", &hash));
    }
}
