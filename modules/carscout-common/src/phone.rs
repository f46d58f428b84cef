use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::text::hex_encode;

type HmacSha256 = Hmac<Sha256>;

/// Strip everything but digits. "+359 88 123-4567" and "0888 1234567"
/// normalize the Bulgarian way: a leading 359 country code replaces the 0.
pub fn normalize_digits(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if let Some(rest) = digits.strip_prefix("359") {
        format!("0{rest}")
    } else {
        digits
    }
}

/// HMAC-SHA256 of the normalized digits with the process-wide salt,
/// hex-encoded. The raw number is never persisted.
pub fn phone_hash(raw: &str, salt: &str) -> Option<String> {
    let digits = normalize_digits(raw);
    if digits.len() < 7 {
        return None;
    }
    let mut mac = HmacSha256::new_from_slice(salt.as_bytes()).ok()?;
    mac.update(digits.as_bytes());
    Some(hex_encode(&mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn international_and_local_forms_collide() {
        let a = phone_hash("+359 888 123 456", "salt").unwrap();
        let b = phone_hash("0888123456", "salt").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn salt_changes_the_hash() {
        let a = phone_hash("0888123456", "salt-a").unwrap();
        let b = phone_hash("0888123456", "salt-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn too_short_input_is_rejected() {
        assert_eq!(phone_hash("112", "salt"), None);
    }
}
