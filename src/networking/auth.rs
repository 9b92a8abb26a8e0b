use log::debug;
use rand::RngCore;
use std::fmt::Write as _;

use crate::error::ShareError;

/// Bounds on the requested code length, inclusive.
const MIN_LENGTH: usize = 1;
const MAX_LENGTH: usize = 100;

/// Generate a short session auth code: cryptographically random bytes,
/// hex-encoded lowercase, truncated to exactly `length` characters.
pub fn generate_auth_code(length: usize) -> Result<String, ShareError> {
    if !(MIN_LENGTH..=MAX_LENGTH).contains(&length) {
        return Err(ShareError::Validation(format!(
            "auth code length {} outside [{}, {}]",
            length, MIN_LENGTH, MAX_LENGTH
        )));
    }

    let mut data = vec![0u8; length.div_ceil(2)];
    rand::rng().fill_bytes(&mut data);

    let mut code = String::with_capacity(data.len() * 2);
    for byte in &data {
        // Infallible for String, but keep the contract explicit.
        let _ = write!(code, "{:02x}", byte);
    }
    code.truncate(length);

    debug!("Generated {}-character session auth code.", code.len());
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_exact_length_lowercase_hex() {
        for length in [1, 2, 5, 6, 100] {
            let code = generate_auth_code(length).unwrap();
            assert_eq!(code.len(), length);
            assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn rejects_out_of_range_lengths() {
        assert!(matches!(
            generate_auth_code(0),
            Err(ShareError::Validation(_))
        ));
        assert!(matches!(
            generate_auth_code(101),
            Err(ShareError::Validation(_))
        ));
    }

    #[test]
    fn codes_are_not_trivially_constant() {
        // Not a randomness test; just catches a broken RNG wiring returning
        // the same code every call.
        let codes: std::collections::HashSet<_> =
            (0..16).map(|_| generate_auth_code(12).unwrap()).collect();
        assert!(codes.len() > 1);
    }
}
