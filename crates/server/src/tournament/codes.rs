//! Shareable tournament codes.

use rand::Rng;

/// Ambiguous glyphs (I, O, 0, 1) are excluded so codes survive being read
/// aloud or scribbled down.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const CODE_LENGTH: usize = 8;

/// Generate a code from the caller's RNG; production uses the OS RNG and
/// retries on a unique-constraint collision.
pub fn generate_code<R: Rng>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Codes are case-insensitive on input.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn codes_use_only_the_unambiguous_alphabet() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..100 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), CODE_LENGTH);
            for b in code.bytes() {
                assert!(CODE_ALPHABET.contains(&b), "bad glyph {}", b as char);
                assert!(![b'I', b'O', b'0', b'1'].contains(&b));
            }
        }
    }

    #[test]
    fn lookup_normalization_uppercases() {
        assert_eq!(normalize_code(" abcd2345 "), "ABCD2345");
    }
}
