use rand::{thread_rng, Rng};

/// URL-safe alphabet, six bits per symbol.
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Key length; with a 64 symbol alphabet this gives 60 bits of entropy.
pub const KEY_LENGTH: usize = 10;

/// Generate a fresh random paste key.
pub fn generate_key() -> String {
    let mut rng = thread_rng();
    (0..KEY_LENGTH)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}
