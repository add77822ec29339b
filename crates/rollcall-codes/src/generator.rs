//! Attendance code generation.
//!
//! A generator only produces *candidates*. Uniqueness is the registry's
//! job: the attendance service feeds candidates to
//! [`CodeRegistry::try_register`](crate::CodeRegistry::try_register)
//! until one sticks.

use rand::Rng;

/// Characters a code is drawn from: upper-case letters and digits.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Produces attendance code candidates.
///
/// Implementations must always return a well-formed code; there is no
/// failure path. Tests plug in scripted generators to force collisions.
pub trait CodeGenerator: Send + Sync + 'static {
    fn generate(&self) -> String;
}

/// The production generator: `length` characters drawn uniformly from
/// [`CODE_ALPHABET`] using the thread-local RNG.
#[derive(Debug, Clone)]
pub struct RandomCodeGenerator {
    length: usize,
}

impl RandomCodeGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

/// Normalizes what a student typed: surrounding whitespace is dropped
/// and letters are upper-cased, so `" ab12 "` matches `"AB12"`.
pub fn normalize_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}
