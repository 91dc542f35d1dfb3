//! Wrapper for sensitive values

use std::fmt;
use zeroize::Zeroize;

/// A sensitive value: redacted in Debug/Display, zeroed on drop.
///
/// Used for the OAuth client secret so it can never leak through a log
/// line or a panic message. Call `expose()` only at the point where the
/// value goes on the wire.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_redact() {
        let secret = Secret::new(String::from("GOCSPX-client-secret"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }

    #[test]
    fn expose_returns_inner() {
        let secret = Secret::new(String::from("GOCSPX-client-secret"));
        assert_eq!(secret.expose(), "GOCSPX-client-secret");
    }

    #[test]
    fn clone_preserves_value() {
        let secret = Secret::new(String::from("abc"));
        let copy = secret.clone();
        assert_eq!(copy.expose(), "abc");
    }
}
