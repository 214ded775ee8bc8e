//! A wrapper around the password a client sent, so it can be moved through
//! command plumbing without ending up in debug output or logs.

use bytes::Bytes;
use std::fmt;

#[derive(PartialEq, Eq, Clone)]
pub struct Password(Bytes);

impl Password {
    pub fn new<B: Into<Bytes>>(bytes: B) -> Password {
        Password(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn debug_output_never_contains_the_password() {
        let password = Password::new("supersecret");
        assert_eq!(format!("{:?}", password), "********");
        assert_eq!(password.as_bytes(), b"supersecret");
    }
}
