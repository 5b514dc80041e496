//! Session token sources.

use crate::error::TokenError;

/// Issues a session token for `(app id, certificate, channel, user)`.
///
/// Signing schemes are engine specific and live outside this crate.
pub trait TokenProvider: Send + Sync {
    fn build_token(
        &self,
        app_id: &str,
        app_cert: &str,
        channel_name: &str,
        user_id: &str,
    ) -> Result<String, TokenError>;
}

/// Always returns the same pre-issued token.
#[derive(Clone, Debug)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn build_token(&self, _: &str, _: &str, _: &str, _: &str) -> Result<String, TokenError> {
        if self.0.is_empty() {
            return Err(TokenError::Empty);
        }
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_returns_its_value() {
        let provider = StaticToken("abc".to_string());
        assert_eq!(provider.build_token("a", "b", "c", "d"), Ok("abc".to_string()));
    }

    #[test]
    fn empty_static_token_is_an_error() {
        assert_eq!(
            StaticToken(String::new()).build_token("a", "b", "c", "d"),
            Err(TokenError::Empty)
        );
    }
}
