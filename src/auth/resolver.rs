use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::{
    config::GatewayConfig,
    error::{ChatError, ChatResult},
    now_ms,
};

use super::{Identity, Role};

const TEST_USER_ID: &str = "test-user-123";
const TEST_USER_NAME: &str = "Test User";
const DEFAULT_USER_NAME: &str = "User";
const GUEST_USER_NAME: &str = "Guest User";

/// What a client presents when it opens a connection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Handshake {
    pub token: Option<String>,
    /// Role override, honoured only for the test sentinel.
    pub role: Option<String>,
}

impl Handshake {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            role: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    id: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    sub: Option<String>,
    role: Option<String>,
    name: Option<String>,
}

/// Turns a bearer credential into a verified [`Identity`].
#[derive(Clone)]
pub struct IdentityResolver {
    decoding_key: DecodingKey,
    validation: Validation,
    strict: bool,
    test_token: Option<String>,
}

impl IdentityResolver {
    pub fn new(secret: &str, strict: bool, test_token: Option<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            strict,
            test_token,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            config.strict_auth,
            config
                .test_token_enabled()
                .then(|| config.test_token.clone()),
        )
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Resolves a connection handshake. In permissive mode a token that
    /// fails verification is admitted as a guest.
    pub fn resolve(&self, handshake: &Handshake) -> ChatResult<Identity> {
        let token = handshake
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ChatError::MissingCredential)?;

        if let Some(identity) = self.sentinel_identity(token, handshake.role.as_deref()) {
            tracing::debug!(user_id = %identity.user_id, "test token accepted");
            return Ok(identity);
        }

        match self.verify(token) {
            Ok(identity) => Ok(identity),
            Err(err) if self.strict => Err(err),
            Err(err) => {
                let identity = guest_identity();
                tracing::warn!(
                    error = %err,
                    guest_id = %identity.user_id,
                    "token verification failed, admitting connection as guest"
                );
                Ok(identity)
            }
        }
    }

    /// Resolves a bearer token for the REST layer. Never falls back to a
    /// guest identity.
    pub fn resolve_bearer(&self, token: Option<&str>) -> ChatResult<Identity> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ChatError::MissingCredential)?;

        if let Some(identity) = self.sentinel_identity(token, None) {
            return Ok(identity);
        }

        self.verify(token)
    }

    fn sentinel_identity(&self, token: &str, role: Option<&str>) -> Option<Identity> {
        let sentinel = self.test_token.as_deref()?;
        if token != sentinel {
            return None;
        }

        Some(Identity::new(
            TEST_USER_ID,
            Role::parse_or_user(role),
            TEST_USER_NAME,
        ))
    }

    fn verify(&self, token: &str) -> ChatResult<Identity> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| ChatError::AuthFailed(err.to_string()))?;
        let claims = data.claims;

        let user_id = claims
            .id
            .or(claims.user_id)
            .or(claims.sub)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("user-{}", now_ms()));

        Ok(Identity::new(
            user_id,
            Role::parse_or_user(claims.role.as_deref()),
            claims
                .name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_USER_NAME.to_string()),
        ))
    }
}

fn guest_identity() -> Identity {
    Identity::new(
        format!("guest-{}-{:08x}", now_ms(), rand::random::<u32>()),
        Role::Guest,
        GUEST_USER_NAME,
    )
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use super::*;

    const SECRET: &str = "test-secret";

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn exp() -> i64 {
        now_ms() / 1000 + 3600
    }

    #[test]
    fn test_missing_credential() {
        let resolver = IdentityResolver::new(SECRET, true, None);
        assert_eq!(
            resolver.resolve(&Handshake::default()),
            Err(ChatError::MissingCredential)
        );
        assert_eq!(
            resolver.resolve(&Handshake::with_token("  ")),
            Err(ChatError::MissingCredential)
        );
    }

    #[test]
    fn test_valid_token_claims() {
        let resolver = IdentityResolver::new(SECRET, true, None);
        let jwt = token(json!({ "id": "u1", "role": "seller", "name": "Sam", "exp": exp() }));
        let identity = resolver.resolve(&Handshake::with_token(jwt)).unwrap();
        assert_eq!(identity, Identity::new("u1", Role::Seller, "Sam"));
    }

    #[test]
    fn test_claim_defaults() {
        let resolver = IdentityResolver::new(SECRET, true, None);
        let jwt = token(json!({ "userId": "u2", "exp": exp() }));
        let identity = resolver.resolve(&Handshake::with_token(jwt)).unwrap();
        assert_eq!(identity, Identity::new("u2", Role::User, "User"));
    }

    #[test]
    fn test_strict_rejects_bad_signature() {
        let resolver = IdentityResolver::new("another-secret", true, None);
        let jwt = token(json!({ "id": "u1", "exp": exp() }));
        assert!(matches!(
            resolver.resolve(&Handshake::with_token(jwt)),
            Err(ChatError::AuthFailed(_))
        ));
    }

    #[test]
    fn test_strict_rejects_expired_token() {
        let resolver = IdentityResolver::new(SECRET, true, None);
        let jwt = token(json!({ "id": "u1", "exp": 1_000 }));
        assert!(matches!(
            resolver.resolve(&Handshake::with_token(jwt)),
            Err(ChatError::AuthFailed(_))
        ));
    }

    #[test]
    fn test_permissive_downgrades_to_guest() {
        let resolver = IdentityResolver::new(SECRET, false, None);
        let identity = resolver.resolve(&Handshake::with_token("garbage")).unwrap();
        assert_eq!(identity.role, Role::Guest);
        assert!(identity.user_id.starts_with("guest-"));
        assert_eq!(identity.display_name, "Guest User");
    }

    #[test]
    fn test_sentinel_only_when_enabled() {
        let enabled = IdentityResolver::new(SECRET, true, Some("test-token".into()));
        let identity = enabled
            .resolve(&Handshake {
                token: Some("test-token".into()),
                role: Some("dealer".into()),
            })
            .unwrap();
        assert_eq!(identity, Identity::new("test-user-123", Role::Dealer, "Test User"));

        let plain = enabled.resolve(&Handshake::with_token("test-token")).unwrap();
        assert_eq!(plain.role, Role::User);

        let disabled = IdentityResolver::new(SECRET, true, None);
        assert!(matches!(
            disabled.resolve(&Handshake::with_token("test-token")),
            Err(ChatError::AuthFailed(_))
        ));
    }

    #[test]
    fn test_bearer_never_downgrades() {
        let resolver = IdentityResolver::new(SECRET, false, None);
        assert!(matches!(
            resolver.resolve_bearer(Some("garbage")),
            Err(ChatError::AuthFailed(_))
        ));
    }
}
