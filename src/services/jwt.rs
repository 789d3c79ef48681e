use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fs;
use uuid::Uuid;

use crate::config::JwtConfig;

/// Which of the two token kinds a claim set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Signed claim set shared by access and refresh tokens.
///
/// Refresh tokens additionally carry `fam`, the refresh-token family that
/// persists across rotations of the same logical session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user id).
    pub sub: String,
    /// Tenant id.
    pub tid: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Token id, used for blacklisting and session linkage.
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fam: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl TokenClaims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.tid).ok()
    }

    pub fn family_id(&self) -> Option<Uuid> {
        self.fam.as_deref().and_then(|f| Uuid::parse_str(f).ok())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// A freshly signed token with its identifying metadata.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// RS256 signing and verification of the platform claim set.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

impl JwtService {
    /// Create the service by loading RSA key material from files.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                config.private_key_path,
                e
            )
        })?;
        let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                config.public_key_path,
                e
            )
        })?;

        let service = Self::from_pem(
            private_key_pem.as_bytes(),
            public_key_pem.as_bytes(),
            config,
        )?;
        tracing::info!("JWT service initialized with RS256 keys");
        Ok(service)
    }

    /// Create the service from in-memory PEM key material.
    pub fn from_pem(
        private_key_pem: &[u8],
        public_key_pem: &[u8],
        config: &JwtConfig,
    ) -> Result<Self, anyhow::Error> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        Ok(Self {
            encoding_key,
            decoding_key,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        })
    }

    /// Sign an access token for a user within a tenant.
    pub fn sign_access_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<SignedToken, anyhow::Error> {
        let expires_at = Utc::now() + Duration::minutes(self.access_token_expiry_minutes);
        self.sign(user_id, tenant_id, TokenKind::Access, None, expires_at)
    }

    /// Sign a refresh token bound to a refresh-token family.
    pub fn sign_refresh_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        family_id: Uuid,
    ) -> Result<SignedToken, anyhow::Error> {
        let expires_at = Utc::now() + Duration::days(self.refresh_token_expiry_days);
        self.sign(
            user_id,
            tenant_id,
            TokenKind::Refresh,
            Some(family_id),
            expires_at,
        )
    }

    fn sign(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        kind: TokenKind,
        family_id: Option<Uuid>,
        expires_at: DateTime<Utc>,
    ) -> Result<SignedToken, anyhow::Error> {
        let jti = Uuid::new_v4().to_string();
        let claims = TokenClaims {
            sub: user_id.to_string(),
            tid: tenant_id.to_string(),
            kind,
            jti: jti.clone(),
            fam: family_id.map(|f| f.to_string()),
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let header = Header::new(Algorithm::RS256);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {} token: {}", kind.as_str(), e))?;

        Ok(SignedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Validate signature, expiry, issuer, and audience, and decode the
    /// claim set. Kind matching and blacklist checks belong to the caller.
    pub fn decode_token(&self, token: &str) -> Result<TokenClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid token: {}", e))?;

        Ok(token_data.claims)
    }

    /// Access token expiry in seconds (for client responses).
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    pub fn refresh_token_expiry_days(&self) -> i64 {
        self.refresh_token_expiry_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::{RsaPrivateKey, RsaPublicKey};

    static TEST_KEYS: Lazy<(String, String)> = Lazy::new(|| {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");
        let private_pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .expect("encode private key")
            .to_string();
        let public_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .expect("encode public key");
        (private_pem, public_pem)
    });

    fn test_service() -> JwtService {
        let config = JwtConfig {
            private_key_path: String::new(),
            public_key_path: String::new(),
            issuer: "authz-service".to_string(),
            audience: "platform".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        };
        JwtService::from_pem(TEST_KEYS.0.as_bytes(), TEST_KEYS.1.as_bytes(), &config)
            .expect("build JWT service")
    }

    #[test]
    fn test_access_token_roundtrip() {
        let service = test_service();
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let signed = service.sign_access_token(user_id, tenant_id).unwrap();
        let claims = service.decode_token(&signed.token).unwrap();

        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.user_id(), Some(user_id));
        assert_eq!(claims.tenant_id(), Some(tenant_id));
        assert_eq!(claims.jti, signed.jti);
        assert!(claims.fam.is_none());
    }

    #[test]
    fn test_refresh_token_carries_family() {
        let service = test_service();
        let family = Uuid::new_v4();

        let signed = service
            .sign_refresh_token(Uuid::new_v4(), Uuid::new_v4(), family)
            .unwrap();
        let claims = service.decode_token(&signed.token).unwrap();

        assert_eq!(claims.kind, TokenKind::Refresh);
        assert_eq!(claims.family_id(), Some(family));
    }

    #[test]
    fn test_wrong_audience_is_rejected() {
        let service = test_service();
        let signed = service
            .sign_access_token(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        let other_config = JwtConfig {
            private_key_path: String::new(),
            public_key_path: String::new(),
            issuer: "authz-service".to_string(),
            audience: "other-audience".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        };
        let other = JwtService::from_pem(
            TEST_KEYS.0.as_bytes(),
            TEST_KEYS.1.as_bytes(),
            &other_config,
        )
        .unwrap();

        assert!(other.decode_token(&signed.token).is_err());
    }

    #[test]
    fn test_keys_load_from_files() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let private_path = dir.path().join("private.pem");
        let public_path = dir.path().join("public.pem");
        fs::write(&private_path, TEST_KEYS.0.as_bytes()).expect("write private key");
        fs::write(&public_path, TEST_KEYS.1.as_bytes()).expect("write public key");

        let config = JwtConfig {
            private_key_path: private_path.to_string_lossy().into_owned(),
            public_key_path: public_path.to_string_lossy().into_owned(),
            issuer: "authz-service".to_string(),
            audience: "platform".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        };
        assert!(JwtService::new(&config).is_ok());
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        let service = test_service();
        assert!(service.decode_token("not.a.token").is_err());
    }
}
