//! Shared test harness: the full service graph over in-memory backends.

use authz_service::config::JwtConfig;
use authz_service::services::{
    AuditChain, AuthorizationEngine, JwtService, MemoryKv, PermissionResolver, PolicyEvaluator,
    SessionService, TokenBlacklist, TokenService,
};
use authz_service::store::{AuthzStore, MemoryStore};
use once_cell::sync::Lazy;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use std::time::Duration;

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

const STORE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestPlatform {
    pub store: Arc<MemoryStore>,
    pub blacklist: Arc<MemoryKv>,
    pub jwt: Arc<JwtService>,
    pub audit: Arc<AuditChain>,
    pub sessions: Arc<SessionService>,
    pub tokens: TokenService,
    pub engine: AuthorizationEngine,
}

pub fn test_platform() -> TestPlatform {
    let store = Arc::new(MemoryStore::new());
    let blacklist = Arc::new(MemoryKv::new());

    let jwt_config = JwtConfig {
        private_key_path: String::new(),
        public_key_path: String::new(),
        issuer: "authz-service".to_string(),
        audience: "platform".to_string(),
        access_token_expiry_minutes: 15,
        refresh_token_expiry_days: 7,
    };
    let jwt = Arc::new(
        JwtService::from_pem(TEST_KEYS.0.as_bytes(), TEST_KEYS.1.as_bytes(), &jwt_config)
            .expect("build JWT service"),
    );

    let dyn_store: Arc<dyn AuthzStore> = Arc::clone(&store) as Arc<dyn AuthzStore>;
    let dyn_kv: Arc<dyn TokenBlacklist> = Arc::clone(&blacklist) as Arc<dyn TokenBlacklist>;

    let audit = Arc::new(AuditChain::new(Arc::clone(&dyn_store), STORE_TIMEOUT));
    let sessions = Arc::new(SessionService::new(
        Arc::clone(&dyn_store),
        Arc::clone(&dyn_kv),
        Arc::clone(&audit),
        STORE_TIMEOUT,
    ));
    let tokens = TokenService::new(
        Arc::clone(&jwt),
        Arc::clone(&dyn_store),
        Arc::clone(&dyn_kv),
        Arc::clone(&sessions),
        Arc::clone(&audit),
        STORE_TIMEOUT,
    );

    let resolver = Arc::new(PermissionResolver::new(Arc::clone(&dyn_store), STORE_TIMEOUT));
    let evaluator = Arc::new(PolicyEvaluator::new(
        Arc::clone(&dyn_store),
        Arc::clone(&dyn_kv),
        Duration::from_secs(300),
        STORE_TIMEOUT,
    ));
    let engine = AuthorizationEngine::new(
        Arc::clone(&dyn_store),
        resolver,
        evaluator,
        Arc::clone(&audit),
        Duration::from_secs(30),
        STORE_TIMEOUT,
    );

    TestPlatform {
        store,
        blacklist,
        jwt,
        audit,
        sessions,
        tokens,
        engine,
    }
}
