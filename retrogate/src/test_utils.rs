//! Shared constructors for unit and HTTP tests.

use std::sync::Arc;

use crate::{
    AppState,
    api::models::users::Role,
    auth::{
        middleware::AccessRules,
        password::{self, Argon2Params},
        providers::ProviderRegistry,
    },
    config::{Config, DatabaseConfig},
    db::{
        handlers::{InMemoryUsers, UserRepository},
        models::users::{UserCreateDBRequest, UserDBResponse},
    },
};

/// Cheap argon2 parameters so tests don't spend seconds hashing
const TEST_ARGON2: Argon2Params = Argon2Params {
    memory_kib: 1024,
    iterations: 1,
    parallelism: 1,
};

/// reqwest is built without a default TLS provider
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub fn create_test_config() -> Config {
    install_crypto_provider();

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database: DatabaseConfig::Memory,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        ..Default::default()
    };

    let password = &mut config.auth.credentials.password;
    password.argon2_memory_kib = TEST_ARGON2.memory_kib;
    password.argon2_iterations = TEST_ARGON2.iterations;
    password.argon2_parallelism = TEST_ARGON2.parallelism;
    config.auth.session.cookie_secure = false;

    config
}

/// State over the given store and providers
pub fn create_test_state_with(config: Config, users: Arc<InMemoryUsers>, providers: ProviderRegistry) -> AppState {
    let access_rules = AccessRules::new(&config.access.rules).expect("test access rules are valid");
    AppState::builder()
        .config(config)
        .users(users)
        .providers(Arc::new(providers))
        .access_rules(Arc::new(access_rules))
        .build()
}

/// State with an empty in-memory store and no providers
pub fn create_test_state(config: Config) -> AppState {
    create_test_state_with(config, Arc::new(InMemoryUsers::new()), ProviderRegistry::default())
}

pub async fn create_test_user(
    users: &dyn UserRepository,
    email: &str,
    password: Option<&str>,
    role: Role,
    is_active: bool,
) -> UserDBResponse {
    let password_hash = password.map(|pw| password::hash_password(pw, TEST_ARGON2).expect("hashing test password"));

    users
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            display_name: email.split('@').next().unwrap_or(email).to_string(),
            avatar_url: None,
            password_hash,
            role,
            is_active,
            auth_source: "test".to_string(),
            linked_account: None,
        })
        .await
        .expect("creating test user")
}
