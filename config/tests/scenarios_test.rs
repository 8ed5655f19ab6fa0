use config::{
    AppConfig, BackendKind, ConfigError, ConfigManager, ConnectionDescriptor, DriverMode,
    EnvAccessor, Environment, InMemorySecretStore, ManagerOptions, MapEnv, Origin, build_url,
};
use std::sync::Arc;

const STRONG_JWT: &str = "Jx7!qP2#vL9@mN4$wR8%tY3^kB6&hF1*";
const STRONG_SECRET: &str = "aB3dE5gH7jK9mN1pQ3sT5vW7yZ9bC1eF";
const STRONG_SERVICE: &str = "Zq8Wx6Ec4Rv2Tb0Yn8Um6Il4Ok2Pj0Hg";

fn manager_with(vars: &[(&str, &str)]) -> (Arc<EnvAccessor>, ConfigManager) {
    let env = Arc::new(EnvAccessor::from_map(vars.iter().copied().collect::<MapEnv>()));
    let manager = ConfigManager::builder()
        .env(Arc::clone(&env))
        .options(ManagerOptions::default())
        .build()
        .unwrap();
    (env, manager)
}

fn production_vars() -> Vec<(&'static str, &'static str)> {
    vec![
        ("ENVIRONMENT", "production"),
        ("JWT_SECRET_KEY", STRONG_JWT),
        ("SECRET_KEY", STRONG_SECRET),
        ("SERVICE_SECRET", STRONG_SERVICE),
        ("POSTGRES_HOST", "db.internal"),
        ("POSTGRES_SSLMODE", "require"),
        ("REDIS_HOST", "cache.internal"),
    ]
}

#[tokio::test]
async fn test_development_without_connection_variables() {
    let (_, manager) = manager_with(&[("ENVIRONMENT", "development")]);

    let config = manager.get_config().await.unwrap();
    assert!(config.is_development());
    assert!(config.jwt_secret_key().is_some());
    assert!(config.database_url().unwrap().expose().contains("localhost"));
    assert!(config.redis_url().is_some());

    let (valid, errors) = manager.validate_configuration().await;
    assert!(valid);
    assert!(errors.is_empty(), "{errors:?}");
    assert!(!manager.report().unwrap().warnings.is_empty());
}

#[tokio::test]
async fn test_production_without_jwt_secret_fails_and_caches_nothing() {
    let vars: Vec<_> = production_vars()
        .into_iter()
        .filter(|(key, _)| *key != "JWT_SECRET_KEY")
        .collect();
    let (_, manager) = manager_with(&vars);

    let err = manager.get_config().await.unwrap_err();
    assert!(matches!(err, ConfigError::MissingRequiredField { .. }));
    assert_eq!(err.field(), Some("jwt_secret_key"));
    assert!(err.is_fatal());

    let (valid, errors) = manager.validate_integrity();
    assert!(!valid);
    assert_eq!(errors, vec!["configuration has not been loaded".to_string()]);
    assert!(!manager.health().loaded);
}

#[tokio::test]
async fn test_failed_rebuild_drops_previous_configuration() {
    let (env, manager) = manager_with(&production_vars());
    manager.get_config().await.unwrap();
    assert!(manager.health().loaded);

    env.delete("SERVICE_SECRET", "rotation in progress");
    manager.secrets().clear_cache();
    let err = manager.reload_config(true).await.unwrap_err();
    assert_eq!(err.field(), Some("service_secret"));
    assert!(!manager.health().loaded);
}

#[test]
fn test_relational_url_from_descriptor() {
    let descriptor = ConnectionDescriptor::new()
        .host("db.internal")
        .port(5432)
        .user("app")
        .password("p@ss")
        .database("main")
        .sslmode("require");

    let built = build_url(
        &descriptor,
        Environment::Production,
        BackendKind::Relational,
        DriverMode::Sync,
    );
    let url = built.url.unwrap();
    for part in ["db.internal", "5432", "app", "main", "sslmode=require", "p%40ss"] {
        assert!(url.expose().contains(part), "{part} missing from {url}");
    }
    assert!(!url.to_string().contains("p%40ss"));
}

#[tokio::test]
async fn test_socket_connection_ignores_host() {
    let mut vars = production_vars();
    vars.push(("CLOUD_SQL_CONNECTION_NAME", "proj:region:inst"));
    let (_, manager) = manager_with(&vars);

    let config = manager.get_config().await.unwrap();
    let url = config.database_url().unwrap().expose().to_string();
    assert!(url.contains("host=%2Fcloudsql%2Fproj%3Aregion%3Ainst"), "{url}");
    assert!(!url.contains("db.internal"), "{url}");

    let async_url = config.async_database_url().unwrap();
    assert_eq!(async_url.scheme(), "postgresql+asyncpg");
    assert_eq!(
        async_url.query_param("host").as_deref(),
        Some("/cloudsql/proj:region:inst")
    );
}

#[tokio::test]
async fn test_repeated_reads_share_one_instance() {
    let (_, manager) = manager_with(&production_vars());

    let first = manager.get_config().await.unwrap();
    let second = manager.get_config().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.health().generation, 1);
}

#[tokio::test]
async fn test_testing_environment_is_rebuilt_per_read() {
    let (_, manager) = manager_with(&[("ENVIRONMENT", "testing")]);

    let first = manager.get_config().await.unwrap();
    let second = manager.get_config().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.environment(), Environment::Testing);
    assert_eq!(first.jwt_secret_key(), second.jwt_secret_key());
}

#[tokio::test]
async fn test_variant_matches_detected_environment() {
    for environment in Environment::ALL {
        let mut vars = production_vars();
        vars[0] = ("ENVIRONMENT", environment.as_str());
        let (_, manager) = manager_with(&vars);

        let config = manager.get_config().await.unwrap();
        assert_eq!(config.environment(), environment);
        assert_eq!(manager.environment(), environment);
        let matches_variant = match &*config {
            AppConfig::Development(_) => environment == Environment::Development,
            AppConfig::Testing(_) => environment == Environment::Testing,
            AppConfig::Staging(_) => environment == Environment::Staging,
            AppConfig::Production(_) => environment == Environment::Production,
        };
        assert!(matches_variant, "{environment} built the wrong variant");
    }
}

#[tokio::test]
async fn test_isolated_overrides_do_not_leak() {
    let (env, manager) = manager_with(&[("ENVIRONMENT", "development")]);
    let before = manager.get_config().await.unwrap();

    {
        let _guard = env.isolate();
        env.set("ENVIRONMENT", "testing", "isolated test");
        env.set("REDIS_HOST", "sandbox-cache", "isolated test");
        let inside = manager.reload_config(false).await.unwrap();
        assert_eq!(inside.environment(), Environment::Testing);
    }

    assert_eq!(env.get("ENVIRONMENT").as_deref(), Some("development"));
    assert!(env.get("REDIS_HOST").is_none());
    let after = manager.reload_config(false).await.unwrap();
    assert_eq!(after.environment(), before.environment());
}

#[tokio::test]
async fn test_overrides_are_audited_and_redacted() {
    let (env, manager) = manager_with(&[("ENVIRONMENT", "development")]);
    env.set("JWT_SECRET_KEY", STRONG_JWT, "rotate signing key");

    let entry = env.entry("JWT_SECRET_KEY").unwrap();
    assert_eq!(entry.provenance.origin, Origin::Override);

    let trail = env.audit_trail();
    let record = trail.last().unwrap();
    assert_eq!(record.key, "JWT_SECRET_KEY");
    assert!(!format!("{record:?}").contains(STRONG_JWT));

    let config = manager.reload_config(true).await.unwrap();
    assert_eq!(config.jwt_secret_key().unwrap().expose(), STRONG_JWT);
    assert!(!format!("{config:?}").contains(STRONG_JWT));
    assert!(!serde_json::to_string(&*config).unwrap().contains(STRONG_JWT));
}

#[tokio::test]
async fn test_remote_store_takes_precedence_over_environment() {
    let env = Arc::new(EnvAccessor::from_map(
        production_vars()
            .into_iter()
            .chain([("SECRET_PROJECT_ID_PRODUCTION", "4242")])
            .collect::<MapEnv>(),
    ));
    let remote_jwt = "Rm9!tE5#sT1@oR3$eK7%jW2^tX8&yQ4*";
    let store = InMemorySecretStore::new().with_secret("4242", "jwt-secret-key", remote_jwt);
    let manager = ConfigManager::builder()
        .env(env)
        .secret_store(Arc::new(store))
        .options(ManagerOptions::default())
        .build()
        .unwrap();

    let config = manager.get_config().await.unwrap();
    assert_eq!(config.jwt_secret_key().unwrap().expose(), remote_jwt);
    assert!(manager.secrets().loaded_names().contains("jwt-secret-key"));
}
