//! # Environment Keys
//!
//! Names of every environment variable the configuration core reads.

/// Environment selection
pub const ENVIRONMENT_KEY: &str = "ENVIRONMENT";
pub const TESTING_FLAG_KEY: &str = "TESTING";

/// Manager options
pub const SECRET_TIMEOUT_MS_KEY: &str = "CONFIG_SECRET_TIMEOUT_MS";
pub const AUDIT_CAPACITY_KEY: &str = "CONFIG_AUDIT_CAPACITY";
pub const ENV_FILE_KEY: &str = "CONFIG_ENV_FILE";

/// Prefix of the per-environment numeric secret-store project id,
/// e.g. `SECRET_PROJECT_ID_PRODUCTION`.
pub const SECRET_PROJECT_ID_PREFIX: &str = "SECRET_PROJECT_ID_";

/// Service
pub const SERVICE_NAME_KEY: &str = "SERVICE_NAME";
pub const LOG_LEVEL_KEY: &str = "LOG_LEVEL";
pub const DEBUG_KEY: &str = "DEBUG";
pub const API_PORT_KEY: &str = "API_PORT";
pub const CORS_ORIGINS_KEY: &str = "CORS_ORIGINS";
pub const JWT_ALGORITHM_KEY: &str = "JWT_ALGORITHM";
pub const ACCESS_TOKEN_EXPIRE_MINUTES_KEY: &str = "ACCESS_TOKEN_EXPIRE_MINUTES";

/// Relational store
pub const DATABASE_URL_KEY: &str = "DATABASE_URL";
pub const POSTGRES_HOST_KEY: &str = "POSTGRES_HOST";
pub const POSTGRES_PORT_KEY: &str = "POSTGRES_PORT";
pub const POSTGRES_USER_KEY: &str = "POSTGRES_USER";
pub const POSTGRES_DB_KEY: &str = "POSTGRES_DB";
pub const POSTGRES_SSLMODE_KEY: &str = "POSTGRES_SSLMODE";
pub const POSTGRES_SOCKET_PATH_KEY: &str = "POSTGRES_SOCKET_PATH";
pub const CLOUD_SQL_CONNECTION_NAME_KEY: &str = "CLOUD_SQL_CONNECTION_NAME";

/// Cache store
pub const REDIS_URL_KEY: &str = "REDIS_URL";
pub const REDIS_HOST_KEY: &str = "REDIS_HOST";
pub const REDIS_PORT_KEY: &str = "REDIS_PORT";
pub const REDIS_USER_KEY: &str = "REDIS_USER";
pub const REDIS_DB_KEY: &str = "REDIS_DB";
pub const REDIS_SSLMODE_KEY: &str = "REDIS_SSLMODE";
pub const REDIS_SOCKET_PATH_KEY: &str = "REDIS_SOCKET_PATH";

/// Column store
pub const CLICKHOUSE_URL_KEY: &str = "CLICKHOUSE_URL";
pub const CLICKHOUSE_HOST_KEY: &str = "CLICKHOUSE_HOST";
pub const CLICKHOUSE_PORT_KEY: &str = "CLICKHOUSE_PORT";
pub const CLICKHOUSE_USER_KEY: &str = "CLICKHOUSE_USER";
pub const CLICKHOUSE_DB_KEY: &str = "CLICKHOUSE_DB";
pub const CLICKHOUSE_SSLMODE_KEY: &str = "CLICKHOUSE_SSLMODE";

/// Logical secret names and the variables they fall back to
pub const JWT_SECRET_KEY_SECRET: &str = "jwt-secret-key";
pub const SECRET_KEY_SECRET: &str = "secret-key";
pub const SERVICE_SECRET_SECRET: &str = "service-secret";
pub const POSTGRES_PASSWORD_SECRET: &str = "postgres-password";
pub const REDIS_PASSWORD_SECRET: &str = "redis-password";
pub const CLICKHOUSE_PASSWORD_SECRET: &str = "clickhouse-password";
pub const OPENAI_API_KEY_SECRET: &str = "openai-api-key";
pub const ANTHROPIC_API_KEY_SECRET: &str = "anthropic-api-key";
pub const SENTRY_DSN_SECRET: &str = "sentry-dsn";

pub const SECRET_ENV_MAPPINGS: &[(&str, &str)] = &[
    (JWT_SECRET_KEY_SECRET, "JWT_SECRET_KEY"),
    (SECRET_KEY_SECRET, "SECRET_KEY"),
    (SERVICE_SECRET_SECRET, "SERVICE_SECRET"),
    (POSTGRES_PASSWORD_SECRET, "POSTGRES_PASSWORD"),
    (REDIS_PASSWORD_SECRET, "REDIS_PASSWORD"),
    (CLICKHOUSE_PASSWORD_SECRET, "CLICKHOUSE_PASSWORD"),
    (OPENAI_API_KEY_SECRET, "OPENAI_API_KEY"),
    (ANTHROPIC_API_KEY_SECRET, "ANTHROPIC_API_KEY"),
    (SENTRY_DSN_SECRET, "SENTRY_DSN"),
];
