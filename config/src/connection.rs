//! # Connection URL Builder
//!
//! The only place in the workspace that assembles connection strings.
//! Everything else hands a [`ConnectionDescriptor`] to [`build_url`].
//!
//! | Backend | Sync | Async | TLS / socket |
//! |---|---|---|---|
//! | Relational | `postgresql` | `postgresql+asyncpg` | `?sslmode=`, `?host=<socket>` |
//! | Column store | `clickhouse` | `clickhouse+asynch` | `?secure=true`, `?host=<socket>` |
//! | Cache | `redis` | `redis` | `rediss`, `redis+unix` |

use crate::environment::Environment;
use crate::secrets::SecretValue;
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::warn;
use url::Url;

pub const POSTGRES_DEFAULT_PORT: u16 = 5432;
pub const CLICKHOUSE_DEFAULT_PORT: u16 = 9000;
pub const REDIS_DEFAULT_PORT: u16 = 6379;

const REDACTED: &str = "***";

/// Query parameters that carry credentials.
const SECRET_QUERY_KEYS: &[&str] = &["pass", "password"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Relational,
    ColumnStore,
    Cache,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Relational => "relational",
            BackendKind::ColumnStore => "column_store",
            BackendKind::Cache => "cache",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            BackendKind::Relational => POSTGRES_DEFAULT_PORT,
            BackendKind::ColumnStore => CLICKHOUSE_DEFAULT_PORT,
            BackendKind::Cache => REDIS_DEFAULT_PORT,
        }
    }

    /// Schemes a URL for this backend may carry, including common aliases
    /// accepted from explicit overrides.
    pub fn accepted_schemes(&self) -> &'static [&'static str] {
        match self {
            BackendKind::Relational => &[
                "postgresql",
                "postgres",
                "postgresql+asyncpg",
                "postgresql+psycopg",
                "postgresql+psycopg2",
            ],
            BackendKind::ColumnStore => &[
                "clickhouse",
                "clickhouse+asynch",
                "clickhouse+native",
                "clickhouse+http",
                "clickhouses",
            ],
            BackendKind::Cache => &["redis", "rediss", "redis+unix", "unix"],
        }
    }

    pub fn accepts_scheme(&self, scheme: &str) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        self.accepted_schemes().contains(&scheme.as_str())
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous or asynchronous driver; only the scheme prefix changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverMode {
    #[default]
    Sync,
    Async,
}

/// Empty strings and the literals `none` / `null` count as unset.
pub fn normalize_field(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| {
        !v.is_empty() && !v.eq_ignore_ascii_case("none") && !v.eq_ignore_ascii_case("null")
    })
}

/// Normalized connection fields. `socket_path` wins over `host` when both are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<SecretValue>,
    pub database: Option<String>,
    pub sslmode: Option<String>,
    pub socket_path: Option<String>,
}

impl ConnectionDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = normalize_field(Some(host.into()));
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = normalize_field(Some(user.into()));
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = normalize_field(Some(password.into())).map(SecretValue::new);
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = normalize_field(Some(database.into()));
        self
    }

    pub fn sslmode(mut self, sslmode: impl Into<String>) -> Self {
        self.sslmode = normalize_field(Some(sslmode.into()));
        self
    }

    pub fn socket_path(mut self, socket_path: impl Into<String>) -> Self {
        self.socket_path = normalize_field(Some(socket_path.into()));
        self
    }

    /// Whether either addressing mode is available.
    pub fn is_addressable(&self) -> bool {
        self.host.is_some() || self.socket_path.is_some()
    }

    pub fn tls_enabled(&self) -> bool {
        self.sslmode
            .as_deref()
            .is_some_and(|mode| !mode.eq_ignore_ascii_case("disable"))
    }

    fn userinfo(&self) -> String {
        let user = self.user.as_deref().map(urlencoding::encode);
        let password = self
            .password
            .as_ref()
            .map(|p| urlencoding::encode(p.expose()));
        match (user, password) {
            (Some(user), Some(password)) => format!("{user}:{password}@"),
            (Some(user), None) => format!("{user}@"),
            (None, Some(password)) => format!(":{password}@"),
            (None, None) => String::new(),
        }
    }

    fn host_port(&self, backend: BackendKind, host: &str) -> String {
        let port = self.port.unwrap_or_else(|| backend.default_port());
        if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        }
    }
}

/// A parsed connection string whose password never reaches `Debug`,
/// `Display` or serialized output.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    url: Url,
}

impl ConnectionUrl {
    /// Accept an externally supplied URL when it parses and its scheme
    /// belongs to `backend`.
    pub fn parse(raw: &str, backend: BackendKind) -> Result<Self, String> {
        let url = Url::parse(raw.trim()).map_err(|e| format!("not a valid URL: {e}"))?;
        if !backend.accepts_scheme(url.scheme()) {
            return Err(format!(
                "scheme '{}' is not a recognized {backend} scheme",
                url.scheme()
            ));
        }
        if url.cannot_be_a_base() {
            return Err("missing '//' after the scheme".to_string());
        }
        Ok(Self { url })
    }

    pub fn expose(&self) -> &str {
        self.url.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host from the authority section; empty for socket addressing.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|host| !host.is_empty())
    }

    /// First value of a query parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Whether the URL names somewhere to connect to: a host, a `host=`
    /// socket parameter, or a unix socket path for the cache.
    pub fn is_addressable(&self, backend: BackendKind) -> bool {
        if self.host().is_some() {
            return true;
        }
        match backend {
            BackendKind::Relational | BackendKind::ColumnStore => {
                self.query_param("host").is_some_and(|h| !h.is_empty())
            }
            BackendKind::Cache => {
                self.scheme().ends_with("unix") && self.url.path().len() > 1
            }
        }
    }

    /// Same address with the driver scheme for `mode`. Cache URLs and
    /// unrecognized schemes are returned unchanged.
    pub fn for_mode(&self, backend: BackendKind, mode: DriverMode) -> ConnectionUrl {
        let scheme = self.scheme();
        let family = scheme.split('+').next().unwrap_or(scheme);
        let target = match (backend, family, mode) {
            (BackendKind::Relational, "postgres" | "postgresql", DriverMode::Sync) => "postgresql",
            (BackendKind::Relational, "postgres" | "postgresql", DriverMode::Async) => {
                "postgresql+asyncpg"
            }
            (BackendKind::ColumnStore, "clickhouse", DriverMode::Sync) => "clickhouse",
            (BackendKind::ColumnStore, "clickhouse", DriverMode::Async) => "clickhouse+asynch",
            _ => return self.clone(),
        };
        let mut url = self.url.clone();
        if url.set_scheme(target).is_err() {
            return self.clone();
        }
        ConnectionUrl { url }
    }

    /// Whether the URL asks for an encrypted transport.
    pub fn uses_tls(&self, backend: BackendKind) -> bool {
        match backend {
            BackendKind::Relational => self
                .query_param("sslmode")
                .is_some_and(|mode| !mode.eq_ignore_ascii_case("disable")),
            BackendKind::ColumnStore => {
                self.scheme() == "clickhouses"
                    || self.query_param("secure").as_deref() == Some("true")
            }
            BackendKind::Cache => self.scheme() == "rediss",
        }
    }

    pub fn has_password(&self) -> bool {
        self.url.password().is_some_and(|p| !p.is_empty())
            || SECRET_QUERY_KEYS
                .iter()
                .any(|key| self.query_param(key).is_some_and(|p| !p.is_empty()))
    }

    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if url.password().is_some() && url.set_password(Some(REDACTED)).is_err() {
            return REDACTED.to_string();
        }

        let has_secret_param = url
            .query_pairs()
            .any(|(key, _)| SECRET_QUERY_KEYS.contains(&key.as_ref()));
        if has_secret_param {
            let pairs: Vec<(String, String)> = url
                .query_pairs()
                .map(|(key, value)| {
                    let value = if SECRET_QUERY_KEYS.contains(&key.as_ref()) {
                        REDACTED.to_string()
                    } else {
                        value.into_owned()
                    };
                    (key.into_owned(), value)
                })
                .collect();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        url.into()
    }
}

impl fmt::Debug for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionUrl").field(&self.redacted()).finish()
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl Serialize for ConnectionUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.redacted())
    }
}

/// Builder output: the URL (absent for an unaddressable descriptor) and
/// any posture warnings raised while building it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltUrl {
    pub url: Option<ConnectionUrl>,
    pub warnings: Vec<String>,
}

/// Build the connection string for `backend`.
///
/// Deterministic for identical inputs. Returns no URL when neither host
/// nor socket path is set. In staging/production a relational URL
/// without TLS is still built, with a warning attached for diagnostics.
pub fn build_url(
    descriptor: &ConnectionDescriptor,
    environment: Environment,
    backend: BackendKind,
    mode: DriverMode,
) -> BuiltUrl {
    let mut warnings = Vec::new();

    if !descriptor.is_addressable() {
        return BuiltUrl {
            url: None,
            warnings,
        };
    }

    if descriptor.socket_path.is_some() && descriptor.host.is_some() {
        warnings.push(format!("{backend}: socket path set, ignoring host"));
    }

    if backend == BackendKind::Relational && environment.is_strict() {
        match descriptor.sslmode.as_deref() {
            None => warnings.push(format!(
                "{backend}: sslmode is not set; {environment} requires TLS"
            )),
            Some(mode) if mode.eq_ignore_ascii_case("disable") => warnings.push(format!(
                "{backend}: sslmode=disable is not allowed in {environment}"
            )),
            Some(_) => {}
        }
    }

    let raw = match backend {
        BackendKind::Relational => {
            let scheme = match mode {
                DriverMode::Sync => "postgresql",
                DriverMode::Async => "postgresql+asyncpg",
            };
            let tls = descriptor
                .sslmode
                .as_deref()
                .map(|mode| ("sslmode", mode.to_string()));
            assemble_sql_like(descriptor, backend, scheme, tls)
        }
        BackendKind::ColumnStore => {
            let scheme = match mode {
                DriverMode::Sync => "clickhouse",
                DriverMode::Async => "clickhouse+asynch",
            };
            let tls = descriptor
                .tls_enabled()
                .then(|| ("secure", "true".to_string()));
            assemble_sql_like(descriptor, backend, scheme, tls)
        }
        BackendKind::Cache => assemble_cache(descriptor),
    };

    let url = match ConnectionUrl::parse(&raw, backend) {
        Ok(url) => Some(url),
        Err(reason) => {
            warnings.push(format!("{backend}: descriptor does not form a valid URL: {reason}"));
            None
        }
    };

    for warning in &warnings {
        warn!(backend = %backend, environment = %environment, "{warning}");
    }

    BuiltUrl { url, warnings }
}

fn assemble_sql_like(
    descriptor: &ConnectionDescriptor,
    backend: BackendKind,
    scheme: &str,
    tls: Option<(&str, String)>,
) -> String {
    let mut query: Vec<String> = Vec::new();
    // A socket URL has an empty authority, so credentials travel as query
    // parameters instead.
    let userinfo = if descriptor.socket_path.is_some() {
        if let Some(user) = &descriptor.user {
            query.push(format!("user={}", urlencoding::encode(user)));
        }
        if let Some(password) = &descriptor.password {
            query.push(format!("password={}", urlencoding::encode(password.expose())));
        }
        String::new()
    } else {
        descriptor.userinfo()
    };
    let database = descriptor
        .database
        .as_deref()
        .map(|db| urlencoding::encode(db).into_owned())
        .unwrap_or_default();

    let address = match (&descriptor.socket_path, &descriptor.host) {
        (Some(socket), _) => {
            query.insert(0, format!("host={}", urlencoding::encode(socket)));
            String::new()
        }
        (None, Some(host)) => descriptor.host_port(backend, host),
        (None, None) => String::new(),
    };
    if let Some((key, value)) = tls {
        query.push(format!("{key}={}", urlencoding::encode(&value)));
    }

    let mut url = format!("{scheme}://{userinfo}{address}/{database}");
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.join("&"));
    }
    url
}

fn assemble_cache(descriptor: &ConnectionDescriptor) -> String {
    let db = descriptor.database.as_deref().unwrap_or("0");

    if let Some(socket) = &descriptor.socket_path {
        let mut url = format!("redis+unix://{socket}?db={}", urlencoding::encode(db));
        if let Some(password) = &descriptor.password {
            url.push_str("&pass=");
            url.push_str(&urlencoding::encode(password.expose()));
        }
        return url;
    }

    let scheme = if descriptor.tls_enabled() {
        "rediss"
    } else {
        "redis"
    };
    let host = descriptor.host.as_deref().unwrap_or_default();
    format!(
        "{scheme}://{}{}/{}",
        descriptor.userinfo(),
        descriptor.host_port(BackendKind::Cache, host),
        urlencoding::encode(db)
    )
}
