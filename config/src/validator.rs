//! # Configuration Validation
//!
//! Runs a fixed battery of rules against a constructed [`AppConfig`] and
//! produces a [`ValidationReport`].
//!
//! ## Rule Categories
//! - Presence: fields required in the environment are set
//! - Format: URLs carry a scheme of the right backend family, settings parse
//! - Strength: core secrets meet length and entropy rules
//! - Posture: strict environments use TLS and disable debug
//!
//! ## Scoring
//! Start at [`BASELINE_SCORE`], subtract each failing category's penalty once,
//! add the bonus of each satisfied [`HardeningRule`], clamp to `0..=100`.
//! Validity is `errors.is_empty()` and does not depend on the score.

use crate::connection::{BackendKind, ConnectionUrl};
use crate::schema::{AppConfig, MANDATORY_FIELDS, STRONG_SECRET_LENGTH, secret_weakness};
use serde::Serialize;
use std::collections::BTreeSet;

pub const BASELINE_SCORE: i32 = 60;

pub const SUPPORTED_JWT_ALGORITHMS: &[&str] = &[
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384", "ES512",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Presence,
    Format,
    Strength,
    Posture,
}

impl RuleCategory {
    pub fn penalty(&self) -> i32 {
        match self {
            RuleCategory::Presence => 30,
            RuleCategory::Format => 20,
            RuleCategory::Strength => 20,
            RuleCategory::Posture => 15,
        }
    }
}

/// Optional hardening that raises the score when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HardeningRule {
    RelationalTls,
    CachePassword,
    CacheTls,
    ColumnStorePassword,
    ErrorMonitoring,
    StrongCoreSecrets,
}

impl HardeningRule {
    pub const ALL: [HardeningRule; 6] = [
        HardeningRule::RelationalTls,
        HardeningRule::CachePassword,
        HardeningRule::CacheTls,
        HardeningRule::ColumnStorePassword,
        HardeningRule::ErrorMonitoring,
        HardeningRule::StrongCoreSecrets,
    ];

    pub fn bonus(&self) -> i32 {
        match self {
            HardeningRule::RelationalTls | HardeningRule::CachePassword => 8,
            HardeningRule::CacheTls
            | HardeningRule::ColumnStorePassword
            | HardeningRule::ErrorMonitoring
            | HardeningRule::StrongCoreSecrets => 6,
        }
    }

    fn satisfied_by(&self, config: &AppConfig) -> bool {
        let base = config.base();
        match self {
            HardeningRule::RelationalTls => base.database.tls,
            HardeningRule::CachePassword => base.redis.has_password,
            HardeningRule::CacheTls => base.redis.tls,
            HardeningRule::ColumnStorePassword => base.clickhouse.has_password,
            HardeningRule::ErrorMonitoring => base.sentry_dsn.is_some(),
            HardeningRule::StrongCoreSecrets => base
                .core_secrets()
                .iter()
                .all(|(_, secret)| secret.is_some_and(|s| s.len() >= STRONG_SECRET_LENGTH)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub score: u8,
    pub failed_categories: BTreeSet<RuleCategory>,
    pub hardening: BTreeSet<HardeningRule>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Pass/fail plus the human-readable errors.
    pub fn outcome(&self) -> (bool, Vec<String>) {
        (self.is_valid(), self.errors.clone())
    }
}

#[derive(Default)]
struct Collector {
    errors: Vec<String>,
    warnings: Vec<String>,
    failed: BTreeSet<RuleCategory>,
}

impl Collector {
    fn error(&mut self, category: RuleCategory, message: String) {
        self.failed.insert(category);
        self.errors.push(message);
    }

    fn warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// Error in strict environments, warning elsewhere.
    fn strict(&mut self, strict: bool, category: RuleCategory, message: String) {
        if strict {
            self.error(category, message);
        } else {
            self.warning(message);
        }
    }
}

/// Validate a constructed configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Produces the errors, warnings and 0-100 score behind the startup gate
/// and the operational health check. Never fails; findings are data.
///
/// ## Usage
/// ```rust,no_run
/// # fn demo(app: &config::AppConfig) {
/// let report = config::validate(app);
/// if !report.is_valid() {
///     eprintln!("refusing to start: {:?}", report.errors);
/// }
/// # }
/// ```
pub fn validate(config: &AppConfig) -> ValidationReport {
    let mut findings = Collector::default();
    findings.warnings.extend(config.warnings().iter().cloned());

    check_presence(config, &mut findings);
    check_format(config, &mut findings);
    check_strength(config, &mut findings);
    check_posture(config, &mut findings);

    let hardening: BTreeSet<HardeningRule> = HardeningRule::ALL
        .into_iter()
        .filter(|rule| rule.satisfied_by(config))
        .collect();

    let penalty: i32 = findings.failed.iter().map(RuleCategory::penalty).sum();
    let bonus: i32 = hardening.iter().map(HardeningRule::bonus).sum();
    let score = (BASELINE_SCORE - penalty + bonus).clamp(0, 100);

    ValidationReport {
        errors: findings.errors,
        warnings: findings.warnings,
        score: u8::try_from(score).unwrap_or(0),
        failed_categories: findings.failed,
        hardening,
    }
}

fn check_presence(config: &AppConfig, findings: &mut Collector) {
    let environment = config.environment();
    let base = config.base();
    let present = [
        base.jwt_secret_key.is_some(),
        base.secret_key.is_some(),
        base.service_secret.is_some(),
        base.database.is_configured(),
        base.redis.is_configured(),
    ];

    for (field, present) in MANDATORY_FIELDS.iter().zip(present) {
        if !present {
            findings.strict(
                environment.is_strict(),
                RuleCategory::Presence,
                format!("{field} is required in {environment}"),
            );
        }
    }
}

fn check_format(config: &AppConfig, findings: &mut Collector) {
    let base = config.base();
    let urls: [(&str, BackendKind, Option<&ConnectionUrl>); 3] = [
        ("database_url", BackendKind::Relational, base.database.url.as_ref()),
        ("redis_url", BackendKind::Cache, base.redis.url.as_ref()),
        ("clickhouse_url", BackendKind::ColumnStore, base.clickhouse.url.as_ref()),
    ];

    for (field, backend, url) in urls {
        if url.is_some_and(|url| !url.is_addressable(backend)) {
            findings.error(
                RuleCategory::Format,
                format!("{field} names neither a host nor a socket path"),
            );
        }
    }

    if !SUPPORTED_JWT_ALGORITHMS.contains(&base.jwt_algorithm.as_str()) {
        findings.error(
            RuleCategory::Format,
            format!("jwt_algorithm '{}' is not supported", base.jwt_algorithm),
        );
    }
    if base.api_port == 0 {
        findings.error(RuleCategory::Format, "api_port must be non-zero".to_string());
    }
}

fn check_strength(config: &AppConfig, findings: &mut Collector) {
    let environment = config.environment();
    for (field, secret) in config.base().core_secrets() {
        let Some(secret) = secret else {
            continue;
        };
        if let Some(reason) = secret_weakness(secret.expose(), environment.is_testing()) {
            findings.strict(
                environment.is_strict(),
                RuleCategory::Strength,
                format!("{field} is weak: {reason}"),
            );
        }
    }
}

fn check_posture(config: &AppConfig, findings: &mut Collector) {
    let environment = config.environment();
    if !environment.is_strict() {
        return;
    }
    let base = config.base();

    if base.database.is_configured() {
        match base.database.sslmode.as_deref() {
            None => findings.error(
                RuleCategory::Posture,
                format!("database sslmode must be set in {environment}"),
            ),
            Some(mode) if mode.eq_ignore_ascii_case("disable") => findings.error(
                RuleCategory::Posture,
                format!("database sslmode=disable is not allowed in {environment}"),
            ),
            Some(_) => {}
        }
    }

    if base.debug {
        findings.error(
            RuleCategory::Posture,
            format!("debug must be disabled in {environment}"),
        );
    }

    if base.redis.is_configured() && !base.redis.has_password {
        findings.warning("redis has no authentication password".to_string());
    }
    if base.sentry_dsn.is_none() {
        findings.warning("no error-monitoring DSN configured".to_string());
    }
}
