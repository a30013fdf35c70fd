//! Configuration management.
//!
//! Everything is read from the process environment, with `.env` loaded first when present.

use std::env;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub request_timeout_secs: u64,
    pub max_body_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` runs the service on the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Lifetime of every issued token, whether from login, registration or refresh.
    pub token_ttl_hours: i64,
    /// Token label used when a login request carries no `device_name`.
    pub default_token_name: String,
    pub default_guard: String,
    /// Role assigned on registration.
    pub default_role: String,
    /// Zero disables the permission cache.
    pub permission_cache_ttl_secs: u64,
    pub seed_defaults: bool,
    /// Administrator created at startup, if `SEED_ADMIN_EMAIL` and `SEED_ADMIN_PASSWORD` are set.
    pub seed_admin: Option<AdminSeed>,
}

#[derive(Clone, PartialEq)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSeed")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub rate_limiting_enabled: bool,
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub auth_rate_limit_per_second: u32,
    pub auth_rate_limit_burst: u32,
    pub min_password_length: usize,
    pub require_password_complexity: bool,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    pub metrics_enabled: bool,
}

fn var_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn string_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn flag_or(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.trim().parse().unwrap_or(default))
        .unwrap_or(default)
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Email and password come as a pair; either one alone is a configuration error.
fn admin_seed(
    email: Option<String>,
    password: Option<String>,
    name: String,
) -> Result<Option<AdminSeed>, ConfigError> {
    match (email, password) {
        (Some(email), Some(password)) => Ok(Some(AdminSeed {
            name,
            email: email.trim().to_lowercase(),
            password,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::Invalid {
            key: "SEED_ADMIN_PASSWORD",
            value: String::new(),
        }),
        (None, Some(_)) => Err(ConfigError::Invalid {
            key: "SEED_ADMIN_EMAIL",
            value: String::new(),
        }),
    }
}

fn list_or(key: &str, default: &[&str]) -> Vec<String> {
    env::var(key)
        .map(|s| {
            s.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_else(|_| default.iter().map(|item| item.to_string()).collect())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment: Environment = string_or("ENVIRONMENT", "development")
            .parse()
            .unwrap_or(Environment::Development);

        Ok(Self {
            server: ServerConfig {
                host: string_or("HOST", "0.0.0.0"),
                port: var_or("PORT", 8080)?,
                environment: environment.clone(),
                request_timeout_secs: var_or("REQUEST_TIMEOUT_SECS", 30)?,
                max_body_size: var_or("MAX_BODY_SIZE", 1_048_576)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|u| !u.trim().is_empty()),
                max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: var_or("DATABASE_MIN_CONNECTIONS", 2)?,
                connection_timeout_secs: var_or("DATABASE_CONNECTION_TIMEOUT_SECS", 30)?,
                idle_timeout_secs: var_or("DATABASE_IDLE_TIMEOUT_SECS", 600)?,
            },
            auth: Self::parse_auth_config(&environment)?,
            security: Self::parse_security_config(&environment)?,
            cors: Self::parse_cors_config(&environment)?,
            logging: Self::parse_logging_config(&environment),
            telemetry: TelemetryConfig {
                otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
                service_name: string_or("OTEL_SERVICE_NAME", "warden"),
                metrics_enabled: flag_or("METRICS_ENABLED", true),
            },
        })
    }

    fn parse_auth_config(environment: &Environment) -> Result<AuthConfig, ConfigError> {
        let token_ttl_hours = var_or("TOKEN_TTL_HOURS", 24)?;
        if token_ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                key: "TOKEN_TTL_HOURS",
                value: token_ttl_hours.to_string(),
            });
        }

        Ok(AuthConfig {
            token_ttl_hours,
            default_token_name: string_or("TOKEN_DEFAULT_NAME", "api-client"),
            default_guard: string_or("AUTH_DEFAULT_GUARD", "api"),
            default_role: string_or("AUTH_DEFAULT_ROLE", "user"),
            permission_cache_ttl_secs: var_or("PERMISSION_CACHE_TTL_SECS", 300)?,
            seed_defaults: flag_or("SEED_DEFAULTS", environment.is_development()),
            seed_admin: admin_seed(
                optional("SEED_ADMIN_EMAIL"),
                optional("SEED_ADMIN_PASSWORD"),
                string_or("SEED_ADMIN_NAME", "admin"),
            )?,
        })
    }

    fn parse_security_config(environment: &Environment) -> Result<SecurityConfig, ConfigError> {
        let is_prod = environment.is_production();

        Ok(SecurityConfig {
            rate_limiting_enabled: flag_or("RATE_LIMITING_ENABLED", is_prod),
            rate_limit_per_second: var_or("RATE_LIMIT_PER_SECOND", 10)?,
            rate_limit_burst: var_or("RATE_LIMIT_BURST", 30)?,
            auth_rate_limit_per_second: var_or("AUTH_RATE_LIMIT_PER_SECOND", 1)?,
            auth_rate_limit_burst: var_or("AUTH_RATE_LIMIT_BURST", 5)?,
            min_password_length: var_or("MIN_PASSWORD_LENGTH", 8)?,
            require_password_complexity: flag_or("REQUIRE_PASSWORD_COMPLEXITY", false),
        })
    }

    fn parse_cors_config(environment: &Environment) -> Result<CorsConfig, ConfigError> {
        let default_origins: &[&str] = if environment.is_development() {
            &["*"]
        } else {
            &[]
        };

        Ok(CorsConfig {
            allowed_origins: list_or("CORS_ALLOWED_ORIGINS", default_origins),
            allowed_methods: list_or(
                "CORS_ALLOWED_METHODS",
                &["GET", "POST", "PUT", "DELETE", "OPTIONS"],
            ),
            allowed_headers: list_or(
                "CORS_ALLOWED_HEADERS",
                &["Content-Type", "Authorization", "X-Request-ID"],
            ),
            allow_credentials: flag_or("CORS_ALLOW_CREDENTIALS", false),
            max_age_secs: var_or("CORS_MAX_AGE_SECS", 3600)?,
        })
    }

    fn parse_logging_config(environment: &Environment) -> LoggingConfig {
        let is_dev = environment.is_development();

        let format = string_or("LOG_FORMAT", if is_dev { "pretty" } else { "json" });

        LoggingConfig {
            level: string_or("LOG_LEVEL", if is_dev { "debug" } else { "info" }),
            format: match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }

    pub fn validate_for_production(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if !self.server.environment.is_production() {
            return issues;
        }

        if self.database.url.is_none() {
            issues.push("DATABASE_URL is unset; tokens and users live in memory".to_string());
        }

        if self.cors.allowed_origins.iter().any(|o| o == "*") {
            issues.push("CORS should not allow all origins (*) in production".to_string());
        }

        if !self.security.rate_limiting_enabled {
            issues.push("Rate limiting should be enabled in production".to_string());
        }

        if self.security.min_password_length < 8 {
            issues.push("Minimum password length should be at least 8".to_string());
        }

        if self.auth.seed_defaults {
            issues.push("SEED_DEFAULTS is on; bootstrap roles are created at startup".to_string());
        }

        if self.auth.seed_admin.is_some() {
            issues.push("SEED_ADMIN_PASSWORD is set; unset it once the admin exists".to_string());
        }

        issues
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn default_for_testing() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                environment: Environment::Development,
                request_timeout_secs: 30,
                max_body_size: 1_048_576,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                min_connections: 1,
                connection_timeout_secs: 10,
                idle_timeout_secs: 300,
            },
            auth: AuthConfig {
                token_ttl_hours: 24,
                default_token_name: "api-client".to_string(),
                default_guard: "api".to_string(),
                default_role: "user".to_string(),
                permission_cache_ttl_secs: 300,
                seed_defaults: true,
                seed_admin: None,
            },
            security: SecurityConfig {
                rate_limiting_enabled: false,
                rate_limit_per_second: 10,
                rate_limit_burst: 30,
                auth_rate_limit_per_second: 1,
                auth_rate_limit_burst: 5,
                min_password_length: 8,
                require_password_complexity: false,
            },
            cors: CorsConfig {
                allowed_origins: vec!["*".to_string()],
                allowed_methods: vec![
                    "GET".to_string(),
                    "POST".to_string(),
                    "PUT".to_string(),
                    "DELETE".to_string(),
                ],
                allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
                allow_credentials: false,
                max_age_secs: 3600,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
            },
            telemetry: TelemetryConfig {
                otlp_endpoint: None,
                service_name: "warden-test".to_string(),
                metrics_enabled: false,
            },
        }
    }
}
