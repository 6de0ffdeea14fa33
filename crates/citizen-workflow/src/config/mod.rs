use std::env;
use std::fmt;
use std::path::PathBuf;

/// Distinguishes runtime behavior for different stages of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the workflow engine and its operator tooling.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub reference: ReferenceConfig,
    pub reference_data: ReferenceDataConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let ansi = match env::var("APP_LOG_ANSI") {
            Ok(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag {
                name: "APP_LOG_ANSI",
                value: raw,
            })?,
            Err(_) => false,
        };

        let data_dir = PathBuf::from(env::var("APP_DATA_DIR").unwrap_or_else(|_| "./data".to_string()));

        let portal_prefix = env::var("APP_REFERENCE_PREFIX").unwrap_or_else(|_| "JK".to_string());
        let portal_prefix = portal_prefix.trim().to_string();
        if portal_prefix.is_empty() {
            return Err(ConfigError::EmptyReferencePrefix);
        }
        if !portal_prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidReferencePrefix(portal_prefix));
        }

        let state_name =
            env::var("APP_STATE_NAME").unwrap_or_else(|_| "Jammu and Kashmir".to_string());

        let districts_csv = path_or(&data_dir, "APP_DISTRICTS_CSV", "districts.csv");
        let tehsils_csv = path_or(&data_dir, "APP_TEHSILS_CSV", "tehsils.csv");
        let services_json = path_or(&data_dir, "APP_SERVICES_JSON", "services.json");

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level, ansi },
            storage: StorageConfig { data_dir },
            reference: ReferenceConfig {
                portal_prefix,
                state_name,
            },
            reference_data: ReferenceDataConfig {
                districts_csv,
                tehsils_csv,
                services_json,
            },
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn path_or(data_dir: &std::path::Path, var: &str, file_name: &str) -> PathBuf {
    env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join(file_name))
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub ansi: bool,
}

/// Where the operator tooling keeps its document store and uploaded files.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn store_file(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

/// Literals used when rendering reference numbers and area names.
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub portal_prefix: String,
    pub state_name: String,
}

/// Read-only lookup tables consulted by the location resolver and service catalog.
#[derive(Debug, Clone)]
pub struct ReferenceDataConfig {
    pub districts_csv: PathBuf,
    pub tehsils_csv: PathBuf,
    pub services_json: PathBuf,
}

#[derive(Debug)]
pub enum ConfigError {
    EmptyReferencePrefix,
    InvalidReferencePrefix(String),
    InvalidFlag { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyReferencePrefix => {
                write!(f, "APP_REFERENCE_PREFIX must not be empty")
            }
            ConfigError::InvalidReferencePrefix(value) => write!(
                f,
                "APP_REFERENCE_PREFIX must be ASCII alphanumeric (found '{value}')"
            ),
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{name} must be a boolean flag (found '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
