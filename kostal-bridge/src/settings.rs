//! Settings resolution for the Kostal bridge.
//!
//! Settings come either purely from environment variables (when
//! `ENV_CONFIG` is `1` or `true`) or from `settings/appsettings.json`
//! under the working directory. In file mode every variable listed in
//! [`SettingKey`] still overrides the file value, so the precedence is
//! always environment > file > compiled default.
//!
//! Resolution is a startup-only step: every failure is final and the
//! caller decides how the process exits.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

/// Folder holding the settings file, relative to the working directory.
pub const SETTINGS_FOLDER: &str = "settings";
/// Settings file name.
pub const SETTINGS_FILE: &str = "appsettings.json";
/// Folder holding the measurement backlog, relative to the working directory.
pub const STORE_FOLDER: &str = "store";
/// Measurement backlog file name.
pub const STORE_FILE: &str = "kostal.db";

/// Variable switching resolution to environment-only mode.
pub const ENV_CONFIG: &str = "ENV_CONFIG";

/// Settings template written on first run.
pub const DEFAULT_SETTINGS_TEMPLATE: &str = include_str!("../resources/appsettings.json");

const DEFAULT_KOSTAL_URL: &str = "http://192.168.111.4/";
const DEFAULT_KOSTAL_USER: &str = "pvserver";
const DEFAULT_STOP_DURING_SUNSET: bool = true;
const DEFAULT_INFLUX_URL: &str = "http://192.168.111.237:8086/";
const DEFAULT_INFLUX_ORG: &str = "Keller";
const DEFAULT_INFLUX_BUCKET: &str = "ha_test";
const DEFAULT_MQTT_HOST: &str = "localhost";
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Settings resolution errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No settings file existed; a template was written in its place.
    #[error("Please configure service: default settings written to {}", .path.display())]
    ConfigurationRequired { path: PathBuf },

    #[error("Missing required settings section '{0}'")]
    MissingSection(&'static str),

    #[error("Missing required secret {0}")]
    MissingSecret(Secret),

    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] json5::Error),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SettingsError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Settings that have no compiled-in default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    InfluxToken,
    KostalPassword,
}

impl Secret {
    /// Environment variable that provides the secret.
    pub fn env_var(&self) -> &'static str {
        match self {
            Secret::InfluxToken => SettingKey::InfluxToken.env_var(),
            Secret::KostalPassword => SettingKey::KostalPassword.env_var(),
        }
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_var())
    }
}

/// Every overridable setting and the environment variable that sets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    KostalUrl,
    KostalUser,
    KostalPassword,
    KostalStopDuringSunset,
    InfluxUrl,
    InfluxOrg,
    InfluxBucket,
    InfluxToken,
    MqttHost,
    MqttPort,
}

impl SettingKey {
    /// All keys, in the order they are applied and reported.
    pub const ALL: [SettingKey; 10] = [
        SettingKey::KostalUrl,
        SettingKey::KostalUser,
        SettingKey::KostalPassword,
        SettingKey::KostalStopDuringSunset,
        SettingKey::InfluxUrl,
        SettingKey::InfluxOrg,
        SettingKey::InfluxBucket,
        SettingKey::InfluxToken,
        SettingKey::MqttHost,
        SettingKey::MqttPort,
    ];

    /// Environment variable name.
    pub fn env_var(&self) -> &'static str {
        match self {
            SettingKey::KostalUrl => "KOSTAL_URL",
            SettingKey::KostalUser => "KOSTAL_USER",
            SettingKey::KostalPassword => "KOSTAL_PASSWORD",
            SettingKey::KostalStopDuringSunset => "KOSTAL_STOP_DURING_SUNSET",
            SettingKey::InfluxUrl => "INFLUX_URL",
            SettingKey::InfluxOrg => "INFLUX_ORG",
            SettingKey::InfluxBucket => "INFLUX_BUCKET",
            SettingKey::InfluxToken => "INFLUX_TOKEN",
            SettingKey::MqttHost => "MQTT_HOST",
            SettingKey::MqttPort => "MQTT_PORT",
        }
    }

    /// Example value shown in configuration guidance.
    pub fn example(&self) -> &'static str {
        match self {
            SettingKey::KostalUrl => DEFAULT_KOSTAL_URL,
            SettingKey::KostalUser => DEFAULT_KOSTAL_USER,
            SettingKey::KostalPassword => "password",
            SettingKey::KostalStopDuringSunset => "true",
            SettingKey::InfluxUrl => DEFAULT_INFLUX_URL,
            SettingKey::InfluxOrg => DEFAULT_INFLUX_ORG,
            SettingKey::InfluxBucket => DEFAULT_INFLUX_BUCKET,
            SettingKey::InfluxToken => "token",
            SettingKey::MqttHost => DEFAULT_MQTT_HOST,
            SettingKey::MqttPort => "1883",
        }
    }
}

/// Snapshot of environment variables used during resolution.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Capture the current process environment (non-UTF-8 entries are ignored).
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Look up a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Whether `ENV_CONFIG` selects environment-only mode.
    pub fn env_config_enabled(&self) -> bool {
        self.get(ENV_CONFIG)
            .map(|v| {
                let v = v.trim();
                v == "1" || v.eq_ignore_ascii_case("true")
            })
            .unwrap_or(false)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Validated, immutable runtime settings.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub settings_file_path: PathBuf,
    pub measurement_store_file_path: PathBuf,

    pub kostal_url: String,
    pub kostal_user: String,
    pub kostal_password: String,
    pub kostal_stop_during_sunset: bool,

    pub influx_url: String,
    pub influx_org: String,
    pub influx_bucket: String,
    pub influx_token: String,

    pub mqtt_host: String,
    pub mqtt_port: u16,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("settings_file_path", &self.settings_file_path)
            .field("measurement_store_file_path", &self.measurement_store_file_path)
            .field("kostal_url", &self.kostal_url)
            .field("kostal_user", &self.kostal_user)
            .field("kostal_password", &"<redacted>")
            .field("kostal_stop_during_sunset", &self.kostal_stop_during_sunset)
            .field("influx_url", &self.influx_url)
            .field("influx_org", &self.influx_org)
            .field("influx_bucket", &self.influx_bucket)
            .field("influx_token", &"<redacted>")
            .field("mqtt_host", &self.mqtt_host)
            .field("mqtt_port", &self.mqtt_port)
            .finish()
    }
}

impl Settings {
    /// Resolve settings for `work_dir` from the process environment.
    pub fn resolve(work_dir: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::resolve_with(work_dir, &Environment::from_process())
    }

    /// Resolve settings for `work_dir` from an explicit environment.
    pub fn resolve_with(
        work_dir: impl AsRef<Path>,
        env: &Environment,
    ) -> Result<Self, SettingsError> {
        let work_dir = work_dir.as_ref();
        let settings_dir = ensure_directory(&work_dir.join(SETTINGS_FOLDER))?;
        let store_dir = ensure_directory(&work_dir.join(STORE_FOLDER))?;
        let settings_file_path = settings_dir.join(SETTINGS_FILE);
        let measurement_store_file_path = store_dir.join(STORE_FILE);

        let mut draft = Draft::default();

        if env.env_config_enabled() {
            info!("Reading configuration from environment variables");
            draft.apply_env(env);
        } else if !settings_file_path.exists() {
            std::fs::write(&settings_file_path, DEFAULT_SETTINGS_TEMPLATE)
                .map_err(|e| SettingsError::io(&settings_file_path, e))?;
            warn!(
                path = %settings_file_path.display(),
                "Wrote default configuration file, please configure the service"
            );
            return Err(SettingsError::ConfigurationRequired {
                path: settings_file_path,
            });
        } else {
            info!(path = %settings_file_path.display(), "Reading configuration from file");
            let content = std::fs::read_to_string(&settings_file_path)
                .map_err(|e| SettingsError::io(&settings_file_path, e))?;
            let file: SettingsFile = json5::from_str(&content)?;
            draft.apply_file(file)?;
            draft.apply_env(env);
        }

        draft.log_summary();
        draft.into_settings(settings_file_path, measurement_store_file_path)
    }
}

fn ensure_directory(path: &Path) -> Result<PathBuf, SettingsError> {
    if !path.is_dir() {
        std::fs::create_dir_all(path).map_err(|e| SettingsError::io(path, e))?;
        info!(path = %path.display(), "Created directory");
    }
    Ok(path.to_path_buf())
}

/// On-disk settings document.
#[derive(Debug, Deserialize)]
struct SettingsFile {
    kostal: Option<KostalSection>,
    #[serde(rename = "influxDB")]
    influx_db: Option<InfluxSection>,
    mqtt: Option<MqttSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KostalSection {
    url: Option<String>,
    user: Option<String>,
    password: Option<String>,
    stop_during_sunset: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct InfluxSection {
    url: Option<String>,
    org: Option<String>,
    bucket: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MqttSection {
    host: Option<String>,
    port: Option<u16>,
}

/// Settings collected before the secrets are checked.
#[derive(Debug, Clone)]
struct Draft {
    kostal_url: String,
    kostal_user: String,
    kostal_password: Option<String>,
    kostal_stop_during_sunset: bool,
    influx_url: String,
    influx_org: String,
    influx_bucket: String,
    influx_token: Option<String>,
    mqtt_host: String,
    mqtt_port: u16,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            kostal_url: DEFAULT_KOSTAL_URL.to_string(),
            kostal_user: DEFAULT_KOSTAL_USER.to_string(),
            kostal_password: None,
            kostal_stop_during_sunset: DEFAULT_STOP_DURING_SUNSET,
            influx_url: DEFAULT_INFLUX_URL.to_string(),
            influx_org: DEFAULT_INFLUX_ORG.to_string(),
            influx_bucket: DEFAULT_INFLUX_BUCKET.to_string(),
            influx_token: None,
            mqtt_host: DEFAULT_MQTT_HOST.to_string(),
            mqtt_port: DEFAULT_MQTT_PORT,
        }
    }
}

impl Draft {
    fn apply_file(&mut self, file: SettingsFile) -> Result<(), SettingsError> {
        let kostal = file.kostal.ok_or(SettingsError::MissingSection("kostal"))?;
        let influx = file
            .influx_db
            .ok_or(SettingsError::MissingSection("influxDB"))?;
        let mqtt = file.mqtt.ok_or(SettingsError::MissingSection("mqtt"))?;

        if let Some(url) = kostal.url {
            self.kostal_url = url;
        }
        if let Some(user) = kostal.user {
            self.kostal_user = user;
        }
        if kostal.password.is_some() {
            self.kostal_password = kostal.password;
        }
        if let Some(stop) = kostal.stop_during_sunset {
            self.kostal_stop_during_sunset = stop;
        }

        if let Some(url) = influx.url {
            self.influx_url = url;
        }
        if let Some(org) = influx.org {
            self.influx_org = org;
        }
        if let Some(bucket) = influx.bucket {
            self.influx_bucket = bucket;
        }
        if influx.token.is_some() {
            self.influx_token = influx.token;
        }

        if let Some(host) = mqtt.host {
            self.mqtt_host = host;
        }
        if let Some(port) = mqtt.port {
            self.mqtt_port = port;
        }

        Ok(())
    }

    fn apply_env(&mut self, env: &Environment) {
        for key in SettingKey::ALL {
            if let Some(raw) = env.get(key.env_var()) {
                self.apply(key, raw);
            }
        }
    }

    /// Apply one raw value. Unparsable values keep the prior value.
    fn apply(&mut self, key: SettingKey, raw: &str) {
        match key {
            SettingKey::KostalUrl => self.kostal_url = raw.to_string(),
            SettingKey::KostalUser => self.kostal_user = raw.to_string(),
            SettingKey::KostalPassword => self.kostal_password = Some(raw.to_string()),
            SettingKey::KostalStopDuringSunset => match parse_flag(raw) {
                Some(stop) => self.kostal_stop_during_sunset = stop,
                None => warn!(
                    variable = key.env_var(),
                    value = raw,
                    "Ignoring invalid boolean"
                ),
            },
            SettingKey::InfluxUrl => self.influx_url = raw.to_string(),
            SettingKey::InfluxOrg => self.influx_org = raw.to_string(),
            SettingKey::InfluxBucket => self.influx_bucket = raw.to_string(),
            SettingKey::InfluxToken => self.influx_token = Some(raw.to_string()),
            SettingKey::MqttHost => self.mqtt_host = raw.to_string(),
            SettingKey::MqttPort => match raw.trim().parse::<u16>() {
                Ok(port) => self.mqtt_port = port,
                Err(_) => warn!(
                    variable = key.env_var(),
                    value = raw,
                    port = self.mqtt_port,
                    "Ignoring invalid port"
                ),
            },
        }
    }

    fn log_summary(&self) {
        info!(
            kostal_url = %self.kostal_url,
            kostal_user = %self.kostal_user,
            kostal_password = present(&self.kostal_password),
            kostal_stop_during_sunset = self.kostal_stop_during_sunset,
            "Kostal settings"
        );
        info!(
            influx_url = %self.influx_url,
            influx_org = %self.influx_org,
            influx_bucket = %self.influx_bucket,
            influx_token = present(&self.influx_token),
            "InfluxDB settings"
        );
        info!(mqtt_host = %self.mqtt_host, mqtt_port = self.mqtt_port, "MQTT settings");
    }

    fn missing_secrets(&self) -> Vec<Secret> {
        let mut missing = Vec::new();
        if !present(&self.influx_token) {
            missing.push(Secret::InfluxToken);
        }
        if !present(&self.kostal_password) {
            missing.push(Secret::KostalPassword);
        }
        missing
    }

    fn into_settings(
        self,
        settings_file_path: PathBuf,
        measurement_store_file_path: PathBuf,
    ) -> Result<Settings, SettingsError> {
        let missing = self.missing_secrets();
        if let Some(first) = missing.first() {
            for secret in &missing {
                error!(variable = secret.env_var(), "Required secret is not set");
            }
            info!("Please provide environment variables or config file:");
            for key in SettingKey::ALL {
                info!("{:<26} | {}", key.env_var(), key.example());
            }
            return Err(SettingsError::MissingSecret(*first));
        }

        Ok(Settings {
            settings_file_path,
            measurement_store_file_path,
            kostal_url: self.kostal_url,
            kostal_user: self.kostal_user,
            kostal_password: self.kostal_password.unwrap_or_default(),
            kostal_stop_during_sunset: self.kostal_stop_during_sunset,
            influx_url: self.influx_url,
            influx_org: self.influx_org,
            influx_bucket: self.influx_bucket,
            influx_token: self.influx_token.unwrap_or_default(),
            mqtt_host: self.mqtt_host,
            mqtt_port: self.mqtt_port,
        })
    }
}

/// Empty secrets count as absent.
fn present(secret: &Option<String>) -> bool {
    secret.as_deref().is_some_and(|s| !s.is_empty())
}

fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw == "1" || raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw == "0" || raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
