use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "civicpulse", about = "Civic issue reporting server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Promote an existing account to admin and exit
    #[arg(long, value_name = "EMAIL")]
    pub grant_admin: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub mail: MailConfig,
    pub geocoding: GeocodingConfig,
    pub list: ListConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    /// URL prefix under which uploaded files are publicly served
    pub public_base_url: String,
    pub max_upload_bytes: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MailProvider {
    #[default]
    Resend,
    EmailJs,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct MailConfig {
    pub provider: MailProvider,
    pub resend_api_key: Option<String>,
    pub contact_to: Option<String>,
    pub contact_from: Option<String>,
    pub emailjs: EmailJsConfig,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct EmailJsConfig {
    pub service_id: Option<String>,
    pub template_id: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct GeocodingConfig {
    pub mapbox_token: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ListConfig {
    pub page_size: usize,
    pub search_debounce_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            public_base_url: "/uploads".to_string(),
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "civicpulse_session".to_string(),
            session_hours: 720,
        }
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            page_size: 12,
            search_debounce_ms: 350,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        config.apply_env(|key| std::env::var(key).ok());

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("civicpulse.db"));
        }
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("uploads"));
        }

        Ok(config)
    }

    /// Fill secrets the config file left empty from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fill = |slot: &mut Option<String>, key: &str| {
            if slot.as_deref().map_or(true, str::is_empty) {
                if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                    *slot = Some(value);
                }
            }
        };

        fill(&mut self.mail.resend_api_key, "RESEND_API_KEY");
        fill(&mut self.mail.contact_to, "CONTACT_TO");
        fill(&mut self.mail.contact_from, "CONTACT_FROM");
        fill(&mut self.mail.emailjs.service_id, "EMAILJS_SERVICE_ID");
        fill(&mut self.mail.emailjs.template_id, "EMAILJS_TEMPLATE_ID");
        fill(&mut self.mail.emailjs.public_key, "EMAILJS_PUBLIC_KEY");
        fill(&mut self.geocoding.mapbox_token, "MAPBOX_TOKEN");
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".civicpulse")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("civicpulse.db"))
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("uploads"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_for(tmp: &tempfile::TempDir) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir: Some(tmp.path().to_path_buf()),
            grant_admin: None,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.auth.cookie_name, "civicpulse_session");
        assert_eq!(config.auth.session_hours, 720);
        assert_eq!(config.list.page_size, 12);
        assert_eq!(config.list.search_debounce_ms, 350);
        assert_eq!(config.storage.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.mail.provider, MailProvider::Resend);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = Cli {
            config: None,
            host: None,
            port: None,
            data_dir: Some(PathBuf::from("/tmp/test-civicpulse")),
            grant_admin: None,
        };
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-civicpulse"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli_for(&tmp)).unwrap();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.db_path(), tmp.path().join("civicpulse.db"));
        assert_eq!(config.uploads_path(), tmp.path().join("uploads"));
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
port = 9000

[mail]
provider = "emailjs"
contact_to = "owner@civicpulse.in"

[mail.emailjs]
service_id = "svc"

[list]
page_size = 20
"#,
        )
        .unwrap();

        let mut cli = cli_for(&tmp);
        cli.config = Some(config_path);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.mail.provider, MailProvider::EmailJs);
        assert_eq!(config.mail.contact_to.as_deref(), Some("owner@civicpulse.in"));
        assert_eq!(config.mail.emailjs.service_id.as_deref(), Some("svc"));
        assert_eq!(config.list.page_size, 20);
        assert_eq!(config.list.search_debounce_ms, 350);
    }

    #[test]
    fn cli_overrides_beat_toml_values() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[server]\nhost = \"192.168.1.1\"\nport = 9000\n").unwrap();

        let cli = Cli {
            config: Some(config_path),
            host: Some("10.0.0.1".to_string()),
            port: Some(4000),
            data_dir: Some(tmp.path().to_path_buf()),
            grant_admin: None,
        };
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn env_fills_only_missing_secrets() {
        let mut config = Config::default();
        config.mail.contact_to = Some("file@civicpulse.in".to_string());

        config.apply_env(|key| match key {
            "CONTACT_TO" => Some("env@civicpulse.in".to_string()),
            "RESEND_API_KEY" => Some("re_123".to_string()),
            "MAPBOX_TOKEN" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.mail.contact_to.as_deref(), Some("file@civicpulse.in"));
        assert_eq!(config.mail.resend_api_key.as_deref(), Some("re_123"));
        assert!(config.geocoding.mapbox_token.is_none());
    }
}
