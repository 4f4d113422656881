use serde::Deserialize;
use std::fs;

use balance_client::analytics::AnalyticsConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Room number on the campus payment portal.
    pub id: String,
    pub campus: Option<String>,
    pub building: Option<String>,
}

impl AccountConfig {
    /// Label for the config endpoint: campus and building prefixes when
    /// present, always ending with the account id.
    pub fn display_name(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(campus) = &self.campus {
            parts.push(campus);
        }
        if let Some(building) = &self.building {
            parts.push(building);
        }
        parts.push(&self.id);
        parts.join("-")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Full URL override. When unset the URL is assembled from `base_url`,
    /// `base_query`, and the account id.
    pub url: Option<String>,
    pub base_url: String,
    pub base_query: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// First capture group must be the kWh figure.
    pub pattern: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            base_url: "https://yktyd.ecust.edu.cn/epay/wxpage/wanxiao/eleresult".to_string(),
            base_query: "sysid=1&areaid=3&buildid=20".to_string(),
            user_agent: "Mozilla/5.0 (Linux; U; Android 4.1.2; zh-cn; Chitanda/Akari) \
                         AppleWebKit/534.30 (KHTML, like Gecko) Version/4.0 Mobile \
                         Safari/534.30 MicroMessenger/6.0.0.58_r884092.501 NetType/WIFI"
                .to_string(),
            timeout_secs: 10,
            pattern: r"(\d+(\.\d+)?)度".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite file path; created on first start.
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub run_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            run_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    pub lookback_days: i64,
    pub recharge_threshold_kwh: f64,
    pub noise_floor_kwh: f64,
    pub fallback_daily_kwh: f64,
    /// Fixed offset for calendar-day boundaries, in whole hours.
    pub utc_offset_hours: i8,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            recharge_threshold_kwh: 1.0,
            noise_floor_kwh: 0.1,
            fallback_daily_kwh: 5.0,
            utc_offset_hours: 8,
        }
    }
}

impl AnalyticsSettings {
    pub fn engine_config(&self) -> anyhow::Result<AnalyticsConfig> {
        Ok(AnalyticsConfig {
            recharge_threshold_kwh: self.recharge_threshold_kwh,
            noise_floor_kwh: self.noise_floor_kwh,
            fallback_daily_kwh: self.fallback_daily_kwh,
            day_boundary_offset: time::UtcOffset::from_hms(self.utc_offset_hours, 0, 0)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub account: AccountConfig,
    #[serde(default)]
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub analytics: AnalyticsSettings,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("MONITOR_CONFIG").unwrap_or_else(|_| "monitor-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if cfg.scheduler.interval_secs == 0 {
            anyhow::bail!("scheduler.interval_secs must be at least 1");
        }
        Ok(cfg)
    }
}
