use log::warn;
use serde::{Deserialize, Serialize};

use crate::{error::TzError, retry::RetryPolicy, tz::TimeZoneRule};

pub const DEFAULT_NTP_SERVER_POOL: &str = "ch.pool.ntp.org";
pub const DEFAULT_TZ_RULE: &str = "MEZ-1MESZ-2,M3.5.0/02:00:00,M10.5.0/03:00:00";
pub const DEFAULT_OWM_HOST: &str = "api.openweathermap.org/data/2.5";
pub const DEFAULT_LOCATION_CODE: &str = "2661646";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    pub ntp_server_pool: String,
    pub timezone: String,
    pub resync_interval_secs: u64,
    pub keep_network: bool,
    pub verbose: bool,
    pub reconnect: RetryPolicy,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            ntp_server_pool: DEFAULT_NTP_SERVER_POOL.to_string(),
            timezone: DEFAULT_TZ_RULE.to_string(),
            resync_interval_secs: 6 * 3600,
            keep_network: true,
            verbose: false,
            reconnect: RetryPolicy::new(10, 200),
        }
    }
}

impl ClockConfig {
    pub fn timezone_rule(&self) -> Result<TimeZoneRule, TzError> {
        self.timezone.parse()
    }

    pub fn sanitize(&mut self) {
        if self.ntp_server_pool.trim().is_empty() {
            self.ntp_server_pool = DEFAULT_NTP_SERVER_POOL.to_string();
        }

        if let Err(err) = self.timezone_rule() {
            warn!("ignoring timezone `{}`: {err}", self.timezone);
            self.timezone = DEFAULT_TZ_RULE.to_string();
        }

        self.resync_interval_secs = self.resync_interval_secs.clamp(60, 7 * 24 * 3600);
        self.reconnect.sanitize();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    pub api_host: String,
    pub api_key: String,
    pub location_code: String,
    pub lang: String,
    pub refresh_interval_secs: u64,
    pub reconnect: RetryPolicy,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_OWM_HOST.to_string(),
            api_key: String::new(),
            location_code: DEFAULT_LOCATION_CODE.to_string(),
            lang: "de".to_string(),
            refresh_interval_secs: 60,
            reconnect: RetryPolicy::new(10, 500),
        }
    }
}

impl WeatherConfig {
    /// Current-conditions URL for the configured location.
    pub fn endpoint(&self) -> String {
        format!(
            "http://{}/weather?id={}&lang={}&units=metric&APPID={}",
            self.api_host.trim_end_matches('/'),
            self.location_code,
            self.lang,
            self.api_key
        )
    }

    pub fn sanitize(&mut self) {
        let host = self
            .api_host
            .trim()
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        self.api_host = if host.is_empty() {
            DEFAULT_OWM_HOST.to_string()
        } else {
            host.to_string()
        };

        if self.location_code.trim().is_empty() {
            self.location_code = DEFAULT_LOCATION_CODE.to_string();
        }
        if self.lang.trim().is_empty() {
            self.lang = "de".to_string();
        }

        self.refresh_interval_secs = self.refresh_interval_secs.clamp(10, 24 * 3600);
        self.reconnect.sanitize();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub screen_interval_secs: u64,
    pub tick_ms: u64,
    pub restart_delay_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            screen_interval_secs: 10,
            tick_ms: 200,
            restart_delay_ms: 5_000,
        }
    }
}

impl DisplayConfig {
    pub fn sanitize(&mut self) {
        self.screen_interval_secs = self.screen_interval_secs.clamp(1, 3600);
        self.tick_ms = self.tick_ms.clamp(10, 1_000);
        self.restart_delay_ms = self.restart_delay_ms.min(60_000);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.clock.sanitize();
        self.weather.sanitize();
        self.display.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_endpoint_targets_baden() {
        let mut weather = WeatherConfig::default();
        weather.api_key = "key".to_string();

        assert_eq!(
            weather.endpoint(),
            "http://api.openweathermap.org/data/2.5/weather?id=2661646&lang=de&units=metric&APPID=key"
        );
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"weather":{"api_host":"example.org/owm","api_key":"k","location_code":"2661374","lang":"en","refresh_interval_secs":120,"reconnect":{"max_attempts":3,"delay_ms":100}}}"#)
                .unwrap();

        assert_eq!(config.weather.location_code, "2661374");
        assert_eq!(config.weather.reconnect, RetryPolicy::new(3, 100));
        assert_eq!(config.clock.ntp_server_pool, DEFAULT_NTP_SERVER_POOL);
        assert_eq!(config.clock.resync_interval_secs, 6 * 3600);
        assert!(config.clock.keep_network);
        assert_eq!(config.display.screen_interval_secs, 10);
    }

    #[test]
    fn sanitize_repairs_invalid_values() {
        let mut config = RuntimeConfig::default();
        config.clock.ntp_server_pool = "  ".to_string();
        config.clock.timezone = "MEZ-1MESZ-2,M13".to_string();
        config.clock.resync_interval_secs = 0;
        config.weather.api_host = "https://api.example.org/".to_string();
        config.weather.refresh_interval_secs = 1;
        config.display.tick_ms = 0;
        config.display.restart_delay_ms = 600_000;

        config.sanitize();

        assert_eq!(config.clock.ntp_server_pool, DEFAULT_NTP_SERVER_POOL);
        assert_eq!(config.clock.timezone, DEFAULT_TZ_RULE);
        assert_eq!(config.clock.resync_interval_secs, 60);
        assert_eq!(config.weather.api_host, "api.example.org/");
        assert_eq!(config.weather.refresh_interval_secs, 10);
        assert_eq!(config.display.tick_ms, 10);
        assert_eq!(config.display.restart_delay_ms, 60_000);
    }

    #[test]
    fn iana_timezone_is_accepted() {
        let mut clock = ClockConfig {
            timezone: "Europe/Zurich".to_string(),
            ..ClockConfig::default()
        };
        clock.sanitize();

        assert_eq!(clock.timezone, "Europe/Zurich");
        assert!(matches!(clock.timezone_rule(), Ok(TimeZoneRule::Named(_))));
    }
}
