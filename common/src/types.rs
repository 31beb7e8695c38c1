use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

/// Broken-down wall-clock time. `weekday` counts days since Sunday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CalendarFields {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub weekday: u32,
}

impl CalendarFields {
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
            weekday: dt.weekday().num_days_from_sunday(),
        }
    }

    pub fn utc_from_epoch(epoch_secs: i64) -> Option<Self> {
        DateTime::from_timestamp(epoch_secs, 0).map(|dt| Self::from_naive(&dt.naive_utc()))
    }

    pub fn hh_mm(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }

    pub fn hh_mm_ss(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }

    pub fn iso_date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }

    pub fn weekday_name(&self) -> &'static str {
        const NAMES: [&str; 7] = [
            "Sunday",
            "Monday",
            "Tuesday",
            "Wednesday",
            "Thursday",
            "Friday",
            "Saturday",
        ];
        NAMES[(self.weekday % 7) as usize]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClockTime {
    pub synced: bool,
    pub fields: CalendarFields,
    #[serde(rename = "utcOffsetSecs")]
    pub utc_offset_secs: i32,
}

impl ClockTime {
    pub fn unsynchronized() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherRecord {
    pub city: String,
    pub country: String,
    pub description: String,
    #[serde(rename = "observedAt")]
    pub observed_at: i64,
    pub sunrise: i64,
    pub sunset: i64,
    #[serde(rename = "observedUtc")]
    pub observed_utc: CalendarFields,
    #[serde(rename = "sunriseUtc")]
    pub sunrise_utc: CalendarFields,
    #[serde(rename = "sunsetUtc")]
    pub sunset_utc: CalendarFields,
    #[serde(rename = "temperatureC")]
    pub temperature_c: f64,
    #[serde(rename = "temperatureMinC")]
    pub temperature_min_c: f64,
    #[serde(rename = "temperatureMaxC")]
    pub temperature_max_c: f64,
    #[serde(rename = "humidityPct")]
    pub humidity_pct: f64,
    #[serde(rename = "pressureHpa")]
    pub pressure_hpa: f64,
    #[serde(rename = "windSpeedMs")]
    pub wind_speed_ms: f64,
    #[serde(rename = "windDirectionDeg")]
    pub wind_direction_deg: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub ssid: String,
    pub ip: String,
    pub mac: String,
    pub rssi: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Screen {
    Connection,
    Clock,
    Weather,
}

impl Screen {
    pub const ALL: [Screen; 3] = [Self::Connection, Self::Clock, Self::Weather];

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % Self::ALL.len()]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "SHOW_CONNECTION",
            Self::Clock => "SHOW_CLOCK",
            Self::Weather => "SHOW_WEATHER",
        }
    }
}
