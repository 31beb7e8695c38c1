//! OpenWeatherMap current-conditions source.

use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::WeatherConfig,
    error::{DecodeError, FatalError},
    platform::{HttpClient, NetworkLink, Timer},
    retry::{ensure_connected, RetryPolicy},
    types::{CalendarFields, WeatherRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Idle,
    Updated,
    /// Request or decode failed; the previous record is still current.
    Retained,
}

pub struct WeatherSource {
    http: Box<dyn HttpClient>,
    endpoint: String,
    refresh_interval_ms: u64,
    reconnect: RetryPolicy,
    last_fetch_ms: u64,
    record: Option<WeatherRecord>,
}

impl WeatherSource {
    pub fn new(http: Box<dyn HttpClient>, config: &WeatherConfig) -> Self {
        Self {
            http,
            endpoint: config.endpoint(),
            refresh_interval_ms: config.refresh_interval_secs.saturating_mul(1000),
            reconnect: config.reconnect,
            last_fetch_ms: 0,
            record: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn record(&self) -> Option<&WeatherRecord> {
        self.record.as_ref()
    }

    pub fn has_record(&self) -> bool {
        self.record.is_some()
    }

    pub fn initialize(
        &mut self,
        link: &mut dyn NetworkLink,
        timer: &mut dyn Timer,
        now_ms: u64,
    ) -> Result<FetchOutcome, FatalError> {
        self.last_fetch_ms = now_ms;
        self.fetch(link, timer)
    }

    pub fn poll(
        &mut self,
        link: &mut dyn NetworkLink,
        timer: &mut dyn Timer,
        now_ms: u64,
    ) -> Result<FetchOutcome, FatalError> {
        if now_ms.saturating_sub(self.last_fetch_ms) <= self.refresh_interval_ms {
            return Ok(FetchOutcome::Idle);
        }
        self.last_fetch_ms = now_ms;
        self.fetch(link, timer)
    }

    fn fetch(
        &mut self,
        link: &mut dyn NetworkLink,
        timer: &mut dyn Timer,
    ) -> Result<FetchOutcome, FatalError> {
        ensure_connected(link, timer, self.reconnect).map_err(|err| {
            error!("weather source lost the network: {err}");
            FatalError::from(err)
        })?;

        let body = match self.http.get(&self.endpoint) {
            Ok(body) => body,
            Err(err) => {
                warn!("weather request failed: {err}");
                return Ok(FetchOutcome::Retained);
            }
        };
        debug!("weather payload: {} bytes", body.len());

        match decode_weather(&body) {
            Ok(record) => {
                self.record = Some(record);
                self.log_record();
                Ok(FetchOutcome::Updated)
            }
            Err(err) => {
                warn!("weather payload rejected: {err}");
                Ok(FetchOutcome::Retained)
            }
        }
    }

    pub fn log_record(&self) {
        let Some(record) = &self.record else {
            info!("no weather data yet");
            return;
        };
        info!(
            "{} ({}): {}, observed {} {} UTC",
            record.city,
            record.country,
            record.description,
            record.observed_utc.iso_date(),
            record.observed_utc.hh_mm()
        );
        info!(
            "temp {:.1} C (min {:.1}, max {:.1}), humidity {:.0} %, pressure {:.0} hPa",
            record.temperature_c,
            record.temperature_min_c,
            record.temperature_max_c,
            record.humidity_pct,
            record.pressure_hpa
        );
        info!(
            "wind {:.1} m/s from {} deg, sunrise {} UTC, sunset {} UTC",
            record.wind_speed_ms,
            record.wind_direction_deg,
            record.sunrise_utc.hh_mm(),
            record.sunset_utc.hh_mm()
        );
    }
}

// OWM JSON structures

#[derive(Deserialize)]
struct OwmCurrentRoot {
    cod: Option<Value>,
    message: Option<Value>,
    name: Option<String>,
    dt: Option<i64>,
    sys: Option<OwmSys>,
    main: Option<OwmMain>,
    weather: Option<Vec<OwmWeather>>,
    wind: Option<OwmWind>,
}

#[derive(Default, Deserialize)]
struct OwmSys {
    country: Option<String>,
    sunrise: Option<i64>,
    sunset: Option<i64>,
}

#[derive(Deserialize)]
struct OwmMain {
    temp: Option<f64>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
}

#[derive(Deserialize)]
struct OwmWeather {
    description: Option<String>,
}

#[derive(Default, Deserialize)]
struct OwmWind {
    speed: Option<f64>,
    deg: Option<f64>,
}

/// Decodes a `/weather` response. `main` and `dt` are required; every other
/// field falls back to zero or an empty string.
pub fn decode_weather(body: &str) -> Result<WeatherRecord, DecodeError> {
    let root: OwmCurrentRoot = serde_json::from_str(body)?;

    if let Some(code) = root.cod.as_ref().map(value_text) {
        if code != "200" {
            let message = root.message.as_ref().map(value_text).unwrap_or_default();
            return Err(DecodeError::Api { code, message });
        }
    }

    let main = root.main.ok_or(DecodeError::MissingField("main"))?;
    let observed_at = root.dt.ok_or(DecodeError::MissingField("dt"))?;
    let sys = root.sys.unwrap_or_default();
    let wind = root.wind.unwrap_or_default();
    let sunrise = sys.sunrise.unwrap_or(0);
    let sunset = sys.sunset.unwrap_or(0);

    let description = root
        .weather
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|w| w.description)
        .unwrap_or_default();

    Ok(WeatherRecord {
        city: root.name.unwrap_or_default(),
        country: sys.country.unwrap_or_default(),
        description,
        observed_at,
        sunrise,
        sunset,
        observed_utc: utc_fields(observed_at)?,
        sunrise_utc: utc_fields(sunrise)?,
        sunset_utc: utc_fields(sunset)?,
        temperature_c: main.temp.unwrap_or(0.0),
        temperature_min_c: main.temp_min.unwrap_or(0.0),
        temperature_max_c: main.temp_max.unwrap_or(0.0),
        humidity_pct: main.humidity.unwrap_or(0.0),
        pressure_hpa: main.pressure.unwrap_or(0.0),
        wind_speed_ms: wind.speed.unwrap_or(0.0),
        wind_direction_deg: wind.deg.map(|deg| deg.round() as i32).unwrap_or(0),
    })
}

fn utc_fields(epoch_secs: i64) -> Result<CalendarFields, DecodeError> {
    CalendarFields::utc_from_epoch(epoch_secs).ok_or(DecodeError::Timestamp(epoch_secs))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{MockHttp, MockLink, MockTimer};

    const BADEN: &str = r#"{
        "coord":{"lon":8.31,"lat":47.47},
        "weather":[{"id":800,"main":"Clear","description":"Klarer Himmel","icon":"01n"}],
        "base":"stations",
        "main":{"temp":1.99,"pressure":1035,"humidity":76,"temp_min":1,"temp_max":3},
        "visibility":10000,
        "wind":{"speed":0.5},
        "clouds":{"all":0},
        "dt":1550173800,
        "sys":{"type":1,"id":6941,"message":0.0038,"country":"CH","sunrise":1550125987,"sunset":1550162962},
        "id":2661646,
        "name":"Baden",
        "cod":200
    }"#;

    fn baden_record() -> WeatherRecord {
        WeatherRecord {
            city: "Baden".to_string(),
            country: "CH".to_string(),
            description: "Klarer Himmel".to_string(),
            observed_at: 1_550_173_800,
            sunrise: 1_550_125_987,
            sunset: 1_550_162_962,
            observed_utc: CalendarFields {
                year: 2019,
                month: 2,
                day: 14,
                hour: 19,
                minute: 50,
                second: 0,
                weekday: 4,
            },
            sunrise_utc: CalendarFields {
                year: 2019,
                month: 2,
                day: 14,
                hour: 6,
                minute: 33,
                second: 7,
                weekday: 4,
            },
            sunset_utc: CalendarFields {
                year: 2019,
                month: 2,
                day: 14,
                hour: 16,
                minute: 49,
                second: 22,
                weekday: 4,
            },
            temperature_c: 1.99,
            temperature_min_c: 1.0,
            temperature_max_c: 3.0,
            humidity_pct: 76.0,
            pressure_hpa: 1035.0,
            wind_speed_ms: 0.5,
            wind_direction_deg: 0,
        }
    }

    fn source(http: &MockHttp) -> WeatherSource {
        let config = WeatherConfig {
            api_key: "key".to_string(),
            ..WeatherConfig::default()
        };
        WeatherSource::new(Box::new(http.clone()), &config)
    }

    #[test]
    fn decodes_example_payload() {
        assert_eq!(decode_weather(BADEN).unwrap(), baden_record());
    }

    #[test]
    fn decodes_wind_direction_when_present() {
        let body = BADEN.replace(r#""speed":0.5"#, r#""speed":4.1,"deg":247.6"#);

        let record = decode_weather(&body).unwrap();

        assert_eq!(record.wind_speed_ms, 4.1);
        assert_eq!(record.wind_direction_deg, 248);
    }

    #[test]
    fn api_error_code_is_rejected() {
        let err = decode_weather(r#"{"cod":"401","message":"Invalid API key."}"#).unwrap_err();

        assert!(matches!(
            err,
            DecodeError::Api { ref code, ref message } if code == "401" && message == "Invalid API key."
        ));
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        assert!(matches!(
            decode_weather(r#"{"dt":1550173800,"name":"Baden"}"#),
            Err(DecodeError::MissingField("main"))
        ));
        assert!(matches!(
            decode_weather(r#"{"main":{"temp":1.0}}"#),
            Err(DecodeError::MissingField("dt"))
        ));
    }

    #[test]
    fn initialize_fetches_configured_endpoint() {
        let http = MockHttp::serving(BADEN);
        let mut weather = source(&http);
        let mut link = MockLink::connected();
        let mut timer = MockTimer::default();

        let outcome = weather.initialize(&mut link, &mut timer, 0).unwrap();

        assert_eq!(outcome, FetchOutcome::Updated);
        assert_eq!(
            http.state().urls,
            vec![
                "http://api.openweathermap.org/data/2.5/weather?id=2661646&lang=de&units=metric&APPID=key"
                    .to_string()
            ]
        );
        assert_eq!(weather.record(), Some(&baden_record()));
    }

    #[test]
    fn malformed_payload_keeps_previous_record() {
        let http = MockHttp::serving(BADEN);
        let mut weather = source(&http);
        let mut link = MockLink::connected();
        let mut timer = MockTimer::default();
        weather.initialize(&mut link, &mut timer, 0).unwrap();

        http.set_body(Some(r#"{"main":{"temp":25.0},"dt":"#));
        let outcome = weather.poll(&mut link, &mut timer, 60_001).unwrap();

        assert_eq!(outcome, FetchOutcome::Retained);
        assert_eq!(weather.record(), Some(&baden_record()));
    }

    #[test]
    fn http_failure_keeps_previous_record() {
        let http = MockHttp::default();
        let mut weather = source(&http);
        let mut link = MockLink::connected();
        let mut timer = MockTimer::default();

        assert_eq!(
            weather.initialize(&mut link, &mut timer, 0).unwrap(),
            FetchOutcome::Retained
        );
        assert!(!weather.has_record());
    }

    #[test]
    fn refresh_interval_is_tracked_even_on_failure() {
        let http = MockHttp::default();
        let mut weather = source(&http);
        let mut link = MockLink::connected();
        let mut timer = MockTimer::default();
        weather.initialize(&mut link, &mut timer, 0).unwrap();

        assert_eq!(
            weather.poll(&mut link, &mut timer, 60_000).unwrap(),
            FetchOutcome::Idle
        );
        assert_eq!(
            weather.poll(&mut link, &mut timer, 60_001).unwrap(),
            FetchOutcome::Retained
        );
        assert_eq!(
            weather.poll(&mut link, &mut timer, 90_000).unwrap(),
            FetchOutcome::Idle
        );
        assert_eq!(http.state().urls.len(), 2);
    }

    #[test]
    fn exhausted_reconnects_are_fatal() {
        let http = MockHttp::serving(BADEN);
        let mut weather = source(&http);
        let mut link = MockLink::offline();
        let mut timer = MockTimer::default();

        let err = weather.initialize(&mut link, &mut timer, 0).unwrap_err();

        assert_eq!(err, FatalError::ConnectivityLost { attempts: 10 });
        assert_eq!(timer.slept_ms(), 5_000);
        assert!(http.state().urls.is_empty());
    }
}
