pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod platform;
pub mod retry;
pub mod sntp;
pub mod station;
pub mod types;
pub mod tz;
pub mod weather;

#[cfg(test)]
mod testing;

pub use clock::{SyncOutcome, TimeSource};
pub use config::{ClockConfig, DisplayConfig, NetworkConfig, RuntimeConfig, WeatherConfig};
pub use display::TaskSelector;
pub use error::{
    DecodeError, DisplayError, FatalError, HttpError, LinkError, RetryError, TimeSyncError, TzError,
};
pub use platform::{
    FontSize, HttpClient, Indicator, NetworkLink, TextAlign, TextDisplay, TimeProtocol, Timer,
};
pub use retry::{ensure_connected, RetryPolicy};
pub use station::{Station, StationParts};
pub use tz::TimeZoneRule;
pub use types::{CalendarFields, ClockTime, ConnectionInfo, Screen, WeatherRecord};
pub use weather::{decode_weather, FetchOutcome, WeatherSource};
