//! Hardware seams. The host and ESP builds each provide one implementation
//! of every trait; the tests use the mocks in `crate::testing`.

use crate::{
    error::{DisplayError, HttpError, LinkError, TimeSyncError},
    types::ConnectionInfo,
};

pub trait NetworkLink {
    fn is_connected(&self) -> bool;

    /// Starts a reconnect attempt. Completion is observed via `is_connected`.
    fn reconnect(&mut self) -> Result<(), LinkError>;

    /// Drops the association but keeps credentials for a later reconnect.
    fn disconnect(&mut self) -> Result<(), LinkError>;

    fn connection_info(&self) -> ConnectionInfo;
}

pub trait TimeProtocol {
    /// Synchronizes against `server_pool` and returns UTC epoch milliseconds.
    fn sync(&mut self, server_pool: &str) -> Result<i64, TimeSyncError>;
}

pub trait HttpClient {
    fn get(&mut self, url: &str) -> Result<String, HttpError>;
}

pub trait Timer {
    /// Monotonic milliseconds since boot.
    fn now_ms(&self) -> u64;

    fn delay_ms(&mut self, ms: u64);
}

pub trait Indicator {
    fn set(&mut self, on: bool);
    fn toggle(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontSize {
    Small,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
}

pub trait TextDisplay {
    fn clear(&mut self);
    fn set_font(&mut self, font: FontSize);
    fn set_alignment(&mut self, align: TextAlign);
    fn render_text(&mut self, x: i32, y: i32, text: &str);
    fn flush(&mut self) -> Result<(), DisplayError>;
}
