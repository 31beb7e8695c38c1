//! Mock collaborators shared by the unit tests. Every mock is a cheap
//! handle; clones observe the same state.

use std::{
    cell::{Ref, RefCell, RefMut},
    rc::Rc,
};

use crate::{
    error::{DisplayError, HttpError, LinkError, TimeSyncError},
    platform::{
        FontSize, HttpClient, Indicator, NetworkLink, TextAlign, TextDisplay, TimeProtocol, Timer,
    },
    types::ConnectionInfo,
};

#[derive(Debug, Default)]
pub struct LinkState {
    pub connected: bool,
    pub reconnects: u32,
    pub disconnects: u32,
    /// Link comes up on this reconnect attempt (1-based). `None` keeps it down.
    pub connect_after: Option<u32>,
    pub info: ConnectionInfo,
}

#[derive(Debug, Clone, Default)]
pub struct MockLink(Rc<RefCell<LinkState>>);

impl MockLink {
    pub fn connected() -> Self {
        let link = Self::default();
        link.state_mut().connected = true;
        link.state_mut().info = ConnectionInfo {
            ssid: "HomeNet".to_string(),
            ip: "192.168.1.42".to_string(),
            mac: "24:0A:C4:00:11:22".to_string(),
            rssi: -61,
        };
        link
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Ref<'_, LinkState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, LinkState> {
        self.0.borrow_mut()
    }
}

impl NetworkLink for MockLink {
    fn is_connected(&self) -> bool {
        self.0.borrow().connected
    }

    fn reconnect(&mut self) -> Result<(), LinkError> {
        let mut state = self.0.borrow_mut();
        state.reconnects += 1;
        if state.connect_after.is_some_and(|n| state.reconnects >= n) {
            state.connected = true;
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        let mut state = self.0.borrow_mut();
        state.disconnects += 1;
        state.connected = false;
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.0.borrow().info.clone()
    }
}

#[derive(Debug, Default)]
struct TimerState {
    now_ms: u64,
    slept_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MockTimer(Rc<RefCell<TimerState>>);

impl MockTimer {
    pub fn slept_ms(&self) -> u64 {
        self.0.borrow().slept_ms
    }

    pub fn set_now(&self, now_ms: u64) {
        self.0.borrow_mut().now_ms = now_ms;
    }
}

impl Timer for MockTimer {
    fn now_ms(&self) -> u64 {
        self.0.borrow().now_ms
    }

    fn delay_ms(&mut self, ms: u64) {
        let mut state = self.0.borrow_mut();
        state.now_ms += ms;
        state.slept_ms += ms;
    }
}

#[derive(Debug, Default)]
pub struct NtpState {
    /// `None` makes every query fail.
    pub epoch_ms: Option<i64>,
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockNtp(Rc<RefCell<NtpState>>);

impl MockNtp {
    pub fn answering(epoch_ms: i64) -> Self {
        let ntp = Self::default();
        ntp.state_mut().epoch_ms = Some(epoch_ms);
        ntp
    }

    pub fn state(&self) -> Ref<'_, NtpState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, NtpState> {
        self.0.borrow_mut()
    }
}

impl TimeProtocol for MockNtp {
    fn sync(&mut self, server_pool: &str) -> Result<i64, TimeSyncError> {
        let mut state = self.0.borrow_mut();
        state.queries.push(server_pool.to_string());
        state.epoch_ms.ok_or_else(|| TimeSyncError::NoResponse {
            server: server_pool.to_string(),
            reason: "timed out".to_string(),
        })
    }
}

#[derive(Debug, Default)]
pub struct HttpState {
    /// `None` makes every request fail at the transport level.
    pub body: Option<String>,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockHttp(Rc<RefCell<HttpState>>);

impl MockHttp {
    pub fn serving(body: &str) -> Self {
        let http = Self::default();
        http.set_body(Some(body));
        http
    }

    pub fn set_body(&self, body: Option<&str>) {
        self.0.borrow_mut().body = body.map(str::to_string);
    }

    pub fn state(&self) -> Ref<'_, HttpState> {
        self.0.borrow()
    }
}

impl HttpClient for MockHttp {
    fn get(&mut self, url: &str) -> Result<String, HttpError> {
        let mut state = self.0.borrow_mut();
        state.urls.push(url.to_string());
        state
            .body
            .clone()
            .ok_or_else(|| HttpError::Transport("connection refused".to_string()))
    }
}

#[derive(Debug, Default)]
pub struct IndicatorState {
    pub on: bool,
    pub toggles: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MockIndicator(Rc<RefCell<IndicatorState>>);

impl MockIndicator {
    pub fn state(&self) -> Ref<'_, IndicatorState> {
        self.0.borrow()
    }
}

impl Indicator for MockIndicator {
    fn set(&mut self, on: bool) {
        self.0.borrow_mut().on = on;
    }

    fn toggle(&mut self) {
        let mut state = self.0.borrow_mut();
        state.on = !state.on;
        state.toggles += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawnText {
    pub x: i32,
    pub y: i32,
    pub text: String,
    pub font: FontSize,
    pub align: TextAlign,
}

#[derive(Debug)]
pub struct DisplayState {
    font: FontSize,
    align: TextAlign,
    pending: Vec<DrawnText>,
    pub frame: Vec<DrawnText>,
    pub flushes: u32,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            font: FontSize::Small,
            align: TextAlign::Left,
            pending: Vec::new(),
            frame: Vec::new(),
            flushes: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockDisplay(Rc<RefCell<DisplayState>>);

impl MockDisplay {
    pub fn state(&self) -> Ref<'_, DisplayState> {
        self.0.borrow()
    }

    pub fn frame_texts(&self) -> Vec<String> {
        self.0
            .borrow()
            .frame
            .iter()
            .map(|drawn| drawn.text.clone())
            .collect()
    }
}

impl TextDisplay for MockDisplay {
    fn clear(&mut self) {
        self.0.borrow_mut().pending.clear();
    }

    fn set_font(&mut self, font: FontSize) {
        self.0.borrow_mut().font = font;
    }

    fn set_alignment(&mut self, align: TextAlign) {
        self.0.borrow_mut().align = align;
    }

    fn render_text(&mut self, x: i32, y: i32, text: &str) {
        let mut state = self.0.borrow_mut();
        let drawn = DrawnText {
            x,
            y,
            text: text.to_string(),
            font: state.font,
            align: state.align,
        };
        state.pending.push(drawn);
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        let mut state = self.0.borrow_mut();
        state.frame = state.pending.clone();
        state.flushes += 1;
        Ok(())
    }
}
