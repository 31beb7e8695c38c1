//! Round-robin screen scheduler and the screen layouts for the 128x64 OLED.
//!
//! Renderers only read state. Each one clears the frame, draws and flushes.

use crate::{
    error::DisplayError,
    platform::{FontSize, TextAlign, TextDisplay},
    types::{ClockTime, ConnectionInfo, WeatherRecord},
};

const CENTER_X: i32 = 64;

/// Cycles through `task_count` tasks, one step per whole elapsed interval.
#[derive(Debug, Clone, Default)]
pub struct TaskSelector {
    index: usize,
    last_switch_ms: u64,
}

impl TaskSelector {
    pub fn new(now_ms: u64) -> Self {
        Self {
            index: 0,
            last_switch_ms: now_ms,
        }
    }

    /// Returns the active task in `0..task_count`. Repeated calls within one
    /// interval return the same index; after a stall every missed interval
    /// still counts as one step.
    pub fn select_task(&mut self, task_count: usize, interval_secs: u64, now_ms: u64) -> usize {
        if task_count == 0 {
            return 0;
        }

        let interval_ms = interval_secs.saturating_mul(1000);
        if interval_ms == 0 {
            self.index = (self.index + 1) % task_count;
            self.last_switch_ms = now_ms;
            return self.index;
        }

        let steps = now_ms.saturating_sub(self.last_switch_ms) / interval_ms;
        if steps > 0 {
            let advance = (steps % task_count as u64) as usize;
            self.index = (self.index + advance) % task_count;
            self.last_switch_ms += steps * interval_ms;
        }
        self.index % task_count
    }
}

pub fn render_connection(
    display: &mut dyn TextDisplay,
    info: &ConnectionInfo,
) -> Result<(), DisplayError> {
    display.clear();
    display.set_alignment(TextAlign::Center);
    display.set_font(FontSize::Medium);
    display.render_text(CENTER_X, 0, &info.ssid);
    display.set_font(FontSize::Small);
    display.render_text(CENTER_X, 18, &info.ip);
    display.render_text(CENTER_X, 34, &info.mac);
    display.render_text(CENTER_X, 50, &format!("RSSI {}", info.rssi));
    display.flush()
}

pub fn render_clock(display: &mut dyn TextDisplay, time: &ClockTime) -> Result<(), DisplayError> {
    let (clock, date) = if time.synced {
        (time.fields.hh_mm_ss(), time.fields.iso_date())
    } else {
        ("--:--:--".to_string(), "----------".to_string())
    };

    display.clear();
    display.set_alignment(TextAlign::Center);
    display.set_font(FontSize::Medium);
    display.render_text(CENTER_X, 0, "NTP-Clock");
    display.render_text(CENTER_X, 18, &clock);
    display.render_text(CENTER_X, 36, &date);
    display.flush()
}

/// Sunrise and sunset are shown in UTC; the footer is the local clock.
pub fn render_weather(
    display: &mut dyn TextDisplay,
    record: Option<&WeatherRecord>,
    local: &ClockTime,
) -> Result<(), DisplayError> {
    display.clear();
    display.set_alignment(TextAlign::Left);
    display.set_font(FontSize::Small);

    match record {
        Some(record) => {
            display.render_text(0, 0, &record.city);
            display.render_text(46, 0, &record.description);
            display.render_text(0, 12, &format!("Rise {}", record.sunrise_utc.hh_mm()));
            display.render_text(64, 12, &format!("Set {}", record.sunset_utc.hh_mm()));
            display.render_text(
                0,
                24,
                &format!(
                    "{:4.1} C  {:2.0} %  {:4.0} hPa",
                    record.temperature_c, record.humidity_pct, record.pressure_hpa
                ),
            );
            display.render_text(
                0,
                36,
                &format!(
                    "Wind  {:3.0} m/s  {:3} Grad",
                    record.wind_speed_ms, record.wind_direction_deg
                ),
            );
        }
        None => display.render_text(0, 0, "No weather data"),
    }

    let footer = if local.synced {
        format!("{}    {}", local.fields.iso_date(), local.fields.hh_mm())
    } else {
        "----------    --:--".to_string()
    };
    display.render_text(0, 48, &footer);
    display.flush()
}

pub fn render_restart_notice(display: &mut dyn TextDisplay) -> Result<(), DisplayError> {
    display.clear();
    display.set_alignment(TextAlign::Center);
    display.set_font(FontSize::Small);
    display.render_text(CENTER_X, 0, "Restart");
    display.flush()
}
