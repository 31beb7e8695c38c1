//! The weather clock itself: owns every collaborator plus both data sources
//! and drives them from one cooperative loop.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::{
    clock::TimeSource,
    config::RuntimeConfig,
    display::{
        render_clock, render_connection, render_restart_notice, render_weather, TaskSelector,
    },
    error::{DisplayError, FatalError, TzError},
    platform::{HttpClient, Indicator, NetworkLink, TextDisplay, TimeProtocol, Timer},
    types::Screen,
    weather::WeatherSource,
};

/// Platform implementations handed to [`Station::new`].
pub struct StationParts {
    pub link: Box<dyn NetworkLink>,
    pub timer: Box<dyn Timer>,
    pub display: Box<dyn TextDisplay>,
    pub time_protocol: Box<dyn TimeProtocol>,
    pub indicator: Box<dyn Indicator>,
    pub http: Box<dyn HttpClient>,
}

pub struct Station {
    link: Box<dyn NetworkLink>,
    timer: Box<dyn Timer>,
    display: Box<dyn TextDisplay>,
    clock: TimeSource,
    weather: WeatherSource,
    selector: TaskSelector,
    screen_interval_secs: u64,
    tick_ms: u64,
    current: Option<Screen>,
}

impl Station {
    pub fn new(parts: StationParts, config: &RuntimeConfig) -> Result<Self, TzError> {
        let clock = TimeSource::from_config(parts.time_protocol, parts.indicator, &config.clock)?;
        let weather = WeatherSource::new(parts.http, &config.weather);
        let selector = TaskSelector::new(parts.timer.now_ms());

        Ok(Self {
            link: parts.link,
            timer: parts.timer,
            display: parts.display,
            clock,
            weather,
            selector,
            screen_interval_secs: config.display.screen_interval_secs,
            tick_ms: config.display.tick_ms,
            current: None,
        })
    }

    pub fn clock(&self) -> &TimeSource {
        &self.clock
    }

    pub fn weather(&self) -> &WeatherSource {
        &self.weather
    }

    /// First time sync and weather fetch. Only a lost network is fatal.
    pub fn setup(&mut self) -> Result<(), FatalError> {
        let info = self.link.connection_info();
        info!("station starting on {} ({})", info.ssid, info.ip);

        let now_ms = self.timer.now_ms();
        self.clock.initialize(self.link.as_mut(), self.timer.as_mut(), now_ms);

        let now_ms = self.timer.now_ms();
        self.weather.initialize(self.link.as_mut(), self.timer.as_mut(), now_ms)?;

        self.selector = TaskSelector::new(self.timer.now_ms());
        self.current = None;
        Ok(())
    }

    /// One pass of the main loop; returns the screen that was drawn.
    pub fn tick(&mut self) -> Result<Screen, FatalError> {
        let now_ms = self.timer.now_ms();
        self.clock.poll(self.link.as_mut(), self.timer.as_mut(), now_ms);
        self.weather.poll(self.link.as_mut(), self.timer.as_mut(), now_ms)?;

        let index = self
            .selector
            .select_task(Screen::ALL.len(), self.screen_interval_secs, now_ms);
        let screen = Screen::from_index(index);
        if self.current != Some(screen) {
            debug!("screen -> {}", screen.as_str());
            self.current = Some(screen);
        }

        if let Err(err) = self.render(screen) {
            warn!("display update failed: {err}");
        }
        Ok(screen)
    }

    fn render(&mut self, screen: Screen) -> Result<(), DisplayError> {
        let now_ms = self.timer.now_ms();
        match screen {
            Screen::Connection => {
                render_connection(self.display.as_mut(), &self.link.connection_info())
            }
            Screen::Clock => render_clock(self.display.as_mut(), &self.clock.clock_time(now_ms)),
            Screen::Weather => render_weather(
                self.display.as_mut(),
                self.weather.record(),
                &self.clock.clock_time(now_ms),
            ),
        }
    }

    /// Runs setup and then the loop until `running` is cleared or the
    /// network is lost for good.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), FatalError> {
        self.setup()?;
        while running.load(Ordering::Relaxed) {
            self.tick()?;
            self.timer.delay_ms(self.tick_ms);
        }
        info!("station stopped");
        Ok(())
    }

    pub fn show_restart_notice(&mut self) {
        if let Err(err) = render_restart_notice(self.display.as_mut()) {
            warn!("failed to show restart notice: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{MockDisplay, MockHttp, MockIndicator, MockLink, MockNtp, MockTimer};

    const BADEN: &str = r#"{"weather":[{"description":"Klarer Himmel"}],"main":{"temp":1.99,"pressure":1035,"humidity":76,"temp_min":1,"temp_max":3},"wind":{"speed":0.5},"dt":1550173800,"sys":{"country":"CH","sunrise":1550125987,"sunset":1550162962},"name":"Baden","cod":200}"#;

    struct Rig {
        station: Station,
        link: MockLink,
        timer: MockTimer,
        display: MockDisplay,
        http: MockHttp,
    }

    fn rig(link: MockLink) -> Rig {
        let timer = MockTimer::default();
        let display = MockDisplay::default();
        let http = MockHttp::serving(BADEN);
        let parts = StationParts {
            link: Box::new(link.clone()),
            timer: Box::new(timer.clone()),
            display: Box::new(display.clone()),
            time_protocol: Box::new(MockNtp::answering(1_550_173_800_000)),
            indicator: Box::new(MockIndicator::default()),
            http: Box::new(http.clone()),
        };
        let station = Station::new(parts, &RuntimeConfig::default()).unwrap();
        Rig {
            station,
            link,
            timer,
            display,
            http,
        }
    }

    #[test]
    fn setup_syncs_clock_and_fetches_weather() {
        let mut rig = rig(MockLink::connected());

        rig.station.setup().unwrap();

        assert!(rig.station.clock().is_synced());
        assert_eq!(
            rig.station.weather().record().map(|r| r.city.as_str()),
            Some("Baden")
        );
    }

    #[test]
    fn screens_rotate_every_ten_seconds() {
        let mut rig = rig(MockLink::connected());
        rig.station.setup().unwrap();

        assert_eq!(rig.station.tick().unwrap(), Screen::Connection);
        assert_eq!(rig.display.frame_texts()[0], "HomeNet");

        rig.timer.set_now(10_000);
        assert_eq!(rig.station.tick().unwrap(), Screen::Clock);
        assert_eq!(
            rig.display.frame_texts(),
            vec!["NTP-Clock", "20:50:10", "2019-02-14"]
        );

        rig.timer.set_now(20_000);
        assert_eq!(rig.station.tick().unwrap(), Screen::Weather);
        assert_eq!(rig.display.frame_texts()[0], "Baden");
        assert_eq!(rig.display.frame_texts()[6], "2019-02-14    20:50");

        rig.timer.set_now(30_000);
        assert_eq!(rig.station.tick().unwrap(), Screen::Connection);
    }

    #[test]
    fn weather_refreshes_after_a_minute() {
        let mut rig = rig(MockLink::connected());
        rig.station.setup().unwrap();

        rig.timer.set_now(60_000);
        rig.station.tick().unwrap();
        assert_eq!(rig.http.state().urls.len(), 1);

        rig.timer.set_now(60_001);
        rig.station.tick().unwrap();
        assert_eq!(rig.http.state().urls.len(), 2);
    }

    #[test]
    fn lost_network_during_refresh_is_fatal() {
        let mut rig = rig(MockLink::connected());
        rig.station.setup().unwrap();
        rig.link.state_mut().connected = false;
        rig.timer.set_now(60_001);

        let err = rig.station.tick().unwrap_err();

        assert_eq!(err, FatalError::ConnectivityLost { attempts: 10 });
        assert_eq!(rig.link.state().reconnects, 10);
    }

    #[test]
    fn run_surfaces_fatal_setup() {
        let mut rig = rig(MockLink::offline());
        let running = AtomicBool::new(true);

        let err = rig.station.run(&running).unwrap_err();

        // 10 attempts for the clock, 10 more for the weather
        assert_eq!(err, FatalError::ConnectivityLost { attempts: 10 });
        assert_eq!(rig.link.state().reconnects, 20);
        assert_eq!(rig.timer.slept_ms(), 10 * 200 + 10 * 500);
    }

    #[test]
    fn run_returns_when_stopped() {
        let mut rig = rig(MockLink::connected());
        let running = AtomicBool::new(false);

        assert_eq!(rig.station.run(&running), Ok(()));
        assert!(rig.station.clock().is_synced());
    }

    #[test]
    fn restart_notice_replaces_frame() {
        let mut rig = rig(MockLink::connected());
        rig.station.setup().unwrap();
        rig.station.tick().unwrap();

        rig.station.show_restart_notice();

        assert_eq!(rig.display.frame_texts(), vec!["Restart"]);
    }
}
