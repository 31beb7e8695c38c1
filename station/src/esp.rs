use core::convert::TryInto;
use std::{
    sync::{atomic::AtomicBool, OnceLock},
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Context};
use embedded_graphics::{
    mono_font::{
        ascii::{FONT_6X10, FONT_9X15},
        MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use embedded_svc::{
    http::{client::Client as SvcHttpClient, Method, Status},
    io::Read,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    gpio::{AnyOutputPin, Gpio4, Gpio5, Output, PinDriver},
    i2c::{I2cConfig, I2cDriver, I2C0},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SntpConf, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};
use ssd1306::{mode::BufferedGraphicsMode, prelude::*, I2CDisplayInterface, Ssd1306};

use weatherclock_common::{
    config::NetworkConfig, display::render_restart_notice, ConnectionInfo, DisplayError, FontSize,
    HttpClient, HttpError, Indicator, LinkError, NetworkLink, RuntimeConfig, Station,
    StationParts, TextAlign, TextDisplay, TimeProtocol, TimeSyncError, Timer,
};

const NVS_NAMESPACE: &str = "weatherclock";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WATCHDOG_FEED_SLICE_MS: u64 = 1_000;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const STATUS_LED_PIN: i32 = 16;
const OLED_I2C_BAUD: u32 = 400_000;
const SNTP_SYNC_TIMEOUT_MS: u64 = 20_000;
const SNTP_POLL_INTERVAL_MS: u64 = 250;
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_HTTP_BODY: usize = 32 * 1024;

type Oled = Ssd1306<
    I2CInterface<I2cDriver<'static>>,
    DisplaySize128x64,
    BufferedGraphicsMode<DisplaySize128x64>,
>;

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

struct StatusLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    lit: bool,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_compiled_defaults(&mut runtime);
    runtime.sanitize();

    info!(
        "NVS config loaded: ssid=`{}`, pool=`{}`, location={}",
        runtime.network.wifi_ssid, runtime.clock.ntp_server_pool, runtime.weather.location_code,
    );

    let Peripherals {
        modem, i2c0, pins, ..
    } = Peripherals::take()?;
    let mut display =
        OledDisplay::new(i2c0, pins.gpio5, pins.gpio4).context("failed to initialize OLED")?;

    let wifi = match connect_wifi(modem, sys_loop, nvs_partition, &runtime.network) {
        Ok(wifi) => wifi,
        Err(err) => {
            error!("wifi startup failed: {err:#}");
            if let Err(err) = render_restart_notice(&mut display) {
                warn!("failed to show restart notice: {err}");
            }
            return restart_after(runtime.display.restart_delay_ms);
        }
    };

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let parts = StationParts {
        link: Box::new(EspWifiLink {
            wifi,
            ssid: runtime.network.wifi_ssid.clone(),
        }),
        timer: Box::new(EspTimer),
        display: Box::new(display),
        time_protocol: Box::new(EspSntpProtocol),
        indicator: Box::new(LedIndicator {
            led: init_status_led(STATUS_LED_PIN),
        }),
        http: Box::new(EspHttp),
    };
    let mut station = Station::new(parts, &runtime).context("invalid timezone rule")?;

    let running = AtomicBool::new(true);
    if let Err(fatal) = station.run(&running) {
        error!("{fatal}");
        station.show_restart_notice();
    }
    restart_after(runtime.display.restart_delay_ms)
}

#[allow(unreachable_code)]
fn restart_after(delay_ms: u64) -> anyhow::Result<()> {
    EspTimer.delay_ms(delay_ms);
    warn!("restarting device");
    unsafe { esp_idf_svc::sys::esp_restart() };
    Ok(())
}

fn ensure_compiled_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }

    if runtime.weather.api_key.is_empty() {
        if let Some(key) = option_env!("OWM_API_KEY") {
            runtime.weather.api_key = key.to_string();
        }
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    if network.wifi_ssid.is_empty() {
        return Err(anyhow!("wifi credentials missing"));
    }

    let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                return Ok(wifi);
            }
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    let _ = wifi.stop();
    match last_err {
        Some(err) => Err(err).context(format!(
            "all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed"
        )),
        None => Err(anyhow!("wifi never attempted a connection")),
    }
}

struct EspWifiLink {
    wifi: BlockingWifi<EspWifi<'static>>,
    ssid: String,
}

impl NetworkLink for EspWifiLink {
    fn is_connected(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    /// Non-blocking; the retry loop polls `is_connected` between attempts.
    fn reconnect(&mut self) -> Result<(), LinkError> {
        let driver = |err: esp_idf_svc::sys::EspError| LinkError::Driver(err.to_string());

        if !self.wifi.is_started().map_err(driver)? {
            self.wifi.wifi_mut().start().map_err(driver)?;
        }
        self.wifi.wifi_mut().connect().map_err(driver)
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        self.wifi
            .wifi_mut()
            .disconnect()
            .map_err(|err| LinkError::Driver(err.to_string()))
    }

    fn connection_info(&self) -> ConnectionInfo {
        let netif = self.wifi.wifi().sta_netif();
        let ip = netif
            .get_ip_info()
            .map(|info| info.ip.to_string())
            .unwrap_or_else(|_| "0.0.0.0".to_string());
        let mac = netif
            .get_mac()
            .map(|mac| {
                mac.iter()
                    .map(|byte| format!("{byte:02X}"))
                    .collect::<Vec<_>>()
                    .join(":")
            })
            .unwrap_or_default();

        ConnectionInfo {
            ssid: self.ssid.clone(),
            ip,
            mac,
            rssi: station_rssi().unwrap_or(0),
        }
    }
}

fn station_rssi() -> Option<i32> {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    (rc == esp_idf_svc::sys::ESP_OK).then(|| i32::from(ap_info.rssi))
}

/// A fresh SNTP service per sync; only one may run at a time and it is
/// dropped again once the system clock has been set.
struct EspSntpProtocol;

impl TimeProtocol for EspSntpProtocol {
    fn sync(&mut self, server_pool: &str) -> Result<i64, TimeSyncError> {
        let no_response = |reason: String| TimeSyncError::NoResponse {
            server: server_pool.to_string(),
            reason,
        };

        let mut conf = SntpConf::default();
        conf.servers[0] = server_pool;
        let sntp = EspSntp::new(&conf).map_err(|err| no_response(err.to_string()))?;

        let mut waited_ms = 0;
        while sntp.get_sync_status() != SyncStatus::Completed {
            if waited_ms >= SNTP_SYNC_TIMEOUT_MS {
                return Err(no_response(format!(
                    "not synchronized within {}s",
                    SNTP_SYNC_TIMEOUT_MS / 1000
                )));
            }
            feed_watchdog();
            thread::sleep(Duration::from_millis(SNTP_POLL_INTERVAL_MS));
            waited_ms += SNTP_POLL_INTERVAL_MS;
        }
        drop(sntp);

        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| TimeSyncError::InvalidResponse(err.to_string()))?;
        i64::try_from(since_epoch.as_millis())
            .map_err(|err| TimeSyncError::InvalidResponse(err.to_string()))
    }
}

struct EspHttp;

impl HttpClient for EspHttp {
    fn get(&mut self, url: &str) -> Result<String, HttpError> {
        let transport = |err: esp_idf_svc::io::EspIOError| HttpError::Transport(err.to_string());

        let config = HttpClientConfiguration {
            timeout: Some(HTTP_TIMEOUT),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&config)
            .map_err(|err| HttpError::Transport(err.to_string()))?;
        let mut client = SvcHttpClient::wrap(connection);
        let mut response = client
            .request(Method::Get, url, &[])
            .map_err(transport)?
            .submit()
            .map_err(transport)?;

        let status = response.status();
        if status != 200 {
            return Err(HttpError::Status(status));
        }

        let mut body = Vec::new();
        let mut chunk = [0_u8; 1024];
        loop {
            let read = response.read(&mut chunk).map_err(transport)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
            if body.len() > MAX_HTTP_BODY {
                return Err(HttpError::BodyTooLarge {
                    limit: MAX_HTTP_BODY,
                });
            }
        }

        String::from_utf8(body).map_err(|err| HttpError::Transport(err.to_string()))
    }
}

struct OledDisplay {
    oled: Oled,
    font: FontSize,
    align: TextAlign,
}

impl OledDisplay {
    fn new(i2c: I2C0, sda: Gpio5, scl: Gpio4) -> anyhow::Result<Self> {
        let config = I2cConfig::new().baudrate(Hertz(OLED_I2C_BAUD));
        let driver = I2cDriver::new(i2c, sda, scl, &config)?;
        let interface = I2CDisplayInterface::new(driver);
        let mut oled = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        oled.init()
            .map_err(|err| anyhow!("oled init failed: {err:?}"))?;
        oled.clear_buffer();

        Ok(Self {
            oled,
            font: FontSize::Small,
            align: TextAlign::Left,
        })
    }
}

impl TextDisplay for OledDisplay {
    fn clear(&mut self) {
        self.oled.clear_buffer();
    }

    fn set_font(&mut self, font: FontSize) {
        self.font = font;
    }

    fn set_alignment(&mut self, align: TextAlign) {
        self.align = align;
    }

    fn render_text(&mut self, x: i32, y: i32, text: &str) {
        let font = match self.font {
            FontSize::Small => &FONT_6X10,
            FontSize::Medium => &FONT_9X15,
        };
        let alignment = match self.align {
            TextAlign::Left => Alignment::Left,
            TextAlign::Center => Alignment::Center,
        };
        let style = MonoTextStyle::new(font, BinaryColor::On);
        let text_style = TextStyleBuilder::new()
            .alignment(alignment)
            .baseline(Baseline::Top)
            .build();

        if let Err(err) =
            Text::with_text_style(text, Point::new(x, y), style, text_style).draw(&mut self.oled)
        {
            warn!("failed to draw `{text}`: {err:?}");
        }
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        self.oled
            .flush()
            .map_err(|err| DisplayError::Bus(format!("{err:?}")))
    }
}

struct LedIndicator {
    led: Option<StatusLed>,
}

impl Indicator for LedIndicator {
    fn set(&mut self, on: bool) {
        let Some(led) = self.led.as_mut() else {
            return;
        };

        let result = if on {
            led.pin.set_high()
        } else {
            led.pin.set_low()
        };

        if let Err(err) = result {
            warn!("failed to drive status LED: {err}");
        } else {
            led.lit = on;
        }
    }

    fn toggle(&mut self) {
        let lit = self.led.as_ref().is_some_and(|led| led.lit);
        self.set(!lit);
    }
}

fn init_status_led(pin: i32) -> Option<StatusLed> {
    let driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) };
    match driver {
        Ok(mut pin) => {
            let _ = pin.set_low();
            Some(StatusLed { pin, lit: false })
        }
        Err(err) => {
            warn!("status LED unavailable on GPIO{pin}: {err}");
            None
        }
    }
}

/// Sleeps in slices so long waits (retry delays, the restart delay) never
/// starve the task watchdog.
struct EspTimer;

impl Timer for EspTimer {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn delay_ms(&mut self, ms: u64) {
        let mut remaining = ms;
        loop {
            feed_watchdog();
            if remaining == 0 {
                break;
            }
            let slice = remaining.min(WATCHDOG_FEED_SLICE_MS);
            thread::sleep(Duration::from_millis(slice));
            remaining -= slice;
        }
    }
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
