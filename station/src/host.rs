use std::{
    io::{ErrorKind, Read},
    net::UdpSocket,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use weatherclock_common::{
    sntp, ConnectionInfo, DisplayError, FontSize, HttpClient, HttpError, Indicator, LinkError,
    NetworkLink, RuntimeConfig, Station, StationParts, TextAlign, TextDisplay, TimeProtocol,
    TimeSyncError, Timer,
};

const SNTP_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_HTTP_BODY: usize = 32 * 1024;
/// Any routable address works; nothing is sent, the socket only picks a route.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    runtime.sanitize();

    if runtime.weather.api_key.is_empty() {
        warn!("no OpenWeatherMap key configured (OWM_API_KEY); weather requests will be rejected");
    }
    info!(
        "config loaded: pool=`{}`, tz=`{}`, location={}",
        runtime.clock.ntp_server_pool, runtime.clock.timezone, runtime.weather.location_code
    );

    let running = Arc::new(AtomicBool::new(true));
    loop {
        let worker_runtime = runtime.clone();
        let worker_running = running.clone();
        let mut worker =
            tokio::task::spawn_blocking(move || run_station(&worker_runtime, &worker_running));

        tokio::select! {
            result = &mut worker => {
                match result.context("station thread panicked")? {
                    Ok(()) => return Ok(()),
                    Err(err) => error!("station stopped: {err:#}"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("shutdown requested, waiting for the current tick");
                running.store(false, Ordering::Relaxed);
                if let Err(err) = worker.await {
                    warn!("station thread ended abnormally: {err}");
                }
                return Ok(());
            }
        }

        info!("restarting station in {} ms", runtime.display.restart_delay_ms);
        tokio::time::sleep(Duration::from_millis(runtime.display.restart_delay_ms)).await;
    }
}

fn run_station(runtime: &RuntimeConfig, running: &AtomicBool) -> anyhow::Result<()> {
    let parts = StationParts {
        link: Box::new(HostLink::new(&runtime.network.wifi_ssid)),
        timer: Box::new(HostTimer),
        display: Box::new(TerminalDisplay::default()),
        time_protocol: Box::new(SntpClient),
        indicator: Box::new(LogIndicator::default()),
        http: Box::new(ReqwestHttp::new()?),
    };
    let mut station = Station::new(parts, runtime).context("invalid timezone rule")?;

    if let Err(fatal) = station.run(running) {
        station.show_restart_notice();
        return Err(fatal.into());
    }
    Ok(())
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(value) = std::env::var("OWM_API_KEY") {
        runtime.weather.api_key = value;
    }
    if let Ok(value) = std::env::var("OWM_LOCATION") {
        runtime.weather.location_code = value;
    }
    if let Ok(value) = std::env::var("NTP_SERVER_POOL") {
        runtime.clock.ntp_server_pool = value;
    }
    if let Ok(value) = std::env::var("TZ_RULE") {
        runtime.clock.timezone = value;
    }
}

struct ConfigStore {
    runtime_path: PathBuf,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("WEATHERCLOCK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.weatherclock"));

        Self {
            runtime_path: data_dir.join("runtime.json"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.runtime_path).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("malformed {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// The desktop is either routed or not; "disconnecting" only forgets the
/// route so the next reconnect re-probes it.
struct HostLink {
    ssid: String,
    local_ip: Option<String>,
}

impl HostLink {
    fn new(ssid: &str) -> Self {
        let ssid = if ssid.is_empty() {
            "host network".to_string()
        } else {
            ssid.to_string()
        };
        let local_ip = probe_local_ip().ok();
        Self { ssid, local_ip }
    }
}

fn probe_local_ip() -> std::io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(ROUTE_PROBE_ADDR)?;
    Ok(socket.local_addr()?.ip().to_string())
}

impl NetworkLink for HostLink {
    fn is_connected(&self) -> bool {
        self.local_ip.is_some()
    }

    fn reconnect(&mut self) -> Result<(), LinkError> {
        let ip = probe_local_ip().map_err(|err| LinkError::Unavailable(err.to_string()))?;
        debug!("route available via {ip}");
        self.local_ip = Some(ip);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        self.local_ip = None;
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            ssid: self.ssid.clone(),
            ip: self
                .local_ip
                .clone()
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            mac: "00:00:00:00:00:00".to_string(),
            rssi: 0,
        }
    }
}

struct SntpClient;

impl TimeProtocol for SntpClient {
    fn sync(&mut self, server_pool: &str) -> Result<i64, TimeSyncError> {
        let no_response = |err: std::io::Error| TimeSyncError::NoResponse {
            server: server_pool.to_string(),
            reason: err.to_string(),
        };

        let socket = UdpSocket::bind("0.0.0.0:0").map_err(no_response)?;
        socket
            .set_read_timeout(Some(SNTP_TIMEOUT))
            .map_err(no_response)?;
        socket
            .connect((server_pool, sntp::NTP_PORT))
            .map_err(no_response)?;
        socket.send(&sntp::client_request()).map_err(no_response)?;

        let mut packet = [0_u8; 64];
        let len = socket.recv(&mut packet).map_err(no_response)?;
        sntp::decode_response(&packet[..len])
    }
}

struct ReqwestHttp {
    client: reqwest::blocking::Client,
}

impl ReqwestHttp {
    fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestHttp {
    fn get(&mut self, url: &str) -> Result<String, HttpError> {
        // The URL carries the API key; keep it out of error messages.
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| HttpError::Transport(err.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|len| len > MAX_HTTP_BODY as u64)
        {
            return Err(HttpError::BodyTooLarge {
                limit: MAX_HTTP_BODY,
            });
        }

        let mut body = Vec::new();
        response
            .take(MAX_HTTP_BODY as u64 + 1)
            .read_to_end(&mut body)
            .map_err(|err| HttpError::Transport(err.to_string()))?;
        if body.len() > MAX_HTTP_BODY {
            return Err(HttpError::BodyTooLarge {
                limit: MAX_HTTP_BODY,
            });
        }

        String::from_utf8(body).map_err(|err| HttpError::Transport(err.to_string()))
    }
}

struct HostTimer;

impl Timer for HostTimer {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

#[derive(Default)]
struct LogIndicator {
    lit: bool,
}

impl Indicator for LogIndicator {
    fn set(&mut self, on: bool) {
        self.lit = on;
        debug!("indicator {}", if on { "on" } else { "off" });
    }

    fn toggle(&mut self) {
        self.set(!self.lit);
    }
}

/// Prints each new frame once, as a 128x64 screen would only change when
/// its contents do.
struct TerminalDisplay {
    font: FontSize,
    align: TextAlign,
    pending: Vec<String>,
    shown: Vec<String>,
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        Self {
            font: FontSize::Small,
            align: TextAlign::Left,
            pending: Vec::new(),
            shown: Vec::new(),
        }
    }
}

impl TextDisplay for TerminalDisplay {
    fn clear(&mut self) {
        self.pending.clear();
    }

    fn set_font(&mut self, font: FontSize) {
        self.font = font;
    }

    fn set_alignment(&mut self, align: TextAlign) {
        self.align = align;
    }

    fn render_text(&mut self, x: i32, y: i32, text: &str) {
        let marker = match (self.font, self.align) {
            (FontSize::Medium, _) => '#',
            (FontSize::Small, TextAlign::Center) => '|',
            (FontSize::Small, TextAlign::Left) => ' ',
        };
        self.pending.push(format!("{marker}({x:>3},{y:>2}) {text}"));
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        if self.pending != self.shown {
            self.shown = self.pending.clone();
            println!("+--------------------------------");
            for line in &self.shown {
                println!("{line}");
            }
        }
        Ok(())
    }
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
