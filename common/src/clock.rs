//! NTP-backed wall clock with a periodic resync policy.
//!
//! The RTC is an anchor pair (UTC epoch at the last successful sync, and the
//! monotonic time at which it was taken). Local time is always derived from
//! that anchor through the configured timezone rule; only a successful resync
//! moves the anchor.

use log::{debug, info, log, warn, Level};

use crate::{
    config::ClockConfig,
    error::{TimeSyncError, TzError},
    platform::{Indicator, NetworkLink, TimeProtocol, Timer},
    retry::{ensure_connected, RetryPolicy},
    tz::TimeZoneRule,
    types::ClockTime,
};

pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 24 * 3600;

/// 2001-09-09; anything earlier means the server handed back an unset clock.
const MIN_VALID_EPOCH_MS: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Idle,
    Synced,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RtcAnchor {
    epoch_ms: i64,
    mono_ms: u64,
}

impl RtcAnchor {
    fn epoch_secs_at(&self, now_ms: u64) -> i64 {
        let elapsed = i64::try_from(now_ms.saturating_sub(self.mono_ms)).unwrap_or(i64::MAX);
        self.epoch_ms.saturating_add(elapsed).div_euclid(1000)
    }
}

pub struct TimeSource {
    protocol: Box<dyn TimeProtocol>,
    indicator: Box<dyn Indicator>,
    server_pool: String,
    tz: TimeZoneRule,
    reconnect: RetryPolicy,
    resync_interval_ms: u64,
    keep_network: bool,
    verbose: bool,
    last_resync_ms: u64,
    anchor: Option<RtcAnchor>,
}

impl TimeSource {
    pub fn new(
        protocol: Box<dyn TimeProtocol>,
        indicator: Box<dyn Indicator>,
        server_pool: &str,
        tz: TimeZoneRule,
    ) -> Self {
        Self {
            protocol,
            indicator,
            server_pool: server_pool.to_string(),
            tz,
            reconnect: RetryPolicy::new(10, 200),
            resync_interval_ms: DEFAULT_RESYNC_INTERVAL_SECS * 1000,
            keep_network: true,
            verbose: false,
            last_resync_ms: 0,
            anchor: None,
        }
    }

    pub fn from_config(
        protocol: Box<dyn TimeProtocol>,
        indicator: Box<dyn Indicator>,
        config: &ClockConfig,
    ) -> Result<Self, TzError> {
        let tz = config.timezone_rule()?;
        let mut source = Self::new(protocol, indicator, &config.ntp_server_pool, tz);
        source.set_resync_interval(config.resync_interval_secs);
        source.keep_network_connection(config.keep_network);
        source.set_verbose(config.verbose);
        source.reconnect = config.reconnect;
        Ok(source)
    }

    pub fn set_resync_interval(&mut self, secs: u64) {
        self.resync_interval_ms = secs.saturating_mul(1000);
    }

    pub fn keep_network_connection(&mut self, keep: bool) {
        self.keep_network = keep;
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn timezone(&self) -> &TimeZoneRule {
        &self.tz
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    /// First synchronization. A failure is logged and leaves the clock
    /// unsynchronized until the next due resync.
    pub fn initialize(
        &mut self,
        link: &mut dyn NetworkLink,
        timer: &mut dyn Timer,
        now_ms: u64,
    ) -> SyncOutcome {
        info!("time source: pool {} rule {}", self.server_pool, self.tz);
        let outcome = self.resync(link, timer);
        self.indicator.set(true);
        self.last_resync_ms = now_ms;
        outcome
    }

    pub fn poll(
        &mut self,
        link: &mut dyn NetworkLink,
        timer: &mut dyn Timer,
        now_ms: u64,
    ) -> SyncOutcome {
        if now_ms.saturating_sub(self.last_resync_ms) <= self.resync_interval_ms {
            return SyncOutcome::Idle;
        }
        let outcome = self.resync(link, timer);
        self.last_resync_ms = now_ms;
        outcome
    }

    fn resync(&mut self, link: &mut dyn NetworkLink, timer: &mut dyn Timer) -> SyncOutcome {
        match ensure_connected(link, timer, self.reconnect) {
            Ok(0) => {}
            Ok(attempts) => debug!("link up after {attempts} attempts"),
            Err(err) => {
                warn!("time resync abandoned: {err}");
                return SyncOutcome::Failed;
            }
        }

        let outcome = match self.query() {
            Ok(epoch_ms) => {
                self.anchor = Some(RtcAnchor {
                    epoch_ms,
                    mono_ms: timer.now_ms(),
                });
                self.indicator.toggle();
                info!("clock synchronized via {}", self.server_pool);
                self.log_local_time(timer.now_ms());
                SyncOutcome::Synced
            }
            Err(err) => {
                warn!("time sync failed: {err}");
                SyncOutcome::Failed
            }
        };

        if !self.keep_network {
            if let Err(err) = link.disconnect() {
                warn!("failed to drop link after time sync: {err}");
            }
        }
        outcome
    }

    fn query(&mut self) -> Result<i64, TimeSyncError> {
        let epoch_ms = self.protocol.sync(&self.server_pool)?;
        if epoch_ms < MIN_VALID_EPOCH_MS {
            return Err(TimeSyncError::ClockNotSet(epoch_ms.div_euclid(1000)));
        }
        Ok(epoch_ms)
    }

    pub fn epoch_secs(&self, now_ms: u64) -> Option<i64> {
        self.anchor.map(|anchor| anchor.epoch_secs_at(now_ms))
    }

    pub fn clock_time(&self, now_ms: u64) -> ClockTime {
        let Some(epoch_secs) = self.epoch_secs(now_ms) else {
            return ClockTime::unsynchronized();
        };
        match self.tz.local_fields(epoch_secs) {
            Some(fields) => ClockTime {
                synced: true,
                fields,
                utc_offset_secs: self.tz.utc_offset_secs(epoch_secs),
            },
            None => ClockTime::unsynchronized(),
        }
    }

    pub fn log_local_time(&self, now_ms: u64) {
        let Some(epoch_secs) = self.epoch_secs(now_ms) else {
            debug!("clock not synchronized yet");
            return;
        };
        let time = self.clock_time(now_ms);
        let level = if self.verbose { Level::Info } else { Level::Debug };
        let offset = time.utc_offset_secs;

        log!(
            level,
            "local time: {}, {} {} {}",
            time.fields.weekday_name(),
            time.fields.iso_date(),
            time.fields.hh_mm_ss(),
            self.tz.abbreviation(epoch_secs)
        );
        log!(
            level,
            "utc offset: {}{:02}:{:02}, epoch {epoch_secs}",
            if offset < 0 { '-' } else { '+' },
            offset.unsigned_abs() / 3600,
            offset.unsigned_abs() % 3600 / 60
        );
    }
}
