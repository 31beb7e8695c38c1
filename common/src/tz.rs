//! Timezone rules for the RTC: either an IANA name resolved through
//! `chrono-tz`, or a POSIX TZ string such as
//! `MEZ-1MESZ-2,M3.5.0/02:00:00,M10.5.0/03:00:00`.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, Offset, TimeZone};
use chrono_tz::Tz;

use crate::{error::TzError, types::CalendarFields};

const DEFAULT_TRANSITION_SECS: i32 = 2 * 3600;
const MAX_HMS_HOURS: u32 = 167;

#[derive(Debug, Clone, PartialEq)]
pub enum TimeZoneRule {
    Named(Tz),
    Posix(PosixTz),
}

impl TimeZoneRule {
    pub fn utc() -> Self {
        Self::Named(Tz::UTC)
    }

    /// Local offset east of UTC in effect at `epoch_secs`.
    pub fn utc_offset_secs(&self, epoch_secs: i64) -> i32 {
        match self {
            Self::Named(tz) => DateTime::from_timestamp(epoch_secs, 0)
                .map(|utc| {
                    tz.offset_from_utc_datetime(&utc.naive_utc())
                        .fix()
                        .local_minus_utc()
                })
                .unwrap_or(0),
            Self::Posix(posix) => posix.utc_offset_secs(epoch_secs),
        }
    }

    pub fn abbreviation(&self, epoch_secs: i64) -> String {
        match self {
            Self::Named(tz) => DateTime::from_timestamp(epoch_secs, 0)
                .map(|utc| tz.offset_from_utc_datetime(&utc.naive_utc()).to_string())
                .unwrap_or_default(),
            Self::Posix(posix) => posix.abbreviation(epoch_secs).to_string(),
        }
    }

    pub fn local_fields(&self, epoch_secs: i64) -> Option<CalendarFields> {
        let offset = i64::from(self.utc_offset_secs(epoch_secs));
        CalendarFields::utc_from_epoch(epoch_secs.checked_add(offset)?)
    }
}

impl FromStr for TimeZoneRule {
    type Err = TzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TzError::Empty);
        }
        if let Ok(tz) = value.parse::<Tz>() {
            return Ok(Self::Named(tz));
        }
        PosixTz::parse(value).map(Self::Posix)
    }
}

impl fmt::Display for TimeZoneRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(tz) => write!(f, "{}", tz.name()),
            Self::Posix(posix) => write!(f, "{}", posix.source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixTz {
    source: String,
    std_name: String,
    std_offset: i32,
    dst: Option<DstRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DstRule {
    name: String,
    offset: i32,
    start: Transition,
    end: Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    date: TransitionDate,
    time_secs: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionDate {
    /// `Mm.w.d`: day `d` (0 = Sunday) of week `w` (5 = last) in month `m`.
    MonthWeekDay { month: u32, week: u32, weekday: u32 },
    /// `Jn`: 1..=365, February 29th is never counted.
    JulianNoLeap(u32),
    /// `n`: 0..=365, leap days counted.
    ZeroBased(u32),
}

impl PosixTz {
    pub fn parse(value: &str) -> Result<Self, TzError> {
        let mut cursor = Cursor::new(value);

        let std_name = cursor.name()?;
        let std_offset = -cursor.offset()?;
        if cursor.is_done() {
            return Ok(Self {
                source: value.to_string(),
                std_name,
                std_offset,
                dst: None,
            });
        }

        let dst_name = cursor.name()?;
        let dst_offset = match cursor.peek() {
            Some(b) if b.is_ascii_digit() || b == b'+' || b == b'-' => -cursor.offset()?,
            _ => std_offset + 3600,
        };

        let (start, end) = if cursor.eat(b',') {
            let start = cursor.transition()?;
            if !cursor.eat(b',') {
                return Err(TzError::Rule(cursor.pos));
            }
            (start, cursor.transition()?)
        } else {
            // US rules, the glibc fallback when no rule is given.
            (
                Transition {
                    date: TransitionDate::MonthWeekDay {
                        month: 3,
                        week: 2,
                        weekday: 0,
                    },
                    time_secs: DEFAULT_TRANSITION_SECS,
                },
                Transition {
                    date: TransitionDate::MonthWeekDay {
                        month: 11,
                        week: 1,
                        weekday: 0,
                    },
                    time_secs: DEFAULT_TRANSITION_SECS,
                },
            )
        };

        if !cursor.is_done() {
            return Err(TzError::Trailing(cursor.pos));
        }

        Ok(Self {
            source: value.to_string(),
            std_name,
            std_offset,
            dst: Some(DstRule {
                name: dst_name,
                offset: dst_offset,
                start,
                end,
            }),
        })
    }

    pub fn utc_offset_secs(&self, epoch_secs: i64) -> i32 {
        match &self.dst {
            Some(dst) if self.is_dst(dst, epoch_secs) => dst.offset,
            _ => self.std_offset,
        }
    }

    pub fn abbreviation(&self, epoch_secs: i64) -> &str {
        match &self.dst {
            Some(dst) if self.is_dst(dst, epoch_secs) => &dst.name,
            _ => &self.std_name,
        }
    }

    fn is_dst(&self, dst: &DstRule, epoch_secs: i64) -> bool {
        let Some(standard_local) =
            DateTime::from_timestamp(epoch_secs + i64::from(self.std_offset), 0)
        else {
            return false;
        };
        let year = standard_local.year();

        // Start is expressed in standard time, end in daylight time.
        let (Some(start_local), Some(end_local)) =
            (dst.start.local_epoch(year), dst.end.local_epoch(year))
        else {
            return false;
        };
        let start_utc = start_local - i64::from(self.std_offset);
        let end_utc = end_local - i64::from(dst.offset);

        if start_utc < end_utc {
            (start_utc..end_utc).contains(&epoch_secs)
        } else {
            !(end_utc..start_utc).contains(&epoch_secs)
        }
    }
}

impl Transition {
    fn local_epoch(&self, year: i32) -> Option<i64> {
        let date = self.date.resolve(year)?;
        let midnight = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
        Some(midnight + i64::from(self.time_secs))
    }
}

impl TransitionDate {
    fn resolve(self, year: i32) -> Option<NaiveDate> {
        match self {
            Self::MonthWeekDay {
                month,
                week,
                weekday,
            } => {
                let first = NaiveDate::from_ymd_opt(year, month, 1)?;
                let first_weekday = first.weekday().num_days_from_sunday();
                let mut day = 1 + (weekday + 7 - first_weekday) % 7 + (week - 1) * 7;
                let month_len = days_in_month(year, month)?;
                while day > month_len {
                    day -= 7;
                }
                NaiveDate::from_ymd_opt(year, month, day)
            }
            Self::JulianNoLeap(day) => {
                let is_leap = NaiveDate::from_ymd_opt(year, 2, 29).is_some();
                let ordinal = if is_leap && day >= 60 { day + 1 } else { day };
                NaiveDate::from_yo_opt(year, ordinal)
            }
            Self::ZeroBased(day) => NaiveDate::from_yo_opt(year, day + 1),
        }
    }
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(value: &'a str) -> Self {
        Self {
            bytes: value.as_bytes(),
            pos: 0,
        }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn name(&mut self) -> Result<String, TzError> {
        let start = self.pos;
        let (from, to) = if self.eat(b'<') {
            let from = self.pos;
            while self.peek().is_some_and(|b| b != b'>') {
                self.pos += 1;
            }
            let to = self.pos;
            if !self.eat(b'>') {
                return Err(TzError::Name(start));
            }
            (from, to)
        } else {
            while self.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
                self.pos += 1;
            }
            (start, self.pos)
        };

        if to - from < 3 {
            return Err(TzError::Name(start));
        }
        Ok(String::from_utf8_lossy(&self.bytes[from..to]).into_owned())
    }

    fn number(&mut self) -> Option<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    /// `[+|-]hh[:mm[:ss]]` in seconds, sign as written (POSIX: west positive).
    fn signed_hms(&mut self) -> Option<i32> {
        let negative = if self.eat(b'-') {
            true
        } else {
            self.eat(b'+');
            false
        };

        let hours = self.number()?;
        let minutes = if self.eat(b':') { self.number()? } else { 0 };
        let seconds = if self.eat(b':') { self.number()? } else { 0 };
        if hours > MAX_HMS_HOURS || minutes > 59 || seconds > 59 {
            return None;
        }

        let total = i32::try_from(hours * 3600 + minutes * 60 + seconds).ok()?;
        Some(if negative { -total } else { total })
    }

    fn offset(&mut self) -> Result<i32, TzError> {
        let start = self.pos;
        match self.signed_hms() {
            Some(secs) if secs.unsigned_abs() <= 24 * 3600 => Ok(secs),
            _ => Err(TzError::Offset(start)),
        }
    }

    fn transition(&mut self) -> Result<Transition, TzError> {
        let start = self.pos;
        let date = match self.peek() {
            Some(b'M') => {
                self.pos += 1;
                let month = self.number();
                let week = self.eat(b'.').then(|| self.number()).flatten();
                let weekday = self.eat(b'.').then(|| self.number()).flatten();
                match (month, week, weekday) {
                    (Some(month @ 1..=12), Some(week @ 1..=5), Some(weekday @ 0..=6)) => {
                        TransitionDate::MonthWeekDay {
                            month,
                            week,
                            weekday,
                        }
                    }
                    _ => return Err(TzError::Rule(start)),
                }
            }
            Some(b'J') => {
                self.pos += 1;
                match self.number() {
                    Some(day @ 1..=365) => TransitionDate::JulianNoLeap(day),
                    _ => return Err(TzError::Rule(start)),
                }
            }
            Some(b) if b.is_ascii_digit() => match self.number() {
                Some(day @ 0..=365) => TransitionDate::ZeroBased(day),
                _ => return Err(TzError::Rule(start)),
            },
            _ => return Err(TzError::Rule(start)),
        };

        let time_secs = if self.eat(b'/') {
            self.signed_hms().ok_or(TzError::Rule(start))?
        } else {
            DEFAULT_TRANSITION_SECS
        };

        Ok(Transition { date, time_secs })
    }
}
