//! Five-field cron expressions as understood by the Kubernetes CronJob controller.
//!
//! Only parsing and evaluation live here; the cluster owns the clock. The model is
//! used to validate a descriptor's schedule and to preview upcoming ticks.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use jiff::civil::{Date, DateTime, Time};
use jiff::tz::TimeZone;
use jiff::{Timestamp, ToSpan};
use thiserror::Error;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronParseError {
    #[error("expected 5 space separated fields, found {0}")]
    FieldCount(usize),

    #[error("{field}: empty list item")]
    EmptyItem { field: &'static str },

    #[error("{field}: '{value}' is not a number")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field}: {value} is outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u8,
        max: u8,
    },

    #[error("{field}: range {start}-{end} is reversed")]
    ReversedRange {
        field: &'static str,
        start: u8,
        end: u8,
    },

    #[error("{field}: step must be greater than zero")]
    ZeroStep { field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
        }
    }

    /// Inclusive bounds accepted while parsing.
    fn bounds(self) -> (u8, u8) {
        match self {
            FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::DayOfMonth => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::DayOfWeek => (0, 7),
        }
    }

    /// Number of distinct values once aliases are folded.
    fn cardinality(self) -> usize {
        match self {
            FieldKind::Minute => 60,
            FieldKind::Hour => 24,
            FieldKind::DayOfMonth => 31,
            FieldKind::Month => 12,
            FieldKind::DayOfWeek => 7,
        }
    }

    fn names(self) -> Option<(&'static [&'static str], u8)> {
        match self {
            FieldKind::Month => Some((&MONTH_NAMES, 1)),
            FieldKind::DayOfWeek => Some((&WEEKDAY_NAMES, 0)),
            _ => None,
        }
    }
}

/// The set of values one field allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronField {
    values: BTreeSet<u8>,
    /// Holds a bare `*` or `?` item (or one stepped by 1); decides how the two day
    /// fields combine.
    star: bool,
    kind: FieldKind,
}

impl CronField {
    fn parse(text: &str, kind: FieldKind) -> Result<Self, CronParseError> {
        let mut values = BTreeSet::new();
        let mut star = false;
        for item in text.split(',') {
            let (item_values, item_star) = parse_item(item, kind)?;
            values.extend(item_values);
            star |= item_star;
        }
        if kind == FieldKind::DayOfWeek && values.remove(&7) {
            values.insert(0);
        }
        Ok(CronField {
            values,
            star,
            kind,
        })
    }

    pub fn values(&self) -> impl Iterator<Item = u8> + '_ {
        self.values.iter().copied()
    }

    /// Whether every possible value is allowed.
    pub fn is_full(&self) -> bool {
        self.values.len() == self.kind.cardinality()
    }

    pub fn contains(&self, value: i8) -> bool {
        u8::try_from(value).is_ok_and(|v| self.values.contains(&v))
    }
}

fn parse_item(item: &str, kind: FieldKind) -> Result<(Vec<u8>, bool), CronParseError> {
    let field = kind.name();
    if item.is_empty() {
        return Err(CronParseError::EmptyItem { field });
    }
    let (min, max) = kind.bounds();

    let (range, step) = match item.split_once('/') {
        Some((range, step)) => {
            let step = parse_number(step, kind)?;
            if step == 0 {
                return Err(CronParseError::ZeroStep { field });
            }
            (range, Some(step))
        }
        None => (item, None),
    };

    let wildcard = range == "*" || range == "?";
    let (start, end) = if wildcard {
        (min, max)
    } else if let Some((start, end)) = range.split_once('-') {
        let start = parse_value(start, kind)?;
        let end = parse_value(end, kind)?;
        if start > end {
            return Err(CronParseError::ReversedRange { field, start, end });
        }
        (start, end)
    } else {
        let value = parse_value(range, kind)?;
        match step {
            Some(_) => (value, max),
            None => (value, value),
        }
    };

    let step = step.unwrap_or(1);
    let star = wildcard && step == 1;
    let step = usize::try_from(step).unwrap_or(usize::MAX);
    Ok(((start..=end).step_by(step).collect(), star))
}

fn parse_number(text: &str, kind: FieldKind) -> Result<u32, CronParseError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CronParseError::InvalidValue {
            field: kind.name(),
            value: text.to_string(),
        });
    }
    text.parse().map_err(|_| CronParseError::InvalidValue {
        field: kind.name(),
        value: text.to_string(),
    })
}

fn parse_value(text: &str, kind: FieldKind) -> Result<u8, CronParseError> {
    if let Some((names, offset)) = kind.names() {
        let lower = text.to_ascii_lowercase();
        if let Some(index) = names.iter().position(|name| *name == lower) {
            return Ok(index as u8 + offset);
        }
    }
    let (min, max) = kind.bounds();
    let value = parse_number(text, kind)?;
    match u8::try_from(value) {
        Ok(v) if (min..=max).contains(&v) => Ok(v),
        _ => Err(CronParseError::OutOfRange {
            field: kind.name(),
            value,
            min,
            max,
        }),
    }
}

/// A parsed `minute hour day-of-month month day-of-week` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    pub minutes: CronField,
    pub hours: CronField,
    pub days_of_month: CronField,
    pub months: CronField,
    pub days_of_week: CronField,
}

impl FromStr for CronSchedule {
    type Err = CronParseError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields[..] else {
            return Err(CronParseError::FieldCount(fields.len()));
        };
        Ok(CronSchedule {
            source: fields.join(" "),
            minutes: CronField::parse(minute, FieldKind::Minute)?,
            hours: CronField::parse(hour, FieldKind::Hour)?,
            days_of_month: CronField::parse(dom, FieldKind::DayOfMonth)?,
            months: CronField::parse(month, FieldKind::Month)?,
            days_of_week: CronField::parse(dow, FieldKind::DayOfWeek)?,
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl CronSchedule {
    /// The constant period between ticks, when the schedule has one.
    ///
    /// Recognizes minutes evenly spaced around the hour, or a single minute with
    /// hours evenly spaced around the day, with all day fields unrestricted.
    pub fn fixed_interval(&self) -> Option<Duration> {
        let every_day =
            self.days_of_month.is_full() && self.months.is_full() && self.days_of_week.is_full();
        if !every_day {
            return None;
        }
        if self.hours.is_full() {
            return even_spacing(&self.minutes, 60).map(|m| Duration::from_secs(u64::from(m) * 60));
        }
        if self.minutes.values.len() == 1 {
            return even_spacing(&self.hours, 24)
                .map(|h| Duration::from_secs(u64::from(h) * 3600));
        }
        None
    }

    pub fn matches(&self, at: DateTime) -> bool {
        self.minutes.contains(at.minute())
            && self.hours.contains(at.hour())
            && self.months.contains(at.month())
            && self.day_matches(at.date())
    }

    fn day_matches(&self, date: Date) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().to_sunday_zero_offset());
        if self.days_of_month.star || self.days_of_week.star {
            dom && dow
        } else {
            dom || dow
        }
    }

    /// The first matching minute strictly after `after`, looking at most four years ahead.
    pub fn next_after(&self, after: DateTime) -> Option<DateTime> {
        let start = after
            .with()
            .second(0)
            .subsec_nanosecond(0)
            .build()
            .ok()?
            .checked_add(1.minute())
            .ok()?;
        let horizon = start.checked_add(4.years()).ok()?;

        let mut t = start;
        while t < horizon {
            if !self.months.contains(t.month()) || !self.day_matches(t.date()) {
                t = t.date().tomorrow().ok()?.to_datetime(Time::midnight());
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.with().minute(0).build().ok()?.checked_add(1.hour()).ok()?;
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t = t.checked_add(1.minute()).ok()?;
                continue;
            }
            return Some(t);
        }
        None
    }

    /// Ticks strictly after `after`, with the fields read as wall-clock time in `zone`.
    ///
    /// Wall-clock times skipped by a DST gap resolve to the instant after the gap;
    /// ticks that would not move forward in absolute time are dropped.
    pub fn upcoming<'a>(
        &'a self,
        after: Timestamp,
        zone: &TimeZone,
    ) -> impl Iterator<Item = Timestamp> + 'a {
        let zone = zone.clone();
        let mut civil = zone.to_datetime(after);
        let mut last = after;
        std::iter::from_fn(move || {
            loop {
                civil = self.next_after(civil)?;
                let tick = zone.to_ambiguous_zoned(civil).compatible().ok()?.timestamp();
                if tick > last {
                    last = tick;
                    return Some(tick);
                }
            }
        })
    }
}

fn even_spacing(field: &CronField, modulus: u32) -> Option<u32> {
    let values: Vec<u32> = field.values().map(u32::from).collect();
    let first = *values.first()?;
    let last = *values.last()?;
    let mut gaps = values
        .windows(2)
        .map(|w| w[1] - w[0])
        .chain(std::iter::once(modulus - last + first));
    let gap = gaps.next()?;
    gaps.all(|g| g == gap).then_some(gap)
}
