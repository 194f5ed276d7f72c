use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ReconError;

/// 申报期间 (税期), 规范格式 `MMYYYY`, 同时接受 `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReturnPeriod {
    start: NaiveDate,
}

impl ReturnPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, ReconError> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|start| Self { start })
            .ok_or_else(|| ReconError::Validation(format!("invalid return period {month:02}/{year}")))
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }

    pub fn month(&self) -> u32 {
        self.start.month()
    }

    /// 期间首日
    pub fn first_day(&self) -> NaiveDate {
        self.start
    }

    /// 期间末日
    pub fn last_day(&self) -> NaiveDate {
        self.start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(self.start)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.first_day() && date <= self.last_day()
    }
}

impl fmt::Display for ReturnPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:04}", self.month(), self.year())
    }
}

impl FromStr for ReturnPeriod {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ReconError::Validation(format!("invalid return period '{s}', expected MMYYYY or YYYY-MM"));

        let (year, month) = if s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit()) {
            (&s[2..6], &s[0..2])
        } else if let Some((year, month)) = s.split_once('-') {
            (year, month)
        } else {
            return Err(invalid());
        };

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for ReturnPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReturnPeriod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
