use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CandleError;

/// Candle interval. Names follow the OANDA granularity codes.
///
/// Strides are fixed, so monthly candles are not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resolution {
    S5,
    S10,
    S15,
    S30,
    M1,
    M2,
    M4,
    M5,
    M10,
    M15,
    M30,
    H1,
    H2,
    H3,
    H4,
    H6,
    H8,
    H12,
    D,
    W,
}

impl Resolution {
    pub const ALL: [Resolution; 20] = [
        Resolution::S5,
        Resolution::S10,
        Resolution::S15,
        Resolution::S30,
        Resolution::M1,
        Resolution::M2,
        Resolution::M4,
        Resolution::M5,
        Resolution::M10,
        Resolution::M15,
        Resolution::M30,
        Resolution::H1,
        Resolution::H2,
        Resolution::H3,
        Resolution::H4,
        Resolution::H6,
        Resolution::H8,
        Resolution::H12,
        Resolution::D,
        Resolution::W,
    ];

    /// Length of one candle in seconds.
    pub const fn seconds(self) -> i64 {
        match self {
            Resolution::S5 => 5,
            Resolution::S10 => 10,
            Resolution::S15 => 15,
            Resolution::S30 => 30,
            Resolution::M1 => 60,
            Resolution::M2 => 120,
            Resolution::M4 => 240,
            Resolution::M5 => 300,
            Resolution::M10 => 600,
            Resolution::M15 => 900,
            Resolution::M30 => 1_800,
            Resolution::H1 => 3_600,
            Resolution::H2 => 7_200,
            Resolution::H3 => 10_800,
            Resolution::H4 => 14_400,
            Resolution::H6 => 21_600,
            Resolution::H8 => 28_800,
            Resolution::H12 => 43_200,
            Resolution::D => 86_400,
            Resolution::W => 604_800,
        }
    }

    pub fn stride(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    pub const fn code(self) -> &'static str {
        match self {
            Resolution::S5 => "S5",
            Resolution::S10 => "S10",
            Resolution::S15 => "S15",
            Resolution::S30 => "S30",
            Resolution::M1 => "M1",
            Resolution::M2 => "M2",
            Resolution::M4 => "M4",
            Resolution::M5 => "M5",
            Resolution::M10 => "M10",
            Resolution::M15 => "M15",
            Resolution::M30 => "M30",
            Resolution::H1 => "H1",
            Resolution::H2 => "H2",
            Resolution::H3 => "H3",
            Resolution::H4 => "H4",
            Resolution::H6 => "H6",
            Resolution::H8 => "H8",
            Resolution::H12 => "H12",
            Resolution::D => "D",
            Resolution::W => "W",
        }
    }

    /// True when `ts` sits exactly on an epoch-aligned stride boundary.
    pub fn is_aligned(self, ts: DateTime<Utc>) -> bool {
        ts.timestamp_subsec_nanos() == 0 && ts.timestamp().rem_euclid(self.seconds()) == 0
    }

    /// Round down to the stride boundary at or before `ts`.
    pub fn floor(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let floored = secs - secs.rem_euclid(self.seconds());
        DateTime::from_timestamp(floored, 0).unwrap_or(ts)
    }

    /// Round up to the stride boundary at or after `ts`.
    pub fn ceil(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_aligned(ts) {
            return ts;
        }
        self.floor(ts) + self.stride()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Resolution {
    type Err = CandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Resolution::ALL
            .into_iter()
            .find(|r| r.code() == wanted)
            .ok_or_else(|| CandleError::Validation(format!("unsupported resolution: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("m1".parse::<Resolution>().unwrap(), Resolution::M1);
        assert_eq!("H12".parse::<Resolution>().unwrap(), Resolution::H12);
        assert_eq!(" d ".parse::<Resolution>().unwrap(), Resolution::D);
    }

    #[test]
    fn parse_rejects_monthly() {
        assert!("M".parse::<Resolution>().is_err());
        assert!("1m".parse::<Resolution>().is_err());
    }

    #[test]
    fn strides() {
        assert_eq!(Resolution::M15.seconds(), 900);
        assert_eq!(Resolution::W.stride(), Duration::days(7));
    }

    #[test]
    fn alignment_checks() {
        let aligned = Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap();
        let off = Utc.with_ymd_and_hms(2025, 1, 15, 14, 31, 30).unwrap();

        assert!(Resolution::M5.is_aligned(aligned));
        assert!(!Resolution::M5.is_aligned(off));
        assert!(!Resolution::H1.is_aligned(aligned));
    }

    #[test]
    fn floor_and_ceil() {
        let off = Utc.with_ymd_and_hms(2025, 1, 15, 14, 31, 30).unwrap();

        assert_eq!(
            Resolution::M5.floor(off),
            Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap()
        );
        assert_eq!(
            Resolution::M5.ceil(off),
            Utc.with_ymd_and_hms(2025, 1, 15, 14, 35, 0).unwrap()
        );

        let aligned = Utc.with_ymd_and_hms(2025, 1, 15, 14, 35, 0).unwrap();
        assert_eq!(Resolution::M5.ceil(aligned), aligned);
    }

    #[test]
    fn serde_uses_codes() {
        let json = serde_json::to_string(&Resolution::M15).unwrap();
        assert_eq!(json, "\"M15\"");
        let back: Resolution = serde_json::from_str("\"H4\"").unwrap();
        assert_eq!(back, Resolution::H4);
    }
}
