//! Half-month period labels of the form `YYYYMM{A|B}`.
//!
//! A covers days 1-15, B covers day 16 through month end. Periods order
//! lexicographically after decomposition into (year, month, half), so a plain
//! derived `Ord` on the decomposed form is sufficient.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which half of the month a period covers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Half {
    /// Days 1-15
    A,
    /// Day 16 through month end
    B,
}

impl Half {
    pub fn as_char(&self) -> char {
        match self {
            Half::A => 'A',
            Half::B => 'B',
        }
    }
}

/// A half-month slice, the pipeline's only calendar unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Period {
    pub year: i32,
    pub month: u32,
    pub half: Half,
}

impl Period {
    /// Create a period, validating the month.
    pub fn new(year: i32, month: u32, half: Half) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(PipelineError::InputError {
                table: "period".to_string(),
                column: format!("month {month} out of range"),
            });
        }
        Ok(Self { year, month, half })
    }

    /// The period immediately before this one.
    pub fn prev(&self) -> Period {
        match self.half {
            Half::B => Period {
                half: Half::A,
                ..*self
            },
            Half::A => {
                if self.month == 1 {
                    Period {
                        year: self.year - 1,
                        month: 12,
                        half: Half::B,
                    }
                } else {
                    Period {
                        year: self.year,
                        month: self.month - 1,
                        half: Half::B,
                    }
                }
            }
        }
    }

    /// The period immediately after this one.
    pub fn next(&self) -> Period {
        match self.half {
            Half::A => Period {
                half: Half::B,
                ..*self
            },
            Half::B => {
                if self.month == 12 {
                    Period {
                        year: self.year + 1,
                        month: 1,
                        half: Half::A,
                    }
                } else {
                    Period {
                        year: self.year,
                        month: self.month + 1,
                        half: Half::A,
                    }
                }
            }
        }
    }

    /// The same half-month one year earlier, for year-over-year windows.
    pub fn year_earlier(&self) -> Period {
        Period {
            year: self.year - 1,
            ..*self
        }
    }

    /// This period and the `n - 1` periods before it, oldest first.
    pub fn window_ending_here(&self, n: usize) -> Vec<Period> {
        let mut out = Vec::with_capacity(n);
        let mut p = *self;
        for _ in 0..n {
            out.push(p);
            p = p.prev();
        }
        out.reverse();
        out
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}{}", self.year, self.month, self.half.as_char())
    }
}

impl FromStr for Period {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || PipelineError::InputError {
            table: "period".to_string(),
            column: format!("malformed label '{s}'"),
        };
        if s.len() != 7 || !s.is_ascii() {
            return Err(malformed());
        }
        let year: i32 = s[0..4].parse().map_err(|_| malformed())?;
        let month: u32 = s[4..6].parse().map_err(|_| malformed())?;
        let half = match &s[6..7] {
            "A" => Half::A,
            "B" => Half::B,
            _ => return Err(malformed()),
        };
        Period::new(year, month, half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format_round_trip() {
        for label in ["202406A", "202406B", "202501A"] {
            let p: Period = label.parse().unwrap();
            assert_eq!(p.to_string(), label);
        }
    }

    #[test]
    fn test_ordering() {
        let a: Period = "202406B".parse().unwrap();
        let b: Period = "202407A".parse().unwrap();
        assert!(a < b);
        assert!("202406A".parse::<Period>().unwrap() < a);
        assert!("202312B".parse::<Period>().unwrap() < a);
    }

    #[test]
    fn test_prev_next_across_boundaries() {
        let p: Period = "202401A".parse().unwrap();
        assert_eq!(p.prev().to_string(), "202312B");
        assert_eq!(p.prev().next(), p);

        let q: Period = "202412B".parse().unwrap();
        assert_eq!(q.next().to_string(), "202501A");
    }

    #[test]
    fn test_window_ending_here() {
        let p: Period = "202407A".parse().unwrap();
        let window = p.window_ending_here(3);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].to_string(), "202406A");
        assert_eq!(window[2].to_string(), "202407A");
    }

    #[test]
    fn test_malformed_labels_rejected() {
        for bad in ["202413A", "20240A", "202406C", "abcdefg", ""] {
            assert!(bad.parse::<Period>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_year_earlier() {
        let p: Period = "202407B".parse().unwrap();
        assert_eq!(p.year_earlier().to_string(), "202307B");
    }
}
