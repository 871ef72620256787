use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::LocusError;

static UCSC_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:\s]+):([\d,]+)-([\d,]+)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResizeAnchor {
    #[default]
    Center,
    Start,
    End,
}

impl fmt::Display for ResizeAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResizeAnchor::Center => write!(f, "center"),
            ResizeAnchor::Start => write!(f, "start"),
            ResizeAnchor::End => write!(f, "end"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixType {
    #[default]
    Observed,
    Expected,
    ObservedOverExpected,
}

impl FromStr for MatrixType {
    type Err = LocusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "observed" => Ok(MatrixType::Observed),
            "expected" => Ok(MatrixType::Expected),
            "oe" => Ok(MatrixType::ObservedOverExpected),
            _ => Err(LocusError::SourceOpen(format!("unknown matrix type: {value}"))),
        }
    }
}

impl fmt::Display for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixType::Observed => write!(f, "observed"),
            MatrixType::Expected => write!(f, "expected"),
            MatrixType::ObservedOverExpected => write!(f, "oe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixUnit {
    #[default]
    Bp,
    Frag,
}

impl FromStr for MatrixUnit {
    type Err = LocusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BP" => Ok(MatrixUnit::Bp),
            "FRAG" => Ok(MatrixUnit::Frag),
            _ => Err(LocusError::SourceOpen(format!("unknown matrix unit: {value}"))),
        }
    }
}

impl fmt::Display for MatrixUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixUnit::Bp => write!(f, "BP"),
            MatrixUnit::Frag => write!(f, "FRAG"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locus {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
}

impl Locus {
    pub fn new(chrom: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            end,
        }
    }

    pub fn width(&self) -> i64 {
        self.end - self.start
    }

    pub fn resize(&self, size: i64, anchor: ResizeAnchor) -> Result<Self, LocusError> {
        let overflow = || LocusError::InvalidLocus(format!("cannot resize {self} to {size} bp"));
        let (start, end) = match anchor {
            ResizeAnchor::Center => {
                let center = self.start.div_euclid(2)
                    + self.end.div_euclid(2)
                    + (self.start.rem_euclid(2) + self.end.rem_euclid(2)) / 2;
                let start = center.checked_sub(size.div_euclid(2)).ok_or_else(overflow)?;
                (start, start.checked_add(size).ok_or_else(overflow)?)
            }
            ResizeAnchor::Start => (self.end.checked_sub(size).ok_or_else(overflow)?, self.end),
            ResizeAnchor::End => (self.start, self.start.checked_add(size).ok_or_else(overflow)?),
        };
        Ok(Self {
            chrom: self.chrom.clone(),
            start,
            end,
        })
    }
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

impl FromStr for Locus {
    type Err = LocusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let caps = UCSC_RANGE
            .captures(value.trim())
            .ok_or_else(|| LocusError::InvalidLocus(value.to_string()))?;
        let coordinate = |idx: usize| -> Result<i64, LocusError> {
            caps[idx]
                .replace(',', "")
                .parse()
                .map_err(|_| LocusError::InvalidLocus(value.to_string()))
        };
        Ok(Self {
            chrom: caps[1].to_string(),
            start: coordinate(2)?,
            end: coordinate(3)?,
        })
    }
}
