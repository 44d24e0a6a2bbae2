use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One weighing of a finished item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeightRecord {
    pub item_no: String,
    pub date: NaiveDate,
    pub kt: i32,
    pub gross_wt: f64,
    pub net_wt: f64,
    pub pure_gold_weight: f64,
}

/// Metal lost by one karigar at one process stage while working an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LossRecord {
    pub item_no: String,
    pub date: NaiveDate,
    pub kt: i32,
    pub karigar: String,
    pub process: String,
    pub loss: f64,
    pub pure_gold_loss: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Weight,
    Loss,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Weight => "weight",
            RecordKind::Loss => "loss",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown {what} '{value}', expected one of: {expected}")]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
    expected: &'static str,
}

impl FromStr for RecordKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weight" => Ok(RecordKind::Weight),
            "loss" => Ok(RecordKind::Loss),
            _ => Err(ParseEnumError {
                what: "record kind",
                value: s.to_string(),
                expected: "weight, loss",
            }),
        }
    }
}

/// Append adds to what is stored; replace wipes the kind first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    #[default]
    Append,
    Replace,
}

impl UploadMode {
    pub fn from_replace_flag(replace: bool) -> Self {
        if replace {
            UploadMode::Replace
        } else {
            UploadMode::Append
        }
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, UploadMode::Replace)
    }
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMode::Append => f.write_str("append"),
            UploadMode::Replace => f.write_str("replace"),
        }
    }
}

impl FromStr for UploadMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            // "add" is what the upload form has always sent
            "add" | "append" => Ok(UploadMode::Append),
            "replace" => Ok(UploadMode::Replace),
            _ => Err(ParseEnumError {
                what: "upload mode",
                value: s.to_string(),
                expected: "add, append, replace",
            }),
        }
    }
}

/// A normalized batch of one kind of record, in file order.
#[derive(Debug, Clone, PartialEq)]
pub enum Records {
    Weight(Vec<WeightRecord>),
    Loss(Vec<LossRecord>),
}

impl Records {
    pub fn kind(&self) -> RecordKind {
        match self {
            Records::Weight(_) => RecordKind::Weight,
            Records::Loss(_) => RecordKind::Loss,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Records::Weight(rows) => rows.len(),
            Records::Loss(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
