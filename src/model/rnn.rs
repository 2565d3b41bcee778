//! RNN specification: size, direction and cell type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which way the encoder reads its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
    Both,
}

/// Recurrent transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    /// GRU with the reset gate applied before the recurrent projection.
    Gru,
    /// GRU with the reset gate applied after the recurrent projection.
    NematusGru,
    Lstm,
}

impl FromStr for Direction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Self::Forward),
            "backward" => Ok(Self::Backward),
            "both" => Ok(Self::Both),
            other => Err(ConfigError::InvalidDirection(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl FromStr for CellType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GRU" => Ok(Self::Gru),
            "NematusGRU" => Ok(Self::NematusGru),
            "LSTM" => Ok(Self::Lstm),
            other => Err(ConfigError::InvalidCellType(other.to_string())),
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gru => write!(f, "GRU"),
            Self::NematusGru => write!(f, "NematusGRU"),
            Self::Lstm => write!(f, "LSTM"),
        }
    }
}

/// Validated RNN settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RnnSpec {
    pub size: usize,
    pub direction: Direction,
    pub cell_type: CellType,
}

impl RnnSpec {
    pub fn new(size: usize, direction: Direction, cell_type: CellType) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::InvalidRnnSize(size));
        }
        Ok(Self {
            size,
            direction,
            cell_type,
        })
    }

    /// Parse direction and cell type from their configuration names.
    pub fn parse(size: usize, direction: &str, cell_type: &str) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::InvalidRnnSize(size));
        }
        Self::new(size, direction.parse()?, cell_type.parse()?)
    }

    /// Width of per-position outputs and of the summary vector.
    pub fn output_size(&self) -> usize {
        match self.direction {
            Direction::Both => 2 * self.size,
            Direction::Forward | Direction::Backward => self.size,
        }
    }
}

/// Reject keep probabilities outside (0, 1].
pub fn check_keep_prob(keep_prob: f64) -> Result<(), ConfigError> {
    if keep_prob <= 0.0 || keep_prob > 1.0 || keep_prob.is_nan() {
        return Err(ConfigError::DropoutOutOfRange(keep_prob));
    }
    Ok(())
}
