//! Tensor-product configuration.
//!
//! [`TensorProductConfig`] collects the construction options shared by every
//! tensor-product flavour. It is serializable so that a model description can
//! carry it around as JSON.
//!
//! ```rust
//! use clebsch::{Normalization, TensorProductConfig};
//!
//! let cfg = TensorProductConfig::from_json(r#"{ "normalization": "norm" }"#).unwrap();
//! assert_eq!(cfg.normalization, Normalization::Norm);
//! assert!(cfg.specialized_code);
//! ```

use std::fmt;
use std::str::FromStr;

use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TpError};

/// How irrep components are expected to be scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Every component has unit variance.
    #[default]
    Component,
    /// Every irrep vector has unit expected norm.
    Norm,
}

impl Normalization {
    /// Extra factor applied to a component-normalized coupling of
    /// `(l1, l2, l3)` under this convention.
    pub fn path_factor(self, l1: u32, l2: u32, l3: u32) -> f64 {
        match self {
            Normalization::Component => 1.0,
            Normalization::Norm => {
                let (d1, d2, d3) = ((2 * l1 + 1) as f64, (2 * l2 + 1) as f64, (2 * l3 + 1) as f64);
                (d1 * d2 / d3).sqrt()
            }
        }
    }

    /// Standard deviation of a single component of degree `l`.
    pub fn component_std(self, l: u32) -> f64 {
        match self {
            Normalization::Component => 1.0,
            Normalization::Norm => 1.0 / ((2 * l + 1) as f64).sqrt(),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalization::Component => write!(f, "component"),
            Normalization::Norm => write!(f, "norm"),
        }
    }
}

impl FromStr for Normalization {
    type Err = TpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "component" => Ok(Normalization::Component),
            "norm" => Ok(Normalization::Norm),
            other => Err(TpError::config(format!("unknown normalization '{other}'"))),
        }
    }
}

/// Floating-point precision of weights and coupling tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    #[default]
    F64,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F64 => DType::F64,
        }
    }
}

/// Construction options for tensor products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorProductConfig {
    /// Component or norm normalization. Default: **component**.
    pub normalization: Normalization,
    /// Divide every path by the square root of its output fan-in. Default: **true**.
    pub path_normalization: bool,
    /// Allocate a learnable weight owned by the module. Default: **true**.
    pub own_weight: bool,
    /// Use the shape-specialized kernels where available. Default: **true**.
    pub specialized_code: bool,
    /// Precision of weights and coupling tensors. Default: **f64**.
    pub precision: Precision,
}

impl Default for TensorProductConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::Component,
            path_normalization: true,
            own_weight: true,
            specialized_code: true,
            precision: Precision::F64,
        }
    }
}

impl TensorProductConfig {
    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_path_normalization(mut self, enabled: bool) -> Self {
        self.path_normalization = enabled;
        self
    }

    pub fn with_own_weight(mut self, own_weight: bool) -> Self {
        self.own_weight = own_weight;
        self
    }

    pub fn with_specialized_code(mut self, specialized: bool) -> Self {
        self.specialized_code = specialized;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn dtype(&self) -> DType {
        self.precision.dtype()
    }

    /// Parse a config from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
