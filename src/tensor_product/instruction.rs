//! Instructions: which irreps are coupled, and how their channels connect.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TpError};

/// How the multiplicity channels of the two inputs and the output are wired.
///
/// The letters name the channel index of input 1, input 2 and the output:
/// a repeated letter means the channel is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Every `(u, v, w)` combination has its own weight.
    #[default]
    Uvw,
    /// Output channel `u` follows input-1 channel `u`, summed over `v`.
    Uvu,
    /// Output channel `v` follows input-2 channel `v`, summed over `u`.
    Uvv,
    /// Input channels are paired, then mixed into the output channels.
    Uuw,
    /// Everything shares one channel index, one scalar weight per channel.
    Uuu,
}

impl ConnectionMode {
    pub const ALL: [ConnectionMode; 5] = [
        ConnectionMode::Uvw,
        ConnectionMode::Uvu,
        ConnectionMode::Uvv,
        ConnectionMode::Uuw,
        ConnectionMode::Uuu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionMode::Uvw => "uvw",
            ConnectionMode::Uvu => "uvu",
            ConnectionMode::Uvv => "uvv",
            ConnectionMode::Uuw => "uuw",
            ConnectionMode::Uuu => "uuu",
        }
    }

    /// Shape of the weight slice for multiplicities `(m1, m2, m3)`.
    pub fn weight_shape(self, m1: usize, m2: usize, m3: usize) -> Vec<usize> {
        match self {
            ConnectionMode::Uvw => vec![m1, m2, m3],
            ConnectionMode::Uvu | ConnectionMode::Uvv => vec![m1, m2],
            ConnectionMode::Uuw => vec![m1, m3],
            ConnectionMode::Uuu => vec![m1],
        }
    }

    /// Number of terms summed into one output component.
    pub fn paths(self, m1: usize, m2: usize, has_weight: bool) -> usize {
        match self {
            ConnectionMode::Uvw if has_weight => m1 * m2,
            ConnectionMode::Uvw => 1,
            ConnectionMode::Uvu => m2,
            ConnectionMode::Uvv | ConnectionMode::Uuw => m1,
            ConnectionMode::Uuu => 1,
        }
    }

    /// Check that multiplicities fit the wiring; the error says why not.
    pub fn check_multiplicities(
        self,
        m1: usize,
        m2: usize,
        m3: usize,
        has_weight: bool,
    ) -> std::result::Result<(), String> {
        let ok = match self {
            ConnectionMode::Uvw => has_weight || m3 == m1 * m2,
            ConnectionMode::Uvu => m3 == m1,
            ConnectionMode::Uvv => m3 == m2,
            ConnectionMode::Uuw => m1 == m2,
            ConnectionMode::Uuu => m1 == m2 && m2 == m3,
        };
        if ok {
            return Ok(());
        }
        Err(match self {
            ConnectionMode::Uvw => format!("unweighted uvw needs mul_out = {m1} x {m2}, got {m3}"),
            ConnectionMode::Uvu => format!("uvu needs mul_out = mul_in1 = {m1}, got {m3}"),
            ConnectionMode::Uvv => format!("uvv needs mul_out = mul_in2 = {m2}, got {m3}"),
            ConnectionMode::Uuw => format!("uuw needs mul_in1 = mul_in2, got {m1} and {m2}"),
            ConnectionMode::Uuu => format!("uuu needs equal multiplicities, got {m1}, {m2}, {m3}"),
        })
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = TpError;

    fn from_str(s: &str) -> Result<Self> {
        ConnectionMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| TpError::config(format!("unknown connection mode '{s}'")))
    }
}

/// A requested instruction, before path weights are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstructionSpec {
    pub i1: usize,
    pub i2: usize,
    pub i3: usize,
    pub mode: ConnectionMode,
    pub has_weight: bool,
    /// Extra multiplier applied on top of normalization.
    pub path_weight: f64,
}

impl InstructionSpec {
    pub fn new(i1: usize, i2: usize, i3: usize, mode: ConnectionMode) -> Self {
        Self {
            i1,
            i2,
            i3,
            mode,
            has_weight: true,
            path_weight: 1.0,
        }
    }

    pub fn without_weight(mut self) -> Self {
        self.has_weight = false;
        self
    }

    pub fn with_path_weight(mut self, path_weight: f64) -> Self {
        self.path_weight = path_weight;
        self
    }
}

impl From<(usize, usize, usize, ConnectionMode)> for InstructionSpec {
    fn from((i1, i2, i3, mode): (usize, usize, usize, ConnectionMode)) -> Self {
        Self::new(i1, i2, i3, mode)
    }
}

impl TryFrom<(usize, usize, usize, &str)> for InstructionSpec {
    type Error = TpError;

    fn try_from((i1, i2, i3, mode): (usize, usize, usize, &str)) -> Result<Self> {
        Ok(Self::new(i1, i2, i3, mode.parse()?))
    }
}

impl fmt::Display for InstructionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.i1, self.i2, self.i3, self.mode)
    }
}

/// A validated instruction with its final path weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub i1: usize,
    pub i2: usize,
    pub i3: usize,
    pub mode: ConnectionMode,
    pub has_weight: bool,
    pub path_weight: f64,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}{}) x {:.6}",
            self.i1,
            self.i2,
            self.i3,
            self.mode,
            if self.has_weight { "" } else { ", fixed" },
            self.path_weight
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_tags() {
        for mode in ConnectionMode::ALL {
            assert_eq!(mode.as_str().parse::<ConnectionMode>().unwrap(), mode);
        }
        let err = "uvx".parse::<ConnectionMode>().unwrap_err();
        assert!(matches!(err, TpError::Configuration(_)));
    }

    #[test]
    fn test_weight_shapes() {
        assert_eq!(ConnectionMode::Uvw.weight_shape(2, 3, 4), vec![2, 3, 4]);
        assert_eq!(ConnectionMode::Uvu.weight_shape(2, 3, 2), vec![2, 3]);
        assert_eq!(ConnectionMode::Uuw.weight_shape(2, 2, 4), vec![2, 4]);
        assert_eq!(ConnectionMode::Uuu.weight_shape(4, 4, 4), vec![4]);
    }

    #[test]
    fn test_multiplicity_checks() {
        assert!(ConnectionMode::Uuu.check_multiplicities(4, 4, 4, true).is_ok());
        assert!(ConnectionMode::Uuu.check_multiplicities(4, 4, 3, true).is_err());
        assert!(ConnectionMode::Uvw.check_multiplicities(2, 3, 5, true).is_ok());
        assert!(ConnectionMode::Uvw.check_multiplicities(2, 3, 5, false).is_err());
        assert!(ConnectionMode::Uvw.check_multiplicities(2, 3, 6, false).is_ok());
    }

    #[test]
    fn test_spec_from_tuple() {
        let spec = InstructionSpec::try_from((0, 1, 0, "uvw")).unwrap();
        assert_eq!(spec, InstructionSpec::new(0, 1, 0, ConnectionMode::Uvw));
        assert!(InstructionSpec::try_from((0, 1, 0, "vvv")).is_err());
    }
}
