//! Compiler settings
//!
//! Settings come from an optional TOML file; every section and field falls
//! back to its default when absent.
//!
//! ```toml
//! [fpaa]
//! voltage_limit = 1.0
//! cab_count = 64
//!
//! [simulation]
//! step = 0.01
//! scaled = true
//! real_units = true
//!
//! [clustering]
//! enabled = true
//! max_distance = 4
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterConfig;
use crate::error::{CompileError, CompileResult};
use crate::hardware::FpaaConfig;
use crate::simulator::SimulationConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub fpaa: FpaaConfig,
    pub simulation: SimulationConfig,
    pub clustering: ClusterConfig,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> CompileResult<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| CompileError::settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> CompileResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CompileError::settings(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> CompileResult<String> {
        toml::to_string_pretty(self).map_err(|e| CompileError::settings(e.to_string()))
    }

    fn validate(&self) -> CompileResult<()> {
        if !(self.fpaa.voltage_limit.is_finite() && self.fpaa.voltage_limit > 0.0) {
            return Err(CompileError::settings(format!(
                "voltage_limit must be positive, got {}",
                self.fpaa.voltage_limit
            )));
        }
        if !(self.simulation.step.is_finite() && self.simulation.step > 0.0) {
            return Err(CompileError::settings(format!(
                "step must be positive, got {}",
                self.simulation.step
            )));
        }
        Ok(())
    }
}
