//! Run configuration read from a model's JSON file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::foundation::error::{CardError, CardResult};
use crate::naming::output_pattern;

/// Sheet packing options, consumed verbatim by the planner.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ImpositionSettings {
    pub enabled: bool,
    pub target_w_mm: f64,
    pub target_h_mm: f64,
    /// Hand the produced files to the print queue once the run finishes.
    pub print_after_generation: bool,
}

impl ImpositionSettings {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn sheets(target_w_mm: f64, target_h_mm: f64) -> Self {
        Self {
            enabled: true,
            target_w_mm,
            target_h_mm,
            print_after_generation: false,
        }
    }

    pub fn with_print_after_generation(mut self, on: bool) -> Self {
        self.print_after_generation = on;
        self
    }

    /// Target sizes only matter when imposition is on.
    pub fn validate(&self) -> CardResult<()> {
        if !self.enabled {
            return Ok(());
        }
        for (name, v) in [
            ("target_w_mm", self.target_w_mm),
            ("target_h_mm", self.target_h_mm),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(CardError::validation(format!(
                    "imposition {name} must be finite and > 0, got {v}"
                )));
            }
        }
        Ok(())
    }
}

/// The parts of a model file the batch core cares about. Other fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub output_suffix: Option<String>,
    #[serde(default)]
    pub imposition_settings: Option<ImpositionSettings>,
}

impl ModelConfig {
    pub fn from_json_str(s: &str) -> CardResult<Self> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| CardError::serde(e.to_string()))?;
        cfg.imposition().validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> CardResult<Self> {
        let f = File::open(path).map_err(|e| {
            CardError::planning(format!("open model config '{}': {e}", path.display()))
        })?;
        let cfg: Self = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| CardError::serde(format!("parse '{}': {e}", path.display())))?;
        cfg.imposition().validate()?;
        Ok(cfg)
    }

    /// Imposition settings, disabled when the file carries none.
    pub fn imposition(&self) -> ImpositionSettings {
        self.imposition_settings.unwrap_or_default()
    }

    /// Naming pattern for outputs of the model with slug `model_slug`.
    pub fn naming_pattern(&self, model_slug: &str) -> String {
        output_pattern(model_slug, self.output_suffix.as_deref())
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
