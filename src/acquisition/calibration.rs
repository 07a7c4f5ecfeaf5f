//! calibration.rs
//! Calibration Transform: bias + voltage → force/torque conversion.
//!
//! The calibration file of a sensor is located by its serial (`Serial="<name>"`)
//! inside the calibration folder. Its six `UserAxis` rows (Fx..Tz) each hold six
//! gauge coefficients and form the conversion matrix.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use regex::Regex;

use crate::error::{DaqError, Result};

pub trait CalibrationTransform: Send {
    /// Installs the per-gauge zero offset.
    fn bias(&mut self, mean_voltages: &[f32; 6]);
    fn convert(&self, voltages: &[f32; 6]) -> [f32; 6];
}

/// Returns the first file in `folder` that declares `Serial="<sensor_name>"`.
pub fn find_calibration_file(folder: &Path, sensor_name: &str) -> Result<PathBuf> {
    let needle = format!("Serial=\"{}\"", sensor_name);
    let not_found = || DaqError::CalibrationNotFound {
        sensor: sensor_name.to_string(),
        folder: folder.to_path_buf(),
    };

    let mut entries: Vec<PathBuf> = fs::read_dir(folder)
        .map_err(|_| not_found())?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in entries {
        // Binary or unreadable files simply don't match.
        if let Ok(text) = fs::read_to_string(&path) {
            if text.contains(&needle) {
                debug!("calibration for '{}': {:?}", sensor_name, path);
                return Ok(path);
            }
        }
    }
    Err(not_found())
}

/// Voltages pass through unchanged apart from bias removal.
#[derive(Debug, Clone, Default)]
pub struct VoltagePassThrough {
    bias: [f32; 6],
}

impl VoltagePassThrough {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalibrationTransform for VoltagePassThrough {
    fn bias(&mut self, mean_voltages: &[f32; 6]) {
        self.bias = *mean_voltages;
    }

    fn convert(&self, voltages: &[f32; 6]) -> [f32; 6] {
        let mut out = *voltages;
        for (v, b) in out.iter_mut().zip(self.bias.iter()) {
            *v -= b;
        }
        out
    }
}

/// Linear calibration: `forces = matrix · (voltages - bias)`.
#[derive(Debug, Clone)]
pub struct MatrixCalibration {
    pub matrix: [[f32; 6]; 6],
    bias: [f32; 6],
}

impl MatrixCalibration {
    pub fn new(matrix: [[f32; 6]; 6]) -> Self {
        Self { matrix, bias: [0.0; 6] }
    }

    pub fn identity() -> Self {
        let mut m = [[0.0; 6]; 6];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self::new(m)
    }

    /// Reads the `UserAxis` rows of an ATI-style calibration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text).map_err(|reason| DaqError::Calibration {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(text: &str) -> std::result::Result<Self, String> {
        let re = Regex::new(r#"UserAxis\s+Name="(\w+)"\s+values="([^"]*)""#)
            .map_err(|e| e.to_string())?;

        let mut matrix = [[0.0f32; 6]; 6];
        let mut seen = [false; 6];
        for cap in re.captures_iter(text) {
            let axis = &cap[1];
            let row = match axis {
                "Fx" => 0,
                "Fy" => 1,
                "Fz" => 2,
                "Tx" => 3,
                "Ty" => 4,
                "Tz" => 5,
                other => return Err(format!("unknown axis '{}'", other)),
            };
            let values: Vec<f32> = cap[2]
                .split_whitespace()
                .map(|v| v.parse::<f32>().map_err(|e| format!("axis {}: {}", axis, e)))
                .collect::<std::result::Result<_, _>>()?;
            if values.len() != 6 {
                return Err(format!("axis {} has {} values, expected 6", axis, values.len()));
            }
            matrix[row].copy_from_slice(&values);
            seen[row] = true;
        }

        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(format!("missing axis #{}", missing));
        }
        Ok(Self::new(matrix))
    }
}

impl CalibrationTransform for MatrixCalibration {
    fn bias(&mut self, mean_voltages: &[f32; 6]) {
        self.bias = *mean_voltages;
    }

    fn convert(&self, voltages: &[f32; 6]) -> [f32; 6] {
        let mut v = [0.0f32; 6];
        for i in 0..6 {
            v[i] = voltages[i] - self.bias[i];
        }
        let mut out = [0.0f32; 6];
        for (r, row) in self.matrix.iter().enumerate() {
            out[r] = row.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
        }
        out
    }
}
