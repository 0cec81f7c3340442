//! JSON model descriptions.
//!
//! A description carries the region grid and the physics kernel:
//!
//! ```json
//! {
//!   "buffer": [[0, 0, 0], [0, 1, 0], [0, 0, 0]],
//!   "controllers": [
//!     { "physics_kernel": "...", "coefficients": { "mu_one": 0.0001 } }
//!   ]
//! }
//! ```
//!
//! `buffer` is rows outer, columns inner: cell `(x, y)` is `buffer[y][x]`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::grid::Grid;

/// One physics controller: kernel source and optional default coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    /// WGSL kernel source.
    pub physics_kernel: String,
    /// Coefficient defaults applied after compilation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub coefficients: BTreeMap<String, f32>,
}

/// Parsed model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Region ids, rows outer.
    pub buffer: Vec<Vec<i32>>,
    /// Physics controllers. The first one drives the engine.
    pub controllers: Vec<Controller>,
}

impl ModelDescription {
    /// Parse and validate a description from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let description: Self = serde_json::from_str(text)
            .map_err(|e| EngineError::model(format!("invalid model description: {e}")))?;
        description.validate()?;
        Ok(description)
    }

    /// Read and parse a description file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::model(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Build a description from a region grid and kernel.
    pub fn new(ids: &Grid<i32>, physics_kernel: impl Into<String>) -> Self {
        let width = ids.width().max(1) as usize;
        Self {
            buffer: ids.as_slice().chunks(width).map(|row| row.to_vec()).collect(),
            controllers: vec![Controller {
                physics_kernel: physics_kernel.into(),
                coefficients: BTreeMap::new(),
            }],
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::model(format!("cannot serialize description: {e}")))
    }

    fn validate(&self) -> Result<()> {
        let width = self.buffer.first().map(Vec::len).unwrap_or(0);
        if width == 0 {
            return Err(EngineError::model("region grid is empty"));
        }
        if let Some((row, cells)) = self
            .buffer
            .iter()
            .enumerate()
            .find(|(_, cells)| cells.len() != width)
        {
            return Err(EngineError::model(format!(
                "region grid is not rectangular: row {row} has {} cells, expected {width}",
                cells.len()
            )));
        }
        if self.controllers.is_empty() {
            return Err(EngineError::model("description has no controllers"));
        }
        Ok(())
    }

    /// Grid width (columns).
    pub fn width(&self) -> u32 {
        self.buffer.first().map(Vec::len).unwrap_or(0) as u32
    }

    /// Grid height (rows).
    pub fn height(&self) -> u32 {
        self.buffer.len() as u32
    }

    /// Region grid as a row-major [`Grid`].
    pub fn region_grid(&self) -> Result<Grid<i32>> {
        let cells: Vec<i32> = self.buffer.iter().flatten().copied().collect();
        Grid::from_vec(self.width(), self.height(), cells)
            .ok_or_else(|| EngineError::model("region grid is not rectangular"))
    }

    /// The driving controller.
    pub fn controller(&self) -> Result<&Controller> {
        self.controllers
            .first()
            .ok_or_else(|| EngineError::model("description has no controllers"))
    }

    /// Kernel source of the driving controller.
    pub fn physics_kernel(&self) -> Result<&str> {
        Ok(self.controller()?.physics_kernel.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimensions() {
        let json = r#"{
            "buffer": [[0, 0, 0, 0], [0, 1, 2, 0], [0, 0, 0, 0]],
            "controllers": [{ "physics_kernel": "// kernel" }]
        }"#;
        let desc = ModelDescription::from_json(json).unwrap();
        assert_eq!(desc.width(), 4);
        assert_eq!(desc.height(), 3);

        let ids = desc.region_grid().unwrap();
        assert_eq!(ids[(1, 1)], 1);
        assert_eq!(ids[(2, 1)], 2);
        assert_eq!(desc.physics_kernel().unwrap(), "// kernel");
        assert!(desc.controller().unwrap().coefficients.is_empty());
    }

    #[test]
    fn test_parse_coefficients() {
        let json = r#"{
            "buffer": [[1]],
            "controllers": [{ "physics_kernel": "", "coefficients": { "mu_one": 0.5 } }]
        }"#;
        let desc = ModelDescription::from_json(json).unwrap();
        assert_eq!(desc.controller().unwrap().coefficients["mu_one"], 0.5);
    }

    #[test]
    fn test_rejects_ragged_grid() {
        let json = r#"{ "buffer": [[0, 0], [0]], "controllers": [{ "physics_kernel": "" }] }"#;
        let err = ModelDescription::from_json(json).unwrap_err();
        assert!(matches!(err, EngineError::ModelLoad(ref msg) if msg.contains("row 1")));
    }

    #[test]
    fn test_rejects_empty_grid() {
        let json = r#"{ "buffer": [], "controllers": [{ "physics_kernel": "" }] }"#;
        assert!(ModelDescription::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_missing_kernel() {
        let json = r#"{ "buffer": [[1]], "controllers": [{}] }"#;
        assert!(matches!(
            ModelDescription::from_json(json),
            Err(EngineError::ModelLoad(_))
        ));

        let json = r#"{ "buffer": [[1]], "controllers": [] }"#;
        assert!(ModelDescription::from_json(json).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ModelDescription::from_file("/nonexistent/membrane.json").unwrap_err();
        assert!(matches!(err, EngineError::ModelLoad(_)));
    }

    #[test]
    fn test_from_grid_layout() {
        let ids = Grid::from_vec(3, 2, vec![0, 1, 0, 2, 2, 2]).unwrap();
        let desc = ModelDescription::new(&ids, "k");
        assert_eq!(desc.buffer, vec![vec![0, 1, 0], vec![2, 2, 2]]);

        let text = desc.to_json().unwrap();
        let parsed = ModelDescription::from_json(&text).unwrap();
        assert_eq!(parsed.region_grid().unwrap(), ids);
    }
}
