//! Cluster layout loading and file I/O operations.

use super::types::ClusterLayout;
use crate::ClusterError;
use std::path::Path;

/// Layout loader with file I/O operations.
pub struct LayoutLoader;

impl LayoutLoader {
    /// Load a layout from a file path.
    /// Supports both JSON (.json) and YAML (.yaml/.yml) formats based on file extension.
    #[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<ClusterLayout, ClusterError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClusterError::from_io_error(e, "layout loading"))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        let layout: ClusterLayout = match extension.to_lowercase().as_str() {
            "json" => serde_json::from_str(&content)
                .map_err(|e| ClusterError::from_parse_error(e, "JSON layout parsing"))?,
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| ClusterError::from_parse_error(e, "YAML layout parsing"))?,
            _ => serde_json::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .map_err(|e| {
                    ClusterError::from_parse_error(e, "layout parsing (tried both JSON and YAML)")
                })?,
        };

        layout.validate()?;
        Ok(layout)
    }
}
