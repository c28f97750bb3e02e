use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub extraction: ExtractionConfig,
    pub vision: VisionConfig,
    pub matching: MatchingConfig,
    pub annotation: AnnotationConfig,
    pub reporting: ReportingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Tier-1 results at or above this confidence skip the vision fallback
    pub confidence_threshold: f64,

    /// Characters of raw text kept on the extraction
    pub raw_text_limit: usize,

    /// Rows scanned from the top of a table when looking for the header
    pub header_scan_rows: usize,

    /// Vertical tolerance (pt) when regrouping cell boxes into rows
    pub row_merge_tolerance: f32,

    /// Fixed confidence assigned to the text-line fallback
    pub text_confidence: f64,

    /// Vertical tolerance (pt) when grouping text segments into table rows
    pub table_row_tolerance: f32,

    /// Vertical gap (pt) that ends a table region
    pub table_max_row_gap: f32,

    /// Minimum cells per row for the row to count as tabular
    pub table_min_columns: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            raw_text_limit: 5000,
            header_scan_rows: 8,
            row_merge_tolerance: 2.0,
            text_confidence: 0.5,
            table_row_tolerance: 3.0,
            table_max_row_gap: 24.0,
            table_min_columns: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub enabled: bool,
    pub model: String,
    pub endpoint: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    pub timeout_secs: u64,
    pub render_dpi: u32,
    pub max_output_tokens: u32,
    pub confidence: f64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gemini-2.0-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 120,
            render_dpi: 200,
            max_output_tokens: 4096,
            confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Largest absolute price difference still treated as a match
    pub price_tolerance: f64,

    /// Both serials need at least this many characters for a containment match
    pub min_partial_serial_len: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            price_tolerance: 0.01,
            min_partial_serial_len: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Directory holding `Approved_stamp.png`, `Rejected_stamp.png` and `Inconclusive_stamp.png`
    pub stamps_dir: Option<PathBuf>,
    pub stamp_width: f32,
    pub icon_size: f32,
    pub icon_margin: f32,
    pub comment_font_size: f32,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            stamps_dir: None,
            stamp_width: 150.0,
            icon_size: 14.0,
            icon_margin: 4.0,
            comment_font_size: 7.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub json_report: Option<PathBuf>,
    pub csv_report: Option<PathBuf>,
}

impl ValidatorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        let config: ValidatorConfig =
            toml::from_str(&content).map_err(|e| anyhow!("Failed to parse config file: {}", e))?;

        Ok(config)
    }

    pub fn load_from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Override fields from `PO_VALIDATOR_*` variables resolved through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PO_VALIDATOR_CONFIDENCE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.extraction.confidence_threshold = value;
        }

        if let Some(enabled) = lookup("PO_VALIDATOR_VISION_ENABLED") {
            self.vision.enabled = enabled.to_lowercase() == "true";
        }

        if let Some(model) = lookup("PO_VALIDATOR_VISION_MODEL").filter(|m| !m.is_empty()) {
            self.vision.model = model;
        }

        if let Some(endpoint) = lookup("PO_VALIDATOR_VISION_ENDPOINT").filter(|m| !m.is_empty()) {
            self.vision.endpoint = endpoint;
        }

        if let Some(secs) = lookup("PO_VALIDATOR_VISION_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.vision.timeout_secs = secs;
        }

        if let Some(value) = lookup("PO_VALIDATOR_PRICE_TOLERANCE").and_then(|v| v.parse().ok()) {
            self.matching.price_tolerance = value;
        }

        if let Some(len) = lookup("PO_VALIDATOR_MIN_PARTIAL_SERIAL_LEN").and_then(|v| v.parse().ok()) {
            self.matching.min_partial_serial_len = len;
        }

        if let Some(dir) = lookup("PO_VALIDATOR_STAMPS_DIR").filter(|d| !d.is_empty()) {
            self.annotation.stamps_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        std::fs::write(path.as_ref(), content).map_err(|e| anyhow!("Failed to write config file: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ValidatorConfig::default();
        assert_eq!(config.extraction.confidence_threshold, 0.7);
        assert_eq!(config.extraction.raw_text_limit, 5000);
        assert_eq!(config.matching.min_partial_serial_len, 4);
        assert_eq!(config.vision.render_dpi, 200);
        assert!(config.vision.enabled);
        assert!(config.annotation.stamps_dir.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = ValidatorConfig::default();
        config.annotation.stamps_dir = Some(PathBuf::from("/opt/stamps"));
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        config.save_to_file(&config_path).unwrap();

        let loaded_config = ValidatorConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded_config, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        fs::write(&config_path, "[matching]\nprice_tolerance = 0.05\n").unwrap();

        let config = ValidatorConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.matching.price_tolerance, 0.05);
        assert_eq!(config.matching.min_partial_serial_len, 4);
        assert_eq!(config.vision.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = tempdir().unwrap();
        assert!(ValidatorConfig::load_from_file(temp_dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PO_VALIDATOR_CONFIDENCE_THRESHOLD", "0.8"),
            ("PO_VALIDATOR_VISION_ENABLED", "FALSE"),
            ("PO_VALIDATOR_MIN_PARTIAL_SERIAL_LEN", "6"),
            ("PO_VALIDATOR_PRICE_TOLERANCE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ValidatorConfig::default();
        config.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.extraction.confidence_threshold, 0.8);
        assert!(!config.vision.enabled);
        assert_eq!(config.matching.min_partial_serial_len, 6);
        assert_eq!(config.matching.price_tolerance, 0.01);
    }
}
