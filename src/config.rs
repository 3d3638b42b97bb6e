//! Configuration loaded from config.json.
//!
//! Every field has a default, so a partial file only overrides what it names.
//! A missing or broken file falls back to the defaults with a warning.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::scan::ScanLayout;

/// OCR engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Explicit tesseract executable; searched for when unset
    pub tesseract_path: Option<PathBuf>,
    /// Tesseract language string, e.g. "chi_sim+eng"
    pub languages: String,
    /// Page segmentation mode (7 = single text line)
    pub psm: u8,
    /// Fixed brightness threshold for binarization; Otsu per region when unset
    pub threshold: Option<u8>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            languages: "chi_sim+eng".to_string(),
            psm: 7,
            threshold: None,
        }
    }
}

/// Page scanning settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Upper bound on pages read in one run
    pub max_pages: u32,
    /// How long to wait for the player to turn a page (milliseconds)
    pub page_wait_ms: u64,
    /// Capture polling interval while waiting (milliseconds)
    pub poll_interval_ms: u64,
    /// Save every captured page under screenshots/ for later replay
    pub save_frames: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_pages: 50,
            page_wait_ms: 15000,
            poll_interval_ms: 200,
            save_frames: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Window titles of the game client, any of which is accepted
    pub window_titles: Vec<String>,
    pub ocr: OcrSettings,
    pub layout: ScanLayout,
    pub scan: ScanSettings,
    /// Item catalog; `resources/items.json` next to the executable when unset
    pub catalog_path: Option<PathBuf>,
    /// Pool assigned to rows that carry no pool text
    pub default_pool: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            window_titles: vec![
                "尘白禁区".to_string(),
                "Snowbreak: Containment Zone".to_string(),
            ],
            ocr: OcrSettings::default(),
            layout: ScanLayout::default(),
            scan: ScanSettings::default(),
            catalog_path: None,
            default_pool: None,
        }
    }
}

/// Returns `config.json` next to the executable.
pub fn default_config_path() -> PathBuf {
    crate::paths::get_exe_dir().join("config.json")
}

/// Loads configuration from `path` or returns defaults.
pub fn load_config(path: &Path) -> ExportConfig {
    info!("Looking for config at: {}", path.display());

    if path.exists() {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    info!("Config loaded from {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
            }
        }
    } else {
        warn!("{} not found. Using default config.", path.display());
    }

    ExportConfig::default()
}
