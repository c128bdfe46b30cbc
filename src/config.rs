use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::diff::SizingMode;
use crate::figure::Map;
use crate::pane::{PaneParams, ViewportUpdatePolicy};

/// Application configuration, loaded from `plotlypane.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    pub log_dir: String,
    /// Figure JSON files served by the dashboard, one tab each.
    pub figures: Vec<String>,
    pub sizing_mode: Option<SizingMode>,
    pub viewport_update_policy: ViewportUpdatePolicy,
    pub viewport_update_throttle: u64,
    /// Turn numeric trace lists into typed arrays on load.
    pub promote_numeric_lists: bool,
    pub plotly_config: Map,
    pub plotly_js_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5006,
            log_dir: "logs".to_string(),
            figures: Vec::new(),
            sizing_mode: None,
            viewport_update_policy: ViewportUpdatePolicy::Mouseup,
            viewport_update_throttle: 200,
            promote_numeric_lists: true,
            plotly_config: Map::new(),
            plotly_js_url: "https://cdn.plot.ly/plotly-2.35.2.min.js".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration with the chain: `./plotlypane.toml` -> `~/plotlypane.toml` -> defaults,
    /// then apply `PLOTLY_PANE_PORT` / `PLOTLY_PANE_LOG_DIR` from the environment.
    pub fn load() -> Self {
        let mut config = Self::from_files();
        config.apply_env();
        config
    }

    fn from_files() -> Self {
        for path in &Self::config_paths() {
            if let Ok(contents) = fs::read_to_string(path) {
                match toml::from_str::<AppConfig>(&contents) {
                    Ok(cfg) => return cfg,
                    Err(e) => {
                        eprintln!("Warning: failed to parse {}: {}", path.display(), e);
                    }
                }
            }
        }
        Self::default()
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("plotlypane.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("plotlypane.toml"));
        }
        paths
    }

    fn apply_env(&mut self) {
        if let Ok(port) = env::var("PLOTLY_PANE_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(e) => eprintln!("Warning: ignoring PLOTLY_PANE_PORT={}: {}", port, e),
            }
        }
        if let Ok(dir) = env::var("PLOTLY_PANE_LOG_DIR") {
            if !dir.trim().is_empty() {
                self.log_dir = dir;
            }
        }
    }

    /// Parameters for every pane the dashboard creates.
    pub fn pane_params(&self) -> PaneParams {
        PaneParams {
            sizing_mode: self.sizing_mode,
            config: self.plotly_config.clone(),
            viewport_update_policy: self.viewport_update_policy,
            viewport_update_throttle: self.viewport_update_throttle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.port, 5006);
        assert_eq!(cfg.log_dir, "logs");
        assert!(cfg.figures.is_empty());
        assert_eq!(cfg.sizing_mode, None);
        assert_eq!(cfg.viewport_update_policy, ViewportUpdatePolicy::Mouseup);
        assert_eq!(cfg.viewport_update_throttle, 200);
        assert!(cfg.promote_numeric_lists);
        assert!(cfg.plotly_config.is_empty());
    }

    #[test]
    fn test_partial_toml_deserialize() {
        let toml_str = r#"
            port = 8080
            figures = ["a.json", "b.json"]
        "#;
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.figures, vec!["a.json", "b.json"]);
        // Other fields should be defaults
        assert_eq!(cfg.viewport_update_throttle, 200);
        assert!(cfg.promote_numeric_lists);
    }

    #[test]
    fn test_full_toml_deserialize() {
        let toml_str = r#"
            port = 9000
            log_dir = "my_logs"
            figures = ["fig.json"]
            sizing_mode = "stretch_width"
            viewport_update_policy = "throttle"
            viewport_update_throttle = 50
            promote_numeric_lists = false
            plotly_js_url = "/static/plotly.js"

            [plotly_config]
            displayModeBar = false
        "#;
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.log_dir, "my_logs");
        assert_eq!(cfg.sizing_mode, Some(SizingMode::StretchWidth));
        assert_eq!(cfg.viewport_update_policy, ViewportUpdatePolicy::Throttle);
        assert_eq!(cfg.viewport_update_throttle, 50);
        assert!(!cfg.promote_numeric_lists);
        assert_eq!(cfg.plotly_js_url, "/static/plotly.js");
        assert!(cfg.plotly_config.contains_key("displayModeBar"));

        let params = cfg.pane_params();
        assert_eq!(params.sizing_mode, Some(SizingMode::StretchWidth));
        assert_eq!(params.viewport_update_throttle, 50);
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        // When no config file exists, load() returns defaults
        let cfg = AppConfig::load();
        assert_eq!(cfg.viewport_update_throttle, AppConfig::default().viewport_update_throttle);
    }
}
