//! Page and environment configuration.

use crate::error::ConfigError;
use serde::Deserialize;
use std::env;

/// Per-template configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageConfig {
    /// Script-side references keep node objects alive; destroy must not recurse.
    pub enable_fiber_arc: bool,
    pub enable_create_view_async: bool,
    pub enable_flatten_translate_z: bool,
    pub enable_multi_touch: bool,
    /// Movement in pixels after which a touch is no longer a tap.
    pub tap_slop: f32,
    /// Movement in pixels before a touch move is dispatched.
    pub move_slop: f32,
    pub long_press_duration_ms: u64,
    /// Whether `:active` pseudo state is tracked at all.
    pub has_touch_pseudo: bool,
    /// Observer checks per second; clamped to at most 60.
    pub observer_frame_rate: u32,
    pub enable_new_intersection_observer: bool,
    pub enable_exposure_ui_margin: bool,
    pub enable_disexposure_when_hidden: bool,
}

impl Default for PageConfig {
    fn default() -> Self {
        PageConfig {
            enable_fiber_arc: false,
            enable_create_view_async: true,
            enable_flatten_translate_z: false,
            enable_multi_touch: false,
            tap_slop: 50.,
            move_slop: 0.,
            long_press_duration_ms: 500,
            has_touch_pseudo: false,
            observer_frame_rate: 20,
            enable_new_intersection_observer: true,
            enable_exposure_ui_margin: false,
            enable_disexposure_when_hidden: true,
        }
    }
}

impl PageConfig {
    /// Parses a page config object. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<PageConfig, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        Ok(PageConfig::deserialize(value)?)
    }
}

/// Process-wide switches.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvConfig {
    pub create_view_async: bool,
    pub worker_threads: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            create_view_async: true,
            worker_threads: 2,
        }
    }
}

const ASYNC_VAR: &str = "LYNX_CREATE_VIEW_ASYNC";
const WORKERS_VAR: &str = "LYNX_WORKER_THREADS";

impl EnvConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<EnvConfig, ConfigError> {
        let mut config = EnvConfig::default();
        if let Ok(value) = env::var(ASYNC_VAR) {
            config.create_view_async = match value.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => return Err(ConfigError::Env { key: ASYNC_VAR, value }),
            };
        }
        if let Ok(value) = env::var(WORKERS_VAR) {
            config.worker_threads = match value.parse() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::Env { key: WORKERS_VAR, value }),
            };
        }
        Ok(config)
    }
}

#[test]
fn test_page_config_defaults() {
    let config = PageConfig::from_json(r#"{"enableMultiTouch": true, "tapSlop": 8}"#)
        .expect("partial config should parse");
    assert!(config.enable_multi_touch);
    assert_eq!(config.tap_slop, 8.);
    assert_eq!(config.observer_frame_rate, 20);
    assert!(!config.enable_fiber_arc);

    assert!(matches!(PageConfig::from_json("[]"), Err(ConfigError::NotAnObject)));
    assert!(matches!(PageConfig::from_json("null"), Err(ConfigError::NotAnObject)));
    assert!(matches!(PageConfig::from_json("{"), Err(ConfigError::Json(_))));
    assert!(matches!(PageConfig::from_json(r#"{"tapSlop": "wide"}"#), Err(ConfigError::Json(_))));
}
