// src/settings.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct AppSettings {
    pub host_name: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub buffer_size: Option<u32>,
    pub input_latency_compensation_ms: f32,
    pub num_tracks: usize,
    /// Cap on the first recording, which fixes the master loop length.
    pub max_loop_seconds: f32,
    pub trigger_low_threshold: f32,
    pub trigger_high_threshold: f32,
    pub input_monitoring: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host_name: None,
            input_device: None,
            output_device: None,
            sample_rate: None,
            buffer_size: None,
            input_latency_compensation_ms: 5.0, // Default to 5ms safety buffer
            num_tracks: 8,
            max_loop_seconds: 30.0,
            trigger_low_threshold: 0.05,
            trigger_high_threshold: 0.3,
            input_monitoring: false,
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(exe_path) = env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let app_settings_dir = exe_dir.join("AppSettings");
            if !app_settings_dir.exists() {
                if let Err(e) = fs::create_dir_all(&app_settings_dir) {
                    log::error!(
                        "Failed to create directory at {}: {}",
                        app_settings_dir.display(),
                        e
                    );
                    return None;
                }
            }
            return Some(app_settings_dir);
        }
    }
    log::error!("Could not determine application directory.");
    None
}

pub fn save_settings(settings: &AppSettings) {
    if let Some(dir) = get_config_dir() {
        let path = dir.join("settings.json");
        match serde_json::to_string_pretty(settings) {
            Ok(json_string) => {
                if let Err(e) = fs::write(&path, json_string) {
                    log::error!("Failed to write settings to {}: {}", path.display(), e);
                }
            }
            Err(e) => {
                log::error!("Failed to serialize settings: {}", e);
            }
        }
    }
}

pub fn load_settings() -> AppSettings {
    if let Some(dir) = get_config_dir() {
        let path = dir.join("settings.json");
        if path.exists() {
            return match fs::read_to_string(&path) {
                Ok(json_string) => match serde_json::from_str(&json_string) {
                    Ok(settings) => settings,
                    Err(e) => {
                        log::warn!("Failed to parse settings file, using defaults. Error: {}", e);
                        AppSettings::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file, using defaults. Error: {}", e);
                    AppSettings::default()
                }
            };
        }
    }
    AppSettings::default()
}
