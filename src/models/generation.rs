use std::collections::HashMap;
use std::str::FromStr;

use garde::Validate;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 1024;
pub const DEFAULT_STEPS: u32 = 28;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 2.5;
pub const DEFAULT_TRUE_CFG_SCALE: f64 = 1.5;
pub const MAX_SEQUENCE_LENGTH: u32 = 512;

/// Upload extensions accepted by the submit endpoint.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Parameters forwarded to the diffusion pipeline for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationParams {
    #[garde(length(max = 2000))]
    pub prompt: String,

    #[garde(length(max = 2000))]
    pub prompt_2: Option<String>,

    #[garde(length(max = 2000))]
    pub negative_prompt: Option<String>,

    #[garde(length(max = 2000))]
    pub negative_prompt_2: Option<String>,

    #[garde(range(min = 64, max = 2048))]
    pub width: u32,

    #[garde(range(min = 64, max = 2048))]
    pub height: u32,

    #[garde(range(min = 1, max = 100))]
    pub num_inference_steps: u32,

    #[garde(range(min = 0.0, max = 20.0))]
    pub guidance_scale: f64,

    #[garde(range(min = 0.0, max = 20.0))]
    pub true_cfg_scale: f64,

    #[garde(skip)]
    pub max_sequence_length: u32,

    #[garde(skip)]
    pub num_images_per_prompt: u32,

    /// Seed actually used, either supplied or drawn at submit time.
    #[garde(skip)]
    pub seed: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            prompt_2: None,
            negative_prompt: None,
            negative_prompt_2: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            num_inference_steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            true_cfg_scale: DEFAULT_TRUE_CFG_SCALE,
            max_sequence_length: MAX_SEQUENCE_LENGTH,
            num_images_per_prompt: 1,
            seed: 0,
        }
    }
}

impl GenerationParams {
    /// Build parameters from multipart text fields, applying defaults and bounds.
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self, ParamError> {
        let seed = match form.get("seed").map(|s| s.trim()) {
            Some(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
                s.parse().map_err(|_| ParamError::InvalidNumber {
                    field: "seed",
                    value: s.to_string(),
                })?
            }
            _ => rand::random::<u32>(),
        };

        let params = Self {
            prompt: form.get("prompt").cloned().unwrap_or_default(),
            prompt_2: optional_text(form, "prompt_2"),
            negative_prompt: optional_text(form, "negative_prompt"),
            negative_prompt_2: optional_text(form, "negative_prompt_2"),
            width: number_or(form, "width", DEFAULT_WIDTH)?,
            height: number_or(form, "height", DEFAULT_HEIGHT)?,
            num_inference_steps: number_or(form, "num_inference_steps", DEFAULT_STEPS)?,
            guidance_scale: number_or(form, "guidance_scale", DEFAULT_GUIDANCE_SCALE)?,
            true_cfg_scale: number_or(form, "true_cfg_scale", DEFAULT_TRUE_CFG_SCALE)?,
            max_sequence_length: MAX_SEQUENCE_LENGTH,
            num_images_per_prompt: 1,
            seed,
        };

        params
            .validate()
            .map_err(|report| ParamError::OutOfRange(report.to_string()))?;
        Ok(params)
    }
}

/// Check an upload filename against `ALLOWED_EXTENSIONS`.
pub fn is_allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn optional_text(form: &HashMap<String, String>, key: &str) -> Option<String> {
    form.get(key).filter(|v| !v.is_empty()).cloned()
}

fn number_or<T: FromStr>(
    form: &HashMap<String, String>,
    field: &'static str,
    default: T,
) -> Result<T, ParamError> {
    match form.get(field).map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ParamError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("Invalid parameter type provided for '{field}': '{value}' is not a number")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Parameter out of range: {0}")]
    OutOfRange(String),
}
