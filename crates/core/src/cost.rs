//! Model catalog, parameter validation, and token cost calculation.
//!
//! A generation's token cost is computed from the model's base cost and
//! parameter-driven multipliers *before* any credits are reserved, so
//! the ledger always deducts the exact amount a later refund restores.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Content types and calling conventions
// ---------------------------------------------------------------------------

/// Kind of content a model produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Image,
    Video,
    Audio,
    Text,
}

impl ContentType {
    /// Database string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        }
    }

    /// Parse from a string, returning an error for unknown types.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "text" => Ok(Self::Text),
            other => Err(CoreError::Validation(format!(
                "Unknown content type '{other}'. Must be one of: image, video, audio, text"
            ))),
        }
    }
}

/// How a provider's submit call behaves.
///
/// `Sync` calls block and return the output directly; `Async` calls
/// return a task id whose completion is observed by polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    Sync,
    Async,
}

// ---------------------------------------------------------------------------
// Model catalog
// ---------------------------------------------------------------------------

/// Static description of a generation model.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    /// Stable model identifier clients submit.
    pub id: &'static str,
    /// Registry key of the provider that serves this model.
    pub provider: &'static str,
    /// What the model produces.
    pub content_type: ContentType,
    /// Whether the provider call is blocking or task-based.
    pub convention: CallingConvention,
    /// Token cost of a default-parameter generation.
    pub base_cost: i64,
}

/// Built-in model catalog.
///
/// Provider keys are resolved against the `ProviderRegistry` at dispatch
/// time; a model whose provider is not registered fails with a
/// descriptive "not implemented" error rather than silently no-opping.
pub const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "image-standard",
        provider: "brushwork",
        content_type: ContentType::Image,
        convention: CallingConvention::Sync,
        base_cost: 10,
    },
    ModelSpec {
        id: "image-batch",
        provider: "brushwork-async",
        content_type: ContentType::Image,
        convention: CallingConvention::Async,
        base_cost: 10,
    },
    ModelSpec {
        id: "video-render",
        provider: "kinema",
        content_type: ContentType::Video,
        convention: CallingConvention::Async,
        base_cost: 100,
    },
    ModelSpec {
        id: "audio-voice",
        provider: "vocalis",
        content_type: ContentType::Audio,
        convention: CallingConvention::Sync,
        base_cost: 5,
    },
    ModelSpec {
        id: "text-draft",
        provider: "quillpoint",
        content_type: ContentType::Text,
        convention: CallingConvention::Sync,
        base_cost: 1,
    },
];

/// Look up a model by id.
pub fn find_model(model_id: &str) -> Result<&'static ModelSpec, CoreError> {
    MODELS.iter().find(|m| m.id == model_id).ok_or_else(|| {
        CoreError::Validation(format!(
            "Unknown model '{model_id}'. Valid models: {}",
            MODELS
                .iter()
                .map(|m| m.id)
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })
}

// ---------------------------------------------------------------------------
// Parameter validation
// ---------------------------------------------------------------------------

/// Maximum accepted prompt length in characters.
pub const MAX_PROMPT_LEN: usize = 4_000;

/// Maximum output variants a single generation may request.
pub const MAX_BATCH_SIZE: i64 = 8;

/// Maximum video/audio duration in seconds.
pub const MAX_DURATION_SECS: i64 = 60;

/// Maximum image dimension in pixels.
pub const MAX_DIMENSION_PX: i64 = 4_096;

/// Baseline image area (1024x1024) that costs exactly the base rate.
const BASE_AREA_PX: i64 = 1024 * 1024;

/// Baseline clip duration that costs exactly the base rate.
const BASE_DURATION_SECS: i64 = 5;

/// Parameters resolved against a model's schema.
///
/// Unknown keys are rejected during validation so typos surface as
/// errors rather than silently falling back to defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedParams {
    pub width: i64,
    pub height: i64,
    pub duration_secs: i64,
    pub batch_size: i64,
}

impl Default for ResolvedParams {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            duration_secs: BASE_DURATION_SECS,
            batch_size: 1,
        }
    }
}

/// Validate a prompt string.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".into()));
    }
    if prompt.len() > MAX_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "Prompt exceeds maximum length of {MAX_PROMPT_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate raw request parameters against a model's schema.
///
/// Accepted keys depend on the model's content type:
/// - image: `width`, `height`, `batch_size`
/// - video/audio: `duration_secs`, `batch_size`
/// - text: `batch_size`
///
/// Missing keys take defaults; out-of-range or unknown keys are rejected
/// before any credit reservation (no side effects on validation failure).
pub fn validate_params(
    spec: &ModelSpec,
    raw: &serde_json::Value,
) -> Result<ResolvedParams, CoreError> {
    let obj = match raw {
        serde_json::Value::Null => return Ok(ResolvedParams::default()),
        serde_json::Value::Object(obj) => obj,
        _ => {
            return Err(CoreError::Validation(
                "Parameters must be a JSON object".into(),
            ))
        }
    };

    let allowed: &[&str] = match spec.content_type {
        ContentType::Image => &["width", "height", "batch_size"],
        ContentType::Video | ContentType::Audio => &["duration_secs", "batch_size"],
        ContentType::Text => &["batch_size"],
    };

    if let Some(unknown) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(CoreError::Validation(format!(
            "Unknown parameter '{unknown}' for model '{}'. Allowed: {}",
            spec.id,
            allowed.join(", ")
        )));
    }

    let mut params = ResolvedParams::default();
    params.width = int_field(obj, "width", params.width)?;
    params.height = int_field(obj, "height", params.height)?;
    params.duration_secs = int_field(obj, "duration_secs", params.duration_secs)?;
    params.batch_size = int_field(obj, "batch_size", params.batch_size)?;

    check_range("width", params.width, 64, MAX_DIMENSION_PX)?;
    check_range("height", params.height, 64, MAX_DIMENSION_PX)?;
    check_range("duration_secs", params.duration_secs, 1, MAX_DURATION_SECS)?;
    check_range("batch_size", params.batch_size, 1, MAX_BATCH_SIZE)?;

    Ok(params)
}

fn int_field(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    default: i64,
) -> Result<i64, CoreError> {
    match obj.get(key) {
        None => Ok(default),
        Some(value) => value.as_i64().ok_or_else(|| {
            CoreError::Validation(format!("Parameter '{key}' must be an integer"))
        }),
    }
}

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<(), CoreError> {
    if value < min || value > max {
        return Err(CoreError::Validation(format!(
            "Parameter '{name}' must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cost calculation
// ---------------------------------------------------------------------------

/// Compute the token cost for one generation.
///
/// `base_cost` is scaled by a resolution multiplier (image area relative
/// to 1024x1024) or a duration multiplier (relative to 5 seconds), then
/// multiplied by the batch size. The result is rounded up and is always
/// at least 1 token per variant.
pub fn compute_cost(spec: &ModelSpec, params: &ResolvedParams) -> i64 {
    let multiplier = match spec.content_type {
        ContentType::Image => (params.width * params.height) as f64 / BASE_AREA_PX as f64,
        ContentType::Video | ContentType::Audio => {
            params.duration_secs as f64 / BASE_DURATION_SECS as f64
        }
        ContentType::Text => 1.0,
    };

    let per_variant = (spec.base_cost as f64 * multiplier).ceil() as i64;
    per_variant.max(1) * params.batch_size
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn image_model() -> &'static ModelSpec {
        find_model("image-standard").unwrap()
    }

    fn video_model() -> &'static ModelSpec {
        find_model("video-render").unwrap()
    }

    // -- Catalog --

    #[test]
    fn find_known_model() {
        let spec = image_model();
        assert_eq!(spec.provider, "brushwork");
        assert_eq!(spec.content_type, ContentType::Image);
        assert_eq!(spec.convention, CallingConvention::Sync);
    }

    #[test]
    fn unknown_model_rejected() {
        assert!(find_model("does-not-exist").is_err());
    }

    #[test]
    fn content_type_round_trips() {
        for ct in [
            ContentType::Image,
            ContentType::Video,
            ContentType::Audio,
            ContentType::Text,
        ] {
            assert_eq!(ContentType::parse(ct.as_str()).unwrap(), ct);
        }
        assert!(ContentType::parse("hologram").is_err());
    }

    // -- Prompt validation --

    #[test]
    fn empty_prompt_rejected() {
        assert!(validate_prompt("").is_err());
        assert!(validate_prompt("   ").is_err());
    }

    #[test]
    fn oversized_prompt_rejected() {
        let long = "x".repeat(MAX_PROMPT_LEN + 1);
        assert!(validate_prompt(&long).is_err());
        let exact = "x".repeat(MAX_PROMPT_LEN);
        assert!(validate_prompt(&exact).is_ok());
    }

    // -- Parameter validation --

    #[test]
    fn null_params_take_defaults() {
        let params = validate_params(image_model(), &serde_json::Value::Null).unwrap();
        assert_eq!(params, ResolvedParams::default());
    }

    #[test]
    fn unknown_key_rejected() {
        let raw = serde_json::json!({ "steps": 30 });
        assert!(validate_params(image_model(), &raw).is_err());
    }

    #[test]
    fn video_rejects_image_keys() {
        let raw = serde_json::json!({ "width": 512 });
        assert!(validate_params(video_model(), &raw).is_err());
    }

    #[test]
    fn out_of_range_dimension_rejected() {
        let raw = serde_json::json!({ "width": 10_000 });
        assert!(validate_params(image_model(), &raw).is_err());
        let raw = serde_json::json!({ "width": 32 });
        assert!(validate_params(image_model(), &raw).is_err());
    }

    #[test]
    fn batch_size_capped() {
        let raw = serde_json::json!({ "batch_size": MAX_BATCH_SIZE + 1 });
        assert!(validate_params(image_model(), &raw).is_err());
        let raw = serde_json::json!({ "batch_size": MAX_BATCH_SIZE });
        assert!(validate_params(image_model(), &raw).is_ok());
    }

    #[test]
    fn non_object_params_rejected() {
        let raw = serde_json::json!([1, 2, 3]);
        assert!(validate_params(image_model(), &raw).is_err());
    }

    // -- Cost --

    #[test]
    fn base_resolution_costs_base_rate() {
        let params = ResolvedParams::default();
        assert_eq!(compute_cost(image_model(), &params), 10);
    }

    #[test]
    fn half_resolution_costs_less() {
        let params = ResolvedParams {
            width: 512,
            height: 512,
            ..Default::default()
        };
        // 512*512 / 1024*1024 = 0.25 -> ceil(10 * 0.25) = 3
        assert_eq!(compute_cost(image_model(), &params), 3);
    }

    #[test]
    fn batch_multiplies_linearly() {
        let params = ResolvedParams {
            batch_size: 4,
            ..Default::default()
        };
        assert_eq!(compute_cost(image_model(), &params), 40);
    }

    #[test]
    fn video_scales_with_duration() {
        let params = ResolvedParams {
            duration_secs: 10,
            ..Default::default()
        };
        // 10s / 5s baseline = 2.0 -> 200
        assert_eq!(compute_cost(video_model(), &params), 200);
    }

    #[test]
    fn cost_is_at_least_one_per_variant() {
        let spec = find_model("text-draft").unwrap();
        let params = ResolvedParams::default();
        assert!(compute_cost(spec, &params) >= 1);
    }
}
