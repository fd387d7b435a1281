//! Render model lookup table and per-scene render request normalization.
//!
//! Each supported model declares the clip durations and aspect ratios it
//! accepts; a scene's requested values are snapped onto those before the
//! request is submitted.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::scene::SceneSpec;

pub const DEFAULT_ASPECT_RATIO: &str = "16:9";

/// Aspect ratios every render model accepts.
pub const VALID_ASPECT_RATIOS: &[&str] = &["16:9", "9:16", "1:1"];

/// Supported image-to-video render models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderModel {
    #[serde(rename = "kling-v2.1")]
    KlingV21,
    #[serde(rename = "seedance-lite")]
    SeedanceLite,
    #[serde(rename = "hailuo-02")]
    Hailuo02,
}

/// Static description of one render model.
struct ModelEntry {
    model: RenderModel,
    key: &'static str,
    provider_id: &'static str,
    durations: &'static [u32],
    cost_per_second: f64,
}

const MODELS: &[ModelEntry] = &[
    ModelEntry {
        model: RenderModel::KlingV21,
        key: "kling-v2.1",
        provider_id: "kwaivgi/kling-v2.1",
        durations: &[5, 10],
        cost_per_second: 0.05,
    },
    ModelEntry {
        model: RenderModel::SeedanceLite,
        key: "seedance-lite",
        provider_id: "bytedance/seedance-1-lite",
        durations: &[5, 10],
        cost_per_second: 0.036,
    },
    ModelEntry {
        model: RenderModel::Hailuo02,
        key: "hailuo-02",
        provider_id: "minimax/hailuo-02",
        durations: &[6, 10],
        cost_per_second: 0.045,
    },
];

impl RenderModel {
    fn entry(self) -> &'static ModelEntry {
        MODELS
            .iter()
            .find(|e| e.model == self)
            .unwrap_or(&MODELS[0])
    }

    /// Short key used in storyboards and configuration.
    pub fn key(self) -> &'static str {
        self.entry().key
    }

    /// Model identifier on the render provider.
    pub fn provider_id(self) -> &'static str {
        self.entry().provider_id
    }

    /// Clip durations (seconds) the model accepts, ascending.
    pub fn allowed_durations(self) -> &'static [u32] {
        self.entry().durations
    }

    pub fn cost_per_second(self) -> f64 {
        self.entry().cost_per_second
    }

    pub fn parse(key: &str) -> Result<Self, CoreError> {
        MODELS
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.model)
            .ok_or_else(|| {
                let valid: Vec<&str> = MODELS.iter().map(|e| e.key).collect();
                CoreError::Validation(format!(
                    "Unknown render model '{key}'. Valid: {}",
                    valid.join(", ")
                ))
            })
    }
}

/// Snap a requested duration onto the smallest allowed bucket that covers it.
///
/// Requests longer than every bucket get the largest one.
pub fn normalize_duration(requested_secs: f64, allowed: &[u32]) -> u32 {
    let fallback = allowed.last().copied().unwrap_or(requested_secs.ceil() as u32);
    allowed
        .iter()
        .copied()
        .find(|&d| f64::from(d) >= requested_secs)
        .unwrap_or(fallback)
}

/// Normalize an aspect ratio onto [`VALID_ASPECT_RATIOS`].
///
/// Exact matches pass through; anything parseable as `W:H` maps to the
/// closest allowed ratio; missing or unparseable input falls back to
/// [`DEFAULT_ASPECT_RATIO`].
pub fn normalize_aspect_ratio(requested: Option<&str>) -> &'static str {
    let Some(requested) = requested.map(str::trim) else {
        return DEFAULT_ASPECT_RATIO;
    };
    if let Some(exact) = VALID_ASPECT_RATIOS.iter().copied().find(|r| *r == requested) {
        return exact;
    }
    let Some(target) = parse_ratio(requested) else {
        return DEFAULT_ASPECT_RATIO;
    };
    VALID_ASPECT_RATIOS
        .iter()
        .copied()
        .filter_map(|r| parse_ratio(r).map(|v| (r, (v - target).abs())))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(r, _)| r)
        .unwrap_or(DEFAULT_ASPECT_RATIO)
}

fn parse_ratio(s: &str) -> Option<f64> {
    let (w, h) = s.split_once(':')?;
    let w = w.trim().parse::<f64>().ok()?;
    let h = h.trim().parse::<f64>().ok()?;
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    Some(w / h)
}

/// Provider-ready render request for one scene. Built at dispatch time and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub model: RenderModel,
    pub prompt: String,
    pub first_frame_url: String,
    pub last_frame_url: String,
    pub duration_secs: u32,
    pub aspect_ratio: String,
}

impl RenderRequest {
    /// Build the request for a storyboard entry.
    ///
    /// Fails fast when either reference frame is missing or the model key is
    /// unknown.
    pub fn build(spec: &SceneSpec, default_model: RenderModel) -> Result<Self, CoreError> {
        let model = match spec.render_model.as_deref() {
            Some(key) => RenderModel::parse(key)?,
            None => default_model,
        };
        let first_frame_url = required_frame(spec.first_frame_url.as_deref(), "first")?;
        let last_frame_url = required_frame(spec.last_frame_url.as_deref(), "last")?;

        Ok(Self {
            model,
            prompt: spec.prompt.clone(),
            first_frame_url,
            last_frame_url,
            duration_secs: normalize_duration(spec.duration_secs, model.allowed_durations()),
            aspect_ratio: normalize_aspect_ratio(spec.aspect_ratio.as_deref()).to_string(),
        })
    }
}

fn required_frame(url: Option<&str>, which: &str) -> Result<String, CoreError> {
    match url.map(str::trim) {
        Some(u) if !u.is_empty() => Ok(u.to_string()),
        _ => Err(CoreError::Validation(format!(
            "Scene is missing its {which} reference frame"
        ))),
    }
}

/// Estimate the render cost of a storyboard from normalized durations.
pub fn estimate_cost(storyboard: &[SceneSpec], default_model: RenderModel) -> f64 {
    storyboard
        .iter()
        .map(|spec| {
            let model = spec
                .render_model
                .as_deref()
                .and_then(|k| RenderModel::parse(k).ok())
                .unwrap_or(default_model);
            let secs = normalize_duration(spec.duration_secs, model.allowed_durations());
            f64::from(secs) * model.cost_per_second()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MusicDescriptors;
    use assert_matches::assert_matches;

    fn spec() -> SceneSpec {
        SceneSpec {
            prompt: "Waves crash".into(),
            duration_secs: 4.0,
            transition: None,
            music: MusicDescriptors::default(),
            first_frame_url: Some("https://img/a.png".into()),
            last_frame_url: Some("https://img/b.png".into()),
            render_model: None,
            aspect_ratio: Some("4:3".into()),
        }
    }

    #[test]
    fn duration_rounds_up_to_bucket() {
        assert_eq!(normalize_duration(4.0, &[5, 10]), 5);
        assert_eq!(normalize_duration(5.0, &[5, 10]), 5);
        assert_eq!(normalize_duration(5.5, &[5, 10]), 10);
    }

    #[test]
    fn duration_above_all_buckets_uses_largest() {
        assert_eq!(normalize_duration(30.0, &[6, 10]), 10);
    }

    #[test]
    fn aspect_ratio_exact_and_nearest() {
        assert_eq!(normalize_aspect_ratio(Some("9:16")), "9:16");
        assert_eq!(normalize_aspect_ratio(Some("4:3")), "1:1");
        assert_eq!(normalize_aspect_ratio(Some("21:9")), "16:9");
        assert_eq!(normalize_aspect_ratio(Some("garbage")), DEFAULT_ASPECT_RATIO);
        assert_eq!(normalize_aspect_ratio(None), DEFAULT_ASPECT_RATIO);
    }

    #[test]
    fn build_uses_default_model_and_normalizes() {
        let req = RenderRequest::build(&spec(), RenderModel::Hailuo02).unwrap();
        assert_eq!(req.model, RenderModel::Hailuo02);
        assert_eq!(req.duration_secs, 6);
        assert_eq!(req.aspect_ratio, "1:1");
    }

    #[test]
    fn build_honours_scene_model_override() {
        let mut s = spec();
        s.render_model = Some("seedance-lite".into());
        let req = RenderRequest::build(&s, RenderModel::KlingV21).unwrap();
        assert_eq!(req.model, RenderModel::SeedanceLite);
        assert_eq!(req.model.provider_id(), "bytedance/seedance-1-lite");
    }

    #[test]
    fn missing_reference_frame_fails_fast() {
        let mut s = spec();
        s.last_frame_url = None;
        assert_matches!(
            RenderRequest::build(&s, RenderModel::KlingV21),
            Err(CoreError::Validation(msg)) if msg.contains("last")
        );
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert_matches!(RenderModel::parse("sora"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn cost_uses_normalized_durations() {
        let cost = estimate_cost(&[spec(), spec()], RenderModel::KlingV21);
        assert!((cost - 0.5).abs() < 1e-9);
    }
}
