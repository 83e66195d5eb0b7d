use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::annotate::{AnnotationStyle, Annotator, MAX_BORDER_WIDTH, MAX_FONT_SIZE};
use crate::detect::{load_class_names, BackendRegistry, StubBackend, COCO_CLASS_NAMES};
#[cfg(feature = "backend-tract")]
use crate::detect::{TractBackend, TractOptions};
use crate::ingest::SourceSettings;
use crate::policy::{CategoryPolicy, CategoryRule, DEFAULT_THRESHOLD};
use crate::record::{
    RecorderConfig, DEFAULT_JPEG_QUALITY, DEFAULT_LOG_FILE, DEFAULT_OUTPUT_DIR, GESTURE_LOG_FILE,
};

pub const CONFIG_ENV: &str = "SENTRY_CONFIG";

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SentryConfigFile {
    source: Option<SourceConfigFile>,
    model: Option<ModelConfigFile>,
    policy: Option<PolicyConfigFile>,
    recorder: Option<RecorderConfigFile>,
    annotate: Option<AnnotateConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    limit: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    mirror: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    names_path: Option<PathBuf>,
    input_size: Option<u32>,
    score_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    preset: Option<String>,
    threshold: Option<f32>,
    categories: Option<Vec<CategoryRule>>,
}

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    enabled: Option<bool>,
    output_dir: Option<PathBuf>,
    log_file: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateConfigFile {
    box_color: Option<[u8; 3]>,
    text_color: Option<[u8; 3]>,
    border_width: Option<u32>,
    font_path: Option<PathBuf>,
    font_size: Option<f32>,
    colors: Option<HashMap<String, [u8; 3]>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Stub,
    Tract,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(BackendKind::Stub),
            "tract" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown model backend '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyPreset {
    Emergency,
    Gestures,
    Custom,
}

impl PolicyPreset {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "emergency" => Ok(PolicyPreset::Emergency),
            "gestures" => Ok(PolicyPreset::Gestures),
            "custom" => Ok(PolicyPreset::Custom),
            other => Err(anyhow!("unknown policy preset '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub source: SourceSettings,
    pub model: ModelSettings,
    pub policy: PolicySettings,
    pub recorder: RecorderSettings,
    pub annotate: AnnotateSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: BackendKind,
    pub path: Option<PathBuf>,
    pub names_path: Option<PathBuf>,
    pub input_size: u32,
    pub score_threshold: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct PolicySettings {
    pub preset: PolicyPreset,
    pub threshold: f32,
    /// Only used with the `custom` preset.
    pub categories: Vec<CategoryRule>,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub enabled: bool,
    pub output_dir: PathBuf,
    /// Explicit log path; otherwise `log_name` inside `output_dir`.
    pub log_file: Option<PathBuf>,
    pub log_name: String,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct AnnotateSettings {
    pub style: AnnotationStyle,
    pub font_path: Option<PathBuf>,
}

impl SentryConfig {
    /// File named by `SENTRY_CONFIG` (if any), then env overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentryConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let defaults = SourceSettings::default();
        let source = SourceSettings {
            url: source_file.url.unwrap_or(defaults.url),
            limit: source_file.limit,
            width: source_file.width.unwrap_or(defaults.width),
            height: source_file.height.unwrap_or(defaults.height),
            mirror: source_file.mirror.unwrap_or(defaults.mirror),
        };

        let model_file = file.model.unwrap_or_default();
        let backend = match model_file.backend.as_deref() {
            Some(name) => BackendKind::parse(name)?,
            None if model_file.path.is_some() => BackendKind::Tract,
            None => BackendKind::Stub,
        };
        let model = ModelSettings {
            backend,
            path: model_file.path,
            names_path: model_file.names_path,
            input_size: model_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            score_threshold: model_file
                .score_threshold
                .unwrap_or(DEFAULT_SCORE_THRESHOLD),
            iou_threshold: model_file.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
        };

        let policy_file = file.policy.unwrap_or_default();
        let categories = policy_file.categories.unwrap_or_default();
        let preset = match policy_file.preset.as_deref() {
            Some(name) => PolicyPreset::parse(name)?,
            None if !categories.is_empty() => PolicyPreset::Custom,
            None => PolicyPreset::Emergency,
        };
        let policy = PolicySettings {
            preset,
            threshold: policy_file.threshold.unwrap_or(DEFAULT_THRESHOLD),
            categories,
        };

        let recorder_file = file.recorder.unwrap_or_default();
        let recorder = RecorderSettings {
            enabled: recorder_file.enabled.unwrap_or(true),
            output_dir: recorder_file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            log_file: recorder_file.log_file,
            log_name: DEFAULT_LOG_FILE.to_string(),
            jpeg_quality: recorder_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let annotate_file = file.annotate.unwrap_or_default();
        let mut style = AnnotationStyle::default();
        if let Some(color) = annotate_file.box_color {
            style.box_color = color;
        }
        if let Some(color) = annotate_file.text_color {
            style.text_color = color;
        }
        if let Some(width) = annotate_file.border_width {
            style.border_width = width;
        }
        if let Some(size) = annotate_file.font_size {
            style.font_size = size;
        }
        if let Some(colors) = annotate_file.colors {
            style.category_colors = colors;
        }
        let annotate = AnnotateSettings {
            style,
            font_path: annotate_file.font_path,
        };

        Ok(Self {
            source,
            model,
            policy,
            recorder,
            annotate,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SENTRY_SOURCE") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(path) = std::env::var("SENTRY_MODEL") {
            if !path.trim().is_empty() {
                self.model.path = Some(PathBuf::from(path));
                self.model.backend = BackendKind::Tract;
            }
        }
        if let Ok(threshold) = std::env::var("SENTRY_CONF_THRESHOLD") {
            self.policy.threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("SENTRY_CONF_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Ok(dir) = std::env::var("SENTRY_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.recorder.output_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    /// Check cross-field constraints. Binaries call this again after CLI overrides.
    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.model.backend == BackendKind::Tract && self.model.path.is_none() {
            return Err(anyhow!("the tract backend needs a model path"));
        }
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(anyhow!("model input_size must be a positive multiple of 32"));
        }
        for (name, value) in [
            ("score_threshold", self.model.score_threshold),
            ("iou_threshold", self.model.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("model {} must be within [0, 1]", name));
            }
        }
        if !(1..=100).contains(&self.recorder.jpeg_quality) {
            return Err(anyhow!("recorder jpeg_quality must be within 1..=100"));
        }
        let font_size = self.annotate.style.font_size;
        if !(font_size.is_finite() && font_size > 0.0 && font_size <= MAX_FONT_SIZE) {
            return Err(anyhow!(
                "annotate font_size must be within (0, {}]",
                MAX_FONT_SIZE
            ));
        }
        if self.annotate.style.border_width > MAX_BORDER_WIDTH {
            return Err(anyhow!(
                "annotate border_width must be at most {}",
                MAX_BORDER_WIDTH
            ));
        }
        self.build_policy()?;
        Ok(())
    }

    pub fn build_policy(&self) -> Result<CategoryPolicy> {
        let threshold = self.policy.threshold;
        match self.policy.preset {
            PolicyPreset::Emergency => CategoryPolicy::emergency(threshold),
            PolicyPreset::Gestures => CategoryPolicy::gestures(threshold),
            PolicyPreset::Custom => {
                if self.policy.categories.is_empty() {
                    return Err(anyhow!("custom policy needs at least one category"));
                }
                CategoryPolicy::new(threshold, self.policy.categories.clone())
            }
        }
    }

    /// `None` when recording is disabled.
    pub fn recorder_config(&self) -> Option<RecorderConfig> {
        if !self.recorder.enabled {
            return None;
        }
        let mut config = RecorderConfig::new(self.recorder.output_dir.clone());
        config.log_path = Some(match &self.recorder.log_file {
            Some(path) => path.clone(),
            None => self.recorder.output_dir.join(&self.recorder.log_name),
        });
        config.jpeg_quality = self.recorder.jpeg_quality;
        Some(config)
    }

    /// Switch to the rock-paper-scissors setup: gesture categories and
    /// colours, and a `detections.csv` log unless one is configured.
    pub fn apply_gesture_preset(&mut self) {
        self.policy.preset = PolicyPreset::Gestures;
        self.annotate.style.category_colors = AnnotationStyle::gestures().category_colors;
        self.recorder.log_name = GESTURE_LOG_FILE.to_string();
    }

    pub fn build_annotator(&self) -> Result<Annotator> {
        let annotator = Annotator::new(self.annotate.style.clone());
        match &self.annotate.font_path {
            Some(path) => annotator.with_font_file(path),
            None => Ok(annotator),
        }
    }

    /// Class names from `names_path`, or COCO.
    pub fn class_names(&self) -> Result<Vec<String>> {
        match &self.model.names_path {
            Some(path) => load_class_names(path)
                .with_context(|| format!("failed to load class names from {}", path.display())),
            None => Ok(COCO_CLASS_NAMES.iter().map(|s| s.to_string()).collect()),
        }
    }
}

impl SentryConfig {
    /// Registry whose default is the configured backend. `stub` is used
    /// when the config selects the stub backend.
    pub fn build_backends(&self, stub: StubBackend) -> Result<BackendRegistry> {
        let class_names = self.class_names()?;
        let mut registry = BackendRegistry::new();
        match self.model.backend {
            BackendKind::Stub => registry.register(stub.with_class_names(class_names)),
            BackendKind::Tract => registry.register(self.tract_backend(class_names)?),
        }
        Ok(registry)
    }

    #[cfg(feature = "backend-tract")]
    fn tract_backend(&self, class_names: Vec<String>) -> Result<TractBackend> {
        let path = self
            .model
            .path
            .as_ref()
            .ok_or_else(|| anyhow!("the tract backend needs a model path"))?;
        TractBackend::new(
            path,
            TractOptions {
                input_size: self.model.input_size,
                score_threshold: self.model.score_threshold,
                iou_threshold: self.model.iou_threshold,
                class_names,
            },
        )
    }

    #[cfg(not(feature = "backend-tract"))]
    fn tract_backend(&self, _class_names: Vec<String>) -> Result<StubBackend> {
        Err(anyhow!(
            "model backend 'tract' requires building with --features backend-tract"
        ))
    }
}

fn read_config_file(path: &Path) -> Result<SentryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
