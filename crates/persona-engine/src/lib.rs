use std::env;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use persona_contracts::artifacts::{
    content_fingerprint, GenerationResult, ImagePayload, SourceImage,
};
use persona_contracts::cache::ImageCache;
use persona_contracts::credentials::CredentialStore;
use persona_contracts::events::{EventPayload, EventWriter};
use persona_contracts::models::{ModelCatalog, DEFAULT_MODEL_ID};
use persona_contracts::styles::StyleCatalog;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const ROLLING_WINDOW: Duration = Duration::from_secs(60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const CREDENTIAL_PROMPT_DELAY: Duration = Duration::from_millis(1500);

/// Everything that can go wrong between accepting an upload and holding a
/// generated headshot. Display strings are the user-facing messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StudioError {
    #[error("API Key is missing. Please provide a valid Gemini API Key.")]
    MissingCredential,
    #[error("Please upload a valid image file (JPG, PNG, WEBP).")]
    UnsupportedType,
    #[error("Failed to read the uploaded image. The file may be corrupt.")]
    DecodeFailed,
    #[error("Image processing failed. Please try a different photo.")]
    EncodeFailed,
    #[error("{}", permission_denied_message(.premium_model))]
    PermissionDenied { premium_model: bool },
    #[error("Invalid Request. Please check your API key or image format.")]
    InvalidRequest,
    #[error("Rate limit exceeded. Please wait a moment before trying again.")]
    RateLimited,
    #[error("Gemini service is temporarily unavailable. Please try again later.")]
    ServiceUnavailable,
    #[error("Generation blocked by safety filters. Please try a different photo or prompt.")]
    SafetyBlocked,
    #[error("Generation blocked. Reason: {reason}.")]
    GenerationBlocked { reason: String },
    #[error("The AI returned no content. This might be due to safety filters or a server error.")]
    EmptyResponse,
    #[error("The AI generated text instead of an image. Please try again with a different prompt.")]
    NoImageProduced,
    #[error("Request failed: {0}")]
    Transport(String),
}

fn permission_denied_message(premium_model: &bool) -> &'static str {
    if *premium_model {
        "Permission Denied: The 'Pro' model requires a paid, billing-enabled API key. Please switch to 'Standard' or enable billing in Google AI Studio."
    } else {
        "Permission Denied. Your API key might be invalid or has no access."
    }
}

// ---------------------------------------------------------------------------
// Image preprocessing

#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    /// Longest edge after downscaling. Inputs already within bounds are
    /// never upscaled.
    pub max_edge: u32,
    pub jpeg_quality: u8,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            max_edge: 1536,
            jpeg_quality: 80,
        }
    }
}

/// Turn a raw uploaded file into the payload submitted to the generation
/// service: reject non-images, decode, downscale proportionally, flatten
/// transparency onto white, and re-encode as JPEG.
pub fn preprocess_upload(
    bytes: &[u8],
    declared_mime: &str,
    options: &PreprocessOptions,
) -> Result<SourceImage, StudioError> {
    if !declared_mime
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
    {
        return Err(StudioError::UnsupportedType);
    }

    let decoded = image::load_from_memory(bytes).map_err(|_| StudioError::DecodeFailed)?;
    let longest = decoded.width().max(decoded.height());
    let scaled = if longest > options.max_edge {
        decoded.resize(options.max_edge, options.max_edge, FilterType::Lanczos3)
    } else {
        decoded
    };

    let flattened = flatten_onto_white(&scaled);
    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, options.jpeg_quality);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(flattened))
        .map_err(|_| StudioError::EncodeFailed)?;

    Ok(ImagePayload::new(BASE64.encode(&encoded), "image/jpeg"))
}

/// Composite over an opaque white background so transparent regions do not
/// render as black once the alpha channel is dropped by the JPEG encode.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut canvas = RgbImage::from_pixel(rgba.width(), rgba.height(), Rgb([255, 255, 255]));
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u32::from(pixel[3]);
        if alpha == 0 {
            continue;
        }
        let under = canvas.get_pixel_mut(x, y);
        for channel in 0..3 {
            let over = u32::from(pixel[channel]);
            let base = u32::from(under[channel]);
            under[channel] = ((over * alpha + base * (255 - alpha)) / 255) as u8;
        }
    }
    canvas
}

// ---------------------------------------------------------------------------
// Generation client

const GENERATE_SYSTEM_INSTRUCTION: &str = r#"You are an expert professional portrait photographer specializing in identity-preserving transformations.

ABSOLUTE REQUIREMENTS - FACIAL IDENTITY PRESERVATION:
1. BONE STRUCTURE: Preserve exact skull shape, cheekbone prominence, jaw width, chin shape, and forehead contours
2. FACIAL PROPORTIONS: Maintain precise eye spacing, nose-to-mouth distance, face width-to-height ratio, and feature positioning
3. UNIQUE FEATURES: Keep all distinguishing characteristics - eye shape, iris color, nose bridge, nostril shape, lip fullness, ear shape, facial asymmetries, moles, freckles, scars
4. SKIN CHARACTERISTICS: Preserve natural skin tone, texture, pores, and any unique markings
5. FACIAL GEOMETRY: Lock the exact 3D facial structure - the person must be unmistakably recognizable

ALLOWED VARIATIONS ONLY:
- Professional styling (hair, makeup, attire)
- Background and environment
- Lighting direction and quality
- Facial expression (if requested)
- Image quality and resolution

FORBIDDEN CHANGES:
- Any alteration to facial bone structure
- Changes to eye color, shape, or spacing
- Modifications to nose shape or size
- Alterations to mouth shape or lip proportions
- Face shape or jawline changes
- Removal or addition of facial features
- Age progression or regression
- Gender presentation changes
- Ethnicity or racial feature modifications

OUTPUT REQUIREMENTS:
- Photorealistic quality with natural skin texture
- Professional studio-grade lighting
- Sharp focus on facial features
- No AI artifacts or smoothing
- Natural pore visibility and skin detail"#;

const EDIT_SYSTEM_INSTRUCTION: &str = r#"You are an expert professional portrait retoucher specializing in non-destructive edits.

ABSOLUTE IDENTITY PRESERVATION RULES:
1. FACIAL STRUCTURE: Never alter bone structure, facial proportions, or feature geometry
2. UNIQUE FEATURES: Preserve all distinguishing characteristics (eyes, nose, mouth, ears, skin markings)
3. FACIAL IDENTITY: The person must remain unmistakably the same individual
4. NATURAL APPEARANCE: Maintain realistic skin texture and natural features

EDITING CONSTRAINTS:
- Apply ONLY the specific requested changes
- Preserve facial identity at all costs
- Maintain photorealistic quality
- Keep natural skin texture and pores visible
- No face morphing or feature alterations unless explicitly requested
- If edit conflicts with identity preservation, prioritize identity"#;

fn generation_prompt(style_prompt: &str) -> String {
    format!(
        r#"TASK: Create a professional headshot transformation of this person.

STYLE REQUIREMENTS: {style_prompt}

CRITICAL CONSTRAINTS:
- The subject's face MUST remain identical to the input image
- Preserve ALL unique facial characteristics and proportions
- Only modify: background, lighting, attire, and styling
- Maintain natural skin texture with visible pores
- Ensure photorealistic quality without AI smoothing
- Keep the exact same person - no face drifting or feature blending

TECHNICAL SPECIFICATIONS:
- High-resolution professional headshot
- Studio-quality lighting matching the style description
- Sharp focus on facial features
- Natural color grading
- Professional composition and framing

Remember: The person in the output must be unmistakably the SAME individual as in the input."#
    )
}

fn edit_prompt(edit_text: &str) -> String {
    format!(
        r#"EDIT REQUEST: {edit_text}

CRITICAL RULES:
- Apply ONLY the requested edit
- DO NOT alter facial structure, proportions, or unique features
- Preserve the subject's exact facial identity
- Maintain natural skin texture and photorealism
- Keep all distinguishing characteristics intact
- The person must remain unmistakably the same individual

If the edit request conflicts with identity preservation, apply the edit in a way that minimizes facial changes while achieving the desired effect."#
    )
}

/// The seam between the workflow and the generation service. Both operations
/// submit one inline image plus composed instruction text and yield exactly
/// one image back.
pub trait HeadshotBackend {
    fn generate(
        &self,
        credential: &str,
        source: &ImagePayload,
        style_prompt: &str,
        model_id: &str,
    ) -> Result<GenerationResult, StudioError>;

    fn edit(
        &self,
        credential: &str,
        current: &ImagePayload,
        edit_text: &str,
        model_id: &str,
    ) -> Result<GenerationResult, StudioError>;
}

pub struct GeminiClient {
    api_base: String,
    http: HttpClient,
    models: ModelCatalog,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            http: HttpClient::new(),
            models: ModelCatalog::default(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    /// Relaxed thresholds so legitimate portraits are not false-positive
    /// blocked by skin detection.
    fn default_safety_settings() -> Vec<Value> {
        [
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_HARASSMENT",
        ]
        .into_iter()
        .map(|category| {
            json!({
                "category": category,
                "threshold": "BLOCK_ONLY_HIGH",
            })
        })
        .collect()
    }

    fn build_payload(image: &ImagePayload, instruction: &str, system_instruction: &str) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            Value::Array(vec![json!({
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": image.mime_type,
                            "data": image.data,
                        }
                    },
                    { "text": instruction },
                ],
            })]),
        );
        payload.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system_instruction }] }),
        );
        payload.insert(
            "safetySettings".to_string(),
            Value::Array(Self::default_safety_settings()),
        );
        Value::Object(payload)
    }

    fn submit(
        &self,
        credential: &str,
        model_id: &str,
        payload: &Value,
    ) -> Result<GenerationResult, StudioError> {
        if credential.trim().is_empty() {
            return Err(StudioError::MissingCredential);
        }
        let premium_model = self.models.is_premium(model_id);
        let endpoint = self.endpoint_for_model(model_id);

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", credential)])
            .json(payload)
            .send()
            .map_err(|err| match err.status() {
                Some(status) => classify_status(status.as_u16(), premium_model),
                None => classify_transport(&err.to_string(), premium_model),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), premium_model));
        }

        let response_payload: Value = response
            .json()
            .map_err(|err| StudioError::Transport(err.to_string()))?;
        extract_image(&response_payload)
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadshotBackend for GeminiClient {
    fn generate(
        &self,
        credential: &str,
        source: &ImagePayload,
        style_prompt: &str,
        model_id: &str,
    ) -> Result<GenerationResult, StudioError> {
        let payload = Self::build_payload(
            source,
            &generation_prompt(style_prompt),
            GENERATE_SYSTEM_INSTRUCTION,
        );
        self.submit(credential, model_id, &payload)
    }

    fn edit(
        &self,
        credential: &str,
        current: &ImagePayload,
        edit_text: &str,
        model_id: &str,
    ) -> Result<GenerationResult, StudioError> {
        let payload = Self::build_payload(current, &edit_prompt(edit_text), EDIT_SYSTEM_INSTRUCTION);
        self.submit(credential, model_id, &payload)
    }
}

/// Walk a `generateContent` response for the image payload. Abnormal finish
/// reasons take precedence, then missing candidates, then text-only content.
pub fn extract_image(response_payload: &Value) -> Result<GenerationResult, StudioError> {
    let candidates = response_payload.get("candidates").and_then(Value::as_array);

    if let Some(first) = candidates.and_then(|rows| rows.first()) {
        if let Some(reason) = first.get("finishReason").and_then(Value::as_str) {
            if reason != "STOP" {
                if reason.contains("SAFETY") {
                    return Err(StudioError::SafetyBlocked);
                }
                return Err(StudioError::GenerationBlocked {
                    reason: reason.to_string(),
                });
            }
        }
    }

    let candidates = candidates
        .filter(|rows| !rows.is_empty())
        .ok_or(StudioError::EmptyResponse)?;

    let parts = candidates[0]
        .get("content")
        .and_then(Value::as_object)
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for part in &parts {
        let inline = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object);
        let Some(inline) = inline else { continue };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        return Ok(ImagePayload::new(data, mime_type));
    }

    Err(StudioError::NoImageProduced)
}

fn classify_status(code: u16, premium_model: bool) -> StudioError {
    match code {
        403 => StudioError::PermissionDenied { premium_model },
        400 => StudioError::InvalidRequest,
        429 => StudioError::RateLimited,
        500 | 503 => StudioError::ServiceUnavailable,
        other => StudioError::Transport(format!("Gemini request failed ({other})")),
    }
}

/// Classification for transport errors that carry no response status: scan
/// the rendered error for embedded status-code evidence.
fn classify_transport(detail: &str, premium_model: bool) -> StudioError {
    if detail.contains("403") {
        return StudioError::PermissionDenied { premium_model };
    }
    if detail.contains("400") {
        return StudioError::InvalidRequest;
    }
    if detail.contains("429") {
        return StudioError::RateLimited;
    }
    if detail.contains("500") || detail.contains("503") {
        return StudioError::ServiceUnavailable;
    }
    StudioError::Transport(detail.trim().to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// ---------------------------------------------------------------------------
// Usage telemetry

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageMetrics {
    pub total_requests: u64,
    pub total_errors: u64,
    pub requests_per_minute: usize,
    pub last_latency_ms: u64,
    /// Percentage, rounded; 0 when no requests have completed.
    pub error_rate: u8,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: u64,
    total_errors: u64,
    last_latency_ms: u64,
    requests_per_minute: usize,
    request_log: Vec<Instant>,
}

/// Wraps every generation call with request counting, rolling-window
/// bookkeeping, and latency capture. A background sweep prunes the rolling
/// log and republishes the per-minute count only when it changed.
pub struct MetricsTracker {
    state: Arc<Mutex<MetricsState>>,
    stop_tx: Option<Sender<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl MetricsTracker {
    pub fn new(sweep_interval: Duration, events: Option<EventWriter>) -> Self {
        let state = Arc::new(Mutex::new(MetricsState::default()));
        let sweep_state = Arc::clone(&state);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let sweeper = thread::spawn(move || loop {
            match stop_rx.recv_timeout(sweep_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            let mut published = None;
            {
                let Ok(mut state) = sweep_state.lock() else {
                    return;
                };
                let now = Instant::now();
                if prune_window(&mut state.request_log, now, ROLLING_WINDOW) {
                    state.requests_per_minute = state.request_log.len();
                    published = Some(state.requests_per_minute);
                }
            }
            if let (Some(count), Some(events)) = (published, events.as_ref()) {
                let _ = events.emit(
                    "rpm_updated",
                    event_payload(json!({ "requests_per_minute": count })),
                );
            }
        });

        Self {
            state,
            stop_tx: Some(stop_tx),
            sweeper: Some(sweeper),
        }
    }

    /// Instrument one request. The wrapped result is always passed through
    /// unaltered; telemetry never swallows a failure.
    pub fn track<T>(
        &self,
        op: impl FnOnce() -> Result<T, StudioError>,
    ) -> Result<T, StudioError> {
        let started = Instant::now();
        if let Ok(mut state) = self.state.lock() {
            state.total_requests += 1;
            state.request_log.push(started);
            state.requests_per_minute = state.request_log.len();
        }

        let result = op();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Ok(mut state) = self.state.lock() {
            state.last_latency_ms = elapsed_ms;
            if result.is_err() {
                state.total_errors += 1;
            }
        }
        result
    }

    pub fn snapshot(&self) -> UsageMetrics {
        match self.state.lock() {
            Ok(state) => UsageMetrics {
                total_requests: state.total_requests,
                total_errors: state.total_errors,
                requests_per_minute: state.requests_per_minute,
                last_latency_ms: state.last_latency_ms,
                error_rate: error_rate(state.total_requests, state.total_errors),
            },
            Err(_) => UsageMetrics::default(),
        }
    }
}

impl Drop for MetricsTracker {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.sweeper.take() {
            let _ = handle.join();
        }
    }
}

fn prune_window(log: &mut Vec<Instant>, now: Instant, window: Duration) -> bool {
    let before = log.len();
    log.retain(|stamp| now.saturating_duration_since(*stamp) <= window);
    log.len() != before
}

fn error_rate(total: u64, errors: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((errors as f64 / total as f64) * 100.0).round() as u8
}

// ---------------------------------------------------------------------------
// Workflow

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPhase {
    Upload,
    StyleSelection,
    Generating,
    Result,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

/// Outcomes the embedding UI consumes: user-facing messages and requests to
/// collect a credential out-of-band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioSignal {
    Toast { message: String, kind: ToastKind },
    CredentialRequired,
}

/// Single owner of the workflow: the active phase, the source and generated
/// images, and the chosen style/model. All mutation goes through the named
/// operations below, which are the only place transition legality is decided.
pub struct StudioSession {
    phase: WorkflowPhase,
    source_image: Option<SourceImage>,
    generated_image: Option<GenerationResult>,
    selected_style: Option<String>,
    custom_style_text: String,
    selected_model: String,
    styles: StyleCatalog,
    models: ModelCatalog,
    backend: Box<dyn HeadshotBackend>,
    credentials: CredentialStore,
    cache: ImageCache,
    events: EventWriter,
    tracker: MetricsTracker,
    signals: Sender<StudioSignal>,
    preprocess: PreprocessOptions,
    credential_prompt_delay: Duration,
}

impl StudioSession {
    pub fn new(
        backend: Box<dyn HeadshotBackend>,
        credentials: CredentialStore,
        cache: ImageCache,
        events: EventWriter,
        signals: Sender<StudioSignal>,
    ) -> Self {
        let tracker = MetricsTracker::new(SWEEP_INTERVAL, Some(events.clone()));
        Self {
            phase: WorkflowPhase::Upload,
            source_image: None,
            generated_image: None,
            selected_style: None,
            custom_style_text: String::new(),
            selected_model: DEFAULT_MODEL_ID.to_string(),
            styles: StyleCatalog::default(),
            models: ModelCatalog::default(),
            backend,
            credentials,
            cache,
            events,
            tracker,
            signals,
            preprocess: PreprocessOptions::default(),
            credential_prompt_delay: CREDENTIAL_PROMPT_DELAY,
        }
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    pub fn metrics(&self) -> UsageMetrics {
        self.tracker.snapshot()
    }

    pub fn source_image(&self) -> Option<&SourceImage> {
        self.source_image.as_ref()
    }

    pub fn generated_image(&self) -> Option<&GenerationResult> {
        self.generated_image.as_ref()
    }

    pub fn styles(&self) -> &StyleCatalog {
        &self.styles
    }

    pub fn models(&self) -> &ModelCatalog {
        &self.models
    }

    pub fn set_credential_prompt_delay(&mut self, delay: Duration) {
        self.credential_prompt_delay = delay;
    }

    /// Upload → StyleSelection once preprocessing succeeds. A preprocessing
    /// failure surfaces a message and leaves the phase untouched.
    pub fn accept_upload(
        &mut self,
        bytes: &[u8],
        declared_mime: &str,
    ) -> Result<(), StudioError> {
        if self.phase != WorkflowPhase::Upload {
            return Ok(());
        }
        self.toast("Processing your photo...", ToastKind::Info);
        match preprocess_upload(bytes, declared_mime, &self.preprocess) {
            Ok(source) => {
                self.log(
                    "upload_accepted",
                    json!({
                        "declared_mime": declared_mime,
                        "input_bytes": bytes.len(),
                    }),
                );
                self.source_image = Some(source);
                self.phase = WorkflowPhase::StyleSelection;
                self.toast("Photo ready! Choose a style.", ToastKind::Success);
                Ok(())
            }
            Err(err) => {
                self.log("upload_rejected", json!({ "error": err.to_string() }));
                self.toast(&err.to_string(), ToastKind::Error);
                Err(err)
            }
        }
    }

    pub fn select_style(&mut self, style_id: &str) -> bool {
        if self.styles.get(style_id).is_none() {
            return false;
        }
        self.selected_style = Some(style_id.to_string());
        true
    }

    pub fn set_custom_style_text(&mut self, text: &str) {
        self.custom_style_text = text.to_string();
    }

    pub fn select_model(&mut self, model_id: &str) -> bool {
        if self.models.get(model_id).is_none() {
            return false;
        }
        self.selected_model = model_id.to_string();
        true
    }

    /// StyleSelection → Generating → Result, or back to StyleSelection on
    /// failure. Refused before any request when preconditions are not met;
    /// a missing credential raises a prompt signal instead of failing.
    pub fn request_generate(&mut self) -> Result<(), StudioError> {
        if self.phase != WorkflowPhase::StyleSelection {
            return Ok(());
        }
        let Some(source) = self.source_image.clone() else {
            return Ok(());
        };
        let Some(style) = self
            .selected_style
            .as_deref()
            .and_then(|id| self.styles.get(id))
            .cloned()
        else {
            return Ok(());
        };
        let Some(style_prompt) = style.resolve_prompt(&self.custom_style_text) else {
            self.toast("Please describe your custom style.", ToastKind::Error);
            return Ok(());
        };
        let Some(credential) = self.credentials.load() else {
            let _ = self.signals.send(StudioSignal::CredentialRequired);
            return Ok(());
        };

        let model_id = self.selected_model.clone();
        let key = content_fingerprint(&source, &style_prompt, &model_id);
        if let Some(cached) = self.cache.get(&key) {
            self.log("cache_hit", json!({ "key": key }));
            self.generated_image = Some(cached);
            self.phase = WorkflowPhase::Result;
            self.toast("Headshot ready!", ToastKind::Success);
            return Ok(());
        }

        self.phase = WorkflowPhase::Generating;
        self.log(
            "generation_started",
            json!({ "style": style.id, "model": model_id }),
        );

        let result = self.tracker.track(|| {
            self.backend
                .generate(&credential, &source, &style_prompt, &model_id)
        });

        match result {
            Ok(image) => {
                if !self.cache.put(&key, &image) {
                    self.log("cache_write_failed", json!({ "key": key }));
                }
                self.log(
                    "generation_succeeded",
                    json!({ "model": model_id, "latency_ms": self.tracker.snapshot().last_latency_ms }),
                );
                self.generated_image = Some(image);
                self.phase = WorkflowPhase::Result;
                self.toast("Headshot ready!", ToastKind::Success);
                Ok(())
            }
            Err(err) => {
                self.log("generation_failed", json!({ "error": err.to_string() }));
                self.toast(&err.to_string(), ToastKind::Error);
                self.phase = WorkflowPhase::StyleSelection;
                self.schedule_credential_prompt_if_needed(&err);
                Err(err)
            }
        }
    }

    /// Result → Generating → Result. A failed edit keeps the current result
    /// on screen instead of discarding it.
    pub fn request_edit(&mut self, edit_text: &str) -> Result<(), StudioError> {
        if self.phase != WorkflowPhase::Result {
            return Ok(());
        }
        let trimmed = edit_text.trim().to_string();
        if trimmed.is_empty() {
            return Ok(());
        }
        let Some(current) = self.generated_image.clone() else {
            return Ok(());
        };
        let Some(credential) = self.credentials.load() else {
            let _ = self.signals.send(StudioSignal::CredentialRequired);
            return Ok(());
        };

        let model_id = self.selected_model.clone();
        self.phase = WorkflowPhase::Generating;
        self.log(
            "edit_started",
            json!({ "edit": trimmed, "model": model_id }),
        );

        let result = self
            .tracker
            .track(|| self.backend.edit(&credential, &current, &trimmed, &model_id));

        match result {
            Ok(image) => {
                let key = content_fingerprint(&current, &trimmed, &model_id);
                if !self.cache.put(&key, &image) {
                    self.log("cache_write_failed", json!({ "key": key }));
                }
                self.log("edit_succeeded", json!({ "model": model_id }));
                self.generated_image = Some(image);
                self.phase = WorkflowPhase::Result;
                self.toast("Refinements applied.", ToastKind::Success);
                Ok(())
            }
            Err(err) => {
                self.log("edit_failed", json!({ "error": err.to_string() }));
                self.toast(&err.to_string(), ToastKind::Error);
                self.phase = WorkflowPhase::Result;
                self.schedule_credential_prompt_if_needed(&err);
                Err(err)
            }
        }
    }

    pub fn save_credential(&mut self, credential: &str) -> anyhow::Result<()> {
        self.credentials.save(credential)?;
        if credential.trim().is_empty() {
            self.log("credential_cleared", json!({}));
            self.toast("Studio key removed.", ToastKind::Info);
        } else {
            self.log("credential_saved", json!({}));
            self.toast("Studio key connected.", ToastKind::Success);
        }
        Ok(())
    }

    /// Any phase → Upload, dropping the source image, the generated image,
    /// and the style selection.
    pub fn reset(&mut self) {
        self.source_image = None;
        self.generated_image = None;
        self.selected_style = None;
        self.custom_style_text.clear();
        self.phase = WorkflowPhase::Upload;
        self.log("session_reset", json!({}));
    }

    /// After an authorization failure the credential prompt is raised on a
    /// delay so the error message stays visible first. Teardown cancels
    /// delivery: the send is a no-op once the receiver is gone.
    fn schedule_credential_prompt_if_needed(&self, err: &StudioError) {
        if !matches!(err, StudioError::PermissionDenied { .. }) {
            return;
        }
        let signals = self.signals.clone();
        let delay = self.credential_prompt_delay;
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = signals.send(StudioSignal::CredentialRequired);
        });
    }

    fn toast(&self, message: &str, kind: ToastKind) {
        let _ = self.signals.send(StudioSignal::Toast {
            message: message.to_string(),
            kind,
        });
    }

    fn log(&self, event_type: &str, payload: Value) {
        let _ = self.events.emit(event_type, event_payload(payload));
    }
}

fn event_payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
