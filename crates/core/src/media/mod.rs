//! Host-side media primitives: the input resource, playable elements and the
//! event queue the playback manager drains every frame.

use serde::{Deserialize, Serialize};

use crate::Result;

const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "webm", "mkv"];

/// Opaque file-like input handed over by the UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub name: String,
    /// Declared MIME-ish type, possibly empty.
    pub mime: String,
    /// Host-specific locator (a path, a blob key, ...).
    pub locator: String,
}

impl MediaFile {
    pub fn new(
        name: impl Into<String>,
        mime: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            locator: locator.into(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::classify(&self.mime, &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Video when the type has a `video/` prefix or the filename carries one
    /// of the known video extensions; audio otherwise.
    pub fn classify(mime: &str, name: &str) -> Self {
        if mime.trim().to_ascii_lowercase().starts_with("video/") {
            return Self::Video;
        }

        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            Self::Video
        } else {
            Self::Audio
        }
    }
}

/// Identity of a playable element. Stable for the element's lifetime and
/// never reused by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

/// Temporary resource handle (an "object URL") that must be released.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum ElementEvent {
    /// Enough metadata is available to report the duration.
    LoadedMetadata,
    /// Periodic position report while playing.
    TimeUpdate,
    /// Playback reached the natural end of the media.
    Ended,
}

/// Media decode/output facility provided by the platform.
///
/// Hosts decode and output media themselves; the core only drives transport
/// and reads state back. Every method must be cheap and non-blocking.
pub trait MediaHost {
    /// Creates the hidden, audio-only element. Called at most once per manager.
    fn create_audio_element(&mut self) -> Result<ElementId>;

    fn create_resource_handle(&mut self, file: &MediaFile) -> Result<ResourceHandle>;
    fn release_resource_handle(&mut self, handle: &ResourceHandle);

    /// Points the element at a resource, or detaches it when `None`.
    fn set_source(&mut self, element: ElementId, handle: Option<&ResourceHandle>);
    /// Starts (re)loading whatever source is attached.
    fn load(&mut self, element: ElementId);

    /// Requests playback. The host may refuse, e.g. without a user gesture.
    fn play(&mut self, element: ElementId) -> Result<()>;
    fn pause(&mut self, element: ElementId);
    fn is_paused(&self, element: ElementId) -> bool;
    fn is_ended(&self, element: ElementId) -> bool;

    /// Current position in seconds. May be non-finite while loading.
    fn current_time(&self, element: ElementId) -> f64;
    fn set_current_time(&mut self, element: ElementId, seconds: f64);
    /// Duration in seconds. NaN or infinite when unknown.
    fn duration(&self, element: ElementId) -> f64;

    fn set_playback_rate(&mut self, element: ElementId, rate: f64);
    fn set_element_volume(&mut self, element: ElementId, volume: f64);
    fn set_muted(&mut self, element: ElementId, muted: bool);
    fn set_looping(&mut self, element: ElementId, looping: bool);

    /// Toggles the active/visible styling of a video surface.
    fn set_active(&mut self, element: ElementId, active: bool);

    /// Drains events raised since the last call, oldest first.
    fn take_events(&mut self, element: ElementId) -> Vec<ElementEvent>;
}
