//! Media capture acquisition with quality and kind fallback
//!
//! The platform capture capability is abstracted behind [`MediaCapture`];
//! the embedding application supplies the real device access. This module
//! owns the fallback ladder: failed video capture downgrades the call to
//! audio-only unless the user denied permission outright, and
//! overconstrained requests get one retry at minimal quality.

use crate::types::{MediaKind, TrackKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Capture failures classified for user-facing handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// The user denied device access
    #[error("permission to use capture devices was denied")]
    PermissionDenied,
    /// No matching capture device exists
    #[error("no capture device available")]
    NoDevice,
    /// The device is held by another application
    #[error("capture device is in use by another application")]
    DeviceBusy,
    /// The requested constraints cannot be satisfied by any device
    #[error("capture constraints cannot be satisfied")]
    ConstraintsUnsatisfiable,
    /// Anything the platform reported that we do not classify
    #[error("capture failed: {0}")]
    Unknown(String),
}

impl MediaError {
    /// Map a platform failure name onto the error taxonomy.
    ///
    /// The names follow the convention of browser capture APIs, which the
    /// capture implementations in the field report verbatim.
    #[must_use]
    pub fn classify(name: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                Self::PermissionDenied
            }
            "NotFoundError" | "DevicesNotFoundError" => Self::NoDevice,
            "NotReadableError" | "TrackStartError" | "AbortError" => Self::DeviceBusy,
            "OverconstrainedError" | "ConstraintNotSatisfiedError" => {
                Self::ConstraintsUnsatisfiable
            }
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Raw failure reported by a capture implementation.
#[derive(Debug, Clone)]
pub struct CaptureFailure {
    /// Platform error name, classified via [`MediaError::classify`]
    pub name: String,
}

impl CaptureFailure {
    /// Wrap a platform error name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Constraint tier for a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureQuality {
    /// Preferred resolution and sample settings
    Standard,
    /// Bare-minimum constraints, used after an overconstrained failure
    Minimal,
}

/// One concrete capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    /// Request a microphone track
    pub audio: bool,
    /// Request a camera track
    pub video: bool,
    /// Constraint tier
    pub quality: CaptureQuality,
}

impl CaptureProfile {
    /// Standard-quality profile for the given media kind (audio always on)
    #[must_use]
    pub fn for_kind(kind: MediaKind) -> Self {
        Self {
            audio: true,
            video: kind.has_video(),
            quality: CaptureQuality::Standard,
        }
    }

    /// The same request at minimal quality
    #[must_use]
    pub fn minimal(mut self) -> Self {
        self.quality = CaptureQuality::Minimal;
        self
    }

    /// The same request without video
    #[must_use]
    pub fn audio_only(mut self) -> Self {
        self.video = false;
        self.quality = CaptureQuality::Standard;
        self
    }
}

/// A live local capture track handle.
pub trait LocalTrack: Send + Sync {
    /// Stable track identifier
    fn id(&self) -> &str;
    /// Audio or video
    fn kind(&self) -> TrackKind;
    /// Enable or mute the track without releasing the device
    fn set_enabled(&self, enabled: bool);
    /// Current enabled flag
    fn is_enabled(&self) -> bool;
    /// Release the underlying device. Implementations may assume this is
    /// called at most once per track.
    fn stop(&self);
}

/// Platform capture capability.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Request live tracks for the profile, or fail with a platform error name
    async fn request(&self, profile: CaptureProfile) -> Result<LocalTracks, CaptureFailure>;
}

/// Exclusive owner of a set of live capture handles.
///
/// `stop_all` is guarded so the devices are released exactly once no matter
/// how many teardown paths race to it.
pub struct LocalTracks {
    tracks: Vec<Box<dyn LocalTrack>>,
    stopped: AtomicBool,
}

impl LocalTracks {
    /// Take ownership of freshly captured tracks
    #[must_use]
    pub fn new(tracks: Vec<Box<dyn LocalTrack>>) -> Self {
        Self {
            tracks,
            stopped: AtomicBool::new(false),
        }
    }

    /// Whether a video track is present
    #[must_use]
    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind() == TrackKind::Video)
    }

    /// Flip the enabled flag of every track of `kind`.
    ///
    /// Returns the new enabled state, or `None` when no such track exists
    /// or the tracks were already stopped.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        let mut new_state = None;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            new_state = Some(enabled);
        }
        new_state
    }

    /// Stop every track. Safe to call from multiple teardown paths; only the
    /// first call releases the devices.
    pub fn stop_all(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(count = self.tracks.len(), "stopping local tracks");
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Borrow the underlying tracks, e.g. to attach them to a negotiator
    #[must_use]
    pub fn tracks(&self) -> &[Box<dyn LocalTrack>] {
        &self.tracks
    }
}

impl Drop for LocalTracks {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl std::fmt::Debug for LocalTracks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTracks")
            .field("count", &self.tracks.len())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

/// Result of a successful acquisition. `kind` reflects any downgrade.
#[derive(Debug)]
pub struct AcquiredMedia {
    /// The live tracks
    pub tracks: LocalTracks,
    /// Effective media kind; `Audio` when video capture fell back
    pub kind: MediaKind,
}

/// Runs the acquisition ladder against a [`MediaCapture`] implementation.
#[derive(Clone)]
pub struct MediaAcquirer {
    capture: std::sync::Arc<dyn MediaCapture>,
}

impl MediaAcquirer {
    /// Build an acquirer around a capture implementation
    pub fn new(capture: std::sync::Arc<dyn MediaCapture>) -> Self {
        Self { capture }
    }

    /// Acquire local media for a call of `kind`.
    ///
    /// Ladder: the standard profile is requested first. An overconstrained
    /// failure gets one retry at minimal quality. If video was requested and
    /// the failure is anything but a permission denial, the request falls
    /// back to audio-only and the result reports the downgraded kind.
    /// Permission denials are terminal immediately.
    pub async fn acquire(&self, kind: MediaKind) -> Result<AcquiredMedia, MediaError> {
        let profile = CaptureProfile::for_kind(kind);
        match self.request_with_quality_retry(profile).await {
            Ok(tracks) => Ok(AcquiredMedia { tracks, kind }),
            Err(MediaError::PermissionDenied) => Err(MediaError::PermissionDenied),
            Err(err) if profile.video => {
                info!(error = %err, "video capture failed, falling back to audio-only");
                let tracks = self
                    .request_with_quality_retry(profile.audio_only())
                    .await?;
                Ok(AcquiredMedia {
                    tracks,
                    kind: MediaKind::Audio,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn request_with_quality_retry(
        &self,
        profile: CaptureProfile,
    ) -> Result<LocalTracks, MediaError> {
        match self.capture.request(profile).await {
            Ok(tracks) => Ok(tracks),
            Err(failure) => {
                let err = MediaError::classify(&failure.name);
                if err == MediaError::ConstraintsUnsatisfiable
                    && profile.quality == CaptureQuality::Standard
                {
                    warn!("capture overconstrained, retrying at minimal quality");
                    self.capture
                        .request(profile.minimal())
                        .await
                        .map_err(|f| MediaError::classify(&f.name))
                } else {
                    Err(err)
                }
            }
        }
    }
}

impl std::fmt::Debug for MediaAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaAcquirer").finish_non_exhaustive()
    }
}
