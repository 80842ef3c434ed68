//! Local media acquisition.
//!
//! Capture devices sit behind [`MediaDevices`]. On startup the client walks a
//! fallback order of constraint sets (by default audio+video, then audio only,
//! then video only). A partial success continues the call with a warning; only
//! when every set fails is a typed, fatal [`MediaAccessError`] raised.
//!
//! [`LocalMediaSource`] is the single capture source shared by all peer links.
//! Only the peer orchestrator mutates it.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl MediaConstraints {
    pub const AUDIO_VIDEO: Self = Self {
        video: true,
        audio: true,
    };
    pub const AUDIO_ONLY: Self = Self {
        video: false,
        audio: true,
    };
    pub const VIDEO_ONLY: Self = Self {
        video: true,
        audio: false,
    };

    /// `[audio+video, audio, video]`.
    #[must_use]
    pub fn default_fallback_order() -> Vec<Self> {
        vec![Self::AUDIO_VIDEO, Self::AUDIO_ONLY, Self::VIDEO_ONLY]
    }
}

impl fmt::Display for MediaConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.audio, self.video) {
            (true, true) => f.write_str("audio+video"),
            (true, false) => f.write_str("audio"),
            (false, true) => f.write_str("video"),
            (false, false) => f.write_str("none"),
        }
    }
}

impl FromStr for MediaConstraints {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio+video" | "video+audio" => Ok(Self::AUDIO_VIDEO),
            "audio" => Ok(Self::AUDIO_ONLY),
            "video" => Ok(Self::VIDEO_ONLY),
            other => Err(format!("unknown constraint set '{other}'")),
        }
    }
}

/// A live capture track. Clones share the stop flag.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Release the underlying device.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Failure of a single device request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device not found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

/// Fatal media failure after the whole fallback order was exhausted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("Media access permission denied")]
    PermissionDenied,

    #[error("No capture device found")]
    DeviceNotFound,

    #[error("Media access failed: {0}")]
    Other(String),
}

impl From<DeviceError> for MediaAccessError {
    fn from(error: DeviceError) -> Self {
        match error {
            DeviceError::PermissionDenied => MediaAccessError::PermissionDenied,
            DeviceError::NotFound => MediaAccessError::DeviceNotFound,
            DeviceError::Other(reason) => MediaAccessError::Other(reason),
        }
    }
}

/// Non-fatal downgrade reported while the call proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaWarning {
    NoCamera,
    NoMicrophone,
}

/// Capture devices of the host platform.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open capture tracks matching `constraints`.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Vec<MediaTrack>, DeviceError>;

    /// Open a screen capture video track.
    async fn acquire_display(&self) -> Result<MediaTrack, DeviceError>;
}

/// The local capture source shared by every peer link.
#[derive(Debug, Default)]
pub struct LocalMediaSource {
    audio: Option<MediaTrack>,
    video: Option<MediaTrack>,
    /// Camera track parked while a screen share replaces it.
    parked_camera: Option<MediaTrack>,
    screen_sharing: bool,
}

impl LocalMediaSource {
    /// Build a source from acquired tracks. Extra tracks of the same kind
    /// are stopped.
    #[must_use]
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        let mut source = Self::default();
        for track in tracks {
            let slot = match track.kind() {
                TrackKind::Audio => &mut source.audio,
                TrackKind::Video => &mut source.video,
            };
            if slot.is_some() {
                track.stop();
            } else {
                *slot = Some(track);
            }
        }
        source
    }

    #[must_use]
    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.audio.as_ref()
    }

    /// Outgoing video: the camera, or the screen while sharing.
    #[must_use]
    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.video.as_ref()
    }

    /// Outgoing tracks handed to new peer links.
    #[must_use]
    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.audio.iter().chain(self.video.iter()).cloned().collect()
    }

    #[must_use]
    pub fn is_screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    /// Put `screen` on the outgoing video slot, parking the camera.
    ///
    /// A screen track replacing another screen track stops the old one.
    pub fn start_screen_share(&mut self, screen: MediaTrack) {
        let previous = self.video.replace(screen);
        if self.screen_sharing {
            if let Some(old_screen) = previous {
                old_screen.stop();
            }
        } else {
            self.parked_camera = previous;
            self.screen_sharing = true;
        }
    }

    /// Stop the screen track and restore the camera.
    ///
    /// Returns the restored camera track, if the source had one.
    pub fn stop_screen_share(&mut self) -> Option<MediaTrack> {
        if !self.screen_sharing {
            return None;
        }
        self.screen_sharing = false;

        if let Some(screen) = self.video.take() {
            screen.stop();
        }
        self.video = self.parked_camera.take();
        self.video.clone()
    }

    /// Stop every track. Returns how many were live.
    pub fn stop_all(&mut self) -> usize {
        self.screen_sharing = false;
        let mut stopped = 0;
        for track in [self.audio.take(), self.video.take(), self.parked_camera.take()]
            .into_iter()
            .flatten()
        {
            if !track.is_stopped() {
                track.stop();
                stopped += 1;
            }
        }
        stopped
    }
}

/// Outcome of [`acquire_local_media`].
#[derive(Debug)]
pub struct AcquiredMedia {
    pub source: LocalMediaSource,
    pub constraints: MediaConstraints,
    pub warnings: Vec<MediaWarning>,
}

/// Acquire local media, walking `fallback_order` until one request succeeds.
///
/// A success missing video reports `NoCamera`; one missing audio reports
/// `NoMicrophone`.
///
/// # Errors
///
/// When every request fails: `PermissionDenied` if any attempt was denied,
/// `DeviceNotFound` if every attempt found no device, otherwise `Other`.
pub async fn acquire_local_media(
    devices: &dyn MediaDevices,
    fallback_order: &[MediaConstraints],
) -> Result<AcquiredMedia, MediaAccessError> {
    let mut failures: Vec<DeviceError> = Vec::with_capacity(fallback_order.len());

    for (index, constraints) in fallback_order.iter().copied().enumerate() {
        match devices.acquire(constraints).await {
            Ok(tracks) => {
                let mut warnings = Vec::new();
                if !constraints.video {
                    warnings.push(MediaWarning::NoCamera);
                }
                if !constraints.audio {
                    warnings.push(MediaWarning::NoMicrophone);
                }

                info!(
                    target: "client.media",
                    constraints = %constraints,
                    fallback_step = index,
                    tracks = tracks.len(),
                    "Local media acquired"
                );
                return Ok(AcquiredMedia {
                    source: LocalMediaSource::new(tracks),
                    constraints,
                    warnings,
                });
            }
            Err(e) => {
                warn!(
                    target: "client.media",
                    constraints = %constraints,
                    fallback_step = index,
                    error = %e,
                    "Media request failed, trying next constraint set"
                );
                failures.push(e);
            }
        }
    }

    Err(classify(&failures))
}

fn classify(failures: &[DeviceError]) -> MediaAccessError {
    if failures.contains(&DeviceError::PermissionDenied) {
        return MediaAccessError::PermissionDenied;
    }
    if !failures.is_empty() && failures.iter().all(|e| *e == DeviceError::NotFound) {
        return MediaAccessError::DeviceNotFound;
    }
    match failures.last() {
        Some(last) => MediaAccessError::Other(last.to_string()),
        None => MediaAccessError::Other("no media constraints configured".to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_constraints_parse_and_display() {
        for constraints in MediaConstraints::default_fallback_order() {
            let parsed: MediaConstraints = constraints.to_string().parse().unwrap();
            assert_eq!(parsed, constraints);
        }
        assert!("hologram".parse::<MediaConstraints>().is_err());
    }

    #[test]
    fn test_track_clones_share_stop_flag() {
        let track = MediaTrack::new("cam", TrackKind::Video);
        let clone = track.clone();
        clone.stop();
        assert!(track.is_stopped());
    }

    #[test]
    fn test_source_screen_share_parks_and_restores_camera() {
        let mic = MediaTrack::new("mic", TrackKind::Audio);
        let cam = MediaTrack::new("cam", TrackKind::Video);
        let mut source = LocalMediaSource::new(vec![mic.clone(), cam.clone()]);

        let screen = MediaTrack::new("screen", TrackKind::Video);
        source.start_screen_share(screen.clone());
        assert!(source.is_screen_sharing());
        assert_eq!(source.video_track().unwrap().id(), "screen");
        assert!(!cam.is_stopped());

        let restored = source.stop_screen_share().unwrap();
        assert_eq!(restored.id(), "cam");
        assert!(screen.is_stopped());
        assert!(!source.is_screen_sharing());
        assert_eq!(source.tracks().len(), 2);
    }

    #[test]
    fn test_source_screen_share_without_camera() {
        let mic = MediaTrack::new("mic", TrackKind::Audio);
        let mut source = LocalMediaSource::new(vec![mic]);

        let screen = MediaTrack::new("screen", TrackKind::Video);
        source.start_screen_share(screen.clone());
        assert!(source.is_screen_sharing());

        assert!(source.stop_screen_share().is_none());
        assert!(screen.is_stopped());
        assert!(source.video_track().is_none());
    }

    #[test]
    fn test_stop_all_counts_live_tracks() {
        let mic = MediaTrack::new("mic", TrackKind::Audio);
        let cam = MediaTrack::new("cam", TrackKind::Video);
        let mut source = LocalMediaSource::new(vec![mic.clone(), cam.clone()]);
        source.start_screen_share(MediaTrack::new("screen", TrackKind::Video));

        assert_eq!(source.stop_all(), 3);
        assert!(mic.is_stopped() && cam.is_stopped());
        assert!(source.tracks().is_empty());
        assert_eq!(source.stop_all(), 0);
    }

    #[test]
    fn test_duplicate_kind_is_stopped() {
        let first = MediaTrack::new("cam-1", TrackKind::Video);
        let second = MediaTrack::new("cam-2", TrackKind::Video);
        let source = LocalMediaSource::new(vec![first.clone(), second.clone()]);
        assert_eq!(source.video_track().unwrap().id(), "cam-1");
        assert!(second.is_stopped());
        assert!(!first.is_stopped());
    }

    #[test]
    fn test_classify_failures() {
        assert_eq!(
            classify(&[DeviceError::NotFound, DeviceError::PermissionDenied]),
            MediaAccessError::PermissionDenied
        );
        assert_eq!(
            classify(&[DeviceError::NotFound, DeviceError::NotFound]),
            MediaAccessError::DeviceNotFound
        );
        assert_eq!(
            classify(&[DeviceError::NotFound, DeviceError::Other("busy".into())]),
            MediaAccessError::Other("busy".to_string())
        );
        assert!(matches!(classify(&[]), MediaAccessError::Other(_)));
    }
}
