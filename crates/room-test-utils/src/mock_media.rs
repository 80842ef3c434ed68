//! Mock capture devices.
//!
//! Every constraint set succeeds unless configured to fail. Issued tracks are
//! recorded so tests can assert they were stopped.
//!
//! ```rust,ignore
//! let devices = MockMediaDevices::builder()
//!     .fail(MediaConstraints::AUDIO_VIDEO, DeviceError::PermissionDenied)
//!     .build();
//! ```

use async_trait::async_trait;
use room_client::media::{DeviceError, MediaConstraints, MediaDevices, MediaTrack, TrackKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MockMediaDevices {
    failures: Vec<(MediaConstraints, DeviceError)>,
    display_failure: Option<DeviceError>,
    requests: Mutex<Vec<MediaConstraints>>,
    issued: Mutex<Vec<MediaTrack>>,
    next_id: AtomicUsize,
}

impl MockMediaDevices {
    #[must_use]
    pub fn builder() -> MockMediaDevicesBuilder {
        MockMediaDevicesBuilder::default()
    }

    /// Grants every request.
    #[must_use]
    pub fn working() -> Self {
        Self::default()
    }

    /// Denies every request, including screen capture.
    #[must_use]
    pub fn denying() -> Self {
        Self::builder()
            .fail(MediaConstraints::AUDIO_VIDEO, DeviceError::PermissionDenied)
            .fail(MediaConstraints::AUDIO_ONLY, DeviceError::PermissionDenied)
            .fail(MediaConstraints::VIDEO_ONLY, DeviceError::PermissionDenied)
            .fail_display(DeviceError::PermissionDenied)
            .build()
    }

    /// Constraint sets requested, in order.
    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.requests.lock().unwrap().clone()
    }

    /// Every track handed out, including screen tracks.
    pub fn issued_tracks(&self) -> Vec<MediaTrack> {
        self.issued.lock().unwrap().clone()
    }

    /// Issued tracks not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|track| !track.is_stopped())
            .count()
    }

    fn issue(&self, kind: TrackKind) -> MediaTrack {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let label = match kind {
            TrackKind::Audio => "mic",
            TrackKind::Video => "cam",
        };
        let track = MediaTrack::new(format!("{label}-{n}"), kind);
        self.issued.lock().unwrap().push(track.clone());
        track
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Vec<MediaTrack>, DeviceError> {
        self.requests.lock().unwrap().push(constraints);

        if let Some((_, error)) = self.failures.iter().find(|(c, _)| *c == constraints) {
            return Err(error.clone());
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(self.issue(TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(self.issue(TrackKind::Video));
        }
        Ok(tracks)
    }

    async fn acquire_display(&self) -> Result<MediaTrack, DeviceError> {
        if let Some(error) = &self.display_failure {
            return Err(error.clone());
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let track = MediaTrack::new(format!("screen-{n}"), TrackKind::Video);
        self.issued.lock().unwrap().push(track.clone());
        Ok(track)
    }
}

/// Builder for `MockMediaDevices`.
#[derive(Debug, Default)]
pub struct MockMediaDevicesBuilder {
    failures: Vec<(MediaConstraints, DeviceError)>,
    display_failure: Option<DeviceError>,
}

impl MockMediaDevicesBuilder {
    /// Fail every request for `constraints` with `error`.
    #[must_use]
    pub fn fail(mut self, constraints: MediaConstraints, error: DeviceError) -> Self {
        self.failures.push((constraints, error));
        self
    }

    #[must_use]
    pub fn fail_display(mut self, error: DeviceError) -> Self {
        self.display_failure = Some(error);
        self
    }

    #[must_use]
    pub fn build(self) -> MockMediaDevices {
        MockMediaDevices {
            failures: self.failures,
            display_failure: self.display_failure,
            ..MockMediaDevices::default()
        }
    }
}
