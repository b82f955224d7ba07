//! AudioTap Facade
//!
//! Wires the catalog, session manager, volume controller and capture engine
//! to one set of platform backends. Input endpoints are captured directly;
//! output endpoints and processes through loopback. [`SystemTap::system`] picks the backends
//! for the current OS: WASAPI on Windows, CPAL enumeration elsewhere (with
//! sessions, volume and capture reporting `FeatureNotAvailable`).

use audiotap_platform::{
    AudioError, AudioSystem, CaptureEngine, CaptureSource, CaptureStream, Device, Direction,
    Endpoint, EndpointCatalog, EndpointId, EndpointListing, EndpointRef, HostApi, HostApiRegistry,
    LoopbackMode, NotificationHandle, Result as AudioResult, Session, SessionCallback,
    SessionCreated, SessionManager, SessionNotificationRegistration, SessionPlatform, StreamMode,
    VolumeBackend, VolumeController, VolumeRange, VolumeTarget,
};

use crate::config::TapConfig;
use crate::error::{TapError, TapResult};
use crate::settings::TapSettings;

/// Session and volume stand-in for platforms without a session API
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSessionApi;

impl NoSessionApi {
    fn unavailable<T>() -> AudioResult<T> {
        Err(AudioError::FeatureNotAvailable(
            "audio sessions are only exposed through WASAPI".into(),
        ))
    }
}

impl SessionPlatform for NoSessionApi {
    fn enumerate(&self, _endpoint: &EndpointRef) -> AudioResult<Vec<Session>> {
        Self::unavailable()
    }

    fn prime_default_session(&self, _endpoint: &EndpointRef) -> AudioResult<()> {
        Self::unavailable()
    }

    fn prime_with_audio_client(&self, _endpoint: &EndpointRef, _pid: u32) -> AudioResult<()> {
        Self::unavailable()
    }

    fn register_notification(
        &self,
        _endpoint: &EndpointRef,
        _callback: SessionCallback,
    ) -> AudioResult<Box<dyn NotificationHandle>> {
        Self::unavailable()
    }
}

impl VolumeBackend for NoSessionApi {
    fn range(&self, _target: &VolumeTarget) -> AudioResult<VolumeRange> {
        Self::unavailable()
    }

    fn volume(&self, _target: &VolumeTarget) -> AudioResult<f32> {
        Self::unavailable()
    }

    fn set_volume(&self, _target: &VolumeTarget, _value: f32) -> AudioResult<()> {
        Self::unavailable()
    }

    fn is_muted(&self, _target: &VolumeTarget) -> AudioResult<bool> {
        Self::unavailable()
    }

    fn set_mute(&self, _target: &VolumeTarget, _muted: bool) -> AudioResult<()> {
        Self::unavailable()
    }
}

#[cfg(target_os = "windows")]
pub type SystemTap = AudioTap<
    audiotap_platform::windows::WasapiAudioSystem,
    audiotap_platform::windows::WasapiSessionPlatform,
    audiotap_platform::windows::WasapiVolume,
>;

#[cfg(not(target_os = "windows"))]
pub type SystemTap = AudioTap<crate::device::CpalAudioSystem, NoSessionApi, NoSessionApi>;

/// One entry point for endpoint listing, session control and capture
pub struct AudioTap<S: AudioSystem, P: SessionPlatform, V: VolumeBackend> {
    config: TapConfig,
    catalog: EndpointCatalog<S>,
    sessions: SessionManager<P>,
    volume: VolumeController<V>,
    engine: CaptureEngine,
}

impl SystemTap {
    /// Backends for the current OS
    pub fn system(config: TapConfig) -> TapResult<Self> {
        #[cfg(target_os = "windows")]
        {
            use audiotap_platform::windows::{WasapiAudioSystem, WasapiSessionPlatform, WasapiVolume};
            Self::new(
                WasapiAudioSystem::new(),
                WasapiSessionPlatform::new(),
                WasapiVolume::with_retry_delay(config.session.retry_delay()),
                config,
            )
        }

        #[cfg(not(target_os = "windows"))]
        {
            Self::new(crate::device::CpalAudioSystem::new(), NoSessionApi, NoSessionApi, config)
        }
    }

    /// Backends for the current OS, configured from persisted settings
    pub fn from_settings(settings: &TapSettings) -> TapResult<Self> {
        Self::system(settings.config.clone())
    }
}

impl<S: AudioSystem, P: SessionPlatform, V: VolumeBackend> AudioTap<S, P, V> {
    pub fn new(system: S, sessions: P, volume: V, config: TapConfig) -> TapResult<Self> {
        config.validate().map_err(TapError::ConfigError)?;

        Ok(Self {
            catalog: EndpointCatalog::new(system),
            sessions: SessionManager::with_retry_delay(sessions, config.session.retry_delay()),
            volume: VolumeController::new(volume),
            engine: CaptureEngine::new(config.capture.clone()),
            config,
        })
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    // ========================================================================
    // Host APIs and Endpoints
    // ========================================================================

    pub fn host_apis(&self) -> TapResult<Vec<HostApi>> {
        Ok(HostApiRegistry::new(self.catalog.system()).list_host_apis()?)
    }

    pub fn default_endpoint(&self, host_api_index: usize, direction: Direction) -> TapResult<EndpointId> {
        Ok(HostApiRegistry::new(self.catalog.system()).default_endpoint(host_api_index, direction)?)
    }

    pub fn endpoints(&self) -> TapResult<EndpointListing> {
        Ok(self.catalog.list_endpoints()?)
    }

    pub fn devices(&self) -> TapResult<Vec<Device>> {
        let devices = self.catalog.list_devices()?;
        if devices.is_empty() {
            return Err(TapError::NoDevicesFound);
        }
        Ok(devices)
    }

    pub fn find_endpoint(&self, name: &str, direction: Option<Direction>) -> TapResult<Endpoint> {
        self.catalog.find_endpoint(name, direction).map_err(|e| match e {
            AudioError::NotFound(_) => TapError::DeviceNotFound(name.to_string()),
            other => other.into(),
        })
    }

    // ========================================================================
    // Sessions and Volume
    // ========================================================================

    pub fn sessions(&self, endpoint: &EndpointRef) -> TapResult<Vec<Session>> {
        Ok(self.sessions.enumerate_sessions(endpoint, None)?)
    }

    /// Sessions whose process is not hidden in `settings`
    pub fn visible_sessions(&self, endpoint: &EndpointRef, settings: &TapSettings) -> TapResult<Vec<Session>> {
        Ok(self
            .sessions(endpoint)?
            .into_iter()
            .filter(|s| !s.process_name.as_deref().is_some_and(|n| settings.is_hidden(n)))
            .collect())
    }

    pub fn session_for_process(&self, endpoint: &EndpointRef, pid: u32) -> TapResult<Option<Session>> {
        Ok(self.sessions.session_for_process(endpoint, pid)?)
    }

    /// Keep the returned registration alive for as long as events are wanted
    pub fn watch_sessions<F>(&self, endpoint: &EndpointRef, callback: F) -> TapResult<SessionNotificationRegistration>
    where
        F: Fn(SessionCreated) + Send + Sync + 'static,
    {
        Ok(self.sessions.register_notification(endpoint, callback)?)
    }

    pub fn volume(&self) -> &VolumeController<V> {
        &self.volume
    }

    /// Apply remembered per-process volumes to the sessions on `endpoint`
    ///
    /// Returns how many sessions were adjusted.
    pub fn restore_app_volumes(&self, endpoint: &EndpointRef, settings: &TapSettings) -> TapResult<usize> {
        let mut restored = 0;
        for session in self.sessions(endpoint)? {
            let Some(volume) = session.process_name.as_deref().and_then(|n| settings.app_volume(n)) else {
                continue;
            };
            let target = VolumeTarget::Session {
                endpoint: endpoint.clone(),
                pid: session.pid,
            };
            match self.volume.set_volume(&target, volume) {
                Ok(()) => restored += 1,
                Err(e) => tracing::warn!("Failed to restore volume of pid {}: {}", session.pid, e),
            }
        }
        Ok(restored)
    }

    // ========================================================================
    // Capture
    // ========================================================================

    pub fn capture_endpoint(&self, endpoint: EndpointRef) -> TapResult<CaptureStream> {
        Ok(self.engine.start_source(CaptureSource::Endpoint(endpoint))?)
    }

    /// Capture the first endpoint in `direction` whose name contains `name`
    ///
    /// Output endpoints are recorded through loopback, input endpoints
    /// directly.
    pub fn capture_endpoint_named(&self, name: &str, direction: Direction) -> TapResult<CaptureStream> {
        let endpoint = self.find_endpoint(name, Some(direction))?;
        let endpoint_ref = endpoint
            .endpoint_ref()
            .ok_or_else(|| TapError::DeviceNotFound(format!("{} has no platform id", endpoint.name)))?;
        tracing::info!(
            "Capturing {} ({:?})",
            endpoint.name,
            StreamMode::for_direction(direction)
        );
        self.capture_endpoint(endpoint_ref)
    }

    /// Record a microphone or line in; `None` picks the default input
    pub fn capture_input(&self, name: Option<&str>) -> TapResult<CaptureStream> {
        match name {
            Some(name) => self.capture_endpoint_named(name, Direction::Input),
            None => self.capture_endpoint(EndpointRef::DefaultCapture),
        }
    }

    pub fn capture_process(&self, pid: u32, mode: LoopbackMode) -> TapResult<CaptureStream> {
        Ok(self.engine.start_source(CaptureSource::Process { pid, mode })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use audiotap_platform::{keys, EndpointRecord, PropertyValue, SessionState, SystemSnapshot};

    struct FakeSystem;

    impl AudioSystem for FakeSystem {
        fn snapshot(&self) -> AudioResult<SystemSnapshot> {
            let record = |id: u32, name: &str, inputs: u16, outputs: u16| {
                let mut record = EndpointRecord::new(EndpointId(id), 0);
                record.platform_id = Some(format!("{{endpoint-{}}}", id));
                record.max_input_channels = inputs;
                record.max_output_channels = outputs;
                record.default_sample_rate = 48_000.0;
                record
                    .properties
                    .push((keys::FRIENDLY_NAME.into(), PropertyValue::String(name.into())));
                record
            };

            Ok(SystemSnapshot {
                host_apis: vec![HostApi {
                    index: 0,
                    backend_id: "Fake".into(),
                    name: "Fake Host".into(),
                    device_count: 2,
                    default_input: Some(EndpointId(1)),
                    default_output: Some(EndpointId(0)),
                }],
                endpoints: vec![
                    record(0, "Speakers (Realtek)", 0, 2),
                    record(1, "Microphone (USB)", 1, 0),
                ],
            })
        }
    }

    struct FakeSessions;

    impl SessionPlatform for FakeSessions {
        fn enumerate(&self, endpoint: &EndpointRef) -> AudioResult<Vec<Session>> {
            let session = |pid: u32, name: &str| Session {
                endpoint: endpoint.clone(),
                pid,
                process_name: Some(name.into()),
                display_name: None,
                icon_path: None,
                state: SessionState::Active,
                volume: 1.0,
                muted: false,
            };
            Ok(vec![session(100, "firefox"), session(200, "svchost")])
        }

        fn prime_default_session(&self, _endpoint: &EndpointRef) -> AudioResult<()> {
            Ok(())
        }

        fn prime_with_audio_client(&self, _endpoint: &EndpointRef, _pid: u32) -> AudioResult<()> {
            Ok(())
        }

        fn register_notification(
            &self,
            _endpoint: &EndpointRef,
            _callback: SessionCallback,
        ) -> AudioResult<Box<dyn NotificationHandle>> {
            Err(AudioError::FeatureNotAvailable("fake".into()))
        }
    }

    #[derive(Default, Clone)]
    struct RecordingVolume {
        sets: Arc<Mutex<Vec<(VolumeTarget, f32)>>>,
        reads: Arc<AtomicU32>,
    }

    impl VolumeBackend for RecordingVolume {
        fn range(&self, _target: &VolumeTarget) -> AudioResult<VolumeRange> {
            Ok(VolumeRange::session())
        }

        fn volume(&self, _target: &VolumeTarget) -> AudioResult<f32> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(1.0)
        }

        fn set_volume(&self, target: &VolumeTarget, value: f32) -> AudioResult<()> {
            self.sets.lock().unwrap().push((target.clone(), value));
            Ok(())
        }

        fn is_muted(&self, _target: &VolumeTarget) -> AudioResult<bool> {
            Ok(false)
        }

        fn set_mute(&self, _target: &VolumeTarget, _muted: bool) -> AudioResult<()> {
            Ok(())
        }
    }

    fn tap(volume: RecordingVolume) -> AudioTap<FakeSystem, FakeSessions, RecordingVolume> {
        AudioTap::new(FakeSystem, FakeSessions, volume, TapConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TapConfig::default();
        config.capture.block_ms = 0;
        let result = AudioTap::new(FakeSystem, FakeSessions, RecordingVolume::default(), config);
        assert!(matches!(result, Err(TapError::ConfigError(_))));
    }

    #[test]
    fn test_host_apis_and_defaults() {
        let tap = tap(RecordingVolume::default());
        assert_eq!(tap.host_apis().unwrap().len(), 1);
        assert_eq!(tap.default_endpoint(0, Direction::Output).unwrap(), EndpointId(0));
        assert_eq!(tap.default_endpoint(0, Direction::Input).unwrap(), EndpointId(1));
        assert!(tap.default_endpoint(3, Direction::Output).is_err());
    }

    #[test]
    fn test_find_endpoint() {
        let tap = tap(RecordingVolume::default());
        let speakers = tap.find_endpoint("realtek", Some(Direction::Output)).unwrap();
        assert_eq!(speakers.name, "Speakers (Realtek)");

        let missing = tap.find_endpoint("realtek", Some(Direction::Input));
        assert!(matches!(missing, Err(TapError::DeviceNotFound(_))));
    }

    #[test]
    fn test_devices_listed() {
        let tap = tap(RecordingVolume::default());
        assert_eq!(tap.devices().unwrap().len(), 2);
    }

    #[test]
    fn test_visible_sessions_skip_hidden() {
        let tap = tap(RecordingVolume::default());
        let mut settings = TapSettings::default();
        settings.hidden_apps.insert("svchost".into());

        let visible = tap.visible_sessions(&EndpointRef::DefaultRender, &settings).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].pid, 100);
    }

    #[test]
    fn test_restore_app_volumes() {
        let volume = RecordingVolume::default();
        let tap = tap(volume.clone());
        let mut settings = TapSettings::default();
        settings.remember_app_volume("firefox", 0.25);

        let restored = tap.restore_app_volumes(&EndpointRef::DefaultRender, &settings).unwrap();
        assert_eq!(restored, 1);

        let sets = volume.sets.lock().unwrap();
        assert_eq!(
            sets[0],
            (
                VolumeTarget::Session {
                    endpoint: EndpointRef::DefaultRender,
                    pid: 100
                },
                0.25
            )
        );
    }

    #[test]
    fn test_capture_unknown_endpoint_name() {
        let tap = tap(RecordingVolume::default());
        assert!(matches!(
            tap.capture_endpoint_named("does not exist", Direction::Output),
            Err(TapError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_capture_input_requires_input_endpoint() {
        let tap = tap(RecordingVolume::default());
        assert!(matches!(
            tap.capture_input(Some("speakers")),
            Err(TapError::DeviceNotFound(_))
        ));
        assert!(matches!(
            tap.capture_endpoint_named("microphone", Direction::Output),
            Err(TapError::DeviceNotFound(_))
        ));
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn test_capture_unavailable_off_windows() {
        let tap = tap(RecordingVolume::default());
        assert!(matches!(
            tap.capture_process(1234, LoopbackMode::IncludeTree),
            Err(TapError::Audio(AudioError::FeatureNotAvailable(_)))
        ));
        assert!(matches!(
            tap.capture_endpoint_named("speakers", Direction::Output),
            Err(TapError::Audio(AudioError::FeatureNotAvailable(_)))
        ));
        // The microphone resolves and reaches the capture engine
        assert!(matches!(
            tap.capture_input(Some("microphone")),
            Err(TapError::Audio(AudioError::FeatureNotAvailable(_)))
        ));
        assert!(matches!(
            tap.capture_input(None),
            Err(TapError::Audio(AudioError::FeatureNotAvailable(_)))
        ));
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn test_system_tap_without_session_api() {
        let tap = SystemTap::system(TapConfig::default()).unwrap();
        let err = tap.sessions(&EndpointRef::DefaultRender).unwrap_err();
        assert!(matches!(err, TapError::Audio(AudioError::FeatureNotAvailable(_))));
    }
}
