//! Audio Session Enumeration
//!
//! A session exists while a process has a stream open against an endpoint.
//! The platform creates and destroys sessions; [`SessionManager`] only
//! observes them and holds no platform handles between calls.
//!
//! # Session materialization
//!
//! The session enumerator of an endpoint only exists once the platform has
//! created a session container for it. `enumerate_sessions` therefore
//! retries in three tiers:
//!
//! 1. enumerate directly
//! 2. on "not found", ask for the default session (a zero-effect call that
//!    creates the container) and enumerate again
//! 3. if a process id was supplied, open and discard an audio client on the
//!    endpoint, wait briefly, and enumerate once more
//!
//! Only then does it fail with `NoSessionsExposed`. An empty list is a
//! successful answer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::EndpointRef;
use crate::error::{AudioError, Result};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Inactive,
    Active,
    Expired,
}

/// Snapshot of one audio session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub endpoint: EndpointRef,
    pub pid: u32,
    /// Executable name without extension; `None` if the process already exited
    pub process_name: Option<String>,
    pub display_name: Option<String>,
    pub icon_path: Option<String>,
    pub state: SessionState,
    pub volume: f32,
    pub muted: bool,
}

/// Delivered when the platform creates a new session on a watched endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCreated {
    pub endpoint: EndpointRef,
    pub pid: Option<u32>,
    pub display_name: Option<String>,
}

/// Callback invoked on a platform thread for each new session
pub type SessionCallback = Box<dyn Fn(SessionCreated) + Send + Sync + 'static>;

/// Platform-side registration that can be torn down once
pub trait NotificationHandle {
    fn unregister(&mut self) -> Result<()>;
}

/// Platform operations the session manager needs
pub trait SessionPlatform {
    /// Enumerate sessions; `AudioError::NotFound` means no enumerator exists yet
    fn enumerate(&self, endpoint: &EndpointRef) -> Result<Vec<Session>>;

    /// Zero-effect call that makes the platform create a default session container
    fn prime_default_session(&self, endpoint: &EndpointRef) -> Result<()>;

    /// Open and discard an audio client on the endpoint
    fn prime_with_audio_client(&self, endpoint: &EndpointRef, pid: u32) -> Result<()>;

    fn register_notification(
        &self,
        endpoint: &EndpointRef,
        callback: SessionCallback,
    ) -> Result<Box<dyn NotificationHandle>>;
}

/// Keeps session-created notifications flowing
///
/// The caller owns this token. Notifications are delivered for exactly as
/// long as it is alive; pass it to
/// [`SessionManager::unregister_notification`] to stop them and observe
/// errors, or drop it to unregister with errors only logged. It must be
/// dropped on the thread that registered it.
#[must_use = "notifications stop as soon as the registration is dropped"]
pub struct SessionNotificationRegistration {
    endpoint: EndpointRef,
    handle: Option<Box<dyn NotificationHandle>>,
}

impl SessionNotificationRegistration {
    pub fn endpoint(&self) -> &EndpointRef {
        &self.endpoint
    }

    fn unregister(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(mut handle) => handle.unregister(),
            None => Ok(()),
        }
    }
}

impl Drop for SessionNotificationRegistration {
    fn drop(&mut self) {
        if let Err(e) = self.unregister() {
            tracing::warn!("Failed to unregister session notification for {:?}: {}", self.endpoint, e);
        }
    }
}

/// Stateless session queries over a [`SessionPlatform`]
pub struct SessionManager<P: SessionPlatform> {
    platform: P,
    retry_delay: Duration,
}

impl<P: SessionPlatform> SessionManager<P> {
    /// Delay between opening the throwaway client and the final retry
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);

    pub fn new(platform: P) -> Self {
        Self::with_retry_delay(platform, Self::DEFAULT_RETRY_DELAY)
    }

    pub fn with_retry_delay(platform: P, retry_delay: Duration) -> Self {
        Self { platform, retry_delay }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Enumerate the sessions of `endpoint`
    ///
    /// `pid` enables the third priming tier. Fails with `NoSessionsExposed`
    /// only when every tier reports that no enumerator exists.
    pub fn enumerate_sessions(&self, endpoint: &EndpointRef, pid: Option<u32>) -> Result<Vec<Session>> {
        match self.with_priming(endpoint, pid, |platform| platform.enumerate(endpoint)) {
            Err(e) if e.is_not_found() => {
                tracing::warn!("Sessions not exposed for {:?} after priming", endpoint);
                Err(AudioError::NoSessionsExposed)
            }
            other => other.map(|sessions| {
                tracing::debug!("Enumerated {} audio sessions", sessions.len());
                sessions
            }),
        }
    }

    /// Run `lookup` against the platform, priming the endpoint between
    /// attempts while it reports "not found"
    ///
    /// Any other outcome ends the sequence. After the last tier the final
    /// "not found" is returned unchanged.
    pub fn with_priming<T>(
        &self,
        endpoint: &EndpointRef,
        pid: Option<u32>,
        lookup: impl Fn(&P) -> Result<T>,
    ) -> Result<T> {
        let missing = |result: &Result<T>| matches!(result, Err(e) if e.is_not_found());

        let result = lookup(&self.platform);
        if !missing(&result) {
            return result;
        }

        tracing::debug!("Nothing found on {:?}, priming default session", endpoint);
        if let Err(e) = self.platform.prime_default_session(endpoint) {
            tracing::debug!("Default session priming failed: {}", e);
        }
        let result = lookup(&self.platform);
        if !missing(&result) {
            return result;
        }

        let Some(pid) = pid else {
            return result;
        };
        tracing::debug!("Priming {:?} with a throwaway audio client (pid {})", endpoint, pid);
        if let Err(e) = self.platform.prime_with_audio_client(endpoint, pid) {
            tracing::debug!("Audio client priming failed: {}", e);
        }
        std::thread::sleep(self.retry_delay);
        lookup(&self.platform)
    }

    /// Sessions currently producing audio
    pub fn active_sessions(&self, endpoint: &EndpointRef) -> Result<Vec<Session>> {
        Ok(self
            .enumerate_sessions(endpoint, None)?
            .into_iter()
            .filter(|s| s.state == SessionState::Active)
            .collect())
    }

    /// The non-expired session owned by `pid`, if there is one
    pub fn session_for_process(&self, endpoint: &EndpointRef, pid: u32) -> Result<Option<Session>> {
        Ok(self
            .enumerate_sessions(endpoint, Some(pid))?
            .into_iter()
            .filter(|s| s.pid == pid)
            .min_by_key(|s| match s.state {
                SessionState::Active => 0,
                SessionState::Inactive => 1,
                SessionState::Expired => 2,
            })
            .filter(|s| s.state != SessionState::Expired))
    }

    /// Deliver a [`SessionCreated`] event for every new session on `endpoint`
    pub fn register_notification<F>(
        &self,
        endpoint: &EndpointRef,
        callback: F,
    ) -> Result<SessionNotificationRegistration>
    where
        F: Fn(SessionCreated) + Send + Sync + 'static,
    {
        let handle = self.platform.register_notification(endpoint, Box::new(callback))?;
        tracing::debug!("Registered session notifications for {:?}", endpoint);
        Ok(SessionNotificationRegistration {
            endpoint: endpoint.clone(),
            handle: Some(handle),
        })
    }

    pub fn unregister_notification(&self, mut registration: SessionNotificationRegistration) -> Result<()> {
        registration.unregister()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Session platform whose enumerator appears after a given priming tier
    #[derive(Default)]
    pub struct FakeSessionPlatform {
        /// 0: always present, 1: after default priming, 2: after client priming, 3: never
        pub materialize_at: u32,
        pub tier: AtomicU32,
        pub enumerations: AtomicU32,
        pub sessions: Vec<Session>,
        pub fail_enumeration: bool,
        pub callbacks: Mutex<Vec<SessionCallback>>,
        pub unregistered: Arc<AtomicU32>,
    }

    impl FakeSessionPlatform {
        pub fn materializing_at(tier: u32) -> Self {
            Self {
                materialize_at: tier,
                ..Default::default()
            }
        }

        pub fn fire(&self, created: SessionCreated) {
            for cb in self.callbacks.lock().iter() {
                cb(created.clone());
            }
        }
    }

    pub fn session(pid: u32, state: SessionState) -> Session {
        Session {
            endpoint: EndpointRef::DefaultRender,
            pid,
            process_name: Some(format!("app{}", pid)),
            display_name: None,
            icon_path: None,
            state,
            volume: 1.0,
            muted: false,
        }
    }

    struct FakeHandle(Arc<AtomicU32>);

    impl NotificationHandle for FakeHandle {
        fn unregister(&mut self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl SessionPlatform for FakeSessionPlatform {
        fn enumerate(&self, _endpoint: &EndpointRef) -> Result<Vec<Session>> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            if self.fail_enumeration {
                return Err(AudioError::Internal("device removed".into()));
            }
            if self.tier.load(Ordering::SeqCst) >= self.materialize_at {
                Ok(self.sessions.clone())
            } else {
                Err(AudioError::NotFound("session enumerator".into()))
            }
        }

        fn prime_default_session(&self, _endpoint: &EndpointRef) -> Result<()> {
            self.tier.store(1, Ordering::SeqCst);
            Ok(())
        }

        fn prime_with_audio_client(&self, _endpoint: &EndpointRef, _pid: u32) -> Result<()> {
            self.tier.store(2, Ordering::SeqCst);
            Ok(())
        }

        fn register_notification(
            &self,
            _endpoint: &EndpointRef,
            callback: SessionCallback,
        ) -> Result<Box<dyn NotificationHandle>> {
            self.callbacks.lock().push(callback);
            Ok(Box::new(FakeHandle(Arc::clone(&self.unregistered))))
        }
    }
}
