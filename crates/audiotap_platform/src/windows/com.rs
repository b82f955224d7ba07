//! COM Initialization
//!
//! WASAPI objects may only be used on threads that initialized COM. Queries
//! from arbitrary caller threads use an apartment-threaded guard; the capture
//! worker joins the multithreaded apartment because asynchronous activation
//! completes on a system worker thread.

use std::marker::PhantomData;

use windows::Win32::System::Com::{
    CoInitializeEx, CoUninitialize, COINIT, COINIT_APARTMENTTHREADED, COINIT_DISABLE_OLE1DDE,
    COINIT_MULTITHREADED,
};

use crate::error::{AudioError, Result};

/// RAII guard for COM initialization on the current thread
///
/// Not `Send`: it must be dropped on the thread that created it. Objects
/// that hold COM interfaces keep their guard as the last field so the
/// interfaces are released before COM is torn down.
pub struct ComGuard {
    _not_send_sync: PhantomData<*const ()>,
}

impl ComGuard {
    /// Initialize an apartment-threaded COM context
    pub fn new() -> Result<Self> {
        Self::init(COINIT_APARTMENTTHREADED | COINIT_DISABLE_OLE1DDE)
    }

    /// Join the multithreaded apartment
    pub fn multithreaded() -> Result<Self> {
        Self::init(COINIT_MULTITHREADED)
    }

    fn init(model: COINIT) -> Result<Self> {
        // SAFETY: balanced by CoUninitialize in Drop
        let hr = unsafe { CoInitializeEx(None, model) };

        // S_FALSE (already initialized) still needs a balancing uninit;
        // RPC_E_CHANGED_MODE does not
        if hr.is_err() {
            return Err(AudioError::InitializationFailed(format!(
                "COM initialization failed: {:?}",
                hr
            )));
        }

        tracing::trace!("COM initialized for thread {:?}", std::thread::current().id());

        Ok(Self {
            _not_send_sync: PhantomData,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        // SAFETY: init succeeded for this thread
        unsafe { CoUninitialize() };
        tracing::trace!("COM uninitialized for thread {:?}", std::thread::current().id());
    }
}
