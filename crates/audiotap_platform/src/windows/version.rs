//! OS Build Detection
//!
//! Process-scoped loopback only exists from build 20348 onward. The build is
//! read with `RtlGetVersion`, which reports the real OS version regardless of
//! the application manifest.

use std::mem;

use windows::Win32::Foundation::STATUS_SUCCESS;
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::SystemInformation::OSVERSIONINFOEXW;

use crate::error::{AudioError, Result};

/// Running OS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl WindowsVersion {
    /// First build with `AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK`
    pub const MIN_PROCESS_LOOPBACK_BUILD: u32 = 20348;

    /// First Windows 11 build
    const WINDOWS_11_BUILD: u32 = 22000;

    pub fn current() -> Result<Self> {
        type RtlGetVersionFn = unsafe extern "system" fn(*mut OSVERSIONINFOEXW) -> i32;

        unsafe {
            let ntdll = GetModuleHandleW(windows::core::w!("ntdll.dll"))
                .map_err(|e| AudioError::Internal(format!("Failed to load ntdll.dll: {}", e)))?;

            let proc = GetProcAddress(ntdll, windows::core::s!("RtlGetVersion"))
                .ok_or_else(|| AudioError::Internal("RtlGetVersion not found in ntdll".into()))?;
            let rtl_get_version: RtlGetVersionFn = mem::transmute(proc);

            let mut info: OSVERSIONINFOEXW = mem::zeroed();
            info.dwOSVersionInfoSize = mem::size_of::<OSVERSIONINFOEXW>() as u32;

            let status = rtl_get_version(&mut info);
            if status != STATUS_SUCCESS.0 {
                return Err(AudioError::Internal(format!(
                    "RtlGetVersion failed with NTSTATUS 0x{:08X}",
                    status
                )));
            }

            Ok(Self {
                major: info.dwMajorVersion,
                minor: info.dwMinorVersion,
                build: info.dwBuildNumber,
            })
        }
    }

    pub fn supports_process_loopback(&self) -> bool {
        self.major > 10 || (self.major == 10 && self.build >= Self::MIN_PROCESS_LOOPBACK_BUILD)
    }

    pub fn display_name(&self) -> &'static str {
        match (self.major, self.build) {
            (10, b) if b >= Self::WINDOWS_11_BUILD => "Windows 11",
            (10, b) if b >= Self::MIN_PROCESS_LOOPBACK_BUILD => "Windows Server 2022",
            (10, _) => "Windows 10",
            (m, _) if m > 10 => "Windows",
            _ => "Windows (legacy)",
        }
    }
}

impl std::fmt::Display for WindowsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (build {})", self.display_name(), self.build)
    }
}
