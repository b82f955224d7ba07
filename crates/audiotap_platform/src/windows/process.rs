//! Process lookup and liveness
//!
//! Session snapshots carry the executable name of the owning process, read
//! from a Toolhelp32 snapshot. Process-scoped capture keeps a waitable
//! handle on its target so the capture loop notices when the target exits.

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_TIMEOUT};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{
    OpenProcess, WaitForSingleObject, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SYNCHRONIZE,
};

use crate::error::{AudioError, Result};

/// Closes a handle when dropped
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Executable name of `pid` without the `.exe` suffix
pub fn process_name(pid: u32) -> Option<String> {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).ok()? };
    let _guard = OwnedHandle(snapshot);

    let mut entry = PROCESSENTRY32W {
        dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };

    unsafe {
        if Process32FirstW(snapshot, &mut entry).is_err() {
            return None;
        }
        loop {
            if entry.th32ProcessID == pid {
                let end = entry
                    .szExeFile
                    .iter()
                    .position(|&c| c == 0)
                    .unwrap_or(entry.szExeFile.len());
                let name = String::from_utf16_lossy(&entry.szExeFile[..end]);
                return Some(name.strip_suffix(".exe").unwrap_or(&name).to_string());
            }
            if Process32NextW(snapshot, &mut entry).is_err() {
                return None;
            }
        }
    }
}

/// Waitable handle on a running process
pub struct ProcessWatch {
    pid: u32,
    handle: OwnedHandle,
}

impl ProcessWatch {
    /// Open `pid`; fails with `NotFound` when the process does not exist
    pub fn open(pid: u32) -> Result<Self> {
        let handle = unsafe {
            OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_SYNCHRONIZE, false, pid)
                .map_err(|e| AudioError::NotFound(format!("process {}: {}", pid, e)))?
        };
        Ok(Self {
            pid,
            handle: OwnedHandle(handle),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// A process handle is signaled once the process exits
    pub fn is_alive(&self) -> bool {
        unsafe { WaitForSingleObject(self.handle.0, 0) == WAIT_TIMEOUT }
    }
}
