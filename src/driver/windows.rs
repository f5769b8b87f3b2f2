use super::DeviceControl;
use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use winapi::shared::minwindef::{DWORD, LPVOID};
use winapi::um::fileapi::{CreateFileW, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::DeviceIoControl;
use winapi::um::winnt::{FILE_ATTRIBUTE_NORMAL, GENERIC_READ, GENERIC_WRITE, HANDLE};

/// Handle to the SXM driver's device node
pub struct WinDevice {
    handle: HANDLE,
}

// The handle is only ever used behind `&mut self`
unsafe impl Send for WinDevice {}

impl WinDevice {
    pub fn open(path: &str) -> io::Result<Self> {
        let wide: Vec<u16> = OsStr::new(path).encode_wide().chain(Some(0)).collect();
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null_mut(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }
}

impl DeviceControl for WinDevice {
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        if self.handle.is_null() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device closed"));
        }
        let out_ptr: LPVOID = if output.is_empty() {
            ptr::null_mut()
        } else {
            output.as_mut_ptr().cast()
        };
        let mut returned: DWORD = 0;
        let ok = unsafe {
            DeviceIoControl(
                self.handle,
                code,
                input.as_ptr() as LPVOID,
                input.len() as DWORD,
                out_ptr,
                output.len() as DWORD,
                &mut returned,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(returned as usize)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.handle.is_null() {
            return Ok(());
        }
        let handle = std::mem::replace(&mut self.handle, ptr::null_mut());
        if unsafe { CloseHandle(handle) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for WinDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
