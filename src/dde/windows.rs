//! DDEML client transport
//!
//! DDEML delivers advisories through a callback on the thread that called
//! `DdeInitializeW`, while that thread dispatches window messages. The
//! callback only copies data into a per-thread queue; the protocol client
//! drains it from `pump_pending_events`.

use super::transport::{DdeEvent, DdeTransport};
use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::iter;
use std::ptr;
use std::time::Duration;
use winapi::ctypes::{c_int, c_void};
use winapi::shared::basetsd::ULONG_PTR;
use winapi::shared::minwindef::{BOOL, DWORD, UINT};
use winapi::um::winuser::{DispatchMessageW, MSG, PM_REMOVE, PeekMessageW, TranslateMessage};

type HCONV = *mut c_void;
type HSZ = *mut c_void;
type HDDEDATA = *mut c_void;
type PfnCallback = Option<
    unsafe extern "system" fn(
        UINT,
        UINT,
        HCONV,
        HSZ,
        HSZ,
        HDDEDATA,
        ULONG_PTR,
        ULONG_PTR,
    ) -> HDDEDATA,
>;

// DDEML entry points exported by user32.dll
#[link(name = "user32")]
unsafe extern "system" {
    fn DdeInitializeW(inst: *mut DWORD, callback: PfnCallback, cmd: DWORD, res: DWORD) -> UINT;
    fn DdeUninitialize(inst: DWORD) -> BOOL;
    fn DdeGetLastError(inst: DWORD) -> UINT;
    fn DdeConnect(inst: DWORD, service: HSZ, topic: HSZ, context: *mut c_void) -> HCONV;
    fn DdeDisconnect(conv: HCONV) -> BOOL;
    fn DdeClientTransaction(
        data: *mut u8,
        len: DWORD,
        conv: HCONV,
        item: HSZ,
        fmt: UINT,
        kind: UINT,
        timeout: DWORD,
        result: *mut DWORD,
    ) -> HDDEDATA;
    fn DdeCreateStringHandleW(inst: DWORD, text: *const u16, code_page: c_int) -> HSZ;
    fn DdeFreeStringHandle(inst: DWORD, hsz: HSZ) -> BOOL;
    fn DdeQueryStringW(
        inst: DWORD,
        hsz: HSZ,
        buf: *mut u16,
        max: DWORD,
        code_page: c_int,
    ) -> DWORD;
    fn DdeAccessData(data: HDDEDATA, size: *mut DWORD) -> *mut u8;
    fn DdeUnaccessData(data: HDDEDATA) -> BOOL;
    fn DdeFreeDataHandle(data: HDDEDATA) -> BOOL;
}

// Values from ddeml.h
const APPCMD_CLIENTONLY: DWORD = 0x0000_0010;
const CP_WINUNICODE: c_int = 1200;
const CF_TEXT: UINT = 1;
const XTYPF_NOBLOCK: UINT = 0x0002;
const XCLASS_BOOL: UINT = 0x1000;
const XCLASS_DATA: UINT = 0x2000;
const XCLASS_FLAGS: UINT = 0x4000;
const XCLASS_NOTIFICATION: UINT = 0x8000;
const XTYP_ADVDATA: UINT = 0x0010 | XCLASS_FLAGS;
const XTYP_ADVSTART: UINT = 0x0030 | XCLASS_BOOL;
const XTYP_ADVSTOP: UINT = 0x0040 | XCLASS_NOTIFICATION;
const XTYP_EXECUTE: UINT = 0x0050 | XCLASS_FLAGS;
const XTYP_XACT_COMPLETE: UINT = 0x0080 | XCLASS_NOTIFICATION;
const XTYP_REQUEST: UINT = 0x00B0 | XCLASS_DATA;
const XTYP_DISCONNECT: UINT = 0x00C0 | XCLASS_NOTIFICATION | XTYPF_NOBLOCK;
const TIMEOUT_ASYNC: DWORD = 0xFFFF_FFFF;
const DDE_FACK: usize = 0x8000;
const DMLERR_DLL_USAGE: u32 = 0x4004;

thread_local! {
    static INSTANCE: Cell<DWORD> = const { Cell::new(0) };
    static EVENTS: RefCell<VecDeque<DdeEvent>> = const { RefCell::new(VecDeque::new()) };
}

unsafe extern "system" fn dde_callback(
    w_type: UINT,
    _fmt: UINT,
    _conv: HCONV,
    _hsz1: HSZ,
    hsz2: HSZ,
    data: HDDEDATA,
    _data1: ULONG_PTR,
    _data2: ULONG_PTR,
) -> HDDEDATA {
    match w_type {
        XTYP_ADVDATA => {
            let topic = query_string(INSTANCE.with(Cell::get), hsz2);
            let payload = copy_data(data).unwrap_or_default();
            EVENTS.with(|q| {
                q.borrow_mut()
                    .push_back(DdeEvent::AdviseData { topic, payload })
            });
            DDE_FACK as HDDEDATA
        }
        XTYP_DISCONNECT => {
            EVENTS.with(|q| q.borrow_mut().push_back(DdeEvent::Disconnected));
            ptr::null_mut()
        }
        XTYP_XACT_COMPLETE => ptr::null_mut(),
        other => {
            debug!("Unhandled DDE callback {other:#x}");
            ptr::null_mut()
        }
    }
}

fn query_string(instance: DWORD, hsz: HSZ) -> String {
    let mut buf = [0u16; 128];
    let len = unsafe {
        DdeQueryStringW(
            instance,
            hsz,
            buf.as_mut_ptr(),
            buf.len() as DWORD,
            CP_WINUNICODE,
        )
    };
    String::from_utf16_lossy(&buf[..(len as usize).min(buf.len())])
}

fn copy_data(data: HDDEDATA) -> Option<Vec<u8>> {
    if data.is_null() {
        return None;
    }
    let mut size: DWORD = 0;
    let bytes = unsafe { DdeAccessData(data, &mut size) };
    if bytes.is_null() {
        return None;
    }
    let copy = unsafe { std::slice::from_raw_parts(bytes, size as usize) }.to_vec();
    unsafe { DdeUnaccessData(data) };
    Some(copy)
}

fn timeout_ms(timeout: Duration) -> DWORD {
    DWORD::try_from(timeout.as_millis()).unwrap_or(TIMEOUT_ASYNC - 1)
}

/// String handle released on drop
struct StringHandle {
    instance: DWORD,
    hsz: HSZ,
}

impl StringHandle {
    fn new(instance: DWORD, text: &str) -> Result<Self, u32> {
        let wide: Vec<u16> = text.encode_utf16().chain(iter::once(0)).collect();
        let hsz = unsafe { DdeCreateStringHandleW(instance, wide.as_ptr(), CP_WINUNICODE) };
        if hsz.is_null() {
            return Err(unsafe { DdeGetLastError(instance) });
        }
        Ok(Self { instance, hsz })
    }
}

impl Drop for StringHandle {
    fn drop(&mut self) {
        unsafe { DdeFreeStringHandle(self.instance, self.hsz) };
    }
}

/// DDEML client bound to the creating thread
pub struct DdemlTransport {
    instance: DWORD,
    conv: HCONV,
}

impl DdemlTransport {
    pub fn new() -> Self {
        Self {
            instance: 0,
            conv: ptr::null_mut(),
        }
    }

    fn last_error(&self) -> u32 {
        unsafe { DdeGetLastError(self.instance) }
    }
}

impl Default for DdemlTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DdeTransport for DdemlTransport {
    fn register(&mut self) -> Result<(), u32> {
        // The callback resolves names through the thread's single instance
        if INSTANCE.with(Cell::get) != 0 {
            return Err(DMLERR_DLL_USAGE);
        }
        let mut instance: DWORD = 0;
        let status =
            unsafe { DdeInitializeW(&mut instance, Some(dde_callback), APPCMD_CLIENTONLY, 0) };
        if status != 0 {
            return Err(status);
        }
        self.instance = instance;
        INSTANCE.with(|i| i.set(instance));
        Ok(())
    }

    fn connect(&mut self, service: &str, topic: &str) -> Result<(), u32> {
        let service = StringHandle::new(self.instance, service)?;
        let topic = StringHandle::new(self.instance, topic)?;
        let conv = unsafe { DdeConnect(self.instance, service.hsz, topic.hsz, ptr::null_mut()) };
        if conv.is_null() {
            return Err(self.last_error());
        }
        self.conv = conv;
        Ok(())
    }

    fn advise(&mut self, topic: &str, stop: bool) -> Result<(), u32> {
        let item = StringHandle::new(self.instance, topic)?;
        let kind = if stop { XTYP_ADVSTOP } else { XTYP_ADVSTART };
        let result = unsafe {
            DdeClientTransaction(
                ptr::null_mut(),
                0,
                self.conv,
                item.hsz,
                CF_TEXT,
                kind,
                TIMEOUT_ASYNC,
                ptr::null_mut(),
            )
        };
        if result.is_null() {
            return Err(self.last_error());
        }
        Ok(())
    }

    fn submit_command(&mut self, payload: &[u8], timeout: Duration) -> Result<(), u32> {
        let result = unsafe {
            DdeClientTransaction(
                payload.as_ptr().cast_mut(),
                payload.len() as DWORD,
                self.conv,
                ptr::null_mut(),
                CF_TEXT,
                XTYP_EXECUTE,
                timeout_ms(timeout),
                ptr::null_mut(),
            )
        };
        if result.is_null() {
            return Err(self.last_error());
        }
        Ok(())
    }

    fn request(&mut self, item: &str, timeout: Duration) -> Result<Vec<u8>, u32> {
        let item = StringHandle::new(self.instance, item)?;
        let data = unsafe {
            DdeClientTransaction(
                ptr::null_mut(),
                0,
                self.conv,
                item.hsz,
                CF_TEXT,
                XTYP_REQUEST,
                timeout_ms(timeout),
                ptr::null_mut(),
            )
        };
        if data.is_null() {
            return Err(self.last_error());
        }
        let copy = copy_data(data);
        unsafe { DdeFreeDataHandle(data) };
        copy.ok_or_else(|| self.last_error())
    }

    fn pump_pending_events(&mut self, sink: &mut dyn FnMut(DdeEvent)) -> bool {
        let mut processed = false;
        let mut msg: MSG = unsafe { std::mem::zeroed() };
        while unsafe { PeekMessageW(&mut msg, ptr::null_mut(), 0, 0, PM_REMOVE) } != 0 {
            unsafe {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
            processed = true;
        }

        let events: Vec<DdeEvent> = EVENTS.with(|q| q.borrow_mut().drain(..).collect());
        for event in events {
            sink(event);
            processed = true;
        }
        processed
    }

    fn disconnect(&mut self) {
        if !self.conv.is_null() {
            unsafe { DdeDisconnect(self.conv) };
            self.conv = ptr::null_mut();
        }
    }

    fn unregister(&mut self) {
        if self.instance != 0 {
            unsafe { DdeUninitialize(self.instance) };
            INSTANCE.with(|i| i.set(0));
            EVENTS.with(|q| q.borrow_mut().clear());
            self.instance = 0;
        }
    }
}

impl Drop for DdemlTransport {
    fn drop(&mut self) {
        self.disconnect();
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_instance_per_thread() {
        let mut first = DdemlTransport::new();
        first.register().unwrap();
        let mut second = DdemlTransport::new();
        assert_eq!(second.register(), Err(DMLERR_DLL_USAGE));

        first.unregister();
        second.register().unwrap();
    }

    #[test]
    fn test_connect_without_server_fails() {
        let mut transport = DdemlTransport::new();
        transport.register().unwrap();
        assert!(transport.connect("SXM-not-running", "Remote").is_err());
    }
}
