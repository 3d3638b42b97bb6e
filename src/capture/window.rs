//! Window discovery for the game client.

use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;

use anyhow::{anyhow, Result};
use tracing::debug;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, POINT, RECT, TRUE};
use windows::Win32::Graphics::Gdi::ClientToScreen;
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClientRect, GetWindowRect, GetWindowTextLengthW, GetWindowTextW,
    IsWindowVisible,
};

/// Finds the first visible top-level window whose title equals one of `titles`.
///
/// Returns the handle and the matched title.
pub fn find_game_window(titles: &[String]) -> Option<(HWND, String)> {
    struct EnumData<'a> {
        titles: &'a [String],
        found: Option<(HWND, String)>,
    }

    unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
        unsafe {
            let data = &mut *(lparam.0 as *mut EnumData);

            if !IsWindowVisible(hwnd).as_bool() {
                return TRUE;
            }

            let title_len = GetWindowTextLengthW(hwnd);
            if title_len <= 0 {
                return TRUE;
            }
            let mut title_buf: Vec<u16> = vec![0; (title_len + 1) as usize];
            GetWindowTextW(hwnd, &mut title_buf);
            let title = OsString::from_wide(&title_buf[..title_len as usize])
                .to_string_lossy()
                .to_string();

            if data.titles.iter().any(|t| *t == title) {
                data.found = Some((hwnd, title));
                return BOOL(0); // Stop enumeration
            }

            TRUE
        }
    }

    debug!("Searching for game window among {:?}", titles);
    let mut data = EnumData {
        titles,
        found: None,
    };
    unsafe {
        // EnumWindows reports an error when the callback stops early
        let _ = EnumWindows(Some(enum_callback), LPARAM(&mut data as *mut _ as isize));
    }
    data.found
}

/// Gets the client area rectangle and its offset relative to the window origin.
///
/// The offset is needed to crop the title bar and borders out of a window
/// capture.
pub fn get_client_area_info(hwnd: HWND) -> Result<(RECT, POINT)> {
    let mut client_rect = RECT::default();
    unsafe { GetClientRect(hwnd, &mut client_rect)? };

    let mut client_origin = POINT { x: 0, y: 0 };
    unsafe {
        if !ClientToScreen(hwnd, &mut client_origin).as_bool() {
            return Err(anyhow!("ClientToScreen failed"));
        }
    }

    let mut window_rect = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut window_rect)? };

    let offset = POINT {
        x: client_origin.x - window_rect.left,
        y: client_origin.y - window_rect.top,
    };

    Ok((client_rect, offset))
}
