//! Raw mouse, keyboard and clipboard input for the Windows backend

use crate::AutomationError;
use arboard::Clipboard;
use uiautomation::inputs::{Keyboard, Mouse};
use uiautomation::types::Point;
use windows::Win32::Foundation::POINT;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_MOUSE, MOUSEEVENTF_WHEEL, MOUSEINPUT,
};
use windows::Win32::UI::WindowsAndMessaging::{GetCursorPos, WHEEL_DELTA};

fn to_point(x: f64, y: f64) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}

pub(crate) fn click_at(x: f64, y: f64) -> Result<(), AutomationError> {
    Mouse::default().click(to_point(x, y))?;
    Ok(())
}

/// Move the pointer over (x, y) and send `ticks` wheel notches.
pub(crate) fn wheel_at(x: f64, y: f64, ticks: i32) -> Result<(), AutomationError> {
    Mouse::default().move_to(to_point(x, y))?;
    let wheel_input = INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: 0,
                dy: 0,
                mouseData: (ticks * WHEEL_DELTA as i32) as u32,
                dwFlags: MOUSEEVENTF_WHEEL,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };
    let sent = unsafe { SendInput(&[wheel_input], std::mem::size_of::<INPUT>() as i32) };
    if sent == 0 {
        return Err(AutomationError::PlatformError(
            "SendInput rejected the wheel event".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn send_keys(keys: &str) -> Result<(), AutomationError> {
    Keyboard::new().send_keys(keys)?;
    Ok(())
}

pub(crate) fn cursor_position() -> Result<(f64, f64), AutomationError> {
    let mut point = POINT::default();
    unsafe { GetCursorPos(&mut point) }
        .map_err(|e| AutomationError::PlatformError(format!("GetCursorPos failed: {e}")))?;
    Ok((point.x as f64, point.y as f64))
}

pub(crate) fn set_clipboard_text(text: &str) -> Result<(), AutomationError> {
    let mut clipboard = Clipboard::new()
        .map_err(|e| AutomationError::PlatformError(format!("clipboard unavailable: {e}")))?;
    clipboard
        .set_text(text)
        .map_err(|e| AutomationError::PlatformError(format!("cannot set clipboard text: {e}")))
}
