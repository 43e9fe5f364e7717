//! Icon Extraction
//!
//! Reads the large icon embedded in an executable and encodes it as PNG.

use crate::error::ExtractionUnavailable;

/// Given a path, produce encoded image bytes or report unavailability
pub trait IconExtractor: Send + Sync {
    fn extract(&self, path: &str) -> Result<Vec<u8>, ExtractionUnavailable>;
}

/// Platform icon extractor
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIconExtractor;

impl IconExtractor for SystemIconExtractor {
    fn extract(&self, path: &str) -> Result<Vec<u8>, ExtractionUnavailable> {
        if path.trim().is_empty() {
            return Err(unavailable(path, "empty path"));
        }
        platform::extract_png(path).map_err(|reason| unavailable(path, &reason))
    }
}

fn unavailable(path: &str, reason: &str) -> ExtractionUnavailable {
    ExtractionUnavailable {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Swaps BGRA to RGBA in place. Icons without an alpha channel come back
/// fully transparent and are made opaque.
pub fn bgra_to_rgba(pixels: &mut [u8]) {
    let has_alpha = pixels.chunks_exact(4).any(|px| px[3] != 0);
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
        if !has_alpha {
            px[3] = 255;
        }
    }
}

#[cfg(windows)]
mod platform {
    use super::bgra_to_rgba;
    use crate::icons::encode_png;
    use image::RgbaImage;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::Graphics::Gdi::{
        DeleteObject, GetDC, GetDIBits, GetObjectW, ReleaseDC, BITMAP, BITMAPINFO, BITMAPINFOHEADER,
        BI_RGB, DIB_RGB_COLORS, HBITMAP,
    };
    use windows::Win32::UI::Shell::ExtractIconExW;
    use windows::Win32::UI::WindowsAndMessaging::{DestroyIcon, GetIconInfo, HICON, ICONINFO};

    pub fn extract_png(path: &str) -> Result<Vec<u8>, String> {
        let (pixels, width, height) = unsafe {
            let path_wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
            let mut large_icon = HICON::default();

            let count = ExtractIconExW(PCWSTR(path_wide.as_ptr()), 0, Some(&mut large_icon), None, 1);
            if count == 0 || large_icon.is_invalid() {
                return Err("no icon resource".to_string());
            }

            let result = icon_pixels(large_icon);
            let _ = DestroyIcon(large_icon);
            result?
        };

        let img = RgbaImage::from_raw(width, height, pixels).ok_or("pixel buffer size mismatch")?;
        encode_png(img).map_err(|e| format!("PNG encoding failed: {}", e))
    }

    /// Reads the colour bitmap of an icon as RGBA
    unsafe fn icon_pixels(icon: HICON) -> Result<(Vec<u8>, u32, u32), String> {
        let mut info = ICONINFO::default();
        GetIconInfo(icon, &mut info).map_err(|e| format!("GetIconInfo failed: {}", e))?;

        let result = if info.hbmColor.is_invalid() {
            Err("monochrome icon".to_string())
        } else {
            bitmap_pixels(info.hbmColor)
        };

        // GetIconInfo hands out copies we own
        if !info.hbmColor.is_invalid() {
            let _ = DeleteObject(info.hbmColor);
        }
        if !info.hbmMask.is_invalid() {
            let _ = DeleteObject(info.hbmMask);
        }
        result
    }

    unsafe fn bitmap_pixels(bitmap: HBITMAP) -> Result<(Vec<u8>, u32, u32), String> {
        let mut bm = BITMAP::default();
        let size = GetObjectW(
            bitmap,
            std::mem::size_of::<BITMAP>() as i32,
            Some(&mut bm as *mut _ as *mut _),
        );
        if size == 0 || bm.bmWidth <= 0 || bm.bmHeight <= 0 {
            return Err("GetObjectW failed".to_string());
        }
        let (width, height) = (bm.bmWidth, bm.bmHeight);

        let mut bmi = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                biHeight: -height, // Negative = Top-Down
                biPlanes: 1,
                biBitCount: 32, // BGRA
                biCompression: BI_RGB.0 as u32,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut pixels: Vec<u8> = vec![0; (width * height * 4) as usize];

        let hdc = GetDC(HWND::default());
        let lines = GetDIBits(
            hdc,
            bitmap,
            0,
            height as u32,
            Some(pixels.as_mut_ptr() as *mut _),
            &mut bmi,
            DIB_RGB_COLORS,
        );
        ReleaseDC(HWND::default(), hdc);

        if lines == 0 {
            return Err("GetDIBits failed".to_string());
        }

        bgra_to_rgba(&mut pixels);
        Ok((pixels, width as u32, height as u32))
    }
}

#[cfg(not(windows))]
mod platform {
    pub fn extract_png(_path: &str) -> Result<Vec<u8>, String> {
        Err("icon extraction is only supported on Windows".to_string())
    }
}
