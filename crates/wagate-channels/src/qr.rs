//! QR code rendering for pairing codes.

use base64::{engine::general_purpose::STANDARD, Engine};
use qrcode::{Color, EcLevel, QrCode};
use wagate_core::error::GatewayError;

const MODULE_PX: u32 = 10;
const QUIET_ZONE: u32 = 2;

fn encode(data: &str) -> Result<QrCode, GatewayError> {
    if data.is_empty() {
        return Err(GatewayError::InvalidRequest("no QR code available".into()));
    }
    QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)
        .map_err(|e| GatewayError::Internal(format!("QR generation failed: {e}")))
}

/// Compact terminal rendering: two module rows per text line using half blocks.
pub fn render_terminal(data: &str) -> Result<String, GatewayError> {
    let code = encode(data)?;
    let width = code.width();
    let colors = code.into_colors();
    let dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::with_capacity((width + 1) * width.div_ceil(2));
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

/// PNG bytes with a white quiet zone.
pub fn render_png(data: &str) -> Result<Vec<u8>, GatewayError> {
    use image::{ImageBuffer, Luma};

    let code = encode(data)?;
    let modules = code.width() as u32;
    let size = (modules + QUIET_ZONE * 2) * MODULE_PX;

    let img = ImageBuffer::from_fn(size, size, |x, y| {
        let (cx, cy) = (x / MODULE_PX, y / MODULE_PX);
        let inside = (QUIET_ZONE..QUIET_ZONE + modules).contains(&cx)
            && (QUIET_ZONE..QUIET_ZONE + modules).contains(&cy);
        if inside {
            match code[((cx - QUIET_ZONE) as usize, (cy - QUIET_ZONE) as usize)] {
                Color::Dark => Luma([0u8]),
                Color::Light => Luma([255u8]),
            }
        } else {
            Luma([255u8])
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| GatewayError::Internal(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

/// `data:image/png;base64,...` form for JSON responses.
pub fn png_data_url(data: &str) -> Result<String, GatewayError> {
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(render_png(data)?)))
}
