//! PNG export of a machine's current frame.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use cyclehost_core::core::VideoSource;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encode(#[from] png::EncodingError),

    #[error("cannot encode {0} bytes per pixel")]
    PixelFormat(u32),
}

pub fn write_png(path: &Path, video: &dyn VideoSource) -> Result<(), ScreenshotError> {
    let color = match video.bytes_per_pixel() {
        1 => png::ColorType::Grayscale,
        3 => png::ColorType::Rgb,
        4 => png::ColorType::Rgba,
        other => return Err(ScreenshotError::PixelFormat(other)),
    };

    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), video.width(), video.height());
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(video.frame())?;
    writer.finish()?;
    Ok(())
}
