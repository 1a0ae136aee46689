//! PNG to JPEG conversion for destinations that ask for a lossy format.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::error::TranscodeError;

/// JPEG quality used for transcoded artifacts.
pub const JPEG_QUALITY: u8 = 90;

/// Convert the image at `src` to a JPEG next to it and delete `src`.
///
/// Transparency is flattened onto white. Returns the new file's path
/// (`src` with a `.jpg` extension). Blocking; run it off the async runtime.
pub fn transcode_to_jpeg(src: &Path) -> Result<PathBuf, TranscodeError> {
    let rgba = image::open(src)?.into_rgba8();

    let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        Rgb([over_white(r, a), over_white(g, a), over_white(b, a)])
    });

    let dest = src.with_extension("jpg");
    let mut writer = BufWriter::new(File::create(&dest)?);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode_image(&flattened)?;
    writer.flush()?;

    if dest != src {
        std::fs::remove_file(src)?;
    }
    tracing::debug!(src = %src.display(), dest = %dest.display(), "Transcoded image to JPEG");
    Ok(dest)
}

/// Alpha-composite one channel over a white background.
fn over_white(channel: u8, alpha: u8) -> u8 {
    let c = u16::from(channel);
    let a = u16::from(alpha);
    ((c * a + 255 * (255 - a) + 127) / 255) as u8
}
