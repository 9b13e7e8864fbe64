use std::path::Path;

use image::{ImageFormat, ImageReader, imageops::FilterType};

use super::errors::ItemError;

/// Decode `source`, resize it to `side x side` with Lanczos3 and write it to
/// `output` as JPEG.
///
/// The format is sniffed from the file contents, so extensions do not matter.
/// Anything that fails to open or decode is reported as `NotAnImage`.
pub fn normalize(source: &Path, side: u32, output: &Path) -> Result<(), ItemError> {
    let not_an_image = |reason: String| ItemError::NotAnImage { reason };
    let decoded = ImageReader::open(source)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| not_an_image(err.to_string()))?
        .decode()
        .map_err(|err| not_an_image(err.to_string()))?;

    let rgb = decoded.to_rgb8();
    let resized = image::imageops::resize(&rgb, side, side, FilterType::Lanczos3);
    resized
        .save_with_format(output, ImageFormat::Jpeg)
        .map_err(|source| ItemError::Normalize {
            path: output.to_path_buf(),
            source,
        })
}
