//! Normalizes whatever an image generator hands back into PNG bytes.
//!
//! Generators return handles of different shapes depending on model version:
//! the handle may itself be an image, may wrap one, or may only know how to
//! persist itself to a path. [`GeneratedImage`] exposes those as optional
//! capabilities and [`encode_png`] probes them in that order.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context, Result};
use dearmind_contracts::error::error_chain_text;
use dearmind_contracts::PipelineError;
use image::{DynamicImage, ImageFormat};

pub trait GeneratedImage: Send {
    /// The handle is itself a decoded image.
    fn as_image(&self) -> Option<&DynamicImage> {
        None
    }

    /// The handle carries a decoded image as an attribute.
    fn inner_image(&self) -> Option<&DynamicImage> {
        None
    }

    /// Whether [`GeneratedImage::save_to`] is implemented.
    fn can_save(&self) -> bool {
        false
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        bail!("image handle cannot be saved to {}", path.display())
    }

    fn describe(&self) -> &'static str {
        "image handle"
    }
}

/// A handle that is the image.
#[derive(Debug, Clone)]
pub struct InlineImage(pub DynamicImage);

impl GeneratedImage for InlineImage {
    fn as_image(&self) -> Option<&DynamicImage> {
        Some(&self.0)
    }

    fn describe(&self) -> &'static str {
        "inline image"
    }
}

/// A handle that carries a decoded image as an attribute, possibly unset.
#[derive(Debug, Clone)]
pub struct WrappedImage {
    pub image: Option<DynamicImage>,
}

impl GeneratedImage for WrappedImage {
    fn inner_image(&self) -> Option<&DynamicImage> {
        self.image.as_ref()
    }

    fn describe(&self) -> &'static str {
        "wrapped image"
    }
}

pub fn encode_png(handle: &dyn GeneratedImage) -> Result<Vec<u8>, PipelineError> {
    if let Some(image) = handle.as_image() {
        return encode_in_memory(image);
    }
    if let Some(image) = handle.inner_image() {
        return encode_in_memory(image);
    }
    if handle.can_save() {
        return round_trip_through_file(handle).map_err(|err| {
            PipelineError::ImageAdapter(error_chain_text(&err, 512))
        });
    }
    Err(PipelineError::ImageAdapter(format!(
        "{} exposes no in-memory image and cannot be saved",
        handle.describe()
    )))
}

fn encode_in_memory(image: &DynamicImage) -> Result<Vec<u8>, PipelineError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|err| PipelineError::ImageAdapter(format!("PNG encode failed: {err}")))?;
    Ok(buffer.into_inner())
}

/// Saves into a scoped temp file and reads it back. The file is removed when
/// `temp` drops, on both the success and the error path.
fn round_trip_through_file(handle: &dyn GeneratedImage) -> Result<Vec<u8>> {
    let temp = tempfile::Builder::new()
        .prefix("dearmind-reward-")
        .suffix(".png")
        .tempfile()
        .context("failed to create temporary image file")?;
    handle
        .save_to(temp.path())
        .with_context(|| format!("{} failed to save itself", handle.describe()))?;
    let bytes = fs::read(temp.path())
        .with_context(|| format!("failed reading {}", temp.path().display()))?;
    temp.close()
        .context("failed to remove temporary image file")?;
    ensure_png(bytes)
}

fn ensure_png(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        bail!("saved image file was empty");
    }
    if matches!(image::guess_format(&bytes), Ok(ImageFormat::Png)) {
        return Ok(bytes);
    }
    let decoded = image::load_from_memory(&bytes).context("saved image is not decodable")?;
    let mut buffer = Cursor::new(Vec::new());
    decoded
        .write_to(&mut buffer, ImageFormat::Png)
        .context("PNG re-encode failed")?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use image::{Rgb, RgbImage};

    use super::*;

    fn sample_image() -> DynamicImage {
        let mut image = RgbImage::new(4, 3);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([20, 140, 200]);
        }
        DynamicImage::ImageRgb8(image)
    }

    fn jpeg_bytes() -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        sample_image()
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .unwrap();
        buffer.into_inner()
    }

    fn assert_png(bytes: &[u8], width: u32, height: u32) {
        assert_eq!(image::guess_format(bytes).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (width, height));
    }

    /// Only knows how to write itself to a path; remembers where.
    struct PathOnly {
        bytes: Option<Vec<u8>>,
        saved_to: Mutex<Option<PathBuf>>,
    }

    impl PathOnly {
        fn new(bytes: Option<Vec<u8>>) -> Self {
            Self {
                bytes,
                saved_to: Mutex::new(None),
            }
        }

        fn saved_path(&self) -> PathBuf {
            self.saved_to.lock().unwrap().clone().unwrap()
        }
    }

    impl GeneratedImage for PathOnly {
        fn can_save(&self) -> bool {
            true
        }

        fn save_to(&self, path: &Path) -> Result<()> {
            *self.saved_to.lock().unwrap() = Some(path.to_path_buf());
            match &self.bytes {
                Some(bytes) => {
                    fs::write(path, bytes)?;
                    Ok(())
                }
                None => {
                    fs::write(path, b"partial")?;
                    bail!("disk full")
                }
            }
        }
    }

    struct Opaque;

    impl GeneratedImage for Opaque {}

    #[test]
    fn inline_image_encodes_directly() {
        let bytes = encode_png(&InlineImage(sample_image())).unwrap();
        assert_png(&bytes, 4, 3);
    }

    #[test]
    fn wrapped_image_encodes_inner_image() {
        let handle = WrappedImage {
            image: Some(sample_image()),
        };
        assert_png(&encode_png(&handle).unwrap(), 4, 3);
    }

    #[test]
    fn path_only_handle_round_trips_and_cleans_up() {
        let handle = PathOnly::new(Some(jpeg_bytes()));
        let bytes = encode_png(&handle).unwrap();
        assert_png(&bytes, 4, 3);
        let saved = handle.saved_path();
        assert_eq!(saved.extension().and_then(|ext| ext.to_str()), Some("png"));
        assert!(!saved.exists(), "temp file left behind at {}", saved.display());
    }

    #[test]
    fn path_only_failure_still_cleans_up() {
        let handle = PathOnly::new(None);
        let err = encode_png(&handle).unwrap_err();
        match err {
            PipelineError::ImageAdapter(message) => assert!(message.contains("disk full")),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!handle.saved_path().exists());
    }

    #[test]
    fn undecodable_saved_bytes_fail_and_clean_up() {
        let handle = PathOnly::new(Some(b"not an image".to_vec()));
        assert!(matches!(
            encode_png(&handle),
            Err(PipelineError::ImageAdapter(_))
        ));
        assert!(!handle.saved_path().exists());
    }

    #[test]
    fn handle_without_capabilities_is_rejected() {
        let wrapped_empty = WrappedImage { image: None };
        assert!(matches!(
            encode_png(&wrapped_empty),
            Err(PipelineError::ImageAdapter(_))
        ));
        assert!(matches!(
            encode_png(&Opaque),
            Err(PipelineError::ImageAdapter(_))
        ));
    }
}
