//! Rendering icon payloads into square PNG thumbnails.
//!
//! Whatever the source, the output is a transparent `size × size` canvas
//! with the icon scaled to fit and centered. SVG goes through `resvg`,
//! XPM through [`xpm`], and everything else through the `image` decoders.

pub mod xpm;

use flate2::read::GzDecoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, ThumbnailError};

/// Thumbnail edge length used when none (or an invalid one) is requested.
pub const DEFAULT_SIZE: u32 = 256;
/// Largest thumbnail edge length accepted.
pub const MAX_SIZE: u32 = 4096;

/// How much of the payload content sniffing looks at.
const SNIFF_LIMIT: usize = 1024;

const GZIP_MAGIC: &[u8] = b"\x1f\x8b";

/// A rendered `size × size` PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    size: u32,
    png: Vec<u8>,
}

impl Thumbnail {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn as_png(&self) -> &[u8] {
        &self.png
    }

    pub fn into_png(self) -> Vec<u8> {
        self.png
    }

    /// Write the PNG to `path`.
    ///
    /// The bytes go to a temporary file in the same directory which is then
    /// renamed over `path`, so `path` never holds a partial image. On unix
    /// the file ends up world-readable (`0644`) like any other thumbnail.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&self.png)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file().set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        debug!("wrote {} byte thumbnail to {}", self.png.len(), path.display());
        Ok(())
    }
}

/// What the payload looks like from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Svg,
    /// gzip-compressed SVG (`.svgz`)
    CompressedSvg,
    Raster(ImageFormat),
    /// X PixMap source text
    Xpm,
    Unknown,
}

impl ContentKind {
    pub fn is_vector(&self) -> bool {
        matches!(self, ContentKind::Svg | ContentKind::CompressedSvg)
    }
}

/// Guess the content type of `bytes`.
pub fn sniff(bytes: &[u8]) -> ContentKind {
    if bytes.starts_with(GZIP_MAGIC) {
        let mut inflated = Vec::with_capacity(SNIFF_LIMIT);
        let _ = GzDecoder::new(bytes)
            .take(SNIFF_LIMIT as u64)
            .read_to_end(&mut inflated);
        if contains_svg_tag(&inflated) {
            return ContentKind::CompressedSvg;
        }
    }

    if let Ok(format) = image::guess_format(bytes) {
        return ContentKind::Raster(format);
    }

    let text = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    let text = text.trim_ascii_start();
    if xpm::is_xpm(text) {
        return ContentKind::Xpm;
    }
    if text.starts_with(b"<") && contains_svg_tag(text) {
        return ContentKind::Svg;
    }

    ContentKind::Unknown
}

/// Sniffed as SVG, or an `<svg` tag somewhere near the start.
pub fn is_vector(bytes: &[u8]) -> bool {
    sniff(bytes).is_vector() || contains_svg_tag(bytes)
}

fn contains_svg_tag(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SNIFF_LIMIT)];
    head.windows(4).any(|w| w.eq_ignore_ascii_case(b"<svg"))
}

/// Render `bytes` onto a transparent `size × size` PNG canvas.
pub fn render(bytes: &[u8], size: u32) -> Result<Thumbnail> {
    if bytes.is_empty() {
        return Err(decode_failed("icon payload is empty"));
    }
    if !(1..=MAX_SIZE).contains(&size) {
        return Err(decode_failed(format!("thumbnail size {size} out of range")));
    }

    if is_vector(bytes) {
        debug!("rendering {} byte payload as SVG at {size}px", bytes.len());
        match render_svg(bytes, size) {
            Ok(thumbnail) => return Ok(thumbnail),
            Err(e) => debug!("{e}, trying raster decoders"),
        }
    }

    render_raster(bytes, size)
}

fn render_svg(bytes: &[u8], size: u32) -> Result<Thumbnail> {
    let tree = usvg::Tree::from_data(bytes, &usvg::Options::default())
        .map_err(|e| decode_failed(format!("failed to parse SVG icon: {e}")))?;

    let target = size as f32;
    let intrinsic = tree.size();
    let width = positive_or(intrinsic.width(), target);
    let height = positive_or(intrinsic.height(), target);
    let scale = vector_scale(width, height, target);

    let mut pixmap =
        Pixmap::new(size, size).ok_or_else(|| decode_failed("failed to allocate SVG canvas"))?;

    let translate_x = (target - width * scale) / 2.0;
    let translate_y = (target - height * scale) / 2.0;
    let transform = Transform::from_row(scale, 0.0, 0.0, scale, translate_x, translate_y);
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    let png = pixmap
        .encode_png()
        .map_err(|e| decode_failed(format!("failed to encode SVG thumbnail: {e}")))?;
    Ok(Thumbnail { size, png })
}

fn positive_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

/// Uniform scale fitting `width × height` into `target`, never degenerate.
fn vector_scale(width: f32, height: f32, target: f32) -> f32 {
    let usable = |s: f32| s.is_finite() && s > 0.0;

    let scale = (target / width).min(target / height);
    if usable(scale) {
        return scale;
    }
    let scale = target / width.max(height);
    if usable(scale) {
        return scale;
    }
    1.0
}

fn render_raster(bytes: &[u8], size: u32) -> Result<Thumbnail> {
    let image = if sniff(bytes) == ContentKind::Xpm {
        DynamicImage::ImageRgba8(xpm::decode(bytes)?)
    } else {
        image::load_from_memory(bytes)
            .map_err(|e| decode_failed(format!("failed to load image bytes: {e}")))?
    };

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(decode_failed("image has zero dimensions"));
    }
    debug!("loaded raster {width}x{height}");
    place_on_canvas(&image, size)
}

/// Fit `image` into a transparent `size × size` canvas and encode it.
fn place_on_canvas(image: &DynamicImage, size: u32) -> Result<Thumbnail> {
    let (width, height) = image.dimensions();
    let (fit_w, fit_h) = fit_within(width, height, size);
    let scaled = if (fit_w, fit_h) == (width, height) {
        image.to_rgba8()
    } else {
        image.resize_exact(fit_w, fit_h, FilterType::Lanczos3).to_rgba8()
    };

    let mut canvas = RgbaImage::new(size, size);
    let x = i64::from((size - fit_w) / 2);
    let y = i64::from((size - fit_h) / 2);
    imageops::replace(&mut canvas, &scaled, x, y);

    let mut png = Vec::new();
    canvas
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| decode_failed(format!("failed to write thumbnail: {e}")))?;
    Ok(Thumbnail { size, png })
}

/// Largest `w × h` with the source aspect ratio that fits in `size`.
///
/// Small icons are scaled up as well as large ones down, so every source
/// fills the canvas along its longer edge.
fn fit_within(width: u32, height: u32, size: u32) -> (u32, u32) {
    let scale = (f64::from(size) / f64::from(width)).min(f64::from(size) / f64::from(height));
    let fit = |dim: u32| ((f64::from(dim) * scale).round() as u32).clamp(1, size);
    (fit(width), fit(height))
}

fn decode_failed(reason: impl Into<String>) -> ThumbnailError {
    ThumbnailError::DecodeFailed(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use image::Rgba;

    fn svg(width: u32, height: u32) -> Vec<u8> {
        format!(
            r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">
  <rect x="0" y="0" width="{width}" height="{height}" fill="#3070c0"/>
</svg>"##
        )
        .into_bytes()
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
        let mut out = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn decode(thumbnail: &Thumbnail) -> RgbaImage {
        image::load_from_memory_with_format(thumbnail.as_png(), ImageFormat::Png)
            .unwrap()
            .to_rgba8()
    }

    /// Bounding box `(x0, y0, x1, y1)` (exclusive end) of pixels with alpha.
    fn occupied(image: &RgbaImage) -> (u32, u32, u32, u32) {
        let mut bounds = (u32::MAX, u32::MAX, 0, 0);
        for (x, y, pixel) in image.enumerate_pixels() {
            if pixel[3] > 127 {
                bounds.0 = bounds.0.min(x);
                bounds.1 = bounds.1.min(y);
                bounds.2 = bounds.2.max(x + 1);
                bounds.3 = bounds.3.max(y + 1);
            }
        }
        bounds
    }

    #[test]
    fn svg_is_scaled_up_and_centered() {
        let thumbnail = render(&svg(48, 48), 128).unwrap();
        assert_eq!(thumbnail.size(), 128);

        let image = decode(&thumbnail);
        assert_eq!(image.dimensions(), (128, 128));
        assert_eq!(occupied(&image), (0, 0, 128, 128));
        assert_eq!(image.get_pixel(64, 64)[3], 255);
    }

    #[test]
    fn svg_aspect_ratio_is_preserved() {
        let image = decode(&render(&svg(100, 50), 128).unwrap());
        let (x0, y0, x1, y1) = occupied(&image);
        assert_eq!((x0, x1), (0, 128));
        assert!(y0.abs_diff(32) <= 1, "top edge at {y0}");
        assert!(y1.abs_diff(96) <= 1, "bottom edge at {y1}");
        assert_eq!(image.get_pixel(64, 5)[3], 0);
    }

    #[test]
    fn raster_aspect_ratio_is_preserved() {
        let image = decode(&render(&png(40, 20), 100).unwrap());
        assert_eq!(image.dimensions(), (100, 100));
        assert_eq!(occupied(&image), (0, 25, 100, 75));
        assert_eq!(image.get_pixel(50, 10)[3], 0);
        assert_eq!(image.get_pixel(50, 50)[3], 255);
    }

    #[test]
    fn large_raster_is_scaled_down() {
        let image = decode(&render(&png(300, 600), 64).unwrap());
        assert_eq!(image.dimensions(), (64, 64));
        assert_eq!(occupied(&image), (16, 0, 48, 64));
    }

    #[test]
    fn output_is_always_square() {
        for size in [1, 7, 48, 256] {
            for payload in [svg(30, 90), png(90, 30), png(1, 1)] {
                let image = decode(&render(&payload, size).unwrap());
                assert_eq!(image.dimensions(), (size, size));
            }
        }
    }

    #[test]
    fn rendering_is_deterministic() {
        for payload in [svg(48, 20), png(17, 33)] {
            let first = render(&payload, 96).unwrap();
            let second = render(&payload, 96).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            render(b"definitely not an image", 64),
            Err(ThumbnailError::DecodeFailed(_))
        ));
        assert!(matches!(render(b"", 64), Err(ThumbnailError::DecodeFailed(_))));
        assert!(matches!(
            render(b"<svg this is not xml", 64),
            Err(ThumbnailError::DecodeFailed(_))
        ));
    }

    #[test]
    fn sniffs_content_kinds() {
        assert_eq!(sniff(&svg(10, 10)), ContentKind::Svg);
        assert_eq!(sniff(&png(2, 2)), ContentKind::Raster(ImageFormat::Png));
        assert_eq!(sniff(b"hello"), ContentKind::Unknown);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&svg(10, 10)).unwrap();
        let svgz = encoder.finish().unwrap();
        assert_eq!(sniff(&svgz), ContentKind::CompressedSvg);
        assert!(render(&svgz, 32).is_ok());
    }

    #[test]
    fn svg_tag_heuristic_is_case_insensitive() {
        assert!(is_vector(b"garbage prefix <SVG width='1' height='1'/>"));
        assert!(!is_vector(b"no vector markup here"));

        let mut late = vec![b' '; SNIFF_LIMIT];
        late.extend_from_slice(b"<svg/>");
        assert!(!contains_svg_tag(&late));
    }

    #[test]
    fn degenerate_scales_fall_back() {
        assert_eq!(vector_scale(48.0, 48.0, 128.0), 128.0 / 48.0);
        assert_eq!(vector_scale(f32::INFINITY, f32::INFINITY, 64.0), 1.0);
        assert_eq!(positive_or(-3.0, 64.0), 64.0);
        assert_eq!(positive_or(f32::NAN, 64.0), 64.0);
    }

    #[test]
    fn write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("thumb.png");
        std::fs::write(&output, b"stale").unwrap();

        let thumbnail = render(&png(8, 8), 16).unwrap();
        thumbnail.write_to(&output).unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), thumbnail.as_png());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn written_thumbnail_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("thumb.png");
        render(&png(4, 4), 8).unwrap().write_to(&output).unwrap();

        let mode = std::fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn largest_size_is_rendered() {
        for payload in [svg(16, 16), png(3, 5)] {
            let thumbnail = render(&payload, MAX_SIZE).unwrap();
            let dimensions = image::ImageReader::new(Cursor::new(thumbnail.as_png()))
                .with_guessed_format()
                .unwrap()
                .into_dimensions()
                .unwrap();
            assert_eq!(dimensions, (MAX_SIZE, MAX_SIZE));
        }
        assert!(render(&png(2, 2), MAX_SIZE + 1).is_err());
    }

    #[test]
    fn xpm_is_rendered_like_raster() {
        let xpm = b"/* XPM */\nstatic char *icon[] = {\n\"4 2 2 1\",\n\". c None\",\n\"# c #00FF00\",\n\"..##\",\n\"..##\"};\n";
        assert_eq!(sniff(xpm), ContentKind::Xpm);

        let image = decode(&render(xpm, 4).unwrap());
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(occupied(&image), (2, 1, 4, 3));
        assert_eq!(image.get_pixel(0, 2)[3], 0);
        assert_eq!(*image.get_pixel(3, 2), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn fit_never_yields_zero() {
        assert_eq!(fit_within(4000, 1, 16), (16, 1));
        assert_eq!(fit_within(16, 16, 16), (16, 16));
        assert_eq!(fit_within(10, 20, 100), (50, 100));
    }
}
