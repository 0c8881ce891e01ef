use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::warn;

/// Bounds applied before attaching a photo to a prompt payload. Analysis can
/// afford more detail; the chat collaborator only needs layout and color.
pub const ANALYSIS_MAX_DIM: u32 = 768;
pub const ANALYSIS_JPEG_QUALITY: u8 = 60;
pub const CHAT_MAX_DIM: u32 = 512;
pub const CHAT_JPEG_QUALITY: u8 = 50;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

/// Downscale and recompress an image so prompt payloads stay small. Images
/// already within bounds pass through untouched; undecodable input falls
/// back to the original bytes rather than failing the request.
pub fn downscale_for_prompt(data: &[u8], max_dim: u32, jpeg_quality: u8) -> Vec<u8> {
    let decoded = match image::load_from_memory(data) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!("Image decode failed, sending original bytes: {err}");
            return data.to_vec();
        }
    };

    if decoded.width().max(decoded.height()) <= max_dim {
        return data.to_vec();
    }

    let resized = decoded.thumbnail(max_dim, max_dim).to_rgb8();
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, jpeg_quality);
    match encoder.encode_image(&DynamicImage::ImageRgb8(resized)) {
        Ok(()) => out,
        Err(err) => {
            warn!("JPEG re-encode failed, sending original bytes: {err}");
            data.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 90, 60]),
        ));
        let mut out = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("png encode");
        out.into_inner()
    }

    #[test]
    fn large_images_are_downscaled_within_bounds() {
        let original = png_bytes(64, 32);
        let scaled = downscale_for_prompt(&original, 16, 60);
        let decoded = image::load_from_memory(&scaled).expect("decodable output");
        assert!(decoded.width() <= 16 && decoded.height() <= 16);
    }

    #[test]
    fn small_images_pass_through_untouched() {
        let original = png_bytes(8, 8);
        let scaled = downscale_for_prompt(&original, 16, 60);
        assert_eq!(scaled, original);
    }

    #[test]
    fn undecodable_input_falls_back_to_the_original_bytes() {
        let garbage = vec![0u8, 1, 2, 3, 4];
        assert_eq!(downscale_for_prompt(&garbage, 16, 60), garbage);
    }

    #[test]
    fn detects_png_mime() {
        let data = png_bytes(4, 4);
        assert_eq!(detect_mime_type(&data).as_deref(), Some("image/png"));
    }
}
