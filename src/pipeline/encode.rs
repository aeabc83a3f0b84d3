//! Image encoding: JPEG / PNG / GIF bytes → lossy WebP bytes.
//!
//! The `image` crate decodes every source format but only writes lossless
//! WebP, which is larger than the JPEGs it would replace. Encoding therefore
//! goes through libwebp (`webp` crate), which also provides the animation
//! encoder needed to keep animated GIFs animated.
//!
//! The same function serves files on disk and inline `data:` payloads; only
//! the quality differs (see [`crate::config::DEFAULT_FILE_QUALITY`] and
//! [`crate::config::DEFAULT_INLINE_QUALITY`]).

use crate::error::ConversionError;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use tracing::debug;
use webp::{AnimEncoder, AnimFrame, Encoder, WebPConfig};

/// GIF delays below this are played back at [`DEFAULT_FRAME_DELAY_MS`] by browsers.
const MIN_FRAME_DELAY_MS: u32 = 20;
const DEFAULT_FRAME_DELAY_MS: u32 = 100;

/// Re-encode `bytes` as lossy WebP at `quality` (0–100).
///
/// Multi-frame GIFs become animated WebP; everything else a single frame.
/// Never returns an empty buffer: any failure is an error and the caller
/// keeps the original.
pub fn encode_webp(bytes: &[u8], quality: f32) -> Result<Vec<u8>, ConversionError> {
    if bytes.is_empty() {
        return Err(ConversionError::EmptyInput);
    }

    let format = image::guess_format(bytes)?;

    let out = if format == ImageFormat::Gif {
        let mut frames = decode_gif_frames(bytes)?;
        match frames.len() {
            0 => return Err(ConversionError::Decode("GIF has no frames".into())),
            1 => {
                let frame = frames.remove(0);
                encode_still(&DynamicImage::ImageRgba8(frame.image), quality)?
            }
            _ => encode_animated(&frames, quality)?,
        }
    } else {
        let img = image::load_from_memory_with_format(bytes, format)?;
        encode_still(&img, quality)?
    };

    debug!(
        "Encoded {:?} {} bytes → WebP {} bytes (q={})",
        format,
        bytes.len(),
        out.len(),
        quality
    );
    Ok(out)
}

fn encode_still(img: &DynamicImage, quality: f32) -> Result<Vec<u8>, ConversionError> {
    let (width, height) = (img.width(), img.height());

    let memory = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        Encoder::from_rgba(rgba.as_raw(), width, height).encode_simple(false, quality)
    } else {
        let rgb = img.to_rgb8();
        Encoder::from_rgb(rgb.as_raw(), width, height).encode_simple(false, quality)
    }
    .map_err(|e| ConversionError::Encode(format!("{e:?}")))?;

    Ok(memory.to_vec())
}

struct GifFrame {
    image: RgbaImage,
    delay_ms: u32,
}

/// Decode every frame, composited to the full GIF canvas.
fn decode_gif_frames(bytes: &[u8]) -> Result<Vec<GifFrame>, ConversionError> {
    let decoder = GifDecoder::new(Cursor::new(bytes))?;
    let frames = decoder.into_frames().collect_frames()?;

    Ok(frames
        .into_iter()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            GifFrame {
                delay_ms: frame_delay_ms(numer, denom),
                image: frame.into_buffer(),
            }
        })
        .collect())
}

fn frame_delay_ms(numer: u32, denom: u32) -> u32 {
    let ms = if denom == 0 { 0 } else { numer / denom };
    if ms < MIN_FRAME_DELAY_MS {
        DEFAULT_FRAME_DELAY_MS
    } else {
        ms
    }
}

fn encode_animated(frames: &[GifFrame], quality: f32) -> Result<Vec<u8>, ConversionError> {
    let (width, height) = frames[0].image.dimensions();
    if frames.iter().any(|f| f.image.dimensions() != (width, height)) {
        return Err(ConversionError::Decode(
            "GIF frames differ in size from the canvas".into(),
        ));
    }

    let mut config = WebPConfig::new()
        .map_err(|_| ConversionError::Encode("libwebp rejected the default config".into()))?;
    config.lossless = 0;
    config.quality = quality;

    let mut encoder = AnimEncoder::new(width, height, &config);
    encoder.set_loop_count(0);

    let mut timestamp: i32 = 0;
    for frame in frames {
        encoder.add_frame(AnimFrame::from_rgba(
            frame.image.as_raw(),
            width,
            height,
            timestamp,
        ));
        timestamp = timestamp.saturating_add(frame.delay_ms as i32);
    }
    // The encoder ends the animation at the last frame's timestamp; repeating
    // the final frame at the end time keeps its delay.
    if let Some(last) = frames.last() {
        encoder.add_frame(AnimFrame::from_rgba(
            last.image.as_raw(),
            width,
            height,
            timestamp,
        ));
    }

    let memory = encoder
        .try_encode()
        .map_err(|e| ConversionError::Encode(format!("{e:?}")))?;
    Ok(memory.to_vec())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, ImageFormat, Rgb, RgbImage, Rgba};

    pub(crate) fn png_bytes(width: u32, height: u32, colour: [u8; 4]) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(colour)));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    pub(crate) fn jpeg_bytes(width: u32, height: u32, colour: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(colour)));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg).unwrap();
        buf
    }

    fn animated_gif_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut enc = GifEncoder::new(&mut buf);
            let frames = [[255, 0, 0, 255], [0, 0, 255, 255], [0, 255, 0, 255]]
                .into_iter()
                .map(|c| {
                    Frame::from_parts(
                        RgbaImage::from_pixel(8, 8, Rgba(c)),
                        0,
                        0,
                        Delay::from_numer_denom_ms(150, 1),
                    )
                });
            enc.encode_frames(frames).unwrap();
        }
        buf
    }

    fn is_webp(bytes: &[u8]) -> bool {
        bytes.len() > 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP"
    }

    fn has_chunk(bytes: &[u8], tag: &[u8; 4]) -> bool {
        bytes.windows(4).any(|w| w == tag)
    }

    #[test]
    fn png_becomes_webp_with_same_content() {
        let out = encode_webp(&png_bytes(16, 12, [255, 0, 0, 255]), 82.0).unwrap();
        assert!(is_webp(&out));

        let decoded = image::load_from_memory(&out).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 12));
        let px = decoded.get_pixel(8, 6);
        assert!(px[0] > 200 && px[1] < 60 && px[2] < 60, "got {px:?}");
    }

    #[test]
    fn jpeg_becomes_webp() {
        let out = encode_webp(&jpeg_bytes(20, 20, [0, 0, 255]), 82.0).unwrap();
        assert!(is_webp(&out));
        assert!(!has_chunk(&out, b"ANIM"));
        assert_eq!(image::load_from_memory(&out).unwrap().width(), 20);
    }

    #[test]
    fn animated_gif_stays_animated() {
        let out = encode_webp(&animated_gif_bytes(), 82.0).unwrap();
        assert!(is_webp(&out));
        assert!(has_chunk(&out, b"ANIM"), "expected an animated WebP");
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(encode_webp(&[], 82.0), Err(ConversionError::EmptyInput));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            encode_webp(b"not an image at all", 82.0),
            Err(ConversionError::Decode(_))
        ));

        let mut truncated = png_bytes(32, 32, [1, 2, 3, 255]);
        truncated.truncate(40);
        assert!(matches!(
            encode_webp(&truncated, 82.0),
            Err(ConversionError::Decode(_))
        ));
    }

    #[test]
    fn short_gif_delays_use_browser_default() {
        assert_eq!(frame_delay_ms(0, 1), 100);
        assert_eq!(frame_delay_ms(10, 1), 100);
        assert_eq!(frame_delay_ms(150, 1), 150);
        assert_eq!(frame_delay_ms(5, 0), 100);
    }
}
