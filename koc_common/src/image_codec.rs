//! Sensor frames travel as PNG: lossless, and a depth map or camera image
//! shrinks to a fraction of its raw size.

use image::{
    codecs::png::{CompressionType, FilterType, PngEncoder},
    ExtendedColorType, ImageEncoder, ImageFormat,
};
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};

use crate::packet::{DepthFrame, VideoFrame};

#[derive(Serialize, Deserialize)]
struct WireImage {
    width: u32,
    height: u32,
    /// Empty for an image without pixels.
    #[serde(with = "serde_bytes")]
    png: Vec<u8>,
}

fn encode_png(
    width: u32,
    height: u32,
    bytes: &[u8],
    color: ExtendedColorType,
) -> Result<Vec<u8>, image::ImageError> {
    let mut dst = Vec::new();
    if width == 0 || height == 0 {
        return Ok(dst);
    }
    let enc = PngEncoder::new_with_quality(&mut dst, CompressionType::Default, FilterType::Adaptive);
    enc.write_image(bytes, width, height, color)?;
    Ok(dst)
}

fn decode_png(wire: &WireImage) -> Result<Option<image::DynamicImage>, String> {
    if wire.png.is_empty() {
        return match wire.width as u64 * wire.height as u64 {
            0 => Ok(None),
            _ => Err(format!("missing pixels for {}x{} image", wire.width, wire.height)),
        };
    }
    let img = image::load_from_memory_with_format(&wire.png, ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    if (img.width(), img.height()) != (wire.width, wire.height) {
        return Err(format!(
            "image is {}x{}, header says {}x{}",
            img.width(),
            img.height(),
            wire.width,
            wire.height
        ));
    }
    Ok(Some(img))
}

impl Serialize for VideoFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.data.len() != self.expected_len() {
            return Err(ser::Error::custom(format!(
                "video frame has {} bytes, {}x{} needs {}",
                self.data.len(),
                self.width,
                self.height,
                self.expected_len()
            )));
        }
        let png = encode_png(self.width, self.height, &self.data, ExtendedColorType::Rgb8)
            .map_err(ser::Error::custom)?;
        WireImage {
            width: self.width,
            height: self.height,
            png,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VideoFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireImage::deserialize(deserializer)?;
        let data = match decode_png(&wire).map_err(de::Error::custom)? {
            Some(img) => img.into_rgb8().into_raw(),
            None => Vec::new(),
        };
        Ok(Self {
            width: wire.width,
            height: wire.height,
            data,
        })
    }
}

impl Serialize for DepthFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.data.len() != self.expected_len() {
            return Err(ser::Error::custom(format!(
                "depth frame has {} readings, {}x{} needs {}",
                self.data.len(),
                self.width,
                self.height,
                self.expected_len()
            )));
        }
        // 16-bit samples are handed to the encoder in native byte order.
        let bytes: Vec<u8> = self.data.iter().flat_map(|raw| raw.to_ne_bytes()).collect();
        let png = encode_png(self.width, self.height, &bytes, ExtendedColorType::L16)
            .map_err(ser::Error::custom)?;
        WireImage {
            width: self.width,
            height: self.height,
            png,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DepthFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireImage::deserialize(deserializer)?;
        let data = match decode_png(&wire).map_err(de::Error::custom)? {
            Some(img) => img.into_luma16().into_raw(),
            None => Vec::new(),
        };
        Ok(Self {
            width: wire.width,
            height: wire.height,
            data,
        })
    }
}

#[cfg(test)]
mod test {
    use std::time::SystemTime;

    use super::*;
    use crate::packet::{Packet, PacketHeader, SensorFrame};

    fn gradient_frame(width: u32, height: u32) -> SensorFrame {
        let video = (0..height)
            .flat_map(|y| (0..width).flat_map(move |x| [x as u8, y as u8, 0x40]))
            .collect();
        let depth = (0..height)
            .flat_map(|y| (0..width).map(move |x| ((x + y) % 2047) as u16))
            .collect();
        SensorFrame {
            header: PacketHeader {
                sequence: 9,
                timestamp: SystemTime::UNIX_EPOCH,
            },
            video: VideoFrame {
                width,
                height,
                data: video,
            },
            depth: DepthFrame {
                width,
                height,
                data: depth,
            },
            tilt_state: 0,
            tilt_degrees: 0.0,
        }
    }

    #[test]
    fn full_size_frame_is_compressed_losslessly() {
        let frame = gradient_frame(640, 480);
        let raw_len = frame.video.data.len() + frame.depth.data.len() * 2;
        let bytes = Packet::from(frame.clone()).encode().unwrap();
        assert!(
            bytes.len() * 8 < raw_len,
            "{} encoded bytes for {raw_len} raw bytes",
            bytes.len()
        );
        assert_eq!(Packet::decode(&bytes).unwrap(), Packet::SensorFrame(frame));
    }

    #[test]
    fn depth_keeps_full_sample_range() {
        let mut frame = gradient_frame(4, 2);
        frame.depth.data = vec![0, 1, 255, 256, 2047, 4095, 0x8001, u16::MAX];
        let bytes = Packet::from(frame.clone()).encode().unwrap();
        assert_eq!(Packet::decode(&bytes).unwrap(), Packet::SensorFrame(frame));
    }

    #[test]
    fn mismatched_dimensions_fail_to_encode() {
        let mut frame = gradient_frame(4, 2);
        frame.video.data.pop();
        assert!(Packet::from(frame).encode().is_err());
    }
}
