//! MetaImage (`.mha`) codec.
//!
//! Single-file MetaImage with a text header followed by zlib-compressed,
//! little-endian, channel-interleaved samples. Used for rasters too large
//! for viewers that index pixels with signed 32-bit integers.

use anyhow::{anyhow, bail, Context, Result};
use burn::tensor::backend::Backend;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sectionreg_core::image::{Image, ImageMetadata, PixelType};
use sectionreg_core::spatial::{Point, Spacing};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

fn element_type(pixel_type: PixelType) -> &'static str {
    match pixel_type {
        PixelType::U8 => "MET_UCHAR",
        PixelType::U16 => "MET_USHORT",
        PixelType::F32 => "MET_FLOAT",
    }
}

fn encode_samples(planes: &[f32], channels: usize, pixel_type: PixelType) -> Vec<u8> {
    let plane_len = planes.len() / channels.max(1);
    let mut bytes = Vec::with_capacity(planes.len() * 4);
    for i in 0..plane_len {
        for c in 0..channels {
            let v = planes[c * plane_len + i];
            match pixel_type {
                PixelType::U8 => bytes.push(crate::quantize(v, 255.0) as u8),
                PixelType::U16 => bytes.extend((crate::quantize(v, 65_535.0) as u16).to_le_bytes()),
                PixelType::F32 => bytes.extend(v.to_le_bytes()),
            }
        }
    }
    bytes
}

/// Write an image as a compressed single-file MetaImage.
pub fn write_mha<B: Backend, P: AsRef<Path>>(image: &Image<B>, path: P) -> Result<()> {
    let path = path.as_ref();
    let planes = crate::planar_samples(image)?;
    let [channels, height, width] = image.shape();
    let metadata = image.metadata();

    let mut compressor = ZlibEncoder::new(Vec::new(), Compression::default());
    compressor.write_all(&encode_samples(&planes, channels, metadata.pixel_type()))?;
    let compressed = compressor.finish()?;

    let origin = metadata.origin();
    let spacing = metadata.spacing();
    let mut header = String::new();
    header.push_str("ObjectType = Image\n");
    header.push_str("NDims = 2\n");
    header.push_str("BinaryData = True\n");
    header.push_str("BinaryDataByteOrderMSB = False\n");
    header.push_str("CompressedData = True\n");
    header.push_str(&format!("CompressedDataSize = {}\n", compressed.len()));
    header.push_str(&format!("Offset = {} {}\n", origin.x(), origin.y()));
    header.push_str(&format!("ElementSpacing = {} {}\n", spacing[0], spacing[1]));
    header.push_str(&format!("DimSize = {} {}\n", width, height));
    if channels > 1 {
        header.push_str(&format!("ElementNumberOfChannels = {}\n", channels));
    }
    header.push_str(&format!("ElementType = {}\n", element_type(metadata.pixel_type())));
    header.push_str("ElementDataFile = LOCAL\n");

    let file = File::create(path).with_context(|| format!("Failed to create MetaImage {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(header.as_bytes())?;
    writer.write_all(&compressed)?;
    writer.flush()?;

    tracing::debug!(path = %path.display(), width, height, channels, "encoded MetaImage");
    Ok(())
}

/// Read a single-file MetaImage written by [`write_mha`] or ITK.
pub fn read_mha<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B>> {
    let path = path.as_ref();
    let mut bytes = Vec::new();
    File::open(path)
        .with_context(|| format!("Failed to open MetaImage {}", path.display()))?
        .read_to_end(&mut bytes)?;

    let mut header = MetaHeader::default();
    let mut cursor = 0;
    loop {
        let end = bytes[cursor..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|p| cursor + p)
            .ok_or_else(|| anyhow!("MetaImage header is not terminated by ElementDataFile"))?;
        let line = std::str::from_utf8(&bytes[cursor..end])
            .context("MetaImage header is not UTF-8")?
            .trim();
        cursor = end + 1;

        if let Some((key, value)) = line.split_once('=') {
            let (key, value) = (key.trim(), value.trim());
            header.set(key, value)?;
            if key == "ElementDataFile" {
                if value != "LOCAL" {
                    bail!("Detached MetaImage data files are not supported");
                }
                break;
            }
        }
    }

    let payload = &bytes[cursor..];
    let raw = if header.compressed {
        let mut raw = Vec::new();
        ZlibDecoder::new(payload).read_to_end(&mut raw)?;
        raw
    } else {
        payload.to_vec()
    };

    let [width, height] = header.dim_size.ok_or_else(|| anyhow!("MetaImage lacks DimSize"))?;
    let channels = header.channels;
    let pixel_type = header.pixel_type.ok_or_else(|| anyhow!("MetaImage lacks ElementType"))?;

    let interleaved: Vec<f32> = match pixel_type {
        PixelType::U8 => raw.iter().map(|b| f32::from(*b)).collect(),
        PixelType::U16 => raw
            .chunks_exact(2)
            .map(|c| f32::from(u16::from_le_bytes([c[0], c[1]])))
            .collect(),
        PixelType::F32 => raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    };
    if interleaved.len() != width * height * channels {
        bail!("MetaImage holds {} samples, expected {}", interleaved.len(), width * height * channels);
    }

    let plane_len = width * height;
    let mut planes = vec![0.0f32; interleaved.len()];
    for (i, v) in interleaved.into_iter().enumerate() {
        planes[(i % channels) * plane_len + i / channels] = v;
    }

    let metadata = ImageMetadata::in_memory()
        .with_origin(header.offset)
        .with_spacing(header.spacing)
        .with_pixel_type(pixel_type);
    Image::from_planar(planes, [channels, height, width], metadata, device)
        .context("MetaImage has an empty raster")
}

struct MetaHeader {
    dim_size: Option<[usize; 2]>,
    channels: usize,
    pixel_type: Option<PixelType>,
    compressed: bool,
    offset: Point,
    spacing: Spacing,
}

impl Default for MetaHeader {
    fn default() -> Self {
        Self {
            dim_size: None,
            channels: 1,
            pixel_type: None,
            compressed: false,
            offset: Point::origin(),
            spacing: Spacing::uniform(1.0),
        }
    }
}

impl MetaHeader {
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "NDims" if value != "2" => bail!("Only 2D MetaImages are supported, got NDims = {}", value),
            "DimSize" => {
                let [w, h] = pair::<usize>(value)?;
                self.dim_size = Some([w, h]);
            }
            "ElementNumberOfChannels" => self.channels = value.parse()?,
            "ElementType" => {
                self.pixel_type = Some(match value {
                    "MET_UCHAR" => PixelType::U8,
                    "MET_USHORT" => PixelType::U16,
                    "MET_FLOAT" => PixelType::F32,
                    other => bail!("Unsupported MetaImage element type {}", other),
                })
            }
            "CompressedData" => self.compressed = value.eq_ignore_ascii_case("true"),
            "BinaryDataByteOrderMSB" if value.eq_ignore_ascii_case("true") => {
                bail!("Big-endian MetaImages are not supported")
            }
            "Offset" | "Origin" | "Position" => self.offset = Point::new(pair::<f64>(value)?),
            "ElementSpacing" | "ElementSize" => self.spacing = Spacing::new(pair::<f64>(value)?),
            _ => {}
        }
        Ok(())
    }
}

fn pair<T: std::str::FromStr>(value: &str) -> Result<[T; 2]>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let mut parts = value.split_whitespace();
    let mut next = || -> Result<T> {
        Ok(parts
            .next()
            .ok_or_else(|| anyhow!("Expected two values in '{}'", value))?
            .parse()?)
    };
    Ok([next()?, next()?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_interleaves_channels() {
        let bytes = encode_samples(&[1.0, 2.0, 10.0, 20.0], 2, PixelType::U8);
        assert_eq!(bytes, vec![1, 10, 2, 20]);
    }

    #[test]
    fn test_header_rejects_3d() {
        let mut header = MetaHeader::default();
        assert!(header.set("NDims", "3").is_err());
        assert!(header.set("NDims", "2").is_ok());
    }

    #[test]
    fn test_pair_parsing() {
        assert_eq!(pair::<f64>("0.5 0.25").unwrap(), [0.5, 0.25]);
        assert!(pair::<usize>("7").is_err());
    }
}
