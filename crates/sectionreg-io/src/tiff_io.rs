use anyhow::{bail, Context, Result};
use burn::tensor::backend::Backend;
use sectionreg_core::image::{Image, ImageMetadata, PixelType};
use sectionreg_core::spatial::Spacing;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType as EncoderColorType};
use tiff::encoder::{Rational, TiffEncoder, TiffValue};
use tiff::tags::ResolutionUnit;
use tiff::ColorType;

/// Read a TIFF into a planar image.
///
/// Interleaved samples become channels. Additional pages of the same size are
/// appended as further channels, which is how multi-channel fluorescence
/// stacks are usually stored. Spacing and origin are left at their defaults;
/// the caller supplies the physical resolution.
pub fn read_tiff<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open TIFF {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .context("Failed to read TIFF header")?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    let mut planes: Vec<f32> = Vec::new();
    let mut channels = 0;
    let mut pixel_type = None;

    loop {
        let (w, h) = decoder.dimensions()?;
        if (w as usize, h as usize) != (width, height) {
            bail!("TIFF pages differ in size: {}x{} vs {}x{}", w, h, width, height);
        }

        let samples_per_pixel = match decoder.colortype()? {
            ColorType::Gray(_) => 1,
            ColorType::GrayA(_) => 2,
            ColorType::RGB(_) => 3,
            ColorType::RGBA(_) => 4,
            other => bail!("Unsupported TIFF color type: {:?}", other),
        };

        let (samples, page_type) = match decoder.read_image()? {
            DecodingResult::U8(buf) => (buf.into_iter().map(f32::from).collect::<Vec<_>>(), PixelType::U8),
            DecodingResult::U16(buf) => (buf.into_iter().map(f32::from).collect(), PixelType::U16),
            DecodingResult::U32(buf) => (buf.into_iter().map(|v| v as f32).collect(), PixelType::F32),
            DecodingResult::F32(buf) => (buf, PixelType::F32),
            DecodingResult::F64(buf) => (buf.into_iter().map(|v| v as f32).collect(), PixelType::F32),
            _ => bail!("Unsupported TIFF sample format in {}", path.display()),
        };

        if samples.len() != width * height * samples_per_pixel {
            bail!("TIFF page holds {} samples, expected {}", samples.len(), width * height * samples_per_pixel);
        }

        deinterleave(&samples, samples_per_pixel, &mut planes);
        channels += samples_per_pixel;
        pixel_type.get_or_insert(page_type);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    let metadata = ImageMetadata::in_memory().with_pixel_type(pixel_type.unwrap_or_default());
    tracing::debug!(path = %path.display(), width, height, channels, "decoded TIFF");

    Image::from_planar(planes, [channels, height, width], metadata, device)
        .context("TIFF has an empty raster")
}

/// Write an image as TIFF in its recorded pixel type.
///
/// Three integer channels are stored as one interleaved RGB page; anything
/// else becomes one grayscale page per channel. The spacing is recorded as
/// pixels per centimetre so viewers show physical units.
pub fn write_tiff<B: Backend, P: AsRef<Path>>(image: &Image<B>, path: P) -> Result<()> {
    let path = path.as_ref();
    let planes = crate::planar_samples(image)?;
    let [channels, height, width] = image.shape();
    let spacing = image.spacing();

    let file = File::create(path).with_context(|| format!("Failed to create TIFF {}", path.display()))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;

    let pixel_type = image.metadata().pixel_type();
    match (pixel_type, channels) {
        (PixelType::U8, 3) => {
            let data = interleave(&planes, channels, |v| crate::quantize(v, 255.0) as u8);
            write_page::<colortype::RGB8, _>(&mut encoder, width, height, spacing, &data)?;
        }
        (PixelType::U16, 3) => {
            let data = interleave(&planes, channels, |v| crate::quantize(v, 65_535.0) as u16);
            write_page::<colortype::RGB16, _>(&mut encoder, width, height, spacing, &data)?;
        }
        _ => {
            let plane_len = width * height;
            for plane in planes.chunks(plane_len.max(1)) {
                match pixel_type {
                    PixelType::U8 => {
                        let data: Vec<u8> = plane.iter().map(|v| crate::quantize(*v, 255.0) as u8).collect();
                        write_page::<colortype::Gray8, _>(&mut encoder, width, height, spacing, &data)?;
                    }
                    PixelType::U16 => {
                        let data: Vec<u16> = plane.iter().map(|v| crate::quantize(*v, 65_535.0) as u16).collect();
                        write_page::<colortype::Gray16, _>(&mut encoder, width, height, spacing, &data)?;
                    }
                    PixelType::F32 => {
                        write_page::<colortype::Gray32Float, _>(&mut encoder, width, height, spacing, plane)?;
                    }
                }
            }
        }
    }

    tracing::debug!(path = %path.display(), width, height, channels, "encoded TIFF");
    Ok(())
}

fn write_page<C, W>(
    encoder: &mut TiffEncoder<W>,
    width: usize,
    height: usize,
    spacing: &Spacing,
    data: &[C::Inner],
) -> Result<()>
where
    C: EncoderColorType,
    [C::Inner]: TiffValue,
    W: std::io::Write + std::io::Seek,
{
    let mut page = encoder.new_image::<C>(width as u32, height as u32)?;
    // spacing is in microns per pixel
    let pixels_per_cm = 10_000.0 / spacing[0];
    page.resolution(
        ResolutionUnit::Centimeter,
        Rational {
            n: (pixels_per_cm * 1000.0).round().clamp(1.0, u32::MAX as f64) as u32,
            d: 1000,
        },
    );
    page.write_data(data)?;
    Ok(())
}

/// Append the channels of an interleaved raster as planes.
fn deinterleave(samples: &[f32], samples_per_pixel: usize, planes: &mut Vec<f32>) {
    for channel in 0..samples_per_pixel {
        planes.extend(samples.iter().skip(channel).step_by(samples_per_pixel));
    }
}

fn interleave<T, F: Fn(f32) -> T>(planes: &[f32], channels: usize, convert: F) -> Vec<T> {
    let plane_len = planes.len() / channels.max(1);
    (0..plane_len)
        .flat_map(|i| (0..channels).map(move |c| i + c * plane_len))
        .map(|idx| convert(planes[idx]))
        .collect()
}
