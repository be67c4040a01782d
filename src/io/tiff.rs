//! TIFF and PNG reading for raw images and stacks, single-page and multi-page TIFF writing

use crate::io::error::{PipelineError, Result, WithPath, invalid_source};
use ndarray::{Array2, ArrayD, Axis};
use num_traits::ToPrimitive;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{TiffEncoder, colortype};

/// One grayscale image plane with its original sample type
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// 8-bit unsigned samples
    U8(Array2<u8>),
    /// 16-bit unsigned samples
    U16(Array2<u16>),
    /// 32-bit floating point samples
    F32(Array2<f32>),
}

impl Frame {
    /// Plane extent as `(height, width)`
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::U8(data) => data.dim(),
            Self::U16(data) => data.dim(),
            Self::F32(data) => data.dim(),
        }
    }

    /// Short name of the sample type
    pub const fn sample_format(&self) -> &'static str {
        match self {
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::F32(_) => "f32",
        }
    }

    /// Samples converted to `f32`
    pub fn to_f32(&self) -> Array2<f32> {
        match self {
            Self::U8(data) => to_f32_plane(data),
            Self::U16(data) => to_f32_plane(data),
            Self::F32(data) => data.clone(),
        }
    }
}

fn to_f32_plane<T: Copy + ToPrimitive>(data: &Array2<T>) -> Array2<f32> {
    data.mapv(|v| v.to_f32().unwrap_or(f32::NAN))
}

/// Decode every page of a grayscale TIFF in file order
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be opened
/// - A page cannot be decoded
/// - A page is not single-channel or uses an unsupported sample type
pub fn read_pages(path: &Path) -> Result<Vec<Frame>> {
    let decode_err = |source: tiff::TiffError| PipelineError::TiffDecode {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).with_path(path, "open")?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(decode_err)?
        .with_limits(Limits::unlimited());

    let mut pages = vec![decode_page(&mut decoder, path)?];
    while decoder.more_images() {
        decoder.next_image().map_err(decode_err)?;
        pages.push(decode_page(&mut decoder, path)?);
    }

    log::debug!("Decoded {} page(s) from {}", pages.len(), path.display());
    Ok(pages)
}

fn decode_page<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<Frame> {
    let decode_err = |source: tiff::TiffError| PipelineError::TiffDecode {
        path: path.to_path_buf(),
        source,
    };

    let (width, height) = decoder.dimensions().map_err(decode_err)?;
    let color_type = decoder.colortype().map_err(decode_err)?;
    if !matches!(color_type, ColorType::Gray(_)) {
        return Err(invalid_source(&format!(
            "'{}' uses color type {color_type:?}, only grayscale pages are supported",
            path.display()
        )));
    }

    let shape = (height as usize, width as usize);
    let frame = match decoder.read_image().map_err(decode_err)? {
        DecodingResult::U8(data) => Frame::U8(Array2::from_shape_vec(shape, data)?),
        DecodingResult::U16(data) => Frame::U16(Array2::from_shape_vec(shape, data)?),
        DecodingResult::F32(data) => Frame::F32(Array2::from_shape_vec(shape, data)?),
        _ => {
            return Err(invalid_source(&format!(
                "'{}' uses an unsupported sample type, expected u8, u16 or f32",
                path.display()
            )));
        }
    };

    Ok(frame)
}

/// Read a raw image as `f32` samples
///
/// A single-page TIFF or a PNG yields a `(Y, X)` array; a multi-page TIFF
/// yields `(C, Y, X)` with one channel per page.
///
/// # Errors
///
/// Returns an error if the file cannot be decoded or its pages differ in shape
pub fn read_image_f32(path: &Path) -> Result<ArrayD<f32>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    if extension.as_deref() == Some("png") {
        let img = image::open(path).map_err(|source| PipelineError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let luma = img.into_luma16();
        let (width, height) = luma.dimensions();
        let plane = Array2::from_shape_vec((height as usize, width as usize), luma.into_raw())?;
        return Ok(to_f32_plane(&plane).into_dyn());
    }

    let pages = read_pages(path)?;
    let planes: Vec<Array2<f32>> = pages.iter().map(Frame::to_f32).collect();

    match planes.as_slice() {
        [single] => Ok(single.clone().into_dyn()),
        _ => {
            let views: Vec<_> = planes.iter().map(Array2::view).collect();
            let stacked = ndarray::stack(Axis(0), &views).map_err(|shape_error| {
                let shapes: Vec<&[usize]> = planes.iter().map(Array2::shape).collect();
                invalid_source(&format!(
                    "pages of '{}' with shapes {shapes:?} cannot form channels: {shape_error}",
                    path.display()
                ))
            })?;
            Ok(stacked.into_dyn())
        }
    }
}

/// Write frames as the pages of one TIFF, replacing any existing file
///
/// # Errors
///
/// Returns an error if the file cannot be created or encoding fails
pub fn write_pages(path: &Path, frames: &[Frame]) -> Result<()> {
    let encode_err = |source: tiff::TiffError| PipelineError::TiffEncode {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).with_path(path, "create file")?;
    let mut encoder = TiffEncoder::new(file).map_err(encode_err)?;

    for frame in frames {
        let (height, width) = frame.dim();
        let (width, height) = (width as u32, height as u32);
        let written = match frame {
            Frame::U8(data) => {
                encoder.write_image::<colortype::Gray8>(width, height, &samples(data))
            }
            Frame::U16(data) => {
                encoder.write_image::<colortype::Gray16>(width, height, &samples(data))
            }
            Frame::F32(data) => {
                encoder.write_image::<colortype::Gray32Float>(width, height, &samples(data))
            }
        };
        written.map_err(encode_err)?;
    }

    Ok(())
}

/// Write a single frame as a one-page TIFF
///
/// # Errors
///
/// Returns an error if the file cannot be created or encoding fails
pub fn write_frame(path: &Path, frame: &Frame) -> Result<()> {
    write_pages(path, std::slice::from_ref(frame))
}

// Row-major samples, borrowed when the plane is already contiguous
fn samples<T: Copy>(data: &Array2<T>) -> Cow<'_, [T]> {
    data.as_slice()
        .map_or_else(|| Cow::Owned(data.iter().copied().collect()), Cow::Borrowed)
}
