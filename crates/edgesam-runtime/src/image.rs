use std::fmt;

use crate::ImageError;

/// Order of the colour channels in an interleaved pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Interleaved 8-bit image, rows top to bottom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    size: Size,
    channels: usize,
    order: ChannelOrder,
    data: Vec<u8>,
}

impl Image {
    pub fn new(
        size: Size,
        channels: usize,
        order: ChannelOrder,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        let expected = size.area() * channels;
        if data.len() != expected {
            return Err(ImageError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            size,
            channels,
            order,
            data,
        })
    }

    pub fn from_rgb(size: Size, data: Vec<u8>) -> Result<Self, ImageError> {
        Self::new(size, 3, ChannelOrder::Rgb, data)
    }

    pub fn from_bgr(size: Size, data: Vec<u8>) -> Result<Self, ImageError> {
        Self::new(size, 3, ChannelOrder::Bgr, data)
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = (y as usize * self.size.width as usize + x as usize) * self.channels;
        &self.data[start..start + self.channels]
    }
}

/// Single-channel mask, 255 for foreground and 0 for background.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryMask {
    size: Size,
    data: Vec<u8>,
}

impl BinaryMask {
    pub const FOREGROUND: u8 = 255;
    pub const BACKGROUND: u8 = 0;

    pub(crate) fn from_raw(size: Size, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), size.area());
        Self { size, data }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.size.width as usize + x as usize]
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.get(x, y) == Self::FOREGROUND
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|v| **v == Self::FOREGROUND).count()
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }
}
