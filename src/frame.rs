//! Decoded video frames.
//!
//! A `Frame` is a packed BGR24 image: `height` rows of `width * 3` bytes with
//! no padding between rows. That is the layout OpenCV-style consumers expect
//! (`height × width × 3`, row-major).

/// Bytes per pixel in a decoded frame.
pub const CHANNELS: usize = 3;

#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wraps packed BGR24 bytes. Returns `None` if `data` does not hold
    /// exactly `width * height * 3` bytes.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(CHANNELS)?;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw BGR24 bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// `[b, g, r]` at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let px = self.data.get(offset..offset + CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }

    /// One row of pixels.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.width as usize * CHANNELS;
        let start = y as usize * stride;
        self.data.get(start..start + stride)
    }
}

// Pixel data is never logged.
impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert!(Frame::from_bgr(2, 2, vec![0; 11]).is_none());
        assert!(Frame::from_bgr(2, 2, vec![0; 12]).is_some());
    }

    #[test]
    fn pixel_lookup_is_row_major() {
        let mut data = vec![0u8; 2 * 3 * CHANNELS];
        // (x=1, y=2) -> offset (2*2+1)*3 = 15
        data[15..18].copy_from_slice(&[10, 20, 30]);
        let frame = Frame::from_bgr(2, 3, data).expect("valid frame");
        assert_eq!(frame.pixel(1, 2), Some([10, 20, 30]));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.row(2).map(|r| r.len()), Some(6));
    }
}
