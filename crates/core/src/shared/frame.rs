use ndarray::ArrayView3;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame data is {actual} bytes, expected {expected} for {width}x{height}x{channels}")]
    LengthMismatch {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
        channels: u8,
    },
}

/// A single camera frame: contiguous RGB bytes in row-major order.
///
/// Frames are produced by the camera stream and read by the presence gate and
/// the capture controller; neither ever mutates one.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    sequence: u64,
}

impl Frame {
    /// Fails unless `data` holds exactly `width * height * channels` bytes.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        sequence: u64,
    ) -> Result<Self, FrameError> {
        if data.len() != (width as usize) * (height as usize) * (channels as usize) {
            return Err(mismatch(data.len(), width, height, channels));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
            sequence,
        })
    }

    /// Uniform frame filled with a single RGB value. Handy for doubles.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            data,
            width,
            height,
            channels: 3,
            sequence,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Position of this frame in its stream, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn as_ndarray(&self) -> Result<ArrayView3<'_, u8>, FrameError> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .map_err(|_| mismatch(self.data.len(), self.width, self.height, self.channels))
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}

fn mismatch(actual: usize, width: u32, height: u32, channels: u8) -> FrameError {
    FrameError::LengthMismatch {
        expected: (width as usize) * (height as usize) * (channels as usize),
        actual,
        width,
        height,
        channels,
    }
}
