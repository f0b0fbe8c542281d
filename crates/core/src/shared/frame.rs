/// A single captured frame: contiguous RGB bytes in row-major order.
///
/// `index` is the frame's position within the capture session that
/// produced it. It restarts at 0 whenever a source is reopened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    /// Builds a 3-channel frame from tightly packed RGB24 pixels.
    pub fn rgb(data: Vec<u8>, width: u32, height: u32, index: usize) -> Self {
        Self::new(data, width, height, 3, index)
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

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of bytes in one row of pixels.
    pub fn row_len(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Returns row `y`, or `None` past the bottom edge.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let len = self.row_len();
        let start = y as usize * len;
        Some(&self.data[start..start + len])
    }
}
