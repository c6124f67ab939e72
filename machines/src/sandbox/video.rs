//! 32x32 palette-indexed display rendered to RGB24.

use cyclehost_core::core::VideoSource;

pub const WIDTH: u32 = 32;
pub const HEIGHT: u32 = 32;
pub const VRAM_SIZE: u32 = WIDTH * HEIGHT;

/// 16-entry RGB palette; the high nibble of a VRAM byte is ignored.
const PALETTE: [[u8; 3]; 16] = [
    [0x00, 0x00, 0x00],
    [0xFF, 0xFF, 0xFF],
    [0x88, 0x00, 0x00],
    [0xAA, 0xFF, 0xEE],
    [0xCC, 0x44, 0xCC],
    [0x00, 0xCC, 0x55],
    [0x00, 0x00, 0xAA],
    [0xEE, 0xEE, 0x77],
    [0xDD, 0x88, 0x55],
    [0x66, 0x44, 0x00],
    [0xFF, 0x77, 0x77],
    [0x33, 0x33, 0x33],
    [0x77, 0x77, 0x77],
    [0xAA, 0xFF, 0x66],
    [0x00, 0x88, 0xFF],
    [0xBB, 0xBB, 0xBB],
];

pub struct FrameBuffer {
    pixels: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            pixels: vec![0; (WIDTH * HEIGHT * 3) as usize],
        }
    }

    /// Convert one frame of VRAM (one byte per pixel, row-major).
    pub fn render(&mut self, vram: &[u8]) {
        for (rgb, &index) in self.pixels.chunks_exact_mut(3).zip(vram) {
            rgb.copy_from_slice(&PALETTE[(index & 0x0F) as usize]);
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Overwrite the frame with a previously captured image.
    pub fn restore(&mut self, frame: &[u8]) {
        let len = frame.len().min(self.pixels.len());
        self.pixels[..len].copy_from_slice(&frame[..len]);
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for FrameBuffer {
    fn width(&self) -> u32 {
        WIDTH
    }

    fn height(&self) -> u32 {
        HEIGHT
    }

    fn bytes_per_pixel(&self) -> u32 {
        3
    }

    fn frame(&self) -> &[u8] {
        &self.pixels
    }
}
