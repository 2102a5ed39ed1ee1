//! Software scene upload
//!
//! Frames rendered on the CPU reach the screen through the direct upload
//! path of [`CpuTexture`]. Two frame textures alternate so the image being
//! written is never the one the GPU may still be sampling. In paletted mode
//! the canvas holds 8-bit indices and a 256×1 palette texture is uploaded
//! alongside it whenever the palette changes.

use crate::errors::Result;
use crate::renderer::core::{ImageFormat, RenderDevice};
use crate::renderer::texture::{CpuTexture, TextureImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CanvasFormat {
    #[default]
    Truecolor,
    /// One palette index per pixel.
    Paletted,
}

impl CanvasFormat {
    const fn image_format(self) -> ImageFormat {
        match self {
            Self::Truecolor => ImageFormat::Rgba8,
            Self::Paletted => ImageFormat::R8,
        }
    }
}

/// Images to draw for one software frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareFrame {
    pub canvas: TextureImage,
    pub palette: Option<TextureImage>,
}

pub struct SoftwareSceneDrawer {
    frames: [CpuTexture; 2],
    current: usize,
    palette: CpuTexture,
    palette_colors: [[u8; 4]; 256],
    palette_dirty: bool,
    format: CanvasFormat,
}

impl SoftwareSceneDrawer {
    #[must_use]
    pub fn new(format: CanvasFormat) -> Self {
        let mut palette_colors = [[0u8; 4]; 256];
        for (i, color) in palette_colors.iter_mut().enumerate() {
            let v = i as u8;
            *color = [v, v, v, 255];
        }
        Self {
            frames: [CpuTexture::new("Software Frame 0"), CpuTexture::new("Software Frame 1")],
            current: 0,
            palette: CpuTexture::new("Software Palette"),
            palette_colors,
            palette_dirty: true,
            format,
        }
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> CanvasFormat {
        self.format
    }

    /// Replaces the palette used by paletted frames.
    pub fn set_palette(&mut self, colors: [[u8; 4]; 256]) {
        if colors != self.palette_colors {
            self.palette_colors = colors;
            self.palette_dirty = true;
        }
    }

    /// Renders one frame. `render` receives the canvas and its pitch in bytes.
    pub fn draw_scene<D: RenderDevice>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        render: impl FnOnce(&mut [u8], u32),
    ) -> Result<SoftwareFrame> {
        self.current ^= 1;
        let frame = &mut self.frames[self.current];
        frame.allocate_buffer(width, height, self.format.image_format());
        let pitch = frame.pitch();
        render(frame.map_buffer(), pitch);
        let canvas = frame.create_texture(device)?;

        let palette = match self.format {
            CanvasFormat::Truecolor => None,
            CanvasFormat::Paletted => Some(self.upload_palette(device)?),
        };
        Ok(SoftwareFrame { canvas, palette })
    }

    fn upload_palette<D: RenderDevice>(&mut self, device: &mut D) -> Result<TextureImage> {
        if !self.palette_dirty
            && let Some(image) = self.palette.image()
        {
            return Ok(image);
        }
        self.palette.allocate_buffer(256, 1, ImageFormat::Rgba8);
        self.palette
            .map_buffer()
            .copy_from_slice(self.palette_colors.as_flattened());
        let image = self.palette.create_texture(device)?;
        self.palette_dirty = false;
        Ok(image)
    }

    /// Image written by the latest `draw_scene`.
    #[must_use]
    pub fn current_frame(&self) -> Option<TextureImage> {
        self.frames[self.current].image()
    }

    pub fn destroy<D: RenderDevice>(&mut self, device: &mut D) {
        for frame in &mut self.frames {
            frame.reset(device);
        }
        self.palette.reset(device);
        self.palette_dirty = true;
    }
}
