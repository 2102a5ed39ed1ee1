//! Texture Resources
//!
//! # Design
//!
//! GPU images are keyed by `(source texture, translation, flags)`. A logical
//! texture can therefore own several images, one per palette translation or
//! flag variant it is drawn with. [`TextureCache`] creates them lazily on
//! the first [`TextureCache::get_image`] and recreates one when its source
//! reports a new version.
//!
//! Pixel data is pulled from the asset collaborator through
//! [`TextureSource::pixels`], which is only invoked on upload. When the
//! source has no pixels or the backend rejects the image, the request is
//! answered with a shared placeholder and the failure is cached until the
//! texture is invalidated, so a broken asset costs one warning, not one per
//! frame.
//!
//! [`CpuTexture`] is the direct upload path for content produced on the CPU
//! (software-rendered frames, screen wipes). It bypasses the keyed cache.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::renderer::core::{
    mip_extent, mip_levels, ImageDesc, ImageFormat, ImageId, ImageUsage, RenderDevice,
};

/// Logical identity of a texture asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Palette translation a texture is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Translation {
    #[default]
    None,
    /// Alpha-only texture tinted by the vertex color.
    Shaded,
    /// Raw palette indices for the palette-lookup shader.
    DirectPalette,
    /// Index into the translation table registry.
    Remap(u32),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        /// Upload the base level only.
        const NO_MIPMAP = 1 << 0;
        /// Upload single-channel palette indices.
        const INDEXED   = 1 << 1;
    }
}

/// Asset-side view of one texture.
pub trait TextureSource {
    fn id(&self) -> TextureId;

    fn name(&self) -> &str;

    fn size(&self) -> (u32, u32);

    /// Bumped whenever the pixels change.
    fn version(&self) -> u64 {
        0
    }

    /// Pixel data for one variant: tightly packed RGBA8, or one byte per
    /// texel when `flags` contains [`TextureFlags::INDEXED`].
    fn pixels(&self, translation: Translation, flags: TextureFlags) -> Option<Vec<u8>>;
}

/// Lookup of texture sources by identity.
pub trait TextureProvider {
    fn texture(&self, id: TextureId) -> Option<&dyn TextureSource>;
}

// ============================================================================
// In-Memory Sources
// ============================================================================

/// A texture whose pixels live in memory.
#[derive(Debug, Clone)]
pub struct MemoryTexture {
    pub id: TextureId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub indices: Option<Vec<u8>>,
    pub version: u64,
}

impl MemoryTexture {
    #[must_use]
    pub fn solid(id: TextureId, name: impl Into<String>, width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            id,
            name: name.into(),
            width,
            height,
            rgba: rgba.repeat((width * height) as usize),
            indices: None,
            version: 0,
        }
    }
}

impl TextureSource for MemoryTexture {
    fn id(&self) -> TextureId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn pixels(&self, translation: Translation, flags: TextureFlags) -> Option<Vec<u8>> {
        if flags.contains(TextureFlags::INDEXED) || translation == Translation::DirectPalette {
            return self.indices.clone();
        }
        if translation == Translation::Shaded {
            // Luminance moves into alpha.
            return Some(
                self.rgba
                    .chunks_exact(4)
                    .flat_map(|p| {
                        let l = (u32::from(p[0]) * 77 + u32::from(p[1]) * 150 + u32::from(p[2]) * 29) >> 8;
                        [255, 255, 255, l as u8]
                    })
                    .collect(),
            );
        }
        Some(self.rgba.clone())
    }
}

/// A simple id-keyed texture registry.
#[derive(Default)]
pub struct TextureLibrary {
    textures: FxHashMap<TextureId, Box<dyn TextureSource>>,
}

impl TextureLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, texture: impl TextureSource + 'static) {
        self.textures.insert(texture.id(), Box::new(texture));
    }

    pub fn remove(&mut self, id: TextureId) -> Option<Box<dyn TextureSource>> {
        self.textures.remove(&id)
    }
}

impl TextureProvider for TextureLibrary {
    fn texture(&self, id: TextureId) -> Option<&dyn TextureSource> {
        self.textures.get(&id).map(Box::as_ref)
    }
}

// ============================================================================
// GPU Images
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureImage {
    pub image: ImageId,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: ImageFormat,
    /// This image stands in for a texture that failed to load.
    pub placeholder: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub texture: TextureId,
    pub translation: Translation,
    pub flags: TextureFlags,
}

struct CachedImage {
    image: TextureImage,
    source_version: u64,
    last_used_frame: u64,
}

pub struct TextureCache {
    entries: FxHashMap<TextureKey, CachedImage>,
    depth_stencil: FxHashMap<TextureId, TextureImage>,
    wipes: Vec<TextureImage>,
    placeholder: TextureImage,
    frame_index: u64,
}

impl TextureCache {
    /// Creates the cache and its 1×1 placeholder image.
    pub fn new<D: RenderDevice>(device: &mut D) -> Result<Self> {
        let desc = ImageDesc {
            label: "Missing Texture Placeholder".into(),
            width: 1,
            height: 1,
            mip_levels: 1,
            format: ImageFormat::Rgba8,
            usage: ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        };
        let image = device.create_image(&desc)?;
        device.upload_image(image, 0, &[255, 0, 255, 255])?;

        Ok(Self {
            entries: FxHashMap::default(),
            depth_stencil: FxHashMap::default(),
            wipes: Vec::new(),
            placeholder: TextureImage {
                image,
                width: 1,
                height: 1,
                mip_levels: 1,
                format: ImageFormat::Rgba8,
                placeholder: true,
            },
            frame_index: 0,
        })
    }

    #[inline]
    #[must_use]
    pub fn placeholder(&self) -> TextureImage {
        self.placeholder
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &TextureKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn next_frame(&mut self) {
        self.frame_index += 1;
    }

    /// Marks a cached variant as used this frame. Returns `false` when the
    /// variant was evicted, reset or built from an older source version.
    pub fn touch(&mut self, key: &TextureKey, version: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.source_version == version => {
                entry.last_used_frame = self.frame_index;
                true
            }
            _ => false,
        }
    }

    /// Returns the GPU image of one texture variant, creating or refreshing
    /// it as needed. Never fails: failures resolve to the placeholder.
    pub fn get_image<D: RenderDevice>(
        &mut self,
        device: &mut D,
        source: &dyn TextureSource,
        translation: Translation,
        flags: TextureFlags,
    ) -> TextureImage {
        let key = TextureKey {
            texture: source.id(),
            translation,
            flags,
        };
        let version = source.version();

        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.source_version == version {
                entry.last_used_frame = self.frame_index;
                return entry.image;
            }
        }
        if let Some(stale) = self.entries.remove(&key) {
            self.release(device, stale.image);
        }

        let image = match Self::create_image(device, source, translation, flags) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Texture '{}' unavailable, using placeholder: {e}", source.name());
                self.placeholder
            }
        };
        self.entries.insert(
            key,
            CachedImage {
                image,
                source_version: version,
                last_used_frame: self.frame_index,
            },
        );
        image
    }

    fn create_image<D: RenderDevice>(
        device: &mut D,
        source: &dyn TextureSource,
        translation: Translation,
        flags: TextureFlags,
    ) -> Result<TextureImage> {
        let (width, height) = source.size();
        let indexed = flags.contains(TextureFlags::INDEXED) || translation == Translation::DirectPalette;
        let format = if indexed { ImageFormat::R8 } else { ImageFormat::Rgba8 };
        // Palette indices cannot be filtered into meaningful mips.
        let levels = if indexed || flags.contains(TextureFlags::NO_MIPMAP) {
            1
        } else {
            mip_levels(width, height)
        };

        let pixels = source.pixels(translation, flags).ok_or_else(|| {
            crate::errors::StrataError::UploadFailed {
                label: source.name().to_owned(),
                reason: "source has no pixel data".into(),
            }
        })?;

        let image = device.create_image(&ImageDesc {
            label: source.name().to_owned(),
            width,
            height,
            mip_levels: levels,
            format,
            usage: ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        })?;

        let upload = |device: &mut D| -> Result<()> {
            device.upload_image(image, 0, &pixels)?;
            if levels > 1 {
                for (level, data) in generate_mips(&pixels, width, height, levels).iter().enumerate() {
                    device.upload_image(image, level as u32 + 1, data)?;
                }
            }
            Ok(())
        };
        if let Err(e) = upload(device) {
            device.destroy_image(image);
            return Err(e);
        }

        Ok(TextureImage {
            image,
            width,
            height,
            mip_levels: levels,
            format,
            placeholder: false,
        })
    }

    /// Lazily created depth-stencil companion of a render-target texture.
    pub fn get_depth_stencil<D: RenderDevice>(
        &mut self,
        device: &mut D,
        texture: TextureId,
        width: u32,
        height: u32,
    ) -> Result<TextureImage> {
        if let Some(existing) = self.depth_stencil.get(&texture) {
            if existing.width == width && existing.height == height {
                return Ok(*existing);
            }
        }
        if let Some(old) = self.depth_stencil.remove(&texture) {
            device.destroy_image(old.image);
        }

        let format = ImageFormat::Depth24Stencil8;
        let image = device.create_image(&ImageDesc {
            label: format!("Depth Stencil {}", texture.0),
            width,
            height,
            mip_levels: 1,
            format,
            usage: ImageUsage::DEPTH_STENCIL,
        })?;
        let ds = TextureImage {
            image,
            width,
            height,
            mip_levels: 1,
            format,
            placeholder: false,
        };
        self.depth_stencil.insert(texture, ds);
        Ok(ds)
    }

    /// Render-target texture holding a copy of the screen for a wipe
    /// transition. Lives until [`TextureCache::release_wipe_textures`].
    pub fn create_wipe_texture<D: RenderDevice>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        screen: Option<&[u8]>,
    ) -> Result<TextureImage> {
        let format = ImageFormat::Rgba8;
        let image = device.create_image(&ImageDesc {
            label: "Wipe Screen".into(),
            width,
            height,
            mip_levels: 1,
            format,
            usage: ImageUsage::SAMPLED | ImageUsage::COPY_DST | ImageUsage::RENDER_TARGET,
        })?;
        if let Some(pixels) = screen {
            if let Err(e) = device.upload_image(image, 0, pixels) {
                device.destroy_image(image);
                return Err(e);
            }
        }
        let wipe = TextureImage {
            image,
            width,
            height,
            mip_levels: 1,
            format,
            placeholder: false,
        };
        self.wipes.push(wipe);
        Ok(wipe)
    }

    pub fn release_wipe_textures<D: RenderDevice>(&mut self, device: &mut D) {
        for wipe in self.wipes.drain(..) {
            device.destroy_image(wipe.image);
        }
    }

    fn release<D: RenderDevice>(&self, device: &mut D, image: TextureImage) {
        if !image.placeholder {
            device.destroy_image(image.image);
        }
    }

    /// Releases every GPU variant of one texture. It is recreated on the
    /// next request.
    pub fn reset_texture<D: RenderDevice>(&mut self, device: &mut D, texture: TextureId) {
        let keys: Vec<TextureKey> = self
            .entries
            .keys()
            .filter(|k| k.texture == texture)
            .copied()
            .collect();
        for key in keys {
            if let Some(entry) = self.entries.remove(&key) {
                self.release(device, entry.image);
            }
        }
        if let Some(ds) = self.depth_stencil.remove(&texture) {
            device.destroy_image(ds.image);
        }
    }

    /// Releases all GPU images except the placeholder.
    pub fn reset_all<D: RenderDevice>(&mut self, device: &mut D) {
        let entries: Vec<CachedImage> = self.entries.drain().map(|(_, v)| v).collect();
        for entry in entries {
            self.release(device, entry.image);
        }
        for (_, ds) in self.depth_stencil.drain() {
            device.destroy_image(ds.image);
        }
    }

    /// Drops variants not requested in the last `max_age` frames.
    pub fn evict_unused<D: RenderDevice>(&mut self, device: &mut D, max_age: u64) -> usize {
        if self.frame_index < max_age {
            return 0;
        }
        let cutoff = self.frame_index - max_age;
        let expired: Vec<TextureKey> = self
            .entries
            .iter()
            .filter(|(_, v)| v.last_used_frame < cutoff)
            .map(|(k, _)| *k)
            .collect();
        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                self.release(device, entry.image);
            }
        }
        expired.len()
    }

    pub fn destroy<D: RenderDevice>(&mut self, device: &mut D) {
        self.reset_all(device);
        self.release_wipe_textures(device);
        device.destroy_image(self.placeholder.image);
    }
}

/// 2×2 box-filtered RGBA8 mip chain below the base level.
#[must_use]
pub fn generate_mips(base: &[u8], width: u32, height: u32, levels: u32) -> Vec<Vec<u8>> {
    let mut chain: Vec<Vec<u8>> = Vec::with_capacity(levels.saturating_sub(1) as usize);
    let (mut pw, mut ph) = (width, height);

    for level in 1..levels {
        let (w, h) = mip_extent(width, height, level);
        let prev = chain.last().map_or(base, Vec::as_slice);
        let mut out = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let (x0, y0) = ((x * 2).min(pw - 1), (y * 2).min(ph - 1));
                let (x1, y1) = ((x * 2 + 1).min(pw - 1), (y * 2 + 1).min(ph - 1));
                for c in 0..4 {
                    let at = |sx: u32, sy: u32| u32::from(prev[((sy * pw + sx) * 4 + c) as usize]);
                    let sum = at(x0, y0) + at(x1, y0) + at(x0, y1) + at(x1, y1);
                    out.push(((sum + 2) / 4) as u8);
                }
            }
        }
        chain.push(out);
        (pw, ph) = (w, h);
    }
    chain
}

// ============================================================================
// CPU Upload Path
// ============================================================================

/// A texture whose contents are written by the CPU every time it changes.
pub struct CpuTexture {
    label: String,
    width: u32,
    height: u32,
    format: ImageFormat,
    buffer: Vec<u8>,
    image: Option<TextureImage>,
}

impl CpuTexture {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            width: 0,
            height: 0,
            format: ImageFormat::Rgba8,
            buffer: Vec::new(),
            image: None,
        }
    }

    /// Sizes the staging buffer. A change of size or format drops the GPU
    /// image on the next [`CpuTexture::create_texture`].
    pub fn allocate_buffer(&mut self, width: u32, height: u32, format: ImageFormat) {
        self.width = width;
        self.height = height;
        self.format = format;
        self.buffer
            .resize((width * height * format.bytes_per_pixel()) as usize, 0);
    }

    /// Writable staging memory, `width * bytes_per_pixel` bytes per row.
    pub fn map_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    #[inline]
    #[must_use]
    pub fn pitch(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }

    /// Uploads the staging buffer, (re)creating the image if needed.
    pub fn create_texture<D: RenderDevice>(&mut self, device: &mut D) -> Result<TextureImage> {
        let reusable = self
            .image
            .filter(|i| i.width == self.width && i.height == self.height && i.format == self.format);
        let image = if let Some(image) = reusable {
            image
        } else {
            self.reset(device);
            let id = device.create_image(&ImageDesc {
                label: self.label.clone(),
                width: self.width,
                height: self.height,
                mip_levels: 1,
                format: self.format,
                usage: ImageUsage::SAMPLED | ImageUsage::COPY_DST,
            })?;
            let image = TextureImage {
                image: id,
                width: self.width,
                height: self.height,
                mip_levels: 1,
                format: self.format,
                placeholder: false,
            };
            self.image = Some(image);
            image
        };
        device.upload_image(image.image, 0, &self.buffer)?;
        Ok(image)
    }

    #[inline]
    #[must_use]
    pub fn image(&self) -> Option<TextureImage> {
        self.image
    }

    /// Releases the GPU image; the staging buffer is kept.
    pub fn reset<D: RenderDevice>(&mut self, device: &mut D) {
        if let Some(image) = self.image.take() {
            device.destroy_image(image.image);
        }
    }
}
