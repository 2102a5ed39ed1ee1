//! Materials and Their Bindings
//!
//! A [`Material`] is a stack of texture layers (base, brightmap, detail...).
//! To draw it, the backend needs a bindless range holding one
//! image/sampler pair per layer, and that range depends on the sampler slot
//! ([`ClampMode`]) and palette [`Translation`] the primitive uses.
//!
//! Each material keeps a short list of [`DescriptorEntry`] values, one per
//! `(clamp mode, translation)` combination seen so far. Lookup is a linear
//! scan, since a material rarely exceeds a handful of combinations. A miss
//! resolves every layer through the texture cache and sampler manager,
//! registers a new range, and appends the entry.
//!
//! A hit still checks that the texture cache holds every layer image, which
//! also keeps those images from aging out. An entry whose image was evicted
//! or reset is retired and rebuilt.
//!
//! Retired ranges are never released while a frame is in flight.
//! [`MaterialCache`] defers them, along with invalidations requested
//! mid-frame, until
//! [`MaterialCache::end_frame`], so no binding referenced by recorded
//! commands disappears before the frame is done.

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::renderer::core::{BindlessIndex, RenderDevice};
use crate::renderer::samplers::{ClampMode, MaterialLayerSampling, SamplerManager};
use crate::renderer::texture::{
    TextureCache, TextureFlags, TextureId, TextureKey, TextureProvider, Translation,
};

new_key_type! {
    pub struct MaterialId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialLayer {
    pub texture: TextureId,
    pub flags: TextureFlags,
    pub sampling: MaterialLayerSampling,
}

impl MaterialLayer {
    #[must_use]
    pub fn new(texture: TextureId) -> Self {
        Self {
            texture,
            flags: TextureFlags::empty(),
            sampling: MaterialLayerSampling::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorEntry {
    pub clamp_mode: ClampMode,
    pub remap: Translation,
    pub bindless_index: BindlessIndex,
    pub count: u32,
}

/// Everything a binding lookup may need to create resources.
pub struct BindingContext<'a, D: RenderDevice> {
    pub device: &'a mut D,
    pub textures: &'a mut TextureCache,
    pub samplers: &'a SamplerManager,
    pub provider: &'a dyn TextureProvider,
}

#[derive(Debug, Clone)]
pub struct Material {
    name: String,
    layers: SmallVec<[MaterialLayer; 4]>,
    entries: SmallVec<[DescriptorEntry; 4]>,
    /// Entries whose images left the texture cache, awaiting release.
    stale: SmallVec<[DescriptorEntry; 2]>,
}

impl Material {
    #[must_use]
    pub fn new(name: impl Into<String>, base: MaterialLayer) -> Self {
        let mut layers = SmallVec::new();
        layers.push(base);
        Self {
            name: name.into(),
            layers,
            entries: SmallVec::new(),
            stale: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn with_layer(mut self, layer: MaterialLayer) -> Self {
        self.layers.push(layer);
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn layers(&self) -> &[MaterialLayer] {
        &self.layers
    }

    #[inline]
    #[must_use]
    pub fn base_texture(&self) -> TextureId {
        self.layers[0].texture
    }

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[DescriptorEntry] {
        &self.entries
    }

    /// Cached binding for `(clamp_mode, remap)`, registered on first use.
    pub fn get_descriptor_entry<D: RenderDevice>(
        &mut self,
        clamp_mode: ClampMode,
        remap: Translation,
        ctx: &mut BindingContext<'_, D>,
    ) -> BindlessIndex {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.clamp_mode == clamp_mode && e.remap == remap)
        {
            if self.layers_resident(remap, ctx) {
                return self.entries[pos].bindless_index;
            }
            log::debug!("Material '{}' lost a layer image, rebinding", self.name);
            let entry = self.entries.remove(pos);
            self.stale.push(entry);
        }

        let pairs: SmallVec<[_; 4]> = self
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                // Only the base layer is translated.
                let translation = if i == 0 { remap } else { Translation::None };
                let image = match ctx.provider.texture(layer.texture) {
                    Some(source) => ctx.textures.get_image(ctx.device, source, translation, layer.flags),
                    None => {
                        log::warn!(
                            "Material '{}' references unknown texture {:?}",
                            self.name,
                            layer.texture
                        );
                        ctx.textures.placeholder()
                    }
                };
                (image.image, ctx.samplers.get_for_layer(layer.sampling, clamp_mode))
            })
            .collect();

        let bindless_index = ctx.device.register_bindings(&pairs);
        self.entries.push(DescriptorEntry {
            clamp_mode,
            remap,
            bindless_index,
            count: pairs.len() as u32,
        });
        bindless_index
    }

    /// Refreshes the cached images behind one entry. `false` when any of
    /// them is gone, so the entry's range points at a destroyed image.
    fn layers_resident<D: RenderDevice>(&self, remap: Translation, ctx: &mut BindingContext<'_, D>) -> bool {
        self.layers.iter().enumerate().all(|(i, layer)| {
            // Unknown textures are bound to the placeholder, which never goes away.
            let Some(source) = ctx.provider.texture(layer.texture) else {
                return true;
            };
            let key = TextureKey {
                texture: layer.texture,
                translation: if i == 0 { remap } else { Translation::None },
                flags: layer.flags,
            };
            ctx.textures.touch(&key, source.version())
        })
    }

    /// Entries replaced since the last call. Their ranges are still
    /// registered and must be released by the caller.
    pub fn take_stale(&mut self) -> impl Iterator<Item = DescriptorEntry> + '_ {
        self.stale.drain(..)
    }

    /// Releases every binding of this material. The material itself stays
    /// usable and rebuilds its bindings lazily.
    pub fn delete_descriptors<D: RenderDevice>(&mut self, device: &mut D) {
        for entry in self.entries.drain(..).chain(self.stale.drain(..)) {
            device.release_bindings(entry.bindless_index, entry.count);
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Default)]
pub struct MaterialCache {
    materials: SlotMap<MaterialId, Material>,
    pending: Vec<MaterialId>,
    pending_all: bool,
    retired: Vec<DescriptorEntry>,
    in_frame: bool,
}

impl MaterialCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: Material) -> MaterialId {
        self.materials.insert(material)
    }

    #[must_use]
    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Removes a material. Its bindings are released now, or at the end of
    /// the current frame.
    pub fn remove<D: RenderDevice>(&mut self, id: MaterialId, device: &mut D) -> Option<Material> {
        let mut material = self.materials.remove(id)?;
        if self.in_frame {
            self.retired.extend(material.entries.drain(..));
            self.retired.extend(material.stale.drain(..));
        } else {
            material.delete_descriptors(device);
        }
        Some(material)
    }

    /// Binding of `id` for one clamp mode and translation.
    pub fn descriptor<D: RenderDevice>(
        &mut self,
        id: MaterialId,
        clamp_mode: ClampMode,
        remap: Translation,
        ctx: &mut BindingContext<'_, D>,
    ) -> Option<BindlessIndex> {
        let material = self.materials.get_mut(id)?;
        let index = material.get_descriptor_entry(clamp_mode, remap, ctx);
        if self.in_frame {
            self.retired.extend(material.take_stale());
        } else {
            for entry in material.take_stale() {
                ctx.device.release_bindings(entry.bindless_index, entry.count);
            }
        }
        Some(index)
    }

    /// Replaces the layer stack. The old bindings are invalidated.
    pub fn set_layers<D: RenderDevice>(
        &mut self,
        id: MaterialId,
        layers: impl IntoIterator<Item = MaterialLayer>,
        device: &mut D,
    ) {
        let Some(material) = self.materials.get_mut(id) else {
            return;
        };
        let layers: SmallVec<[MaterialLayer; 4]> = layers.into_iter().collect();
        if layers.is_empty() || layers == material.layers {
            return;
        }
        material.layers = layers;
        self.invalidate(id, device);
    }

    pub fn invalidate<D: RenderDevice>(&mut self, id: MaterialId, device: &mut D) {
        if self.in_frame {
            if !self.pending.contains(&id) {
                self.pending.push(id);
            }
        } else if let Some(material) = self.materials.get_mut(id) {
            material.delete_descriptors(device);
        }
    }

    /// Drops the bindings of every material, e.g. after samplers were rebuilt.
    pub fn invalidate_all<D: RenderDevice>(&mut self, device: &mut D) {
        if self.in_frame {
            self.pending_all = true;
        } else {
            self.delete_all_descriptors(device);
        }
    }

    fn delete_all_descriptors<D: RenderDevice>(&mut self, device: &mut D) {
        for material in self.materials.values_mut() {
            material.delete_descriptors(device);
        }
    }

    pub fn begin_frame(&mut self) {
        self.in_frame = true;
    }

    /// Applies invalidations deferred during the frame.
    pub fn end_frame<D: RenderDevice>(&mut self, device: &mut D) {
        self.in_frame = false;
        for entry in self.retired.drain(..) {
            device.release_bindings(entry.bindless_index, entry.count);
        }
        if std::mem::take(&mut self.pending_all) {
            self.pending.clear();
            self.delete_all_descriptors(device);
            return;
        }
        for id in std::mem::take(&mut self.pending) {
            if let Some(material) = self.materials.get_mut(id) {
                material.delete_descriptors(device);
            }
        }
    }

    /// Releases every binding immediately. Only valid outside a frame.
    pub fn destroy<D: RenderDevice>(&mut self, device: &mut D) {
        self.end_frame(device);
        self.delete_all_descriptors(device);
    }
}
