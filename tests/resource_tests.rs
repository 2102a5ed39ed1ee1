//! Resource Lifetime Tests
//!
//! Tests for:
//! - LightCollection capacity overflow and reset
//! - SamplerManager slot stability, post-process samplers and policy rebuilds
//! - Material binding reuse, invalidation and deferred release
//! - TextureCache placeholder fallback, eviction, resets and render targets
//! - FramebufferManager acquire/present pairing
//! - DrawInfo transition ordering
//! - RendererSettings JSON loading and live application

use glam::Vec3;

use strata::errors::StrataError;
use strata::renderer::core::{
    DeviceEvent, HeadlessDevice, HeadlessSwapChain, ImageFormat, ImageUsage, SurfaceConfig,
};
use strata::renderer::framebuffer::{FramebufferManager, PresentState};
use strata::renderer::lights::{
    DynamicLight, LightBuffer, LightCategory, LightCollection, MAX_LIGHT_DATA,
};
use strata::renderer::material::{BindingContext, Material, MaterialCache, MaterialLayer};
use strata::renderer::samplers::{ClampMode, PpFilter, PpWrap, SamplerManager, SamplerPolicy};
use strata::renderer::scene::{Bounds, DrawInfo, DrawInfoState, ViewConfig, Viewpoint};
use strata::renderer::settings::{RendererSettings, TextureFilter};
use strata::renderer::texture::{
    MemoryTexture, TextureCache, TextureFlags, TextureId, TextureLibrary, TextureProvider, Translation,
};
use strata::Renderer;

fn brick_library() -> TextureLibrary {
    let mut lib = TextureLibrary::new();
    lib.insert(MemoryTexture::solid(TextureId(1), "BRICK", 8, 8, [200, 10, 10, 255]));
    lib
}

fn policy() -> SamplerPolicy {
    SamplerPolicy {
        filter: TextureFilter::Trilinear,
        anisotropy: 8,
    }
}

// ============================================================================
// Light Collection
// ============================================================================

#[test]
fn overflow_keeps_the_first_samples() {
    let lights: Vec<DynamicLight> = (0..5)
        .map(|i| DynamicLight::point(Vec3::new(i as f32, 0.0, 0.0), 64.0, Vec3::ONE))
        .collect();
    let bounds = Bounds::new(Vec3::ZERO, 16.0);

    let mut collection = LightCollection::with_capacity(3);
    collection.begin();
    let added = collection.gather(&lights, &bounds);
    collection.finish();

    assert_eq!(added, 3);
    assert_eq!(collection.len(), 3);
    assert_eq!(collection.dropped(), 2);
    let kept = collection.get(LightCategory::Normal);
    for (sample, light) in kept.iter().zip(&lights) {
        assert_eq!(*sample, light.sample());
    }
}

#[test]
fn full_capacity_preserves_samples_in_insertion_order() {
    let samples: Vec<_> = (0..MAX_LIGHT_DATA + 16)
        .map(|i| DynamicLight::point(Vec3::new(i as f32, 0.0, 0.0), 8.0, Vec3::ONE).sample())
        .collect();

    let mut collection = LightCollection::new();
    collection.begin();
    let accepted = samples
        .iter()
        .filter(|s| collection.push(LightCategory::Normal, **s))
        .count();
    collection.finish();

    assert_eq!(accepted, MAX_LIGHT_DATA);
    assert_eq!(collection.len(), MAX_LIGHT_DATA);
    assert_eq!(collection.dropped(), 16);
    assert_eq!(collection.get(LightCategory::Normal), &samples[..MAX_LIGHT_DATA]);

    // Other categories are refused too once the total is reached.
    assert!(!collection.push(LightCategory::Additive, samples[0]));
    assert!(collection.get(LightCategory::Additive).is_empty());
}

#[test]
fn begin_empties_every_category() {
    let mut collection = LightCollection::with_capacity(8);
    collection.begin();
    let light = DynamicLight::point(Vec3::ZERO, 32.0, Vec3::ONE);
    collection.push(LightCategory::Subtractive, light.sample());
    collection.push(LightCategory::Additive, light.sample());
    collection.finish();
    assert!(collection.is_finished());

    collection.begin();
    assert!(collection.is_empty());
    assert!(!collection.is_finished());
    assert_eq!(collection.dropped(), 0);

    // An empty collection uploads nothing.
    let mut buffer = LightBuffer::new(8);
    assert!(buffer.upload(&collection).is_none());
}

// ============================================================================
// Samplers
// ============================================================================

#[test]
fn sampler_slots_are_stable_between_rebuilds() {
    let mut device = HeadlessDevice::new();
    let samplers = SamplerManager::new(&mut device, policy());
    let before: Vec<_> = ClampMode::ALL.iter().map(|&m| samplers.get(m)).collect();
    let again: Vec<_> = ClampMode::ALL.iter().map(|&m| samplers.get(m)).collect();
    assert_eq!(before, again);
    assert_eq!(samplers.get_index(ClampMode::CamTex.index()), Some(samplers.get(ClampMode::CamTex)));
    assert_eq!(samplers.get_index(99), None);
}

#[test]
fn policy_rebuild_replaces_material_samplers_only() {
    let mut device = HeadlessDevice::new();
    let mut samplers = SamplerManager::new(&mut device, policy());
    let normal = samplers.get(ClampMode::Normal);
    let shadow = samplers.shadowmap();

    samplers.reset_hw_samplers(
        &mut device,
        SamplerPolicy {
            filter: TextureFilter::Nearest,
            anisotropy: 1,
        },
    );
    assert_ne!(samplers.get(ClampMode::Normal), normal);
    assert_eq!(samplers.shadowmap(), shadow);
    assert_eq!(samplers.generation(), 1);
    assert!(device.sampler_desc(normal).is_none());
}

#[test]
fn postprocess_samplers_are_created_once_per_pair() {
    let mut device = HeadlessDevice::new();
    let mut samplers = SamplerManager::new(&mut device, policy());

    let linear = samplers.get_pp(&mut device, PpFilter::Linear, PpWrap::Clamp);
    assert_eq!(samplers.get_pp(&mut device, PpFilter::Linear, PpWrap::Clamp), linear);
    let nearest = samplers.get_pp(&mut device, PpFilter::Nearest, PpWrap::Repeat);
    assert_ne!(nearest, linear);

    // Policy rebuilds leave post-process samplers alone.
    samplers.reset_hw_samplers(
        &mut device,
        SamplerPolicy {
            filter: TextureFilter::Nearest,
            anisotropy: 1,
        },
    );
    assert_eq!(samplers.get_pp(&mut device, PpFilter::Linear, PpWrap::Clamp), linear);
    assert!(device.sampler_desc(linear).is_some());
}

// ============================================================================
// Materials
// ============================================================================

#[test]
fn material_bindings_are_reused_per_clamp_mode() {
    let mut device = HeadlessDevice::new();
    let mut textures = TextureCache::new(&mut device).unwrap();
    let samplers = SamplerManager::new(&mut device, policy());
    let mut lib = TextureLibrary::new();
    lib.insert(MemoryTexture::solid(TextureId(1), "BRICK", 8, 8, [200, 10, 10, 255]));

    let mut materials = MaterialCache::new();
    let id = materials.insert(Material::new("BRICK", MaterialLayer::new(TextureId(1))));
    let mut ctx = BindingContext {
        device: &mut device,
        textures: &mut textures,
        samplers: &samplers,
        provider: &lib,
    };

    let first = materials.descriptor(id, ClampMode::Normal, Translation::None, &mut ctx);
    let second = materials.descriptor(id, ClampMode::Normal, Translation::None, &mut ctx);
    assert_eq!(first, second);
    assert_eq!(materials.get(id).unwrap().entries().len(), 1);

    let clamped = materials.descriptor(id, ClampMode::ClampXY, Translation::None, &mut ctx);
    let remapped = materials.descriptor(id, ClampMode::Normal, Translation::Remap(3), &mut ctx);
    assert_ne!(clamped, first);
    assert_ne!(remapped, first);
    assert_ne!(remapped, clamped);

    // New combinations are appended behind the untouched first entry.
    let entries = materials.get(id).unwrap().entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(Some(entries[0].bindless_index), first);
    assert_eq!(entries[0].clamp_mode, ClampMode::Normal);
    assert_eq!(entries[0].remap, Translation::None);
    assert_eq!(entries[2].remap, Translation::Remap(3));
    assert_eq!(
        materials.descriptor(id, ClampMode::Normal, Translation::None, &mut ctx),
        first
    );
    assert_eq!(materials.get(id).unwrap().entries().len(), 3);
}

#[test]
fn invalidation_during_a_frame_is_deferred() {
    let mut device = HeadlessDevice::new();
    let mut textures = TextureCache::new(&mut device).unwrap();
    let samplers = SamplerManager::new(&mut device, policy());
    let mut lib = TextureLibrary::new();
    lib.insert(MemoryTexture::solid(TextureId(1), "BRICK", 8, 8, [200, 10, 10, 255]));

    let mut materials = MaterialCache::new();
    let id = materials.insert(Material::new("BRICK", MaterialLayer::new(TextureId(1))));
    {
        let mut ctx = BindingContext {
            device: &mut device,
            textures: &mut textures,
            samplers: &samplers,
            provider: &lib,
        };
        materials.descriptor(id, ClampMode::Normal, Translation::None, &mut ctx);
    }

    materials.begin_frame();
    materials.invalidate(id, &mut device);
    let released = |device: &HeadlessDevice| {
        device
            .events()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::BindingsReleased { .. }))
            .count()
    };
    assert_eq!(released(&device), 0);

    materials.end_frame(&mut device);
    assert_eq!(released(&device), 1);
    assert!(materials.get(id).unwrap().entries().is_empty());
}

// ============================================================================
// Texture Cache
// ============================================================================

#[test]
fn rejected_uploads_fall_back_to_the_placeholder() {
    let mut device = HeadlessDevice::new();
    let mut textures = TextureCache::new(&mut device).unwrap();
    let samplers = SamplerManager::new(&mut device, policy());
    let lib = brick_library();
    device.reject_images_labelled("BRICK");

    let source = lib.texture(TextureId(1)).unwrap();
    let image = textures.get_image(&mut device, source, Translation::None, TextureFlags::empty());
    assert!(image.placeholder);
    assert_eq!(image, textures.placeholder());

    // Materials built on the texture bind the placeholder instead.
    let mut materials = MaterialCache::new();
    let id = materials.insert(Material::new("BRICK", MaterialLayer::new(TextureId(1))));
    let mut ctx = BindingContext {
        device: &mut device,
        textures: &mut textures,
        samplers: &samplers,
        provider: &lib,
    };
    let binding = materials
        .descriptor(id, ClampMode::Normal, Translation::None, &mut ctx)
        .unwrap();
    assert_eq!(device.binding_range(binding).unwrap()[0].0, textures.placeholder().image);
}

#[test]
fn eviction_drops_variants_past_their_age() {
    let mut device = HeadlessDevice::new();
    let mut textures = TextureCache::new(&mut device).unwrap();
    let lib = brick_library();
    let source = lib.texture(TextureId(1)).unwrap();
    let image = textures.get_image(&mut device, source, Translation::None, TextureFlags::empty());

    textures.next_frame();
    textures.next_frame();
    assert_eq!(textures.evict_unused(&mut device, 2), 0);
    assert!(device.image_desc(image.image).is_some());

    textures.next_frame();
    assert_eq!(textures.evict_unused(&mut device, 2), 1);
    assert!(textures.is_empty());
    assert!(device.image_desc(image.image).is_none());
    // The placeholder is never evicted.
    assert!(device.image_desc(textures.placeholder().image).is_some());
}

#[test]
fn reset_releases_every_variant_of_one_texture() {
    let mut device = HeadlessDevice::new();
    let mut textures = TextureCache::new(&mut device).unwrap();
    let mut lib = brick_library();
    lib.insert(MemoryTexture::solid(TextureId(2), "FLAT5", 2, 2, [40, 40, 40, 255]));

    let brick = lib.texture(TextureId(1)).unwrap();
    let plain = textures.get_image(&mut device, brick, Translation::None, TextureFlags::empty());
    let shaded = textures.get_image(&mut device, brick, Translation::Shaded, TextureFlags::empty());
    let depth = textures.get_depth_stencil(&mut device, TextureId(1), 8, 8).unwrap();
    let flat_source = lib.texture(TextureId(2)).unwrap();
    let flat = textures.get_image(&mut device, flat_source, Translation::None, TextureFlags::empty());
    assert_eq!(textures.len(), 3);

    textures.reset_texture(&mut device, TextureId(1));
    assert_eq!(textures.len(), 1);
    for gone in [plain.image, shaded.image, depth.image] {
        assert!(device.image_desc(gone).is_none());
    }
    assert!(device.image_desc(flat.image).is_some());

    // Recreated on the next request.
    let again = textures.get_image(&mut device, brick, Translation::None, TextureFlags::empty());
    assert!(!again.placeholder);
    assert!(device.image_desc(again.image).is_some());
}

#[test]
fn depth_stencil_companions_follow_the_target_size() {
    let mut device = HeadlessDevice::new();
    let mut textures = TextureCache::new(&mut device).unwrap();

    let first = textures.get_depth_stencil(&mut device, TextureId(9), 64, 32).unwrap();
    assert_eq!(textures.get_depth_stencil(&mut device, TextureId(9), 64, 32).unwrap(), first);
    let desc = device.image_desc(first.image).unwrap();
    assert_eq!(desc.format, ImageFormat::Depth24Stencil8);
    assert!(desc.usage.contains(ImageUsage::DEPTH_STENCIL));

    let resized = textures.get_depth_stencil(&mut device, TextureId(9), 128, 64).unwrap();
    assert_ne!(resized.image, first.image);
    assert!(device.image_desc(first.image).is_none());
    assert_eq!((resized.width, resized.height), (128, 64));
}

#[test]
fn wipe_textures_hold_the_screen_until_released() {
    let mut device = HeadlessDevice::new();
    let mut textures = TextureCache::new(&mut device).unwrap();
    let screen: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    let wipe = textures.create_wipe_texture(&mut device, 2, 1, Some(&screen[..])).unwrap();
    assert_eq!(device.image_level(wipe.image, 0), Some(&screen[..]));
    assert!(device
        .image_desc(wipe.image)
        .unwrap()
        .usage
        .contains(ImageUsage::RENDER_TARGET));

    // A screen copy of the wrong size is refused.
    assert!(textures.create_wipe_texture(&mut device, 2, 1, Some(&screen[..3])).is_err());

    textures.release_wipe_textures(&mut device);
    assert!(device.image_desc(wipe.image).is_none());
}

#[test]
fn bindings_on_a_reset_texture_are_rebuilt() {
    let mut device = HeadlessDevice::new();
    let mut textures = TextureCache::new(&mut device).unwrap();
    let samplers = SamplerManager::new(&mut device, policy());
    let lib = brick_library();
    let mut materials = MaterialCache::new();
    let id = materials.insert(Material::new("BRICK", MaterialLayer::new(TextureId(1))));

    let resolve = |materials: &mut MaterialCache, device: &mut HeadlessDevice, textures: &mut TextureCache| {
        let mut ctx = BindingContext {
            device,
            textures,
            samplers: &samplers,
            provider: &lib,
        };
        materials
            .descriptor(id, ClampMode::Normal, Translation::None, &mut ctx)
            .unwrap()
    };

    let before = resolve(&mut materials, &mut device, &mut textures);
    textures.reset_texture(&mut device, TextureId(1));

    materials.begin_frame();
    let after = resolve(&mut materials, &mut device, &mut textures);
    assert_ne!(after, before);
    let (image, _) = device.binding_range(after).unwrap()[0];
    assert!(device.image_desc(image).is_some());
    assert_eq!(materials.get(id).unwrap().entries().len(), 1);

    // The replaced range stays registered until the frame ends.
    assert!(device.binding_range(before).is_some());
    materials.end_frame(&mut device);
    assert!(device.binding_range(before).is_none());
}

// ============================================================================
// Presentation
// ============================================================================

#[test]
fn double_acquire_is_rejected() {
    let mut chain = HeadlessSwapChain::new();
    let mut fb = FramebufferManager::new(SurfaceConfig::default(), std::time::Duration::from_millis(5));

    let image = fb.acquire_image(&mut chain).unwrap();
    let err = fb.acquire_image(&mut chain).unwrap_err();
    assert!(matches!(err, StrataError::AlreadyAcquired(0)));
    assert_eq!(fb.state(), PresentState::Acquired(0));

    fb.queue_present(&mut chain, image).unwrap();
    assert_eq!(fb.state(), PresentState::Idle);
}

// ============================================================================
// Draw Info
// ============================================================================

#[test]
fn draw_info_rejects_out_of_order_transitions() {
    let mut info = DrawInfo::new();
    let err = info.begin_rendering().unwrap_err();
    assert!(matches!(
        err,
        StrataError::InvalidTransition {
            from: DrawInfoState::Created,
            ..
        }
    ));

    info.configure(ViewConfig::new(Viewpoint::default())).unwrap();
    assert_eq!(info.state(), DrawInfoState::ViewConfigured);
    assert!(info.end().is_err());

    info.abandon();
    assert_eq!(info.state(), DrawInfoState::Ended);
}

// ============================================================================
// Settings
// ============================================================================

#[test]
fn settings_load_from_partial_json() {
    let settings = RendererSettings::from_json_str(
        r#"{ "stereo_mode": "side_by_side", "texture_filter": "Nearest", "max_portal_recursion": 2 }"#,
    )
    .unwrap();
    assert_eq!(settings.max_portal_recursion, 2);
    assert_eq!(settings.texture_filter, TextureFilter::Nearest);
    assert!(settings.texture_enabled);

    let json = serde_json::to_string(&settings).unwrap();
    assert!(json.contains("side_by_side"));
}

#[test]
fn applying_a_new_filter_rebuilds_samplers_and_bindings() {
    let mut renderer = Renderer::new(
        HeadlessDevice::new(),
        HeadlessSwapChain::new(),
        RendererSettings::default(),
        320,
        200,
    )
    .unwrap();
    let before = renderer.samplers().get(ClampMode::Normal);

    // Unchanged filtering leaves samplers alone.
    renderer.apply_settings(RendererSettings {
        bloom: true,
        ..RendererSettings::default()
    });
    assert_eq!(renderer.samplers().generation(), 0);

    renderer.apply_settings(RendererSettings {
        texture_filter: TextureFilter::Bilinear,
        ..RendererSettings::default()
    });
    assert_eq!(renderer.samplers().generation(), 1);
    assert_ne!(renderer.samplers().get(ClampMode::Normal), before);

    // Presentation fields schedule a rebuild.
    assert!(renderer.framebuffer().needs_rebuild());
    renderer.apply_settings(RendererSettings {
        texture_filter: TextureFilter::Bilinear,
        vsync: false,
        ..RendererSettings::default()
    });
    assert!(!renderer.framebuffer().config().vsync);
}
