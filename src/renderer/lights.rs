//! Dynamic Light Collection
//!
//! # Data flow
//!
//! ```text
//! DynamicLight (world) ──gather──▶ LightCollection (per primitive scratch)
//!                                      │ upload
//!                                      ▼
//!                                  LightBuffer (per frame) ──▶ LightSpan on the draw item
//! ```
//!
//! A [`LightCollection`] is scratch space owned by one render worker and
//! passed by reference into scene building. `begin` empties it without
//! releasing storage, `gather` appends one [`LightSample`] per intersecting
//! light into the sequence of its blend category, and `finish` seals it for
//! reading until the next `begin`.
//!
//! Capacity is fixed ([`MAX_LIGHT_DATA`] samples across all categories).
//! Samples beyond it are dropped; entries already collected are never
//! touched. The first drop of a frame is logged.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::renderer::scene::Bounds;

/// Combined capacity of the three light sequences.
pub const MAX_LIGHT_DATA: usize = 65536;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LightFlags: u32 {
        const ATTENUATED   = 1 << 0;
        const SHADOWMAPPED = 1 << 1;
        const SPOT         = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightCategory {
    Normal,
    Subtractive,
    Additive,
}

impl LightCategory {
    pub const ALL: [Self; 3] = [Self::Normal, Self::Subtractive, Self::Additive];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// GPU layout of one light influence, 80 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct LightSample {
    pub position: [f32; 3],
    pub radius: f32,
    pub color: [f32; 3],
    /// Shadow-map slot, -1 when the light casts no shadow.
    pub shadow_index: i32,
    pub spot_direction: [f32; 3],
    /// Cosine of the inner cone angle.
    pub spot_inner: f32,
    /// Cosine of the outer cone angle.
    pub spot_outer: f32,
    pub linearity: f32,
    pub soft_shadow_radius: f32,
    pub strength: f32,
    pub flags: u32,
    pub _pad: [u32; 3],
}

impl LightSample {
    #[inline]
    #[must_use]
    pub fn flags(&self) -> LightFlags {
        LightFlags::from_bits_truncate(self.flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotCone {
    pub direction: Vec3,
    /// Degrees.
    pub inner_angle: f32,
    /// Degrees.
    pub outer_angle: f32,
}

/// A light source as the world reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicLight {
    pub position: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub category: LightCategory,
    pub attenuated: bool,
    pub linearity: f32,
    pub soft_shadow_radius: f32,
    pub strength: f32,
    pub spot: Option<SpotCone>,
    pub shadow_index: Option<u32>,
}

impl DynamicLight {
    #[must_use]
    pub fn point(position: Vec3, radius: f32, color: Vec3) -> Self {
        Self {
            position,
            radius,
            color,
            category: LightCategory::Normal,
            attenuated: true,
            linearity: 0.0,
            soft_shadow_radius: 5.0,
            strength: 1.0,
            spot: None,
            shadow_index: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: LightCategory) -> Self {
        self.category = category;
        self
    }

    /// `true` when the light's sphere of influence touches `bounds`.
    #[inline]
    #[must_use]
    pub fn intersects(&self, bounds: &Bounds) -> bool {
        let reach = self.radius + bounds.radius;
        self.position.distance_squared(bounds.center) <= reach * reach
    }

    #[must_use]
    pub fn sample(&self) -> LightSample {
        let mut flags = LightFlags::empty();
        flags.set(LightFlags::ATTENUATED, self.attenuated);
        flags.set(LightFlags::SHADOWMAPPED, self.shadow_index.is_some());

        let (spot_direction, spot_inner, spot_outer) = match &self.spot {
            Some(cone) => {
                flags |= LightFlags::SPOT;
                (
                    cone.direction.normalize_or_zero().to_array(),
                    cone.inner_angle.to_radians().cos(),
                    cone.outer_angle.to_radians().cos(),
                )
            }
            None => ([0.0; 3], -1.0, -1.0),
        };

        LightSample {
            position: self.position.to_array(),
            radius: self.radius,
            color: self.color.to_array(),
            shadow_index: self.shadow_index.map_or(-1, |i| i as i32),
            spot_direction,
            spot_inner,
            spot_outer,
            linearity: self.linearity,
            soft_shadow_radius: self.soft_shadow_radius,
            strength: self.strength,
            flags: flags.bits(),
            _pad: [0; 3],
        }
    }
}

// ============================================================================
// Collection
// ============================================================================

#[derive(Debug)]
pub struct LightCollection {
    categories: [Vec<LightSample>; 3],
    capacity: usize,
    dropped: usize,
    overflow_reported: bool,
    finished: bool,
}

impl Default for LightCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl LightCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_LIGHT_DATA)
    }

    /// A collection with a smaller combined capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            categories: Default::default(),
            capacity: capacity.min(MAX_LIGHT_DATA),
            dropped: 0,
            overflow_reported: false,
            finished: false,
        }
    }

    /// Re-arms the once-per-frame overflow warning.
    pub fn begin_frame(&mut self) {
        self.overflow_reported = false;
    }

    /// Empties all three sequences, keeping their storage.
    pub fn begin(&mut self) {
        for list in &mut self.categories {
            list.clear();
        }
        self.dropped = 0;
        self.finished = false;
    }

    /// Appends `sample` unless the collection is full.
    pub fn push(&mut self, category: LightCategory, sample: LightSample) -> bool {
        if self.len() >= self.capacity {
            self.dropped += 1;
            if !self.overflow_reported {
                log::warn!(
                    "Dynamic light collection full ({} samples); dropping further lights this frame",
                    self.capacity
                );
                self.overflow_reported = true;
            }
            return false;
        }
        self.categories[category.index()].push(sample);
        true
    }

    /// Collects every light in `lights` that touches `bounds`. Returns the
    /// number of samples added.
    pub fn gather(&mut self, lights: &[DynamicLight], bounds: &Bounds) -> usize {
        lights
            .iter()
            .filter(|l| l.intersects(bounds))
            .filter(|l| self.push(l.category, l.sample()))
            .count()
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[inline]
    #[must_use]
    pub fn get(&self, category: LightCategory) -> &[LightSample] {
        &self.categories[category.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.iter().all(Vec::is_empty)
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples dropped since the last `begin`.
    #[inline]
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

// ============================================================================
// Frame Buffer
// ============================================================================

/// Location of one primitive's lights inside the frame's [`LightBuffer`].
/// Categories are stored back to back in `Normal, Subtractive, Additive`
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LightSpan {
    pub offset: u32,
    pub counts: [u32; 3],
}

impl LightSpan {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}

/// Per-frame storage that collections are uploaded into.
#[derive(Debug)]
pub struct LightBuffer {
    samples: Vec<LightSample>,
    limit: usize,
    overflow_reported: bool,
}

impl Default for LightBuffer {
    fn default() -> Self {
        Self::new(MAX_LIGHT_DATA * 4)
    }
}

impl LightBuffer {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            samples: Vec::new(),
            limit,
            overflow_reported: false,
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.overflow_reported = false;
    }

    /// Copies a finished collection. Returns `None` for an empty collection
    /// or when the frame buffer is exhausted.
    pub fn upload(&mut self, collection: &LightCollection) -> Option<LightSpan> {
        let total = collection.len();
        if total == 0 {
            return None;
        }
        if self.samples.len() + total > self.limit {
            if !self.overflow_reported {
                log::warn!("Light buffer exhausted ({} samples)", self.limit);
                self.overflow_reported = true;
            }
            return None;
        }

        let offset = self.samples.len() as u32;
        let mut counts = [0u32; 3];
        for category in LightCategory::ALL {
            let list = collection.get(category);
            counts[category.index()] = list.len() as u32;
            self.samples.extend_from_slice(list);
        }
        Some(LightSpan { offset, counts })
    }

    #[must_use]
    pub fn samples(&self) -> &[LightSample] {
        &self.samples
    }

    /// Raw upload payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }
}
