//! Draw-Lists
//!
//! The scene builder sorts every visible primitive into one of a fixed set of
//! named lists. The set is an array indexed by [`DrawListKind`], not a map:
//! the pass sequencer walks the lists in a fixed order and that order is
//! part of the rendering contract.
//!
//! | List                | Pass                        |
//! |---------------------|-----------------------------|
//! | `PlainWalls`        | opaque                      |
//! | `PlainFlats`        | opaque                      |
//! | `Models`            | opaque, after flats         |
//! | `MaskedWalls`       | masked (also sprites)       |
//! | `MaskedFlats`       | masked                      |
//! | `MaskedWallsOffset` | masked, with polygon offset |
//! | `TranslucentBorder` | translucent, before the bulk|
//! | `Translucent`       | translucent, back-to-front  |
//!
//! Decals are kept in a separate list and drawn in their own pass.

use slotmap::Key;

use crate::renderer::core::BindlessIndex;
use crate::renderer::lights::LightSpan;
use crate::renderer::material::MaterialId;

use super::world::{Bounds, PrimitiveId, PrimitiveKind, RenderStyle, VisiblePrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DrawListKind {
    PlainWalls,
    PlainFlats,
    MaskedWalls,
    MaskedFlats,
    MaskedWallsOffset,
    Models,
    Translucent,
    TranslucentBorder,
}

impl DrawListKind {
    pub const COUNT: usize = 8;

    pub const ALL: [Self; Self::COUNT] = [
        Self::PlainWalls,
        Self::PlainFlats,
        Self::MaskedWalls,
        Self::MaskedFlats,
        Self::MaskedWallsOffset,
        Self::Models,
        Self::Translucent,
        Self::TranslucentBorder,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lists reordered by material when texture sorting is on.
    #[must_use]
    pub const fn is_texture_sorted(self) -> bool {
        matches!(
            self,
            Self::PlainWalls
                | Self::PlainFlats
                | Self::MaskedWalls
                | Self::MaskedFlats
                | Self::MaskedWallsOffset
        )
    }
}

/// Where a primitive is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    List(DrawListKind),
    Decal,
}

/// Picks the list for a primitive.
#[must_use]
pub fn classify(primitive: &VisiblePrimitive) -> Bucket {
    if primitive.kind == PrimitiveKind::Decal {
        return Bucket::Decal;
    }
    if primitive.style.is_translucent() {
        return Bucket::List(if primitive.translucent_border {
            DrawListKind::TranslucentBorder
        } else {
            DrawListKind::Translucent
        });
    }
    let masked = primitive.style == RenderStyle::Masked;
    Bucket::List(match primitive.kind {
        PrimitiveKind::Model => DrawListKind::Models,
        PrimitiveKind::Sprite => DrawListKind::MaskedWalls,
        PrimitiveKind::Wall if masked && primitive.polygon_offset => DrawListKind::MaskedWallsOffset,
        PrimitiveKind::Wall if masked => DrawListKind::MaskedWalls,
        PrimitiveKind::Wall => DrawListKind::PlainWalls,
        PrimitiveKind::Flat { .. } if masked => DrawListKind::MaskedFlats,
        PrimitiveKind::Flat { .. } | PrimitiveKind::Decal => DrawListKind::PlainFlats,
    })
}

/// One entry of a draw-list with everything resolved for drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub primitive: PrimitiveId,
    pub kind: PrimitiveKind,
    pub material: Option<MaterialId>,
    pub binding: Option<BindlessIndex>,
    pub lights: Option<LightSpan>,
    /// Distance key, larger is farther.
    pub depth: f32,
    pub style: RenderStyle,
    pub bounds: Bounds,
    pub fullbright: bool,
}

impl DrawItem {
    /// Material ordering key used by texture sorting.
    #[must_use]
    pub fn sort_key(&self) -> u64 {
        self.material.map_or(0, |m| m.data().as_ffi())
    }
}

#[derive(Debug, Default)]
pub struct DrawLists {
    lists: [Vec<DrawItem>; DrawListKind::COUNT],
    decals: Vec<DrawItem>,
}

impl DrawLists {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bucket: Bucket, item: DrawItem) {
        match bucket {
            Bucket::List(kind) => self.lists[kind.index()].push(item),
            Bucket::Decal => self.decals.push(item),
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, kind: DrawListKind) -> &[DrawItem] {
        &self.lists[kind.index()]
    }

    #[inline]
    #[must_use]
    pub fn decals(&self) -> &[DrawItem] {
        &self.decals
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.lists.iter().map(Vec::len).sum::<usize>() + self.decals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Empties every list, keeping the storage.
    pub fn clear(&mut self) {
        for list in &mut self.lists {
            list.clear();
        }
        self.decals.clear();
    }

    /// Storage currently reserved across all lists.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lists.iter().map(Vec::capacity).sum::<usize>() + self.decals.capacity()
    }

    /// Stable sort of the plain and masked lists by material.
    pub fn sort_by_texture(&mut self) {
        for kind in DrawListKind::ALL {
            if kind.is_texture_sorted() {
                self.lists[kind.index()].sort_by_key(DrawItem::sort_key);
            }
        }
    }

    /// Stable back-to-front sort of the translucent list.
    pub fn sort_translucent(&mut self) {
        self.lists[DrawListKind::Translucent.index()].sort_by(|a, b| b.depth.total_cmp(&a.depth));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u32, depth: f32) -> DrawItem {
        DrawItem {
            primitive: PrimitiveId(id),
            kind: PrimitiveKind::Sprite,
            material: None,
            binding: None,
            lights: None,
            depth,
            style: RenderStyle::Translucent { alpha: 0.5 },
            bounds: Bounds::default(),
            fullbright: false,
        }
    }

    #[test]
    fn classify_routes_by_kind_and_style() {
        let wall = VisiblePrimitive::new(PrimitiveId(0), PrimitiveKind::Wall);
        assert_eq!(classify(&wall), Bucket::List(DrawListKind::PlainWalls));

        let mut masked = wall.clone().with_style(RenderStyle::Masked);
        assert_eq!(classify(&masked), Bucket::List(DrawListKind::MaskedWalls));
        masked.polygon_offset = true;
        assert_eq!(classify(&masked), Bucket::List(DrawListKind::MaskedWallsOffset));

        let flat = VisiblePrimitive::new(PrimitiveId(1), PrimitiveKind::Flat { ceiling: false });
        assert_eq!(classify(&flat), Bucket::List(DrawListKind::PlainFlats));

        let mut sprite = VisiblePrimitive::new(PrimitiveId(2), PrimitiveKind::Sprite)
            .with_style(RenderStyle::Translucent { alpha: 0.5 });
        assert_eq!(classify(&sprite), Bucket::List(DrawListKind::Translucent));
        sprite.translucent_border = true;
        assert_eq!(classify(&sprite), Bucket::List(DrawListKind::TranslucentBorder));

        let decal = VisiblePrimitive::new(PrimitiveId(3), PrimitiveKind::Decal);
        assert_eq!(classify(&decal), Bucket::Decal);
    }

    #[test]
    fn translucent_sort_is_stable_back_to_front() {
        let mut lists = DrawLists::new();
        let bucket = Bucket::List(DrawListKind::Translucent);
        for (id, depth) in [(0, 10.0), (1, 30.0), (2, 10.0), (3, 20.0), (4, 30.0)] {
            lists.push(bucket, item(id, depth));
        }
        lists.sort_translucent();
        let order: Vec<u32> = lists
            .get(DrawListKind::Translucent)
            .iter()
            .map(|i| i.primitive.0)
            .collect();
        assert_eq!(order, vec![1, 4, 3, 0, 2]);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut lists = DrawLists::new();
        for i in 0..32 {
            lists.push(Bucket::List(DrawListKind::PlainWalls), item(i, 0.0));
        }
        let capacity = lists.capacity();
        lists.clear();
        assert!(lists.is_empty());
        assert_eq!(lists.capacity(), capacity);
    }
}
