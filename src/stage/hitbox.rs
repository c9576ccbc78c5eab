//! Body-part hit volumes.
//!
//! Each avatar carries one whole-body collider plus a fixed set of named,
//! bone-anchored volumes used for localized click mapping. Volumes follow
//! their bone every frame and are only rendered when the debug grid is on.

use glam::{Quat, Vec3};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use super::camera::Ray;

/// Half-extents of the whole-body collider
pub const BODY_COLLIDER_HALF_EXTENTS: Vec3 = Vec3::new(0.5, 1.0, 0.5);

/// The fixed set of clickable body parts
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum BodyPart {
    Head,
    Face,
    Chest,
    Stomach,
    Hips,
    Butt,
    LeftHand,
    RightHand,
    LeftLeg,
    RightLeg,
}

impl BodyPart {
    /// Every body part, in a stable order
    pub fn all() -> Vec<BodyPart> {
        use strum::IntoEnumIterator;
        Self::iter().collect()
    }

    /// Settings key for this part
    pub fn key(&self) -> &'static str {
        match self {
            BodyPart::Head => "head",
            BodyPart::Face => "face",
            BodyPart::Chest => "chest",
            BodyPart::Stomach => "stomach",
            BodyPart::Hips => "hips",
            BodyPart::Butt => "butt",
            BodyPart::LeftHand => "left_hand",
            BodyPart::RightHand => "right_hand",
            BodyPart::LeftLeg => "left_leg",
            BodyPart::RightLeg => "right_leg",
        }
    }

    /// Humanoid bone this part is anchored to
    pub fn bone(&self) -> &'static str {
        match self {
            BodyPart::Head | BodyPart::Face => "head",
            BodyPart::Chest => "chest",
            BodyPart::Stomach => "spine",
            BodyPart::Hips | BodyPart::Butt => "hips",
            BodyPart::LeftHand => "leftHand",
            BodyPart::RightHand => "rightHand",
            BodyPart::LeftLeg => "leftUpperLeg",
            BodyPart::RightLeg => "rightUpperLeg",
        }
    }

    /// Fixed offset from the bone, in hips-height units
    pub fn offset(&self) -> Vec3 {
        match self {
            BodyPart::Head => Vec3::new(0.0, 0.12, 0.0),
            BodyPart::Face => Vec3::new(0.0, 0.04, 0.12),
            BodyPart::Chest => Vec3::new(0.0, 0.05, 0.08),
            BodyPart::Stomach => Vec3::new(0.0, 0.0, 0.08),
            BodyPart::Hips => Vec3::new(0.0, 0.0, 0.1),
            BodyPart::Butt => Vec3::new(0.0, -0.05, -0.12),
            BodyPart::LeftHand | BodyPart::RightHand => Vec3::ZERO,
            BodyPart::LeftLeg | BodyPart::RightLeg => Vec3::new(0.0, -0.25, 0.0),
        }
    }

    /// Half-extents of this part's volume
    pub fn half_extents(&self) -> Vec3 {
        match self {
            BodyPart::Head => Vec3::new(0.15, 0.15, 0.15),
            BodyPart::Face => Vec3::new(0.12, 0.10, 0.08),
            BodyPart::Chest => Vec3::new(0.18, 0.12, 0.12),
            BodyPart::Stomach => Vec3::new(0.16, 0.10, 0.10),
            BodyPart::Hips => Vec3::new(0.20, 0.10, 0.10),
            BodyPart::Butt => Vec3::new(0.18, 0.12, 0.10),
            BodyPart::LeftHand | BodyPart::RightHand => Vec3::new(0.08, 0.08, 0.08),
            BodyPart::LeftLeg | BodyPart::RightLeg => Vec3::new(0.10, 0.30, 0.10),
        }
    }
}

/// An oriented box following a bone, tested against pointer rays
#[derive(Debug, Clone)]
pub struct HitVolume {
    pub half_extents: Vec3,
    /// Offset from the anchor bone in the bone's frame
    pub local_offset: Vec3,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub visible: bool,
}

impl HitVolume {
    /// Whole-body collider, anchored to the hips with no offset
    pub fn body_collider() -> Self {
        Self {
            half_extents: BODY_COLLIDER_HALF_EXTENTS,
            local_offset: Vec3::ZERO,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            visible: false,
        }
    }

    /// Volume for a named body part. Offsets are stored in hips-height
    /// units, so they are divided by the model's actual hips height.
    pub fn for_part(part: BodyPart, hips_height: f32) -> Self {
        let h = if hips_height.abs() < f32::EPSILON {
            1.0
        } else {
            hips_height
        };
        Self {
            half_extents: part.half_extents(),
            local_offset: part.offset() / h,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            visible: false,
        }
    }

    /// Re-anchor the volume to its bone's current world transform
    pub fn follow(&mut self, bone_position: Vec3, bone_rotation: Quat, scale: Vec3) {
        self.rotation = bone_rotation;
        self.position = bone_position + bone_rotation * (self.local_offset * scale);
        self.scale = scale;
    }

    /// Ray-box intersection; returns the distance along the ray to the
    /// nearest hit, or None. Slab test in the box's local frame.
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        let inv_rot = self.rotation.inverse();
        let origin = inv_rot * (ray.origin - self.position);
        let dir = inv_rot * ray.dir;
        let extents = self.half_extents * self.scale;

        let mut t_min = f32::NEG_INFINITY;
        let mut t_max = f32::INFINITY;

        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            let e = extents[axis];

            if d.abs() < 1e-8 {
                if o.abs() > e {
                    return None;
                }
                continue;
            }

            let t1 = (-e - o) / d;
            let t2 = (e - o) / d;
            let (near, far) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
            t_min = t_min.max(near);
            t_max = t_max.min(far);
            if t_min > t_max {
                return None;
            }
        }

        if t_max < 0.0 {
            return None;
        }
        Some(t_min.max(0.0))
    }
}
