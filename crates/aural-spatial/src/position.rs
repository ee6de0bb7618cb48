//! 3-vector math and the listener-relative transform

/// Plain 3-component vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    #[inline]
    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    #[inline]
    pub fn scale(self, s: f32) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }

    #[inline]
    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit vector, or zero when the length is not meaningful.
    pub fn normalized_or_zero(self) -> Vec3 {
        let len = self.length();
        if len > 1e-9 && len.is_finite() {
            self.scale(1.0 / len)
        } else {
            Vec3::ZERO
        }
    }

    /// All components are finite (rejects NaN and infinities).
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Orthonormal listener basis built from the forward ("at") and up
/// vectors. Transforms world vectors into listener space with +X right,
/// +Y up, -Z forward.
#[derive(Debug, Clone, Copy)]
pub struct ListenerBasis {
    right: Vec3,
    up: Vec3,
    back: Vec3,
}

impl ListenerBasis {
    pub fn new(forward: Vec3, up_hint: Vec3) -> Self {
        let forward = forward.normalized_or_zero();
        let forward = if forward == Vec3::ZERO {
            Vec3::new(0.0, 0.0, -1.0)
        } else {
            forward
        };
        let right = forward.cross(up_hint).normalized_or_zero();
        let right = if right == Vec3::ZERO {
            // Degenerate up hint; pick anything orthogonal.
            Vec3::new(1.0, 0.0, 0.0)
        } else {
            right
        };
        let up = right.cross(forward);
        Self {
            right,
            up,
            back: forward.scale(-1.0),
        }
    }

    /// Maps a world-space vector into listener space.
    #[inline]
    pub fn to_local(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.right), v.dot(self.up), v.dot(self.back))
    }

    /// The (right, up, back) axes in world space.
    pub fn axes(&self) -> (Vec3, Vec3, Vec3) {
        (self.right, self.up, self.back)
    }
}

impl Default for ListenerBasis {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 1.0, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_products() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_normalize_zero_is_zero() {
        assert_eq!(Vec3::ZERO.normalized_or_zero(), Vec3::ZERO);
        assert_eq!(Vec3::new(f32::NAN, 0.0, 0.0).normalized_or_zero(), Vec3::ZERO);
    }

    #[test]
    fn test_default_basis_is_identityish() {
        let basis = ListenerBasis::default();
        // A point straight ahead maps to -Z.
        let local = basis.to_local(Vec3::new(0.0, 0.0, -2.0));
        assert!((local.z + 2.0).abs() < 1e-6);
        assert!(local.x.abs() < 1e-6);
        // A point to the right maps to +X.
        let local = basis.to_local(Vec3::new(3.0, 0.0, 0.0));
        assert!((local.x - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_rotated_basis() {
        // Listener facing +X: world +X becomes local forward (-Z).
        let basis = ListenerBasis::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        let local = basis.to_local(Vec3::new(1.0, 0.0, 0.0));
        assert!((local.z + 1.0).abs() < 1e-6);
        // World -Z becomes local left (-X).
        let local = basis.to_local(Vec3::new(0.0, 0.0, -1.0));
        assert!((local.x + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_up_recovers() {
        let basis = ListenerBasis::new(Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 0.0, -1.0));
        let local = basis.to_local(Vec3::new(0.0, 0.0, -1.0));
        assert!(local.is_finite());
    }
}
