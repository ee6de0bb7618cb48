//! Ambisonic coefficient computation (ACN order, SN3D normalization)

use aural_core::{AmbiNorm, AmbiOrder};

use crate::position::Vec3;

/// Coefficient count at the maximum supported order.
pub const MAX_AMBI_CHANNELS: usize = 16;

/// Computes the SN3D-normalized, ACN-ordered spherical harmonic
/// coefficients for a direction in listener space (+X right, +Y up, -Z
/// forward). `spread` is the angular width of the source in radians; a
/// spread of 2 pi collapses the source to omnidirectional.
pub fn calc_ambi_coeffs(dir: Vec3, spread: f32, coeffs: &mut [f32; MAX_AMBI_CHANNELS]) {
    // Ambisonic axes: x front, y left, z up.
    let x = -dir.z;
    let y = -dir.x;
    let z = dir.y;

    coeffs[0] = 1.0; // W
    coeffs[1] = y; // Y
    coeffs[2] = z; // Z
    coeffs[3] = x; // X
    coeffs[4] = 1.732050808 * x * y; // V
    coeffs[5] = 1.732050808 * y * z; // T
    coeffs[6] = 0.5 * (3.0 * z * z - 1.0); // R
    coeffs[7] = 1.732050808 * x * z; // S
    coeffs[8] = 0.866025404 * (x * x - y * y); // U
    coeffs[9] = 0.790569415 * y * (3.0 * x * x - y * y); // Q
    coeffs[10] = 3.872983346 * x * y * z; // O
    coeffs[11] = 0.612372435 * y * (5.0 * z * z - 1.0); // M
    coeffs[12] = 0.5 * z * (5.0 * z * z - 3.0); // K
    coeffs[13] = 0.612372435 * x * (5.0 * z * z - 1.0); // L
    coeffs[14] = 1.936491673 * z * (x * x - y * y); // N
    coeffs[15] = 0.790569415 * x * (x * x - 3.0 * y * y); // P

    if spread > 0.0 {
        // Blend toward omni by attenuating each order band with the
        // zonal-harmonic weights of a cap of the given angular width.
        let ca = (spread * 0.5).cos();
        let zh1 = 0.5 * (ca + 1.0);
        let zh2 = 0.5 * (ca + 1.0) * ca;
        let zh3 = 0.125 * (ca + 1.0) * (5.0 * ca * ca - 1.0);

        for c in &mut coeffs[1..4] {
            *c *= zh1;
        }
        for c in &mut coeffs[4..9] {
            *c *= zh2;
        }
        for c in &mut coeffs[9..16] {
            *c *= zh3;
        }
    }
}

/// Rescales SN3D coefficients in place for a device that wants a
/// different normalization.
pub fn apply_norm(coeffs: &mut [f32], norm: AmbiNorm) {
    if norm == AmbiNorm::Sn3d {
        return;
    }
    for (acn, c) in coeffs.iter_mut().enumerate() {
        *c *= norm.scale_from_sn3d(aural_core::acn_order(acn));
    }
}

/// Truncates a coefficient set to the channel count of the given order,
/// zeroing everything above it.
pub fn truncate_to_order(coeffs: &mut [f32; MAX_AMBI_CHANNELS], order: AmbiOrder) {
    for c in &mut coeffs[order.channel_count()..] {
        *c = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_front_direction() {
        let mut coeffs = [0.0f32; MAX_AMBI_CHANNELS];
        calc_ambi_coeffs(Vec3::new(0.0, 0.0, -1.0), 0.0, &mut coeffs);
        assert_relative_eq!(coeffs[0], 1.0, epsilon = 1e-6); // W
        assert!(coeffs[1].abs() < 1e-6); // Y: no left/right
        assert!(coeffs[2].abs() < 1e-6); // Z: no height
        assert_relative_eq!(coeffs[3], 1.0, epsilon = 1e-6); // X: front
    }

    #[test]
    fn test_left_direction() {
        let mut coeffs = [0.0f32; MAX_AMBI_CHANNELS];
        calc_ambi_coeffs(Vec3::new(-1.0, 0.0, 0.0), 0.0, &mut coeffs);
        assert!((coeffs[1] - 1.0).abs() < 1e-6); // Y positive is left
        assert!(coeffs[3].abs() < 1e-6);
    }

    #[test]
    fn test_up_direction() {
        let mut coeffs = [0.0f32; MAX_AMBI_CHANNELS];
        calc_ambi_coeffs(Vec3::new(0.0, 1.0, 0.0), 0.0, &mut coeffs);
        assert!((coeffs[2] - 1.0).abs() < 1e-6);
        // R = 0.5*(3z^2 - 1) = 1 straight up.
        assert!((coeffs[6] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_full_spread_is_omni() {
        let mut coeffs = [0.0f32; MAX_AMBI_CHANNELS];
        calc_ambi_coeffs(Vec3::new(0.0, 0.0, -1.0), std::f32::consts::TAU, &mut coeffs);
        assert!((coeffs[0] - 1.0).abs() < 1e-6);
        for &c in &coeffs[1..] {
            assert!(c.abs() < 1e-6, "directional component survived: {c}");
        }
    }

    #[test]
    fn test_spread_monotone() {
        let mut narrow = [0.0f32; MAX_AMBI_CHANNELS];
        let mut wide = [0.0f32; MAX_AMBI_CHANNELS];
        calc_ambi_coeffs(Vec3::new(0.0, 0.0, -1.0), 0.2, &mut narrow);
        calc_ambi_coeffs(Vec3::new(0.0, 0.0, -1.0), 2.0, &mut wide);
        assert!(wide[3] < narrow[3]);
    }

    #[test]
    fn test_truncate_to_first_order() {
        let mut coeffs = [1.0f32; MAX_AMBI_CHANNELS];
        truncate_to_order(&mut coeffs, AmbiOrder::First);
        assert_eq!(&coeffs[..4], &[1.0; 4]);
        assert!(coeffs[4..].iter().all(|&c| c == 0.0));
    }
}
