// q_shared.rs — vector math and plane types shared by the world and renderer

pub type Vec3 = [f32; 3];

pub const PITCH: usize = 0;
pub const YAW: usize = 1;
pub const ROLL: usize = 2;

// ============================================================
// Vector helpers
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// veca + scale * vecb
#[inline]
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

pub fn vector_length(v: &Vec3) -> f32 {
    dot_product(v, v).sqrt()
}

/// Normalize in place, returns original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = vector_length(v);
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

/// Lerp between two points, `start + frac * (end - start)`.
#[inline]
pub fn vector_lerp(start: &Vec3, end: &Vec3, frac: f32) -> Vec3 {
    [
        start[0] + frac * (end[0] - start[0]),
        start[1] + frac * (end[1] - start[1]),
        start[2] + frac * (end[2] - start[2]),
    ]
}

/// Returns (forward, right, up) for pitch/yaw/roll angles in degrees.
pub fn angle_vectors(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let (sy, cy) = angles[YAW].to_radians().sin_cos();
    let (sp, cp) = angles[PITCH].to_radians().sin_cos();
    let (sr, cr) = angles[ROLL].to_radians().sin_cos();

    let forward = [cp * cy, cp * sy, -sp];
    let right = [
        -sr * sp * cy + cr * sy,
        -sr * sp * sy - cr * cy,
        -sr * cp,
    ];
    let up = [
        cr * sp * cy + sr * sy,
        cr * sp * sy - sr * cy,
        cr * cp,
    ];
    (forward, right, up)
}

// ============================================================
// Planes
// ============================================================

pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_ANYX: u8 = 3;
pub const PLANE_ANYY: u8 = 4;
pub const PLANE_ANYZ: u8 = 5;

/// A splitting plane. `plane_type < 3` means the normal is axial along
/// that axis and lets tree walks skip the dot product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: u8,
    /// Bit `i` set when `normal[i]` is negative.
    pub signbits: u8,
}

impl Default for CPlane {
    fn default() -> Self {
        Self { normal: [0.0; 3], dist: 0.0, plane_type: PLANE_ANYZ, signbits: 0 }
    }
}

impl CPlane {
    pub fn new(normal: Vec3, dist: f32, plane_type: u8) -> Self {
        Self { normal, dist, plane_type, signbits: signbits_for_plane(&normal) }
    }

    /// Signed distance of `p` from the plane, using the axial fast path.
    #[inline]
    pub fn distance(&self, p: &Vec3) -> f32 {
        if self.plane_type < 3 {
            p[self.plane_type as usize] - self.dist
        } else {
            dot_product(&self.normal, p) - self.dist
        }
    }

    /// The same plane facing the other way.
    pub fn flipped(&self) -> Self {
        let normal = [-self.normal[0], -self.normal[1], -self.normal[2]];
        Self { normal, dist: -self.dist, plane_type: self.plane_type, signbits: signbits_for_plane(&normal) }
    }
}

pub fn signbits_for_plane(normal: &Vec3) -> u8 {
    let mut bits = 0u8;
    for j in 0..3 {
        if normal[j] < 0.0 {
            bits |= 1 << j;
        }
    }
    bits
}

/// Returns 1 (front), 2 (back), or 3 (crossing) for a box vs. plane test.
pub fn box_on_plane_side(emins: &Vec3, emaxs: &Vec3, p: &CPlane) -> i32 {
    // fast axial cases
    if p.plane_type < 3 {
        let t = p.plane_type as usize;
        if p.dist <= emins[t] {
            return 1;
        }
        if p.dist >= emaxs[t] {
            return 2;
        }
        return 3;
    }

    // the corner furthest along the normal goes into dist1, the
    // nearest into dist2; signbits say which extreme each axis takes
    let mut dist1 = 0.0;
    let mut dist2 = 0.0;
    for i in 0..3 {
        if p.signbits & (1 << i) != 0 {
            dist1 += p.normal[i] * emins[i];
            dist2 += p.normal[i] * emaxs[i];
        } else {
            dist1 += p.normal[i] * emaxs[i];
            dist2 += p.normal[i] * emins[i];
        }
    }

    let mut sides = 0;
    if dist1 >= p.dist {
        sides = 1;
    }
    if dist2 < p.dist {
        sides |= 2;
    }
    sides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signbits() {
        assert_eq!(signbits_for_plane(&[1.0, 0.0, 0.0]), 0);
        assert_eq!(signbits_for_plane(&[-1.0, 0.0, 0.0]), 1);
        assert_eq!(signbits_for_plane(&[0.0, -1.0, -1.0]), 6);
        assert_eq!(signbits_for_plane(&[-0.5, -0.5, -0.7]), 7);
    }

    #[test]
    fn test_box_on_plane_side_axial() {
        let p = CPlane::new([1.0, 0.0, 0.0], 10.0, PLANE_X);
        assert_eq!(box_on_plane_side(&[11.0, 0.0, 0.0], &[20.0, 1.0, 1.0], &p), 1);
        assert_eq!(box_on_plane_side(&[0.0, 0.0, 0.0], &[5.0, 1.0, 1.0], &p), 2);
        assert_eq!(box_on_plane_side(&[0.0, 0.0, 0.0], &[15.0, 1.0, 1.0], &p), 3);
    }

    #[test]
    fn test_box_on_plane_side_general_matches_corners() {
        let mut n = [-1.0, 2.0, -0.5];
        vector_normalize(&mut n);
        let p = CPlane::new(n, 1.5, PLANE_ANYY);
        let mins = [-2.0, -1.0, -3.0];
        let maxs = [1.0, 2.0, 0.5];

        // brute force over the 8 corners
        let mut front = false;
        let mut back = false;
        for c in 0..8 {
            let corner = [
                if c & 1 != 0 { maxs[0] } else { mins[0] },
                if c & 2 != 0 { maxs[1] } else { mins[1] },
                if c & 4 != 0 { maxs[2] } else { mins[2] },
            ];
            let d = dot_product(&corner, &n) - p.dist;
            if d >= 0.0 {
                front = true;
            }
            if d < 0.0 {
                back = true;
            }
        }
        let expected = (front as i32) | ((back as i32) << 1);
        assert_eq!(box_on_plane_side(&mins, &maxs, &p), expected);
    }

    #[test]
    fn test_plane_distance_axial_and_general() {
        let p = CPlane::new([0.0, 0.0, 1.0], 4.0, PLANE_Z);
        assert_eq!(p.distance(&[100.0, -3.0, 10.0]), 6.0);
        let q = CPlane::new([0.6, 0.8, 0.0], 0.0, PLANE_ANYY);
        assert!((q.distance(&[3.0, 4.0, 0.0]) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_flipped_plane() {
        let p = CPlane::new([1.0, 0.0, 0.0], 8.0, PLANE_X);
        let f = p.flipped();
        assert_eq!(f.normal, [-1.0, 0.0, 0.0]);
        assert_eq!(f.dist, -8.0);
        assert_eq!(f.signbits, 1);
    }

    #[test]
    fn test_angle_vectors_yaw() {
        let (f, r, u) = angle_vectors(&[0.0, 90.0, 0.0]);
        assert!((f[1] - 1.0).abs() < 1e-5);
        assert!((r[0] - 1.0).abs() < 1e-5);
        assert!((u[2] - 1.0).abs() < 1e-5);
    }
}
