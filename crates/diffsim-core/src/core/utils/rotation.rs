use nalgebra::{Point3, Quaternion, UnitQuaternion};
use std::f64::consts::PI;

/// Builds a rotation from three independent uniform draws in [0, 1).
///
/// The construction maps the unit cube onto unit quaternions uniformly over
/// SO(3) (a subgroup-algorithm construction, not uniform Euler angles, which
/// would bias toward the poles):
///
/// ```text
/// sig1 = sqrt(u1), sig2 = sqrt(1 - u1)
/// theta1 = 2 pi u2, theta2 = 2 pi u3
/// q = ( cos(theta2) sig2, sin(theta1) sig1, cos(theta1) sig1, sin(theta2) sig2 )
/// ```
///
/// The triplet (0, 0, 0) maps to the identity rotation.
pub fn rotation_from_uniforms(u1: f64, u2: f64, u3: f64) -> UnitQuaternion<f64> {
    let sig1 = u1.sqrt();
    let sig2 = (1.0 - u1).sqrt();

    let theta1 = 2.0 * PI * u2;
    let theta2 = 2.0 * PI * u3;

    let w = theta2.cos() * sig2;
    let x = theta1.sin() * sig1;
    let y = theta1.cos() * sig1;
    let z = theta2.sin() * sig2;

    // The quaternion is unit-norm by construction; renormalization only
    // guards against rounding.
    UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z))
}

/// Applies one rigid rotation to a set of points (about the origin).
pub fn rotate_points(rotation: &UnitQuaternion<f64>, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
    points.iter().map(|p| rotation * p).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn zero_uniforms_give_identity() {
        let r = rotation_from_uniforms(0.0, 0.0, 0.0);
        let p = Point3::new(1.0, -2.0, 3.0);
        assert!(((r * p) - p).norm() < 1e-12);
    }

    #[test]
    fn rotations_preserve_norms() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let r = rotation_from_uniforms(rng.r#gen(), rng.r#gen(), rng.r#gen());
            let p = Point3::new(
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
            );
            let rotated = r * p;
            let relative = (rotated.coords.norm() - p.coords.norm()).abs()
                / p.coords.norm().max(f64::EPSILON);
            assert!(relative < 1e-5, "norm drifted by {}", relative);
        }
    }

    #[test]
    fn rotated_axis_is_uniform_over_the_sphere() {
        // Rotate a fixed axis many times; the mean image should vanish if the
        // rotation distribution is uniform over SO(3).
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        let mut mean = Vector3::zeros();
        for _ in 0..n {
            let r = rotation_from_uniforms(rng.r#gen(), rng.r#gen(), rng.r#gen());
            mean += (r * Point3::new(0.0, 0.0, 1.0)).coords;
        }
        mean /= n as f64;
        assert!(mean.norm() < 0.02, "mean image |{}| too far from zero", mean.norm());
    }

    #[test]
    fn rotate_points_applies_one_rotation_to_all_points() {
        let r = rotation_from_uniforms(0.3, 0.6, 0.9);
        let points = vec![Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 2.0, 0.0)];
        let rotated = rotate_points(&r, &points);
        assert_eq!(rotated.len(), 2);
        for (orig, rot) in points.iter().zip(&rotated) {
            assert!((orig.coords.norm() - rot.coords.norm()).abs() < 1e-12);
        }
    }
}
