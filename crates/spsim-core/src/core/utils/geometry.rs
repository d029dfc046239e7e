use crate::core::models::structure::{Model, Structure};
use nalgebra::{Point3, Rotation3, UnitQuaternion, Vector3};

const GIMBAL_LOCK_EPSILON: f64 = 1e-9;

/// Euler angles in degrees following the intrinsic ZYZ convention used by RELION.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerZyz {
    pub rot: f64,
    pub tilt: f64,
    pub psi: f64,
}

pub fn centroid(coordinates: &[Point3<f64>]) -> Option<Point3<f64>> {
    if coordinates.is_empty() {
        return None;
    }
    let sum = coordinates
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Some(Point3::from(sum / coordinates.len() as f64))
}

/// Rotates coordinates about `center`, or about their own centroid when `center` is `None`.
pub fn rotate_coordinates(
    coordinates: &[Point3<f64>],
    rotation: &UnitQuaternion<f64>,
    center: Option<Point3<f64>>,
) -> Vec<Point3<f64>> {
    let Some(center) = center.or_else(|| centroid(coordinates)) else {
        return Vec::new();
    };
    coordinates
        .iter()
        .map(|p| center + rotation * (p - center))
        .collect()
}

pub fn rotate_model(model: &mut Model, rotation: &UnitQuaternion<f64>, center: Option<Point3<f64>>) {
    let rotated = rotate_coordinates(&model.coordinates(), rotation, center);
    model.set_coordinates(&rotated);
}

/// Rotates every model of a structure in place. Each model is rotated about its own
/// centroid unless an explicit center is given.
pub fn rotate_structure(
    structure: &mut Structure,
    rotation: &UnitQuaternion<f64>,
    center: Option<Point3<f64>>,
) {
    for model in &mut structure.models {
        rotate_model(model, rotation, center);
    }
}

/// Builds the rotation `Rz(rot) * Ry(tilt) * Rz(psi)` from angles in degrees.
pub fn rotation_from_euler_zyz(angles: EulerZyz) -> UnitQuaternion<f64> {
    let z1 = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angles.rot.to_radians());
    let y = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angles.tilt.to_radians());
    let z2 = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angles.psi.to_radians());
    z1 * y * z2
}

/// Decomposes a rotation into intrinsic ZYZ Euler angles in degrees.
///
/// `tilt` lies in `[0, 180]`. At the gimbal-locked poles (`tilt` of 0 or 180) `psi` is
/// fixed to zero and the whole in-plane rotation is carried by `rot`.
pub fn euler_zyz_from_rotation(rotation: &UnitQuaternion<f64>) -> EulerZyz {
    let m: Rotation3<f64> = rotation.to_rotation_matrix();
    let m = m.matrix();

    let sin_tilt = m[(2, 0)].hypot(m[(2, 1)]);
    let tilt = sin_tilt.atan2(m[(2, 2)]);
    let (rot, psi) = if sin_tilt > GIMBAL_LOCK_EPSILON {
        (m[(1, 2)].atan2(m[(0, 2)]), m[(2, 1)].atan2(-m[(2, 0)]))
    } else if m[(2, 2)] > 0.0 {
        (m[(1, 0)].atan2(m[(0, 0)]), 0.0)
    } else {
        ((-m[(1, 0)]).atan2(m[(1, 1)]), 0.0)
    };

    EulerZyz {
        rot: rot.to_degrees(),
        tilt: tilt.to_degrees(),
        psi: psi.to_degrees(),
    }
}
