use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MassPropertiesErrors {
    #[error("Ixx cant be less than or equal to zero")]
    IxxLessThanOrEqualToZero,
    #[error("Iyy cant be less than or equal to zero")]
    IyyLessThanOrEqualToZero,
    #[error("Izz cant be less than or equal to zero")]
    IzzLessThanOrEqualToZero,
    #[error("mass cannot be less than or equal to zero")]
    MassLessThanOrEqualToZero,
    #[error("inverse mass properties cannot be negative")]
    NegativeInverse,
}

/// Inverts a value where zero stands for infinity in both directions.
#[inline]
fn invert_or_zero(value: f64) -> f64 {
    if value == 0.0 { 0.0 } else { 1.0 / value }
}

/// Mass properties of a rigid body about its center of mass, in the principal frame.
///
/// Stored as inverses so that a kinematic or static body is expressed with zeros.
/// An inverse of zero means the corresponding mass or inertia is infinite; every
/// consumer treats such a body as contributing nothing to the dynamics rather than
/// dividing by zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub inverse_mass: f64,
    pub inverse_inertia: Vector3<f64>,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self {
            inverse_mass: 1.0,
            inverse_inertia: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl MassProperties {
    /// Creates mass properties from a mass and principal moments of inertia.
    pub fn new(mass: f64, inertia: Vector3<f64>) -> Result<Self, MassPropertiesErrors> {
        if mass <= f64::EPSILON {
            return Err(MassPropertiesErrors::MassLessThanOrEqualToZero);
        }
        if inertia.x <= f64::EPSILON {
            return Err(MassPropertiesErrors::IxxLessThanOrEqualToZero);
        }
        if inertia.y <= f64::EPSILON {
            return Err(MassPropertiesErrors::IyyLessThanOrEqualToZero);
        }
        if inertia.z <= f64::EPSILON {
            return Err(MassPropertiesErrors::IzzLessThanOrEqualToZero);
        }
        Ok(Self {
            inverse_mass: 1.0 / mass,
            inverse_inertia: inertia.map(|i| 1.0 / i),
        })
    }

    /// Creates mass properties directly from inverse values. Zero entries are allowed
    /// and mean infinite mass or inertia about that axis.
    pub fn from_inverse(
        inverse_mass: f64,
        inverse_inertia: Vector3<f64>,
    ) -> Result<Self, MassPropertiesErrors> {
        if inverse_mass < 0.0 || inverse_inertia.iter().any(|i| *i < 0.0) {
            return Err(MassPropertiesErrors::NegativeInverse);
        }
        Ok(Self {
            inverse_mass,
            inverse_inertia,
        })
    }

    /// A body that no force can move.
    pub fn infinite() -> Self {
        Self {
            inverse_mass: 0.0,
            inverse_inertia: Vector3::zeros(),
        }
    }

    /// Mass, or 0.0 when the mass is infinite.
    #[inline]
    pub fn mass(&self) -> f64 {
        invert_or_zero(self.inverse_mass)
    }

    /// Principal moments of inertia, with 0.0 on axes of infinite inertia.
    #[inline]
    pub fn inertia(&self) -> Vector3<f64> {
        self.inverse_inertia.map(invert_or_zero)
    }

    pub fn is_infinite(&self) -> bool {
        self.inverse_mass == 0.0
    }

    /// Inertia tensor expressed in the world frame for a body with orientation `rotation`.
    pub fn world_inertia(&self, rotation: &UnitQuaternion<f64>) -> Matrix3<f64> {
        let r = rotation.to_rotation_matrix().into_inner();
        r * Matrix3::from_diagonal(&self.inertia()) * r.transpose()
    }

    /// Inverse inertia tensor expressed in the world frame.
    pub fn world_inverse_inertia(&self, rotation: &UnitQuaternion<f64>) -> Matrix3<f64> {
        let r = rotation.to_rotation_matrix().into_inner();
        r * Matrix3::from_diagonal(&self.inverse_inertia) * r.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const TOL: f64 = 1e-12;

    #[test]
    fn test_new_validates() {
        assert_eq!(
            MassProperties::new(0.0, Vector3::new(1.0, 1.0, 1.0)),
            Err(MassPropertiesErrors::MassLessThanOrEqualToZero)
        );
        assert_eq!(
            MassProperties::new(1.0, Vector3::new(1.0, 0.0, 1.0)),
            Err(MassPropertiesErrors::IyyLessThanOrEqualToZero)
        );
        assert_eq!(
            MassProperties::from_inverse(-1.0, Vector3::zeros()),
            Err(MassPropertiesErrors::NegativeInverse)
        );
    }

    #[test]
    fn test_infinite_maps_to_zero() {
        let mp = MassProperties::infinite();
        assert_eq!(mp.mass(), 0.0);
        assert_eq!(mp.inertia(), Vector3::zeros());
        assert!(mp.is_infinite());
    }

    #[test]
    fn test_world_inertia() {
        let mp = MassProperties::new(2.0, Vector3::new(1.0, 2.0, 3.0)).unwrap();
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
        let i = mp.world_inertia(&q);
        // x and y swap under a quarter turn about z
        assert_abs_diff_eq!(i[(0, 0)], 2.0, epsilon = TOL);
        assert_abs_diff_eq!(i[(1, 1)], 1.0, epsilon = TOL);
        assert_abs_diff_eq!(i[(2, 2)], 3.0, epsilon = TOL);
        assert_abs_diff_eq!(
            i * mp.world_inverse_inertia(&q),
            Matrix3::identity(),
            epsilon = TOL
        );
        assert_abs_diff_eq!(mp.mass(), 2.0, epsilon = TOL);
    }
}
