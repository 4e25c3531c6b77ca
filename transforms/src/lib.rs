use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// A rigid transform taking points from a local frame into a parent frame.
/// The rotation is applied first, then the translation.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    pub fn inv(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    #[inline]
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }

    #[inline]
    pub fn rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    #[inline]
    pub fn inverse_rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse_transform_vector(v)
    }
}

impl Mul<Transform> for Transform {
    type Output = Transform;
    /// `a * b` maps b's local frame into a's parent frame.
    fn mul(self, rhs: Transform) -> Transform {
        Transform {
            rotation: self.rotation * rhs.rotation,
            translation: self.rotation * rhs.translation + self.translation,
        }
    }
}
