use mass_properties::MassProperties;
use nalgebra::{Matrix3, Matrix6, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Builds the cross product operator, `skew(a) * b == a.cross(&b)`.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Six components stored angular (rotation) first, linear (translation) second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialVector {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl SpatialVector {
    pub fn new(rotation: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn zeros() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    pub fn vector(&self) -> Vector6<f64> {
        Vector6::new(
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        )
    }

    pub fn is_zero(&self) -> bool {
        self.rotation == Vector3::zeros() && self.translation == Vector3::zeros()
    }
}

impl From<Vector6<f64>> for SpatialVector {
    fn from(v: Vector6<f64>) -> SpatialVector {
        SpatialVector::new(Vector3::new(v[0], v[1], v[2]), Vector3::new(v[3], v[4], v[5]))
    }
}

impl Add<SpatialVector> for SpatialVector {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.rotation + rhs.rotation,
            self.translation + rhs.translation,
        )
    }
}

impl Sub<SpatialVector> for SpatialVector {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.rotation - rhs.rotation,
            self.translation - rhs.translation,
        )
    }
}

impl Neg for SpatialVector {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.rotation, -self.translation)
    }
}

impl Mul<f64> for SpatialVector {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.rotation * rhs, self.translation * rhs)
    }
}

/// Operators shared by the motion and force wrappers.
macro_rules! spatial_ops {
    ($t:ident) => {
        impl Add<$t> for $t {
            type Output = $t;
            #[inline]
            fn add(self, rhs: $t) -> $t {
                $t(self.0 + rhs.0)
            }
        }

        impl Sub<$t> for $t {
            type Output = $t;
            #[inline]
            fn sub(self, rhs: $t) -> $t {
                $t(self.0 - rhs.0)
            }
        }

        impl Neg for $t {
            type Output = $t;
            #[inline]
            fn neg(self) -> $t {
                $t(-self.0)
            }
        }

        impl Mul<f64> for $t {
            type Output = $t;
            #[inline]
            fn mul(self, rhs: f64) -> $t {
                $t(self.0 * rhs)
            }
        }

        impl AddAssign<$t> for $t {
            #[inline]
            fn add_assign(&mut self, rhs: $t) {
                self.0 = self.0 + rhs.0;
            }
        }

        impl SubAssign<$t> for $t {
            #[inline]
            fn sub_assign(&mut self, rhs: $t) {
                self.0 = self.0 - rhs.0;
            }
        }

        impl $t {
            pub fn new(rotation: Vector3<f64>, translation: Vector3<f64>) -> Self {
                $t(SpatialVector::new(rotation, translation))
            }

            pub fn zeros() -> Self {
                $t(SpatialVector::zeros())
            }

            #[inline]
            pub fn rotation(&self) -> Vector3<f64> {
                self.0.rotation
            }

            #[inline]
            pub fn translation(&self) -> Vector3<f64> {
                self.0.translation
            }

            pub fn vector(&self) -> Vector6<f64> {
                self.0.vector()
            }

            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            /// Linear part first, angular part second.
            pub fn to_linear_first(&self) -> Vector6<f64> {
                let v = self.0.vector();
                Vector6::new(v[3], v[4], v[5], v[0], v[1], v[2])
            }

            pub fn from_linear_first(v: &Vector6<f64>) -> Self {
                $t::new(Vector3::new(v[3], v[4], v[5]), Vector3::new(v[0], v[1], v[2]))
            }
        }

        impl From<Vector6<f64>> for $t {
            fn from(v: Vector6<f64>) -> $t {
                $t(SpatialVector::from(v))
            }
        }
    };
}

/// Velocity-like quantity: angular velocity and the linear velocity of a reference point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionVector(pub SpatialVector);

spatial_ops!(MotionVector);

impl MotionVector {
    /// Re-expresses the motion at a point moved by `-offset`: the angular part is
    /// unchanged and the linear part gains `offset × angular`.
    /// A child link's view of its parent's motion is `parent.translate(-rw)`.
    #[inline]
    pub fn translate(&self, offset: &Vector3<f64>) -> MotionVector {
        MotionVector::new(
            self.0.rotation,
            self.0.translation + offset.cross(&self.0.rotation),
        )
    }

    #[inline]
    pub fn dot(&self, force: &ForceVector) -> f64 {
        self.0.rotation.dot(&force.0.rotation) + self.0.translation.dot(&force.0.translation)
    }
}

/// Force-like quantity: torque (rotation) and force (translation).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForceVector(pub SpatialVector);

spatial_ops!(ForceVector);

impl ForceVector {
    /// Moves the point the torque is taken about by `-offset`, so a child's force
    /// expressed at its parent is `child.translate(rw)`.
    #[inline]
    pub fn translate(&self, offset: &Vector3<f64>) -> ForceVector {
        ForceVector::new(
            self.0.rotation + offset.cross(&self.0.translation),
            self.0.translation,
        )
    }

    #[inline]
    pub fn dot(&self, motion: &MotionVector) -> f64 {
        motion.dot(self)
    }
}

/// Symmetric spatial inertia in block form
/// ```text
/// | rotation      coupling    |
/// | coupling^T    translation |
/// ```
/// mapping a `MotionVector` to a `ForceVector`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialInertia {
    pub rotation: Matrix3<f64>,
    pub coupling: Matrix3<f64>,
    pub translation: Matrix3<f64>,
}

impl Default for SpatialInertia {
    fn default() -> Self {
        Self::zeros()
    }
}

impl SpatialInertia {
    pub fn zeros() -> Self {
        Self {
            rotation: Matrix3::zeros(),
            coupling: Matrix3::zeros(),
            translation: Matrix3::zeros(),
        }
    }

    /// Spatial inertia of a rigid body about its own center of mass, in world axes.
    /// Infinite mass or inertia contributes zero.
    pub fn from_rigid_body(
        mass_properties: &MassProperties,
        orientation: &UnitQuaternion<f64>,
    ) -> Self {
        Self {
            rotation: mass_properties.world_inertia(orientation),
            coupling: Matrix3::zeros(),
            translation: Matrix3::from_diagonal_element(mass_properties.mass()),
        }
    }

    pub fn matrix(&self) -> Matrix6<f64> {
        let mut m = Matrix6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 3>(0, 3).copy_from(&self.coupling);
        m.fixed_view_mut::<3, 3>(3, 0).copy_from(&self.coupling.transpose());
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.translation);
        m
    }

    /// Reads the upper blocks and the lower right block of an angular-first matrix.
    pub fn from_matrix(m: &Matrix6<f64>) -> Self {
        Self {
            rotation: m.fixed_view::<3, 3>(0, 0).into_owned(),
            coupling: m.fixed_view::<3, 3>(0, 3).into_owned(),
            translation: m.fixed_view::<3, 3>(3, 3).into_owned(),
        }
    }

    /// Re-expresses the inertia about a reference point moved by `-offset`,
    /// the spatial form of the parallel axis theorem. A child's composite inertia
    /// seen from its parent is `child.translate(&rw)`.
    pub fn translate(&self, offset: &Vector3<f64>) -> SpatialInertia {
        let r = skew(offset);
        let rotation = self.rotation + r * self.coupling.transpose()
            - self.coupling * r
            - r * self.translation * r;
        let coupling = self.coupling + r * self.translation;
        SpatialInertia {
            rotation,
            coupling,
            translation: self.translation,
        }
    }

    /// Returns `None` when the inertia is singular.
    pub fn inverse(&self) -> Option<InverseSpatialInertia> {
        self.matrix().try_inverse().map(InverseSpatialInertia)
    }

    /// Swaps the block order so linear rows and columns come first.
    pub fn to_linear_first(&self) -> Matrix6<f64> {
        let mut m = Matrix6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.translation);
        m.fixed_view_mut::<3, 3>(0, 3).copy_from(&self.coupling.transpose());
        m.fixed_view_mut::<3, 3>(3, 0).copy_from(&self.coupling);
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.rotation);
        m
    }

    pub fn from_linear_first(m: &Matrix6<f64>) -> Self {
        Self {
            rotation: m.fixed_view::<3, 3>(3, 3).into_owned(),
            coupling: m.fixed_view::<3, 3>(3, 0).into_owned(),
            translation: m.fixed_view::<3, 3>(0, 0).into_owned(),
        }
    }
}

impl Mul<MotionVector> for SpatialInertia {
    type Output = ForceVector;
    fn mul(self, motion: MotionVector) -> ForceVector {
        let w = motion.rotation();
        let v = motion.translation();
        ForceVector::new(
            self.rotation * w + self.coupling * v,
            self.coupling.tr_mul(&w) + self.translation * v,
        )
    }
}

impl Add<SpatialInertia> for SpatialInertia {
    type Output = SpatialInertia;
    fn add(self, rhs: SpatialInertia) -> SpatialInertia {
        SpatialInertia {
            rotation: self.rotation + rhs.rotation,
            coupling: self.coupling + rhs.coupling,
            translation: self.translation + rhs.translation,
        }
    }
}

impl AddAssign<SpatialInertia> for SpatialInertia {
    fn add_assign(&mut self, rhs: SpatialInertia) {
        self.rotation += rhs.rotation;
        self.coupling += rhs.coupling;
        self.translation += rhs.translation;
    }
}

impl Sub<SpatialInertia> for SpatialInertia {
    type Output = SpatialInertia;
    fn sub(self, rhs: SpatialInertia) -> SpatialInertia {
        SpatialInertia {
            rotation: self.rotation - rhs.rotation,
            coupling: self.coupling - rhs.coupling,
            translation: self.translation - rhs.translation,
        }
    }
}

/// Inverse of a spatial inertia, mapping a `ForceVector` back to a `MotionVector`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InverseSpatialInertia(pub Matrix6<f64>);

impl Default for InverseSpatialInertia {
    fn default() -> Self {
        Self::zeros()
    }
}

impl InverseSpatialInertia {
    pub fn zeros() -> Self {
        Self(Matrix6::zeros())
    }
}

impl Mul<ForceVector> for InverseSpatialInertia {
    type Output = MotionVector;
    fn mul(self, force: ForceVector) -> MotionVector {
        MotionVector::from(self.0 * force.vector())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const TOL: f64 = 1e-12;

    fn test_inertia() -> SpatialInertia {
        let mp = MassProperties::new(3.0, Vector3::new(1.0, 2.0, 0.5)).unwrap();
        let q = UnitQuaternion::from_euler_angles(0.2, 0.4, -0.3);
        SpatialInertia::from_rigid_body(&mp, &q).translate(&Vector3::new(0.3, -1.2, 0.7))
    }

    #[test]
    fn test_skew() {
        let a = Vector3::new(1.0, -2.0, 3.0);
        let b = Vector3::new(0.5, 4.0, -1.5);
        assert_abs_diff_eq!(skew(&a) * b, a.cross(&b), epsilon = TOL);
        assert_abs_diff_eq!(skew(&a).transpose(), -skew(&a), epsilon = TOL);
    }

    #[test]
    fn test_motion_translate_roundtrip() {
        let v = MotionVector::new(Vector3::new(0.1, 0.2, 0.3), Vector3::new(1.0, -1.0, 2.0));
        let r = Vector3::new(0.4, -0.5, 0.6);
        assert_abs_diff_eq!(
            v.translate(&r).translate(&-r).vector(),
            v.vector(),
            epsilon = TOL
        );
    }

    #[test]
    fn test_translate_preserves_power() {
        // power is the same no matter which point the pair is expressed about
        let v_parent =
            MotionVector::new(Vector3::new(0.3, -0.1, 0.8), Vector3::new(2.0, 0.5, -1.0));
        let f_child = ForceVector::new(Vector3::new(-1.0, 0.2, 0.4), Vector3::new(3.0, 1.0, 2.0));
        let rw = Vector3::new(1.0, 2.0, -0.5);
        let v_child = v_parent.translate(&-rw);
        let f_parent = f_child.translate(&rw);
        assert_abs_diff_eq!(f_parent.dot(&v_parent), f_child.dot(&v_child), epsilon = TOL);
    }

    #[test]
    fn test_inertia_translate_consistent() {
        let inertia = test_inertia();
        let rw = Vector3::new(-0.4, 0.9, 1.3);
        let v_parent = MotionVector::new(Vector3::new(0.5, 0.1, -0.2), Vector3::new(0.0, 1.0, 2.0));
        let direct = inertia.translate(&rw) * v_parent;
        let via_child = (inertia * v_parent.translate(&-rw)).translate(&rw);
        assert_abs_diff_eq!(direct.vector(), via_child.vector(), epsilon = 1e-10);
        let m = inertia.translate(&rw).matrix();
        assert_abs_diff_eq!(m, m.transpose(), epsilon = 1e-10);
    }

    #[test]
    fn test_inertia_matrix_matches_mul() {
        let inertia = test_inertia();
        let v = MotionVector::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(-1.0, 0.5, 0.25));
        assert_abs_diff_eq!(
            inertia.matrix() * v.vector(),
            (inertia * v).vector(),
            epsilon = 1e-10
        );
        assert_eq!(SpatialInertia::from_matrix(&inertia.matrix()), inertia);
    }

    #[test]
    fn test_linear_first_conversions() {
        let inertia = test_inertia();
        let mut p = Matrix6::<f64>::zeros();
        p.fixed_view_mut::<3, 3>(0, 3).fill_with_identity();
        p.fixed_view_mut::<3, 3>(3, 0).fill_with_identity();
        assert_abs_diff_eq!(inertia.to_linear_first(), p * inertia.matrix() * p, epsilon = TOL);
        assert_eq!(
            SpatialInertia::from_linear_first(&inertia.to_linear_first()),
            inertia
        );

        let f = ForceVector::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0));
        assert_eq!(f.to_linear_first(), Vector6::new(4.0, 5.0, 6.0, 1.0, 2.0, 3.0));
        assert_eq!(ForceVector::from_linear_first(&f.to_linear_first()), f);
    }

    #[test]
    fn test_inverse() {
        let inertia = test_inertia();
        let inv = inertia.inverse().unwrap();
        let f = ForceVector::new(Vector3::new(0.2, -0.3, 0.1), Vector3::new(1.0, 2.0, -1.0));
        let roundtrip = inertia * (inv * f);
        assert_abs_diff_eq!(roundtrip.vector(), f.vector(), epsilon = 1e-9);
        assert!(SpatialInertia::zeros().inverse().is_none());
    }
}
