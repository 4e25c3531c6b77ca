use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use spatial_algebra::MotionVector;
use thiserror::Error;
use transforms::Transform;

/// Most degrees of freedom a single joint can expose.
pub const MAX_DOF: usize = 6;

#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum JointErrors {
    #[error("fixed joint cannot have any unlocked axes")]
    FixedJointHasDofs,
    #[error("{0:?} joint must unlock exactly one {1} axis")]
    SingleAxisRequired(JointType, &'static str),
    #[error("spherical joint must unlock between one and three rotation axes")]
    SphericalAxes,
    #[error("{0:?} joint cannot unlock translation axes")]
    TranslationNotAllowed(JointType),
    #[error("{0:?} joint cannot unlock rotation axes")]
    RotationNotAllowed(JointType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JointType {
    Fix,
    Prismatic,
    /// Position is wrapped into `[-pi, pi)` when written from a cache.
    Revolute,
    /// Position accumulates full turns.
    RevoluteUnwrapped,
    Spherical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Motion {
    #[default]
    Locked,
    Limited,
    Free,
}

impl Motion {
    #[inline]
    pub fn is_dof(&self) -> bool {
        *self != Motion::Locked
    }
}

/// Joint axes in the order degrees of freedom are laid out in the flat arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    RotX = 0,
    RotY = 1,
    RotZ = 2,
    TransX = 3,
    TransY = 4,
    TransZ = 5,
}

impl Axis {
    pub const ALL: [Axis; MAX_DOF] = [
        Axis::RotX,
        Axis::RotY,
        Axis::RotZ,
        Axis::TransX,
        Axis::TransY,
        Axis::TransZ,
    ];

    #[inline]
    pub fn is_rotation(&self) -> bool {
        (*self as usize) < 3
    }

    pub fn unit(&self) -> Vector3<f64> {
        match self {
            Axis::RotX | Axis::TransX => Vector3::x(),
            Axis::RotY | Axis::TransY => Vector3::y(),
            Axis::RotZ | Axis::TransZ => Vector3::z(),
        }
    }

    /// Motion subspace column of this axis in the child joint frame.
    pub fn motion(&self) -> MotionVector {
        if self.is_rotation() {
            MotionVector::new(self.unit(), Vector3::zeros())
        } else {
            MotionVector::new(Vector3::zeros(), self.unit())
        }
    }
}

/// Inbound joint of a link. `parent_pose` locates the joint frame on the parent body
/// and `child_pose` locates it on the child body; both frames coincide at zero position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub joint_type: JointType,
    pub motion: [Motion; MAX_DOF],
    pub parent_pose: Transform,
    pub child_pose: Transform,
}

impl Default for Joint {
    fn default() -> Self {
        Self::fixed(Transform::identity(), Transform::identity())
    }
}

impl Joint {
    pub fn fixed(parent_pose: Transform, child_pose: Transform) -> Self {
        Self {
            joint_type: JointType::Fix,
            motion: [Motion::Locked; MAX_DOF],
            parent_pose,
            child_pose,
        }
    }

    pub fn revolute(axis: Axis, parent_pose: Transform, child_pose: Transform) -> Self {
        Self::single_axis(JointType::Revolute, axis, parent_pose, child_pose)
    }

    pub fn revolute_unwrapped(axis: Axis, parent_pose: Transform, child_pose: Transform) -> Self {
        Self::single_axis(JointType::RevoluteUnwrapped, axis, parent_pose, child_pose)
    }

    pub fn prismatic(axis: Axis, parent_pose: Transform, child_pose: Transform) -> Self {
        Self::single_axis(JointType::Prismatic, axis, parent_pose, child_pose)
    }

    /// Ball joint with all three rotation axes unlocked. Lock individual axes
    /// with `with_motion` to build a universal joint.
    pub fn spherical(parent_pose: Transform, child_pose: Transform) -> Self {
        let mut motion = [Motion::Locked; MAX_DOF];
        motion[..3].fill(Motion::Free);
        Self {
            joint_type: JointType::Spherical,
            motion,
            parent_pose,
            child_pose,
        }
    }

    fn single_axis(
        joint_type: JointType,
        axis: Axis,
        parent_pose: Transform,
        child_pose: Transform,
    ) -> Self {
        let mut motion = [Motion::Locked; MAX_DOF];
        motion[axis as usize] = Motion::Free;
        Self {
            joint_type,
            motion,
            parent_pose,
            child_pose,
        }
    }

    pub fn with_motion(mut self, axis: Axis, motion: Motion) -> Self {
        self.motion[axis as usize] = motion;
        self
    }

    /// Unlocked axes in DOF order.
    pub fn dof_axes(&self) -> impl Iterator<Item = Axis> + '_ {
        Axis::ALL
            .into_iter()
            .filter(|axis| self.motion[*axis as usize].is_dof())
    }

    pub fn dof_count(&self) -> usize {
        self.dof_axes().count()
    }

    pub fn validate(&self) -> Result<(), JointErrors> {
        let rotations = self.dof_axes().filter(|a| a.is_rotation()).count();
        let translations = self.dof_count() - rotations;
        match self.joint_type {
            JointType::Fix => {
                if rotations + translations > 0 {
                    return Err(JointErrors::FixedJointHasDofs);
                }
            }
            JointType::Revolute | JointType::RevoluteUnwrapped => {
                if translations > 0 {
                    return Err(JointErrors::TranslationNotAllowed(self.joint_type));
                }
                if rotations != 1 {
                    return Err(JointErrors::SingleAxisRequired(self.joint_type, "rotation"));
                }
            }
            JointType::Prismatic => {
                if rotations > 0 {
                    return Err(JointErrors::RotationNotAllowed(self.joint_type));
                }
                if translations != 1 {
                    return Err(JointErrors::SingleAxisRequired(self.joint_type, "translation"));
                }
            }
            JointType::Spherical => {
                if translations > 0 {
                    return Err(JointErrors::TranslationNotAllowed(self.joint_type));
                }
                if rotations == 0 {
                    return Err(JointErrors::SphericalAxes);
                }
            }
        }
        Ok(())
    }

    /// Motion subspace columns in the child joint frame, one per DOF.
    pub fn motion_matrix(&self) -> Vec<MotionVector> {
        self.dof_axes().map(|axis| axis.motion()).collect()
    }

    /// Transform from the child joint frame to the parent joint frame for the given
    /// positions. Translations are applied along the parent joint frame axes and
    /// rotations are composed intrinsically in axis order.
    pub fn relative_transform(&self, positions: &[f64]) -> Transform {
        let mut rotation = UnitQuaternion::identity();
        let mut translation = Vector3::zeros();
        for (axis, q) in self.dof_axes().zip(positions.iter()) {
            if axis.is_rotation() {
                rotation *= UnitQuaternion::from_axis_angle(
                    &nalgebra::Unit::new_unchecked(axis.unit()),
                    *q,
                );
            } else {
                translation += axis.unit() * *q;
            }
        }
        Transform::new(rotation, translation)
    }
}

/// Where a link's degrees of freedom live in the flat per-DOF arrays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointCoreData {
    pub offset: usize,
    pub dof_count: usize,
}

impl JointCoreData {
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.dof_count
    }
}

/// Wraps an angle into `[-pi, pi)`.
pub fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    (angle + PI).rem_euclid(TAU) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    const TOL: f64 = 1e-12;

    #[test]
    fn test_validate() {
        let i = Transform::identity();
        assert!(Joint::revolute(Axis::RotZ, i, i).validate().is_ok());
        assert!(Joint::prismatic(Axis::TransX, i, i).validate().is_ok());
        assert!(Joint::spherical(i, i).validate().is_ok());
        assert_eq!(
            Joint::revolute(Axis::TransX, i, i).validate(),
            Err(JointErrors::TranslationNotAllowed(JointType::Revolute))
        );
        assert_eq!(
            Joint::fixed(i, i).with_motion(Axis::RotY, Motion::Free).validate(),
            Err(JointErrors::FixedJointHasDofs)
        );
        assert_eq!(
            Joint::spherical(i, i)
                .with_motion(Axis::RotX, Motion::Locked)
                .with_motion(Axis::RotY, Motion::Locked)
                .with_motion(Axis::RotZ, Motion::Locked)
                .validate(),
            Err(JointErrors::SphericalAxes)
        );
    }

    #[test]
    fn test_limited_axis_is_dof() {
        let i = Transform::identity();
        let joint = Joint::spherical(i, i).with_motion(Axis::RotY, Motion::Limited);
        assert_eq!(joint.dof_count(), 3);
        let joint = joint.with_motion(Axis::RotX, Motion::Locked);
        assert_eq!(joint.dof_count(), 2);
        let axes: Vec<Axis> = joint.dof_axes().collect();
        assert_eq!(axes, vec![Axis::RotY, Axis::RotZ]);
    }

    #[test]
    fn test_relative_transform() {
        let i = Transform::identity();
        let revolute = Joint::revolute(Axis::RotZ, i, i);
        let t = revolute.relative_transform(&[FRAC_PI_2]);
        assert_abs_diff_eq!(
            t.rotate(&Vector3::x()),
            Vector3::y(),
            epsilon = TOL
        );

        let prismatic = Joint::prismatic(Axis::TransY, i, i);
        let t = prismatic.relative_transform(&[2.5]);
        assert_abs_diff_eq!(t.translation, Vector3::new(0.0, 2.5, 0.0), epsilon = TOL);
    }

    #[test]
    fn test_wrap_angle() {
        assert_abs_diff_eq!(wrap_angle(3.0 * PI / 2.0), -FRAC_PI_2, epsilon = TOL);
        assert_abs_diff_eq!(wrap_angle(-3.0 * PI / 2.0), FRAC_PI_2, epsilon = TOL);
        assert_abs_diff_eq!(wrap_angle(PI), -PI, epsilon = TOL);
        assert_abs_diff_eq!(wrap_angle(0.25), 0.25, epsilon = TOL);
    }
}
