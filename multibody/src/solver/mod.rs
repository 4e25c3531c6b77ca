use crate::{MultibodyErrors, articulation::ArticulationData};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use spatial_algebra::{ForceVector, MotionVector};

/// Rows whose unit response falls below this are treated as unsolvable.
const RESPONSE_EPSILON: f64 = 1e-12;

/// One side of a loop constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopAttachment {
    World,
    Link(usize),
}

impl LoopAttachment {
    pub fn link(&self) -> Option<usize> {
        match self {
            LoopAttachment::World => None,
            LoopAttachment::Link(link) => Some(*link),
        }
    }
}

/// A one dimensional velocity constraint between two bodies. The Jacobian terms
/// act on each body's center of mass velocity in world axes, and a unit impulse
/// along the row applies `(angular, linear)` to each body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRow {
    pub linear0: Vector3<f64>,
    pub angular0: Vector3<f64>,
    pub linear1: Vector3<f64>,
    pub angular1: Vector3<f64>,
    pub velocity_target: f64,
    /// Position error, driven out over one step while solving.
    pub geometric_error: f64,
    pub min_impulse: f64,
    pub max_impulse: f64,
}

impl ConstraintRow {
    /// Bilateral row with no target and no error.
    pub fn new(
        linear0: Vector3<f64>,
        angular0: Vector3<f64>,
        linear1: Vector3<f64>,
        angular1: Vector3<f64>,
    ) -> Self {
        Self {
            linear0,
            angular0,
            linear1,
            angular1,
            velocity_target: 0.0,
            geometric_error: 0.0,
            min_impulse: f64::NEG_INFINITY,
            max_impulse: f64::INFINITY,
        }
    }

    pub fn with_velocity_target(mut self, velocity_target: f64) -> Self {
        self.velocity_target = velocity_target;
        self
    }

    pub fn with_geometric_error(mut self, geometric_error: f64) -> Self {
        self.geometric_error = geometric_error;
        self
    }

    pub fn with_impulse_limits(mut self, min_impulse: f64, max_impulse: f64) -> Self {
        self.min_impulse = min_impulse;
        self.max_impulse = max_impulse;
        self
    }

    #[inline]
    pub fn jacobian0(&self) -> ForceVector {
        ForceVector::new(self.angular0, self.linear0)
    }

    #[inline]
    pub fn jacobian1(&self) -> ForceVector {
        ForceVector::new(self.angular1, self.linear1)
    }
}

/// A loop closing constraint: one row between two attachments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopConstraint {
    pub attachment0: LoopAttachment,
    pub attachment1: LoopAttachment,
    pub row: ConstraintRow,
}

/// A prepared constraint with its response and running impulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConstraint {
    pub constraint: LoopConstraint,
    pub inv_response: f64,
    pub target: f64,
    pub applied_impulse: f64,
}

/// Impulse resolved on a constraint by the last solve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConstraintWriteback {
    pub linear_impulse: Vector3<f64>,
    pub angular_impulse: Vector3<f64>,
    pub impulse: f64,
}

pub fn clear_ext_1d(constraint: &mut SolverConstraint) {
    constraint.applied_impulse = 0.0;
}

/// Drops the position correction so the final pass only enforces the velocity target.
pub fn conclude_1d(constraint: &mut SolverConstraint) {
    constraint.target = constraint.constraint.row.velocity_target;
}

pub fn write_back_1d(constraint: &SolverConstraint) -> ConstraintWriteback {
    let row = &constraint.constraint.row;
    ConstraintWriteback {
        linear_impulse: row.linear0 * constraint.applied_impulse,
        angular_impulse: row.angular0 * constraint.applied_impulse,
        impulse: constraint.applied_impulse,
    }
}

impl ArticulationData {
    fn check_attachment(&self, attachment: &LoopAttachment) -> Result<(), MultibodyErrors> {
        match attachment {
            LoopAttachment::World => Ok(()),
            LoopAttachment::Link(link) => self.check_link(*link),
        }
    }

    /// Velocity change of both attachments for a unit impulse along `constraint`.
    pub(crate) fn unit_response(
        &self,
        constraint: &LoopConstraint,
    ) -> (MotionVector, MotionVector) {
        let row = &constraint.row;
        let mut z = vec![ForceVector::zeros(); self.links.len()];
        match (constraint.attachment0.link(), constraint.attachment1.link()) {
            (Some(link0), Some(link1)) => self.get_impulse_self_response_inv(
                link0,
                &row.jacobian0(),
                link1,
                &row.jacobian1(),
                &mut z,
                None,
            ),
            (Some(link0), None) => (
                self.get_impulse_response_inv(link0, &row.jacobian0(), &mut z, None),
                MotionVector::zeros(),
            ),
            (None, Some(link1)) => (
                MotionVector::zeros(),
                self.get_impulse_response_inv(link1, &row.jacobian1(), &mut z, None),
            ),
            (None, None) => (MotionVector::zeros(), MotionVector::zeros()),
        }
    }

    /// Computes each constraint's inverse response and solve target. Position
    /// errors are folded into the target as a velocity over one step.
    pub fn constraint_prep(
        &self,
        constraints: &[LoopConstraint],
    ) -> Result<Vec<SolverConstraint>, MultibodyErrors> {
        self.check_clean("constraint_prep")?;
        constraints
            .iter()
            .map(|constraint| {
                self.check_attachment(&constraint.attachment0)?;
                self.check_attachment(&constraint.attachment1)?;
                let row = &constraint.row;
                let (delta0, delta1) = self.unit_response(constraint);
                let response = delta0.dot(&row.jacobian0()) + delta1.dot(&row.jacobian1());
                let inv_response = if response > RESPONSE_EPSILON {
                    1.0 / response
                } else {
                    tracing::warn!(response, "loop constraint row has no response");
                    0.0
                };
                Ok(SolverConstraint {
                    constraint: *constraint,
                    inv_response,
                    target: row.velocity_target - row.geometric_error / self.dt,
                    applied_impulse: 0.0,
                })
            })
            .collect()
    }

    /// Current velocity along the constraint row.
    pub fn row_velocity(&self, constraint: &LoopConstraint) -> f64 {
        let row = &constraint.row;
        let v0 = constraint
            .attachment0
            .link()
            .map_or(0.0, |link| self.motion_velocities[link].dot(&row.jacobian0()));
        let v1 = constraint
            .attachment1
            .link()
            .map_or(0.0, |link| self.motion_velocities[link].dot(&row.jacobian1()));
        v0 + v1
    }

    /// One projected Gauss-Seidel step on a row. The impulse change is applied to
    /// the articulation right away.
    pub fn solve_ext_1d(&mut self, constraint: &mut SolverConstraint) {
        let row = constraint.constraint.row;
        let velocity = self.row_velocity(&constraint.constraint);
        let unclamped = constraint.applied_impulse
            + (constraint.target - velocity) * constraint.inv_response;
        let accumulated = unclamped.clamp(row.min_impulse, row.max_impulse);
        let delta = accumulated - constraint.applied_impulse;
        constraint.applied_impulse = accumulated;
        if delta == 0.0 {
            return;
        }

        let mut impulses = Vec::with_capacity(2);
        if let Some(link0) = constraint.constraint.attachment0.link() {
            impulses.push((link0, row.jacobian0() * delta));
        }
        if let Some(link1) = constraint.constraint.attachment1.link() {
            impulses.push((link1, row.jacobian1() * delta));
        }
        self.apply_impulses_inner(&impulses);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articulation::tests::planar_chain;
    use approx::assert_abs_diff_eq;

    const TOL: f64 = 1e-9;

    fn tip_on_rail() -> LoopConstraint {
        // holds the last link's center of mass at zero y velocity
        LoopConstraint {
            attachment0: LoopAttachment::Link(2),
            attachment1: LoopAttachment::World,
            row: ConstraintRow::new(
                Vector3::y(),
                Vector3::zeros(),
                Vector3::zeros(),
                Vector3::zeros(),
            ),
        }
    }

    #[test]
    fn test_single_solve_reaches_target() {
        let mut data = planar_chain(2, true);
        data.set_joint_velocities(&[1.0, -0.5]).unwrap();
        let mut prepared = data.constraint_prep(&[tip_on_rail()]).unwrap();
        let constraint = &mut prepared[0];
        assert!(constraint.inv_response > 0.0);
        assert!(data.row_velocity(&constraint.constraint).abs() > 0.1);

        data.solve_ext_1d(constraint);
        assert_abs_diff_eq!(data.row_velocity(&constraint.constraint), 0.0, epsilon = TOL);
        // a second pass has nothing left to do
        let applied = constraint.applied_impulse;
        data.solve_ext_1d(constraint);
        assert_abs_diff_eq!(constraint.applied_impulse, applied, epsilon = TOL);

        let writeback = write_back_1d(constraint);
        assert_abs_diff_eq!(writeback.linear_impulse, Vector3::y() * applied, epsilon = TOL);
    }

    #[test]
    fn test_impulse_limits_clamp() {
        let mut data = planar_chain(2, true);
        data.set_joint_velocities(&[1.0, -0.5]).unwrap();
        let mut constraint = tip_on_rail();
        constraint.row = constraint.row.with_impulse_limits(-0.01, 0.01);
        let mut prepared = data.constraint_prep(&[constraint]).unwrap();
        data.solve_ext_1d(&mut prepared[0]);
        assert!(prepared[0].applied_impulse.abs() <= 0.01 + TOL);
        clear_ext_1d(&mut prepared[0]);
        assert_eq!(prepared[0].applied_impulse, 0.0);
    }

    #[test]
    fn test_geometric_error_biases_target() {
        let data = planar_chain(2, true);
        let constraint = LoopConstraint {
            row: tip_on_rail()
                .row
                .with_velocity_target(0.25)
                .with_geometric_error(0.1),
            ..tip_on_rail()
        };
        let mut prepared = data.constraint_prep(&[constraint]).unwrap();
        assert_abs_diff_eq!(prepared[0].target, 0.25 - 0.1 / data.dt(), epsilon = TOL);
        conclude_1d(&mut prepared[0]);
        assert_abs_diff_eq!(prepared[0].target, 0.25, epsilon = TOL);
    }

    #[test]
    fn test_prep_checks_links() {
        let data = planar_chain(2, true);
        let constraint = LoopConstraint {
            attachment0: LoopAttachment::Link(9),
            ..tip_on_rail()
        };
        assert!(matches!(
            data.constraint_prep(&[constraint]),
            Err(MultibodyErrors::InvalidLink(9))
        ));
    }
}
