use crate::{
    MultibodyErrors,
    algorithms::{
        articulated_body_algorithm::ArticulatedBodyAlgorithm,
        recursive_newton_euler::RecursiveNewtonEuler,
    },
    articulation::ArticulationData,
    cache::{ArticulationCache, CacheFlags},
    scratch::ScratchData,
    solver::{LoopConstraint, clear_ext_1d, conclude_1d, write_back_1d},
};
use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};
use spatial_algebra::{ForceVector, MotionVector};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopSolverSettings {
    pub max_iterations: usize,
    /// Largest multiplier change accepted as converged.
    pub tolerance: f64,
    /// Row solver passes before the concluding pass.
    pub inner_iterations: usize,
}

impl Default for LoopSolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-5,
            inner_iterations: 4,
        }
    }
}

impl ArticulationData {
    /// Fills `cache.coefficient_matrix` with one column per constraint: the joint
    /// forces that reproduce, over one step, the joint velocity change of a unit
    /// impulse along the constraint row.
    pub fn get_coefficient_matrix_with_loop_joints(
        &self,
        constraints: &[LoopConstraint],
        cache: &mut ArticulationCache,
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("get_coefficient_matrix_with_loop_joints")?;
        let link_count = self.links.len();
        let mut coefficients = DMatrix::zeros(self.dof_count, constraints.len());

        for (column, constraint) in constraints.iter().enumerate() {
            let mut z = vec![ForceVector::zeros(); link_count];
            if let Some(link0) = constraint.attachment0.link() {
                self.check_link(link0)?;
                z[link0] -= constraint.row.jacobian0();
            }
            if let Some(link1) = constraint.attachment1.link() {
                self.check_link(link1)?;
                z[link1] -= constraint.row.jacobian1();
            }
            let mut link_delta = vec![MotionVector::zeros(); link_count];
            let mut joint_delta = vec![0.0; self.dof_count];
            self.compute_impulse_response_all(&mut z, &mut link_delta, &mut joint_delta);

            let joint_accelerations: Vec<f64> = joint_delta.iter().map(|dv| dv / self.dt).collect();
            let mut scratch = ScratchData::new(link_count, self.dof_count)
                .with_joint_accelerations(&joint_accelerations);
            if self.fix_base {
                self.inverse_dynamic(&Vector3::zeros(), &mut scratch, false);
            } else {
                self.inverse_dynamic_floating_base(&Vector3::zeros(), &mut scratch, false, false);
            }
            coefficients.set_column(column, &DVector::from_column_slice(&scratch.joint_forces));
        }

        cache.coefficient_matrix = coefficients;
        Ok(())
    }

    /// Iterates the loop constraint multipliers until the row solver stops adding
    /// impulse. Each iteration restarts from `initial_state`, applies
    /// `joint_torque - K lambda` as joint force, takes one unconstrained velocity
    /// step and lets the row solver resolve what is left.
    ///
    /// On return the multipliers are in `cache.lambda` and the matching joint
    /// force in `cache.joint_force`; the articulation is always restored to
    /// `initial_state`. Returns `Ok(false)` when the iteration cap is reached.
    /// `cache.coefficient_matrix` must come from
    /// [`get_coefficient_matrix_with_loop_joints`](Self::get_coefficient_matrix_with_loop_joints)
    /// for the same constraints.
    pub fn get_lambda(
        &mut self,
        constraints: &[LoopConstraint],
        cache: &mut ArticulationCache,
        initial_state: &ArticulationCache,
        joint_torque: &[f64],
        gravity: &Vector3<f64>,
        settings: &LoopSolverSettings,
    ) -> Result<bool, MultibodyErrors> {
        self.check_clean("get_lambda")?;
        self.check_dof_len(joint_torque.len())?;
        self.check_dof_len(cache.joint_force.len())?;
        let coefficients = &cache.coefficient_matrix;
        if coefficients.nrows() != self.dof_count || coefficients.ncols() != constraints.len() {
            return Err(MultibodyErrors::BufferLengthMismatch {
                expected: self.dof_count * constraints.len(),
                actual: coefficients.len(),
            });
        }
        let coefficients = coefficients.clone();
        let torque = DVector::from_column_slice(joint_torque);

        let outcome = self.iterate_lambda(
            constraints,
            &coefficients,
            &torque,
            initial_state,
            gravity,
            settings,
        );
        let restored = self.apply_cache(initial_state, CacheFlags::ALL);
        self.common_init();
        let (converged, lambda) = outcome?;
        restored?;

        let joint_force = &torque - &coefficients * &lambda;
        cache.lambda = lambda.iter().copied().collect();
        cache.joint_force.copy_from_slice(joint_force.as_slice());
        if !converged {
            tracing::warn!(
                iterations = settings.max_iterations,
                "loop joint multipliers did not converge"
            );
        }
        Ok(converged)
    }

    fn iterate_lambda(
        &mut self,
        constraints: &[LoopConstraint],
        coefficients: &DMatrix<f64>,
        torque: &DVector<f64>,
        initial_state: &ArticulationCache,
        gravity: &Vector3<f64>,
        settings: &LoopSolverSettings,
    ) -> Result<(bool, DVector<f64>), MultibodyErrors> {
        let mut lambda = DVector::zeros(constraints.len());
        for iteration in 0..settings.max_iterations {
            self.apply_cache(initial_state, CacheFlags::ALL)?;
            self.common_init();
            let joint_force = torque - coefficients * &lambda;
            self.joint_forces.copy_from_slice(joint_force.as_slice());
            self.compute_unconstrained_velocities(gravity)?;

            let mut prepared = self.constraint_prep(constraints)?;
            prepared.iter_mut().for_each(clear_ext_1d);
            for _ in 0..settings.inner_iterations {
                for constraint in prepared.iter_mut() {
                    self.solve_ext_1d(constraint);
                }
            }
            prepared.iter_mut().for_each(conclude_1d);
            for constraint in prepared.iter_mut() {
                self.solve_ext_1d(constraint);
            }

            let mut max_change = 0.0_f64;
            for (multiplier, constraint) in lambda.iter_mut().zip(prepared.iter()) {
                let impulse = write_back_1d(constraint).impulse;
                *multiplier -= impulse;
                max_change = max_change.max(impulse.abs());
            }
            tracing::debug!(iteration, max_change, "loop joint iteration");
            if max_change < settings.tolerance {
                return Ok((true, lambda));
            }
        }
        Ok((false, lambda))
    }
}
