use crate::{
    MultibodyErrors,
    algorithms::{
        composite_rigid_body::CompositeRigidBody, recursive_newton_euler::RecursiveNewtonEuler,
    },
    articulation::ArticulationData,
    cache::ArticulationCache,
    scratch::ScratchData,
};
use nalgebra::{DMatrix, DVector, Vector3};
use spatial_algebra::{ForceVector, MotionVector, skew};

/// Largest difference allowed between the direct and composite mass matrices.
pub const MASS_MATRIX_CROSS_CHECK_TOLERANCE: f64 = 5e-3;

/// Writes root rows (linear first) followed by the joint rows.
fn with_root_rows(root: Option<&ForceVector>, joint_forces: &[f64]) -> DVector<f64> {
    let root_dof = if root.is_some() { 6 } else { 0 };
    let mut out = DVector::zeros(joint_forces.len() + root_dof);
    if let Some(root) = root {
        out.rows_mut(0, 6).copy_from(&root.to_linear_first());
    }
    out.rows_mut(root_dof, joint_forces.len())
        .copy_from_slice(joint_forces);
    out
}

/// Dynamics queries that fill an `ArticulationCache`. Every driver needs the
/// data refreshed by `common_init` after the last position change.
impl ArticulationData {
    /// Joint forces that hold the articulation still against `gravity`.
    ///
    /// With `root_motion` the result goes to `gravity_compensation_force`, led by
    /// the six root rows for a floating base. Otherwise it goes to `joint_force`;
    /// a free floating base simply falls and needs no joint force.
    pub fn compute_generalized_gravity_force(
        &self,
        gravity: &Vector3<f64>,
        cache: &mut ArticulationCache,
        root_motion: bool,
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("compute_generalized_gravity_force")?;
        self.check_dof_len(cache.joint_force.len())?;
        let mut scratch = ScratchData::new(self.links.len(), self.dof_count);
        if self.fix_base || root_motion {
            for (z, link) in scratch.spatial_za_vectors.iter_mut().zip(self.links.iter()) {
                *z = ForceVector::new(Vector3::zeros(), -link.mass_properties.mass() * gravity);
            }
            self.compute_generalized_force_inv(&mut scratch);
        } else {
            self.inverse_dynamic_floating_base(gravity, &mut scratch, false, false);
        }

        if root_motion {
            let root = (!self.fix_base).then_some(&scratch.spatial_za_vectors[0]);
            cache.gravity_compensation_force = with_root_rows(root, &scratch.joint_forces);
        } else {
            cache.joint_force.copy_from_slice(&scratch.joint_forces);
        }
        Ok(())
    }

    /// Velocity product forces for `cache.joint_velocity` and the current root
    /// velocity. With `root_motion` the root is held still and the result goes to
    /// `coriolis_force`, led by the root rows for a floating base.
    pub fn compute_coriolis_and_centrifugal_force(
        &self,
        cache: &mut ArticulationCache,
        root_motion: bool,
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("compute_coriolis_and_centrifugal_force")?;
        self.check_dof_len(cache.joint_velocity.len())?;
        self.check_dof_len(cache.joint_force.len())?;
        let (joint_forces, root) = {
            let mut scratch = ScratchData::new(self.links.len(), self.dof_count)
                .with_joint_velocities(&cache.joint_velocity);
            if self.fix_base {
                self.inverse_dynamic(&Vector3::zeros(), &mut scratch, true);
            } else {
                self.inverse_dynamic_floating_base(
                    &Vector3::zeros(),
                    &mut scratch,
                    true,
                    root_motion,
                );
            }
            (scratch.joint_forces, scratch.spatial_za_vectors[0])
        };

        if root_motion {
            let root = (!self.fix_base).then_some(&root);
            cache.coriolis_force = with_root_rows(root, &joint_forces);
        } else {
            cache.joint_force.copy_from_slice(&joint_forces);
        }
        Ok(())
    }

    /// Joint forces that cancel `cache.external_forces`, written to `joint_force`.
    pub fn compute_generalized_external_force(
        &self,
        cache: &mut ArticulationCache,
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("compute_generalized_external_force")?;
        self.check_dof_len(cache.joint_force.len())?;
        if cache.external_forces.len() != self.links.len() {
            return Err(MultibodyErrors::BufferLengthMismatch {
                expected: self.links.len(),
                actual: cache.external_forces.len(),
            });
        }
        let accelerations: Vec<MotionVector> = self
            .links
            .iter()
            .zip(cache.external_forces.iter())
            .enumerate()
            .map(|(index, (link, external))| {
                let inverse_inertia = link
                    .mass_properties
                    .world_inverse_inertia(&self.body_to_world[index].rotation);
                MotionVector::new(
                    inverse_inertia * external.torque,
                    external.force * link.mass_properties.inverse_mass,
                )
            })
            .collect();

        let mut scratch = ScratchData::new(self.links.len(), self.dof_count)
            .with_external_accelerations(&accelerations);
        if self.fix_base {
            self.inverse_dynamic(&Vector3::zeros(), &mut scratch, false);
        } else {
            self.inverse_dynamic_floating_base(&Vector3::zeros(), &mut scratch, false, false);
        }
        cache.joint_force.copy_from_slice(&scratch.joint_forces);
        Ok(())
    }

    /// Joint forces producing `cache.joint_acceleration` from rest without gravity,
    /// written to `joint_force`.
    pub fn compute_joint_force(
        &self,
        cache: &mut ArticulationCache,
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("compute_joint_force")?;
        self.check_dof_len(cache.joint_acceleration.len())?;
        self.check_dof_len(cache.joint_force.len())?;
        let joint_forces = {
            let mut scratch = ScratchData::new(self.links.len(), self.dof_count)
                .with_joint_accelerations(&cache.joint_acceleration);
            if self.fix_base {
                self.inverse_dynamic(&Vector3::zeros(), &mut scratch, false);
            } else {
                self.inverse_dynamic_floating_base(&Vector3::zeros(), &mut scratch, false, false);
            }
            scratch.joint_forces
        };
        cache.joint_force.copy_from_slice(&joint_forces);
        Ok(())
    }

    /// Joint space mass matrix, one inverse dynamics solve per column.
    pub fn compute_generalized_mass_matrix(
        &self,
        cache: &mut ArticulationCache,
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("compute_generalized_mass_matrix")?;
        cache.mass_matrix = self.mass_matrix_direct();
        Ok(())
    }

    fn mass_matrix_direct(&self) -> DMatrix<f64> {
        let dofs = self.dof_count;
        let mut mass_matrix = DMatrix::zeros(dofs, dofs);
        let mut accelerations = vec![0.0; dofs];
        for col in 0..dofs {
            accelerations.fill(0.0);
            accelerations[col] = 1.0;
            let mut scratch = ScratchData::new(self.links.len(), dofs)
                .with_joint_accelerations(&accelerations);
            if self.fix_base {
                self.calculate_mass_matrix_col_inv(&mut scratch);
            } else {
                self.inverse_dynamic_floating_base(&Vector3::zeros(), &mut scratch, false, false);
            }
            mass_matrix
                .column_mut(col)
                .copy_from_slice(&scratch.joint_forces);
        }
        mass_matrix
    }

    /// Joint space mass matrix from composite inertias. With `root_motion` on a
    /// floating base the matrix gains six leading root rows and columns.
    pub fn compute_generalized_mass_matrix_crb(
        &self,
        cache: &mut ArticulationCache,
        root_motion: bool,
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("compute_generalized_mass_matrix_crb")?;
        let mut scratch = ScratchData::new(self.links.len(), self.dof_count);
        cache.mass_matrix = if self.fix_base {
            self.calculate_h_fix_base(&mut scratch)
        } else {
            self.calculate_h_floating_base(&mut scratch, root_motion)
        };
        Ok(())
    }

    /// Largest absolute difference between the direct and composite mass
    /// matrices. Compare against `MASS_MATRIX_CROSS_CHECK_TOLERANCE`.
    pub fn cross_check_mass_matrix(&self) -> Result<f64, MultibodyErrors> {
        self.check_clean("cross_check_mass_matrix")?;
        let direct = self.mass_matrix_direct();
        let mut scratch = ScratchData::new(self.links.len(), self.dof_count);
        let crb = if self.fix_base {
            self.calculate_h_fix_base(&mut scratch)
        } else {
            self.calculate_h_floating_base(&mut scratch, false)
        };
        let difference = (direct - crb).amax();
        if difference > MASS_MATRIX_CROSS_CHECK_TOLERANCE {
            tracing::warn!(difference, "mass matrix methods disagree");
        }
        Ok(difference)
    }

    /// Mass weighted center of the finite mass links, in world frame or in the
    /// root link's frame.
    pub fn compute_articulation_com(
        &self,
        root_frame: bool,
    ) -> Result<Vector3<f64>, MultibodyErrors> {
        self.check_clean("compute_articulation_com")?;
        let mut total_mass = 0.0;
        let mut weighted = Vector3::zeros();
        for (link, pose) in self.links.iter().zip(self.body_to_world.iter()) {
            if link.mass_properties.is_infinite() {
                continue;
            }
            let mass = link.mass_properties.mass();
            total_mass += mass;
            weighted += pose.translation * mass;
        }
        if total_mass <= 0.0 {
            return Err(MultibodyErrors::ZeroTotalMass);
        }
        let com = weighted / total_mass;
        Ok(if root_frame {
            self.root_pose.inv().transform_point(&com)
        } else {
            com
        })
    }

    /// Maps root and joint velocities to linear and angular momentum about the
    /// articulation's center of mass. Needs the root motion mass matrix and
    /// Coriolis force already in `cache`.
    pub fn compute_centroidal_momentum_matrix(
        &self,
        cache: &mut ArticulationCache,
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("compute_centroidal_momentum_matrix")?;
        if self.fix_base {
            return Err(MultibodyErrors::FixedBaseUnsupported(
                "compute_centroidal_momentum_matrix",
            ));
        }
        let size = self.dof_count + 6;
        let h = &cache.mass_matrix;
        if h.nrows() != size || h.ncols() != size {
            return Err(MultibodyErrors::BufferLengthMismatch {
                expected: size,
                actual: h.nrows().max(h.ncols()),
            });
        }
        if cache.coriolis_force.len() != size {
            return Err(MultibodyErrors::BufferLengthMismatch {
                expected: size,
                actual: cache.coriolis_force.len(),
            });
        }

        let mass = h[(2, 2)];
        if mass <= 0.0 {
            return Err(MultibodyErrors::ZeroTotalMass);
        }
        // offset of the center of mass from the root, read from the coupling block
        let offset = -Vector3::new(h[(2, 4)], h[(0, 5)], h[(1, 3)]) / mass;
        let shift = skew(&offset);

        let mut matrix = h.rows(0, 6).into_owned();
        for col in 0..size {
            let linear = Vector3::new(h[(0, col)], h[(1, col)], h[(2, col)]);
            let moment = shift * linear;
            for r in 0..3 {
                matrix[(3 + r, col)] -= moment[r];
            }
        }

        let c = &cache.coriolis_force;
        let moment = shift * Vector3::new(c[0], c[1], c[2]);
        let mut bias = c.fixed_rows::<6>(0).into_owned();
        for r in 0..3 {
            bias[3 + r] -= moment[r];
        }

        cache.centroidal_momentum_matrix = matrix;
        cache.centroidal_momentum_bias = bias;
        Ok(())
    }
}
