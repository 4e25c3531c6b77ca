use crate::{
    MultibodyErrors, algorithms::recursive_newton_euler::RecursiveNewtonEuler,
    articulation::ArticulationData, scratch::ScratchData,
};
use nalgebra::{Matrix6, Vector3};
use spatial_algebra::{ForceVector, InverseSpatialInertia, MotionVector, SpatialInertia};

/// Articulated body quantities and forward dynamics.
pub trait ArticulatedBodyAlgorithm {
    fn compute_articulated_spatial_inertia(&mut self);
    fn compute_joint_accelerations(
        &self,
        gravity: &Vector3<f64>,
        joint_forces: &[f64],
        scratch: &mut ScratchData<'_>,
    ) -> Vec<f64>;
    fn compute_unconstrained_velocities(
        &mut self,
        gravity: &Vector3<f64>,
    ) -> Result<(), MultibodyErrors>;
}

impl ArticulatedBodyAlgorithm for ArticulationData {
    /// Inward pass building each link's articulated inertia `Ia`, the products
    /// `IS = Ia S`, `(S^T Ia S)^-1` padded to 6x6 and `IS (S^T Ia S)^-1`.
    fn compute_articulated_spatial_inertia(&mut self) {
        let link_count = self.links.len();
        self.articulated_inertia
            .copy_from_slice(&self.spatial_inertia[..link_count]);

        for i in (1..link_count).rev() {
            let parent = self.links[i].parent;
            let jd = self.joint_data[i];
            let ia = self.articulated_inertia[i];

            for k in jd.range() {
                self.is_w[k] = ia * self.world_motion_matrix[k];
            }

            let mut d = Matrix6::identity();
            for (a, k) in jd.range().enumerate() {
                for (b, l) in jd.range().enumerate() {
                    d[(a, b)] = self.world_motion_matrix[k].dot(&self.is_w[l]);
                }
            }
            let inv_d = d.try_inverse().unwrap_or_else(|| {
                tracing::warn!(link = i, "joint space articulated inertia is singular");
                Matrix6::zeros()
            });
            self.inv_st_is[i] = inv_d;

            let mut reduced = ia.matrix();
            for (b, k) in jd.range().enumerate() {
                let mut is_inv_d = ForceVector::zeros();
                for (a, l) in jd.range().enumerate() {
                    is_inv_d += self.is_w[l] * inv_d[(a, b)];
                }
                self.is_inv_d[k] = is_inv_d;
                reduced -= is_inv_d.vector() * self.is_w[k].vector().transpose();
            }
            self.articulated_inertia[parent] +=
                SpatialInertia::from_matrix(&reduced).translate(&self.rw[i]);
        }

        self.base_inv_articulated_inertia = if self.fix_base {
            InverseSpatialInertia::zeros()
        } else {
            self.articulated_inertia[0].inverse().unwrap_or_else(|| {
                tracing::warn!("root articulated inertia is singular, root will not respond");
                InverseSpatialInertia::zeros()
            })
        };
    }

    /// Joint accelerations produced by `joint_forces` with the velocities and
    /// external accelerations in `scratch`. The root acceleration is left in
    /// `scratch.motion_accelerations[0]`.
    fn compute_joint_accelerations(
        &self,
        gravity: &Vector3<f64>,
        joint_forces: &[f64],
        scratch: &mut ScratchData<'_>,
    ) -> Vec<f64> {
        let link_count = self.links.len();
        self.compute_link_velocities(scratch);
        self.compute_coriolis_terms(scratch);
        self.compute_z(gravity, scratch);

        let mut u = vec![0.0; self.dof_count];
        for i in (1..link_count).rev() {
            let parent = self.links[i].parent;
            let bias = scratch.spatial_za_vectors[i];
            let c = scratch.coriolis_vectors[i];
            let mut p = bias + self.articulated_inertia[i] * c;
            for k in self.joint_data[i].range() {
                u[k] = joint_forces[k] - self.world_motion_matrix[k].dot(&bias);
                p += self.is_inv_d[k] * (u[k] - self.is_w[k].dot(&c));
            }
            scratch.spatial_za_vectors[parent] += p.translate(&self.rw[i]);
        }

        scratch.motion_accelerations[0] = if self.fix_base {
            MotionVector::zeros()
        } else {
            -(self.base_inv_articulated_inertia * scratch.spatial_za_vectors[0])
        };

        let mut joint_accelerations = vec![0.0; self.dof_count];
        for i in 1..link_count {
            let parent = self.links[i].parent;
            let jd = self.joint_data[i];
            let a_prime = scratch.motion_accelerations[parent].translate(&-self.rw[i])
                + scratch.coriolis_vectors[i];
            let inv_d = self.inv_st_is[i];
            let mut a = a_prime;
            for (r, k) in jd.range().enumerate() {
                let mut qdd = 0.0;
                for (s, l) in jd.range().enumerate() {
                    qdd += inv_d[(r, s)] * (u[l] - self.is_w[l].dot(&a_prime));
                }
                joint_accelerations[k] = qdd;
            }
            for k in jd.range() {
                a += self.world_motion_matrix[k] * joint_accelerations[k];
            }
            scratch.motion_accelerations[i] = a;
        }
        joint_accelerations
    }

    /// Integrates the stored joint forces, gravity and external accelerations over
    /// one step into joint and root velocities.
    fn compute_unconstrained_velocities(
        &mut self,
        gravity: &Vector3<f64>,
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("compute_unconstrained_velocities")?;
        let (joint_accelerations, root_acceleration) = {
            let mut scratch = ScratchData::new(self.links.len(), self.dof_count)
                .with_joint_velocities(&self.joint_velocities)
                .with_external_accelerations(&self.external_accelerations);
            let qdd = self.compute_joint_accelerations(gravity, &self.joint_forces, &mut scratch);
            (qdd, scratch.motion_accelerations[0])
        };

        let dt = self.dt;
        for (v, a) in self.joint_velocities.iter_mut().zip(joint_accelerations.iter()) {
            *v += a * dt;
        }
        self.joint_accelerations = joint_accelerations;
        if !self.fix_base {
            self.root_velocity += root_acceleration * dt;
        }
        self.update_link_velocities();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articulation::tests::{planar_chain, random_tree};
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    const TOL: f64 = 1e-8;

    fn random_forces(seed: u64, n: usize) -> Vec<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..n).map(|_| rng.random_range(-5.0..5.0)).collect()
    }

    #[test]
    fn test_inverse_of_forward_dynamics_fixed_base() {
        let gravity = Vector3::new(0.0, 0.0, -9.81);
        let data = random_tree(21, 8, true);
        let tau = random_forces(1, data.dof_count());
        let velocities = data.joint_velocities().to_vec();

        let mut fd = ScratchData::new(data.link_count(), data.dof_count())
            .with_joint_velocities(&velocities);
        let qdd = data.compute_joint_accelerations(&gravity, &tau, &mut fd);

        let mut id = ScratchData::new(data.link_count(), data.dof_count())
            .with_joint_velocities(&velocities)
            .with_joint_accelerations(&qdd);
        data.inverse_dynamic(&gravity, &mut id, true);
        for k in 0..data.dof_count() {
            assert_abs_diff_eq!(id.joint_forces[k], tau[k], epsilon = TOL);
        }
    }

    #[test]
    fn test_inverse_of_forward_dynamics_floating_base() {
        let gravity = Vector3::new(0.0, -9.81, 0.0);
        let data = random_tree(4, 7, false);
        let tau = random_forces(2, data.dof_count());
        let velocities = data.joint_velocities().to_vec();

        let mut fd = ScratchData::new(data.link_count(), data.dof_count())
            .with_joint_velocities(&velocities);
        let qdd = data.compute_joint_accelerations(&gravity, &tau, &mut fd);

        let mut id = ScratchData::new(data.link_count(), data.dof_count())
            .with_joint_velocities(&velocities)
            .with_joint_accelerations(&qdd);
        data.inverse_dynamic_floating_base(&gravity, &mut id, true, false);
        for k in 0..data.dof_count() {
            assert_abs_diff_eq!(id.joint_forces[k], tau[k], epsilon = TOL);
        }
        assert_abs_diff_eq!(
            id.motion_accelerations[0].vector(),
            fd.motion_accelerations[0].vector(),
            epsilon = TOL
        );
    }

    #[test]
    fn test_unconstrained_velocities_under_gravity() {
        let mut data = planar_chain(1, true);
        let gravity = Vector3::new(0.0, -9.81, 0.0);
        data.compute_unconstrained_velocities(&gravity).unwrap();
        // a rod hinged at one end: qdd = -m g (L/2) / (m L^2 / 3)
        let expected = -9.81 * 0.5 / (1.0 / 3.0) * data.dt();
        assert_abs_diff_eq!(data.joint_velocities()[0], expected, epsilon = 1e-9);

        data.set_joint_positions(&[0.2]).unwrap();
        assert!(matches!(
            data.compute_unconstrained_velocities(&gravity),
            Err(MultibodyErrors::DataDirty(_))
        ));
    }
}
