use crate::{articulation::ArticulationData, scratch::ScratchData};
use nalgebra::Vector3;
use spatial_algebra::{ForceVector, MotionVector};

/// Recursive Newton-Euler inverse dynamics over an articulation.
///
/// All spatial quantities are taken at each link's center of mass in world axes.
/// Results land in the scratch buffers, generalized forces in `scratch.joint_forces`.
pub trait RecursiveNewtonEuler {
    fn compute_link_velocities(&self, scratch: &mut ScratchData<'_>);
    fn compute_coriolis_terms(&self, scratch: &mut ScratchData<'_>);
    fn compute_z(&self, gravity: &Vector3<f64>, scratch: &mut ScratchData<'_>);
    fn compute_link_acceleration_inv(&self, scratch: &mut ScratchData<'_>);
    fn compute_za_force_inv(&self, scratch: &mut ScratchData<'_>);
    fn compute_generalized_force_inv(&self, scratch: &mut ScratchData<'_>);
    fn init_composite_spatial_inertia(&self, scratch: &mut ScratchData<'_>);
    fn compute_composite_spatial_inertia_and_za_force_inv(&self, scratch: &mut ScratchData<'_>);
    fn compute_relative_generalized_force_inv(
        &self,
        scratch: &mut ScratchData<'_>,
        coriolis_floating_base: bool,
    );
    fn inverse_dynamic(
        &self,
        gravity: &Vector3<f64>,
        scratch: &mut ScratchData<'_>,
        compute_coriolis: bool,
    );
    fn inverse_dynamic_floating_base(
        &self,
        gravity: &Vector3<f64>,
        scratch: &mut ScratchData<'_>,
        compute_coriolis: bool,
        root_motion: bool,
    );
    fn calculate_mass_matrix_col_inv(&self, scratch: &mut ScratchData<'_>);
}

impl RecursiveNewtonEuler for ArticulationData {
    /// Without joint velocities every link, root included, is at rest.
    fn compute_link_velocities(&self, scratch: &mut ScratchData<'_>) {
        let Some(joint_velocities) = scratch.joint_velocities else {
            scratch.motion_velocities.fill(MotionVector::zeros());
            return;
        };
        scratch.motion_velocities[0] = if self.fix_base {
            MotionVector::zeros()
        } else {
            self.root_velocity
        };
        for i in 1..self.links.len() {
            let parent = self.links[i].parent;
            scratch.motion_velocities[i] =
                self.link_velocity(i, &scratch.motion_velocities[parent], Some(joint_velocities));
        }
    }

    /// Velocity product accelerations of each link's center of mass. Angular part
    /// `w_p x w_J`, linear part `w_p x (w_p x rw) + 2 w_p x v_J + w_J x v_J`.
    fn compute_coriolis_terms(&self, scratch: &mut ScratchData<'_>) {
        scratch.coriolis_vectors[0] = MotionVector::zeros();
        for i in 1..self.links.len() {
            let parent = self.links[i].parent;
            let w_p = scratch.motion_velocities[parent].rotation();
            let mut joint_motion = MotionVector::zeros();
            if let Some(joint_velocities) = scratch.joint_velocities {
                for k in self.joint_data[i].range() {
                    joint_motion += self.world_motion_matrix[k] * joint_velocities[k];
                }
            }
            let w_j = joint_motion.rotation();
            let v_j = joint_motion.translation();
            let rw = self.rw[i];
            scratch.coriolis_vectors[i] = MotionVector::new(
                w_p.cross(&w_j),
                w_p.cross(&w_p.cross(&rw)) + 2.0 * w_p.cross(&v_j) + w_j.cross(&v_j),
            );
        }
    }

    /// Bias force of each link with the sign of a reaction: gyroscopic torque and
    /// the force that cancels gravity and any external acceleration.
    fn compute_z(&self, gravity: &Vector3<f64>, scratch: &mut ScratchData<'_>) {
        for i in 0..self.links.len() {
            let mass = self.links[i].mass_properties.mass();
            let inertia = self.spatial_inertia[i].rotation;
            let w = scratch.motion_velocities[i].rotation();
            let external = scratch
                .external_accelerations
                .map_or(MotionVector::zeros(), |e| e[i]);
            scratch.spatial_za_vectors[i] = ForceVector::new(
                w.cross(&(inertia * w)) - inertia * external.rotation(),
                -mass * (gravity + external.translation()),
            );
        }
    }

    fn compute_link_acceleration_inv(&self, scratch: &mut ScratchData<'_>) {
        scratch.motion_accelerations[0] = MotionVector::zeros();
        for i in 1..self.links.len() {
            let parent = self.links[i].parent;
            let mut a = scratch.motion_accelerations[parent].translate(&-self.rw[i])
                + scratch.coriolis_vectors[i];
            if let Some(joint_accelerations) = scratch.joint_accelerations {
                for k in self.joint_data[i].range() {
                    a += self.world_motion_matrix[k] * joint_accelerations[k];
                }
            }
            scratch.motion_accelerations[i] = a;
        }
    }

    /// Adds the inertial force `I a` of each link. Infinite mass links have zero
    /// spatial inertia and add nothing.
    fn compute_za_force_inv(&self, scratch: &mut ScratchData<'_>) {
        for i in 0..self.links.len() {
            let inertial = self.spatial_inertia[i] * scratch.motion_accelerations[i];
            scratch.spatial_za_vectors[i] += inertial;
        }
    }

    /// Inward pass accumulating forces into parents and projecting each link's
    /// force onto its joint axes.
    fn compute_generalized_force_inv(&self, scratch: &mut ScratchData<'_>) {
        for i in (1..self.links.len()).rev() {
            let parent = self.links[i].parent;
            let z = scratch.spatial_za_vectors[i];
            scratch.spatial_za_vectors[parent] += z.translate(&self.rw[i]);
            for k in self.joint_data[i].range() {
                scratch.joint_forces[k] = self.world_motion_matrix[k].dot(&z);
            }
        }
    }

    fn init_composite_spatial_inertia(&self, scratch: &mut ScratchData<'_>) {
        scratch
            .composite_spatial_inertias
            .copy_from_slice(&self.spatial_inertia);
    }

    fn compute_composite_spatial_inertia_and_za_force_inv(&self, scratch: &mut ScratchData<'_>) {
        for i in (1..self.links.len()).rev() {
            let parent = self.links[i].parent;
            let rw = self.rw[i];
            let inertia = scratch.composite_spatial_inertias[i].translate(&rw);
            scratch.composite_spatial_inertias[parent] += inertia;
            let z = scratch.spatial_za_vectors[i].translate(&rw);
            scratch.spatial_za_vectors[parent] += z;
        }
    }

    /// Solves for the root acceleration that leaves the root free, unless
    /// `coriolis_floating_base` holds the root still, then adds the root's rigid
    /// motion to every link and projects the composite forces onto the joints.
    fn compute_relative_generalized_force_inv(
        &self,
        scratch: &mut ScratchData<'_>,
        coriolis_floating_base: bool,
    ) {
        let root_acceleration = if coriolis_floating_base {
            MotionVector::zeros()
        } else {
            match scratch.composite_spatial_inertias[0].inverse() {
                Some(inverse) => -(inverse * scratch.spatial_za_vectors[0]),
                None => {
                    tracing::warn!("composite root inertia is singular, holding the root still");
                    MotionVector::zeros()
                }
            }
        };

        let link_count = self.links.len();
        let mut root_accelerations = vec![MotionVector::zeros(); link_count];
        root_accelerations[0] = root_acceleration;
        scratch.spatial_za_vectors[0] += scratch.composite_spatial_inertias[0] * root_acceleration;
        scratch.motion_accelerations[0] += root_acceleration;
        for i in 1..link_count {
            let parent = self.links[i].parent;
            let a = root_accelerations[parent].translate(&-self.rw[i]);
            root_accelerations[i] = a;
            scratch.motion_accelerations[i] += a;
            let z = scratch.composite_spatial_inertias[i] * a + scratch.spatial_za_vectors[i];
            scratch.spatial_za_vectors[i] = z;
            for k in self.joint_data[i].range() {
                scratch.joint_forces[k] = self.world_motion_matrix[k].dot(&z);
            }
        }
    }

    /// Joint forces that produce the requested joint accelerations on a fixed base.
    fn inverse_dynamic(
        &self,
        gravity: &Vector3<f64>,
        scratch: &mut ScratchData<'_>,
        compute_coriolis: bool,
    ) {
        self.compute_link_velocities(scratch);
        if compute_coriolis {
            self.compute_coriolis_terms(scratch);
        } else {
            scratch.coriolis_vectors.fill(MotionVector::zeros());
        }
        self.compute_z(gravity, scratch);
        self.compute_link_acceleration_inv(scratch);
        self.compute_za_force_inv(scratch);
        self.compute_generalized_force_inv(scratch);
    }

    /// Joint forces that produce the requested joint accelerations while the root
    /// moves freely in response. With `root_motion` and `compute_coriolis` the root
    /// is held and `spatial_za_vectors[0]` carries the force needed to hold it.
    fn inverse_dynamic_floating_base(
        &self,
        gravity: &Vector3<f64>,
        scratch: &mut ScratchData<'_>,
        compute_coriolis: bool,
        root_motion: bool,
    ) {
        self.compute_link_velocities(scratch);
        if compute_coriolis {
            self.compute_coriolis_terms(scratch);
        } else {
            scratch.coriolis_vectors.fill(MotionVector::zeros());
        }
        self.compute_z(gravity, scratch);
        self.compute_link_acceleration_inv(scratch);
        self.compute_za_force_inv(scratch);
        self.init_composite_spatial_inertia(scratch);
        self.compute_composite_spatial_inertia_and_za_force_inv(scratch);
        self.compute_relative_generalized_force_inv(scratch, compute_coriolis && root_motion);
    }

    /// One column of the fixed base mass matrix: the forces for the joint
    /// accelerations in `scratch` with no velocity, gravity or external terms.
    fn calculate_mass_matrix_col_inv(&self, scratch: &mut ScratchData<'_>) {
        scratch.motion_accelerations[0] = MotionVector::zeros();
        scratch.spatial_za_vectors[0] = ForceVector::zeros();
        for i in 1..self.links.len() {
            let parent = self.links[i].parent;
            let mut a = scratch.motion_accelerations[parent].translate(&-self.rw[i]);
            if let Some(joint_accelerations) = scratch.joint_accelerations {
                for k in self.joint_data[i].range() {
                    a += self.world_motion_matrix[k] * joint_accelerations[k];
                }
            }
            scratch.motion_accelerations[i] = a;
            scratch.spatial_za_vectors[i] = self.spatial_inertia[i] * a;
        }
        self.compute_generalized_force_inv(scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articulation::{ArticulationBuilder, tests::planar_chain};
    use crate::joint::{Axis, Joint};
    use approx::assert_abs_diff_eq;
    use mass_properties::MassProperties;
    use transforms::Transform;

    const TOL: f64 = 1e-9;
    const G: f64 = 9.81;

    /// Point-like pendulum of length `length` hinged about z at the world origin.
    fn pendulum(mass: f64, length: f64, angle: f64) -> ArticulationData {
        let mut builder =
            ArticulationBuilder::new("base", MassProperties::infinite()).with_fix_base(true);
        builder
            .add_link(
                "bob",
                0,
                Joint::revolute(
                    Axis::RotZ,
                    Transform::identity(),
                    Transform::from_translation(Vector3::new(-length, 0.0, 0.0)),
                ),
                MassProperties::new(mass, Vector3::new(1e-6, 1e-6, 1e-6)).unwrap(),
            )
            .unwrap();
        let mut data = builder.build().unwrap();
        data.set_joint_positions(&[angle]).unwrap();
        data.common_init();
        data
    }

    #[test]
    fn test_pendulum_gravity_compensation() {
        let (mass, length) = (2.0, 1.5);
        let gravity = Vector3::new(0.0, -G, 0.0);
        for angle in [0.0, 0.3, 1.2, -2.0] {
            let data = pendulum(mass, length, angle);
            let mut scratch = ScratchData::new(data.link_count(), data.dof_count());
            data.inverse_dynamic(&gravity, &mut scratch, false);
            assert_abs_diff_eq!(
                scratch.joint_forces[0],
                mass * G * length * angle.cos(),
                epsilon = TOL
            );
        }
    }

    #[test]
    fn test_pendulum_centripetal_has_no_joint_torque() {
        // steady spin about the hinge needs no torque, only a radial force
        let data = pendulum(2.0, 1.0, 0.4);
        let velocities = [3.0];
        let mut scratch = ScratchData::new(data.link_count(), data.dof_count())
            .with_joint_velocities(&velocities);
        data.inverse_dynamic(&Vector3::zeros(), &mut scratch, true);
        assert_abs_diff_eq!(scratch.joint_forces[0], 0.0, epsilon = TOL);
        // the base carries the centripetal force m w^2 L toward the bob
        let base_force = scratch.spatial_za_vectors[0].translation();
        let bob = data.body_to_world(1).unwrap().translation;
        assert_abs_diff_eq!(base_force, -2.0 * 9.0 * bob, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_state_zero_force() {
        let data = planar_chain(4, true);
        let mut scratch = ScratchData::new(data.link_count(), data.dof_count());
        data.inverse_dynamic(&Vector3::zeros(), &mut scratch, true);
        for tau in scratch.joint_forces.iter() {
            assert_abs_diff_eq!(*tau, 0.0, epsilon = TOL);
        }
    }

    #[test]
    fn test_floating_base_free_fall_needs_no_force() {
        let data = planar_chain(3, false);
        let mut scratch = ScratchData::new(data.link_count(), data.dof_count());
        data.inverse_dynamic_floating_base(&Vector3::new(0.0, -G, 0.0), &mut scratch, false, false);
        for tau in scratch.joint_forces.iter() {
            assert_abs_diff_eq!(*tau, 0.0, epsilon = TOL);
        }
        // every link falls with gravity
        for a in scratch.motion_accelerations.iter() {
            assert_abs_diff_eq!(a.translation(), Vector3::new(0.0, -G, 0.0), epsilon = TOL);
            assert_abs_diff_eq!(a.rotation(), Vector3::zeros(), epsilon = TOL);
        }
    }

    #[test]
    fn test_mass_matrix_col_matches_inverse_dynamic() {
        let data = planar_chain(3, true);
        let accelerations = [0.3, -1.2, 0.7];
        let mut by_col = ScratchData::new(data.link_count(), data.dof_count())
            .with_joint_accelerations(&accelerations);
        data.calculate_mass_matrix_col_inv(&mut by_col);
        let mut by_id = ScratchData::new(data.link_count(), data.dof_count())
            .with_joint_accelerations(&accelerations);
        data.inverse_dynamic(&Vector3::zeros(), &mut by_id, false);
        for k in 0..data.dof_count() {
            assert_abs_diff_eq!(by_col.joint_forces[k], by_id.joint_forces[k], epsilon = TOL);
        }
    }
}
