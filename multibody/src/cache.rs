use crate::{
    MultibodyErrors,
    articulation::ArticulationData,
    joint::{JointType, MAX_DOF, wrap_angle},
};
use nalgebra::{DMatrix, DVector, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use spatial_algebra::MotionVector;
use transforms::Transform;

bitflags::bitflags! {
    /// Selects which parts of an `ArticulationCache` are read or written.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CacheFlags: u32 {
        const VELOCITY = 1 << 0;
        const ACCELERATION = 1 << 1;
        const POSITION = 1 << 2;
        const FORCE = 1 << 3;
        const LINK_FORCE = 1 << 4;
        const LINK_TORQUE = 1 << 5;
        const ROOT_TRANSFORM = 1 << 6;
        const ROOT_VELOCITIES = 1 << 7;
        const JOINT_TARGET_POSITIONS = 1 << 8;
        const JOINT_TARGET_VELOCITIES = 1 << 9;
        const ALL = Self::VELOCITY.bits()
            | Self::ACCELERATION.bits()
            | Self::POSITION.bits()
            | Self::FORCE.bits()
            | Self::LINK_FORCE.bits()
            | Self::LINK_TORQUE.bits()
            | Self::ROOT_TRANSFORM.bits()
            | Self::ROOT_VELOCITIES.bits()
            | Self::JOINT_TARGET_POSITIONS.bits()
            | Self::JOINT_TARGET_VELOCITIES.bits();
    }
}

/// Force and torque applied at a link's center of mass, in world axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialForce {
    pub force: Vector3<f64>,
    pub torque: Vector3<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RootLinkData {
    pub transform: Transform,
    pub world_lin_vel: Vector3<f64>,
    pub world_ang_vel: Vector3<f64>,
}

/// User facing snapshot of articulation state plus the outputs of the dynamics
/// drivers. Per-DOF arrays follow the articulation's flat DOF layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticulationCache {
    pub joint_velocity: Vec<f64>,
    pub joint_acceleration: Vec<f64>,
    pub joint_position: Vec<f64>,
    pub joint_force: Vec<f64>,
    pub joint_target_positions: Vec<f64>,
    pub joint_target_velocities: Vec<f64>,
    pub external_forces: Vec<SpatialForce>,
    pub link_force: Vec<Vector3<f64>>,
    pub link_torque: Vec<Vector3<f64>>,
    pub root_link_data: RootLinkData,
    pub mass_matrix: DMatrix<f64>,
    pub coefficient_matrix: DMatrix<f64>,
    pub centroidal_momentum_matrix: DMatrix<f64>,
    pub centroidal_momentum_bias: Vector6<f64>,
    pub coriolis_force: DVector<f64>,
    pub gravity_compensation_force: DVector<f64>,
    pub lambda: Vec<f64>,
}

impl ArticulationData {
    pub fn create_cache(&self) -> ArticulationCache {
        let links = self.links.len();
        let dofs = self.dof_count;
        ArticulationCache {
            joint_velocity: vec![0.0; dofs],
            joint_acceleration: vec![0.0; dofs],
            joint_position: vec![0.0; dofs],
            joint_force: vec![0.0; dofs],
            joint_target_positions: vec![0.0; dofs],
            joint_target_velocities: vec![0.0; dofs],
            external_forces: vec![SpatialForce::default(); links],
            link_force: vec![Vector3::zeros(); links],
            link_torque: vec![Vector3::zeros(); links],
            root_link_data: RootLinkData::default(),
            mass_matrix: DMatrix::zeros(dofs, dofs),
            coefficient_matrix: DMatrix::zeros(0, 0),
            centroidal_momentum_matrix: DMatrix::zeros(6, dofs + 6),
            centroidal_momentum_bias: Vector6::zeros(),
            coriolis_force: DVector::zeros(dofs),
            gravity_compensation_force: DVector::zeros(dofs),
            lambda: Vec::new(),
        }
    }

    fn check_cache(&self, cache: &ArticulationCache) -> Result<(), MultibodyErrors> {
        let links = self.links.len();
        for len in [
            cache.joint_velocity.len(),
            cache.joint_acceleration.len(),
            cache.joint_position.len(),
            cache.joint_force.len(),
            cache.joint_target_positions.len(),
            cache.joint_target_velocities.len(),
        ] {
            self.check_dof_len(len)?;
        }
        for len in [
            cache.external_forces.len(),
            cache.link_force.len(),
            cache.link_torque.len(),
        ] {
            if len != links {
                return Err(MultibodyErrors::BufferLengthMismatch {
                    expected: links,
                    actual: len,
                });
            }
        }
        Ok(())
    }

    /// Writes the selected parts of `cache` into the articulation. Positions of
    /// wrapping revolute joints are brought into `[-pi, pi)`. Writing positions or
    /// the root transform marks the data dirty. Returns whether anything that
    /// should wake a sleeping articulation was written.
    pub fn apply_cache(
        &mut self,
        cache: &ArticulationCache,
        flags: CacheFlags,
    ) -> Result<bool, MultibodyErrors> {
        self.check_cache(cache)?;
        let mut should_wake = false;

        if flags.contains(CacheFlags::POSITION) {
            for (index, link) in self.links.iter().enumerate().skip(1) {
                let wrap = link.joint.joint_type == JointType::Revolute;
                for k in self.joint_data[index].range() {
                    let q = cache.joint_position[k];
                    self.joint_positions[k] = if wrap { wrap_angle(q) } else { q };
                }
            }
            self.dirty = true;
            should_wake = true;
        }

        if flags.contains(CacheFlags::ROOT_TRANSFORM) {
            self.root_pose = cache.root_link_data.transform;
            self.dirty = true;
            should_wake = true;
        }

        if flags.contains(CacheFlags::VELOCITY) {
            self.joint_velocities.copy_from_slice(&cache.joint_velocity);
            should_wake |= cache.joint_velocity.iter().any(|v| *v != 0.0);
        }

        if flags.contains(CacheFlags::ACCELERATION) {
            self.joint_accelerations
                .copy_from_slice(&cache.joint_acceleration);
        }

        if flags.contains(CacheFlags::FORCE) {
            self.joint_forces.copy_from_slice(&cache.joint_force);
            should_wake |= cache.joint_force.iter().any(|f| *f != 0.0);
        }

        if flags.contains(CacheFlags::ROOT_VELOCITIES) {
            let root = &cache.root_link_data;
            self.root_velocity = MotionVector::new(root.world_ang_vel, root.world_lin_vel);
            should_wake |= !self.root_velocity.is_zero();
        }

        if flags.contains(CacheFlags::LINK_FORCE) {
            for (index, link) in self.links.iter().enumerate() {
                let force = cache.link_force[index];
                let angular = self.external_accelerations[index].rotation();
                self.external_accelerations[index] =
                    MotionVector::new(angular, force * link.mass_properties.inverse_mass);
                should_wake |= force != Vector3::zeros();
            }
        }

        if flags.contains(CacheFlags::LINK_TORQUE) {
            for (index, link) in self.links.iter().enumerate() {
                let torque = cache.link_torque[index];
                let inverse_inertia = link
                    .mass_properties
                    .world_inverse_inertia(&self.body_to_world[index].rotation);
                let linear = self.external_accelerations[index].translation();
                self.external_accelerations[index] =
                    MotionVector::new(inverse_inertia * torque, linear);
                should_wake |= torque != Vector3::zeros();
            }
        }

        if flags.contains(CacheFlags::JOINT_TARGET_POSITIONS) {
            self.joint_target_positions
                .copy_from_slice(&cache.joint_target_positions);
            should_wake = true;
        }

        if flags.contains(CacheFlags::JOINT_TARGET_VELOCITIES) {
            self.joint_target_velocities
                .copy_from_slice(&cache.joint_target_velocities);
            should_wake = true;
        }

        if flags.intersects(CacheFlags::VELOCITY | CacheFlags::ROOT_VELOCITIES) {
            self.update_link_velocities();
        }
        Ok(should_wake)
    }

    /// Reads the selected parts of the articulation into `cache`. Link forces and
    /// torques are recovered from the stored external accelerations.
    pub fn copy_internal_state_to_cache(
        &self,
        cache: &mut ArticulationCache,
        flags: CacheFlags,
    ) -> Result<(), MultibodyErrors> {
        self.check_cache(cache)?;

        if flags.contains(CacheFlags::VELOCITY) {
            cache.joint_velocity.copy_from_slice(&self.joint_velocities);
        }
        if flags.contains(CacheFlags::ACCELERATION) {
            cache
                .joint_acceleration
                .copy_from_slice(&self.joint_accelerations);
        }
        if flags.contains(CacheFlags::POSITION) {
            cache.joint_position.copy_from_slice(&self.joint_positions);
        }
        if flags.contains(CacheFlags::FORCE) {
            cache.joint_force.copy_from_slice(&self.joint_forces);
        }
        if flags.contains(CacheFlags::ROOT_TRANSFORM) {
            cache.root_link_data.transform = self.root_pose;
        }
        if flags.contains(CacheFlags::ROOT_VELOCITIES) {
            cache.root_link_data.world_ang_vel = self.root_velocity.rotation();
            cache.root_link_data.world_lin_vel = self.root_velocity.translation();
        }
        if flags.contains(CacheFlags::LINK_FORCE) {
            for (index, link) in self.links.iter().enumerate() {
                cache.link_force[index] =
                    self.external_accelerations[index].translation() * link.mass_properties.mass();
            }
        }
        if flags.contains(CacheFlags::LINK_TORQUE) {
            for (index, link) in self.links.iter().enumerate() {
                let inertia = link
                    .mass_properties
                    .world_inertia(&self.body_to_world[index].rotation);
                cache.link_torque[index] = inertia * self.external_accelerations[index].rotation();
            }
        }
        if flags.contains(CacheFlags::JOINT_TARGET_POSITIONS) {
            cache
                .joint_target_positions
                .copy_from_slice(&self.joint_target_positions);
        }
        if flags.contains(CacheFlags::JOINT_TARGET_VELOCITIES) {
            cache
                .joint_target_velocities
                .copy_from_slice(&self.joint_target_velocities);
        }
        Ok(())
    }

    /// Expands compact per-DOF values into the maximal layout of six slots per
    /// non-root link, indexed by axis. Locked axes read zero.
    pub fn unpack_joint_data(&self, reduced: &[f64]) -> Result<Vec<f64>, MultibodyErrors> {
        self.check_dof_len(reduced.len())?;
        let mut maximum = vec![0.0; (self.links.len() - 1) * MAX_DOF];
        for (index, link) in self.links.iter().enumerate().skip(1) {
            let base = (index - 1) * MAX_DOF;
            for (axis, k) in link.joint.dof_axes().zip(self.joint_data[index].range()) {
                maximum[base + axis as usize] = reduced[k];
            }
        }
        Ok(maximum)
    }

    /// Inverse of `unpack_joint_data`. Values on locked axes are dropped.
    pub fn pack_joint_data(&self, maximum: &[f64]) -> Result<Vec<f64>, MultibodyErrors> {
        let expected = (self.links.len() - 1) * MAX_DOF;
        if maximum.len() != expected {
            return Err(MultibodyErrors::BufferLengthMismatch {
                expected,
                actual: maximum.len(),
            });
        }
        let mut reduced = vec![0.0; self.dof_count];
        for (index, link) in self.links.iter().enumerate().skip(1) {
            let base = (index - 1) * MAX_DOF;
            for (axis, k) in link.joint.dof_axes().zip(self.joint_data[index].range()) {
                reduced[k] = maximum[base + axis as usize];
            }
        }
        Ok(reduced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articulation::tests::{planar_chain, random_tree};
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    const TOL: f64 = 1e-12;

    #[test]
    fn test_velocity_roundtrip() {
        let mut data = random_tree(31, 6, false);
        let mut cache = data.create_cache();
        data.copy_internal_state_to_cache(&mut cache, CacheFlags::ALL)
            .unwrap();
        let velocities = cache.joint_velocity.clone();
        let root = cache.root_link_data;

        cache.joint_velocity.iter_mut().for_each(|v| *v *= 2.0);
        data.apply_cache(&cache, CacheFlags::VELOCITY).unwrap();
        for (v, original) in data.joint_velocities().iter().zip(velocities.iter()) {
            assert_abs_diff_eq!(*v, 2.0 * original, epsilon = TOL);
        }
        // untouched parts stay as they were
        assert!(!data.is_dirty());
        assert_eq!(data.root_velocity().rotation(), root.world_ang_vel);
    }

    #[test]
    fn test_position_wrapping() {
        let mut data = planar_chain(2, true);
        let mut cache = data.create_cache();
        cache.joint_position = vec![1.5 * PI, -1.5 * PI];
        let should_wake = data.apply_cache(&cache, CacheFlags::POSITION).unwrap();
        assert!(should_wake);
        assert!(data.is_dirty());
        assert_abs_diff_eq!(data.joint_positions()[0], -0.5 * PI, epsilon = TOL);
        assert_abs_diff_eq!(data.joint_positions()[1], 0.5 * PI, epsilon = TOL);
    }

    #[test]
    fn test_link_force_becomes_acceleration() {
        let mut data = planar_chain(1, true);
        let mut cache = data.create_cache();
        cache.link_force[1] = Vector3::new(0.0, 3.0, 0.0);
        cache.link_torque[1] = Vector3::new(0.0, 0.0, 0.5);
        assert!(
            data.apply_cache(&cache, CacheFlags::LINK_FORCE | CacheFlags::LINK_TORQUE)
                .unwrap()
        );
        let mass = data.links()[1].mass_properties.mass();
        assert_abs_diff_eq!(
            data.external_accelerations()[1].translation(),
            Vector3::new(0.0, 3.0 / mass, 0.0),
            epsilon = TOL
        );

        let mut readback = data.create_cache();
        data.copy_internal_state_to_cache(
            &mut readback,
            CacheFlags::LINK_FORCE | CacheFlags::LINK_TORQUE,
        )
        .unwrap();
        assert_abs_diff_eq!(readback.link_force[1], cache.link_force[1], epsilon = 1e-10);
        assert_abs_diff_eq!(readback.link_torque[1], cache.link_torque[1], epsilon = 1e-10);
    }

    #[test]
    fn test_nothing_to_wake() {
        let mut data = planar_chain(2, true);
        let cache = data.create_cache();
        assert!(!data.apply_cache(&cache, CacheFlags::VELOCITY | CacheFlags::FORCE).unwrap());
    }

    #[test]
    fn test_pack_unpack() {
        let data = random_tree(8, 6, true);
        let reduced: Vec<f64> = (0..data.dof_count()).map(|k| k as f64 + 1.0).collect();
        let maximum = data.unpack_joint_data(&reduced).unwrap();
        assert_eq!(maximum.len(), (data.link_count() - 1) * MAX_DOF);
        assert_eq!(
            maximum.iter().filter(|v| **v != 0.0).count(),
            data.dof_count()
        );
        assert_eq!(data.pack_joint_data(&maximum).unwrap(), reduced);
        assert!(matches!(
            data.pack_joint_data(&[0.0; 3]),
            Err(MultibodyErrors::BufferLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_cache_length_checked() {
        let mut data = planar_chain(2, true);
        let mut cache = data.create_cache();
        cache.joint_velocity.pop();
        assert!(matches!(
            data.apply_cache(&cache, CacheFlags::VELOCITY),
            Err(MultibodyErrors::DofCountMismatch { .. })
        ));
    }
}
