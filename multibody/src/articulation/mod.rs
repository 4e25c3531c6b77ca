pub mod builder;

pub use builder::ArticulationBuilder;

use crate::{
    MultibodyErrors,
    algorithms::articulated_body_algorithm::ArticulatedBodyAlgorithm,
    joint::{Joint, JointCoreData},
};
use mass_properties::MassProperties;
use nalgebra::{Matrix6, Vector3};
use serde::{Deserialize, Serialize};
use spatial_algebra::{ForceVector, InverseSpatialInertia, MotionVector, SpatialInertia};
use transforms::Transform;

/// A rigid body of the articulation. The body frame sits at the center of mass
/// and is aligned with the principal axes of `mass_properties`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    /// Index of the parent link, the root refers to itself.
    pub parent: usize,
    /// Inbound joint, unused on the root.
    pub joint: Joint,
    pub mass_properties: MassProperties,
}

/// Slice of `path_to_root_elements` holding the links between the root
/// (exclusive) and a link (inclusive), ordered outward.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathToRoot {
    pub start: usize,
    pub count: usize,
}

/// Reduced coordinate articulation state plus everything derived from it.
///
/// Joint positions, velocities and forces live in flat per-DOF arrays indexed
/// through `joint_data`. Quantities below "derived" are rebuilt by `common_init`
/// and are only valid while the data is not dirty.
#[derive(Debug, Clone)]
pub struct ArticulationData {
    pub(crate) links: Vec<Link>,
    pub(crate) joint_data: Vec<JointCoreData>,
    pub(crate) dof_count: usize,
    pub(crate) fix_base: bool,
    pub(crate) dt: f64,
    pub(crate) dirty: bool,
    pub(crate) path_to_root: Vec<PathToRoot>,
    pub(crate) path_to_root_elements: Vec<usize>,

    // state
    pub(crate) root_pose: Transform,
    pub(crate) root_velocity: MotionVector,
    pub(crate) joint_positions: Vec<f64>,
    pub(crate) joint_velocities: Vec<f64>,
    pub(crate) joint_accelerations: Vec<f64>,
    pub(crate) joint_forces: Vec<f64>,
    pub(crate) joint_target_positions: Vec<f64>,
    pub(crate) joint_target_velocities: Vec<f64>,
    pub(crate) external_accelerations: Vec<MotionVector>,

    // derived
    pub(crate) body_to_world: Vec<Transform>,
    pub(crate) rw: Vec<Vector3<f64>>,
    pub(crate) motion_matrix: Vec<MotionVector>,
    pub(crate) world_motion_matrix: Vec<MotionVector>,
    pub(crate) spatial_inertia: Vec<SpatialInertia>,
    pub(crate) articulated_inertia: Vec<SpatialInertia>,
    pub(crate) is_w: Vec<ForceVector>,
    pub(crate) is_inv_d: Vec<ForceVector>,
    pub(crate) inv_st_is: Vec<Matrix6<f64>>,
    pub(crate) base_inv_articulated_inertia: InverseSpatialInertia,
    pub(crate) motion_velocities: Vec<MotionVector>,
}

impl ArticulationData {
    pub(crate) fn new(builder: &ArticulationBuilder) -> Self {
        let links = builder.links.clone();
        let link_count = links.len();

        let mut joint_data = Vec::with_capacity(link_count);
        let mut motion_matrix = Vec::new();
        let mut offset = 0;
        for (index, link) in links.iter().enumerate() {
            let dof_count = if index == 0 {
                0
            } else {
                link.joint.dof_count()
            };
            joint_data.push(JointCoreData { offset, dof_count });
            if index > 0 {
                motion_matrix.extend(link.joint.motion_matrix());
            }
            offset += dof_count;
        }
        let dof_count = offset;

        let mut path_to_root = Vec::with_capacity(link_count);
        let mut path_to_root_elements = Vec::new();
        for index in 0..link_count {
            let start = path_to_root_elements.len();
            let mut path = Vec::new();
            let mut link = index;
            while link != 0 {
                path.push(link);
                link = links[link].parent;
            }
            path.reverse();
            path_to_root_elements.extend(path.iter());
            path_to_root.push(PathToRoot {
                start,
                count: path.len(),
            });
        }

        let mut data = Self {
            links,
            joint_data,
            dof_count,
            fix_base: builder.fix_base,
            dt: builder.dt,
            dirty: true,
            path_to_root,
            path_to_root_elements,
            root_pose: builder.root_pose,
            root_velocity: MotionVector::zeros(),
            joint_positions: vec![0.0; dof_count],
            joint_velocities: vec![0.0; dof_count],
            joint_accelerations: vec![0.0; dof_count],
            joint_forces: vec![0.0; dof_count],
            joint_target_positions: vec![0.0; dof_count],
            joint_target_velocities: vec![0.0; dof_count],
            external_accelerations: vec![MotionVector::zeros(); link_count],
            body_to_world: vec![Transform::identity(); link_count],
            rw: vec![Vector3::zeros(); link_count],
            motion_matrix,
            world_motion_matrix: vec![MotionVector::zeros(); dof_count],
            spatial_inertia: vec![SpatialInertia::zeros(); link_count],
            articulated_inertia: vec![SpatialInertia::zeros(); link_count],
            is_w: vec![ForceVector::zeros(); dof_count],
            is_inv_d: vec![ForceVector::zeros(); dof_count],
            inv_st_is: vec![Matrix6::identity(); link_count],
            base_inv_articulated_inertia: InverseSpatialInertia::zeros(),
            motion_velocities: vec![MotionVector::zeros(); link_count],
        };
        data.common_init();
        data
    }

    /// Rebuilds link poses, world motion matrices, inertias, articulated inertias
    /// and link velocities from the current joint positions and root state.
    pub fn common_init(&mut self) {
        self.update_kinematics();
        self.compute_articulated_spatial_inertia();
        self.update_link_velocities();
        self.dirty = false;
        tracing::debug!(
            links = self.links.len(),
            dofs = self.dof_count,
            "articulation data initialized"
        );
    }

    fn update_kinematics(&mut self) {
        self.body_to_world[0] = self.root_pose;
        self.rw[0] = Vector3::zeros();
        for index in 1..self.links.len() {
            let link = &self.links[index];
            let jd = self.joint_data[index];
            let joint = &link.joint;
            let relative = joint.relative_transform(&self.joint_positions[jd.range()]);
            let body_to_world = self.body_to_world[link.parent]
                * joint.parent_pose
                * relative
                * joint.child_pose.inv();
            self.body_to_world[index] = body_to_world;
            self.rw[index] =
                body_to_world.translation - self.body_to_world[link.parent].translation;

            let frame = body_to_world * joint.child_pose;
            let anchor_offset = frame.translation - body_to_world.translation;
            for k in jd.range() {
                let s = self.motion_matrix[k];
                self.world_motion_matrix[k] = MotionVector::new(
                    frame.rotate(&s.rotation()),
                    frame.rotate(&s.translation()),
                )
                .translate(&anchor_offset);
            }
        }
        for (index, link) in self.links.iter().enumerate() {
            self.spatial_inertia[index] = SpatialInertia::from_rigid_body(
                &link.mass_properties,
                &self.body_to_world[index].rotation,
            );
        }
    }

    /// Velocity of `link` at its center of mass given its parent's velocity.
    #[inline]
    pub(crate) fn link_velocity(
        &self,
        link: usize,
        parent_velocity: &MotionVector,
        joint_velocities: Option<&[f64]>,
    ) -> MotionVector {
        let mut v = parent_velocity.translate(&-self.rw[link]);
        if let Some(joint_velocities) = joint_velocities {
            for k in self.joint_data[link].range() {
                v += self.world_motion_matrix[k] * joint_velocities[k];
            }
        }
        v
    }

    pub(crate) fn update_link_velocities(&mut self) {
        self.motion_velocities[0] = if self.fix_base {
            MotionVector::zeros()
        } else {
            self.root_velocity
        };
        for index in 1..self.links.len() {
            let parent = self.links[index].parent;
            let v = self.link_velocity(
                index,
                &self.motion_velocities[parent],
                Some(&self.joint_velocities),
            );
            self.motion_velocities[index] = v;
        }
    }

    /// Fails with `DataDirty` naming `driver` when `common_init` has not run since
    /// the last position or root pose change.
    pub(crate) fn check_clean(&self, driver: &'static str) -> Result<(), MultibodyErrors> {
        if self.dirty {
            tracing::error!("{driver}: articulation data is dirty, call common_init first");
            return Err(MultibodyErrors::DataDirty(driver));
        }
        Ok(())
    }

    pub(crate) fn check_dof_len(&self, actual: usize) -> Result<(), MultibodyErrors> {
        if actual != self.dof_count {
            return Err(MultibodyErrors::DofCountMismatch {
                expected: self.dof_count,
                actual,
            });
        }
        Ok(())
    }

    pub(crate) fn check_link(&self, link: usize) -> Result<(), MultibodyErrors> {
        if link >= self.links.len() {
            return Err(MultibodyErrors::InvalidLink(link));
        }
        Ok(())
    }

    /// Links between the root (exclusive) and `link` (inclusive), ordered outward.
    pub(crate) fn path_to_root(&self, link: usize) -> &[usize] {
        let path = self.path_to_root[link];
        &self.path_to_root_elements[path.start..path.start + path.count]
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn dof_count(&self) -> usize {
        self.dof_count
    }

    pub fn is_fix_base(&self) -> bool {
        self.fix_base
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn set_dt(&mut self, dt: f64) -> Result<(), MultibodyErrors> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(MultibodyErrors::InvalidDt(dt));
        }
        self.dt = dt;
        Ok(())
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// DOF range of the joint into `link`, `None` past the last link.
    pub fn joint_data(&self, link: usize) -> Option<JointCoreData> {
        self.joint_data.get(link).copied()
    }

    pub fn body_to_world(&self, link: usize) -> Option<&Transform> {
        self.body_to_world.get(link)
    }

    /// World space vector from the parent's center of mass to this link's.
    pub fn rw(&self, link: usize) -> Option<&Vector3<f64>> {
        self.rw.get(link)
    }

    pub fn world_motion_matrix(&self, link: usize) -> Option<&[MotionVector]> {
        self.joint_data
            .get(link)
            .map(|jd| &self.world_motion_matrix[jd.range()])
    }

    pub fn link_velocities(&self) -> &[MotionVector] {
        &self.motion_velocities
    }

    pub fn root_pose(&self) -> &Transform {
        &self.root_pose
    }

    pub fn set_root_pose(&mut self, root_pose: Transform) {
        self.root_pose = root_pose;
        self.dirty = true;
    }

    pub fn root_velocity(&self) -> &MotionVector {
        &self.root_velocity
    }

    /// Angular and linear velocity of the root center of mass, in world axes.
    pub fn set_root_velocity(&mut self, root_velocity: MotionVector) {
        self.root_velocity = root_velocity;
        self.update_link_velocities();
    }

    pub fn joint_positions(&self) -> &[f64] {
        &self.joint_positions
    }

    pub fn set_joint_positions(&mut self, positions: &[f64]) -> Result<(), MultibodyErrors> {
        self.check_dof_len(positions.len())?;
        self.joint_positions.copy_from_slice(positions);
        self.dirty = true;
        Ok(())
    }

    pub fn joint_velocities(&self) -> &[f64] {
        &self.joint_velocities
    }

    pub fn set_joint_velocities(&mut self, velocities: &[f64]) -> Result<(), MultibodyErrors> {
        self.check_dof_len(velocities.len())?;
        self.joint_velocities.copy_from_slice(velocities);
        self.update_link_velocities();
        Ok(())
    }

    pub fn joint_accelerations(&self) -> &[f64] {
        &self.joint_accelerations
    }

    pub fn joint_forces(&self) -> &[f64] {
        &self.joint_forces
    }

    pub fn set_joint_forces(&mut self, forces: &[f64]) -> Result<(), MultibodyErrors> {
        self.check_dof_len(forces.len())?;
        self.joint_forces.copy_from_slice(forces);
        Ok(())
    }

    pub fn external_accelerations(&self) -> &[MotionVector] {
        &self.external_accelerations
    }

    pub fn set_external_acceleration(
        &mut self,
        link: usize,
        acceleration: MotionVector,
    ) -> Result<(), MultibodyErrors> {
        self.check_link(link)?;
        self.external_accelerations[link] = acceleration;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::joint::Axis;
    use approx::assert_abs_diff_eq;
    use nalgebra::UnitQuaternion;
    use rand::{Rng, SeedableRng, rngs::SmallRng};
    use std::f64::consts::FRAC_PI_2;

    const TOL: f64 = 1e-12;

    pub fn rod(mass: f64, length: f64) -> MassProperties {
        let i = mass * length * length / 12.0;
        MassProperties::new(mass, Vector3::new(0.01 * mass, i, i)).unwrap()
    }

    /// Fixed base planar chain of `count` rods of length 1 along x, hinged about z.
    /// Each link's center of mass sits half a rod length past its hinge.
    pub fn planar_chain(count: usize, fix_base: bool) -> ArticulationData {
        let mut builder = ArticulationBuilder::new("base", rod(2.0, 1.0)).with_fix_base(fix_base);
        for i in 0..count {
            let parent_pose = if i == 0 {
                Transform::identity()
            } else {
                Transform::from_translation(Vector3::new(0.5, 0.0, 0.0))
            };
            builder
                .add_link(
                    &format!("link{i}"),
                    i,
                    Joint::revolute(
                        Axis::RotZ,
                        parent_pose,
                        Transform::from_translation(Vector3::new(-0.5, 0.0, 0.0)),
                    ),
                    rod(1.0 + i as f64 * 0.5, 1.0),
                )
                .unwrap();
        }
        builder.build().unwrap()
    }

    /// Seeded tree with mixed joint types hanging off a floating or fixed root.
    pub fn random_tree(seed: u64, link_count: usize, fix_base: bool) -> ArticulationData {
        let mut rng = SmallRng::seed_from_u64(seed);
        let random_vector = |rng: &mut SmallRng, scale: f64| {
            Vector3::new(
                rng.random_range(-scale..scale),
                rng.random_range(-scale..scale),
                rng.random_range(-scale..scale),
            )
        };
        let mut builder = ArticulationBuilder::new(
            "root",
            MassProperties::new(3.0, Vector3::new(0.4, 0.5, 0.6)).unwrap(),
        )
        .with_fix_base(fix_base)
        .with_root_pose(Transform::new(
            UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(0.0, 0.0, 1.0),
        ));
        for index in 1..link_count {
            let parent = rng.random_range(0..index);
            let parent_pose = Transform::new(
                UnitQuaternion::from_scaled_axis(random_vector(&mut rng, 1.0)),
                random_vector(&mut rng, 0.5),
            );
            let child_pose = Transform::new(
                UnitQuaternion::from_scaled_axis(random_vector(&mut rng, 1.0)),
                random_vector(&mut rng, 0.5),
            );
            let axis = Axis::ALL[rng.random_range(0..6)];
            let joint = match index % 4 {
                0 => Joint::spherical(parent_pose, child_pose),
                1 => Joint::revolute(Axis::ALL[axis as usize % 3], parent_pose, child_pose),
                2 => Joint::prismatic(Axis::ALL[3 + axis as usize % 3], parent_pose, child_pose),
                _ => {
                    Joint::revolute_unwrapped(Axis::ALL[axis as usize % 3], parent_pose, child_pose)
                }
            };
            let mass = rng.random_range(0.5..2.0);
            let inertia = Vector3::new(
                rng.random_range(0.05..0.3),
                rng.random_range(0.05..0.3),
                rng.random_range(0.05..0.3),
            );
            builder
                .add_link(
                    &format!("link{index}"),
                    parent,
                    joint,
                    MassProperties::new(mass, inertia).unwrap(),
                )
                .unwrap();
        }
        let mut data = builder.build().unwrap();
        let positions: Vec<f64> = (0..data.dof_count())
            .map(|_| rng.random_range(-1.0..1.0))
            .collect();
        let velocities: Vec<f64> = (0..data.dof_count())
            .map(|_| rng.random_range(-1.0..1.0))
            .collect();
        data.set_joint_positions(&positions).unwrap();
        data.common_init();
        data.set_joint_velocities(&velocities).unwrap();
        if !fix_base {
            data.set_root_velocity(MotionVector::new(
                random_vector(&mut rng, 1.0),
                random_vector(&mut rng, 1.0),
            ));
        }
        data
    }

    #[test]
    fn test_offsets_and_paths() {
        let data = random_tree(7, 8, false);
        let mut expected = 0;
        for link in 0..data.link_count() {
            let jd = data.joint_data(link).unwrap();
            assert_eq!(jd.offset, expected);
            expected += jd.dof_count;
            let path = data.path_to_root(link);
            if link == 0 {
                assert!(path.is_empty());
            } else {
                assert_eq!(*path.last().unwrap(), link);
                for pair in path.windows(2) {
                    assert_eq!(data.links()[pair[1]].parent, pair[0]);
                }
                assert_eq!(data.links()[path[0]].parent, 0);
            }
        }
        assert_eq!(expected, data.dof_count());
    }

    #[test]
    fn test_forward_kinematics() {
        let mut data = planar_chain(2, true);
        data.set_joint_positions(&[FRAC_PI_2, -FRAC_PI_2]).unwrap();
        assert!(data.is_dirty());
        data.common_init();
        assert!(!data.is_dirty());
        // first rod points up, second rod points along x again
        assert_abs_diff_eq!(
            data.body_to_world(1).unwrap().translation,
            Vector3::new(0.0, 0.5, 0.0),
            epsilon = TOL
        );
        assert_abs_diff_eq!(
            data.body_to_world(2).unwrap().translation,
            Vector3::new(0.5, 1.0, 0.0),
            epsilon = TOL
        );
        assert_abs_diff_eq!(*data.rw(2).unwrap(), Vector3::new(0.5, 0.5, 0.0), epsilon = TOL);
        assert_eq!(data.world_motion_matrix(2).unwrap().len(), 1);
        assert_eq!(data.world_motion_matrix(0).unwrap().len(), 0);
    }

    #[test]
    fn test_link_velocity_matches_finite_difference() {
        // single axis joints only, spherical rates are not position derivatives
        let mut data = random_tree(3, 4, false);
        let h = 1e-7;
        let q0 = data.joint_positions().to_vec();
        let qd = data.joint_velocities().to_vec();
        let v_root = *data.root_velocity();
        let before: Vec<Vector3<f64>> = (0..data.link_count())
            .map(|i| data.body_to_world(i).unwrap().translation)
            .collect();
        let velocities = data.link_velocities().to_vec();

        let q1: Vec<f64> = q0.iter().zip(qd.iter()).map(|(q, v)| q + h * v).collect();
        let root = *data.root_pose();
        let root_rotation = UnitQuaternion::from_scaled_axis(v_root.rotation() * h) * root.rotation;
        data.set_root_pose(Transform::new(
            root_rotation,
            root.translation + v_root.translation() * h,
        ));
        data.set_joint_positions(&q1).unwrap();
        data.common_init();
        for i in 0..data.link_count() {
            let fd = (data.body_to_world(i).unwrap().translation - before[i]) / h;
            assert_abs_diff_eq!(fd, velocities[i].translation(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_setters_check_lengths() {
        let mut data = planar_chain(2, true);
        assert!(matches!(
            data.set_joint_positions(&[0.0]),
            Err(MultibodyErrors::DofCountMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            data.set_external_acceleration(5, MotionVector::zeros()),
            Err(MultibodyErrors::InvalidLink(5))
        ));
        assert!(matches!(data.set_dt(-1.0), Err(MultibodyErrors::InvalidDt(_))));
    }

    #[test]
    fn test_link_accessors_out_of_range() {
        let data = planar_chain(2, true);
        assert!(data.joint_data(3).is_none());
        assert!(data.body_to_world(3).is_none());
        assert!(data.rw(3).is_none());
        assert!(data.world_motion_matrix(3).is_none());
        assert!(data.body_to_world(2).is_some());
    }
}
