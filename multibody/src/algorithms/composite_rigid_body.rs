use crate::{
    algorithms::recursive_newton_euler::RecursiveNewtonEuler, articulation::ArticulationData,
    scratch::ScratchData,
};
use nalgebra::DMatrix;
use spatial_algebra::{ForceVector, InverseSpatialInertia};

/// Joint space mass matrix from composite inertias.
pub trait CompositeRigidBody {
    fn compute_hi(
        &self,
        link: usize,
        mass_matrix: &mut DMatrix<f64>,
        f: &mut [ForceVector],
        root_dof: usize,
    ) -> usize;
    fn calculate_h_fix_base(&self, scratch: &mut ScratchData<'_>) -> DMatrix<f64>;
    fn calculate_h_floating_base(
        &self,
        scratch: &mut ScratchData<'_>,
        root_motion: bool,
    ) -> DMatrix<f64>;
}

impl CompositeRigidBody for ArticulationData {
    /// Fills the rows and columns of `link`'s dofs: its diagonal block and the
    /// coupling with every ancestor below the root. The columns in `f` are left
    /// expressed at the returned ancestor, the child of the root on this branch.
    fn compute_hi(
        &self,
        link: usize,
        mass_matrix: &mut DMatrix<f64>,
        f: &mut [ForceVector],
        root_dof: usize,
    ) -> usize {
        let jd_i = self.joint_data[link];
        for k in jd_i.range() {
            for l in jd_i.range() {
                mass_matrix[(k + root_dof, l + root_dof)] = self.world_motion_matrix[k].dot(&f[l]);
            }
        }

        let mut j = link;
        while self.links[j].parent != 0 {
            for l in jd_i.range() {
                f[l] = f[l].translate(&self.rw[j]);
            }
            j = self.links[j].parent;
            for k in self.joint_data[j].range() {
                for l in jd_i.range() {
                    let h = self.world_motion_matrix[k].dot(&f[l]);
                    mass_matrix[(k + root_dof, l + root_dof)] = h;
                    mass_matrix[(l + root_dof, k + root_dof)] = h;
                }
            }
        }
        j
    }

    fn calculate_h_fix_base(&self, scratch: &mut ScratchData<'_>) -> DMatrix<f64> {
        let dofs = self.dof_count;
        let mut mass_matrix = DMatrix::zeros(dofs, dofs);
        let mut f = vec![ForceVector::zeros(); dofs];
        self.init_composite_spatial_inertia(scratch);
        for i in (1..self.links.len()).rev() {
            let parent = self.links[i].parent;
            let composite = scratch.composite_spatial_inertias[i];
            scratch.composite_spatial_inertias[parent] += composite.translate(&self.rw[i]);
            for k in self.joint_data[i].range() {
                f[k] = composite * self.world_motion_matrix[k];
            }
            self.compute_hi(i, &mut mass_matrix, &mut f, 0);
        }
        mass_matrix
    }

    /// With `root_motion` the first six rows and columns belong to the root, linear
    /// before angular. Without it the root is eliminated and the result is the
    /// joint space inertia seen with a free root.
    fn calculate_h_floating_base(
        &self,
        scratch: &mut ScratchData<'_>,
        root_motion: bool,
    ) -> DMatrix<f64> {
        let dofs = self.dof_count;
        let root_dof = if root_motion { 6 } else { 0 };
        let mut mass_matrix = DMatrix::zeros(dofs + root_dof, dofs + root_dof);
        let mut f = vec![ForceVector::zeros(); dofs];
        self.init_composite_spatial_inertia(scratch);
        let root_position = self.body_to_world[0].translation;
        for i in (1..self.links.len()).rev() {
            let parent = self.links[i].parent;
            let composite = scratch.composite_spatial_inertias[i];
            scratch.composite_spatial_inertias[parent] += composite.translate(&self.rw[i]);
            for k in self.joint_data[i].range() {
                f[k] = composite * self.world_motion_matrix[k];
            }
            let j = self.compute_hi(i, &mut mass_matrix, &mut f, root_dof);
            let to_root = self.body_to_world[j].translation - root_position;
            for k in self.joint_data[i].range() {
                f[k] = f[k].translate(&to_root);
            }
        }

        let root_inertia = scratch.composite_spatial_inertias[0];
        if root_motion {
            mass_matrix
                .fixed_view_mut::<6, 6>(0, 0)
                .copy_from(&root_inertia.to_linear_first());
            for (l, force) in f.iter().enumerate() {
                let column = force.to_linear_first();
                for r in 0..6 {
                    mass_matrix[(r, l + 6)] = column[r];
                    mass_matrix[(l + 6, r)] = column[r];
                }
            }
        } else {
            let inverse = root_inertia.inverse().unwrap_or_else(|| {
                tracing::warn!(
                    "composite root inertia is singular, mass matrix keeps the root fixed"
                );
                InverseSpatialInertia::zeros()
            });
            for l in 0..dofs {
                let response = inverse * f[l];
                for k in 0..dofs {
                    mass_matrix[(k, l)] -= f[k].dot(&response);
                }
            }
        }
        mass_matrix
    }
}
