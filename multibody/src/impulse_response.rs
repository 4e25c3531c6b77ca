use crate::{MultibodyErrors, articulation::ArticulationData, joint::MAX_DOF};
use spatial_algebra::{ForceVector, MotionVector};

/// Velocity changes caused by impulses, computed with the articulated inertias
/// from `common_init`. Impulses are spatial `(torque, force)` pairs applied at a
/// link's center of mass; the internal buffers `z` hold their negation.
impl ArticulationData {
    /// Carries an articulated impulse across `link`'s joint into its parent,
    /// removing the part the joint absorbs.
    #[inline]
    pub fn propagate_impulse_w(&self, link: usize, z: &ForceVector) -> ForceVector {
        let mut result = *z;
        for k in self.joint_data[link].range() {
            result -= self.is_inv_d[k] * self.world_motion_matrix[k].dot(z);
        }
        result.translate(&self.rw[link])
    }

    /// Velocity change of `link` from its parent's velocity change and its own
    /// articulated impulse. Joint velocity changes are added to `joint_delta`.
    #[inline]
    pub fn propagate_velocity_w(
        &self,
        link: usize,
        parent_delta: &MotionVector,
        z: &ForceVector,
        mut joint_delta: Option<&mut [f64]>,
    ) -> MotionVector {
        let v = parent_delta.translate(&-self.rw[link]);
        let total = *z + self.articulated_inertia[link] * v;
        let jd = self.joint_data[link];
        let inv_d = self.inv_st_is[link];

        let mut projected = [0.0; MAX_DOF];
        for (r, k) in jd.range().enumerate() {
            projected[r] = self.world_motion_matrix[k].dot(&total);
        }

        let mut delta = v;
        for (r, k) in jd.range().enumerate() {
            let mut dq = 0.0;
            for s in 0..jd.dof_count {
                dq -= inv_d[(r, s)] * projected[s];
            }
            if let Some(joint_delta) = joint_delta.as_deref_mut() {
                joint_delta[k] += dq;
            }
            delta += self.world_motion_matrix[k] * dq;
        }
        delta
    }

    /// Root velocity change for the articulated impulse reaching the root.
    /// A fixed base never moves.
    #[inline]
    pub fn root_impulse_response(&self, z: &ForceVector) -> MotionVector {
        if self.fix_base {
            MotionVector::zeros()
        } else {
            self.base_inv_articulated_inertia * -*z
        }
    }

    /// Velocity change of `link` for an impulse applied to it. Only `z` entries on
    /// the path to the root are written. Joint velocity changes along that path are
    /// added to `joint_delta`.
    pub fn get_impulse_response_inv(
        &self,
        link: usize,
        impulse: &ForceVector,
        z: &mut [ForceVector],
        mut joint_delta: Option<&mut [f64]>,
    ) -> MotionVector {
        let path = self.path_to_root(link);
        z[link] = -*impulse;
        for &l in path.iter().rev() {
            let carried = self.propagate_impulse_w(l, &z[l]);
            z[self.links[l].parent] = carried;
        }
        let mut delta = self.root_impulse_response(&z[0]);
        for &l in path {
            delta = self.propagate_velocity_w(l, &delta, &z[l], joint_delta.as_deref_mut());
        }
        delta
    }

    /// Velocity changes of two links for a pair of impulses applied together.
    /// Uses the short path when one link is the other's parent.
    pub fn get_impulse_self_response_inv(
        &self,
        link0: usize,
        impulse0: &ForceVector,
        link1: usize,
        impulse1: &ForceVector,
        z: &mut [ForceVector],
        joint_delta: Option<&mut [f64]>,
    ) -> (MotionVector, MotionVector) {
        if link0 != link1 && link1 != 0 && self.links[link1].parent == link0 {
            self.get_impulse_response_parent_child_inv(
                link0,
                impulse0,
                link1,
                impulse1,
                z,
                joint_delta,
            )
        } else if link0 != link1 && link0 != 0 && self.links[link0].parent == link1 {
            let (delta1, delta0) = self.get_impulse_response_parent_child_inv(
                link1,
                impulse1,
                link0,
                impulse0,
                z,
                joint_delta,
            );
            (delta0, delta1)
        } else {
            self.get_impulse_response_slow_inv(link0, impulse0, link1, impulse1, z, joint_delta)
        }
    }

    fn get_impulse_response_parent_child_inv(
        &self,
        parent: usize,
        parent_impulse: &ForceVector,
        child: usize,
        child_impulse: &ForceVector,
        z: &mut [ForceVector],
        mut joint_delta: Option<&mut [f64]>,
    ) -> (MotionVector, MotionVector) {
        z[child] = -*child_impulse;
        let carried = self.propagate_impulse_w(child, &z[child]);
        let parent_delta = self.get_impulse_response_inv(
            parent,
            &(*parent_impulse - carried),
            z,
            joint_delta.as_deref_mut(),
        );
        let child_delta = self.propagate_velocity_w(child, &parent_delta, &z[child], joint_delta);
        (parent_delta, child_delta)
    }

    /// General two link response through the common ancestor. Each joint on the
    /// union of both paths contributes to `joint_delta` exactly once.
    pub(crate) fn get_impulse_response_slow_inv(
        &self,
        link0: usize,
        impulse0: &ForceVector,
        link1: usize,
        impulse1: &ForceVector,
        z: &mut [ForceVector],
        mut joint_delta: Option<&mut [f64]>,
    ) -> (MotionVector, MotionVector) {
        let mut branch0 = Vec::new();
        let mut branch1 = Vec::new();
        let (mut i0, mut i1) = (link0, link1);
        let (mut z0, mut z1) = (-*impulse0, -*impulse1);

        // a larger index can never be an ancestor of a smaller one
        while i0 != i1 {
            if i0 > i1 {
                z[i0] = z0;
                branch0.push(i0);
                z0 = self.propagate_impulse_w(i0, &z0);
                i0 = self.links[i0].parent;
            } else {
                z[i1] = z1;
                branch1.push(i1);
                z1 = self.propagate_impulse_w(i1, &z1);
                i1 = self.links[i1].parent;
            }
        }

        let mut trunk = Vec::new();
        let mut common = i0;
        let mut zc = z0 + z1;
        while common != 0 {
            z[common] = zc;
            trunk.push(common);
            zc = self.propagate_impulse_w(common, &zc);
            common = self.links[common].parent;
        }
        z[0] = zc;

        let mut delta = self.root_impulse_response(&z[0]);
        for &l in trunk.iter().rev() {
            delta = self.propagate_velocity_w(l, &delta, &z[l], joint_delta.as_deref_mut());
        }
        let mut delta0 = delta;
        for &l in branch0.iter().rev() {
            delta0 = self.propagate_velocity_w(l, &delta0, &z[l], joint_delta.as_deref_mut());
        }
        let mut delta1 = delta;
        for &l in branch1.iter().rev() {
            delta1 = self.propagate_velocity_w(l, &delta1, &z[l], joint_delta.as_deref_mut());
        }
        (delta0, delta1)
    }

    /// Whole tree response to the articulated impulses already in `z` (negated
    /// impulses at the links they act on, zero elsewhere). Every link's velocity
    /// change goes to `link_delta` and every joint's to `joint_delta`.
    pub fn compute_impulse_response_all(
        &self,
        z: &mut [ForceVector],
        link_delta: &mut [MotionVector],
        joint_delta: &mut [f64],
    ) {
        for i in (1..self.links.len()).rev() {
            let carried = self.propagate_impulse_w(i, &z[i]);
            z[self.links[i].parent] += carried;
        }
        link_delta[0] = self.root_impulse_response(&z[0]);
        for i in 1..self.links.len() {
            let parent_delta = link_delta[self.links[i].parent];
            link_delta[i] =
                self.propagate_velocity_w(i, &parent_delta, &z[i], Some(&mut *joint_delta));
        }
    }

    pub fn get_impulse_response(
        &self,
        link: usize,
        impulse: &ForceVector,
    ) -> Result<MotionVector, MultibodyErrors> {
        self.check_clean("get_impulse_response")?;
        self.check_link(link)?;
        let mut z = vec![ForceVector::zeros(); self.links.len()];
        Ok(self.get_impulse_response_inv(link, impulse, &mut z, None))
    }

    pub fn get_impulse_self_response(
        &self,
        link0: usize,
        impulse0: &ForceVector,
        link1: usize,
        impulse1: &ForceVector,
    ) -> Result<(MotionVector, MotionVector), MultibodyErrors> {
        self.check_clean("get_impulse_self_response")?;
        self.check_link(link0)?;
        self.check_link(link1)?;
        let mut z = vec![ForceVector::zeros(); self.links.len()];
        Ok(self.get_impulse_self_response_inv(link0, impulse0, link1, impulse1, &mut z, None))
    }

    /// Applies impulses to the articulation and updates joint, root and link
    /// velocities with the resulting changes.
    pub fn apply_impulses(
        &mut self,
        impulses: &[(usize, ForceVector)],
    ) -> Result<(), MultibodyErrors> {
        self.check_clean("apply_impulses")?;
        for (link, _) in impulses {
            self.check_link(*link)?;
        }
        self.apply_impulses_inner(impulses);
        Ok(())
    }

    pub(crate) fn apply_impulses_inner(&mut self, impulses: &[(usize, ForceVector)]) {
        let link_count = self.links.len();
        let mut z = vec![ForceVector::zeros(); link_count];
        for (link, impulse) in impulses {
            z[*link] -= *impulse;
        }
        let mut link_delta = vec![MotionVector::zeros(); link_count];
        let mut joint_delta = vec![0.0; self.dof_count];
        self.compute_impulse_response_all(&mut z, &mut link_delta, &mut joint_delta);

        for (v, dv) in self.joint_velocities.iter_mut().zip(joint_delta.iter()) {
            *v += dv;
        }
        if !self.fix_base {
            self.root_velocity += link_delta[0];
        }
        for (v, dv) in self.motion_velocities.iter_mut().zip(link_delta.iter()) {
            *v += *dv;
        }
    }
}
