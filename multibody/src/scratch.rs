use spatial_algebra::{ForceVector, MotionVector, SpatialInertia};

/// Per call working set for the recursive passes.
///
/// The per-link buffers and `joint_forces` are owned and reused between passes.
/// Inputs are borrowed from the caller for the duration of one computation; a
/// `None` input is treated as all zeros.
#[derive(Debug, Clone)]
pub struct ScratchData<'a> {
    pub motion_velocities: Vec<MotionVector>,
    pub motion_accelerations: Vec<MotionVector>,
    pub coriolis_vectors: Vec<MotionVector>,
    pub spatial_za_vectors: Vec<ForceVector>,
    pub composite_spatial_inertias: Vec<SpatialInertia>,
    pub joint_forces: Vec<f64>,

    pub joint_velocities: Option<&'a [f64]>,
    pub joint_accelerations: Option<&'a [f64]>,
    pub external_accelerations: Option<&'a [MotionVector]>,
}

impl<'a> ScratchData<'a> {
    pub fn new(link_count: usize, dof_count: usize) -> Self {
        Self {
            motion_velocities: vec![MotionVector::zeros(); link_count],
            motion_accelerations: vec![MotionVector::zeros(); link_count],
            coriolis_vectors: vec![MotionVector::zeros(); link_count],
            spatial_za_vectors: vec![ForceVector::zeros(); link_count],
            composite_spatial_inertias: vec![SpatialInertia::zeros(); link_count],
            joint_forces: vec![0.0; dof_count],
            joint_velocities: None,
            joint_accelerations: None,
            external_accelerations: None,
        }
    }

    pub fn with_joint_velocities(mut self, joint_velocities: &'a [f64]) -> Self {
        self.joint_velocities = Some(joint_velocities);
        self
    }

    pub fn with_joint_accelerations(mut self, joint_accelerations: &'a [f64]) -> Self {
        self.joint_accelerations = Some(joint_accelerations);
        self
    }

    pub fn with_external_accelerations(
        mut self,
        external_accelerations: &'a [MotionVector],
    ) -> Self {
        self.external_accelerations = Some(external_accelerations);
        self
    }
}
