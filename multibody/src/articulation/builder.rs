use super::{ArticulationData, Link};
use crate::{MultibodyErrors, joint::Joint};
use mass_properties::MassProperties;
use ron::{
    from_str,
    ser::{PrettyConfig, to_string_pretty},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};
use transforms::Transform;

const FILE_NAME: &str = "articulation.ron";

/// Serializable description of an articulation. Links are stored in topological
/// order, link 0 is the root and every other link names a parent with a smaller index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticulationBuilder {
    pub links: Vec<Link>,
    pub root_pose: Transform,
    pub fix_base: bool,
    pub dt: f64,
}

impl ArticulationBuilder {
    pub fn new(root_name: &str, root_mass_properties: MassProperties) -> Self {
        Self {
            links: vec![Link {
                name: root_name.to_string(),
                parent: 0,
                joint: Joint::default(),
                mass_properties: root_mass_properties,
            }],
            root_pose: Transform::identity(),
            fix_base: false,
            dt: 1.0 / 60.0,
        }
    }

    /// Appends a link and returns its index.
    pub fn add_link(
        &mut self,
        name: &str,
        parent: usize,
        joint: Joint,
        mass_properties: MassProperties,
    ) -> Result<usize, MultibodyErrors> {
        let index = self.links.len();
        if parent >= index {
            return Err(MultibodyErrors::NotTopologicallySorted {
                link: index,
                parent,
            });
        }
        joint.validate()?;
        self.links.push(Link {
            name: name.to_string(),
            parent,
            joint,
            mass_properties,
        });
        Ok(index)
    }

    pub fn with_root_pose(mut self, root_pose: Transform) -> Self {
        self.root_pose = root_pose;
        self
    }

    pub fn with_fix_base(mut self, fix_base: bool) -> Self {
        self.fix_base = fix_base;
        self
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn validate(&self) -> Result<(), MultibodyErrors> {
        if self.links.is_empty() {
            return Err(MultibodyErrors::EmptyArticulation);
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(MultibodyErrors::InvalidDt(self.dt));
        }
        for (index, link) in self.links.iter().enumerate().skip(1) {
            if link.parent >= index {
                return Err(MultibodyErrors::NotTopologicallySorted {
                    link: index,
                    parent: link.parent,
                });
            }
            link.joint.validate()?;
        }
        Ok(())
    }

    pub fn build(&self) -> Result<ArticulationData, MultibodyErrors> {
        self.validate()?;
        Ok(ArticulationData::new(self))
    }

    pub fn load(path: &Path) -> Result<Self, MultibodyErrors> {
        let path = path.join(FILE_NAME);
        let mut file = File::open(&path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let builder: Self = from_str(&contents)?;
        builder.validate()?;
        Ok(builder)
    }

    pub fn save(&self, path: &Path) -> Result<(), MultibodyErrors> {
        let path = path.join(FILE_NAME);
        let ron_string = to_string_pretty(self, PrettyConfig::new())?;
        let mut file = File::create(path)?;
        file.write_all(ron_string.as_bytes())?;
        Ok(())
    }
}
