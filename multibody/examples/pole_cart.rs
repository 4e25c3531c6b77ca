use std::env::current_dir;

use mass_properties::MassProperties;
use multibody::{
    articulation::builder::ArticulationBuilder,
    cache::CacheFlags,
    joint::{Axis, Joint},
    loop_joint::LoopSolverSettings,
    solver::{ConstraintRow, LoopAttachment, LoopConstraint},
};
use nalgebra::Vector3;
use transforms::Transform;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Cart on a rail, pole hinged on top of it
    let mut builder =
        ArticulationBuilder::new("base", MassProperties::infinite()).with_fix_base(true);
    let cart = builder.add_link(
        "cart",
        0,
        Joint::prismatic(Axis::TransX, Transform::identity(), Transform::identity()),
        MassProperties::new(1.0, Vector3::new(0.4167, 0.1667, 0.4167))?,
    )?;
    let pole = builder.add_link(
        "pole",
        cart,
        Joint::revolute(
            Axis::RotY,
            Transform::from_translation(Vector3::new(0.0, 0.0, 0.5)),
            Transform::from_translation(Vector3::new(0.0, 0.0, -1.0)),
        ),
        MassProperties::new(0.5, Vector3::new(0.1671, 0.1671, 0.0008))?,
    )?;
    builder.save(&current_dir()?)?;

    let mut data = builder.build()?;
    data.set_joint_positions(&[0.0, 0.05])?;
    data.common_init();

    let gravity = Vector3::new(0.0, 0.0, -9.8);
    let mut cache = data.create_cache();
    data.compute_generalized_gravity_force(&gravity, &mut cache, false)?;
    println!("gravity compensation: {:?}", cache.joint_force);
    data.compute_generalized_mass_matrix(&mut cache)?;
    println!("mass matrix: {}", cache.mass_matrix);
    println!("mass matrix cross check: {:e}", data.cross_check_mass_matrix()?);

    // Hold the pole's center of mass over the cart
    let constraints = [LoopConstraint {
        attachment0: LoopAttachment::Link(cart),
        attachment1: LoopAttachment::Link(pole),
        row: ConstraintRow::new(Vector3::x(), Vector3::zeros(), -Vector3::x(), Vector3::zeros()),
    }];
    let mut initial_state = data.create_cache();
    data.copy_internal_state_to_cache(&mut initial_state, CacheFlags::ALL)?;
    data.get_coefficient_matrix_with_loop_joints(&constraints, &mut cache)?;
    let converged = data.get_lambda(
        &constraints,
        &mut cache,
        &initial_state,
        &[0.0, 0.0],
        &gravity,
        &LoopSolverSettings::default(),
    )?;
    println!("converged: {converged}, lambda: {:?}", cache.lambda);
    println!("constrained joint force: {:?}", cache.joint_force);

    Ok(())
}
