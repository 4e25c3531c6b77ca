pub mod articulated_body_algorithm;
pub mod composite_rigid_body;
pub mod recursive_newton_euler;
