//! Fits a scalar field over a square plate to a linear target profile with
//! one assembled Newton step, then reports how the fit went.
//!
//! The plate is a 2 x 2 mesh of bilinear elements on the unit square. The
//! target profile 1 + 2 x + 3 y lies in the bilinear span, so the fitted
//! node parameters match it exactly.

use eyre::eyre;
use fieldopt::fields::{
    FieldCache, Location, NodeFieldLayout, NodeId, NodeValueLabel, Region,
};
use fieldopt::optimization::{Method, Optimization};

const NODES_PER_SIDE: usize = 3;

fn main() -> eyre::Result<()> {
    let mut region = Region::new();
    let coordinates = region.create_finite_element_field("coordinates", 2)?;
    let u = region.create_finite_element_field("u", 1)?;

    // 3 x 3 node grid, identifiers counted row by row from 1.
    let mut nodes = Vec::new();
    for j in 0..NODES_PER_SIDE {
        for i in 0..NODES_PER_SIDE {
            let identifier = (1 + i + NODES_PER_SIDE * j) as u32;
            let node = region.create_node(region.nodes(), identifier)?;
            region.define_node_field(node, coordinates, &NodeFieldLayout::value_only(2))?;
            region.define_node_field(node, u, &NodeFieldLayout::value_only(1))?;
            region.set_node_parameter(node, coordinates, 0, NodeValueLabel::Value, 0, i as f64 / 2.0)?;
            region.set_node_parameter(node, coordinates, 1, NodeValueLabel::Value, 0, j as f64 / 2.0)?;
            nodes.push(node);
        }
    }
    let corner = |i: usize, j: usize| nodes[i + NODES_PER_SIDE * j];
    let mut first_element = None;
    for cj in 0..NODES_PER_SIDE - 1 {
        for ci in 0..NODES_PER_SIDE - 1 {
            let identifier = (1 + ci + (NODES_PER_SIDE - 1) * cj) as u32;
            let element = region.create_element(
                2,
                identifier,
                &[
                    corner(ci, cj),
                    corner(ci + 1, cj),
                    corner(ci, cj + 1),
                    corner(ci + 1, cj + 1),
                ],
            )?;
            first_element.get_or_insert(element);
        }
    }
    let first_element = first_element.ok_or_else(|| eyre!("the plate has no elements"))?;

    // Target profile 1 + 2 x + 3 y assembled from field arithmetic.
    let one = region.create_constant_field("one", &[1.0])?;
    let slope_x = region.create_constant_field("slope_x", &[2.0])?;
    let slope_y = region.create_constant_field("slope_y", &[3.0])?;
    let x = region.create_component_field("x", coordinates, 0)?;
    let y = region.create_component_field("y", coordinates, 1)?;
    let ramp_x = region.create_multiply_field("ramp_x", slope_x, x)?;
    let ramp_y = region.create_multiply_field("ramp_y", slope_y, y)?;
    let planar = region.create_add_field("planar", ramp_x, ramp_y)?;
    let target = region.create_add_field("target", one, planar)?;
    let misfit = region.create_subtract_field("misfit", u, target)?;
    let objective = region.create_mesh_integral_squares_field("objective", misfit, coordinates, 2, 2)?;

    let mut problem = Optimization::new(&region);
    problem.set_method(Method::Newton);
    problem.add_dependent_field(&region, u)?;
    problem.add_objective_field(&region, objective)?;
    problem.optimize(&mut region)?;

    print!("{}", problem.solution_report());
    println!();
    println!("node   fitted      exact");
    for &node in &nodes {
        let fitted = region.node_parameter(node, u, 0, NodeValueLabel::Value, 0)?;
        let exact = exact_profile(&region, coordinates, node)?;
        println!("{:>4}   {:>9.6}   {:>9.6}", region.node_identifier(node)?, fitted, exact);
    }

    let mut cache = FieldCache::new();
    let centre = Location::Element {
        element: first_element,
        xi: [0.5, 0.5, 0.0],
    };
    let residual = region.evaluate(&mut cache, misfit, centre)?;
    println!();
    println!("misfit at the first element centre: {:e}", residual[0]);
    Ok(())
}

fn exact_profile(
    region: &Region,
    coordinates: fieldopt::fields::Field,
    node: NodeId,
) -> Result<f64, fieldopt::fields::FieldError> {
    let x = region.node_parameter(node, coordinates, 0, NodeValueLabel::Value, 0)?;
    let y = region.node_parameter(node, coordinates, 1, NodeValueLabel::Value, 0)?;
    Ok(1.0 + 2.0 * x + 3.0 * y)
}
