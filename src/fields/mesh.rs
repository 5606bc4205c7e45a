use std::collections::BTreeMap;

use super::node::NodeId;
use super::{FieldError, Region};

/// Identifies an element by mesh dimension and user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId {
    pub(crate) dimension: usize,
    pub(crate) identifier: u32,
}

impl ElementId {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn identifier(&self) -> u32 {
        self.identifier
    }
}

#[derive(Debug)]
pub(crate) struct ElementData {
    pub(crate) nodes: Vec<NodeId>,
}

/// All elements of one dimension, keyed by identifier.
#[derive(Debug, Default)]
pub(crate) struct Mesh {
    pub(crate) elements: BTreeMap<u32, ElementData>,
}

impl Region {
    /// Creates a multilinear element over `2^dimension` local nodes. Local
    /// node order is binary: bit `k` of the local index selects the far end
    /// of coordinate `k`.
    pub fn create_element(
        &mut self,
        dimension: usize,
        identifier: u32,
        nodes: &[NodeId],
    ) -> Result<ElementId, FieldError> {
        if !(1..=3).contains(&dimension) {
            return Err(FieldError::InvalidArgument(
                "element dimension must be 1, 2 or 3",
            ));
        }
        if identifier == 0 {
            return Err(FieldError::InvalidArgument("element identifiers start at 1"));
        }
        if nodes.len() != 1 << dimension {
            return Err(FieldError::InvalidArgument(
                "a multilinear element takes 2^dimension nodes",
            ));
        }
        for &node in nodes {
            self.node_data(node)?;
        }
        let mesh = &mut self.meshes[dimension - 1];
        if mesh.elements.contains_key(&identifier) {
            return Err(FieldError::DuplicateIdentifier(identifier));
        }
        mesh.elements.insert(
            identifier,
            ElementData {
                nodes: nodes.to_vec(),
            },
        );
        Ok(ElementId {
            dimension,
            identifier,
        })
    }

    /// Elements of one mesh in increasing identifier order.
    pub fn mesh_elements(
        &self,
        dimension: usize,
    ) -> Result<impl Iterator<Item = ElementId> + '_, FieldError> {
        if !(1..=3).contains(&dimension) {
            return Err(FieldError::InvalidArgument(
                "element dimension must be 1, 2 or 3",
            ));
        }
        Ok(self.meshes[dimension - 1]
            .elements
            .keys()
            .map(move |&identifier| ElementId {
                dimension,
                identifier,
            }))
    }

    pub fn mesh_element_count(&self, dimension: usize) -> Result<usize, FieldError> {
        if !(1..=3).contains(&dimension) {
            return Err(FieldError::InvalidArgument(
                "element dimension must be 1, 2 or 3",
            ));
        }
        Ok(self.meshes[dimension - 1].elements.len())
    }

    pub fn element_nodes(&self, element: ElementId) -> Result<&[NodeId], FieldError> {
        self.element_data(element).map(|data| data.nodes.as_slice())
    }

    pub(crate) fn element_data(&self, element: ElementId) -> Result<&ElementData, FieldError> {
        if !(1..=3).contains(&element.dimension) {
            return Err(FieldError::UnknownElement);
        }
        self.meshes[element.dimension - 1]
            .elements
            .get(&element.identifier)
            .ok_or(FieldError::UnknownElement)
    }
}

/// Values of the `2^dimension` multilinear basis functions at `xi`.
pub(crate) fn basis_values(dimension: usize, xi: &[f64; 3]) -> Vec<f64> {
    let n = 1usize << dimension;
    let mut values = Vec::with_capacity(n);
    for local in 0..n {
        let mut phi = 1.0;
        for k in 0..dimension {
            phi *= if local & (1 << k) != 0 {
                xi[k]
            } else {
                1.0 - xi[k]
            };
        }
        values.push(phi);
    }
    values
}

/// Gradients of the multilinear basis functions with respect to `xi`.
pub(crate) fn basis_gradients(dimension: usize, xi: &[f64; 3]) -> Vec<[f64; 3]> {
    let n = 1usize << dimension;
    let mut gradients = Vec::with_capacity(n);
    for local in 0..n {
        let mut gradient = [0.0; 3];
        for direction in 0..dimension {
            let mut derivative = 1.0;
            for k in 0..dimension {
                let factor = if k == direction {
                    if local & (1 << k) != 0 {
                        1.0
                    } else {
                        -1.0
                    }
                } else if local & (1 << k) != 0 {
                    xi[k]
                } else {
                    1.0 - xi[k]
                };
                derivative *= factor;
            }
            gradient[direction] = derivative;
        }
        gradients.push(gradient);
    }
    gradients
}

const GAUSS_1_X: [f64; 1] = [0.5];
const GAUSS_1_W: [f64; 1] = [1.0];
const GAUSS_2_X: [f64; 2] = [0.2113248654051871, 0.7886751345948129];
const GAUSS_2_W: [f64; 2] = [0.5, 0.5];
const GAUSS_3_X: [f64; 3] = [0.1127016653792583, 0.5, 0.8872983346207417];
const GAUSS_3_W: [f64; 3] = [
    0.2777777777777778,
    0.4444444444444444,
    0.2777777777777778,
];
const GAUSS_4_X: [f64; 4] = [
    0.0694318442029737,
    0.3300094782075719,
    0.6699905217924281,
    0.9305681557970263,
];
const GAUSS_4_W: [f64; 4] = [
    0.1739274225687269,
    0.32607257743127305,
    0.32607257743127305,
    0.1739274225687269,
];

/// Gauss-Legendre abscissae and weights on [0, 1] for 1 to 4 points.
pub(crate) fn gauss_rule(points: usize) -> (&'static [f64], &'static [f64]) {
    match points {
        1 => (&GAUSS_1_X, &GAUSS_1_W),
        2 => (&GAUSS_2_X, &GAUSS_2_W),
        3 => (&GAUSS_3_X, &GAUSS_3_W),
        _ => (&GAUSS_4_X, &GAUSS_4_W),
    }
}
