use super::node::Nodeset;
use super::{FieldError, Region};

/// Opaque handle to a field of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Field(pub(crate) u32);

/// How a field obtains its values.
#[derive(Debug, Clone)]
pub(crate) enum FieldDefinition {
    /// Interpolates parameters stored at nodes.
    FiniteElement,
    /// Location-independent component values.
    Constant { values: Vec<f64> },
    Add { left: Field, right: Field },
    Subtract { left: Field, right: Field },
    Multiply { left: Field, right: Field },
    /// Extracts one component of the source.
    Component { source: Field, index: usize },
    /// Stacks the components of the sources in order.
    Concatenate { sources: Vec<Field> },
    /// Scalar sum of all source components.
    SumComponents { source: Field },
    /// Componentwise sum of the integrand over the nodes of a nodeset.
    NodesetSum { integrand: Field, nodeset: Nodeset },
    /// Componentwise sum of squared integrand values over a nodeset.
    NodesetSumSquares { integrand: Field, nodeset: Nodeset },
    /// Componentwise Gauss-Legendre integral over all elements of a mesh.
    MeshIntegral {
        integrand: Field,
        coordinates: Field,
        dimension: usize,
        gauss_points: usize,
    },
    /// As `MeshIntegral` with the integrand components squared.
    MeshIntegralSquares {
        integrand: Field,
        coordinates: Field,
        dimension: usize,
        gauss_points: usize,
    },
}

#[derive(Debug)]
pub(crate) struct FieldData {
    pub(crate) name: String,
    pub(crate) definition: FieldDefinition,
    pub(crate) component_count: usize,
}

impl Region {
    /// Creates a field interpolating node parameters over elements.
    pub fn create_finite_element_field(
        &mut self,
        name: &str,
        component_count: usize,
    ) -> Result<Field, FieldError> {
        if component_count == 0 {
            return Err(FieldError::InvalidArgument(
                "a field needs at least one component",
            ));
        }
        self.register_field(name, FieldDefinition::FiniteElement, component_count)
    }

    /// Creates a field with location-independent component values.
    pub fn create_constant_field(&mut self, name: &str, values: &[f64]) -> Result<Field, FieldError> {
        if values.is_empty() {
            return Err(FieldError::InvalidArgument(
                "a field needs at least one component",
            ));
        }
        self.register_field(
            name,
            FieldDefinition::Constant {
                values: values.to_vec(),
            },
            values.len(),
        )
    }

    pub fn create_add_field(
        &mut self,
        name: &str,
        left: Field,
        right: Field,
    ) -> Result<Field, FieldError> {
        let components = self.equal_component_count(left, right)?;
        self.register_field(name, FieldDefinition::Add { left, right }, components)
    }

    pub fn create_subtract_field(
        &mut self,
        name: &str,
        left: Field,
        right: Field,
    ) -> Result<Field, FieldError> {
        let components = self.equal_component_count(left, right)?;
        self.register_field(name, FieldDefinition::Subtract { left, right }, components)
    }

    /// Componentwise product. A one-component operand broadcasts over the
    /// other operand's components.
    pub fn create_multiply_field(
        &mut self,
        name: &str,
        left: Field,
        right: Field,
    ) -> Result<Field, FieldError> {
        let components = self.binary_component_count(left, right)?;
        self.register_field(name, FieldDefinition::Multiply { left, right }, components)
    }

    pub fn create_component_field(
        &mut self,
        name: &str,
        source: Field,
        index: usize,
    ) -> Result<Field, FieldError> {
        let components = self.field_component_count(source)?;
        if index >= components {
            return Err(FieldError::InvalidArgument(
                "component index exceeds the source field",
            ));
        }
        self.register_field(name, FieldDefinition::Component { source, index }, 1)
    }

    pub fn create_concatenate_field(
        &mut self,
        name: &str,
        sources: &[Field],
    ) -> Result<Field, FieldError> {
        if sources.is_empty() {
            return Err(FieldError::InvalidArgument(
                "concatenation takes at least one source field",
            ));
        }
        let mut components = 0;
        for &source in sources {
            components += self.field_component_count(source)?;
        }
        self.register_field(
            name,
            FieldDefinition::Concatenate {
                sources: sources.to_vec(),
            },
            components,
        )
    }

    pub fn create_sum_components_field(
        &mut self,
        name: &str,
        source: Field,
    ) -> Result<Field, FieldError> {
        self.field_component_count(source)?;
        self.register_field(name, FieldDefinition::SumComponents { source }, 1)
    }

    pub fn create_nodeset_sum_field(
        &mut self,
        name: &str,
        integrand: Field,
        nodeset: Nodeset,
    ) -> Result<Field, FieldError> {
        let components = self.field_component_count(integrand)?;
        self.nodeset_data(nodeset)?;
        self.register_field(
            name,
            FieldDefinition::NodesetSum { integrand, nodeset },
            components,
        )
    }

    pub fn create_nodeset_sum_squares_field(
        &mut self,
        name: &str,
        integrand: Field,
        nodeset: Nodeset,
    ) -> Result<Field, FieldError> {
        let components = self.field_component_count(integrand)?;
        self.nodeset_data(nodeset)?;
        self.register_field(
            name,
            FieldDefinition::NodesetSumSquares { integrand, nodeset },
            components,
        )
    }

    pub fn create_mesh_integral_field(
        &mut self,
        name: &str,
        integrand: Field,
        coordinates: Field,
        dimension: usize,
        gauss_points: usize,
    ) -> Result<Field, FieldError> {
        let components =
            self.mesh_integral_component_count(integrand, coordinates, dimension, gauss_points)?;
        self.register_field(
            name,
            FieldDefinition::MeshIntegral {
                integrand,
                coordinates,
                dimension,
                gauss_points,
            },
            components,
        )
    }

    pub fn create_mesh_integral_squares_field(
        &mut self,
        name: &str,
        integrand: Field,
        coordinates: Field,
        dimension: usize,
        gauss_points: usize,
    ) -> Result<Field, FieldError> {
        let components =
            self.mesh_integral_component_count(integrand, coordinates, dimension, gauss_points)?;
        self.register_field(
            name,
            FieldDefinition::MeshIntegralSquares {
                integrand,
                coordinates,
                dimension,
                gauss_points,
            },
            components,
        )
    }

    pub fn find_field(&self, name: &str) -> Option<Field> {
        self.field_names.get(name).copied()
    }

    pub fn field_name(&self, field: Field) -> Result<&str, FieldError> {
        Ok(self.field_data(field)?.name.as_str())
    }

    pub fn field_component_count(&self, field: Field) -> Result<usize, FieldError> {
        Ok(self.field_data(field)?.component_count)
    }

    pub fn is_finite_element_field(&self, field: Field) -> bool {
        matches!(
            self.field_data(field).map(|data| &data.definition),
            Ok(FieldDefinition::FiniteElement)
        )
    }

    pub fn is_constant_field(&self, field: Field) -> bool {
        matches!(
            self.field_data(field).map(|data| &data.definition),
            Ok(FieldDefinition::Constant { .. })
        )
    }

    pub fn constant_field_values(&self, field: Field) -> Result<&[f64], FieldError> {
        match &self.field_data(field)?.definition {
            FieldDefinition::Constant { values } => Ok(values),
            _ => Err(FieldError::InvalidArgument("not a constant field")),
        }
    }

    /// Replaces all component values of a constant field.
    pub fn set_constant_field_values(
        &mut self,
        field: Field,
        values: &[f64],
    ) -> Result<(), FieldError> {
        let expected = self.field_component_count(field)?;
        if values.len() != expected {
            return Err(FieldError::ComponentMismatch {
                expected,
                found: values.len(),
            });
        }
        match &mut self.field_data_mut(field)?.definition {
            FieldDefinition::Constant { values: stored } => {
                stored.copy_from_slice(values);
            }
            _ => return Err(FieldError::InvalidArgument("not a constant field")),
        }
        self.mark_field_changed(field);
        Ok(())
    }

    /// Writes one constant component without change notification.
    pub(crate) fn write_constant_component(
        &mut self,
        field: Field,
        component: usize,
        value: f64,
    ) -> Result<(), FieldError> {
        match &mut self.field_data_mut(field)?.definition {
            FieldDefinition::Constant { values } => {
                let slot = values.get_mut(component).ok_or(FieldError::Undefined)?;
                *slot = value;
                Ok(())
            }
            _ => Err(FieldError::InvalidArgument("not a constant field")),
        }
    }

    /// Whether `field` is `target` or evaluates values of `target`.
    pub fn field_depends_on(&self, field: Field, target: Field) -> bool {
        if field == target {
            return true;
        }
        let Ok(data) = self.field_data(field) else {
            return false;
        };
        match &data.definition {
            FieldDefinition::FiniteElement | FieldDefinition::Constant { .. } => false,
            FieldDefinition::Add { left, right }
            | FieldDefinition::Subtract { left, right }
            | FieldDefinition::Multiply { left, right } => {
                self.field_depends_on(*left, target) || self.field_depends_on(*right, target)
            }
            FieldDefinition::Component { source, .. }
            | FieldDefinition::SumComponents { source } => self.field_depends_on(*source, target),
            FieldDefinition::Concatenate { sources } => sources
                .iter()
                .any(|&source| self.field_depends_on(source, target)),
            FieldDefinition::NodesetSum { integrand, .. }
            | FieldDefinition::NodesetSumSquares { integrand, .. } => {
                self.field_depends_on(*integrand, target)
            }
            FieldDefinition::MeshIntegral {
                integrand,
                coordinates,
                ..
            }
            | FieldDefinition::MeshIntegralSquares {
                integrand,
                coordinates,
                ..
            } => {
                self.field_depends_on(*integrand, target)
                    || self.field_depends_on(*coordinates, target)
            }
        }
    }

    fn register_field(
        &mut self,
        name: &str,
        definition: FieldDefinition,
        component_count: usize,
    ) -> Result<Field, FieldError> {
        if name.is_empty() {
            return Err(FieldError::InvalidArgument("field names must be non-empty"));
        }
        if self.field_names.contains_key(name) {
            return Err(FieldError::DuplicateName(name.to_string()));
        }
        let field = Field(self.fields.len() as u32);
        self.fields.push(FieldData {
            name: name.to_string(),
            definition,
            component_count,
        });
        self.field_names.insert(name.to_string(), field);
        Ok(field)
    }

    fn equal_component_count(&self, left: Field, right: Field) -> Result<usize, FieldError> {
        let left_components = self.field_component_count(left)?;
        let right_components = self.field_component_count(right)?;
        if left_components == right_components {
            Ok(left_components)
        } else {
            Err(FieldError::ComponentMismatch {
                expected: left_components,
                found: right_components,
            })
        }
    }

    fn binary_component_count(&self, left: Field, right: Field) -> Result<usize, FieldError> {
        let left_components = self.field_component_count(left)?;
        let right_components = self.field_component_count(right)?;
        if left_components == right_components {
            Ok(left_components)
        } else if left_components == 1 {
            Ok(right_components)
        } else if right_components == 1 {
            Ok(left_components)
        } else {
            Err(FieldError::ComponentMismatch {
                expected: left_components,
                found: right_components,
            })
        }
    }

    fn mesh_integral_component_count(
        &self,
        integrand: Field,
        coordinates: Field,
        dimension: usize,
        gauss_points: usize,
    ) -> Result<usize, FieldError> {
        if !(1..=3).contains(&dimension) {
            return Err(FieldError::InvalidArgument(
                "mesh dimension must be 1, 2 or 3",
            ));
        }
        if !(1..=4).contains(&gauss_points) {
            return Err(FieldError::InvalidArgument(
                "between 1 and 4 Gauss points are supported",
            ));
        }
        let components = self.field_component_count(integrand)?;
        if self.field_component_count(coordinates)? < dimension {
            return Err(FieldError::InvalidArgument(
                "coordinate field needs at least one component per mesh dimension",
            ));
        }
        Ok(components)
    }

    pub(crate) fn field_data(&self, field: Field) -> Result<&FieldData, FieldError> {
        self.fields
            .get(field.0 as usize)
            .ok_or(FieldError::UnknownField)
    }

    fn field_data_mut(&mut self, field: Field) -> Result<&mut FieldData, FieldError> {
        self.fields
            .get_mut(field.0 as usize)
            .ok_or(FieldError::UnknownField)
    }
}
