use nalgebra::Point3;

/// A single atom record as read from a coordinate file.
///
/// Only the fields needed to rewrite a valid mmCIF `_atom_site` record are kept;
/// everything else in the source file is dropped on load.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// Atom serial number from the source file.
    pub serial: usize,
    /// The atom name (e.g., "CA", "N", "O").
    pub name: String,
    /// Residue (component) name, e.g. "ALA".
    pub residue_name: String,
    /// Chain identifier.
    pub chain_id: String,
    /// Residue sequence number.
    pub residue_number: isize,
    /// Element symbol, upper case (e.g., "C", "FE").
    pub element: String,
    /// The 3D coordinates of the atom in Angstroms.
    pub position: Point3<f64>,
    pub occupancy: f64,
    pub b_factor: f64,
    /// `true` for HETATM records.
    pub hetero: bool,
}

impl Atom {
    /// Creates a new `Atom` with default values for the bookkeeping fields.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the atom.
    /// * `element` - The element symbol.
    /// * `position` - The 3D coordinates of the atom.
    pub fn new(name: &str, element: &str, position: Point3<f64>) -> Self {
        Self {
            serial: 0,
            name: name.to_string(),
            residue_name: "UNK".to_string(),
            chain_id: "A".to_string(),
            residue_number: 1,
            element: element.to_ascii_uppercase(),
            position,
            occupancy: 1.0,
            b_factor: 0.0,
            hetero: false,
        }
    }
}

/// Guesses an element symbol from a PDB-style atom name when the element column is empty.
pub(crate) fn element_from_atom_name(name: &str) -> String {
    name.trim()
        .chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase().to_string())
        .unwrap_or_else(|| "X".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_atom_has_expected_default_fields() {
        let atom = Atom::new("CA", "c", Point3::new(1.0, 2.0, 3.0));

        assert_eq!(atom.name, "CA");
        assert_eq!(atom.element, "C");
        assert_eq!(atom.position, Point3::new(1.0, 2.0, 3.0));
        assert_eq!(atom.occupancy, 1.0);
        assert_eq!(atom.b_factor, 0.0);
        assert!(!atom.hetero);
    }

    #[test]
    fn element_is_guessed_from_first_letter_of_name() {
        assert_eq!(element_from_atom_name(" CA "), "C");
        assert_eq!(element_from_atom_name("1HB"), "H");
        assert_eq!(element_from_atom_name("123"), "X");
    }
}
