use super::atom::Atom;
use nalgebra::{Point3, Vector3};

/// One model (conformer) of a structure, e.g. a single NMR model or MD frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    /// Model number as written in the source file (1-based).
    pub number: usize,
    pub atoms: Vec<Atom>,
}

impl Model {
    pub fn new(number: usize) -> Self {
        Self {
            number,
            atoms: Vec::new(),
        }
    }

    pub fn coordinates(&self) -> Vec<Point3<f64>> {
        self.atoms.iter().map(|a| a.position).collect()
    }

    /// Replaces atom positions in order. Extra coordinates are ignored.
    pub fn set_coordinates(&mut self, coordinates: &[Point3<f64>]) {
        for (atom, position) in self.atoms.iter_mut().zip(coordinates) {
            atom.position = *position;
        }
    }

    /// Arithmetic mean of the atom positions, `None` for an empty model.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.atoms.is_empty() {
            return None;
        }
        let sum = self
            .atoms
            .iter()
            .fold(Vector3::zeros(), |acc, atom| acc + atom.position.coords);
        Some(Point3::from(sum / self.atoms.len() as f64))
    }
}

/// A molecular structure: a named collection of models.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Structure {
    /// Entry name, written as the mmCIF `data_` block name.
    pub name: String,
    pub models: Vec<Model>,
}

impl Structure {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            models: Vec::new(),
        }
    }

    pub fn atom_count(&self) -> usize {
        self.models.iter().map(|m| m.atoms.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.atom_count() == 0
    }
}
