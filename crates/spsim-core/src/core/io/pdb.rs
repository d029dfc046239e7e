use crate::core::io::traits::StructureFile;
use crate::core::models::atom::{Atom, element_from_atom_name};
use crate::core::models::structure::{Model, Structure};
use nalgebra::Point3;
use std::io::{self, BufRead};
use thiserror::Error;

const MIN_COORDINATE_LINE_LENGTH: usize = 54;

#[derive(Debug, Error)]
pub enum PdbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse { line: usize, kind: PdbParseErrorKind },
    #[error("File contains no ATOM or HETATM records")]
    NoAtoms,
}

#[derive(Debug, Error)]
pub enum PdbParseErrorKind {
    #[error("Invalid integer format in columns {columns} (value: '{value}')")]
    InvalidInt { columns: String, value: String },
    #[error("Invalid float format in columns {columns} (value: '{value}')")]
    InvalidFloat { columns: String, value: String },
    #[error("Line is too short for ATOM/HETATM record (must be at least 54 chars)")]
    LineTooShort,
}

fn slice_and_trim(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    line.get(start..end).unwrap_or("").trim()
}

fn parse_float(line: &str, line_num: usize, start: usize, end: usize) -> Result<f64, PdbError> {
    let value = slice_and_trim(line, start, end);
    value.parse().map_err(|_| PdbError::Parse {
        line: line_num,
        kind: PdbParseErrorKind::InvalidFloat {
            columns: format!("{}-{}", start + 1, end),
            value: value.into(),
        },
    })
}

fn parse_optional_float(line: &str, start: usize, end: usize, default: f64) -> f64 {
    slice_and_trim(line, start, end).parse().unwrap_or(default)
}

/// Reader for the fixed-column Protein Data Bank format.
///
/// Only coordinate records (`ATOM`, `HETATM`) and model delimiters (`MODEL`, `ENDMDL`)
/// are interpreted; everything else is skipped. The format is read-only here, rotated
/// structures are always written as mmCIF.
pub struct PdbFile;

impl StructureFile for PdbFile {
    type Error = PdbError;

    fn read_from(reader: &mut impl BufRead) -> Result<Structure, Self::Error> {
        let mut structure = Structure::default();
        let mut current = Model::new(1);
        let mut in_explicit_model = false;

        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;
            let record_type = slice_and_trim(&line, 0, 6);

            match record_type {
                "HEADER" => {
                    structure.name = slice_and_trim(&line, 62, 66).to_string();
                }
                "MODEL" => {
                    let value = slice_and_trim(&line, 10, 14);
                    let number = value.parse().map_err(|_| PdbError::Parse {
                        line: line_num,
                        kind: PdbParseErrorKind::InvalidInt {
                            columns: "11-14".into(),
                            value: value.into(),
                        },
                    })?;
                    if !current.atoms.is_empty() {
                        structure.models.push(std::mem::take(&mut current));
                    }
                    current = Model::new(number);
                    in_explicit_model = true;
                }
                "ENDMDL" => {
                    if in_explicit_model {
                        let number = current.number + 1;
                        structure
                            .models
                            .push(std::mem::replace(&mut current, Model::new(number)));
                        in_explicit_model = false;
                    }
                }
                "ATOM" | "HETATM" => {
                    if line.len() < MIN_COORDINATE_LINE_LENGTH {
                        return Err(PdbError::Parse {
                            line: line_num,
                            kind: PdbParseErrorKind::LineTooShort,
                        });
                    }
                    let ordinal = current.atoms.len() + 1;
                    current
                        .atoms
                        .push(parse_atom(&line, line_num, record_type, ordinal)?);
                }
                _ => {}
            }
        }

        if !current.atoms.is_empty() {
            structure.models.push(current);
        }
        if structure.is_empty() {
            return Err(PdbError::NoAtoms);
        }
        Ok(structure)
    }
}

/// Serials past 99999 are written as hybrid-36 or `*****`; those fall back to the
/// atom's position within its model.
fn parse_atom(
    line: &str,
    line_num: usize,
    record_type: &str,
    ordinal: usize,
) -> Result<Atom, PdbError> {
    let serial = slice_and_trim(line, 6, 11).parse().unwrap_or(ordinal);
    let res_seq_str = slice_and_trim(line, 22, 26);
    let residue_number = res_seq_str.parse().map_err(|_| PdbError::Parse {
        line: line_num,
        kind: PdbParseErrorKind::InvalidInt {
            columns: "23-26".into(),
            value: res_seq_str.into(),
        },
    })?;

    let x = parse_float(line, line_num, 30, 38)?;
    let y = parse_float(line, line_num, 38, 46)?;
    let z = parse_float(line, line_num, 46, 54)?;

    let name = slice_and_trim(line, 12, 16);
    let element = match slice_and_trim(line, 76, 78) {
        "" => element_from_atom_name(name),
        symbol => symbol.to_ascii_uppercase(),
    };

    let mut atom = Atom::new(name, &element, Point3::new(x, y, z));
    atom.serial = serial;
    atom.residue_name = slice_and_trim(line, 17, 20).to_string();
    atom.chain_id = match slice_and_trim(line, 21, 22) {
        "" => "A".to_string(),
        chain => chain.to_string(),
    };
    atom.residue_number = residue_number;
    atom.occupancy = parse_optional_float(line, 54, 60, 1.0);
    atom.b_factor = parse_optional_float(line, 60, 66, 0.0);
    atom.hetero = record_type == "HETATM";
    Ok(atom)
}
