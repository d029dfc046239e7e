use crate::core::io::traits::{StructureFile, WritableStructureFile};
use crate::core::models::atom::{Atom, element_from_atom_name};
use crate::core::models::structure::{Model, Structure};
use nalgebra::Point3;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use thiserror::Error;

const ATOM_SITE_PREFIX: &str = "_atom_site.";

const WRITTEN_COLUMNS: [&str; 18] = [
    "group_PDB",
    "id",
    "type_symbol",
    "label_atom_id",
    "label_alt_id",
    "label_comp_id",
    "label_asym_id",
    "label_entity_id",
    "label_seq_id",
    "pdbx_PDB_ins_code",
    "Cartn_x",
    "Cartn_y",
    "Cartn_z",
    "occupancy",
    "B_iso_or_equiv",
    "auth_seq_id",
    "auth_asym_id",
    "pdbx_PDB_model_num",
];

#[derive(Debug, Error)]
pub enum CifError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("No _atom_site loop found")]
    MissingAtomSite,
    #[error("Required _atom_site column '{0}' is missing")]
    MissingColumn(&'static str),
    #[error("_atom_site loop has {values} values, not a multiple of its {columns} columns")]
    RaggedLoop { values: usize, columns: usize },
    #[error("Invalid number '{value}' in column '{column}' of atom {row}")]
    InvalidNumber {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Unterminated quoted value on line {0}")]
    UnterminatedQuote(usize),
    #[error("Multi-line text fields are not supported inside _atom_site (line {0})")]
    TextFieldUnsupported(usize),
}

/// Reader and writer for the `_atom_site` category of PDBx/mmCIF files.
///
/// Only the first data block is read. Written files contain a single `_atom_site`
/// loop, which is all downstream simulators need to place atoms.
pub struct CifFile;

impl StructureFile for CifFile {
    type Error = CifError;

    fn read_from(reader: &mut impl BufRead) -> Result<Structure, Self::Error> {
        let mut structure = Structure::default();
        let mut columns: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        let mut in_loop_header = false;
        let mut in_atom_site = false;
        let mut finished = false;

        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;
            let trimmed = line.trim();

            if finished {
                break;
            }

            if let Some(name) = trimmed.strip_prefix("data_") {
                if structure.name.is_empty() && columns.is_empty() {
                    structure.name = name.to_string();
                    continue;
                }
                break;
            }

            if trimmed.is_empty() || trimmed.starts_with('#') {
                if in_atom_site && !values.is_empty() {
                    finished = true;
                }
                continue;
            }

            if trimmed == "loop_" {
                if in_atom_site {
                    finished = true;
                    continue;
                }
                in_loop_header = true;
                continue;
            }

            if trimmed.starts_with('_') {
                if in_atom_site && !values.is_empty() {
                    finished = true;
                    continue;
                }
                let tag = trimmed.split_whitespace().next().unwrap_or(trimmed);
                match tag.strip_prefix(ATOM_SITE_PREFIX) {
                    Some(column) if in_loop_header || in_atom_site => {
                        in_atom_site = true;
                        columns.push(column.to_string());
                    }
                    _ => {
                        in_loop_header = false;
                    }
                }
                continue;
            }

            if in_atom_site {
                if line.starts_with(';') {
                    return Err(CifError::TextFieldUnsupported(line_num));
                }
                values.extend(tokenize(trimmed, line_num)?);
            } else {
                in_loop_header = false;
            }
        }

        if columns.is_empty() {
            return Err(CifError::MissingAtomSite);
        }
        if values.len() % columns.len() != 0 {
            return Err(CifError::RaggedLoop {
                values: values.len(),
                columns: columns.len(),
            });
        }

        structure.models = build_models(&columns, &values)?;
        Ok(structure)
    }
}

impl WritableStructureFile for CifFile {
    fn write_to(structure: &Structure, writer: &mut impl Write) -> Result<(), Self::Error> {
        let name = if structure.name.is_empty() {
            "structure"
        } else {
            structure.name.as_str()
        };
        writeln!(writer, "data_{}", sanitize_block_name(name))?;
        writeln!(writer, "#")?;
        writeln!(writer, "loop_")?;
        for column in WRITTEN_COLUMNS {
            writeln!(writer, "{ATOM_SITE_PREFIX}{column}")?;
        }

        let mut serial = 0usize;
        for model in &structure.models {
            for atom in &model.atoms {
                serial += 1;
                let group = if atom.hetero { "HETATM" } else { "ATOM" };
                let seq = atom.residue_number.to_string();
                writeln!(
                    writer,
                    "{} {} {} {} . {} {} ? {} ? {:.3} {:.3} {:.3} {:.2} {:.2} {} {} {}",
                    group,
                    serial,
                    quote_value(&atom.element),
                    quote_value(&atom.name),
                    quote_value(&atom.residue_name),
                    quote_value(&atom.chain_id),
                    seq,
                    atom.position.x,
                    atom.position.y,
                    atom.position.z,
                    atom.occupancy,
                    atom.b_factor,
                    seq,
                    quote_value(&atom.chain_id),
                    model.number,
                )?;
            }
        }
        writeln!(writer, "#")?;
        Ok(())
    }
}

fn build_models(columns: &[String], values: &[String]) -> Result<Vec<Model>, CifError> {
    let index: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();
    let find = |names: &[&'static str]| names.iter().find_map(|n| index.get(n).copied());
    let require = |name: &'static str| index.get(name).copied().ok_or(CifError::MissingColumn(name));

    let x_col = require("Cartn_x")?;
    let y_col = require("Cartn_y")?;
    let z_col = require("Cartn_z")?;
    let name_col = find(&["label_atom_id", "auth_atom_id"]).ok_or(CifError::MissingColumn("label_atom_id"))?;
    let element_col = find(&["type_symbol"]);
    let group_col = find(&["group_PDB"]);
    let id_col = find(&["id"]);
    let comp_col = find(&["label_comp_id", "auth_comp_id"]);
    let chain_col = find(&["auth_asym_id", "label_asym_id"]);
    let seq_col = find(&["auth_seq_id", "label_seq_id"]);
    let occupancy_col = find(&["occupancy"]);
    let b_col = find(&["B_iso_or_equiv"]);
    let model_col = find(&["pdbx_PDB_model_num"]);

    let mut models: Vec<Model> = Vec::new();

    for (row, record) in values.chunks(columns.len()).enumerate() {
        let get = |col: Option<usize>| col.map(|c| record[c].as_str()).filter(|v| !is_null(v));
        let number = |col: usize| -> Result<f64, CifError> {
            record[col].parse().map_err(|_| CifError::InvalidNumber {
                row: row + 1,
                column: columns[col].clone(),
                value: record[col].clone(),
            })
        };

        let name = &record[name_col];
        let element = get(element_col)
            .map(|e| e.to_ascii_uppercase())
            .unwrap_or_else(|| element_from_atom_name(name));
        let position = Point3::new(number(x_col)?, number(y_col)?, number(z_col)?);

        let mut atom = Atom::new(name, &element, position);
        atom.serial = get(id_col).and_then(|v| v.parse().ok()).unwrap_or(row + 1);
        atom.hetero = get(group_col) == Some("HETATM");
        if let Some(comp) = get(comp_col) {
            atom.residue_name = comp.to_string();
        }
        if let Some(chain) = get(chain_col) {
            atom.chain_id = chain.to_string();
        }
        atom.residue_number = get(seq_col).and_then(|v| v.parse().ok()).unwrap_or(0);
        atom.occupancy = get(occupancy_col).and_then(|v| v.parse().ok()).unwrap_or(1.0);
        atom.b_factor = get(b_col).and_then(|v| v.parse().ok()).unwrap_or(0.0);

        let model_number: usize = get(model_col).and_then(|v| v.parse().ok()).unwrap_or(1);
        match models.iter_mut().find(|m| m.number == model_number) {
            Some(model) => model.atoms.push(atom),
            None => {
                let mut model = Model::new(model_number);
                model.atoms.push(atom);
                models.push(model);
            }
        }
    }
    Ok(models)
}

fn is_null(value: &str) -> bool {
    value == "." || value == "?"
}

/// Splits one line of a CIF loop body into values, honouring single and double quotes.
///
/// A quote only closes a value when followed by whitespace or end of line, so names
/// such as `O5'` survive unquoted and `"O5'"` survives quoted.
fn tokenize(line: &str, line_num: usize) -> Result<Vec<String>, CifError> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        if chars[i] == '#' {
            break;
        }
        if chars[i] == '\'' || chars[i] == '"' {
            let quote = chars[i];
            let start = i + 1;
            let mut end = None;
            let mut j = start;
            while j < chars.len() {
                if chars[j] == quote && (j + 1 == chars.len() || chars[j + 1].is_whitespace()) {
                    end = Some(j);
                    break;
                }
                j += 1;
            }
            let end = end.ok_or(CifError::UnterminatedQuote(line_num))?;
            tokens.push(chars[start..end].iter().collect());
            i = end + 1;
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        }
    }
    Ok(tokens)
}

fn quote_value(value: &str) -> String {
    if value.is_empty() {
        return "?".to_string();
    }
    let needs_quotes = value.chars().any(char::is_whitespace)
        || value.starts_with(['_', '#', '$', '\'', '"', ';', '['])
        || is_null(value);
    if !needs_quotes {
        value.to_string()
    } else if value.contains('"') {
        format!("'{value}'")
    } else {
        format!("\"{value}\"")
    }
}

fn sanitize_block_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}
