use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StarError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Row {row} of table '{table}' has {actual} values, expected {expected}")]
    RowLength {
        table: String,
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// A single `data_` block written as one `loop_` table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StarTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StarTable {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn validate(&self) -> Result<(), StarError> {
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(StarError::RowLength {
                    table: self.name.clone(),
                    row: i + 1,
                    expected: self.columns.len(),
                    actual: row.len(),
                });
            }
        }
        Ok(())
    }
}

/// Writes tables in the RELION 3.1 STAR layout: one `data_<name>` block per table,
/// each holding a single loop with numbered column labels.
pub fn write_star(tables: &[StarTable], writer: &mut impl Write) -> Result<(), StarError> {
    for table in tables {
        table.validate()?;
    }

    writeln!(writer, "# Created by spsim {}", env!("CARGO_PKG_VERSION"))?;
    for table in tables {
        writeln!(writer)?;
        writeln!(writer, "data_{}", table.name)?;
        writeln!(writer)?;
        writeln!(writer, "loop_")?;
        for (i, column) in table.columns.iter().enumerate() {
            writeln!(writer, "_{} #{}", column, i + 1)?;
        }
        for row in &table.rows {
            writeln!(writer, "{}", row.join("\t"))?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn write_star_to_path<P: AsRef<Path>>(tables: &[StarTable], path: P) -> Result<(), StarError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_star(tables, &mut writer)?;
    writer.flush()?;
    Ok(())
}
