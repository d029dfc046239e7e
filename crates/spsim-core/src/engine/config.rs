use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions recognized as structure files, compared case-insensitively.
pub const STRUCTURE_FILE_EXTENSIONS: [&str; 2] = ["pdb", "cif"];

/// Exclusive upper bound on defocus values, in microns.
pub const MAX_DEFOCUS_MICRONS: f64 = 10.0;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Input directory '{}' does not exist", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Input path '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to scan input directory '{}': {message}", path.display())]
    DirectoryUnreadable { path: PathBuf, message: String },

    #[error("Directory '{}' contains no structure files (cif/pdb)", .0.display())]
    NoStructureFiles(PathBuf),

    #[error("Number of images must be positive")]
    ZeroImages,

    #[error("Image sidelength must be positive")]
    ZeroSidelength,

    #[error("Image sidelength must be divisible by two, got {0}")]
    OddSidelength(usize),

    #[error("Defocus values must be positive, got range ({lower}, {upper})")]
    NonPositiveDefocus { lower: f64, upper: f64 },

    #[error("Defocus range is inverted: lower bound {lower} exceeds upper bound {upper}")]
    InvertedDefocusRange { lower: f64, upper: f64 },

    #[error("Defocus upper bound {0} must be below 10 microns")]
    DefocusTooLarge(f64),

    #[error("Output basename must not be empty")]
    EmptyOutputBasename,
}

/// Defocus range in microns, positive is underfocus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct DefocusRange {
    pub lower: f64,
    pub upper: f64,
}

impl DefocusRange {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (lower, upper) = (self.lower, self.upper);
        // NaN fails every comparison, so it is rejected here too.
        if !(lower > 0.0 && upper > 0.0) {
            return Err(ConfigError::NonPositiveDefocus { lower, upper });
        }
        if lower > upper {
            return Err(ConfigError::InvertedDefocusRange { lower, upper });
        }
        if upper >= MAX_DEFOCUS_MICRONS {
            return Err(ConfigError::DefocusTooLarge(upper));
        }
        Ok(())
    }
}

impl From<(f64, f64)> for DefocusRange {
    fn from((lower, upper): (f64, f64)) -> Self {
        Self { lower, upper }
    }
}

impl From<DefocusRange> for (f64, f64) {
    fn from(range: DefocusRange) -> Self {
        (range.lower, range.upper)
    }
}

/// Global parameters defining an entire single-particle simulation.
///
/// Built through [`SimulationConfigBuilder`], which validates everything once. When
/// deserialized from saved metadata only the numeric invariants are re-checked; the
/// input directory may legitimately live on another machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSimulationConfig")]
pub struct SimulationConfig {
    input_directory: PathBuf,
    n_images: usize,
    image_sidelength: usize,
    defocus_range: DefocusRange,
    output_basename: String,
}

#[derive(Deserialize)]
struct RawSimulationConfig {
    input_directory: PathBuf,
    n_images: usize,
    image_sidelength: usize,
    defocus_range: DefocusRange,
    output_basename: String,
}

impl TryFrom<RawSimulationConfig> for SimulationConfig {
    type Error = ConfigError;

    fn try_from(raw: RawSimulationConfig) -> Result<Self, Self::Error> {
        let config = Self {
            input_directory: raw.input_directory,
            n_images: raw.n_images,
            image_sidelength: raw.image_sidelength,
            defocus_range: raw.defocus_range,
            output_basename: raw.output_basename,
        };
        config.validate_values()?;
        Ok(config)
    }
}

impl SimulationConfig {
    pub fn builder() -> SimulationConfigBuilder {
        SimulationConfigBuilder::new()
    }

    pub fn input_directory(&self) -> &Path {
        &self.input_directory
    }

    pub fn n_images(&self) -> usize {
        self.n_images
    }

    pub fn image_sidelength(&self) -> usize {
        self.image_sidelength
    }

    pub fn defocus_range(&self) -> DefocusRange {
        self.defocus_range
    }

    pub fn output_basename(&self) -> &str {
        &self.output_basename
    }

    /// All structure files below the input directory, recursively, in sorted order.
    ///
    /// Recomputed from disk on every call so that it always reflects the current
    /// directory contents.
    pub fn structure_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        collect_structure_files(&self.input_directory, &mut files)?;
        files.sort();
        Ok(files)
    }

    /// Location of the result store, `{output_basename}.zarr`.
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.zarr", self.output_basename))
    }

    /// Location of the JSON metadata, `{output_basename}.json`.
    pub fn metadata_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.json", self.output_basename))
    }

    fn validate_values(&self) -> Result<(), ConfigError> {
        if self.n_images == 0 {
            return Err(ConfigError::ZeroImages);
        }
        if self.image_sidelength == 0 {
            return Err(ConfigError::ZeroSidelength);
        }
        if self.image_sidelength % 2 != 0 {
            return Err(ConfigError::OddSidelength(self.image_sidelength));
        }
        self.defocus_range.validate()?;
        if self.output_basename.trim().is_empty() {
            return Err(ConfigError::EmptyOutputBasename);
        }
        Ok(())
    }

    fn validate_input_directory(&self) -> Result<(), ConfigError> {
        let dir = &self.input_directory;
        if !dir.exists() {
            return Err(ConfigError::DirectoryNotFound(dir.clone()));
        }
        if !dir.is_dir() {
            return Err(ConfigError::NotADirectory(dir.clone()));
        }
        let files = self
            .structure_files()
            .map_err(|e| ConfigError::DirectoryUnreadable {
                path: dir.clone(),
                message: e.to_string(),
            })?;
        if files.is_empty() {
            return Err(ConfigError::NoStructureFiles(dir.clone()));
        }
        Ok(())
    }
}

pub fn is_structure_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            STRUCTURE_FILE_EXTENSIONS
                .iter()
                .any(|known| e.eq_ignore_ascii_case(known))
        })
}

fn collect_structure_files(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_structure_files(&path, files)?;
        } else if path.is_file() && is_structure_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct SimulationConfigBuilder {
    input_directory: Option<PathBuf>,
    n_images: Option<usize>,
    image_sidelength: Option<usize>,
    defocus_range: Option<DefocusRange>,
    output_basename: Option<String>,
}

impl SimulationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_directory = Some(path.into());
        self
    }
    pub fn n_images(mut self, n: usize) -> Self {
        self.n_images = Some(n);
        self
    }
    pub fn image_sidelength(mut self, sidelength: usize) -> Self {
        self.image_sidelength = Some(sidelength);
        self
    }
    pub fn defocus_range(mut self, lower: f64, upper: f64) -> Self {
        self.defocus_range = Some(DefocusRange::new(lower, upper));
        self
    }
    pub fn output_basename(mut self, basename: impl Into<String>) -> Self {
        self.output_basename = Some(basename.into());
        self
    }

    /// Validates all parameters, numeric ones first, then the input directory.
    pub fn build(self) -> Result<SimulationConfig, ConfigError> {
        let config = SimulationConfig {
            input_directory: self
                .input_directory
                .ok_or(ConfigError::MissingParameter("input_directory"))?,
            n_images: self
                .n_images
                .ok_or(ConfigError::MissingParameter("n_images"))?,
            image_sidelength: self
                .image_sidelength
                .ok_or(ConfigError::MissingParameter("image_sidelength"))?,
            defocus_range: self
                .defocus_range
                .ok_or(ConfigError::MissingParameter("defocus_range"))?,
            output_basename: self
                .output_basename
                .ok_or(ConfigError::MissingParameter("output_basename"))?,
        };
        config.validate_values()?;
        config.validate_input_directory()?;
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    pub(crate) const TINY_PDB: &str = "\
ATOM      1  N   ALA A   1       1.000   0.000   0.000  1.00  0.00           N
ATOM      2  CA  ALA A   1       0.000   1.000   0.000  1.00  0.00           C
ATOM      3  C   ALA A   1       0.000   0.000   1.000  1.00  0.00           C
END
";

    pub(crate) fn structure_dir(names: &[&str]) -> TempDir {
        let dir = tempdir().unwrap();
        for name in names {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, TINY_PDB).unwrap();
        }
        dir
    }

    pub(crate) fn valid_builder(dir: &Path) -> SimulationConfigBuilder {
        SimulationConfig::builder()
            .input_directory(dir)
            .n_images(200)
            .image_sidelength(512)
            .defocus_range(0.5, 4.5)
            .output_basename(dir.join("test").to_string_lossy().into_owned())
    }

    #[test]
    fn valid_config_builds() {
        let dir = structure_dir(&["6vxx.pdb"]);
        let config = valid_builder(dir.path()).build().unwrap();

        assert_eq!(config.n_images(), 200);
        assert_eq!(config.image_sidelength(), 512);
        assert_eq!(config.defocus_range(), DefocusRange::new(0.5, 4.5));
    }

    #[test]
    fn odd_sidelength_is_rejected() {
        let dir = structure_dir(&["6vxx.pdb"]);
        let result = valid_builder(dir.path()).image_sidelength(511).build();
        assert_eq!(result, Err(ConfigError::OddSidelength(511)));
    }

    #[test]
    fn zero_values_are_rejected() {
        let dir = structure_dir(&["6vxx.pdb"]);
        assert_eq!(
            valid_builder(dir.path()).n_images(0).build(),
            Err(ConfigError::ZeroImages)
        );
        assert_eq!(
            valid_builder(dir.path()).image_sidelength(0).build(),
            Err(ConfigError::ZeroSidelength)
        );
    }

    #[test]
    fn invalid_defocus_ranges_are_rejected() {
        let dir = structure_dir(&["6vxx.pdb"]);
        assert!(matches!(
            valid_builder(dir.path()).defocus_range(0.0, 1.0).build(),
            Err(ConfigError::NonPositiveDefocus { .. })
        ));
        assert!(matches!(
            valid_builder(dir.path()).defocus_range(3.0, 1.0).build(),
            Err(ConfigError::InvertedDefocusRange { .. })
        ));
        assert_eq!(
            valid_builder(dir.path()).defocus_range(1.0, 10.0).build(),
            Err(ConfigError::DefocusTooLarge(10.0))
        );
        assert!(matches!(
            valid_builder(dir.path()).defocus_range(f64::NAN, 1.0).build(),
            Err(ConfigError::NonPositiveDefocus { .. })
        ));
    }

    #[test]
    fn equal_defocus_bounds_are_allowed() {
        let dir = structure_dir(&["6vxx.pdb"]);
        assert!(valid_builder(dir.path()).defocus_range(2.0, 2.0).build().is_ok());
    }

    #[test]
    fn missing_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = valid_builder(dir.path()).input_directory(&missing).build();
        assert_eq!(result, Err(ConfigError::DirectoryNotFound(missing)));
    }

    #[test]
    fn file_as_input_directory_is_rejected() {
        let dir = structure_dir(&["6vxx.pdb"]);
        let file = dir.path().join("6vxx.pdb");
        let result = valid_builder(dir.path()).input_directory(&file).build();
        assert_eq!(result, Err(ConfigError::NotADirectory(file)));
    }

    #[test]
    fn directory_without_structures_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let result = valid_builder(dir.path()).build();
        assert_eq!(
            result,
            Err(ConfigError::NoStructureFiles(dir.path().to_path_buf()))
        );
    }

    #[test]
    fn missing_parameter_is_reported() {
        let result = SimulationConfig::builder().n_images(1).build();
        assert_eq!(result, Err(ConfigError::MissingParameter("input_directory")));
    }

    #[test]
    fn structure_files_are_found_recursively_and_sorted() {
        let dir = structure_dir(&["b.pdb", "a.CIF", "nested/c.pdb"]);
        fs::write(dir.path().join("ignored.txt"), "").unwrap();
        let config = valid_builder(dir.path()).build().unwrap();

        let files = config.structure_files().unwrap();

        assert_eq!(
            files,
            vec![
                dir.path().join("a.CIF"),
                dir.path().join("b.pdb"),
                dir.path().join("nested/c.pdb"),
            ]
        );
    }

    #[test]
    fn structure_files_reflect_directory_changes() {
        let dir = structure_dir(&["a.pdb"]);
        let config = valid_builder(dir.path()).build().unwrap();
        assert_eq!(config.structure_files().unwrap().len(), 1);

        fs::write(dir.path().join("b.cif"), "").unwrap();

        assert_eq!(config.structure_files().unwrap().len(), 2);
    }

    #[test]
    fn output_paths_derive_from_basename() {
        let dir = structure_dir(&["a.pdb"]);
        let config = valid_builder(dir.path()).output_basename("run1").build().unwrap();
        assert_eq!(config.store_path(), PathBuf::from("run1.zarr"));
        assert_eq!(config.metadata_path(), PathBuf::from("run1.json"));
    }

    #[test]
    fn deserialization_rechecks_numeric_invariants() {
        let json = r#"{"input_directory":"/nowhere","n_images":2,"image_sidelength":63,
            "defocus_range":[0.5,1.5],"output_basename":"x"}"#;
        let result: Result<SimulationConfig, _> = serde_json::from_str(json);
        assert!(result.unwrap_err().to_string().contains("divisible by two"));
    }

    #[test]
    fn defocus_range_serializes_as_pair() {
        let json = serde_json::to_string(&DefocusRange::new(0.5, 4.5)).unwrap();
        assert_eq!(json, "[0.5,4.5]");
    }
}
