use super::SimulatorError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Typed parakeet configuration document.
///
/// Only the fields the pipeline touches are varied per image; everything else comes
/// from [`ParakeetConfig::default`], the fixed template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParakeetConfig {
    pub cluster: ClusterSection,
    pub device: Device,
    pub microscope: Microscope,
    pub sample: Sample,
    pub scan: Scan,
    pub simulation: SimulationSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSection {
    pub max_workers: u32,
    pub method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Microscope {
    pub beam: Beam,
    pub detector: Detector,
    pub model: Option<String>,
    pub objective_lens: ObjectiveLens,
    pub phase_plate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    /// Dose in e/Å².
    pub electrons_per_angstrom: f64,
    /// Accelerating voltage in keV.
    pub energy: f64,
    pub energy_spread: f64,
    pub illumination_semiangle: f64,
    pub source_spread: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    pub nx: usize,
    pub ny: usize,
    pub pixel_size: f64,
    pub origin: [f64; 2],
    pub dqe: bool,
}

/// Aberration coefficients; `c_10` is defocus in Å (negative is underfocus) and
/// `c_30` spherical aberration in mm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveLens {
    pub c_10: i64,
    pub c_12: f64,
    pub c_21: f64,
    pub c_23: f64,
    pub c_30: f64,
    pub c_32: f64,
    pub c_34: f64,
    pub c_41: f64,
    pub c_43: f64,
    pub c_45: f64,
    pub c_50: f64,
    pub c_52: f64,
    pub c_54: f64,
    pub c_56: f64,
    pub phi_12: f64,
    pub phi_21: f64,
    pub phi_23: f64,
    pub phi_32: f64,
    pub phi_34: f64,
    pub phi_41: f64,
    pub phi_43: f64,
    pub phi_45: f64,
    pub phi_52: f64,
    pub phi_54: f64,
    pub phi_56: f64,
    pub c_c: f64,
    pub current_spread: f64,
    pub inner_aper_ang: f64,
    pub outer_aper_ang: f64,
    pub m: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "box")]
    pub box_size: [usize; 3],
    pub centre: [usize; 3],
    pub coords: Coords,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub filename: String,
    pub recentre: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    #[serde(rename = "type")]
    pub kind: ShapeKind,
    pub cube: Cube,
    pub margin: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Cube,
    Cuboid,
    Cylinder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cube {
    pub length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub mode: String,
    pub num_images: u32,
    pub start_angle: f64,
    pub step_angle: f64,
    pub exposure_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSection {
    pub division_thickness: f64,
    pub ice: bool,
    pub margin: usize,
    pub padding: usize,
    pub radiation_damage_model: bool,
    pub sensitivity_coefficient: f64,
    pub slice_thickness: f64,
}

impl Default for ParakeetConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterSection {
                max_workers: 1,
                method: None,
            },
            device: Device::Gpu,
            microscope: Microscope {
                beam: Beam {
                    electrons_per_angstrom: 30.0,
                    energy: 300.0,
                    energy_spread: 0.8,
                    illumination_semiangle: 0.02,
                    source_spread: 0.1,
                },
                detector: Detector {
                    nx: 1000,
                    ny: 1000,
                    pixel_size: 1.0,
                    origin: [0.0, 0.0],
                    dqe: false,
                },
                model: None,
                objective_lens: ObjectiveLens {
                    c_10: -20_000,
                    c_12: 0.0,
                    c_21: 0.0,
                    c_23: 0.0,
                    c_30: 2.7,
                    c_32: 0.0,
                    c_34: 0.0,
                    c_41: 0.0,
                    c_43: 0.0,
                    c_45: 0.0,
                    c_50: 0.0,
                    c_52: 0.0,
                    c_54: 0.0,
                    c_56: 0.0,
                    phi_12: 0.0,
                    phi_21: 0.0,
                    phi_23: 0.0,
                    phi_32: 0.0,
                    phi_34: 0.0,
                    phi_41: 0.0,
                    phi_43: 0.0,
                    phi_45: 0.0,
                    phi_52: 0.0,
                    phi_54: 0.0,
                    phi_56: 0.0,
                    c_c: 2.7,
                    current_spread: 0.33,
                    inner_aper_ang: 0.0,
                    outer_aper_ang: 0.0,
                    m: 0,
                },
                phase_plate: false,
            },
            sample: Sample {
                box_size: [1000, 1000, 1000],
                centre: [500, 500, 500],
                coords: Coords {
                    filename: String::new(),
                    recentre: true,
                },
                shape: Shape {
                    kind: ShapeKind::Cube,
                    cube: Cube { length: 1000.0 },
                    margin: [0.0, 0.0, 0.0],
                },
            },
            scan: Scan {
                mode: "still".to_string(),
                num_images: 1,
                start_angle: 0.0,
                step_angle: 0.0,
                exposure_time: 1.0,
            },
            simulation: SimulationSection {
                division_thickness: 100.0,
                ice: false,
                margin: 100,
                padding: 100,
                radiation_damage_model: false,
                sensitivity_coefficient: 0.022,
                slice_thickness: 3.0,
            },
        }
    }
}

/// Fills the fixed template for one image.
///
/// The sample box is twice the image sidelength with the particle at its centre and
/// the detector origin offset by half a sidelength. Defocus is given in microns
/// (positive is underfocus) and stored as `c_10` in whole Å, negative for underfocus.
pub fn generate_parakeet_config(
    structure_file: &str,
    image_sidelength: usize,
    defocus: f64,
) -> ParakeetConfig {
    let s = image_sidelength;
    let mut config = ParakeetConfig::default();

    config.sample.box_size = [2 * s, 2 * s, 2 * s];
    config.sample.centre = [s, s, s];
    config.microscope.detector.origin = [s as f64 / 2.0, s as f64 / 2.0];
    config.microscope.detector.nx = s;
    config.microscope.detector.ny = s;

    config.sample.coords.filename = structure_file.to_string();

    config.microscope.objective_lens.c_10 = (-1e4 * defocus).trunc() as i64;

    config
}

pub fn write_config(config: &ParakeetConfig, path: &Path) -> Result<(), SimulatorError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_yaml::to_writer(&mut writer, config)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn substitutions_follow_sidelength_and_defocus() {
        let config = generate_parakeet_config("6vxx_rotated.cif", 512, 1.5);

        assert_eq!(config.sample.box_size, [1024, 1024, 1024]);
        assert_eq!(config.sample.centre, [512, 512, 512]);
        assert_eq!(config.microscope.detector.origin, [256.0, 256.0]);
        assert_eq!(config.microscope.detector.nx, 512);
        assert_eq!(config.microscope.detector.ny, 512);
        assert_eq!(config.sample.coords.filename, "6vxx_rotated.cif");
        assert_eq!(config.microscope.objective_lens.c_10, -15_000);
    }

    #[test]
    fn defocus_conversion_truncates_toward_zero() {
        let config = generate_parakeet_config("x.cif", 64, 2.34567);
        assert_eq!(config.microscope.objective_lens.c_10, -23_456);
    }

    #[test]
    fn generation_is_pure() {
        assert_eq!(
            generate_parakeet_config("a.cif", 128, 3.0),
            generate_parakeet_config("a.cif", 128, 3.0)
        );
        assert_eq!(ParakeetConfig::default().sample.coords.filename, "");
    }

    #[test]
    fn yaml_document_uses_parakeet_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parakeet_config.yaml");
        let config = generate_parakeet_config("a.cif", 64, 1.0);

        write_config(&config, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();

        for section in ["cluster", "device", "microscope", "sample", "scan", "simulation"] {
            assert!(value.get(section).is_some(), "missing section {section}");
        }
        assert_eq!(value["device"].as_str(), Some("gpu"));
        assert_eq!(value["sample"]["box"][0].as_u64(), Some(128));
        assert_eq!(value["sample"]["shape"]["type"].as_str(), Some("cube"));
        assert_eq!(
            value["microscope"]["objective_lens"]["c_10"].as_i64(),
            Some(-10_000)
        );

        let decoded: ParakeetConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(decoded, config);
    }
}
