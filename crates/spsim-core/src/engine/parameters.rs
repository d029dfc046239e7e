use super::config::MAX_DEFOCUS_MICRONS;
use crate::core::utils::geometry::EulerZyz;
use chrono::Utc;
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static ROTATED_FILENAME_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Defocus {0} is outside the open interval (0, 10) microns")]
    DefocusOutOfRange(f64),
    #[error("Failed to resolve structure path '{}': {source}", path.display())]
    UnresolvablePath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Parameters for a single image of a single-particle simulation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(try_from = "RawSingleImageParameters")]
pub struct SingleImageParameters {
    input_structure: PathBuf,
    #[serde(serialize_with = "relion_eulers::serialize")]
    rotation: UnitQuaternion<f64>,
    defocus: f64,
    #[serde(skip)]
    rotated_structure_filename: OnceLock<String>,
}

#[derive(Deserialize)]
struct RawSingleImageParameters {
    input_structure: PathBuf,
    #[serde(deserialize_with = "relion_eulers::deserialize")]
    rotation: UnitQuaternion<f64>,
    defocus: f64,
}

impl TryFrom<RawSingleImageParameters> for SingleImageParameters {
    type Error = ParameterError;

    fn try_from(raw: RawSingleImageParameters) -> Result<Self, Self::Error> {
        Self::new(raw.input_structure, raw.rotation, raw.defocus)
    }
}

impl SingleImageParameters {
    /// Resolves `input_structure` to an absolute path and checks the defocus bound.
    ///
    /// Symlinks are resolved when the file exists. A missing file is only made absolute,
    /// so metadata written on another machine still loads.
    pub fn new(
        input_structure: impl AsRef<Path>,
        rotation: UnitQuaternion<f64>,
        defocus: f64,
    ) -> Result<Self, ParameterError> {
        if !(defocus > 0.0 && defocus < MAX_DEFOCUS_MICRONS) {
            return Err(ParameterError::DefocusOutOfRange(defocus));
        }
        Ok(Self {
            input_structure: resolve_path(input_structure.as_ref())?,
            rotation,
            defocus,
            rotated_structure_filename: OnceLock::new(),
        })
    }

    pub fn input_structure(&self) -> &Path {
        &self.input_structure
    }

    pub fn rotation(&self) -> &UnitQuaternion<f64> {
        &self.rotation
    }

    /// Defocus in microns, positive is underfocus.
    pub fn defocus(&self) -> f64 {
        self.defocus
    }

    /// Filename for the rotated copy of the structure, computed once per instance.
    ///
    /// Combines the source stem, a UTC timestamp, the process id and a process-wide
    /// counter, so distinct instances never share a name.
    pub fn rotated_structure_filename(&self) -> &str {
        self.rotated_structure_filename.get_or_init(|| {
            let stem = self
                .input_structure
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "structure".to_string());
            let timestamp = Utc::now().format("%y%m%d%H%M%S%6f");
            let counter = ROTATED_FILENAME_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("{stem}_{timestamp}_{}_{counter}.cif", std::process::id())
        })
    }

    /// Rotation angles as RELION reports them.
    pub fn relion_angles(&self) -> EulerZyz {
        relion_eulers::relion_angles(&self.rotation)
    }
}

impl Clone for SingleImageParameters {
    /// Clones get their own rotated-structure filename.
    fn clone(&self) -> Self {
        Self {
            input_structure: self.input_structure.clone(),
            rotation: self.rotation,
            defocus: self.defocus,
            rotated_structure_filename: OnceLock::new(),
        }
    }
}

impl PartialEq for SingleImageParameters {
    fn eq(&self, other: &Self) -> bool {
        self.input_structure == other.input_structure
            && self.rotation == other.rotation
            && self.defocus == other.defocus
    }
}

fn resolve_path(path: &Path) -> Result<PathBuf, ParameterError> {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .map_err(|source| ParameterError::UnresolvablePath {
            path: path.to_path_buf(),
            source,
        })
}

/// Serde adapter storing a rotation as RELION Euler angles.
///
/// RELION angles describe the rotation that maps the particle back onto the
/// reference, so the stored angles are the intrinsic ZYZ decomposition (degrees) of
/// the inverse rotation.
pub mod relion_eulers {
    use crate::core::utils::geometry::{EulerZyz, euler_zyz_from_rotation, rotation_from_euler_zyz};
    use nalgebra::UnitQuaternion;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct RelionEulers {
        #[serde(rename = "rlnAngleRot")]
        rot: f64,
        #[serde(rename = "rlnAngleTilt")]
        tilt: f64,
        #[serde(rename = "rlnAnglePsi")]
        psi: f64,
    }

    pub fn relion_angles(rotation: &UnitQuaternion<f64>) -> EulerZyz {
        euler_zyz_from_rotation(&rotation.inverse())
    }

    pub fn from_relion_angles(angles: EulerZyz) -> UnitQuaternion<f64> {
        rotation_from_euler_zyz(angles).inverse()
    }

    pub fn serialize<S: Serializer>(
        rotation: &UnitQuaternion<f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let EulerZyz { rot, tilt, psi } = relion_angles(rotation);
        RelionEulers { rot, tilt, psi }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<UnitQuaternion<f64>, D::Error> {
        let RelionEulers { rot, tilt, psi } = RelionEulers::deserialize(deserializer)?;
        Ok(from_relion_angles(EulerZyz { rot, tilt, psi }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::collections::HashSet;
    use std::f64::consts::FRAC_PI_2;
    use tempfile::tempdir;

    fn params(defocus: f64) -> Result<SingleImageParameters, ParameterError> {
        SingleImageParameters::new(
            "/data/structures/6vxx.pdb",
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
            defocus,
        )
    }

    #[test]
    fn defocus_must_lie_strictly_between_zero_and_ten() {
        assert!(params(0.0).is_err());
        assert!(params(10.0).is_err());
        assert!(params(-1.0).is_err());
        assert!(params(f64::NAN).is_err());
        assert!(params(9.99).is_ok());
    }

    #[test]
    fn relative_paths_are_made_absolute() {
        let p = SingleImageParameters::new("some/relative.pdb", UnitQuaternion::identity(), 1.0)
            .unwrap();
        assert!(p.input_structure().is_absolute());
        assert!(p.input_structure().ends_with("some/relative.pdb"));
    }

    #[test]
    fn existing_paths_are_canonicalized() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.pdb");
        fs::write(&file, "").unwrap();
        let dotted = dir.path().join(".").join("a.pdb");

        let p = SingleImageParameters::new(&dotted, UnitQuaternion::identity(), 1.0).unwrap();

        assert_eq!(p.input_structure(), fs::canonicalize(&file).unwrap());
    }

    #[test]
    fn rotated_filename_is_stable_per_instance_and_unique_across_instances() {
        let a = params(1.0).unwrap();
        let b = a.clone();

        let name = a.rotated_structure_filename().to_string();
        assert_eq!(a.rotated_structure_filename(), name);
        assert!(name.starts_with("6vxx_"));
        assert!(name.ends_with(".cif"));
        assert!(name.contains(&format!("_{}_", std::process::id())));
        assert_ne!(b.rotated_structure_filename(), name);
    }

    #[test]
    fn many_instances_get_distinct_filenames() {
        let names: HashSet<String> = (0..500)
            .map(|_| params(1.0).unwrap().rotated_structure_filename().to_string())
            .collect();
        assert_eq!(names.len(), 500);
    }

    #[test]
    fn rotation_is_stored_as_inverse_relion_eulers() {
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let p = SingleImageParameters::new("/x.pdb", rotation, 2.0).unwrap();

        let value = serde_json::to_value(&p).unwrap();
        let angles = &value["rotation"];

        let rot = angles["rlnAngleRot"].as_f64().unwrap();
        assert!((rot + 90.0).abs() < 1e-9, "rot = {rot}");
        assert!(angles["rlnAngleTilt"].as_f64().unwrap().abs() < 1e-9);
        assert!(value.get("rotated_structure_filename").is_none());
    }

    #[test]
    fn json_round_trip_preserves_rotation() {
        let original = params(3.5).unwrap();
        let json = serde_json::to_string(&original).unwrap();

        let decoded: SingleImageParameters = serde_json::from_str(&json).unwrap();

        assert!(decoded.rotation().angle_to(original.rotation()) < 1e-9);
        assert_eq!(decoded.defocus(), 3.5);
        assert_eq!(decoded.input_structure(), original.input_structure());
    }

    #[test]
    fn deserialization_rejects_bad_defocus() {
        let json = r#"{"input_structure":"/x.pdb",
            "rotation":{"rlnAngleRot":0.0,"rlnAngleTilt":0.0,"rlnAnglePsi":0.0},
            "defocus":12.0}"#;
        let result: Result<SingleImageParameters, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
