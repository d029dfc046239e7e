use super::config::SimulationConfig;
use super::error::EngineError;
use super::parameters::SingleImageParameters;
use super::sampling::sample;
use super::simulator::ImageSimulator;
use super::simulator::config::{ParakeetConfig, generate_parakeet_config};
use super::store::ResultStore;
use super::task;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

/// A complete single-particle simulation: the global configuration plus one
/// parameter set per image.
#[derive(Debug, Serialize, Deserialize)]
#[serde(try_from = "RawSimulation")]
pub struct Simulation {
    config: SimulationConfig,
    per_image_parameters: Vec<SingleImageParameters>,
    #[serde(skip)]
    simulator_configs: OnceLock<Vec<ParakeetConfig>>,
}

#[derive(Deserialize)]
struct RawSimulation {
    config: SimulationConfig,
    per_image_parameters: Vec<SingleImageParameters>,
}

impl TryFrom<RawSimulation> for Simulation {
    type Error = EngineError;

    fn try_from(raw: RawSimulation) -> Result<Self, Self::Error> {
        Self::from_parts(raw.config, raw.per_image_parameters)
    }
}

impl Simulation {
    /// Samples every per-image parameter set from `config`.
    ///
    /// This is the only place randomness enters a simulation. With `seed` set the
    /// result is fully reproducible.
    pub fn from_config(config: SimulationConfig, seed: Option<u64>) -> Result<Self, EngineError> {
        let per_image_parameters = sample(&config, seed)?
            .into_iter()
            .map(|s| SingleImageParameters::new(s.structure_file, s.rotation, s.defocus))
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            n_images = per_image_parameters.len(),
            seed = ?seed,
            "Sampled per-image parameters"
        );
        Self::from_parts(config, per_image_parameters)
    }

    pub fn from_parts(
        config: SimulationConfig,
        per_image_parameters: Vec<SingleImageParameters>,
    ) -> Result<Self, EngineError> {
        if per_image_parameters.len() != config.n_images() {
            return Err(EngineError::LengthMismatch {
                expected: config.n_images(),
                actual: per_image_parameters.len(),
            });
        }
        Ok(Self {
            config,
            per_image_parameters,
            simulator_configs: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn per_image_parameters(&self) -> &[SingleImageParameters] {
        &self.per_image_parameters
    }

    pub fn len(&self) -> usize {
        self.config.n_images()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_index(&self, index: usize) -> Result<(), EngineError> {
        if index >= self.len() {
            return Err(EngineError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    pub fn parameters(&self, index: usize) -> Result<&SingleImageParameters, EngineError> {
        self.check_index(index)?;
        Ok(&self.per_image_parameters[index])
    }

    /// Simulator configuration for every image, generated on first use.
    pub fn simulator_configs(&self) -> &[ParakeetConfig] {
        self.simulator_configs.get_or_init(|| {
            let side = self.config.image_sidelength();
            self.per_image_parameters
                .iter()
                .map(|p| generate_parakeet_config(p.rotated_structure_filename(), side, p.defocus()))
                .collect()
        })
    }

    pub fn simulator_config(&self, index: usize) -> Result<&ParakeetConfig, EngineError> {
        self.check_index(index)?;
        Ok(&self.simulator_configs()[index])
    }

    pub fn store_shape(&self) -> [usize; 3] {
        let side = self.config.image_sidelength();
        [self.len(), side, side]
    }

    pub fn store_chunks(&self) -> [usize; 3] {
        let side = self.config.image_sidelength();
        [1, side, side]
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write_metadata(&self, path: &Path) -> Result<(), EngineError> {
        fs::write(path, self.to_json()?).map_err(|source| EngineError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Wrote simulation metadata");
        Ok(())
    }

    pub fn read_metadata(path: &Path) -> Result<Self, EngineError> {
        let json = fs::read_to_string(path).map_err(|source| EngineError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Creates the empty result store at the configured location.
    pub fn create_store(&self) -> Result<ResultStore, EngineError> {
        Ok(ResultStore::create(
            self.config.store_path(),
            self.store_shape(),
            self.store_chunks(),
        )?)
    }

    /// Simulates the image at `index`, optionally writing it into `store`.
    pub fn simulate_image(
        &self,
        index: usize,
        store: Option<&ResultStore>,
        simulator: &dyn ImageSimulator,
    ) -> Result<Array2<f32>, EngineError> {
        let params = self.parameters(index)?;
        let fragment = self.simulator_config(index)?;
        Ok(task::simulate_image(
            params,
            fragment,
            self.config.image_sidelength(),
            simulator,
            store.map(|s| (s, index)),
        )?)
    }
}

impl Clone for Simulation {
    /// Cloned parameters get fresh rotated-structure filenames, so cached simulator
    /// configurations are regenerated rather than copied.
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            per_image_parameters: self.per_image_parameters.clone(),
            simulator_configs: OnceLock::new(),
        }
    }
}

impl PartialEq for Simulation {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config && self.per_image_parameters == other.per_image_parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::tests::{structure_dir, valid_builder};
    use crate::engine::task::tests::{FailingSimulator, FakeSimulator};
    use nalgebra::UnitQuaternion;
    use tempfile::tempdir;

    #[test]
    fn from_config_samples_one_parameter_set_per_image() {
        let dir = structure_dir(&["a.pdb", "b.cif"]);
        let config = valid_builder(dir.path()).build().unwrap();

        let simulation = Simulation::from_config(config, Some(1)).unwrap();

        assert_eq!(simulation.len(), 200);
        assert_eq!(simulation.per_image_parameters().len(), 200);
        assert_eq!(simulation.store_shape(), [200, 512, 512]);
        assert_eq!(simulation.store_chunks(), [1, 512, 512]);
        assert!(simulation
            .per_image_parameters()
            .iter()
            .all(|p| p.input_structure().is_absolute()));
    }

    #[test]
    fn same_seed_reproduces_simulation() {
        let dir = structure_dir(&["a.pdb", "b.pdb", "c.pdb"]);
        let config = valid_builder(dir.path()).n_images(30).build().unwrap();

        let a = Simulation::from_config(config.clone(), Some(99)).unwrap();
        let b = Simulation::from_config(config, Some(99)).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let dir = structure_dir(&["a.pdb"]);
        let config = valid_builder(dir.path()).n_images(3).build().unwrap();
        let simulation = Simulation::from_config(config, Some(0)).unwrap();

        assert!(matches!(
            simulation.parameters(3),
            Err(EngineError::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert!(matches!(
            simulation.simulate_image(7, None, &FakeSimulator::new(1.0)),
            Err(EngineError::IndexOutOfRange { index: 7, len: 3 })
        ));
    }

    #[test]
    fn simulator_configs_are_cached_and_match_parameters() {
        let dir = structure_dir(&["a.pdb"]);
        let config = valid_builder(dir.path()).n_images(4).image_sidelength(64).build().unwrap();
        let simulation = Simulation::from_config(config, Some(5)).unwrap();

        let first = simulation.simulator_configs().as_ptr();
        assert_eq!(simulation.simulator_configs().as_ptr(), first);

        for (i, params) in simulation.per_image_parameters().iter().enumerate() {
            let fragment = simulation.simulator_config(i).unwrap();
            assert_eq!(fragment.sample.coords.filename, params.rotated_structure_filename());
            assert_eq!(fragment.microscope.detector.nx, 64);
            assert_eq!(
                fragment.microscope.objective_lens.c_10,
                (-1e4 * params.defocus()).trunc() as i64
            );
        }
    }

    #[test]
    fn from_parts_checks_length() {
        let dir = structure_dir(&["a.pdb"]);
        let config = valid_builder(dir.path()).n_images(2).build().unwrap();
        let params = vec![SingleImageParameters::new(dir.path().join("a.pdb"), UnitQuaternion::identity(), 1.0).unwrap()];

        assert!(matches!(
            Simulation::from_parts(config, params),
            Err(EngineError::LengthMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn json_round_trip_preserves_parameters() {
        let dir = structure_dir(&["a.pdb", "b.pdb"]);
        let config = valid_builder(dir.path()).n_images(25).build().unwrap();
        let simulation = Simulation::from_config(config, Some(11)).unwrap();
        let path = dir.path().join("meta.json");

        simulation.write_metadata(&path).unwrap();
        let decoded = Simulation::read_metadata(&path).unwrap();

        assert_eq!(decoded.config(), simulation.config());
        for (a, b) in decoded
            .per_image_parameters()
            .iter()
            .zip(simulation.per_image_parameters())
        {
            assert_eq!(a.input_structure(), b.input_structure());
            assert_eq!(a.defocus(), b.defocus());
            assert!(a.rotation().angle_to(b.rotation()) < 1e-6);
        }
    }

    #[test]
    fn metadata_uses_relion_angle_names_and_defocus_pair() {
        let dir = structure_dir(&["a.pdb"]);
        let config = valid_builder(dir.path()).n_images(2).build().unwrap();
        let simulation = Simulation::from_config(config, Some(3)).unwrap();

        let value: serde_json::Value = serde_json::from_str(&simulation.to_json().unwrap()).unwrap();

        assert_eq!(value["config"]["defocus_range"], serde_json::json!([0.5, 4.5]));
        let rotation = &value["per_image_parameters"][0]["rotation"];
        for key in ["rlnAngleRot", "rlnAngleTilt", "rlnAnglePsi"] {
            assert!(rotation[key].is_f64(), "missing {key}");
        }
    }

    #[test]
    fn metadata_with_wrong_length_is_rejected() {
        let dir = structure_dir(&["a.pdb"]);
        let config = valid_builder(dir.path()).n_images(2).build().unwrap();
        let simulation = Simulation::from_config(config, Some(3)).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&simulation.to_json().unwrap()).unwrap();
        value["config"]["n_images"] = serde_json::json!(3);

        assert!(Simulation::from_json(&value.to_string()).is_err());
    }

    #[test]
    fn simulate_image_writes_into_store() {
        let dir = structure_dir(&["a.pdb"]);
        let out = tempdir().unwrap();
        let config = valid_builder(dir.path())
            .n_images(3)
            .image_sidelength(8)
            .output_basename(out.path().join("run").to_string_lossy().into_owned())
            .build()
            .unwrap();
        let simulation = Simulation::from_config(config, Some(8)).unwrap();
        let store = simulation.create_store().unwrap();

        simulation.simulate_image(2, Some(&store), &FakeSimulator::new(0.5)).unwrap();
        let failed = simulation.simulate_image(0, Some(&store), &FailingSimulator);

        assert!(matches!(failed, Err(EngineError::Task(_))));
        assert_eq!(store.path(), out.path().join("run.zarr"));
        assert_eq!(store.progress().unwrap().initialized, 1);
        assert!(store.is_initialized(2).unwrap());
    }
}
