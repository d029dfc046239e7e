use crate::core::io::mrc::MrcStackWriter;
use crate::core::io::star::{StarTable, write_star_to_path};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::simulation::Simulation;
use crate::engine::store::ResultStore;
use ndarray::Array2;
use std::path::Path;
use tracing::{info, instrument, warn};

/// Pixel size in Å written into exported stacks and STAR optics groups.
pub const PIXEL_SIZE: f32 = 1.0;

const VOLTAGE_KV: f64 = 300.0;
const SPHERICAL_ABERRATION_MM: f64 = 2.7;
const AMPLITUDE_CONTRAST: f64 = 0.1;
const OPTICS_GROUP: &str = "1";

const OPTICS_COLUMNS: [&str; 7] = [
    "rlnOpticsGroup",
    "rlnVoltage",
    "rlnSphericalAberration",
    "rlnAmplitudeContrast",
    "rlnImagePixelSize",
    "rlnImageSize",
    "rlnImageDimensionality",
];

const PARTICLE_COLUMNS: [&str; 10] = [
    "rlnImageName",
    "rlnCoordinateX",
    "rlnCoordinateY",
    "rlnAngleRot",
    "rlnAngleTilt",
    "rlnAnglePsi",
    "rlnOpticsGroup",
    "rlnDefocusU",
    "rlnDefocusV",
    "rlnDefocusAngle",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackExport {
    pub written: usize,
    /// Images not yet simulated, exported as the store's fill value.
    pub missing: usize,
}

/// Copies a result store into a float32 MRC stack, one section per image.
#[instrument(skip_all, name = "export_mrcs")]
pub fn store_to_mrcs(
    store_path: &Path,
    mrcs_path: &Path,
    reporter: &ProgressReporter,
) -> Result<StackExport, EngineError> {
    let store = ResultStore::open(store_path)?;
    let [n, ny, nx] = store.shape();
    let blank = Array2::from_elem((ny, nx), store.fill_value());

    reporter.report(Progress::TaskStart {
        total_steps: n as u64,
    });
    let mut writer = MrcStackWriter::create(mrcs_path, nx, ny, n, PIXEL_SIZE)?;
    let mut missing = 0;
    for index in 0..n {
        match store.read_chunk(index)? {
            Some(image) => writer.push(image.view())?,
            None => {
                missing += 1;
                writer.push(blank.view())?;
            }
        }
        reporter.report(Progress::TaskAdvance {
            completed: index as u64 + 1,
        });
    }
    writer.finish()?;
    reporter.report(Progress::TaskFinish);

    if missing > 0 {
        warn!(
            "{} of {} images were not simulated yet and were exported blank.",
            missing, n
        );
        reporter.report(Progress::Message(format!(
            "{missing} of {n} images exported blank"
        )));
    }
    info!("Wrote {} images to '{}'.", n, mrcs_path.display());
    Ok(StackExport {
        written: n,
        missing,
    })
}

/// Builds the RELION 3.1 optics and particles tables for a simulation.
///
/// Particles reference `{index:06}@{output_basename}.mrcs`, counting from zero, and
/// carry the RELION angles of each rotation.
pub fn simulation_to_star_tables(simulation: &Simulation) -> Vec<StarTable> {
    let config = simulation.config();

    let mut optics = StarTable::new("optics", &OPTICS_COLUMNS);
    optics.push_row(vec![
        OPTICS_GROUP.to_string(),
        format!("{VOLTAGE_KV:.1}"),
        format!("{SPHERICAL_ABERRATION_MM:.1}"),
        format!("{AMPLITUDE_CONTRAST:.1}"),
        format!("{PIXEL_SIZE:.1}"),
        config.image_sidelength().to_string(),
        "2".to_string(),
    ]);

    let mut particles = StarTable::new("particles", &PARTICLE_COLUMNS);
    for (index, params) in simulation.per_image_parameters().iter().enumerate() {
        let angles = params.relion_angles();
        let defocus = format!("{:.6}", params.defocus() * 1e5);
        particles.push_row(vec![
            format!("{index:06}@{}.mrcs", config.output_basename()),
            "0".to_string(),
            "0".to_string(),
            format!("{:.6}", angles.rot),
            format!("{:.6}", angles.tilt),
            format!("{:.6}", angles.psi),
            OPTICS_GROUP.to_string(),
            defocus.clone(),
            defocus,
            "0".to_string(),
        ]);
    }

    vec![optics, particles]
}

/// Writes the STAR file describing a persisted simulation.
#[instrument(skip_all, name = "export_star")]
pub fn metadata_to_star(metadata_path: &Path, star_path: &Path) -> Result<usize, EngineError> {
    let simulation = Simulation::read_metadata(metadata_path)?;
    write_star_to_path(&simulation_to_star_tables(&simulation), star_path)?;
    info!(
        "Wrote {} particles to '{}'.",
        simulation.len(),
        star_path.display()
    );
    Ok(simulation.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::mrc::read_mrc;
    use crate::engine::config::tests::{structure_dir, valid_builder};
    use crate::engine::parameters::relion_eulers::from_relion_angles;
    use crate::core::utils::geometry::EulerZyz;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn stack_export_fills_missing_images_with_fill_value() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("run.zarr");
        let store = ResultStore::create(&store_path, [3, 4, 4], [1, 4, 4]).unwrap();
        store.write_chunk(0, Array2::from_elem((4, 4), 1.5).view()).unwrap();
        store.write_chunk(2, Array2::from_elem((4, 4), -0.5).view()).unwrap();
        let mrcs = dir.path().join("run.mrcs");

        let events = std::sync::Mutex::new(Vec::new());
        let reporter =
            ProgressReporter::with_callback(Box::new(|e: Progress| events.lock().unwrap().push(e)));

        let export = store_to_mrcs(&store_path, &mrcs, &reporter).unwrap();
        drop(reporter);

        assert_eq!(export, StackExport { written: 3, missing: 1 });
        assert!(events
            .into_inner()
            .unwrap()
            .contains(&Progress::Message("1 of 3 images exported blank".to_string())));
        let (header, data) = read_mrc(&mrcs).unwrap();
        assert_eq!((header.nz, header.ny, header.nx), (3, 4, 4));
        assert_eq!(header.mode, 2);
        assert!(data.index_axis(ndarray::Axis(0), 0).iter().all(|&v| v == 1.5));
        assert!(data.index_axis(ndarray::Axis(0), 1).iter().all(|&v| v == 0.0));
        assert!(data.index_axis(ndarray::Axis(0), 2).iter().all(|&v| v == -0.5));
    }

    #[test]
    fn star_tables_describe_optics_and_particles() {
        let structures = structure_dir(&["a.pdb"]);
        let config = valid_builder(structures.path())
            .n_images(3)
            .image_sidelength(128)
            .output_basename("particles")
            .build()
            .unwrap();
        let simulation = Simulation::from_config(config, Some(21)).unwrap();

        let tables = simulation_to_star_tables(&simulation);

        assert_eq!(tables[0].name, "optics");
        assert_eq!(
            tables[0].rows[0],
            vec!["1", "300.0", "2.7", "0.1", "1.0", "128", "2"]
        );
        let particles = &tables[1];
        assert_eq!(particles.name, "particles");
        assert_eq!(particles.rows.len(), 3);
        assert_eq!(particles.rows[0][0], "000000@particles.mrcs");
        assert_eq!(particles.rows[2][0], "000002@particles.mrcs");

        for (row, params) in particles.rows.iter().zip(simulation.per_image_parameters()) {
            let defocus_u: f64 = row[7].parse().unwrap();
            assert!((defocus_u - params.defocus() * 1e5).abs() < 1e-3);
            assert_eq!(row[7], row[8]);
            assert_eq!(row[9], "0");

            let angles = EulerZyz {
                rot: row[3].parse().unwrap(),
                tilt: row[4].parse().unwrap(),
                psi: row[5].parse().unwrap(),
            };
            assert!(from_relion_angles(angles).angle_to(params.rotation()) < 1e-4);
        }
    }

    #[test]
    fn metadata_converts_to_star_file() {
        let structures = structure_dir(&["a.pdb"]);
        let out = tempdir().unwrap();
        let config = valid_builder(structures.path()).n_images(4).build().unwrap();
        let simulation = Simulation::from_config(config, Some(1)).unwrap();
        let json = out.path().join("run.json");
        simulation.write_metadata(&json).unwrap();
        let star = out.path().join("run.star");

        let n = metadata_to_star(&json, &star).unwrap();

        assert_eq!(n, 4);
        let text = fs::read_to_string(&star).unwrap();
        assert!(text.contains("data_optics"));
        assert!(text.contains("data_particles"));
        assert!(text.contains("_rlnDefocusU #8"));
        assert_eq!(text.matches(".mrcs").count(), 4);
    }
}
