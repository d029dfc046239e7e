use crate::cli::StatusArgs;
use crate::error::Result;
use spsim::engine::error::EngineError;
use spsim::engine::store::{ResultStore, StoreProgress};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub async fn run(args: StatusArgs) -> Result<()> {
    let path = store_path(&args.store);
    let store = ResultStore::open(&path).map_err(EngineError::from)?;
    let progress = store.progress().map_err(EngineError::from)?;

    println!("{}: {}", path.display(), describe(&progress));
    Ok(())
}

/// Accepts either the store itself or the output basename it was created from.
fn store_path(arg: &Path) -> PathBuf {
    if arg.extension().is_some_and(|ext| ext == "zarr") {
        return arg.to_path_buf();
    }
    let mut path = OsString::from(arg.as_os_str());
    path.push(".zarr");
    PathBuf::from(path)
}

fn describe(progress: &StoreProgress) -> String {
    let percent = if progress.total == 0 {
        100.0
    } else {
        100.0 * progress.initialized as f64 / progress.total as f64
    };
    let state = if progress.is_complete() {
        "complete"
    } else {
        "in progress"
    };
    format!(
        "{} / {} images simulated ({:.1}%, {})",
        progress.initialized, progress.total, percent, state
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_or_store_resolves_to_the_store() {
        assert_eq!(store_path(Path::new("out/run.zarr")), PathBuf::from("out/run.zarr"));
        assert_eq!(store_path(Path::new("out/run")), PathBuf::from("out/run.zarr"));
        assert_eq!(store_path(Path::new("out/run.v2")), PathBuf::from("out/run.v2.zarr"));
    }

    #[test]
    fn progress_is_described_with_percentage() {
        let partial = StoreProgress {
            initialized: 1,
            total: 4,
        };
        assert_eq!(describe(&partial), "1 / 4 images simulated (25.0%, in progress)");

        let done = StoreProgress {
            initialized: 4,
            total: 4,
        };
        assert_eq!(describe(&done), "4 / 4 images simulated (100.0%, complete)");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_reads_an_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        ResultStore::create(dir.path().join("run.zarr"), [2, 4, 4], [1, 4, 4]).unwrap();

        let args = StatusArgs {
            store: dir.path().join("run"),
        };
        assert!(run(args).await.is_ok());

        let missing = StatusArgs {
            store: dir.path().join("absent"),
        };
        assert!(run(missing).await.is_err());
    }
}
