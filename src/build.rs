//! `dwrk build`: fetch the wrk sources, compile them and install the
//! binary where `run` expects it.
//!
//! Every step runs with an explicit working directory; the process's own
//! current directory is never changed. The downloaded archive and the
//! source tree are removed whether the build succeeds or not.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Paths of one build.
#[derive(Debug, Clone)]
pub struct BuildLayout {
    pub archive: PathBuf,
    pub source_dir: PathBuf,
    pub built_binary: PathBuf,
}

impl BuildLayout {
    pub fn new(build_dir: &Path) -> Self {
        let source_dir = build_dir.join(crate::defaults::WRK_SOURCE_DIR);
        Self {
            archive: build_dir.join(crate::defaults::WRK_ARCHIVE_NAME),
            built_binary: source_dir.join("wrk"),
            source_dir,
        }
    }
}

async fn run_step(name: &str, command: &mut Command) -> Result<()> {
    debug!("{}: {:?}", name, command);
    let status = command
        .status()
        .await
        .with_context(|| format!("{name}: failed to start"))?;
    if !status.success() {
        bail!("{name} failed with {status}");
    }
    Ok(())
}

/// Download, build and copy wrk to `destination`.
///
/// Needs `curl`, `tar` and `make` on the `PATH`. The archive and source tree
/// are removed from `build_dir` whether or not the build succeeds.
///
/// ## Returns
/// The absolute path of the installed binary.
pub async fn build_binary(build_dir: &Path, destination: &Path) -> Result<PathBuf> {
    if !build_dir.is_dir() {
        bail!("Invalid build directory: {}", build_dir.display());
    }
    let build_dir = build_dir
        .canonicalize()
        .with_context(|| format!("resolving {}", build_dir.display()))?;
    let destination = if destination.is_absolute() {
        destination.to_path_buf()
    } else {
        std::env::current_dir()
            .context("resolving current directory")?
            .join(destination)
    };

    let layout = BuildLayout::new(&build_dir);
    let result = fetch_and_build(&build_dir, &layout, &destination).await;
    remove_build_artifacts(&layout).await;
    result.map(|()| destination)
}

async fn fetch_and_build(build_dir: &Path, layout: &BuildLayout, destination: &Path) -> Result<()> {
    info!("Downloading wrk...");
    run_step(
        "download",
        Command::new("curl")
            .args(["-fsSL", "-o"])
            .arg(&layout.archive)
            .arg(crate::defaults::WRK_ARCHIVE_URL),
    )
    .await?;

    run_step(
        "extract",
        Command::new("tar")
            .current_dir(build_dir)
            .arg("-xzf")
            .arg(&layout.archive),
    )
    .await?;

    info!("Building wrk...");
    run_step("make", Command::new("make").current_dir(&layout.source_dir)).await?;

    tokio::fs::copy(&layout.built_binary, destination)
        .await
        .with_context(|| {
            format!(
                "copying {} to {}",
                layout.built_binary.display(),
                destination.display()
            )
        })?;
    info!("wrk installed at {}", destination.display());
    Ok(())
}

async fn remove_build_artifacts(layout: &BuildLayout) {
    if let Err(e) = tokio::fs::remove_file(&layout.archive).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", layout.archive.display(), e);
        }
    }
    if let Err(e) = tokio::fs::remove_dir_all(&layout.source_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", layout.source_dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = BuildLayout::new(Path::new("/tmp"));
        assert_eq!(layout.archive, PathBuf::from("/tmp/master.tar.gz"));
        assert_eq!(layout.source_dir, PathBuf::from("/tmp/wrk-master"));
        assert_eq!(layout.built_binary, PathBuf::from("/tmp/wrk-master/wrk"));
    }

    #[tokio::test]
    async fn test_invalid_build_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = build_binary(&missing, Path::new("wrk")).await.unwrap_err();
        assert!(err.to_string().contains("Invalid build directory"));
    }

    #[tokio::test]
    async fn test_artifacts_removed_even_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BuildLayout::new(dir.path());
        std::fs::create_dir_all(layout.source_dir.join("src")).unwrap();
        std::fs::write(&layout.archive, b"partial").unwrap();

        remove_build_artifacts(&layout).await;
        assert!(!layout.archive.exists());
        assert!(!layout.source_dir.exists());

        remove_build_artifacts(&layout).await;
    }
}
