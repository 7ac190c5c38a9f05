use std::{
    io::{Seek, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use again::RetryPolicy;
use anyhow::{bail, Context as _, Result};
use loopdev::{LoopControl, LoopDevice};

/// Creates a sparse image file of the given size, if it does not exist yet.
pub async fn create_sparse_image(path: &Path, size_bytes: u64) -> Result<()> {
    if path.exists() {
        tracing::info!("Image {path:?} already exists, reusing it");
        return Ok(());
    }
    if size_bytes == 0 {
        bail!("Refusing to create an empty image {path:?}")
    }

    let path = path.to_owned();
    tokio::task::spawn_blocking(move || -> Result<_> {
        let mut file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create image file {path:?}"))?;
        file.seek(std::io::SeekFrom::Start(size_bytes - 1))?;
        file.write_all(&[0])?;
        file.flush()?;
        Ok(())
    })
    .await
    .context("background task failed")??;

    Ok(())
}

/// A loop device backed by an image file, with partition scanning enabled so that
/// `loopNpM` nodes appear after partitioning.
///
/// The device stays attached when this is dropped, since the mounted install tree still
/// needs it. Call [`LoopBacking::detach`] to tear it down.
pub struct LoopBacking {
    image: PathBuf,
    ld: LoopDevice,
}

impl LoopBacking {
    pub async fn attach(image: impl AsRef<Path>) -> Result<Self> {
        let image = image.as_ref().to_owned();
        if !image.is_file() {
            bail!("Image file {image:?} does not exist")
        }

        let lc = LoopControl::open()
            .context("Failed to open loop control, maybe forgot to run 'sudo modprobe loop'?")?;
        // Retry to avoid conflicts and waiting for avaliable loop device
        let ld = RetryPolicy::exponential(Duration::from_millis(1))
            .with_max_retries(200)
            .with_max_delay(Duration::from_millis(1000))
            .retry(|| async {
                let ld = lc.next_free()?;
                ld.with().part_scan(true).attach(&image)?;
                Ok::<_, anyhow::Error>(ld)
            })
            .await
            .with_context(|| format!("Failed to attach {image:?} to a loop device"))?;

        let backing = LoopBacking { image, ld };
        tracing::info!(
            "Attached {:?} to loop device {:?}",
            backing.image,
            backing.path()?
        );
        Ok(backing)
    }

    pub fn path(&self) -> Result<PathBuf> {
        self.ld.path().context("Unknown loop device path")
    }

    pub fn detach(self) -> Result<()> {
        self.ld
            .detach()
            .with_context(|| format!("Failed to detach loop device {:?}", self.ld.path()))
    }
}
