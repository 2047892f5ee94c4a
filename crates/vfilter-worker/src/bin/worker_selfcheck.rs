use std::path::Path;
use std::process::Command;

use vfilter_media::{ffmpeg_path, ffprobe_path};
use vfilter_separation::{OrtModelLoader, ModelLoader};
use vfilter_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;
    let work_root = config.work_root();

    println!(
        "worker-selfcheck: starting with work_dir={} model_dir={}",
        work_root.display(),
        config.model_dir.display()
    );
    ensure_workdir(&work_root).await?;
    ensure_tool("ffmpeg", &ffmpeg_path()?)?;
    ensure_tool("ffprobe", &ffprobe_path()?)?;
    OrtModelLoader::new(&config.model_dir)
        .ensure_available(&config.model)
        .map_err(|e| anyhow::anyhow!("model '{}' unavailable: {}", config.model, e))?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".vfilter_selfcheck");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_tool(name: &str, path: &Path) -> anyhow::Result<()> {
    let output = Command::new(path)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            name,
            output.status
        ));
    }
    Ok(())
}
