//! Scripted stand-in for the FFmpeg binary.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;
use tokio::sync::{Mutex, MutexGuard};

/// Tests that point `FFMPEG_PATH` at a script run one at a time.
static FFMPEG_ENV: Mutex<()> = Mutex::const_new(());

/// A shell script installed as `FFMPEG_PATH` while this value lives.
pub struct FakeFfmpeg {
    dir: TempDir,
    _guard: MutexGuard<'static, ()>,
}

impl FakeFfmpeg {
    /// Install `body` as the FFmpeg binary. `$OUT` is the output path.
    pub async fn install(body: &str) -> Self {
        let guard = FFMPEG_ENV.lock().await;
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("ffmpeg");
        std::fs::write(&script, format!("#!/bin/sh\nfor OUT; do :; done\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::env::set_var("FFMPEG_PATH", &script);
        Self { dir, _guard: guard }
    }

    /// Scratch directory owned by the script.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for FakeFfmpeg {
    fn drop(&mut self) {
        std::env::remove_var("FFMPEG_PATH");
    }
}
