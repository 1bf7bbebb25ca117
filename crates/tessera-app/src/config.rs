// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tessera_render::VsyncMode;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

impl From<VsyncModeCfg> for VsyncMode {
    fn from(m: VsyncModeCfg) -> Self {
        match m {
            VsyncModeCfg::Fifo => VsyncMode::Fifo,
            VsyncModeCfg::Mailbox => VsyncMode::Mailbox,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VsyncModeCfg,
    pub buffer_count: u32,
    pub fullscreen: bool,
    pub width: u32,
    pub height: u32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.0, 0.2, 0.4, 1.0],
            vsync: true,
            vsync_mode: VsyncModeCfg::Mailbox,
            buffer_count: 3,
            fullscreen: false,
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssetsCfg {
    pub diffuse: PathBuf,
    pub normal: PathBuf,
}

impl Default for AssetsCfg {
    fn default() -> Self {
        AssetsCfg {
            diffuse: "Textures/bricks.dds".into(),
            normal: "Textures/normal.dds".into(),
        }
    }
}

/// World positions, one cube each.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SceneCfg {
    pub objects: Vec<[f32; 3]>,
}

impl Default for SceneCfg {
    fn default() -> Self {
        SceneCfg {
            objects: vec![[0.0, 0.0, 0.0]],
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppCfg {
    pub render: RenderCfg,
    pub assets: AssetsCfg,
    pub scene: SceneCfg,
}

impl AppCfg {
    /// Replaces values the renderer cannot use with their defaults.
    pub fn validated(mut self) -> Self {
        let defaults = AppCfg::default();
        if !(2..=3).contains(&self.render.buffer_count) {
            warn!(
                buffer_count = self.render.buffer_count,
                "buffer_count must be 2 or 3; using {}", defaults.render.buffer_count
            );
            self.render.buffer_count = defaults.render.buffer_count;
        }
        if self.scene.objects.is_empty() {
            warn!("scene has no objects; using the default scene");
            self.scene = defaults.scene;
        }
        self
    }
}

/// Reads `path`, falling back to defaults when it is missing or malformed.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => cfg.validated(),
            Err(e) => {
                warn!(path = %path.display(), "bad config: {e}; using defaults");
                AppCfg::default()
            }
        },
        Err(e) => {
            info!(path = %path.display(), "no config ({e}); using defaults");
            AppCfg::default()
        }
    }
}
