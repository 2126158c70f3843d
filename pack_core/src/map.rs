use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PackError;
use crate::names::NameSet;

// References accumulated by the map and auxiliary parsers.
#[derive(Clone, Debug, Default)]
pub struct MapAssets {
    pub shaders: NameSet,
    pub resources: NameSet,
    pub misc_models: NameSet,
    pub has_style_lights: bool,
}

#[derive(Debug)]
pub struct Map {
    pub name: String,
    pub path: PathBuf,
    pub et_main: PathBuf,
    pub map_root: PathBuf,
    pub assets: MapAssets,
}

impl Map {
    pub fn locate(map_file: &Path) -> Result<Self, PackError> {
        let path = fs::canonicalize(map_file).map_err(|_| {
            PackError::environment(format!("map file not found: {}", map_file.display()))
        })?;
        let is_map = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("map"))
            .unwrap_or(false);
        if !is_map {
            return Err(PackError::environment(format!(
                "not a .map file: {}",
                path.display()
            )));
        }
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(|stem| stem.to_string())
            .ok_or_else(|| {
                PackError::environment(format!("map file has no usable name: {}", path.display()))
            })?;

        let maps_dir = path
            .parent()
            .ok_or_else(|| PackError::environment("map file has no parent directory"))?;
        if !dir_name_is(maps_dir, "maps") {
            return Err(layout_error(&path));
        }
        let map_root = maps_dir
            .parent()
            .ok_or_else(|| layout_error(&path))?
            .to_path_buf();

        let et_main = if dir_name_is(&map_root, "etmain") {
            map_root.clone()
        } else if dir_name_ends_with(&map_root, ".pk3dir") {
            let parent = map_root.parent().ok_or_else(|| layout_error(&path))?;
            if !dir_name_is(parent, "etmain") {
                return Err(layout_error(&path));
            }
            parent.to_path_buf()
        } else {
            return Err(layout_error(&path));
        };

        Ok(Self {
            name,
            path,
            et_main,
            map_root,
            assets: MapAssets::default(),
        })
    }

    pub fn bsp_path(&self) -> PathBuf {
        self.path.with_extension("bsp")
    }

    // Lightmaps live in a same-named directory next to the map file.
    pub fn lightmap_dir(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.name)
    }

    pub fn asset_directories(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.map_root.clone()];
        if self.map_root != self.et_main {
            dirs.push(self.et_main.clone());
        }
        dirs
    }
}

fn dir_name_is(path: &Path, expected: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

fn dir_name_ends_with(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_ascii_lowercase().ends_with(suffix))
        .unwrap_or(false)
}

fn layout_error(path: &Path) -> PackError {
    PackError::environment(format!(
        "map must live under etmain/maps/ or etmain/<name>.pk3dir/maps/: {}",
        path.display()
    ))
}
