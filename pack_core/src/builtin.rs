use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use zip::read::ZipArchive;

use crate::cancel::CancelToken;
use crate::error::PackError;
use crate::logging;
use crate::names;
use crate::shader;

const PAK0_NAME: &str = "pak0.pk3";
const MAPOBJECTS_NAME: &str = "sd-mapobjects.pk3";
const ETJUMP_DIR: &str = "etjump_stable";

// Everything the base game already ships: shader names and entry paths that
// must never be re-packed.
#[derive(Clone, Debug, Default)]
pub struct BuiltinContent {
    pub shaders: HashSet<String>,
    pub resources: HashSet<String>,
}

impl BuiltinContent {
    pub fn contains_shader(&self, name: &str) -> bool {
        self.shaders.contains(&names::normalize(name))
    }

    pub fn contains_resource(&self, name: &str) -> bool {
        self.resources.contains(&names::normalize(name))
    }

    pub fn add_shader(&mut self, name: &str) {
        self.shaders.insert(names::normalize(name));
    }

    pub fn add_resource(&mut self, name: &str) {
        self.resources.insert(names::normalize(name));
    }

    pub fn merge(&mut self, other: BuiltinContent) {
        self.shaders.extend(other.shaders);
        self.resources.extend(other.resources);
    }
}

pub fn base_archives(et_main: &Path) -> Result<Vec<PathBuf>, PackError> {
    let pak0 = et_main.join(PAK0_NAME);
    if !pak0.is_file() {
        return Err(PackError::environment(format!(
            "{} not found under {}",
            PAK0_NAME,
            et_main.display()
        )));
    }
    let mut archives = vec![pak0];
    let mapobjects = et_main.join(MAPOBJECTS_NAME);
    if mapobjects.is_file() {
        archives.push(mapobjects);
    }
    if let Some(etjump) = newest_etjump(et_main) {
        archives.push(etjump);
    }
    Ok(archives)
}

fn newest_etjump(et_main: &Path) -> Option<PathBuf> {
    let dir = et_main.parent()?.join(ETJUMP_DIR);
    let read_dir = fs::read_dir(&dir).ok()?;
    let mut candidates: Vec<PathBuf> = read_dir
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            path.is_file() && name.starts_with("etjump-") && name.ends_with(".pk3")
        })
        .collect();
    candidates.sort_by_key(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    });
    candidates.pop()
}

pub fn index_builtin(et_main: &Path, cancel: &CancelToken) -> Result<BuiltinContent, PackError> {
    let mut content = BuiltinContent::default();
    for archive in base_archives(et_main)? {
        index_archive(&mut content, &archive, cancel)?;
    }
    Ok(content)
}

pub fn index_archive(
    content: &mut BuiltinContent,
    path: &Path,
    cancel: &CancelToken,
) -> Result<(), PackError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;
    for index in 0..archive.len() {
        cancel.checkpoint()?;
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = names::normalize(entry.name());
        if name.is_empty() {
            continue;
        }
        if name.starts_with("scripts/") && name.ends_with(".shader") {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            let label = path.join(&name);
            match shader::parse_shader_text(&label, &name, 0, bytes, false, cancel) {
                Ok(shaders) => {
                    for shader in shaders {
                        content.shaders.insert(shader.name);
                    }
                }
                Err(PackError::Canceled) => return Err(PackError::Canceled),
                Err(err) => {
                    logging::warn(format!("skipping unparseable base shader file: {}", err))
                }
            }
        } else {
            content.resources.insert(name);
        }
    }
    Ok(())
}
