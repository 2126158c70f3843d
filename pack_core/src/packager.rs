use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::builtin::BuiltinContent;
use crate::cancel::CancelToken;
use crate::error::PackError;
use crate::logging;
use crate::map::Map;
use crate::names;
use crate::pipeline::PackOptions;
use crate::resolver::ResolvedAssets;
use crate::source::AssetSource;

#[derive(Debug)]
pub struct PackSummary {
    pub entries: Vec<String>,
    pub bytes_written: u64,
    pub warnings: usize,
    pub output: Option<PathBuf>,
}

enum ArchiveOutput {
    Zip(ZipWriter<File>),
    Dry,
}

struct Packager<'a> {
    map: &'a Map,
    sources: &'a [AssetSource],
    builtin: &'a BuiltinContent,
    options: &'a PackOptions,
    cancel: &'a CancelToken,
    out: ArchiveOutput,
    added: HashSet<String>,
    entries: Vec<String>,
    bytes_written: u64,
    warnings: usize,
    lightmaps_added: usize,
    bsp_mtime: Option<SystemTime>,
}

pub fn resolve_output_path(map: &Map, options: &PackOptions) -> PathBuf {
    let default_name = format!("{}.pk3", map.name);
    match &options.output {
        Some(path) if path.is_dir() => path.join(default_name),
        Some(path) => path.clone(),
        None => PathBuf::from(default_name),
    }
}

pub fn pack(
    map: &Map,
    sources: &[AssetSource],
    builtin: &BuiltinContent,
    resolved: &ResolvedAssets,
    options: &PackOptions,
    cancel: &CancelToken,
) -> Result<PackSummary, PackError> {
    let output_path = resolve_output_path(map, options);
    let out = if options.dry_run {
        ArchiveOutput::Dry
    } else {
        if output_path.exists() && !options.overwrite {
            return Err(PackError::environment(format!(
                "output already exists (pass overwrite to replace): {}",
                output_path.display()
            )));
        }
        ArchiveOutput::Zip(ZipWriter::new(File::create(&output_path)?))
    };

    let mut packager = Packager {
        map,
        sources,
        builtin,
        options,
        cancel,
        out,
        added: HashSet::new(),
        entries: Vec::new(),
        bytes_written: 0,
        warnings: 0,
        lightmaps_added: 0,
        bsp_mtime: None,
    };

    let result = packager.run(resolved);
    if let Err(err) = result {
        if !options.dry_run {
            let _ = fs::remove_file(&output_path);
        }
        return Err(err);
    }

    let output = if options.dry_run {
        None
    } else {
        Some(output_path)
    };
    Ok(PackSummary {
        entries: packager.entries,
        bytes_written: packager.bytes_written,
        warnings: packager.warnings,
        output,
    })
}

impl Packager<'_> {
    fn run(&mut self, resolved: &ResolvedAssets) -> Result<(), PackError> {
        self.add_required_files()?;

        for resource in self.map.assets.resources.iter() {
            let resource = resource.to_string();
            self.add_resource(&resource)?;
        }

        for shader in resolved.shaders.values() {
            self.cancel.checkpoint()?;
            self.add_shader_file(shader.source_order, &shader.file)?;
            if let Some(implicit) = shader.implicit_mapping.clone() {
                self.add_texture(&implicit)?;
            }
        }
        for resource in resolved.resources.iter() {
            let resource = resource.to_string();
            if names::is_texture_like(&resource) {
                self.add_texture(&resource)?;
            } else {
                self.add_resource(&resource)?;
            }
        }
        for texture in resolved.textures.iter() {
            let texture = texture.to_string();
            self.add_texture(&texture)?;
        }

        let has_style_lights = self.map.assets.has_style_lights || resolved.has_light_styles;
        if has_style_lights && self.lightmaps_added > 0 {
            self.add_style_shader()?;
        }

        self.finish()
    }

    fn add_required_files(&mut self) -> Result<(), PackError> {
        let bsp_path = self.map.bsp_path();
        if !bsp_path.is_file() {
            return Err(PackError::missing_asset(format!(
                "compiled bsp not found: {}",
                bsp_path.display()
            )));
        }
        self.bsp_mtime = fs::metadata(&bsp_path)
            .ok()
            .and_then(|meta| meta.modified().ok());
        let bsp_bytes = fs::read(&bsp_path)?;
        self.add_entry(&format!("maps/{}.bsp", self.map.name), &bsp_bytes)?;

        if self.options.include_source {
            let map_bytes = fs::read(&self.map.path)?;
            self.add_entry(&format!("maps/{}.map", self.map.name), &map_bytes)?;
        }

        self.add_lightmaps()
    }

    fn add_lightmaps(&mut self) -> Result<(), PackError> {
        let dir = self.map.lightmap_dir();
        if !dir.is_dir() {
            return Ok(());
        }
        let mut lightmaps: Vec<PathBuf> = fs::read_dir(&dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_ascii_lowercase())
                    .unwrap_or_default();
                path.is_file() && name.starts_with("lm_") && name.ends_with(".tga")
            })
            .collect();
        lightmaps.sort();

        let mut stale = false;
        for path in &lightmaps {
            self.cancel.checkpoint()?;
            let bytes = fs::read(path)?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.add_entry(&format!("maps/{}/{}", self.map.name, file_name), &bytes)?;
            self.lightmaps_added += 1;
            if !stale && self.is_older_than_bsp(fs::metadata(path).ok()) {
                stale = true;
            }
        }
        if stale {
            self.soft_warn("lightmaps are older than the bsp, recompile may be needed");
        }
        Ok(())
    }

    fn is_older_than_bsp(&self, metadata: Option<fs::Metadata>) -> bool {
        let Some(bsp_mtime) = self.bsp_mtime else {
            return false;
        };
        metadata
            .and_then(|meta| meta.modified().ok())
            .map(|mtime| mtime < bsp_mtime)
            .unwrap_or(false)
    }

    fn add_resource(&mut self, name: &str) -> Result<(), PackError> {
        let normalized = names::normalize(name);
        if normalized.is_empty()
            || self.builtin.contains_resource(&normalized)
            || self.added.contains(&normalized)
        {
            return Ok(());
        }
        for source in self.sources {
            if source.is_excluded() {
                continue;
            }
            if let Some(bytes) = source.read(&normalized)? {
                self.add_entry(&normalized, &bytes)?;
                return Ok(());
            }
        }
        self.soft_error(&format!("missing asset: {}", normalized))
    }

    fn add_texture(&mut self, name: &str) -> Result<(), PackError> {
        let normalized = names::normalize(name);
        if normalized.is_empty() || self.added.contains(&normalized) {
            return Ok(());
        }
        let extension = names::extension(&normalized).map(|ext| ext.to_string());
        let base = names::strip_extension(&normalized).to_string();

        match extension.as_deref() {
            None => {
                if self.try_texture(&normalized, &base, "tga")?
                    || self.try_texture(&normalized, &base, "jpg")?
                {
                    return Ok(());
                }
            }
            Some("tga") => {
                if self.try_texture(&normalized, &base, "tga")? {
                    return Ok(());
                }
            }
            Some(_) => {
                if self.try_texture(&normalized, &base, "jpg")? {
                    return Ok(());
                }
            }
        }
        self.soft_error(&format!(
            "Missing texture reference (no .tga or .jpg found): {}",
            normalized
        ))
    }

    fn try_texture(&mut self, bare: &str, base: &str, ext: &str) -> Result<bool, PackError> {
        let full = format!("{}.{}", base, ext);
        if self.builtin.contains_resource(&full) || self.added.contains(&full) {
            self.added.insert(bare.to_string());
            return Ok(true);
        }
        for source in self.sources {
            if source.is_excluded() {
                continue;
            }
            if let Some(bytes) = source.read(&full)? {
                self.add_entry(&full, &bytes)?;
                // The bare name is recorded too, so later references in
                // either spelling dedupe.
                self.added.insert(bare.to_string());
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn add_shader_file(&mut self, source_order: usize, file: &str) -> Result<(), PackError> {
        if self.added.contains(&names::normalize(file)) {
            return Ok(());
        }
        let Some(source) = self
            .sources
            .iter()
            .find(|source| source.order == source_order)
        else {
            return Err(PackError::internal(format!(
                "shader source index {} vanished",
                source_order
            )));
        };
        let Some(bytes) = source.read(file)? else {
            return Err(PackError::internal(format!(
                "shader file vanished from its source: {}",
                file
            )));
        };
        self.add_entry(file, &bytes)
    }

    fn add_style_shader(&mut self) -> Result<(), PackError> {
        let rel = format!("scripts/q3map_{}.shader", self.map.name);
        if self.added.contains(&names::normalize(&rel)) {
            return Ok(());
        }
        for source in self.sources {
            if source.is_excluded() {
                continue;
            }
            if let Some(bytes) = source.read(&rel)? {
                if self.is_older_than_bsp_source(source, &rel) {
                    self.soft_warn("style shader is older than the bsp, recompile may be needed");
                }
                return self.add_entry(&rel, &bytes);
            }
        }
        self.soft_warn(&format!("style shader not found: {}", rel));
        Ok(())
    }

    fn is_older_than_bsp_source(&self, source: &AssetSource, rel: &str) -> bool {
        let Some(bsp_mtime) = self.bsp_mtime else {
            return false;
        };
        source
            .mtime(rel)
            .map(|mtime| mtime < bsp_mtime)
            .unwrap_or(false)
    }

    fn add_entry(&mut self, rel: &str, bytes: &[u8]) -> Result<(), PackError> {
        self.cancel.checkpoint()?;
        let normalized = names::normalize(rel);
        if let ArchiveOutput::Zip(writer) = &mut self.out {
            let entry_options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer.start_file(normalized.as_str(), entry_options)?;
            writer.write_all(bytes)?;
        }
        self.added.insert(normalized.clone());
        self.entries.push(normalized);
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn soft_error(&mut self, message: &str) -> Result<(), PackError> {
        if self.options.require_all_assets {
            return Err(PackError::missing_asset(message.to_string()));
        }
        self.soft_warn(message);
        Ok(())
    }

    fn soft_warn(&mut self, message: &str) {
        logging::warn(message);
        self.warnings += 1;
    }

    fn finish(&mut self) -> Result<(), PackError> {
        if let ArchiveOutput::Zip(writer) = std::mem::replace(&mut self.out, ArchiveOutput::Dry) {
            writer.finish()?;
        }
        let mut sorted = self.entries.clone();
        sorted.sort();
        for entry in sorted {
            logging::debug(format!("packed {}", entry));
        }
        Ok(())
    }
}
