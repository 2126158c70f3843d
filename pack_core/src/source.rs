use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use zip::read::ZipArchive;

use crate::error::PackError;
use crate::map::Map;
use crate::names;

const PAK0_NAME: &str = "pak0.pk3";

#[derive(Debug)]
pub enum SourceKind {
    Dir {
        root: PathBuf,
    },
    Pk3 {
        path: PathBuf,
        archive: Mutex<ZipArchive<File>>,
        // normalized entry name -> archive index
        entries: BTreeMap<String, usize>,
    },
}

#[derive(Debug)]
pub struct AssetSource {
    pub kind: SourceKind,
    pub order: usize,
    pub excluded: bool,
}

impl AssetSource {
    fn dir(root: PathBuf) -> Self {
        Self {
            kind: SourceKind::Dir { root },
            order: 0,
            excluded: false,
        }
    }

    fn pk3(path: PathBuf, excluded: bool) -> Result<Self, PackError> {
        let file = File::open(&path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut entries = BTreeMap::new();
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = names::normalize(entry.name());
            if name.is_empty() {
                continue;
            }
            entries.insert(name, index);
        }
        Ok(Self {
            kind: SourceKind::Pk3 {
                path,
                archive: Mutex::new(archive),
                entries,
            },
            order: 0,
            excluded,
        })
    }

    pub fn describe(&self) -> String {
        let flag = if self.excluded { " (excluded)" } else { "" };
        match &self.kind {
            SourceKind::Dir { root } => {
                let kind = if dir_is_pk3dir(root) { "pk3dir" } else { "dir" };
                format!("{} {}{}", kind, root.display(), flag)
            }
            SourceKind::Pk3 { path, .. } => format!("pk3 {}{}", path.display(), flag),
        }
    }

    pub fn root_path(&self) -> &Path {
        match &self.kind {
            SourceKind::Dir { root } => root,
            SourceKind::Pk3 { path, .. } => path,
        }
    }

    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    pub fn contains(&self, rel: &str) -> bool {
        match &self.kind {
            SourceKind::Dir { root } => join_rel(root, rel).is_file(),
            SourceKind::Pk3 { entries, .. } => entries.contains_key(&names::normalize(rel)),
        }
    }

    pub fn read(&self, rel: &str) -> Result<Option<Vec<u8>>, PackError> {
        match &self.kind {
            SourceKind::Dir { root } => {
                let path = join_rel(root, rel);
                if !path.is_file() {
                    return Ok(None);
                }
                Ok(Some(fs::read(path)?))
            }
            SourceKind::Pk3 {
                archive, entries, ..
            } => {
                let Some(&index) = entries.get(&names::normalize(rel)) else {
                    return Ok(None);
                };
                let mut guard = archive.lock().expect("archive lock poisoned");
                let mut entry = guard.by_index(index)?;
                let mut buffer = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut buffer)?;
                Ok(Some(buffer))
            }
        }
    }

    // Filesystem mtime for staleness checks; archive members have none.
    pub fn mtime(&self, rel: &str) -> Option<SystemTime> {
        match &self.kind {
            SourceKind::Dir { root } => fs::metadata(join_rel(root, rel))
                .ok()
                .and_then(|meta| meta.modified().ok()),
            SourceKind::Pk3 { .. } => None,
        }
    }

    pub fn enumerate_shader_files(&self) -> Result<Vec<String>, PackError> {
        let mut files = Vec::new();
        match &self.kind {
            SourceKind::Dir { root } => {
                let scripts = root.join("scripts");
                let Ok(read_dir) = fs::read_dir(&scripts) else {
                    return Ok(files);
                };
                for entry in read_dir.flatten() {
                    let Ok(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.to_ascii_lowercase().ends_with(".shader") {
                        files.push(format!("scripts/{}", name));
                    }
                }
            }
            SourceKind::Pk3 { entries, .. } => {
                for name in entries.keys() {
                    if name.starts_with("scripts/") && name.ends_with(".shader") {
                        files.push(name.clone());
                    }
                }
            }
        }
        files.sort_by_key(|name| name.to_ascii_lowercase());
        Ok(files)
    }

    // The shaderlist allowlist is a directory convention; archives ship
    // without one and are always fully scanned.
    pub fn shaderlist(&self) -> Result<Option<Vec<String>>, PackError> {
        if matches!(self.kind, SourceKind::Pk3 { .. }) {
            return Ok(None);
        }
        let Some(bytes) = self.read("scripts/shaderlist.txt")? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut stems = Vec::new();
        for line in text.lines() {
            let mut value = line.trim();
            if let Some(pos) = value.find("//") {
                value = value[..pos].trim_end();
            }
            if value.is_empty() {
                continue;
            }
            stems.push(names::file_stem(value).to_ascii_lowercase());
        }
        Ok(Some(stems))
    }

    pub fn entry_names(&self) -> Vec<String> {
        match &self.kind {
            SourceKind::Dir { .. } => Vec::new(),
            SourceKind::Pk3 { entries, .. } => entries.keys().cloned().collect(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SourceFilters {
    pub load_pk3s: bool,
    pub exclude: Vec<String>,
    pub ignore: Vec<String>,
}

pub fn enumerate_sources(
    map: &Map,
    filters: &SourceFilters,
) -> Result<Vec<AssetSource>, PackError> {
    let mut sources = Vec::new();

    // pak0 pseudo-source sits at the absolute front: its content always wins
    // precedence and is only ever used for subtraction.
    let pak0_path = map.et_main.join(PAK0_NAME);
    if pak0_path.is_file() {
        sources.push(AssetSource::pk3(pak0_path.clone(), true)?);
    }

    let mut dirs = vec![map.map_root.clone()];
    if map.et_main != map.map_root {
        dirs.push(map.et_main.clone());
    }
    for pk3dir in pk3dirs_under(&map.et_main)? {
        if pk3dir != map.map_root {
            dirs.push(pk3dir);
        }
    }
    for root in &dirs {
        sources.push(AssetSource::dir(root.clone()));
    }

    let consider_archives =
        filters.load_pk3s || !filters.exclude.is_empty() || !filters.ignore.is_empty();
    if consider_archives {
        let mut archives = Vec::new();
        for dir in &dirs {
            for path in pk3s_under(dir)? {
                if path == pak0_path {
                    continue;
                }
                archives.push(path);
            }
        }
        archives.sort_by(|a, b| {
            let a_name = file_name_lower(a);
            let b_name = file_name_lower(b);
            b_name.cmp(&a_name)
        });
        for path in archives {
            if list_matches(&filters.ignore, &path, &map.et_main) {
                continue;
            }
            let excluded = list_matches(&filters.exclude, &path, &map.et_main);
            if !excluded && !filters.load_pk3s {
                // Without archive loading, unlisted pk3s are dropped; the
                // exclude list alone only pulls archives in for subtraction.
                continue;
            }
            sources.push(AssetSource::pk3(path, excluded)?);
        }
    }

    for (order, source) in sources.iter_mut().enumerate() {
        source.order = order;
    }
    Ok(sources)
}

fn pk3dirs_under(et_main: &Path) -> Result<Vec<PathBuf>, PackError> {
    let mut dirs = Vec::new();
    let read_dir = fs::read_dir(et_main).map_err(|err| {
        PackError::environment(format!("etmain unreadable ({}): {}", et_main.display(), err))
    })?;
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.is_dir() && dir_is_pk3dir(&path) {
            dirs.push(path);
        }
    }
    // Descending by name, case-insensitively.
    dirs.sort_by(|a, b| file_name_lower(b).cmp(&file_name_lower(a)));
    Ok(dirs)
}

fn pk3s_under(dir: &Path) -> Result<Vec<PathBuf>, PackError> {
    let mut archives = Vec::new();
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Ok(archives);
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        let is_pk3 = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pk3"))
            .unwrap_or(false);
        if path.is_file() && is_pk3 {
            archives.push(path);
        }
    }
    Ok(archives)
}

fn dir_is_pk3dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_ascii_lowercase().ends_with(".pk3dir"))
        .unwrap_or(false)
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn list_matches(list: &[String], archive: &Path, et_main: &Path) -> bool {
    if list.is_empty() {
        return false;
    }
    let file_name = file_name_lower(archive);
    let rel = archive
        .strip_prefix(et_main)
        .map(|rel| names::normalize(&rel.to_string_lossy()))
        .unwrap_or_default();
    list.iter().any(|item| {
        let item = names::normalize(item);
        item == file_name || (!rel.is_empty() && item == rel)
    })
}

fn join_rel(root: &Path, rel: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in rel.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        path.push(part);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::UNIX_EPOCH;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        fn new(label: &str) -> Self {
            let mut path = std::env::temp_dir();
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            path.push(format!("pk3pack_test_{}_{}", label, stamp));
            fs::create_dir_all(&path).expect("create temp dir");
            Self { path }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn write_pk3(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create pk3");
        let mut writer = ZipWriter::new(file);
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(data).expect("write entry");
        }
        writer.finish().expect("finish pk3");
    }

    fn fixture_map(temp: &TempDir, map_root_rel: &str) -> Map {
        let maps = temp.path().join("etmain").join(map_root_rel).join("maps");
        fs::create_dir_all(&maps).expect("create maps");
        let map_file = maps.join("a.map");
        fs::write(&map_file, "{\n}\n").expect("write map");
        Map::locate(&map_file).expect("locate")
    }

    fn etmain_map(temp: &TempDir) -> Map {
        let maps = temp.path().join("etmain").join("maps");
        fs::create_dir_all(&maps).expect("create maps");
        let map_file = maps.join("a.map");
        fs::write(&map_file, "{\n}\n").expect("write map");
        Map::locate(&map_file).expect("locate")
    }

    #[test]
    fn source_order_follows_precedence() {
        let temp = TempDir::new("source_order");
        let map = fixture_map(&temp, "zz_mine.pk3dir");
        let et_main = map.et_main.clone();
        fs::create_dir_all(et_main.join("aa_other.pk3dir")).expect("pk3dir");
        fs::create_dir_all(et_main.join("mm_other.pk3dir")).expect("pk3dir");
        write_pk3(&et_main.join("pak0.pk3"), &[("pak0.txt", b"x")]);
        write_pk3(&et_main.join("zz_extra.pk3"), &[("z.txt", b"x")]);
        write_pk3(&et_main.join("aa_extra.pk3"), &[("a.txt", b"x")]);

        let filters = SourceFilters {
            load_pk3s: true,
            ..SourceFilters::default()
        };
        let sources = enumerate_sources(&map, &filters).expect("enumerate");
        let described: Vec<String> = sources.iter().map(|s| s.describe()).collect();

        // pak0 front, then map_root, etmain, pk3dirs descending, then
        // archives by filename descending.
        assert!(described[0].contains("pak0.pk3"), "{:?}", described);
        assert!(sources[0].is_excluded());
        assert!(described[1].contains("zz_mine.pk3dir"), "{:?}", described);
        assert!(described[2].ends_with(&et_main.display().to_string()), "{:?}", described);
        assert!(described[3].contains("mm_other.pk3dir"), "{:?}", described);
        assert!(described[4].contains("aa_other.pk3dir"), "{:?}", described);
        assert!(described[5].contains("zz_extra.pk3"), "{:?}", described);
        assert!(described[6].contains("aa_extra.pk3"), "{:?}", described);
        for (index, source) in sources.iter().enumerate() {
            assert_eq!(source.order, index);
        }
    }

    #[test]
    fn archives_skipped_without_load_pk3s() {
        let temp = TempDir::new("source_no_pk3");
        let map = etmain_map(&temp);
        write_pk3(&map.et_main.join("extra.pk3"), &[("x.txt", b"x")]);

        let sources = enumerate_sources(&map, &SourceFilters::default()).expect("enumerate");
        assert_eq!(sources.len(), 1);
        assert!(matches!(sources[0].kind, SourceKind::Dir { .. }));
    }

    #[test]
    fn exclude_list_pulls_archive_in_for_subtraction_only() {
        let temp = TempDir::new("source_exclude");
        let map = etmain_map(&temp);
        write_pk3(&map.et_main.join("old_release.pk3"), &[("x.txt", b"x")]);
        write_pk3(&map.et_main.join("other.pk3"), &[("y.txt", b"x")]);

        let filters = SourceFilters {
            load_pk3s: false,
            exclude: vec!["old_release.pk3".to_string()],
            ignore: Vec::new(),
        };
        let sources = enumerate_sources(&map, &filters).expect("enumerate");
        let pk3s: Vec<&AssetSource> = sources
            .iter()
            .filter(|s| matches!(s.kind, SourceKind::Pk3 { .. }))
            .collect();
        assert_eq!(pk3s.len(), 1);
        assert!(pk3s[0].is_excluded());
        assert!(pk3s[0].describe().contains("old_release.pk3"));
    }

    #[test]
    fn ignore_list_drops_archive_entirely() {
        let temp = TempDir::new("source_ignore");
        let map = etmain_map(&temp);
        write_pk3(&map.et_main.join("junk.pk3"), &[("x.txt", b"x")]);

        let filters = SourceFilters {
            load_pk3s: true,
            exclude: Vec::new(),
            ignore: vec!["JUNK.PK3".to_string()],
        };
        let sources = enumerate_sources(&map, &filters).expect("enumerate");
        assert!(sources
            .iter()
            .all(|s| !s.describe().contains("junk.pk3")));
    }

    #[test]
    fn pk3_source_reads_and_lists_shader_files() {
        let temp = TempDir::new("source_read");
        let map = etmain_map(&temp);
        let pk3 = map.et_main.join("stuff.pk3");
        write_pk3(
            &pk3,
            &[
                ("Scripts/MyMap.shader", b"textures/a\n{\n}\n" as &[u8]),
                ("textures/mymap/x.tga", b"tga"),
            ],
        );
        let filters = SourceFilters {
            load_pk3s: true,
            ..SourceFilters::default()
        };
        let sources = enumerate_sources(&map, &filters).expect("enumerate");
        let pk3_source = sources
            .iter()
            .find(|s| matches!(s.kind, SourceKind::Pk3 { .. }))
            .expect("pk3 source");

        let shader_files = pk3_source.enumerate_shader_files().expect("enumerate");
        assert_eq!(shader_files, vec!["scripts/mymap.shader".to_string()]);
        assert!(pk3_source.contains("TEXTURES\\MyMap\\x.tga"));
        let bytes = pk3_source
            .read("textures/mymap/x.tga")
            .expect("read")
            .expect("present");
        assert_eq!(bytes, b"tga");
        assert!(pk3_source.mtime("textures/mymap/x.tga").is_none());
        assert!(pk3_source.shaderlist().expect("shaderlist").is_none());
    }

    #[test]
    fn dir_source_shaderlist_parses_stems() {
        let temp = TempDir::new("source_shaderlist");
        let map = etmain_map(&temp);
        let scripts = map.et_main.join("scripts");
        fs::create_dir_all(&scripts).expect("scripts");
        fs::write(
            scripts.join("shaderlist.txt"),
            "// allowlist\nMyMap\ncommon.shader\n\n",
        )
        .expect("write shaderlist");
        fs::write(scripts.join("mymap.shader"), "x\n{\n}\n").expect("write shader");

        let sources = enumerate_sources(&map, &SourceFilters::default()).expect("enumerate");
        let stems = sources[0]
            .shaderlist()
            .expect("shaderlist")
            .expect("present");
        assert_eq!(stems, vec!["mymap".to_string(), "common".to_string()]);
        let files = sources[0].enumerate_shader_files().expect("files");
        assert_eq!(files, vec!["scripts/mymap.shader".to_string()]);
    }
}
