use std::path::PathBuf;
use std::thread;

use crate::auxiliary::{self, AuxRef};
use crate::builtin::{self, BuiltinContent};
use crate::cancel::CancelToken;
use crate::error::PackError;
use crate::logging;
use crate::map::{Map, MapAssets};
use crate::map_parser;
use crate::packager::{self, PackSummary};
use crate::resolver;
use crate::shader::{self, ScanOptions, ShaderIndex};
use crate::source::{self, AssetSource, SourceFilters};

#[derive(Clone, Debug)]
pub struct PackOptions {
    pub map_file: PathBuf,
    pub output: Option<PathBuf>,
    pub overwrite: bool,
    pub dry_run: bool,
    pub use_shaderlist: bool,
    pub include_source: bool,
    pub require_all_assets: bool,
    pub load_pk3s: bool,
    pub exclude_sources: Vec<String>,
    pub ignore_sources: Vec<String>,
}

impl PackOptions {
    pub fn new(map_file: PathBuf) -> Self {
        Self {
            map_file,
            output: None,
            overwrite: false,
            dry_run: false,
            use_shaderlist: false,
            include_source: false,
            require_all_assets: false,
            load_pk3s: false,
            exclude_sources: Vec::new(),
            ignore_sources: Vec::new(),
        }
    }

    pub fn source_filters(&self) -> SourceFilters {
        SourceFilters {
            load_pk3s: self.load_pk3s,
            exclude: self.exclude_sources.clone(),
            ignore: self.ignore_sources.clone(),
        }
    }
}

enum SourceOutcome {
    Scanned(usize),
    Excluded {
        shaders: Vec<String>,
        entries: Vec<String>,
    },
}

pub fn run(options: &PackOptions, cancel: &CancelToken) -> Result<PackSummary, PackError> {
    cancel.checkpoint()?;
    let mut map = Map::locate(&options.map_file)?;
    let sources = source::enumerate_sources(&map, &options.source_filters())?;
    for source in &sources {
        logging::debug(format!("source {}: {}", source.order, source.describe()));
    }

    let index = ShaderIndex::new();
    let scan_options = ScanOptions {
        use_shaderlist: options.use_shaderlist,
        include_source: options.include_source,
    };
    let parsers = auxiliary::default_parsers();

    let mut parsed_assets = MapAssets::default();
    let mut map_result: Result<(), PackError> = Ok(());
    let mut builtin_result: Result<BuiltinContent, PackError> =
        Err(PackError::internal("builtin index never ran"));
    let mut aux_results: Vec<Result<Vec<AuxRef>, PackError>> = Vec::new();
    let mut source_results: Vec<Result<SourceOutcome, PackError>> = Vec::new();

    // Map parsing is strictly sequential and runs on the driver thread;
    // everything else fans out.
    thread::scope(|scope| {
        let et_main = map.et_main.clone();
        let builtin_handle = thread::Builder::new()
            .name("builtin-index".to_string())
            .spawn_scoped(scope, move || builtin::index_builtin(&et_main, cancel))
            .expect("spawn worker failed");

        let map_ref = &map;
        let aux_handles: Vec<_> = parsers
            .iter()
            .map(|parser| {
                thread::Builder::new()
                    .name(format!("aux-{}", parser.description.replace(' ', "-")))
                    .spawn_scoped(scope, move || parser.run(map_ref, cancel))
                    .expect("spawn worker failed")
            })
            .collect();

        let index_ref = &index;
        let source_handles: Vec<_> = sources
            .iter()
            .map(|source| {
                thread::Builder::new()
                    .name(format!("shader-scan-{}", source.order))
                    .spawn_scoped(scope, move || scan_one_source(
                        source,
                        scan_options,
                        index_ref,
                        cancel,
                    ))
                    .expect("spawn worker failed")
            })
            .collect();

        map_result = map_parser::parse_map_file(
            &map.path,
            &mut parsed_assets,
            options.include_source,
            cancel,
        );

        builtin_result = join_worker(builtin_handle);
        for handle in aux_handles {
            aux_results.push(join_worker(handle));
        }
        for handle in source_handles {
            source_results.push(join_worker(handle));
        }
    });

    map_result?;
    let mut builtin = builtin_result?;
    map.assets = parsed_assets;
    for refs in aux_results {
        for aux_ref in refs? {
            if aux_ref.is_shader {
                map.assets.shaders.insert(&aux_ref.value);
            } else {
                map.assets.resources.insert(&aux_ref.value);
            }
        }
    }
    for outcome in source_results {
        match outcome? {
            SourceOutcome::Scanned(count) => {
                logging::debug(format!("indexed {} shader definitions", count));
            }
            SourceOutcome::Excluded { shaders, entries } => {
                for name in shaders {
                    builtin.add_shader(&name);
                }
                for entry in entries {
                    builtin.add_resource(&entry);
                }
            }
        }
    }

    for (name, files) in index.duplicates() {
        logging::warn(format!(
            "duplicate shader definition for {} (also in {})",
            name,
            files.join(", ")
        ));
    }

    let definitions = index.into_entries();
    let resolved = resolver::resolve(&map.assets.shaders, &definitions, &builtin);
    let summary = packager::pack(&map, &sources, &builtin, &resolved, options, cancel)?;

    let marker = if options.dry_run { " (dry run)" } else { "" };
    logging::info(format!(
        "packed {} entries, {} bytes, {} warnings{}",
        summary.entries.len(),
        summary.bytes_written,
        summary.warnings,
        marker
    ));
    Ok(summary)
}

fn scan_one_source(
    source: &AssetSource,
    scan_options: ScanOptions,
    index: &ShaderIndex,
    cancel: &CancelToken,
) -> Result<SourceOutcome, PackError> {
    if source.is_excluded() {
        let shaders = shader::harvest_shader_names(source, cancel)?;
        Ok(SourceOutcome::Excluded {
            shaders,
            entries: source.entry_names(),
        })
    } else {
        let count = shader::scan_source(source, scan_options, index, cancel)?;
        Ok(SourceOutcome::Scanned(count))
    }
}

fn join_worker<T>(handle: thread::ScopedJoinHandle<'_, Result<T, PackError>>) -> Result<T, PackError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(PackError::internal("worker thread panicked")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::Path;
    use std::time::{SystemTime, UNIX_EPOCH};
    use zip::read::ZipArchive;
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

    struct Fixture {
        temp: TempDir,
        et_main: PathBuf,
        map_root: PathBuf,
        map_path: PathBuf,
    }

    fn brush_map(shader_token: &str) -> String {
        format!(
            "{{\n\"classname\" \"worldspawn\"\n{{\n( 0 0 0 ) ( 1 0 0 ) ( 0 1 0 ) {} 0 0 0 0.5 0.5 0 0 0\n}}\n}}\n",
            shader_token
        )
    }

    fn fixture(label: &str, map_root_rel: Option<&str>, map_text: &str) -> Fixture {
        let temp = TempDir::new(label);
        let et_main = temp.path().join("etmain");
        let map_root = match map_root_rel {
            Some(rel) => et_main.join(rel),
            None => et_main.clone(),
        };
        let maps = map_root.join("maps");
        fs::create_dir_all(&maps).expect("create maps");
        let map_path = maps.join("a.map");
        fs::write(&map_path, map_text).expect("write map");
        fs::write(maps.join("a.bsp"), b"IBSP").expect("write bsp");
        write_pk3(&et_main.join("pak0.pk3"), &[("pak0.cfg", b"" as &[u8])]);
        Fixture {
            temp,
            et_main,
            map_root,
            map_path,
        }
    }

    fn options_for(fixture: &Fixture) -> PackOptions {
        let mut options = PackOptions::new(fixture.map_path.clone());
        options.output = Some(fixture.temp.path().join("out.pk3"));
        options
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let file = File::open(path).expect("open output");
        let mut archive = ZipArchive::new(file).expect("read output");
        let mut names = Vec::new();
        for index in 0..archive.len() {
            names.push(archive.by_index(index).expect("entry").name().to_string());
        }
        names.sort();
        names
    }

    fn entry_bytes(path: &Path, name: &str) -> Vec<u8> {
        use std::io::Read;
        let file = File::open(path).expect("open output");
        let mut archive = ZipArchive::new(file).expect("read output");
        let mut entry = archive.by_name(name).expect("entry");
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).expect("read entry");
        bytes
    }

    #[test]
    fn minimum_map_packs_bsp_and_texture() {
        let fixture = fixture("pipe_minimum", None, &brush_map("mymap/x"));
        let textures = fixture.et_main.join("textures").join("mymap");
        fs::create_dir_all(&textures).expect("textures");
        fs::write(textures.join("x.tga"), b"tga").expect("write tga");

        let summary = run(&options_for(&fixture), &CancelToken::new()).expect("run");
        assert_eq!(summary.warnings, 0);
        let output = summary.output.expect("output");
        assert_eq!(
            entry_names(&output),
            vec!["maps/a.bsp".to_string(), "textures/mymap/x.tga".to_string()]
        );
    }

    #[test]
    fn remap_shader_pulls_transitive_references() {
        let fixture = fixture("pipe_remap", None, &brush_map("mymap/a"));
        let scripts = fixture.et_main.join("scripts");
        fs::create_dir_all(&scripts).expect("scripts");
        fs::write(
            scripts.join("mm.shader"),
            "textures/mymap/a\n{\n    q3map_remapShader textures/mymap/b\n}\ntextures/mymap/b\n{\n    {\n        map textures/mymap/b.jpg\n    }\n}\n",
        )
        .expect("write shader");
        let textures = fixture.et_main.join("textures").join("mymap");
        fs::create_dir_all(&textures).expect("textures");
        fs::write(textures.join("b.jpg"), b"jpg").expect("write jpg");

        let summary = run(&options_for(&fixture), &CancelToken::new()).expect("run");
        let output = summary.output.expect("output");
        assert_eq!(
            entry_names(&output),
            vec![
                "maps/a.bsp".to_string(),
                "scripts/mm.shader".to_string(),
                "textures/mymap/b.jpg".to_string(),
            ]
        );

        // Re-parsing the packed shader file reproduces the reference set.
        let reparsed = shader::parse_shader_text(
            Path::new("scripts/mm.shader"),
            "scripts/mm.shader",
            0,
            entry_bytes(&output, "scripts/mm.shader"),
            false,
            &CancelToken::new(),
        )
        .expect("reparse");
        let names: Vec<&str> = reparsed.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["textures/mymap/a", "textures/mymap/b"]);
        assert!(reparsed[0].shaders.contains("textures/mymap/b"));
        assert!(reparsed[1].resources.contains("textures/mymap/b.jpg"));
    }

    #[test]
    fn include_source_ships_the_map_file() {
        let fixture = fixture("pipe_source", None, &brush_map("mymap/x"));
        let textures = fixture.et_main.join("textures").join("mymap");
        fs::create_dir_all(&textures).expect("textures");
        fs::write(textures.join("x.tga"), b"tga").expect("write tga");

        let mut options = options_for(&fixture);
        options.include_source = true;
        let summary = run(&options, &CancelToken::new()).expect("run");
        let output = summary.output.expect("output");
        assert!(entry_names(&output).contains(&"maps/a.map".to_string()));
    }

    #[test]
    fn excluded_archive_content_is_subtracted() {
        let fixture = fixture("pipe_excluded", None, &brush_map("mymap/x"));
        write_pk3(
            &fixture.et_main.join("released.pk3"),
            &[("textures/mymap/x.tga", b"tga" as &[u8])],
        );

        let mut options = options_for(&fixture);
        options.exclude_sources = vec!["released.pk3".to_string()];
        let summary = run(&options, &CancelToken::new()).expect("run");
        assert_eq!(summary.warnings, 0);
        let output = summary.output.expect("output");
        assert_eq!(entry_names(&output), vec!["maps/a.bsp".to_string()]);
    }

    #[test]
    fn fast_skipped_common_shaders_never_appear() {
        let fixture = fixture("pipe_common", None, &brush_map("common/caulk"));
        let summary = run(&options_for(&fixture), &CancelToken::new()).expect("run");
        assert_eq!(summary.warnings, 0);
        let output = summary.output.expect("output");
        assert_eq!(entry_names(&output), vec!["maps/a.bsp".to_string()]);
    }

    #[test]
    fn skyparms_packs_six_sky_faces() {
        let fixture = fixture("pipe_sky", None, &brush_map("mymap/sky"));
        let scripts = fixture.et_main.join("scripts");
        fs::create_dir_all(&scripts).expect("scripts");
        fs::write(
            scripts.join("sky.shader"),
            "textures/mymap/sky\n{\n    skyparms env/desert - 512\n}\n",
        )
        .expect("write shader");
        let env = fixture.et_main.join("env");
        fs::create_dir_all(&env).expect("env");
        for suffix in ["bk", "dn", "ft", "up", "rt", "lf"] {
            fs::write(env.join(format!("desert_{}.tga", suffix)), b"tga").expect("write face");
        }

        let summary = run(&options_for(&fixture), &CancelToken::new()).expect("run");
        assert_eq!(summary.warnings, 0);
        let output = summary.output.expect("output");
        let names = entry_names(&output);
        for suffix in ["bk", "dn", "ft", "up", "rt", "lf"] {
            assert!(
                names.contains(&format!("env/desert_{}.tga", suffix)),
                "missing face {} in {:?}",
                suffix,
                names
            );
        }
        assert!(names.contains(&"scripts/sky.shader".to_string()));
    }

    #[test]
    fn missing_texture_warns_but_succeeds() {
        let fixture = fixture("pipe_missing", None, &brush_map("mymap/missing"));
        let summary = run(&options_for(&fixture), &CancelToken::new()).expect("run");
        assert_eq!(summary.warnings, 1);
        let output = summary.output.expect("output");
        assert_eq!(entry_names(&output), vec!["maps/a.bsp".to_string()]);
    }

    #[test]
    fn map_root_pk3dir_wins_shader_precedence() {
        let fixture = fixture(
            "pipe_precedence",
            Some("new.pk3dir"),
            &brush_map("mymap/s1"),
        );
        let pk3dir_scripts = fixture.map_root.join("scripts");
        fs::create_dir_all(&pk3dir_scripts).expect("scripts");
        let winner_text =
            "textures/mymap/s1\n{\n    {\n        map textures/mymap/new.tga\n    }\n}\n";
        fs::write(pk3dir_scripts.join("s.shader"), winner_text).expect("write winner");
        let etmain_scripts = fixture.et_main.join("scripts");
        fs::create_dir_all(&etmain_scripts).expect("scripts");
        fs::write(
            etmain_scripts.join("s.shader"),
            "textures/mymap/s1\n{\n    {\n        map textures/mymap/old.tga\n    }\n}\n",
        )
        .expect("write loser");
        let pk3dir_textures = fixture.map_root.join("textures").join("mymap");
        fs::create_dir_all(&pk3dir_textures).expect("textures");
        fs::write(pk3dir_textures.join("new.tga"), b"new").expect("write new");
        let etmain_textures = fixture.et_main.join("textures").join("mymap");
        fs::create_dir_all(&etmain_textures).expect("textures");
        fs::write(etmain_textures.join("old.tga"), b"old").expect("write old");

        let summary = run(&options_for(&fixture), &CancelToken::new()).expect("run");
        let output = summary.output.expect("output");
        let names = entry_names(&output);
        assert!(names.contains(&"scripts/s.shader".to_string()));
        assert!(names.contains(&"textures/mymap/new.tga".to_string()));
        assert!(!names.contains(&"textures/mymap/old.tga".to_string()));
        assert_eq!(entry_bytes(&output, "scripts/s.shader"), winner_text.as_bytes());
    }

    #[test]
    fn builtin_resources_stay_out_of_the_archive() {
        let text = "{\n\"classname\" \"speaker\"\n\"noise\" \"sound/world/door.wav\"\n}\n";
        let fixture = fixture("pipe_builtin", None, text);
        write_pk3(
            &fixture.et_main.join("pak0.pk3"),
            &[("sound/world/door.wav", b"wav" as &[u8])],
        );

        let summary = run(&options_for(&fixture), &CancelToken::new()).expect("run");
        assert_eq!(summary.warnings, 0);
        let output = summary.output.expect("output");
        assert_eq!(entry_names(&output), vec!["maps/a.bsp".to_string()]);
    }

    #[test]
    fn pipeline_is_idempotent_over_entry_sets() {
        let fixture = fixture("pipe_idempotent", None, &brush_map("mymap/x"));
        let textures = fixture.et_main.join("textures").join("mymap");
        fs::create_dir_all(&textures).expect("textures");
        fs::write(textures.join("x.tga"), b"tga").expect("write tga");

        let mut options = options_for(&fixture);
        options.overwrite = true;
        let first = run(&options, &CancelToken::new()).expect("first run");
        let first_names = entry_names(&first.output.expect("output"));
        let second = run(&options, &CancelToken::new()).expect("second run");
        let second_names = entry_names(&second.output.expect("output"));
        assert_eq!(first_names, second_names);
    }

    #[test]
    fn aux_scripts_ship_with_the_map() {
        let fixture = fixture("pipe_aux", None, &brush_map("mymap/x"));
        let textures = fixture.et_main.join("textures").join("mymap");
        fs::create_dir_all(&textures).expect("textures");
        fs::write(textures.join("x.tga"), b"tga").expect("write tga");
        let maps = fixture.et_main.join("maps");
        fs::write(
            maps.join("a.script"),
            "game_manager\n{\n    spawn\n    {\n        playsound \"sound/a/horn.wav\"\n    }\n}\n",
        )
        .expect("write script");
        let sound = fixture.et_main.join("sound").join("a");
        fs::create_dir_all(&sound).expect("sound dir");
        fs::write(sound.join("horn.wav"), b"wav").expect("write wav");

        let summary = run(&options_for(&fixture), &CancelToken::new()).expect("run");
        assert_eq!(summary.warnings, 0);
        let output = summary.output.expect("output");
        let names = entry_names(&output);
        assert!(names.contains(&"maps/a.script".to_string()));
        assert!(names.contains(&"sound/a/horn.wav".to_string()));
    }

    #[test]
    fn canceled_before_start_surfaces_canceled() {
        let fixture = fixture("pipe_cancel", None, &brush_map("mymap/x"));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run(&options_for(&fixture), &cancel).unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn missing_pak0_fails_early() {
        let fixture = fixture("pipe_no_pak0", None, &brush_map("mymap/x"));
        fs::remove_file(fixture.et_main.join("pak0.pk3")).expect("remove pak0");
        let err = run(&options_for(&fixture), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PackError::Environment(_)));
    }
}
