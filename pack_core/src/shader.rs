use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::cancel::CancelToken;
use crate::error::PackError;
use crate::lines::LineReader;
use crate::logging;
use crate::names::{self, NameSet};
use crate::source::AssetSource;

const SKY_SUFFIXES: [&str; 6] = ["_bk", "_dn", "_ft", "_up", "_rt", "_lf"];

#[derive(Clone, Debug)]
pub struct Shader {
    pub name: String,
    pub source_order: usize,
    // Case-preserved so directory sources can re-open the file; normalize
    // before comparing.
    pub file: String,
    pub shaders: NameSet,
    pub resources: NameSet,
    pub implicit_mapping: Option<String>,
    pub has_light_styles: bool,
}

impl Shader {
    fn new(name: String, source_order: usize, file: &str) -> Self {
        Self {
            name,
            source_order,
            file: file.replace('\\', "/"),
            shaders: NameSet::new(),
            resources: NameSet::new(),
            implicit_mapping: None,
            has_light_styles: false,
        }
    }
}

// Keyed by shader name; the winner for a name is the definition from the
// source with the lowest precedence index. Ties are recorded as duplicates.
#[derive(Debug, Default)]
pub struct ShaderIndex {
    entries: Mutex<BTreeMap<String, Shader>>,
    duplicates: Mutex<BTreeMap<String, Vec<String>>>,
}

impl ShaderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, shader: Shader) {
        let mut entries = self.entries.lock().expect("shader index lock poisoned");
        match entries.get(&shader.name) {
            None => {
                entries.insert(shader.name.clone(), shader);
            }
            Some(existing) if shader.source_order < existing.source_order => {
                entries.insert(shader.name.clone(), shader);
            }
            Some(existing) if shader.source_order == existing.source_order => {
                let mut duplicates = self
                    .duplicates
                    .lock()
                    .expect("shader duplicates lock poisoned");
                duplicates
                    .entry(shader.name.clone())
                    .or_default()
                    .push(shader.file.clone());
            }
            Some(_) => {}
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("shader index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duplicates(&self) -> BTreeMap<String, Vec<String>> {
        self.duplicates
            .lock()
            .expect("shader duplicates lock poisoned")
            .clone()
    }

    pub fn into_entries(self) -> BTreeMap<String, Shader> {
        self.entries
            .into_inner()
            .expect("shader index lock poisoned")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScanOptions {
    pub use_shaderlist: bool,
    pub include_source: bool,
}

pub fn scan_source(
    source: &AssetSource,
    options: ScanOptions,
    index: &ShaderIndex,
    cancel: &CancelToken,
) -> Result<usize, PackError> {
    let shaderlist = if options.use_shaderlist {
        source.shaderlist()?
    } else {
        None
    };
    let mut parsed = 0;
    for rel in source.enumerate_shader_files()? {
        cancel.checkpoint()?;
        let stem = names::file_stem(&rel).to_ascii_lowercase();
        if skip_shader_file(&stem) {
            continue;
        }
        if let Some(allowed) = &shaderlist {
            // levelshots bypasses the allowlist.
            if stem != "levelshots" && !allowed.contains(&stem) {
                continue;
            }
        }
        let Some(bytes) = source.read(&rel)? else {
            continue;
        };
        let label = source.root_path().join(&rel);
        for shader in parse_shader_text(
            &label,
            &rel,
            source.order,
            bytes,
            options.include_source,
            cancel,
        )? {
            index.insert(shader);
            parsed += 1;
        }
    }
    Ok(parsed)
}

// Excluded sources only contribute names for subtraction; a malformed shader
// file there is not worth failing the pipeline over.
pub fn harvest_shader_names(
    source: &AssetSource,
    cancel: &CancelToken,
) -> Result<Vec<String>, PackError> {
    let mut shader_names = Vec::new();
    for rel in source.enumerate_shader_files()? {
        cancel.checkpoint()?;
        let Some(bytes) = source.read(&rel)? else {
            continue;
        };
        let label = source.root_path().join(&rel);
        match parse_shader_text(&label, &rel, source.order, bytes, false, cancel) {
            Ok(shaders) => shader_names.extend(shaders.into_iter().map(|shader| shader.name)),
            Err(PackError::Canceled) => return Err(PackError::Canceled),
            Err(err) => logging::warn(format!("skipping unparseable shader file: {}", err)),
        }
    }
    Ok(shader_names)
}

fn skip_shader_file(stem: &str) -> bool {
    stem == "q3shaderscopyforradiant" || stem.starts_with("q3map_") || stem.starts_with("q3map2_")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    None,
    AfterName,
    Shader,
    Stage,
}

pub fn parse_shader_text(
    label: &Path,
    file_rel: &str,
    source_order: usize,
    bytes: Vec<u8>,
    include_source: bool,
    cancel: &CancelToken,
) -> Result<Vec<Shader>, PackError> {
    let reader = LineReader::from_bytes(label, bytes, cancel);
    let mut shaders = Vec::new();
    let mut current: Option<Shader> = None;
    let mut state = State::None;
    let mut in_block_comment = false;
    let mut last_index = 0;

    for line in reader {
        let line = line?;
        last_index = line.index;
        let value = strip_block_comments(&line.value, &mut in_block_comment);
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match state {
            State::None => {
                let (name, opened) = match value.strip_suffix('{') {
                    Some(rest) => (rest.trim_end(), true),
                    None => (value, false),
                };
                let Some(token) = name.split_whitespace().next() else {
                    return Err(PackError::invalid_data(
                        label,
                        line.index,
                        format!("expected shader name, got: {}", line.value),
                    ));
                };
                current = Some(Shader::new(
                    names::normalize(token),
                    source_order,
                    file_rel,
                ));
                state = if opened { State::Shader } else { State::AfterName };
            }
            State::AfterName => {
                if value != "{" {
                    return Err(PackError::invalid_data(
                        label,
                        line.index,
                        format!("expected '{{' after shader name, got: {}", line.value),
                    ));
                }
                state = State::Shader;
            }
            State::Shader => {
                if value.starts_with('{') {
                    state = State::Stage;
                } else if value == "}" {
                    if let Some(shader) = current.take() {
                        shaders.push(shader);
                    }
                    state = State::None;
                } else if let Some(shader) = current.as_mut() {
                    shader_directive(shader, value, include_source, label);
                }
            }
            State::Stage => {
                if value == "}" {
                    state = State::Shader;
                } else if let Some(shader) = current.as_mut() {
                    stage_directive(shader, value);
                }
            }
        }
    }

    if state != State::None {
        return Err(PackError::invalid_data(
            label,
            last_index,
            "unexpected end of shader file",
        ));
    }
    Ok(shaders)
}

fn shader_directive(shader: &mut Shader, value: &str, include_source: bool, label: &Path) {
    let mut tokens = value.split_whitespace();
    let Some(keyword) = tokens.next() else {
        return;
    };
    let keyword = keyword.to_ascii_lowercase();
    match keyword.as_str() {
        // Hot, reference-free keywords.
        "surfaceparm" | "cull" | "nopicmip" | "nomipmaps" | "tesssize" => return,
        _ => {}
    }
    if keyword.starts_with("qer_") && !(include_source && keyword == "qer_editorimage") {
        return;
    }

    match keyword.as_str() {
        "q3map_backshader" | "q3map_baseshader" | "q3map_cloneshader" | "q3map_remapshader"
        | "sunshader" => match tokens.next() {
            Some(arg) if !arg.starts_with('$') => {
                shader.shaders.insert(arg);
            }
            Some(_) => {}
            None => logging::warn(format!(
                "{}: {} without argument in shader {}",
                label.display(),
                keyword,
                shader.name
            )),
        },
        "q3map_lightimage" | "qer_editorimage" | "q3map_normalimage" => {
            if include_source {
                if let Some(arg) = tokens.next() {
                    shader.resources.insert(arg.trim_matches('"'));
                }
            }
        }
        "skyparms" => {
            if let Some(arg) = tokens.next() {
                let base = if arg == "-" {
                    shader.name.clone()
                } else {
                    names::normalize(arg)
                };
                for suffix in SKY_SUFFIXES {
                    shader.resources.insert(&format!("{}{}", base, suffix));
                }
            }
        }
        "q3map_surfacemodel" => {
            if let Some(arg) = tokens.next() {
                shader.resources.insert(arg);
            }
        }
        "q3map_lightstyle" => {
            shader.has_light_styles = true;
        }
        _ if keyword.starts_with("implicit") => {
            if let Some(arg) = tokens.next() {
                let mapping = if arg == "-" {
                    shader.name.clone()
                } else {
                    names::normalize(arg)
                };
                shader.implicit_mapping = Some(mapping);
            }
        }
        _ => {}
    }
}

fn stage_directive(shader: &mut Shader, value: &str) {
    let first = value
        .chars()
        .next()
        .map(|ch| ch.to_ascii_lowercase())
        .unwrap_or('\0');
    if !matches!(first, 'm' | 'a' | 'c' | 'v') {
        return;
    }
    let mut tokens = value.split_whitespace();
    let Some(keyword) = tokens.next() else {
        return;
    };
    match keyword.to_ascii_lowercase().as_str() {
        "map" | "clampmap" => {
            if let Some(arg) = tokens.next() {
                if !arg.starts_with('$') {
                    shader.resources.insert(arg);
                }
            }
        }
        "animmap" => {
            // First argument is the frame frequency.
            for frame in tokens.skip(1) {
                shader.resources.insert(frame);
            }
        }
        "videomap" => {
            if let Some(arg) = tokens.next() {
                shader.resources.insert(arg);
            }
        }
        _ => {}
    }
}

fn strip_block_comments(value: &str, in_block_comment: &mut bool) -> String {
    let mut out = String::new();
    let mut rest = value;
    loop {
        if *in_block_comment {
            match rest.find("*/") {
                Some(pos) => {
                    rest = &rest[pos + 2..];
                    *in_block_comment = false;
                }
                None => return out,
            }
        } else {
            match rest.find("/*") {
                Some(pos) => {
                    out.push_str(&rest[..pos]);
                    rest = &rest[pos + 2..];
                    *in_block_comment = true;
                }
                None => {
                    out.push_str(rest);
                    return out;
                }
            }
        }
    }
}
