use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::PackError;
use crate::lines::LineReader;
use crate::logging;
use crate::map::Map;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxRef {
    pub value: String,
    pub is_shader: bool,
}

impl AuxRef {
    fn resource(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            is_shader: false,
        }
    }

    fn shader(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            is_shader: true,
        }
    }
}

type ParseFn = fn(&Path, &CancelToken) -> Result<Vec<AuxRef>, PackError>;

pub struct AuxParser {
    pub description: &'static str,
    rel: fn(&Map) -> String,
    parse: ParseFn,
}

impl AuxParser {
    pub fn rel_path(&self, map: &Map) -> String {
        (self.rel)(map)
    }

    fn find(&self, map: &Map) -> Option<PathBuf> {
        let rel = self.rel_path(map);
        for dir in map.asset_directories() {
            let mut candidate = dir;
            for part in rel.split('/') {
                candidate.push(part);
            }
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    pub fn run(&self, map: &Map, cancel: &CancelToken) -> Result<Vec<AuxRef>, PackError> {
        let rel = self.rel_path(map);
        let Some(path) = self.find(map) else {
            logging::info(format!("no {} found ({})", self.description, rel));
            return Ok(Vec::new());
        };
        let mut refs = (self.parse)(&path, cancel)?;
        // The script itself ships with the map.
        refs.push(AuxRef::resource(rel));
        Ok(refs)
    }
}

pub fn default_parsers() -> Vec<AuxParser> {
    vec![
        AuxParser {
            description: "mapscript",
            rel: |map| format!("maps/{}.script", map.name),
            parse: parse_mapscript,
        },
        AuxParser {
            description: "soundscript",
            rel: |map| format!("sound/scripts/{}.sounds", map.name),
            parse: parse_soundscript,
        },
        AuxParser {
            description: "speakerscript",
            rel: |map| format!("sound/maps/{}.sps", map.name),
            parse: parse_speakerscript,
        },
        AuxParser {
            description: "arena file",
            rel: |map| format!("scripts/{}.arena", map.name),
            parse: parse_arena,
        },
    ]
}

fn parse_mapscript(path: &Path, cancel: &CancelToken) -> Result<Vec<AuxRef>, PackError> {
    let mut refs = Vec::new();
    for line in LineReader::open(path, cancel)? {
        let line = line?;
        let tokens = tokens(&line.value);
        let Some(first) = tokens.first() else {
            continue;
        };
        match first.to_ascii_lowercase().as_str() {
            "playsound" => {
                if let Some(file) = tokens.get(1) {
                    refs.push(AuxRef::resource(file.as_str()));
                }
            }
            "remapshader" => {
                if let Some(new_shader) = tokens.get(2) {
                    refs.push(AuxRef::shader(new_shader.as_str()));
                }
            }
            _ => {}
        }
    }
    Ok(refs)
}

fn parse_soundscript(path: &Path, cancel: &CancelToken) -> Result<Vec<AuxRef>, PackError> {
    let mut refs = Vec::new();
    for line in LineReader::open(path, cancel)? {
        let line = line?;
        let tokens = tokens(&line.value);
        let Some(first) = tokens.first() else {
            continue;
        };
        let keyword = first.to_ascii_lowercase();
        if keyword == "sound" || keyword == "wave" {
            if let Some(file) = tokens.get(1) {
                refs.push(AuxRef::resource(file.as_str()));
            }
        }
    }
    Ok(refs)
}

fn parse_speakerscript(path: &Path, cancel: &CancelToken) -> Result<Vec<AuxRef>, PackError> {
    let mut refs = Vec::new();
    for line in LineReader::open(path, cancel)? {
        let line = line?;
        let tokens = tokens(&line.value);
        if tokens
            .first()
            .map(|first| first.eq_ignore_ascii_case("noise"))
            .unwrap_or(false)
        {
            if let Some(file) = tokens.get(1) {
                refs.push(AuxRef::resource(file.as_str()));
            }
        }
    }
    Ok(refs)
}

// The arena file carries no file references of its own; its presence implies
// the conventional levelshot image, which resolves through the texture
// fallback rule.
fn parse_arena(path: &Path, _cancel: &CancelToken) -> Result<Vec<AuxRef>, PackError> {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![AuxRef::shader(format!("levelshots/{}", stem))])
}

fn tokens(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in value.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ch if ch.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    out.push(current.clone());
                    current.clear();
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
