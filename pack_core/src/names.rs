use std::collections::HashSet;

// Resource names are compared case-insensitively with '/' separators; every
// name entering a set or index goes through normalize first.
pub fn normalize(name: &str) -> String {
    let trimmed = name.trim().trim_matches('"');
    let mut normalized = trimmed.replace('\\', "/");
    while normalized.starts_with("./") {
        normalized.drain(..2);
    }
    let normalized = normalized.trim_start_matches('/').trim_end_matches('/');
    normalized.to_ascii_lowercase()
}

pub fn extension(name: &str) -> Option<&str> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

pub fn strip_extension(name: &str) -> &str {
    match extension(name) {
        Some(ext) => &name[..name.len() - ext.len() - 1],
        None => name,
    }
}

pub fn file_stem(name: &str) -> &str {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    strip_extension(file_name)
}

// Texture-class references carry no extension, or .tga/.jpg; everything else
// (.md3, .roq, .wav, ...) resolves as a plain file resource.
pub fn is_texture_like(name: &str) -> bool {
    match extension(name) {
        None => true,
        Some(ext) => ext.eq_ignore_ascii_case("tga") || ext.eq_ignore_ascii_case("jpg"),
    }
}

#[derive(Clone, Debug, Default)]
pub struct NameSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str) -> bool {
        let normalized = normalize(name);
        if normalized.is_empty() {
            return false;
        }
        if self.seen.insert(normalized.clone()) {
            self.order.push(normalized);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(&normalize(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn extend_from(&mut self, other: &NameSet) {
        for name in other.iter() {
            self.insert(name);
        }
    }
}
