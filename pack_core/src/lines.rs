use std::fs;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::PackError;

#[derive(Clone, Debug)]
pub struct Line {
    pub index: usize,
    pub raw: String,
    pub value: String,
    pub first_char: char,
}

pub struct LineReader {
    label: PathBuf,
    cancel: CancelToken,
    lines: std::vec::IntoIter<(usize, String)>,
    last_index: usize,
}

impl LineReader {
    pub fn open(path: &Path, cancel: &CancelToken) -> Result<Self, PackError> {
        let bytes = fs::read(path)?;
        Ok(Self::from_bytes(path, bytes, cancel))
    }

    pub fn from_bytes(label: &Path, bytes: Vec<u8>, cancel: &CancelToken) -> Self {
        // Permissive decoding: invalid sequences become replacement chars.
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        };
        let lines: Vec<(usize, String)> = text
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.to_string()))
            .collect();
        Self {
            label: label.to_path_buf(),
            cancel: cancel.clone(),
            lines: lines.into_iter(),
            last_index: 0,
        }
    }

    pub fn label(&self) -> &Path {
        &self.label
    }

    // Line number of the most recently yielded line, for end-of-input errors.
    pub fn last_index(&self) -> usize {
        self.last_index
    }
}

impl Iterator for LineReader {
    type Item = Result<Line, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Err(err) = self.cancel.checkpoint() {
                return Some(Err(err));
            }
            let (index, raw) = self.lines.next()?;
            self.last_index = index;
            let mut value = raw.trim();
            if let Some(pos) = value.find("//") {
                value = value[..pos].trim_end();
            }
            if value.is_empty() {
                continue;
            }
            let first_char = value.chars().next().unwrap_or('\0');
            return Some(Ok(Line {
                index,
                value: value.to_string(),
                raw,
                first_char,
            }));
        }
    }
}
