use std::collections::HashMap;
use std::path::Path;

use crate::cancel::CancelToken;
use crate::error::PackError;
use crate::lines::{Line, LineReader};
use crate::logging;
use crate::map::MapAssets;

// Base-game shaders that always exist; never emitted as references.
const FAST_SKIP: [&str; 3] = ["common/caulk", "common/nodraw", "common/trigger"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    None,
    Entity,
    BrushDef,
    PatchDef,
    AfterDef,
}

struct MapParser<'a> {
    path: &'a Path,
    assets: &'a mut MapAssets,
    include_source: bool,
    state: State,
    expect_open: bool,
    def_nested: bool,
    patch_shader_pending: bool,
    keys: HashMap<String, String>,
}

pub fn parse_map_file(
    path: &Path,
    assets: &mut MapAssets,
    include_source: bool,
    cancel: &CancelToken,
) -> Result<(), PackError> {
    let reader = LineReader::open(path, cancel)?;
    let mut parser = MapParser {
        path,
        assets,
        include_source,
        state: State::None,
        expect_open: false,
        def_nested: false,
        patch_shader_pending: false,
        keys: HashMap::new(),
    };
    let mut last_index = 0;
    for line in reader {
        let line = line?;
        last_index = line.index;
        parser.step(&line)?;
    }
    if parser.state != State::None || parser.expect_open {
        return Err(PackError::invalid_data(
            path,
            last_index,
            "unexpected end of map file",
        ));
    }
    Ok(())
}

impl MapParser<'_> {
    fn step(&mut self, line: &Line) -> Result<(), PackError> {
        if self.expect_open {
            if line.value != "{" {
                return Err(self.fail(line, "expected '{'"));
            }
            self.expect_open = false;
            return Ok(());
        }
        match self.state {
            State::None => match line.value.as_str() {
                "{" => {
                    self.state = State::Entity;
                    Ok(())
                }
                "}" => Err(self.fail(line, "stray '}' at top level")),
                _ => Ok(()),
            },
            State::Entity => match line.first_char {
                '"' => self.take_key_value(line),
                '{' => {
                    self.state = State::BrushDef;
                    self.def_nested = false;
                    Ok(())
                }
                '}' => {
                    self.finish_entity();
                    self.state = State::None;
                    Ok(())
                }
                _ => Err(self.fail(line, "unexpected token inside entity")),
            },
            State::BrushDef => match line.value.as_str() {
                "brushDef" => {
                    self.expect_open = true;
                    self.def_nested = true;
                    Ok(())
                }
                "patchDef2" | "patchDef3" => {
                    self.state = State::PatchDef;
                    self.expect_open = true;
                    self.def_nested = true;
                    self.patch_shader_pending = true;
                    Ok(())
                }
                "}" => {
                    self.state = if self.def_nested {
                        State::AfterDef
                    } else {
                        State::Entity
                    };
                    Ok(())
                }
                _ if line.first_char == '(' => self.take_face_shader(line),
                _ => Ok(()),
            },
            State::PatchDef => {
                if line.value == "}" {
                    self.state = State::AfterDef;
                    Ok(())
                } else if self.patch_shader_pending && line.first_char != '(' {
                    self.patch_shader_pending = false;
                    if let Some(token) = line.value.split_whitespace().next() {
                        self.add_prefixed_shader(token);
                    }
                    Ok(())
                } else {
                    Ok(())
                }
            }
            State::AfterDef => {
                if line.value == "}" {
                    self.state = State::Entity;
                    Ok(())
                } else {
                    Err(self.fail(line, "expected '}' after geometry definition"))
                }
            }
        }
    }

    fn take_face_shader(&mut self, line: &Line) -> Result<(), PackError> {
        let Some(pos) = line.value.rfind(')') else {
            return Err(self.fail(line, "brush face without closing ')'"));
        };
        let rest = &line.value[pos + 1..];
        if !rest.starts_with(' ') {
            return Err(self.fail(line, "brush face without space after ')'"));
        }
        let Some(token) = rest[1..].split_whitespace().next() else {
            return Err(self.fail(line, "brush face without shader token"));
        };
        self.add_prefixed_shader(token);
        Ok(())
    }

    // Brush and patch tokens arrive without the textures/ prefix.
    fn add_prefixed_shader(&mut self, token: &str) {
        let lower = token.to_ascii_lowercase();
        if FAST_SKIP.iter().any(|skip| *skip == lower) {
            return;
        }
        self.assets.shaders.insert(&format!("textures/{}", token));
    }

    fn take_key_value(&mut self, line: &Line) -> Result<(), PackError> {
        let Some((key, value)) = parse_key_value(&line.value) else {
            return Err(self.fail(line, "malformed key/value pair"));
        };
        self.keys.insert(key.to_ascii_lowercase(), value);
        Ok(())
    }

    fn finish_entity(&mut self) {
        let classname = self
            .keys
            .get("classname")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();
        for (key, value) in &self.keys {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "_fog" | "sun" => {
                    self.assets.shaders.insert(value);
                }
                "_celshader" => {
                    self.assets.shaders.insert(&format!("textures/{}", value));
                }
                "shader" => {
                    let has_terrain = self.keys.contains_key("terrain");
                    let prefixed = value.to_ascii_lowercase().starts_with("textures/");
                    if has_terrain && !prefixed {
                        logging::debug(format!(
                            "terrain shader without textures/ prefix, prepending: {}",
                            value
                        ));
                        self.assets.shaders.insert(&format!("textures/{}", value));
                    } else {
                        self.assets.shaders.insert(value);
                    }
                }
                "targetshadername" | "targetshadernewname" => {
                    self.assets.shaders.insert(value);
                }
                "model" => {
                    if classname == "misc_model" && !self.include_source {
                        continue;
                    }
                    self.assets.resources.insert(value);
                    self.assets.misc_models.insert(value);
                }
                "model2" => {
                    self.assets.resources.insert(value);
                }
                "skin" | "_skin" => {
                    self.assets.resources.insert(value);
                }
                "noise" => {
                    if !value.eq_ignore_ascii_case("nosound") {
                        self.assets.resources.insert(value);
                    }
                }
                "sound" => {
                    if classname == "dlight" && !value.eq_ignore_ascii_case("nosound") {
                        self.assets.resources.insert(value);
                    }
                }
                "style" => {
                    if classname == "light" {
                        self.assets.has_style_lights = true;
                    }
                }
                _ => {}
            }
        }
        self.keys.clear();
    }

    fn fail(&self, line: &Line, message: &str) -> PackError {
        PackError::invalid_data(
            self.path,
            line.index,
            format!("{}: {}", message, line.value),
        )
    }
}

fn parse_key_value(value: &str) -> Option<(String, String)> {
    let mut parts = value.splitn(2, '"').nth(1)?.splitn(2, '"');
    let key = parts.next()?.to_string();
    let rest = parts.next()?;
    let mut value_parts = rest.splitn(2, '"').nth(1)?.splitn(2, '"');
    let value = value_parts.next()?.to_string();
    Some((key, value))
}
