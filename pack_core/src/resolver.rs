use std::collections::BTreeMap;

use crate::builtin::BuiltinContent;
use crate::names::NameSet;
use crate::shader::Shader;

#[derive(Debug, Default)]
pub struct ResolvedAssets {
    pub shaders: BTreeMap<String, Shader>,
    pub resources: NameSet,
    pub textures: NameSet,
    pub has_light_styles: bool,
}

// Transitive closure over the map's shader references: built-ins are dropped,
// defined shaders pull in their own references, and undefined names fall
// through as bare texture references.
pub fn resolve(
    map_shaders: &NameSet,
    index: &BTreeMap<String, Shader>,
    builtin: &BuiltinContent,
) -> ResolvedAssets {
    let mut resolved = ResolvedAssets::default();
    for name in map_shaders.iter() {
        include_shader(name, index, builtin, &mut resolved);
    }
    resolved
}

fn include_shader(
    name: &str,
    index: &BTreeMap<String, Shader>,
    builtin: &BuiltinContent,
    resolved: &mut ResolvedAssets,
) {
    if builtin.contains_shader(name) {
        return;
    }
    if resolved.shaders.contains_key(name) {
        return;
    }
    let Some(shader) = index.get(name) else {
        resolved.textures.insert(name);
        return;
    };
    // Membership precedes recursion, so reference cycles terminate.
    resolved.shaders.insert(name.to_string(), shader.clone());
    resolved.has_light_styles |= shader.has_light_styles;
    for resource in shader.resources.iter() {
        resolved.resources.insert(resource);
    }
    let references: Vec<String> = shader.shaders.iter().map(str::to_string).collect();
    for reference in references {
        include_shader(&reference, index, builtin, resolved);
    }
}
