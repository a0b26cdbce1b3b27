use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const REQUIRED_KEYS: &[&str] = &[
    "asset_dir",
    "template",
    "pattern",
    "initial",
    "padding",
    "line_restart",
    "line_height",
];
const OPTIONAL_KEYS: &[&str] = &["glyph_size", "remap"];

struct Preset {
    /// Variant name as printed by `PlateVariant::name`.
    name: String,
    file: String,
}

fn main() {
    let manifest_dir = PathBuf::from(
        env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is not set by cargo"),
    );
    let variants_dir = manifest_dir.join("src").join("variants");
    println!("cargo:rerun-if-changed={}", variants_dir.display());

    let mut presets = Vec::new();
    for entry in fs::read_dir(&variants_dir).expect("failed to list src/variants") {
        let path = entry.expect("failed to read src/variants entry").path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        println!("cargo:rerun-if-changed={}", path.display());
        let Some(stem) = path.file_stem().and_then(|value| value.to_str()) else {
            continue;
        };
        validate_preset(&path);
        presets.push(Preset {
            name: stem.to_ascii_lowercase().replace('_', "-"),
            file: stem.to_string(),
        });
    }
    presets.sort_by(|a, b| a.name.cmp(&b.name));
    if let Some(pair) = presets.windows(2).find(|pair| pair[0].name == pair[1].name) {
        panic!("variant '{}' is defined by more than one preset file", pair[0].name);
    }

    let mut generated = String::new();
    generated.push_str("/// Variant names with a built-in preset, sorted.\n");
    generated.push_str("pub(crate) const EMBEDDED_VARIANT_NAMES: &[&str] = &[\n");
    for preset in &presets {
        generated.push_str(&format!("    \"{}\",\n", preset.name));
    }
    generated.push_str("];\n\n");
    generated
        .push_str("pub(crate) fn embedded_variant_preset(name: &str) -> Option<&'static str> {\n");
    generated.push_str("    match name {\n");
    for preset in &presets {
        generated.push_str(&format!(
            "        \"{name}\" => Some(include_str!(concat!(env!(\"CARGO_MANIFEST_DIR\"), \"/src/variants/{file}.toml\"))),\n",
            name = preset.name,
            file = preset.file,
        ));
    }
    generated.push_str("        _ => None,\n");
    generated.push_str("    }\n");
    generated.push_str("}\n");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is not set by cargo"));
    let destination = out_dir.join("embedded_variant_presets.rs");
    fs::write(&destination, generated).expect("failed to write embedded variant preset index");
}

/// Rejects presets the runtime loader would only fail on later.
fn validate_preset(path: &Path) {
    let display = path.display();
    let content = fs::read_to_string(path).unwrap_or_else(|err| panic!("{display}: {err}"));
    let table: toml::Table = content
        .parse()
        .unwrap_or_else(|err| panic!("{display}: invalid TOML: {err}"));

    for key in table.keys() {
        if !REQUIRED_KEYS.contains(&key.as_str()) && !OPTIONAL_KEYS.contains(&key.as_str()) {
            panic!("{display}: unknown key '{key}'");
        }
    }
    for key in REQUIRED_KEYS {
        if !table.contains_key(*key) {
            panic!("{display}: missing key '{key}'");
        }
    }

    let pattern = table["pattern"]
        .as_str()
        .unwrap_or_else(|| panic!("{display}: pattern must be a string"));
    if let Some(bad) = pattern.chars().find(|ch| !matches!(ch, 'L' | 'N' | '-' | '/')) {
        panic!("{display}: pattern '{pattern}' has unsupported slot '{bad}'");
    }
    if !pattern.chars().any(|ch| ch == 'L' || ch == 'N') {
        panic!("{display}: pattern '{pattern}' places no characters");
    }

    for key in ["initial", "glyph_size"] {
        let Some(value) = table.get(key) else {
            continue;
        };
        let pair = value.as_array().is_some_and(|items| {
            items.len() == 2
                && items
                    .iter()
                    .all(|item| item.as_integer().is_some_and(|n| n >= 0))
        });
        if !pair {
            panic!("{display}: {key} must be two non-negative integers");
        }
    }
    if let Some(remap) = table.get("remap") {
        let remap = remap
            .as_table()
            .unwrap_or_else(|| panic!("{display}: remap must be a table"));
        for (symbol, target) in remap {
            if symbol.chars().count() != 1 || target.as_str().is_none() {
                panic!("{display}: remap entry '{symbol}' must map one symbol to a file stem");
            }
        }
    }
}
