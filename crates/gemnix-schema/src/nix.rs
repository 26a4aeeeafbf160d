//! Nix expression writer for gemsets.
//!
//! Packages are emitted in gemset order; attributes inside a package are
//! emitted in sorted order so that output is byte-stable across runs.

use crate::gemset::Gemset;
use serde_json::Value;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const NIX_KEYWORDS: &[&str] = &[
    "assert", "else", "if", "in", "inherit", "let", "or", "rec", "then", "with",
];

/// Render the gemset as a Nix attribute set.
pub fn render_gemset(gemset: &Gemset) -> Result<String, serde_json::Error> {
    let mut out = String::from("{\n");
    for (name, descriptor) in gemset.iter() {
        let value = serde_json::to_value(descriptor)?;
        let _ = write!(out, "  {} = ", attr_name(name));
        render_value(&mut out, &value, 1);
        out.push_str(";\n");
    }
    out.push_str("}\n");
    Ok(out)
}

/// Atomically write the rendered gemset to `path` with mode 0644.
pub fn write_gemset_file(gemset: &Gemset, path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    let content = render_gemset(gemset).map_err(std::io::Error::other)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    }
    if let Ok(f) = fs::File::open(dir) {
        let _ = f.sync_all();
    }
    Ok(())
}

fn render_value(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => push_string(out, s),
        Value::Array(items) => {
            if items.is_empty() {
                out.push_str("[]");
            } else if items.iter().all(is_scalar) {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    render_value(out, item, depth);
                }
                out.push(']');
            } else {
                out.push_str("[\n");
                for item in items {
                    indent(out, depth + 1);
                    render_value(out, item, depth + 1);
                    out.push('\n');
                }
                indent(out, depth);
                out.push(']');
            }
        }
        Value::Object(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{\n");
            for (key, item) in map {
                indent(out, depth + 1);
                out.push_str(&attr_name(key));
                out.push_str(" = ");
                render_value(out, item, depth + 1);
                out.push_str(";\n");
            }
            indent(out, depth);
            out.push('}');
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn push_string(out: &mut String, s: &str) {
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            other => out.push(other),
        }
    }
    out.push('"');
}

fn attr_name(name: &str) -> String {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '\''));
    if valid_start && valid_rest && !NIX_KEYWORDS.contains(&name) {
        name.to_owned()
    } else {
        let mut quoted = String::new();
        push_string(&mut quoted, name);
        quoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemset::{PackageDescriptor, PlatformAlias, SourceDescriptor, TargetDescriptor};
    use crate::types::ContentHash;

    fn sample() -> Gemset {
        let mut gemset = Gemset::new();
        let mut rake = PackageDescriptor::new("13.0.6");
        rake.groups = vec!["default".to_owned()];
        rake.remotes = vec!["https://rubygems.org".to_owned()];
        rake.hash = Some(ContentHash::new("abc"));
        gemset.insert("rake", rake);

        let mut phony = PackageDescriptor::new("0.1.0");
        phony.source = Some(SourceDescriptor::Path {
            path: "lib/phony_gem".to_owned(),
        });
        phony.platforms = vec![PlatformAlias::engine("mingw")];
        gemset.insert("phony_gem", phony);
        gemset
    }

    #[test]
    fn renders_attribute_set() {
        let text = render_gemset(&sample()).unwrap();
        assert!(text.starts_with("{\n  rake = {\n"));
        assert!(text.contains("    version = \"13.0.6\";\n"));
        assert!(text.contains("    sha256 = \"abc\";\n"));
        assert!(text.contains("    groups = [\"default\"];\n"));
        assert!(text.contains("    dependencies = [];\n"));
        assert!(text.contains("      type = \"path\";\n"));
        assert!(text.ends_with("  };\n}\n"));
    }

    #[test]
    fn preserves_package_order() {
        let text = render_gemset(&sample()).unwrap();
        assert!(text.find("rake =").unwrap() < text.find("phony_gem =").unwrap());
    }

    #[test]
    fn renders_list_of_attrsets_multiline() {
        let mut gemset = Gemset::new();
        let mut sqlite = PackageDescriptor::new("1.6.6");
        sqlite.targets = vec![TargetDescriptor {
            target: "x86_64-linux".to_owned(),
            target_cpu: "x86_64".to_owned(),
            target_os: "linux".to_owned(),
            kind: "gem".to_owned(),
            hash: None,
        }];
        gemset.insert("sqlite3", sqlite);
        let text = render_gemset(&gemset).unwrap();
        assert!(text.contains("targets = [\n      {\n"));
        assert!(text.contains("targetCPU = \"x86_64\";"));
    }

    #[test]
    fn escapes_strings() {
        let mut out = String::new();
        push_string(&mut out, "a\"b\\c${d}$e");
        assert_eq!(out, r#""a\"b\\c\${d}$e""#);
    }

    #[test]
    fn quotes_names_that_are_not_identifiers() {
        assert_eq!(attr_name("io-console"), "io-console");
        assert_eq!(attr_name("3scale-api"), "\"3scale-api\"");
        assert_eq!(attr_name("with"), "\"with\"");
        assert_eq!(attr_name("net-http.persistent"), "\"net-http.persistent\"");
    }

    #[test]
    fn write_gemset_file_is_world_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gemset.nix");
        write_gemset_file(&sample(), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("rake"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }
    }
}
