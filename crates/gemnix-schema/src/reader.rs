//! Reader for existing `gemset.nix` files.
//!
//! A gemset only uses the data subset of the Nix language: attribute sets,
//! lists, strings, booleans, integers and `null`. Anything else (`let`,
//! functions, interpolation, attribute paths) is rejected as a syntax error.
//!
//! Files written by older tools nest the registry hash and remotes under
//! `source = { type = "gem"; ... }`; those are lifted to the package level.

use crate::gemset::{Gemset, PackageDescriptor};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GemsetReadError {
    #[error("failed to read gemset: {0}")]
    Io(#[from] std::io::Error),
    #[error("gemset syntax error at line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}

pub fn read_gemset_file(path: impl AsRef<Path>) -> Result<Gemset, GemsetReadError> {
    let text = fs::read_to_string(path)?;
    parse_gemset(&text)
}

/// Parse gemset text. Bindings that do not describe a package (no
/// `version`, wrong value types) are skipped.
pub fn parse_gemset(text: &str) -> Result<Gemset, GemsetReadError> {
    let mut parser = Parser { text, pos: 0 };
    parser.skip_trivia();
    parser.expect('{')?;

    let mut gemset = Gemset::new();
    loop {
        parser.skip_trivia();
        if parser.eat('}') {
            break;
        }
        let (name, value) = parser.binding()?;
        if let Some(descriptor) = package_descriptor(value) {
            gemset.insert(name, descriptor);
        }
    }

    parser.skip_trivia();
    if parser.peek().is_some() {
        return Err(parser.error("trailing input after the gemset"));
    }
    Ok(gemset)
}

fn package_descriptor(mut value: Value) -> Option<PackageDescriptor> {
    let package = value.as_object_mut()?;
    let nested_hash = match package.get_mut("source") {
        Some(Value::Object(source)) => source.remove("sha256"),
        _ => None,
    };
    if let Some(hash) = nested_hash {
        package.entry("sha256").or_insert(hash);
    }
    let legacy_gem = package
        .get("source")
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        == Some("gem");
    if legacy_gem {
        if let Some(Value::Object(mut source)) = package.remove("source") {
            if let Some(remotes) = source.remove("remotes") {
                package.entry("remotes").or_insert(remotes);
            }
        }
    }
    serde_json::from_value(value).ok()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), GemsetReadError> {
        if self.eat(c) {
            Ok(())
        } else {
            match self.peek() {
                Some(found) => Err(self.error(format!("expected '{c}', found '{found}'"))),
                None => Err(self.error(format!("expected '{c}', found end of input"))),
            }
        }
    }

    fn error(&self, reason: impl Into<String>) -> GemsetReadError {
        GemsetReadError::Syntax {
            line: self.text[..self.pos].matches('\n').count() + 1,
            reason: reason.into(),
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = &self.text[self.pos..];
            if let Some(c) = rest.chars().next().filter(|c| c.is_whitespace()) {
                self.pos += c.len_utf8();
            } else if rest.starts_with('#') {
                self.pos += rest.find('\n').unwrap_or(rest.len());
            } else if rest.starts_with("/*") {
                self.pos += rest.find("*/").map_or(rest.len(), |end| end + 2);
            } else {
                return;
            }
        }
    }

    /// `name = value;`
    fn binding(&mut self) -> Result<(String, Value), GemsetReadError> {
        let name = self.attr_name()?;
        self.skip_trivia();
        if self.peek() == Some('.') {
            return Err(self.error(format!("attribute path after '{name}' is not supported")));
        }
        self.expect('=')?;
        self.skip_trivia();
        let value = self.value()?;
        self.skip_trivia();
        self.expect(';')?;
        Ok((name, value))
    }

    fn attr_name(&mut self) -> Result<String, GemsetReadError> {
        if self.peek() == Some('"') {
            return self.string();
        }
        let word = self.word();
        if word.is_empty() {
            return Err(self.error("expected an attribute name"));
        }
        Ok(word.to_owned())
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        if self
            .peek()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '\''))
            {
                self.pos += 1;
            }
        }
        &self.text[start..self.pos]
    }

    fn value(&mut self) -> Result<Value, GemsetReadError> {
        match self.peek() {
            Some('{') => self.attrset(),
            Some('[') => self.list(),
            Some('"') => self.string().map(Value::String),
            Some(c) if c == '-' || c.is_ascii_digit() => self.integer(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => match self.word() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                other => Err(self.error(format!("unsupported expression '{other}'"))),
            },
            Some(c) => Err(self.error(format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn attrset(&mut self) -> Result<Value, GemsetReadError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_trivia();
            if self.eat('}') {
                return Ok(Value::Object(map));
            }
            let (name, value) = self.binding()?;
            map.insert(name, value);
        }
    }

    fn list(&mut self) -> Result<Value, GemsetReadError> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.eat(']') {
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
        }
    }

    fn string(&mut self) -> Result<String, GemsetReadError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some('$') if self.peek() == Some('{') => {
                    return Err(self.error("string interpolation is not supported"));
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn integer(&mut self) -> Result<Value, GemsetReadError> {
        let start = self.pos;
        self.eat('-');
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = self.text;
        let digits = &text[start..self.pos];
        digits
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| self.error(format!("invalid integer '{digits}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemset::{PlatformAlias, SourceDescriptor, TargetDescriptor};
    use crate::nix::render_gemset;
    use crate::types::{ContentHash, Revision};

    const LEGACY: &str = r#"{
  # written by an older tool
  apparition = {
    dependencies = ["capybara" "websocket-driver"];
    groups = ["test"];
    platforms = [];
    source = {
      fetchSubmodules = false;
      rev = "ca86be4d54af835d531dbcd2b86e7b2c77f85f34";
      sha256 = "1cygcla4nz2v7kr8gkp4rx3hr8hz0i1nq5ixzkb0ldq6hy7dzpzw";
      type = "git";
      url = "https://github.com/twalpole/apparition.git";
    };
    version = "0.6.0";
  };
  rake = {
    groups = ["default"];
    platforms = [];
    source = {
      remotes = ["https://rubygems.org"];
      sha256 = "15whn7p9nrkxangbs9hh75q585yfn66lv0v2mhj6q6dl6x8bzr2w";
      type = "gem";
    };
    version = "13.0.6";
  };
}
"#;

    #[test]
    fn reads_what_the_writer_writes() {
        let mut gemset = Gemset::new();
        let mut phony = PackageDescriptor::new("0.1.0");
        phony.source = Some(SourceDescriptor::Path {
            path: "lib/phony_gem".to_owned(),
        });
        phony.platforms = vec![PlatformAlias {
            engine: "ruby".to_owned(),
            version: Some("2.7".to_owned()),
        }];
        gemset.insert("phony_gem", phony);

        let mut sqlite = PackageDescriptor::new("1.6.6");
        sqlite.remotes = vec!["https://rubygems.org".to_owned()];
        sqlite.groups = vec!["default".to_owned()];
        sqlite.dependencies.insert("mini_portile2".to_owned());
        sqlite.targets = vec![TargetDescriptor {
            target: "x86_64-linux".to_owned(),
            target_cpu: "x86_64".to_owned(),
            target_os: "linux".to_owned(),
            kind: "gem".to_owned(),
            hash: Some(ContentHash::new("0x1")),
        }];
        gemset.insert("sqlite3", sqlite);
        gemset.insert("3scale-api", PackageDescriptor::new("1.0.0"));

        let text = render_gemset(&gemset).unwrap();
        assert_eq!(parse_gemset(&text).unwrap(), gemset);
    }

    #[test]
    fn lifts_legacy_source_hashes() {
        let gemset = parse_gemset(LEGACY).unwrap();
        let names: Vec<_> = gemset.names().collect();
        assert_eq!(names, vec!["apparition", "rake"]);

        let rake = gemset.get("rake").unwrap();
        assert!(rake.source.is_none());
        assert_eq!(rake.remotes, vec!["https://rubygems.org"]);
        assert_eq!(
            rake.hash.as_ref().unwrap(),
            "15whn7p9nrkxangbs9hh75q585yfn66lv0v2mhj6q6dl6x8bzr2w"
        );

        let apparition = gemset.get("apparition").unwrap();
        assert_eq!(
            apparition.source,
            Some(SourceDescriptor::Git {
                url: "https://github.com/twalpole/apparition.git".to_owned(),
                rev: Revision::new("ca86be4d54af835d531dbcd2b86e7b2c77f85f34"),
                fetch_submodules: false,
            })
        );
        assert_eq!(
            apparition.hash.as_ref().unwrap(),
            "1cygcla4nz2v7kr8gkp4rx3hr8hz0i1nq5ixzkb0ldq6hy7dzpzw"
        );
        assert!(apparition.dependencies.contains("websocket-driver"));
    }

    #[test]
    fn skips_bindings_that_are_not_packages() {
        let gemset =
            parse_gemset("{ rake = { version = \"13.0.6\"; }; broken = { groups = []; }; }")
                .unwrap();
        assert_eq!(gemset.len(), 1);
        assert!(gemset.contains("rake"));
    }

    #[test]
    fn comments_and_escapes() {
        let text = "/* header */ {\n  \"a\\\"b\" = { version = \"1\\n2\"; }; # trailing\n}\n";
        let gemset = parse_gemset(text).unwrap();
        assert_eq!(gemset.get("a\"b").unwrap().version, "1\n2");
    }

    #[test]
    fn rejects_expressions_outside_the_data_subset() {
        let cases = [
            ("{ rake = { version = \"${v}\"; }; }", "interpolation"),
            ("let v = 1; in { }", "expected '{'"),
            ("{\n  rake.version = \"1\";\n}", "attribute path"),
            ("{\n  rake = import ./rake.nix;\n}", "unsupported expression 'import'"),
            ("{ rake = { version = \"1; }; }", "unterminated"),
            ("{ } { }", "trailing input"),
        ];
        for (text, expected) in cases {
            let err = parse_gemset(text).unwrap_err();
            assert!(err.to_string().contains(expected), "{text}: {err}");
        }
    }

    #[test]
    fn syntax_errors_carry_line_numbers() {
        let err = parse_gemset("{\n  rake = {\n    version = @;\n  };\n}").unwrap_err();
        match err {
            GemsetReadError::Syntax { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_gemset_file("/nonexistent/gemset.nix").unwrap_err();
        assert!(matches!(err, GemsetReadError::Io(_)));
    }
}
