//! Platform tokens and platform families.
//!
//! A lockfile platform token such as `x86_64-linux` or `x64-mingw-ucrt`
//! names the build a native gem was compiled for. A platform family such as
//! `mri` or `windows` restricts which interpreters see a gem. Both are mapped
//! through fixed tables so the output never depends on the host.

use crate::reconcile::ReconciledEntry;
use gemnix_schema::{PlatformAlias, ResolvedSpec, TargetDescriptor, ALL_PLATFORMS, RUBY_PLATFORM};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("unknown platform '{token}' for gem {name}")]
    UnknownPlatform { name: String, token: String },
    #[error("unknown platform family '{family}' declared for gem {name}")]
    UnknownFamily { name: String, family: String },
}

const TARGET_KIND: &str = "gem";

const CPU_ALIASES: &[(&str, &str)] = &[
    ("i386", "x86"),
    ("i486", "x86"),
    ("i586", "x86"),
    ("i686", "x86"),
];

const KNOWN_CPUS: &[&str] = &[
    "x86_64",
    "x64",
    "x86",
    "aarch64",
    "arm64",
    "arm",
    "universal",
    "powerpc",
    "ppc64le",
    "s390x",
];

/// OS component prefixes; the first match wins. `linux-gnu`, `linux-musl`,
/// `darwin-22`, `mingw32` and `mingw-ucrt` all reduce to their family.
const OS_PREFIXES: &[(&str, &str)] = &[
    ("linux", "linux"),
    ("darwin", "darwin"),
    ("mingw", "mingw"),
    ("mswin", "mswin"),
    ("freebsd", "freebsd"),
    ("openbsd", "openbsd"),
    ("netbsd", "netbsd"),
    ("solaris", "solaris"),
];

/// Interpreter versions that may suffix a family, e.g. `mri_27`.
const FAMILY_VERSIONS: &[&str] = &[
    "1.8", "1.9", "2.0", "2.1", "2.2", "2.3", "2.4", "2.5", "2.6", "2.7", "3.0", "3.1", "3.2",
    "3.3",
];

fn family_engines(family: &str) -> Option<&'static [&'static str]> {
    let engines: &'static [&'static str] = match family {
        "ruby" => &["ruby", "rbx", "maglev"],
        "mri" => &["ruby", "maglev"],
        "rbx" => &["rbx"],
        "jruby" => &["jruby"],
        "truffleruby" => &["ruby"],
        "mswin" => &["mswin"],
        "mswin64" => &["mswin64"],
        "mingw" => &["mingw"],
        "x64_mingw" => &["mingw"],
        "windows" => &["mswin", "mswin64", "mingw", "maglev", "ruby"],
        _ => return None,
    };
    Some(engines)
}

/// Split a platform token into `(cpu, os)`. Returns `None` for tokens outside
/// the table.
pub fn split_platform(token: &str) -> Option<(&'static str, &'static str)> {
    if token == "java" {
        return Some(("universal", "java"));
    }
    let (cpu, os) = token.split_once('-')?;
    let cpu = CPU_ALIASES
        .iter()
        .find(|(alias, _)| *alias == cpu)
        .map(|(_, canonical)| *canonical)
        .or_else(|| KNOWN_CPUS.iter().find(|known| **known == cpu).copied())?;
    let os = OS_PREFIXES
        .iter()
        .find(|(prefix, _)| os.starts_with(prefix))
        .map(|(_, family)| *family)?;
    Some((cpu, os))
}

/// Target descriptors for one resolved spec. Portable gems have none.
pub fn normalize_targets(spec: &ResolvedSpec) -> Result<Vec<TargetDescriptor>, PlatformError> {
    if spec.platform == RUBY_PLATFORM {
        return Ok(Vec::new());
    }
    let (cpu, os) =
        split_platform(&spec.platform).ok_or_else(|| PlatformError::UnknownPlatform {
            name: spec.name.clone(),
            token: spec.platform.clone(),
        })?;
    Ok(vec![TargetDescriptor {
        target: spec.platform.clone(),
        target_cpu: cpu.to_owned(),
        target_os: os.to_owned(),
        kind: TARGET_KIND.to_owned(),
        hash: None,
    }])
}

/// Interpreters a platform family resolves to. Families may carry a version
/// suffix (`mri_27`), which is attached to every resulting alias.
pub fn family_aliases(family: &str) -> Option<Vec<PlatformAlias>> {
    if let Some(engines) = family_engines(family) {
        return Some(engines.iter().map(|e| PlatformAlias::engine(*e)).collect());
    }
    let (base, suffix) = family.rsplit_once('_')?;
    let version = FAMILY_VERSIONS
        .iter()
        .find(|v| v.replace('.', "") == suffix)?;
    let engines = family_engines(base)?;
    Some(
        engines
            .iter()
            .map(|e| PlatformAlias {
                engine: (*e).to_owned(),
                version: Some((*version).to_owned()),
            })
            .collect(),
    )
}

/// Expand the reconciled platform families of `entry` into interpreter
/// aliases. An entry visible on `all` platforms is unrestricted and yields
/// no aliases. Families are visited in sorted order; repeats are dropped.
pub fn expand_platform_aliases(entry: &ReconciledEntry) -> Result<Vec<PlatformAlias>, PlatformError> {
    if entry.platforms.contains(ALL_PLATFORMS) {
        return Ok(Vec::new());
    }
    let mut out: Vec<PlatformAlias> = Vec::new();
    for family in &entry.platforms {
        let aliases = family_aliases(family).ok_or_else(|| PlatformError::UnknownFamily {
            name: entry.name.clone(),
            family: family.clone(),
        })?;
        for alias in aliases {
            if !out.contains(&alias) {
                out.push(alias);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemnix_schema::GemSource;
    use std::collections::BTreeSet;

    fn native(platform: &str) -> ResolvedSpec {
        ResolvedSpec::new(
            "sqlite3",
            "1.6.6",
            GemSource::Registry {
                remotes: vec!["https://rubygems.org/".to_owned()],
            },
        )
        .with_platform(platform)
    }

    fn entry(platforms: &[&str]) -> ReconciledEntry {
        ReconciledEntry {
            name: "io-console".to_owned(),
            version: Some("0.6.0".to_owned()),
            groups: BTreeSet::new(),
            platforms: platforms.iter().map(|p| (*p).to_owned()).collect(),
            synthesized: false,
        }
    }

    fn engines(aliases: &[PlatformAlias]) -> Vec<&str> {
        aliases.iter().map(|a| a.engine.as_str()).collect()
    }

    #[test]
    fn x86_64_linux() {
        let targets = normalize_targets(&native("x86_64-linux")).unwrap();
        assert_eq!(
            targets,
            vec![TargetDescriptor {
                target: "x86_64-linux".to_owned(),
                target_cpu: "x86_64".to_owned(),
                target_os: "linux".to_owned(),
                kind: "gem".to_owned(),
                hash: None,
            }]
        );
    }

    #[test]
    fn composite_tokens() {
        let cases = [
            ("x64-mingw-ucrt", "x64", "mingw"),
            ("x64-mingw32", "x64", "mingw"),
            ("arm64-darwin", "arm64", "darwin"),
            ("x86_64-darwin-22", "x86_64", "darwin"),
            ("aarch64-linux-gnu", "aarch64", "linux"),
            ("x86_64-linux-musl", "x86_64", "linux"),
            ("i686-linux", "x86", "linux"),
            ("x86-mswin32", "x86", "mswin"),
            ("java", "universal", "java"),
        ];
        for (token, cpu, os) in cases {
            assert_eq!(split_platform(token), Some((cpu, os)), "{token}");
        }
    }

    #[test]
    fn portable_spec_has_no_targets() {
        assert!(normalize_targets(&native("ruby")).unwrap().is_empty());
    }

    #[test]
    fn unknown_token_fails() {
        for token in ["sparc-sunos", "x86_64-plan9", "linux"] {
            let err = normalize_targets(&native(token)).unwrap_err();
            assert_eq!(
                err,
                PlatformError::UnknownPlatform {
                    name: "sqlite3".to_owned(),
                    token: token.to_owned(),
                }
            );
        }
    }

    #[test]
    fn normalization_is_deterministic() {
        let a = normalize_targets(&native("arm64-darwin")).unwrap();
        let b = normalize_targets(&native("arm64-darwin")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn windows_family() {
        let aliases = expand_platform_aliases(&entry(&["windows"])).unwrap();
        assert_eq!(
            engines(&aliases),
            vec!["mswin", "mswin64", "mingw", "maglev", "ruby"]
        );
    }

    #[test]
    fn families_sorted_and_deduplicated() {
        let aliases = expand_platform_aliases(&entry(&["mri", "jruby", "ruby"])).unwrap();
        assert_eq!(engines(&aliases), vec!["jruby", "ruby", "maglev", "rbx"]);
    }

    #[test]
    fn all_platforms_is_unrestricted() {
        assert!(expand_platform_aliases(&entry(&["all", "windows"]))
            .unwrap()
            .is_empty());
        assert!(expand_platform_aliases(&entry(&[])).unwrap().is_empty());
    }

    #[test]
    fn versioned_family() {
        let aliases = family_aliases("mri_27").unwrap();
        assert_eq!(
            aliases,
            vec![
                PlatformAlias {
                    engine: "ruby".to_owned(),
                    version: Some("2.7".to_owned()),
                },
                PlatformAlias {
                    engine: "maglev".to_owned(),
                    version: Some("2.7".to_owned()),
                },
            ]
        );
        assert_eq!(family_aliases("x64_mingw").unwrap().len(), 1);
        assert_eq!(family_aliases("x64_mingw_31").unwrap()[0].version.as_deref(), Some("3.1"));
        assert!(family_aliases("mri_99").is_none());
    }

    #[test]
    fn unknown_family_fails() {
        let err = expand_platform_aliases(&entry(&["amiga"])).unwrap_err();
        assert!(matches!(err, PlatformError::UnknownFamily { ref family, .. } if family == "amiga"));
    }
}
