//! Sub-archive manifests
//!
//! A file named `<v_path>.DECA.FILE_LIST.txt` in the mod tree rewrites the
//! entry list of the sub-archive at `<v_path>`. Each line is one call:
//!
//! ```text
//! sarc.clear();
//! sarc.add("path/inside/archive.bin");
//! sarc.symlink("path/elsewhere.bin");
//! ```

use crate::{Result, VfsError};
use regex::Regex;
use std::path::Path;

/// Suffix marking a manifest in the mod tree
pub const MANIFEST_SUFFIX: &str = ".DECA.FILE_LIST.txt";

/// One manifest call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestCommand {
    /// Drop every entry
    Clear,
    /// Append an entry whose body is packed into the archive
    Add(Vec<u8>),
    /// Append an entry whose body lives elsewhere
    Symlink(Vec<u8>),
}

impl ManifestCommand {
    /// Path argument of `add` and `symlink`
    pub fn v_path(&self) -> Option<&[u8]> {
        match self {
            Self::Clear => None,
            Self::Add(p) | Self::Symlink(p) => Some(p),
        }
    }
}

fn build_error(source: &str, line: usize, msg: &str) -> VfsError {
    VfsError::BuildError(format!("{source}:{line}: {msg}"))
}

/// Parse manifest text; `source` names it in error messages
///
/// Blank lines are ignored. Any other line that is not one of the three
/// calls with a well-formed argument fails the whole manifest.
pub fn parse_manifest_str(text: &str, source: &str) -> Result<Vec<ManifestCommand>> {
    let call = Regex::new(r"^([A-Za-z]*[.A-Za-z]*)\(([^)]*)\);$")
        .map_err(|e| VfsError::BuildError(e.to_string()))?;
    let quoted =
        Regex::new(r#"^"([^"]*)"$"#).map_err(|e| VfsError::BuildError(e.to_string()))?;

    let mut commands = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        let Some(caps) = call.captures(line) else {
            return Err(build_error(source, line_no, &format!("parser error in command {line:?}")));
        };
        let name = caps.get(1).map_or("", |m| m.as_str());
        let arg = caps.get(2).map_or("", |m| m.as_str());
        let path = quoted
            .captures(arg)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().as_bytes().to_vec());

        let command = match (name, path) {
            ("sarc.clear", _) if arg.is_empty() => ManifestCommand::Clear,
            ("sarc.add", Some(p)) if !p.is_empty() => ManifestCommand::Add(p),
            ("sarc.symlink", Some(p)) if !p.is_empty() => ManifestCommand::Symlink(p),
            ("sarc.clear" | "sarc.add" | "sarc.symlink", _) => {
                return Err(build_error(
                    source,
                    line_no,
                    &format!("malformed argument {arg:?} to {name}"),
                ));
            }
            _ => {
                return Err(build_error(source, line_no, &format!("unhandled command {name}")));
            }
        };
        commands.push(command);
    }
    Ok(commands)
}

/// Read and parse a manifest file
pub fn parse_manifest(path: &Path) -> Result<Vec<ManifestCommand>> {
    let text = std::fs::read_to_string(path)?;
    parse_manifest_str(&text, &path.display().to_string())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn add_keeps_path_verbatim(path in "[a-z0-9_]{1,8}(/[a-z0-9_]{1,8}){0,3}\\.[a-z]{1,5}") {
            let text = format!("sarc.add(\"{path}\");\nsarc.symlink(\"{path}\");");
            let commands = parse_manifest_str(&text, "m.txt").expect("Test operation should succeed");
            prop_assert_eq!(
                commands,
                vec![
                    ManifestCommand::Add(path.clone().into_bytes()),
                    ManifestCommand::Symlink(path.into_bytes()),
                ]
            );
        }
    }

    #[test]
    fn test_parse_commands() {
        let text = "sarc.clear();\nsarc.add(\"a/b.bin\");\r\n\nsarc.symlink(\"c.bin\");\n";
        let commands = parse_manifest_str(text, "x.txt").expect("Test operation should succeed");
        assert_eq!(
            commands,
            vec![
                ManifestCommand::Clear,
                ManifestCommand::Add(b"a/b.bin".to_vec()),
                ManifestCommand::Symlink(b"c.bin".to_vec()),
            ]
        );
        assert_eq!(commands[1].v_path(), Some(&b"a/b.bin"[..]));
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = parse_manifest_str("sarc.clear();\nsarc.remove(\"a\");\n", "m.txt")
            .expect_err("unknown command should fail");
        match err {
            VfsError::BuildError(msg) => {
                assert!(msg.starts_with("m.txt:2:"), "{msg}");
                assert!(msg.contains("sarc.remove"), "{msg}");
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(matches!(
            parse_manifest_str("sarc.add(a.bin);", "m.txt"),
            Err(VfsError::BuildError(msg)) if msg.contains("malformed")
        ));
        assert!(matches!(
            parse_manifest_str("sarc.add(\"a.bin\")", "m.txt"),
            Err(VfsError::BuildError(msg)) if msg.contains("parser error")
        ));
    }
}
