//! String harvesting from typed structures, property containers and text

use super::{Resolver, kinds};
use crate::catalog::{PendingObject, StringRef};
use crate::{Result, VfsError};
use crate::node::VfsNode;
use apex_formats::FileKind;
use apex_formats::adf::{AdfArray, AdfFile, AdfValue};
use apex_formats::rtpc::{self, RtpcGather};
use apex_formats::txt::harvest_strings;
use tracing::{debug, trace};

/// Language directories of localised dialogue assets
pub const LANGUAGE_CODES: &[&str] = &[
    "chi", "eng", "fre", "ger", "jap", "pol", "rus", "sch", "spa", "swe",
];

/// Split a path into stem and extension, the extension keeping its dot
///
/// A leading dot of the final component does not start an extension.
pub fn split_ext(path: &[u8]) -> (&[u8], &[u8]) {
    let name_start = path
        .iter()
        .rposition(|&b| b == b'/')
        .map_or(0, |i| i + 1);
    let name = &path[name_start..];
    let Some(dot) = name.iter().rposition(|&b| b == b'.') else {
        return (path, &[]);
    };
    if name[..dot].iter().all(|&b| b == b'.') {
        return (path, &[]);
    }
    path.split_at(name_start + dot)
}

/// Paths of compiled or companion files implied by a source path
///
/// Each result carries the bitmap of kinds it may name; `0` means any.
pub fn companion_paths(path: &[u8]) -> Vec<(Vec<u8>, u64)> {
    let (stem, ext) = split_ext(path);
    let with = |suffix: &[u8]| [stem, suffix].concat();
    match ext {
        b"" => Vec::new(),
        b".tga" | b".dds" => vec![(with(b".ddsc"), kinds(&[FileKind::Avtx, FileKind::Dds]))],
        b".skeleton" => vec![(with(b".bsk"), kinds(&[FileKind::Tag0]))],
        b".ragdoll" => vec![
            (with(b".brd"), kinds(&[FileKind::Tag0])),
            (with(b".ragdolsettingsc"), kinds(&[FileKind::Adf])),
        ],
        b".al" => vec![
            (with(b".afsmb"), kinds(&[FileKind::Rtpc])),
            (with(b".asb"), kinds(&[FileKind::Rtpc])),
        ],
        b".model_xml" => [
            &b".model_xmlc"[..],
            b".model.xml",
            b".model.xmlc",
            b".xml",
            b".xmlc",
            b".modelc",
        ]
        .iter()
        .map(|s| (with(s), 0))
        .collect(),
        b".gsr" => [&b".gsc"[..], b".gdc", b".stringlookup"]
            .iter()
            .map(|s| (with(s), kinds(&[FileKind::Adf])))
            .collect(),
        _ => vec![([path, b"c"].concat(), kinds(&[FileKind::Adf]))],
    }
}

fn strip_intermediate(s: &[u8]) -> Option<&[u8]> {
    s.strip_prefix(b"intermediate/").filter(|r| !r.is_empty())
}

fn array_values(value: Option<&AdfValue>) -> &[AdfValue] {
    match value {
        Some(AdfValue::Array {
            items: AdfArray::Values(v),
            ..
        }) => v,
        _ => &[],
    }
}

/// Paths a structure names for itself, from its root instance
fn self_names(adf: &AdfFile) -> Vec<String> {
    let Some(first) = adf.instances.first() else {
        return Vec::new();
    };
    let Some(root) = &first.value else {
        return Vec::new();
    };
    if first.entry.name.as_slice() != b"environ" {
        return Vec::new();
    }
    let Some(name) = root.field(b"Name").and_then(AdfValue::as_bytes) else {
        return Vec::new();
    };
    let name = String::from_utf8_lossy(name);
    vec![
        format!("environment/weather/{name}.environc"),
        format!("environment/{name}.environc"),
    ]
}

/// Dialogue string ids listed by an intent table
fn dialogue_ids(adf: &AdfFile) -> Vec<String> {
    let Some(first) = adf.instances.first() else {
        return Vec::new();
    };
    if first.entry.name.as_slice() != b"intenttable" {
        return Vec::new();
    }
    let mut ids = Vec::new();
    for intent in array_values(first.value.as_ref().and_then(|v| v.field(b"Intents"))) {
        for dialogue in array_values(intent.field(b"Dialogues")) {
            let Some(id) = dialogue.field(b"DialogueStringId") else {
                continue;
            };
            if let Some(bytes) = id.as_bytes() {
                ids.push(String::from_utf8_lossy(bytes).into_owned());
            } else if let Some(n) = id.as_i64() {
                ids.push(n.to_string());
            }
        }
    }
    ids
}

impl Resolver<'_> {
    fn propose_dialogue(&mut self, id: &[u8], node: u64) {
        let id = String::from_utf8_lossy(id);
        for lang in LANGUAGE_CODES {
            self.batch.propose_kinds(
                format!("sound/dialogue/{lang}/{id}.wavc").as_bytes(),
                Some(node),
                &[FileKind::Fsb5c],
            );
        }
    }

    /// Propose every string a typed structure carries
    ///
    /// Nodes whose types are not yet known stay unmarked so a later round
    /// can retry once a descriptor turns up.
    pub(super) fn harvest_adf(&mut self, node: &mut VfsNode) -> Result<bool> {
        let adf = match self.project.read_adf(node) {
            Ok(adf) => adf,
            Err(VfsError::MissingAdfType(t)) => {
                debug!("ADF {node}: missing type {t:08x}");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let uid = Some(node.uid);

        for value in adf.string_hashes.values() {
            self.batch.propose(value, uid);
            if let Some(rest) = strip_intermediate(value) {
                self.batch.propose(rest, uid);
            }
            if let Some(cue) = value
                .strip_suffix(b".stop")
                .or_else(|| value.strip_suffix(b".play"))
            {
                self.propose_dialogue(cue, node.uid);
            }
        }

        for s in &adf.found_strings {
            self.batch.propose(s, uid);
            if let Some(rest) = strip_intermediate(s) {
                self.batch.propose(rest, uid);
            }
        }

        for name in adf.field_names() {
            self.batch.propose_ref(
                name,
                uid,
                StringRef {
                    is_field_name: true,
                    ..Default::default()
                },
            );
        }
        for name in &adf.names {
            self.batch.propose(name, uid);
        }

        let names = self_names(&adf);
        let mut matched = false;
        for name in &names {
            if node.v_hash == Some(self.project.file_hash(name.as_bytes())) {
                if node.v_path.is_none() {
                    node.v_path = Some(name.as_bytes().to_vec());
                }
                self.batch
                    .propose_kinds(name.as_bytes(), uid, &[FileKind::Adf, FileKind::AdfBare]);
                matched = true;
            }
        }
        if !names.is_empty() && !matched {
            debug!("ADF {node}: no generated name matched, first was {}", names[0]);
        }

        for id in dialogue_ids(&adf) {
            for lang in LANGUAGE_CODES {
                self.batch.propose_kinds(
                    format!("animations/dialogue/generated/{lang}/{id}.ban").as_bytes(),
                    uid,
                    &[FileKind::Tag0],
                );
            }
            self.propose_dialogue(id.as_bytes(), node.uid);
        }
        Ok(true)
    }

    /// Propose property strings and their companions, record objects
    pub(super) fn harvest_rtpc(&mut self, node: &mut VfsNode) -> Result<bool> {
        let buf = self.project.read_node(node)?;
        let mut gather = RtpcGather::new();
        rtpc::visit(&buf, &mut gather)?;

        for s in &gather.strings {
            self.batch.propose(s, Some(node.uid));
            for (companion, mask) in companion_paths(s) {
                self.batch.propose_ref(
                    &companion,
                    Some(node.uid),
                    StringRef {
                        possible_kinds: mask,
                        ..Default::default()
                    },
                );
            }
        }
        trace!(
            "RTPC {node}: {} strings, {} objects",
            gather.strings.len(),
            gather.objects.len()
        );
        for object in gather.objects {
            self.batch.object_add(PendingObject {
                src_uid: node.uid,
                offset: object.offset as u64,
                class_name: object.class_name,
                name: object.name,
                object_id: object.object_id,
                object_refs: object.object_refs.into_iter().map(|r| (r, 0)).collect(),
                event_refs: object.event_refs.into_iter().map(|r| (r, 0)).collect(),
            });
        }
        Ok(true)
    }

    pub(super) fn harvest_txt(&mut self, node: &mut VfsNode) -> Result<bool> {
        let buf = self.project.read_node(node)?;
        for s in harvest_strings(&buf) {
            self.batch.propose(&s, Some(node.uid));
        }
        Ok(true)
    }

    /// A symlink's name names its target too
    pub(super) fn harvest_symlink(&mut self, node: &mut VfsNode) -> Result<bool> {
        if let Some(v_path) = &node.v_path {
            self.batch.propose(v_path, node.parent);
        }
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_ext() {
        assert_eq!(split_ext(b"a/b.c.d"), (&b"a/b.c"[..], &b".d"[..]));
        assert_eq!(split_ext(b"a.dir/file"), (&b"a.dir/file"[..], &b""[..]));
        assert_eq!(split_ext(b".hidden"), (&b".hidden"[..], &b""[..]));
        assert_eq!(split_ext(b"x.ddsc"), (&b"x"[..], &b".ddsc"[..]));
    }

    #[test]
    fn test_companion_paths() {
        assert_eq!(
            companion_paths(b"textures/rock.dds"),
            vec![(
                b"textures/rock.ddsc".to_vec(),
                kinds(&[FileKind::Avtx, FileKind::Dds])
            )]
        );
        assert_eq!(
            companion_paths(b"settings/a.xml"),
            vec![(b"settings/a.xmlc".to_vec(), kinds(&[FileKind::Adf]))]
        );
        let al: Vec<Vec<u8>> = companion_paths(b"m/x.al").into_iter().map(|(p, _)| p).collect();
        assert_eq!(al, vec![b"m/x.afsmb".to_vec(), b"m/x.asb".to_vec()]);
        assert_eq!(companion_paths(b"m/x.model_xml").len(), 6);
        assert!(companion_paths(b"noext").is_empty());
    }

    #[test]
    fn test_strip_intermediate() {
        assert_eq!(strip_intermediate(b"intermediate/a.bin"), Some(&b"a.bin"[..]));
        assert_eq!(strip_intermediate(b"intermediate/"), None);
        assert_eq!(strip_intermediate(b"a.bin"), None);
    }
}
