//! End-to-end ingest and build over synthetic installations

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use apex_formats::aaf::compress_aaf;
use apex_formats::sarc::SarcFile;
use apex_formats::{CompressionType, FileKind};
use apex_hash::hash32;
use apex_vfs::{Builder, ProcessPass, Project, VfsError, VfsNode};
use common::{Install, sarc, write_file};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::Cursor;

const HELLO: &[u8] = b"Hello, Apex!\n\0\0\0";
const ZIP_BODY: &[u8] = b"zip zip zip zip zip zip zip zip zip zip zip zip zip zip zip zip\n";

fn ingest(install: &Install) -> Project {
    let project = install.project();
    project.ingest().expect("Test operation should succeed");
    project
}

/// Ingest with the listed names known up front
fn ingest_named(install: &Install, names: &[u8]) -> Project {
    let project = install.project();
    let list = install.dir.path().join("names.txt");
    write_file(&list, names);
    project
        .strings_add_from_file(&list, false)
        .expect("Test operation should succeed");
    project.ingest().expect("Test operation should succeed");
    project
}

/// Structural rules every ingested catalog keeps
fn assert_catalog_invariants(project: &Project) {
    let nodes = project
        .catalog()
        .nodes_all()
        .expect("Test operation should succeed");
    let by_uid: HashMap<u64, &VfsNode> = nodes.iter().map(|n| (n.uid, n)).collect();

    for node in &nodes {
        let Some(parent_uid) = node.parent else {
            continue;
        };
        let parent = by_uid[&parent_uid];
        let kind = parent
            .file_kind
            .unwrap_or_else(|| panic!("parent of {node} is unclassified"));
        assert!(kind.is_container(), "{node} has a {kind:?} parent");

        // index entries are positioned in the data archive owning the index
        let data = if kind == FileKind::Tab {
            by_uid[&parent.parent.expect("Test operation should succeed")]
        } else {
            parent
        };
        if let (Some(offset), Some(size_c), Some(limit)) = (node.offset, node.size_c, data.size_u) {
            assert!(
                offset + size_c <= limit,
                "{node}: {offset} + {size_c} overruns {limit}"
            );
        }
        let stored = data.size_c.expect("Test operation should succeed");
        for block in &node.blocks {
            assert!(
                block.offset + u64::from(block.compressed_len) <= stored,
                "{node}: block at {} overruns {stored}",
                block.offset
            );
        }
    }
}

fn one_named(project: &Project, v_path: &str) -> VfsNode {
    let nodes = project
        .catalog()
        .nodes_where_v_path(v_path.as_bytes())
        .expect("Test operation should succeed");
    assert_eq!(nodes.len(), 1, "nodes named {v_path}: {nodes:?}");
    nodes.into_iter().next().expect("Test operation should succeed")
}

#[test]
fn open_and_enumerate() {
    let install = Install::new().entry(0xDEAD_BEEF, HELLO);
    let project = ingest(&install);
    let catalog = project.catalog();

    let nodes = catalog.nodes_all().expect("Test operation should succeed");
    assert_eq!(nodes.len(), 3);

    let kinds: Vec<Option<FileKind>> = nodes.iter().map(|n| n.file_kind).collect();
    assert!(kinds.contains(&Some(FileKind::Arc)));
    assert!(kinds.contains(&Some(FileKind::Tab)));

    let child = nodes
        .iter()
        .find(|n| n.v_hash == Some(0xDEAD_BEEF))
        .expect("Test operation should succeed");
    assert_eq!(child.file_kind, Some(FileKind::Unknown));
    assert_eq!(child.size_u, Some(16));
    assert_eq!(child.v_path, None);
    assert_eq!(
        project.read_node(child).expect("Test operation should succeed"),
        HELLO.to_vec()
    );
}

#[test]
fn sub_archive_recursion() {
    let inner = [1u8, 2, 3, 4];
    let install = Install::new().entry(0xDEAD_BEEF, &sarc(&[("inner.bin", &inner, false)]));
    let project = ingest(&install);

    assert_eq!(
        project
            .catalog()
            .node_count()
            .expect("Test operation should succeed"),
        4
    );
    let node = one_named(&project, "inner.bin");
    assert_eq!(node.v_hash, Some(u64::from(hash32(b"inner.bin"))));
    assert_eq!(
        project.read_node(&node).expect("Test operation should succeed"),
        inner.to_vec()
    );
    assert_eq!(
        project
            .read_path(b"inner.bin")
            .expect("Test operation should succeed"),
        inner.to_vec()
    );
}

#[test]
fn symlink_entry_follows_path() {
    let install = Install::new()
        .entry(0xDEAD_BEEF, &sarc(&[("inner.bin", b"", true)]))
        .named("inner.bin", b"target");
    let project = ingest(&install);

    let nodes = project
        .catalog()
        .nodes_where_v_path(b"inner.bin")
        .expect("Test operation should succeed");
    assert_eq!(nodes.len(), 2);
    let link = nodes
        .iter()
        .find(|n| n.is_symlink())
        .expect("Test operation should succeed");
    assert_eq!(link.offset, None);
    assert_eq!(
        project.read_node(link).expect("Test operation should succeed"),
        b"target".to_vec()
    );
}

#[test]
fn dangling_symlink_is_missing() {
    let install = Install::new().entry(0xDEAD_BEEF, &sarc(&[("nowhere.bin", b"", true)]));
    let project = ingest(&install);
    let link = one_named(&project, "nowhere.bin");
    assert_eq!(link.file_kind, Some(FileKind::Symlink));
    assert!(matches!(
        project.read_node(&link),
        Err(VfsError::FileMissing(_))
    ));
}

#[test]
fn retroactive_naming() {
    let install = Install::new()
        .named("foo/bar.txt", b"\x01\x02payload")
        .entry(0x1234_5678, b"foo/bar.txt\n");
    let project = ingest(&install);

    let node = project
        .catalog()
        .nodes_where_v_hash(u64::from(hash32(b"foo/bar.txt")))
        .expect("Test operation should succeed")
        .into_iter()
        .next()
        .expect("Test operation should succeed");
    assert_eq!(node.v_path.as_deref(), Some(&b"foo/bar.txt"[..]));
    assert_eq!(node.ext_hash, Some(apex_hash::ext_hash(b"foo/bar.txt")));
}

#[test]
fn compressed_wrapper_exposes_grandchildren() {
    let body = sarc(&[
        ("w/first.bin", b"first body", false),
        ("w/second.bin", b"second", false),
    ]);
    let section_max = (body.len() as u32).div_ceil(2);
    let wrapped = compress_aaf(&body, section_max).expect("Test operation should succeed");
    let install = Install::new().entry(0x0BAD_F00D, &wrapped);
    let project = ingest(&install);
    let catalog = project.catalog();

    let aaf = catalog
        .nodes_filtered(|n| n.file_kind == Some(FileKind::Aaf))
        .expect("Test operation should succeed")
        .into_iter()
        .next()
        .expect("Test operation should succeed");
    let children = catalog
        .children_of(aaf.uid)
        .expect("Test operation should succeed");
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].file_kind, Some(FileKind::Sarc));
    assert_eq!(children[0].size_u, Some(body.len() as u64));

    let leaf = one_named(&project, "w/first.bin");
    assert_eq!(leaf.parent, Some(children[0].uid));
    assert_eq!(
        project.read_node(&leaf).expect("Test operation should succeed"),
        b"first body".to_vec()
    );
    assert!(project.cache_dir().exists());
    assert_catalog_invariants(&project);
}

#[test]
fn mod_build_with_symlinks() {
    let install = Install::new()
        .named(
            "pack/a.sarc",
            &sarc(&[("a/one.bin", b"1111", false), ("a/two.bin", b"2222", false)]),
        )
        .named("pack/b.sarc", &sarc(&[("b/three.bin", b"3333", false)]));
    let project = install.project();
    let names = install.dir.path().join("names.txt");
    write_file(&names, b"pack/a.sarc\npack/b.sarc\n");
    project
        .strings_add_from_file(&names, false)
        .expect("Test operation should succeed");
    project.ingest().expect("Test operation should succeed");

    let leaf = one_named(&project, "a/one.bin");
    write_file(&project.mod_dir().join("a/one.bin"), b"replacement");
    write_file(&project.mod_dir().join("b/three.bin"), b"not selected");

    let report = Builder::new(&project)
        .with_subset([leaf.uid])
        .with_symlink_changed_file(true)
        .build()
        .expect("Test operation should succeed");
    assert_eq!(report.containers_rebuilt, 1);

    let build = project.build_dir();
    assert_eq!(
        std::fs::read(build.join("a/one.bin")).expect("Test operation should succeed"),
        b"replacement".to_vec()
    );

    let rebuilt = std::fs::read(build.join("pack/a.sarc")).expect("Test operation should succeed");
    let archive = SarcFile::parse(&rebuilt).expect("Test operation should succeed");
    let one = archive
        .entries
        .iter()
        .find(|e| e.v_path == b"a/one.bin")
        .expect("Test operation should succeed");
    assert_ne!(one.offset, 0);
    assert_eq!(one.length, 11);
    assert_eq!(
        SarcFile::read_entry(&mut Cursor::new(&rebuilt), one).expect("Test operation should succeed"),
        b"replacement".to_vec()
    );
    assert!(
        archive
            .entries
            .iter()
            .filter(|e| e.v_path != b"a/one.bin")
            .all(|e| e.symlink)
    );

    assert!(!build.join("pack/b.sarc").exists());
    assert!(!build.join("b/three.bin").exists());
}

#[test]
fn manifest_rewrites_entry_list() {
    let install = Install::new()
        .named("pack/a.sarc", &sarc(&[("a/one.bin", b"1111", false)]))
        .named("pack/b.sarc", &sarc(&[("b/three.bin", b"333", false)]));
    let project = install.project();
    let names = install.dir.path().join("names.txt");
    write_file(&names, b"pack/a.sarc\npack/b.sarc\n");
    project
        .strings_add_from_file(&names, false)
        .expect("Test operation should succeed");
    project.ingest().expect("Test operation should succeed");

    write_file(
        &project.mod_dir().join("pack/a.sarc.DECA.FILE_LIST.txt"),
        b"sarc.clear();\nsarc.add(\"b/three.bin\");\nsarc.symlink(\"a/one.bin\");\n",
    );
    Builder::new(&project)
        .build()
        .expect("Test operation should succeed");

    let rebuilt = std::fs::read(project.build_dir().join("pack/a.sarc"))
        .expect("Test operation should succeed");
    let archive = SarcFile::parse(&rebuilt).expect("Test operation should succeed");
    let paths: Vec<&[u8]> = archive.entries.iter().map(|e| e.v_path.as_slice()).collect();
    assert_eq!(paths, vec![&b"b/three.bin"[..], b"a/one.bin"]);
    assert!(!archive.entries[0].symlink);
    assert!(archive.entries[1].symlink);
    assert_eq!(
        SarcFile::read_entry(&mut Cursor::new(&rebuilt), &archive.entries[0])
            .expect("Test operation should succeed"),
        b"333".to_vec()
    );
}

#[test]
fn block_coded_entries_keep_catalog_invariants() {
    let install = Install::v4()
        .named("pack/a.sarc", &sarc(&[("a/one.bin", b"1111", false)]))
        .compressed("z/zip.bin", ZIP_BODY, CompressionType::V4Zlib)
        .compressed("z/std.bin", ZIP_BODY, CompressionType::V4Zstd);
    let project = ingest_named(&install, b"pack/a.sarc\nz/zip.bin\nz/std.bin\n");

    let zip = one_named(&project, "z/zip.bin");
    assert_eq!(zip.blocks.len(), 1);
    assert_eq!(zip.size_u, Some(ZIP_BODY.len() as u64));
    assert_eq!(
        project
            .read_path(b"z/std.bin")
            .expect("Test operation should succeed"),
        ZIP_BODY.to_vec()
    );
    assert_catalog_invariants(&project);
}

#[test]
fn reingest_never_clears_pass_flags() {
    let body = sarc(&[("w/first.bin", b"first body", false)]);
    let wrapped = compress_aaf(&body, 64).expect("Test operation should succeed");
    let install = Install::new()
        .entry(0x0BAD_F00D, &wrapped)
        .named("pack/a.sarc", &sarc(&[("a/one.bin", b"1111", false)]));
    let project = ingest_named(&install, b"pack/a.sarc\n");

    let before = project
        .catalog()
        .nodes_all()
        .expect("Test operation should succeed");
    project.ingest().expect("Test operation should succeed");

    let passes = [
        ProcessPass::RawNoName,
        ProcessPass::RawWithName,
        ProcessPass::ByType,
        ProcessPass::Specific,
    ];
    for old in &before {
        let new = project
            .catalog()
            .node_required(old.uid)
            .expect("Test operation should succeed");
        for pass in passes {
            if old.flags.is_processed(pass) {
                assert!(new.flags.is_processed(pass), "{old}: {pass:?} was cleared");
            }
        }
    }
    assert_catalog_invariants(&project);
}

#[test]
fn manifest_add_unpacks_block_coded_source() {
    let install = Install::v4()
        .named("pack/a.sarc", &sarc(&[("a/one.bin", b"1111", false)]))
        .compressed("z/zip.bin", ZIP_BODY, CompressionType::V4Zlib);
    let project = ingest_named(&install, b"pack/a.sarc\nz/zip.bin\n");
    let zip = one_named(&project, "z/zip.bin");
    assert!(zip.size_c < zip.size_u);

    write_file(
        &project.mod_dir().join("pack/a.sarc.DECA.FILE_LIST.txt"),
        b"sarc.add(\"z/zip.bin\");\n",
    );
    Builder::new(&project)
        .build()
        .expect("Test operation should succeed");

    let rebuilt = std::fs::read(project.build_dir().join("pack/a.sarc"))
        .expect("Test operation should succeed");
    let archive = SarcFile::parse(&rebuilt).expect("Test operation should succeed");
    let added = archive
        .entries
        .iter()
        .find(|e| e.v_path == b"z/zip.bin")
        .expect("Test operation should succeed");
    assert_eq!(added.length as usize, ZIP_BODY.len());
    assert_eq!(
        SarcFile::read_entry(&mut Cursor::new(&rebuilt), added)
            .expect("Test operation should succeed"),
        ZIP_BODY.to_vec()
    );
}

fn odd_sized_pack() -> Vec<u8> {
    sarc(&[
        ("a/one.bin", b"111", false),
        ("a/two.bin", b"22222", false),
        ("a/link.bin", b"", true),
        ("a/three.bin", b"3333333", false),
    ])
}

#[test]
fn unmodified_sub_archive_rebuilds_byte_for_byte() {
    let original = odd_sized_pack();
    let install = Install::new().named("pack/a.sarc", &original);
    let project = ingest_named(&install, b"pack/a.sarc\n");

    write_file(&project.mod_dir().join("pack/a.sarc.DECA.FILE_LIST.txt"), b"");
    let report = Builder::new(&project)
        .build()
        .expect("Test operation should succeed");
    assert_eq!(report.containers_rebuilt, 1);
    assert_eq!(report.files_replaced, 0);

    let rebuilt = std::fs::read(project.build_dir().join("pack/a.sarc"))
        .expect("Test operation should succeed");
    assert_eq!(rebuilt, original);

    let archive = SarcFile::parse(&rebuilt).expect("Test operation should succeed");
    for entry in archive.entries.iter().filter(|e| !e.symlink) {
        let end = (entry.offset + entry.length) as usize;
        let padded = end.next_multiple_of(4).min(rebuilt.len());
        assert!(
            rebuilt[end..padded].iter().all(|&b| b == 0),
            "padding after {:?} is not zero",
            String::from_utf8_lossy(&entry.v_path)
        );
    }
}

#[test]
fn identical_replacement_is_byte_identical() {
    let original = odd_sized_pack();
    let install = Install::new().named("pack/a.sarc", &original);
    let project = ingest_named(&install, b"pack/a.sarc\n");

    write_file(&project.mod_dir().join("a/two.bin"), b"22222");
    let report = Builder::new(&project)
        .build()
        .expect("Test operation should succeed");
    assert_eq!(report.files_replaced, 1);
    assert_eq!(report.containers_rebuilt, 1);

    let rebuilt = std::fs::read(project.build_dir().join("pack/a.sarc"))
        .expect("Test operation should succeed");
    assert_eq!(rebuilt, original);
}
