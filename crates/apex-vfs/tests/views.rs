//! Views over an ingested catalog

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use apex_formats::FileKind;
use apex_vfs::{Project, VfsView};
use common::{Install, sarc};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

fn project() -> (Install, Project) {
    let install = Install::new()
        .entry(
            0x0000_0001,
            &sarc(&[
                ("models/a.bin", b"aaaa", false),
                ("models/b.bin", b"bb", false),
                ("textures/c.ddsc", b"", true),
            ]),
        )
        .entry(0x0000_0002, &sarc(&[("textures/d.ddsc", b"dddd", false)]));
    let project = install.project();
    project.ingest().expect("Test operation should succeed");
    (install, project)
}

#[test]
fn match_all_mask_shows_every_named_node() {
    let (_install, project) = project();
    let catalog = project.catalog();
    let named: BTreeSet<Vec<u8>> = catalog
        .nodes_all()
        .expect("Test operation should succeed")
        .into_iter()
        .filter_map(|n| n.v_path)
        .collect();

    let view = VfsView::new(catalog, Vec::new(), "^.*$").expect("Test operation should succeed");
    assert_eq!(
        view.node_visible_count().expect("Test operation should succeed"),
        named.len()
    );
    let visible: BTreeSet<Vec<u8>> = view
        .nodes_visible_map_get()
        .expect("Test operation should succeed")
        .into_keys()
        .collect();
    assert_eq!(visible, named);

    let map = view
        .nodes_visible_map_get()
        .expect("Test operation should succeed");
    let symlink = &map[&b"textures/c.ddsc".to_vec()];
    assert!(symlink.referenced.is_empty());
    assert_eq!(symlink.symlinks.len(), 1);
}

#[test]
fn mask_and_selection() {
    let (_install, project) = project();
    let view = VfsView::new(project.catalog(), Vec::new(), "models/")
        .expect("Test operation should succeed");
    assert_eq!(view.node_visible_count().expect("Test operation should succeed"), 2);

    view.paths_set(vec![b"models/a%".to_vec()]);
    assert!(view.is_selected_dirty());
    let selected = view
        .nodes_selected_get()
        .expect("Test operation should succeed");
    assert_eq!(
        selected.keys().cloned().collect::<Vec<_>>(),
        vec![b"models/a.bin".to_vec()]
    );

    view.mask_set("textures/").expect("Test operation should succeed");
    assert_eq!(view.node_selected_count().expect("Test operation should succeed"), 0);
    assert!(view.mask_set("(").is_err());
}

#[test]
fn child_view_is_restricted_to_parent_node() {
    let (_install, project) = project();
    let catalog = project.catalog();
    let first = catalog
        .nodes_filtered(|n| n.file_kind == Some(FileKind::Sarc) && n.v_hash == Some(1))
        .expect("Test operation should succeed")
        .into_iter()
        .next()
        .expect("Test operation should succeed");

    let root = VfsView::new(catalog, Vec::new(), "^.*$").expect("Test operation should succeed");
    let child = VfsView::child(&root, Some(first.uid));
    let visible: Vec<Vec<u8>> = child
        .nodes_visible_map_get()
        .expect("Test operation should succeed")
        .into_keys()
        .collect();
    assert_eq!(
        visible,
        vec![
            b"models/a.bin".to_vec(),
            b"models/b.bin".to_vec(),
            b"textures/c.ddsc".to_vec(),
        ]
    );
    assert!(
        !child
            .node_visible_has(&[first.uid])
            .expect("Test operation should succeed")
    );
}

#[test]
fn views_refresh_after_catalog_writes() {
    let (install, project) = project();
    let view = VfsView::new(project.catalog(), Vec::new(), "^.*$")
        .expect("Test operation should succeed");
    let before = view.node_visible_count().expect("Test operation should succeed");
    assert!(!view.is_visible_dirty());

    let extra = install.dir.path().join("extra.bin");
    common::write_file(&extra, b"loose");
    project
        .external_file_add(&extra, true)
        .expect("Test operation should succeed");
    assert!(view.is_visible_dirty());
    assert_eq!(
        view.node_visible_count().expect("Test operation should succeed"),
        before + 1
    );
}
