use camino::Utf8PathBuf;
use tempfile::TempDir;

use contig_indexer::domain::{AnnotationCategory, Annotations, Contig, ContigPatch, MetaKey};
use contig_indexer::store::ContigStore;

fn annotated(name: &str, category: AnnotationCategory, values: &[&str]) -> Contig {
    let mut annotations = Annotations::default();
    annotations.extend(category, values.iter().map(|value| value.to_string()));
    Contig::with_annotations(name, annotations).unwrap()
}

fn store_path(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("nested").join("contigs.sqlite")).unwrap()
}

#[test]
fn default_path_layout() {
    let path = ContigStore::default_path().unwrap();
    assert!(path.ends_with(".cache/contig-indexer/contigs.sqlite"));
}

#[test]
fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    {
        let store = ContigStore::open(&path).unwrap();
        store
            .bulk_put(&[annotated("ERZ101_6", AnnotationCategory::Pfam, &["PF00004"])])
            .unwrap();
        store.put_meta(MetaKey::AssemblyAccession, "ERZ101").unwrap();
    }

    let store = ContigStore::open(&path).unwrap();
    assert_eq!(store.location(), path.as_str());
    let contig = store.get(6).unwrap().unwrap();
    assert_eq!(contig.contig_name(), "ERZ101_6");
    assert!(contig.presence().has_pfams);
    assert_eq!(
        store.meta(MetaKey::AssemblyAccession).unwrap().as_deref(),
        Some("ERZ101")
    );
}

#[test]
fn facet_counts_follow_updates() {
    let store = ContigStore::open_in_memory().unwrap();
    store
        .bulk_put(&[
            annotated("ERZ101_1", AnnotationCategory::Go, &["GO:0005524"]),
            annotated("ERZ101_2", AnnotationCategory::Go, &["GO:0016887"]),
            annotated("ERZ101_3", AnnotationCategory::Cog, &["COG0464"]),
        ])
        .unwrap();
    assert_eq!(store.count_with(AnnotationCategory::Go).unwrap(), 2);

    let updated = store
        .bulk_update(&[
            ContigPatch {
                contig_id: 2,
                length: None,
                annotations: Some(Annotations::default()),
            },
            ContigPatch::length(40, 100),
        ])
        .unwrap();
    assert_eq!(updated, 1);
    assert_eq!(store.count_with(AnnotationCategory::Go).unwrap(), 1);
    assert!(
        store
            .contig_ids_by_prefix(AnnotationCategory::Go, "GO:0016", 10)
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        store
            .contig_ids_by_prefix(AnnotationCategory::Cog, "cog", 10)
            .unwrap(),
        vec![3]
    );
}
