use contig_indexer::contig_name_to_id;
use contig_indexer::domain::{AnnotationCategory, Annotations, Contig, MetaKey};

#[test]
fn contig_ids_are_deterministic() {
    assert_eq!(contig_name_to_id("ERZ101_6").unwrap(), 6);
    assert_eq!(contig_name_to_id("ERZ101_6").unwrap(), 6);
    assert_eq!(contig_name_to_id("ERZ101_000120").unwrap(), 120);
    assert!(contig_name_to_id("ERZ101").is_err());
}

#[test]
fn contig_json_shape() {
    let mut annotations = Annotations::default();
    annotations.insert(AnnotationCategory::Kegg, "ko:K02313");
    let contig = Contig::with_annotations("ERZ101_6", annotations).unwrap();

    let value = serde_json::to_value(&contig).unwrap();
    assert_eq!(value["contig_id"], 6);
    assert_eq!(value["contig_name"], "ERZ101_6");
    assert!(value["length"].is_null());
    assert_eq!(value["annotations"]["keggs"][0], "ko:K02313");
    assert_eq!(value["annotations_presence"]["has_keggs"], true);
    assert_eq!(value["annotations_presence"]["has_gos"], false);
}

#[test]
fn meta_key_names() {
    let names = MetaKey::ALL.map(MetaKey::as_str);
    assert_eq!(names, ["sourceUrl", "assemblyAccession", "importStartedAt"]);
    assert_eq!(MetaKey::from_name("sourceUrl"), Some(MetaKey::SourceUrl));
    assert_eq!(MetaKey::from_name("source_url"), None);
}
