//! End-to-end coverage of SPEC_FULL.md's seed scenarios (section 8), driven
//! entirely through the public `vellum` API (writer -> commit -> searcher),
//! as an external crate would use it. These mirror the equivalent
//! `#[cfg(test)]` coverage inside `src/writer.rs`, but here nothing short of
//! the public surface is exercised.

use std::collections::HashSet;

use vellum::config::WriterConfig;
use vellum::query::Query;
use vellum::schema::{Field, FieldValue, Schema};
use vellum::searching::SearchContext;
use vellum::storage::{RamStorage, DEFAULT_INDEX_NAME};
use vellum::writer::{Index, Writer};

/// Scenario 1: tiny text index. Two documents, a term query on `content`
/// matches both, and the better-ranked one is the one with two occurrences
/// of the queried word.
#[test]
fn tiny_text_index_ranks_and_retrieves_stored_title() {
    let mut schema = Schema::new();
    schema.add("title", Field::text(false).stored()).unwrap();
    schema.add("content", Field::text(true)).unwrap();

    let storage = RamStorage::new();
    let dir = tempfile::tempdir().unwrap();
    let mut writer = Writer::create(&storage, schema, DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();

    writer
        .add_document(vec![
            ("title".into(), FieldValue::Text("Miss Mary".into())),
            (
                "content".into(),
                FieldValue::Text("Mary had a little white lamb its fleece was white as snow".into()),
            ),
        ])
        .unwrap();
    writer
        .add_document(vec![
            ("title".into(), FieldValue::Text("Snow White".into())),
            (
                "content".into(),
                FieldValue::Text("Snow white lived in the forest with seven dwarfs".into()),
            ),
        ])
        .unwrap();
    writer.commit().unwrap();

    let index = Index::open_default(&storage).unwrap();
    let searcher = index.searcher().unwrap();

    let q = Query::Term { field: "content".into(), term: b"white".to_vec() };
    let results = searcher.search(&q, &SearchContext::default()).unwrap();

    assert_eq!(results.len(), 2);
    assert_ne!(results.hits[0].score, results.hits[1].score);
    assert!(results.hits.iter().all(|h| h.score > 0.0));

    let top_title = searcher.stored_fields(results.hits[0].doc).unwrap().get("title").unwrap().as_text().unwrap().to_string();
    assert_eq!(top_title, "Miss Mary");
}

/// Scenario 2: pagination. Six documents with decreasing occurrences of
/// "alfa"; an unlimited search ranks them 1..6 by frequency, and page 2 of
/// 2-per-page returns docs 3 and 4 with a page count of 3.
#[test]
fn pagination_returns_the_expected_page_and_page_count() {
    let mut schema = Schema::new();
    schema.add("id", Field::id().stored()).unwrap();
    schema.add("c", Field::text(false)).unwrap();

    let storage = RamStorage::new();
    let dir = tempfile::tempdir().unwrap();
    let mut writer = Writer::create(&storage, schema, DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();

    for (id, count) in [("1", 6usize), ("2", 5), ("3", 4), ("4", 3), ("5", 2), ("6", 1)] {
        let content = vec!["alfa"; count].join(" ");
        writer
            .add_document(vec![("id".into(), FieldValue::Text(id.into())), ("c".into(), FieldValue::Text(content))])
            .unwrap();
    }
    writer.commit().unwrap();

    let index = Index::open_default(&storage).unwrap();
    let searcher = index.searcher().unwrap();
    let q = Query::Term { field: "c".into(), term: b"alfa".to_vec() };

    let stored_id = |doc| searcher.stored_fields(doc).unwrap().get("id").unwrap().as_text().unwrap().to_string();

    let results = searcher.search(&q, &SearchContext::default().with_limit(None)).unwrap();
    let ids: Vec<String> = results.hits.iter().map(|h| stored_id(h.doc)).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6"]);

    let page = searcher.search_page(&q, 2, 2).unwrap();
    let page_ids: Vec<String> = page.items.iter().map(|h| stored_id(h.doc)).collect();
    assert_eq!(page_ids, vec!["3", "4"]);
    assert_eq!(page.pagecount, 3);
}

/// Scenario 3: numeric range. A `NumericRange(10, 5925)` query matches
/// exactly the indexed values falling in that inclusive range.
#[test]
fn numeric_range_matches_exactly_the_values_in_range() {
    let mut schema = Schema::new();
    schema.add("n", Field::numeric(32, true, 4).stored()).unwrap();

    let storage = RamStorage::new();
    let dir = tempfile::tempdir().unwrap();
    let mut writer = Writer::create(&storage, schema, DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();

    for v in [0.0, 10.0, 100.0, 1000.0, 5925.0, 10000.0] {
        writer.add_document(vec![("n".into(), FieldValue::Numeric(v))]).unwrap();
    }
    writer.commit().unwrap();

    let index = Index::open_default(&storage).unwrap();
    let searcher = index.searcher().unwrap();

    let q = Query::NumericRange {
        field: "n".into(),
        start: Some(10.0),
        end: Some(5925.0),
        start_excl: false,
        end_excl: false,
        constant_score: false,
    };
    let results = searcher.search(&q, &SearchContext::default().with_limit(None)).unwrap();

    let mut values: Vec<i64> = results
        .hits
        .iter()
        .map(|h| searcher.stored_fields(h.doc).unwrap().get("n").unwrap().as_f64().unwrap() as i64)
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![10, 100, 1000, 5925]);
}

/// Scenario 4: filter composition. Filtering a base query down to only
/// even-typed documents preserves the base query's relative hit order.
#[test]
fn filter_composition_preserves_base_query_order() {
    let mut schema = Schema::new();
    schema.add("id", Field::id().stored()).unwrap();
    schema.add("type", Field::id()).unwrap();
    schema.add("c", Field::text(false)).unwrap();

    let storage = RamStorage::new();
    let dir = tempfile::tempdir().unwrap();
    let mut writer = Writer::create(&storage, schema, DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();

    let docs = [
        ("1", "odd", 6usize),
        ("2", "even", 5),
        ("3", "odd", 4),
        ("4", "even", 3),
        ("5", "odd", 2),
        ("6", "even", 1),
    ];
    for (id, ty, count) in docs {
        let content = vec!["alfa"; count].join(" ");
        writer
            .add_document(vec![
                ("id".into(), FieldValue::Text(id.into())),
                ("type".into(), FieldValue::Text(ty.into())),
                ("c".into(), FieldValue::Text(content)),
            ])
            .unwrap();
    }
    writer.commit().unwrap();

    let index = Index::open_default(&storage).unwrap();
    let searcher = index.searcher().unwrap();

    let base = Query::Term { field: "c".into(), term: b"alfa".to_vec() };
    let filter_query = Query::Term { field: "type".into(), term: b"even".to_vec() };
    let filter_hits = searcher.search(&filter_query, &SearchContext::boolean().with_limit(None)).unwrap();
    let even: HashSet<u32> = filter_hits.hits.iter().map(|h| h.doc.0).collect();

    let ctx = SearchContext::default().with_limit(None).with_include(even);
    let results = searcher.search(&base, &ctx).unwrap();

    let ids: Vec<String> = results
        .hits
        .iter()
        .map(|h| searcher.stored_fields(h.doc).unwrap().get("id").unwrap().as_text().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["2", "4", "6"]);
}
