use quaver::{Condition, FetchFlags, FetchSpec, Result, Store, Value};

/// A small music library: ratings are ints, everything else strings.
fn library() -> Result<Store> {
    let store = Store::open_memory()?;
    let mut txn = store.begin()?;
    for (title, artist, rating) in [
        ("night drive", "Vector Hold", 5),
        ("daybreak", "Vector Hold", 3),
        ("Morning Song", "The Quiet Kind", 4),
        ("statics", "Null Pointer Exception", 1),
    ] {
        txn.add("entry", title, "artist", artist, "tags")?;
        txn.add("entry", title, "rating", rating, "server")?;
    }
    txn.add("entry", "night drive", "artist", "V. Hold", "plugin/id3v2")?;
    txn.commit()?;
    drop(txn);
    Ok(store)
}

fn matching_entries(store: &Store, cond: &Condition) -> Result<usize> {
    let spec = FetchSpec::new();
    let txn = store.begin_read()?;
    Ok(txn.query(&spec, cond)?.row_count())
}

#[test]
fn equal_filter_on_attributes() -> Result<()> {
    let store = library()?;
    let cond = Condition::equal("artist", "Vector Hold").build()?;
    assert_eq!(matching_entries(&store, &cond)?, 2);
    Ok(())
}

#[test]
fn caseless_equal() -> Result<()> {
    let store = library()?;
    let cond = Condition::equal("artist", "vector hold").caseless().build()?;
    assert_eq!(matching_entries(&store, &cond)?, 2);

    let sensitive = Condition::equal("artist", "vector hold").build()?;
    assert_eq!(matching_entries(&store, &sensitive)?, 0);
    Ok(())
}

#[test]
fn integer_range_filters() -> Result<()> {
    let store = library()?;

    let high = Condition::greater("rating", 3).build()?;
    assert_eq!(matching_entries(&store, &high)?, 2);

    let low = Condition::smaller("rating", 3).build()?;
    assert_eq!(matching_entries(&store, &low)?, 1);

    let exact = Condition::equal("rating", 3).build()?;
    assert_eq!(matching_entries(&store, &exact)?, 1);
    Ok(())
}

#[test]
fn glob_match_filter() -> Result<()> {
    let store = library()?;

    let cond = Condition::matches("artist", "Vector*").build()?;
    assert_eq!(matching_entries(&store, &cond)?, 2);

    let cond = Condition::matches("artist", "*hold").caseless().build()?;
    assert_eq!(matching_entries(&store, &cond)?, 2);

    // Integers never match globs.
    let cond = Condition::matches("rating", "*").build()?;
    assert_eq!(matching_entries(&store, &cond)?, 0);
    Ok(())
}

#[test]
fn token_filter() -> Result<()> {
    let store = library()?;

    let cond = Condition::has_token("artist", "Quiet").build()?;
    assert_eq!(matching_entries(&store, &cond)?, 1);

    let cond = Condition::has_token("artist", "quiet").caseless().build()?;
    assert_eq!(matching_entries(&store, &cond)?, 1);

    // Tokens are whole words.
    let cond = Condition::has_token("artist", "Qui").build()?;
    assert_eq!(matching_entries(&store, &cond)?, 0);
    Ok(())
}

#[test]
fn custom_filter() -> Result<()> {
    let store = library()?;
    let cond = Condition::custom("rating", |v: &Value| {
        v.as_int().map(|i| i % 2 == 1).unwrap_or(false)
    })
    .build()?;
    assert_eq!(matching_entries(&store, &cond)?, 3);
    Ok(())
}

#[test]
fn combinators() -> Result<()> {
    let store = library()?;

    let both = Condition::and(vec![
        Condition::equal("artist", "Vector Hold").build()?,
        Condition::greater("rating", 3).build()?,
    ]);
    assert_eq!(matching_entries(&store, &both)?, 1);

    let either = Condition::or(vec![
        Condition::equal("artist", "The Quiet Kind").build()?,
        Condition::equal("rating", 5).build()?,
    ]);
    assert_eq!(matching_entries(&store, &either)?, 2);

    // NOT falls back to a full scan over every stored pair; restrict it
    // back to title entries with a parent anchor.
    let unloved = Condition::and(vec![
        Condition::matches("entry", "*").parent().build()?,
        Condition::not(Condition::greater("rating", 1).build()?),
    ]);
    assert_eq!(matching_entries(&store, &unloved)?, 1);
    Ok(())
}

#[test]
fn wildcard_fetch_projects_every_key() -> Result<()> {
    let store = library()?;
    let mut spec = FetchSpec::new();
    spec.add(None, None, FetchFlags::DATA);
    let cond = Condition::equal("entry", "night drive").parent().build()?;

    let txn = store.begin_read()?;
    let set = txn.query(&spec, &cond)?;
    assert_eq!(set.row_count(), 1);
    let mut keys: Vec<&str> = set.records(0, 0).iter().map(|r| r.key()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys, ["artist", "rating"]);
    assert_eq!(set.records(0, 0).len(), 3);
    Ok(())
}

#[test]
fn fetch_without_data_flag_yields_empty_cells() -> Result<()> {
    let store = library()?;
    let mut spec = FetchSpec::new();
    spec.add(Some("artist"), None, FetchFlags::NONE);
    spec.add(Some("artist"), None, FetchFlags::DATA);
    let cond = Condition::equal("entry", "daybreak").parent().build()?;

    let txn = store.begin_read()?;
    let set = txn.query(&spec, &cond)?;
    assert_eq!(set.col_count(), 2);
    assert_eq!(set.row_count(), 1);
    assert!(set.records(0, 0).is_empty());
    assert_eq!(set.records(0, 1).len(), 1);
    Ok(())
}

#[test]
fn fetch_source_pref_keeps_best_source_only() -> Result<()> {
    let store = library()?;
    let pref = store.source_pref(&["plugin/*", "tags"])?;
    let mut spec = FetchSpec::new();
    spec.add(Some("artist"), Some(&pref), FetchFlags::DATA);
    let cond = Condition::equal("entry", "night drive").parent().build()?;

    let txn = store.begin_read()?;
    let set = txn.query(&spec, &cond)?;
    let records = set.records(0, 0);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value().as_str(), Some("V. Hold"));
    assert_eq!(records[0].source(), "plugin/id3v2");
    Ok(())
}

#[test]
fn empty_condition_objects() -> Result<()> {
    let store = library()?;

    // An empty OR matches nothing, an empty AND matches every stored pair.
    assert_eq!(matching_entries(&store, &Condition::or(vec![]))?, 0);
    assert!(matching_entries(&store, &Condition::and(vec![]))? > 4);

    // An empty fetch spec still produces one row per match, with no cells.
    let spec = FetchSpec::new();
    let cond = Condition::equal("entry", "daybreak").parent().build()?;
    let txn = store.begin_read()?;
    let set = txn.query(&spec, &cond)?;
    assert_eq!(set.row_count(), 1);
    assert_eq!(set.col_count(), 0);
    assert!(set.get(0, 0).is_none());
    Ok(())
}

#[test]
fn queries_traverse_both_directions() -> Result<()> {
    let store = Store::open_memory()?;
    let mut txn = store.begin()?;
    txn.add("entry", "song", "album", "falls", "tags")?;
    txn.commit()?;

    // Forward: the entry has the album.
    let mut spec = FetchSpec::new();
    spec.add(Some("album"), None, FetchFlags::DATA);
    let cond = Condition::equal("entry", "song").parent().build()?;
    let txn = store.begin_read()?;
    let set = txn.query(&spec, &cond)?;
    assert_eq!(set.get(0, 0).expect("album").value().as_str(), Some("falls"));
    drop(txn);

    // Inverse: the album pair carries the entry.
    let mut spec = FetchSpec::new();
    spec.add(Some("entry"), None, FetchFlags::DATA);
    let cond = Condition::equal("album", "falls").parent().build()?;
    let txn = store.begin_read()?;
    let set = txn.query(&spec, &cond)?;
    assert_eq!(set.row_count(), 1);
    let record = set.get(0, 0).expect("entry record");
    assert_eq!(record.value().as_str(), Some("song"));
    assert_eq!(record.source(), "tags");
    Ok(())
}
