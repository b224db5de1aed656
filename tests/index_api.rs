use gart::index::{CardStore, IndexManager, Mode};
use gart::repo::Repo;
use gart::Error;
use gart_core::{QueryBuilder, Selection};
use tempfile::TempDir;

fn setup() -> (TempDir, Repo) {
    let tmp = TempDir::new().unwrap();
    let repo = Repo::init(tmp.path()).unwrap();
    (tmp, repo)
}

#[test]
fn test_keys_follow_ingest_order_across_sessions() {
    let (_tmp, repo) = setup();
    let mut oids = Vec::new();
    for round in 0..3 {
        let mut mgr = IndexManager::open(&repo, Mode::Write).unwrap();
        for i in 0..50 {
            let (card, is_new) = mgr
                .index_text(&format!("object {}-{}", round, i), &["bulk"])
                .unwrap();
            assert!(is_new);
            assert_eq!(card.key(), oids.len() as u64 + 1);
            oids.push(*card.oid());
        }
        mgr.close().unwrap();
    }

    let mut mgr = IndexManager::open(&repo, Mode::Read).unwrap();
    assert_eq!(mgr.object_count(), 150);
    assert_eq!(mgr.object_index().page_count(), 2);
    assert_eq!(mgr.select(Selection::All, &["bulk"]).unwrap(), oids);
    let keys: Vec<u64> = (1..=150).collect();
    assert_eq!(mgr.object_index().get_oids(&keys).unwrap(), oids);
}

#[test]
fn test_stale_card_swap_does_not_leak() {
    let (_tmp, repo) = setup();
    let oid = {
        let mut mgr = IndexManager::open(&repo, Mode::Write).unwrap();
        let (card, _) = mgr.index_text("survivor", &["a"]).unwrap();
        mgr.close().unwrap();
        *card.oid()
    };

    let store = CardStore::new(&repo.cards_dir());
    let swap = gart::fs::swap_path(&store.path_for(&oid));
    std::fs::write(&swap, b"torn write").unwrap();

    let mut mgr = IndexManager::open(&repo, Mode::Write).unwrap();
    let (card, is_new) = mgr.index_text("survivor", &["b"]).unwrap();
    assert!(!is_new);
    assert_eq!(card.tags(), ["a", "b"]);
    assert_eq!(card.text(), Some("survivor"));
    mgr.close().unwrap();
    assert!(!swap.exists());
    assert!(store.oids().unwrap().contains(&oid));
}

#[test]
fn test_truncated_index_is_corrupt() {
    let (_tmp, repo) = setup();
    let mut mgr = IndexManager::open(&repo, Mode::Write).unwrap();
    mgr.index_text("x", &["t"]).unwrap();
    mgr.close().unwrap();

    let path = repo.objects_path();
    let len = std::fs::metadata(&path).unwrap().len();
    std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 1)
        .unwrap();

    assert!(matches!(
        IndexManager::open(&repo, Mode::Read),
        Err(Error::Corrupt { .. })
    ));
}

#[test]
fn test_query_by_type_and_extension() {
    let (tmp, repo) = setup();
    let md = tmp.path().join("notes.md");
    std::fs::write(&md, "# notes").unwrap();

    let mut mgr = IndexManager::open(&repo, Mode::Write).unwrap();
    let (text, _) = mgr.index_text("plain", &["mixed"]).unwrap();
    let (file, _) = mgr.index_file(&md, &["mixed"]).unwrap();

    let files = QueryBuilder::new().all_of(&["mixed"]).with_ext("md").build();
    assert_eq!(mgr.query(&files).unwrap(), vec![*file.oid()]);

    let texts = QueryBuilder::new()
        .all_of(&["mixed"])
        .of_type(gart_core::ObjectType::Text)
        .build();
    assert_eq!(mgr.query(&texts).unwrap(), vec![*text.oid()]);

    let md_tag = [gart_core::systemic::ext_tag("md")];
    assert_eq!(mgr.select(Selection::None, &md_tag).unwrap(), vec![*text.oid()]);
    mgr.close().unwrap();
}
