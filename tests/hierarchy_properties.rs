//! Integration tests for the hierarchy browser
//!
//! Every test runs against the in-memory taxonomy, so request order, gating
//! and failures are fully controlled.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hierarchy_browser::service::ServiceCall;
use hierarchy_browser::{
    BrowserConfig, FetchState, HierarchyBrowser, InMemoryTaxonomy, QueryScope, SearchCandidate,
    SelectionMode, TreeController, Viewport, ROOT_NODE_ID,
};
use tokio_test::{assert_err, assert_ok};

const CA: &str = "geoId/06";
const AR: &str = "geoId/05";

/// Taxonomy used across tests
///
/// ```text
/// dc/g/Root
/// ├── dc/g/Demographics
/// │   ├── Count_Person                    (CA, AR)
/// │   ├── dc/g/Person_Age
/// │   │   ├── Median_Age_Person           (CA)
/// │   │   └── dc/g/Person_Age_Detail
/// │   │       └── Count_Person_Upto4      (CA)
/// │   └── dc/g/Person_Empty
/// │       └── Count_Nothing               (no data)
/// ├── dc/g/Economy
/// │   └── Count_Worker                    (CA, AR)
/// └── dc/g/Miscellaneous
///     └── Count_Misc                      (CA)
/// ```
fn taxonomy() -> Arc<InMemoryTaxonomy> {
    Arc::new(
        InMemoryTaxonomy::new()
            .with_group("dc/g/Miscellaneous", ROOT_NODE_ID, "Miscellaneous", None)
            .with_group("dc/g/Economy", ROOT_NODE_ID, "Economy", None)
            .with_group("dc/g/Demographics", ROOT_NODE_ID, "Demographics", None)
            .with_leaf("Count_Person", "dc/g/Demographics", "Population", &[CA, AR])
            .with_group("dc/g/Person_Age", "dc/g/Demographics", "Person By Age", Some("Age"))
            .with_leaf("Median_Age_Person", "dc/g/Person_Age", "Median Age", &[CA])
            .with_group("dc/g/Person_Age_Detail", "dc/g/Person_Age", "Age Detail", None)
            .with_leaf("Count_Person_Upto4", "dc/g/Person_Age_Detail", "Population Up To 4", &[CA])
            .with_group("dc/g/Person_Empty", "dc/g/Demographics", "Nothing Here", None)
            .with_leaf("Count_Nothing", "dc/g/Person_Empty", "Nothing", &[])
            .with_leaf("Count_Worker", "dc/g/Economy", "Workers", &[CA, AR])
            .with_leaf("Count_Misc", "dc/g/Miscellaneous", "Miscellany", &[CA]),
    )
}

fn browser(taxonomy: &Arc<InMemoryTaxonomy>, mode: SelectionMode) -> HierarchyBrowser {
    HierarchyBrowser::new(
        taxonomy.clone(),
        BrowserConfig {
            selection_mode: mode,
            initial_scope: QueryScope::new([CA]),
            ..Default::default()
        },
    )
}

fn path(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn row_ids(tree: &TreeController) -> Vec<String> {
    tree.visible_rows().unwrap().into_iter().map(|r| r.id).collect()
}

/// Viewport where every row renders below the fold
#[derive(Default)]
struct RecordingViewport {
    scrolled: Mutex<Vec<String>>,
}

impl RecordingViewport {
    fn scrolled(&self) -> Vec<String> {
        self.scrolled.lock().unwrap().clone()
    }
}

impl Viewport for RecordingViewport {
    fn element_top(&self, _node_id: &str) -> Option<f64> {
        Some(900.0)
    }

    fn viewport_height(&self) -> f64 {
        600.0
    }

    fn scroll_into_view(&self, node_id: &str) {
        self.scrolled.lock().unwrap().push(node_id.to_string());
    }
}

async fn wait_for_children_call(taxonomy: &InMemoryTaxonomy, node_id: &str) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !taxonomy.children_calls().unwrap().iter().any(|id| id == node_id) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("children request issued");
}

/// Entries fetched under different scopes never collide
#[tokio::test]
async fn test_cache_partitioned_by_scope() {
    let taxonomy = taxonomy();
    let browser = browser(&taxonomy, SelectionMode::Single);
    let ca = browser.open_tree("ca", None).await;
    let ar = browser.open_tree("ar", Some(QueryScope::new([AR]))).await;

    assert_ok!(ca.toggle_open("dc/g/Demographics").await);
    assert_ok!(ar.toggle_open("dc/g/Demographics").await);

    let store = browser.fetcher().store();
    let age_ca = store.node("dc/g/Person_Age", &ca.scope_key()).unwrap().unwrap();
    let age_ar = store.node("dc/g/Person_Age", &ar.scope_key()).unwrap().unwrap();
    assert_eq!(age_ca.descendant_data_count, 2);
    assert_eq!(age_ar.descendant_data_count, 0);

    let demographic_calls = taxonomy
        .children_calls()
        .unwrap()
        .iter()
        .filter(|id| *id == "dc/g/Demographics")
        .count();
    assert_eq!(demographic_calls, 2);
    assert!(row_ids(&ca).contains(&"dc/g/Person_Age".to_string()));
    assert!(!row_ids(&ar).contains(&"dc/g/Person_Age".to_string()));
}

/// A response whose scope changed before arrival lands under neither scope
#[tokio::test]
async fn test_stale_response_dropped() {
    let taxonomy = taxonomy();
    let browser = browser(&taxonomy, SelectionMode::Single);
    let tree = browser.open_tree("main", None).await;
    let old_key = tree.scope_key();
    taxonomy.hold("dc/g/Demographics").unwrap();

    let pending = {
        let fetcher = browser.fetcher().clone();
        let watch = tree.scope_watch();
        tokio::spawn(async move { fetcher.fetch_children("dc/g/Demographics", &watch).await })
    };
    wait_for_children_call(&taxonomy, "dc/g/Demographics").await;

    assert_ok!(tree.set_scope(QueryScope::new([AR])).await);
    taxonomy.release("dc/g/Demographics").unwrap();

    let err = assert_err!(pending.await.unwrap());
    assert!(err.is_discarded());

    let store = browser.fetcher().store();
    assert!(store.children("dc/g/Demographics", &old_key).unwrap().is_none());
    assert!(store.children("dc/g/Demographics", &tree.scope_key()).unwrap().is_none());
    assert!(store.node("dc/g/Person_Age", &old_key).unwrap().is_none());
    assert!(store.node("dc/g/Person_Age", &tree.scope_key()).unwrap().is_none());
    assert_eq!(store.stats().unwrap().discarded, 1);
}

/// Single-select never exposes more than one selected leaf
#[tokio::test]
async fn test_single_select_exclusive_at_every_transition() {
    let taxonomy = taxonomy();
    let browser = browser(&taxonomy, SelectionMode::Single);
    let observed = Arc::new(Mutex::new(Vec::new()));
    {
        let observed = observed.clone();
        assert_ok!(browser.on_selection_change(move |state| {
            observed.lock().unwrap().push(state.len());
        }));
    }

    let selection = browser.selection();
    assert_ok!(selection.select("Count_Person", path(&["dc/g/Demographics"])));
    assert_ok!(selection.select("Median_Age_Person", path(&["dc/g/Demographics", "dc/g/Person_Age"])));
    assert_ok!(selection.select("Count_Worker", path(&["dc/g/Economy"])));

    let observed = observed.lock().unwrap().clone();
    assert_eq!(observed, vec![1, 1, 1]);
    assert_eq!(selection.snapshot().leaf_ids(), vec!["Count_Worker"]);
}

/// Re-selecting a leaf with the same path notifies nobody
#[tokio::test]
async fn test_multi_select_idempotent() {
    let taxonomy = taxonomy();
    let browser = browser(&taxonomy, SelectionMode::Multi);
    let mut rx = browser.subscribe_selection();

    let selection = browser.selection();
    assert!(selection.select("Count_Person", path(&["dc/g/Demographics"])).unwrap());
    assert!(rx.has_changed().unwrap());
    let _ = rx.borrow_and_update();

    assert!(!selection.select("Count_Person", path(&["dc/g/Demographics"])).unwrap());
    assert!(!rx.has_changed().unwrap());

    assert!(selection.select("Count_Worker", path(&["dc/g/Economy"])).unwrap());
    assert_eq!(selection.snapshot().len(), 2);
}

/// Focusing and clearing leaves manual expansion exactly as it was
#[tokio::test]
async fn test_focus_clear_round_trip_keeps_manual_opens() {
    let taxonomy = taxonomy();
    let browser = browser(&taxonomy, SelectionMode::Single);
    let tree = browser.open_tree("main", None).await;

    assert_ok!(tree.toggle_open("dc/g/Economy").await);
    assert_ok!(tree.toggle_open("dc/g/Demographics").await);
    let before = tree.manually_opened().unwrap();

    let outcome = assert_ok!(
        tree.set_focus(path(&[
            "dc/g/Demographics",
            "dc/g/Person_Age",
            "dc/g/Person_Age_Detail",
            "Count_Person_Upto4",
        ]))
        .await
    );
    assert!(!outcome.degraded);
    assert_eq!(
        tree.focus_opened().unwrap(),
        HashSet::from(["dc/g/Person_Age".to_string(), "dc/g/Person_Age_Detail".to_string()])
    );

    assert_ok!(tree.clear_focus());
    assert_eq!(tree.manually_opened().unwrap(), before);
    assert!(tree.focus_opened().unwrap().is_empty());
    assert!(tree.focus().unwrap().focused_path().is_empty());
    assert!(tree.is_expanded("dc/g/Demographics").unwrap());
    assert!(!tree.is_expanded("dc/g/Person_Age").unwrap());
}

/// Ancestors along a focus path are fetched strictly root to leaf
#[tokio::test]
async fn test_focus_fetches_ancestors_in_order() {
    let taxonomy = taxonomy();
    let browser = browser(&taxonomy, SelectionMode::Single);
    let tree = browser.open_tree("main", None).await;
    let already = taxonomy.children_calls().unwrap().len();

    assert_ok!(
        tree.set_focus(path(&[
            "dc/g/Demographics",
            "dc/g/Person_Age",
            "dc/g/Person_Age_Detail",
            "Count_Person_Upto4",
        ]))
        .await
    );

    let calls = taxonomy.children_calls().unwrap()[already..].to_vec();
    assert_eq!(
        calls,
        path(&["dc/g/Demographics", "dc/g/Person_Age", "dc/g/Person_Age_Detail"])
    );
    let rows = tree.visible_rows().unwrap();
    let target = rows.iter().find(|r| r.id == "Count_Person_Upto4").unwrap();
    assert!(target.highlighted);
    assert_eq!(target.depth, 3);
}

/// Empty branches are hidden; show-all reveals cached ones without fetching
#[tokio::test]
async fn test_show_all_reveals_cached_empty_branches() {
    let taxonomy = taxonomy();
    let browser = browser(&taxonomy, SelectionMode::Single);
    let tree = browser.open_tree("main", Some(QueryScope::new([AR]))).await;
    assert_ok!(tree.toggle_open("dc/g/Demographics").await);

    let rows = row_ids(&tree);
    assert_eq!(rows, path(&["dc/g/Demographics", "Count_Person", "dc/g/Economy"]));

    let calls = taxonomy.children_calls().unwrap().len();
    assert_ok!(tree.set_show_all_nodes(true));
    let rows = row_ids(&tree);
    assert!(rows.contains(&"dc/g/Person_Age".to_string()));
    assert!(rows.contains(&"dc/g/Person_Empty".to_string()));
    assert!(rows.contains(&"dc/g/Miscellaneous".to_string()));
    assert_eq!(rows.last().map(String::as_str), Some("dc/g/Miscellaneous"));
    assert_eq!(taxonomy.children_calls().unwrap().len(), calls);
    assert_eq!(tree.fetch_state("dc/g/Person_Age").unwrap(), FetchState::NotFetched);
}

/// Search, pick a leaf, then clear: selection stays, focus goes, and only
/// the ancestors leading to the selection stay open
#[tokio::test]
async fn test_search_then_clear() {
    let taxonomy = taxonomy();
    let browser = browser(&taxonomy, SelectionMode::Multi);
    let left = browser.open_tree("left", None).await;
    let right = browser.open_tree("right", None).await;
    let search = browser.search();
    let scope = QueryScope::new([CA]);

    let workers = SearchCandidate::Group {
        id: "dc/g/Economy".into(),
        name: "Economy".into(),
    };
    assert_ok!(search.pick_candidate(&workers).await);
    assert!(left.focus_opened().unwrap().contains("dc/g/Economy"));
    assert!(browser.selection().snapshot().is_empty());

    let results = search.query("median ", &scope).await.unwrap();
    let candidate = results
        .candidates()
        .into_iter()
        .find(|c| c.id() == "Median_Age_Person")
        .unwrap();
    let outcomes = assert_ok!(search.pick_candidate(&candidate).await);
    assert_eq!(outcomes.len(), 2);
    assert!(browser.selection().is_selected("Median_Age_Person"));
    for tree in [&left, &right] {
        assert_eq!(tree.focus().unwrap().focused_id(), Some("Median_Age_Person"));
        assert!(!tree.is_expanded("dc/g/Economy").unwrap());
    }

    let cleared = search.query("", &scope).await.unwrap();
    assert!(cleared.candidates().is_empty());

    for tree in [&left, &right] {
        assert!(!tree.focus().unwrap().is_set());
        assert!(tree.focus_opened().unwrap().is_empty());
        assert!(tree.manually_opened().unwrap().is_empty());
        assert_eq!(
            tree.selection_opened().unwrap(),
            HashSet::from(["dc/g/Demographics".to_string(), "dc/g/Person_Age".to_string()])
        );
        let rows = tree.visible_rows().unwrap();
        let leaf = rows.iter().find(|r| r.id == "Median_Age_Person").unwrap();
        assert!(leaf.selected);
        let demographics = rows.iter().find(|r| r.id == "dc/g/Demographics").unwrap();
        assert_eq!(demographics.selection_count, 1);
    }
    assert!(browser.selection().is_selected("Median_Age_Person"));
}

/// An unresolvable pick leaves every focus in place
#[tokio::test]
async fn test_unresolvable_pick_keeps_focus() {
    let taxonomy = taxonomy();
    let browser = browser(&taxonomy, SelectionMode::Single);
    let tree = browser.open_tree("main", None).await;
    assert_ok!(tree.set_focus(path(&["dc/g/Economy", "Count_Worker"])).await);

    taxonomy.fail_path("Median_Age_Person").unwrap();
    let candidate = SearchCandidate::Leaf {
        id: "Median_Age_Person".into(),
        name: "Median Age".into(),
    };
    assert_err!(browser.search().pick_candidate(&candidate).await);
    assert_eq!(tree.focus().unwrap().focused_id(), Some("Count_Worker"));
    assert!(browser.selection().snapshot().is_empty());

    let path_calls = taxonomy
        .calls()
        .unwrap()
        .into_iter()
        .filter(|c| matches!(c, ServiceCall::Path(_)))
        .count();
    assert_eq!(path_calls, 1);
}

/// Picking a leaf scrolls it into view once, and so does a later selection
/// made elsewhere
#[tokio::test(start_paused = true)]
async fn test_focus_and_selection_scroll_into_view() {
    let taxonomy = taxonomy();
    let viewport = Arc::new(RecordingViewport::default());
    let browser = browser(&taxonomy, SelectionMode::Multi).with_viewport(viewport.clone());
    let _left = browser.open_tree("left", None).await;
    let _right = browser.open_tree("right", None).await;

    let candidate = SearchCandidate::Leaf {
        id: "Median_Age_Person".into(),
        name: "Median Age".into(),
    };
    assert_ok!(browser.search().pick_candidate(&candidate).await);
    assert!(viewport.scrolled().is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(viewport.scrolled(), path(&["Median_Age_Person"]));

    assert_ok!(browser.selection().select("Count_Worker", path(&["dc/g/Economy"])));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(viewport.scrolled(), path(&["Median_Age_Person", "Count_Worker"]));
}
