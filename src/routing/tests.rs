use super::*;

fn collections(titles: &[&str]) -> HashMap<String, Collection> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| (title.to_string(), Collection::new(i as u64, *title)))
        .collect()
}

#[tokio::test]
async fn configured_target_wins() {
    let router = StaticRouter::new(Some("ops".to_string()));
    let route = router
        .find_route("restart nginx", &collections(&["ops", "hr"]))
        .await
        .expect("routing should succeed");

    assert_eq!(route, "ops");
    assert_eq!(router.target(), Some("ops"));
}

#[tokio::test]
async fn sole_collection_is_chosen() {
    let router = StaticRouter::default();
    let route = router
        .find_route("restart nginx", &collections(&["ops"]))
        .await
        .expect("routing should succeed");

    assert_eq!(route, "ops");
}

#[tokio::test]
async fn ambiguous_or_empty_mapping_is_a_config_error() {
    let router = StaticRouter::default();

    let empty = router.find_route("restart nginx", &HashMap::new()).await;
    assert!(matches!(empty, Err(KnowledgeError::Config(_))));

    let ambiguous = router
        .find_route("restart nginx", &collections(&["ops", "hr"]))
        .await;
    assert!(matches!(ambiguous, Err(KnowledgeError::Config(_))));
}
