use super::*;

#[test]
fn topic_equality_by_value() {
    assert_eq!(Topic::new("networking"), Topic::from("networking"));
    assert_ne!(Topic::new("networking"), Topic::new("storage"));
    assert_eq!(Topic::new("dns").to_string(), "dns");
}

#[test]
fn topic_serializes_as_plain_string() {
    let json = serde_json::to_string(&Topic::new("linux")).expect("should serialize topic");
    assert_eq!(json, "\"linux\"");

    let topic: Topic = serde_json::from_str("\"linux\"").expect("should parse topic");
    assert_eq!(topic.name(), "linux");
}

#[test]
fn record_document_is_idempotent_by_name() {
    let mut collection = Collection::new(1, "ops");

    assert!(collection.record_document(Document::new("a", "first", "t1")));
    assert!(!collection.record_document(Document::new("a", "second", "t2")));

    assert_eq!(collection.documents.len(), 1);
    assert_eq!(collection.documents[0].content, "first");
    assert!(collection.topics.contains(&Topic::new("t1")));
    assert!(collection.topics.contains(&Topic::new("t2")));
}

#[test]
fn builder_keeps_document_order_and_unbacked_topics() {
    let collection = Collection::new(7, "ops")
        .with_topic("future")
        .with_document(Document::new("b", "", "t2"))
        .with_document(Document::new("a", "", "t1"));

    let names: Vec<&str> = collection.documents.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["b", "a"]);
    assert_eq!(collection.topics.len(), 3);
    assert_eq!(collection.size, 0);
}

#[test]
fn title_validation() {
    assert!(validate_title("linux_commands").is_ok());
    assert!(validate_title("Runbooks-2024").is_ok());

    assert!(matches!(
        validate_title(""),
        Err(KnowledgeError::InvalidTitle(_))
    ));
    assert!(validate_title("../escape").is_err());
    assert!(validate_title("with space").is_err());
    assert!(validate_title("dotted.json").is_err());
    assert!(validate_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    assert!(validate_title(&"x".repeat(MAX_TITLE_LEN)).is_ok());
}
