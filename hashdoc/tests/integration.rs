use hashdoc::{Database, ErrorKind, HashDocError, SearchRequest};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tempfile::TempDir;

const SCHEMA: &str = r#"
delimiter: "/"
documents:
  country:
    basic: true
  person:
    fields:
      - { name: name, type: string, indexed: true, on_table: true, required: true, max_length: 50 }
      - { name: country, type: string, indexed: true, on_table: true }
      - { name: email, type: string, unique: true, format: email, max_length: 50 }
      - { name: age, type: int, indexed: true }
  product:
    auto_id: ulid
    fields:
      - { name: name, type: string, indexed: true }
      - { name: stock, type: int, indexed: true }
      - { name: price, type: float, indexed: true }
      - { name: released, type: date }
foreign_keys:
  - { dependant: person, references: country }
"#;

fn setup_test_db() -> (TempDir, Database) {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("schema.yaml"), SCHEMA).unwrap();
    let db = Database::open(tmp.path()).unwrap();
    (tmp, db)
}

fn without_stamps(mut doc: serde_json::Map<String, Value>) -> Value {
    assert!(doc.remove("created_at").is_some());
    assert!(doc.remove("updated_at").is_some());
    Value::Object(doc)
}

#[test]
fn test_auto_ids_are_sequential_per_type() {
    let (_tmp, db) = setup_test_db();
    let countries = db.document("country").unwrap();

    let first = countries.save(&json!({ "description": "Spain" })).unwrap();
    let second = countries.save(&json!({ "description": "France" })).unwrap();
    assert_eq!(first, "COUNTRY/00000001");
    assert_eq!(second, "COUNTRY/00000002");

    let products = db.document("product").unwrap();
    let key = products.save(&json!({ "name": "Widget" })).unwrap();
    assert!(key.starts_with("PRODUCT/"));
    assert_eq!(key.len(), "PRODUCT/".len() + 26);
}

#[test]
fn test_counter_survives_reopen() {
    let (tmp, db) = setup_test_db();
    db.document("country")
        .unwrap()
        .save(&json!({ "description": "Spain" }))
        .unwrap();
    drop(db);

    let db = Database::open(tmp.path()).unwrap();
    let key = db
        .document("country")
        .unwrap()
        .save(&json!({ "description": "France" }))
        .unwrap();
    assert_eq!(key, "COUNTRY/00000002");
}

#[test]
fn test_round_trip() {
    let (_tmp, db) = setup_test_db();
    let products = db.document("product").unwrap();
    let doc = json!({
        "id": "PRODUCT/W1",
        "name": "Widget, deluxe (blue)",
        "stock": 3,
        "price": 9.5,
        "released": "2026-01-02"
    });

    let key = products.save(&doc).unwrap();
    assert_eq!(key, "PRODUCT/W1");
    let stored = products.get(&key).unwrap().unwrap();
    assert_eq!(without_stamps(stored), doc);
}

#[test]
fn test_typed_get() {
    #[derive(Debug, Deserialize)]
    struct Country {
        id: String,
        description: String,
    }

    #[derive(Debug, Deserialize)]
    struct Person {
        name: String,
        country: Country,
        age: i64,
    }

    let (_tmp, db) = setup_test_db();
    db.document("country")
        .unwrap()
        .save(&json!({ "id": "es", "description": "España" }))
        .unwrap();
    let people = db.document("person").unwrap();
    let key = people
        .save(&json!({ "name": "Pere", "country": "es", "age": 44 }))
        .unwrap();

    let person: Person = people.get_as(&key).unwrap().unwrap();
    assert_eq!(person.name, "Pere");
    assert_eq!(person.age, 44);
    assert_eq!(person.country.id, "COUNTRY/ES");
    assert_eq!(person.country.description, "España");
}

#[test]
fn test_foreign_key_missing_then_saved() {
    let (_tmp, db) = setup_test_db();
    let people = db.document("person").unwrap();
    let pere = json!({ "name": "Pere", "country": db.key(&["COUNTRY", "ES"]) });

    let err = people.save(&pere).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ForeignKeyMissing);
    assert_eq!(err.payload(), Some(pere.clone()));

    db.document("country")
        .unwrap()
        .save(&json!({ "id": "ES", "description": "España" }))
        .unwrap();
    // The rejected save already drew an id from the counter
    let key = people.save(&pere).unwrap();
    assert_eq!(key, "PERSON/00000002");
}

#[test]
fn test_delete_blocked_until_dependents_are_gone() {
    let (_tmp, db) = setup_test_db();
    let countries = db.document("country").unwrap();
    let people = db.document("person").unwrap();

    countries
        .save(&json!({ "id": "ES", "description": "España" }))
        .unwrap();
    let pere = people
        .save(&json!({ "name": "Pere", "country": "COUNTRY/ES" }))
        .unwrap();

    let err = countries.delete("COUNTRY/ES").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeleteBlocked);
    match err {
        HashDocError::DeleteBlocked { key, dependant } => {
            assert_eq!(key, "COUNTRY/ES");
            assert_eq!(dependant, "PERSON");
        }
        other => panic!("unexpected error {other}"),
    }

    people.delete(&pere).unwrap();
    countries.delete("COUNTRY/ES").unwrap();
    assert!(countries.get("ES").unwrap().is_none());
    assert!(people.get(&pere).unwrap().is_none());
}

#[test]
fn test_unique_email() {
    let (_tmp, db) = setup_test_db();
    db.document("country")
        .unwrap()
        .save(&json!({ "id": "ES", "description": "España" }))
        .unwrap();
    let people = db.document("person").unwrap();

    people
        .save(&json!({ "name": "Pere", "country": "ES", "email": "hola@nam.com" }))
        .unwrap();
    let err = people
        .save(&json!({ "name": "Joan", "country": "ES", "email": "hola@nam.com" }))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniqueConstraint);

    let found = people
        .search(&SearchRequest::new(r"@email:hola\@nam\.com"))
        .unwrap();
    assert_eq!(found.total, 1);
    assert_eq!(found.docs[0]["name"], json!("Pere"));
    assert_eq!(found.docs[0]["email"], json!("hola@nam.com"));
}

#[test]
fn test_paginate_fifth_page() {
    let (_tmp, db) = setup_test_db();
    let countries = db.document("country").unwrap();
    for n in 1..=45 {
        countries
            .save(&json!({ "description": format!("Country {n}") }))
            .unwrap();
    }

    let page = countries.paginate(&SearchRequest::new("*"), 5, 10).unwrap();
    assert_eq!(page.total, 45);
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.items[0]["id"], json!("COUNTRY/00000041"));
    assert_eq!(page.pages(), 5);
    assert!(!page.has_next());

    let page = countries.paginate(&SearchRequest::new("*"), 4, 10).unwrap();
    assert_eq!(page.items.len(), 10);
    assert_eq!(page.items[0]["id"], json!("COUNTRY/00000031"));
}

#[test]
fn test_concurrent_saves_get_distinct_ids() {
    let (_tmp, db) = setup_test_db();
    let countries = db.document("country").unwrap();

    let keys: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|t| {
                scope.spawn(move || {
                    (0..10)
                        .map(|i| {
                            countries
                                .save(&json!({ "description": format!("Country {t}-{i}") }))
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<&String> = keys.iter().collect();
    assert_eq!(unique.len(), 80);
    assert_eq!(countries.count().unwrap(), 80);
}
