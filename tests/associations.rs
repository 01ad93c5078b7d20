mod common;

use common::{doc, id_of, model, setup};
use protean_orm::schema::Cardinality;
use protean_orm::{AppError, AssociationRecord, Related, ViolationKind};
use serde_json::json;

fn hierarchical(from: &str, to: &str, many: bool, reverse: &str) -> AssociationRecord {
    let mut record = AssociationRecord::hierarchical(from, to, many);
    record.from_model.reverse_name = reverse.into();
    record
}

#[tokio::test]
async fn hierarchical_association_wires_both_sides() {
    let (registry, catalog) = setup().await;
    let author = model(&catalog, "lib", "Author").await;
    let book = model(&catalog, "lib", "Book").await;
    let change = catalog
        .create_association(hierarchical(&author.id, &book.id, true, "items"))
        .await
        .unwrap();
    let mut expected = vec![author.id.clone(), book.id.clone()];
    expected.sort();
    assert_eq!(change.changed_models, expected);
    registry.compile(Some(&[author.id.clone()])).await.unwrap();

    let authors = registry.model("lib.Author").unwrap();
    let books = registry.model("lib.Book").unwrap();
    let items = authors.schema().relation("items").unwrap();
    assert_eq!(items.cardinality, Cardinality::Many);
    assert_eq!(items.foreign_field, "authorId");
    assert_eq!(books.schema().field("authorId").unwrap().reference.as_deref(), Some("lib.Author"));

    let ann = authors.create(doc(json!({}))).await.unwrap();
    let ann_id = id_of(&ann);
    for _ in 0..2 {
        books.create(doc(json!({"authorId": ann_id}))).await.unwrap();
    }
    books.create(doc(json!({}))).await.unwrap();

    match authors.related(&ann, "items").await.unwrap() {
        Related::Many(found) => assert_eq!(found.len(), 2),
        other => panic!("expected many, got {:?}", other),
    }
    let first = books
        .find_one(protean_orm::Filter::new().eq("authorId", ann_id.as_str()))
        .await
        .unwrap()
        .unwrap();
    let back = books.related(&first, "author").await.unwrap();
    assert!(matches!(back, Related::One(Some(ref a)) if id_of(a) == ann_id));

    let populated = authors.populate(&ann, &["items"]).await.unwrap();
    assert_eq!(populated["items"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn toggling_many_switches_to_one_to_one() {
    let (registry, catalog) = setup().await;
    let person = model(&catalog, "hr", "Person").await;
    let badge = model(&catalog, "hr", "Badge").await;
    let assoc = catalog
        .create_association(hierarchical(&person.id, &badge.id, true, "badges"))
        .await
        .unwrap()
        .record;
    registry.compile(None).await.unwrap();
    assert!(!registry.model("hr.Badge").unwrap().schema().field("personId").unwrap().unique);

    let people = registry.model("hr.Person").unwrap();
    let kim = people.create(doc(json!({}))).await.unwrap();
    registry
        .model("hr.Badge")
        .unwrap()
        .create(doc(json!({"personId": id_of(&kim)})))
        .await
        .unwrap();

    let change = catalog
        .update_association(&assoc.id, doc(json!({"many": false})))
        .await
        .unwrap();
    assert_eq!(change.record.variant, protean_orm::AssociationVariant::Hierarchical { many: false });
    registry.compile(Some(&change.changed_models)).await.unwrap();

    let people = registry.model("hr.Person").unwrap();
    let badges = registry.model("hr.Badge").unwrap();
    assert_eq!(people.schema().relation("badges").unwrap().cardinality, Cardinality::One);
    assert!(badges.schema().field("personId").unwrap().unique);
    assert!(matches!(
        people.related(&kim, "badges").await.unwrap(),
        Related::One(Some(_))
    ));

    let err = badges
        .create(doc(json!({"personId": id_of(&kim)})))
        .await
        .unwrap_err();
    assert!(err.violations().unwrap().has("personId", ViolationKind::Unique));
}

#[tokio::test]
async fn relaxing_one_to_one_allows_many_again() {
    let (registry, catalog) = setup().await;
    let person = model(&catalog, "hr", "Person").await;
    let badge = model(&catalog, "hr", "Badge").await;
    let assoc = catalog
        .create_association(hierarchical(&person.id, &badge.id, false, "badge"))
        .await
        .unwrap()
        .record;
    registry.compile(None).await.unwrap();
    assert!(registry.model("hr.Badge").unwrap().schema().field("personId").unwrap().unique);

    let kim = registry.model("hr.Person").unwrap().create(doc(json!({}))).await.unwrap();
    let badges = registry.model("hr.Badge").unwrap();
    badges.create(doc(json!({"personId": id_of(&kim)}))).await.unwrap();
    let err = badges
        .create(doc(json!({"personId": id_of(&kim)})))
        .await
        .unwrap_err();
    assert!(err.violations().unwrap().has("personId", ViolationKind::Unique));

    let change = catalog
        .update_association(&assoc.id, doc(json!({"many": true})))
        .await
        .unwrap();
    registry.compile(Some(&change.changed_models)).await.unwrap();
    let badges = registry.model("hr.Badge").unwrap();
    assert!(!badges.schema().field("personId").unwrap().unique);
    badges.create(doc(json!({"personId": id_of(&kim)}))).await.unwrap();
    assert!(matches!(
        registry.model("hr.Person").unwrap().related(&kim, "badge").await.unwrap(),
        Related::Many(ref found) if found.len() == 2
    ));
}

#[tokio::test]
async fn association_type_cannot_change() {
    let (_, catalog) = setup().await;
    let a = model(&catalog, "geo", "Country").await;
    let b = model(&catalog, "geo", "City").await;
    let assoc = catalog
        .create_association(hierarchical(&a.id, &b.id, true, ""))
        .await
        .unwrap()
        .record;
    let err = catalog
        .update_association(&assoc.id, doc(json!({"type": "nonHierarchical"})))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn naming_must_be_unique_per_pair_and_side() {
    let (registry, catalog) = setup().await;
    let author = model(&catalog, "pub", "Author").await;
    let book = model(&catalog, "pub", "Book").await;
    catalog
        .create_association(hierarchical(&author.id, &book.id, true, ""))
        .await
        .unwrap();

    let err = catalog
        .create_association(hierarchical(&author.id, &book.id, true, ""))
        .await
        .unwrap_err();
    let violations = err.violations().unwrap();
    assert!(violations.has("fromModel.reverseName", ViolationKind::Unique));
    assert!(violations.has("toModel.foreignKey", ViolationKind::Unique));

    let mut drafts = hierarchical(&author.id, &book.id, true, "drafts");
    drafts.to_model.foreign_key = "draftAuthorId".into();
    drafts.to_model.related_name = "draftAuthor".into();
    catalog.create_association(drafts.clone()).await.unwrap();

    let err = catalog.create_association(drafts).await.unwrap_err();
    let violation = err.violations().unwrap().field("fromModel.reverseName").unwrap();
    assert_eq!(
        violation.message,
        "Error, expected `fromModel.reverseName` to be unique. Value: `drafts`"
    );

    registry.compile(None).await.unwrap();
    let authors = registry.model("pub.Author").unwrap();
    assert!(authors.schema().relation("bookSet").is_some());
    assert_eq!(authors.schema().relation("drafts").unwrap().foreign_field, "draftAuthorId");
    let books = registry.model("pub.Book").unwrap();
    assert!(books.schema().relation("author").is_some());
    assert!(books.schema().relation("draftAuthor").is_some());
}

#[tokio::test]
async fn many_to_many_synthesizes_a_junction() {
    let (registry, catalog) = setup().await;
    let post = model(&catalog, "blog", "Post").await;
    let tag = model(&catalog, "blog", "Tag").await;
    catalog
        .create_association(AssociationRecord::many_to_many(&post.id, &tag.id, None))
        .await
        .unwrap();
    registry.compile(Some(&[post.id.clone()])).await.unwrap();
    registry.compile(Some(&[tag.id.clone()])).await.unwrap();

    let junctions: Vec<String> = registry
        .namespaces()
        .into_iter()
        .filter(|ns| ns.contains('_'))
        .collect();
    assert_eq!(junctions, vec!["blog.Post_Tag".to_string()]);

    let posts = registry.model("blog.Post").unwrap();
    let tags = registry.model("blog.Tag").unwrap();
    let links = registry.model("blog.Post_Tag").unwrap();
    assert!(posts.schema().field("tagId").is_none());

    let hello = posts.create(doc(json!({}))).await.unwrap();
    let rust = tags.create(doc(json!({}))).await.unwrap();
    let async_tag = tags.create(doc(json!({}))).await.unwrap();
    tags.create(doc(json!({}))).await.unwrap();
    for t in [&rust, &async_tag] {
        links
            .create(doc(json!({"postId": id_of(&hello), "tagId": id_of(t)})))
            .await
            .unwrap();
    }

    match posts.related(&hello, "tagSet").await.unwrap() {
        Related::Many(found) => {
            let mut ids: Vec<String> = found.iter().map(id_of).collect();
            ids.sort();
            let mut expected = vec![id_of(&rust), id_of(&async_tag)];
            expected.sort();
            assert_eq!(ids, expected);
        }
        other => panic!("expected many, got {:?}", other),
    }
    assert!(matches!(
        tags.related(&rust, "postSet").await.unwrap(),
        Related::Many(ref found) if found.len() == 1
    ));

    let err = links
        .create(doc(json!({"postId": id_of(&hello), "tagId": id_of(&rust)})))
        .await
        .unwrap_err();
    assert!(err.violations().unwrap().has("tagId", ViolationKind::Unique));
    let err = links.create(doc(json!({"postId": id_of(&hello)}))).await.unwrap_err();
    assert!(err.violations().unwrap().has("tagId", ViolationKind::Required));
}

#[tokio::test]
async fn deleting_an_association_drops_its_relations() {
    let (registry, catalog) = setup().await;
    let team = model(&catalog, "org", "Team").await;
    let member = model(&catalog, "org", "Member").await;
    let assoc = catalog
        .create_association(hierarchical(&team.id, &member.id, true, "members"))
        .await
        .unwrap()
        .record;
    registry.compile(None).await.unwrap();
    assert!(registry.model("org.Team").unwrap().schema().relation("members").is_some());

    let change = catalog.delete_association(&assoc.id).await.unwrap();
    registry.compile(Some(&change.changed_models)).await.unwrap();
    assert!(registry.model("org.Team").unwrap().schema().relation("members").is_none());
    assert!(registry.model("org.Member").unwrap().schema().relation("team").is_none());
}
