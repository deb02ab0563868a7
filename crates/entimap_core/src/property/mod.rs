//! Property, association and collection runtime objects.
//!
//! Accessors are thin handles over an entity and a property slot. Every
//! read and write goes through the property's concern chain; accepted
//! writes raise the entity's status and register it in the modified set.

mod association;
mod collection;
mod concern;
mod value;

pub use association::{Association, ManyAssociation};
pub use collection::CollectionProperty;
pub use concern::{ConcernContext, ConstraintConcern, InvocationCounter, PropertyConcern};
pub use value::Property;

#[cfg(test)]
mod tests {
    use crate::entity::EntityStatus;
    use crate::error::CoreError;
    use crate::store::MemoryStore;
    use crate::test_support::{repository, sample_registry};
    use entimap_codec::{Document, Value};

    #[test]
    fn required_property_without_default_fails_on_read() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();

        let err = person.get("name").unwrap_err();
        assert!(matches!(err, CoreError::NotNullable { .. }));
    }

    #[test]
    fn default_substitutes_null() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();

        assert_eq!(person.get("age").unwrap(), Value::Integer(0));
        assert_eq!(person.get("nickname").unwrap(), Value::Null);
        assert!(person.collection("tags").unwrap().get().unwrap().is_empty());
    }

    #[test]
    fn stored_scalar_reads_as_single_element_collection() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let raw = MemoryStore::raw_state(&"p1".into(), Document::new().with("tags", "solo"));
        let person = uow.entity_for_state("Person", raw).unwrap();

        assert_eq!(person.get("tags").unwrap(), Value::List(vec![Value::from("solo")]));
        assert_eq!(person.collection("tags").unwrap().len().unwrap(), 1);
    }

    #[test]
    fn null_write_rejected_for_required_property() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();

        let err = person.set("name", Value::Null).unwrap_err();
        assert!(matches!(err, CoreError::NotNullable { .. }));
        person.set("nickname", Value::Null).unwrap();
    }

    #[test]
    fn immutable_property_accepts_first_write_only() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();

        person.set("ssn", "123").unwrap();
        let err = person.set("ssn", "456").unwrap_err();
        assert!(matches!(err, CoreError::Immutable { .. }));
        assert_eq!(person.get("ssn").unwrap(), Value::from("123"));
    }

    #[test]
    fn computed_property_rejects_writes() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        person.set("name", "Ann").unwrap();

        assert_eq!(person.get("greeting").unwrap(), Value::from("Hello, Ann"));
        let err = person.set("greeting", "hi").unwrap_err();
        assert!(matches!(err, CoreError::Unsupported { .. }));
    }

    #[test]
    fn typed_getter() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        let name = person.property("name").unwrap();

        name.set("Ann").unwrap();
        assert_eq!(name.get_as::<String>().unwrap(), "Ann");
        assert!(matches!(
            name.get_as::<i64>(),
            Err(CoreError::Codec(_))
        ));
    }

    #[test]
    fn accessor_kind_is_checked() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();

        assert!(person.association("name").is_err());
        assert!(person.collection("friends").is_err());
        assert!(matches!(
            person.property("missing"),
            Err(CoreError::NoSuchProperty { .. })
        ));
    }

    #[test]
    fn association_resolves_to_cached_instance() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        let address = uow.create_entity("Address", None).unwrap();

        let home = person.association("home").unwrap();
        assert_eq!(home.get().unwrap(), None);

        home.set(Some(&address)).unwrap();
        assert_eq!(home.id().unwrap(), Some(address.id().clone()));
        assert_eq!(home.get().unwrap(), Some(address.clone()));

        home.set(None).unwrap();
        assert_eq!(home.get().unwrap(), None);
    }

    #[test]
    fn association_target_type_is_checked() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        let other = uow.create_entity("Person", None).unwrap();

        let err = person.association("home").unwrap().set(Some(&other)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn association_across_units_rejected() {
        let repo = repository(sample_registry());
        let a = repo.new_unit_of_work().unwrap();
        let b = repo.new_unit_of_work().unwrap();
        let person = a.create_entity("Person", None).unwrap();
        let address = b.create_entity("Address", None).unwrap();

        let err = person.association("home").unwrap().set(Some(&address)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn many_association_add_remove() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        let f1 = uow.create_entity("Person", None).unwrap();
        let f2 = uow.create_entity("Person", None).unwrap();

        let friends = person.many_association("friends").unwrap();
        assert!(friends.add(&f1).unwrap());
        assert!(friends.add(&f2).unwrap());
        assert!(!friends.add(&f1).unwrap());
        assert_eq!(friends.count().unwrap(), 2);
        assert_eq!(friends.get(1).unwrap(), Some(f2.clone()));
        assert_eq!(friends.get(5).unwrap(), None);

        assert!(friends.remove(&f1).unwrap());
        assert!(!friends.remove(&f1).unwrap());
        assert_eq!(friends.to_vec().unwrap(), vec![f2.clone()]);

        friends.clear().unwrap();
        assert_eq!(friends.count().unwrap(), 0);
    }

    #[test]
    fn removed_target_is_skipped() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        let friend = uow.create_entity("Person", None).unwrap();
        let friends = person.many_association("friends").unwrap();
        friends.add(&friend).unwrap();

        uow.remove_entity(&friend).unwrap();
        assert!(friends.contains(&friend).unwrap());
        assert!(friends.to_vec().unwrap().is_empty());
    }

    #[test]
    fn set_collection_deduplicates() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        let tags = person.collection("tags").unwrap();

        assert!(tags.add("a").unwrap());
        assert!(!tags.add("a").unwrap());
        tags.set(["x", "y", "x"]).unwrap();
        assert_eq!(tags.get().unwrap(), vec![Value::from("x"), Value::from("y")]);
        assert!(tags.remove(&Value::from("x")).unwrap());
        assert_eq!(tags.len().unwrap(), 1);
        tags.clear().unwrap();
        assert!(tags.is_empty().unwrap());
    }

    #[test]
    fn list_collection_keeps_duplicates() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        let scores = person.collection("scores").unwrap();

        scores.add(1i64).unwrap();
        scores.add(1i64).unwrap();
        assert_eq!(scores.len().unwrap(), 2);
        assert!(scores.contains(&Value::Integer(1)).unwrap());
    }

    #[test]
    fn write_raises_loaded_to_modified_once() {
        let repo = repository(sample_registry());
        let uow = repo.new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        person.set("name", "Ann").unwrap();
        uow.submit().unwrap();
        assert_eq!(person.status(), EntityStatus::Loaded);

        person.set("name", "Bea").unwrap();
        assert_eq!(person.status(), EntityStatus::Modified);
        person.set("name", "Cid").unwrap();
        assert_eq!(person.status(), EntityStatus::Modified);
        assert_eq!(uow.modified_entities().len(), 1);
    }

    #[test]
    fn write_keeps_created_status() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        person.set("name", "Ann").unwrap();
        assert_eq!(person.status(), EntityStatus::Created);
    }

    #[test]
    fn declared_concern_sees_traffic() {
        let (registry, counter) = crate::test_support::counted_registry();
        let uow = repository(registry).new_unit_of_work().unwrap();
        let person = uow.create_entity("Counted", None).unwrap();

        person.set("value", 1i64).unwrap();
        person.get("value").unwrap();
        person.get("value").unwrap();
        assert_eq!(counter.writes(), 1);
        assert_eq!(counter.reads(), 2);
    }
}
