//! Property tests driving units of work with random operation sequences.

use entimap_codec::Value;
use entimap_core::query::GlobPattern;
use entimap_core::{Entity, EntityId, EntityStatus};
use entimap_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn moved_up_or_stayed(before: EntityStatus, after: EntityStatus) -> bool {
    before == after || before.raised_to(after) == Some(after)
}

fn glob_matches(glob: &[char], text: &[char]) -> bool {
    match glob.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|skip| glob_matches(rest, &text[skip..])),
        Some(('?', rest)) => !text.is_empty() && glob_matches(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_matches(rest, &text[1..]),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn random_operations_match_a_simple_model(ops in unit_of_work_ops_strategy(24)) {
        let repo = TestRepository::optimistic();
        let uow = repo.new_unit_of_work().unwrap();
        let mut committed: BTreeMap<EntityId, String> = BTreeMap::new();
        let mut pool: Vec<Entity> = Vec::new();
        let mut removed: Vec<Entity> = Vec::new();

        for op in ops {
            match op {
                UnitOfWorkOp::Create(name) => {
                    let created = person(&uow, &name, 0);
                    prop_assert_eq!(created.status(), EntityStatus::Created);
                    pool.push(created);
                }
                UnitOfWorkOp::Rename(index, name) => {
                    if pool.is_empty() {
                        continue;
                    }
                    let target = &pool[index % pool.len()];
                    let before = target.status();
                    target.set("name", name.as_str()).unwrap();
                    prop_assert!(moved_up_or_stayed(before, target.status()));
                    prop_assert!(target.status().is_modified());
                }
                UnitOfWorkOp::Remove(index) => {
                    if pool.is_empty() {
                        continue;
                    }
                    let target = pool.remove(index % pool.len());
                    let before = target.status();
                    uow.remove_entity(&target).unwrap();
                    prop_assert!(moved_up_or_stayed(before, target.status()));
                    prop_assert_eq!(target.status(), EntityStatus::Removed);
                    removed.push(target);
                }
                UnitOfWorkOp::Submit => {
                    uow.submit().unwrap();
                    for gone in removed.drain(..) {
                        committed.remove(gone.id());
                        prop_assert_eq!(gone.status(), EntityStatus::Evicted);
                    }
                    for entity in &pool {
                        prop_assert_eq!(entity.status(), EntityStatus::Loaded);
                        committed.insert(entity.id().clone(), text(entity, "name"));
                    }
                    prop_assert!(uow.modified_entities().is_empty());

                    prop_assert_eq!(repo.store().len(), committed.len());
                    for (id, name) in &committed {
                        let stored = repo.store().document(id).unwrap().unwrap();
                        prop_assert_eq!(stored.get_or_null("name"), Value::from(name.as_str()));
                    }
                }
                UnitOfWorkOp::Discard => {
                    uow.discard().unwrap();
                    let mut kept = Vec::new();
                    for entity in pool.drain(..) {
                        match committed.get(entity.id()) {
                            Some(name) => {
                                prop_assert_eq!(entity.status(), EntityStatus::Loaded);
                                prop_assert_eq!(&text(&entity, "name"), name);
                                kept.push(entity);
                            }
                            None => {
                                prop_assert_eq!(entity.status(), EntityStatus::Detached);
                                prop_assert!(!entity.is_attached());
                            }
                        }
                    }
                    for entity in removed.drain(..) {
                        if committed.contains_key(entity.id()) {
                            prop_assert_eq!(entity.status(), EntityStatus::Loaded);
                            kept.push(entity);
                        } else {
                            prop_assert!(entity.status().is_terminal());
                        }
                    }
                    pool = kept;
                    prop_assert!(uow.modified_entities().is_empty());
                }
            }

            for entity in &pool {
                let found = uow.entity("Person", entity.id()).unwrap();
                prop_assert!(found.is_some_and(|f| f.ptr_eq(entity)));
            }
            for entity in &removed {
                prop_assert!(uow.entity("Person", entity.id()).unwrap().is_none());
            }
            prop_assert_eq!(uow.query("Person").unwrap().count().unwrap(), pool.len());
        }
    }

    #[test]
    fn glob_agrees_with_a_naive_matcher(glob in glob_strategy(), text in "[abc]{0,8}") {
        let pattern = GlobPattern::new(glob.as_str()).unwrap();
        let glob_chars: Vec<char> = glob.chars().collect();
        let text_chars: Vec<char> = text.chars().collect();
        prop_assert_eq!(pattern.is_match(&text), glob_matches(&glob_chars, &text_chars));
    }

    #[test]
    fn scalar_values_survive_a_submit(value in scalar_value_strategy()) {
        let repo = TestRepository::optimistic();
        let id = with_unit_of_work(&repo, |uow| {
            let entity = person(uow, "Ann", 0);
            entity.set("nickname", value.clone())?;
            uow.submit()?;
            Ok(entity.id().clone())
        })
        .unwrap();

        let uow = repo.new_unit_of_work().unwrap();
        let loaded = uow.entity("Person", &id).unwrap().unwrap();
        prop_assert_eq!(loaded.get("nickname").unwrap(), value);
    }
}
