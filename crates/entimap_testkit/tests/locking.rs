//! Optimistic and pessimistic locking through the public API.

use entimap_codec::Value;
use entimap_core::{
    ConflictPhase, CoreError, EntityStatus, LockPolicy, LockingMode, RepositoryConfig,
};
use entimap_testkit::prelude::*;
use std::thread;
use std::time::Duration;

#[test]
fn optimistic_conflict_then_reload_and_retry() {
    init_tracing();
    let repo = TestRepository::optimistic();
    let id = repo.seed_people(&["a"]).remove(0);

    let first = repo.new_unit_of_work().unwrap();
    let second = repo.new_unit_of_work().unwrap();
    let in_first = first.entity("Person", &id).unwrap().unwrap();
    let in_second = second.entity("Person", &id).unwrap().unwrap();

    in_first.set("name", "b").unwrap();
    first.submit().unwrap();

    in_second.set("name", "c").unwrap();
    let err = second.submit().unwrap_err();
    assert!(matches!(
        err,
        CoreError::ConcurrentModification {
            phase: ConflictPhase::Prepare,
            ..
        }
    ));
    assert_eq!(err.conflicting_entities()[0].id, id);
    assert_eq!(in_second.status(), EntityStatus::Modified);
    assert_eq!(text(&in_second, "name"), "c");
    assert_eq!(repo.versions().version(&id), 2);

    second.reload(&in_second).unwrap();
    assert_eq!(text(&in_second, "name"), "b");
    in_second.set("name", "c").unwrap();
    second.submit().unwrap();

    let stored = repo.store().document(&id).unwrap().unwrap();
    assert_eq!(stored.get_or_null("name"), Value::from("c"));
    assert_eq!(repo.versions().version(&id), 3);
}

#[test]
fn optimistic_removal_conflicts_with_update() {
    let repo = TestRepository::optimistic();
    let id = repo.seed_people(&["a"]).remove(0);

    let remover = repo.new_unit_of_work().unwrap();
    let editor = repo.new_unit_of_work().unwrap();
    let doomed = remover.entity("Person", &id).unwrap().unwrap();
    let edited = editor.entity("Person", &id).unwrap().unwrap();

    edited.set("name", "b").unwrap();
    editor.submit().unwrap();

    remover.remove_entity(&doomed).unwrap();
    assert!(remover.submit().unwrap_err().is_concurrent_modification());
    assert!(repo.store().contains(&id));
}

#[test]
fn requeried_instance_carries_the_fresh_version() {
    let repo = TestRepository::optimistic();
    let id = repo.seed_people(&["Ann"]).remove(0);

    let uow = repo.new_unit_of_work().unwrap();
    drop(uow.entity("Person", &id).unwrap().unwrap());
    assert!(uow.cached_entities().is_empty());

    let other = repo.new_unit_of_work().unwrap();
    other.entity("Person", &id).unwrap().unwrap().set("name", "Bea").unwrap();
    other.submit().unwrap();

    let found = uow.query("Person").unwrap().list().unwrap().remove(0);
    assert_eq!(text(&found, "name"), "Bea");
    found.set("name", "Cid").unwrap();
    uow.submit().unwrap();

    let stored = repo.store().document(&id).unwrap().unwrap();
    assert_eq!(stored.get_or_null("name"), Value::from("Cid"));
    assert_eq!(repo.versions().version(&id), 3);
}

#[test]
fn held_instance_keeps_its_version_across_queries() {
    let repo = TestRepository::optimistic();
    let id = repo.seed_people(&["Ann"]).remove(0);

    let uow = repo.new_unit_of_work().unwrap();
    let held = uow.entity("Person", &id).unwrap().unwrap();

    let other = repo.new_unit_of_work().unwrap();
    other.entity("Person", &id).unwrap().unwrap().set("name", "Bea").unwrap();
    other.submit().unwrap();

    let found = uow.query("Person").unwrap().list().unwrap().remove(0);
    assert!(found.ptr_eq(&held));
    assert_eq!(text(&held, "name"), "Ann");
    held.set("name", "Cid").unwrap();
    assert!(uow.submit().unwrap_err().is_concurrent_modification());
}

#[test]
fn unlocked_mode_lets_last_submit_win() {
    let repo = TestRepository::unlocked();
    let id = repo.seed_people(&["a"]).remove(0);

    let first = repo.new_unit_of_work().unwrap();
    let second = repo.new_unit_of_work().unwrap();
    first.entity("Person", &id).unwrap().unwrap().set("name", "b").unwrap();
    second.entity("Person", &id).unwrap().unwrap().set("name", "c").unwrap();
    first.submit().unwrap();
    second.submit().unwrap();

    let stored = repo.store().document(&id).unwrap().unwrap();
    assert_eq!(stored.get_or_null("name"), Value::from("c"));
    assert!(repo.versions().is_empty());
}

#[test]
fn optimistic_increments_are_never_lost() {
    let repo = TestRepository::optimistic();
    let id = seed_counter(&repo).unwrap();
    let config = StressConfig {
        threads: 4,
        increments: 20,
        ..StressConfig::default()
    };

    let result = stress_counter(&repo, &id, &config);
    assert_eq!(result.failed, 0);
    assert_eq!(result.committed, 80);
    assert_eq!(read_counter(&repo, &id).unwrap(), 80);
}

#[test]
fn pessimistic_one_reader_serialises_increments() {
    let repo = TestRepository::pessimistic(LockPolicy::OneReader);
    let id = seed_counter(&repo).unwrap();
    let config = StressConfig {
        threads: 3,
        increments: 10,
        ..StressConfig::default()
    };

    let result = stress_counter(&repo, &id, &config);
    assert_eq!(result.failed, 0);
    assert_eq!(result.conflicts, 0);
    assert_eq!(read_counter(&repo, &id).unwrap(), 30);
}

#[test]
fn blocked_reader_sees_committed_write() {
    init_tracing();
    let repo = TestRepository::pessimistic(LockPolicy::MultipleReaders);
    let id = repo.seed_people(&["a"]).remove(0);

    let writer = repo.new_unit_of_work().unwrap();
    let held = writer.entity("Person", &id).unwrap().unwrap();
    held.set("name", "b").unwrap();
    let reference = held.reference();
    assert!(repo.locks().is_write_locked(&reference));

    thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let uow = repo.new_unit_of_work().unwrap();
            let seen = uow.entity("Person", &id).unwrap().unwrap();
            text(&seen, "name")
        });

        while repo.locks().waiters() == 0 {
            thread::yield_now();
        }
        writer.submit().unwrap();
        writer.close();

        assert_eq!(reader.join().unwrap(), "b");
    });
    assert!(!repo.locks().is_write_locked(&reference));
}

#[test]
fn one_reader_policy_times_out_second_reader() {
    let repo = TestRepository::with_config(
        RepositoryConfig::new()
            .locking(LockingMode::Pessimistic(LockPolicy::OneReader))
            .lock_timeout(Some(Duration::from_millis(50))),
    );
    let id = repo.seed_people(&["a"]).remove(0);

    let first = repo.new_unit_of_work().unwrap();
    let second = repo.new_unit_of_work().unwrap();
    first.entity("Person", &id).unwrap().unwrap();

    assert!(matches!(
        second.entity("Person", &id),
        Err(CoreError::LockTimeout { .. })
    ));

    first.close();
    assert!(second.entity("Person", &id).unwrap().is_some());
}

#[test]
fn upgrade_with_other_readers_times_out() {
    let repo = TestRepository::with_config(
        RepositoryConfig::new()
            .locking(LockingMode::Pessimistic(LockPolicy::MultipleReaders))
            .lock_timeout(Some(Duration::from_millis(50))),
    );
    let id = repo.seed_people(&["a"]).remove(0);

    let first = repo.new_unit_of_work().unwrap();
    let second = repo.new_unit_of_work().unwrap();
    let a = first.entity("Person", &id).unwrap().unwrap();
    second.entity("Person", &id).unwrap().unwrap();
    assert_eq!(repo.locks().reader_count(&a.reference()), 2);

    assert!(matches!(
        a.set("name", "b"),
        Err(CoreError::LockTimeout { .. })
    ));
    assert_eq!(a.status(), EntityStatus::Loaded);
    assert_eq!(text(&a, "name"), "a");

    second.close();
    a.set("name", "b").unwrap();
    first.submit().unwrap();
}

#[test]
fn query_takes_read_locks_and_entries_stay() {
    let repo = TestRepository::pessimistic(LockPolicy::MultipleReaders);
    let ids = repo.seed_people(&["a", "b", "c", "d", "e"]);

    let uow = repo.new_unit_of_work().unwrap();
    let all = uow.query("Person").unwrap().list().unwrap();
    assert_eq!(all.len(), 5);
    for entity in &all {
        assert_eq!(repo.locks().reader_count(&entity.reference()), 1);
    }
    uow.close();

    assert_eq!(repo.locks().len(), ids.len());
    for entity in &all {
        assert_eq!(repo.locks().reader_count(&entity.reference()), 0);
    }
}
