//! Query builder.

use crate::entity::Entity;
use crate::error::CoreResult;
use crate::query::{Expression, PropertyPath};
use crate::uow::UnitOfWork;
use entimap_codec::Value;
use std::cmp::Ordering;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest first; nulls first.
    #[default]
    Ascending,
    /// Largest first; nulls last.
    Descending,
}

/// A query over one entity type and its implementors.
///
/// Results merge the store's committed entities with the unit of work's
/// pending ones. Without [`order_by`](Self::order_by) the result order is
/// unspecified.
#[derive(Debug, Clone)]
pub struct Query {
    unit_of_work: UnitOfWork,
    entity_type: String,
    filter: Option<Expression>,
    order: Vec<(PropertyPath, Direction)>,
    first_result: usize,
    max_results: Option<usize>,
}

impl Query {
    pub(crate) fn new(unit_of_work: UnitOfWork, entity_type: &str) -> Self {
        Self {
            unit_of_work,
            entity_type: entity_type.to_string(),
            filter: None,
            order: Vec::new(),
            first_result: 0,
            max_results: None,
        }
    }

    /// Unit of work the query runs in.
    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.unit_of_work
    }

    /// Queried type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Combined filter, if any.
    pub fn expression(&self) -> Option<&Expression> {
        self.filter.as_ref()
    }

    /// Adds a filter; several filters must all hold.
    #[must_use]
    pub fn filter(mut self, expression: Expression) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expression),
            None => expression,
        });
        self
    }

    /// Adds a sort key. Earlier keys take precedence.
    #[must_use]
    pub fn order_by(mut self, path: &str, direction: Direction) -> Self {
        self.order.push((PropertyPath::parse(path), direction));
        self
    }

    /// Skips the first `n` results.
    #[must_use]
    pub const fn first_result(mut self, n: usize) -> Self {
        self.first_result = n;
        self
    }

    /// Returns at most `n` results.
    #[must_use]
    pub const fn max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    /// Runs the query.
    pub fn list(&self) -> CoreResult<Vec<Entity>> {
        let entities = self
            .unit_of_work
            .execute_query(&self.entity_type, self.filter.as_ref())?;
        let entities = self.sort(entities)?;
        let page = entities.into_iter().skip(self.first_result);
        Ok(match self.max_results {
            Some(max) => page.take(max).collect(),
            None => page.collect(),
        })
    }

    /// First result, if any.
    pub fn find(&self) -> CoreResult<Option<Entity>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Number of matches, ignoring paging.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self
            .unit_of_work
            .execute_query(&self.entity_type, self.filter.as_ref())?
            .len())
    }

    fn sort(&self, entities: Vec<Entity>) -> CoreResult<Vec<Entity>> {
        if self.order.is_empty() {
            return Ok(entities);
        }
        let mut keyed = entities
            .into_iter()
            .map(|entity| {
                let keys = self
                    .order
                    .iter()
                    .map(|(path, _)| path.resolve(&entity))
                    .collect::<CoreResult<Vec<Value>>>()?;
                Ok((keys, entity))
            })
            .collect::<CoreResult<Vec<_>>>()?;

        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), (_, direction)) in a.iter().zip(b).zip(&self.order) {
                let ordering = match direction {
                    Direction::Ascending => x.sort_cmp(y),
                    Direction::Descending => y.sort_cmp(x),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, entity)| entity).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr;
    use crate::test_support::{repository, sample_registry};
    use std::collections::BTreeSet;

    fn names(entities: &[Entity]) -> Vec<String> {
        entities
            .iter()
            .map(|e| e.get("name").unwrap().as_text().unwrap().to_string())
            .collect()
    }

    #[test]
    fn merges_stored_and_pending() {
        let repo = repository(sample_registry());
        let uow = repo.new_unit_of_work().unwrap();
        for (name, age) in [("Ann", 30i64), ("Bea", 20), ("Cid", 40)] {
            let p = uow.create_entity("Person", None).unwrap();
            p.set("name", name).unwrap();
            p.set("age", age).unwrap();
        }
        uow.submit().unwrap();

        let pending = uow.create_entity("Person", None).unwrap();
        pending.set("name", "Dan").unwrap();
        pending.set("age", 50i64).unwrap();

        let adults = uow
            .query("Person")
            .unwrap()
            .filter(expr::ge("age", 30i64))
            .list()
            .unwrap();
        let found: BTreeSet<String> = names(&adults).into_iter().collect();
        let expected: BTreeSet<String> = ["Ann", "Cid", "Dan"].iter().map(|s| s.to_string()).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn pending_change_overrides_stored_value() {
        let repo = repository(sample_registry());
        let uow = repo.new_unit_of_work().unwrap();
        let ann = uow.create_entity("Person", None).unwrap();
        ann.set("name", "Ann").unwrap();
        uow.submit().unwrap();

        ann.set("name", "Anna").unwrap();
        let by_old = uow.query("Person").unwrap().filter(expr::eq("name", "Ann"));
        assert_eq!(by_old.count().unwrap(), 0);
        let by_new = uow.query("Person").unwrap().filter(expr::eq("name", "Anna"));
        assert_eq!(by_new.list().unwrap(), vec![ann.clone()]);
    }

    #[test]
    fn removed_entities_are_excluded() {
        let repo = repository(sample_registry());
        let uow = repo.new_unit_of_work().unwrap();
        let ann = uow.create_entity("Person", None).unwrap();
        ann.set("name", "Ann").unwrap();
        uow.submit().unwrap();

        uow.remove_entity(&ann).unwrap();
        assert_eq!(uow.query("Person").unwrap().count().unwrap(), 0);
    }

    #[test]
    fn ordering_and_paging() {
        let repo = repository(sample_registry());
        let uow = repo.new_unit_of_work().unwrap();
        for (name, age) in [("Cid", 40i64), ("Ann", 30), ("Bea", 30), ("Dan", 10)] {
            let p = uow.create_entity("Person", None).unwrap();
            p.set("name", name).unwrap();
            p.set("age", age).unwrap();
        }

        let sorted = uow
            .query("Person")
            .unwrap()
            .order_by("age", Direction::Descending)
            .order_by("name", Direction::Ascending);
        assert_eq!(names(&sorted.list().unwrap()), ["Cid", "Ann", "Bea", "Dan"]);

        let page = sorted.clone().first_result(1).max_results(2);
        assert_eq!(names(&page.list().unwrap()), ["Ann", "Bea"]);
        assert_eq!(page.count().unwrap(), 4);
        let first = page.find().unwrap().unwrap();
        assert_eq!(first.get("name").unwrap(), Value::from("Ann"));
    }

    #[test]
    fn abstract_type_query() {
        let repo = repository(sample_registry());
        let uow = repo.new_unit_of_work().unwrap();
        let ann = uow.create_entity("Person", None).unwrap();
        ann.set("name", "Ann").unwrap();
        uow.create_entity("Address", None).unwrap();

        let nameable = uow.query("Nameable").unwrap().list().unwrap();
        assert_eq!(nameable, vec![ann]);
        assert!(uow.query("Nowhere").is_err());
    }

    #[test]
    fn filters_accumulate() {
        let uow = repository(sample_registry()).new_unit_of_work().unwrap();
        let query = uow
            .query("Person")
            .unwrap()
            .filter(expr::eq("name", "Ann"))
            .filter(expr::ge("age", 1i64));
        assert!(matches!(query.expression(), Some(Expression::And(ops)) if ops.len() == 2));
        assert_eq!(query.entity_type(), "Person");
    }
}
