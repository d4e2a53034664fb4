mod common;

use common::{
    aggregation, owner_with_pets, record, simple, AggregationEntity, Owner, Pet, PlainRecord,
    RecordHolder, SimpleEntity,
};
use repokit_core::{new_ref, InMemoryRepository, Repository, RepositoryRegistry};
use std::rc::Rc;

fn registered_repos() -> (
    Rc<RepositoryRegistry>,
    Rc<InMemoryRepository<SimpleEntity>>,
    Rc<InMemoryRepository<AggregationEntity>>,
) {
    let registry = RepositoryRegistry::new();
    let simples = InMemoryRepository::<SimpleEntity>::register(&registry).unwrap();
    let aggregations = InMemoryRepository::<AggregationEntity>::register(&registry).unwrap();
    (registry, simples, aggregations)
}

#[test]
fn to_one_reference_is_saved_through_its_repository() {
    let (_registry, simples, aggregations) = registered_repos();
    let aggregate = aggregation("Awesome aggregation");
    let target = simple("Awesome string");
    aggregate.borrow_mut().one_to_one = Some(target.clone());

    aggregations.save(&aggregate).unwrap();

    assert_eq!(aggregations.len(), 1);
    assert!(aggregations.contains(&aggregate));
    assert_eq!(simples.len(), 1);
    assert!(simples.contains(&target));
    assert_eq!(target.borrow().id, 1);
}

#[test]
fn removing_referenced_entity_leaves_owner_in_place() {
    let (_registry, simples, aggregations) = registered_repos();
    let aggregate = aggregation("Awesome aggregation");
    let target = simple("Awesome string");
    aggregate.borrow_mut().one_to_one = Some(target.clone());
    aggregations.save(&aggregate).unwrap();

    simples.remove(&target).unwrap();

    assert_eq!(aggregations.len(), 1);
    assert!(aggregations.contains(&aggregate));
    assert_eq!(simples.len(), 0);

    aggregate.borrow_mut().one_to_one = None;
    aggregations.save(&aggregate).unwrap();
    assert_eq!(simples.len(), 0);
}

#[test]
fn complete_many_to_many_web_saves_each_node_once() {
    let (_registry, _simples, aggregations) = registered_repos();
    const NODES: usize = 10;
    let nodes: Vec<_> = (0..NODES)
        .map(|i| aggregation(&format!("node {i}")))
        .collect();
    for from in &nodes {
        for to in &nodes {
            from.borrow_mut().links_to.push(to.clone());
            to.borrow_mut().links_from.push(from.clone());
        }
    }

    for node in &nodes {
        aggregations.save(node).unwrap();
    }

    assert_eq!(aggregations.len(), NODES);
    assert!(nodes.iter().all(|node| aggregations.contains(node)));
    let mut ids: Vec<i64> = nodes.iter().map(|node| node.borrow().id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=NODES as i64).collect::<Vec<_>>());
}

#[test]
fn saving_one_node_of_a_cycle_reaches_all_of_them() {
    let (_registry, _simples, aggregations) = registered_repos();
    let nodes: Vec<_> = (0..4).map(|i| aggregation(&format!("ring {i}"))).collect();
    for (position, node) in nodes.iter().enumerate() {
        let next = nodes[(position + 1) % nodes.len()].clone();
        node.borrow_mut().links_to.push(next);
    }
    nodes[0].borrow_mut().links_to.push(nodes[0].clone());

    aggregations.save(&nodes[2]).unwrap();

    assert_eq!(aggregations.len(), 4);
    assert_eq!(nodes[2].borrow().id, 1);
}

#[test]
fn one_to_many_children_are_saved_with_parent() {
    let (_registry, _simples, aggregations) = registered_repos();
    let parent = aggregation("Parent");
    for i in 0..10 {
        let child = aggregation(&format!("child {i}"));
        child.borrow_mut().parent = Some(parent.clone());
        parent.borrow_mut().children.push(child);
    }

    aggregations.save(&parent).unwrap();

    assert_eq!(aggregations.len(), 11);
    assert!(aggregations.contains(&parent));
    assert!(parent
        .borrow()
        .children
        .iter()
        .all(|child| aggregations.contains(child)));
}

#[test]
fn unregistered_related_type_is_skipped() {
    let registry = RepositoryRegistry::new();
    let aggregations = InMemoryRepository::<AggregationEntity>::register(&registry).unwrap();
    let aggregate = aggregation("lonely");
    let target = simple("not stored anywhere");
    aggregate.borrow_mut().one_to_one = Some(target.clone());

    aggregations.save(&aggregate).unwrap();

    assert_eq!(aggregations.len(), 1);
    assert_eq!(target.borrow().id, 0);
}

#[test]
fn standalone_repository_still_cascades_to_its_own_type() {
    let aggregations = InMemoryRepository::<AggregationEntity>::new();
    let parent = aggregation("Parent");
    let child = aggregation("child");
    parent.borrow_mut().children.push(child.clone());

    aggregations.save(&parent).unwrap();

    assert_eq!(aggregations.len(), 2);
    assert_eq!(child.borrow().id, 2);
}

#[test]
fn saving_owner_again_re_adds_removed_reference() {
    let (_registry, simples, aggregations) = registered_repos();
    let aggregate = aggregation("Awesome aggregation");
    let target = simple("Awesome string");
    aggregate.borrow_mut().one_to_one = Some(target.clone());
    aggregations.save(&aggregate).unwrap();

    simples.remove(&target).unwrap();
    assert!(simples.is_empty());

    aggregations.save(&aggregate).unwrap();

    assert_eq!(simples.len(), 1);
    assert!(simples.contains(&target));
    assert_eq!(aggregations.len(), 1);
}

#[test]
fn cycle_across_repositories_saves_each_entity_once() {
    let registry = RepositoryRegistry::new();
    let owners = InMemoryRepository::<Owner>::register(&registry).unwrap();
    let pets = InMemoryRepository::<Pet>::register(&registry).unwrap();
    let owner = owner_with_pets("Ada", &["Rex", "Tom"]);
    let first_pet = owner.borrow().pets[0].clone();
    let second_pet = owner.borrow().pets[1].clone();

    pets.save(&first_pet).unwrap();

    assert_eq!(owners.len(), 1);
    assert_eq!(pets.len(), 2);
    assert_eq!(first_pet.borrow().id, 1);
    assert_eq!(owner.borrow().id, 1);
    assert_eq!(second_pet.borrow().id, 2);

    owners.save(&owner).unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(pets.len(), 2);
}

#[test]
fn references_to_types_without_identity_are_not_cascaded() {
    let registry = RepositoryRegistry::new();
    let records = InMemoryRepository::<PlainRecord>::register(&registry).unwrap();
    let holders = InMemoryRepository::<RecordHolder>::register(&registry).unwrap();
    let holder = new_ref(RecordHolder {
        note: Some(record("single")),
        notes: vec![record("first"), record("second")],
        ..RecordHolder::default()
    });

    holders.save(&holder).unwrap();

    assert_eq!(holders.len(), 1);
    assert_eq!(holder.borrow().id, 1);
    assert!(records.is_empty());
}
