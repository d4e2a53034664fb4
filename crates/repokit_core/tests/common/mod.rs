#![allow(dead_code)]

use once_cell::sync::Lazy;
use repokit_core::mapper::{Mapping, ViewModel, ViewModelSchema};
use repokit_core::{new_ref, Entity, EntityRef, EntitySchema};

#[derive(Debug, Default)]
pub struct SimpleEntity {
    pub id: i64,
    pub name: String,
    /// Days since the unix epoch.
    pub birthday: i64,
    pub marriage: i64,
}

impl Entity for SimpleEntity {
    fn schema() -> &'static EntitySchema<Self> {
        static SCHEMA: Lazy<EntitySchema<SimpleEntity>> = Lazy::new(|| {
            EntitySchema::<SimpleEntity>::builder("SimpleEntity")
                .identity("id", |e| &e.id, |e| &mut e.id)
                .field("name", |e| &e.name, |e| &mut e.name)
                .field("birthday", |e| &e.birthday, |e| &mut e.birthday)
                .field("marriage", |e| &e.marriage, |e| &mut e.marriage)
                .build()
        });
        &SCHEMA
    }
}

/// Entity exercising every association shape, including self references.
#[derive(Default)]
pub struct AggregationEntity {
    pub id: i64,
    pub name: String,
    pub one_to_one: Option<EntityRef<SimpleEntity>>,
    pub parent: Option<EntityRef<AggregationEntity>>,
    pub children: Vec<EntityRef<AggregationEntity>>,
    pub links_to: Vec<EntityRef<AggregationEntity>>,
    pub links_from: Vec<EntityRef<AggregationEntity>>,
}

impl Entity for AggregationEntity {
    fn schema() -> &'static EntitySchema<Self> {
        static SCHEMA: Lazy<EntitySchema<AggregationEntity>> = Lazy::new(|| {
            EntitySchema::<AggregationEntity>::builder("AggregationEntity")
                .identity("id", |e| &e.id, |e| &mut e.id)
                .field("name", |e| &e.name, |e| &mut e.name)
                .field("one_to_one", |e| &e.one_to_one, |e| &mut e.one_to_one)
                .field("parent", |e| &e.parent, |e| &mut e.parent)
                .field("children", |e| &e.children, |e| &mut e.children)
                .field("links_to", |e| &e.links_to, |e| &mut e.links_to)
                .field("links_from", |e| &e.links_from, |e| &mut e.links_from)
                .build()
        });
        &SCHEMA
    }
}

#[derive(Default)]
pub struct AggregateEntity {
    pub id: i64,
    pub name: String,
    pub entity_from_dictionary: Option<EntityRef<SimpleEntity>>,
}

impl Entity for AggregateEntity {
    fn schema() -> &'static EntitySchema<Self> {
        static SCHEMA: Lazy<EntitySchema<AggregateEntity>> = Lazy::new(|| {
            EntitySchema::<AggregateEntity>::builder("AggregateEntity")
                .identity("id", |e| &e.id, |e| &mut e.id)
                .field("name", |e| &e.name, |e| &mut e.name)
                .field(
                    "entity_from_dictionary",
                    |e| &e.entity_from_dictionary,
                    |e| &mut e.entity_from_dictionary,
                )
                .build()
        });
        &SCHEMA
    }
}

/// Record type without an identity field.
#[derive(Default)]
pub struct PlainRecord {
    pub label: String,
}

impl Entity for PlainRecord {
    fn schema() -> &'static EntitySchema<Self> {
        static SCHEMA: Lazy<EntitySchema<PlainRecord>> = Lazy::new(|| {
            EntitySchema::<PlainRecord>::builder("PlainRecord")
                .field("label", |e| &e.label, |e| &mut e.label)
                .build()
        });
        &SCHEMA
    }
}

/// Entity whose references point at a type without an identity field.
#[derive(Default)]
pub struct RecordHolder {
    pub id: i64,
    pub note: Option<EntityRef<PlainRecord>>,
    pub notes: Vec<EntityRef<PlainRecord>>,
}

impl Entity for RecordHolder {
    fn schema() -> &'static EntitySchema<Self> {
        static SCHEMA: Lazy<EntitySchema<RecordHolder>> = Lazy::new(|| {
            EntitySchema::<RecordHolder>::builder("RecordHolder")
                .identity("id", |e| &e.id, |e| &mut e.id)
                .field("note", |e| &e.note, |e| &mut e.note)
                .field("notes", |e| &e.notes, |e| &mut e.notes)
                .build()
        });
        &SCHEMA
    }
}

/// One side of a reference cycle that crosses entity types.
#[derive(Default)]
pub struct Owner {
    pub id: i64,
    pub name: String,
    pub pets: Vec<EntityRef<Pet>>,
}

impl Entity for Owner {
    fn schema() -> &'static EntitySchema<Self> {
        static SCHEMA: Lazy<EntitySchema<Owner>> = Lazy::new(|| {
            EntitySchema::<Owner>::builder("Owner")
                .identity("id", |e| &e.id, |e| &mut e.id)
                .field("name", |e| &e.name, |e| &mut e.name)
                .field("pets", |e| &e.pets, |e| &mut e.pets)
                .build()
        });
        &SCHEMA
    }
}

#[derive(Default)]
pub struct Pet {
    pub id: i64,
    pub name: String,
    pub owner: Option<EntityRef<Owner>>,
}

impl Entity for Pet {
    fn schema() -> &'static EntitySchema<Self> {
        static SCHEMA: Lazy<EntitySchema<Pet>> = Lazy::new(|| {
            EntitySchema::<Pet>::builder("Pet")
                .identity("id", |e| &e.id, |e| &mut e.id)
                .field("name", |e| &e.name, |e| &mut e.name)
                .field("owner", |e| &e.owner, |e| &mut e.owner)
                .build()
        });
        &SCHEMA
    }
}

#[derive(Debug, Default)]
pub struct SimpleViewModel {
    pub name: String,
    pub comment: Option<String>,
    pub birthday: i64,
    pub wedding: i64,
}

impl ViewModel for SimpleViewModel {
    fn schema() -> &'static ViewModelSchema<Self> {
        static SCHEMA: Lazy<ViewModelSchema<SimpleViewModel>> = Lazy::new(|| {
            ViewModelSchema::<SimpleViewModel>::builder("SimpleViewModel")
                .field("name", |vm| &vm.name, |vm| &mut vm.name)
                .field("comment", |vm| &vm.comment, |vm| &mut vm.comment)
                .field("birthday", |vm| &vm.birthday, |vm| &mut vm.birthday)
                .mapped(
                    "wedding",
                    Mapping::rename("marriage"),
                    |vm| &vm.wedding,
                    |vm| &mut vm.wedding,
                )
                .build()
        });
        &SCHEMA
    }
}

#[derive(Debug, Default)]
pub struct AggregateViewModel {
    pub name: String,
    pub value_from_dictionary: Option<String>,
}

impl ViewModel for AggregateViewModel {
    fn schema() -> &'static ViewModelSchema<Self> {
        static SCHEMA: Lazy<ViewModelSchema<AggregateViewModel>> = Lazy::new(|| {
            ViewModelSchema::<AggregateViewModel>::builder("AggregateViewModel")
                .field("name", |vm| &vm.name, |vm| &mut vm.name)
                .mapped(
                    "value_from_dictionary",
                    Mapping::rename("entity_from_dictionary").related::<SimpleEntity>("name"),
                    |vm| &vm.value_from_dictionary,
                    |vm| &mut vm.value_from_dictionary,
                )
                .build()
        });
        &SCHEMA
    }
}

pub fn simple(name: &str) -> EntityRef<SimpleEntity> {
    new_ref(SimpleEntity {
        name: name.to_string(),
        ..SimpleEntity::default()
    })
}

pub fn aggregation(name: &str) -> EntityRef<AggregationEntity> {
    new_ref(AggregationEntity {
        name: name.to_string(),
        ..AggregationEntity::default()
    })
}

pub fn record(label: &str) -> EntityRef<PlainRecord> {
    new_ref(PlainRecord {
        label: label.to_string(),
    })
}

/// Owner with `pet_names.len()` pets, each pointing back at the owner.
pub fn owner_with_pets(name: &str, pet_names: &[&str]) -> EntityRef<Owner> {
    let owner = new_ref(Owner {
        name: name.to_string(),
        ..Owner::default()
    });
    for pet_name in pet_names {
        let pet = new_ref(Pet {
            name: pet_name.to_string(),
            owner: Some(owner.clone()),
            ..Pet::default()
        });
        owner.borrow_mut().pets.push(pet);
    }
    owner
}
