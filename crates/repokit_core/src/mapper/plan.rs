//! Validated mapping plans between one view-model and one entity type.
//!
//! # Responsibility
//! - Resolve view-model fields to entity fields once and reject bad metadata.
//! - Execute `fill` (entity → view model) and `update` (view model → entity).
//!
//! # Invariants
//! - Entity fields are matched by name, ignoring ASCII case.
//! - Fields without explicit metadata and without a matching entity field
//!   are not part of the plan.
//! - `update` resolves related mappings by lookup-or-create through the
//!   registry; created instances are not saved.

use crate::mapper::view_model::{RelatedMapping, ViewModel};
use crate::mapper::{MapError, MapResult};
use crate::model::entity::{AnyEntityRef, Entity};
use crate::model::value::{FieldKind, Value};
use crate::repo::registry::RepositoryRegistry;
use log::debug;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

#[derive(Debug, Clone, Copy)]
struct PlanStep {
    view_field: usize,
    entity_field: usize,
    related: Option<RelatedMapping>,
}

/// Field correspondence between view model `V` and entity `E`.
pub struct MappingPlan<V, E> {
    steps: Vec<PlanStep>,
    _types: PhantomData<fn() -> (V, E)>,
}

impl<V: ViewModel, E: Entity> MappingPlan<V, E> {
    /// Resolves and validates every mapped field.
    pub fn build() -> MapResult<Self> {
        let view_schema = V::schema();
        let entity_schema = E::schema();
        let mut steps = Vec::new();

        for (view_field, field) in view_schema.fields().iter().enumerate() {
            let mapping = field.mapping();
            let target_name = mapping.entity_field(field.name());
            let Some(entity_field) = entity_schema.position_ignore_case(target_name) else {
                if mapping.is_explicit() {
                    return Err(MapError::UnknownEntityField {
                        view_model: view_schema.name(),
                        entity: entity_schema.name(),
                        field: target_name,
                    });
                }
                continue;
            };

            let target = &entity_schema.fields()[entity_field];
            match mapping.related_mapping() {
                Some(related) => {
                    validate_related(
                        view_schema.name(),
                        field.name(),
                        target.kind(),
                        target.name(),
                        related,
                    )?;
                    if field.kind().is_association() {
                        return Err(MapError::IncompatibleField {
                            view_model: view_schema.name(),
                            field: field.name(),
                            entity_field: target.name(),
                        });
                    }
                }
                None => {
                    let either_association =
                        field.kind().is_association() || target.kind().is_association();
                    if either_association && field.kind() != target.kind() {
                        return Err(MapError::IncompatibleField {
                            view_model: view_schema.name(),
                            field: field.name(),
                            entity_field: target.name(),
                        });
                    }
                }
            }

            steps.push(PlanStep {
                view_field,
                entity_field,
                related: mapping.related_mapping(),
            });
        }

        debug!(
            "event=plan_build module=mapper status=ok view_model={} entity={} steps={}",
            view_schema.name(),
            entity_schema.name(),
            steps.len()
        );
        Ok(Self {
            steps,
            _types: PhantomData,
        })
    }

    /// Number of mapped fields.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Copies entity values into the view model.
    ///
    /// Related mappings read the key field of the referenced instance; a null
    /// reference or a null value leaves the view-model field untouched.
    pub fn fill(&self, view_model: &mut V, entity: &E) -> MapResult<()> {
        let view_schema = V::schema();
        let entity_schema = E::schema();

        for step in &self.steps {
            let mut value = entity_schema.fields()[step.entity_field].read(entity);
            if let Some(related) = step.related {
                value = match value {
                    Value::Entity(target) => target.field_value(related.key_field())?,
                    _ => Value::Null,
                };
            }
            if value.is_null() {
                continue;
            }
            view_schema.fields()[step.view_field].write(view_schema.name(), view_model, value)?;
        }
        Ok(())
    }

    /// Copies non-null view-model values onto the entity.
    pub fn update(
        &self,
        view_model: &V,
        entity: &mut E,
        registry: &RepositoryRegistry,
    ) -> MapResult<()> {
        let view_schema = V::schema();
        let entity_schema = E::schema();

        for step in &self.steps {
            let value = view_schema.fields()[step.view_field].read(view_model);
            if value.is_null() {
                continue;
            }
            let value = match step.related {
                Some(related) => Value::Entity(load_or_create(related, value, registry)?),
                None => value,
            };
            entity_schema.fields()[step.entity_field].write(entity_schema.name(), entity, value)?;
        }
        Ok(())
    }
}

fn validate_related(
    view_model: &'static str,
    field: &'static str,
    entity_kind: FieldKind,
    entity_field: &'static str,
    related: RelatedMapping,
) -> MapResult<()> {
    let FieldKind::ToOne(referenced) = entity_kind else {
        return Err(MapError::NotAnAssociation {
            view_model,
            field,
            entity_field,
        });
    };
    if referenced != related.related_type() {
        return Err(MapError::RelatedTypeMismatch {
            view_model,
            field,
            expected: related.related_type().name(),
            found: referenced.name(),
        });
    }
    match referenced.schema().field_kind(related.key_field()) {
        Some(FieldKind::Scalar) => Ok(()),
        _ => Err(MapError::UnknownRelatedField {
            related: referenced.name(),
            field: related.key_field(),
        }),
    }
}

/// Finds the related instance whose key field equals `key`, or creates a
/// blank one stamped with `key`.
fn load_or_create(
    related: RelatedMapping,
    key: Value,
    registry: &RepositoryRegistry,
) -> MapResult<AnyEntityRef> {
    let related_type = related.related_type();
    let repository = registry.erased(related_type).ok_or_else(|| {
        MapError::Configuration(format!(
            "no repository registered for related type `{}`",
            related_type.name()
        ))
    })?;

    if let Some(found) = repository.find_by_field(related.key_field(), &key)? {
        return Ok(found);
    }

    let created = repository.create_erased();
    created.set_field_value(related.key_field(), key)?;
    debug!(
        "event=related_create module=mapper status=ok related={} key_field={}",
        related_type.name(),
        related.key_field()
    );
    Ok(created)
}

thread_local! {
    static PLANS: RefCell<HashMap<(TypeId, TypeId), Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Returns the cached plan for `(V, E)`, building it on first use.
///
/// Failed builds are not cached.
fn cached_plan<V: ViewModel, E: Entity>() -> MapResult<Rc<MappingPlan<V, E>>> {
    let key = (TypeId::of::<V>(), TypeId::of::<E>());
    let cached = PLANS.with(|plans| plans.borrow().get(&key).cloned());
    if let Some(plan) = cached.and_then(|plan| plan.downcast::<MappingPlan<V, E>>().ok()) {
        return Ok(plan);
    }

    let plan = Rc::new(MappingPlan::<V, E>::build()?);
    PLANS.with(|plans| {
        plans
            .borrow_mut()
            .insert(key, Rc::clone(&plan) as Rc<dyn Any>)
    });
    Ok(plan)
}

/// Fills `view_model` from `entity` through the cached `(V, E)` plan.
pub fn fill_from_entity<V: ViewModel, E: Entity>(view_model: &mut V, entity: &E) -> MapResult<()> {
    cached_plan::<V, E>()?.fill(view_model, entity)
}

/// Updates `entity` from `view_model` through the cached `(V, E)` plan.
///
/// Related mappings look up the referenced instance through `registry` and
/// create an unsaved one when no stored instance matches.
pub fn update_entity_from_view_model<V: ViewModel, E: Entity>(
    view_model: &V,
    entity: &mut E,
    registry: &RepositoryRegistry,
) -> MapResult<()> {
    cached_plan::<V, E>()?.update(view_model, entity, registry)
}
