use super::change::ChangeSet;
use super::instance::Instance;
use crate::core::{DocError, Result};
use crate::diff::{self, UpdateOperators};
use crate::schema::{Action, EntityDefinition, SchemaRegistry};
use crate::security::{self, Access, FieldMask, RoleSet, SecurityContext};
use crate::validation::{ValidationMethod, ValidationReport};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Engine operations bound to one registered entity.
#[derive(Clone)]
pub struct EntityType {
    registry: Arc<SchemaRegistry>,
    def: Arc<EntityDefinition>,
}

impl EntityType {
    pub(crate) fn new(registry: Arc<SchemaRegistry>, def: Arc<EntityDefinition>) -> Self {
        Self { registry, def }
    }

    pub fn name(&self) -> &str {
        self.def.name()
    }

    pub fn definition(&self) -> &Arc<EntityDefinition> {
        &self.def
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn instantiate(&self, raw: JsonValue) -> Result<Instance> {
        Instance::new(&self.registry, self.def.name(), raw)
    }

    pub fn instantiate_with_locale(&self, raw: JsonValue, locale: &str) -> Result<Instance> {
        Instance::with_locale(&self.registry, self.def.name(), raw, locale)
    }

    pub fn resolve_roles(&self, context: &SecurityContext, target: Option<&Instance>) -> RoleSet {
        security::resolve_roles(&self.def, context, target)
    }

    pub fn can_access(
        &self,
        context: &SecurityContext,
        action: Action,
        target: Option<&Instance>,
    ) -> Access {
        security::can_access(&self.def, context, action, target)
    }

    pub fn group_roles(&self, action: Action) -> Vec<String> {
        security::group_roles(&self.def, action)
    }

    pub fn valid_groups_for(&self, action: Action, context: &SecurityContext) -> Vec<String> {
        security::valid_groups_for(&self.def, action, context)
    }

    pub fn secure_read(
        &self,
        context: &SecurityContext,
        requested: Option<&FieldMask>,
        target: Option<&Instance>,
    ) -> Result<FieldMask> {
        security::secure_read(&self.registry, &self.def, context, requested, target)
    }

    pub fn secure_by_action(
        &self,
        context: &SecurityContext,
        instance: &Instance,
        action: Action,
    ) -> Result<()> {
        self.check_instance(instance)?;
        security::secure_by_action(context, instance, action);
        Ok(())
    }

    pub fn delta(&self, instance: &Instance) -> Result<ChangeSet> {
        self.check_instance(instance)?;
        Ok(instance.delta())
    }

    pub fn patch(
        &self,
        context: &SecurityContext,
        instance: &Instance,
        update: &ChangeSet,
        roles: Option<&RoleSet>,
    ) -> Result<()> {
        self.check_instance(instance)?;
        diff::patch(context, instance, update, roles)
    }

    /// Store update operators for `update`, with paths under `prefix`.
    pub fn query_from_update_set(
        &self,
        update: &ChangeSet,
        prefix: Option<&str>,
    ) -> Result<UpdateOperators> {
        diff::query_from_update_set(&self.registry, &self.def, update, prefix.unwrap_or(""))
    }

    pub fn validate(&self, instance: &Instance, method: ValidationMethod) -> Result<ValidationReport> {
        self.check_instance(instance)?;
        instance.validate(method)
    }

    fn check_instance(&self, instance: &Instance) -> Result<()> {
        if self.registry.is_kind_of(instance.entity_name(), self.def.name()) {
            Ok(())
        } else {
            Err(DocError::TypeMismatch(format!(
                "expected an instance of {}, got {}",
                self.def.name(),
                instance.entity_name()
            )))
        }
    }
}

impl std::fmt::Debug for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntityType").field(&self.def.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyDefinition;
    use serde_json::json;

    #[test]
    fn test_rejects_foreign_instance() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(EntityDefinition::document("Car").property(PropertyDefinition::string("make")))
            .unwrap();
        registry
            .register(EntityDefinition::document("Boat").property(PropertyDefinition::string("make")))
            .unwrap();
        let registry = Arc::new(registry);

        let cars = registry.entity_type("Car").unwrap();
        let boat = Instance::new(&registry, "Boat", json!({"make": "X"})).unwrap();
        assert!(matches!(cars.delta(&boat), Err(DocError::TypeMismatch(_))));

        let car = cars.instantiate(json!({"make": "Volvo"})).unwrap();
        car.set("make", "Saab").unwrap();
        let ops = cars.query_from_update_set(&cars.delta(&car).unwrap(), None).unwrap();
        assert_eq!(ops.to_json()["$set"], json!({"make": "Saab"}));
    }
}
