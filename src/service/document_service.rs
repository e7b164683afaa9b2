use super::hooks::{LifecycleHooks, NoHooks};
use crate::core::{DocError, FieldValue, Result, new_document_id};
use crate::model::{ChangeSet, EntityType, Instance};
use crate::schema::{Action, SchemaRegistry};
use crate::security::{Access, FieldMask, SecurityContext};
use crate::store::{FindOptions, StoreDriver, project};
use crate::validation::ValidationMethod;
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

/// Options for [`DocumentService::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Skip validation. Honored only for System contexts, and only when
    /// the registry config allows it.
    pub override_validation: bool,
}

impl UpdateOptions {
    pub fn override_validation() -> Self {
        Self {
            override_validation: true,
        }
    }
}

/// Persistence path for one document entity: access checks, field-level
/// security, validation and lifecycle hooks around a [`StoreDriver`].
pub struct DocumentService {
    entity: EntityType,
    driver: Arc<dyn StoreDriver>,
    collection: String,
    hooks: Arc<dyn LifecycleHooks>,
}

impl DocumentService {
    /// Service over the collection named after the entity.
    pub fn new(
        registry: &Arc<SchemaRegistry>,
        entity: &str,
        driver: Arc<dyn StoreDriver>,
    ) -> Result<Self> {
        let entity = registry.entity_type(entity)?;
        if !entity.definition().is_document() {
            return Err(DocError::Schema(format!(
                "{} is a structure and cannot be persisted on its own",
                entity.name()
            )));
        }

        let hooks = entity
            .definition()
            .lifecycle_hooks()
            .cloned()
            .unwrap_or_else(|| Arc::new(NoHooks) as Arc<dyn LifecycleHooks>);

        Ok(Self {
            collection: entity.name().to_string(),
            entity,
            driver,
            hooks,
        })
    }

    pub fn with_collection(mut self, collection: &str) -> Self {
        self.collection = collection.to_string();
        self
    }

    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Loads one document by id, secured for reading.
    pub async fn get(&self, context: &SecurityContext, id: &str) -> Result<Instance> {
        require_id(id)?;
        let query = self.scoped(context, Action::Read, json!({ "_id": id }))?;

        let raw = self
            .driver
            .find_one(&self.collection, &query, &self.read_options(context)?)
            .await?
            .ok_or_else(|| DocError::NotFound(format!("{} {}", self.entity.name(), id)))?;

        self.secured(context, raw)
    }

    pub async fn find(&self, context: &SecurityContext, query: JsonValue) -> Result<Vec<Instance>> {
        let query = self.scoped(context, Action::Read, normalize_query(query)?)?;
        let docs = self
            .driver
            .find(&self.collection, &query, &self.read_options(context)?)
            .await?;

        docs.into_iter().map(|raw| self.secured(context, raw)).collect()
    }

    pub async fn count(&self, context: &SecurityContext, query: JsonValue) -> Result<usize> {
        let query = self.scoped(context, Action::Read, normalize_query(query)?)?;
        self.driver.count(&self.collection, &query).await
    }

    /// Creates a document from raw data and returns it as stored.
    pub async fn create(&self, context: &SecurityContext, raw: JsonValue) -> Result<Instance> {
        let def = self.entity.definition();
        let candidate = self.entity.instantiate(raw)?;

        if def.has_group_security() && !self.rule_grants(context, Action::Create) {
            // Only groups the actor may create in survive.
            let allowed = self.entity.valid_groups_for(Action::Create, context);
            let kept: Vec<JsonValue> = candidate
                .groups()
                .into_iter()
                .filter(|group| allowed.contains(group))
                .map(JsonValue::String)
                .collect();
            candidate.set("_groups", JsonValue::Array(kept))?;
        }

        let target = def.has_group_security().then_some(&candidate);
        if self.entity.can_access(context, Action::Create, target) != Access::Allowed {
            warn!(
                "create denied: entity='{}' user='{}'",
                self.entity.name(),
                context.user_id().unwrap_or("anonymous")
            );
            return Err(DocError::not_authorized());
        }

        self.entity.secure_by_action(context, &candidate, Action::Create)?;

        self.run_validation(context, &candidate, ValidationMethod::Create, false)
            .await?;

        let now = Utc::now().to_rfc3339();
        let actor = context.user_id().map(str::to_string);
        if candidate.id().is_none() {
            candidate.set("_id", new_document_id())?;
        }
        candidate.set("_created", now.as_str())?;
        candidate.set("_updated", now.as_str())?;
        // Client-supplied authorship never survives, even without an actor.
        let author = actor.as_deref().map_or(FieldValue::Null, FieldValue::from);
        candidate.set("_createdBy", author.clone())?;
        candidate.set("_updatedBy", author)?;
        if let Some(actor) = &actor {
            if def.has_owner_security() && candidate.owner().is_none() {
                candidate.set("_owner", actor.as_str())?;
            }
        }

        self.hooks.before_create(&candidate, context).await?;
        self.hooks.before_save(&candidate, context).await?;

        let stored = self
            .driver
            .insert(&self.collection, candidate.to_json())
            .await?;
        let created = self.entity.instantiate(stored)?;

        self.hooks.after_save(&created, context).await?;
        self.hooks.after_create(&created, context).await?;

        info!(
            "created {} {}",
            self.entity.name(),
            created.id().unwrap_or_default()
        );
        Ok(created)
    }

    /// Applies an UpdateSet to a stored document.
    ///
    /// Fields the actor may not update are dropped from `update` without
    /// error. Only the resulting delta is sent to the store.
    pub async fn update(
        &self,
        context: &SecurityContext,
        id: &str,
        update: &ChangeSet,
        options: UpdateOptions,
    ) -> Result<Instance> {
        require_id(id)?;
        let query = self.scoped(context, Action::Update, json!({ "_id": id }))?;

        let raw = self
            .driver
            .find_one(&self.collection, &query, &FindOptions::new())
            .await?
            .ok_or_else(|| DocError::NotFound(format!("{} {}", self.entity.name(), id)))?;
        let doc = self.entity.instantiate(raw)?;

        if self.entity.can_access(context, Action::Update, Some(&doc)) != Access::Allowed {
            warn!(
                "update denied: entity='{}' id='{}' user='{}'",
                self.entity.name(),
                id,
                context.user_id().unwrap_or("anonymous")
            );
            return Err(DocError::not_authorized());
        }

        let roles = self.entity.resolve_roles(context, Some(&doc));
        self.entity.patch(context, &doc, update, Some(&roles))?;

        self.run_validation(context, &doc, ValidationMethod::Update, options.override_validation)
            .await?;

        doc.set("_updated", Utc::now().to_rfc3339())?;
        doc.set("_updatedBy", context.user_id().map_or(FieldValue::Null, FieldValue::from))?;

        self.hooks.before_update(&doc, context).await?;
        self.hooks.before_save(&doc, context).await?;

        let delta = self.entity.delta(&doc)?;
        let operators = self.entity.query_from_update_set(&delta, None)?;
        debug!(
            "update {} {}: {}",
            self.entity.name(),
            id,
            operators.to_json()
        );

        let stored = self
            .driver
            .find_one_and_update(&self.collection, &json!({ "_id": id }), &operators, &FindOptions::new())
            .await?
            .ok_or_else(|| DocError::NotFound(format!("{} {}", self.entity.name(), id)))?;
        let updated = self.secured(context, stored)?;

        self.hooks.after_save(&updated, context).await?;
        self.hooks.after_update(&updated, context).await?;

        info!("updated {} {}", self.entity.name(), id);
        Ok(updated)
    }

    /// Deletes a document and returns it as it was, secured for reading.
    pub async fn remove(&self, context: &SecurityContext, id: &str) -> Result<Instance> {
        require_id(id)?;
        let query = self.scoped(context, Action::Remove, json!({ "_id": id }))?;

        let raw = self
            .driver
            .find_one(&self.collection, &query, &FindOptions::new())
            .await?
            .ok_or_else(|| DocError::NotFound(format!("{} {}", self.entity.name(), id)))?;
        let doc = self.entity.instantiate(raw)?;

        self.hooks.before_remove(&doc, context).await?;

        let removed = self
            .driver
            .find_one_and_delete(&self.collection, &query)
            .await?
            .ok_or_else(|| DocError::NotFound(format!("{} {}", self.entity.name(), id)))?;
        let removed = self.secured(context, removed)?;

        self.hooks.after_remove(&removed, context).await?;

        info!("removed {} {}", self.entity.name(), id);
        Ok(removed)
    }

    /// Whether the actor's own roles satisfy the entity rule for `action`.
    fn rule_grants(&self, context: &SecurityContext, action: Action) -> bool {
        let roles = self.entity.resolve_roles(context, None);
        self.entity.definition().security().allows(&roles, action)
    }

    /// Narrows `query` to documents the actor owns or shares a group with
    /// when entity-level access depends on the document.
    fn scoped(&self, context: &SecurityContext, action: Action, query: JsonValue) -> Result<JsonValue> {
        match self.entity.can_access(context, action, None) {
            Access::Allowed => Ok(query),
            Access::Denied => {
                warn!(
                    "{} denied: entity='{}' user='{}'",
                    action.as_str(),
                    self.entity.name(),
                    context.user_id().unwrap_or("anonymous")
                );
                Err(DocError::not_authorized())
            }
            Access::Unknown => {
                let def = self.entity.definition();
                let mut scopes = Vec::new();

                if def.has_owner_security() {
                    if let Some(user) = context.user_id() {
                        scopes.push(json!({ "_owner": user }));
                    }
                }
                if def.has_group_security() {
                    let groups = self.entity.valid_groups_for(action, context);
                    if !groups.is_empty() {
                        scopes.push(json!({ "_groups": { "$in": groups } }));
                    }
                }

                if scopes.is_empty() {
                    return Err(DocError::not_authorized());
                }
                Ok(json!({ "$and": [query, { "$or": scopes }] }))
            }
        }
    }

    /// Projection for reads. When roles can depend on the document the
    /// mask is computed per document in `secured` instead.
    fn read_options(&self, context: &SecurityContext) -> Result<FindOptions> {
        if self.roles_depend_on_target() {
            return Ok(FindOptions::new());
        }
        Ok(FindOptions::new().projection(self.entity.secure_read(context, None, None)?))
    }

    fn roles_depend_on_target(&self) -> bool {
        let def = self.entity.definition();
        def.has_owner_security() || def.has_group_security()
    }

    /// Projects a stored document down to what the actor may read. Store
    /// results from writes carry no projection, so this always applies.
    fn secured(&self, context: &SecurityContext, raw: JsonValue) -> Result<Instance> {
        let target = if self.roles_depend_on_target() {
            Some(self.entity.instantiate(raw.clone())?)
        } else {
            None
        };
        let mask: FieldMask = self.entity.secure_read(context, None, target.as_ref())?;
        self.entity.instantiate(project(&raw, &mask))
    }

    async fn run_validation(
        &self,
        context: &SecurityContext,
        instance: &Instance,
        method: ValidationMethod,
        override_requested: bool,
    ) -> Result<()> {
        self.hooks.before_validate(instance, context).await?;

        let skip = override_requested
            && self.entity.registry().config().override_validation_for_system
            && self.entity.resolve_roles(context, None).is_system();

        if skip {
            debug!("validation skipped for {} by System override", self.entity.name());
            return self.hooks.after_validate(instance, context, None).await;
        }

        let report = instance.validate(method)?;
        self.hooks.after_validate(instance, context, Some(&report)).await
    }
}

fn require_id(id: &str) -> Result<()> {
    if id.is_empty() {
        Err(DocError::MissingParameters(vec!["id".to_string()]))
    } else {
        Ok(())
    }
}

fn normalize_query(query: JsonValue) -> Result<JsonValue> {
    match query {
        JsonValue::Null => Ok(json!({})),
        JsonValue::Object(_) => Ok(query),
        _ => Err(DocError::MissingParameters(vec!["query".to_string()])),
    }
}

impl std::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentService")
            .field("entity", &self.entity.name())
            .field("collection", &self.collection)
            .finish()
    }
}
