//! Schema builder: merges module declarations into resolved entities.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use super::catalog::CORE_META;
use super::entity::Entity;
use super::field::{EntityField, FieldScope, FieldTarget};
use super::field_type::FieldType;
use super::raw::{validate_name, Module, RawEntry};
use super::registry::ModuleInfo;
use crate::error::{Error, Result};

/// What type resolution needs to know about a candidate target entity.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    /// Whether the entity is embedable.
    pub embedable: bool,
    /// Lowercase logical-key field names, sorted.
    pub logical_key: Vec<String>,
}

/// Output of [`SchemaBuilder::build`].
#[derive(Debug)]
pub struct BuiltSchema {
    /// Resolved entities, sorted by name.
    pub entities: Vec<Entity>,
    /// Modules in load order.
    pub modules: Vec<ModuleInfo>,
}

/// A declaration merged across modules.
#[derive(Debug, Clone)]
struct MergedDecl {
    name: String,
    module: String,
    embedable: bool,
    one_record: bool,
    tree: bool,
    entries: Vec<(RawEntry, String)>,
    implements: Vec<String>,
    default_record: Option<serde_json::Map<String, serde_json::Value>>,
}

impl MergedDecl {
    fn logical_key(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(entry, _)| entry.is_logical_key)
            .map(|(entry, _)| entry.name.to_lowercase())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Ordered name-keyed collection of merged declarations.
#[derive(Debug, Default)]
struct Declarations {
    items: Vec<MergedDecl>,
    index: HashMap<String, usize>,
}

impl Declarations {
    fn get(&self, name: &str) -> Option<&MergedDecl> {
        self.index
            .get(&name.to_uppercase())
            .map(|&idx| &self.items[idx])
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut MergedDecl> {
        match self.index.get(&name.to_uppercase()) {
            Some(&idx) => Some(&mut self.items[idx]),
            None => None,
        }
    }

    fn merge(&mut self, module: &str, raw: &super::raw::RawEntity) -> Result<()> {
        let name = raw.name.to_uppercase();
        let entries = raw
            .entries
            .iter()
            .map(|e| (e.clone(), module.to_string()));
        let implements = raw.implements.iter().map(|i| i.to_uppercase());

        if let Some(existing) = self.get_mut(&name) {
            if existing.embedable != raw.embedable {
                return Err(Error::InvalidSchema {
                    entity: name,
                    reason: format!(
                        "module {module} redeclares the entity with a different embedable flag"
                    ),
                });
            }
            existing.one_record |= raw.one_record;
            existing.tree |= raw.tree;
            existing.entries.extend(entries);
            for interface in implements {
                if !existing.implements.contains(&interface) {
                    existing.implements.push(interface);
                }
            }
            return Ok(());
        }

        self.index.insert(name.clone(), self.items.len());
        self.items.push(MergedDecl {
            name,
            module: module.to_string(),
            embedable: raw.embedable,
            one_record: raw.one_record,
            tree: raw.tree,
            entries: entries.collect(),
            implements: implements.collect(),
            default_record: None,
        });
        Ok(())
    }
}

/// Builds the entity set from module declarations.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    modules: Vec<Module>,
}

impl SchemaBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module.
    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Add modules.
    pub fn with_modules(mut self, modules: impl IntoIterator<Item = Module>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Merge declarations and resolve every entity.
    pub fn build(&self) -> Result<BuiltSchema> {
        let mut modules: Vec<&Module> = self.modules.iter().collect();
        modules.sort_by_key(|m| m.order);

        let mut interfaces = Declarations::default();
        let mut entities = Declarations::default();

        for module in &modules {
            let module_name = module.name.to_uppercase();
            for raw in &module.schema.interfaces {
                validate_name(&raw.name)?;
                interfaces.merge(&module_name, raw)?;
            }
            for raw in &module.schema.entities {
                validate_name(&raw.name)?;
                for entry in &raw.entries {
                    validate_name(&entry.name)?;
                }
                if raw.embedable && raw.one_record {
                    return Err(Error::InvalidSchema {
                        entity: raw.name.clone(),
                        reason: "a single record entity cannot be embedable".to_string(),
                    });
                }
                entities.merge(&module_name, raw)?;
            }
        }

        for module in &modules {
            for records in &module.records.entities {
                let Some(template) = &records.default_record else {
                    continue;
                };
                match entities.get_mut(&records.entity) {
                    Some(decl) => decl.default_record = Some(template.clone()),
                    None => warn!(
                        module = %module.name,
                        entity = %records.entity,
                        "default record for unknown entity ignored"
                    ),
                }
            }
        }

        let core_meta = interfaces
            .get(CORE_META)
            .ok_or_else(|| Error::MissingInterface {
                interface: CORE_META.to_string(),
            })?
            .clone();

        // Target information includes the keys entities inherit from interfaces.
        let mut targets: HashMap<String, TargetInfo> = HashMap::new();
        for decl in &entities.items {
            let mut logical_key = decl.logical_key();
            for interface in &decl.implements {
                if let Some(iface) = interfaces.get(interface) {
                    logical_key.extend(iface.logical_key());
                }
            }
            logical_key.sort();
            logical_key.dedup();
            targets.insert(
                decl.name.clone(),
                TargetInfo {
                    embedable: decl.embedable,
                    logical_key,
                },
            );
        }
        let lookup = |name: &str| targets.get(&name.to_uppercase()).cloned();

        let mut built = Vec::with_capacity(entities.items.len());
        for decl in &entities.items {
            let entity = build_entity(decl, &core_meta, &interfaces, &lookup)?;
            debug!(
                entity = %entity.name(),
                module = %entity.module(),
                fields = entity.fields().count(),
                "entity resolved"
            );
            built.push(entity);
        }

        check_embedding_cycles(&built)?;
        built.sort_by(|a, b| a.name().cmp(b.name()));

        info!(
            entities = built.len(),
            modules = modules.len(),
            "schema built"
        );

        Ok(BuiltSchema {
            entities: built,
            modules: modules
                .iter()
                .map(|m| ModuleInfo {
                    name: m.name.to_uppercase(),
                    editable: m.editable,
                    order: m.order,
                })
                .collect(),
        })
    }
}

fn build_entity(
    decl: &MergedDecl,
    core_meta: &MergedDecl,
    interfaces: &Declarations,
    lookup: &dyn Fn(&str) -> Option<TargetInfo>,
) -> Result<Entity> {
    let mut entity = Entity::new(&decl.name, decl.module.clone())
        .with_embedable(decl.embedable)
        .with_one_record(decl.one_record)
        .with_tree(decl.tree)
        .with_default_record(decl.default_record.clone());
    let mut seen: HashSet<String> = HashSet::new();

    for (entry, _) in &core_meta.entries {
        let field = build_field(
            &decl.name,
            entry,
            FieldScope::Meta,
            &core_meta.module,
            Some(CORE_META),
            lookup,
        )?;
        seen.insert(field.key());
        entity = entity.with_field(field);
    }

    for interface_name in &decl.implements {
        let interface = interfaces
            .get(interface_name)
            .ok_or_else(|| Error::MissingInterface {
                interface: interface_name.clone(),
            })?;
        for (entry, module) in &interface.entries {
            let field = build_field(
                &decl.name,
                entry,
                FieldScope::Data,
                module,
                Some(&interface.name),
                lookup,
            )?;
            if !seen.insert(field.key()) {
                return Err(duplicate_field(&decl.name, entry));
            }
            entity = entity.with_field(field);
        }
    }

    for (entry, module) in &decl.entries {
        let field = build_field(&decl.name, entry, FieldScope::Data, module, None, lookup)?;
        if !seen.insert(field.key()) {
            return Err(duplicate_field(&decl.name, entry));
        }
        entity = entity.with_field(field);
    }

    Ok(entity)
}

fn duplicate_field(entity: &str, entry: &RawEntry) -> Error {
    Error::InvalidSchema {
        entity: entity.to_string(),
        reason: format!("field {} declared more than once", entry.name),
    }
}

fn build_field(
    entity: &str,
    entry: &RawEntry,
    scope: FieldScope,
    module: &str,
    interface: Option<&str>,
    lookup: &dyn Fn(&str) -> Option<TargetInfo>,
) -> Result<EntityField> {
    let (field_type, target) = resolve_field_type(entity, &entry.name, &entry.type_name, lookup)?;

    let mut field = EntityField::new(entity, entry.name.clone(), field_type, scope, module);
    if let Some(target) = target {
        field = field.with_target(target);
    }
    if let Some(interface) = interface {
        field = field.with_interface(interface);
    }
    if entry.is_logical_key {
        if !field_type.can_be_logical_key() {
            return Err(Error::InvalidSchema {
                entity: entity.to_string(),
                reason: format!(
                    "field {} of type {} cannot be part of the logical key",
                    entry.name, field_type
                ),
            });
        }
        field = field.with_logical_key(entry.lk_order);
    }
    Ok(field)
}

/// Resolve a declared type name.
///
/// Tries, in order: a kind name, an alias, an entity name, and `[Entity]`.
pub fn resolve_field_type(
    entity: &str,
    field: &str,
    type_name: &str,
    lookup: &dyn Fn(&str) -> Option<TargetInfo>,
) -> Result<(FieldType, Option<FieldTarget>)> {
    let not_known = || Error::FieldTypeNotKnown {
        entity: entity.to_string(),
        field: field.to_string(),
        type_name: type_name.to_string(),
    };

    if let Some(kind) = FieldType::from_name(type_name).or_else(|| FieldType::from_alias(type_name)) {
        // Target kinds are only reachable through an entity name.
        if kind.has_target_entity() || kind == FieldType::Pk {
            return Err(not_known());
        }
        return Ok((kind, None));
    }

    if let Some(info) = lookup(type_name) {
        let kind = if info.embedable {
            FieldType::EntityEmbedded
        } else {
            FieldType::EntityRef
        };
        return Ok((
            kind,
            Some(FieldTarget {
                entity: type_name.to_uppercase(),
                logical_key: info.logical_key,
            }),
        ));
    }

    if let Some(inner) = type_name
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        if let Some(info) = lookup(inner) {
            if !info.embedable {
                return Ok((
                    FieldType::EntityRefArray,
                    Some(FieldTarget {
                        entity: inner.to_uppercase(),
                        logical_key: info.logical_key,
                    }),
                ));
            }
        }
    }

    Err(not_known())
}

fn check_embedding_cycles(entities: &[Entity]) -> Result<()> {
    let edges: HashMap<&str, Vec<&str>> = entities
        .iter()
        .map(|e| {
            let targets = e
                .data_fields()
                .iter()
                .filter(|f| f.field_type() == FieldType::EntityEmbedded)
                .filter_map(|f| f.target_entity())
                .collect();
            (e.name(), targets)
        })
        .collect();

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        on_path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<()> {
        if done.contains(node) {
            return Ok(());
        }
        if on_path.contains(&node) {
            return Err(Error::InvalidSchema {
                entity: node.to_string(),
                reason: format!("embedding cycle: {} -> {node}", on_path.join(" -> ")),
            });
        }
        on_path.push(node);
        if let Some(targets) = edges.get(node) {
            for target in targets {
                visit(*target, edges, on_path, done)?;
            }
        }
        on_path.pop();
        done.insert(node);
        Ok(())
    }

    let mut done = HashSet::new();
    for entity in entities {
        visit(entity.name(), &edges, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::catalog::core_module;
    use crate::schema::raw::{RawEntityBuilder, RawSchema};

    fn build(schema: RawSchema) -> Result<BuiltSchema> {
        SchemaBuilder::new()
            .with_module(core_module())
            .with_module(Module::new("APP", 10).with_schema(schema))
            .build()
    }

    fn entity<'a>(built: &'a BuiltSchema, name: &str) -> &'a Entity {
        built.entities.iter().find(|e| e.name() == name).unwrap()
    }

    #[test]
    fn test_core_meta_injected() {
        let built = build(RawSchema::default().with_entity(
            RawEntityBuilder::new("NOTE")
                .lk_entry("TEXT", "code")
                .build()
                .unwrap(),
        ))
        .unwrap();
        let note = entity(&built, "NOTE");
        let meta: Vec<_> = note.meta_fields().iter().map(|f| f.name()).collect();
        assert_eq!(meta, vec!["created", "modified"]);
        assert_eq!(
            note.meta_fields()[0].provenance().interface.as_deref(),
            Some(CORE_META)
        );
        assert_eq!(note.logical_key(), &["code".to_string()]);
    }

    #[test]
    fn test_missing_core_meta() {
        let err = SchemaBuilder::new()
            .with_module(Module::new("APP", 1).with_schema(
                RawSchema::default().with_entity(RawEntityBuilder::new("NOTE").build().unwrap()),
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MissingInterface { .. }));
    }

    #[test]
    fn test_type_resolution_order() {
        let built = build(
            RawSchema::default()
                .with_entity(
                    RawEntityBuilder::new("ADDRESS")
                        .embedable()
                        .entry("TEXT", "street")
                        .build()
                        .unwrap(),
                )
                .with_entity(
                    RawEntityBuilder::new("PERSON")
                        .lk_entry("TEXT", "name")
                        .entry("QUANTITY", "age")
                        .entry("[TEXT]", "tags")
                        .entry("ADDRESS", "home")
                        .entry("PERSON", "parent")
                        .entry("[PERSON]", "friends")
                        .entry("generic_entity_ref", "owner")
                        .build()
                        .unwrap(),
                ),
        )
        .unwrap();
        let person = entity(&built, "PERSON");
        let kind = |name: &str| person.field(name).unwrap().field_type();
        assert_eq!(kind("age"), FieldType::Long);
        assert_eq!(kind("tags"), FieldType::TextArray);
        assert_eq!(kind("home"), FieldType::EntityEmbedded);
        assert_eq!(kind("parent"), FieldType::EntityRef);
        assert_eq!(kind("friends"), FieldType::EntityRefArray);
        assert_eq!(kind("owner"), FieldType::GenericEntityRef);
        let target = person.field("parent").unwrap().target().unwrap();
        assert_eq!(target.entity, "PERSON");
        assert_eq!(target.logical_key, vec!["name".to_string()]);
    }

    #[test]
    fn test_unknown_type() {
        let err = build(RawSchema::default().with_entity(
            RawEntityBuilder::new("NOTE")
                .entry("NOPE", "thing")
                .build()
                .unwrap(),
        ))
        .unwrap_err();
        match err {
            Error::FieldTypeNotKnown {
                entity,
                field,
                type_name,
            } => {
                assert_eq!(entity, "NOTE");
                assert_eq!(field, "thing");
                assert_eq!(type_name, "NOPE");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_array_of_embedable_rejected() {
        let err = build(
            RawSchema::default()
                .with_entity(RawEntityBuilder::new("PART").embedable().build().unwrap())
                .with_entity(
                    RawEntityBuilder::new("MACHINE")
                        .entry("[PART]", "parts")
                        .build()
                        .unwrap(),
                ),
        )
        .unwrap_err();
        assert!(matches!(err, Error::FieldTypeNotKnown { .. }));
    }

    #[test]
    fn test_interface_fields_are_data() {
        let built = build(
            RawSchema::default()
                .with_interface(
                    RawEntityBuilder::new("NAMED")
                        .lk_entry("TEXT", "label")
                        .build()
                        .unwrap(),
                )
                .with_entity(
                    RawEntityBuilder::new("TAG")
                        .implements("NAMED")
                        .entry("TEXT", "color")
                        .build()
                        .unwrap(),
                ),
        )
        .unwrap();
        let tag = entity(&built, "TAG");
        let label = tag.field("label").unwrap();
        assert_eq!(label.scope(), FieldScope::Data);
        assert_eq!(label.provenance().interface.as_deref(), Some("NAMED"));
        assert_eq!(tag.logical_key(), &["label".to_string()]);
    }

    #[test]
    fn test_entities_merged_across_modules() {
        let built = SchemaBuilder::new()
            .with_module(core_module())
            .with_module(Module::new("APP", 10).with_schema(RawSchema::default().with_entity(
                RawEntityBuilder::new("NOTE").lk_entry("TEXT", "code").build().unwrap(),
            )))
            .with_module(Module::new("EXT", 20).with_schema(RawSchema::default().with_entity(
                RawEntityBuilder::new("note").entry("TEXT", "extra").build().unwrap(),
            )))
            .build()
            .unwrap();
        let note = entity(&built, "NOTE");
        assert_eq!(note.module(), "APP");
        assert_eq!(note.field("extra").unwrap().provenance().module, "EXT");
    }

    #[test]
    fn test_logical_key_kind_enforced() {
        let err = build(RawSchema::default().with_entity(
            RawEntityBuilder::new("NOTE")
                .lk_entry("[TEXT]", "tags")
                .build()
                .unwrap(),
        ))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_embedding_cycle_rejected() {
        let err = build(
            RawSchema::default()
                .with_entity(
                    RawEntityBuilder::new("AAA")
                        .embedable()
                        .entry("BBB", "inner")
                        .build()
                        .unwrap(),
                )
                .with_entity(
                    RawEntityBuilder::new("BBB")
                        .embedable()
                        .entry("AAA", "inner")
                        .build()
                        .unwrap(),
                ),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { ref reason, .. } if reason.contains("cycle")));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = build(RawSchema::default().with_entity(
            RawEntityBuilder::new("NOTE")
                .entry("TEXT", "code")
                .entry("LONG", "CODE")
                .build()
                .unwrap(),
        ))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }
}
