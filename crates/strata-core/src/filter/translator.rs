//! Filter expression to SQL translation.
//!
//! Literals are typed against the entity schema and bound as named
//! parameters. A reference field compared to a literal is matched through
//! the target's logical key:
//!
//! ```text
//! owner == bob   =>   "owner" IN (SELECT "id" FROM "person" WHERE "name" = :f0)
//! ```

use std::sync::Arc;

use strata_lang::{ComparisonOp, FilterExpr, Spanned};
use tracing::debug;

use super::context::FilterContext;
use crate::error::{Error, Result};
use crate::persistence::marshal::scalar_to_sql;
use crate::persistence::{quote, SqlStatement, SqlValue};
use crate::record::FieldValue;
use crate::schema::field::ID_FIELD;
use crate::schema::{Entity, EntityField, FieldType, SchemaRegistry};

/// Translated filter, ordering and page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFilter {
    /// Condition without the `WHERE` keyword.
    pub where_clause: Option<String>,
    /// Parameters referenced by the condition.
    pub params: Vec<(String, SqlValue)>,
    /// Rendered sort terms.
    pub order_by: Vec<String>,
    /// Page size, 0 for unbounded.
    pub limit: u64,
    /// Rows to skip.
    pub offset: u64,
}

impl SqlFilter {
    /// Append the clauses to a `SELECT ... FROM ...` prefix.
    pub fn statement(&self, select: &str) -> SqlStatement {
        let mut sql = select.to_string();
        if let Some(condition) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        match (self.limit, self.offset) {
            (0, 0) => {}
            (0, offset) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (limit, 0) => sql.push_str(&format!(" LIMIT {limit}")),
            (limit, offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        }
        SqlStatement {
            sql,
            params: self.params.clone(),
        }
    }
}

enum Predicate<'a> {
    Compare(ComparisonOp, &'a str),
    Member(Vec<&'a str>, bool),
}

/// Translates [`FilterContext`]s for one entity.
pub struct FilterTranslator<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> FilterTranslator<'a> {
    /// Create a translator resolving reference targets in `registry`.
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Translate filter, ordering and page.
    pub fn translate(&self, entity: &Entity, context: &FilterContext) -> Result<SqlFilter> {
        let mut params = Vec::new();
        let where_clause = match context.search() {
            Some(search) => {
                let expr = strata_lang::parse(search)?;
                Some(self.expression(entity, &expr, &mut params)?)
            }
            None => None,
        };
        let filter = SqlFilter {
            where_clause,
            params,
            order_by: self.order_by(entity, &context.order_by)?,
            limit: context.limit,
            offset: context.start,
        };
        debug!(entity = %entity.name(), filter = ?filter.where_clause, "filter translated");
        Ok(filter)
    }

    /// Translate a parsed expression into a condition.
    pub fn expression(
        &self,
        entity: &Entity,
        expr: &FilterExpr,
        params: &mut Vec<(String, SqlValue)>,
    ) -> Result<String> {
        match expr {
            FilterExpr::And(parts) => self.junction(entity, parts, " AND ", params),
            FilterExpr::Or(parts) => self.junction(entity, parts, " OR ", params),
            FilterExpr::Comparison { field, op, value } => {
                let field = self.field(entity, field)?;
                self.predicate(field, Predicate::Compare(*op, value.value.text()), params)
            }
            FilterExpr::In {
                field,
                values,
                negated,
            } => {
                let field = self.field(entity, field)?;
                let texts = values.iter().map(|v| v.value.text()).collect();
                self.predicate(field, Predicate::Member(texts, *negated), params)
            }
        }
    }

    /// Sort terms, defaulting to the logical key.
    pub fn order_by(&self, entity: &Entity, terms: &[String]) -> Result<Vec<String>> {
        if terms.is_empty() {
            return Ok(entity
                .logical_key()
                .iter()
                .map(|column| format!("{} ASC", quote(column)))
                .collect());
        }
        terms
            .iter()
            .map(|term| {
                let term = term.trim();
                let (name, direction) = match term.strip_prefix('-') {
                    Some(name) => (name, "DESC"),
                    None => (term.strip_prefix('+').unwrap_or(term), "ASC"),
                };
                let field = entity.field(name).ok_or_else(|| Error::FieldNotFound {
                    entity: entity.name().to_string(),
                    field: name.to_string(),
                })?;
                if !field.field_type().is_filterable() {
                    return Err(Error::InvalidFilter {
                        entity: entity.name().to_string(),
                        reason: format!("cannot order by {} field {}", field.field_type(), field.name()),
                    });
                }
                Ok(format!("{} {direction}", quote(&field.key())))
            })
            .collect()
    }

    fn junction(
        &self,
        entity: &Entity,
        parts: &[FilterExpr],
        separator: &str,
        params: &mut Vec<(String, SqlValue)>,
    ) -> Result<String> {
        let parts = parts
            .iter()
            .map(|part| Ok(format!("({})", self.expression(entity, part, params)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(separator))
    }

    fn field<'e>(&self, entity: &'e Entity, name: &Spanned<String>) -> Result<&'e EntityField> {
        entity.field(&name.value).ok_or_else(|| Error::FieldNotFound {
            entity: entity.name().to_string(),
            field: name.value.clone(),
        })
    }

    fn predicate(
        &self,
        field: &EntityField,
        predicate: Predicate<'_>,
        params: &mut Vec<(String, SqlValue)>,
    ) -> Result<String> {
        let kind = field.field_type();
        if !kind.is_filterable() {
            return Err(Error::InvalidFilter {
                entity: field.entity_name().to_string(),
                reason: format!("{kind} field {} is not filterable", field.name()),
            });
        }
        let column = quote(&field.key());

        if kind == FieldType::EntityRef {
            let target = self.target(field)?;
            let key_field = match target.logical_key_fields().as_slice() {
                [single] => *single,
                _ => {
                    return Err(Error::InvalidFilter {
                        entity: field.entity_name().to_string(),
                        reason: format!(
                            "{} is not filterable: {} has no single-column logical key",
                            field.name(),
                            target.name()
                        ),
                    })
                }
            };
            let (inner, negated) = match predicate {
                Predicate::Compare(ComparisonOp::Ne, text) => {
                    (Predicate::Compare(ComparisonOp::Eq, text), true)
                }
                Predicate::Compare(op, text) => (Predicate::Compare(op, text), false),
                Predicate::Member(texts, negated) => (Predicate::Member(texts, false), negated),
            };
            let condition = self.predicate(key_field, inner, params)?;
            return Ok(format!(
                "{column} {} (SELECT {} FROM {} WHERE {condition})",
                if negated { "NOT IN" } else { "IN" },
                quote(ID_FIELD),
                quote(&target.table_name())
            ));
        }

        match predicate {
            Predicate::Compare(op, text) => {
                let name = bind(field, text, params)?;
                Ok(format!("{column} {} {name}", op.as_sql()))
            }
            Predicate::Member(texts, negated) => {
                let names = texts
                    .into_iter()
                    .map(|text| bind(field, text, params))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!(
                    "{column} {} ({})",
                    if negated { "NOT IN" } else { "IN" },
                    names.join(", ")
                ))
            }
        }
    }

    fn target(&self, field: &EntityField) -> Result<Arc<Entity>> {
        let name = field.target_entity().unwrap_or_default();
        self.registry.get(name).ok_or_else(|| Error::EntityNotFound {
            entity: name.to_string(),
        })
    }
}

fn bind(field: &EntityField, text: &str, params: &mut Vec<(String, SqlValue)>) -> Result<String> {
    let value = FieldValue::parse_text(field.field_type(), text).ok_or_else(|| {
        Error::InvalidFilter {
            entity: field.entity_name().to_string(),
            reason: format!(
                "'{text}' is not a valid {} value for {}",
                field.field_type(),
                field.name()
            ),
        }
    })?;
    let name = format!(":f{}", params.len());
    params.push((name.clone(), scalar_to_sql(&value)?));
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldScope, FieldTarget, ModuleInfo};

    fn registry() -> SchemaRegistry {
        let person = Entity::new("PERSON", "APP").with_field(
            EntityField::new("PERSON", "name", FieldType::Text, FieldScope::Data, "APP")
                .with_logical_key(0),
        );
        let pet = Entity::new("PET", "APP")
            .with_field(
                EntityField::new("PET", "name", FieldType::Text, FieldScope::Data, "APP")
                    .with_logical_key(0),
            )
            .with_field(EntityField::new("PET", "age", FieldType::Long, FieldScope::Data, "APP"))
            .with_field(EntityField::new(
                "PET",
                "tags",
                FieldType::TextArray,
                FieldScope::Data,
                "APP",
            ))
            .with_field(
                EntityField::new("PET", "owner", FieldType::EntityRef, FieldScope::Data, "APP")
                    .with_target(FieldTarget {
                        entity: "PERSON".into(),
                        logical_key: vec!["name".into()],
                    }),
            );
        let registry = SchemaRegistry::new();
        registry.load(
            vec![person, pet],
            vec![ModuleInfo {
                name: "APP".into(),
                editable: false,
                order: 1,
            }],
        );
        registry
    }

    fn translate(search: &str) -> Result<SqlFilter> {
        let registry = registry();
        let pet = registry.get("PET").unwrap();
        FilterTranslator::new(&registry).translate(&pet, &FilterContext::new().with_search(search))
    }

    #[test]
    fn test_simple_comparison() {
        let filter = translate("name == rex").unwrap();
        assert_eq!(filter.where_clause.as_deref(), Some("\"name\" = :f0"));
        assert_eq!(filter.params, vec![(":f0".to_string(), SqlValue::Text("rex".into()))]);
    }

    #[test]
    fn test_typed_literal_and_junction() {
        let filter = translate("name == rex; age >= 3").unwrap();
        assert_eq!(
            filter.where_clause.as_deref(),
            Some("(\"name\" = :f0) AND (\"age\" >= :f1)")
        );
        assert_eq!(filter.params[1].1, SqlValue::Integer(3));
        assert!(matches!(
            translate("age == ten"),
            Err(Error::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_reference_through_logical_key() {
        let filter = translate("owner == bob").unwrap();
        assert_eq!(
            filter.where_clause.as_deref(),
            Some("\"owner\" IN (SELECT \"id\" FROM \"person\" WHERE \"name\" = :f0)")
        );
        let filter = translate("owner != bob").unwrap();
        assert_eq!(
            filter.where_clause.as_deref(),
            Some("\"owner\" NOT IN (SELECT \"id\" FROM \"person\" WHERE \"name\" = :f0)")
        );
        let filter = translate("owner=out=(a, b)").unwrap();
        assert_eq!(
            filter.where_clause.as_deref(),
            Some("\"owner\" NOT IN (SELECT \"id\" FROM \"person\" WHERE \"name\" IN (:f0, :f1))")
        );
    }

    #[test]
    fn test_rejections() {
        assert!(matches!(translate("tags == a"), Err(Error::InvalidFilter { .. })));
        assert!(matches!(translate("nope == 1"), Err(Error::FieldNotFound { .. })));
        assert!(matches!(translate("name = x"), Err(Error::Filter(_))));
    }

    #[test]
    fn test_order_by() {
        let registry = registry();
        let pet = registry.get("PET").unwrap();
        let translator = FilterTranslator::new(&registry);
        assert_eq!(translator.order_by(&pet, &[]).unwrap(), vec!["\"name\" ASC"]);
        assert_eq!(
            translator
                .order_by(&pet, &["-age".to_string(), "+NAME".to_string()])
                .unwrap(),
            vec!["\"age\" DESC", "\"name\" ASC"]
        );
        assert!(translator.order_by(&pet, &["tags".to_string()]).is_err());
    }

    #[test]
    fn test_statement_paging() {
        let filter = SqlFilter {
            limit: 0,
            offset: 5,
            ..SqlFilter::default()
        };
        assert_eq!(filter.statement("SELECT * FROM t").sql, "SELECT * FROM t LIMIT -1 OFFSET 5");
        let filter = SqlFilter {
            where_clause: Some("a = :f0".into()),
            order_by: vec!["\"a\" DESC".into()],
            limit: 50,
            offset: 150,
            ..SqlFilter::default()
        };
        assert_eq!(
            filter.statement("SELECT * FROM t").sql,
            "SELECT * FROM t WHERE a = :f0 ORDER BY \"a\" DESC LIMIT 50 OFFSET 150"
        );
    }
}
