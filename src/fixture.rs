//! JSON scenario files: tables, seed rows, associations and one nested save.
//!
//! ```json
//! {
//!   "config": { "allow_destroy": true, "limit": 10 },
//!   "tables": [{ "name": "projects" }, { "name": "tasks", "unique": [["project_id", "name"]] }],
//!   "seed": { "projects": [{ "name": "Apollo" }], "tasks": [{ "project_id": 1, "name": "Plan" }] },
//!   "associations": [
//!     { "kind": "has_many", "parent_table": "projects", "name": "tasks",
//!       "child_table": "tasks", "foreign_key": "project_id" }
//!   ],
//!   "request": {
//!     "parent_table": "projects", "parent_id": 1, "association": "tasks",
//!     "parent": { "name": "Apollo 11" },
//!     "permit": ["name"],
//!     "children": { "0": { "id": 1, "_destroy": "1" }, "1": { "name": "Launch" } }
//!   }
//! }
//! ```

use crate::association::Association;
use crate::batch::{FieldAllowList, decode_form_pairs, decode_json};
use crate::config::ReconcileConfig;
use crate::core::{EntityId, FieldMap, NestError, Result};
use crate::facade::{NestedWriter, SaveRequest};
use crate::join::MembershipToggle;
use crate::storage::{InMemoryStore, TableDef};
use log::info;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub config: ReconcileConfig,
    pub tables: Vec<TableDef>,
    /// Rows per table, inserted in listed order
    #[serde(default)]
    pub seed: BTreeMap<String, Vec<FieldMap>>,
    #[serde(default)]
    pub associations: Vec<AssociationDef>,
    pub request: RequestDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssociationDef {
    HasMany {
        parent_table: String,
        name: String,
        child_table: String,
        foreign_key: String,
    },
    Through {
        parent_table: String,
        name: String,
        join_table: String,
        parent_key: String,
        related_table: String,
        related_key: String,
    },
}

impl AssociationDef {
    fn parent_table(&self) -> &str {
        match self {
            AssociationDef::HasMany { parent_table, .. } | AssociationDef::Through { parent_table, .. } => {
                parent_table
            }
        }
    }

    fn to_association(&self) -> Association {
        match self {
            AssociationDef::HasMany {
                name,
                child_table,
                foreign_key,
                ..
            } => Association::has_many(name, child_table, foreign_key),
            AssociationDef::Through {
                name,
                join_table,
                parent_key,
                related_table,
                related_key,
                ..
            } => Association::through(name, join_table, parent_key, related_table, related_key),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestDef {
    pub parent_table: String,
    pub parent_id: EntityId,
    pub association: String,
    #[serde(default)]
    pub parent: FieldMap,
    #[serde(default)]
    pub expected_version: Option<i64>,
    /// Fields nested rows may set besides identity and removal flag
    #[serde(default)]
    pub permit: Vec<String>,
    /// Nested rows as an array or an index-keyed object
    #[serde(default)]
    pub children: Option<serde_json::Value>,
    /// Flat form pairs such as `["tasks_attributes[0][name]", "Launch"]`
    #[serde(default)]
    pub form: Option<Vec<(String, String)>>,
    /// Defaults to `<association>_attributes`
    #[serde(default)]
    pub form_prefix: Option<String>,
    /// Checkbox rows for join associations
    #[serde(default)]
    pub toggles: Option<Vec<FieldMap>>,
    #[serde(default = "default_keep_field")]
    pub keep_field: String,
}

fn default_keep_field() -> String {
    "keep".to_string()
}

impl Fixture {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Creates and seeds a store, and registers the associations on a writer.
    pub async fn writer(&self) -> Result<NestedWriter<InMemoryStore>> {
        let store = Arc::new(InMemoryStore::new());
        for table in &self.tables {
            store.create_table(table.clone()).await?;
        }
        for (table, rows) in &self.seed {
            for row in rows {
                store.seed(table, row.clone()).await?;
            }
            info!("seeded {} row(s) into '{}'", rows.len(), table);
        }

        let mut writer = NestedWriter::new(store).with_config(self.config.clone());
        for def in &self.associations {
            writer = writer.association(def.parent_table(), def.to_association());
        }
        Ok(writer)
    }

    /// Builds the save request, running raw rows through the permit step.
    pub fn save_request(&self, writer: &NestedWriter<InMemoryStore>) -> Result<SaveRequest> {
        let def = &self.request;
        let allow = FieldAllowList::new(def.permit.iter().cloned()).with_config(&self.config);

        let mut request = SaveRequest::new(&def.parent_table, def.parent_id, &def.association);
        request.parent_changes = def.parent.clone();
        request.expected_version = def.expected_version;

        let given = [def.children.is_some(), def.form.is_some(), def.toggles.is_some()];
        if given.iter().filter(|given| **given).count() > 1 {
            return Err(NestError::Decode(
                "request may carry only one of 'children', 'form' and 'toggles'".to_string(),
            ));
        }

        if let Some(children) = &def.children {
            let rows = decode_json(children)?;
            request = request.batch(allow.permit_all(&rows)?);
        } else if let Some(pairs) = &def.form {
            let prefix = def
                .form_prefix
                .clone()
                .unwrap_or_else(|| format!("{}_attributes", def.association));
            let rows = decode_form_pairs(&prefix, pairs)?;
            request = request.batch(allow.permit_all(&rows)?);
        } else if let Some(rows) = &def.toggles {
            let association = writer.association_for(&def.parent_table, &def.association)?;
            let Association::Through { related_key, .. } = association else {
                return Err(NestError::Decode(format!(
                    "'toggles' need a join association, '{}' is not one",
                    def.association
                )));
            };
            let toggles = rows
                .iter()
                .map(|row| MembershipToggle::from_fields(row, related_key, &def.keep_field, &allow))
                .collect::<Result<Vec<_>>>()?;
            request = request.toggles(toggles);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::Nested;

    const PROJECTS: &str = r#"{
        "tables": [{ "name": "projects" }, { "name": "tasks" }],
        "seed": {
            "projects": [{ "name": "Apollo" }],
            "tasks": [{ "project_id": 1, "name": "Plan" }]
        },
        "associations": [
            { "kind": "has_many", "parent_table": "projects", "name": "tasks",
              "child_table": "tasks", "foreign_key": "project_id" }
        ],
        "request": {
            "parent_table": "projects", "parent_id": 1, "association": "tasks",
            "permit": ["name"],
            "children": { "1": { "name": "Launch", "secret": "x" }, "0": { "id": "1", "_destroy": "1" } }
        }
    }"#;

    #[tokio::test]
    async fn test_builds_batch_from_index_keyed_children() {
        let fixture = Fixture::from_json(PROJECTS).unwrap();
        let writer = fixture.writer().await.unwrap();
        let request = fixture.save_request(&writer).unwrap();

        let Nested::Batch(batch) = &request.nested else {
            panic!("expected a batch");
        };
        let entries = batch.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, Some(EntityId(1)));
        assert!(entries[0].remove);
        assert!(entries[1].fields.contains_key("name"));
        assert!(!entries[1].fields.contains_key("secret"));
    }

    #[tokio::test]
    async fn test_toggles_need_join_association() {
        let text = PROJECTS.replace(
            r#""children": { "1": { "name": "Launch", "secret": "x" }, "0": { "id": "1", "_destroy": "1" } }"#,
            r#""toggles": [{ "person_id": 1, "keep": "1" }]"#,
        );
        let fixture = Fixture::from_json(&text).unwrap();
        let writer = fixture.writer().await.unwrap();
        let err = fixture.save_request(&writer).unwrap_err();
        assert!(matches!(err, NestError::Decode(_)));
    }

    #[tokio::test]
    async fn test_builds_batch_from_form_pairs() {
        let text = PROJECTS.replace(
            r#""children": { "1": { "name": "Launch", "secret": "x" }, "0": { "id": "1", "_destroy": "1" } }"#,
            r#""form": [
                ["tasks_attributes[1][name]", "Launch"],
                ["tasks_attributes[0][id]", "1"],
                ["tasks_attributes[0][_destroy]", "1"]
            ]"#,
        );
        let fixture = Fixture::from_json(&text).unwrap();
        let writer = fixture.writer().await.unwrap();
        let request = fixture.save_request(&writer).unwrap();

        let outcome = writer.save(request).await.unwrap();
        assert_eq!(outcome.children.len(), 1);
        assert_eq!(outcome.children[0].value("name"), &crate::core::Value::from("Launch"));
    }

    #[test]
    fn test_rejects_malformed_fixture() {
        assert!(matches!(
            Fixture::from_json(r#"{ "tables": [] }"#),
            Err(NestError::Decode(_))
        ));
    }
}
