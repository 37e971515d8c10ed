use crate::core::{EntityId, FieldMap, NestError, Record, Result, Value};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name and constraints of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    name: String,
    #[serde(default)]
    unique: Vec<Vec<String>>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: Vec::new(),
        }
    }

    /// Adds a uniqueness constraint over a group of columns.
    ///
    /// Rows with `NULL` in any column of the group are not constrained.
    pub fn unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.push(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_groups(&self) -> &[Vec<String>] {
        &self.unique
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    def: TableDef,
    rows: BTreeMap<EntityId, Record>,
    next_id: u64,
}

impl Table {
    pub fn new(def: TableDef) -> Self {
        Self {
            def,
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&Record> {
        self.rows.get(&id)
    }

    pub fn scan(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn insert(&mut self, fields: FieldMap) -> Result<EntityId> {
        self.check_uniqueness(&fields, None)?;

        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.rows.insert(id, Record::new(id, fields, Utc::now()));
        Ok(id)
    }

    /// Applies `changes` and returns the record as it was before.
    pub fn update(&mut self, id: EntityId, changes: &FieldMap) -> Result<Record> {
        let before = self.get(id).cloned().ok_or_else(|| self.not_found(id))?;
        let merged = before.merged(changes);
        self.check_uniqueness(&merged, Some(id))?;

        let mut after = before.clone();
        after.fields = merged;
        after.version += 1;
        after.updated_at = Utc::now();
        self.rows.insert(id, after);
        Ok(before)
    }

    pub fn delete(&mut self, id: EntityId) -> Result<Record> {
        self.rows.remove(&id).ok_or_else(|| self.not_found(id))
    }

    /// Puts a previously captured record image back in place.
    pub fn restore(&mut self, record: Record) {
        self.rows.insert(record.id, record);
    }

    pub fn remove(&mut self, id: EntityId) {
        self.rows.remove(&id);
    }

    fn not_found(&self, id: EntityId) -> NestError {
        NestError::RecordNotFound {
            table: self.def.name.clone(),
            id,
        }
    }

    fn check_uniqueness(&self, fields: &FieldMap, skip: Option<EntityId>) -> Result<()> {
        for group in self.def.unique_groups() {
            let key: Vec<&Value> = group
                .iter()
                .map(|column| fields.get(column).unwrap_or(&Value::Null))
                .collect();
            if key.iter().any(|value| value.is_null()) {
                continue;
            }

            let clash = self.rows.values().any(|row| {
                Some(row.id) != skip
                    && group
                        .iter()
                        .zip(&key)
                        .all(|(column, value)| row.value(column) == *value)
            });
            if clash {
                return Err(NestError::ConstraintViolation(format!(
                    "({}) must be unique in '{}'",
                    group.join(", "),
                    self.def.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let mut table = Table::new(TableDef::new("tasks"));
        let a = table.insert(fields(&[("name", "a".into())])).unwrap();
        let b = table.insert(fields(&[("name", "b".into())])).unwrap();
        assert!(b > a);
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_update_bumps_version() {
        let mut table = Table::new(TableDef::new("tasks"));
        let id = table.insert(fields(&[("name", "a".into())])).unwrap();
        let before = table.update(id, &fields(&[("name", "b".into())])).unwrap();

        assert_eq!(before.value("name"), &Value::Text("a".into()));
        let after = table.get(id).unwrap();
        assert_eq!(after.value("name"), &Value::Text("b".into()));
        assert_eq!(after.version, before.version + 1);
    }

    #[test]
    fn test_unique_group() {
        let def = TableDef::new("memberships").unique(["team_id", "member_id"]);
        let mut table = Table::new(def);

        table
            .insert(fields(&[("team_id", 1i64.into()), ("member_id", 2i64.into())]))
            .unwrap();
        let clash = table.insert(fields(&[("team_id", 1i64.into()), ("member_id", 2i64.into())]));
        assert!(matches!(clash, Err(NestError::ConstraintViolation(_))));

        // NULL keys are not constrained
        table.insert(fields(&[("team_id", 1i64.into())])).unwrap();
        table.insert(fields(&[("team_id", 1i64.into())])).unwrap();
    }

    #[test]
    fn test_missing_record() {
        let mut table = Table::new(TableDef::new("tasks"));
        assert!(matches!(
            table.delete(EntityId(5)),
            Err(NestError::RecordNotFound { .. })
        ));
    }
}
