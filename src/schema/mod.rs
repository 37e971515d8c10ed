// ============================================================================
// Entity Schemas & Validation
// ============================================================================
//
// Field-level validation of parents and children before any write happens.
// Every rule reports into a list of FieldError instead of failing fast, so a
// single save can report all problems of all entities at once.
//
// ============================================================================

use crate::core::{DataType, FieldError, FieldMap, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Option<FieldError> {
        if value.is_null() {
            if !self.nullable {
                return Some(FieldError::on(&self.name, "can't be null"));
            }
            return None;
        }

        if !self.data_type.is_compatible(value) {
            return Some(FieldError::on(
                &self.name,
                format!("expects {}, got {}", self.data_type, value.type_name()),
            ));
        }

        None
    }
}

type CustomRule = Arc<dyn Fn(&FieldMap) -> Vec<FieldError> + Send + Sync>;

#[derive(Clone)]
pub enum Rule {
    /// Field must be present and not blank.
    Presence(String),
    /// Text field must not exceed the given number of characters.
    MaxLength(String, usize),
    Custom(CustomRule),
}

impl Rule {
    fn check(&self, fields: &FieldMap, errors: &mut Vec<FieldError>) {
        match self {
            Rule::Presence(field) => {
                if fields.get(field).is_none_or(Value::is_blank) {
                    errors.push(FieldError::on(field, "can't be blank"));
                }
            }
            Rule::MaxLength(field, max) => {
                if let Some(text) = fields.get(field).and_then(Value::as_str) {
                    if text.chars().count() > *max {
                        errors.push(FieldError::on(
                            field,
                            format!("is too long (maximum is {} characters)", max),
                        ));
                    }
                }
            }
            Rule::Custom(check) => errors.extend(check(fields)),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Presence(field) => write!(f, "Presence({})", field),
            Rule::MaxLength(field, max) => write!(f, "MaxLength({}, {})", field, max),
            Rule::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Columns and rules of one table.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    table: String,
    columns: Vec<Column>,
    rules: Vec<Rule>,
    strict: bool,
}

impl EntitySchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rules: Vec::new(),
            strict: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn validates_presence_of(mut self, field: impl Into<String>) -> Self {
        self.rules.push(Rule::Presence(field.into()));
        self
    }

    pub fn validates_length_of(mut self, field: impl Into<String>, max: usize) -> Self {
        self.rules.push(Rule::MaxLength(field.into(), max));
        self
    }

    pub fn validates_with<F>(mut self, check: F) -> Self
    where
        F: Fn(&FieldMap) -> Vec<FieldError> + Send + Sync + 'static,
    {
        self.rules.push(Rule::Custom(Arc::new(check)));
        self
    }

    /// Reject fields that are not declared as columns.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|col| col.name == name)
    }

    /// Casts text values of declared columns to the column type.
    pub fn cast(&self, fields: &mut FieldMap) {
        for column in &self.columns {
            if let Some(value) = fields.get_mut(&column.name) {
                *value = column.data_type.cast(value);
            }
        }
    }

    /// Validates a complete field set (stored fields merged with changes).
    pub fn validate(&self, fields: &FieldMap) -> Vec<FieldError> {
        let mut errors = Vec::new();

        for column in &self.columns {
            let value = fields.get(&column.name).unwrap_or(&Value::Null);
            if let Some(error) = column.validate(value) {
                errors.push(error);
            }
        }

        if self.strict {
            for name in fields.keys() {
                if self.get_column(name).is_none() {
                    errors.push(FieldError::on(name, "is not a known attribute"));
                }
            }
        }

        for rule in &self.rules {
            rule.check(fields, &mut errors);
        }

        errors
    }
}

/// Schemas by table name. Tables without a schema accept any fields.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.insert(schema.table().to_string(), schema);
    }

    pub fn get(&self, table: &str) -> Option<&EntitySchema> {
        self.schemas.get(table)
    }

    pub fn cast(&self, table: &str, fields: &mut FieldMap) {
        if let Some(schema) = self.get(table) {
            schema.cast(fields);
        }
    }

    pub fn validate(&self, table: &str, fields: &FieldMap) -> Vec<FieldError> {
        self.get(table)
            .map(|schema| schema.validate(fields))
            .unwrap_or_default()
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
    fn test_presence_and_length() {
        let schema = EntitySchema::new("tasks")
            .validates_presence_of("name")
            .validates_length_of("name", 3);

        assert!(schema.validate(&fields(&[("name", "abc".into())])).is_empty());

        let blank = schema.validate(&fields(&[("name", "  ".into())]));
        assert_eq!(blank, vec![FieldError::on("name", "can't be blank")]);

        let missing = schema.validate(&FieldMap::new());
        assert_eq!(missing.len(), 1);

        let long = schema.validate(&fields(&[("name", "abcd".into())]));
        assert_eq!(long[0].message, "is too long (maximum is 3 characters)");
    }

    #[test]
    fn test_column_types_and_strictness() {
        let schema = EntitySchema::new("tasks")
            .column(Column::new("name", DataType::Text).not_null())
            .column(Column::new("done", DataType::Boolean))
            .strict();

        let errors = schema.validate(&fields(&[("done", 1i64.into()), ("extra", "x".into())]));
        let fields_in_error: Vec<_> = errors.iter().filter_map(|e| e.field.as_deref()).collect();
        assert_eq!(fields_in_error, vec!["name", "done", "extra"]);
    }

    #[test]
    fn test_cast_only_touches_declared_columns() {
        let mut registry = SchemaRegistry::new();
        registry.register(
            EntitySchema::new("tasks")
                .column(Column::new("estimate", DataType::Integer))
                .column(Column::new("done", DataType::Boolean)),
        );

        let mut submitted = fields(&[
            ("estimate", "3".into()),
            ("done", "1".into()),
            ("name", "7".into()),
        ]);
        registry.cast("tasks", &mut submitted);

        assert_eq!(submitted["estimate"], Value::Integer(3));
        assert_eq!(submitted["done"], Value::Boolean(true));
        assert_eq!(submitted["name"], Value::from("7"));
        assert!(registry.validate("tasks", &submitted).is_empty());
    }

    #[test]
    fn test_custom_rule() {
        let schema = EntitySchema::new("tasks").validates_with(|fields| {
            match fields.get("estimate").and_then(Value::as_i64) {
                Some(estimate) if estimate < 0 => {
                    vec![FieldError::on("estimate", "must be positive")]
                }
                _ => Vec::new(),
            }
        });

        assert!(schema.validate(&fields(&[("estimate", 3i64.into())])).is_empty());
        assert_eq!(schema.validate(&fields(&[("estimate", (-1i64).into())])).len(), 1);
    }
}
