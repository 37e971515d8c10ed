/// How a parent table reaches the records a batch talks about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// Parent owns children that point back at it through `foreign_key`.
    HasMany {
        name: String,
        child_table: String,
        foreign_key: String,
    },
    /// Parent is linked to independently owned records through join rows.
    ///
    /// Each join row stores the parent in `parent_key` and the related record
    /// in `related_key`; the related reference never changes once written.
    Through {
        name: String,
        join_table: String,
        parent_key: String,
        related_table: String,
        related_key: String,
    },
}

impl Association {
    pub fn has_many(name: &str, child_table: &str, foreign_key: &str) -> Self {
        Association::HasMany {
            name: name.to_string(),
            child_table: child_table.to_string(),
            foreign_key: foreign_key.to_string(),
        }
    }

    pub fn through(
        name: &str,
        join_table: &str,
        parent_key: &str,
        related_table: &str,
        related_key: &str,
    ) -> Self {
        Association::Through {
            name: name.to_string(),
            join_table: join_table.to_string(),
            parent_key: parent_key.to_string(),
            related_table: related_table.to_string(),
            related_key: related_key.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Association::HasMany { name, .. } | Association::Through { name, .. } => name,
        }
    }

    /// Table whose rows the batch creates, updates and deletes.
    pub fn target_table(&self) -> &str {
        match self {
            Association::HasMany { child_table, .. } => child_table,
            Association::Through { join_table, .. } => join_table,
        }
    }

    /// Column of the target table that references the parent.
    pub fn owner_key(&self) -> &str {
        match self {
            Association::HasMany { foreign_key, .. } => foreign_key,
            Association::Through { parent_key, .. } => parent_key,
        }
    }

    pub fn is_through(&self) -> bool {
        matches!(self, Association::Through { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_and_owner_key() {
        let tasks = Association::has_many("tasks", "tasks", "project_id");
        assert_eq!(tasks.target_table(), "tasks");
        assert_eq!(tasks.owner_key(), "project_id");
        assert!(!tasks.is_through());

        let members = Association::through("members", "memberships", "team_id", "people", "person_id");
        assert_eq!(members.name(), "members");
        assert_eq!(members.target_table(), "memberships");
        assert_eq!(members.owner_key(), "team_id");
        assert!(members.is_through());
    }
}
