//! Entity fixture shared by unit tests.

use tessera_types::Value;

use crate::entity::{BaseEntity, Entity};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Widget {
    #[sqlx(flatten)]
    pub base: BaseEntity,
    pub name: String,
    pub description: Option<String>,
}

impl Widget {
    pub fn new(name: &str, description: Option<&str>) -> Self {
        Self {
            base: BaseEntity::new("tester"),
            name: name.to_owned(),
            description: description.map(str::to_owned),
        }
    }
}

impl Entity for Widget {
    const TABLE: &'static str = "widgets";
    const COLUMNS: &'static [&'static str] = &["name", "description"];

    fn base(&self) -> &BaseEntity {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseEntity {
        &mut self.base
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::from(self.name.as_str())),
            ("description", Value::from(self.description.clone())),
        ]
    }
}
