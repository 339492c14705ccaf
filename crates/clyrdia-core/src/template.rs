//! Industry contract templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::Industry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractTemplate {
    pub id: String,
    pub name: String,
    pub industry: Industry,
    pub contract_type: String,
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateLibrary {
    pub industry: Industry,
    pub templates: Vec<ContractTemplate>,
    pub total_count: usize,
    /// Distinct contract types, sorted.
    pub categories: Vec<String>,
}

impl TemplateLibrary {
    /// Filter by contract type, optionally strip variables, and derive the
    /// category list.
    pub fn assemble(
        industry: Industry,
        templates: Vec<ContractTemplate>,
        contract_type: Option<&str>,
        include_variables: bool,
    ) -> Self {
        let templates: Vec<ContractTemplate> = templates
            .into_iter()
            .filter(|t| contract_type.is_none_or(|ct| t.contract_type == ct))
            .map(|mut t| {
                if !include_variables {
                    t.variables.clear();
                }
                t
            })
            .collect();

        let mut categories: Vec<String> =
            templates.iter().map(|t| t.contract_type.clone()).collect();
        categories.sort();
        categories.dedup();

        Self {
            industry,
            total_count: templates.len(),
            templates,
            categories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str, contract_type: &str) -> ContractTemplate {
        ContractTemplate {
            id: id.into(),
            name: format!("{contract_type} template"),
            industry: Industry::Technology,
            contract_type: contract_type.into(),
            description: String::new(),
            content: "This Agreement ...".into(),
            variables: vec!["party_a".into(), "effective_date".into()],
            tags: vec![],
            version: "1.0".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn categories_are_distinct_and_sorted() {
        let lib = TemplateLibrary::assemble(
            Industry::Technology,
            vec![template("1", "saas"), template("2", "nda"), template("3", "saas")],
            None,
            true,
        );
        assert_eq!(lib.total_count, 3);
        assert_eq!(lib.categories, vec!["nda", "saas"]);
    }

    #[test]
    fn filter_and_strip_variables() {
        let lib = TemplateLibrary::assemble(
            Industry::Technology,
            vec![template("1", "saas"), template("2", "nda")],
            Some("nda"),
            false,
        );
        assert_eq!(lib.total_count, 1);
        assert_eq!(lib.templates[0].id, "2");
        assert!(lib.templates[0].variables.is_empty());
    }
}
