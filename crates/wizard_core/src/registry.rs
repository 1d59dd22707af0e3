use std::{collections::HashSet, fmt, sync::Arc};

use shared::domain::{FormState, SectionId};

use crate::{error::RegistryError, validation::SectionValidator};

pub type VisibilityRule = Arc<dyn Fn(&FormState) -> bool + Send + Sync>;

/// Static description of one wizard page.
#[derive(Clone)]
pub struct SectionDefinition {
    pub id: SectionId,
    pub title: String,
    pub description: Option<String>,
    pub is_optional: bool,
    validator: Option<Arc<dyn SectionValidator>>,
    should_render: Option<VisibilityRule>,
}

impl SectionDefinition {
    pub fn new(id: impl Into<SectionId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            is_optional: false,
            validator: None,
            should_render: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn with_validator(self, validator: impl SectionValidator + 'static) -> Self {
        self.with_shared_validator(Arc::new(validator))
    }

    pub fn with_shared_validator(mut self, validator: Arc<dyn SectionValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn render_when<F>(mut self, rule: F) -> Self
    where
        F: Fn(&FormState) -> bool + Send + Sync + 'static,
    {
        self.should_render = Some(Arc::new(rule));
        self
    }

    pub fn validator(&self) -> Option<&Arc<dyn SectionValidator>> {
        self.validator.as_ref()
    }

    pub fn is_visible(&self, state: &FormState) -> bool {
        self.should_render.as_ref().map_or(true, |rule| rule(state))
    }
}

impl fmt::Debug for SectionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionDefinition")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("is_optional", &self.is_optional)
            .field("has_validator", &self.validator.is_some())
            .field("conditional", &self.should_render.is_some())
            .finish()
    }
}

/// Ordered, immutable set of sections for one wizard.
#[derive(Debug, Clone)]
pub struct SectionRegistry {
    sections: Vec<Arc<SectionDefinition>>,
}

impl SectionRegistry {
    pub fn new(sections: Vec<SectionDefinition>) -> Result<Self, RegistryError> {
        if sections.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for section in &sections {
            if !seen.insert(section.id.clone()) {
                return Err(RegistryError::DuplicateSection(section.id.clone()));
            }
        }
        Ok(Self {
            sections: sections.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn all(&self) -> &[Arc<SectionDefinition>] {
        &self.sections
    }

    pub fn get(&self, id: &SectionId) -> Option<&Arc<SectionDefinition>> {
        self.sections.iter().find(|section| &section.id == id)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Sections whose visibility rule holds for `state`, in declaration order.
    pub fn visible(&self, state: &FormState) -> Vec<Arc<SectionDefinition>> {
        self.sections
            .iter()
            .filter(|section| section.is_visible(state))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use shared::domain::SectionData;

    #[test]
    fn rejects_duplicate_ids() {
        let err = SectionRegistry::new(vec![
            SectionDefinition::new("section1", "Identity"),
            SectionDefinition::new("section1", "Identity again"),
        ])
        .expect_err("duplicate");
        assert!(matches!(err, RegistryError::DuplicateSection(id) if id.as_str() == "section1"));
    }

    #[test]
    fn rejects_empty_registry() {
        assert!(matches!(
            SectionRegistry::new(Vec::new()),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn visibility_follows_current_state_and_keeps_order() {
        let registry = SectionRegistry::new(vec![
            SectionDefinition::new("section1", "Pathology"),
            SectionDefinition::new("section4", "Staging"),
            SectionDefinition::new("section5", "Tumour detail")
                .render_when(|state| state.has_value(&"section1".into(), "pathologyType")),
            SectionDefinition::new("section6", "Treatment"),
        ])
        .expect("registry");

        let mut state = FormState::new();
        let ids = |state: &FormState| {
            registry
                .visible(state)
                .iter()
                .map(|s| s.id.as_str().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&state), ["section1", "section4", "section6"]);

        let mut pathology = SectionData::new();
        pathology.insert("pathologyType".into(), json!("carcinoma"));
        state.merge_section("section1".into(), pathology);
        assert_eq!(ids(&state), ["section1", "section4", "section5", "section6"]);
    }
}
