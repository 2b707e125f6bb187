#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    #[default]
    Gpt4o,
    Gpt4Turbo,
}

impl Model {
    /// Identifier sent verbatim to the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Gpt4o => "gpt-4o-2024-05-13",
            Model::Gpt4Turbo => "gpt-4-turbo",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "gpt-4o-2024-05-13" => Some(Model::Gpt4o),
            "gpt-4-turbo" => Some(Model::Gpt4Turbo),
            _ => None,
        }
    }

    pub fn all() -> Vec<Model> {
        vec![Model::Gpt4o, Model::Gpt4Turbo]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Model::Gpt4o => "GPT-4o (2024-05-13)",
            Model::Gpt4Turbo => "GPT-4 Turbo",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_parse_back() {
        for model in Model::all() {
            assert_eq!(Model::from_str(model.as_str()), Some(model));
        }
    }

    #[test]
    fn test_unknown_model() {
        assert_eq!(Model::from_str("gpt-3.5-turbo"), None);
        assert_eq!(Model::from_str(""), None);
    }

    #[test]
    fn test_default_is_gpt4o() {
        assert_eq!(Model::default().as_str(), "gpt-4o-2024-05-13");
    }
}
