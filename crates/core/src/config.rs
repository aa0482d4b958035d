use crate::embeddings::{NomicEmbedder, NOMIC_BASE_URL};
use crate::llm::{OpenAiChatModel, DEFAULT_CHAT_MODEL, OPENAI_BASE_URL};
use crate::models::{CollectionCheck, CollectionSpec};
use crate::stores::{QdrantStore, DEFAULT_QDRANT_URL};
use crate::RagError;
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_PORT: u16 = 5000;

/// Which outbound services a mode talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Index,
    Chat,
    Serve,
}

impl Mode {
    fn needs_chat_model(self) -> bool {
        matches!(self, Self::Chat | Self::Serve)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub nomic_api_key: Option<String>,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub openai_base_url: String,
    pub nomic_base_url: String,
    pub chat_model: String,
    pub temperature: f32,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub collection: CollectionSpec,
    pub collection_check: CollectionCheck,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            nomic_api_key: None,
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            qdrant_api_key: None,
            openai_base_url: OPENAI_BASE_URL.to_string(),
            nomic_base_url: NOMIC_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.0,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            upload_dir: PathBuf::from("uploads"),
            collection: CollectionSpec::default(),
            collection_check: CollectionCheck::Trust,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl Settings {
    /// Fails fast on missing credentials or malformed service URLs before
    /// any service is contacted.
    pub fn validate(&self, mode: Mode) -> Result<(), RagError> {
        if present(&self.nomic_api_key).is_none() {
            return Err(RagError::Config("missing NOMIC_API_KEY".to_string()));
        }
        if mode.needs_chat_model() && present(&self.openai_api_key).is_none() {
            return Err(RagError::Config("missing OPENAI_API_KEY".to_string()));
        }

        for (name, value) in [
            ("QDRANT_URL", &self.qdrant_url),
            ("NOMIC_BASE_URL", &self.nomic_base_url),
            ("OPENAI_BASE_URL", &self.openai_base_url),
        ] {
            Url::parse(value)
                .map_err(|error| RagError::Config(format!("invalid {name} {value:?}: {error}")))?;
        }

        Ok(())
    }

    pub fn embedder(&self) -> Result<NomicEmbedder, RagError> {
        let key = present(&self.nomic_api_key)
            .ok_or_else(|| RagError::Config("missing NOMIC_API_KEY".to_string()))?;
        Ok(NomicEmbedder::new(key)
            .with_base_url(&self.nomic_base_url)
            .with_model(crate::models::EMBEDDING_MODEL, self.collection.dimensions))
    }

    pub fn chat_model(&self) -> Result<OpenAiChatModel, RagError> {
        let key = present(&self.openai_api_key)
            .ok_or_else(|| RagError::Config("missing OPENAI_API_KEY".to_string()))?;
        Ok(OpenAiChatModel::new(key)
            .with_base_url(&self.openai_base_url)
            .with_model(&self.chat_model)
            .with_temperature(self.temperature))
    }

    pub fn vector_store(&self) -> QdrantStore {
        QdrantStore::new(&self.qdrant_url, &self.collection.name)
            .with_api_key(self.qdrant_api_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_keys() -> Settings {
        Settings {
            openai_api_key: Some("sk-test".to_string()),
            nomic_api_key: Some("nk-test".to_string()),
            ..Settings::default()
        }
    }

    #[test]
    fn defaults_match_local_deployment() {
        let settings = Settings::default();
        assert_eq!(settings.qdrant_url, "http://localhost:6333");
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.collection.name, "bank_documents");
        assert_eq!(settings.chat_model, "gpt-4");
    }

    #[test]
    fn missing_credentials_fail_fast() {
        let settings = Settings::default();
        let error = settings.validate(Mode::Index).unwrap_err();
        assert_eq!(error.to_string(), "configuration error: missing NOMIC_API_KEY");

        let settings = Settings {
            nomic_api_key: Some("nk".to_string()),
            openai_api_key: Some("   ".to_string()),
            ..Settings::default()
        };
        assert!(settings.validate(Mode::Index).is_ok());
        let error = settings.validate(Mode::Serve).unwrap_err();
        assert!(error.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn malformed_urls_are_rejected() {
        let settings = Settings {
            qdrant_url: "localhost:6333 /".to_string(),
            ..with_keys()
        };
        let error = settings.validate(Mode::Chat).unwrap_err();
        assert!(error.to_string().contains("QDRANT_URL"));
    }

    #[test]
    fn builds_clients_from_settings() {
        let settings = with_keys();
        assert!(settings.validate(Mode::Serve).is_ok());
        assert!(settings.embedder().is_ok());
        assert!(settings.chat_model().is_ok());
        assert_eq!(settings.vector_store().collection(), "bank_documents");
    }
}
