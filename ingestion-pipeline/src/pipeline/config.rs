use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    /// Number of characters of extracted text included in debug previews.
    pub preview_chars: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 200,
            preview_chars: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    pub ocr_model: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            ocr_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl From<&AppConfig> for IngestionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                chunk_max_chars: config.chunk_max_chars,
                chunk_overlap_chars: config.chunk_overlap_chars,
                ..IngestionTuning::default()
            },
            ocr_model: config.ocr_model.clone(),
        }
    }
}
