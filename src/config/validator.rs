use crate::config::{parse_duration, Config, SCHEMA_VERSION};
use crate::error::{HybridError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_rerank(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_pipeline(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HybridError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.per_branch_limit == 0 {
            errors.push(ValidationError::new(
                "retrieval.per_branch_limit",
                "Per-branch limit must be greater than 0",
            ));
        }

        Self::check_duration(
            "retrieval.semantic_timeout",
            &config.retrieval.semantic_timeout,
            errors,
        );
        Self::check_duration(
            "retrieval.keyword_timeout",
            &config.retrieval.keyword_timeout,
            errors,
        );
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let fusion = &config.fusion;

        if fusion.rrf_k.is_nan() || fusion.rrf_k <= 0.0 {
            errors.push(ValidationError::new(
                "fusion.rrf_k",
                format!("RRF k must be positive, got {}", fusion.rrf_k),
            ));
        }

        if fusion.semantic_weight.is_nan() || fusion.semantic_weight <= 0.0 {
            errors.push(ValidationError::new(
                "fusion.semantic_weight",
                "Semantic weight must be positive",
            ));
        }

        if fusion.keyword_weight.is_nan() || fusion.keyword_weight <= 0.0 {
            errors.push(ValidationError::new(
                "fusion.keyword_weight",
                "Keyword weight must be positive",
            ));
        }

        if fusion.pool_size == 0 {
            errors.push(ValidationError::new(
                "fusion.pool_size",
                "Pool size must be greater than 0",
            ));
        }
    }

    fn validate_rerank(config: &Config, errors: &mut Vec<ValidationError>) {
        let scorer = &config.rerank.scorer;
        let valid_scorers = ["noop", "cross-encoder"];
        if !valid_scorers.contains(&scorer.as_str()) {
            errors.push(ValidationError::new(
                "rerank.scorer",
                format!(
                    "Scorer must be one of {:?}, got '{}'",
                    valid_scorers, scorer
                ),
            ));
        }

        if config.rerank.scorer == "cross-encoder" && config.rerank.model.is_empty() {
            errors.push(ValidationError::new(
                "rerank.model",
                "Model name cannot be empty for the cross-encoder scorer",
            ));
        }

        if config.rerank.pool_size == 0 {
            errors.push(ValidationError::new(
                "rerank.pool_size",
                "Rerank pool size must be greater than 0",
            ));
        }

        Self::check_duration("rerank.timeout", &config.rerank.timeout, errors);
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        let backend = &config.cache.backend;
        if backend != "memory" && backend != "sqlite" {
            errors.push(ValidationError::new(
                "cache.backend",
                format!("Backend must be 'memory' or 'sqlite', got '{}'", backend),
            ));
        }

        if backend == "sqlite" && config.cache.sqlite_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "cache.sqlite_path",
                "SQLite cache path cannot be empty",
            ));
        }

        if config.cache.bucket_dimensions == 0 {
            errors.push(ValidationError::new(
                "cache.bucket_dimensions",
                "Bucket dimensions must be greater than 0",
            ));
        }

        if config.cache.bucket_precision > 6 {
            errors.push(ValidationError::new(
                "cache.bucket_precision",
                format!(
                    "Bucket precision must be at most 6 decimals, got {}",
                    config.cache.bucket_precision
                ),
            ));
        }

        if backend == "memory" && config.cache.memory_capacity == 0 {
            errors.push(ValidationError::new(
                "cache.memory_capacity",
                "Memory cache capacity must be greater than 0",
            ));
        }

        Self::check_duration("cache.default_ttl", &config.cache.default_ttl, errors);
        Self::check_duration("cache.max_ttl", &config.cache.max_ttl, errors);
        Self::check_duration("cache.related_ttl", &config.cache.related_ttl, errors);
        Self::check_duration("cache.read_timeout", &config.cache.read_timeout, errors);
        Self::check_duration("cache.write_timeout", &config.cache.write_timeout, errors);
    }

    fn validate_pipeline(config: &Config, errors: &mut Vec<ValidationError>) {
        Self::check_duration(
            "pipeline.request_budget",
            &config.pipeline.request_budget,
            errors,
        );

        if config.pipeline.default_limit == 0 {
            errors.push(ValidationError::new(
                "pipeline.default_limit",
                "Default limit must be greater than 0",
            ));
        }

        let policy = &config.pipeline.missing_embedding;
        if policy != "reject" && policy != "keyword_only" {
            errors.push(ValidationError::new(
                "pipeline.missing_embedding",
                format!(
                    "Policy must be 'reject' or 'keyword_only', got '{}'",
                    policy
                ),
            ));
        }
    }

    fn check_duration(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        match parse_duration(value) {
            Ok(d) if d.is_zero() => errors.push(ValidationError::new(
                path,
                "Duration must be greater than zero",
            )),
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            )),
        }
    }
}
