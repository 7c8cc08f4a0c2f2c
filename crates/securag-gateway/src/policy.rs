//! Default guardrail policy.
//!
//! Assembles the executor the gateway runs when no custom wiring is done:
//! a threaded input-screening pipe (keyword screen plus, when an
//! `HF_AUTH_TOKEN` is configured, two hosted classifiers) and a sequential
//! output pipe screening model replies for PII-shaped patterns.

use crate::config::Settings;
use securag_core::Executor;
use securag_core::error::ConfigResult;
use securag_core::module::{
    HttpRequestConfig, HttpRequestFilter, KeywordFilter, ModuleKind, RegexFilter, regex_flags,
};
use securag_core::pipe::{FlaggingStrategy, SequentialPipe, ThreadPipe};
use std::collections::BTreeMap;

const PROMPT_INJECTION_URL: &str =
    "https://router.huggingface.co/hf-inference/models/protectai/deberta-v3-base-prompt-injection-v2/";
const TOXICITY_URL: &str =
    "https://router.huggingface.co/hf-inference/models/s-nlp/roberta_toxicity_classifier/";

pub fn build_executor(settings: &Settings) -> ConfigResult<Executor> {
    let keywords = BTreeMap::from([(
        1,
        vec![
            "sensitive".to_string(),
            "confidential".to_string(),
            "top secret".to_string(),
        ],
    )]);
    let keyword_screen = KeywordFilter::new("Keyword Screen", keywords)?
        .with_description("Screens prompts for restricted terms.")
        .with_audit(true);

    let mut modules: Vec<ModuleKind> = vec![keyword_screen.into()];
    if let Some(token) = &settings.hf_auth_token {
        modules.push(
            hosted_classifier(
                "Prompt Injection Classifier",
                PROMPT_INJECTION_URL,
                "[0][?label=='INJECTION'].score | [0]",
                token,
            )?
            .into(),
        );
        modules.push(
            hosted_classifier(
                "Toxicity Classifier",
                TOXICITY_URL,
                "[0][?label=='toxic'].score | [0]",
                token,
            )?
            .into(),
        );
    }

    let input_screening = ThreadPipe::new("Input Screening", modules)?
        .with_description("Screens user turns before generation.")
        .with_audit(true)
        .with_flagging_strategy(FlaggingStrategy::Any)
        .with_stop_on_flag(true)
        .with_max_workers(5);

    // Model replies are screened for PII-shaped patterns: card-number-like
    // digit runs and SSN-like groups.
    let pii_patterns = BTreeMap::from([(
        1,
        vec![
            r"\b(?:\d[ -]?){13,16}\b".to_string(),
            r"\b\d{3}-\d{2}-\d{4}\b".to_string(),
        ],
    )]);
    let pii_screen = RegexFilter::new("PII Screen", pii_patterns, regex_flags::NONE)?
        .with_description("Screens model replies for PII-shaped patterns.")
        .with_flagged_response("Cannot return the response: it contains PII-like content.")
        .with_audit(true);
    let response_screening = SequentialPipe::new("Response Screening", vec![pii_screen.into()])?
        .with_description("Screens model replies before they reach the client.")
        .with_audit(true);

    Ok(Executor::new(
        vec![input_screening.into()],
        vec![response_screening.into()],
        true,
    ))
}

fn hosted_classifier(
    name: &str,
    url: &str,
    scoring_field: &str,
    token: &str,
) -> ConfigResult<HttpRequestFilter> {
    let config = HttpRequestConfig {
        url: url.to_string(),
        query_field: "inputs".to_string(),
        headers: vec![
            ("Authorization".to_string(), format!("Bearer {token}")),
            ("content-type".to_string(), "application/json".to_string()),
        ],
        timeout_ms: 5_000,
        scoring_field: scoring_field.to_string(),
        flagging_thresh: 0.5,
        default_flag_on_fail: true,
        ..Default::default()
    };
    Ok(HttpRequestFilter::new(name, config)?
        .with_description("Hosted classifier over the HF inference API.")
        .with_audit(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use securag_core::error::ExecutorError;

    #[tokio::test]
    async fn default_policy_flags_restricted_terms() {
        let mut executor = build_executor(&Settings::default()).unwrap();
        let err = executor
            .execute_inputs("please summarize this top secret report")
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::FlaggedInput);
        assert!(executor.input_flagged_response().contains("top secret"));
    }

    #[tokio::test]
    async fn default_policy_passes_clean_text() {
        let mut executor = build_executor(&Settings::default()).unwrap();
        let out = executor
            .execute_inputs("what is the capital of France?")
            .await
            .unwrap();
        assert_eq!(out, "what is the capital of France?");
        assert!(!executor.input_flagged());
    }

    #[tokio::test]
    async fn output_screen_flags_pii_shapes() {
        let mut executor = build_executor(&Settings::default()).unwrap();
        let err = executor
            .execute_outputs("the number is 4111 1111 1111 1111")
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::FlaggedOutput);
    }

    /// Classifier modules only join the pipe when a token is configured.
    #[test]
    fn classifiers_require_a_token() {
        let without = build_executor(&Settings::default()).unwrap();
        assert_eq!(without.input_pipes()[0].modules().len(), 1);

        let mut settings = Settings::default();
        settings.hf_auth_token = Some("hf_test".to_string());
        let with = build_executor(&settings).unwrap();
        assert_eq!(with.input_pipes()[0].modules().len(), 3);
    }
}
