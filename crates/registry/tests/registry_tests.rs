use std::fs;
use std::path::Path;

use arcade_registry::{ArcadeConfig, CONFIG_PATH_ENV, DefinitionRegistry, RegistryError, collect_definition_files, default_config_path, validate_corpus};
use arcade_types::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_PROBE_CONCURRENCY, Interaction, OutputType};
use serde_json::Value;

const STREAMING_CHAT: &str = include_str!("data/streaming_chat.json");
const POLLING_IMAGE: &str = include_str!("data/polling_image.json");
const SYNC_AUDIO: &str = include_str!("data/sync_audio.json");
const INVALID_POLLING: &str = include_str!("data/invalid_polling.json");

fn value(raw: &str) -> Value {
    serde_json::from_str(raw).expect("fixture is JSON")
}

fn write(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create fixture dir");
    }
    fs::write(path, content).expect("write fixture");
}

fn valid_values() -> Vec<(String, Value)> {
    vec![
        ("chat.json".to_string(), value(STREAMING_CHAT)),
        ("image.json".to_string(), value(POLLING_IMAGE)),
        ("audio.json".to_string(), value(SYNC_AUDIO)),
    ]
}

#[test]
fn loads_fixtures_into_typed_definitions() {
    let registry = DefinitionRegistry::from_values(valid_values(), true).expect("load registry");

    assert_eq!(registry.len(), 3);
    let chat = registry.get("groq-llama-3-3-70b").expect("chat definition");
    assert!(matches!(&chat.interaction, Interaction::Streaming { stream_path } if stream_path == "$.choices[0].delta.content"));
    let image = registry.get("fal-flux-schnell").expect("image definition");
    assert_eq!(image.polling().map(|polling| polling.poll_interval_ms), Some(1000));
    assert_eq!(registry.origin("fal-flux-schnell"), Some("image.json"));
}

#[test]
fn summaries_are_sorted_by_display_name() {
    let registry = DefinitionRegistry::from_values(valid_values(), true).expect("load registry");

    let summaries = registry.summaries();
    let names: Vec<&str> = summaries.iter().map(|summary| summary.name.as_str()).collect();

    assert_eq!(names, vec!["FLUX.1 [schnell] (fal)", "Llama 3.3 70B (Groq)", "Multilingual v2 (ElevenLabs)"]);
    assert_eq!(summaries[0].output_type, OutputType::Image);
    assert_eq!(summaries[0].pattern, "polling");
    assert_eq!(summaries[2].output_type, OutputType::Audio);
}

#[test]
fn unknown_ids_are_not_found() {
    let registry = DefinitionRegistry::from_values(valid_values(), true).expect("load registry");
    let error = registry.get("nope").expect_err("missing id");
    assert!(matches!(error, RegistryError::DefinitionNotFound { ref id } if id == "nope"));
}

#[test]
fn strict_load_reports_every_violation() {
    let mut values = valid_values();
    values.push(("broken.json".to_string(), value(INVALID_POLLING)));

    let error = DefinitionRegistry::from_values(values, true).expect_err("strict load fails");

    match error {
        RegistryError::Invalid { origin, errors } => {
            assert_eq!(origin, "broken.json");
            assert_eq!(
                errors,
                vec![
                    "status_url must contain {request_id} placeholder".to_string(),
                    "Example 'One' missing required param 'prompt'".to_string(),
                    "Example 'Two' missing required param 'prompt'".to_string(),
                ]
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn lenient_load_skips_invalid_and_duplicate_definitions() {
    let mut values = valid_values();
    values.push(("broken.json".to_string(), value(INVALID_POLLING)));
    values.push(("copy.json".to_string(), value(STREAMING_CHAT)));

    let registry = DefinitionRegistry::from_values(values, false).expect("lenient load");

    assert_eq!(registry.len(), 3);
    assert_eq!(registry.origin("groq-llama-3-3-70b"), Some("chat.json"));
    let rejected: Vec<&str> = registry.rejected().iter().map(|rejected| rejected.origin.as_str()).collect();
    assert_eq!(rejected, vec!["broken.json", "copy.json"]);
    assert_eq!(
        registry.rejected()[1].errors,
        vec!["Duplicate id 'groq-llama-3-3-70b' (also in chat.json)".to_string()]
    );
}

#[test]
fn invalid_definition_does_not_claim_its_id() {
    let mut broken = value(STREAMING_CHAT);
    broken["request"]["url"] = Value::String("http://insecure.example.com".to_string());
    let values = vec![
        ("broken-chat.json".to_string(), broken),
        ("chat.json".to_string(), value(STREAMING_CHAT)),
    ];

    let registry = DefinitionRegistry::from_values(values, false).expect("lenient load");

    assert_eq!(registry.origin("groq-llama-3-3-70b"), Some("chat.json"));
    assert_eq!(registry.rejected().len(), 1);
    assert_eq!(
        registry.rejected()[0].errors,
        vec!["request.url must start with https://".to_string()]
    );
}

#[test]
fn strict_load_rejects_duplicates() {
    let mut values = valid_values();
    values.push(("copy.json".to_string(), value(STREAMING_CHAT)));

    let error = DefinitionRegistry::from_values(values, true).expect_err("duplicate id");

    assert!(matches!(
        error,
        RegistryError::DuplicateId { ref id, ref first, ref second }
            if id == "groq-llama-3-3-70b" && first == "chat.json" && second == "copy.json"
    ));
}

#[test]
fn loads_directories_recursively_in_path_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(temp.path(), "image/flux.json", POLLING_IMAGE);
    write(temp.path(), "chat/groq.json", STREAMING_CHAT);
    write(temp.path(), "audio/tts.json", SYNC_AUDIO);
    write(temp.path(), "README.md", "not a definition");
    write(temp.path(), "chat/notes.json", "{ not json");

    let files = collect_definition_files(temp.path()).expect("walk");
    let names: Vec<String> = files
        .iter()
        .map(|path| path.strip_prefix(temp.path()).expect("relative").display().to_string())
        .collect();
    assert_eq!(names, vec!["audio/tts.json", "chat/groq.json", "chat/notes.json", "image/flux.json"]);

    let registry = DefinitionRegistry::load_from_dir(temp.path(), false).expect("lenient load");
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.rejected().len(), 1);
    assert!(registry.rejected()[0].errors[0].starts_with("Invalid JSON: "));

    let strict = DefinitionRegistry::load_from_dir(temp.path(), true).expect_err("strict load");
    assert!(matches!(strict, RegistryError::Json { .. }));
}

#[test]
fn corpus_report_counts_passes_and_duplicates() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(temp.path(), "a/chat.json", STREAMING_CHAT);
    write(temp.path(), "b/broken.json", INVALID_POLLING);
    write(temp.path(), "c/chat-copy.json", STREAMING_CHAT);
    write(temp.path(), "d/garbage.json", "[1, 2");

    let files = collect_definition_files(temp.path()).expect("walk");
    let report = validate_corpus(&files);

    assert_eq!(report.total(), 4);
    assert_eq!(report.passed(), 1);
    assert!(!report.is_success());
    assert_eq!(report.files[1].errors.len(), 3);
    let first = temp.path().join("a/chat.json");
    assert_eq!(
        report.files[2].errors,
        vec![format!("Duplicate id 'groq-llama-3-3-70b' (also in {})", first.display())]
    );
    assert!(report.files[3].errors[0].starts_with("Invalid JSON: "));
}

#[test]
fn shipped_definitions_are_valid() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../definitions");
    let files = collect_definition_files(&dir).expect("definitions dir");
    let report = validate_corpus(&files);

    let failures: Vec<_> = report.files.iter().filter(|file| !file.is_valid()).collect();
    assert!(failures.is_empty(), "invalid definitions: {failures:?}");
    assert!(report.is_success());
}

#[test]
fn config_defaults_fill_partial_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.json");
    fs::write(&path, r#"{"definitions_dir": "/srv/arcade/definitions", "key_probe_concurrency": 2}"#).expect("write config");

    let config = ArcadeConfig::load_from(path);

    assert_eq!(config.definitions_dir, "/srv/arcade/definitions");
    assert_eq!(config.key_probe_concurrency, 2);
    assert_eq!(config.request_timeout_secs, 60);
    assert_eq!(config.max_poll_attempts, DEFAULT_MAX_POLL_ATTEMPTS);
}

#[test]
fn malformed_or_missing_config_yields_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.json");
    fs::write(&path, "definitions_dir = 'toml?'").expect("write config");

    assert_eq!(ArcadeConfig::load_from(path), ArcadeConfig::default());
    assert_eq!(ArcadeConfig::default().key_probe_concurrency, DEFAULT_PROBE_CONCURRENCY);
    assert_eq!(ArcadeConfig::load_from(temp.path().join("absent.json")), ArcadeConfig::default());
}

#[test]
fn config_path_honours_environment_override() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("custom.json");
    fs::write(&path, r#"{"status_timeout_secs": 5}"#).expect("write config");

    temp_env::with_var(CONFIG_PATH_ENV, Some(path.to_str().expect("utf-8 path")), || {
        assert_eq!(default_config_path(), path);
        assert_eq!(ArcadeConfig::load().status_timeout_secs, 5);
    });

    temp_env::with_var(CONFIG_PATH_ENV, Some("  "), || {
        assert!(default_config_path().ends_with("arcade/config.json"));
    });
}
