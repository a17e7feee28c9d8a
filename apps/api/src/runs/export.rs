//! Turning accepted cards into something Anki can import.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::anki_connect::AnkiNote;
use crate::errors::AppError;
use crate::models::card::CardSuggestionRow;
use crate::models::settings::SettingsRow;
use crate::runs::converter::{PackageBuilder, PackageRecord};

pub const DEFAULT_DECK: &str = "Renforce";

/// Keys owned by the record itself; metadata may not replace them.
const CORE_FIELDS: [&str; 4] = ["front", "back", "tags", "cardType"];

/// A finished package ready to stream to the client.
#[derive(Debug, Clone)]
pub struct PackageFile {
    pub filename: String,
    pub bytes: Bytes,
}

/// `renforce-<first 8 of run id>-<yyyymmdd>.apkg`
pub fn package_filename(run_id: Uuid, date: NaiveDate) -> String {
    let run = run_id.simple().to_string();
    format!("renforce-{}-{}.apkg", &run[..8], date.format("%Y%m%d"))
}

pub fn to_package_record(card: &CardSuggestionRow) -> PackageRecord {
    let mut extra = Map::new();
    if let Value::Object(metadata) = &card.metadata {
        for (key, value) in metadata {
            if !CORE_FIELDS.contains(&key.as_str()) {
                extra.insert(key.clone(), value.clone());
            }
        }
    }
    PackageRecord {
        front: card.effective_front().to_string(),
        back: card.effective_back().to_string(),
        tags: card.tags.clone(),
        card_type: card.card_type.clone(),
        extra,
    }
}

fn no_accepted(run_id: Uuid) -> AppError {
    AppError::bad_request("no_accepted", format!("Run {run_id} has no accepted cards"))
}

/// Reads the package the converter already produced for a run.
pub async fn read_prebuilt(
    run_id: Uuid,
    apkg_path: Option<&str>,
    today: NaiveDate,
) -> Result<PackageFile, AppError> {
    let path = apkg_path
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} has no pre-built package")))?;

    let bytes = tokio::fs::read(path).await.map_err(|e| {
        warn!(run_id = %run_id, path, error = %e, "Pre-built package unreadable");
        AppError::NotFound(format!("Package for run {run_id} is not available"))
    })?;

    Ok(PackageFile {
        filename: package_filename(run_id, today),
        bytes: Bytes::from(bytes),
    })
}

/// Builds a package from accepted cards in a scratch directory. An empty set is
/// rejected before the builder runs.
pub async fn build_accepted_package(
    builder: &dyn PackageBuilder,
    run_id: Uuid,
    accepted: &[CardSuggestionRow],
    today: NaiveDate,
) -> Result<PackageFile, AppError> {
    if accepted.is_empty() {
        return Err(no_accepted(run_id));
    }

    let records: Vec<PackageRecord> = accepted.iter().map(to_package_record).collect();
    let workdir = tempfile::tempdir().map_err(|e| AppError::Internal(e.into()))?;
    let output = workdir.path().join("cards.apkg");

    builder.build_package(&records, &output).await?;
    let bytes = read_output(&output).await?;

    info!(run_id = %run_id, cards = records.len(), "Built package");
    Ok(PackageFile {
        filename: package_filename(run_id, today),
        bytes,
    })
}

async fn read_output(path: &Path) -> Result<Bytes, AppError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        AppError::Internal(anyhow::anyhow!(
            "converter reported success but {} is unreadable: {e}",
            path.display()
        ))
    })?;
    Ok(Bytes::from(bytes))
}

/// Deck for a card: its own `deck` metadata, then the course's configured deck,
/// then the default.
pub fn deck_for(card: &CardSuggestionRow, settings: Option<&SettingsRow>) -> String {
    if let Some(deck) = card.metadata.get("deck").and_then(Value::as_str) {
        if !deck.trim().is_empty() {
            return deck.to_string();
        }
    }
    card.course
        .as_deref()
        .zip(settings)
        .and_then(|(course, settings)| settings.deck_for_course(course))
        .unwrap_or(DEFAULT_DECK)
        .to_string()
}

pub fn to_anki_note(card: &CardSuggestionRow, settings: Option<&SettingsRow>) -> AnkiNote {
    let (model, first, second) = if card.card_type == "cloze" {
        ("Cloze", "Text", "Extra")
    } else {
        ("Basic", "Front", "Back")
    };
    AnkiNote {
        deck_name: deck_for(card, settings),
        model_name: model.to_string(),
        fields: BTreeMap::from([
            (first.to_string(), card.effective_front().to_string()),
            (second.to_string(), card.effective_back().to_string()),
        ]),
        tags: card.tags.clone(),
    }
}

pub fn anki_notes_for(
    run_id: Uuid,
    accepted: &[CardSuggestionRow],
    settings: Option<&SettingsRow>,
) -> Result<Vec<AnkiNote>, AppError> {
    if accepted.is_empty() {
        return Err(no_accepted(run_id));
    }
    Ok(accepted.iter().map(|c| to_anki_note(c, settings)).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::models::card::fixtures::pending_card;
    use crate::runs::converter::ConverterError;

    #[derive(Default)]
    struct CountingBuilder {
        calls: AtomicUsize,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl PackageBuilder for CountingBuilder {
        async fn build_package(
            &self,
            records: &[PackageRecord],
            output: &Path,
        ) -> Result<(), ConverterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stderr) = &self.fail_with {
                return Err(ConverterError::Failed {
                    code: Some(1),
                    stderr: stderr.clone(),
                });
            }
            let body = serde_json::to_vec(records).unwrap();
            tokio::fs::write(output, body).await?;
            Ok(())
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    fn settings_with_deck(course: &str, deck: &str) -> SettingsRow {
        SettingsRow {
            user_id: Uuid::new_v4(),
            courses: json!({ course: { "paths": ["math214/**/*.tex"], "deck": deck } }),
            llm: json!({}),
            parsing: json!({}),
            cards: json!({}),
            sync_target: "apkg".into(),
            anki_connect_url: None,
            dev_mode: false,
            yaml_repo_id: None,
            yaml_path: None,
            imported_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_filename_format() {
        let run_id = Uuid::parse_str("1a2b3c4d-0000-0000-0000-000000000000").unwrap();
        assert_eq!(package_filename(run_id, day()), "renforce-1a2b3c4d-20240309.apkg");
    }

    #[test]
    fn test_record_uses_edited_text_and_keeps_core_fields() {
        let mut card = pending_card(Uuid::new_v4());
        card.front_edited = Some("Edited front".into());
        card.metadata = json!({ "deck": "Analysis", "front": "overridden?", "slot": 2 });

        let record = to_package_record(&card);
        assert_eq!(record.front, "Edited front");
        assert_eq!(record.back, card.back);
        assert_eq!(record.extra.get("deck"), Some(&json!("Analysis")));
        assert!(!record.extra.contains_key("front"));
        assert_eq!(record.extra.get("slot"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_no_accepted_skips_builder() {
        let builder = CountingBuilder::default();
        let err = build_accepted_package(&builder, Uuid::new_v4(), &[], day())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest { code: "no_accepted", .. }));
        assert_eq!(builder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_build_returns_package_bytes() {
        let builder = CountingBuilder::default();
        let cards = vec![pending_card(Uuid::new_v4())];
        let file = build_accepted_package(&builder, Uuid::new_v4(), &cards, day())
            .await
            .unwrap();
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
        let records: Value = serde_json::from_slice(&file.bytes).unwrap();
        assert_eq!(records[0]["cardType"], "basic");
        assert!(file.filename.ends_with("-20240309.apkg"));
    }

    #[tokio::test]
    async fn test_build_failure_maps_to_build_failed() {
        let builder = CountingBuilder {
            fail_with: Some("Traceback ...\nValueError: bad cloze".into()),
            ..Default::default()
        };
        let cards = vec![pending_card(Uuid::new_v4())];
        let err = build_accepted_package(&builder, Uuid::new_v4(), &cards, day())
            .await
            .unwrap_err();
        match err {
            AppError::BuildFailed { diagnostic } => assert!(diagnostic.contains("bad cloze")),
            other => panic!("expected BuildFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prebuilt_missing_is_not_found() {
        let run_id = Uuid::new_v4();
        let none = read_prebuilt(run_id, None, day()).await.unwrap_err();
        assert!(matches!(none, AppError::NotFound(_)));

        let gone = read_prebuilt(run_id, Some("/nonexistent/cards.apkg"), day())
            .await
            .unwrap_err();
        assert!(matches!(gone, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_prebuilt_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.apkg");
        tokio::fs::write(&path, b"PK\x03\x04").await.unwrap();

        let file = read_prebuilt(Uuid::new_v4(), path.to_str(), day()).await.unwrap();
        assert_eq!(&file.bytes[..], b"PK\x03\x04");
    }

    #[test]
    fn test_deck_resolution_order() {
        let settings = settings_with_deck("math214", "Real Analysis");
        let mut card = pending_card(Uuid::new_v4());

        assert_eq!(deck_for(&card, Some(&settings)), "Real Analysis");
        assert_eq!(deck_for(&card, None), DEFAULT_DECK);

        card.metadata = json!({ "deck": "Override" });
        assert_eq!(deck_for(&card, Some(&settings)), "Override");
    }

    #[test]
    fn test_cloze_note_fields() {
        let mut card = pending_card(Uuid::new_v4());
        card.card_type = "cloze".into();
        card.front = "A {{c1::group}} has an identity.".into();

        let note = to_anki_note(&card, None);
        assert_eq!(note.model_name, "Cloze");
        assert_eq!(note.fields["Text"], card.front);
        assert!(note.fields.contains_key("Extra"));

        let basic = to_anki_note(&pending_card(Uuid::new_v4()), None);
        assert_eq!(basic.model_name, "Basic");
        assert!(basic.fields.contains_key("Front"));
    }
}
