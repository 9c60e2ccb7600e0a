//! AnkiConnect note source
//!
//! Implements the `NoteSource` trait over the AnkiConnect add-on's HTTP API.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, RetryPolicy};
use bridge_traits::source::{
    NoteId, NoteSource, SourceCard, SourceField, SourceNote, SourceSchedule, SourceUpdate,
};
use core_runtime::config::DEFAULT_ANKICONNECT_URL;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::error::AnkiConnectError;
use crate::types::{
    ActionRequest, ActionResponse, CardInfo, NewNote, NoteInfo, NoteOptions, API_VERSION,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Search matching review cards due today; their `due` is the day counter
const TODAY_QUERY: &str = "prop:due=0 is:review";

/// Deck for new notes that name none
const DEFAULT_DECK: &str = "Default";

/// AnkiConnect note source
///
/// # Example
///
/// ```ignore
/// use provider_ankiconnect::AnkiConnectSource;
/// use bridge_traits::source::NoteSource;
///
/// let source = AnkiConnectSource::local(http_client);
/// let ids = source.find_identifiers("deck:Rust").await?;
/// ```
pub struct AnkiConnectSource {
    http_client: Arc<dyn HttpClient>,
    url: String,

    /// Scheduler day counter, read once
    today: OnceCell<Option<i64>>,
}

impl AnkiConnectSource {
    pub fn new(http_client: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            http_client,
            url: url.into(),
            today: OnceCell::new(),
        }
    }

    /// Source talking to AnkiConnect on its default local port.
    pub fn local(http_client: Arc<dyn HttpClient>) -> Self {
        Self::new(http_client, DEFAULT_ANKICONNECT_URL)
    }

    /// Run one action. Actions without a return value yield `None`.
    async fn invoke<P, T>(
        &self,
        action: &str,
        params: P,
        policy: RetryPolicy,
    ) -> std::result::Result<Option<T>, AnkiConnectError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        let request = HttpRequest::new(HttpMethod::Post, self.url.clone())
            .json(&ActionRequest {
                action,
                version: API_VERSION,
                params,
            })?
            .timeout(REQUEST_TIMEOUT);

        let response = self.http_client.execute_with_retry(request, policy).await?;
        if !response.is_success() {
            return Err(AnkiConnectError::Status(response.status));
        }

        let envelope: ActionResponse<T> = response.json()?;
        if let Some(message) = envelope.error {
            return Err(AnkiConnectError::Action {
                action: action.to_string(),
                message,
            });
        }
        Ok(envelope.result)
    }

    /// Read-only actions may be repeated.
    async fn read<P, T>(&self, action: &str, params: P) -> std::result::Result<T, AnkiConnectError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        self.invoke(action, params, RetryPolicy::default())
            .await?
            .ok_or_else(|| AnkiConnectError::ParseError(format!("{} returned no result", action)))
    }

    /// Write actions are sent once.
    async fn write<P>(&self, action: &str, params: P) -> std::result::Result<(), AnkiConnectError>
    where
        P: Serialize + Send,
    {
        let _: Option<Value> = self.invoke(action, params, RetryPolicy::no_retry()).await?;
        Ok(())
    }

    async fn note_info(&self, id: NoteId) -> std::result::Result<NoteInfo, AnkiConnectError> {
        let notes: Vec<NoteInfo> = self
            .read("notesInfo", json!({ "notes": [id.as_i64()] }))
            .await?;
        notes
            .into_iter()
            .next()
            .filter(|note| note.note_id.is_some())
            .ok_or(AnkiConnectError::NoteNotFound(id.as_i64()))
    }

    /// Restore review state on every card of a note.
    ///
    /// The due date goes first because rescheduling resets the queue; the
    /// suspension flag goes last.
    async fn apply_schedule(
        &self,
        cards: &[i64],
        schedule: &SourceSchedule,
    ) -> std::result::Result<(), AnkiConnectError> {
        if cards.is_empty() || schedule.is_empty() {
            return Ok(());
        }

        if let Some(days) = schedule.due_in_days {
            self.write("setDueDate", json!({ "cards": cards, "days": days.to_string() }))
                .await?;
        }
        if let Some(ease) = schedule.ease_factor {
            self.write(
                "setEaseFactors",
                json!({ "cards": cards, "easeFactors": vec![ease; cards.len()] }),
            )
            .await?;
        }

        let (keys, values) = card_values(schedule);
        if !keys.is_empty() {
            for card in cards {
                self.write(
                    "setSpecificValueOfCard",
                    json!({ "card": card, "keys": keys, "newValues": values, "warning_check": true }),
                )
                .await?;
            }
        }

        if let Some(suspended) = schedule.suspended {
            let action = if suspended { "suspend" } else { "unsuspend" };
            self.write(action, json!({ "cards": cards })).await?;
        }

        debug!("Restored schedule on {} cards", cards.len());
        Ok(())
    }

    async fn card_info(&self, card_id: i64) -> std::result::Result<Option<CardInfo>, AnkiConnectError> {
        let cards: Vec<CardInfo> = self.read("cardsInfo", json!({ "cards": [card_id] })).await?;
        Ok(cards.into_iter().next())
    }

    /// The scheduler's current day number, read on first use.
    async fn scheduler_today(&self) -> std::result::Result<Option<i64>, AnkiConnectError> {
        self.today
            .get_or_try_init(|| self.fetch_today())
            .await
            .copied()
    }

    /// Read the day counter from a review card due today. `None` when no
    /// such card exists.
    async fn fetch_today(&self) -> std::result::Result<Option<i64>, AnkiConnectError> {
        let cards: Vec<i64> = self
            .read("findCards", json!({ "query": TODAY_QUERY }))
            .await?;
        let Some(card_id) = cards.first() else {
            debug!("No review card due today, day counter unknown");
            return Ok(None);
        };
        let today = self.card_info(*card_id).await?.map(|card| card.due);
        debug!("Scheduler day counter: {:?}", today);
        Ok(today)
    }
}

fn to_source_card(card: CardInfo) -> SourceCard {
    SourceCard {
        deck_name: card.deck_name,
        card_type: card.card_type,
        queue: card.queue,
        due: card.due,
        interval: card.interval,
        ease_factor: card.factor,
        repetitions: card.reps,
        lapses: card.lapses,
        custom_data: card.data,
    }
}

/// Raw card columns restored verbatim.
fn card_values(schedule: &SourceSchedule) -> (Vec<&'static str>, Vec<Value>) {
    let mut keys = Vec::new();
    let mut values = Vec::new();
    for (key, value) in [
        ("ivl", schedule.interval.map(Value::from)),
        ("reps", schedule.repetitions.map(Value::from)),
        ("lapses", schedule.lapses.map(Value::from)),
        ("data", schedule.custom_data.clone().map(Value::from)),
    ] {
        if let Some(value) = value {
            keys.push(key);
            values.push(value);
        }
    }
    (keys, values)
}

/// Non-blank field values. Blank ones keep the note type's default.
fn field_map(update: &SourceUpdate) -> BTreeMap<&str, &str> {
    update
        .fields
        .iter()
        .filter(|field| !field.value.trim().is_empty())
        .map(|field| (field.name.as_str(), field.value.as_str()))
        .collect()
}

/// Fields in template order.
fn ordered_fields(note: &NoteInfo) -> Vec<SourceField> {
    let mut fields: Vec<(&String, &crate::types::FieldInfo)> = note.fields.iter().collect();
    fields.sort_by_key(|(_, field)| field.order);
    fields
        .into_iter()
        .map(|(name, field)| SourceField::new(name.clone(), field.value.clone()))
        .collect()
}

#[async_trait]
impl NoteSource for AnkiConnectSource {
    #[instrument(skip(self))]
    async fn find_identifiers(&self, query: &str) -> Result<Vec<NoteId>> {
        let ids: Vec<i64> = self.read("findNotes", json!({ "query": query })).await?;
        info!("Query matched {} notes", ids.len());
        Ok(ids.into_iter().map(NoteId::new).collect())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn get_record(&self, id: NoteId) -> Result<SourceNote> {
        let note = self.note_info(id).await?;

        let card = match note.cards.first() {
            Some(card_id) => self.card_info(*card_id).await?,
            None => {
                warn!("Note {} has no cards", id);
                None
            }
        };

        let scheduler_today = match &card {
            Some(card) if matches!(card.queue, 2 | 3) => self.scheduler_today().await?,
            _ => None,
        };

        Ok(SourceNote {
            id,
            model_name: note.model_name.clone(),
            fields: ordered_fields(&note),
            tags: note.tags,
            modified_at: note.modified,
            card: card.map(to_source_card),
            scheduler_today,
        })
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_records(&self, ids: &[NoteId]) -> Result<()> {
        let notes: Vec<i64> = ids.iter().map(NoteId::as_i64).collect();
        self.write("deleteNotes", json!({ "notes": notes })).await?;
        info!("Deleted {} notes", ids.len());
        Ok(())
    }

    /// AnkiConnect commits every action itself.
    async fn persist(&self) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self, update), fields(model = %update.model_name))]
    async fn create_record(&self, update: &SourceUpdate) -> Result<NoteId> {
        let note = NewNote {
            deck_name: update.deck_name.as_deref().unwrap_or(DEFAULT_DECK),
            model_name: &update.model_name,
            fields: field_map(update),
            tags: &update.tags,
            options: NoteOptions {
                allow_duplicate: true,
            },
        };

        let id: i64 = self
            .invoke("addNote", json!({ "note": note }), RetryPolicy::no_retry())
            .await?
            .ok_or_else(|| AnkiConnectError::ParseError("addNote returned no id".to_string()))?;
        let id = NoteId::new(id);
        info!("Added note {}", id);

        if !update.schedule.is_empty() {
            let cards = self.note_info(id).await?.cards;
            self.apply_schedule(&cards, &update.schedule).await?;
        }
        Ok(id)
    }

    #[instrument(skip(self, update), fields(id = %id))]
    async fn update_record(&self, id: NoteId, update: &SourceUpdate) -> Result<()> {
        self.write(
            "updateNoteFields",
            json!({ "note": { "id": id.as_i64(), "fields": field_map(update) } }),
        )
        .await?;
        self.write(
            "updateNoteTags",
            json!({ "note": id.as_i64(), "tags": update.tags }),
        )
        .await?;

        let cards = self.note_info(id).await?.cards;
        if let Some(deck) = update.deck_name.as_deref().filter(|_| !cards.is_empty()) {
            self.write("changeDeck", json!({ "cards": cards, "deck": deck }))
                .await?;
        }
        self.apply_schedule(&cards, &update.schedule).await?;

        info!("Updated note {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bridge_traits::http::HttpResponse;
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;
    use std::sync::Mutex;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
            async fn execute_with_retry(&self, request: HttpRequest, policy: RetryPolicy) -> Result<HttpResponse>;
        }
    }

    fn reply(body: Value) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        })
    }

    fn action_of(request: &HttpRequest) -> Value {
        request
            .body
            .as_ref()
            .map(|body| serde_json::from_slice(body).unwrap())
            .unwrap_or(Value::Null)
    }

    #[tokio::test]
    async fn test_find_identifiers() {
        let mut http = MockHttpClient::new();
        http.expect_execute_with_retry()
            .times(1)
            .returning(|request, _| {
                assert_eq!(request.url, "http://127.0.0.1:8765");
                let body = action_of(&request);
                assert_eq!(body["action"], "findNotes");
                assert_eq!(body["version"], 6);
                assert_eq!(body["params"]["query"], "deck:Rust");
                reply(json!({ "result": [1, 2, 3], "error": null }))
            });

        let source = AnkiConnectSource::local(Arc::new(http));
        let ids = source.find_identifiers("deck:Rust").await.unwrap();

        assert_eq!(ids, vec![NoteId::new(1), NoteId::new(2), NoteId::new(3)]);
    }

    #[tokio::test]
    async fn test_action_error_is_reported() {
        let mut http = MockHttpClient::new();
        http.expect_execute_with_retry()
            .returning(|_, _| reply(json!({ "result": null, "error": "collection is not available" })));

        let source = AnkiConnectSource::local(Arc::new(http));
        let result = source.find_identifiers("deck:Rust").await;

        assert!(matches!(result, Err(BridgeError::OperationFailed(msg)) if msg.contains("findNotes")));
    }

    #[tokio::test]
    async fn test_get_record_orders_fields_and_reads_review_card() {
        let mut http = MockHttpClient::new();
        http.expect_execute_with_retry().returning(|request, _| {
            let body = action_of(&request);
            match body["action"].as_str().unwrap_or_default() {
                "notesInfo" => reply(json!({ "result": [{
                    "noteId": 7,
                    "modelName": "Basic",
                    "tags": ["rust"],
                    "fields": {
                        "Back": { "value": "One owner", "order": 1 },
                        "Front": { "value": "Ownership", "order": 0 }
                    },
                    "cards": [70, 71],
                    "mod": 1700000000
                }], "error": null })),
                "cardsInfo" if body["params"]["cards"][0] == 70 => reply(json!({ "result": [{
                    "cardId": 70, "deckName": "Rust", "type": 2, "queue": 2, "due": 130,
                    "interval": 10, "factor": 2500, "reps": 4, "lapses": 0
                }], "error": null })),
                "findCards" => {
                    assert_eq!(body["params"]["query"], "prop:due=0 is:review");
                    reply(json!({ "result": [90], "error": null }))
                }
                "cardsInfo" => reply(json!({ "result": [{
                    "cardId": 90, "deckName": "Other", "type": 2, "queue": 2, "due": 120
                }], "error": null })),
                other => panic!("unexpected action {}", other),
            }
        });

        let source = AnkiConnectSource::local(Arc::new(http));
        let note = source.get_record(NoteId::new(7)).await.unwrap();

        assert_eq!(note.model_name, "Basic");
        assert_eq!(note.primary_field(), Some(&SourceField::new("Front", "Ownership")));
        assert_eq!(note.fields[1].name, "Back");
        assert_eq!(note.modified_at, 1_700_000_000);
        assert_eq!(note.scheduler_today, Some(120));

        let card = note.card.unwrap();
        assert_eq!(card.deck_name, "Rust");
        assert_eq!(card.ease_factor, 2500);
        assert_eq!(card.due, 130);
    }

    #[tokio::test]
    async fn test_day_counter_is_read_once() {
        let mut http = MockHttpClient::new();
        http.expect_execute_with_retry().times(1).returning(|request, _| {
            let body = action_of(&request);
            match body["action"].as_str().unwrap_or_default() {
                "findCards" => reply(json!({ "result": [], "error": null })),
                other => panic!("unexpected action {}", other),
            }
        });

        let source = AnkiConnectSource::local(Arc::new(http));
        assert_eq!(source.scheduler_today().await.unwrap(), None);
        assert_eq!(source.scheduler_today().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_note_is_not_found() {
        let mut http = MockHttpClient::new();
        http.expect_execute_with_retry()
            .times(1)
            .returning(|_, _| reply(json!({ "result": [{}], "error": null })));

        let source = AnkiConnectSource::local(Arc::new(http));
        let result = source.get_record(NoteId::new(404)).await;

        assert!(matches!(result, Err(BridgeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_single_attempt() {
        let mut http = MockHttpClient::new();
        http.expect_execute_with_retry()
            .times(1)
            .returning(|request, policy| {
                assert_eq!(policy.max_attempts, 1);
                let body = action_of(&request);
                assert_eq!(body["action"], "deleteNotes");
                assert_eq!(body["params"]["notes"], json!([1, 2]));
                reply(json!({ "result": null, "error": null }))
            });

        let source = AnkiConnectSource::local(Arc::new(http));
        source
            .delete_records(&[NoteId::new(1), NoteId::new(2)])
            .await
            .unwrap();
    }

    /// Answers every write and records the calls in order.
    fn recording_client(calls: Arc<Mutex<Vec<Value>>>) -> MockHttpClient {
        let mut http = MockHttpClient::new();
        http.expect_execute_with_retry().returning(move |request, policy| {
            let body = action_of(&request);
            let action = body["action"].as_str().unwrap_or_default().to_string();
            if action != "notesInfo" {
                assert_eq!(policy.max_attempts, 1, "{} was retried", action);
            }
            calls.lock().unwrap().push(body.clone());
            match action.as_str() {
                "addNote" => reply(json!({ "result": 99, "error": null })),
                "notesInfo" => reply(json!({ "result": [{
                    "noteId": body["params"]["notes"][0], "modelName": "Basic",
                    "fields": {}, "cards": [990, 991]
                }], "error": null })),
                _ => reply(json!({ "result": null, "error": null })),
            }
        });
        http
    }

    fn actions(calls: &Mutex<Vec<Value>>) -> Vec<String> {
        calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call["action"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn update() -> SourceUpdate {
        SourceUpdate {
            id: NoteId::new(7),
            model_name: "Basic".to_string(),
            fields: vec![
                SourceField::new("Front", "Ownership"),
                SourceField::new("Back", " "),
            ],
            tags: vec!["rust".to_string()],
            deck_name: None,
            schedule: SourceSchedule::default(),
        }
    }

    #[tokio::test]
    async fn test_create_record_adds_note_without_schedule() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let source = AnkiConnectSource::local(Arc::new(recording_client(Arc::clone(&calls))));

        let id = source.create_record(&update()).await.unwrap();

        assert_eq!(id, NoteId::new(99));
        assert_eq!(actions(&calls), vec!["addNote"]);
        let calls = calls.lock().unwrap();
        let note = &calls[0]["params"]["note"];
        assert_eq!(note["deckName"], "Default");
        assert_eq!(note["fields"], json!({ "Front": "Ownership" }));
        assert_eq!(note["options"]["allowDuplicate"], true);
    }

    #[tokio::test]
    async fn test_create_record_restores_schedule() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let source = AnkiConnectSource::local(Arc::new(recording_client(Arc::clone(&calls))));
        let mut update = update();
        update.deck_name = Some("Rust".to_string());
        update.schedule = SourceSchedule {
            suspended: Some(true),
            due_in_days: Some(3),
            ease_factor: Some(2500),
            interval: Some(10),
            ..SourceSchedule::default()
        };

        source.create_record(&update).await.unwrap();

        assert_eq!(
            actions(&calls),
            vec![
                "addNote",
                "notesInfo",
                "setDueDate",
                "setEaseFactors",
                "setSpecificValueOfCard",
                "setSpecificValueOfCard",
                "suspend",
            ]
        );
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0]["params"]["note"]["deckName"], "Rust");
        assert_eq!(calls[2]["params"]["days"], "3");
        assert_eq!(calls[3]["params"]["easeFactors"], json!([2500, 2500]));
        assert_eq!(calls[4]["params"]["keys"], json!(["ivl"]));
        assert_eq!(calls[4]["params"]["newValues"], json!([10]));
    }

    #[tokio::test]
    async fn test_update_record_writes_fields_tags_and_deck() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let source = AnkiConnectSource::local(Arc::new(recording_client(Arc::clone(&calls))));
        let mut update = update();
        update.deck_name = Some("Rust".to_string());
        update.schedule.suspended = Some(false);

        source.update_record(NoteId::new(7), &update).await.unwrap();

        assert_eq!(
            actions(&calls),
            vec!["updateNoteFields", "updateNoteTags", "notesInfo", "changeDeck", "unsuspend"]
        );
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0]["params"]["note"]["id"], 7);
        assert_eq!(calls[1]["params"]["tags"], json!(["rust"]));
        assert_eq!(calls[3]["params"]["cards"], json!([990, 991]));
    }
}
