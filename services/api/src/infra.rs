use axum::http::{header, HeaderMap};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use returns_portal::config::ReturnsConfig;
use returns_portal::error::AppError;
use returns_portal::returns::{
    derive_rows, load_rules, DateFreshener, EligibilityEngine, EligibilityRow, JsonFileSource,
    Order, OrderNormalizer, OrderSource, OrderStore, RuleSetError, StoreError,
};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub(crate) const SESSION_COOKIE: &str = "returns_session";
pub(crate) const ORDER_NUMBER_MAX_LEN: usize = 50;
pub(crate) const IDENTIFIER_MAX_LEN: usize = 100;
pub(crate) const LOOKUP_FAILED: &str = "Order not found or credentials do not match.";
pub(crate) const MAX_SESSIONS: usize = 10_000;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Maps session ids to the order number the visitor proved ownership of.
/// Holds at most `capacity` sessions; the least recently verified one is
/// dropped first.
#[derive(Clone)]
pub(crate) struct SessionStore {
    table: Arc<Mutex<SessionTable>>,
    capacity: usize,
}

#[derive(Default)]
struct SessionTable {
    verified: HashMap<String, String>,
    recency: VecDeque<String>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(MAX_SESSIONS)
    }
}

impl SessionStore {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(SessionTable::default())),
            capacity: capacity.max(1),
        }
    }

    /// Records `order_number` as verified, reusing `existing` when the
    /// visitor already has a session. Returns the session id to hand back.
    pub(crate) fn verify(&self, existing: Option<&str>, order_number: &str) -> String {
        let mut table = self.table.lock().expect("session mutex poisoned");
        let id = match existing {
            Some(id) if table.verified.contains_key(id) => {
                table.recency.retain(|known| known != id);
                id.to_string()
            }
            _ => Uuid::new_v4().to_string(),
        };

        table.verified.insert(id.clone(), order_number.to_string());
        table.recency.push_back(id.clone());
        while table.recency.len() > self.capacity {
            if let Some(oldest) = table.recency.pop_front() {
                table.verified.remove(&oldest);
            }
        }
        id
    }

    pub(crate) fn verified_order(&self, session_id: &str) -> Option<String> {
        let table = self.table.lock().expect("session mutex poisoned");
        table.verified.get(session_id).cloned()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table.lock().expect("session mutex poisoned").verified.len()
    }

    /// Whether the session carried in `headers` has verified `order_number`.
    pub(crate) fn allows(&self, headers: &HeaderMap, order_number: &str) -> bool {
        session_id(headers)
            .and_then(|id| self.verified_order(&id))
            .is_some_and(|verified| verified == order_number)
    }
}

pub(crate) fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

pub(crate) fn session_cookie(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax")
}

/// Raw lookup input as submitted by the HTML form or the JSON API.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LookupRequest {
    #[serde(default)]
    pub(crate) order_number: String,
    #[serde(default)]
    pub(crate) identifier: String,
}

/// Lookup input that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LookupQuery {
    pub(crate) order_number: String,
    pub(crate) identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldError {
    pub(crate) field: &'static str,
    pub(crate) message: String,
}

impl LookupRequest {
    pub(crate) fn validate(&self) -> Result<LookupQuery, Vec<FieldError>> {
        let order_number = self.order_number.trim();
        let identifier = self.identifier.trim();

        let mut errors = Vec::new();
        check_field(&mut errors, "order_number", order_number, ORDER_NUMBER_MAX_LEN);
        check_field(&mut errors, "identifier", identifier, IDENTIFIER_MAX_LEN);
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(LookupQuery {
            order_number: order_number.to_string(),
            identifier: identifier.to_string(),
        })
    }
}

fn check_field(errors: &mut Vec<FieldError>, field: &'static str, value: &str, max_len: usize) {
    if value.is_empty() {
        errors.push(FieldError {
            field,
            message: "This field is required.".to_string(),
        });
    } else if value.chars().count() > max_len {
        errors.push(FieldError {
            field,
            message: format!("Ensure this field has no more than {max_len} characters."),
        });
    }
}

/// Everything the returns routes need: order lookup, rule evaluation and
/// visitor sessions.
pub(crate) struct ReturnsPortal<S> {
    store: OrderStore<S>,
    engine: EligibilityEngine,
    pub(crate) sessions: SessionStore,
}

impl<S: OrderSource> ReturnsPortal<S> {
    pub(crate) fn new(store: OrderStore<S>, engine: EligibilityEngine) -> Self {
        Self {
            store,
            engine,
            sessions: SessionStore::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    pub(crate) fn lookup(&self, query: &LookupQuery) -> Result<Option<Order>, StoreError> {
        self.store.find(&query.order_number, &query.identifier)
    }

    /// The order plus one presentation row per line item, evaluated now.
    pub(crate) fn articles(
        &self,
        order_number: &str,
    ) -> Result<Option<(Order, Vec<EligibilityRow>)>, StoreError> {
        let Some(order) = self.store.get(order_number)? else {
            return Ok(None);
        };
        let results = self.engine.evaluate_at(&order, Utc::now().naive_utc());
        let rows = derive_rows(&order, results);
        Ok(Some((order, rows)))
    }
}

/// Runs store work on the blocking pool; file-backed sources read from disk.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AppError::Io(std::io::Error::other(err)))?
        .map_err(AppError::from)
}

pub(crate) fn file_store(config: &ReturnsConfig) -> OrderStore<JsonFileSource> {
    let normalizer = OrderNormalizer::new(config.default_window_days);
    let store = OrderStore::new(JsonFileSource::new(config.orders_path.clone()), normalizer);
    if config.freshen_dates {
        store.with_freshener(DateFreshener::demo())
    } else {
        store
    }
}

pub(crate) fn rule_engine(config: &ReturnsConfig) -> Result<EligibilityEngine, RuleSetError> {
    load_rules(config.rules_path.as_deref()).map(EligibilityEngine::new)
}
