use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use wayfarer_core::geo::{city_center, DEFAULT_CITY_CENTER};
use wayfarer_core::{
    budget_from_text, daily_from_plan, daily_from_text, estimate_breakdown, needs_estimate,
    stated_total, BudgetBreakdown, DailyRecord, ItineraryPlan, PlanRequest, PlanResponse,
};
use wayfarer_geo::{compute_day_route, DayRoute, EnrichReport, GeoEnricher, MapProvider, RouteStop};
use wayfarer_llm::prompt::{
    extract_user_prompt, plan_user_prompt, EXTRACT_SYSTEM_PROMPT, PLAN_SYSTEM_PROMPT,
};
use wayfarer_llm::{extract_plan, strip_plan_json, LanguageModel, LlmError};
use wayfarer_observability::AppMetrics;

/// A draft is emitted once the streamed text grows past this many characters.
pub const DRAFT_THRESHOLD_CHARS: usize = 200;
const STREAM_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanSource {
    Reply,
    Extracted,
    Fallback,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("language model unavailable: {0}")]
    Unavailable(#[from] LlmError),
    #[error("invalid request: {0}")]
    InvalidInput(&'static str),
}

#[derive(Debug, Clone)]
pub enum PlanEvent {
    Progress { stage: &'static str },
    Draft { plan: ItineraryPlan, raw_text: String },
    Final(Box<PlanResponse>),
    Error { message: String },
}

impl PlanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Draft { .. } => "draft",
            Self::Final(_) => "final",
            Self::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Progress { stage } => json!({ "stage": stage }),
            Self::Draft { plan, raw_text } => json!({ "plan": plan, "rawText": raw_text }),
            Self::Final(response) => json!(response),
            Self::Error { message } => json!({ "message": message }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetReport {
    pub normalized_text: String,
    pub budget: BudgetBreakdown,
    pub budget_aligned: bool,
}

impl BudgetReport {
    pub fn from_text(text: &str) -> Self {
        let (normalized_text, budget) = budget_from_text(text);
        Self {
            normalized_text,
            budget_aligned: budget.aligned,
            budget,
        }
    }
}

pub struct PlannerAgent<M, L> {
    maps: Arc<M>,
    model: Arc<L>,
    metrics: Arc<AppMetrics>,
}

impl<M, L> PlannerAgent<M, L>
where
    M: MapProvider + 'static,
    L: LanguageModel + 'static,
{
    pub fn new(maps: Arc<M>, model: Arc<L>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            maps,
            model,
            metrics,
        }
    }

    pub fn model_configured(&self) -> bool {
        self.model.is_configured()
    }

    pub fn metrics(&self) -> &Arc<AppMetrics> {
        &self.metrics
    }

    #[instrument(skip(self, request), fields(city = ?request.declared_city()))]
    pub async fn plan(&self, request: PlanRequest) -> Result<PlanResponse, AgentError> {
        let started = Instant::now();
        self.metrics.inc_request();
        let text = require_text(&request.text)?;

        let user = plan_user_prompt(text, request.declared_city());
        let raw = self
            .model
            .complete(PLAN_SYSTEM_PROMPT, &user, &[])
            .await
            .map_err(|err| self.model_failure(err))?;

        let response = self.assemble(&raw, &request).await;
        self.metrics.observe_latency(started.elapsed());
        info!(
            days = response.plan.days.len(),
            aligned = response.budget_aligned,
            "plan assembled"
        );
        Ok(response)
    }

    /// Runs the streamed plan on its own task. The receiver closes after the
    /// final or error event; a dropped receiver ends the task.
    pub fn plan_stream(self: &Arc<Self>, request: PlanRequest) -> mpsc::Receiver<PlanEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let agent = Arc::clone(self);
        self.metrics.inc_stream();

        tokio::spawn(async move {
            if let Err(err) = agent.run_stream(&request, &tx).await {
                warn!(error = %err, "streamed plan failed");
                let _ = tx
                    .send(PlanEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
            }
        });
        rx
    }

    #[instrument(skip(self, stops))]
    pub async fn day_route(&self, stops: Vec<RouteStop>, city: Option<&str>) -> DayRoute {
        self.metrics.inc_request();
        let lookups = stops.iter().filter(|stop| stop.coord.is_none()).count();
        let route = compute_day_route(self.maps.as_ref(), stops, city).await;
        self.metrics.add_geocode_calls(lookups);
        self.metrics.add_route_fallbacks(route.fallback_segments);
        route
    }

    pub fn budget(&self, text: &str) -> BudgetReport {
        self.metrics.inc_request();
        let report = BudgetReport::from_text(text);
        if !report.budget_aligned {
            self.metrics.inc_unaligned_budget();
        }
        report
    }

    #[instrument(skip(self, text))]
    pub async fn daily(&self, text: &str, city: Option<&str>) -> Result<Vec<DailyRecord>, AgentError> {
        self.metrics.inc_request();
        let text = require_text(text)?;
        if let Some(records) = daily_from_text(text) {
            return Ok(records);
        }

        let raw = self
            .model
            .complete(EXTRACT_SYSTEM_PROMPT, &extract_user_prompt(text, city), &[])
            .await
            .map_err(|err| self.model_failure(err))?;
        Ok(extract_plan(&raw)
            .map(|plan| daily_from_plan(&plan))
            .unwrap_or_default())
    }

    async fn run_stream(
        &self,
        request: &PlanRequest,
        tx: &mpsc::Sender<PlanEvent>,
    ) -> Result<(), AgentError> {
        let started = Instant::now();
        let text = require_text(&request.text)?;
        let city = request.declared_city();
        if !deliver(tx, PlanEvent::Progress { stage: "init" }).await {
            return Ok(());
        }

        let user = plan_user_prompt(text, city);
        let mut chunks = self
            .model
            .stream_complete(PLAN_SYSTEM_PROMPT, &user, &[])
            .await
            .map_err(|err| self.model_failure(err))?;
        if !deliver(tx, PlanEvent::Progress { stage: "llm_stream_start" }).await {
            return Ok(());
        }

        let mut buffer = String::new();
        let mut drafted = false;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|err| self.model_failure(err))?;
            buffer.push_str(&chunk);

            if !drafted && buffer.chars().count() > DRAFT_THRESHOLD_CHARS {
                drafted = true;
                let center = city.and_then(city_center).unwrap_or(DEFAULT_CITY_CENTER);
                let draft = PlanEvent::Draft {
                    plan: ItineraryPlan::single_day(strip_plan_json(&buffer), Some(center)),
                    raw_text: buffer.clone(),
                };
                if !deliver(tx, draft).await {
                    return Ok(());
                }
            }
        }
        if buffer.trim().is_empty() {
            return Err(self.model_failure(LlmError::EmptyResponse));
        }
        if !deliver(tx, PlanEvent::Progress { stage: "llm_stream_end" }).await {
            return Ok(());
        }

        let response = self.assemble(&buffer, request).await;
        self.metrics.observe_latency(started.elapsed());
        deliver(tx, PlanEvent::Final(Box::new(response))).await;
        Ok(())
    }

    async fn assemble(&self, raw: &str, request: &PlanRequest) -> PlanResponse {
        let city = request.declared_city();
        let prose = strip_plan_json(raw);

        let (mut plan, source) = match extract_plan(raw) {
            Some(plan) => (plan, PlanSource::Reply),
            None => match self.extract_plan_via_model(&prose, city).await {
                Some(plan) => (plan, PlanSource::Extracted),
                None => (ItineraryPlan::single_day(raw.trim(), None), PlanSource::Fallback),
            },
        };
        if plan.base_budget.is_none() {
            plan.base_budget = stated_total(&prose).or_else(|| stated_total(&request.text));
        }

        let (plan, report) = GeoEnricher::new(self.maps.as_ref())
            .enrich(plan, city)
            .await;
        self.record_enrichment(&report);

        let (normalized, mut budget) = budget_from_text(&prose);
        if needs_estimate(&budget) && !plan.base_budget_placeholder {
            if let Some(base) = plan.base_budget.as_ref() {
                budget = estimate_breakdown(base);
            }
        }
        if !budget.aligned {
            self.metrics.inc_unaligned_budget();
        }

        let daily = self.daily_records(&plan, source, &prose, city).await;
        PlanResponse {
            plan,
            raw_text: normalized,
            daily,
            budget_aligned: budget.aligned,
            budget,
        }
    }

    /// Typed points win; otherwise the prose is split by day headings.
    /// Prose without headings is classified from the model-extracted plan,
    /// asking the model only when that has not happened yet.
    async fn daily_records(
        &self,
        plan: &ItineraryPlan,
        source: PlanSource,
        prose: &str,
        city: Option<&str>,
    ) -> Option<Vec<DailyRecord>> {
        if plan.has_typed_pois() {
            return Some(daily_from_plan(plan));
        }
        if let Some(records) = daily_from_text(prose) {
            return Some(records);
        }
        let records = match source {
            PlanSource::Extracted => daily_from_plan(plan),
            PlanSource::Fallback => return None,
            PlanSource::Reply => {
                if prose.trim().is_empty() {
                    return None;
                }
                daily_from_plan(&self.extract_plan_via_model(prose, city).await?)
            }
        };
        Some(records).filter(|records| !records.is_empty())
    }

    async fn extract_plan_via_model(&self, text: &str, city: Option<&str>) -> Option<ItineraryPlan> {
        if text.trim().is_empty() || !self.model.is_configured() {
            return None;
        }
        match self
            .model
            .complete(EXTRACT_SYSTEM_PROMPT, &extract_user_prompt(text, city), &[])
            .await
        {
            Ok(raw) => extract_plan(&raw),
            Err(err) => {
                self.metrics.inc_llm_failure();
                warn!(error = %err, "plan extraction via model failed");
                None
            }
        }
    }

    fn record_enrichment(&self, report: &EnrichReport) {
        self.metrics.add_geocode_calls(report.lookups);
        self.metrics.add_geocode_failures(report.geocode_failures);
        self.metrics.add_cross_city_discards(report.cross_city_discarded);
    }

    fn model_failure(&self, err: LlmError) -> AgentError {
        self.metrics.inc_llm_failure();
        warn!(error = %err, "language model call failed");
        AgentError::Unavailable(err)
    }
}

fn require_text(text: &str) -> Result<&str, AgentError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AgentError::InvalidInput("text must not be empty"));
    }
    Ok(text)
}

async fn deliver(tx: &mpsc::Sender<PlanEvent>, event: PlanEvent) -> bool {
    tx.send(event).await.is_ok()
}
