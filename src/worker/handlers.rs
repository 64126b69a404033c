//! Customer-service ticket handlers.
//!
//! Five topics make up the triage workflow: sentiment analysis, profile
//! lookup, churn check, routing, and response drafting. Each reads the
//! outputs of the earlier steps from process variables and writes its own
//! result back as a JSON document. The churn check and routing steps also
//! emit decision context for audit.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::registry::{HandlerRegistry, TaskHandler, TaskOutput};
use super::schema::{TaskInput, TopicSchema, VariableKind};
use crate::error::{Error, Result};
use crate::model::{LeasedTask, rfc3339};
use crate::sink::Record;

pub const ANALYZE_SENTIMENT: &str = "analyze-sentiment";
pub const LOOKUP_CUSTOMER_PROFILE: &str = "lookup-customer-profile";
pub const CHECK_CHURN_SIGNALS: &str = "check-churn-signals";
pub const DECIDE_ROUTING: &str = "decide-routing";
pub const GENERATE_RESPONSE: &str = "generate-response";

/// Decision-context table names.
pub const CHURN_DECISIONS: &str = "activity_churn_signals";
pub const ROUTING_DECISIONS: &str = "activity_routing_decisions";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TicketInput {
    pub ticket_id: String,
    pub customer_id: String,
    pub subject: String,
    pub body: String,
    pub channel: String,
    pub submitted_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SentimentResult {
    pub sentiment: String,
    pub confidence: f64,
    pub urgency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerProfile {
    pub customer_id: String,
    pub tier: String,
    pub ltv: f64,
    pub account_age_days: i64,
    pub open_tickets: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChurnSignals {
    pub customer_id: String,
    pub churn_score: f64,
    pub risk_level: String,
    pub last_activity_at: String,
    pub signal_source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingDecision {
    pub queue: String,
    pub priority: i64,
    pub reason_codes: Vec<String>,
    pub escalation_level: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseDraft {
    pub body: String,
    pub tone: String,
    pub suggest_human: bool,
}

/// Registry with all five customer-service handlers.
pub fn customer_service_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(Arc::new(AnalyzeSentiment))
        .register(Arc::new(LookupCustomerProfile))
        .register(Arc::new(CheckChurnSignals))
        .register(Arc::new(DecideRouting))
        .register(Arc::new(GenerateResponse));
    registry
}

fn ticket_schema(topic: &str) -> TopicSchema {
    TopicSchema::new(topic)
        .optional("ticket", VariableKind::Json)
        .optional("ticketId", VariableKind::String)
        .optional("customerId", VariableKind::String)
        .optional("subject", VariableKind::String)
        .optional("body", VariableKind::String)
        .optional("channel", VariableKind::String)
}

/// The `ticket` JSON variable, falling back to the flat ticket variables.
fn ticket_from(input: &TaskInput) -> Result<TicketInput> {
    let mut ticket: TicketInput = input.json("ticket")?.unwrap_or_default();
    if ticket.ticket_id.is_empty() {
        let flat = |name: &str| input.str(name).unwrap_or_default().to_string();
        ticket.ticket_id = flat("ticketId");
        ticket.customer_id = flat("customerId");
        ticket.subject = flat("subject");
        ticket.body = flat("body");
        ticket.channel = flat("channel");
    }
    Ok(ticket)
}

fn required_json<T: serde::de::DeserializeOwned>(input: &TaskInput, name: &str) -> Result<T> {
    input
        .json(name)?
        .ok_or_else(|| Error::Handler(format!("{name} is missing")))
}

fn decision_record(table: &str, task: &LeasedTask) -> Record {
    let now = Utc::now();
    Record::new(&task.process_instance_id)
        .field("_id", format!("{table}:{}", task.id))
        .field("_table", table)
        .field("_valid_from", rfc3339(now))
        .field("process_instance_id", &task.process_instance_id)
        .field("activity_id", &task.activity_id)
}

/// Customer number from ids like `CUST-007`.
fn customer_number(customer_id: &str) -> Option<u32> {
    customer_id.rsplit('-').next()?.parse().ok()
}

const NEGATIVE_TERMS: &[&str] = &[
    "frustrated",
    "worst",
    "terrible",
    "disappointed",
    "cancel",
    "refund",
    "angry",
    "not satisfied",
    "can't",
    "switching to a competitor",
];
const POSITIVE_TERMS: &[&str] = &[
    "thank",
    "great",
    "excellent",
    "love",
    "appreciate",
    "helpful",
];
const URGENT_TERMS: &[&str] = &[
    "urgent",
    "asap",
    "immediately",
    "immediate",
    "critical",
    "emergency",
    "down",
];

fn count_terms(text: &str, terms: &[&str]) -> usize {
    terms.iter().filter(|t| text.contains(*t)).count()
}

pub fn analyze(ticket: &TicketInput) -> SentimentResult {
    let text = format!("{} {}", ticket.subject, ticket.body).to_lowercase();
    let negative = count_terms(&text, NEGATIVE_TERMS);
    let positive = count_terms(&text, POSITIVE_TERMS);
    let urgent = count_terms(&text, URGENT_TERMS);

    let sentiment = match negative.cmp(&positive) {
        std::cmp::Ordering::Greater => "negative",
        std::cmp::Ordering::Less => "positive",
        std::cmp::Ordering::Equal => "neutral",
    };
    let confidence = (0.5 + 0.1 * negative.abs_diff(positive) as f64).min(0.95);
    let urgency = if urgent >= 2 || (urgent == 1 && sentiment == "negative") {
        "high"
    } else if urgent == 1 || sentiment == "negative" {
        "medium"
    } else {
        "low"
    };

    SentimentResult {
        sentiment: sentiment.to_string(),
        confidence,
        urgency: urgency.to_string(),
    }
}

pub fn profile_for(customer_id: &str) -> CustomerProfile {
    let n = customer_number(customer_id).unwrap_or(0);
    let tier = match n % 3 {
        0 => "standard",
        1 => "gold",
        _ => "platinum",
    };
    CustomerProfile {
        customer_id: customer_id.to_string(),
        tier: tier.to_string(),
        ltv: 500.0 + f64::from(n) * 1250.0,
        account_age_days: 90 + i64::from(n) * 73,
        open_tickets: i64::from(n % 4),
    }
}

/// Churn model scores per customer.
const CHURN_SCORES: &[(&str, f64, &str)] = &[
    ("CUST-001", 0.85, "high"),
    ("CUST-002", 0.25, "low"),
    ("CUST-003", 0.92, "high"),
    ("CUST-004", 0.35, "low"),
    ("CUST-005", 0.78, "high"),
    ("CUST-006", 0.42, "medium"),
    ("CUST-007", 0.88, "high"),
    ("CUST-008", 0.15, "low"),
    ("CUST-009", 0.95, "high"),
    ("CUST-010", 0.38, "low"),
];

pub fn churn_for(customer_id: &str) -> ChurnSignals {
    let (score, risk, source) = CHURN_SCORES
        .iter()
        .find(|(id, _, _)| *id == customer_id)
        .map(|(_, score, risk)| (*score, *risk, "churn-model-v2.1"))
        .unwrap_or((0.1, "low", "default"));
    ChurnSignals {
        customer_id: customer_id.to_string(),
        churn_score: score,
        risk_level: risk.to_string(),
        last_activity_at: rfc3339(Utc::now()),
        signal_source: source.to_string(),
    }
}

pub fn route(
    sentiment: &SentimentResult,
    profile: &CustomerProfile,
    churn: &ChurnSignals,
) -> RoutingDecision {
    let mut reasons = Vec::new();
    let mut escalation = 0;

    let high_churn = churn.risk_level == "high";
    let negative = sentiment.sentiment == "negative";
    let urgent = sentiment.urgency == "high";
    let platinum = profile.tier == "platinum";

    if high_churn {
        reasons.push("HIGH_CHURN_RISK");
        escalation += 1;
    }
    if negative {
        reasons.push("NEGATIVE_SENTIMENT");
        if sentiment.confidence >= 0.7 {
            escalation += 1;
        }
    }
    if urgent {
        reasons.push("HIGH_URGENCY");
        escalation += 1;
    }
    if platinum {
        reasons.push("PLATINUM_TIER");
    }
    if reasons.is_empty() {
        reasons.push("STANDARD");
    }

    let queue = if high_churn && negative {
        "retention"
    } else if urgent {
        "priority-support"
    } else if platinum {
        "vip"
    } else {
        "general"
    };

    RoutingDecision {
        queue: queue.to_string(),
        priority: (1 + escalation + i64::from(platinum)).min(5),
        reason_codes: reasons.into_iter().map(str::to_string).collect(),
        escalation_level: escalation,
    }
}

pub fn draft(
    ticket: &TicketInput,
    sentiment: &SentimentResult,
    routing: &RoutingDecision,
) -> ResponseDraft {
    let tone = if sentiment.urgency == "high" {
        "urgent"
    } else {
        match sentiment.sentiment.as_str() {
            "negative" => "empathetic",
            "positive" => "appreciative",
            _ => "friendly",
        }
    };
    let opening = match tone {
        "urgent" => "We understand this needs immediate attention.",
        "empathetic" => "We're sorry for the trouble you've experienced.",
        "appreciative" => "Thank you for taking the time to reach out.",
        _ => "Thanks for contacting us.",
    };
    let subject = if ticket.subject.is_empty() {
        "your request".to_string()
    } else {
        format!("\"{}\"", ticket.subject)
    };
    ResponseDraft {
        body: format!(
            "{opening} Your ticket {} regarding {subject} has been assigned to our {} team, who will follow up shortly.",
            ticket.ticket_id, routing.queue
        ),
        tone: tone.to_string(),
        suggest_human: routing.escalation_level >= 2 || routing.queue == "retention",
    }
}

pub struct AnalyzeSentiment;

#[async_trait]
impl TaskHandler for AnalyzeSentiment {
    fn schema(&self) -> TopicSchema {
        ticket_schema(ANALYZE_SENTIMENT)
    }

    async fn handle(&self, _task: &LeasedTask, input: TaskInput) -> Result<TaskOutput> {
        let ticket = ticket_from(&input)?;
        if ticket.subject.is_empty() && ticket.body.is_empty() {
            return Err(Error::Handler("ticket has no subject or body".to_string()));
        }
        TaskOutput::new().json_variable("sentiment", &analyze(&ticket))
    }
}

pub struct LookupCustomerProfile;

#[async_trait]
impl TaskHandler for LookupCustomerProfile {
    fn schema(&self) -> TopicSchema {
        TopicSchema::new(LOOKUP_CUSTOMER_PROFILE).require("customerId", VariableKind::String)
    }

    async fn handle(&self, _task: &LeasedTask, input: TaskInput) -> Result<TaskOutput> {
        let customer_id = input.str("customerId").unwrap_or_default();
        TaskOutput::new().json_variable("customerProfile", &profile_for(customer_id))
    }
}

pub struct CheckChurnSignals;

#[async_trait]
impl TaskHandler for CheckChurnSignals {
    fn schema(&self) -> TopicSchema {
        TopicSchema::new(CHECK_CHURN_SIGNALS).require("customerId", VariableKind::String)
    }

    async fn handle(&self, task: &LeasedTask, input: TaskInput) -> Result<TaskOutput> {
        let customer_id = input.str("customerId").unwrap_or_default();
        let churn = churn_for(customer_id);
        let decision = decision_record(CHURN_DECISIONS, task)
            .field("customer_id", &churn.customer_id)
            .field("churn_score", churn.churn_score)
            .field("risk_level", &churn.risk_level)
            .field("signal_source", &churn.signal_source);
        Ok(TaskOutput::new()
            .json_variable("churnSignals", &churn)?
            .with_decision(decision))
    }
}

pub struct DecideRouting;

#[async_trait]
impl TaskHandler for DecideRouting {
    fn schema(&self) -> TopicSchema {
        ticket_schema(DECIDE_ROUTING)
            .require("sentiment", VariableKind::Json)
            .require("customerProfile", VariableKind::Json)
            .require("churnSignals", VariableKind::Json)
    }

    async fn handle(&self, task: &LeasedTask, input: TaskInput) -> Result<TaskOutput> {
        let ticket = ticket_from(&input)?;
        let sentiment: SentimentResult = required_json(&input, "sentiment")?;
        let profile: CustomerProfile = required_json(&input, "customerProfile")?;
        let churn: ChurnSignals = required_json(&input, "churnSignals")?;

        let routing = route(&sentiment, &profile, &churn);
        let decision = decision_record(ROUTING_DECISIONS, task)
            .field("ticket_id", &ticket.ticket_id)
            .field("customer_id", &profile.customer_id)
            .field("queue", &routing.queue)
            .field("priority", routing.priority)
            .field("reason_codes", &routing.reason_codes)
            .field("escalation_level", routing.escalation_level)
            .field("sentiment", &sentiment.sentiment)
            .field("urgency", &sentiment.urgency)
            .field("customer_tier", &profile.tier)
            .field("churn_score", churn.churn_score);
        Ok(TaskOutput::new()
            .json_variable("routingDecision", &routing)?
            .with_decision(decision))
    }
}

pub struct GenerateResponse;

#[async_trait]
impl TaskHandler for GenerateResponse {
    fn schema(&self) -> TopicSchema {
        ticket_schema(GENERATE_RESPONSE)
            .require("sentiment", VariableKind::Json)
            .optional("customerProfile", VariableKind::Json)
            .require("routingDecision", VariableKind::Json)
    }

    async fn handle(&self, _task: &LeasedTask, input: TaskInput) -> Result<TaskOutput> {
        let ticket = ticket_from(&input)?;
        let sentiment: SentimentResult = required_json(&input, "sentiment")?;
        let routing: RoutingDecision = required_json(&input, "routingDecision")?;
        TaskOutput::new().json_variable("responseDraft", &draft(&ticket, &sentiment, &routing))
    }
}
