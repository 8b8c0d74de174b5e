//! The reasoning capability boundary.
//!
//! Pricing, accept/decline, and review-quality judgments are delegated to
//! an external language-model capability. Its output is a loosely-typed
//! JSON document and it can fail or return garbage at any time, so this
//! module is the trust boundary: every document is coerced into the
//! strict types here immediately, every field has a deterministic
//! fallback, and the raw document never escapes. A broken reasoning
//! capability degrades the marketplace to conservative defaults; it
//! never fails a request.

use crate::order::{MAX_RATING, MIN_RATING};
use agora::amount::Price;
use agora::capability::CapabilityError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Produces a loosely-typed JSON decision document from free-form text.
#[async_trait]
pub trait Reasoning: Send + Sync {
    /// Runs one reasoning task over the input.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] when the capability is unreachable
    /// or produced no parsable document; callers fall back to
    /// deterministic defaults.
    async fn complete(&self, instruction: &str, input: &str) -> Result<Value, CapabilityError>;
}

/// The deterministic values used when reasoning is unavailable or a field
/// is missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningDefaults {
    /// Category assumed for an unclassifiable task.
    pub category: String,
    /// Budget assumed when none can be extracted.
    pub max_budget: Price,
    /// Rating given when none can be extracted.
    pub rating: u8,
    /// Review comment used when none can be extracted.
    pub comment: String,
}

impl Default for ReasoningDefaults {
    fn default() -> Self {
        Self {
            category: "Translation".to_owned(),
            max_budget: Price::from_micros(1_000_000.into()),
            rating: MAX_RATING,
            comment: "Thank you for the delivery!".to_owned(),
        }
    }
}

/// What a task needs: which kind of provider, and at what budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAnalysis {
    /// Provider category the task calls for.
    pub category: String,
    /// Most the consumer should spend on it.
    pub max_budget: Price,
    /// Search keywords extracted from the task.
    pub keywords: Vec<String>,
    /// The requirements, restated.
    pub requirements: String,
}

/// Whether to accept an order proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDecision {
    /// Accept and pay, or decline.
    pub accept: bool,
    /// Why.
    pub reason: String,
    /// Suggested price when declining over cost.
    pub counter_offer: Option<Price>,
}

/// A review of a delivery, ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDraft {
    /// Rating, always within 1–5.
    pub rating: u8,
    /// Review comment.
    pub comment: String,
}

/// Strict-typed decisions backed by the reasoning capability.
///
/// Each method consults the capability and coerces its document; any
/// error or malformed field resolves to the configured
/// [`ReasoningDefaults`], logged and never fatal.
#[derive(Clone)]
pub struct Adviser {
    reasoning: Arc<dyn Reasoning>,
    defaults: ReasoningDefaults,
}

impl fmt::Debug for Adviser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adviser")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Adviser {
    /// Wraps a reasoning capability with the default fallback policy.
    #[must_use]
    pub fn new(reasoning: Arc<dyn Reasoning>) -> Self {
        Self {
            reasoning,
            defaults: ReasoningDefaults::default(),
        }
    }

    /// Replaces the fallback policy.
    #[must_use]
    pub fn with_defaults(mut self, defaults: ReasoningDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Classifies a task and extracts a budget for it.
    pub async fn analyze_task(&self, task: &str) -> TaskAnalysis {
        let instruction = "Classify the task into a provider category, estimate a reasonable \
                           maximum budget in whole currency units, and extract search keywords. \
                           Reply as JSON: {\"category\", \"maxBudget\", \"keywords\", \
                           \"requirements\"}.";
        let doc = match self.reasoning.complete(instruction, task).await {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(error = %err, "reasoning unavailable, using task defaults");
                Value::Null
            }
        };
        TaskAnalysis {
            category: coerce_string(&doc["category"])
                .unwrap_or_else(|| self.defaults.category.clone()),
            max_budget: coerce_price(&doc["maxBudget"]).unwrap_or(self.defaults.max_budget),
            keywords: coerce_strings(&doc["keywords"]),
            requirements: coerce_string(&doc["requirements"]).unwrap_or_else(|| task.to_owned()),
        }
    }

    /// Decides whether an order proposal is worth accepting.
    ///
    /// Fallback rule when reasoning is unavailable: accept iff the price
    /// is within budget, otherwise decline and counter at 90% of the
    /// budget (integer micro-unit arithmetic).
    pub async fn decide_order(
        &self,
        original_task: &str,
        description: &str,
        price: Price,
        max_budget: Price,
    ) -> OrderDecision {
        let instruction = "Evaluate whether the order proposal matches the task and is fairly \
                           priced. Reply as JSON: {\"accept\", \"reason\", \"counterOffer\"}.";
        let input = format!(
            "Task: {original_task}\nProposal: {description}\nPrice: {price}\nBudget: {max_budget}"
        );
        match self.reasoning.complete(instruction, &input).await {
            Ok(doc) => OrderDecision {
                // An unclear verdict reads as acceptance; only an explicit
                // false declines.
                accept: doc["accept"].as_bool().unwrap_or(true),
                reason: coerce_string(&doc["reason"])
                    .unwrap_or_else(|| "Order seems reasonable".to_owned()),
                counter_offer: coerce_price(&doc["counterOffer"]),
            },
            Err(err) => {
                tracing::warn!(error = %err, "reasoning unavailable, using budget rule");
                if price <= max_budget {
                    OrderDecision {
                        accept: true,
                        reason: "Price is within budget".to_owned(),
                        counter_offer: None,
                    }
                } else {
                    OrderDecision {
                        accept: false,
                        reason: "Price exceeds budget".to_owned(),
                        counter_offer: Some(Price::from_micros(max_budget.micros().percent(90))),
                    }
                }
            }
        }
    }

    /// Rates a delivery and drafts the review comment.
    pub async fn draft_review(
        &self,
        original_task: &str,
        result: &str,
        message: &str,
    ) -> ReviewDraft {
        let instruction = "Rate the delivered work from 1 to 5 and write a one-sentence review \
                           comment. Reply as JSON: {\"rating\", \"comment\"}.";
        let input = format!("Task: {original_task}\nDelivery: {result}\nNote: {message}");
        let doc = match self.reasoning.complete(instruction, &input).await {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(error = %err, "reasoning unavailable, using review defaults");
                Value::Null
            }
        };
        ReviewDraft {
            rating: coerce_rating(&doc["rating"]).unwrap_or(self.defaults.rating),
            comment: coerce_string(&doc["comment"]).unwrap_or_else(|| self.defaults.comment.clone()),
        }
    }
}

/// A non-empty string field, if present.
fn coerce_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// A string-array field; anything else reads as empty.
fn coerce_strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(coerce_string).collect())
        .unwrap_or_default()
}

/// A money field given as a number or a numeric string.
///
/// Goes through the decimal text form in both cases, so the usual
/// [`Price`] validation applies and no float arithmetic touches the
/// amount.
fn coerce_price(value: &Value) -> Option<Price> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    text.trim().parse::<Price>().ok()
}

/// A rating field given as a number or numeric string, clamped into 1–5.
fn coerce_rating(value: &Value) -> Option<u8> {
    let rating = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !rating.is_finite() {
        return None;
    }
    let clamped = rating.round().clamp(f64::from(MIN_RATING), f64::from(MAX_RATING));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(clamped as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Scripted(Value);

    #[async_trait]
    impl Reasoning for Scripted {
        async fn complete(&self, _instruction: &str, _input: &str) -> Result<Value, CapabilityError> {
            Ok(self.0.clone())
        }
    }

    struct Unavailable;

    #[async_trait]
    impl Reasoning for Unavailable {
        async fn complete(&self, _instruction: &str, _input: &str) -> Result<Value, CapabilityError> {
            Err("model endpoint unreachable".into())
        }
    }

    fn price(s: &str) -> Price {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn coerces_a_well_formed_analysis() {
        let adviser = Adviser::new(Arc::new(Scripted(json!({
            "category": "Data",
            "maxBudget": "2.50",
            "keywords": ["scrape", "csv"],
            "requirements": "Scrape the table into CSV"
        }))));

        let analysis = adviser.analyze_task("scrape this table").await;
        assert_eq!(analysis.category, "Data");
        assert_eq!(analysis.max_budget, price("2.50"));
        assert_eq!(analysis.keywords, vec!["scrape", "csv"]);
    }

    #[tokio::test]
    async fn malformed_fields_fall_back_individually() {
        let adviser = Adviser::new(Arc::new(Scripted(json!({
            "category": "",
            "maxBudget": "a lot",
            "keywords": "not a list"
        }))));

        let analysis = adviser.analyze_task("translate this").await;
        assert_eq!(analysis.category, "Translation");
        assert_eq!(analysis.max_budget, price("1"));
        assert!(analysis.keywords.is_empty());
        assert_eq!(analysis.requirements, "translate this");
    }

    #[tokio::test]
    async fn unavailable_reasoning_analyzes_with_defaults() {
        let adviser = Adviser::new(Arc::new(Unavailable));
        let analysis = adviser.analyze_task("translate this").await;
        assert_eq!(analysis.category, "Translation");
        assert_eq!(analysis.max_budget, price("1"));
        assert_eq!(analysis.requirements, "translate this");
    }

    #[tokio::test]
    async fn budget_rule_declines_with_a_ninety_percent_counter() {
        let adviser = Adviser::new(Arc::new(Unavailable));

        let decision = adviser
            .decide_order("translate this", "Translation order", price("0.20"), price("0.10"))
            .await;
        assert!(!decision.accept);
        assert_eq!(decision.counter_offer, Some(price("0.09")));

        let decision = adviser
            .decide_order("translate this", "Translation order", price("0.10"), price("0.10"))
            .await;
        assert!(decision.accept);
        assert_eq!(decision.counter_offer, None);
    }

    #[tokio::test]
    async fn explicit_decline_is_honored_and_numbers_coerce() {
        let adviser = Adviser::new(Arc::new(Scripted(json!({
            "accept": false,
            "reason": "scope mismatch",
            "counterOffer": 0.05
        }))));

        let decision = adviser
            .decide_order("translate this", "Something else", price("0.10"), price("1.00"))
            .await;
        assert!(!decision.accept);
        assert_eq!(decision.reason, "scope mismatch");
        assert_eq!(decision.counter_offer, Some(price("0.05")));
    }

    #[tokio::test]
    async fn unclear_verdict_reads_as_acceptance() {
        let adviser = Adviser::new(Arc::new(Scripted(json!({ "verdict": "hmm" }))));
        let decision = adviser
            .decide_order("task", "proposal", price("0.10"), price("1.00"))
            .await;
        assert!(decision.accept);
        assert_eq!(decision.reason, "Order seems reasonable");
    }

    #[tokio::test]
    async fn review_ratings_are_clamped_and_defaulted() {
        let adviser = Adviser::new(Arc::new(Scripted(json!({ "rating": 11, "comment": "wow" }))));
        let review = adviser.draft_review("task", "result", "").await;
        assert_eq!(review.rating, 5);
        assert_eq!(review.comment, "wow");

        let adviser = Adviser::new(Arc::new(Unavailable));
        let review = adviser.draft_review("task", "result", "").await;
        assert_eq!(review.rating, 5);
        assert_eq!(review.comment, "Thank you for the delivery!");

        let adviser = Adviser::new(Arc::new(Scripted(json!({ "rating": "3.4" }))));
        let review = adviser.draft_review("task", "result", "").await;
        assert_eq!(review.rating, 3);
    }
}
