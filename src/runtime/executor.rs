/// Step action handlers for the closed step-type set
///
/// This module contains the execution logic for each step type:
/// - InvoiceProcessing: deterministic normalization of extracted invoices
/// - DocumentExtraction / AgentExecution: calls through the adapter boundary
/// - LedgerPosting: balanced posting through the ledger engine
/// - HttpCall: generic outbound adapter call
///
/// The engine talks to actions only through the ActionDispatch trait and is
/// agnostic to what an action does, as long as it returns an output and a
/// confidence in [0,1].

use crate::config::ActionConfig;
use crate::error::EngineError;
use crate::ledger::{EntryType, LedgerEngine, NewEntry, NewTransaction};
use crate::workflow::types::{StepType, WorkflowContext, WorkflowStep};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;

/// Result of executing a single step action
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Output recorded into the execution context under the step id
    pub output: Value,
    /// Reported confidence in [0,1]; compared against the step threshold
    pub confidence: f64,
}

/// Dispatch seam between the execution engine and step actions
#[async_trait]
pub trait ActionDispatch: Send + Sync {
    /// Execute one step with fully resolved parameters
    async fn execute(
        &self,
        step: &WorkflowStep,
        params: Value,
        context: &WorkflowContext,
    ) -> Result<ActionOutcome, EngineError>;
}

/// The built-in step executor
///
/// Holds the ledger engine for posting steps and an HTTP client for the
/// adapter boundary. Dispatch is an exhaustive match over StepType, so a new
/// step kind is a compile-time-checked addition.
#[derive(Debug)]
pub struct StepExecutor {
    ledger: LedgerEngine,
    http: reqwest::Client,
    config: ActionConfig,
}

impl StepExecutor {
    pub fn new(ledger: LedgerEngine, config: ActionConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self { ledger, http, config })
    }

    fn action_failure(
        &self,
        context: &WorkflowContext,
        step: &WorkflowStep,
        message: impl Into<String>,
    ) -> EngineError {
        EngineError::ExternalActionFailure {
            execution_id: context.id,
            step_id: step.id.clone(),
            message: message.into(),
        }
    }

    /// Normalize an extracted invoice payload into canonical fields
    ///
    /// Deterministic given the same params: resumption after approval re-runs
    /// this with the recorded snapshot and reproduces the same output. The
    /// confidence is the upstream extractor's score when present, otherwise a
    /// completeness score over the canonical fields.
    fn execute_invoice_processing(
        &self,
        params: &Value,
    ) -> Result<ActionOutcome, EngineError> {
        let invoice = params.get("invoice").cloned().unwrap_or_else(|| params.clone());

        let vendor = invoice.get("vendor").and_then(Value::as_str).map(str::to_string);
        let number = invoice
            .get("invoice_number")
            .or_else(|| invoice.get("number"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let date = invoice.get("date").and_then(Value::as_str).map(str::to_string);
        let currency = invoice
            .get("currency")
            .and_then(Value::as_str)
            .unwrap_or("USD")
            .to_string();
        let total = invoice.get("total").and_then(decimal_from_value);

        let confidence = match params.get("confidence").and_then(Value::as_f64) {
            Some(reported) => reported,
            None => {
                let fields = [
                    vendor.is_some(),
                    number.is_some(),
                    date.is_some(),
                    total.is_some(),
                ];
                fields.iter().filter(|present| **present).count() as f64 / fields.len() as f64
            }
        }
        .clamp(0.0, 1.0);

        let output = json!({
            "vendor": vendor,
            "invoice_number": number,
            "date": date,
            "currency": currency,
            "total": total.map(|t| t.to_string()),
        });

        Ok(ActionOutcome { output, confidence })
    }

    /// Call the document extraction adapter (the OCR boundary)
    async fn execute_document_extraction(
        &self,
        step: &WorkflowStep,
        params: &Value,
        context: &WorkflowContext,
    ) -> Result<ActionOutcome, EngineError> {
        let url = self
            .config
            .extractor_url
            .as_ref()
            .ok_or_else(|| self.action_failure(context, step, "no extractor endpoint configured"))?;

        let body = json!({
            "document": params.get("document_ref"),
            "kind": params.get("kind"),
        });

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.action_failure(context, step, format!("extractor call failed: {e}")))?;

        if !response.status().is_success() {
            return Err(self.action_failure(
                context,
                step,
                format!("extractor returned {}", response.status()),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| self.action_failure(context, step, format!("invalid extractor response: {e}")))?;

        let confidence = payload
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let output = payload.get("fields").cloned().unwrap_or(payload);

        Ok(ActionOutcome { output, confidence })
    }

    /// Invoke the sub-agent runner adapter
    async fn execute_agent_execution(
        &self,
        step: &WorkflowStep,
        params: &Value,
        context: &WorkflowContext,
    ) -> Result<ActionOutcome, EngineError> {
        let url = self
            .config
            .agent_url
            .as_ref()
            .ok_or_else(|| self.action_failure(context, step, "no agent endpoint configured"))?;

        let response = self
            .http
            .post(url)
            .json(params)
            .send()
            .await
            .map_err(|e| self.action_failure(context, step, format!("agent call failed: {e}")))?;

        if !response.status().is_success() {
            return Err(self.action_failure(
                context,
                step,
                format!("agent returned {}", response.status()),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| self.action_failure(context, step, format!("invalid agent response: {e}")))?;

        let confidence = payload
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);
        let output = payload.get("output").cloned().unwrap_or(payload);

        Ok(ActionOutcome { output, confidence })
    }

    /// Post a balanced transaction through the ledger engine
    ///
    /// The external_id is derived from the execution and step ids, so a
    /// checkpoint failure after a successful post collapses onto the existing
    /// transaction when the step re-enters — the posting and the step's
    /// completion behave as one unit from the caller's perspective. Ledger
    /// errors propagate verbatim.
    async fn execute_ledger_posting(
        &self,
        step: &WorkflowStep,
        params: &Value,
        context: &WorkflowContext,
    ) -> Result<ActionOutcome, EngineError> {
        let entries = parse_entries(params)?;

        let date = match params.get("date").and_then(Value::as_str) {
            Some(raw) => NaiveDate::from_str(raw)
                .map_err(|_| EngineError::Validation(format!("invalid posting date '{raw}'")))?,
            None => Utc::now().date_naive(),
        };

        let description = params
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or(&step.description)
            .to_string();
        let source = params
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("workflow")
            .to_string();

        let external_id = format!("wf:{}:{}", context.id, step.id);
        let metadata = json!({
            "execution_id": context.id,
            "workflow_id": context.workflow_id,
            "step_id": step.id,
        });

        let transaction = self
            .ledger
            .record_transaction(
                &context.workspace,
                NewTransaction {
                    date,
                    description,
                    source,
                    external_id: Some(external_id.clone()),
                    metadata: Some(metadata),
                    entries,
                },
            )
            .await?;

        Ok(ActionOutcome {
            output: json!({
                "transaction_id": transaction.id,
                "external_id": external_id,
                "entry_count": transaction.entries.len(),
            }),
            confidence: 1.0,
        })
    }

    /// Generic outbound HTTP adapter call
    async fn execute_http_call(
        &self,
        step: &WorkflowStep,
        params: &Value,
        context: &WorkflowContext,
    ) -> Result<ActionOutcome, EngineError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| self.action_failure(context, step, "http_call step requires a url param"))?;
        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("POST")
            .to_uppercase();

        let request = match method.as_str() {
            "GET" => self.http.get(url),
            "PUT" => self.http.put(url),
            "DELETE" => self.http.delete(url),
            _ => self.http.post(url),
        };
        let request = match params.get("body") {
            Some(body) => request.json(body),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| self.action_failure(context, step, format!("http call failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.action_failure(context, step, format!("endpoint returned {status}")));
        }

        let output = response
            .json::<Value>()
            .await
            .unwrap_or_else(|_| json!({ "status": status.as_u16() }));

        Ok(ActionOutcome { output, confidence: 1.0 })
    }
}

#[async_trait]
impl ActionDispatch for StepExecutor {
    async fn execute(
        &self,
        step: &WorkflowStep,
        params: Value,
        context: &WorkflowContext,
    ) -> Result<ActionOutcome, EngineError> {
        tracing::info!(
            "🚀 Executing step '{}' ({:?}) of execution {}",
            step.id,
            step.step_type,
            context.id
        );
        let start_time = std::time::Instant::now();

        let result = match step.step_type {
            StepType::InvoiceProcessing => self.execute_invoice_processing(&params),
            StepType::DocumentExtraction => {
                self.execute_document_extraction(step, &params, context).await
            }
            StepType::AgentExecution => self.execute_agent_execution(step, &params, context).await,
            StepType::LedgerPosting => self.execute_ledger_posting(step, &params, context).await,
            StepType::HttpCall => self.execute_http_call(step, &params, context).await,
        };

        let duration = start_time.elapsed();
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    "✅ Step '{}' completed in {:?} (confidence {:.2})",
                    step.id,
                    duration,
                    outcome.confidence
                );
            }
            Err(e) => {
                tracing::error!("❌ Step '{}' failed in {:?}: {}", step.id, duration, e);
            }
        }

        result
    }
}

/// Resolve step params against the execution context
///
/// String values may reference the run input or earlier step outputs with
/// simple dot notation: "$input", "$input.invoice.total",
/// "$steps.process_invoice.total". Objects and arrays are resolved
/// recursively; anything else passes through as a literal.
pub fn resolve_params(value: &Value, context: &WorkflowContext) -> Value {
    match value {
        Value::String(expr) => resolve_reference(expr, context),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| resolve_params(item, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), resolve_params(item, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_reference(expr: &str, context: &WorkflowContext) -> Value {
    if expr == "$input" {
        return context.input.clone();
    }
    if let Some(path) = expr.strip_prefix("$input.") {
        return extract_json_field(&context.input, path);
    }
    if let Some(rest) = expr.strip_prefix("$steps.") {
        let (step_id, path) = match rest.split_once('.') {
            Some((step_id, path)) => (step_id, Some(path)),
            None => (rest, None),
        };
        let Some(output) = context.outputs.get(step_id) else {
            return Value::Null;
        };
        return match path {
            Some(path) => extract_json_field(output, path),
            None => output.clone(),
        };
    }
    Value::String(expr.to_string())
}

/// Extract a field using simple dot notation: "user.name" -> ["user", "name"]
fn extract_json_field(root: &Value, field_path: &str) -> Value {
    let mut current = root;
    for part in field_path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part).unwrap_or(&Value::Null),
            _ => return Value::Null,
        }
    }
    current.clone()
}

/// Entries from an explicit array or the debit/credit shorthand
fn parse_entries(params: &Value) -> Result<Vec<NewEntry>, EngineError> {
    if let Some(list) = params.get("entries").and_then(Value::as_array) {
        let mut entries = Vec::with_capacity(list.len());
        for item in list {
            let account = item
                .get("account")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::Validation("entry missing account".to_string()))?
                .to_string();
            let entry_type = match item.get("entry_type").and_then(Value::as_str) {
                Some("DEBIT") => EntryType::Debit,
                Some("CREDIT") => EntryType::Credit,
                other => {
                    return Err(EngineError::Validation(format!(
                        "entry for '{account}' has invalid entry_type {other:?}"
                    )))
                }
            };
            let amount = item.get("amount").and_then(decimal_from_value).ok_or_else(|| {
                EngineError::Validation(format!("entry for '{account}' has no parseable amount"))
            })?;
            entries.push(NewEntry {
                account,
                entry_type,
                amount,
                description: item.get("description").and_then(Value::as_str).map(str::to_string),
            });
        }
        return Ok(entries);
    }

    let debit_account = params
        .get("debit_account")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Validation("ledger posting needs entries or debit_account".to_string()))?;
    let credit_account = params
        .get("credit_account")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Validation("ledger posting needs entries or credit_account".to_string()))?;
    let amount = params.get("amount").and_then(decimal_from_value).ok_or_else(|| {
        EngineError::Validation("ledger posting has no parseable amount".to_string())
    })?;

    Ok(vec![
        NewEntry {
            account: debit_account.to_string(),
            entry_type: EntryType::Debit,
            amount,
            description: None,
        },
        NewEntry {
            account: credit_account.to_string(),
            entry_type: EntryType::Credit,
            amount,
            description: None,
        },
    ])
}

/// Fixed-point amount from a JSON string or number
fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceDatabaseManager;
    use std::sync::Arc;

    fn context_with_output(step_id: &str, output: Value) -> WorkflowContext {
        let mut context = WorkflowContext::new(
            "acme",
            "wf-test",
            "start",
            json!({ "invoice": { "vendor": "Initech", "total": "100.00" }, "confidence": 0.6 }),
        );
        context.outputs.insert(step_id.to_string(), output);
        context
    }

    #[test]
    fn params_resolve_input_and_step_references() {
        let context = context_with_output("process", json!({ "total": "42.50" }));

        let params = json!({
            "whole_input": "$input",
            "vendor": "$input.invoice.vendor",
            "amount": "$steps.process.total",
            "whole_step": "$steps.process",
            "missing": "$steps.ghost.total",
            "literal": "6000",
            "nested": { "conf": "$input.confidence" },
        });

        let resolved = resolve_params(&params, &context);
        assert_eq!(resolved["vendor"], json!("Initech"));
        assert_eq!(resolved["amount"], json!("42.50"));
        assert_eq!(resolved["whole_step"], json!({ "total": "42.50" }));
        assert_eq!(resolved["missing"], Value::Null);
        assert_eq!(resolved["literal"], json!("6000"));
        assert_eq!(resolved["nested"]["conf"], json!(0.6));
        assert_eq!(resolved["whole_input"]["confidence"], json!(0.6));
    }

    fn executor() -> StepExecutor {
        let manager = Arc::new(WorkspaceDatabaseManager::in_memory());
        let config = crate::config::ActionConfig {
            extractor_url: None,
            agent_url: None,
            http_timeout_secs: 5,
        };
        StepExecutor::new(LedgerEngine::new(manager), config).unwrap()
    }

    #[test]
    fn invoice_processing_prefers_the_reported_confidence() {
        let outcome = executor()
            .execute_invoice_processing(&json!({
                "invoice": { "vendor": "Initech", "invoice_number": "INV-7",
                             "date": "2025-02-20", "total": "100.00" },
                "confidence": 0.6,
            }))
            .unwrap();

        assert!((outcome.confidence - 0.6).abs() < f64::EPSILON);
        assert_eq!(outcome.output["total"], json!("100.00"));
        assert_eq!(outcome.output["currency"], json!("USD"));
    }

    #[test]
    fn invoice_processing_scores_completeness_when_unreported() {
        let outcome = executor()
            .execute_invoice_processing(&json!({
                "invoice": { "vendor": "Initech", "total": "10.00" },
            }))
            .unwrap();

        // vendor + total out of four canonical fields
        assert!((outcome.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn shorthand_posting_params_expand_to_two_entries() {
        let entries = parse_entries(&json!({
            "debit_account": "6000",
            "credit_account": "2000",
            "amount": "99.95",
        }))
        .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, EntryType::Debit);
        assert_eq!(entries[1].entry_type, EntryType::Credit);
        assert_eq!(entries[0].amount, Decimal::from_str("99.95").unwrap());

        let err = parse_entries(&json!({ "debit_account": "6000" })).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
