//! Sequential batch execution with per-item failure isolation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::engine::CryptoEngine;
use crate::error::{ErrorCategory, ErrorKind, PgpflowError, Result};
use crate::item::WorkItem;
use crate::processor::ItemProcessor;
use crate::request::RequestParams;

/// The input document: shared request parameters plus the items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchDocument {
    #[serde(default)]
    pub request: RequestParams,
    pub items: Vec<BatchItem>,
}

impl BatchDocument {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| {
            PgpflowError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::BatchFormat,
                format!("malformed batch document: {e}"),
                e,
            )
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    #[serde(flatten)]
    pub item: WorkItem,
    /// Parameters that override the document-level request for this item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestParams>,
}

impl BatchItem {
    pub fn new(item: WorkItem) -> Self {
        Self {
            item,
            request: None,
        }
    }

    pub fn with_request(mut self, request: RequestParams) -> Self {
        self.request = Some(request);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The first failing item aborts the batch.
    #[default]
    Abort,
    /// A failing item gets a failure slot and the batch carries on.
    ContinueOnFail,
}

/// Shared flag a host sets to stop a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A failed item's place in the output when failures are isolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    /// The input item's JSON, unchanged.
    pub json: Map<String, Value>,
    pub error: String,
    pub paired_item: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputSlot {
    Failed(FailedItem),
    Done(WorkItem),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub items: Vec<OutputSlot>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl BatchOutput {
    /// The output slots, or [`ErrorKind::Cancelled`] if the batch did not
    /// run to the end.
    pub fn into_complete(self) -> Result<Vec<OutputSlot>> {
        if self.cancelled {
            return Err(PgpflowError::with_kind(
                ErrorCategory::User,
                ErrorKind::Cancelled,
                format!("batch cancelled after {} items", self.items.len()),
            ));
        }
        Ok(self.items)
    }
}

pub struct BatchRunner<'a, E: CryptoEngine> {
    processor: ItemProcessor<'a, E>,
    policy: FailurePolicy,
    cancellation: Option<CancellationFlag>,
}

impl<'a, E: CryptoEngine> BatchRunner<'a, E> {
    pub fn new(processor: ItemProcessor<'a, E>, policy: FailurePolicy) -> Self {
        Self {
            processor,
            policy,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationFlag::is_cancelled)
    }

    /// Process every item in order.
    ///
    /// With [`FailurePolicy::Abort`] the first failure is returned with its
    /// item index attached. On cancellation the results completed so far are
    /// returned and the item in flight is dropped.
    pub fn run(&self, document: &BatchDocument) -> Result<BatchOutput> {
        info!(items = document.items.len(), policy = ?self.policy, "batch started");
        let mut output = BatchOutput::default();
        let mut failed = 0usize;

        for (index, batch_item) in document.items.iter().enumerate() {
            if self.cancelled() {
                output.cancelled = true;
                break;
            }
            let params = match &batch_item.request {
                Some(overrides) => document.request.overridden_by(overrides),
                None => document.request.clone(),
            };
            let result = self.processor.process_item(&params, &batch_item.item);
            if self.cancelled() {
                output.cancelled = true;
                break;
            }

            match result {
                Ok(item) => output.items.push(OutputSlot::Done(item)),
                Err(e) => match self.policy {
                    FailurePolicy::Abort => {
                        return Err(e.with_item_index(index));
                    }
                    FailurePolicy::ContinueOnFail => {
                        warn!(index, kind = ?e.kind, error = %e.chain(), "item failed");
                        failed += 1;
                        output.items.push(OutputSlot::Failed(FailedItem {
                            json: batch_item.item.json.clone(),
                            error: e.chain(),
                            paired_item: index,
                        }));
                    }
                },
            }
        }

        info!(
            completed = output.items.len(),
            failed,
            cancelled = output.cancelled,
            "batch finished"
        );
        Ok(output)
    }
}
