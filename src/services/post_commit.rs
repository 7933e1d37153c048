//! Best-effort work that follows a committed order.
//!
//! The order itself is already durable when these run; a failing task is
//! logged and counted and never fails the request that queued it.

use crate::{
    auth::Requester,
    db::DbPool,
    errors::ServiceError,
    gateway::CreatePaymentResponse,
    services::{catalog::CartGateway, deposits::DepositService, payments::PaymentService},
};
use metrics::counter;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCommitTask {
    RecordPayment {
        order_id: i32,
        method_id: i32,
        amount: Decimal,
    },
    ClearSelectedCart {
        user_id: i32,
    },
    RequestDepositLink {
        order_id: i32,
        requester: Requester,
    },
}

impl PostCommitTask {
    pub fn name(&self) -> &'static str {
        match self {
            PostCommitTask::RecordPayment { .. } => "record_payment",
            PostCommitTask::ClearSelectedCart { .. } => "clear_selected_cart",
            PostCommitTask::RequestDepositLink { .. } => "request_deposit_link",
        }
    }

    /// Gateway calls are never retried; local writes get one more attempt.
    pub fn default_policy(&self) -> FailurePolicy {
        match self {
            PostCommitTask::RequestDepositLink { .. } => FailurePolicy::LogAndContinue,
            PostCommitTask::RecordPayment { .. } | PostCommitTask::ClearSelectedCart { .. } => {
                FailurePolicy::Retry { attempts: 2 }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    LogAndContinue,
    /// Total attempts, including the first.
    Retry { attempts: u32 },
}

impl FailurePolicy {
    fn attempts(&self) -> u32 {
        match self {
            FailurePolicy::LogAndContinue => 1,
            FailurePolicy::Retry { attempts } => (*attempts).max(1),
        }
    }
}

/// What the post-commit pass produced.
#[derive(Debug, Default)]
pub struct PostCommitReport {
    pub deposit_link: Option<CreatePaymentResponse>,
    pub failed: Vec<&'static str>,
}

enum TaskOutput {
    Done,
    DepositLink(CreatePaymentResponse),
}

#[derive(Clone)]
pub struct PostCommitRunner {
    db_pool: Arc<DbPool>,
    cart: Arc<dyn CartGateway>,
    payments: PaymentService,
    deposits: DepositService,
}

impl PostCommitRunner {
    pub fn new(
        db_pool: Arc<DbPool>,
        cart: Arc<dyn CartGateway>,
        payments: PaymentService,
        deposits: DepositService,
    ) -> Self {
        Self {
            db_pool,
            cart,
            payments,
            deposits,
        }
    }

    /// Runs each task under its default policy, in order.
    pub async fn run(&self, tasks: Vec<PostCommitTask>) -> PostCommitReport {
        let mut report = PostCommitReport::default();

        for task in tasks {
            let policy = task.default_policy();
            match self.run_with_policy(&task, policy).await {
                Ok(TaskOutput::DepositLink(link)) => report.deposit_link = Some(link),
                Ok(TaskOutput::Done) => {}
                Err(e) => {
                    warn!(task = task.name(), error = %e, "post-commit task failed");
                    counter!("plantshop_post_commit.failed", 1, "task" => task.name());
                    report.failed.push(task.name());
                }
            }
        }

        report
    }

    async fn run_with_policy(
        &self,
        task: &PostCommitTask,
        policy: FailurePolicy,
    ) -> Result<TaskOutput, ServiceError> {
        let attempts = policy.attempts();
        let mut attempt = 1;
        loop {
            match self.execute(task).await {
                Ok(output) => return Ok(output),
                Err(e) if attempt < attempts => {
                    debug!(task = task.name(), attempt, error = %e, "retrying post-commit task");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute(&self, task: &PostCommitTask) -> Result<TaskOutput, ServiceError> {
        match task {
            PostCommitTask::RecordPayment {
                order_id,
                method_id,
                amount,
            } => {
                let payment = self
                    .payments
                    .record_payment(*order_id, *method_id, *amount)
                    .await?;
                info!(order_id, payment_id = payment.id, "checkout payment recorded");
                Ok(TaskOutput::Done)
            }
            PostCommitTask::ClearSelectedCart { user_id } => {
                let removed = self.cart.clear_selected(&self.db_pool, *user_id).await?;
                debug!(user_id, removed, "selected cart entries cleared");
                Ok(TaskOutput::Done)
            }
            PostCommitTask::RequestDepositLink {
                order_id,
                requester,
            } => {
                let link = self
                    .deposits
                    .create_deposit_payment(requester, *order_id)
                    .await?;
                Ok(TaskOutput::DepositLink(link))
            }
        }
    }
}
