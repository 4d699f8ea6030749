use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PollConfig;
use crate::error::StoreError;
use crate::models::notification::{Category, NotificationContent, ResolvedNotification};
use crate::models::record::ChangeRecord;
use crate::services::dispatcher::{DispatchOutcome, Dispatcher};
use crate::services::odoo::{fetch, timed, RecordStore, SearchQuery, Session};
use crate::services::registry::DeviceRegistry;
use crate::services::resolver::{RecipientResolver, Recipients, Route};
use crate::services::watermark::{newest_modification, Watermark};

/// Collaborators shared by every category poller.
#[derive(Clone)]
pub struct PollContext {
    pub store: Arc<dyn RecordStore>,
    pub registry: DeviceRegistry,
    pub resolver: RecipientResolver,
    pub dispatcher: Dispatcher,
    pub config: PollConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub admitted: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub unroutable: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No device is registered; nothing was queried.
    NoDevices,
    /// The watermark was seeded instead of notifying.
    Seeded,
    Polled(TickReport),
}

pub struct CategoryPoller {
    category: Category,
    ctx: PollContext,
    watermark: Watermark,
}

impl CategoryPoller {
    pub fn new(category: Category, ctx: PollContext) -> Self {
        let watermark = Watermark::new(ctx.config.recent_ids_capacity);
        Self {
            category,
            ctx,
            watermark,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    fn timeout(&self) -> Duration {
        self.ctx.config.request_timeout()
    }

    fn scope_query(&self) -> SearchQuery {
        SearchQuery::new(self.category.model())
            .filter(json!(["state", "in", self.category.states()]))
            .fields(self.category.fields())
            .order("write_date desc")
    }

    async fn authenticate(&self) -> Result<Session, StoreError> {
        log::debug!("[{}] authenticating", self.category);
        timed(self.timeout(), self.ctx.store.authenticate()).await
    }

    /// Seeds the watermark from the most recently modified record already in
    /// scope, so records that predate the process are never notified.
    pub async fn initialize(&mut self) -> Result<(), StoreError> {
        let session = self.authenticate().await?;
        self.seed(&session).await
    }

    async fn seed(&mut self, session: &Session) -> Result<(), StoreError> {
        let newest_query = self.scope_query().limit(1);
        let rows: Vec<ChangeRecord> =
            timed(self.timeout(), fetch(self.ctx.store.as_ref(), session, &newest_query)).await?;
        let newest = newest_modification(&rows);
        self.watermark.initialize(newest);
        log::info!(
            "[{}] watermark initialized at {}",
            self.category,
            newest.map(|ts| ts.to_string()).unwrap_or_else(|| "<empty>".to_string())
        );
        Ok(())
    }

    /// One poll cycle: authenticate, query past the watermark, filter,
    /// resolve every record, commit the watermark, then dispatch.
    pub async fn tick(&mut self) -> Result<TickOutcome, StoreError> {
        if self.ctx.registry.is_empty().await {
            log::debug!("[{}] no registered devices, skipping poll", self.category);
            return Ok(TickOutcome::NoDevices);
        }

        let session = self.authenticate().await?;

        if !self.watermark.is_initialized() {
            self.seed(&session).await?;
            return Ok(TickOutcome::Seeded);
        }

        log::debug!("[{}] querying", self.category);
        let mut query = self.scope_query().limit(self.ctx.config.batch_limit);
        if let Some(clause) = self.watermark.filter_clause() {
            query = query.filter(clause);
        }
        let rows: Vec<ChangeRecord> =
            timed(self.timeout(), fetch(self.ctx.store.as_ref(), &session, &query)).await?;

        log::debug!("[{}] filtering {} record(s)", self.category, rows.len());
        let mut report = TickReport {
            fetched: rows.len(),
            ..TickReport::default()
        };
        let newest = newest_modification(&rows);
        let admitted = self.watermark.admit(rows);
        report.admitted = admitted.len();

        if !admitted.is_empty() {
            log::info!("[{}] {} new record(s) detected", self.category, admitted.len());
        }

        // Any lookup failure aborts the tick before ids or the boundary are
        // committed, so the same records come back next tick.
        let mut resolved = Vec::with_capacity(admitted.len());
        for record in &admitted {
            resolved.push(self.resolve(&session, record).await?);
        }

        self.watermark.commit(&admitted, newest);
        log::debug!(
            "[{}] watermark at {:?}, {} recent id(s)",
            self.category,
            self.watermark.last_seen(),
            self.watermark.recent_ids().len()
        );

        for (record, recipients) in admitted.iter().zip(resolved) {
            self.dispatch(record, recipients, &mut report).await;
        }

        Ok(TickOutcome::Polled(report))
    }

    async fn resolve(&self, session: &Session, record: &ChangeRecord) -> Result<Recipients, StoreError> {
        log::debug!("[{}] resolving recipients for record {}", self.category, record.id);
        self.ctx
            .resolver
            .resolve(session, self.category, record)
            .await
            .map_err(|e| {
                log::warn!(
                    "[{}] recipient lookup failed for record {}: {}",
                    self.category,
                    record.id,
                    e
                );
                e
            })
    }

    async fn dispatch(&self, record: &ChangeRecord, recipients: Recipients, report: &mut TickReport) {
        if recipients.route == Route::Unroutable || recipients.tokens.is_empty() {
            log::warn!(
                "[{}] no recipient for record {} ({:?}), dropping",
                self.category,
                record.id,
                recipients.route
            );
            report.unroutable += 1;
            return;
        }

        let notification = ResolvedNotification {
            recipients: recipients.tokens,
            content: build_content(self.category, record),
        };

        log::debug!(
            "[{}] dispatching record {} to {} device(s) via {:?}",
            self.category,
            record.id,
            notification.recipients.len(),
            recipients.route
        );
        for token in &notification.recipients {
            match self.ctx.dispatcher.dispatch(token, &notification.content).await {
                DispatchOutcome::Delivered => report.delivered += 1,
                DispatchOutcome::Skipped => report.skipped += 1,
            }
        }
    }
}

/// Deterministic title, body and data for a record. Absent fields render as
/// empty strings.
pub fn build_content(category: Category, record: &ChangeRecord) -> NotificationContent {
    let name = record.name.clone().unwrap_or_default();
    let employee = record.employee_name().to_string();
    let leave_type = record.leave_type_name().to_string();
    let date_from = record.date_from.clone().unwrap_or_default();
    let date_to = record.date_to.clone().unwrap_or_default();
    let days = record.days_text();
    let state = record.state.clone().unwrap_or_default();

    let (kind, title, body) = match category {
        Category::LeaveDecision if state == "refuse" => (
            "leave_refused",
            "Leave refused".to_string(),
            format!("{} for {} has been refused", name, employee),
        ),
        Category::LeaveDecision => (
            "leave_approved",
            "Leave approved".to_string(),
            format!("{} for {} has been approved", name, employee),
        ),
        Category::LeavePendingApproval => (
            "leave_to_approve",
            "New leave request to approve".to_string(),
            format!(
                "{} requested {} day(s) of {} from {} to {}",
                employee, days, leave_type, date_from, date_to
            ),
        ),
        Category::SecondApproval => (
            "leave_second_approval",
            "Leave awaiting second approval".to_string(),
            format!(
                "{}: {} from {} to {} needs final approval",
                employee, leave_type, date_from, date_to
            ),
        ),
        Category::AllocationPending => (
            "allocation_to_approve",
            "New allocation request".to_string(),
            format!("{} requested {} day(s) of {}", employee, days, leave_type),
        ),
    };

    let employee_id = record
        .employee_id
        .as_ref()
        .map(|r| r.id.to_string())
        .unwrap_or_default();

    let data = BTreeMap::from([
        ("type".to_string(), kind.to_string()),
        ("category".to_string(), category.as_str().to_string()),
        ("recordId".to_string(), record.id.to_string()),
        ("employeeId".to_string(), employee_id),
        ("employeeName".to_string(), employee),
        ("leaveType".to_string(), leave_type),
        ("state".to_string(), state),
        ("name".to_string(), name),
        ("dateFrom".to_string(), date_from),
        ("dateTo".to_string(), date_to),
        ("numberOfDays".to_string(), days),
    ]);

    NotificationContent { title, body, data }
}

/// Drives one category on a fixed interval until shutdown is signalled. A
/// tick still running when the next one is due makes that next one skip.
pub async fn run_poller(mut poller: CategoryPoller, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let category = poller.category();

    if let Err(e) = poller.initialize().await {
        log::error!("[{}] watermark initialization failed, retrying next tick: {}", category, e);
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        match poller.tick().await {
            Ok(TickOutcome::Polled(report)) if report.admitted > 0 => log::info!(
                "[{}] cycle done: {} delivered, {} skipped, {} unroutable",
                category,
                report.delivered,
                report.skipped,
                report.unroutable
            ),
            Ok(_) => {}
            Err(e @ StoreError::Authentication(_)) => {
                log::error!("[{}] authentication failed, retrying next tick: {}", category, e)
            }
            Err(e) => log::error!("[{}] poll aborted, retrying next tick: {}", category, e),
        }
    }

    log::info!(
        "[{}] poller stopped, last seen modification {:?}",
        category,
        poller.watermark().last_seen()
    );
}

pub fn spawn_pollers(ctx: PollContext, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let period = ctx.config.interval();
    Category::ALL
        .iter()
        .map(|&category| {
            let poller = CategoryPoller::new(category, ctx.clone());
            tokio::spawn(run_poller(poller, period, shutdown.clone()))
        })
        .collect()
}
