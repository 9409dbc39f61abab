use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use millstock_core::{FieldKind, FieldValue, LocalId, Record, RecordId, ResourceKind};
use millstock_inventory::{ColumnTotals, DerivedFields, TollTable, derive};
use serde::Serialize;

use crate::coordinator::{SyncCoordinator, SyncError};
use crate::types::{Freshness, RejectedWrite, SyncNotice, WriteKind, WriteOutcome};

/// Status line shown above a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Banner {
    /// Showing the cached snapshot.
    Degraded { fetched_at: Option<DateTime<Utc>> },
    Saved,
    /// Stored locally, will sync later.
    SavedOffline,
    Synced { replayed: usize },
    Deleted,
    Warning { message: String },
    Error { message: String },
}

impl Banner {
    pub fn message(&self) -> String {
        match self {
            Banner::Degraded { fetched_at: Some(at) } => format!(
                "Offline: showing data saved {}",
                at.format("%Y-%m-%d %H:%M")
            ),
            Banner::Degraded { fetched_at: None } => "Offline: no saved data yet".to_string(),
            Banner::Saved => "Saved".to_string(),
            Banner::SavedOffline => "Saved offline, will sync when back online".to_string(),
            Banner::Synced { replayed } => format!("Back online: {replayed} change(s) synced"),
            Banner::Deleted => "Deleted".to_string(),
            Banner::Warning { message } | Banner::Error { message } => message.clone(),
        }
    }
}

/// Inclusive date filter; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    /// Undated records are always kept.
    pub fn contains(&self, date: Option<NaiveDate>) -> bool {
        let Some(date) = date else {
            return true;
        };
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// A confirmed-to-ask delete. Only `confirm_delete` acts on it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub record: Record,
    pub prompt: String,
}

/// One rendered table row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub record: Record,
    pub derived: DerivedFields,
    /// Not yet confirmed by the backend.
    pub pending: bool,
}

/// Form, table and status state of one data screen.
pub struct ScreenController {
    resource: ResourceKind,
    coordinator: Arc<SyncCoordinator>,
    tolls: TollTable,
    form: Record,
    editing: bool,
    banner: Option<Banner>,
    range: DateRange,
}

impl ScreenController {
    pub fn new(resource: ResourceKind, coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            resource,
            coordinator,
            tolls: TollTable::standard(),
            form: Record::new(),
            editing: false,
            banner: None,
            range: DateRange::default(),
        }
    }

    pub fn raw_materials(coordinator: Arc<SyncCoordinator>) -> Self {
        Self::new(ResourceKind::RawMaterials, coordinator)
    }

    pub fn finished_products(coordinator: Arc<SyncCoordinator>) -> Self {
        Self::new(ResourceKind::FinishedProducts, coordinator)
    }

    pub fn stock_movements(coordinator: Arc<SyncCoordinator>) -> Self {
        Self::new(ResourceKind::StockMovements, coordinator)
    }

    pub fn dispatches(coordinator: Arc<SyncCoordinator>) -> Self {
        Self::new(ResourceKind::Dispatches, coordinator)
    }

    pub fn stock_management(coordinator: Arc<SyncCoordinator>) -> Self {
        Self::new(ResourceKind::Stocks, coordinator)
    }

    pub fn with_tolls(mut self, tolls: TollTable) -> Self {
        self.tolls = tolls;
        self
    }

    pub fn resource(&self) -> ResourceKind {
        self.resource
    }

    pub fn form(&self) -> &Record {
        &self.form
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn banner(&self) -> Option<&Banner> {
        self.banner.as_ref()
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    pub fn set_date_range(&mut self, range: DateRange) {
        self.range = range;
    }

    /// Fetch the list; a cached answer raises the degraded banner.
    pub async fn load(&mut self) -> Result<(), SyncError> {
        match self.coordinator.read(self.resource).await {
            Ok(result) => {
                match result.freshness {
                    Freshness::Cached { fetched_at } => {
                        self.banner = Some(Banner::Degraded { fetched_at });
                    }
                    Freshness::Live => {
                        if matches!(self.banner, Some(Banner::Degraded { .. })) {
                            self.banner = None;
                        }
                    }
                }
                Ok(())
            }
            Err(err) => {
                self.banner = Some(Banner::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.form.set(name, value);
    }

    pub fn clear_form(&mut self) {
        self.form = Record::new();
        self.editing = false;
    }

    /// Load a row into the form for editing.
    pub fn edit(&mut self, record: &Record) {
        self.form = record.clone();
        self.editing = true;
    }

    /// Create or update from the form. The form is cleared unless the save failed.
    pub async fn submit(&mut self) -> Result<WriteOutcome, SyncError> {
        let record = self.form.clone();
        let result = if self.editing {
            self.coordinator.update(self.resource, record).await
        } else {
            self.coordinator.create(self.resource, record).await
        };

        match result {
            Ok(outcome) => {
                self.banner = Some(if outcome.is_offline() {
                    Banner::SavedOffline
                } else {
                    Banner::Saved
                });
                self.clear_form();
                Ok(outcome)
            }
            Err(err) => {
                self.banner = Some(Banner::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub fn request_delete(&self, record: &Record) -> DeleteRequest {
        let label = self
            .resource
            .schema()
            .fields
            .iter()
            .find(|f| f.required && f.kind == FieldKind::Text)
            .and_then(|f| record.get(&f.name))
            .map(FieldValue::display)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "this record".to_string());
        DeleteRequest {
            record: record.clone(),
            prompt: format!(
                "Delete {label} from {}? This cannot be undone.",
                self.resource.label()
            ),
        }
    }

    pub async fn confirm_delete(&mut self, request: DeleteRequest) -> Result<WriteOutcome, SyncError> {
        match self.coordinator.delete(self.resource, &request.record).await {
            Ok(outcome) => {
                self.banner = Some(if outcome.is_offline() {
                    Banner::SavedOffline
                } else {
                    Banner::Deleted
                });
                if self.editing && self.form.same_record(&request.record) {
                    self.clear_form();
                }
                Ok(outcome)
            }
            Err(err) => {
                self.banner = Some(Banner::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Rows in the current date range, with derived columns recomputed.
    pub async fn rows(&self) -> Result<Vec<TableRow>, SyncError> {
        let pending = self.coordinator.pending_writes(self.resource).await?;
        let queued_ids: HashSet<&RecordId> = pending.iter().filter_map(|w| w.record.id.as_ref()).collect();
        let queued_locals: HashSet<LocalId> = pending
            .iter()
            .filter(|w| w.kind != WriteKind::Delete)
            .map(|w| w.record.local_id)
            .collect();

        Ok(self
            .coordinator
            .records(self.resource)
            .await
            .into_iter()
            .filter(|r| self.range.contains(r.date("date")))
            .map(|record| {
                let pending = match &record.id {
                    None => true,
                    Some(id) => queued_ids.contains(id) || queued_locals.contains(&record.local_id),
                };
                TableRow {
                    derived: derive(self.resource, &record, &self.tolls),
                    record,
                    pending,
                }
            })
            .collect())
    }

    /// Footer totals over the visible rows.
    pub async fn totals(&self) -> Result<ColumnTotals, SyncError> {
        let rows = self.rows().await?;
        Ok(ColumnTotals::over(
            self.resource,
            rows.iter().map(|r| &r.record),
            &self.tolls,
        ))
    }

    /// Flat rows for spreadsheet export and printing.
    pub async fn export_rows(&self) -> Result<Vec<BTreeMap<String, String>>, SyncError> {
        let schema = self.resource.schema();
        Ok(self
            .rows()
            .await?
            .into_iter()
            .map(|row| {
                let mut out = BTreeMap::new();
                out.insert(
                    "id".to_string(),
                    row.record.id.as_ref().map(ToString::to_string).unwrap_or_default(),
                );
                for field in &schema.fields {
                    let value = row.record.get(&field.name).map(FieldValue::display).unwrap_or_default();
                    out.insert(field.name.clone(), value);
                }
                for (name, value) in &row.derived.values {
                    out.insert(name.clone(), value.normalize().to_string());
                }
                if self.resource == ResourceKind::Stocks {
                    out.insert(
                        "belowReorder".to_string(),
                        if row.derived.below_reorder { "yes" } else { "no" }.to_string(),
                    );
                }
                out.insert(
                    "status".to_string(),
                    if row.pending { "pending" } else { "synced" }.to_string(),
                );
                out
            })
            .collect())
    }

    /// Offline changes the backend refused for this resource.
    pub async fn rejected_writes(&self) -> Result<Vec<RejectedWrite>, SyncError> {
        self.coordinator.rejected_writes(self.resource).await
    }

    /// The user has read the refusals: forget them and drop the warning.
    pub async fn acknowledge_rejected(&mut self) -> Result<usize, SyncError> {
        let cleared = self.coordinator.clear_rejected(self.resource).await?;
        if matches!(self.banner, Some(Banner::Warning { .. })) {
            self.banner = None;
        }
        Ok(cleared)
    }

    /// Update the banner from a coordinator notice for this screen.
    pub fn handle_notice(&mut self, notice: &SyncNotice) {
        if notice.resource().is_some_and(|r| r != self.resource) {
            return;
        }
        match notice {
            SyncNotice::Degraded { .. } => {
                if !matches!(self.banner, Some(Banner::Degraded { .. })) {
                    self.banner = Some(Banner::Degraded { fetched_at: None });
                }
            }
            SyncNotice::SyncCompleted { replayed, .. } => {
                self.banner = Some(Banner::Synced { replayed: *replayed });
            }
            SyncNotice::WriteRejected { reason, .. } => {
                self.banner = Some(Banner::Warning {
                    message: format!("A change saved offline was refused: {reason}"),
                });
            }
            SyncNotice::StaleRecord { .. } => {
                self.banner = Some(Banner::Warning {
                    message: "That record no longer exists; the list was refreshed".to_string(),
                });
            }
            SyncNotice::StorageUnavailable { reason } => {
                self.banner = Some(Banner::Warning {
                    message: format!("Local storage unavailable, changes are kept for this session only: {reason}"),
                });
            }
            SyncNotice::SavedOffline { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::remote::InMemoryRemote;
    use crate::storage::MemoryStore;
    use millstock_inventory::derive::{CLOSING_STOCK, TOTAL_COST};
    use rust_decimal::Decimal;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn setup() -> (Arc<InMemoryRemote>, Arc<SyncCoordinator>) {
        let remote = Arc::new(InMemoryRemote::new());
        let coordinator = Arc::new(SyncCoordinator::new(
            &ClientConfig::default(),
            remote.clone(),
            Arc::new(MemoryStore::new()),
        ));
        (remote, coordinator)
    }

    #[tokio::test]
    async fn cached_maize_row_still_computes_closing_stock() {
        let (remote, coordinator) = setup();
        remote.seed(
            ResourceKind::RawMaterials,
            vec![Record::new()
                .with_field("material", "Maize")
                .with_field("date", day(1))
                .with_field("opening", 100)
                .with_field("stockIn", 20)
                .with_field("stockOut", 5)],
        );
        let mut screen = ScreenController::raw_materials(coordinator);
        screen.load().await.unwrap();

        remote.set_online(false);
        screen.load().await.unwrap();

        assert!(matches!(screen.banner(), Some(Banner::Degraded { fetched_at: Some(_) })));
        let rows = screen.rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].derived.get(CLOSING_STOCK), Some(Decimal::from(115)));
        assert!(!rows[0].pending);
    }

    #[tokio::test]
    async fn refused_offline_change_is_shown_until_acknowledged() {
        let (remote, coordinator) = setup();
        let mut notices = coordinator.subscribe();
        let mut screen = ScreenController::stock_management(coordinator.clone());

        remote.set_online(false);
        screen.set_field("item", "Bags");
        screen.set_field("opening", "10");
        screen.submit().await.unwrap();

        remote.set_online(true);
        remote.set_reject_writes(Some("item is archived"));
        coordinator.reconnected().await;
        while let Ok(notice) = notices.try_recv() {
            screen.handle_notice(&notice);
        }

        assert!(matches!(screen.banner(), Some(Banner::Warning { message }) if message.contains("item is archived")));
        assert_eq!(screen.rejected_writes().await.unwrap().len(), 1);

        assert_eq!(screen.acknowledge_rejected().await.unwrap(), 1);
        assert!(screen.banner().is_none());
        assert!(screen.rejected_writes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_submit_marks_row_pending() {
        let (remote, coordinator) = setup();
        remote.set_online(false);
        let mut screen = ScreenController::stock_management(coordinator);

        screen.set_field("item", "Bags");
        screen.set_field("opening", "40");
        screen.set_field("stockOut", "35");
        screen.set_field("reorderLevel", "10");
        let outcome = screen.submit().await.unwrap();

        assert!(outcome.is_offline());
        assert_eq!(screen.banner(), Some(&Banner::SavedOffline));
        assert!(screen.form().fields.is_empty());

        let rows = screen.rows().await.unwrap();
        assert!(rows[0].pending);
        assert!(rows[0].derived.below_reorder);

        let export = screen.export_rows().await.unwrap();
        assert_eq!(export[0]["status"], "pending");
        assert_eq!(export[0]["closingStock"], "5");
        assert_eq!(export[0]["belowReorder"], "yes");
    }

    #[tokio::test]
    async fn invalid_form_keeps_input_and_shows_error() {
        let (_, coordinator) = setup();
        let mut screen = ScreenController::stock_movements(coordinator);
        screen.set_field("item", "Bran");
        screen.set_field("quantity", "lots");

        assert!(screen.submit().await.is_err());
        assert!(matches!(screen.banner(), Some(Banner::Error { .. })));
        assert_eq!(screen.form().text("item"), Some("Bran"));
    }

    #[tokio::test]
    async fn edit_then_submit_updates_in_place() {
        let (remote, coordinator) = setup();
        remote.seed(
            ResourceKind::Stocks,
            vec![Record::new().with_field("item", "Twine").with_field("opening", 3)],
        );
        let mut screen = ScreenController::stock_management(coordinator);
        screen.load().await.unwrap();

        let row = screen.rows().await.unwrap().remove(0).record;
        screen.edit(&row);
        screen.set_field("stockIn", 7);
        screen.submit().await.unwrap();

        assert_eq!(screen.banner(), Some(&Banner::Saved));
        assert!(!screen.is_editing());
        let stored = remote.snapshot(ResourceKind::Stocks);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].number("stockIn"), Some(Decimal::from(7)));
    }

    #[tokio::test]
    async fn delete_needs_a_confirmed_request() {
        let (remote, coordinator) = setup();
        remote.seed(
            ResourceKind::Dispatches,
            vec![Record::new().with_field("customer", "Adom Foods").with_field("date", day(3))],
        );
        let mut screen = ScreenController::dispatches(coordinator);
        screen.load().await.unwrap();
        let row = screen.rows().await.unwrap().remove(0).record;

        let request = screen.request_delete(&row);
        assert_eq!(
            request.prompt,
            "Delete Adom Foods from Dispatch & Delivery? This cannot be undone."
        );
        assert_eq!(remote.snapshot(ResourceKind::Dispatches).len(), 1);

        let outcome = screen.confirm_delete(request).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Deleted);
        assert_eq!(screen.banner(), Some(&Banner::Deleted));
        assert!(remote.snapshot(ResourceKind::Dispatches).is_empty());
        assert!(screen.rows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn date_range_filters_rows_and_totals() {
        let (remote, coordinator) = setup();
        let trip = |d: u32, fuel: i64| {
            Record::new()
                .with_field("customer", "Kumasi Mills")
                .with_field("date", day(d))
                .with_field("tollGroup", "Group 2: Saloon Cars, Taxis")
                .with_field("fuelCost", fuel)
                .with_field("perDiemRate", 10)
                .with_field("personnelCount", 2)
        };
        remote.seed(ResourceKind::Dispatches, vec![trip(1, 100), trip(10, 200), trip(20, 300)]);

        let mut screen = ScreenController::dispatches(coordinator);
        screen.load().await.unwrap();
        screen.set_date_range(DateRange::new(Some(day(5)), Some(day(20))));

        assert_eq!(screen.rows().await.unwrap().len(), 2);
        let totals = screen.totals().await.unwrap();
        assert_eq!(totals.rows, 2);
        // (5 + 200 + 20) + (5 + 300 + 20)
        assert_eq!(totals.derived(TOTAL_COST), Decimal::from(550));
    }

    #[test]
    fn undated_records_pass_any_range() {
        let range = DateRange::new(Some(day(5)), Some(day(6)));
        assert!(range.contains(None));
        assert!(range.contains(Some(day(5))));
        assert!(!range.contains(Some(day(7))));
        assert!(DateRange::default().contains(Some(day(30))));
    }

    #[test]
    fn notices_for_other_screens_are_ignored() {
        let (_, coordinator) = setup();
        let mut screen = ScreenController::finished_products(coordinator);
        screen.handle_notice(&SyncNotice::SyncCompleted {
            resource: ResourceKind::Stocks,
            replayed: 2,
        });
        assert!(screen.banner().is_none());

        screen.handle_notice(&SyncNotice::SyncCompleted {
            resource: ResourceKind::FinishedProducts,
            replayed: 2,
        });
        assert_eq!(screen.banner(), Some(&Banner::Synced { replayed: 2 }));
        assert_eq!(
            screen.banner().map(Banner::message).as_deref(),
            Some("Back online: 2 change(s) synced")
        );

        screen.handle_notice(&SyncNotice::StorageUnavailable {
            reason: "disk full".to_string(),
        });
        assert!(matches!(screen.banner(), Some(Banner::Warning { .. })));
    }
}
