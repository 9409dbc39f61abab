use std::collections::BTreeMap;
use std::sync::Arc;

use millstock_client::screens::ScreenController;
use millstock_client::{
    ClientConfig, InMemoryRemote, MemoryStore, SyncCoordinator, SyncMode, WriteKind, WriteOutcome,
};
use millstock_core::{Record, ResourceKind};
use millstock_inventory::derive::{CLOSING_STOCK, YIELD_PERCENT};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn coordinator(remote: &Arc<InMemoryRemote>) -> Arc<SyncCoordinator> {
    Arc::new(SyncCoordinator::new(
        &ClientConfig::default(),
        remote.clone(),
        Arc::new(MemoryStore::new()),
    ))
}

#[tokio::test]
async fn failed_replay_keeps_remaining_writes_in_order() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.seed(
        ResourceKind::Stocks,
        vec![Record::new().with_field("item", "Bags").with_field("opening", 10)],
    );
    let coordinator = coordinator(&remote);
    let bags = coordinator.read(ResourceKind::Stocks).await.unwrap().records.remove(0);

    remote.set_online(false);
    coordinator
        .update(ResourceKind::Stocks, bags.clone().with_field("stockIn", 5))
        .await
        .unwrap();
    coordinator
        .update(ResourceKind::Stocks, bags.clone().with_field("stockIn", 8))
        .await
        .unwrap();
    coordinator.delete(ResourceKind::Stocks, &bags).await.unwrap();

    // The first replayed write goes through, then the backend drops again.
    remote.set_online(true);
    remote.set_fail_after(Some(1));
    let reports = coordinator.reconnected().await;

    assert_eq!(reports[0].replayed, 1);
    assert_eq!(reports[0].remaining, 2);
    let kinds: Vec<WriteKind> = coordinator
        .pending_writes(ResourceKind::Stocks)
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.kind)
        .collect();
    assert_eq!(kinds, vec![WriteKind::Update, WriteKind::Delete]);
    assert!(!remote.calls().iter().any(|c| c == "delete stocks"));
    assert_eq!(coordinator.mode(ResourceKind::Stocks).await, SyncMode::Degraded);
}

#[tokio::test]
async fn offline_session_round_trip() {
    let remote = Arc::new(InMemoryRemote::new());
    let coordinator = coordinator(&remote);
    let mut screen = ScreenController::finished_products(coordinator.clone());

    remote.set_online(false);
    screen.load().await.unwrap();
    screen.set_field("product", "Maize Flour");
    screen.set_field("date", "2024-08-01");
    screen.set_field("plannedTons", "1");
    screen.set_field("finalOutputKg", "1000");
    screen.set_field("millingInput", "1000");
    screen.set_field("millingOutput", "1040");
    let outcome = screen.submit().await.unwrap();
    assert!(matches!(outcome, WriteOutcome::SavedOffline(_)));

    let rows = screen.rows().await.unwrap();
    assert!(rows[0].pending);
    assert_eq!(rows[0].derived.get(YIELD_PERCENT), Some(Decimal::from(100)));
    // Output above input is accepted as a negative loss.
    assert_eq!(rows[0].derived.get("millingLoss"), Some(Decimal::from(-40)));

    remote.set_online(true);
    coordinator.reconnected().await;
    screen.load().await.unwrap();

    let rows = screen.rows().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].pending);
    assert!(rows[0].record.is_synced());
    assert_eq!(coordinator.mode(ResourceKind::FinishedProducts).await, SyncMode::Live);
}

#[tokio::test]
async fn cached_read_matches_last_live_read() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.seed(
        ResourceKind::RawMaterials,
        vec![Record::new()
            .with_field("material", "Maize")
            .with_field("date", "2024-08-02")
            .with_field("opening", 100)
            .with_field("stockIn", 20)
            .with_field("stockOut", 5)],
    );
    let coordinator = coordinator(&remote);
    let mut screen = ScreenController::raw_materials(coordinator.clone());
    screen.load().await.unwrap();
    let live = screen.totals().await.unwrap();

    remote.set_online(false);
    screen.load().await.unwrap();
    let cached = screen.totals().await.unwrap();

    assert_eq!(live, cached);
    assert_eq!(cached.derived(CLOSING_STOCK), Decimal::from(115));
    assert!(cached.is_consistent());
}

#[derive(Debug, Clone)]
enum Op {
    Create(i64),
    Update(usize, i64),
    Delete(usize),
    GoOffline,
    GoOnline,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..500).prop_map(Op::Create),
        2 => (any::<usize>(), 0i64..500).prop_map(|(i, q)| Op::Update(i, q)),
        1 => any::<usize>().prop_map(Op::Delete),
        1 => Just(Op::GoOffline),
        1 => Just(Op::GoOnline),
    ]
}

fn table(records: &[Record]) -> Vec<(String, Decimal)> {
    let mut rows: Vec<(String, Decimal)> = records
        .iter()
        .map(|r| {
            (
                r.text("item").unwrap_or_default().to_string(),
                r.number_or_zero("opening"),
            )
        })
        .collect();
    rows.sort();
    rows
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever mix of online and offline edits happens, after reconnecting the
    /// backend holds exactly what the user did, and nothing is left queued.
    #[test]
    fn edits_converge_after_reconnect(ops in prop::collection::vec(op(), 1..25)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async move {
            let remote = Arc::new(InMemoryRemote::new());
            let coordinator = coordinator(&remote);
            let mut expected: BTreeMap<String, i64> = BTreeMap::new();
            let mut next = 0;

            for op in ops {
                match op {
                    Op::GoOffline => remote.set_online(false),
                    Op::GoOnline => remote.set_online(true),
                    Op::Create(opening) => {
                        next += 1;
                        let item = format!("item-{next}");
                        let record = Record::new().with_field("item", item.as_str()).with_field("opening", opening);
                        coordinator.create(ResourceKind::Stocks, record).await.unwrap();
                        expected.insert(item, opening);
                    }
                    Op::Update(i, opening) => {
                        let Some(item) = expected.keys().nth(i % expected.len().max(1)).cloned() else {
                            continue;
                        };
                        let shown = coordinator.records(ResourceKind::Stocks).await;
                        let target = shown.iter().find(|r| r.text("item") == Some(item.as_str()));
                        prop_assert!(target.is_some(), "{item} missing from the list");
                        let edited = target.unwrap().clone().with_field("opening", opening);
                        coordinator.update(ResourceKind::Stocks, edited).await.unwrap();
                        expected.insert(item, opening);
                    }
                    Op::Delete(i) => {
                        let Some(item) = expected.keys().nth(i % expected.len().max(1)).cloned() else {
                            continue;
                        };
                        let shown = coordinator.records(ResourceKind::Stocks).await;
                        let target = shown.iter().find(|r| r.text("item") == Some(item.as_str()));
                        prop_assert!(target.is_some(), "{item} missing from the list");
                        coordinator.delete(ResourceKind::Stocks, target.unwrap()).await.unwrap();
                        expected.remove(&item);
                    }
                }

                // The list on screen always reflects the user's intent.
                let shown = coordinator.records(ResourceKind::Stocks).await;
                prop_assert_eq!(shown.len(), expected.len());
            }

            remote.set_online(true);
            coordinator.reconnected().await;
            coordinator.read(ResourceKind::Stocks).await.unwrap();

            let want: Vec<(String, Decimal)> = expected
                .into_iter()
                .map(|(item, opening)| (item, Decimal::from(opening)))
                .collect();
            prop_assert_eq!(table(&remote.snapshot(ResourceKind::Stocks)), want.clone());
            prop_assert_eq!(table(&coordinator.records(ResourceKind::Stocks).await), want);
            prop_assert_eq!(coordinator.pending_count(ResourceKind::Stocks).await.unwrap(), 0);
            prop_assert_eq!(coordinator.mode(ResourceKind::Stocks).await, SyncMode::Live);
            Ok(())
        })?;
    }
}
