//! Subscription loop against in-memory and file-backed sources

use async_trait::async_trait;
use hermes_core::encode_address;
use hermes_core::wire::testing::{b64, deposit_args, encode_log, withdraw_args};
use hermes_ingest::{
    ApplicationTransaction, CancelToken, Error, IngestionController, IngestionState,
    JsonFileSource, RunnerConfig, StartupOptions, SubscribedTransaction, SubscriptionBatch,
    SubscriptionRunner, TransactionFilter, TransactionSource,
};
use hermes_params::{AppDescriptor, MethodKind};
use hermes_storage_sqlite::LedgerStore;
use std::collections::VecDeque;
use std::time::Duration;

const APP: AppDescriptor = AppDescriptor::new(7331, 100);

fn with_selector(mut args: Vec<String>, kind: MethodKind) -> Vec<String> {
    args[0] = b64(&kind.selector());
    args
}

fn deposit(leaf: u64, round: u64, amount: u64) -> SubscribedTransaction {
    SubscribedTransaction {
        id: format!("DEP{}", leaf),
        confirmed_round: round,
        application_transaction: ApplicationTransaction {
            application_id: APP.id,
            application_args: with_selector(
                deposit_args(&[leaf as u8; 32], &[0x11; 32], amount),
                MethodKind::Deposit,
            ),
            accounts: Vec::new(),
        },
        logs: vec![b64(&encode_log(leaf, &[leaf as u8; 32]))],
    }
}

fn withdrawal(leaf: u64, round: u64, nullifier: u8) -> SubscribedTransaction {
    SubscribedTransaction {
        id: format!("WD{}", leaf),
        confirmed_round: round,
        application_transaction: ApplicationTransaction {
            application_id: APP.id,
            application_args: with_selector(
                withdraw_args(&[leaf as u8; 32], &[nullifier; 32], 1_000, 10, 1),
                MethodKind::Withdraw,
            ),
            accounts: vec!["RECIPIENT".to_string()],
        },
        logs: vec![b64(&encode_log(leaf, &[leaf as u8; 32]))],
    }
}

fn controller(store: LedgerStore) -> IngestionController {
    let mut controller = IngestionController::new(store, APP);
    controller.initialize(&StartupOptions::default()).unwrap();
    controller
}

fn until_caught_up() -> RunnerConfig {
    RunnerConfig {
        stop_when_caught_up: true,
        ..RunnerConfig::default()
    }
}

/// Replays scripted poll results, then reports caught up forever
struct ScriptedSource {
    script: VecDeque<Result<SubscriptionBatch, Error>>,
    polls: usize,
}

impl ScriptedSource {
    fn new(script: Vec<Result<SubscriptionBatch, Error>>) -> Self {
        Self {
            script: script.into(),
            polls: 0,
        }
    }
}

#[async_trait]
impl TransactionSource for ScriptedSource {
    async fn poll(
        &mut self,
        filters: &[TransactionFilter],
        watermark: u64,
    ) -> Result<SubscriptionBatch, Error> {
        self.polls += 1;
        match self.script.pop_front() {
            Some(Ok(mut batch)) => {
                batch.transactions.retain(|t| {
                    filters.iter().any(|f| f.name == t.filter_name)
                        && t.transaction.confirmed_round > watermark
                });
                Ok(batch)
            }
            Some(Err(e)) => Err(e),
            None => Ok(SubscriptionBatch {
                transactions: Vec::new(),
                new_watermark: watermark,
                caught_up: true,
            }),
        }
    }
}

fn batch(source_rows: Vec<SubscribedTransaction>, new_watermark: u64, caught_up: bool) -> SubscriptionBatch {
    let filters = TransactionFilter::for_app(APP.id);
    SubscriptionBatch {
        transactions: source_rows
            .into_iter()
            .filter_map(|t| {
                filters.iter().find(|f| f.matches(&t)).map(|f| hermes_ingest::TaggedTransaction {
                    filter_name: f.name.clone(),
                    transaction: t,
                })
            })
            .collect(),
        new_watermark,
        caught_up,
    }
}

#[tokio::test]
async fn test_ingests_file_source_to_tip() {
    let mut controller = controller(LedgerStore::open_in_memory().unwrap());
    let mut source = JsonFileSource::new(vec![
        deposit(0, 101, 5_000_000),
        deposit(1, 150, 2_000_000),
        withdrawal(2, 210, 0xaa),
    ])
    .with_max_rounds_per_batch(50);

    let summary = SubscriptionRunner::new(until_caught_up())
        .run(&mut controller, &mut source, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.transactions, 3);
    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.duplicates, 0);
    assert_eq!(summary.watermark, 210);
    assert!(summary.batches >= 3);
    assert_eq!(controller.state(), IngestionState::Live);

    let store = controller.store();
    assert_eq!(store.get_watermark().unwrap(), 210);
    assert_eq!(store.note_count().unwrap(), 3);
    let stats = store.stats().unwrap();
    assert_eq!(stats.total_deposits, 7_000_000);
    assert_eq!(stats.total_withdrawals, 1_000);
    assert_eq!(stats.total_fees, 10);
    assert_eq!(stats.count_deposits, 2);
    assert_eq!(
        store.deposits_for_address(&encode_address(&[0x11; 32])).unwrap().len(),
        2
    );
    assert_eq!(store.latest_root().unwrap().unwrap().leaf_count, 3);
}

#[tokio::test]
async fn test_restart_resumes_and_redelivery_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("txns.db");
    let rows = vec![deposit(0, 101, 10), deposit(1, 102, 20)];

    {
        let mut controller = controller(LedgerStore::open(&path).unwrap());
        let mut source = JsonFileSource::new(rows.clone());
        SubscriptionRunner::new(until_caught_up())
            .run(&mut controller, &mut source, &CancelToken::new())
            .await
            .unwrap();
    }

    // resumes past everything already applied
    let mut resumed = controller(LedgerStore::open(&path).unwrap());
    assert_eq!(resumed.get_watermark().unwrap(), 102);
    let mut source = JsonFileSource::new(rows.clone());
    let summary = SubscriptionRunner::new(until_caught_up())
        .run(&mut resumed, &mut source, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(summary.transactions, 0);
    drop(resumed);

    // a rewound watermark replays the same calls without new rows
    let mut rewound = IngestionController::new(LedgerStore::open(&path).unwrap(), APP);
    rewound
        .initialize(&StartupOptions {
            fast_catchup_height: Some(100),
        })
        .unwrap();
    let mut source = JsonFileSource::new(rows);
    let summary = SubscriptionRunner::new(until_caught_up())
        .run(&mut rewound, &mut source, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(summary.transactions, 2);
    assert_eq!(summary.duplicates, 2);
    assert_eq!(rewound.store().note_count().unwrap(), 2);
    assert_eq!(rewound.store().stats().unwrap().total_deposits, 30);
}

#[tokio::test]
async fn test_bad_transaction_holds_watermark() {
    let mut controller = controller(LedgerStore::open_in_memory().unwrap());
    let mut broken = deposit(1, 120, 5);
    broken.logs = vec![b64(b"short")];

    let mut source = ScriptedSource::new(vec![
        Ok(batch(vec![deposit(0, 110, 5)], 115, false)),
        Ok(batch(vec![broken, deposit(2, 121, 5)], 130, false)),
    ]);

    let result = SubscriptionRunner::new(until_caught_up())
        .run(&mut controller, &mut source, &CancelToken::new())
        .await;

    assert!(matches!(result, Err(Error::Decode(_))));
    assert_eq!(controller.get_watermark().unwrap(), 115);
    assert_eq!(controller.store().get_watermark().unwrap(), 115);
    assert_eq!(controller.store().note_count().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_source_errors_are_retried() {
    let mut controller = controller(LedgerStore::open_in_memory().unwrap());
    let mut source = ScriptedSource::new(vec![
        Err(Error::Source("connection reset".to_string())),
        Err(Error::Source("connection reset".to_string())),
        Ok(batch(vec![deposit(0, 101, 5)], 105, true)),
    ]);

    let summary = SubscriptionRunner::new(until_caught_up())
        .run(&mut controller, &mut source, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(source.polls, 3);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.watermark, 105);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let mut controller = controller(LedgerStore::open_in_memory().unwrap());
    let mut source = ScriptedSource::new(vec![Ok(batch(vec![deposit(0, 101, 5)], 105, false))]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let summary = SubscriptionRunner::default()
        .run(&mut controller, &mut source, &cancel)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.batches, 0);
    assert_eq!(source.polls, 0);
    assert_eq!(controller.get_watermark().unwrap(), APP.creation_block);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_idle() {
    let mut controller = controller(LedgerStore::open_in_memory().unwrap());
    let mut source = ScriptedSource::new(vec![Ok(batch(vec![deposit(0, 101, 5)], 105, true))]);
    let cancel = CancelToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        trigger.cancel();
    });

    let summary = SubscriptionRunner::default()
        .run(&mut controller, &mut source, &cancel)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.watermark, 105);
    assert!(source.polls > 1);
}

#[tokio::test]
async fn test_other_apps_ignored() {
    let mut controller = controller(LedgerStore::open_in_memory().unwrap());
    let mut foreign = deposit(0, 101, 5);
    foreign.application_transaction.application_id = APP.id + 1;
    let mut source = JsonFileSource::new(vec![foreign, deposit(1, 102, 7)]);

    let summary = SubscriptionRunner::new(until_caught_up())
        .run(&mut controller, &mut source, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.transactions, 1);
    assert_eq!(controller.store().note_count().unwrap(), 1);
}
