use criterion::{black_box, criterion_group, criterion_main, Criterion};
use persistent_entity::id::PersistenceId;
use persistent_entity::ledger::{InvocationKind, PendingInvocation, PersistenceLedger};

fn push_and_run_head(n: u64) {
    let mut ledger: PersistenceLedger<u64> = PersistenceLedger::new();
    for i in 0..n {
        ledger.push(PendingInvocation {
            event: i,
            handler: Box::new(|_: &u64| {}),
            kind: InvocationKind::Stashing,
        });
    }
    while ledger.run_head().is_some() {}
}

fn batcher_flush_cycle(n: usize) {
    use persistent_entity::batch::JournalBatcher;
    use persistent_entity::protocol::{Envelope, PersistentRepr};

    let pid = PersistenceId::new("bench").unwrap();
    let mut batcher: JournalBatcher<Envelope<u64, ()>> = JournalBatcher::new(50);
    for i in 0..n as u64 {
        batcher.push(Envelope::Persistent(PersistentRepr {
            payload: i,
            sequence_nr: i,
            persistence_id: pid.clone(),
            sender: None,
        }));
        if batcher.should_flush() {
            let _ = batcher.take_for_flush();
            let _ = batcher.on_batch_complete();
        }
    }
}

fn bench_ledger(c: &mut Criterion) {
    c.bench_function("ledger_1000_persist_cycle", |b| {
        b.iter(|| push_and_run_head(black_box(1000)));
    });
}

fn bench_batcher(c: &mut Criterion) {
    c.bench_function("batcher_1000_envelope_flush_cycle", |b| {
        b.iter(|| batcher_flush_cycle(black_box(1000)));
    });
}

criterion_group!(benches, bench_ledger, bench_batcher);
criterion_main!(benches);
