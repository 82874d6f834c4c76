use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::thread;

use airspace_core::hlc::{HlcClock, physical_now};
use airspace_core::{CoreError, IdentificationServiceArea, Subscription};
use airspace_harness::fixtures::{isa, subscription};
use airspace_harness::{TestAirspace, TestManager};
use airspace_storage::{Cancel, ScopeMode, Store, StoreError};

// ============================================================================
// Optimistic concurrency across handles
// ============================================================================

#[test]
fn concurrent_updates_with_same_token_one_wins() -> Result<(), Box<dyn std::error::Error>> {
    let mut airspace = TestAirspace::new()?;
    let a = airspace.add_manager("uss1")?;
    airspace.add_manager("uss1")?;

    let created = airspace.manager_mut(a).put(isa("uss1", &[10, 11, 12]))?;
    let token = created.ovn().ok_or("no token")?;

    let config = airspace.config();
    let (_dir, managers) = airspace.into_parts();
    let barrier = Arc::new(Barrier::new(managers.len()));
    let handles: Vec<_> = managers
        .into_iter()
        .enumerate()
        .map(|(i, mut manager)| {
            let barrier = Arc::clone(&barrier);
            let token = token.clone();
            let mut update = created.clone();
            update.url = format!("https://uss1.example/isa/writer-{i}");
            thread::spawn(move || {
                barrier.wait();
                manager.update(update, &token)
            })
        })
        .collect();

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.join().map_err(|_| "writer panicked")? {
            Ok(written) => winners.push(written),
            Err(StoreError::VersionConflict { .. }) => conflicts += 1,
            Err(other) => return Err(other.into()),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, 1);

    // A fresh handle sees exactly the winner's write.
    let winner = &winners[0];
    let mut observer = TestManager::open("uss1", config)?;
    let stored: IdentificationServiceArea = observer.get(created.id)?;
    assert_eq!(stored.url, winner.url);
    assert_eq!(stored.ovn(), winner.ovn());
    assert_ne!(stored.ovn(), Some(token));
    Ok(())
}

// ============================================================================
// Clock skew across handles
// ============================================================================

fn ten_minutes_fast() -> Result<u64, CoreError> {
    Ok(physical_now()? + 600_000)
}

#[test]
fn row_from_fast_clock_stays_writable() -> Result<(), Box<dyn std::error::Error>> {
    let airspace = TestAirspace::new()?;
    let mut fast = TestManager {
        owner: "uss1".into(),
        store: Store::open(airspace.config())?.with_clock(HlcClock::with_source(ten_minutes_fast)),
        cancel: Cancel::new(),
    };
    let mut normal = TestManager::open("uss1", airspace.config())?;

    let created = fast.put(isa("uss1", &[20, 21]))?;
    let seen: IdentificationServiceArea = normal.get(created.id)?;
    let token = seen.ovn().ok_or("no token")?;

    let mut update = seen.clone();
    update.url = "https://uss1.example/isa/moved".into();
    let updated = normal.update(update, &token)?;
    assert!(updated.updated_at > created.updated_at);
    assert_ne!(updated.ovn(), Some(token));

    // The fast handle can keep writing on top.
    let next = updated.ovn().ok_or("no token")?;
    let again = fast.update(updated.clone(), &next)?;
    assert!(again.updated_at > updated.updated_at);
    Ok(())
}

#[test]
fn handles_share_one_database() -> Result<(), Box<dyn std::error::Error>> {
    let mut airspace = TestAirspace::new()?;
    let writer = airspace.add_manager("uss1")?;
    let reader = airspace.add_manager("uss2")?;

    let sub = airspace.manager_mut(writer).put(subscription("uss1", &[4]))?;
    let seen: Subscription = airspace.manager_mut(reader).get(sub.id)?;
    assert_eq!(seen.ovn(), sub.ovn());
    assert_eq!(airspace.manager(reader).owner, "uss2");
    Ok(())
}

// ============================================================================
// Atomicity
// ============================================================================

#[test]
fn panic_inside_scope_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let mut uss = TestManager::new("uss1")?;
    let doomed = isa("uss1", &[1]);
    let cancel = uss.cancel.clone();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        uss.store.transact(&cancel, |scope| -> Result<(), StoreError> {
            scope.upsert(doomed.clone(), None)?;
            panic!("writer crashed mid-scope");
        })
    }));
    assert!(outcome.is_err());

    assert!(matches!(
        uss.get::<IdentificationServiceArea>(doomed.id),
        Err(StoreError::NotFound { .. })
    ));
    // The handle is still usable afterwards.
    uss.put(isa("uss1", &[2]))?;
    Ok(())
}

#[test]
fn error_inside_scope_discards_earlier_writes() -> Result<(), Box<dyn std::error::Error>> {
    let mut uss = TestManager::new("uss1")?;
    let area = isa("uss1", &[1]);
    let sub = subscription("uss1", &[1]);
    let cancel = uss.cancel.clone();

    let result = uss.store.transact(&cancel, |scope| {
        scope.upsert(area.clone(), None)?;
        scope.upsert(sub.clone(), None)?;
        scope.delete::<Subscription>(airspace_core::SubscriptionId::new())
    });
    assert!(matches!(result, Err(StoreError::NotFound { .. })));

    assert!(uss.get::<IdentificationServiceArea>(area.id).is_err());
    assert!(uss.get::<Subscription>(sub.id).is_err());
    Ok(())
}

#[test]
fn read_scope_rejects_mutation() -> Result<(), Box<dyn std::error::Error>> {
    let mut uss = TestManager::new("uss1")?;
    let area = isa("uss1", &[1]);
    let cancel = uss.cancel.clone();

    let result = uss.store.read(&cancel, |scope| {
        assert_eq!(scope.mode(), ScopeMode::Read);
        scope.upsert(area.clone(), None)
    });
    assert!(matches!(result, Err(StoreError::InvalidInput(_))));
    assert!(uss.get::<IdentificationServiceArea>(area.id).is_err());
    Ok(())
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn cancelled_mid_scope_commits_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut uss = TestManager::new("uss1")?;
    let first = isa("uss1", &[1]);
    let second = isa("uss1", &[2]);
    let cancel = Cancel::new();
    let trigger = cancel.clone();

    let result = uss.store.transact(&cancel, |scope| {
        scope.upsert(first.clone(), None)?;
        trigger.cancel();
        scope.upsert(second.clone(), None)
    });
    assert!(matches!(result, Err(StoreError::Cancelled { .. })));

    assert!(uss.get::<IdentificationServiceArea>(first.id).is_err());
    assert!(uss.get::<IdentificationServiceArea>(second.id).is_err());
    Ok(())
}

#[test]
fn cancelled_before_commit_commits_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut uss = TestManager::new("uss1")?;
    let area = isa("uss1", &[1]);
    let cancel = Cancel::new();
    let trigger = cancel.clone();

    let result = uss.store.transact(&cancel, |scope| {
        let written = scope.upsert(area.clone(), None)?;
        trigger.cancel();
        Ok(written)
    });
    assert!(matches!(result, Err(StoreError::Cancelled { .. })));
    assert!(uss.get::<IdentificationServiceArea>(area.id).is_err());
    Ok(())
}

#[test]
fn cancelled_token_refuses_new_scopes() -> Result<(), Box<dyn std::error::Error>> {
    let mut uss = TestManager::new("uss1")?;
    let written = uss.put(isa("uss1", &[1]))?;

    let cancel = Cancel::new();
    cancel.cancel();
    let result = uss.store.get::<IdentificationServiceArea>(&cancel, written.id);
    assert!(matches!(result, Err(StoreError::Cancelled { .. })));
    Ok(())
}
