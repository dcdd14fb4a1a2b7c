//! End-to-end pot lifecycle through the public service API.
//!
//! Exercises the full open -> locked -> settled path, the refund path, and
//! the concurrency guarantees around ticket allocation.

use caseforge::{
    CreatePotParams, EngineConfig, EngineError, FairnessEngine, InMemoryLedger, LedgerGateway,
    MemoryStore, PotService, PotStatus,
};
use std::sync::Arc;

fn engine() -> (Arc<PotService>, Arc<InMemoryLedger>) {
    let ledger = Arc::new(InMemoryLedger::new());
    let pots = Arc::new(PotService::new(
        Arc::new(MemoryStore::new()),
        ledger.clone(),
        Arc::new(FairnessEngine::new()),
        Arc::new(caseforge::EngineMetrics::new()),
        EngineConfig::for_tests(),
    ));
    (pots, ledger)
}

fn ten_ticket_pot() -> CreatePotParams {
    CreatePotParams {
        entry_cost: 5,
        max_tickets: 10,
        max_per_user: None,
        expires_in_minutes: None,
    }
}

#[tokio::test]
async fn test_full_lifecycle_pays_the_pool_to_one_winner() {
    let (pots, ledger) = engine();
    ledger.seed_balance("alice", 100);
    ledger.seed_balance("bob", 100);

    // === Fill a 10-ticket pot ===
    let pot = pots.create_pot(ten_ticket_pot()).await.unwrap();
    assert_eq!(pot.status, PotStatus::Open);
    assert_eq!(pot.server_seed_hash.len(), 64);

    let alice_entry = pots.join_pot(pot.id, "alice", 4).await.unwrap();
    assert_eq!(alice_entry.ticket_start, 0);
    assert_eq!(alice_entry.ticket_end, 4);

    // 6 remain, so 7 must be refused in full.
    let err = pots.join_pot(pot.id, "bob", 7).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::TicketsExhausted {
            remaining: 6,
            requested: 7,
            ..
        }
    ));

    let bob_entry = pots.join_pot(pot.id, "bob", 6).await.unwrap();
    assert_eq!(bob_entry.ticket_start, 4);
    assert_eq!(bob_entry.ticket_end, 10);

    // Stakes are held by the pot now.
    assert_eq!(ledger.balance("alice").await.unwrap(), 80);
    assert_eq!(ledger.balance("bob").await.unwrap(), 70);

    // === Lock and settle ===
    pots.lock_pot(pot.id).await.unwrap();
    let outcome = pots.settle_pot(pot.id, None).await.unwrap();

    assert!(outcome.winning_ticket < 10);
    assert_eq!(outcome.rake, 0);
    assert_eq!(outcome.payout, 50);

    let expected_winner = if outcome.winning_ticket < 4 {
        "alice"
    } else {
        "bob"
    };
    assert_eq!(outcome.winner_user_id, expected_winner);

    // Exactly the pool moved: loser keeps the post-join balance, winner
    // gains the full 50.
    let alice = ledger.balance("alice").await.unwrap();
    let bob = ledger.balance("bob").await.unwrap();
    assert_eq!(alice + bob, 200);
    if expected_winner == "alice" {
        assert_eq!(alice, 130);
    } else {
        assert_eq!(bob, 120);
    }

    let settled = pots.get_pot(pot.id).await.unwrap();
    assert_eq!(settled.status, PotStatus::Settled);
    assert_eq!(settled.revealed_seed.as_deref(), Some(outcome.revealed_seed.as_str()));
}

#[tokio::test]
async fn test_concurrent_joins_never_oversell_or_overlap() {
    let (pots, ledger) = engine();
    for i in 0..20 {
        ledger.seed_balance(&format!("user-{}", i), 100);
    }

    let pot = pots
        .create_pot(CreatePotParams {
            entry_cost: 10,
            max_tickets: 10,
            max_per_user: None,
            expires_in_minutes: None,
        })
        .await
        .unwrap();

    // 20 users race for 10 tickets, one each.
    let mut handles = Vec::new();
    for i in 0..20 {
        let pots = pots.clone();
        let pot_id = pot.id;
        let user = format!("user-{}", i);
        handles.push(tokio::spawn(
            async move { pots.join_pot(pot_id, &user, 1).await },
        ));
    }

    let mut accepted = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::TicketsExhausted { .. }) => exhausted += 1,
            Err(other) => panic!("unexpected join failure: {}", other),
        }
    }
    assert_eq!(accepted, 10);
    assert_eq!(exhausted, 10);

    // Ranges tile [0, 10) with no gaps and no overlaps.
    let entries = pots.entries(pot.id).await.unwrap();
    assert_eq!(entries.len(), 10);
    let mut next = 0;
    for entry in &entries {
        assert_eq!(entry.ticket_start, next, "gap or overlap at ticket {}", next);
        assert_eq!(entry.ticket_end, entry.ticket_start + entry.ticket_count);
        next = entry.ticket_end;
    }
    assert_eq!(next, 10);

    let pot = pots.get_pot(pot.id).await.unwrap();
    assert_eq!(pot.tickets_sold, 10);

    // Only winners of the race were charged.
    let mut total: u64 = 0;
    for i in 0..20 {
        total += ledger.balance(&format!("user-{}", i)).await.unwrap();
    }
    assert_eq!(total, 20 * 100 - 10 * 10);
}

#[tokio::test]
async fn test_settle_is_idempotent() {
    let (pots, ledger) = engine();
    ledger.seed_balance("alice", 100);
    ledger.seed_balance("bob", 100);

    let pot = pots.create_pot(ten_ticket_pot()).await.unwrap();
    pots.join_pot(pot.id, "alice", 5).await.unwrap();
    pots.join_pot(pot.id, "bob", 5).await.unwrap();
    pots.lock_pot(pot.id).await.unwrap();

    let first = pots.settle_pot(pot.id, None).await.unwrap();
    let balances_after = (
        ledger.balance("alice").await.unwrap(),
        ledger.balance("bob").await.unwrap(),
    );

    // A replayed settle reports the same result and moves no funds.
    let second = pots.settle_pot(pot.id, None).await.unwrap();
    assert_eq!(first.winning_ticket, second.winning_ticket);
    assert_eq!(first.winner_user_id, second.winner_user_id);
    assert_eq!(first.payout, second.payout);
    assert_eq!(first.revealed_seed, second.revealed_seed);

    assert_eq!(
        balances_after,
        (
            ledger.balance("alice").await.unwrap(),
            ledger.balance("bob").await.unwrap(),
        )
    );
}

#[tokio::test]
async fn test_cancel_refunds_every_entry_exactly_once() {
    let (pots, ledger) = engine();
    ledger.seed_balance("alice", 100);
    ledger.seed_balance("bob", 100);

    let pot = pots.create_pot(ten_ticket_pot()).await.unwrap();
    pots.join_pot(pot.id, "alice", 4).await.unwrap();
    pots.join_pot(pot.id, "bob", 3).await.unwrap();
    assert_eq!(ledger.balance("alice").await.unwrap(), 80);
    assert_eq!(ledger.balance("bob").await.unwrap(), 85);

    let cancelled = pots.cancel_pot(pot.id).await.unwrap();
    assert_eq!(cancelled.status, PotStatus::Cancelled);
    assert_eq!(ledger.balance("alice").await.unwrap(), 100);
    assert_eq!(ledger.balance("bob").await.unwrap(), 100);

    // A second cancel is rejected and does not refund again.
    let err = pots.cancel_pot(pot.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert_eq!(ledger.balance("alice").await.unwrap(), 100);
    assert_eq!(ledger.balance("bob").await.unwrap(), 100);
}

#[tokio::test]
async fn test_rake_is_withheld_from_the_payout() {
    let ledger = Arc::new(InMemoryLedger::new());
    let mut config = EngineConfig::for_tests();
    config.fairness.rake_bps = 500; // 5%
    let pots = Arc::new(PotService::new(
        Arc::new(MemoryStore::new()),
        ledger.clone(),
        Arc::new(FairnessEngine::new()),
        Arc::new(caseforge::EngineMetrics::new()),
        config,
    ));
    ledger.seed_balance("alice", 1000);
    ledger.seed_balance("bob", 1000);

    let pot = pots
        .create_pot(CreatePotParams {
            entry_cost: 100,
            max_tickets: 10,
            max_per_user: None,
            expires_in_minutes: None,
        })
        .await
        .unwrap();
    pots.join_pot(pot.id, "alice", 5).await.unwrap();
    pots.join_pot(pot.id, "bob", 5).await.unwrap();
    pots.lock_pot(pot.id).await.unwrap();

    let outcome = pots.settle_pot(pot.id, None).await.unwrap();
    assert_eq!(outcome.rake, 50);
    assert_eq!(outcome.payout, 950);
}

#[tokio::test]
async fn test_verification_bundle_replays_the_draw() {
    let (pots, ledger) = engine();
    ledger.seed_balance("alice", 100);
    ledger.seed_balance("bob", 100);

    let pot = pots.create_pot(ten_ticket_pot()).await.unwrap();
    pots.join_pot(pot.id, "alice", 6).await.unwrap();
    pots.join_pot(pot.id, "bob", 4).await.unwrap();
    pots.lock_pot(pot.id).await.unwrap();
    let outcome = pots.settle_pot(pot.id, None).await.unwrap();

    let verification = pots.verify_pot(pot.id).await.unwrap();
    assert_eq!(verification.seed_matches_commitment, Some(true));
    assert_eq!(verification.winning_ticket, Some(outcome.winning_ticket));

    // The published message alone reproduces the winning ticket.
    let seed = verification.revealed_seed.unwrap();
    let replayed =
        FairnessEngine::draw_pot_winner(&seed, &verification.server_seed_hash, pot.id, 10).unwrap();
    assert_eq!(replayed, outcome.winning_ticket);
}

#[tokio::test]
async fn test_per_user_limit_holds_across_entries() {
    let (pots, ledger) = engine();
    ledger.seed_balance("alice", 1000);

    let pot = pots
        .create_pot(CreatePotParams {
            entry_cost: 5,
            max_tickets: 100,
            max_per_user: Some(10),
            expires_in_minutes: None,
        })
        .await
        .unwrap();

    pots.join_pot(pot.id, "alice", 6).await.unwrap();
    pots.join_pot(pot.id, "alice", 4).await.unwrap();

    let err = pots.join_pot(pot.id, "alice", 1).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::PerUserLimitExceeded {
            limit: 10,
            held: 10,
            requested: 1,
            ..
        }
    ));
}
