use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{Account, AccountId, Cents, Entry, Transfer, TransferRequest};

/// A signed adjustment to one account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub account_id: AccountId,
    pub delta: Cents,
}

/// The two balance updates of a transfer, in the order they must be applied.
///
/// The account with the smaller id is always updated first, whichever side of
/// the transfer it is on. Every transfer therefore acquires row locks in the
/// same global order, so two transfers over the same pair can never wait on
/// each other in a cycle.
pub fn ordered_balance_updates(request: &TransferRequest) -> [BalanceUpdate; 2] {
    let debit = BalanceUpdate {
        account_id: request.from_account_id,
        delta: -request.amount,
    };
    let credit = BalanceUpdate {
        account_id: request.to_account_id,
        delta: request.amount,
    };

    if request.from_account_id < request.to_account_id {
        [debit, credit]
    } else {
        [credit, debit]
    }
}

/// Sum of entry amounts for a single account.
pub fn compute_balance(account_id: AccountId, entries: &[Entry]) -> Cents {
    entries
        .iter()
        .filter(|e| e.account_id == account_id)
        .map(|e| e.amount)
        .sum()
}

/// Sum of entry amounts for every account that has entries.
pub fn compute_all_balances(entries: &[Entry]) -> HashMap<AccountId, Cents> {
    let mut balances: HashMap<AccountId, Cents> = HashMap::new();
    for entry in entries {
        *balances.entry(entry.account_id).or_insert(0) += entry.amount;
    }
    balances
}

/// An account whose stored balance disagrees with its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub account_id: AccountId,
    pub balance: Cents,
    pub entry_sum: Cents,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub entry_count: usize,
    pub transfer_count: usize,
    pub mismatches: Vec<BalanceMismatch>,
    pub orphan_entries: usize,
    pub orphan_transfers: usize,
    pub invalid_amounts: usize,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Cross-check accounts against the ledger.
pub fn build_integrity_report(
    accounts: &[Account],
    entries: &[Entry],
    transfers: &[Transfer],
) -> IntegrityReport {
    let known: HashSet<AccountId> = accounts.iter().map(|a| a.id).collect();
    let sums = compute_all_balances(entries);

    let mut mismatches: Vec<BalanceMismatch> = accounts
        .iter()
        .filter_map(|account| {
            let entry_sum = sums.get(&account.id).copied().unwrap_or(0);
            (entry_sum != account.balance).then(|| BalanceMismatch {
                account_id: account.id,
                balance: account.balance,
                entry_sum,
            })
        })
        .collect();
    mismatches.sort_by_key(|m| m.account_id);

    let orphan_entries = entries
        .iter()
        .filter(|e| !known.contains(&e.account_id))
        .count();
    let orphan_transfers = transfers
        .iter()
        .filter(|t| !known.contains(&t.from_account_id) || !known.contains(&t.to_account_id))
        .count();
    let invalid_amounts = transfers.iter().filter(|t| t.amount <= 0).count();

    let mut issues = Vec::new();
    for m in &mismatches {
        issues.push(format!(
            "Account {} balance {} does not match entry sum {}",
            m.account_id, m.balance, m.entry_sum
        ));
    }
    if orphan_entries > 0 {
        issues.push(format!(
            "{} entries reference unknown accounts",
            orphan_entries
        ));
    }
    if orphan_transfers > 0 {
        issues.push(format!(
            "{} transfers reference unknown accounts",
            orphan_transfers
        ));
    }
    if invalid_amounts > 0 {
        issues.push(format!(
            "{} transfers have a non-positive amount",
            invalid_amounts
        ));
    }

    IntegrityReport {
        account_count: accounts.len(),
        entry_count: entries.len(),
        transfer_count: transfers.len(),
        mismatches,
        orphan_entries,
        orphan_transfers,
        invalid_amounts,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn account(id: AccountId, balance: Cents) -> Account {
        Account {
            id,
            owner: format!("owner-{}", id),
            balance,
            currency: "USD".into(),
            created_at: Utc::now(),
        }
    }

    fn entry(id: i64, account_id: AccountId, amount: Cents) -> Entry {
        Entry {
            id,
            account_id,
            amount,
            created_at: Utc::now(),
        }
    }

    fn transfer(id: i64, from: AccountId, to: AccountId, amount: Cents) -> Transfer {
        Transfer {
            id,
            from_account_id: from,
            to_account_id: to,
            amount,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_smaller_id_first_when_source_is_smaller() {
        let updates = ordered_balance_updates(&TransferRequest::new(3, 9, 10));
        assert_eq!(
            updates,
            [
                BalanceUpdate { account_id: 3, delta: -10 },
                BalanceUpdate { account_id: 9, delta: 10 },
            ]
        );
    }

    #[test]
    fn test_smaller_id_first_when_destination_is_smaller() {
        let updates = ordered_balance_updates(&TransferRequest::new(9, 3, 10));
        assert_eq!(
            updates,
            [
                BalanceUpdate { account_id: 3, delta: 10 },
                BalanceUpdate { account_id: 9, delta: -10 },
            ]
        );
    }

    #[test]
    fn test_opposite_directions_share_lock_order() {
        let forward = ordered_balance_updates(&TransferRequest::new(4, 2, 5));
        let backward = ordered_balance_updates(&TransferRequest::new(2, 4, 5));
        let order = |u: [BalanceUpdate; 2]| [u[0].account_id, u[1].account_id];
        assert_eq!(order(forward), order(backward));
    }

    #[test]
    fn test_compute_balance() {
        let entries = vec![entry(1, 1, 100), entry(2, 1, -30), entry(3, 2, 30)];
        assert_eq!(compute_balance(1, &entries), 70);
        assert_eq!(compute_balance(2, &entries), 30);
        assert_eq!(compute_balance(3, &entries), 0);
    }

    #[test]
    fn test_integrity_report_healthy() {
        let accounts = vec![account(1, 70), account(2, 30)];
        let entries = vec![entry(1, 1, 100), entry(2, 1, -30), entry(3, 2, 30)];
        let transfers = vec![transfer(1, 1, 2, 30)];

        let report = build_integrity_report(&accounts, &entries, &transfers);
        assert!(report.is_healthy(), "issues: {:?}", report.issues);
        assert_eq!(report.account_count, 2);
        assert_eq!(report.entry_count, 3);
        assert_eq!(report.transfer_count, 1);
    }

    #[test]
    fn test_integrity_report_detects_mismatch_and_orphans() {
        let accounts = vec![account(1, 50)];
        let entries = vec![entry(1, 1, 100), entry(2, 5, 10)];
        let transfers = vec![transfer(1, 1, 5, 10), transfer(2, 1, 1, 0)];

        let report = build_integrity_report(&accounts, &entries, &transfers);
        assert!(!report.is_healthy());
        assert_eq!(
            report.mismatches,
            vec![BalanceMismatch {
                account_id: 1,
                balance: 50,
                entry_sum: 100
            }]
        );
        assert_eq!(report.orphan_entries, 1);
        assert_eq!(report.orphan_transfers, 1);
        assert_eq!(report.invalid_amounts, 1);
        assert_eq!(report.issues.len(), 4);
    }
}
