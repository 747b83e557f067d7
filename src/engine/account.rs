use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cash state of one run. `balance` is always `available + locked_margin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    balance: Decimal,
    available: Decimal,
    locked_margin: Decimal,
}

impl Account {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            balance: initial_balance,
            available: initial_balance,
            locked_margin: Decimal::ZERO,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn available(&self) -> Decimal {
        self.available
    }

    pub fn locked_margin(&self) -> Decimal {
        self.locked_margin
    }

    pub fn can_afford(&self, margin: Decimal, fee: Decimal) -> bool {
        margin + fee <= self.available
    }

    /// Locks margin for a new position and pays the entry fee.
    pub fn open(&mut self, margin: Decimal, fee: Decimal) {
        self.available -= margin + fee;
        self.locked_margin += margin;
        self.balance -= fee;
        self.check_invariant();
    }

    /// Releases the position's margin and books the realised result.
    pub fn close(&mut self, margin: Decimal, gross_pnl: Decimal, fee: Decimal) {
        self.locked_margin -= margin;
        self.available += margin + gross_pnl - fee;
        self.balance += gross_pnl - fee;
        self.check_invariant();
    }

    fn check_invariant(&self) {
        debug_assert_eq!(
            self.balance,
            self.available + self.locked_margin,
            "balance must equal available + locked margin"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_and_close_keep_balance_identity() {
        let mut account = Account::new(dec!(1000));
        assert!(account.can_afford(dec!(500), dec!(1)));
        account.open(dec!(500), dec!(1));
        assert_eq!(account.balance(), dec!(999));
        assert_eq!(account.available(), dec!(499));
        assert_eq!(account.locked_margin(), dec!(500));

        account.close(dec!(500), dec!(50), dec!(1.05));
        assert_eq!(account.balance(), dec!(1047.95));
        assert_eq!(account.available(), dec!(1047.95));
        assert_eq!(account.locked_margin(), Decimal::ZERO);
    }

    #[test]
    fn test_cannot_afford_more_than_available() {
        let account = Account::new(dec!(100));
        assert!(!account.can_afford(dec!(100), dec!(0.1)));
        assert!(account.can_afford(dec!(99.9), dec!(0.1)));
    }
}
