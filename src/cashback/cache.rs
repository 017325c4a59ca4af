// Balance cache scoped to one unit of work
//
// A batch import touches the same client several times; the cache keeps the
// balance loaded (and locked) on first touch so later sales see earlier writes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::cashback::error::{LedgerError, LedgerResult};
use crate::cashback::models::{CashbackBalance, CashbackProgram};
use crate::store::UnitOfWork;

/// Client balances of one program, mirrored from the unit of work
#[derive(Debug)]
pub struct BalanceCache {
    organization_id: Uuid,
    program_id: Uuid,
    balances: HashMap<Uuid, CashbackBalance>,
}

impl BalanceCache {
    pub fn new(program: &CashbackProgram) -> Self {
        Self {
            organization_id: program.organization_id,
            program_id: program.id,
            balances: HashMap::new(),
        }
    }

    pub fn program_id(&self) -> Uuid {
        self.program_id
    }

    /// Balance of a client, loading or creating it on first use
    pub async fn ensure_entry(
        &mut self,
        uow: &mut dyn UnitOfWork,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> LedgerResult<CashbackBalance> {
        if let Some(balance) = self.balances.get(&client_id) {
            return Ok(balance.clone());
        }

        let balance = match uow.lock_balance(client_id, self.program_id).await? {
            Some(balance) => balance,
            None => {
                tracing::debug!(client_id = %client_id, "Creating zero cashback balance");
                let zero = CashbackBalance::zero(self.organization_id, client_id, self.program_id, now);
                uow.insert_balance(&zero).await?
            }
        };

        self.balances.insert(client_id, balance.clone());
        Ok(balance)
    }

    /// Write a mutated balance through to the unit of work and the cache
    pub async fn store(&mut self, uow: &mut dyn UnitOfWork, balance: CashbackBalance) -> LedgerResult<()> {
        if balance.program_id != self.program_id {
            return Err(LedgerError::ProgramMismatch {
                balance_id: balance.id,
                program_id: self.program_id,
            });
        }

        uow.update_balance(&balance).await?;
        self.balances.insert(balance.client_id, balance);
        Ok(())
    }

    pub fn get(&self, client_id: Uuid) -> Option<&CashbackBalance> {
        self.balances.get(&client_id)
    }
}
